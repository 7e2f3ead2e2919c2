//! Web search through the Serper API

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SearchSettings;

/// Maximum organic results handed back to the model
pub const MAX_RESULTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Web Search API key is not configured in settings.")]
    MissingApiKey,
    /// Provider rejected the request; carries its `message` when it sent one
    #[error("{0}")]
    Provider(String),
    #[error("{0}")]
    Request(#[from] reqwest::Error),
}

/// One organic search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: Option<String>,
}

#[derive(Clone)]
pub struct SearchClient {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("endpoint", &self.endpoint)
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl SearchClient {
    pub fn new(settings: &SearchSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Query the provider and keep at most [`MAX_RESULTS`] organic hits
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        if !self.is_configured() {
            return Err(SearchError::MissingApiKey);
        }

        debug!(query, "Searching the web");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query }))
            .send()
            .await?;

        if !response.status().is_success() {
            let message = response
                .json::<ProviderError>()
                .await
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Failed to fetch search results.".to_string());
            return Err(SearchError::Provider(message));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.organic.into_iter().take(MAX_RESULTS).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: &str) -> SearchClient {
        SearchClient::new(&SearchSettings {
            api_key: api_key.to_string(),
            endpoint: format!("{}/search", server.uri()),
        })
    }

    #[tokio::test]
    async fn test_search_truncates_to_five() {
        let server = MockServer::start().await;
        let organic: Vec<_> = (0..8)
            .map(|i| json!({"title": format!("t{i}"), "link": format!("https://e.com/{i}"), "snippet": "s", "position": i}))
            .collect();
        Mock::given(method("POST"))
            .and(header("X-API-KEY", "serper-key"))
            .and(body_json(json!({"q": "rust async"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"organic": organic})))
            .expect(1)
            .mount(&server)
            .await;

        let hits = client_for(&server, "serper-key").search("rust async").await.unwrap();
        assert_eq!(hits.len(), MAX_RESULTS);
        assert_eq!(hits[0].title.as_deref(), Some("t0"));
        assert_eq!(hits[4].link.as_deref(), Some("https://e.com/4"));
    }

    #[tokio::test]
    async fn test_missing_organic_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"searchParameters": {}})))
            .mount(&server)
            .await;

        let hits = client_for(&server, "k").search("nothing").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_provider_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Unauthorized."})))
            .mount(&server)
            .await;

        let err = client_for(&server, "k").search("q").await.unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized.");
    }

    #[tokio::test]
    async fn test_provider_error_without_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = client_for(&server, "k").search("q").await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch search results.");
    }
}
