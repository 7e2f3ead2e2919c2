//! Tracing setup: console/JSON logs plus optional OpenTelemetry export
//!
//! Every agent turn opens an `agent_turn` span carrying a `trace_id`; LLM
//! calls, tool calls and sandbox executions nest beneath it. With an OTLP
//! endpoint configured those spans are exported as well:
//!
//! ```text
//! nexus → OTLP (gRPC) → OTel Collector → Tempo / Jaeger
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info,nexus=debug";

/// Options for [`init_tracing`]
#[derive(Debug, Clone, Default)]
pub struct TracingOptions<'a> {
    /// OTLP collector endpoint; spans are only exported when set
    pub otlp_endpoint: Option<&'a str>,
    /// Emit newline-delimited JSON instead of human-readable lines
    pub json: bool,
    /// Fallback filter directive (defaults to `info,nexus=debug`)
    pub default_filter: Option<&'a str>,
}

/// Initialize the tracing subsystem
///
/// # Arguments
/// * `service_name` - Name for the service in exported traces
/// * `options` - Exporter and formatting options
///
/// # Example
/// ```ignore
/// init_tracing("nexus", TracingOptions { otlp_endpoint: Some("http://localhost:4317"), ..Default::default() })?;
/// ```
pub fn init_tracing(
    service_name: &str,
    options: TracingOptions<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_filter.unwrap_or(DEFAULT_FILTER)));

    let fmt_layer = if options.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let otel_layer = match options.otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::debug!(
        service = service_name,
        otlp_endpoint = options.otlp_endpoint.unwrap_or("disabled"),
        "Tracing initialized"
    );

    Ok(())
}

/// Flush pending spans to the collector
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_default_options_disable_export() {
        let options = TracingOptions::default();
        assert!(options.otlp_endpoint.is_none());
        assert!(!options.json);
    }
}
