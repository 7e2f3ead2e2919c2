use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use nexus::agent::store::{default_data_dir, load_settings, save_settings};
use nexus::config::{RuntimeKind, KNOWN_MODELS};
use nexus::observer::tool_result_display;
use nexus::tracing::{init_tracing, shutdown_tracing, TracingOptions};
use nexus::{
    AgentLoop, ChatApp, CompletionClient, ConversationStore, FileStore, KeyValueStore, Message,
    Notice, NoticeLevel, Settings, SubmitOutcome, TurnObserver, TurnOutcome,
};

const WELCOME: &str = "Welcome to Nexus! How can I assist you today?";
const TURN_IN_FLIGHT: &str = "a turn is still in flight";

#[derive(Parser)]
#[command(author, version, about = "Terminal chat client with web search and sandboxed code execution", long_about = None)]
struct Cli {
    /// Directory holding settings and conversations (defaults to ~/.nexus)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Export spans to this OTLP collector endpoint
    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    /// Log as newline-delimited JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Model to use for this run (overrides settings)
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Ask a single question in a new conversation and exit
    Ask {
        /// The prompt to send
        prompt: Vec<String>,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// List the known model ids
    Models,
    /// Delete all settings and conversations
    Reset {
        /// Skip the safety check
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings (API keys redacted)
    Show,
    /// Set one value, e.g. `llm.api_key sk-...` or `agent.max_turns 3`
    Set { key: String, value: String },
}

/// Prints turn events to the terminal
struct TerminalObserver;

impl TurnObserver for TerminalObserver {
    fn message_appended(&self, message: &Message) {
        match message {
            Message::Assistant { content: Some(text), .. } if !text.is_empty() => {
                println!("\nNexus: {}\n", text);
            }
            Message::Assistant { tool_calls, .. } => {
                for call in tool_calls {
                    println!("[tool] {} {}", call.name(), call.function.arguments);
                }
            }
            Message::System { content } => println!("[system] {}", content),
            Message::User { .. } | Message::Tool { .. } => {}
        }
    }

    fn tool_result(&self, tool_name: &str, content: &str) {
        let pretty = serde_json::from_str::<serde_json::Value>(content)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| content.to_string());
        println!("{}\n", tool_result_display(tool_name, &pretty));
    }

    fn notice(&self, notice: Notice) {
        let level = match notice.level {
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{}] {}: {}", level, notice.title, notice.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(
        "nexus",
        TracingOptions {
            otlp_endpoint: cli.otlp_endpoint.as_deref(),
            json: cli.json_logs,
            default_filter: Some("warn,nexus=info"),
        },
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let backend = Arc::new(
        FileStore::new(&data_dir).with_context(|| format!("cannot open data directory {}", data_dir.display()))?,
    );

    let mut settings = load_settings(&*backend).context("failed to load settings")?;
    if let Some(model) = &cli.model {
        settings.llm.model = model.clone();
    }

    let result = match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(backend, &settings).await,
        Command::Ask { prompt } => ask(backend, &settings, &prompt.join(" ")).await,
        Command::Config { action } => config(&*backend, action.unwrap_or(ConfigAction::Show)),
        Command::Models => {
            for model in KNOWN_MODELS {
                let marker = if *model == settings.llm.model { "*" } else { " " };
                println!("{} {}", marker, model);
            }
            Ok(())
        }
        Command::Reset { yes } => reset(&*backend, yes),
    };

    if cli.otlp_endpoint.is_some() {
        shutdown_tracing();
    }
    result
}

fn build_app(backend: Arc<FileStore>, settings: &Settings) -> Result<ChatApp<CompletionClient>> {
    let agent = AgentLoop::from_settings(CompletionClient::new(&settings.llm), settings);
    let store = ConversationStore::load(backend, settings.advanced.auto_save).context("failed to load conversations")?;
    Ok(ChatApp::new(agent, store))
}

async fn ask(backend: Arc<FileStore>, settings: &Settings, prompt: &str) -> Result<()> {
    let app = build_app(backend, settings)?;
    let id = app.with_store_mut(|s| s.create()).context(TURN_IN_FLIGHT)?;

    match app.submit(&id, prompt, &TerminalObserver).await {
        SubmitOutcome::Completed(report) => match report.outcome {
            TurnOutcome::Failed(e) => bail!(e),
            TurnOutcome::ProtocolViolation => bail!("the model sent a malformed tool-call response"),
            TurnOutcome::Completed | TurnOutcome::BudgetExhausted => Ok(()),
        },
        SubmitOutcome::EmptyInput => bail!("nothing to ask"),
        other => bail!("submission not accepted: {:?}", other),
    }
}

async fn chat(backend: Arc<FileStore>, settings: &Settings) -> Result<()> {
    let app = build_app(backend, settings)?;
    let mut current = app
        .with_store_mut(|s| {
            let recent = s.most_recent().map(|conv| conv.id.clone());
            recent.unwrap_or_else(|| s.create())
        })
        .context(TURN_IN_FLIGHT)?;

    println!("Nexus ({}) - type /help for commands", settings.llm.model);
    show_conversation(&app, &current);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            let name = parts.next().unwrap_or_default();
            let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());
            match name {
                "quit" | "exit" => break,
                "help" => print_help(),
                "new" => {
                    current = app.with_store_mut(|s| s.create()).context(TURN_IN_FLIGHT)?;
                    show_conversation(&app, &current);
                }
                "list" => app.with_store(|s| {
                    for summary in s.list() {
                        let marker = if summary.id == current { "*" } else { " " };
                        println!(
                            "{} {}  {}  ({} messages, {})",
                            marker,
                            summary.id,
                            summary.title,
                            summary.message_count,
                            summary.updated_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }),
                "open" => match arg {
                    Some(id) if app.with_store(|s| s.contains(id)) => {
                        current = id.to_string();
                        show_conversation(&app, &current);
                    }
                    Some(id) => println!("No conversation {}", id),
                    None => println!("Usage: /open <id>"),
                },
                "clear" => {
                    app.with_store_mut(|s| {
                        s.clear_messages(&current);
                        s.persist()
                    })
                    .context(TURN_IN_FLIGHT)?
                    .context("failed to save conversations")?;
                    println!("Conversation cleared.");
                }
                "export" => {
                    let exported = app.with_store(|s| s.get(&current).map(|c| (c.export_file_name(), c.to_markdown())));
                    if let Some((file_name, markdown)) = exported {
                        let path = arg.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(file_name));
                        std::fs::write(&path, markdown).with_context(|| format!("cannot write {}", path.display()))?;
                        println!("Exported to {}", path.display());
                    }
                }
                "metrics" => print!("{}", nexus::metrics::gather_text()),
                other => println!("Unknown command /{} (try /help)", other),
            }
            continue;
        }

        match app.submit(&current, line, &TerminalObserver).await {
            SubmitOutcome::Completed(report) if report.outcome == TurnOutcome::BudgetExhausted => {
                println!("[agent] stopped after {} model calls", report.llm_calls);
            }
            SubmitOutcome::Busy => println!("[agent] still working on the previous message"),
            SubmitOutcome::UnknownConversation => {
                current = app.with_store_mut(|s| s.create()).context(TURN_IN_FLIGHT)?;
            }
            _ => {}
        }
    }

    app.with_store(|s| s.save()).context("failed to save conversations")?;
    Ok(())
}

fn show_conversation(app: &ChatApp<CompletionClient>, id: &str) {
    app.with_store(|s| {
        let Some(conv) = s.get(id) else { return };
        println!("── {} ({})", conv.title, conv.id);
        if conv.is_empty() {
            println!("\nNexus: {}\n", WELCOME);
            return;
        }
        for message in &conv.messages {
            match message {
                Message::User { content } => println!("You: {}", content),
                Message::Assistant { content: Some(text), .. } if !text.is_empty() => println!("Nexus: {}", text),
                Message::System { content } => println!("[system] {}", content),
                _ => {}
            }
        }
        println!();
    });
}

fn print_help() {
    println!("/new            start a new conversation");
    println!("/list           list conversations");
    println!("/open <id>      switch conversation");
    println!("/clear          clear the current conversation");
    println!("/export [path]  write the conversation as markdown");
    println!("/metrics        print Prometheus metrics");
    println!("/quit           exit");
}

fn config(backend: &dyn KeyValueStore, action: ConfigAction) -> Result<()> {
    // Work on the stored document, not the env-overridden view
    let mut settings: Settings = nexus::agent::store::load_json(backend, nexus::agent::store::SETTINGS_KEY)?.unwrap_or_default();

    match action {
        ConfigAction::Show => {
            let mut shown = settings.clone();
            redact(&mut shown.llm.api_key);
            redact(&mut shown.search.api_key);
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Set { key, value } => {
            match key.as_str() {
                "llm.api_key" => settings.llm.api_key = value,
                "llm.endpoint" => settings.llm.endpoint = value,
                "llm.model" => settings.llm.model = value,
                "llm.max_tokens" => settings.llm.max_tokens = value.parse().context("max_tokens must be an integer")?,
                "llm.temperature" => settings.llm.temperature = value.parse().context("temperature must be a number")?,
                "search.api_key" => settings.search.api_key = value,
                "search.endpoint" => settings.search.endpoint = value,
                "sandbox.runtime" => {
                    settings.sandbox.runtime = match value.as_str() {
                        "javascript" => RuntimeKind::Javascript,
                        "shell" => RuntimeKind::Shell,
                        other => bail!("unknown runtime {:?} (javascript or shell)", other),
                    }
                }
                "sandbox.timeout_secs" => {
                    settings.sandbox.timeout_secs = value.parse().context("timeout_secs must be an integer")?
                }
                "agent.max_turns" => settings.agent.max_turns = value.parse().context("max_turns must be an integer")?,
                "agent.system_prompt" => settings.agent.system_prompt = Some(value).filter(|v| !v.is_empty()),
                "advanced.auto_save" => settings.advanced.auto_save = value.parse().context("auto_save must be true or false")?,
                other => bail!("unknown setting {:?}", other),
            }
            save_settings(backend, &settings)?;
            println!("Settings saved.");
        }
    }
    Ok(())
}

fn redact(key: &mut String) {
    if !key.is_empty() {
        *key = "<redacted>".to_string();
    }
}

fn reset(backend: &dyn KeyValueStore, yes: bool) -> Result<()> {
    if !yes {
        bail!("this deletes all settings and conversations; re-run with --yes to confirm");
    }
    backend.clear()?;
    println!("All data deleted.");
    Ok(())
}
