//! skein CLI: run event-sourced agent sessions from the command line.
//!
//! Subcommands: `start` (new session + one processing pass), `message`
//! (append a user message and process), `continue` (process an existing
//! stream), `show` (transcript or raw events), `list` (recent sessions).
//!
//! Exit codes: 0 success, 1 engine/store error, 2 argument errors.

mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use config::Settings;
use skein::store::MessageDbConfig;
use skein::{
    llm, llm_context, session_state, ContextMessage, EventStore, MessageDbStore, ProcessingEngine,
    SessionState, StreamName, ToolRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(about = "skein — event-sourced agent sessions")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new session with an initial message and process it.
    Start {
        /// The first user message.
        message: String,
    },
    /// Append a user message to an existing session and process it.
    Message {
        /// Thread id returned by `start`.
        thread_id: String,
        /// The user message text.
        text: String,
    },
    /// Run a processing pass on an existing session.
    Continue {
        thread_id: String,
    },
    /// Print a session's transcript or raw events.
    Show {
        thread_id: String,
        /// Output format.
        #[arg(long, value_enum, default_value_t = ShowFormat::Text)]
        format: ShowFormat,
        /// Include every event, not just the conversation.
        #[arg(long)]
        full: bool,
    },
    /// List recent sessions.
    List {
        /// Maximum number of sessions to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ShowFormat {
    Text,
    Json,
}

/// Failures mapped to exit codes: `Args` → 2, `Run` → 1.
enum CliError {
    Args(String),
    Run(String),
}

impl<E: std::error::Error> From<E> for CliError {
    fn from(e: E) -> Self {
        CliError::Run(e.to_string())
    }
}

fn parse_thread_id(raw: &str) -> Result<Uuid, CliError> {
    Uuid::parse_str(raw).map_err(|_| CliError::Args(format!("not a thread id: {}", raw)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = config::load_and_apply(None) {
        eprintln!("error: {}", e);
        return ExitCode::from(1);
    }
    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };
    logging::init(
        &settings.log_level,
        settings.log_format,
        settings.enable_tracing,
    );

    match run(args.cmd, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Run(message)) => {
            eprintln!("error: {}", message);
            ExitCode::from(1)
        }
        Err(CliError::Args(message)) => {
            eprintln!("error: {}", message);
            ExitCode::from(2)
        }
    }
}

async fn run(cmd: Command, settings: Settings) -> Result<(), CliError> {
    let store = Arc::new(MessageDbStore::connect(&MessageDbConfig {
        host: settings.db.host.clone(),
        port: settings.db.port,
        dbname: settings.db.name.clone(),
        user: settings.db.user.clone(),
        password: settings.db.password.clone(),
    })?);

    match cmd {
        Command::Start { message } => {
            let engine = build_engine(Arc::clone(&store), &settings)?;
            let thread_id = engine.start_session(&message).await?;
            println!("thread: {}", thread_id);
            let state = engine.process_thread(thread_id).await?;
            print_outcome(&store, thread_id, &state).await?;
        }
        Command::Message { thread_id, text } => {
            let thread_id = parse_thread_id(&thread_id)?;
            let engine = build_engine(Arc::clone(&store), &settings)?;
            engine.add_user_message(thread_id, &text).await?;
            let state = engine.process_thread(thread_id).await?;
            print_outcome(&store, thread_id, &state).await?;
        }
        Command::Continue { thread_id } => {
            let thread_id = parse_thread_id(&thread_id)?;
            let engine = build_engine(Arc::clone(&store), &settings)?;
            let state = engine.process_thread(thread_id).await?;
            print_outcome(&store, thread_id, &state).await?;
        }
        Command::Show {
            thread_id,
            format,
            full,
        } => {
            let thread_id = parse_thread_id(&thread_id)?;
            show(&store, thread_id, format, full).await?;
        }
        Command::List { limit } => {
            list(&store, limit).await?;
        }
    }
    Ok(())
}

fn build_engine(
    store: Arc<MessageDbStore>,
    settings: &Settings,
) -> Result<ProcessingEngine, CliError> {
    let adapter = llm::adapter_for_model(&settings.model_name)?;
    let engine = ProcessingEngine::new(
        store as Arc<dyn EventStore>,
        Arc::from(adapter),
        Arc::new(ToolRegistry::with_builtins()),
    )
    .with_max_iterations(settings.max_iterations);
    Ok(engine)
}

/// Prints the final assistant reply (when there is one) and the session status.
async fn print_outcome(
    store: &MessageDbStore,
    thread_id: Uuid,
    state: &SessionState,
) -> Result<(), CliError> {
    let stream = StreamName::for_thread(thread_id);
    let events = store.read_stream(&stream).await?;
    if let Some(reply) = last_assistant_reply(&llm_context(&events)) {
        println!("{}", reply);
    }
    println!("status: {}", state.status);
    Ok(())
}

fn last_assistant_reply(messages: &[ContextMessage]) -> Option<&str> {
    messages.iter().rev().find_map(|m| match m {
        ContextMessage::Assistant { content, .. } if !content.is_empty() => Some(content.as_str()),
        _ => None,
    })
}

async fn show(
    store: &MessageDbStore,
    thread_id: Uuid,
    format: ShowFormat,
    full: bool,
) -> Result<(), CliError> {
    let stream = StreamName::for_thread(thread_id);
    let events = store.read_stream(&stream).await?;
    if events.is_empty() {
        return Err(CliError::Args(format!("no session for thread {}", thread_id)));
    }

    match format {
        ShowFormat::Json => {
            let value = if full {
                serde_json::to_value(&events)
            } else {
                serde_json::to_value(session_state(&events))
            }
            .map_err(|e| CliError::Run(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&value).map_err(|e| CliError::Run(e.to_string()))?);
        }
        ShowFormat::Text => {
            let state = session_state(&events);
            println!("thread: {}  status: {}", thread_id, state.status);
            if full {
                for event in &events {
                    println!("[{:>3}] {}  {}", event.position, event.time.to_rfc3339(), event.kind);
                }
            } else {
                for message in llm_context(&events) {
                    match message {
                        ContextMessage::User { content } => println!("user> {}", content),
                        ContextMessage::Assistant {
                            content,
                            tool_calls,
                        } => {
                            if !content.is_empty() {
                                println!("assistant> {}", content);
                            }
                            for call in tool_calls {
                                println!("assistant> [tool call {} {}]", call.name, call.arguments);
                            }
                        }
                        ContextMessage::Tool { content, .. } => println!("tool> {}", content),
                    }
                }
            }
        }
    }
    Ok(())
}

async fn list(store: &MessageDbStore, limit: usize) -> Result<(), CliError> {
    let category = StreamName::for_thread(Uuid::nil()).category_prefix();
    // SessionStarted events, in arrival order, identify the sessions.
    let events = store.read_category(&category, 0, 1000).await?;
    let mut streams: Vec<String> = Vec::new();
    for event in events {
        if event.kind == skein::event::kind::SESSION_STARTED
            && !streams.contains(&event.stream_name)
        {
            streams.push(event.stream_name.clone());
        }
    }

    for stream_name in streams.iter().rev().take(limit) {
        let Ok(stream) = StreamName::parse(stream_name) else {
            continue;
        };
        let events = store.read_stream(&stream).await?;
        let state = session_state(&events);
        println!(
            "{}  {:<10}  messages: {:<3}  started: {}",
            stream.thread_id(),
            state.status.to_string(),
            state.user_messages,
            state
                .started_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
