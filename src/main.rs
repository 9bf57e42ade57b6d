//! chatrelay -- streaming chat relay for the Gemini API.
//!
//! Two entry points share one binary:
//!   - `serve`: the HTTP relay that holds the API key and re-encodes the
//!     upstream stream as NDJSON
//!   - `chat`: a terminal chat client that talks to a running relay

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::WatchStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use chatrelay::AppState;
use chatrelay::api;
use chatrelay::client::RelayClient;
use chatrelay::config::Config;
use chatrelay::conversation::{Conversation, SubmitOutcome};
use chatrelay::models::FileData;
use chatrelay::net::HttpClient;
use chatrelay::terminal::{self, Command, TerminalView};
use chatrelay::upstream::GeminiClient;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Serve,
    Chat,
}

struct CliArgs {
    mode: Mode,
    config_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut mode = Mode::Serve;
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "serve" => mode = Mode::Serve,
            "chat" => mode = Mode::Chat,
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("chatrelay {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { mode, config_path }
}

fn print_usage() {
    println!(
        "\
chatrelay {version} -- Streaming chat relay for the Gemini API

USAGE:
    chatrelay [serve|chat] [OPTIONS]

COMMANDS:
    serve                  Run the relay server [default]
    chat                   Chat with a running relay from the terminal

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: chatrelay.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    API_KEY                Gemini API key (name set by upstream.api_key_env)
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    CHATRELAY_CONFIG       Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

/// `--config` wins, then `CHATRELAY_CONFIG`, then the default file name.
fn resolve_config_path(cli: Option<PathBuf>, env: Option<String>) -> PathBuf {
    cli.or_else(|| env.filter(|p| !p.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("chatrelay.toml"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();
    let config_path = resolve_config_path(cli.config_path, std::env::var("CHATRELAY_CONFIG").ok());
    let config = Config::load(&config_path)?;

    init_tracing(&config);

    match cli.mode {
        Mode::Serve => serve(config, &config_path).await,
        Mode::Chat => chat(config).await,
    }
}

// ---------------------------------------------------------------------------
// Relay server
// ---------------------------------------------------------------------------

async fn serve(config: Config, config_path: &Path) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting chatrelay"
    );
    for (key, var) in config.env_overrides.all() {
        tracing::debug!(setting = %key, env_var = %var, "Setting overridden by environment");
    }

    if config.upstream.resolve_api_key().is_none() {
        tracing::warn!(
            env_var = %config.upstream.api_key_env,
            "No upstream API key configured; relay requests will fail until it is set"
        );
    }

    let generator = Arc::new(GeminiClient::from_config(&config.upstream));
    tracing::info!(model = %config.upstream.model, base_url = %config.upstream.base_url, "Upstream configured");

    let listen_addr = config.listen_addr();
    let state = AppState::new(config, generator);
    let app = build_app(state);

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    println!();
    println!("  chatrelay v{} is running", env!("CARGO_PKG_VERSION"));
    println!("  Relay:   http://{listen_addr}/api/gemini");
    println!("  Health:  http://{listen_addr}/health");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

/// Build the application router with all middleware layers.
fn build_app(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(config);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let trace = TraceLayer::new_for_http();

    api::build_api_router(config.server.max_body_bytes)
        .layer(propagate_id)
        .layer(request_id)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from config.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ---------------------------------------------------------------------------
// Terminal chat
// ---------------------------------------------------------------------------

async fn chat(config: Config) -> anyhow::Result<()> {
    let client = RelayClient::new(
        HttpClient::for_relay(&config.client),
        config.client.relay_url.clone(),
    );
    tracing::debug!(relay = %config.client.relay_url, "Chat client configured");

    let mut conversation = Conversation::new(config.client.welcome_message.clone());
    conversation.set_use_google_search(config.client.use_google_search);

    let mut view = TerminalView::new();
    let mut stdout = std::io::stdout();
    view.render(&conversation.subscribe().borrow(), &mut stdout)?;
    println!("(type /help for commands)");

    let mut staged: Option<FileData> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}> ", if conversation.use_google_search() { "search " } else { "" });
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let prompt = match Command::parse(&line) {
            Command::Prompt(prompt) => prompt,
            Command::Quit => break,
            Command::Help => {
                println!("{}", terminal::HELP);
                continue;
            }
            Command::Search(enabled) => {
                conversation.set_use_google_search(enabled);
                println!("Google Search grounding {}", if enabled { "on" } else { "off" });
                continue;
            }
            Command::Attach(path) => {
                match terminal::load_attachment(Path::new(&path)).await {
                    Ok(file) => {
                        println!("Attached {} ({})", file.name, file.mime_type);
                        staged = Some(file);
                    }
                    Err(e) => eprintln!("Cannot attach {path}: {e}"),
                }
                continue;
            }
            Command::Invalid(hint) => {
                eprintln!("{hint}");
                continue;
            }
        };

        if prompt.is_empty() && staged.is_none() {
            continue;
        }

        let outcome = {
            let mut updates = WatchStream::from_changes(conversation.subscribe());
            let submit = conversation.submit(&client, &prompt, staged.take());
            tokio::pin!(submit);
            loop {
                tokio::select! {
                    outcome = &mut submit => break outcome,
                    Some(snapshot) = updates.next() => view.render(&snapshot, &mut stdout)?,
                }
            }
        };
        view.render(&conversation.subscribe().borrow(), &mut stdout)?;

        if let SubmitOutcome::Failed(message) = outcome {
            tracing::debug!(error = %message, "Submission failed");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("chatrelay={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
