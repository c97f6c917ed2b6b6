use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use futures_util::StreamExt;
use tokio::sync::mpsc;

mod app;
mod backend;
mod config;
mod error;
mod fragments;
mod handler;
mod ingest;
mod logging;
mod markdown;
mod playground;
mod session;
mod state;
mod tui;
mod ui;
mod upload;

use app::App;
use backend::{Backend, HttpBackend};
use config::Config;
use fragments::FragmentStream;
use playground::{PlaygroundClient, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use session::ChatSession;
use upload::UploadTiming;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(version, about = "Chat with your documents through a local Q&A backend")]
struct Cli {
    /// Backend base URL (overrides DOCQA_SERVER_URL and the config file)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Show answers as plain text instead of rendered Markdown
    #[arg(long, global = true)]
    no_markdown: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Tui,
    /// Send a document for ingestion
    Upload {
        /// Path of the PDF to ingest
        file: PathBuf,
    },
    /// Ask a question about the ingested document
    Ask {
        /// Your question
        question: String,
    },
    /// Drop the backend's index
    Clear,
    /// Stream a raw completion from the generation model
    Generate {
        /// Prompt text
        prompt: String,
        /// Maximum number of new tokens
        #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
        max_tokens: u32,
        /// Sampling temperature
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f32,
    },
    /// Embed each non-blank line of TEXT
    Embed {
        /// Text to embed
        text: String,
    },
    /// Remember the backend URL in the config file
    SetServer {
        /// Backend base URL, e.g. http://127.0.0.1:8000
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|_| Config::new());
    let server_url = cli.server.clone().unwrap_or_else(|| config.server_url());
    let use_markdown = !cli.no_markdown && config.markdown_enabled();

    let command = cli.command.unwrap_or(Commands::Tui);
    match command {
        Commands::Tui => return run_tui(&config, server_url, use_markdown).await,
        Commands::SetServer { url } => return set_server(config, url),
        _ => {}
    }

    logging::init_stderr()?;
    let backend = HttpBackend::new(&server_url).with_upload_timeout(config.upload_timeout());
    let playground = PlaygroundClient::new(&config.generate_url(), &config.embed_url());

    let ok = match command {
        Commands::Tui | Commands::SetServer { .. } => true,
        Commands::Upload { file } => upload_document(&backend, file).await,
        Commands::Ask { question } => ask_question(&backend, &question).await,
        Commands::Clear => clear_context(&backend).await,
        Commands::Generate { prompt, max_tokens, temperature } => {
            generate(&playground, &prompt, max_tokens, temperature).await
        }
        Commands::Embed { text } => embed(&playground, &text).await,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_tui(config: &Config, server_url: String, use_markdown: bool) -> Result<()> {
    if let Some(path) = config.log_file() {
        if let Err(e) = logging::init_file(&path) {
            eprintln!("{}: {} ({})", "Logging disabled".yellow(), e, path.display());
        }
    }
    tracing::info!(server = %server_url, "starting chat");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let backend: Arc<dyn Backend> = Arc::new(
        HttpBackend::new(&server_url).with_upload_timeout(config.upload_timeout()),
    );
    let session = ChatSession::new(backend, session_tx, UploadTiming::default(), use_markdown);
    let mut app = App::new(session, server_url);
    let mut events = tui::EventHandler::new(session_rx);

    let result = run_loop(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    result
}

async fn run_loop(
    terminal: &mut tui::Tui,
    app: &mut App,
    events: &mut tui::EventHandler,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(app, event)?;
    }
    Ok(())
}

fn set_server(mut config: Config, url: String) -> Result<()> {
    let url = url.trim_end_matches('/').to_string();
    config.server_url = Some(url.clone());
    config.save()?;
    println!("{} {}", "Backend URL saved:".green(), url.bold());
    Ok(())
}

async fn upload_document(backend: &HttpBackend, file: PathBuf) -> bool {
    println!("📄 Uploading {}", file.display().to_string().bold().cyan());

    match ingest::upload_file(backend, file).await {
        Ok(()) => {
            println!("{}", "Ingestion complete. Ready for queries.".green());
            true
        }
        Err(e) => {
            println!("{}: {}", "Error".red(), e.short_reason());
            println!("Make sure the backend is running at {}", backend.base_url().bold());
            false
        }
    }
}

async fn ask_question(backend: &HttpBackend, question: &str) -> bool {
    match backend.ask(question).await {
        Ok(fragments) => {
            println!("{}", "AI:".bold().yellow());
            print_stream(fragments).await
        }
        Err(e) => {
            tracing::warn!(error = %e, "ask request failed");
            println!("{}", state::ERROR_MARKER.red());
            false
        }
    }
}

async fn clear_context(backend: &HttpBackend) -> bool {
    match backend.clear().await {
        Ok(()) => {
            println!("{}", "Context cleared.".green());
            true
        }
        Err(e) => {
            println!("{}: {}", "Error clearing context".red(), e);
            false
        }
    }
}

async fn generate(
    playground: &PlaygroundClient,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
) -> bool {
    match playground.generate(prompt, max_tokens, temperature).await {
        Ok(fragments) => print_stream(fragments).await,
        Err(e) => {
            println!("{}", format!("API Error: {}", e).red());
            false
        }
    }
}

async fn embed(playground: &PlaygroundClient, text: &str) -> bool {
    match playground.embed(text).await {
        Ok(value) => {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            println!("{}", pretty);
            true
        }
        Err(e) => {
            println!("{}", format!("API Error: {}", e).red());
            false
        }
    }
}

/// Print fragments as they arrive. A mid-stream failure keeps the partial text.
async fn print_stream(mut fragments: FragmentStream) -> bool {
    let mut stdout = std::io::stdout();
    while let Some(fragment) = fragments.next().await {
        match fragment {
            Ok(text) => {
                print!("{}", text);
                let _ = stdout.flush();
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream interrupted");
                println!("\n{}", state::ERROR_MARKER.red());
                return false;
            }
        }
    }
    println!();
    true
}
