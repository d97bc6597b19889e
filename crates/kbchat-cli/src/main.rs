use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kbchat_core::providers::registry::http_client;
use kbchat_core::{
    AnswerObserver, FaultKind, Layered, RegistrySource, RouterError, SecretsFile, Session,
    SkipReason, welcome_message,
};
use kbchat_knowledge::KnowledgeBase;

mod config;

use config::KbchatConfig;

#[derive(Parser)]
#[command(name = "kbchat")]
#[command(version)]
#[command(about = "Ask questions about a shared document knowledge base")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory, default config and knowledge base
    Init,

    /// Show current configuration
    Config,

    /// Show which providers are configured, in failover order
    Providers,

    /// Manage knowledge base documents
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Ask a one-shot question
    Ask {
        /// The question to ask
        message: String,
    },

    /// Start an interactive chat session
    Chat,
}

#[derive(Subcommand)]
enum DocsAction {
    /// Copy documents into the knowledge base
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List knowledge base documents
    List,

    /// Remove a document by filename
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; stdout carries only answers
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Providers => cmd_providers(&cli.config),
        Commands::Docs { action } => cmd_docs(&cli.config, action),
        Commands::Ask { message } => cmd_ask(&cli.config, &message).await,
        Commands::Chat => cmd_chat(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    let cfg = KbchatConfig::load(&Some(config_path.clone()))?;
    let kb = KnowledgeBase::open(cfg.knowledge_dir())?;

    println!("kbchat initialized at {}", config_dir.display());
    println!("Add documents with `kbchat docs add <files>` (stored in {}).", kb.dir().display());
    println!(
        "Set at least one provider key (e.g. GROQ_API_KEY) in the environment or in {}.",
        cfg.secrets_file().display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = KbchatConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

fn cmd_providers(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = KbchatConfig::load(config_path)?;
    let source = registry_source(&cfg)?;
    let registry = source.registry();

    println!("Failover order:");
    for (idx, provider) in registry.providers().iter().enumerate() {
        println!(
            "  {}. {:<12} {} ({})",
            idx + 1,
            provider.name,
            provider.model_id,
            provider.protocol
        );
    }
    if registry.is_empty() {
        println!("  (none; set a provider API key)");
    }
    if !registry.unconfigured().is_empty() {
        println!("Skipped (no API key): {}", registry.unconfigured().join(", "));
    }
    Ok(())
}

fn cmd_docs(config_path: &Option<PathBuf>, action: DocsAction) -> Result<()> {
    let cfg = KbchatConfig::load(config_path)?;
    let kb = KnowledgeBase::open(cfg.knowledge_dir())?;

    match action {
        DocsAction::Add { paths } => {
            for path in &paths {
                let doc = kb.add_file(path)?;
                println!("Added {} ({} bytes)", doc.name, doc.size_bytes);
            }
        }
        DocsAction::List => {
            let docs = kb.list()?;
            if docs.is_empty() {
                println!("The knowledge base at {} is empty.", kb.dir().display());
            }
            for doc in docs {
                println!("{:>10}  {}", doc.size_bytes, doc.name);
            }
        }
        DocsAction::Remove { name } => {
            kb.remove(&name)?;
            println!("Removed {}", name);
        }
    }
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str) -> Result<()> {
    let cfg = KbchatConfig::load(config_path)?;
    let mut session = build_session(&cfg)?;
    let cancel = session.cancellation_token();
    cancel_on_ctrl_c(cancel.clone());

    let mut printer = StreamPrinter::default();
    let result = session.ask(message, &mut printer).await;
    printer.finish();
    cancel.cancel();

    let answer = result.map_err(explain)?;
    eprintln!("[answered by {} ({})]", answer.provider, answer.model);
    Ok(())
}

async fn cmd_chat(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = KbchatConfig::load(config_path)?;
    let mut session = build_session(&cfg)?;
    let cancel = session.cancellation_token();
    cancel_on_ctrl_c(cancel.clone());

    println!("{}", welcome_message(session.document_count()));
    println!("(commands: /reset, /docs, /quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                session.load_knowledge(&cfg.knowledge_dir());
                println!("Conversation cleared.");
                continue;
            }
            "/docs" => {
                let kb = KnowledgeBase::open(cfg.knowledge_dir())?;
                for doc in kb.list()? {
                    println!("  {}", doc.name);
                }
                continue;
            }
            _ => {}
        }

        let mut printer = StreamPrinter::default();
        let result = session.ask(input, &mut printer).await;
        printer.finish();

        match result {
            Ok(answer) => eprintln!("[answered by {}]", answer.provider),
            Err(RouterError::Cancelled) => break,
            Err(e) => eprintln!("Error: {:#}", explain(e)),
        }
    }

    session.cancel();
    println!("Goodbye.");
    Ok(())
}

fn registry_source(cfg: &KbchatConfig) -> Result<RegistrySource> {
    let secrets = SecretsFile::load(&cfg.secrets_file())?;
    let client = http_client(cfg.connect_timeout()).context("Failed to build HTTP client")?;
    Ok(RegistrySource::new(
        cfg.provider_table(),
        Arc::new(Layered::env_then(secrets)),
        client,
        cfg.router_config(),
    ))
}

fn build_session(cfg: &KbchatConfig) -> Result<Session> {
    let source = registry_source(cfg)?;
    let mut session = Session::new(Arc::new(source));
    session.load_knowledge(&cfg.knowledge_dir());
    Ok(session)
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Interrupted, cancelling session");
                }
                cancel.cancel();
            }
        }
    });
}

/// Add a hint to errors the user can act on
fn explain(err: RouterError) -> anyhow::Error {
    let rate_limited = err
        .last_reason()
        .is_some_and(|r| r.fault.kind() == FaultKind::RateLimited);
    if rate_limited {
        anyhow!(
            "{}\nThe free-tier rate limit was reached. Please wait about 60 seconds and try again.",
            err
        )
    } else {
        anyhow::Error::new(err)
    }
}

/// Prints each newly streamed suffix; notes on stderr when a partial answer is abandoned
#[derive(Default)]
struct StreamPrinter {
    printed: usize,
}

impl StreamPrinter {
    fn finish(&mut self) {
        if self.printed > 0 {
            println!();
        }
        self.printed = 0;
    }
}

impl AnswerObserver for StreamPrinter {
    fn on_partial(&mut self, _provider: &str, text_so_far: &str) {
        let fresh = text_so_far.get(self.printed..).unwrap_or_default();
        print!("{}", fresh);
        let _ = std::io::stdout().flush();
        self.printed = text_so_far.len();
    }

    fn on_attempt(&mut self, provider: &str, index: usize) {
        if index > 0 {
            eprintln!("[trying {}]", provider);
        }
    }

    fn on_skip(&mut self, reason: &SkipReason) {
        if self.printed > 0 {
            println!();
            eprintln!("[partial answer from {} discarded]", reason.provider);
        }
        self.printed = 0;
    }
}
