use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use brandscout::config::Config;
use brandscout::export::export_session;
use brandscout::llm::{HttpLlmClient, Provider};
use brandscout::logging;
use brandscout::runner::BatchRunner;
use brandscout::scheduler::{PhaseScheduler, RunOutcome};
use brandscout::session::report::{render_table, ConsoleProgress, FinalTally, SessionStatus};
use brandscout::session::{InputSource, Session, SessionConfig, SessionOverrides, SessionStore};
use brandscout::sources::load_brands;
use brandscout::steps::{Executors, LlmSummarizer, ScraperCommand};

/// Exit code after Ctrl+C, matching shell convention for SIGINT
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "brandscout")]
#[command(about = "Resumable batch collection and summarization of brand reports")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session (or add brands to an existing one) and run it
    Start {
        /// Session name, also the session folder name
        name: String,

        /// Brands: a .csv file, a .txt file (one per line) or a comma-separated list
        #[arg(short, long)]
        brands: String,

        /// Run the scraper headless
        #[arg(long, conflicts_with = "no_headless")]
        headless: bool,

        /// Run the scraper with a visible browser
        #[arg(long)]
        no_headless: bool,

        /// LLM provider (anthropic, openai, deepseek, gemini)
        #[arg(long)]
        provider: Option<Provider>,

        /// LLM model (provider default when omitted)
        #[arg(long)]
        model: Option<String>,

        /// Regenerate reports and summaries even when complete ones exist
        #[arg(long)]
        force: bool,
    },

    /// Resume a stored session
    Resume {
        name: String,
    },

    /// Show a session's progress
    Status {
        name: String,

        /// Print the status structure as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored sessions, newest first
    List,

    /// Write the session's results back into its CSV input
    Export {
        name: String,
    },

    /// Show the effective configuration
    Config {
        /// Write it to .brandscout/config.toml
        #[arg(long)]
        init: bool,
    },
}

impl Commands {
    /// Logs folder for the run's log file. Only a session the store accepts
    /// gets one; a resume must also find its session stored.
    fn logs_dir(&self, store: &SessionStore) -> Option<PathBuf> {
        match self {
            Commands::Start { name, .. } => store.logs_dir(name, false),
            Commands::Resume { name } => store.logs_dir(name, true),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;
    let store = SessionStore::new(config.sessions_path());

    // Session runs log into the session folder, everything else to stderr
    let logs_dir = cli.command.logs_dir(&store);
    let logging_handle = logging::init_logging(&config, logs_dir.as_deref(), cli.debug)?;

    let code = match cli.command {
        Commands::Start {
            name,
            brands,
            headless,
            no_headless,
            provider,
            model,
            force,
        } => {
            let overrides = SessionOverrides {
                headless: headless_override(headless, no_headless),
                provider,
                model,
                force_regenerate: force,
            };
            cmd_start(&config, store, &name, &brands, overrides).await?
        }
        Commands::Resume { name } => cmd_resume(&config, store, &name).await?,
        Commands::Status { name, json } => cmd_status(&store, &name, json)?,
        Commands::List => cmd_list(&store)?,
        Commands::Export { name } => cmd_export(&store, &name)?,
        Commands::Config { init } => cmd_config(&config, init)?,
    };

    // Print log file path on exit if logs were written
    if let Some(log_path) = &logging_handle.log_file_path {
        if log_path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
            eprintln!("Session log: {}", log_path.display());
        }
    }

    if code != 0 {
        // Flush the non-blocking writer before exiting
        drop(logging_handle);
        std::process::exit(code);
    }
    Ok(())
}

fn headless_override(headless: bool, no_headless: bool) -> Option<bool> {
    match (headless, no_headless) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn build_executors(config: &Config) -> Result<Executors> {
    let scraper = Arc::new(ScraperCommand::from_config(&config.scraper));
    let client = HttpLlmClient::new(&config.llm).context("Failed to build HTTP client")?;
    let summarizer = LlmSummarizer::new(Arc::new(client), config.llm.max_input_chars)?;
    Ok(Executors::new(scraper.clone(), scraper, Arc::new(summarizer)))
}

async fn cmd_start(
    config: &Config,
    store: SessionStore,
    name: &str,
    brands_arg: &str,
    overrides: SessionOverrides,
) -> Result<i32> {
    let input = InputSource::from_arg(brands_arg);
    let brands = load_brands(&input).context("Failed to read brands")?;

    let session_config =
        SessionConfig::new(name, input, store.folders_for(name), config, overrides);
    let (session, merge) = store
        .create_or_merge(session_config, &brands)
        .with_context(|| format!("Failed to create session '{name}'"))?;

    if merge.created {
        println!("Created session '{name}' with {} brands", merge.total);
    } else {
        println!(
            "Session '{name}' exists: added {} new brands ({} total)",
            merge.added, merge.total
        );
    }

    run_session(config, store, session).await
}

async fn cmd_resume(config: &Config, store: SessionStore, name: &str) -> Result<i32> {
    let session = match store.load(name) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Session '{name}' not found: {err}");
            eprintln!("Use 'brandscout list' to see available sessions");
            return Ok(1);
        }
    };
    println!(
        "Resuming session '{name}' ({} brands, {} summarized)",
        session.total, session.completed_count
    );
    run_session(config, store, session).await
}

async fn run_session(config: &Config, store: SessionStore, mut session: Session) -> Result<i32> {
    let executors = build_executors(config)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let runner = BatchRunner::new(store, executors)
        .with_progress(Arc::new(ConsoleProgress))
        .with_cancel(cancel);
    let scheduler = PhaseScheduler::new(runner);

    println!();
    print!("{}", render_table(&session));

    let name = session.name().to_string();
    let code = match scheduler.run(&mut session).await {
        RunOutcome::Completed => {
            println!();
            print!("{}", FinalTally::from_session(&session).render());
            0
        }
        RunOutcome::Interrupted => {
            println!();
            println!("Interrupted. Progress is saved.");
            println!("Resume with: brandscout resume {name}");
            EXIT_INTERRUPTED
        }
        RunOutcome::Errored(message) => {
            eprintln!();
            eprintln!("Session '{name}' stopped on an error: {message}");
            eprintln!(
                "Progress up to the last checkpoint is saved; resume with: brandscout resume {name}"
            );
            1
        }
    };
    Ok(code)
}

fn cmd_status(store: &SessionStore, name: &str, json: bool) -> Result<i32> {
    let session = match store.load(name) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Session '{name}' not found: {err}");
            return Ok(1);
        }
    };

    if json {
        let status = SessionStatus::from_session(&session);
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to encode status")?
        );
        return Ok(0);
    }

    print!("{}", FinalTally::from_session(&session).render());
    match session.completed_at {
        Some(at) => println!("Completed: {}", at.format("%Y-%m-%d %H:%M")),
        None => println!("Not completed; resume with: brandscout resume {name}"),
    }
    Ok(0)
}

fn cmd_list(store: &SessionStore) -> Result<i32> {
    let sessions = store.list().context("Failed to list sessions")?;
    if sessions.is_empty() {
        println!("No sessions in {}", store.root().display());
        return Ok(0);
    }

    println!("Sessions ({})", sessions.len());
    println!("{}", "─".repeat(60));
    for listing in sessions {
        let state = if listing.completed_at.is_some() {
            "done"
        } else {
            "open"
        };
        println!(
            "{:<30} {:>4}/{:<4} {:<5} {}",
            listing.name,
            listing.summarized,
            listing.total,
            state,
            listing.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(0)
}

fn cmd_export(store: &SessionStore, name: &str) -> Result<i32> {
    let session = match store.load(name) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Session '{name}' not found: {err}");
            return Ok(1);
        }
    };

    match export_session(&session).context("Export failed")? {
        Some(summary) => println!(
            "Exported {} rows ({} with summaries, {} unmatched) to {}",
            summary.rows,
            summary.filled,
            summary.unmatched,
            summary.path.display()
        ),
        None => println!(
            "Session '{name}' was not created from a CSV file; nothing to export"
        ),
    }
    Ok(0)
}

fn cmd_config(config: &Config, init: bool) -> Result<i32> {
    if init {
        let path = config.save()?;
        println!("Wrote {}", path.display());
    } else {
        print!(
            "{}",
            toml::to_string_pretty(config).context("Failed to serialize config")?
        );
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logs_dir_skips_unknown_and_invalid_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        let start = |name: &str| Commands::Start {
            name: name.to_string(),
            brands: "Acme".to_string(),
            headless: false,
            no_headless: false,
            provider: None,
            model: None,
            force: false,
        };

        assert_eq!(start("..").logs_dir(&store), None);
        assert_eq!(
            start("q3").logs_dir(&store),
            Some(store.folders_for("q3").logs)
        );
        let resume = Commands::Resume {
            name: "typo".to_string(),
        };
        assert_eq!(resume.logs_dir(&store), None);
        assert!(!store.session_dir("typo").exists());
        assert_eq!(Commands::List.logs_dir(&store), None);
    }
}
