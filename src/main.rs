//! CLI entry point for dq.

use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use dq_core::{Config, Engine, RunMode, VerbositySetting, add_urls, failed_urls, queue_snapshot};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

/// Exit code when a run demoted URLs to the failure file.
const EXIT_FAILURES: i32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => match config.verbosity {
                VerbositySetting::Quiet => "error",
                VerbositySetting::Default => "info",
                VerbositySetting::Verbose => "debug",
                VerbositySetting::Debug => "trace",
            },
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match args.command {
        Command::Add { urls } => {
            let outcome = add_urls(&config, &urls)?;
            for url in &outcome.skipped {
                warn!(url = %url, "already queued, skipped");
            }
            for url in &outcome.retried {
                info!(url = %url, "removed from failure file for retry");
            }
            println!(
                "Added {} URL(s) to {}",
                outcome.added.len(),
                config.queue.display()
            );
        }

        Command::List { failed } => {
            if failed {
                for url in failed_urls(&config)? {
                    println!("{url}");
                }
            } else {
                let snapshot = queue_snapshot(&config)?;
                for url in &snapshot.queued {
                    if snapshot.current.as_deref() == Some(url.as_str()) {
                        println!("{url}  (downloading)");
                    } else {
                        println!("{url}");
                    }
                }
            }
        }

        Command::Run { once } => {
            let engine = Engine::from_config(config)?;

            let interrupted = engine.interrupt_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupted.store(true, Ordering::SeqCst);
                }
            });

            let mode = if once { RunMode::OneShot } else { RunMode::Poll };
            let stats = engine.run(mode).await?;

            info!(
                completed = stats.completed(),
                failed = stats.failed(),
                retried = stats.retried(),
                "Queue run finished"
            );

            if stats.failed() > 0 {
                std::process::exit(EXIT_FAILURES);
            }
        }
    }

    Ok(())
}
