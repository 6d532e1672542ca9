//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Dead-simple, curl-powered download queue manager.
///
/// The download queue is a plain text file; every line is a URL to be
/// downloaded, first line first. Append to it directly or with `dq add`,
/// then drain it with `dq run`.
#[derive(Parser, Debug)]
#[command(name = "dq")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Queue commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Append URLs to the download queue
    Add {
        /// URLs to enqueue (http, https, ftp, or ftps)
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print the queue in download order
    List {
        /// Print the failure file instead of the queue
        #[arg(long)]
        failed: bool,
    },

    /// Download queued URLs, one at a time
    Run {
        /// Exit when the queue drains instead of polling for new entries
        #[arg(long)]
        once: bool,
    },
}
