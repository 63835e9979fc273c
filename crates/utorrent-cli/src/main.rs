//! # utorrentctl
//!
//! ## Usage
//!
//! ```sh,ignore
//! UTORRENT_HOST=192.168.1.10:8080 UTORRENT_PASSWORD=secret utorrentctl list --active
//! ```

use std::io;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

/// Initializes the tracing subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = cli::Cli::parse();
    let stdout = io::stdout();
    commands::run(cli, &mut stdout.lock())
}
