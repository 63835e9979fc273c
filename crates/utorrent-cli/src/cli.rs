use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use utorrent_controller::{Dialect, SessionConfig};
use utorrent_types::Priority;

/// Top-level CLI struct for the binary.
#[derive(Debug, Parser)]
#[command(name = "utorrentctl", version, about, long_about = None)]
pub(crate) struct Cli {
    /// WebUI address as host:port.
    #[arg(short = 'H', long, env = "UTORRENT_HOST", default_value = "localhost:8080")]
    pub host: String,

    /// WebUI login.
    #[arg(short = 'U', long = "user", env = "UTORRENT_LOGIN", default_value = "admin")]
    pub login: String,

    /// WebUI password.
    #[arg(
        short = 'P',
        long,
        env = "UTORRENT_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub password: String,

    /// Force the API dialect (server, desktop or falcon) instead of detecting it.
    #[arg(long, env = "UTORRENT_API")]
    pub api: Option<Dialect>,

    /// Connect over HTTPS.
    #[arg(long, default_value_t = false)]
    pub tls: bool,

    /// Skip certificate verification.
    #[arg(long, default_value_t = false)]
    pub insecure: bool,

    /// Socket timeout in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Session configuration for the parsed options.
    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.host.clone(),
            login: self.login.clone(),
            password: self.password.clone(),
            tls: self.tls,
            verify_certificate: !self.insecure,
            timeout: Duration::from_secs(self.timeout),
            dialect: self.api,
            ..Default::default()
        }
    }
}

/// Torrent hashes taken by most commands.
#[derive(Debug, Clone, Args)]
pub(crate) struct Hashes {
    /// Torrent hashes.
    #[arg(required = true)]
    pub hashes: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// List torrents.
    List {
        /// Only torrents with this label.
        #[arg(long)]
        label: Option<String>,
        /// Only torrents that are transferring.
        #[arg(short = 'c', long, default_value_t = false)]
        active: bool,
    },
    /// Add torrents from files, URLs or magnet links.
    Add {
        /// `.torrent` paths, URLs or magnet links.
        #[arg(required = true)]
        sources: Vec<String>,
        /// Download directory, absolute or relative to the current default.
        #[arg(long)]
        dir: Option<String>,
    },
    /// Start torrents.
    Start {
        #[command(flatten)]
        hashes: Hashes,
        /// Bypass the queue.
        #[arg(short = 'F', long, default_value_t = false)]
        force: bool,
    },
    /// Stop torrents.
    Stop(Hashes),
    /// Pause torrents.
    Pause(Hashes),
    /// Resume paused torrents.
    Resume(Hashes),
    /// Re-check torrent data.
    Recheck(Hashes),
    /// Remove torrents.
    Remove {
        #[command(flatten)]
        hashes: Hashes,
        /// Also delete the downloaded data.
        #[arg(long, default_value_t = false)]
        data: bool,
        /// Also delete the .torrent file.
        #[arg(long, default_value_t = false)]
        torrent: bool,
    },
    /// List the files of torrents.
    Files(Hashes),
    /// Set file priorities.
    Prio {
        /// New priority.
        #[arg(value_enum)]
        priority: PriorityArg,
        /// `HASH.index` for one file or `HASH` for all of them.
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Download one file of a torrent.
    Download {
        /// `HASH.index` of the file.
        file: String,
        /// Where to write the file.
        #[arg(short, long)]
        output: PathBuf,
        /// First byte to fetch.
        #[arg(long)]
        offset: Option<u64>,
        /// Number of bytes to fetch.
        #[arg(long)]
        length: Option<u64>,
    },
    /// Show settings.
    Settings {
        /// Only these settings.
        names: Vec<String>,
    },
    /// Change settings.
    Set {
        /// `name=value` pairs.
        #[arg(required = true)]
        assignments: Vec<String>,
    },
    /// List RSS feeds and their filters.
    Feeds,
    /// Show the server version.
    Version,
    /// Print the info-hash of local .torrent files.
    InfoHash {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum PriorityArg {
    Skip,
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Skip => Priority::Skip,
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}
