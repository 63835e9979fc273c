//! # uTorrent Types
//!
//! This crate defines the error type, the bencode codec, torrent hash helpers
//! and the plain records handed out by uTorrent WebUI clients.
//!
//! ```rust,ignore
//! use utorrent_types::{info_hash, is_valid_hash};
//!
//! let data = std::fs::read("file.torrent")?;
//! let hash = info_hash(&data)?;
//! assert!(is_valid_hash(&hash));
//! ```

use std::{collections::BTreeMap, fmt};

use thiserror::Error;

pub mod bencode;
mod hash;

pub use hash::{check_hash, info_hash, is_valid_hash, magnet_hash, parse_hash_prop};

/// Error type for uTorrent WebUI operations.
#[derive(Error, Debug)]
pub enum UTorrentError {
    /// The security token could not be found on the token page.
    #[error("can't fetch security token")]
    TokenUnavailable,

    /// HTTP 400 from the WebUI, carrying the response text.
    #[error("{0}")]
    InvalidRequest(String),

    /// HTTP 401.
    #[error("request {location}: {reason}")]
    Unauthorized {
        /// Requested location.
        location: String,
        /// Reason phrase.
        reason: String,
    },

    /// HTTP 404.
    #[error("request {location}: {reason}")]
    NotFound {
        /// Requested location.
        location: String,
        /// Reason phrase.
        reason: String,
    },

    /// Any other non-success status.
    #[error("{reason}: {status}")]
    UnexpectedStatus {
        /// Status code.
        status: u16,
        /// Reason phrase.
        reason: String,
    },

    /// Every attempt timed out.
    #[error("timeout after {attempts} tries")]
    Timeout {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Refused, reset, unreachable or unresolvable endpoint.
    #[error("network error: {0}")]
    NetworkFatal(String),

    /// Transport failure that exhausted the retry budget or fits no other category.
    #[error("transport error: {0}")]
    Transport(String),

    /// Bencode input could not be decoded.
    #[error("malformed bencode: {0}")]
    MalformedEncoding(String),

    /// The remote server speaks no dialect this client understands.
    #[error("unsupported WebUI API: {0}")]
    UnsupportedDialect(String),

    /// The resolved dialect has no such action.
    #[error("action {action} is not supported by the {dialect} API")]
    UnsupportedAction {
        /// Action name.
        action: String,
        /// Dialect name.
        dialect: String,
    },

    /// Not a 40 character hex torrent hash.
    #[error("incorrect hash: {0}")]
    InvalidHash(String),

    /// The WebUI accepted the request but reported an error in the payload.
    #[error("server error: {0}")]
    ServerError(String),

    /// The response did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// File system errors while reading torrents or writing downloads.
    #[error("file system error: {0}")]
    FileSystem(String),
}

/// Common interface for remote torrent clients.
pub trait TorrentControl {
    /// List all torrents.
    fn list(&mut self) -> Result<Vec<Torrent>, UTorrentError>;
    /// Add a torrent by URL or magnet link. Returns the hash when it can be
    /// derived from the link.
    fn add_url(&mut self, url: &str) -> Result<Option<String>, UTorrentError>;
    /// Upload raw `.torrent` data. Returns its info-hash.
    fn add_data(&mut self, torrent: &[u8], filename: &str) -> Result<String, UTorrentError>;
    /// Start torrents; `force` bypasses the queue.
    fn start(&mut self, hashes: &[String], force: bool) -> Result<(), UTorrentError>;
    /// Stop torrents.
    fn stop(&mut self, hashes: &[String]) -> Result<(), UTorrentError>;
    /// Pause torrents.
    fn pause(&mut self, hashes: &[String]) -> Result<(), UTorrentError>;
    /// Resume paused torrents.
    fn resume(&mut self, hashes: &[String]) -> Result<(), UTorrentError>;
    /// Re-check torrent data.
    fn recheck(&mut self, hashes: &[String]) -> Result<(), UTorrentError>;
    /// Remove torrents. If `delete_local_data` is true, downloaded data is deleted too.
    fn remove(&mut self, hashes: &[String], delete_local_data: bool) -> Result<(), UTorrentError>;
    /// Read all client settings.
    fn settings(&mut self) -> Result<BTreeMap<String, SettingValue>, UTorrentError>;
}

/// Torrent status bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TorrentStatus(pub u32);

impl TorrentStatus {
    #[allow(missing_docs)]
    pub fn started(self) -> bool {
        self.0 & 1 != 0
    }
    #[allow(missing_docs)]
    pub fn checking(self) -> bool {
        self.0 & 2 != 0
    }
    #[allow(missing_docs)]
    pub fn start_after_check(self) -> bool {
        self.0 & 4 != 0
    }
    #[allow(missing_docs)]
    pub fn checked(self) -> bool {
        self.0 & 8 != 0
    }
    #[allow(missing_docs)]
    pub fn error(self) -> bool {
        self.0 & 16 != 0
    }
    #[allow(missing_docs)]
    pub fn paused(self) -> bool {
        self.0 & 32 != 0
    }
    /// False means the torrent was force-started.
    pub fn queued(self) -> bool {
        self.0 & 64 != 0
    }
    #[allow(missing_docs)]
    pub fn loaded(self) -> bool {
        self.0 & 128 != 0
    }
}

/// Torrent as reported by the `list` action.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)] // rationale: same fields as the WebUI torrent tuple
pub struct Torrent {
    pub hash: String,
    pub status: TorrentStatus,
    pub name: String,
    pub size: i64,
    /// Progress in per mille.
    pub progress: i64,
    pub downloaded: i64,
    pub uploaded: i64,
    /// Ratio in per mille.
    pub ratio: i64,
    pub ul_speed: i64,
    pub dl_speed: i64,
    pub eta: i64,
    pub label: String,
    pub peers_connected: i64,
    pub peers_total: i64,
    pub seeds_connected: i64,
    pub seeds_total: i64,
    /// Availability in 1/65536 units.
    pub availability: i64,
    pub queue_order: i64,
    pub dl_remain: i64,
    /// Only present on the newer dialects.
    pub extras: Option<TorrentExtras>,
}

impl Torrent {
    /// Progress in percent.
    pub fn progress_percent(&self) -> f64 {
        self.progress as f64 / 10.0
    }

    /// Share ratio.
    pub fn share_ratio(&self) -> f64 {
        self.ratio as f64 / 1000.0
    }
}

/// Extra torrent fields sent by the newer dialects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct TorrentExtras {
    pub url: String,
    pub rss_url: String,
    pub status_message: String,
    pub stream_id: String,
    /// Unix timestamp.
    pub added_on: i64,
    /// Unix timestamp.
    pub completed_on: i64,
    pub app_update_url: String,
    pub download_dir: String,
}

/// Torrent label with its torrent count.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Label {
    pub name: String,
    pub torrent_count: i64,
}

/// File download priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Priority {
    Skip = 0,
    Low = 1,
    Normal = 2,
    High = 3,
}

impl Priority {
    /// Maps a wire value; anything out of range becomes `Normal`.
    pub fn from_wire(value: i64) -> Self {
        match value {
            0 => Priority::Skip,
            1 => Priority::Low,
            3 => Priority::High,
            _ => Priority::Normal,
        }
    }

    /// Wire value.
    pub fn value(self) -> i64 {
        self as i64
    }
}

/// A file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct FileEntry {
    pub torrent_hash: String,
    pub index: usize,
    pub name: String,
    pub size: i64,
    pub downloaded: i64,
    pub priority: Priority,
}

impl FileEntry {
    /// `HASH.index` designator accepted by file operations.
    pub fn designator(&self) -> String {
        format!("{}.{}", self.torrent_hash, self.index)
    }
}

/// Per-torrent job properties returned by `getprops`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct JobInfo {
    pub hash: String,
    pub trackers: Vec<String>,
    pub ulrate: i64,
    pub dlrate: i64,
    /// -1 not allowed, 0 disabled, 1 enabled.
    pub superseed: i64,
    pub dht: i64,
    pub pex: i64,
    pub seed_override: i64,
    pub seed_ratio: i64,
    pub seed_time: i64,
}

/// RSS feed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Feed {
    pub id: i64,
    pub enabled: bool,
    pub use_feed_title: bool,
    pub user_selected: bool,
    pub programmed: bool,
    pub download_state: i64,
    pub url: String,
    /// Unix timestamp.
    pub next_update: i64,
    pub entries: Vec<FeedEntry>,
}

/// Item of an RSS feed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct FeedEntry {
    pub name: String,
    pub name_full: String,
    pub url: String,
    pub quality: i64,
    pub codec: i64,
    pub timestamp: i64,
    pub season: i64,
    pub episode: i64,
    pub episode_to: i64,
    pub feed_id: i64,
    pub repack: bool,
    pub in_history: bool,
}

/// RSS download filter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Filter {
    pub id: i64,
    pub flags: i64,
    pub name: String,
    pub filter: String,
    pub not_filter: String,
    pub save_in: String,
    /// -1 when the filter applies to every feed.
    pub feed_id: i64,
    pub quality: i64,
    pub label: String,
    pub postpone_mode: bool,
    pub last_match: i64,
    pub smart_ep_filter: i64,
    pub repack_ep_filter: i64,
    pub episode: String,
    pub episode_filter: bool,
    pub resolving_candidate: bool,
}

impl Filter {
    #[allow(missing_docs)]
    pub fn enabled(&self) -> bool {
        self.flags & 1 != 0
    }
}

/// Typed value of a client setting.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SettingValue {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Integer(n) => write!(f, "{n}"),
            SettingValue::Boolean(b) => write!(f, "{b}"),
            SettingValue::Text(s) => f.write_str(s),
        }
    }
}

/// Server version information.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct Version {
    pub product: String,
    pub major: i64,
    pub middle: i64,
    pub minor: i64,
    pub build: i64,
    pub engine: i64,
    pub ui: i64,
    /// `YYYY-MM-DD HH:MM:SS` as sent by the server.
    pub date: Option<String>,
    pub user_agent: String,
    pub peer_id: String,
    pub device_id: String,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_agent)
    }
}
