//! # Remote control for the uTorrent WebUI.
//!
//! usage:
//!
//! ```rust,ignore
//! use utorrent_controller::{SessionConfig, UTorrentClient};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig {
//!         host: "192.168.1.10:8080".into(),
//!         login: "admin".into(),
//!         password: "secret".into(),
//!         ..Default::default()
//!     };
//!     let mut client = UTorrentClient::connect(&config)?;
//!     println!("Connected to {}", client.version()?);
//!     for (hash, torrent) in client.torrent_list()? {
//!         println!("{hash} {} {:.1}%", torrent.name, torrent.progress_percent());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Lower layers are public too: [`Session`] handles the token, cookies and
//! retries, [`ActionRequest`] builds raw actions and [`ListCache`] keeps the
//! incremental `list` state.

#[cfg(test)]
use tracing_subscriber as _;

pub mod action;
pub mod cache;
mod client;
mod config;
mod conversions;
pub mod dialect;
pub mod multipart;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use action::{ActionRequest, ParamValue, decode_response};
pub use cache::ListCache;
pub use client::{RemoveOptions, TorrentProp, UTorrentClient};
pub use config::SessionConfig;
pub use dialect::Dialect;
pub use session::{ByteRange, Download, Session, SessionState, TransferProgress};
pub use transport::{HttpTransport, ReqwestTransport};
pub use utorrent_types;
