//! Connection settings for a WebUI session.

use std::{fmt, time::Duration};

use url::Url;
use utorrent_types::UTorrentError;

use crate::dialect::Dialect;

/// Fully resolved configuration for a [`Session`](crate::Session).
///
/// Loading defaults from files or the environment is up to the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// `host:port` of the WebUI.
    pub host: String,
    /// Basic auth user.
    pub login: String,
    /// Basic auth password.
    pub password: String,
    /// Use HTTPS instead of HTTP.
    pub tls: bool,
    /// Verify the server certificate when `tls` is set.
    pub verify_certificate: bool,
    /// Attempts per request for transient faults.
    pub retry_budget: u32,
    /// Socket timeout.
    pub timeout: Duration,
    /// Pause before retrying after the peer dropped the connection.
    pub reconnect_pause: Duration,
    /// Skip dialect detection and use this one.
    pub dialect: Option<Dialect>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8080".into(),
            login: "admin".into(),
            password: String::new(),
            tls: false,
            verify_certificate: true,
            retry_budget: 3,
            timeout: Duration::from_secs(10),
            reconnect_pause: Duration::from_secs(2),
            dialect: None,
        }
    }
}

impl SessionConfig {
    /// Root URL of the WebUI, e.g. `http://host:port/`.
    pub fn base_url(&self) -> Result<Url, UTorrentError> {
        let scheme = if self.tls { "https" } else { "http" };
        let url = Url::parse(&format!("{scheme}://{}/", self.host))
            .map_err(|e| UTorrentError::InvalidConfig(format!("invalid host {}: {e}", self.host)))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(UTorrentError::InvalidConfig(format!(
                "invalid host {}",
                self.host
            )));
        }
        Ok(url)
    }

    /// Checks the values that would otherwise fail late.
    pub fn validate(&self) -> Result<(), UTorrentError> {
        self.base_url()?;
        if self.retry_budget == 0 {
            return Err(UTorrentError::InvalidConfig(
                "retry budget must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("verify_certificate", &self.verify_certificate)
            .field("retry_budget", &self.retry_budget)
            .field("timeout", &self.timeout)
            .field("reconnect_pause", &self.reconnect_pause)
            .field("dialect", &self.dialect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_base_url() {
        let config = SessionConfig {
            host: "10.0.0.2:8080".into(),
            ..Default::default()
        };
        assert_eq!(config.base_url().unwrap().as_str(), "http://10.0.0.2:8080/");

        let tls = SessionConfig {
            tls: true,
            ..config
        };
        assert_eq!(tls.base_url().unwrap().as_str(), "https://10.0.0.2:8080/");
    }

    #[test]
    fn rejects_bad_values() {
        let config = SessionConfig {
            host: "bad host:port".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UTorrentError::InvalidConfig(_))
        ));

        let config = SessionConfig {
            retry_budget: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let config = SessionConfig {
            password: "hunter2".into(),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
