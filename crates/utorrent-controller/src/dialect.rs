//! WebUI API dialects and their detection.

use std::{fmt, str::FromStr};

use serde_json::Value;
use tracing::{debug, info};
use utorrent_types::{UTorrentError, Version};

use crate::{
    action::ActionRequest,
    session::Session,
    transport::HttpTransport,
};

/// Setting that only the 3.x desktop client exposes.
const ENHANCED_MARKER_SETTING: &str = "webui.uconnect_enable";

const BASE_ACTIONS: &[&str] = &[
    "list",
    "getprops",
    "setprops",
    "add-url",
    "add-file",
    "start",
    "forcestart",
    "stop",
    "pause",
    "unpause",
    "recheck",
    "remove",
    "removedata",
    "getfiles",
    "setprio",
    "getsettings",
    "setsetting",
];

const ENHANCED_ACTIONS: &[&str] = &[
    "removetorrent",
    "removedatatorrent",
    "proxy",
    "rss-update",
    "rss-remove",
    "filter-update",
    "filter-remove",
    "getxferhist",
    "resetxferhist",
];

const SERVER_ACTIONS: &[&str] = &["getversion"];

/// Closed set of API dialects spoken by WebUI servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// 2.x desktop client.
    Desktop,
    /// 3.x desktop client.
    DesktopEnhanced,
    /// Headless server.
    Server,
}

impl Dialect {
    /// Published API version.
    pub fn api_version(self) -> f32 {
        match self {
            Dialect::Desktop => 1.0,
            Dialect::DesktopEnhanced => 1.9,
            Dialect::Server => 2.0,
        }
    }

    /// Length of a torrent tuple in `list` replies.
    pub fn torrent_fields(self) -> usize {
        match self {
            Dialect::Desktop => 19,
            Dialect::DesktopEnhanced | Dialect::Server => 27,
        }
    }

    /// Length of a setting tuple in `getsettings` replies.
    pub fn setting_fields(self) -> usize {
        match self {
            Dialect::Desktop => 3,
            Dialect::DesktopEnhanced | Dialect::Server => 4,
        }
    }

    /// Separator of the paths the server reports.
    pub fn path_separator(self) -> char {
        match self {
            Dialect::Desktop | Dialect::DesktopEnhanced => '\\',
            Dialect::Server => '/',
        }
    }

    /// Whether `path` is absolute on the server.
    pub fn is_absolute_path(self, path: &str) -> bool {
        match self {
            Dialect::Server => path.starts_with('/'),
            Dialect::Desktop | Dialect::DesktopEnhanced => {
                let bytes = path.as_bytes();
                path.starts_with(['\\', '/'])
                    || (bytes.len() >= 3
                        && bytes[0].is_ascii_alphabetic()
                        && bytes[1] == b':'
                        && matches!(bytes[2], b'\\' | b'/'))
            }
        }
    }

    /// Whether the server knows `action`.
    pub fn supports(self, action: &str) -> bool {
        let extended = match self {
            Dialect::Desktop => false,
            Dialect::DesktopEnhanced => ENHANCED_ACTIONS.contains(&action),
            Dialect::Server => ENHANCED_ACTIONS.contains(&action) || SERVER_ACTIONS.contains(&action),
        };
        extended || BASE_ACTIONS.contains(&action)
    }

    /// Fails with [`UTorrentError::UnsupportedAction`] unless `action` is supported.
    pub fn check(self, action: &str) -> Result<(), UTorrentError> {
        if self.supports(action) {
            Ok(())
        } else {
            Err(UTorrentError::UnsupportedAction {
                action: action.to_owned(),
                dialect: self.to_string(),
            })
        }
    }

    /// Picks the dialect matching a server version.
    pub fn from_version(version: &Version) -> Result<Self, UTorrentError> {
        match version.product.as_str() {
            "server" => Ok(Dialect::Server),
            "desktop" | "PRODUCT_CODE" if version.major == 3 => Ok(Dialect::DesktopEnhanced),
            "desktop" | "PRODUCT_CODE" => Ok(Dialect::Desktop),
            product => Err(UTorrentError::UnsupportedDialect(product.to_owned())),
        }
    }

    /// The headless server may answer the first request on a connection with
    /// 400 while another process shares its port.
    pub(crate) fn tolerates_invalid_first(self) -> bool {
        self == Dialect::Server
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Desktop => "desktop",
            Dialect::DesktopEnhanced => "falcon",
            Dialect::Server => "server",
        })
    }
}

impl FromStr for Dialect {
    type Err = UTorrentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" | "server" => Ok(Dialect::Server),
            "desktop" => Ok(Dialect::Desktop),
            "falcon" | "enhanced" => Ok(Dialect::DesktopEnhanced),
            other => Err(UTorrentError::UnsupportedDialect(other.to_owned())),
        }
    }
}

/// Detects the dialect of the server behind `session`.
///
/// `getversion` is probed once without retries; servers that reject it are
/// identified from their settings. The session is tuned for the result.
pub fn resolve<T: HttpTransport>(
    session: &mut Session<T>,
) -> Result<(Dialect, Version), UTorrentError> {
    debug!("Detecting WebUI dialect");
    let version = match session.do_action(ActionRequest::new("getversion").no_retry()) {
        Ok(reply) => parse_version(&reply)?,
        Err(UTorrentError::InvalidRequest(message)) => {
            debug!("getversion rejected ({message}), falling back to settings");
            detect_from_settings(&session.do_action(ActionRequest::new("getsettings"))?)?
        }
        Err(e) => return Err(e),
    };
    let dialect = Dialect::from_version(&version)?;
    session.set_tolerate_invalid_first(dialect.tolerates_invalid_first());
    info!("Detected WebUI dialect {dialect} ({version})");
    Ok((dialect, version))
}

/// Applies a dialect chosen by configuration.
pub fn force<T: HttpTransport>(session: &mut Session<T>, dialect: Dialect) -> Dialect {
    session.set_tolerate_invalid_first(dialect.tolerates_invalid_first());
    debug!("Using configured WebUI dialect {dialect}");
    dialect
}

fn int_field(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or_default()
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Builds a [`Version`] from a `getversion` reply, or from any reply that
/// carries at least `build`.
pub fn parse_version(reply: &Value) -> Result<Version, UTorrentError> {
    if let Some(info) = reply.get("version").filter(|v| v.is_object()) {
        return Ok(Version {
            product: str_field(info, "product_code"),
            major: int_field(info, "major_version"),
            middle: 0,
            minor: int_field(info, "minor_version"),
            build: int_field(reply, "build"),
            engine: int_field(info, "engine_version"),
            ui: int_field(info, "ui_version"),
            date: info
                .get("version_date")
                .and_then(Value::as_str)
                .map(str::to_owned),
            user_agent: str_field(info, "user_agent"),
            peer_id: str_field(info, "peer_id"),
            device_id: str_field(info, "device_id"),
        });
    }
    match reply.get("build").and_then(Value::as_i64) {
        Some(build) => Ok(Version {
            product: "desktop".into(),
            build,
            engine: build,
            ui: build,
            ..Default::default()
        }),
        None => Err(UTorrentError::MalformedResponse(
            "cannot detect version from the server reply".into(),
        )),
    }
}

/// Infers the desktop version from a `getsettings` reply.
pub fn detect_from_settings(reply: &Value) -> Result<Version, UTorrentError> {
    let mut version = parse_version(reply)?;
    let enhanced = reply
        .get("settings")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .any(|setting| {
            setting.get(0).and_then(Value::as_str) == Some(ENHANCED_MARKER_SETTING)
        });
    (version.major, version.middle, version.minor) = if enhanced { (3, 0, 0) } else { (2, 2, 0) };
    version.user_agent = format!(
        "BTWebClient/{}{}{}0({})",
        version.major, version.middle, version.minor, version.build
    );
    version.peer_id = format!("UT{}{}{}0", version.major, version.middle, version.minor);
    Ok(version)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::{ScriptedTransport, json_response, ready_session, status_response};

    fn server_version() -> Value {
        json!({
            "build": 27079,
            "version": {
                "engine_version": 27079,
                "major_version": 3,
                "minor_version": 0,
                "peer_id": "UT3000",
                "product_code": "server",
                "ui_version": 27079,
                "user_agent": "BTWebClient/3000(27079)",
                "version_date": "2012-03-01 12:00:00",
                "device_id": "dev"
            }
        })
    }

    #[test]
    fn test_parses_full_version() {
        let version = parse_version(&server_version()).unwrap();
        assert_eq!(version.product, "server");
        assert_eq!(version.major, 3);
        assert_eq!(version.build, 27079);
        assert_eq!(version.date.as_deref(), Some("2012-03-01 12:00:00"));
        assert_eq!(version.to_string(), "BTWebClient/3000(27079)");
        assert_eq!(Dialect::from_version(&version).unwrap(), Dialect::Server);
    }

    #[test]
    fn test_detects_from_settings() {
        let falcon = json!({"build": 30303, "settings": [["webui.uconnect_enable", 1, "true", {}]]});
        let version = detect_from_settings(&falcon).unwrap();
        assert_eq!((version.major, version.middle, version.minor), (3, 0, 0));
        assert_eq!(version.user_agent, "BTWebClient/3000(30303)");
        assert_eq!(version.peer_id, "UT3000");
        assert_eq!(
            Dialect::from_version(&version).unwrap(),
            Dialect::DesktopEnhanced
        );

        let classic = json!({"build": 25302, "settings": [["dir_active_download", 2, "C:\\dl"]]});
        let version = detect_from_settings(&classic).unwrap();
        assert_eq!(version.user_agent, "BTWebClient/2200(25302)");
        assert_eq!(Dialect::from_version(&version).unwrap(), Dialect::Desktop);
    }

    #[test]
    fn test_unknown_product_is_unsupported() {
        let version = Version {
            product: "android".into(),
            ..Default::default()
        };
        assert!(matches!(
            Dialect::from_version(&version),
            Err(UTorrentError::UnsupportedDialect(p)) if p == "android"
        ));
        assert!(parse_version(&json!({})).is_err());
    }

    #[test]
    fn test_dialect_properties() {
        assert_eq!(Dialect::Desktop.torrent_fields(), 19);
        assert_eq!(Dialect::Server.torrent_fields(), 27);
        assert_eq!(Dialect::Desktop.setting_fields(), 3);
        assert_eq!(Dialect::DesktopEnhanced.setting_fields(), 4);
        assert_eq!(Dialect::DesktopEnhanced.path_separator(), '\\');
        assert_eq!(Dialect::Server.path_separator(), '/');

        assert!(Dialect::Desktop.supports("setprio"));
        assert!(!Dialect::Desktop.supports("rss-update"));
        assert!(Dialect::DesktopEnhanced.supports("proxy"));
        assert!(!Dialect::DesktopEnhanced.supports("getversion"));
        assert!(Dialect::Server.supports("getversion"));
        assert!(matches!(
            Dialect::Desktop.check("getxferhist"),
            Err(UTorrentError::UnsupportedAction { .. })
        ));
    }

    #[test]
    fn test_absolute_paths() {
        assert!(Dialect::Server.is_absolute_path("/srv/dl"));
        assert!(!Dialect::Server.is_absolute_path("dl"));
        assert!(Dialect::Desktop.is_absolute_path("C:\\dl"));
        assert!(Dialect::Desktop.is_absolute_path("\\\\nas\\dl"));
        assert!(!Dialect::Desktop.is_absolute_path("movies"));
    }

    #[test]
    fn test_parses_forced_names() {
        assert_eq!("linux".parse::<Dialect>().unwrap(), Dialect::Server);
        assert_eq!("Falcon".parse::<Dialect>().unwrap(), Dialect::DesktopEnhanced);
        assert_eq!("desktop".parse::<Dialect>().unwrap(), Dialect::Desktop);
        assert!("mobile".parse::<Dialect>().is_err());
    }

    #[test_log::test]
    fn test_resolve_probes_getversion() {
        let mut session = ready_session(ScriptedTransport::new().json(server_version()));

        let (dialect, version) = resolve(&mut session).unwrap();

        assert_eq!(dialect, Dialect::Server);
        assert_eq!(version.peer_id, "UT3000");
        assert!(session.transport().paths()[1].contains("action=getversion"));
    }

    #[test_log::test]
    fn test_resolve_falls_back_to_settings() {
        let mut session = ready_session(
            ScriptedTransport::new()
                .ok(status_response(400, "ERROR", "invalid request"))
                .ok(status_response(400, "ERROR", "invalid request"))
                .ok(json_response(
                    r#"{"build":30303,"settings":[["webui.uconnect_enable",1,"true",{}]]}"#,
                )),
        );

        let (dialect, _) = resolve(&mut session).unwrap();

        assert_eq!(dialect, Dialect::DesktopEnhanced);
        assert!(session.transport().paths()[3].contains("action=getsettings"));
    }

    #[test]
    fn test_resolve_propagates_other_errors() {
        let mut session = ready_session(
            ScriptedTransport::new().ok(status_response(401, "Unauthorized", "")),
        );

        assert!(matches!(
            resolve(&mut session),
            Err(UTorrentError::Unauthorized { .. })
        ));
    }
}
