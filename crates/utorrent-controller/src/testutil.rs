//! Shared test utilities and fixtures.

use std::{collections::VecDeque, time::Duration};

use serde_json::Value;

use crate::{
    client::UTorrentClient,
    config::SessionConfig,
    dialect::Dialect,
    session::Session,
    transport::{HttpRequest, HttpResponse, HttpTransport, TransportFault},
};

pub(crate) const TEST_TOKEN: &str = "pzWB8aYbIKvY1uJLnv-Ru1pMHN3q_V3dVi6SP8kIgeMzNKUVV9kiP5qrJVQAAAAA";

pub(crate) const HASH_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
pub(crate) const HASH_B: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

/// Transport that replays canned replies in order and records every request.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    replies: VecDeque<Result<HttpResponse, TransportFault>>,
    pub(crate) requests: Vec<HttpRequest>,
    pub(crate) closes: usize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, reply: Result<HttpResponse, TransportFault>) -> Self {
        self.replies.push_back(reply);
        self
    }

    pub(crate) fn ok(self, response: HttpResponse) -> Self {
        self.reply(Ok(response))
    }

    pub(crate) fn fault(self, fault: TransportFault) -> Self {
        self.reply(Err(fault))
    }

    pub(crate) fn json(self, body: Value) -> Self {
        self.ok(json_response(&body.to_string()))
    }

    /// Paths of the recorded requests, without the leading `/`.
    pub(crate) fn paths(&self) -> Vec<&str> {
        self.requests
            .iter()
            .map(|r| r.path.trim_start_matches('/'))
            .collect()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportFault> {
        self.requests.push(request.clone());
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(TransportFault::Other(format!("no reply for {}", request.path))))
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}

pub(crate) fn token_page(token: &str) -> HttpResponse {
    HttpResponse::from_bytes(
        200,
        "OK",
        format!("<html><div id='token' style='display:none;'>{token}</div></html>"),
    )
}

pub(crate) fn json_response(body: &str) -> HttpResponse {
    HttpResponse::from_bytes(200, "OK", body.to_owned())
}

pub(crate) fn status_response(status: u16, reason: &str, body: &str) -> HttpResponse {
    HttpResponse::from_bytes(status, reason, body.to_owned())
}

pub(crate) fn test_config() -> SessionConfig {
    SessionConfig {
        login: "admin".into(),
        password: "secret".into(),
        reconnect_pause: Duration::ZERO,
        ..Default::default()
    }
}

pub(crate) fn config_for(dialect: Dialect) -> SessionConfig {
    SessionConfig {
        dialect: Some(dialect),
        ..test_config()
    }
}

/// Prepends the token page to the replies of `transport`.
pub(crate) fn with_token(transport: ScriptedTransport) -> ScriptedTransport {
    let mut scripted = ScriptedTransport::new().ok(token_page(TEST_TOKEN));
    scripted.replies.extend(transport.replies);
    scripted
}

/// Session whose token fetch is already scripted; `transport` holds the
/// replies that follow it.
pub(crate) fn ready_session(transport: ScriptedTransport) -> Session<ScriptedTransport> {
    Session::with_transport(&test_config(), with_token(transport)).unwrap()
}

/// Client speaking `dialect` without detection; `transport` holds the replies
/// after the token fetch.
pub(crate) fn client_for(
    dialect: Dialect,
    transport: ScriptedTransport,
) -> UTorrentClient<ScriptedTransport> {
    UTorrentClient::with_transport(&config_for(dialect), with_token(transport)).unwrap()
}

/// Torrent tuple in the 19 field layout.
pub(crate) fn torrent_row(hash: &str, name: &str, label: &str) -> Value {
    serde_json::json!([
        hash, 201, name, 1000, 500, 500, 250, 500, 10, 20, 60, label, 1, 5, 2, 8, 65536, 1, 500
    ])
}

/// Torrent tuple in the 27 field layout.
pub(crate) fn torrent_row_extended(hash: &str, name: &str, label: &str) -> Value {
    let mut row = torrent_row(hash, name, label);
    if let Value::Array(fields) = &mut row {
        fields.extend(serde_json::json!([
            "http://example.com/a.torrent",
            "",
            "Seeding",
            "1",
            1_700_000_000,
            1_700_000_600,
            "",
            "/downloads"
        ])
        .as_array()
        .cloned()
        .unwrap_or_default());
    }
    row
}
