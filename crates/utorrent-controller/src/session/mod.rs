//! Authenticated WebUI session.
//!
//! A [`Session`] owns one connection, the security token and the cookie jar.
//! Every exchange goes through a bounded retry loop that sorts transport
//! faults into retryable and fatal ones; on every error path the connection
//! is closed before the error is returned.

use std::{
    collections::BTreeMap,
    io::{ErrorKind, Read, Write},
    sync::LazyLock,
    thread,
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use regex::Regex;
use tracing::{debug, warn};
use utorrent_types::UTorrentError;

use crate::{
    action::quote,
    config::SessionConfig,
    multipart,
    transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport, TransportFault},
};

#[cfg(test)]
mod tests;

/// Size of the chunks streamed into a download sink.
pub const CHUNK_SIZE: usize = 10 * 1024;

const TOKEN_LOCATION: &str = "gui/token.html";

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div .*?id=['"]token['"].*?>(.+?)</div>"#).expect("valid token pattern")
});

static CONTENT_RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bytes (\d+)-\d+/(\d+)$").expect("valid range pattern"));

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport yet.
    Disconnected,
    /// Transport open, waiting for the security token.
    TokenPending,
    /// Token held; actions can be issued.
    Ready,
    /// A transient fault occurred and the request is being retried.
    Retrying,
    /// The last request failed.
    Faulted,
}

/// Byte range of a ranged download: `[start, start + len)`, or open-ended
/// from `start` when `len` is `None` or zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte.
    pub start: u64,
    /// Number of bytes.
    pub len: Option<u64>,
}

impl ByteRange {
    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        // a range running past u64::MAX is sent open-ended
        match self.len.and_then(|len| len.checked_sub(1)) {
            Some(extra) => match self.start.checked_add(extra) {
                Some(end) => format!("bytes={}-{end}", self.start),
                None => format!("bytes={}-", self.start),
            },
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Progress report passed to the download callback after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Start of the requested range, if the download was ranged.
    pub range_start: Option<u64>,
    /// Bytes read so far.
    pub read: u64,
    /// Total size from `Content-Range`, else from `Content-Length`.
    pub total: Option<u64>,
}

/// Where a streamed response body goes.
pub struct Download<'a> {
    sink: &'a mut dyn Write,
    progress: Option<&'a mut dyn FnMut(TransferProgress)>,
}

impl<'a> Download<'a> {
    /// Streams into `sink`.
    pub fn new(sink: &'a mut dyn Write) -> Self {
        Self {
            sink,
            progress: None,
        }
    }

    /// Reports progress to `callback` after every chunk.
    pub fn with_progress(mut self, callback: &'a mut dyn FnMut(TransferProgress)) -> Self {
        self.progress = Some(callback);
        self
    }
}

impl std::fmt::Debug for Download<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

/// Options of one exchange.
#[derive(Debug)]
pub(crate) struct Exchange<'a> {
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) allow_retry: bool,
    pub(crate) range: Option<ByteRange>,
    pub(crate) download: Option<Download<'a>>,
}

impl Exchange<'_> {
    pub(crate) fn new() -> Self {
        Self {
            body: None,
            allow_retry: true,
            range: None,
            download: None,
        }
    }
}

/// An authenticated session against one WebUI endpoint.
///
/// Not safe for concurrent use; build one session per caller.
pub struct Session<T: HttpTransport = ReqwestTransport> {
    transport: T,
    authorization: String,
    token: String,
    cookies: BTreeMap<String, String>,
    retry_budget: u32,
    reconnect_pause: Duration,
    state: SessionState,
    tolerate_invalid_first: bool,
}

impl Session {
    /// Opens a connection to the configured WebUI and fetches the security token.
    pub fn connect(config: &SessionConfig) -> Result<Self, UTorrentError> {
        config.validate()?;
        debug!("Connecting to uTorrent WebUI at {}", config.host);
        let transport = ReqwestTransport::new(config)?;
        Self::with_transport(config, transport)
    }
}

impl<T: HttpTransport> Session<T> {
    /// Creates a session over a custom transport and fetches the security token.
    pub fn with_transport(config: &SessionConfig, transport: T) -> Result<Self, UTorrentError> {
        let credentials = format!("{}:{}", config.login, config.password);
        let mut session = Self {
            transport,
            authorization: format!("Basic {}", STANDARD.encode(credentials)),
            token: String::new(),
            cookies: BTreeMap::new(),
            retry_budget: config.retry_budget.max(1),
            reconnect_pause: config.reconnect_pause,
            state: SessionState::Disconnected,
            tolerate_invalid_first: true,
        };
        session.state = SessionState::TokenPending;
        session.refresh_token()?;
        debug!("WebUI session ready");
        Ok(session)
    }

    /// Fetches a fresh security token from the token page.
    pub fn refresh_token(&mut self) -> Result<(), UTorrentError> {
        self.state = SessionState::TokenPending;
        let page = self
            .get_data(TOKEN_LOCATION, Exchange::new())?
            .unwrap_or_default();
        let Some(token) = TOKEN_PATTERN.captures(&page).and_then(|c| c.get(1)) else {
            self.state = SessionState::Faulted;
            return Err(UTorrentError::TokenUnavailable);
        };
        self.token = token.as_str().to_owned();
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current security token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Cookies collected so far.
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Grants one extra attempt when the server answers 400 to the first
    /// request on a connection, which happens while a second server process is
    /// bound to the same port. Only the headless server dialect needs it.
    pub(crate) fn set_tolerate_invalid_first(&mut self, tolerate: bool) {
        self.tolerate_invalid_first = tolerate;
    }

    /// Performs one exchange at `location` (relative to the WebUI root).
    ///
    /// Returns the body text, or `None` when the body was streamed into a
    /// download sink. The connection is closed once the body has been read.
    pub(crate) fn get_data(
        &mut self,
        location: &str,
        exchange: Exchange<'_>,
    ) -> Result<Option<String>, UTorrentError> {
        let Exchange {
            body,
            allow_retry,
            range,
            download,
        } = exchange;

        let mut headers = vec![("Authorization".to_owned(), self.authorization.clone())];
        if !self.cookies.is_empty() {
            headers.push(("Cookie".to_owned(), self.cookie_header()));
        }
        let body = body.map(|template| {
            let (content_type, body) = multipart::finalize(&template);
            headers.push(("Content-Type".to_owned(), content_type));
            body
        });
        if let Some(range) = range {
            headers.push(("Range".to_owned(), range.header_value()));
        }

        let request = HttpRequest {
            method: if body.is_some() {
                Method::Post
            } else {
                Method::Get
            },
            path: format!("/{location}"),
            headers,
            body,
        };
        let mut response = self.make_request(location, &request, allow_retry)?;

        let result = match download {
            Some(download) => {
                stream_body(&mut response, range.map(|r| r.start), download).map(|_| None)
            }
            None => response
                .read_text()
                .map(Some)
                .map_err(|e| UTorrentError::Transport(format!("reading {location}: {e}"))),
        };
        self.transport.close();
        if result.is_err() {
            self.state = SessionState::Faulted;
        }
        result
    }

    /// Runs the retry loop and guarantees the connection is closed on failure.
    fn make_request(
        &mut self,
        location: &str,
        request: &HttpRequest,
        allow_retry: bool,
    ) -> Result<HttpResponse, UTorrentError> {
        let result = self.send_with_retries(location, request, allow_retry);
        match &result {
            Ok(_) => {
                if self.state != SessionState::TokenPending {
                    self.state = SessionState::Ready;
                }
            }
            Err(e) => {
                debug!("Request {location} failed: {e}");
                self.transport.close();
                self.state = SessionState::Faulted;
            }
        }
        result
    }

    fn send_with_retries(
        &mut self,
        location: &str,
        request: &HttpRequest,
        allow_retry: bool,
    ) -> Result<HttpResponse, UTorrentError> {
        let max_attempts = if allow_retry { self.retry_budget } else { 1 };
        let mut attempts = 0;
        let mut invalid_request_grace = self.tolerate_invalid_first;

        loop {
            attempts += 1;
            let fault = match self.transport.send(request) {
                Ok(mut response) => match response.status {
                    400 => {
                        let message = response.read_text().unwrap_or_default().trim().to_owned();
                        if invalid_request_grace {
                            warn!("{location}: invalid request on a fresh connection, retrying once");
                            invalid_request_grace = false;
                            self.transport.close();
                            // not charged to the budget
                            attempts -= 1;
                            self.enter_retry();
                            continue;
                        }
                        return Err(UTorrentError::InvalidRequest(message));
                    }
                    401 => {
                        return Err(UTorrentError::Unauthorized {
                            location: without_query(location).to_owned(),
                            reason: response.reason,
                        });
                    }
                    404 => {
                        return Err(UTorrentError::NotFound {
                            location: without_query(location).to_owned(),
                            reason: response.reason,
                        });
                    }
                    status if (200..300).contains(&status) => {
                        self.store_cookies(&response);
                        return Ok(response);
                    }
                    status => {
                        return Err(UTorrentError::UnexpectedStatus {
                            status,
                            reason: response.reason,
                        });
                    }
                },
                Err(fault) => fault,
            };

            let retryable = matches!(
                fault,
                TransportFault::BadResponse(_)
                    | TransportFault::Timeout
                    | TransportFault::ConnectionDropped(_)
            );
            let dropped = matches!(fault, TransportFault::ConnectionDropped(_));
            let error = map_transport_fault(fault, attempts);
            if !retryable {
                return Err(error);
            }
            self.transport.close();
            if attempts >= max_attempts {
                return Err(error);
            }
            warn!("{location}: attempt {attempts}/{max_attempts} failed: {error}");
            if dropped {
                thread::sleep(self.reconnect_pause);
            }
            self.enter_retry();
        }
    }

    fn enter_retry(&mut self) {
        if self.state != SessionState::TokenPending {
            self.state = SessionState::Retrying;
        }
    }

    fn store_cookies(&mut self, response: &HttpResponse) {
        for set_cookie in response.header_values("Set-Cookie") {
            let mut parts = set_cookie.split(';');
            let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let expired = parts.any(|attr| attr.trim().eq_ignore_ascii_case("max-age=0"));
            if expired {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_owned(), value.trim().to_owned());
            }
        }
    }

    fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", quote(name), quote(value)))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl<T: HttpTransport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("retry_budget", &self.retry_budget)
            .finish_non_exhaustive()
    }
}

/// Request location without its query string, which carries the token.
fn without_query(location: &str) -> &str {
    location.split_once('?').map_or(location, |(path, _)| path)
}

/// Error reported when `fault` ends the request after `attempts` attempts.
fn map_transport_fault(fault: TransportFault, attempts: u32) -> UTorrentError {
    match fault {
        TransportFault::Timeout => UTorrentError::Timeout { attempts },
        TransportFault::Unreachable(message) | TransportFault::NameResolution(message) => {
            UTorrentError::NetworkFatal(message)
        }
        TransportFault::BadResponse(message)
        | TransportFault::ConnectionDropped(message)
        | TransportFault::Other(message) => UTorrentError::Transport(message),
    }
}

/// Total size announced by a `Content-Range: bytes a-b/total` header.
fn content_range_total(header: Option<&str>) -> Option<u64> {
    CONTENT_RANGE_PATTERN
        .captures(header?.trim())
        .and_then(|c| c.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

fn stream_body(
    response: &mut HttpResponse,
    range_start: Option<u64>,
    download: Download<'_>,
) -> Result<(), UTorrentError> {
    let Download {
        sink,
        mut progress,
    } = download;
    let total = content_range_total(response.header("Content-Range")).or(response.content_length());
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut read = 0u64;
    loop {
        let n = read_chunk(response.body_mut(), &mut buf)
            .map_err(|e| UTorrentError::Transport(format!("reading download: {e}")))?;
        read += n as u64;
        if let Some(callback) = progress.as_deref_mut() {
            callback(TransferProgress {
                range_start,
                read,
                total,
            });
        }
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])
            .map_err(|e| UTorrentError::FileSystem(e.to_string()))?;
    }
    sink.flush()
        .map_err(|e| UTorrentError::FileSystem(e.to_string()))
}

/// Fills `buf` unless the body ends first.
fn read_chunk(body: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match body.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
