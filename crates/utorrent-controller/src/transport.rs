//! HTTP transport seam.
//!
//! [`HttpTransport`] abstracts the single connection a [`Session`](crate::Session)
//! owns, so the retry and classification logic can be exercised with mocks.
//! [`ReqwestTransport`] is the production implementation.

use std::{
    error::Error as StdError,
    fmt,
    io::{self, Read},
    time::Duration,
};

use reqwest::blocking::Client;
use tracing::trace;
use url::Url;
use utorrent_types::UTorrentError;

use crate::config::SessionConfig;

/// HTTP method of a request. A request with a body is a POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Method {
    Get,
    Post,
}

/// A request relative to the WebUI root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    /// Header name/value pairs in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header name/value pairs; repeated headers appear repeatedly.
    pub headers: Vec<(String, String)>,
    body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// Creates a response over a streaming body.
    pub fn new(
        status: u16,
        reason: impl Into<String>,
        headers: Vec<(String, String)>,
        body: Box<dyn Read + Send>,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
            body,
        }
    }

    /// Creates a response over an in-memory body.
    pub fn from_bytes(status: u16, reason: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(
            status,
            reason,
            Vec::new(),
            Box::new(io::Cursor::new(body.into())),
        )
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Every value of header `name`.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")?.trim().parse().ok()
    }

    /// The unread body.
    pub fn body_mut(&mut self) -> &mut (dyn Read + Send) {
        self.body.as_mut()
    }

    /// Reads the whole body as UTF-8, replacing invalid sequences.
    pub fn read_text(&mut self) -> io::Result<String> {
        let mut raw = Vec::new();
        self.body.read_to_end(&mut raw)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Low-level failure of one exchange, before any retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// Malformed or truncated response, such as a bad status line.
    BadResponse(String),
    /// The socket timed out.
    Timeout,
    /// The established connection was aborted or forcibly closed.
    ConnectionDropped(String),
    /// Connection refused, reset or host unreachable.
    Unreachable(String),
    /// The host name could not be resolved.
    NameResolution(String),
    /// Anything else.
    Other(String),
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFault::BadResponse(m) => write!(f, "bad response: {m}"),
            TransportFault::Timeout => f.write_str("timed out"),
            TransportFault::ConnectionDropped(m) => write!(f, "connection dropped: {m}"),
            TransportFault::Unreachable(m) => write!(f, "unreachable: {m}"),
            TransportFault::NameResolution(m) => write!(f, "name resolution failed: {m}"),
            TransportFault::Other(m) => f.write_str(m),
        }
    }
}

/// One persistent connection to the WebUI.
#[cfg_attr(test, mockall::automock)]
pub trait HttpTransport {
    /// Performs one request/response exchange.
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportFault>;
    /// Drops the connection; the next `send` reconnects.
    fn close(&mut self);
}

/// [`HttpTransport`] backed by a blocking reqwest client.
#[derive(Debug)]
pub struct ReqwestTransport {
    base: Url,
    timeout: Duration,
    verify_certificate: bool,
    client: Option<Client>,
}

impl ReqwestTransport {
    /// Creates a transport for the configured host and opens its client.
    pub fn new(config: &SessionConfig) -> Result<Self, UTorrentError> {
        let mut transport = Self {
            base: config.base_url()?,
            timeout: config.timeout,
            verify_certificate: config.verify_certificate,
            client: None,
        };
        transport.client = Some(
            transport
                .build_client()
                .map_err(|e| UTorrentError::Transport(e.to_string()))?,
        );
        Ok(transport)
    }

    fn build_client(&self) -> Result<Client, TransportFault> {
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .pool_max_idle_per_host(1)
            .danger_accept_invalid_certs(!self.verify_certificate)
            .build()
            .map_err(|e| TransportFault::Other(e.to_string()))
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportFault> {
        let client = match self.client.take() {
            Some(client) => client,
            None => self.build_client()?,
        };
        let url = self
            .base
            .join(&request.path)
            .map_err(|e| TransportFault::Other(format!("invalid request path: {e}")))?;
        trace!("{:?} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => client.get(url),
            Method::Post => client.post(url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let result = builder.send();
        self.client = Some(client);

        let response = result.map_err(classify_reqwest_error)?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Ok(HttpResponse::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            headers,
            Box::new(response),
        ))
    }

    fn close(&mut self) {
        self.client = None;
    }
}

/// Sorts a reqwest failure into the fault categories the retry loop knows.
fn classify_reqwest_error(err: reqwest::Error) -> TransportFault {
    let text = error_chain_text(&err);
    if err.is_timeout() {
        return TransportFault::Timeout;
    }
    if err.is_connect() && text.contains("dns error") {
        return TransportFault::NameResolution(text);
    }
    if let Some(io) = find_io_error(&err) {
        return classify_io_error(io);
    }
    if err.is_connect() {
        TransportFault::Unreachable(text)
    } else if err.is_request() || err.is_body() || err.is_decode() {
        TransportFault::BadResponse(text)
    } else {
        TransportFault::Other(text)
    }
}

pub(crate) fn classify_io_error(err: &io::Error) -> TransportFault {
    // WSAECONNABORTED / WSAECONNRESET
    if matches!(err.raw_os_error(), Some(10053 | 10054)) {
        return TransportFault::ConnectionDropped(err.to_string());
    }
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportFault::Timeout,
        io::ErrorKind::ConnectionAborted => TransportFault::ConnectionDropped(err.to_string()),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable => TransportFault::Unreachable(err.to_string()),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
            TransportFault::BadResponse(err.to_string())
        }
        _ => TransportFault::Other(err.to_string()),
    }
}

fn find_io_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            return Some(io);
        }
        source = e.source();
    }
    None
}

fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        text.push_str(": ");
        text.push_str(&e.to_string());
        source = e.source();
    }
    text
}
