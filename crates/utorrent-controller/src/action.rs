//! Action requests against the WebUI and decoding of their JSON replies.

use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::{Deserialize, Deserializer, Error as DeError, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use tracing::trace;
use utorrent_types::UTorrentError;

use crate::{
    session::{ByteRange, Download, Exchange, Session},
    transport::HttpTransport,
};

/// Everything except the unreserved characters is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes a query component or cookie part.
pub(crate) fn quote(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT).to_string()
}

/// Value of an action parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Sent as decimal.
    Integer(i64),
    /// Sent as `1` or `0`.
    Bool(bool),
    /// Sent percent-encoded.
    Text(String),
    /// The key is repeated once per element.
    List(Vec<ParamValue>),
}

impl ParamValue {
    fn push_encoded(&self, key: &str, out: &mut Vec<String>) {
        match self {
            ParamValue::Integer(n) => out.push(format!("{}={n}", quote(key))),
            ParamValue::Bool(b) => out.push(format!("{}={}", quote(key), u8::from(*b))),
            ParamValue::Text(s) => out.push(format!("{}={}", quote(key), quote(s))),
            ParamValue::List(items) => {
                for item in items {
                    item.push_encoded(key, out);
                }
            }
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        ParamValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<&[String]> for ParamValue {
    fn from(values: &[String]) -> Self {
        ParamValue::List(values.iter().map(|v| ParamValue::Text(v.clone())).collect())
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// One WebUI action, built per call.
///
/// ```rust,ignore
/// let reply = session.do_action(ActionRequest::new("start").param("hash", hashes))?;
/// ```
#[derive(Debug)]
pub struct ActionRequest<'a> {
    action: String,
    params: Vec<(String, ParamValue)>,
    raw: Option<String>,
    body: Option<Vec<u8>>,
    allow_retry: bool,
    range: Option<ByteRange>,
    download: Option<Download<'a>>,
}

impl<'a> ActionRequest<'a> {
    /// Request for `action` without parameters.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Vec::new(),
            raw: None,
            body: None,
            allow_retry: true,
            range: None,
            download: None,
        }
    }

    /// Appends a parameter. Order is kept.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Appends an already encoded query string verbatim.
    pub fn raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    /// Multipart body template, see [`crate::multipart`].
    pub fn body(mut self, template: Vec<u8>) -> Self {
        self.body = Some(template);
        self
    }

    /// Makes a single attempt.
    pub fn no_retry(mut self) -> Self {
        self.allow_retry = false;
        self
    }

    /// Requests a byte range.
    pub fn range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Streams the reply into a sink instead of decoding it.
    pub fn download(mut self, download: Download<'a>) -> Self {
        self.download = Some(download);
        self
    }

    /// Action name.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Location relative to the WebUI root.
    pub fn location(&self, token: &str) -> String {
        let mut args = Vec::new();
        let section = match self.action.as_str() {
            "list" => {
                args.push(format!("token={token}"));
                args.push("list=1".to_owned());
                "gui/"
            }
            "proxy" => "proxy",
            action => {
                args.push(format!("token={token}"));
                args.push(format!("action={}", quote(action)));
                "gui/"
            }
        };
        for (key, value) in &self.params {
            value.push_encoded(key, &mut args);
        }
        let mut location = format!("{section}?{}", args.join("&"));
        if let Some(raw) = self.raw.as_deref().filter(|raw| !raw.is_empty()) {
            location.push('&');
            location.push_str(raw);
        }
        location
    }
}

impl<T: HttpTransport> Session<T> {
    /// Sends `request` and decodes the JSON reply.
    ///
    /// An empty reply or a streamed download yields [`Value::Null`].
    pub fn do_action(&mut self, request: ActionRequest<'_>) -> Result<Value, UTorrentError> {
        let location = request.location(self.token());
        trace!("Action {location}");
        let ActionRequest {
            body,
            allow_retry,
            range,
            download,
            ..
        } = request;
        let exchange = Exchange {
            body,
            allow_retry,
            range,
            download,
        };
        match self.get_data(&location, exchange)? {
            Some(text) if !text.is_empty() => decode_response(&text),
            _ => Ok(Value::Null),
        }
    }
}

/// Parses a WebUI reply. Arrays under repeated object keys are concatenated
/// in the order they appear; any other repeated key keeps its last value.
pub fn decode_response(text: &str) -> Result<Value, UTorrentError> {
    serde_json::from_str::<MergedValue>(text)
        .map(|merged| merged.0)
        .map_err(|e| UTorrentError::MalformedResponse(e.to_string()))
}

struct MergedValue(Value);

impl<'de> Deserialize<'de> for MergedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MergedVisitor).map(MergedValue)
    }
}

struct MergedVisitor;

impl<'de> Visitor<'de> for MergedVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E: DeError>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: DeError>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E: DeError>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E: DeError>(self, v: f64) -> Result<Value, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E: DeError>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: DeError>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: DeError>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: DeError>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(MergedValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = Map::new();
        while let Some((key, MergedValue(value))) = access.next_entry::<String, MergedValue>()? {
            match map.get_mut(&key) {
                Some(Value::Array(existing)) if value.is_array() => {
                    if let Value::Array(more) = value {
                        existing.extend(more);
                    }
                }
                _ => {
                    map.insert(key, value);
                }
            }
        }
        Ok(Value::Object(map))
    }
}
