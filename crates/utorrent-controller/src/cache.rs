//! Local mirror of the torrent, feed and filter lists.
//!
//! The first `list` call returns full snapshots together with a cache id.
//! Later calls pass that id back and receive only what changed: a removed
//! key array and an added/changed tuple array per entity kind.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};
use utorrent_types::UTorrentError;

use crate::{action::ActionRequest, session::Session, transport::HttpTransport};

/// Key of a cached entity, taken from the first tuple element.
pub trait CacheKey: Ord + Clone {
    /// Reads a key from a tuple element or a removal entry.
    fn from_value(value: &Value) -> Option<Self>;
}

impl CacheKey for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl CacheKey for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }
}

/// Raw tuples of one entity kind keyed by their first element.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCache<K> {
    entries: BTreeMap<K, Value>,
}

impl<K> Default for EntityCache<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: CacheKey> EntityCache<K> {
    /// Replaces the content with a full snapshot.
    fn replace_all(&mut self, rows: &[Value]) {
        self.entries.clear();
        self.upsert(rows);
    }

    /// Applies one delta. Removals go first so a key can be replaced in one step.
    fn apply_delta(&mut self, removed: &[Value], upserted: &[Value]) {
        for key in removed.iter().filter_map(K::from_value) {
            self.entries.remove(&key);
        }
        self.upsert(upserted);
    }

    fn upsert(&mut self, rows: &[Value]) {
        for row in rows {
            match row.get(0).and_then(K::from_value) {
                Some(key) => {
                    self.entries.insert(key, row.clone());
                }
                None => warn!("Skipping list entry without key: {row}"),
            }
        }
    }

    /// Raw tuple stored under `key`.
    pub fn get(&self, key: &K) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Value)> {
        self.entries.iter()
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Text field `index` of each known key, in the order asked; unknown keys are skipped.
    fn field_texts(&self, keys: &[K], index: usize) -> Vec<String> {
        keys.iter()
            .filter_map(|key| self.entries.get(key))
            .filter_map(|row| row.get(index))
            .map(|field| match field {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

fn rows<'a>(reply: &'a Value, key: &str) -> &'a [Value] {
    reply
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Mirror of the three list collections plus the latest label list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListCache {
    cache_id: i64,
    torrents: EntityCache<String>,
    feeds: EntityCache<i64>,
    filters: EntityCache<i64>,
    labels: Vec<Value>,
}

impl ListCache {
    /// Empty cache; the first fetch will be a full snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier of the last applied list, 0 when none.
    pub fn cache_id(&self) -> i64 {
        self.cache_id
    }

    /// Brings the cache up to date. A full snapshot is requested when no
    /// cache id is held yet or when `force_full` is set.
    pub fn fetch<T: HttpTransport>(
        &mut self,
        session: &mut Session<T>,
        force_full: bool,
    ) -> Result<(), UTorrentError> {
        let delta = self.cache_id != 0 && !force_full;
        let mut request = ActionRequest::new("list");
        if delta {
            debug!("Fetching list delta since {}", self.cache_id);
            request = request.param("cid", self.cache_id);
        } else {
            debug!("Fetching full list");
        }
        let reply = session.do_action(request)?;
        if !reply.is_object() {
            return Err(UTorrentError::MalformedResponse(
                "list reply is not an object".into(),
            ));
        }
        self.apply(&reply, delta);
        Ok(())
    }

    /// Applies a `list` reply: a delta when `delta` is set, a snapshot otherwise.
    pub fn apply(&mut self, reply: &Value, delta: bool) {
        if delta {
            self.torrents
                .apply_delta(rows(reply, "torrentm"), rows(reply, "torrentp"));
            self.feeds
                .apply_delta(rows(reply, "rssfeedm"), rows(reply, "rssfeedp"));
            self.filters
                .apply_delta(rows(reply, "rssfilterm"), rows(reply, "rssfilterp"));
        } else {
            if let Some(torrents) = reply.get("torrents").and_then(Value::as_array) {
                self.torrents.replace_all(torrents);
            }
            if let Some(feeds) = reply.get("rssfeeds").and_then(Value::as_array) {
                self.feeds.replace_all(feeds);
            }
            if let Some(filters) = reply.get("rssfilters").and_then(Value::as_array) {
                self.filters.replace_all(filters);
            }
        }
        if let Some(labels) = reply.get("label").and_then(Value::as_array) {
            self.labels = labels.clone();
        }
        self.cache_id = match reply.get("torrentc").and_then(i64::from_value) {
            Some(id) => id,
            None => {
                warn!("List reply without cache id, next fetch is a full snapshot");
                0
            }
        };
    }

    /// Cached torrent tuples keyed by hash.
    pub fn torrents(&self) -> &EntityCache<String> {
        &self.torrents
    }

    /// Cached feed tuples keyed by feed id.
    pub fn feeds(&self) -> &EntityCache<i64> {
        &self.feeds
    }

    /// Cached filter tuples keyed by filter id.
    pub fn filters(&self) -> &EntityCache<i64> {
        &self.filters
    }

    /// Label pairs from the latest reply.
    pub fn labels(&self) -> &[Value] {
        &self.labels
    }

    /// Names of the given torrents.
    pub fn resolve_torrent_names(&self, hashes: &[String]) -> Vec<String> {
        self.torrents.field_texts(hashes, 2)
    }

    /// URLs of the given feeds.
    pub fn resolve_feed_urls(&self, ids: &[i64]) -> Vec<String> {
        self.feeds.field_texts(ids, 6)
    }

    /// Names of the given filters.
    pub fn resolve_filter_names(&self, ids: &[i64]) -> Vec<String> {
        self.filters.field_texts(ids, 2)
    }

    /// Filter ids grouped by the feed they belong to; filters that apply to
    /// every feed are under `-1`.
    pub fn filters_by_feed(&self) -> BTreeMap<i64, Vec<i64>> {
        let mut out: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for (id, row) in self.filters.iter() {
            let feed_id = row.get(6).and_then(i64::from_value).unwrap_or(-1);
            out.entry(feed_id).or_default().push(*id);
        }
        out
    }
}
