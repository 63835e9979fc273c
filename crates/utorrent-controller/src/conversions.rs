//! Conversions from raw WebUI JSON tuples to `utorrent_types` records.
//!
//! These newtype wrappers exist to satisfy the orphan rule since both the
//! source and target types are defined outside this crate.

use std::collections::BTreeMap;

use serde_json::Value;
use utorrent_types::{
    Feed, FeedEntry, FileEntry, Filter, JobInfo, Label, Priority, SettingValue, Torrent,
    TorrentExtras, TorrentStatus, UTorrentError, check_hash,
};

use crate::dialect::Dialect;

/// Positional view over one tuple of a reply.
struct Fields<'a> {
    kind: &'static str,
    row: &'a [Value],
}

impl<'a> Fields<'a> {
    fn new(kind: &'static str, value: &'a Value, min_len: usize) -> Result<Self, UTorrentError> {
        let row = value
            .as_array()
            .ok_or_else(|| UTorrentError::MalformedResponse(format!("{kind} is not an array")))?;
        if row.len() < min_len {
            return Err(UTorrentError::MalformedResponse(format!(
                "{kind} has {} fields, expected {min_len}",
                row.len()
            )));
        }
        Ok(Self { kind, row })
    }

    fn get(&self, index: usize) -> Result<&'a Value, UTorrentError> {
        self.row.get(index).ok_or_else(|| {
            UTorrentError::MalformedResponse(format!("{} field {index} missing", self.kind))
        })
    }

    /// Numbers may arrive as strings.
    fn int(&self, index: usize) -> Result<i64, UTorrentError> {
        let value = self.get(index)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .or_else(|| value.as_bool().map(i64::from))
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| {
                UTorrentError::MalformedResponse(format!(
                    "{} field {index} is not a number: {value}",
                    self.kind
                ))
            })
    }

    fn text(&self, index: usize) -> Result<String, UTorrentError> {
        match self.get(index)? {
            Value::String(s) => Ok(s.clone()),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    fn flag(&self, index: usize) -> Result<bool, UTorrentError> {
        match self.get(index)? {
            Value::Bool(b) => Ok(*b),
            _ => Ok(self.int(index)? != 0),
        }
    }
}

/// Wrapper for converting a `list` torrent tuple to [`Torrent`].
#[derive(Debug)]
pub(crate) struct TorrentRow<'a>(pub(crate) &'a Value, pub(crate) Dialect);

/// Wrapper for converting a `label` pair to [`Label`].
#[derive(Debug)]
pub(crate) struct LabelRow<'a>(pub(crate) &'a Value);

/// Wrapper for converting an `rssfeeds` tuple to [`Feed`].
#[derive(Debug)]
pub(crate) struct FeedRow<'a>(pub(crate) &'a Value);

/// Wrapper for converting an `rssfilters` tuple to [`Filter`].
#[derive(Debug)]
pub(crate) struct FilterRow<'a>(pub(crate) &'a Value);

/// Wrapper for converting a `getprops` object to [`JobInfo`].
#[derive(Debug)]
pub(crate) struct JobInfoObject<'a>(pub(crate) &'a Value);

impl TryFrom<TorrentRow<'_>> for Torrent {
    type Error = UTorrentError;

    fn try_from(wrapper: TorrentRow<'_>) -> Result<Self, Self::Error> {
        let TorrentRow(value, dialect) = wrapper;
        let f = Fields::new("torrent", value, 19)?;
        let extras = if dialect.torrent_fields() > 19 && f.row.len() >= 27 {
            Some(TorrentExtras {
                url: f.text(19)?,
                rss_url: f.text(20)?,
                status_message: f.text(21)?,
                stream_id: f.text(22)?,
                added_on: f.int(23)?,
                completed_on: f.int(24)?,
                app_update_url: f.text(25)?,
                download_dir: f.text(26)?,
            })
        } else {
            None
        };
        Ok(Self {
            hash: check_hash(&f.text(0)?)?,
            status: TorrentStatus(f.int(1)? as u32),
            name: f.text(2)?,
            size: f.int(3)?,
            progress: f.int(4)?,
            downloaded: f.int(5)?,
            uploaded: f.int(6)?,
            ratio: f.int(7)?,
            ul_speed: f.int(8)?,
            dl_speed: f.int(9)?,
            eta: f.int(10)?,
            label: f.text(11)?,
            peers_connected: f.int(12)?,
            peers_total: f.int(13)?,
            seeds_connected: f.int(14)?,
            seeds_total: f.int(15)?,
            availability: f.int(16)?,
            queue_order: f.int(17)?,
            dl_remain: f.int(18)?,
            extras,
        })
    }
}

impl TryFrom<LabelRow<'_>> for Label {
    type Error = UTorrentError;

    fn try_from(wrapper: LabelRow<'_>) -> Result<Self, Self::Error> {
        let f = Fields::new("label", wrapper.0, 2)?;
        Ok(Self {
            name: f.text(0)?,
            torrent_count: f.int(1)?,
        })
    }
}

fn feed_entry(value: &Value) -> Result<FeedEntry, UTorrentError> {
    let f = Fields::new("feed entry", value, 12)?;
    Ok(FeedEntry {
        name: f.text(0)?,
        name_full: f.text(1)?,
        url: f.text(2)?,
        quality: f.int(3)?,
        codec: f.int(4)?,
        timestamp: f.int(5)?,
        season: f.int(6)?,
        episode: f.int(7)?,
        episode_to: f.int(8)?,
        feed_id: f.int(9)?,
        repack: f.flag(10)?,
        in_history: f.flag(11)?,
    })
}

impl TryFrom<FeedRow<'_>> for Feed {
    type Error = UTorrentError;

    fn try_from(wrapper: FeedRow<'_>) -> Result<Self, Self::Error> {
        let f = Fields::new("feed", wrapper.0, 9)?;
        let entries = f
            .get(8)?
            .as_array()
            .map(|entries| entries.iter().map(feed_entry).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            id: f.int(0)?,
            enabled: f.flag(1)?,
            use_feed_title: f.flag(2)?,
            user_selected: f.flag(3)?,
            programmed: f.flag(4)?,
            download_state: f.int(5)?,
            url: f.text(6)?,
            next_update: f.int(7)?,
            entries,
        })
    }
}

impl TryFrom<FilterRow<'_>> for Filter {
    type Error = UTorrentError;

    fn try_from(wrapper: FilterRow<'_>) -> Result<Self, Self::Error> {
        let f = Fields::new("filter", wrapper.0, 16)?;
        Ok(Self {
            id: f.int(0)?,
            flags: f.int(1)?,
            name: f.text(2)?,
            filter: f.text(3)?,
            not_filter: f.text(4)?,
            save_in: f.text(5)?,
            feed_id: f.int(6)?,
            quality: f.int(7)?,
            label: f.text(8)?,
            postpone_mode: f.flag(9)?,
            last_match: f.int(10)?,
            smart_ep_filter: f.int(11)?,
            repack_ep_filter: f.int(12)?,
            episode: f.text(13)?,
            episode_filter: f.flag(14)?,
            resolving_candidate: f.flag(15)?,
        })
    }
}

impl TryFrom<JobInfoObject<'_>> for JobInfo {
    type Error = UTorrentError;

    fn try_from(wrapper: JobInfoObject<'_>) -> Result<Self, Self::Error> {
        let value = wrapper.0;
        let int = |key: &str| value.get(key).and_then(Value::as_i64).unwrap_or_default();
        let hash = value
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| UTorrentError::MalformedResponse("props without hash".into()))?;
        let trackers = value
            .get("trackers")
            .and_then(Value::as_str)
            .map(|t| {
                t.trim()
                    .split("\r\n\r\n")
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            hash: check_hash(hash)?,
            trackers,
            ulrate: int("ulrate"),
            dlrate: int("dlrate"),
            superseed: int("superseed"),
            dht: int("dht"),
            pex: int("pex"),
            seed_override: int("seed_override"),
            seed_ratio: int("seed_ratio"),
            seed_time: int("seed_time"),
        })
    }
}

/// Files of a `getfiles` reply, which alternates hash and file list.
pub(crate) fn file_lists(
    reply: &Value,
) -> Result<BTreeMap<String, Vec<FileEntry>>, UTorrentError> {
    let mut out = BTreeMap::new();
    let Some(items) = reply.get("files").and_then(Value::as_array) else {
        return Ok(out);
    };
    for pair in items.chunks(2) {
        let [hash, files] = pair else {
            return Err(UTorrentError::MalformedResponse(
                "file list without files for the last hash".into(),
            ));
        };
        let hash = check_hash(
            hash.as_str()
                .ok_or_else(|| UTorrentError::MalformedResponse("file hash is not text".into()))?,
        )?;
        let files = files
            .as_array()
            .ok_or_else(|| UTorrentError::MalformedResponse("file list is not an array".into()))?
            .iter()
            .enumerate()
            .map(|(index, file)| {
                let f = Fields::new("file", file, 4)?;
                Ok(FileEntry {
                    torrent_hash: hash.clone(),
                    index,
                    name: f.text(0)?,
                    size: f.int(1)?,
                    downloaded: f.int(2)?,
                    priority: Priority::from_wire(f.int(3)?),
                })
            })
            .collect::<Result<Vec<_>, UTorrentError>>()?;
        out.insert(hash, files);
    }
    Ok(out)
}

/// Typed value of one setting tuple `[name, type, value, ..]`.
///
/// Type 0 is an integer and type 1 a boolean; an empty value keeps its text
/// form whatever the type says.
pub(crate) fn setting_value(row: &Value) -> Result<(String, SettingValue), UTorrentError> {
    // 3 fields on the classic desktop, 4 elsewhere
    let f = Fields::new("setting", row, 3)?;
    let name = f.text(0)?;
    let value = f.text(2)?;
    let typed = match f.int(1)? {
        0 if !value.is_empty() => value
            .trim()
            .parse()
            .map(SettingValue::Integer)
            .unwrap_or(SettingValue::Text(value)),
        1 if !value.is_empty() => SettingValue::Boolean(value == "true"),
        _ => SettingValue::Text(value),
    };
    Ok((name, typed))
}
