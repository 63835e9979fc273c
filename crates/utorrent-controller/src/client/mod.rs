//! Typed client over a WebUI session.

use std::{collections::BTreeMap, fs, path::Path};

use serde_json::Value;
use tracing::{debug, warn};
use utorrent_types::{
    Feed, FileEntry, Filter, JobInfo, Label, Priority, SettingValue, Torrent, TorrentControl,
    UTorrentError, Version, check_hash, info_hash, magnet_hash, parse_hash_prop,
};

use crate::{
    action::{ActionRequest, ParamValue, quote},
    cache::ListCache,
    config::SessionConfig,
    conversions::{FeedRow, FilterRow, JobInfoObject, LabelRow, TorrentRow, file_lists, setting_value},
    dialect::{self, Dialect},
    multipart,
    session::{ByteRange, Download, Session},
    transport::{HttpTransport, ReqwestTransport},
};


const DOWNLOAD_DIR_SETTING: &str = "dir_active_download";

/// One property assignment for [`UTorrentClient::torrent_set_props`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentProp {
    /// Torrent hash.
    pub hash: String,
    /// Property name, e.g. `label` or `ulrate`.
    pub name: String,
    /// New value.
    pub value: String,
}

/// Which parts of a torrent a removal deletes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Delete the downloaded data.
    pub with_data: bool,
    /// Delete the `.torrent` file. Not supported by the classic desktop dialect.
    pub with_torrent: bool,
}

/// UTorrentClient is a BitTorrent client that drives a uTorrent WebUI.
pub struct UTorrentClient<T: HttpTransport = ReqwestTransport> {
    session: Session<T>,
    dialect: Dialect,
    version: Option<Version>,
    cache: ListCache,
    announce_url: String,
}

impl UTorrentClient {
    /// Connects to the configured WebUI and resolves its dialect unless the
    /// configuration names one.
    pub fn connect(config: &SessionConfig) -> Result<Self, UTorrentError> {
        let session = Session::connect(config)?;
        Self::with_session(config, session)
    }
}

impl<T: HttpTransport> UTorrentClient<T> {
    /// Creates a client over a custom transport.
    pub fn with_transport(config: &SessionConfig, transport: T) -> Result<Self, UTorrentError> {
        let session = Session::with_transport(config, transport)?;
        Self::with_session(config, session)
    }

    fn with_session(config: &SessionConfig, mut session: Session<T>) -> Result<Self, UTorrentError> {
        let (dialect, version) = match config.dialect {
            Some(forced) => (dialect::force(&mut session, forced), None),
            None => {
                let (dialect, version) = dialect::resolve(&mut session)?;
                (dialect, Some(version))
            }
        };
        let announce_url = config
            .base_url()?
            .join("announce")
            .map_err(|e| UTorrentError::InvalidConfig(e.to_string()))?
            .to_string();
        Ok(Self {
            session,
            dialect,
            version,
            cache: ListCache::new(),
            announce_url,
        })
    }

    /// Dialect spoken by the server.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The underlying session.
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// The list cache as of the last list call.
    pub fn cache(&self) -> &ListCache {
        &self.cache
    }

    fn send(&mut self, request: ActionRequest<'_>) -> Result<Value, UTorrentError> {
        self.dialect.check(request.action())?;
        self.session.do_action(request)
    }

    fn send_hashes(&mut self, action: &str, hashes: &[String]) -> Result<(), UTorrentError> {
        let hashes = check_hashes(hashes)?;
        self.send(ActionRequest::new(action).param("hash", hashes))?;
        Ok(())
    }

    /// Server version. Only the headless server reports it directly; the
    /// desktop dialects are identified from their settings.
    pub fn version(&mut self) -> Result<Version, UTorrentError> {
        if let Some(version) = &self.version {
            return Ok(version.clone());
        }
        let version = match self.dialect {
            Dialect::Server => dialect::parse_version(&self.send(ActionRequest::new("getversion"))?)?,
            Dialect::Desktop | Dialect::DesktopEnhanced => {
                dialect::detect_from_settings(&self.send(ActionRequest::new("getsettings"))?)?
            }
        };
        self.version = Some(version.clone());
        Ok(version)
    }

    fn refresh_lists(&mut self) -> Result<(), UTorrentError> {
        self.dialect.check("list")?;
        self.cache.fetch(&mut self.session, false)
    }

    /// All torrents keyed by hash.
    pub fn torrent_list(&mut self) -> Result<BTreeMap<String, Torrent>, UTorrentError> {
        self.refresh_lists()?;
        self.cache
            .torrents()
            .iter()
            .map(|(hash, row)| {
                let torrent = Torrent::try_from(TorrentRow(row, self.dialect))?;
                Ok::<_, UTorrentError>((hash.clone(), torrent))
            })
            .collect()
    }

    /// Labels with their torrent counts.
    pub fn labels(&mut self) -> Result<Vec<Label>, UTorrentError> {
        self.refresh_lists()?;
        self.cache
            .labels()
            .iter()
            .map(|row| Label::try_from(LabelRow(row)))
            .collect()
    }

    /// RSS feeds keyed by id.
    pub fn rss_list(&mut self) -> Result<BTreeMap<i64, Feed>, UTorrentError> {
        self.refresh_lists()?;
        self.cache
            .feeds()
            .iter()
            .map(|(id, row)| Ok::<_, UTorrentError>((*id, Feed::try_from(FeedRow(row))?)))
            .collect()
    }

    /// RSS filters keyed by id.
    pub fn rssfilter_list(&mut self) -> Result<BTreeMap<i64, Filter>, UTorrentError> {
        self.refresh_lists()?;
        self.cache
            .filters()
            .iter()
            .map(|(id, row)| Ok::<_, UTorrentError>((*id, Filter::try_from(FilterRow(row))?)))
            .collect()
    }

    /// Names of the given torrents, skipping unknown hashes.
    pub fn resolve_torrent_names(&mut self, hashes: &[String]) -> Result<Vec<String>, UTorrentError> {
        self.refresh_lists()?;
        let hashes = hashes.iter().map(|h| h.to_ascii_uppercase()).collect::<Vec<_>>();
        Ok(self.cache.resolve_torrent_names(&hashes))
    }

    /// URLs of the given feeds, skipping unknown ids.
    pub fn resolve_feed_urls(&mut self, ids: &[i64]) -> Result<Vec<String>, UTorrentError> {
        self.refresh_lists()?;
        Ok(self.cache.resolve_feed_urls(ids))
    }

    /// Names of the given filters, skipping unknown ids.
    pub fn resolve_filter_names(&mut self, ids: &[i64]) -> Result<Vec<String>, UTorrentError> {
        self.refresh_lists()?;
        Ok(self.cache.resolve_filter_names(ids))
    }

    /// Filter ids by feed id; `-1` holds the filters that apply to every feed.
    pub fn filters_by_feed(&mut self) -> Result<BTreeMap<i64, Vec<i64>>, UTorrentError> {
        self.refresh_lists()?;
        Ok(self.cache.filters_by_feed())
    }

    /// Job properties of the given torrents keyed by hash.
    pub fn torrent_info(
        &mut self,
        hashes: &[String],
    ) -> Result<BTreeMap<String, JobInfo>, UTorrentError> {
        let hashes = check_hashes(hashes)?;
        debug!("Getting torrent properties {hashes:?}");
        let reply = self.send(ActionRequest::new("getprops").param("hash", hashes))?;
        let Some(props) = reply.get("props").and_then(Value::as_array) else {
            return Ok(BTreeMap::new());
        };
        props
            .iter()
            .map(|props| {
                let info = JobInfo::try_from(JobInfoObject(props))?;
                Ok::<_, UTorrentError>((info.hash.clone(), info))
            })
            .collect()
    }

    /// Adds a torrent by URL or magnet link, optionally into `download_dir`.
    /// Returns the hash when the link is a magnet carrying one.
    pub fn torrent_add_url(
        &mut self,
        url: &str,
        download_dir: Option<&str>,
    ) -> Result<Option<String>, UTorrentError> {
        debug!("Adding torrent from {url}");
        let reply = self.with_download_dir(download_dir, |client| {
            client.send(ActionRequest::new("add-url").param("s", url))
        })?;
        check_add_reply(&reply)?;
        debug!("Torrent URL added");
        Ok(if url.starts_with("magnet:") {
            magnet_hash(url)
        } else {
            None
        })
    }

    /// Uploads raw `.torrent` data. Returns its info-hash.
    pub fn torrent_add_data(
        &mut self,
        torrent: &[u8],
        filename: &str,
        download_dir: Option<&str>,
    ) -> Result<String, UTorrentError> {
        let hash = info_hash(torrent)?;
        debug!("Uploading torrent {filename} ({hash})");
        let body = multipart::torrent_upload(torrent, filename);
        let reply = self.with_download_dir(download_dir, |client| {
            client.send(ActionRequest::new("add-file").body(body))
        })?;
        check_add_reply(&reply)?;
        debug!("Torrent uploaded");
        Ok(hash)
    }

    /// Reads and uploads a `.torrent` file. Returns its info-hash.
    pub fn torrent_add_file(
        &mut self,
        path: &Path,
        download_dir: Option<&str>,
    ) -> Result<String, UTorrentError> {
        let torrent = fs::read(path)
            .map_err(|e| UTorrentError::FileSystem(format!("{}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default.torrent".to_owned());
        self.torrent_add_data(&torrent, &filename, download_dir)
    }

    /// Runs `action` with the default download directory switched to
    /// `download_dir`, then switches it back, also when `action` failed.
    /// A failed switch back is logged and never replaces the result of `action`.
    fn with_download_dir<R>(
        &mut self,
        download_dir: Option<&str>,
        action: impl FnOnce(&mut Self) -> Result<R, UTorrentError>,
    ) -> Result<R, UTorrentError> {
        let Some(download_dir) = download_dir.filter(|dir| !dir.is_empty()) else {
            return action(self);
        };
        let previous = match self.settings_get()?.remove(DOWNLOAD_DIR_SETTING) {
            Some(SettingValue::Text(dir)) => dir,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let target = if self.dialect.is_absolute_path(download_dir) || previous.is_empty() {
            download_dir.to_owned()
        } else {
            format!("{previous}{}{download_dir}", self.dialect.path_separator())
        };
        debug!("Switching download directory to {target}");
        self.settings_set(&[(DOWNLOAD_DIR_SETTING.to_owned(), SettingValue::Text(target))])?;
        let result = action(self);
        if !previous.is_empty() {
            let restore = [(DOWNLOAD_DIR_SETTING.to_owned(), SettingValue::Text(previous))];
            if let Err(e) = self.settings_set(&restore) {
                warn!("Restoring the download directory failed: {e}");
            }
        }
        result
    }

    /// Sets torrent properties.
    pub fn torrent_set_props(&mut self, props: &[TorrentProp]) -> Result<(), UTorrentError> {
        let mut args = Vec::with_capacity(props.len());
        for prop in props {
            let hash = check_hash(&prop.hash)?;
            args.push(format!(
                "hash={}&s={}&v={}",
                quote(&hash),
                quote(&prop.name),
                quote(&prop.value)
            ));
        }
        debug!("Setting {} torrent properties", args.len());
        self.send(ActionRequest::new("setprops").raw(args.join("&")))?;
        debug!("Properties set");
        Ok(())
    }

    /// Starts torrents; `force` bypasses the queue.
    pub fn torrent_start(&mut self, hashes: &[String], force: bool) -> Result<(), UTorrentError> {
        debug!("Starting torrents {hashes:?} (force: {force})");
        self.send_hashes(if force { "forcestart" } else { "start" }, hashes)?;
        debug!("Start sent");
        Ok(())
    }

    /// Stops torrents.
    pub fn torrent_stop(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        debug!("Stopping torrents {hashes:?}");
        self.send_hashes("stop", hashes)?;
        debug!("Stop sent");
        Ok(())
    }

    /// Pauses torrents.
    pub fn torrent_pause(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        debug!("Pausing torrents {hashes:?}");
        self.send_hashes("pause", hashes)?;
        debug!("Pause sent");
        Ok(())
    }

    /// Resumes paused torrents.
    pub fn torrent_resume(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        debug!("Resuming torrents {hashes:?}");
        self.send_hashes("unpause", hashes)?;
        debug!("Resume sent");
        Ok(())
    }

    /// Re-checks torrent data.
    pub fn torrent_recheck(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        debug!("Rechecking torrents {hashes:?}");
        self.send_hashes("recheck", hashes)?;
        debug!("Recheck sent");
        Ok(())
    }

    /// Removes torrents.
    pub fn torrent_remove(
        &mut self,
        hashes: &[String],
        options: RemoveOptions,
    ) -> Result<(), UTorrentError> {
        let action = match (options.with_data, options.with_torrent) {
            (false, false) => "remove",
            (true, false) => "removedata",
            (false, true) => "removetorrent",
            (true, true) => "removedatatorrent",
        };
        debug!("Removing torrents {hashes:?} ({action})");
        self.send_hashes(action, hashes)?;
        debug!("Remove sent");
        Ok(())
    }

    /// Magnet links of the given torrents keyed by hash. Unknown torrents are
    /// skipped. With `self_tracker` the WebUI's own announce URL is used as
    /// the only tracker.
    pub fn torrent_get_magnet(
        &mut self,
        hashes: &[String],
        self_tracker: bool,
    ) -> Result<BTreeMap<String, String>, UTorrentError> {
        let hashes = check_hashes(hashes)?;
        let torrents = self.torrent_list()?;
        let mut out = BTreeMap::new();
        for hash in hashes {
            let Some(torrent) = torrents.get(&hash) else {
                continue;
            };
            let trackers = if self_tracker {
                vec![self.announce_url.clone()]
            } else {
                self.torrent_info(std::slice::from_ref(&hash))?
                    .remove(&hash)
                    .map(|info| info.trackers)
                    .unwrap_or_default()
            };
            let mut link = format!(
                "magnet:?xt=urn:btih:{}&dn={}",
                quote(&hash.to_ascii_lowercase()),
                quote(&torrent.name)
            );
            for tracker in &trackers {
                link.push_str("&tr=");
                link.push_str(&quote(tracker));
            }
            out.insert(hash, link);
        }
        Ok(out)
    }

    /// Files of the given torrents keyed by torrent hash.
    pub fn file_list(
        &mut self,
        hashes: &[String],
    ) -> Result<BTreeMap<String, Vec<FileEntry>>, UTorrentError> {
        let hashes = check_hashes(hashes)?;
        debug!("Listing files of {hashes:?}");
        let reply = self.send(ActionRequest::new("getfiles").param("hash", hashes))?;
        file_lists(&reply)
    }

    /// Sets file priorities. A designator is `HASH.index` for one file or a
    /// bare `HASH` for every file of the torrent.
    pub fn file_set_priority(&mut self, files: &[(String, Priority)]) -> Result<(), UTorrentError> {
        let mut file_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut args = Vec::new();
        for (designator, priority) in files {
            let (hash, index) = parse_hash_prop(designator)?;
            let indices = match index {
                Some(index) => vec![parse_file_index(designator, &index)?],
                None => {
                    let count = match file_counts.get(&hash) {
                        Some(count) => *count,
                        None => {
                            let count = self
                                .file_list(std::slice::from_ref(&hash))?
                                .get(&hash)
                                .map_or(0, Vec::len);
                            file_counts.insert(hash.clone(), count);
                            count
                        }
                    };
                    (0..count).collect()
                }
            };
            for index in indices {
                args.push(format!(
                    "hash={}&p={}&f={index}",
                    quote(&hash),
                    priority.value()
                ));
            }
        }
        debug!("Setting priority of {} files", args.len());
        self.send(ActionRequest::new("setprio").raw(args.join("&")))?;
        debug!("Priorities set");
        Ok(())
    }

    /// Streams one file (`HASH.index`) into `download`, optionally a byte range of it.
    pub fn file_get(
        &mut self,
        designator: &str,
        download: Download<'_>,
        range: Option<ByteRange>,
    ) -> Result<(), UTorrentError> {
        let (hash, index) = parse_hash_prop(designator)?;
        let index = match index {
            Some(index) => parse_file_index(designator, &index)?,
            None => {
                return Err(UTorrentError::InvalidHash(format!(
                    "{designator} does not name a file"
                )));
            }
        };
        debug!("Downloading file {index} of {hash} ({range:?})");
        let mut request = ActionRequest::new("proxy")
            .param("id", hash)
            .param("file", index)
            .download(download);
        if let Some(range) = range {
            request = request.range(range);
        }
        self.send(request)?;
        debug!("Download finished");
        Ok(())
    }

    /// All client settings.
    pub fn settings_get(&mut self) -> Result<BTreeMap<String, SettingValue>, UTorrentError> {
        let reply = self.send(ActionRequest::new("getsettings"))?;
        reply
            .get("settings")
            .and_then(Value::as_array)
            .ok_or_else(|| UTorrentError::MalformedResponse("reply without settings".into()))?
            .iter()
            .map(setting_value)
            .collect()
    }

    /// Changes client settings. Booleans are sent as `1`/`0`.
    pub fn settings_set(&mut self, settings: &[(String, SettingValue)]) -> Result<(), UTorrentError> {
        let args = settings
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    SettingValue::Boolean(b) => u8::from(*b).to_string(),
                    other => other.to_string(),
                };
                format!("s={}&v={}", quote(name), quote(&value))
            })
            .collect::<Vec<_>>();
        debug!("Changing settings {:?}", settings.iter().map(|(n, _)| n).collect::<Vec<_>>());
        self.send(ActionRequest::new("setsetting").raw(args.join("&")))?;
        debug!("Settings changed");
        Ok(())
    }

    /// Subscribes to a feed. Returns its id.
    pub fn rss_add(&mut self, url: &str) -> Result<i64, UTorrentError> {
        self.rss_update(-1, vec![("url".to_owned(), url.into())])
    }

    /// Updates a feed, or adds one when `feed_id` is -1. Returns the feed id.
    pub fn rss_update(
        &mut self,
        feed_id: i64,
        params: Vec<(String, ParamValue)>,
    ) -> Result<i64, UTorrentError> {
        debug!("Updating feed {feed_id}");
        let request = params
            .into_iter()
            .fold(ActionRequest::new("rss-update"), |request, (key, value)| {
                request.param(key, value)
            })
            .param("feed-id", feed_id);
        let reply = self.send(request)?;
        Ok(ident(&reply, "rss_ident").unwrap_or(feed_id))
    }

    /// Removes a feed.
    pub fn rss_remove(&mut self, feed_id: i64) -> Result<(), UTorrentError> {
        debug!("Removing feed {feed_id}");
        self.send(ActionRequest::new("rss-remove").param("feed-id", feed_id))?;
        Ok(())
    }

    /// Adds a filter for `feed_id` (-1 for every feed). Returns its id.
    pub fn rssfilter_add(&mut self, feed_id: i64) -> Result<i64, UTorrentError> {
        self.rssfilter_update(-1, vec![("feed-id".to_owned(), feed_id.into())])
    }

    /// Updates a filter, or adds one when `filter_id` is -1. Returns the filter id.
    pub fn rssfilter_update(
        &mut self,
        filter_id: i64,
        params: Vec<(String, ParamValue)>,
    ) -> Result<i64, UTorrentError> {
        debug!("Updating filter {filter_id}");
        let request = params
            .into_iter()
            .fold(ActionRequest::new("filter-update"), |request, (key, value)| {
                request.param(key, value)
            })
            .param("filter-id", filter_id);
        let reply = self.send(request)?;
        Ok(ident(&reply, "filter_ident").unwrap_or(filter_id))
    }

    /// Removes a filter.
    pub fn rssfilter_remove(&mut self, filter_id: i64) -> Result<(), UTorrentError> {
        debug!("Removing filter {filter_id}");
        self.send(ActionRequest::new("filter-remove").param("filter-id", filter_id))?;
        Ok(())
    }

    /// Raw transfer history.
    pub fn xfer_history_get(&mut self) -> Result<Value, UTorrentError> {
        let mut reply = self.send(ActionRequest::new("getxferhist"))?;
        reply
            .get_mut("transfer_history")
            .map(Value::take)
            .ok_or_else(|| UTorrentError::MalformedResponse("reply without transfer_history".into()))
    }

    /// Clears the transfer history.
    pub fn xfer_history_reset(&mut self) -> Result<(), UTorrentError> {
        self.send(ActionRequest::new("resetxferhist"))?;
        Ok(())
    }
}

impl<T: HttpTransport> std::fmt::Debug for UTorrentClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UTorrentClient")
            .field("dialect", &self.dialect)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<T: HttpTransport> TorrentControl for UTorrentClient<T> {
    fn list(&mut self) -> Result<Vec<Torrent>, UTorrentError> {
        Ok(self.torrent_list()?.into_values().collect())
    }

    fn add_url(&mut self, url: &str) -> Result<Option<String>, UTorrentError> {
        self.torrent_add_url(url, None)
    }

    fn add_data(&mut self, torrent: &[u8], filename: &str) -> Result<String, UTorrentError> {
        self.torrent_add_data(torrent, filename, None)
    }

    fn start(&mut self, hashes: &[String], force: bool) -> Result<(), UTorrentError> {
        self.torrent_start(hashes, force)
    }

    fn stop(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        self.torrent_stop(hashes)
    }

    fn pause(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        self.torrent_pause(hashes)
    }

    fn resume(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        self.torrent_resume(hashes)
    }

    fn recheck(&mut self, hashes: &[String]) -> Result<(), UTorrentError> {
        self.torrent_recheck(hashes)
    }

    fn remove(&mut self, hashes: &[String], delete_local_data: bool) -> Result<(), UTorrentError> {
        self.torrent_remove(
            hashes,
            RemoveOptions {
                with_data: delete_local_data,
                with_torrent: false,
            },
        )
    }

    fn settings(&mut self) -> Result<BTreeMap<String, SettingValue>, UTorrentError> {
        self.settings_get()
    }
}

fn check_hashes(hashes: &[String]) -> Result<Vec<String>, UTorrentError> {
    hashes.iter().map(String::as_str).map(check_hash).collect()
}

fn parse_file_index(designator: &str, index: &str) -> Result<usize, UTorrentError> {
    index
        .parse()
        .map_err(|_| UTorrentError::InvalidHash(format!("{designator} has a bad file index")))
}

fn check_add_reply(reply: &Value) -> Result<(), UTorrentError> {
    match reply.get("error") {
        Some(Value::String(message)) => Err(UTorrentError::ServerError(message.clone())),
        Some(other) => Err(UTorrentError::ServerError(other.to_string())),
        None => Ok(()),
    }
}

/// Id assigned by an update action, sent as a number or a string.
fn ident(reply: &Value, key: &str) -> Option<i64> {
    let value = reply.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
