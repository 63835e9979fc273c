//! Command execution and plain text output.

use std::{
    collections::BTreeMap,
    error::Error,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::debug;
use utorrent_controller::{ByteRange, Download, RemoveOptions, TransferProgress, UTorrentClient};
use utorrent_types::{FileEntry, Priority, SettingValue, Torrent, info_hash};

use crate::cli::{Cli, Command};

type CommandResult = Result<(), Box<dyn Error>>;

/// Runs the parsed command, writing its report to `out`.
pub(crate) fn run(cli: Cli, out: &mut dyn Write) -> CommandResult {
    if let Command::InfoHash { files } = &cli.command {
        return print_info_hashes(files, out);
    }

    let config = cli.session_config();
    debug!("Using {config:?}");
    let mut client = UTorrentClient::connect(&config)?;

    match cli.command {
        Command::List { label, active } => {
            let torrents = client.torrent_list()?;
            let selected = torrents.values().filter(|t| {
                label.as_deref().is_none_or(|label| t.label == label)
                    && (!active || t.dl_speed > 0 || t.ul_speed > 0)
            });
            for torrent in selected {
                writeln!(out, "{}", torrent_line(torrent))?;
            }
        }
        Command::Add { sources, dir } => {
            for source in &sources {
                let hash = if is_link(source) {
                    client.torrent_add_url(source, dir.as_deref())?
                } else {
                    Some(client.torrent_add_file(Path::new(source), dir.as_deref())?)
                };
                match hash {
                    Some(hash) => writeln!(out, "{hash} {source}")?,
                    None => writeln!(out, "added {source}")?,
                }
            }
        }
        Command::Start { hashes, force } => client.torrent_start(&hashes.hashes, force)?,
        Command::Stop(hashes) => client.torrent_stop(&hashes.hashes)?,
        Command::Pause(hashes) => client.torrent_pause(&hashes.hashes)?,
        Command::Resume(hashes) => client.torrent_resume(&hashes.hashes)?,
        Command::Recheck(hashes) => client.torrent_recheck(&hashes.hashes)?,
        Command::Remove {
            hashes,
            data,
            torrent,
        } => client.torrent_remove(
            &hashes.hashes,
            RemoveOptions {
                with_data: data,
                with_torrent: torrent,
            },
        )?,
        Command::Files(hashes) => {
            for files in client.file_list(&hashes.hashes)?.values() {
                for file in files {
                    writeln!(out, "{}", file_line(file))?;
                }
            }
        }
        Command::Prio { priority, files } => {
            let files = files
                .into_iter()
                .map(|file| (file, Priority::from(priority)))
                .collect::<Vec<_>>();
            client.file_set_priority(&files)?;
        }
        Command::Download {
            file,
            output,
            offset,
            length,
        } => {
            let range = (offset.is_some() || length.is_some()).then(|| ByteRange {
                start: offset.unwrap_or(0),
                len: length,
            });
            let mut sink = BufWriter::new(File::create(&output)?);
            let mut written = 0;
            let mut on_progress = |progress: TransferProgress| {
                written = progress.read;
                debug!("{} of {:?} bytes", progress.read, progress.total);
            };
            client.file_get(&file, Download::new(&mut sink).with_progress(&mut on_progress), range)?;
            sink.flush()?;
            writeln!(out, "{written} bytes written to {}", output.display())?;
        }
        Command::Settings { names } => {
            let settings = client.settings_get()?;
            print_settings(&settings, &names, out)?;
        }
        Command::Set { assignments } => {
            let settings = assignments
                .iter()
                .map(|assignment| parse_assignment(assignment))
                .collect::<Result<Vec<_>, _>>()?;
            client.settings_set(&settings)?;
        }
        Command::Feeds => {
            let feeds = client.rss_list()?;
            let filters = client.rssfilter_list()?;
            for feed in feeds.values() {
                let state = if feed.enabled { "enabled" } else { "disabled" };
                writeln!(out, "{} {state} {}", feed.id, feed.url)?;
                for filter in filters.values().filter(|f| f.feed_id == feed.id) {
                    writeln!(out, "  filter {} {}", filter.id, filter.name)?;
                }
            }
            for filter in filters.values().filter(|f| f.feed_id == -1) {
                writeln!(out, "* filter {} {}", filter.id, filter.name)?;
            }
        }
        Command::Version => {
            let version = client.version()?;
            writeln!(
                out,
                "{version} ({} build {}, {} API)",
                version.product,
                version.build,
                client.dialect()
            )?;
        }
        Command::InfoHash { .. } => {}
    }
    Ok(())
}

fn is_link(source: &str) -> bool {
    source.starts_with("magnet:") || source.contains("://")
}

fn print_info_hashes(files: &[PathBuf], out: &mut dyn Write) -> CommandResult {
    for file in files {
        let hash = info_hash(&fs::read(file)?)?;
        writeln!(out, "{hash}  {}", file.display())?;
    }
    Ok(())
}

fn print_settings(
    settings: &BTreeMap<String, SettingValue>,
    names: &[String],
    out: &mut dyn Write,
) -> CommandResult {
    for (name, value) in settings {
        if names.is_empty() || names.contains(name) {
            writeln!(out, "{name} = {value}")?;
        }
    }
    Ok(())
}

/// Parses `name=value`; `true`/`false` and integers keep their type.
fn parse_assignment(assignment: &str) -> Result<(String, SettingValue), String> {
    let (name, value) = assignment
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {assignment}"))?;
    let value = match value {
        "true" => SettingValue::Boolean(true),
        "false" => SettingValue::Boolean(false),
        _ => value
            .parse()
            .map(SettingValue::Integer)
            .unwrap_or_else(|_| SettingValue::Text(value.to_owned())),
    };
    Ok((name.trim().to_owned(), value))
}

fn status_text(torrent: &Torrent) -> &'static str {
    let status = torrent.status;
    let complete = torrent.progress >= 1000;
    if status.error() {
        "Error"
    } else if status.checking() {
        "Checking"
    } else if status.paused() {
        "Paused"
    } else if status.started() {
        if complete { "Seeding" } else { "Downloading" }
    } else if status.queued() {
        "Queued"
    } else if complete {
        "Finished"
    } else {
        "Stopped"
    }
}

fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn torrent_line(torrent: &Torrent) -> String {
    format!(
        "{} {:<11} {:>5.1}% {:>10} {:.3} {} {}",
        torrent.hash,
        status_text(torrent),
        torrent.progress_percent(),
        human_size(torrent.size),
        torrent.share_ratio(),
        torrent.label,
        torrent.name
    )
}

fn file_line(file: &FileEntry) -> String {
    let percent = if file.size > 0 {
        file.downloaded as f64 * 100.0 / file.size as f64
    } else {
        100.0
    };
    format!(
        "{} {:?} {percent:>5.1}% {:>10} {}",
        file.designator(),
        file.priority,
        human_size(file.size),
        file.name
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use utorrent_types::TorrentStatus;

    use super::*;

    fn torrent(status: u32, progress: i64) -> Torrent {
        Torrent {
            hash: "A".repeat(40),
            status: TorrentStatus(status),
            name: "ubuntu.iso".into(),
            size: 3 * 1024 * 1024,
            progress,
            downloaded: 0,
            uploaded: 0,
            ratio: 1500,
            ul_speed: 0,
            dl_speed: 0,
            eta: 0,
            label: "linux".into(),
            peers_connected: 0,
            peers_total: 0,
            seeds_connected: 0,
            seeds_total: 0,
            availability: 0,
            queue_order: -1,
            dl_remain: 0,
            extras: None,
        }
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(&torrent(1 | 8 | 128, 1000)), "Seeding");
        assert_eq!(status_text(&torrent(1 | 64, 500)), "Downloading");
        assert_eq!(status_text(&torrent(1 | 32, 500)), "Paused");
        assert_eq!(status_text(&torrent(16, 500)), "Error");
        assert_eq!(status_text(&torrent(8 | 128, 1000)), "Finished");
        assert_eq!(status_text(&torrent(8 | 128, 10)), "Stopped");
    }

    #[test]
    fn test_torrent_line() {
        let line = torrent_line(&torrent(1 | 8, 1000));
        assert_eq!(
            line,
            format!("{} Seeding     100.0%    3.0 MiB 1.500 linux ubuntu.iso", "A".repeat(40))
        );
    }

    #[test]
    fn test_file_line() {
        let file = FileEntry {
            torrent_hash: "B".repeat(40),
            index: 2,
            name: "disc\\readme.txt".into(),
            size: 200,
            downloaded: 50,
            priority: Priority::High,
        };
        assert_eq!(
            file_line(&file),
            format!("{}.2 High  25.0%      200 B disc\\readme.txt", "B".repeat(40))
        );
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("dht=true").unwrap(),
            ("dht".to_owned(), SettingValue::Boolean(true))
        );
        assert_eq!(
            parse_assignment("max_ul_rate=50").unwrap(),
            ("max_ul_rate".to_owned(), SettingValue::Integer(50))
        );
        assert_eq!(
            parse_assignment("dir_active_download=/srv/a=b").unwrap(),
            (
                "dir_active_download".to_owned(),
                SettingValue::Text("/srv/a=b".into())
            )
        );
        assert!(parse_assignment("dht").is_err());
    }

    #[test]
    fn test_print_settings_filters_names() {
        let settings = BTreeMap::from([
            ("dht".to_owned(), SettingValue::Boolean(true)),
            ("max_ul_rate".to_owned(), SettingValue::Integer(0)),
        ]);
        let mut out = Vec::new();

        print_settings(&settings, &["dht".to_owned()], &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "dht = true\n");
    }

    #[test]
    fn test_info_hash_of_local_file() {
        let data = b"d4:infod6:lengthi1e4:name1:a12:piece lengthi1e6:pieces0:ee".to_vec();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        let mut out = Vec::new();

        print_info_hashes(&[file.path().to_path_buf()], &mut out).unwrap();

        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with(&info_hash(&data).unwrap()));
        assert!(line.trim_end().ends_with(&file.path().display().to_string()));
    }

    #[test]
    fn test_links_are_told_from_paths() {
        assert!(is_link("magnet:?xt=urn:btih:abc"));
        assert!(is_link("https://example.com/a.torrent"));
        assert!(!is_link("downloads/a.torrent"));
    }
}
