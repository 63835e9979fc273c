//! Torrent hash helpers.

use sha1::{Digest, Sha1};

use crate::{UTorrentError, bencode};

/// Computes the info-hash of a `.torrent` file: the uppercase hex SHA-1 of
/// the canonical encoding of its `info` dictionary.
pub fn info_hash(torrent: &[u8]) -> Result<String, UTorrentError> {
    let root = bencode::decode(torrent)?;
    let info = root
        .get("info")
        .ok_or_else(|| UTorrentError::MalformedEncoding("torrent has no info dictionary".into()))?;
    let digest = Sha1::digest(bencode::encode(info));
    Ok(to_upper_hex(&digest))
}

/// Returns true for a 40 character hex string, in either case.
pub fn is_valid_hash(candidate: &str) -> bool {
    candidate.len() == 40 && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Validates `candidate` and returns it uppercased.
pub fn check_hash(candidate: &str) -> Result<String, UTorrentError> {
    if is_valid_hash(candidate) {
        Ok(candidate.to_ascii_uppercase())
    } else {
        Err(UTorrentError::InvalidHash(candidate.to_owned()))
    }
}

/// Splits a `HASH.prop` designator into the validated torrent hash and the
/// optional trailing part (a file index or a property name).
pub fn parse_hash_prop(designator: &str) -> Result<(String, Option<String>), UTorrentError> {
    let (hash, prop) = match designator.split_once('.') {
        Some((hash, prop)) => (hash, Some(prop.to_owned())),
        None => (designator, None),
    };
    Ok((check_hash(hash)?, prop))
}

/// Extracts the btih hash from a magnet link, uppercased.
pub fn magnet_hash(url: &str) -> Option<String> {
    if !url.starts_with("magnet:") {
        return None;
    }
    let lower = url.to_ascii_lowercase();
    let start = lower.find("urn:btih:")? + "urn:btih:".len();
    let candidate = url.get(start..start + 40)?;
    is_valid_hash(candidate).then(|| candidate.to_ascii_uppercase())
}

fn to_upper_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
