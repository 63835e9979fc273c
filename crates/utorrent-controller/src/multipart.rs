//! `multipart/form-data` bodies with a runtime boundary.
//!
//! Bodies are built as templates containing the `{{BOUNDARY}}` placeholder;
//! the session substitutes a boundary that does not occur in the payload just
//! before sending.

use rand::Rng;

use crate::action::quote;

/// Placeholder substituted with the boundary.
pub const BOUNDARY_PLACEHOLDER: &str = "{{BOUNDARY}}";

/// Template for a `torrent_file` upload as expected by the `add-file` action.
pub fn torrent_upload(torrent: &[u8], filename: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(torrent.len() + 256);
    out.extend_from_slice(format!("--{BOUNDARY_PLACEHOLDER}\r\n").as_bytes());
    out.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"torrent_file\"; filename=\"{}\"\r\n",
            quote(filename)
        )
        .as_bytes(),
    );
    out.extend_from_slice(b"Content-Type: application/x-bittorrent\r\n\r\n");
    out.extend_from_slice(torrent);
    out.extend_from_slice(format!("\r\n--{BOUNDARY_PLACEHOLDER}\r\n").as_bytes());
    out
}

/// Replaces every placeholder in `template` with a fresh boundary.
/// Returns the `Content-Type` header value and the final body.
pub(crate) fn finalize(template: &[u8]) -> (String, Vec<u8>) {
    let mut rng = rand::thread_rng();
    let boundary = loop {
        let candidate = format!("==============={:019}==", rng.gen_range(0..10u64.pow(19)));
        if !contains(template, candidate.as_bytes()) {
            break candidate;
        }
    };
    let body = substitute(template, BOUNDARY_PLACEHOLDER.as_bytes(), boundary.as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn substitute(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(idx) = rest.windows(from.len()).position(|w| w == from) {
        out.extend_from_slice(&rest[..idx]);
        out.extend_from_slice(to);
        rest = &rest[idx + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_placeholder() {
        let template = torrent_upload(b"d4:infodee", "my file.torrent");
        let (content_type, body) = finalize(&template);
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(!body.contains(BOUNDARY_PLACEHOLDER));
        assert_eq!(body.matches(boundary).count(), 2);
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.contains("filename=\"my%20file.torrent\""));
        assert!(body.contains("\r\n\r\nd4:infodee\r\n"));
    }

    #[test]
    fn keeps_binary_payload_intact() {
        let payload = [0u8, 0xff, 0x7b, 0x7b, 0x80];
        let template = torrent_upload(&payload, "a.torrent");
        let (_, body) = finalize(&template);
        assert!(contains(&body, &payload));
    }
}
