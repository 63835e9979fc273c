//! Tests for the WebUI session.

use std::{
    io::Cursor,
    time::{Duration, Instant},
};

use utorrent_types::UTorrentError;

use super::{ByteRange, Download, Exchange, Session, SessionState, TransferProgress, CHUNK_SIZE};
use crate::config::SessionConfig;
use crate::testutil::{
    ScriptedTransport, TEST_TOKEN, json_response, ready_session, status_response, test_config,
    token_page, with_token,
};
use crate::transport::{HttpResponse, MockHttpTransport, TransportFault};

#[test_log::test]
fn test_token_is_fetched_on_construction() {
    let session = ready_session(ScriptedTransport::new());

    assert_eq!(session.token(), TEST_TOKEN);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.transport().paths(), ["gui/token.html"]);
    let request = &session.transport().requests[0];
    // base64("admin:secret")
    assert_eq!(request.header("Authorization"), Some("Basic YWRtaW46c2VjcmV0"));
}

#[test]
fn test_missing_token_is_an_error() {
    let transport = ScriptedTransport::new().ok(json_response("<html>nothing here</html>"));
    let result = Session::with_transport(&test_config(), transport);

    match result.unwrap_err() {
        UTorrentError::TokenUnavailable => {}
        e => panic!("Expected TokenUnavailable, got {e:?}"),
    }
}

#[test]
fn test_bad_responses_exhaust_the_budget() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .fault(TransportFault::BadResponse("first".into()))
            .fault(TransportFault::BadResponse("second".into()))
            .fault(TransportFault::BadResponse("third".into())),
    );

    let result = session.get_data("gui/?token=t&list=1", Exchange::new());

    match result.unwrap_err() {
        UTorrentError::Transport(msg) => assert_eq!(msg, "third"),
        e => panic!("Expected Transport error, got {e:?}"),
    }
    assert_eq!(session.transport().requests.len(), 4);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn test_transient_faults_then_success() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .fault(TransportFault::BadResponse("garbage".into()))
            .fault(TransportFault::ConnectionDropped("aborted".into()))
            .ok(json_response("{\"build\":1}")),
    );

    let body = session
        .get_data("gui/?token=t&list=1", Exchange::new())
        .unwrap();

    assert_eq!(body.as_deref(), Some("{\"build\":1}"));
    assert_eq!(session.state(), SessionState::Ready);
}

const PAUSE: Duration = Duration::from_millis(200);

fn paused_session(retry_budget: u32, transport: ScriptedTransport) -> Session<ScriptedTransport> {
    let config = SessionConfig {
        reconnect_pause: PAUSE,
        retry_budget,
        ..test_config()
    };
    Session::with_transport(&config, with_token(transport)).unwrap()
}

#[test]
fn test_dropped_connection_pauses_before_retrying() {
    let mut session = paused_session(
        3,
        ScriptedTransport::new()
            .fault(TransportFault::ConnectionDropped("aborted".into()))
            .ok(json_response("{}")),
    );

    let started = Instant::now();
    session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap();

    assert!(started.elapsed() >= PAUSE);
}

#[test]
fn test_bad_responses_and_timeouts_retry_immediately() {
    let mut session = paused_session(
        3,
        ScriptedTransport::new()
            .fault(TransportFault::BadResponse("garbage".into()))
            .fault(TransportFault::Timeout)
            .ok(json_response("{}")),
    );

    let started = Instant::now();
    session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap();

    assert!(started.elapsed() < PAUSE);
}

#[test]
fn test_no_pause_once_the_budget_is_spent() {
    let mut session = paused_session(
        2,
        ScriptedTransport::new()
            .fault(TransportFault::ConnectionDropped("first".into()))
            .fault(TransportFault::ConnectionDropped("second".into())),
    );

    let started = Instant::now();
    let result = session.get_data("gui/?token=t&list=1", Exchange::new());
    let elapsed = started.elapsed();

    match result.unwrap_err() {
        UTorrentError::Transport(msg) => assert_eq!(msg, "second"),
        e => panic!("Expected Transport error, got {e:?}"),
    }
    // one pause between the two attempts, none after the last
    assert!(elapsed >= PAUSE);
    assert!(elapsed < PAUSE * 2);

    let mut session = paused_session(
        1,
        ScriptedTransport::new().fault(TransportFault::ConnectionDropped("only".into())),
    );
    let started = Instant::now();
    session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap_err();
    assert!(started.elapsed() < PAUSE);
}

#[test]
fn test_timeouts_report_attempts() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .fault(TransportFault::Timeout)
            .fault(TransportFault::Timeout)
            .fault(TransportFault::Timeout),
    );

    let result = session.get_data("gui/?token=t&list=1", Exchange::new());

    match result.unwrap_err() {
        UTorrentError::Timeout { attempts } => assert_eq!(attempts, 3),
        e => panic!("Expected Timeout, got {e:?}"),
    }
}

#[test]
fn test_no_retry_makes_one_attempt() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .fault(TransportFault::Timeout)
            .ok(json_response("{}")),
    );
    let exchange = Exchange {
        allow_retry: false,
        ..Exchange::new()
    };

    let result = session.get_data("gui/?token=t&action=getversion", exchange);

    match result.unwrap_err() {
        UTorrentError::Timeout { attempts } => assert_eq!(attempts, 1),
        e => panic!("Expected Timeout, got {e:?}"),
    }
    assert_eq!(session.transport().requests.len(), 2);
}

#[test]
fn test_unreachable_is_fatal_without_retry() {
    let mut mock = MockHttpTransport::new();
    mock.expect_send()
        .times(2)
        .returning(|request| {
            if request.path.starts_with("/gui/token.html") {
                Ok(token_page("abc"))
            } else {
                Err(TransportFault::Unreachable("connection refused".into()))
            }
        });
    mock.expect_close().return_const(());

    let mut session = Session::with_transport(&test_config(), mock).unwrap();
    let result = session.get_data("gui/?token=abc&list=1", Exchange::new());

    match result.unwrap_err() {
        UTorrentError::NetworkFatal(msg) => assert!(msg.contains("refused")),
        e => panic!("Expected NetworkFatal, got {e:?}"),
    }
}

#[test]
fn test_name_resolution_is_fatal() {
    let mut session = ready_session(
        ScriptedTransport::new().fault(TransportFault::NameResolution("no such host".into())),
    );

    let result = session.get_data("gui/?token=t&list=1", Exchange::new());

    assert!(matches!(result, Err(UTorrentError::NetworkFatal(_))));
    assert_eq!(session.transport().requests.len(), 2);
}

#[test]
fn test_invalid_request_is_retried_once() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .ok(status_response(400, "ERROR", "invalid request"))
            .ok(json_response("{}")),
    );

    let body = session
        .get_data("gui/?token=t&action=getversion", Exchange::new())
        .unwrap();

    assert_eq!(body.as_deref(), Some("{}"));
}

#[test]
fn test_invalid_request_after_grace_carries_text() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .ok(status_response(400, "ERROR", "invalid request"))
            .ok(status_response(400, "ERROR", "  invalid request\n")),
    );

    let result = session.get_data("gui/?token=t&action=getversion", Exchange::new());

    match result.unwrap_err() {
        UTorrentError::InvalidRequest(msg) => assert_eq!(msg, "invalid request"),
        e => panic!("Expected InvalidRequest, got {e:?}"),
    }
    assert_eq!(session.transport().requests.len(), 3);
}

#[test]
fn test_invalid_request_without_grace() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .ok(status_response(400, "ERROR", "invalid request"))
            .ok(json_response("{}")),
    );
    session.set_tolerate_invalid_first(false);

    let result = session.get_data("gui/?token=t&action=getversion", Exchange::new());

    assert!(matches!(result, Err(UTorrentError::InvalidRequest(_))));
    assert_eq!(session.transport().requests.len(), 2);
}

#[test]
fn test_status_codes_map_to_errors() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .ok(status_response(401, "Unauthorized", ""))
            .ok(status_response(404, "Not Found", ""))
            .ok(status_response(500, "Internal Server Error", "")),
    );

    match session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap_err() {
        UTorrentError::Unauthorized { location, reason } => {
            assert_eq!(location, "gui/");
            assert_eq!(reason, "Unauthorized");
        }
        e => panic!("Expected Unauthorized, got {e:?}"),
    }
    match session.get_data("gui/missing", Exchange::new()).unwrap_err() {
        UTorrentError::NotFound { location, .. } => assert_eq!(location, "gui/missing"),
        e => panic!("Expected NotFound, got {e:?}"),
    }
    match session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap_err() {
        UTorrentError::UnexpectedStatus { status, .. } => assert_eq!(status, 500),
        e => panic!("Expected UnexpectedStatus, got {e:?}"),
    }
}

#[test]
fn test_error_locations_leave_out_the_token() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .ok(status_response(401, "Unauthorized", ""))
            .ok(status_response(404, "Not Found", "")),
    );

    let unauthorized = session
        .get_data("gui/?token=secret-token&action=getsettings", Exchange::new())
        .unwrap_err();
    let not_found = session
        .get_data("gui/?token=secret-token&action=getprops&hash=A", Exchange::new())
        .unwrap_err();

    for error in [&unauthorized, &not_found] {
        assert!(!error.to_string().contains("secret-token"), "{error}");
    }
    match not_found {
        UTorrentError::NotFound { location, .. } => assert_eq!(location, "gui/"),
        e => panic!("Expected NotFound, got {e:?}"),
    }
}

#[test]
fn test_connection_is_closed_after_every_exchange() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .ok(json_response("{}"))
            .ok(status_response(401, "Unauthorized", "")),
    );
    let closes_after_token = session.transport().closes;

    session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap();
    assert_eq!(session.transport().closes, closes_after_token + 1);

    session
        .get_data("gui/?token=t&list=1", Exchange::new())
        .unwrap_err();
    assert!(session.transport().closes > closes_after_token + 1);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn test_cookies_are_stored_and_sent() {
    let mut session = ready_session(
        ScriptedTransport::new()
            .ok(json_response("{}")
                .with_header("Set-Cookie", "GUID=a b; path=/")
                .with_header("Set-Cookie", "stale=1; Max-Age=0"))
            .ok(json_response("{}")),
    );

    session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap();
    assert_eq!(session.cookies().get("GUID").map(String::as_str), Some("a b"));
    assert!(!session.cookies().contains_key("stale"));

    session.get_data("gui/?token=t&list=1", Exchange::new()).unwrap();
    let last = session.transport().requests.last().unwrap();
    assert_eq!(last.header("Cookie"), Some("GUID=a%20b"));
}

#[test]
fn test_range_header() {
    assert_eq!(
        ByteRange {
            start: 100,
            len: Some(50)
        }
        .header_value(),
        "bytes=100-149"
    );
    assert_eq!(
        ByteRange {
            start: 100,
            len: Some(0)
        }
        .header_value(),
        "bytes=100-"
    );
    assert_eq!(
        ByteRange {
            start: 7,
            len: None
        }
        .header_value(),
        "bytes=7-"
    );
}

#[test]
fn test_range_header_past_the_end_is_open() {
    assert_eq!(
        ByteRange {
            start: u64::MAX - 1,
            len: Some(5)
        }
        .header_value(),
        format!("bytes={}-", u64::MAX - 1)
    );
    assert_eq!(
        ByteRange {
            start: u64::MAX - 1,
            len: Some(2)
        }
        .header_value(),
        format!("bytes={}-{}", u64::MAX - 1, u64::MAX)
    );
}

#[test]
fn test_streamed_download_reports_progress() {
    let payload: Vec<u8> = (0..(CHUNK_SIZE * 2 + 10)).map(|i| (i % 251) as u8).collect();
    let response = HttpResponse::new(
        206,
        "Partial Content",
        vec![(
            "Content-Range".into(),
            format!("bytes 5-{}/{}", payload.len() + 4, payload.len() + 5),
        )],
        Box::new(Cursor::new(payload.clone())),
    );
    let mut session = ready_session(ScriptedTransport::new().ok(response));

    let mut sink = Vec::new();
    let mut reports = Vec::new();
    let mut on_progress = |p: TransferProgress| reports.push(p);
    let exchange = Exchange {
        range: Some(ByteRange {
            start: 5,
            len: None,
        }),
        download: Some(Download::new(&mut sink).with_progress(&mut on_progress)),
        ..Exchange::new()
    };

    let body = session.get_data("proxy?sid=1&file=0", exchange).unwrap();

    assert!(body.is_none());
    assert_eq!(sink, payload);
    let reads: Vec<u64> = reports.iter().map(|p| p.read).collect();
    let len = payload.len() as u64;
    assert_eq!(
        reads,
        [CHUNK_SIZE as u64, 2 * CHUNK_SIZE as u64, len, len]
    );
    assert!(reports.iter().all(|p| p.total == Some(len + 5)));
    assert!(reports.iter().all(|p| p.range_start == Some(5)));
    let request = session.transport().requests.last().unwrap();
    assert_eq!(request.header("Range"), Some("bytes=5-"));
}

#[test]
fn test_download_total_falls_back_to_content_length() {
    let response = json_response("abc").with_header("Content-Length", "3");
    let mut session = ready_session(ScriptedTransport::new().ok(response));

    let mut sink = Vec::new();
    let mut totals = Vec::new();
    let mut on_progress = |p: TransferProgress| totals.push(p.total);
    let exchange = Exchange {
        download: Some(Download::new(&mut sink).with_progress(&mut on_progress)),
        ..Exchange::new()
    };
    session.get_data("proxy?sid=1&file=0", exchange).unwrap();

    assert_eq!(sink, b"abc");
    assert_eq!(totals, [Some(3), Some(3)]);
}

#[test]
fn test_body_makes_a_multipart_post() {
    let mut session = ready_session(ScriptedTransport::new().ok(json_response("{}")));
    let exchange = Exchange {
        body: Some(crate::multipart::torrent_upload(b"d4:infodee", "x.torrent")),
        ..Exchange::new()
    };

    session
        .get_data("gui/?token=t&action=add-file", exchange)
        .unwrap();

    let request = session.transport().requests.last().unwrap();
    assert_eq!(request.method, crate::transport::Method::Post);
    assert!(
        request
            .header("Content-Type")
            .unwrap()
            .starts_with("multipart/form-data; boundary=")
    );
}
