use image::{Rgb, RgbImage};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pose_relay::api::{ApiConfig, ApiHandle, ApiServer};
use pose_relay::config::{ClipFormat, ClipSettings, PathSettings};
use pose_relay::media::{self, FrameWriter};
use pose_relay::pose::{PoseDetector, SimulatedBackend, Topology};
use pose_relay::transport::Sent;
use pose_relay::{
    ClipRenderer, InMemorySubscriberStore, RecordingMessenger, RequestPipeline, UsageStats,
};

fn spawn_api(dir: &Path, messenger: Arc<RecordingMessenger>, subscribers: &[i64]) -> ApiHandle {
    let paths = PathSettings::under(dir);
    paths.ensure_dirs().unwrap();
    let detector = PoseDetector::new(Box::new(SimulatedBackend::new(Topology::Coco17)), 0.3);
    let clip = ClipSettings {
        fps: 5,
        duration_secs: 1.0,
        format: ClipFormat::Gif,
    };
    let renderer = ClipRenderer::new(&clip, paths.videos_dir());
    let pipeline = RequestPipeline::new(detector, renderer, &paths);
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
    };
    ApiServer::new(
        cfg,
        pipeline,
        messenger,
        Arc::new(InMemorySubscriberStore::with_subscribers(subscribers.iter().copied())),
        Arc::new(UsageStats::new()),
    )
    .spawn()
    .expect("spawn api")
}

fn send(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, Value) {
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    send_raw(addr, request.as_bytes())
}

/// Write `request` verbatim and parse whatever the server answers.
fn send_raw(addr: SocketAddr, request: &[u8]) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(request).unwrap();
    let mut raw = Vec::new();
    // A rejected request may leave unread bytes behind, which turns the
    // server's close into a reset once the response has been delivered.
    let _ = stream.read_to_end(&mut raw);
    let response = String::from_utf8_lossy(&raw);
    let status: u16 = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("");
    (status, serde_json::from_str(body).unwrap_or(Value::Null))
}

fn detect(addr: SocketAddr, file: &Path) -> (u16, Value) {
    let body = json!({ "file_path": file }).to_string();
    send(addr, "POST", "/detect", &body)
}

#[test]
fn health_and_routing() {
    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_api(dir.path(), Arc::new(RecordingMessenger::new()), &[]);
    let addr = handle.addr;

    let (status, body) = send(addr, "GET", "/", "");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "running");

    assert_eq!(send(addr, "GET", "/detect", "").0, 405);
    assert_eq!(send(addr, "GET", "/nowhere", "").0, 404);
    assert_eq!(send(addr, "POST", "/detect", "{\"path\": 1}").0, 422);
    assert_eq!(send(addr, "POST", "/detect", "not json").0, 422);

    handle.stop().unwrap();
}

#[test]
fn malformed_requests_get_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = Arc::new(RecordingMessenger::new());
    let handle = spawn_api(dir.path(), messenger.clone(), &[1]);

    let (status, body) = send_raw(
        handle.addr,
        b"POST /detect HTTP/1.1\r\nContent-Length: abc\r\n\r\n",
    );
    assert_eq!(status, 400);
    assert!(body["detail"].as_str().unwrap().contains("content-length"));

    assert_eq!(send_raw(handle.addr, b"GET\r\n\r\n").0, 400);
    assert_eq!(send_raw(handle.addr, b"\r\n\r\n").0, 400);

    assert!(messenger.sent().is_empty());
    handle.stop().unwrap();
}

#[test]
fn oversized_requests_get_payload_too_large() {
    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_api(dir.path(), Arc::new(RecordingMessenger::new()), &[]);

    let (status, _) = send_raw(
        handle.addr,
        b"POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10000\r\n\r\n",
    );
    assert_eq!(status, 413);

    let mut headers = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
    headers.extend(std::iter::repeat(b'a').take(9000));
    headers.extend_from_slice(b"\r\n\r\n");
    assert_eq!(send_raw(handle.addr, &headers).0, 413);

    // A request under the limit still goes through.
    assert_eq!(send(handle.addr, "GET", "/", "").0, 200);
    handle.stop().unwrap();
}

#[test]
fn stalled_request_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_api(dir.path(), Arc::new(RecordingMessenger::new()), &[]);

    let started = Instant::now();
    // Headers never terminated; the server gives up after its read timeout.
    let (status, body) = send_raw(handle.addr, b"POST /detect HTTP/1.1\r\nHost: localhost\r\n");
    assert_eq!(status, 408);
    assert!(body["detail"].as_str().unwrap().contains("timed out"));
    assert!(started.elapsed() >= Duration::from_secs(1));

    handle.stop().unwrap();
}

#[test]
fn detect_reports_missing_and_unsupported_files() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = Arc::new(RecordingMessenger::new());
    let handle = spawn_api(dir.path(), messenger.clone(), &[7]);

    let (status, body) = detect(handle.addr, &dir.path().join("nope.jpg"));
    assert_eq!(status, 404);
    assert!(body["detail"].as_str().unwrap().contains("nope.jpg"));

    let bmp = dir.path().join("scan.bmp");
    std::fs::write(&bmp, b"BM").unwrap();
    assert_eq!(detect(handle.addr, &bmp).0, 400);

    // Rejected requests reach nobody.
    assert!(messenger.sent().is_empty());
    handle.stop().unwrap();
}

#[test]
fn detect_image_broadcasts_to_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = Arc::new(RecordingMessenger::new());
    let handle = spawn_api(dir.path(), messenger.clone(), &[1, 2]);
    let input = dir.path().join("person.png");
    media::save_image(&input, &RgbImage::from_pixel(320, 240, Rgb([50, 60, 70]))).unwrap();

    let (status, body) = detect(handle.addr, &input);
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    assert!(body["message"].as_str().unwrap().contains('2'));

    for chat in [1, 2] {
        let sent = messenger.sent_to(chat);
        assert_eq!(sent.len(), 2, "chat {chat}: {sent:?}");
        assert!(sent.iter().all(|s| matches!(s, Sent::Photo { .. })));
        if let Sent::Photo { path, .. } = &sent[0] {
            assert_eq!(path, &input);
        }
    }
    handle.stop().unwrap();
}

#[test]
fn detect_video_notifies_before_sending() {
    let dir = tempfile::tempdir().unwrap();
    let messenger = Arc::new(RecordingMessenger::new());
    let handle = spawn_api(dir.path(), messenger.clone(), &[3]);
    let input = dir.path().join("walk.gif");
    let mut writer = FrameWriter::create(&input, 24, 18, 10.0).unwrap();
    for shade in [10u8, 90] {
        writer
            .write(&RgbImage::from_pixel(24, 18, Rgb([shade, shade, shade])))
            .unwrap();
    }
    writer.finish().unwrap();

    let (status, _) = detect(handle.addr, &input);
    assert_eq!(status, 200);

    let sent = messenger.sent_to(3);
    assert_eq!(sent.len(), 3);
    assert!(matches!(&sent[0], Sent::Text { text, .. } if text == "Processing video..."));
    assert!(sent[1..].iter().all(|s| matches!(s, Sent::Video { .. })));
    handle.stop().unwrap();
}
