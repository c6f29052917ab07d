//! End-to-end tests over a real TCP listener, driven by the synthetic camera.
//!
//! Requests are HTTP/1.0 so the body is delimited by connection close rather
//! than chunked, which keeps the raw multipart bytes readable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mjpeg_stream::capture::frame::FrameMetadata;
use mjpeg_stream::capture::{FrameSource, SyntheticDevice};
use mjpeg_stream::server::{self, AppState};
use mjpeg_stream::{CaptureConfig, Frame, FrameStore};

const INTERVAL: Duration = Duration::from_millis(20);

async fn start(store: Arc<FrameStore>) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(store, INTERVAL);
    let app = server::router(state.clone(), None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, app));
    (addr, state)
}

async fn request(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.0\r\nHost: localhost\r\n\r\n").as_bytes())
        .await
        .unwrap();
    stream
}

/// Read until `needle` has appeared `count` times, returning everything read
async fn read_until_count(stream: &mut TcpStream, needle: &[u8], count: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while occurrences(&buf, needle) < count {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out waiting for stream data")
            .unwrap();
        assert!(n > 0, "connection closed early");
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

fn occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn stream_response_has_multipart_headers_and_parts() {
    let store = Arc::new(FrameStore::new());
    store.publish(Frame::new(
        Bytes::from(vec![0xAB; 100]),
        FrameMetadata::default(),
    ));
    let (addr, _state) = start(store).await;

    let mut stream = request(addr, "/stream").await;
    let raw = read_until_count(&mut stream, b"--frame\r\n", 3).await;

    let head_end = find(&raw, b"\r\n\r\n").unwrap();
    let head = String::from_utf8_lossy(&raw[..head_end]).to_ascii_lowercase();
    assert!(head.starts_with("http/1.0 200") || head.starts_with("http/1.1 200"));
    assert!(head.contains("content-type: multipart/x-mixed-replace; boundary=frame"));
    assert!(head.contains("cache-control: no-cache, no-store, must-revalidate"));
    assert!(head.contains("pragma: no-cache"));
    assert!(head.contains("expires: 0"));

    let body = &raw[head_end + 4..];
    let mut part = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 100\r\n\r\n".to_vec();
    part.extend_from_slice(&[0xAB; 100]);
    part.extend_from_slice(b"\r\n");
    assert!(body.starts_with(&part));
    assert!(body[part.len()..].starts_with(&part));
}

#[tokio::test]
async fn capture_thread_feeds_concurrent_clients() {
    let store = Arc::new(FrameStore::new());
    let config = CaptureConfig {
        device: "stub://camera".into(),
        width: 1280,
        height: 720,
        fps: 50,
        ..CaptureConfig::default()
    };
    let source = FrameSource::open(SyntheticDevice::stub(), &config, store.clone()).unwrap();
    source.spawn().unwrap();

    let (addr, state) = start(store).await;
    let mut first = request(addr, "/stream").await;
    let mut second = request(addr, "/stream").await;

    let a = read_until_count(&mut first, b"Content-Length: 12\r\n", 3).await;
    let b = read_until_count(&mut second, b"Content-Length: 12\r\n", 3).await;
    assert!(find(&a, b"\xff\xd8").is_some());
    assert!(find(&b, b"\xff\xd8").is_some());
    assert_eq!(state.stats().total, 2);
}

#[tokio::test]
async fn disconnect_ends_only_that_session() {
    let store = Arc::new(FrameStore::new());
    store.publish(Frame::new(Bytes::from(vec![1u8; 64]), FrameMetadata::default()));
    let (addr, state) = start(store).await;

    let mut leaving = request(addr, "/stream").await;
    let mut staying = request(addr, "/stream").await;
    read_until_count(&mut leaving, b"--frame\r\n", 1).await;
    read_until_count(&mut staying, b"--frame\r\n", 1).await;
    wait_for("two sessions", || state.stats().active == 2).await;

    drop(leaving);
    wait_for("session teardown", || state.stats().active == 1).await;

    let more = read_until_count(&mut staying, b"--frame\r\n", 3).await;
    assert!(occurrences(&more, b"Content-Length: 64\r\n") >= 3);
    assert_eq!(state.stats().total, 2);
}

#[tokio::test]
async fn client_before_first_frame_waits_then_streams() {
    let store = Arc::new(FrameStore::new());
    let (addr, _state) = start(store.clone()).await;

    let mut stream = request(addr, "/stream").await;
    tokio::time::sleep(INTERVAL * 5).await;
    store.publish(Frame::new(Bytes::from(vec![9u8; 50]), FrameMetadata::default()));

    let raw = read_until_count(&mut stream, b"Content-Length: 50\r\n", 1).await;
    assert_eq!(occurrences(&raw, b"--frame\r\n"), 1);
}

#[tokio::test]
async fn root_serves_landing_page() {
    let (addr, _state) = start(Arc::new(FrameStore::new())).await;

    let mut stream = request(addr, "/").await;
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert!(text.contains(" 200 "));
    assert!(text.contains("src=\"/stream\""));
}
