//! HTTP surface: axum router for the stream and the landing page.
//!
//! - `GET /stream` — multipart JPEG stream, one session per request
//! - `GET /` — landing page from the static directory, or a built-in one

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::store::FrameStore;
use crate::stream::{multipart, SessionEnd, StreamSession};

/// Bytes buffered between a session and its socket.
///
/// Smaller than a typical JPEG, so a slow client holds back at most the part
/// being written and the session's next snapshot is the latest frame.
pub const PIPE_CAPACITY: usize = 16 * 1024;

const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html>
<head><title>Camera</title></head>
<body style="margin:0;background:#000">
<img src="/stream" style="display:block;margin:auto;max-width:100%;max-height:100vh">
</body>
</html>
"#;

/// Counters for stream sessions, read as a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub active: usize,
    pub total: u64,
}

#[derive(Default)]
struct AtomicSessionStats {
    active: AtomicUsize,
    total: AtomicU64,
}

/// Shared state for the web server
pub struct AppState {
    store: Arc<FrameStore>,
    frame_interval: Duration,
    stats: AtomicSessionStats,
}

impl AppState {
    pub fn new(store: Arc<FrameStore>, frame_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            frame_interval,
            stats: AtomicSessionStats::default(),
        })
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.stats.active.load(Ordering::Relaxed),
            total: self.stats.total.load(Ordering::Relaxed),
        }
    }
}

/// Build the router.
///
/// `static_dir` is served as the fallback when it exists; otherwise `/`
/// returns a minimal page embedding the stream.
pub fn router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let app = Router::new()
        .route("/stream", get(stream))
        .with_state(state);

    match static_dir {
        Some(dir) if dir.is_dir() => {
            info!("Serving landing page from {:?}", dir);
            app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        Some(dir) => {
            warn!("Static directory {:?} does not exist, using built-in page", dir);
            app.route("/", get(index))
        }
        None => app.route("/", get(index)),
    }
}

/// Serve until the listener fails
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Web server listening on http://{}", addr);
    }
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn index() -> Html<&'static str> {
    Html(FALLBACK_INDEX)
}

/// GET /stream — spawn a session writing into a pipe that feeds the body.
///
/// Hyper drops the body when the client disconnects, which cancels the
/// session through the drop guard and closes the pipe.
async fn stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    info!(%peer, "stream client connected");

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    state.stats.active.fetch_add(1, Ordering::Relaxed);
    state.stats.total.fetch_add(1, Ordering::Relaxed);
    metrics::gauge!("stream_sessions_active").increment(1.0);

    let mut session = StreamSession::new(state.store.clone(), state.frame_interval, cancel);
    let task_state = state.clone();
    tokio::spawn(async move {
        match session.run(writer).await {
            SessionEnd::Cancelled => info!(%peer, "stream client disconnected"),
            SessionEnd::WriteFailed(e) => {
                debug!(%peer, "stream write failed: {}", e);
                info!(%peer, "stream client disconnected");
            }
        }
        task_state.stats.active.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("stream_sessions_active").decrement(1.0);
    });

    let body = ReaderStream::new(reader).map(move |chunk| {
        let _ = &guard;
        chunk
    });

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    for (name, value) in multipart::NO_CACHE_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(multipart::CONTENT_TYPE),
    );
    response
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::{Frame, FrameMetadata};
    use crate::stream::multipart::read_part;

    const INTERVAL: Duration = Duration::from_millis(10);

    fn frame(fill: u8) -> Frame {
        Frame::new(Bytes::from(vec![fill; PIPE_CAPACITY * 2]), FrameMetadata::default())
    }

    #[tokio::test]
    async fn slow_client_gets_latest_frame_after_stall() {
        let store = Arc::new(FrameStore::new());
        store.publish(frame(1));

        let (writer, mut reader) = tokio::io::duplex(PIPE_CAPACITY);
        let mut session = StreamSession::new(store.clone(), INTERVAL, CancellationToken::new());
        tokio::spawn(async move { session.run(writer).await });

        // Client reads nothing for many intervals
        tokio::time::sleep(INTERVAL * 10).await;
        store.publish(frame(2));

        assert_eq!(read_part(&mut reader).await, vec![1; PIPE_CAPACITY * 2]);
        assert_eq!(read_part(&mut reader).await, vec![2; PIPE_CAPACITY * 2]);
    }
}
