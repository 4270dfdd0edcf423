//! Browser-facing HTTP gateway.
//!
//! Routes, longest prefix first:
//! - `GET /`        — the embedded control page
//! - `GET /stream`  — live media fan-out, one relay subscription per client
//! - `POST /control`— JSON input events for the control translator
//! - anything else  — proxied verbatim to the device gateway
//!
//! CORS is permissive: the page may be embedded or fetched cross-origin
//! on the operator's primary network.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use roverlink_core::{ControlTranslator, InputEvent, RelayStatus, StreamFrame, StreamRelay};
use roverlink_net::GatewayClient;

/// Boundary used on the browser-facing multipart response. Independent
/// of whatever boundary the upstream camera uses.
const BOUNDARY: &str = "frame";

/// Pass-through request bodies larger than this are rejected.
const MAX_BODY: usize = 1024 * 1024;

// ── Server configuration & state ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct ProxyState {
    pub relay: StreamRelay,
    pub translator: ControlTranslator,
    pub gateway: Arc<GatewayClient>,
}

// ── Router & serve loop ─────────────────────────────────────────────

pub fn router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/stream", get(stream))
        .route("/control", post(control).get(passthrough))
        .fallback(passthrough)
        .layer(cors)
        .with_state(state)
}

/// Run the proxy until `shutdown` fires, then close every subscriber
/// registration and the upstream relay connection. The wireless
/// association itself is left up — tearing it down takes an explicit
/// disconnect.
pub async fn serve(
    config: &ProxyConfig,
    state: ProxyState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::new(config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "proxy listening");

    let app = router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    state.relay.shutdown();
    state.translator.shutdown().await;
    info!("proxy stopped");
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────────

async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    session: Uuid,
    event: InputEvent,
}

async fn control(State(state): State<ProxyState>, Json(req): Json<ControlRequest>) -> StatusCode {
    state.translator.submit(req.session, req.event);
    StatusCode::ACCEPTED
}

/// Live stream handler. Holds one relay subscription for the lifetime
/// of the connection; dropping the response body (client disconnect)
/// releases it.
async fn stream(State(state): State<ProxyState>) -> Response {
    let subscription = state.relay.subscribe();
    let mut status = state.relay.status();

    // Explicit failure beats a silent hang: wait for the first frame,
    // bailing out with a 502 if the relay gives up on the upstream.
    let first = tokio::select! {
        frame = subscription.next_frame() => frame,
        reason = relay_unreachable(&mut status) => {
            warn!(%reason, "stream request failed before first frame");
            return bad_gateway(&reason);
        }
    };
    let Some(first) = first else {
        return bad_gateway("stream relay closed");
    };

    let body = async_stream::stream! {
        yield Ok::<Bytes, Infallible>(encode_part(&first));
        loop {
            let frame = tokio::select! {
                frame = subscription.next_frame() => frame,
                _ = relay_unreachable(&mut status) => None,
            };
            match frame {
                Some(frame) => yield Ok(encode_part(&frame)),
                None => break,
            }
        }
        debug!(subscriber = %subscription.id(), "stream connection ended");
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Anything not handled above is forwarded byte-for-byte to the device
/// gateway over the pinned client.
async fn passthrough(State(state): State<ProxyState>, request: Request) -> Response {
    let method = request.method().as_str().to_owned();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };
    let body = (!body.is_empty()).then_some(body);

    match state.gateway.forward(&method, &path_and_query, body).await {
        Ok(upstream) => {
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY));
            if let Some(ct) = upstream.content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            builder
                .body(Body::from(upstream.body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            warn!(%method, path = %path_and_query, error = %e, "pass-through failed");
            bad_gateway(&e.to_string())
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Resolves once the relay reports the upstream as unreachable.
async fn relay_unreachable(status: &mut watch::Receiver<RelayStatus>) -> String {
    loop {
        if let RelayStatus::Unreachable { reason } = &*status.borrow() {
            return reason.clone();
        }
        if status.changed().await.is_err() {
            return "stream relay closed".into();
        }
    }
}

fn bad_gateway(reason: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        [(header::RETRY_AFTER, "2")],
        format!("gateway unreachable: {reason}"),
    )
        .into_response()
}

fn encode_part(frame: &StreamFrame) -> Bytes {
    let mut part = BytesMut::with_capacity(frame.payload.len() + 128);
    part.extend_from_slice(format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-Seq: {}\r\n\r\n",
        frame.payload.len(),
        frame.seq
    ).as_bytes());
    part.extend_from_slice(&frame.payload);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::Request as HttpRequest;
    use futures::StreamExt;
    use http_body_util::BodyExt;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{method as wm_method, path as wm_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use roverlink_core::{
        CommandSink, ControlCommand, ControlConfig, CoreError, MediaFeed, MediaSource, RelayConfig,
    };
    use roverlink_net::GatewayConfig;

    use super::*;

    // ── Test doubles ─────────────────────────────────────────────────

    struct NullSink;

    #[async_trait]
    impl CommandSink for NullSink {
        async fn send(&self, _command: &ControlCommand) -> Result<(), CoreError> {
            Ok(())
        }
    }

    /// Media source fed by a channel; only the first open succeeds.
    struct ChannelSource {
        feed: StdMutex<Option<mpsc::UnboundedReceiver<Result<Bytes, CoreError>>>>,
    }

    impl ChannelSource {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<Bytes, CoreError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    feed: StdMutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    #[async_trait]
    impl MediaSource for ChannelSource {
        async fn open(&self) -> Result<MediaFeed, CoreError> {
            match self.feed.lock().unwrap().take() {
                Some(rx) => Ok(MediaFeed {
                    content_type: "multipart/x-mixed-replace; boundary=frame".into(),
                    bytes: futures::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|item| (item, rx))
                    })
                    .boxed(),
                }),
                None => Err(CoreError::GatewayUnreachable {
                    reason: "refused".into(),
                }),
            }
        }
    }

    struct DeadSource;

    #[async_trait]
    impl MediaSource for DeadSource {
        async fn open(&self) -> Result<MediaFeed, CoreError> {
            Err(CoreError::GatewayUnreachable {
                reason: "no route".into(),
            })
        }
    }

    fn gateway_for(base: &str) -> Arc<GatewayClient> {
        let config = GatewayConfig {
            base_url: Url::parse(&format!("{base}/")).unwrap(),
            media_url: Url::parse(&format!("{base}/stream")).unwrap(),
            local_address: None,
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(2),
            read_retries: 0,
            retry_backoff: Duration::from_millis(5),
        };
        Arc::new(GatewayClient::new(config).unwrap())
    }

    fn dead_gateway() -> Arc<GatewayClient> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        gateway_for(&format!("http://{addr}"))
    }

    fn state_with(source: Arc<dyn MediaSource>, gateway: Arc<GatewayClient>) -> ProxyState {
        let relay_config = RelayConfig {
            connect_attempts: 1,
            connect_backoff: Duration::from_millis(5),
            ..RelayConfig::default()
        };
        ProxyState {
            relay: StreamRelay::new(source, relay_config),
            translator: ControlTranslator::new(Arc::new(NullSink), ControlConfig::default()),
            gateway,
        }
    }

    fn get_request(path: &str) -> Request {
        HttpRequest::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    // ── Tests ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn index_serves_control_page() {
        let app = router(state_with(Arc::new(DeadSource), dead_gateway()));
        let response = app.oneshot(get_request("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(std::str::from_utf8(&body).unwrap().contains("/stream"));
    }

    #[tokio::test]
    async fn control_accepts_tagged_input_events() {
        let state = state_with(Arc::new(DeadSource), dead_gateway());
        let app = router(state.clone());

        let payload = serde_json::json!({
            "session": Uuid::new_v4(),
            "event": { "type": "key_down", "key": "forward" },
        });
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/control")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(state.translator.session_count(), 1);
    }

    #[tokio::test]
    async fn control_rejects_malformed_payloads() {
        let app = router(state_with(Arc::new(DeadSource), dead_gateway()));

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/control")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"session": "nope"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn passthrough_relays_upstream_response() {
        let server = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/settings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("upstream-body")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&server)
            .await;

        let app = router(state_with(Arc::new(DeadSource), gateway_for(&server.uri())));
        let response = app.oneshot(get_request("/settings?x=1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"upstream-body");
    }

    #[tokio::test]
    async fn passthrough_surfaces_502_with_retry_hint() {
        let app = router(state_with(Arc::new(DeadSource), dead_gateway()));
        let response = app.oneshot(get_request("/anything")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn stream_fails_explicitly_when_upstream_unreachable() {
        let app = router(state_with(Arc::new(DeadSource), dead_gateway()));
        let response = app.oneshot(get_request("/stream")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn stream_delivers_multipart_frames() {
        let (source, tx) = ChannelSource::new();
        let state = state_with(source, dead_gateway());
        let app = router(state.clone());

        let mut part = Vec::new();
        part.extend_from_slice(b"--frame\r\nContent-Length: 8\r\n\r\njpegdata\r\n");
        tx.send(Ok(part.into())).unwrap();

        let response = app.oneshot(get_request("/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .contains("multipart/x-mixed-replace")
        );

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap();
        let data = first.into_data().unwrap();
        let text = String::from_utf8_lossy(&data);
        assert!(text.starts_with("--frame\r\n"));
        assert!(text.contains("jpegdata"));

        // Dropping the body releases the subscription.
        drop(body);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.relay.subscriber_count(), 0);
    }
}
