// ── Interface-pinned gateway HTTP client ──
//
// Every request egresses from the secondary interface's local address
// via `reqwest`'s local_address binding, never the default route. Two
// underlying clients share that binding: one with short timeouts for
// request/response calls, one without a total timeout for the long-lived
// media stream.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, warn};
use url::Url;

use crate::error::NetError;

/// Connection settings for reaching the device gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Root URL of the gateway's control/web endpoint.
    pub base_url: Url,
    /// URL of the media stream endpoint.
    pub media_url: Url,
    /// Local address to pin egress to. `None` only in tests.
    pub local_address: Option<IpAddr>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Extra attempts after the first, for idempotent reads.
    pub read_retries: u32,
    pub retry_backoff: Duration,
}

impl GatewayConfig {
    /// Conventional endpoints for a gateway address: the control/web
    /// surface on port 80 and the media stream on port 81 (the usual
    /// camera-module split).
    pub fn for_gateway(gateway: &str, local_address: Option<IpAddr>) -> Result<Self, NetError> {
        let base_url = Url::parse(&format!("http://{gateway}/"))?;
        let media_url = Url::parse(&format!("http://{gateway}:81/stream"))?;
        Ok(Self {
            base_url,
            media_url,
            local_address,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            read_retries: 2,
            retry_backoff: Duration::from_millis(250),
        })
    }
}

/// A relayed gateway response: status, content type, and raw body.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// An open media stream: upstream content type plus the raw byte flow.
pub struct MediaStream {
    pub content_type: String,
    pub bytes: BoxStream<'static, Result<Bytes, NetError>>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("content_type", &self.content_type)
            .field("bytes", &"<stream>")
            .finish()
    }
}

/// HTTP client bound to the secondary interface's local address.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    /// Short-timeout client for request/response calls.
    http: reqwest::Client,
    /// Connect-timeout-only client for the long-lived media stream.
    media: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, NetError> {
        let http = reqwest::Client::builder()
            .local_address(config.local_address)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NetError::GatewayUnreachable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        // No total timeout here: the media stream is expected to run
        // until cancelled.
        let media = reqwest::Client::builder()
            .local_address(config.local_address)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| NetError::GatewayUnreachable {
                reason: format!("failed to build media client: {e}"),
            })?;

        Ok(Self {
            http,
            media,
            config,
        })
    }

    /// The configured gateway base URL.
    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    /// Idempotent GET with bounded retry and doubling backoff.
    pub async fn get(&self, path_and_query: &str) -> Result<GatewayResponse, NetError> {
        let url = self.join(path_and_query)?;
        let mut backoff = self.config.retry_backoff;
        let mut last_err = None;

        for attempt in 0..=self.config.read_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.http.get(url.clone()).send().await {
                Ok(resp) => return Self::collect(resp).await,
                Err(e) => {
                    warn!(%url, attempt, error = %e, "gateway read failed");
                    last_err = Some(e);
                }
            }
        }

        Err(unreachable_from(last_err))
    }

    /// Forward a request verbatim. Only GETs are retried; anything with
    /// side effects gets exactly one attempt.
    pub async fn forward(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> Result<GatewayResponse, NetError> {
        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| {
            NetError::GatewayUnreachable {
                reason: format!("unsupported method: {method}"),
            }
        })?;

        if method == reqwest::Method::GET {
            return self.get(path_and_query).await;
        }

        let url = self.join(path_and_query)?;
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.body(body);
        }

        let resp = request.send().await.map_err(|e| NetError::GatewayUnreachable {
            reason: e.to_string(),
        })?;
        Self::collect(resp).await
    }

    /// Fetch an arbitrary absolute URL as text through the pinned client.
    pub async fn fetch_text(&self, url: &Url) -> Result<String, NetError> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| NetError::GatewayUnreachable {
                reason: e.to_string(),
            })?;
        resp.text().await.map_err(|e| NetError::GatewayUnreachable {
            reason: e.to_string(),
        })
    }

    /// Send a control command as query parameters. Fire-and-forget with
    /// at most one retry: for a live control channel, staleness matters
    /// more than reliability.
    pub async fn send_control(&self, params: &[(String, String)]) -> Result<(), NetError> {
        let mut url = self.join("control")?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        for attempt in 0..2u32 {
            match self.http.get(url.clone()).send().await {
                Ok(_) => return Ok(()),
                Err(e) if attempt == 0 => {
                    debug!(%url, error = %e, "control send failed, retrying once");
                }
                Err(e) => {
                    return Err(NetError::GatewayUnreachable {
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Open the media stream endpoint, returning the upstream content
    /// type and the raw byte stream.
    pub async fn open_media(&self) -> Result<MediaStream, NetError> {
        let url = self.config.media_url.clone();
        debug!(%url, "opening media stream");

        let resp = self
            .media
            .get(url)
            .send()
            .await
            .map_err(|e| NetError::GatewayUnreachable {
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(NetError::GatewayUnreachable {
                reason: format!("media endpoint returned HTTP {}", resp.status().as_u16()),
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("multipart/x-mixed-replace; boundary=frame")
            .to_owned();

        let bytes = resp
            .bytes_stream()
            .map_err(|e| NetError::GatewayUnreachable {
                reason: e.to_string(),
            })
            .boxed();

        Ok(MediaStream {
            content_type,
            bytes,
        })
    }

    fn join(&self, path_and_query: &str) -> Result<Url, NetError> {
        Ok(self.config.base_url.join(path_and_query)?)
    }

    async fn collect(resp: reqwest::Response) -> Result<GatewayResponse, NetError> {
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = resp.bytes().await.map_err(|e| NetError::GatewayUnreachable {
            reason: e.to_string(),
        })?;

        Ok(GatewayResponse {
            status,
            content_type,
            body,
        })
    }
}

fn unreachable_from(err: Option<reqwest::Error>) -> NetError {
    NetError::GatewayUnreachable {
        reason: err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".into()),
    }
}
