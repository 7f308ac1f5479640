use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::RelayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Error bodies are only summarized; anything past this is not read.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

fn build_reqwest_client(
    config: &ServerConfig,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, RelayError> {
    let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
    };

    // No total timeout: a completion stream may legitimately run for minutes.
    // Header wait and idle gaps are bounded separately.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_pool_max_idle_per_host.max(1))
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.http_use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for the completion upstream.
///
/// Sends exactly one request per call; there is no retry layer.
pub struct HttpTransport {
    client: reqwest::Client,
    header_timeout: Duration,
}

impl HttpTransport {
    /// Build the transport from server settings and an optional upstream proxy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the proxy URL is rejected or the
    /// client cannot be constructed.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, RelayError> {
        Ok(Self {
            client: build_reqwest_client(config, proxy_url)?,
            header_timeout: Duration::from_secs(config.timeout),
        })
    }

    /// POST `body` to `url` and wait for the response headers.
    ///
    /// The caller reads the body as a stream. Non-success statuses are returned
    /// as-is; status handling belongs to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] on connection failure or when the
    /// headers do not arrive within the configured timeout.
    pub async fn send_stream(
        &self,
        url: &str,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let request = self.client.post(url).headers(headers).body(body).send();
        match tokio::time::timeout(self.header_timeout, request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(RelayError::Transport(format!(
                "Upstream request failed: {err}"
            ))),
            Err(_) => Err(RelayError::Transport(format!(
                "Timed out after {}s waiting for upstream response headers",
                self.header_timeout.as_secs()
            ))),
        }
    }

    /// Read the body of a non-success response, bounded in size and time.
    ///
    /// Stops at [`MAX_ERROR_BODY_BYTES`]; the rest is dropped with the
    /// response. The read shares the header timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the body read fails or does not
    /// finish within the configured timeout.
    pub async fn read_error_body(&self, response: reqwest::Response) -> Result<bytes::Bytes, RelayError> {
        match tokio::time::timeout(self.header_timeout, read_capped(response, MAX_ERROR_BODY_BYTES)).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(err)) => Err(RelayError::Transport(format!(
                "Failed to read upstream error body: {err}"
            ))),
            Err(_) => Err(RelayError::Transport(format!(
                "Timed out after {}s reading upstream error body",
                self.header_timeout.as_secs()
            ))),
        }
    }
}

async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<bytes::Bytes, reqwest::Error> {
    let mut buf = bytes::BytesMut::new();
    while buf.len() < limit {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let take = chunk.len().min(limit - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }
    Ok(buf.freeze())
}
