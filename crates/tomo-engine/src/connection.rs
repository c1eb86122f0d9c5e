//! Opening the media stream.
//!
//! Redirects are never followed: the measurement targets one specific cache
//! server, so a redirect is reported to the caller together with its
//! location. A literal IP override pins the TCP connection while the URL
//! host is still used for `Host` and TLS.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::OnceLock;

use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode, redirect};
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::DownloadError;

pub type MediaByteStream = Pin<Box<dyn AsyncRead + Send>>;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// A response whose body is ready to be read.
pub struct OpenStream {
    pub status: StatusCode,
    pub url: Url,
    pub content_length: Option<u64>,
    /// Size of the whole media: the `Content-Length` of a full response, or
    /// the complete length of a `206` answer's `Content-Range`.
    pub media_length: Option<u64>,
    pub content_type: Option<String>,
    /// When the request that produced this response was sent.
    pub requested_at: Instant,
    pub body: MediaByteStream,
}

impl OpenStream {
    fn from_response(response: Response, requested_at: Instant) -> Self {
        let headers = response.headers();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let status = response.status();
        let media_length = if status == StatusCode::PARTIAL_CONTENT {
            headers
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(complete_length)
        } else {
            content_length
        };
        let url = response.url().clone();

        let stream = response.bytes_stream().map_err(io::Error::other);
        Self {
            status,
            url,
            content_length,
            media_length,
            content_type,
            requested_at,
            body: Box::pin(StreamReader::new(stream)),
        }
    }

    /// Wrap an arbitrary reader, for driving a session without HTTP.
    pub fn from_reader(url: Url, body: impl AsyncRead + Send + 'static) -> Self {
        Self {
            status: StatusCode::OK,
            url,
            content_length: None,
            media_length: None,
            content_type: None,
            requested_at: Instant::now(),
            body: Box::pin(body),
        }
    }
}

impl fmt::Debug for OpenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenStream")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("content_length", &self.content_length)
            .field("media_length", &self.media_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Connection {
    Stream(OpenStream),
    Redirect {
        status: StatusCode,
        location: Option<Url>,
    },
    /// Retries exhausted; carries the last status seen, if any.
    Failed { status: Option<StatusCode> },
}

#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: EngineConfig,
}

impl ConnectionManager {
    pub fn new(config: EngineConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        install_rustls_provider();
        Ok(Self { config })
    }

    fn build_client(
        &self,
        url: &Url,
        ip_override: Option<IpAddr>,
    ) -> Result<Client, DownloadError> {
        let timeout = self.config.request_timeout();
        let mut builder = Client::builder()
            .redirect(redirect::Policy::none())
            .default_headers(self.config.header_map()?)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .danger_accept_invalid_certs(self.config.accept_invalid_certs);

        if let Some(ip) = ip_override {
            let host = url
                .host_str()
                .ok_or_else(|| DownloadError::invalid_url(url.as_str(), "URL has no host"))?;
            let port = url.port_or_known_default().unwrap_or(80);
            debug!(host, %ip, port, "Pinning host to IP");
            builder = builder.resolve(host, SocketAddr::new(ip, port));
        }

        Ok(builder.build()?)
    }

    async fn send(&self, client: &Client, url: &Url, ranged: bool) -> reqwest::Result<Response> {
        let mut request = client.get(url.clone());
        if ranged && let Some(start) = self.config.range_start {
            request = request.header(RANGE, format!("bytes={start}-"));
        }
        request.send().await
    }

    fn redirect(&self, url: &Url, response: &Response) -> Option<Connection> {
        let status = response.status();
        if !self.config.is_redirect(status.as_u16()) {
            return None;
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| url.join(v).ok());
        info!(%status, location = ?location.as_ref().map(Url::as_str), "Redirect received");
        Some(Connection::Redirect { status, location })
    }

    /// Open `url`, optionally on a specific server address.
    ///
    /// Transport errors and 5xx answers are retried immediately, up to
    /// `max_retries` times. A 416 answer to a ranged request triggers one
    /// request without the `Range` header. Any other unexpected status is
    /// returned as an error.
    #[instrument(skip(self), fields(url = %url), level = "debug")]
    pub async fn open(
        &self,
        url: &Url,
        ip_override: Option<IpAddr>,
    ) -> Result<Connection, DownloadError> {
        let client = self.build_client(url, ip_override)?;
        let mut ranged = self.config.range_start.is_some();
        let mut last_status = None;

        for attempt in 0..=self.config.max_retries {
            match self.attempt(&client, url, ranged, &mut last_status).await {
                Ok(connection) => return Ok(connection),
                Err(DownloadError::HttpStatus { status, .. })
                    if ranged && status == StatusCode::RANGE_NOT_SATISFIABLE =>
                {
                    warn!("Range not satisfiable, retrying without range");
                    ranged = false;
                    if let Some(connection) = self
                        .open_without_range(&client, url, attempt, &mut last_status)
                        .await
                    {
                        return Ok(connection);
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Request failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        error!(
            retries = self.config.max_retries,
            status = ?last_status,
            "Giving up on connection"
        );
        Ok(Connection::Failed {
            status: last_status,
        })
    }

    /// The single fallback after a 416. `None` means the attempt is used up
    /// and the retry loop continues.
    async fn open_without_range(
        &self,
        client: &Client,
        url: &Url,
        attempt: u32,
        last_status: &mut Option<StatusCode>,
    ) -> Option<Connection> {
        match self.attempt(client, url, false, last_status).await {
            Ok(connection) => Some(connection),
            Err(e) if e.is_retryable() => {
                warn!(attempt, error = %e, "Fallback request failed");
                None
            }
            Err(e) => {
                error!(error = %e, "Fallback request without range failed");
                Some(Connection::Failed {
                    status: *last_status,
                })
            }
        }
    }

    /// One request. Redirects and successes are final; every other answer
    /// comes back as an error for the caller to retry or surface.
    async fn attempt(
        &self,
        client: &Client,
        url: &Url,
        ranged: bool,
        last_status: &mut Option<StatusCode>,
    ) -> Result<Connection, DownloadError> {
        let requested_at = Instant::now();
        let response = self.send(client, url, ranged).await?;
        let status = response.status();
        *last_status = Some(status);

        if let Some(redirect) = self.redirect(url, &response) {
            return Ok(redirect);
        }
        if status.is_success() {
            debug!(%status, "Connection established");
            return Ok(Connection::Stream(OpenStream::from_response(
                response,
                requested_at,
            )));
        }
        Err(DownloadError::http_status(status, url.as_str()))
    }
}

/// Complete length from a `Content-Range` value such as `bytes 0-99/1000`.
fn complete_length(content_range: &str) -> Option<u64> {
    let (_, total) = content_range.rsplit_once('/')?;
    total.trim().parse().ok()
}
