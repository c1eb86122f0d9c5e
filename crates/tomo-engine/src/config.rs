use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::DownloadError;
use crate::playback::PlaybackThresholds;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:10.0.1) Gecko/20100101 Firefox/10.0.1";

/// Tunables for one measurement session.
///
/// Deserializes from a partial document: every missing field keeps its
/// default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock budget of the read loop.
    pub time_budget_seconds: f64,

    /// Budget used when a caller passes a non-positive one.
    pub max_time_budget_seconds: f64,

    /// Media seconds that must be buffered before playback starts.
    pub initial_buffer_seconds: f64,

    /// Playback stalls when less than this is buffered ahead.
    pub min_playout_buffer_seconds: f64,

    /// A stalled playback resumes once more than this is buffered ahead.
    pub min_playout_restart_seconds: f64,

    /// Metadata probe calls allowed before giving up on the encoding rate.
    pub max_encoding_probe_attempts: u32,

    /// Retries after the first request (transport errors and 5xx).
    pub max_retries: u32,

    /// Statuses reported as redirects instead of being followed.
    pub redirect_status_codes: Vec<u16>,

    /// Request headers sent on every attempt.
    pub headers: BTreeMap<String, String>,

    /// Connect and read timeout of a single request.
    pub request_timeout_seconds: f64,

    /// Size of the first block read from the stream.
    pub initial_block_size: usize,

    /// Starting offset of a ranged request, if any.
    pub range_start: Option<u64>,

    pub accept_invalid_certs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_budget_seconds: 30.0,
            max_time_budget_seconds: 600.0,
            initial_buffer_seconds: 2.0,
            min_playout_buffer_seconds: 0.1,
            min_playout_restart_seconds: 1.0,
            max_encoding_probe_attempts: 9,
            max_retries: 3,
            redirect_status_codes: (300..=308).collect(),
            headers: EngineConfig::default_headers(),
            request_timeout_seconds: 5.0,
            initial_block_size: 1024,
            range_start: None,
            accept_invalid_certs: true,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Browser-like headers. Content encodings are not advertised so that
    /// byte counts match what travels on the wire.
    pub fn default_headers() -> BTreeMap<String, String> {
        [
            ("User-Agent", DEFAULT_USER_AGENT),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("Accept-Language", "en-us,en;q=0.5"),
            ("Accept-Charset", "ISO-8859-1,utf-8;q=0.7,*;q=0.7"),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
    }

    pub fn thresholds(&self) -> PlaybackThresholds {
        PlaybackThresholds {
            initial_buffer_seconds: self.initial_buffer_seconds,
            min_playout_buffer_seconds: self.min_playout_buffer_seconds,
            min_playout_restart_seconds: self.min_playout_restart_seconds,
        }
    }

    /// The budget to enforce for a requested one; non-positive requests
    /// fall back to `max_time_budget_seconds`.
    pub fn effective_budget(&self, requested_seconds: f64) -> Duration {
        let seconds = if requested_seconds > 0.0 {
            requested_seconds
        } else {
            self.max_time_budget_seconds
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_seconds)
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn is_redirect(&self, status: u16) -> bool {
        self.redirect_status_codes.contains(&status)
    }

    pub fn header_map(&self) -> Result<HeaderMap, DownloadError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                DownloadError::configuration(format!("invalid header name `{name}`: {e}"))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                DownloadError::configuration(format!("invalid value for header `{name}`: {e}"))
            })?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    pub fn validate(&self) -> Result<(), DownloadError> {
        let non_negative = [
            ("time_budget_seconds", self.time_budget_seconds),
            ("initial_buffer_seconds", self.initial_buffer_seconds),
            ("min_playout_buffer_seconds", self.min_playout_buffer_seconds),
            ("min_playout_restart_seconds", self.min_playout_restart_seconds),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(DownloadError::configuration(format!(
                    "`{name}` must be a non-negative number, got {value}"
                )));
            }
        }

        let positive = [
            ("max_time_budget_seconds", self.max_time_budget_seconds),
            ("request_timeout_seconds", self.request_timeout_seconds),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(DownloadError::configuration(format!(
                    "`{name}` must be a positive number, got {value}"
                )));
            }
        }

        if self.initial_block_size == 0 {
            return Err(DownloadError::configuration(
                "`initial_block_size` must be at least 1 byte",
            ));
        }

        if let Some(code) = self
            .redirect_status_codes
            .iter()
            .find(|code| !(100..=999).contains(*code))
        {
            return Err(DownloadError::configuration(format!(
                "`redirect_status_codes` contains invalid status {code}"
            )));
        }

        self.header_map().map(|_| ())
    }
}

pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn time_budget_seconds(mut self, time_budget_seconds: f64) -> Self {
        self.config.time_budget_seconds = time_budget_seconds;
        self
    }

    pub fn max_time_budget_seconds(mut self, max_time_budget_seconds: f64) -> Self {
        self.config.max_time_budget_seconds = max_time_budget_seconds;
        self
    }

    pub fn initial_buffer_seconds(mut self, initial_buffer_seconds: f64) -> Self {
        self.config.initial_buffer_seconds = initial_buffer_seconds;
        self
    }

    pub fn min_playout_buffer_seconds(mut self, min_playout_buffer_seconds: f64) -> Self {
        self.config.min_playout_buffer_seconds = min_playout_buffer_seconds;
        self
    }

    pub fn min_playout_restart_seconds(mut self, min_playout_restart_seconds: f64) -> Self {
        self.config.min_playout_restart_seconds = min_playout_restart_seconds;
        self
    }

    pub fn max_encoding_probe_attempts(mut self, max_encoding_probe_attempts: u32) -> Self {
        self.config.max_encoding_probe_attempts = max_encoding_probe_attempts;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn redirect_status_codes(mut self, redirect_status_codes: Vec<u16>) -> Self {
        self.config.redirect_status_codes = redirect_status_codes;
        self
    }

    /// Add or replace a single request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    pub fn request_timeout_seconds(mut self, request_timeout_seconds: f64) -> Self {
        self.config.request_timeout_seconds = request_timeout_seconds;
        self
    }

    pub fn initial_block_size(mut self, initial_block_size: usize) -> Self {
        self.config.initial_block_size = initial_block_size;
        self
    }

    pub fn range_start(mut self, range_start: Option<u64>) -> Self {
        self.config.range_start = range_start;
        self
    }

    pub fn accept_invalid_certs(mut self, accept_invalid_certs: bool) -> Self {
        self.config.accept_invalid_certs = accept_invalid_certs;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
