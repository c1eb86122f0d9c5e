use serde::Serialize;
use tracing::debug;

/// How the session derives the media timestamp. Chosen once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampStrategy {
    /// Largest audio/video tag timestamp seen so far.
    Tags,
    /// Bytes received divided by the encoding rate.
    Estimate,
}

/// Media time received so far, in seconds.
#[derive(Debug, Clone, Default)]
pub struct MediaClock {
    seconds: f64,
    max_tag_timestamp_ms: Option<u32>,
}

impl MediaClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Advance to an audio/video tag timestamp. Timestamps lower than the
    /// largest one seen leave the clock unchanged; returns whether the
    /// clock moved.
    pub fn observe_tag(&mut self, timestamp_ms: u32) -> bool {
        if let Some(max) = self.max_tag_timestamp_ms
            && timestamp_ms < max
        {
            debug!(
                timestamp_ms,
                max_timestamp_ms = max,
                "Decreasing tag timestamp ignored"
            );
            return false;
        }
        self.max_tag_timestamp_ms = Some(timestamp_ms);
        self.seconds = f64::from(timestamp_ms) / 1000.0;
        true
    }

    /// Set the clock from the byte count at a known encoding rate.
    pub fn estimate(&mut self, total_bytes: u64, encoding_rate_kbps: f64) {
        if encoding_rate_kbps > 0.0 && encoding_rate_kbps.is_finite() {
            self.seconds = total_bytes as f64 * 8e-3 / encoding_rate_kbps;
        }
    }
}
