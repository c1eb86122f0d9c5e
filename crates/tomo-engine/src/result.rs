use serde::Serialize;

use crate::media::TimestampStrategy;
use crate::playback::PlaybackState;

/// QoE statistics of one measurement session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadResult {
    pub status_code: Option<u16>,
    pub video_type: Option<String>,
    pub media_duration_seconds: Option<f64>,
    /// `Content-Length` of the response.
    pub media_length_bytes: Option<u64>,
    pub encoding_rate_kbps: Option<f64>,
    pub total_bytes_downloaded: u64,
    pub interruptions: u32,
    /// Bytes received when playback first started.
    pub initial_data_bytes: u64,
    pub initial_rate_kbps: f64,
    pub accumulated_buffer_seconds: f64,
    pub accumulated_playback_seconds: f64,
    pub current_buffer_seconds: f64,
    pub time_to_first_byte_seconds: Option<f64>,
    pub max_instant_throughput_kbps: Option<f64>,
    pub redirect_url: Option<String>,
    /// Wall time spent in the read loop.
    pub download_duration_seconds: f64,
    pub final_state: Option<PlaybackState>,
    pub timestamp_strategy: Option<TimestampStrategy>,
    /// Set when the byte stream failed before the budget or EOF.
    pub stream_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed(DownloadResult),
    Redirected {
        status_code: u16,
        redirect_url: Option<String>,
    },
    Unreachable {
        status_code: Option<u16>,
    },
}

impl SessionOutcome {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SessionOutcome::Completed(result) => result.status_code,
            SessionOutcome::Redirected { status_code, .. } => Some(*status_code),
            SessionOutcome::Unreachable { status_code } => *status_code,
        }
    }

    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            SessionOutcome::Redirected { redirect_url, .. } => redirect_url.as_deref(),
            _ => None,
        }
    }

    /// The outcome as a flat result; redirects and failures carry only the
    /// status and redirect location.
    pub fn to_result(&self) -> DownloadResult {
        match self {
            SessionOutcome::Completed(result) => result.clone(),
            SessionOutcome::Redirected {
                status_code,
                redirect_url,
            } => DownloadResult {
                status_code: Some(*status_code),
                redirect_url: redirect_url.clone(),
                ..Default::default()
            },
            SessionOutcome::Unreachable { status_code } => DownloadResult {
                status_code: *status_code,
                ..Default::default()
            },
        }
    }
}
