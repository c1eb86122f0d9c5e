//! Adaptive block sizing and throughput bookkeeping.
//!
//! The next read size tracks the rate observed on the previous block,
//! bounded to halving or doubling per step and capped at [`MAX_BLOCK_SIZE`].

use std::time::Duration;

use tracing::trace;

/// Largest block the controller ever asks for (4 MiB).
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Below this, the elapsed time of a block is too small to derive a rate.
const MIN_MEASURABLE_SECONDS: f64 = 0.001;

/// Blocks shorter than this never update the peak throughput.
const MIN_PEAK_SAMPLE_SECONDS: f64 = 0.01;

/// Size of the next block given how long the last one took.
pub fn next_block_size(elapsed_seconds: f64, last_block_bytes: usize) -> usize {
    let last = last_block_bytes as f64;
    let lower = (last / 2.0).max(1.0);
    let upper = (last * 2.0).max(1.0).min(MAX_BLOCK_SIZE as f64);

    if elapsed_seconds < MIN_MEASURABLE_SECONDS {
        return upper as usize;
    }

    let rate = last / elapsed_seconds;
    let size = if rate > upper {
        upper
    } else if rate < lower {
        lower
    } else {
        rate
    };
    size as usize
}

/// One timed read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputBlock {
    pub bytes_read: usize,
    pub elapsed_seconds: f64,
}

impl ThroughputBlock {
    /// Throughput of this block in kbit/s, if it took measurable time.
    pub fn instant_throughput_kbps(&self) -> Option<f64> {
        (self.elapsed_seconds > 0.0).then(|| 8e-3 * self.bytes_read as f64 / self.elapsed_seconds)
    }
}

/// Tracks the peak instantaneous throughput of a session.
#[derive(Debug, Default, Clone)]
pub struct ThroughputTracker {
    max_instant_kbps: Option<f64>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, block: ThroughputBlock) {
        if block.elapsed_seconds <= MIN_PEAK_SAMPLE_SECONDS {
            return;
        }
        let Some(kbps) = block.instant_throughput_kbps() else {
            return;
        };
        if self.max_instant_kbps.is_none_or(|max| kbps > max) {
            trace!(kbps, "New peak throughput");
            self.max_instant_kbps = Some(kbps);
        }
    }

    pub fn max_instant_kbps(&self) -> Option<f64> {
        self.max_instant_kbps
    }
}

/// Render a byte count with a binary suffix, e.g. `23.67k`.
pub fn format_bytes(bytes: u64) -> String {
    const SUFFIXES: &[u8] = b"bkMGTPEZY";
    if bytes == 0 {
        return "0.00b".to_owned();
    }
    let mut converted = bytes as f64;
    let mut exponent = 0;
    while converted >= 1024.0 && exponent < SUFFIXES.len() - 1 {
        converted /= 1024.0;
        exponent += 1;
    }
    format!("{converted:.2}{}", SUFFIXES[exponent] as char)
}

/// Progress of one session as reported after every block.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub downloaded_bytes: u64,
    /// From `Content-Length`, when the server sent one.
    pub total_bytes: Option<u64>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Share of the content received, right-aligned, or `---.-%` if unknown.
    pub fn percent(&self) -> String {
        match self.total_bytes {
            Some(total) if total > 0 => {
                let percent = self.downloaded_bytes as f64 / total as f64 * 100.0;
                format!("{percent:5.1}%")
            }
            _ => "---.-%".to_owned(),
        }
    }

    /// Average speed so far, e.g. ` 24.26kb/s`.
    pub fn speed(&self) -> String {
        let seconds = self.elapsed.as_secs_f64();
        if self.downloaded_bytes == 0 || seconds < 0.001 {
            return format!("{:>10}", "---b/s");
        }
        let rate = (self.downloaded_bytes as f64 / seconds) as u64;
        format!("{:>10}", format!("{}/s", format_bytes(rate)))
    }

    /// Remaining time at the average speed, as `MM:SS`.
    pub fn eta(&self) -> String {
        let seconds = self.elapsed.as_secs_f64();
        let Some(total) = self.total_bytes else {
            return "--:--".to_owned();
        };
        if self.downloaded_bytes == 0 || seconds < 0.001 {
            return "--:--".to_owned();
        }
        let rate = self.downloaded_bytes as f64 / seconds;
        let remaining = total.saturating_sub(self.downloaded_bytes) as f64 / rate;
        let remaining = remaining as u64;
        let (minutes, seconds) = (remaining / 60, remaining % 60);
        if minutes > 99 {
            return "--:--".to_owned();
        }
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0001, 81_943_040, 4_194_304)]
    #[case(20.0, 2_097_152, 1_048_576)]
    #[case(2.0, 81_943_040, 4_194_304)]
    #[case(1.0, 1024, 1024)]
    #[case(0.5, 1024, 2048)]
    #[case(1.0, 0, 1)]
    fn test_next_block_size(
        #[case] elapsed: f64,
        #[case] last_bytes: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(next_block_size(elapsed, last_bytes), expected);
    }

    #[test]
    fn test_block_size_never_exceeds_cap() {
        let mut size = 1024;
        for _ in 0..64 {
            size = next_block_size(0.0, size);
            assert!(size <= MAX_BLOCK_SIZE);
        }
        assert_eq!(size, MAX_BLOCK_SIZE);
    }

    #[test]
    fn test_peak_ignores_short_blocks() {
        let mut tracker = ThroughputTracker::new();
        tracker.record(ThroughputBlock {
            bytes_read: 1_000_000,
            elapsed_seconds: 0.005,
        });
        assert_eq!(tracker.max_instant_kbps(), None);

        tracker.record(ThroughputBlock {
            bytes_read: 125_000,
            elapsed_seconds: 1.0,
        });
        tracker.record(ThroughputBlock {
            bytes_read: 62_500,
            elapsed_seconds: 1.0,
        });
        assert_eq!(tracker.max_instant_kbps(), Some(1000.0));
    }

    #[rstest]
    #[case(0, "0.00b")]
    #[case(1, "1.00b")]
    #[case(24_240, "23.67k")]
    #[case(1_048_576, "1.00M")]
    #[case(4_194_304, "4.00M")]
    fn test_format_bytes(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_bytes(bytes), expected);
    }

    #[test]
    fn test_progress_strings() {
        let progress = ProgressSnapshot {
            downloaded_bytes: 1024,
            total_bytes: Some(2048),
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(progress.percent(), " 50.0%");
        assert_eq!(progress.speed(), " 512.00b/s");
        assert_eq!(progress.eta(), "00:02");

        let unknown = ProgressSnapshot {
            downloaded_bytes: 0,
            total_bytes: None,
            elapsed: Duration::ZERO,
        };
        assert_eq!(unknown.percent(), "---.-%");
        assert_eq!(unknown.eta(), "--:--");
    }
}
