#[cfg(feature = "colored-output")]
use colored::*;
use serde::Serialize;
use tomo_engine::{DownloadResult, SessionOutcome};

use crate::cli::OutputFormat;
use crate::error::Result;

/// Everything measured for one target server.
#[derive(Debug, Serialize)]
pub struct MeasurementReport {
    pub url: String,
    pub ip_override: Option<String>,
    /// Locations followed before the final answer, in order.
    pub redirects: Vec<String>,
    #[serde(flatten)]
    pub outcome: Option<SessionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct OutputManager {
    format: OutputFormat,
    colored: bool,
}

impl OutputManager {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self { format, colored }
    }

    pub fn render(&self, reports: &[MeasurementReport]) -> Result<String> {
        match self.format {
            OutputFormat::Pretty => Ok(reports
                .iter()
                .map(|report| self.format_pretty(report))
                .collect::<Vec<_>>()
                .join("\n")),
            OutputFormat::Json => serde_json::to_string_pretty(reports).map_err(Into::into),
            OutputFormat::JsonCompact => serde_json::to_string(reports).map_err(Into::into),
        }
    }

    fn format_pretty(&self, report: &MeasurementReport) -> String {
        let mut output = String::new();
        let server = report.ip_override.as_deref().unwrap_or("resolved address");
        output.push_str(&format!(
            "{} {} ({})\n",
            self.colorize("Session:", &Color::Green, true),
            self.colorize(&report.url, &Color::Blue, false),
            server
        ));
        for hop in &report.redirects {
            self.field(&mut output, "Redirected to", hop);
        }

        if let Some(error) = &report.error {
            self.field(&mut output, "Error", error);
            return output;
        }
        match &report.outcome {
            Some(SessionOutcome::Completed(result)) => self.format_result(&mut output, result),
            Some(SessionOutcome::Redirected {
                status_code,
                redirect_url,
            }) => {
                self.field(&mut output, "Status", &status_code.to_string());
                self.field(
                    &mut output,
                    "Redirect (not followed)",
                    redirect_url.as_deref().unwrap_or("-"),
                );
            }
            Some(SessionOutcome::Unreachable { status_code }) => {
                let status = status_code.map_or_else(|| "no response".to_owned(), |s| s.to_string());
                self.field(&mut output, "Unreachable", &status);
            }
            None => {}
        }
        output
    }

    fn format_result(&self, output: &mut String, result: &DownloadResult) {
        let opt = |value: Option<f64>, unit: &str| {
            value.map_or_else(|| "-".to_owned(), |v| format!("{v:.2} {unit}"))
        };

        if let Some(status) = result.status_code {
            self.field(output, "Status", &status.to_string());
        }
        self.field(output, "Video type", result.video_type.as_deref().unwrap_or("-"));
        self.field(output, "Media duration", &opt(result.media_duration_seconds, "s"));
        self.field(output, "Encoding rate", &opt(result.encoding_rate_kbps, "kbps"));
        if let Some(strategy) = result.timestamp_strategy {
            let strategy = match strategy {
                tomo_engine::TimestampStrategy::Tags => "container tags",
                tomo_engine::TimestampStrategy::Estimate => "encoding rate estimate",
            };
            self.field(output, "Media time from", strategy);
        }
        self.field(
            output,
            "Downloaded",
            &format!(
                "{} of {} bytes in {:.2} s",
                result.total_bytes_downloaded,
                result
                    .media_length_bytes
                    .map_or_else(|| "?".to_owned(), |l| l.to_string()),
                result.download_duration_seconds
            ),
        );
        self.field(output, "Time to first byte", &opt(result.time_to_first_byte_seconds, "s"));
        self.field(
            output,
            "Peak throughput",
            &opt(result.max_instant_throughput_kbps, "kbps"),
        );
        self.field(output, "Interruptions", &result.interruptions.to_string());
        self.field(
            output,
            "Initial buffering",
            &format!(
                "{} bytes at {:.2} kbps",
                result.initial_data_bytes, result.initial_rate_kbps
            ),
        );
        self.field(
            output,
            "Stalled for",
            &format!("{:.2} s", result.accumulated_buffer_seconds),
        );
        self.field(
            output,
            "Played",
            &format!("{:.2} s", result.accumulated_playback_seconds),
        );
        self.field(
            output,
            "Buffered ahead",
            &format!("{:.2} s", result.current_buffer_seconds),
        );
        if let Some(state) = result.final_state {
            self.field(output, "Final state", &state.to_string());
        }
        if let Some(error) = &result.stream_error {
            self.field(output, "Stream error", error);
        }
    }

    fn field(&self, output: &mut String, label: &str, value: &str) {
        output.push_str(&format!(
            "  {}: {}\n",
            self.colorize(label, &Color::Yellow, false),
            self.colorize(value, &Color::Cyan, false)
        ));
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tomo_engine::PlaybackState;

    fn completed() -> MeasurementReport {
        MeasurementReport {
            url: "http://cache.example/videoplayback".into(),
            ip_override: Some("10.0.0.1".into()),
            redirects: vec!["http://r1.cache.example/videoplayback".into()],
            outcome: Some(SessionOutcome::Completed(DownloadResult {
                status_code: Some(200),
                video_type: Some("x-flv".into()),
                interruptions: 2,
                final_state: Some(PlaybackState::Playing),
                ..Default::default()
            })),
            error: None,
        }
    }

    #[test]
    fn test_json_flattens_outcome() {
        let output = OutputManager::new(OutputFormat::JsonCompact, false);
        let json: serde_json::Value =
            serde_json::from_str(&output.render(&[completed()]).unwrap()).unwrap();

        let report = &json[0];
        assert_eq!(report["outcome"], "completed");
        assert_eq!(report["ip_override"], "10.0.0.1");
        assert_eq!(report["interruptions"], 2);
        assert_eq!(report["final_state"], "playing");
        assert!(report.get("error").is_none());
    }

    #[test]
    fn test_pretty_without_color() {
        let output = OutputManager::new(OutputFormat::Pretty, false);
        let text = output.render(&[completed()]).unwrap();

        assert!(text.contains("Session: http://cache.example/videoplayback (10.0.0.1)"));
        assert!(text.contains("  Redirected to: http://r1.cache.example/videoplayback"));
        assert!(text.contains("  Interruptions: 2"));
        assert!(text.contains("  Final state: playing"));
        assert!(text.contains("  Encoding rate: -"));
    }

    #[test]
    fn test_pretty_error() {
        let output = OutputManager::new(OutputFormat::Pretty, false);
        let report = MeasurementReport {
            url: "http://cache.example/v".into(),
            ip_override: None,
            redirects: Vec::new(),
            outcome: None,
            error: Some("invalid IP override `x`".into()),
        };
        let text = output.render(&[report]).unwrap();
        assert!(text.contains("(resolved address)"));
        assert!(text.contains("  Error: invalid IP override `x`"));
    }
}
