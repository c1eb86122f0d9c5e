//! Best-effort duration and type detection on a partial download.

mod webm;

use flv::{FlvHeader, FlvTagReader, ReadOutcome, SignatureCheck};
use mp4::MovieProbe;
use tracing::{debug, trace};

pub use webm::{MATROSKA_MIME, WEBM_MIME, WebmProbe, probe_webm};

pub const FLV_MIME: &str = "video/x-flv";

/// Tags scanned for `onMetaData` before giving up on an FLV duration.
const MAX_FLV_TAGS_BEFORE_METADATA: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub mime_type: String,
    pub duration_seconds: Option<f64>,
}

impl MediaInfo {
    /// Subtype of the mime type, e.g. `mp4` for `video/mp4`.
    pub fn video_type(&self) -> &str {
        video_type_of(&self.mime_type)
    }
}

pub(crate) fn video_type_of(mime_type: &str) -> &str {
    mime_type
        .split_once('/')
        .map_or(mime_type, |(_, subtype)| subtype)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Found(MediaInfo),
    /// Not enough data yet; asking again later may succeed.
    Incomplete,
}

/// Extracts media information from the bytes downloaded so far.
pub trait MetadataProber: Send + Sync {
    fn probe(&self, buffered: &[u8]) -> ProbeOutcome;
}

/// Prober for the containers cache servers commonly serve: FLV, MP4 and
/// WebM / Matroska.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerProber;

impl ContainerProber {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataProber for ContainerProber {
    fn probe(&self, buffered: &[u8]) -> ProbeOutcome {
        if FlvHeader::check_signature(buffered) == SignatureCheck::Match {
            return probe_flv(buffered);
        }

        match probe_webm(buffered) {
            WebmProbe::Found {
                mime_type,
                duration_seconds,
            } => return found(mime_type, duration_seconds),
            WebmProbe::Incomplete => return ProbeOutcome::Incomplete,
            WebmProbe::NotWebm => {}
        }

        match mp4::probe_movie(buffered) {
            MovieProbe::Found(info) => found(info.mime_type, info.duration_seconds),
            MovieProbe::Incomplete => ProbeOutcome::Incomplete,
            MovieProbe::NotIsobmff => {
                debug!(len = buffered.len(), "Unrecognized container");
                ProbeOutcome::Incomplete
            }
        }
    }
}

fn found(mime_type: &str, duration_seconds: Option<f64>) -> ProbeOutcome {
    ProbeOutcome::Found(MediaInfo {
        mime_type: mime_type.to_owned(),
        duration_seconds: duration_seconds.filter(|d| d.is_finite() && *d > 0.0),
    })
}

fn probe_flv(buffered: &[u8]) -> ProbeOutcome {
    let mut reader = FlvTagReader::new();
    reader.push(buffered);

    for _ in 0..MAX_FLV_TAGS_BEFORE_METADATA {
        match reader.next_tag() {
            Ok(ReadOutcome::Tag(tag)) if tag.is_script_tag() => {
                let Ok(script) = tag.decode_script() else {
                    continue;
                };
                if script.name != "onMetaData" {
                    continue;
                }
                let duration = script.value.get("duration").and_then(|v| v.as_number());
                trace!(?duration, "FLV onMetaData found");
                return found(FLV_MIME, duration);
            }
            Ok(ReadOutcome::Tag(_)) => {}
            Ok(ReadOutcome::NeedMoreData) => return ProbeOutcome::Incomplete,
            Err(e) => {
                debug!(error = %e, "FLV probe failed");
                return ProbeOutcome::Incomplete;
            }
        }
    }
    found(FLV_MIME, None)
}
