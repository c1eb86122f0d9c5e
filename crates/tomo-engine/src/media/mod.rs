//! Media timeline reconstruction.
//!
//! A [`MediaTagSource`] turns raw container bytes into timestamped tags.
//! When the leading bytes are not in a container the source understands,
//! the session estimates the media time from the byte count and an
//! encoding rate obtained from a [`crate::probe::MetadataProber`] instead.

mod clock;
mod flv_source;

use std::collections::BTreeMap;

pub use clock::{MediaClock, TimestampStrategy};
pub use flv::ScriptValue;
pub use flv_source::FlvTagSource;

use crate::error::ContainerError;

/// One demuxed unit of the media timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaTag {
    Audio {
        timestamp_ms: u32,
    },
    Video {
        timestamp_ms: u32,
    },
    Metadata {
        name: String,
        fields: BTreeMap<String, ScriptValue>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accepted,
    /// Too few bytes to decide yet.
    NeedMoreData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagPoll {
    Tag(MediaTag),
    /// No complete tag is buffered.
    Famished,
}

/// Incremental demuxer for one container format.
///
/// The session calls [`accepts`](Self::accepts) with everything received so
/// far until it answers something other than `NeedMoreData`. After
/// acceptance those same bytes and every later block go through
/// [`feed`](Self::feed), and tags are drained with
/// [`next_tag`](Self::next_tag) until it reports `Famished`.
pub trait MediaTagSource: Send {
    /// Short container name, used in logs.
    fn container_name(&self) -> &'static str;

    /// Mime type of accepted streams; its subtype is reported as the video
    /// type.
    fn mime_type(&self) -> &'static str;

    fn accepts(&mut self, leading_bytes: &[u8]) -> Result<Acceptance, ContainerError>;

    fn feed(&mut self, data: &[u8]);

    fn next_tag(&mut self) -> Result<TagPoll, ContainerError>;
}
