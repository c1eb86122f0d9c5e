use std::fmt;

use bytes::Bytes;

use crate::error::FlvError;
use crate::framing::{self, ParsedTagHeader};
use crate::script::ScriptData;

/// One FLV tag: header fields plus the payload, without the trailer.
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    pub timestamp_ms: u32,
    pub stream_id: u32,
    pub tag_type: FlvTagType,
    /// Filter bit; the payload is encrypted and cannot be decoded.
    pub is_filtered: bool,
    pub data: Bytes,
}

impl FlvTag {
    pub(crate) fn from_parts(header: ParsedTagHeader, data: Bytes) -> Self {
        FlvTag {
            timestamp_ms: header.timestamp_ms,
            stream_id: header.stream_id,
            tag_type: header.tag_type,
            is_filtered: header.is_filtered,
            data,
        }
    }

    pub fn is_script_tag(&self) -> bool {
        matches!(self.tag_type, FlvTagType::ScriptData)
    }

    /// On-wire size of the tag, header included.
    pub fn size(&self) -> usize {
        self.data.len() + framing::TAG_HEADER_SIZE
    }

    /// Decode the AMF0 payload of a script tag.
    pub fn decode_script(&self) -> Result<ScriptData, FlvError> {
        if !self.is_script_tag() || self.is_filtered {
            return Err(FlvError::NotScriptData {
                tag_type: self.tag_type,
                filtered: self.is_filtered,
            });
        }
        Ok(ScriptData::demux(&self.data)?)
    }

    /// Serialize the tag followed by its `PreviousTagSize` trailer.
    pub fn to_bytes_with_trailer(&self) -> Vec<u8> {
        let header = ParsedTagHeader {
            tag_type: self.tag_type,
            is_filtered: self.is_filtered,
            data_size: self.data.len() as u32,
            timestamp_ms: self.timestamp_ms,
            stream_id: self.stream_id,
        };
        let mut out = Vec::with_capacity(self.size() + framing::PREV_TAG_SIZE_FIELD_SIZE);
        out.extend_from_slice(&framing::encode_tag_header(&header));
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&(self.size() as u32).to_be_bytes());
        out
    }
}

/// Tag type from the low five bits of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    ScriptData,
    Unknown(u8),
}

impl From<u8> for FlvTagType {
    fn from(value: u8) -> Self {
        match value {
            8 => FlvTagType::Audio,
            9 => FlvTagType::Video,
            18 => FlvTagType::ScriptData,
            _ => FlvTagType::Unknown(value),
        }
    }
}

impl From<FlvTagType> for u8 {
    fn from(value: FlvTagType) -> Self {
        match value {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::ScriptData => 18,
            FlvTagType::Unknown(val) => val,
        }
    }
}

impl fmt::Display for FlvTagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlvTagType::Audio => write!(f, "Audio"),
            FlvTagType::Video => write!(f, "Video"),
            FlvTagType::ScriptData => write!(f, "Script"),
            FlvTagType::Unknown(value) => write!(f, "Unknown({value})"),
        }
    }
}
