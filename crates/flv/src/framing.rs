use crate::tag::FlvTagType;

pub const PREV_TAG_SIZE_FIELD_SIZE: usize = 4;
pub const TAG_HEADER_SIZE: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTagHeader {
    pub tag_type: FlvTagType,
    pub is_filtered: bool,
    pub data_size: u32,
    pub timestamp_ms: u32,
    pub stream_id: u32,
}

impl ParsedTagHeader {
    /// Whether this header looks like a real tag rather than garbage.
    ///
    /// Only audio, video and script tags are accepted and the stream id must
    /// be zero, which is what every muxer writes.
    pub fn is_plausible(&self) -> bool {
        !matches!(self.tag_type, FlvTagType::Unknown(_)) && self.stream_id == 0
    }

    /// Total on-wire size of the tag (header + payload).
    pub fn tag_size(&self) -> usize {
        TAG_HEADER_SIZE + self.data_size as usize
    }
}

pub fn parse_prev_tag_size(bytes: [u8; PREV_TAG_SIZE_FIELD_SIZE]) -> u32 {
    u32::from_be_bytes(bytes)
}

pub fn parse_tag_header_bytes(bytes: [u8; TAG_HEADER_SIZE]) -> ParsedTagHeader {
    let tag_type_byte = bytes[0];
    let tag_type = FlvTagType::from(tag_type_byte & 0x1F);
    let is_filtered = (tag_type_byte & 0x20) != 0;

    let data_size = ((bytes[1] as u32) << 16) | ((bytes[2] as u32) << 8) | (bytes[3] as u32);

    // The fourth timestamp byte extends the 24-bit value to 32 bits.
    let timestamp_ms = ((bytes[7] as u32) << 24)
        | ((bytes[4] as u32) << 16)
        | ((bytes[5] as u32) << 8)
        | (bytes[6] as u32);

    let stream_id = ((bytes[8] as u32) << 16) | ((bytes[9] as u32) << 8) | (bytes[10] as u32);

    ParsedTagHeader {
        tag_type,
        is_filtered,
        data_size,
        timestamp_ms,
        stream_id,
    }
}

/// Encode a tag header; inverse of [`parse_tag_header_bytes`].
pub fn encode_tag_header(header: &ParsedTagHeader) -> [u8; TAG_HEADER_SIZE] {
    let mut out = [0u8; TAG_HEADER_SIZE];
    out[0] = u8::from(header.tag_type) | if header.is_filtered { 0x20 } else { 0 };
    out[1..4].copy_from_slice(&header.data_size.to_be_bytes()[1..]);
    let ts = header.timestamp_ms.to_be_bytes();
    out[4..7].copy_from_slice(&ts[1..]);
    out[7] = ts[0];
    out[8..11].copy_from_slice(&header.stream_id.to_be_bytes()[1..]);
    out
}
