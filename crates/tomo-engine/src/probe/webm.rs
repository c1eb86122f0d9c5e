//! Duration lookup in the head of a WebM / Matroska file.
//!
//! Only the path `EBML header -> Segment -> Info -> {TimecodeScale,
//! Duration}` is walked; everything else is skipped by size.

use tracing::trace;

const EBML_HEADER: u32 = 0x1A45_DFA3;
const DOC_TYPE: u32 = 0x4282;
const SEGMENT: u32 = 0x1853_8067;
const SEGMENT_INFO: u32 = 0x1549_A966;
const TIMECODE_SCALE: u32 = 0x2AD7B1;
const DURATION: u32 = 0x4489;
const CLUSTER: u32 = 0x1F43_B675;
const VOID: u32 = 0xEC;

/// Nanoseconds per timecode tick when `TimecodeScale` is absent.
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

pub const WEBM_MIME: &str = "video/webm";
pub const MATROSKA_MIME: &str = "video/x-matroska";

#[derive(Debug, Clone, PartialEq)]
pub enum WebmProbe {
    Found {
        mime_type: &'static str,
        duration_seconds: Option<f64>,
    },
    Incomplete,
    NotWebm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ElementHeader {
    id: u32,
    /// `None` for the "unknown size" encoding used by live muxers.
    size: Option<u64>,
    header_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parsed<T> {
    Ok(T),
    Truncated,
    Invalid,
}

fn vint_len(first: u8, max_len: usize) -> Option<usize> {
    let len = first.leading_zeros() as usize + 1;
    (len <= max_len).then_some(len)
}

fn read_element_header(data: &[u8]) -> Parsed<ElementHeader> {
    let Some(&first) = data.first() else {
        return Parsed::Truncated;
    };
    let Some(id_len) = vint_len(first, 4) else {
        return Parsed::Invalid;
    };
    let Some(id_bytes) = data.get(..id_len) else {
        return Parsed::Truncated;
    };
    // IDs keep their length marker.
    let id = id_bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));

    let Some(&size_first) = data.get(id_len) else {
        return Parsed::Truncated;
    };
    let Some(size_len) = vint_len(size_first, 8) else {
        return Parsed::Invalid;
    };
    let Some(size_bytes) = data.get(id_len..id_len + size_len) else {
        return Parsed::Truncated;
    };
    let mask = (0xFFu16 >> size_len) as u8;
    let value = size_bytes[1..]
        .iter()
        .fold(u64::from(size_first & mask), |acc, b| (acc << 8) | u64::from(*b));
    let unknown = value == (1u64 << (7 * size_len)) - 1;

    Parsed::Ok(ElementHeader {
        id,
        size: (!unknown).then_some(value),
        header_len: id_len + size_len,
    })
}

/// Body of the first direct child `id` inside a fully received parent body.
fn find_child(body: &[u8], id: u32) -> Option<&[u8]> {
    let mut offset = 0usize;
    while offset < body.len() {
        let Parsed::Ok(header) = read_element_header(&body[offset..]) else {
            return None;
        };
        let start = offset + header.header_len;
        let end = start.checked_add(usize::try_from(header.size?).ok()?)?;
        if header.id == id {
            return body.get(start..end);
        }
        offset = end;
    }
    None
}

fn read_uint(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn read_float(bytes: &[u8]) -> Option<f64> {
    match bytes.len() {
        4 => Some(f64::from(f32::from_be_bytes(bytes.try_into().ok()?))),
        8 => Some(f64::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

fn info_duration(info: &[u8]) -> Option<f64> {
    let scale = find_child(info, TIMECODE_SCALE)
        .and_then(read_uint)
        .unwrap_or(DEFAULT_TIMECODE_SCALE);
    let ticks = find_child(info, DURATION).and_then(read_float)?;
    let seconds = ticks * scale as f64 / 1e9;
    (seconds.is_finite() && seconds > 0.0).then_some(seconds)
}

pub fn probe_webm(data: &[u8]) -> WebmProbe {
    let header = match read_element_header(data) {
        Parsed::Ok(header) if header.id == EBML_HEADER => header,
        Parsed::Ok(_) | Parsed::Invalid => return WebmProbe::NotWebm,
        Parsed::Truncated => {
            // Too short to tell; only claim the stream if the magic matches so far.
            let magic = EBML_HEADER.to_be_bytes();
            let n = data.len().min(magic.len());
            return if data[..n] == magic[..n] {
                WebmProbe::Incomplete
            } else {
                WebmProbe::NotWebm
            };
        }
    };
    let Some(size) = header.size.and_then(|s| usize::try_from(s).ok()) else {
        return WebmProbe::NotWebm;
    };
    let Some(ebml_end) = header.header_len.checked_add(size) else {
        return WebmProbe::NotWebm;
    };
    let Some(ebml_body) = data.get(header.header_len..ebml_end) else {
        return WebmProbe::Incomplete;
    };
    let mime_type = match find_child(ebml_body, DOC_TYPE) {
        Some(b"webm") => WEBM_MIME,
        _ => MATROSKA_MIME,
    };

    let mut offset = ebml_end;
    let mut segment_end = None;
    loop {
        if segment_end.is_some_and(|end| offset >= end) {
            return WebmProbe::Found {
                mime_type,
                duration_seconds: None,
            };
        }
        let element = match read_element_header(data.get(offset..).unwrap_or_default()) {
            Parsed::Ok(element) => element,
            Parsed::Truncated => return WebmProbe::Incomplete,
            Parsed::Invalid => return WebmProbe::NotWebm,
        };
        trace!(id = element.id, offset, "EBML element");

        match element.id {
            SEGMENT if segment_end.is_none() => {
                segment_end = Some(
                    element
                        .size
                        .and_then(|s| usize::try_from(s).ok())
                        .map_or(usize::MAX, |s| offset.saturating_add(element.header_len + s)),
                );
                offset += element.header_len;
                continue;
            }
            SEGMENT_INFO => {
                let start = offset + element.header_len;
                let Some(size) = element.size.and_then(|s| usize::try_from(s).ok()) else {
                    return WebmProbe::Incomplete;
                };
                let Some(info) = start.checked_add(size).and_then(|end| data.get(start..end))
                else {
                    return WebmProbe::Incomplete;
                };
                return WebmProbe::Found {
                    mime_type,
                    duration_seconds: info_duration(info),
                };
            }
            // Info always precedes the first cluster.
            CLUSTER => {
                return WebmProbe::Found {
                    mime_type,
                    duration_seconds: None,
                };
            }
            _ if segment_end.is_none() && element.id != VOID => return WebmProbe::NotWebm,
            _ => {}
        }

        let Some(size) = element.size.and_then(|s| usize::try_from(s).ok()) else {
            return WebmProbe::Incomplete;
        };
        match offset.checked_add(element.header_len + size) {
            Some(next) => offset = next,
            None => return WebmProbe::NotWebm,
        }
    }
}
