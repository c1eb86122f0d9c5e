//! Movie-level information from the head of a progressive MP4 download.
//!
//! Walks the top-level boxes of a possibly incomplete file looking for
//! `ftyp` (brand) and `moov/mvhd` (duration). When `moov` sits behind `mdat`
//! the duration is only available once the whole file has arrived, so a
//! partial buffer reports [`MovieProbe::Incomplete`].

use tracing::{debug, trace};

use crate::box_utils::{BoxHeader, box_at, find_first_box, read_box_header};

/// Top-level FourCCs that can legitimately open an ISOBMFF file.
const LEADING_BOXES: &[[u8; 4]] = &[
    *b"ftyp", *b"styp", *b"moov", *b"mdat", *b"free", *b"skip", *b"wide", *b"pdin", *b"sidx",
    *b"moof", *b"uuid",
];

#[derive(Debug, Clone, PartialEq)]
pub struct MovieInfo {
    pub major_brand: Option<[u8; 4]>,
    pub mime_type: &'static str,
    /// `None` when `mvhd` declares an unknown duration.
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MovieProbe {
    Found(MovieInfo),
    /// Looks like ISOBMFF but `moov` has not been fully received.
    Incomplete,
    /// Not an ISOBMFF file.
    NotIsobmff,
}

/// Mime type implied by a major brand.
pub fn mime_for_brand(brand: Option<[u8; 4]>) -> &'static str {
    match brand.as_ref() {
        Some(b"qt  ") => "video/quicktime",
        Some(b"M4A ") | Some(b"M4B ") => "audio/mp4",
        Some([b'3', b'g', _, _]) => "video/3gpp",
        _ => "video/mp4",
    }
}

pub fn probe_movie(data: &[u8]) -> MovieProbe {
    match read_box_header(data) {
        BoxHeader::Truncated => return MovieProbe::Incomplete,
        BoxHeader::Parsed(_, fourcc, _) if !LEADING_BOXES.contains(&fourcc) => {
            return MovieProbe::NotIsobmff;
        }
        BoxHeader::Parsed(..) => {}
    }

    let mut major_brand = None;
    let mut offset = 0usize;
    while offset < data.len() {
        let (size, fourcc, header_size) = match read_box_header(&data[offset..]) {
            BoxHeader::Parsed(size, fourcc, header_size) => (size, fourcc, header_size),
            BoxHeader::Truncated => return MovieProbe::Incomplete,
        };

        // A box running to end-of-file can only be mdat; nothing follows it.
        let Some(size) = size else {
            return MovieProbe::Incomplete;
        };
        let Ok(size) = usize::try_from(size) else {
            return MovieProbe::NotIsobmff;
        };
        if size < header_size {
            debug!(offset, size, "Invalid ISOBMFF box size");
            return MovieProbe::NotIsobmff;
        }

        trace!(
            offset,
            size,
            fourcc = %String::from_utf8_lossy(&fourcc),
            "ISOBMFF top-level box"
        );

        match &fourcc {
            b"ftyp" => {
                if let Some(brand) = data.get(offset + header_size..offset + header_size + 4) {
                    major_brand = Some([brand[0], brand[1], brand[2], brand[3]]);
                }
            }
            b"moov" => {
                let Some(moov) = box_at(data, offset, data.len()) else {
                    return MovieProbe::Incomplete;
                };
                let duration_seconds = find_first_box(data, moov.body_start, moov.end, *b"mvhd")
                    .and_then(|mvhd| parse_mvhd_duration(&data[mvhd.body_start..mvhd.end]));
                return MovieProbe::Found(MovieInfo {
                    major_brand,
                    mime_type: mime_for_brand(major_brand),
                    duration_seconds,
                });
            }
            _ => {}
        }

        match offset.checked_add(size) {
            Some(next) => offset = next,
            None => return MovieProbe::NotIsobmff,
        }
    }

    MovieProbe::Incomplete
}

/// Duration in seconds from an `mvhd` body (version + flags included).
fn parse_mvhd_duration(body: &[u8]) -> Option<f64> {
    let version = *body.first()?;
    let (timescale, duration) = if version == 1 {
        // 4 version/flags + 8 creation + 8 modification
        let timescale = u32::from_be_bytes(body.get(20..24)?.try_into().ok()?);
        let duration = u64::from_be_bytes(body.get(24..32)?.try_into().ok()?);
        (timescale, duration)
    } else {
        // 4 version/flags + 4 creation + 4 modification
        let timescale = u32::from_be_bytes(body.get(12..16)?.try_into().ok()?);
        let duration = u32::from_be_bytes(body.get(16..20)?.try_into().ok()?);
        (timescale, duration as u64)
    };

    // All ones means the duration is unknown.
    let unknown = if version == 1 {
        duration == u64::MAX
    } else {
        duration == u32::MAX as u64
    };
    if timescale == 0 || unknown {
        return None;
    }
    Some(duration as f64 / timescale as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        make_box, make_ftyp, make_full_box, make_mvhd_v0, make_progressive_prefix,
    };

    #[test]
    fn test_progressive_moov_first() {
        let data = make_progressive_prefix(b"isom", 1000, 61_500, 1 << 20);
        match probe_movie(&data) {
            MovieProbe::Found(info) => {
                assert_eq!(info.major_brand, Some(*b"isom"));
                assert_eq!(info.mime_type, "video/mp4");
                assert_eq!(info.duration_seconds, Some(61.5));
            }
            other => panic!("unexpected probe result: {other:?}"),
        }
    }

    #[test]
    fn test_moov_after_mdat_is_incomplete() {
        let mut data = make_ftyp(b"mp42");
        data.extend_from_slice(&(1_000_000u32).to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 512]);
        assert_eq!(probe_movie(&data), MovieProbe::Incomplete);
    }

    #[test]
    fn test_partial_moov_is_incomplete() {
        let mut data = make_ftyp(b"isom");
        let moov = make_box(b"moov", &make_mvhd_v0(600, 6000));
        data.extend_from_slice(&moov[..moov.len() / 2]);
        assert_eq!(probe_movie(&data), MovieProbe::Incomplete);
    }

    #[test]
    fn test_mvhd_version_1() {
        let mut payload = vec![0u8; 16];
        payload.extend_from_slice(&90_000u32.to_be_bytes());
        payload.extend_from_slice(&(90_000u64 * 10).to_be_bytes());
        payload.extend_from_slice(&[0u8; 80]);
        let mut data = make_ftyp(b"qt  ");
        data.extend(make_box(b"moov", &make_full_box(b"mvhd", 1, 0, &payload)));

        match probe_movie(&data) {
            MovieProbe::Found(info) => {
                assert_eq!(info.mime_type, "video/quicktime");
                assert_eq!(info.duration_seconds, Some(10.0));
            }
            other => panic!("unexpected probe result: {other:?}"),
        }
    }

    #[test]
    fn test_not_isobmff() {
        assert_eq!(probe_movie(b"FLV\x01\x05\x00\x00\x00\x09"), MovieProbe::NotIsobmff);
        assert_eq!(probe_movie(b"FLV"), MovieProbe::Incomplete);
    }
}
