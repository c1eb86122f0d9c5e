//! Shared ISOBMFF test builders.
//!
//! Available for local mp4 tests and for downstream crate tests when the
//! `test-utils` feature is enabled.

pub fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.push(version);
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(payload);
    make_box(fourcc, &body)
}

/// `ftyp` box with the given major brand and no compatible brands.
pub fn make_ftyp(major_brand: &[u8; 4]) -> Vec<u8> {
    let mut body = major_brand.to_vec();
    body.extend_from_slice(&0u32.to_be_bytes());
    make_box(b"ftyp", &body)
}

/// Version 0 `mvhd` box declaring `duration` in units of `timescale`.
pub fn make_mvhd_v0(timescale: u32, duration: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(96);
    payload.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    payload.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    payload.extend_from_slice(&timescale.to_be_bytes());
    payload.extend_from_slice(&duration.to_be_bytes());
    // rate, volume, reserved, matrix, pre_defined, next_track_ID
    payload.extend_from_slice(&[0u8; 80]);
    make_full_box(b"mvhd", 0, 0, &payload)
}

/// A progressive file prefix: `ftyp`, a `moov` holding only `mvhd`, then the
/// start of an `mdat` announcing `mdat_size` payload bytes.
pub fn make_progressive_prefix(brand: &[u8; 4], timescale: u32, duration: u32, mdat_size: u32) -> Vec<u8> {
    let mut out = make_ftyp(brand);
    out.extend(make_box(b"moov", &make_mvhd_v0(timescale, duration)));
    out.extend_from_slice(&(mdat_size + 8).to_be_bytes());
    out.extend_from_slice(b"mdat");
    out
}
