use std::fmt::Display;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::FlvError;

pub const FLV_HEADER_SIZE: usize = 9;
pub const FLV_SIGNATURE: [u8; 3] = *b"FLV";
// DataOffset is a 32-bit header length field. In practice it is 9 for standard FLV.
// Put a conservative bound to avoid buffering unbounded data for a bogus header.
const MAX_DATA_OFFSET: u32 = 64 * 1024;

// Struct representing the FLV header, 9 bytes in total
#[derive(Debug, Clone, PartialEq)]
pub struct FlvHeader {
    // The version of the FLV file format, 1 byte, usually 0x01
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
    // Total size of the header, 4 bytes, usually 0x09
    pub data_offset: u32,
}

impl Display for FlvHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FLV v{} (audio: {}, video: {}, offset: {})",
            self.version, self.has_audio, self.has_video, self.data_offset
        )
    }
}

/// Outcome of checking the leading bytes of a stream for an FLV signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// The full `FLV` signature is present.
    Match,
    /// The bytes seen so far are a prefix of the signature.
    Partial,
    /// The bytes cannot be the start of an FLV file.
    Mismatch,
}

impl FlvHeader {
    pub fn new(has_audio: bool, has_video: bool) -> Self {
        FlvHeader {
            version: 0x01,
            has_audio,
            has_video,
            data_offset: FLV_HEADER_SIZE as u32,
        }
    }

    /// Check whether `data` starts like an FLV file, without requiring the
    /// whole header to be present.
    pub fn check_signature(data: &[u8]) -> SignatureCheck {
        let n = data.len().min(FLV_SIGNATURE.len());
        if data[..n] != FLV_SIGNATURE[..n] {
            SignatureCheck::Mismatch
        } else if n < FLV_SIGNATURE.len() {
            SignatureCheck::Partial
        } else {
            SignatureCheck::Match
        }
    }

    /// Parses the FLV header from the start of `data`.
    ///
    /// Returns `Ok(None)` while fewer than [`FLV_HEADER_SIZE`] bytes are
    /// available and the bytes seen so far are still a valid prefix.
    /// The caller is expected to skip `data_offset` bytes afterwards.
    pub fn parse(data: &[u8]) -> Result<Option<Self>, FlvError> {
        if Self::check_signature(data) == SignatureCheck::Mismatch {
            return Err(FlvError::InvalidHeader("invalid FLV signature".into()));
        }
        if data.len() < FLV_HEADER_SIZE {
            return Ok(None);
        }

        let mut reader = Cursor::new(&data[FLV_SIGNATURE.len()..FLV_HEADER_SIZE]);

        // Legacy FLV files are version 1.
        let version = reader.read_u8()?;
        if version != 0x01 {
            return Err(FlvError::InvalidHeader(format!(
                "unsupported FLV version: {version}"
            )));
        }

        // Reserved bits are: bits 7..=3 and bit 1.
        let flags = reader.read_u8()?;
        if (flags & 0b1111_1010) != 0 {
            return Err(FlvError::InvalidHeader(format!(
                "reserved flag bits set: 0x{flags:02X}"
            )));
        }

        let data_offset = reader.read_u32::<BigEndian>()?;
        if data_offset < FLV_HEADER_SIZE as u32 {
            return Err(FlvError::InvalidHeader(format!(
                "invalid DataOffset: {data_offset}"
            )));
        }
        if data_offset > MAX_DATA_OFFSET {
            return Err(FlvError::InvalidHeader(format!(
                "DataOffset too large: {data_offset}"
            )));
        }

        Ok(Some(FlvHeader {
            version,
            has_audio: (flags & 0b0000_0100) != 0,
            has_video: (flags & 0b0000_0001) != 0,
            data_offset,
        }))
    }

    /// Serialize the header (used to build synthetic streams).
    pub fn to_bytes(&self) -> [u8; FLV_HEADER_SIZE] {
        let mut out = [0u8; FLV_HEADER_SIZE];
        out[..3].copy_from_slice(&FLV_SIGNATURE);
        out[3] = self.version;
        out[4] = (u8::from(self.has_audio) << 2) | u8::from(self.has_video);
        out[5..9].copy_from_slice(&self.data_offset.to_be_bytes());
        out
    }
}
