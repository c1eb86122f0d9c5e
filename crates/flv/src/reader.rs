//! Incremental FLV tag reader.
//!
//! Bytes are pushed in as they arrive from the network and tags are pulled
//! out once they are complete. A partially received tag is never an error:
//! the reader reports [`ReadOutcome::NeedMoreData`] and keeps the partial
//! bytes until the next push. Consumed bytes are released immediately, so the
//! internal buffer only ever holds at most one incomplete tag.
//!
//! Only a bad file header is fatal. A corrupt tag header in the middle of the
//! stream triggers a resynchronization scan for the next plausible tag.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::error::FlvError;
use crate::framing::{self, PREV_TAG_SIZE_FIELD_SIZE, TAG_HEADER_SIZE};
use crate::header::FlvHeader;
use crate::tag::FlvTag;

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Tag(FlvTag),
    NeedMoreData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Header,
    PrevTagSize,
    TagHeader,
}

#[derive(Debug)]
pub struct FlvTagReader {
    buffer: BytesMut,
    state: ReaderState,
    header: Option<FlvHeader>,
    /// Stream offset of `buffer[0]`.
    offset: u64,
    expected_prev_tag_size: u32,
    skipped_bytes: u64,
}

impl Default for FlvTagReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FlvTagReader {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: ReaderState::Header,
            header: None,
            offset: 0,
            expected_prev_tag_size: 0,
            skipped_bytes: 0,
        }
    }

    /// Append freshly received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// The file header, once it has been parsed.
    pub fn header(&self) -> Option<&FlvHeader> {
        self.header.as_ref()
    }

    /// Number of bytes currently held waiting for a complete tag.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes discarded while resynchronizing.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Try to parse the file header from the bytes pushed so far.
    ///
    /// Returns `Ok(true)` once the header is parsed, `Ok(false)` if more bytes
    /// are needed and an error if the stream is not FLV.
    pub fn poll_header(&mut self) -> Result<bool, FlvError> {
        if self.state != ReaderState::Header {
            return Ok(true);
        }

        let Some(header) = FlvHeader::parse(&self.buffer)? else {
            return Ok(false);
        };
        // Extended headers carry extra bytes before the first PreviousTagSize.
        if self.buffer.len() < header.data_offset as usize {
            return Ok(false);
        }

        debug!(header = %header, "FLV header parsed");
        self.advance(header.data_offset as usize);
        self.header = Some(header);
        self.state = ReaderState::PrevTagSize;
        Ok(true)
    }

    /// Pull the next complete tag.
    pub fn next_tag(&mut self) -> Result<ReadOutcome, FlvError> {
        if !self.poll_header()? {
            return Ok(ReadOutcome::NeedMoreData);
        }

        loop {
            match self.state {
                ReaderState::Header => unreachable!("header state handled by poll_header"),
                ReaderState::PrevTagSize => {
                    if self.buffer.len() < PREV_TAG_SIZE_FIELD_SIZE {
                        return Ok(ReadOutcome::NeedMoreData);
                    }
                    let mut field = [0u8; PREV_TAG_SIZE_FIELD_SIZE];
                    field.copy_from_slice(&self.buffer[..PREV_TAG_SIZE_FIELD_SIZE]);
                    let prev_tag_size = framing::parse_prev_tag_size(field);
                    if prev_tag_size != self.expected_prev_tag_size {
                        trace!(
                            expected = self.expected_prev_tag_size,
                            got = prev_tag_size,
                            offset = self.offset,
                            "PreviousTagSize mismatch"
                        );
                    }
                    self.advance(PREV_TAG_SIZE_FIELD_SIZE);
                    self.state = ReaderState::TagHeader;
                }
                ReaderState::TagHeader => {
                    if self.buffer.len() < TAG_HEADER_SIZE {
                        return Ok(ReadOutcome::NeedMoreData);
                    }
                    let header = framing::parse_tag_header_bytes(self.header_bytes(0));
                    if !header.is_plausible() {
                        warn!(
                            offset = self.offset,
                            tag_type = %header.tag_type,
                            stream_id = header.stream_id,
                            "Corrupt FLV tag header, resynchronizing"
                        );
                        self.resync();
                        continue;
                    }

                    let tag_size = header.tag_size();
                    if self.buffer.len() < tag_size {
                        return Ok(ReadOutcome::NeedMoreData);
                    }

                    let mut raw = self.buffer.split_to(tag_size);
                    self.offset += tag_size as u64;
                    raw.advance(TAG_HEADER_SIZE);
                    let tag = FlvTag::from_parts(header, raw.freeze());

                    self.expected_prev_tag_size = tag_size as u32;
                    self.state = ReaderState::PrevTagSize;
                    return Ok(ReadOutcome::Tag(tag));
                }
            }
        }
    }

    fn header_bytes(&self, at: usize) -> [u8; TAG_HEADER_SIZE] {
        let mut bytes = [0u8; TAG_HEADER_SIZE];
        bytes.copy_from_slice(&self.buffer[at..at + TAG_HEADER_SIZE]);
        bytes
    }

    fn advance(&mut self, n: usize) {
        self.buffer.advance(n);
        self.offset += n as u64;
    }

    /// Drop bytes until the buffer starts at something that could be a tag
    /// header. A candidate too close to the end of the buffer to be checked
    /// is kept and re-examined once more data arrives.
    fn resync(&mut self) {
        let start_offset = self.offset;
        self.advance(1);

        let mut skip = self.buffer.len();
        for i in 0..self.buffer.len() {
            let tag_type = self.buffer[i] & 0x1F;
            if !matches!(tag_type, 8 | 9 | 18) {
                continue;
            }
            if i + TAG_HEADER_SIZE > self.buffer.len() {
                skip = i;
                break;
            }
            if framing::parse_tag_header_bytes(self.header_bytes(i)).is_plausible() {
                skip = i;
                break;
            }
        }
        self.advance(skip);

        let dropped = self.offset - start_offset;
        self.skipped_bytes += dropped;
        // The previous-size field is unknown after a jump.
        self.expected_prev_tag_size = 0;
        debug!(dropped, offset = self.offset, "FLV resync scan finished");
    }
}
