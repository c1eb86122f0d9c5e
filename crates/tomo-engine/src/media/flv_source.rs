use flv::{FlvHeader, FlvTag, FlvTagReader, FlvTagType, ReadOutcome, SignatureCheck};
use tracing::{debug, warn};

use super::{Acceptance, MediaTag, MediaTagSource, TagPoll};
use crate::error::ContainerError;

const CONTAINER: &str = "flv";

/// [`MediaTagSource`] backed by the incremental FLV reader.
#[derive(Debug, Default)]
pub struct FlvTagSource {
    reader: FlvTagReader,
}

impl FlvTagSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn convert(tag: FlvTag) -> Option<MediaTag> {
        match tag.tag_type {
            FlvTagType::Audio => Some(MediaTag::Audio {
                timestamp_ms: tag.timestamp_ms,
            }),
            FlvTagType::Video => Some(MediaTag::Video {
                timestamp_ms: tag.timestamp_ms,
            }),
            FlvTagType::ScriptData => match tag.decode_script() {
                Ok(script) => {
                    let fields = script
                        .value
                        .properties()
                        .map(|props| props.iter().cloned().collect())
                        .unwrap_or_default();
                    Some(MediaTag::Metadata {
                        name: script.name,
                        fields,
                    })
                }
                Err(e) => {
                    warn!(error = %e, timestamp_ms = tag.timestamp_ms, "Undecodable script tag");
                    None
                }
            },
            FlvTagType::Unknown(kind) => {
                debug!(kind, "Skipping unknown FLV tag");
                None
            }
        }
    }
}

impl MediaTagSource for FlvTagSource {
    fn container_name(&self) -> &'static str {
        CONTAINER
    }

    fn mime_type(&self) -> &'static str {
        crate::probe::FLV_MIME
    }

    fn accepts(&mut self, leading_bytes: &[u8]) -> Result<Acceptance, ContainerError> {
        match FlvHeader::check_signature(leading_bytes) {
            SignatureCheck::Mismatch => {
                return Err(ContainerError::malformed(CONTAINER, "missing FLV signature"));
            }
            SignatureCheck::Partial => return Ok(Acceptance::NeedMoreData),
            SignatureCheck::Match => {}
        }
        match FlvHeader::parse(leading_bytes) {
            Ok(Some(header)) => {
                debug!(header = %header, "Stream accepted as FLV");
                Ok(Acceptance::Accepted)
            }
            Ok(None) => Ok(Acceptance::NeedMoreData),
            Err(e) => Err(ContainerError::malformed(CONTAINER, e.to_string())),
        }
    }

    fn feed(&mut self, data: &[u8]) {
        self.reader.push(data);
    }

    fn next_tag(&mut self) -> Result<TagPoll, ContainerError> {
        loop {
            let outcome = self
                .reader
                .next_tag()
                .map_err(|e| ContainerError::malformed(CONTAINER, e.to_string()))?;
            match outcome {
                ReadOutcome::NeedMoreData => return Ok(TagPoll::Famished),
                ReadOutcome::Tag(tag) => {
                    if let Some(tag) = Self::convert(tag) {
                        return Ok(TagPoll::Tag(tag));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flv::{ScriptData, ScriptValue};

    fn tag(tag_type: FlvTagType, timestamp_ms: u32, payload: Vec<u8>) -> FlvTag {
        FlvTag {
            timestamp_ms,
            stream_id: 0,
            tag_type,
            is_filtered: false,
            data: Bytes::from(payload),
        }
    }

    fn on_metadata() -> Vec<u8> {
        ScriptData {
            name: "onMetaData".into(),
            value: ScriptValue::EcmaArray(vec![
                ("duration".into(), ScriptValue::Number(120.5)),
                ("totaldatarate".into(), ScriptValue::Number(800.0)),
            ]),
        }
        .encode()
    }

    fn drain(source: &mut FlvTagSource) -> Vec<MediaTag> {
        let mut tags = Vec::new();
        while let TagPoll::Tag(tag) = source.next_tag().unwrap() {
            tags.push(tag);
        }
        tags
    }

    #[test]
    fn test_accepts_needs_full_header() {
        let mut source = FlvTagSource::new();
        let header = FlvHeader::new(true, true).to_bytes();
        assert_eq!(source.accepts(&[]).unwrap(), Acceptance::NeedMoreData);
        assert_eq!(source.accepts(&header[..2]).unwrap(), Acceptance::NeedMoreData);
        assert_eq!(source.accepts(&header[..5]).unwrap(), Acceptance::NeedMoreData);
        assert_eq!(source.accepts(&header).unwrap(), Acceptance::Accepted);
    }

    #[test]
    fn test_rejects_other_containers() {
        let mut source = FlvTagSource::new();
        assert!(source.accepts(b"\x1a\x45\xdf\xa3").is_err());
        assert!(source.accepts(b"\x00\x00\x00\x20ftypisom").is_err());
    }

    #[test]
    fn test_tags_in_order() {
        let mut data = FlvHeader::new(true, true).to_bytes().to_vec();
        data.extend_from_slice(&0u32.to_be_bytes());
        for tag in [
            tag(FlvTagType::ScriptData, 0, on_metadata()),
            tag(FlvTagType::Video, 0, vec![0x17, 0x00]),
            tag(FlvTagType::Audio, 21, vec![0xaf, 0x01]),
        ] {
            data.extend_from_slice(&tag.to_bytes_with_trailer());
        }

        let mut source = FlvTagSource::new();
        let (head, rest) = data.split_at(30);
        source.feed(head);
        let mut tags = drain(&mut source);
        source.feed(rest);
        tags.extend(drain(&mut source));

        assert_eq!(tags.len(), 3);
        match &tags[0] {
            MediaTag::Metadata { name, fields } => {
                assert_eq!(name, "onMetaData");
                assert_eq!(fields["duration"].as_number(), Some(120.5));
                assert_eq!(fields["totaldatarate"].as_number(), Some(800.0));
            }
            other => panic!("expected metadata, got {other:?}"),
        }
        assert_eq!(tags[1], MediaTag::Video { timestamp_ms: 0 });
        assert_eq!(tags[2], MediaTag::Audio { timestamp_ms: 21 });
    }

    #[test]
    fn test_broken_script_tag_is_skipped() {
        let mut data = FlvHeader::new(true, false).to_bytes().to_vec();
        data.extend_from_slice(&0u32.to_be_bytes());
        // A string marker with a truncated length field.
        let broken = tag(FlvTagType::ScriptData, 0, vec![0x02, 0xff]);
        data.extend_from_slice(&broken.to_bytes_with_trailer());
        data.extend_from_slice(&tag(FlvTagType::Audio, 46, vec![0xaf]).to_bytes_with_trailer());

        let mut source = FlvTagSource::new();
        source.feed(&data);
        assert_eq!(drain(&mut source), vec![MediaTag::Audio { timestamp_ms: 46 }]);
    }
}
