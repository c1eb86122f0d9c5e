use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid FLV header: {0}")]
    InvalidHeader(String),

    #[error("{tag_type} tag (filtered: {filtered}) does not carry script data")]
    NotScriptData {
        tag_type: crate::tag::FlvTagType,
        filtered: bool,
    },

    #[error("script data error: {0}")]
    Script(#[from] ScriptError),
}

/// Errors raised while decoding AMF0 script data carried in FLV script tags.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unexpected end of script data")]
    UnexpectedEof,

    #[error("unknown AMF0 marker: 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("unsupported AMF0 marker: 0x{0:02x}")]
    UnsupportedMarker(u8),

    #[error("script data nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("script data name is not a string")]
    MissingName,

    #[error("invalid UTF-8 in script string: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}
