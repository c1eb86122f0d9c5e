//! FLV container primitives: file header, tag framing, AMF0 script data and
//! an incremental tag reader for data that arrives in arbitrary pieces.

pub mod error;
pub mod framing;
pub mod header;
pub mod reader;
pub mod script;
pub mod tag;

pub use error::{FlvError, ScriptError};
pub use header::{FlvHeader, SignatureCheck};
pub use reader::{FlvTagReader, ReadOutcome};
pub use script::{ScriptData, ScriptValue};
pub use tag::{FlvTag, FlvTagType};
