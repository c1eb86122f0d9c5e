//! AMF0 script data carried by FLV script tags.
//!
//! Only the subset of AMF0 that muxers actually emit in `onMetaData` is
//! decoded: numbers, booleans, strings, objects, ECMA arrays, strict arrays,
//! dates, null and undefined. Values are owned so they can outlive the tag
//! buffer they were decoded from.

use crate::error::ScriptError;

const MAX_DEPTH: usize = 16;

/// AMF0 marker bytes (amf0_spec_121207.pdf section 2.1).
mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0a;
    pub const DATE: u8 = 0x0b;
    pub const LONG_STRING: u8 = 0x0c;
    pub const LAST_KNOWN: u8 = 0x11;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, ScriptValue)>),
    EcmaArray(Vec<(String, ScriptValue)>),
    StrictArray(Vec<ScriptValue>),
    Date { timestamp: f64, timezone: i16 },
    Null,
    Undefined,
}

impl ScriptValue {
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Property list of an `Object` or `EcmaArray`.
    #[inline]
    pub fn properties(&self) -> Option<&[(String, ScriptValue)]> {
        match self {
            Self::Object(props) | Self::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    /// Look up a property by key on an `Object` or `EcmaArray`.
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.properties()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// A decoded script tag body: a name (usually `onMetaData`) and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptData {
    pub name: String,
    pub value: ScriptValue,
}

impl ScriptData {
    pub fn demux(data: &[u8]) -> Result<Self, ScriptError> {
        let mut decoder = ScriptDecoder::new(data);
        let name = match decoder.decode(0)? {
            ScriptValue::String(name) => name,
            _ => return Err(ScriptError::MissingName),
        };
        // Some muxers write a name with no value.
        let value = if decoder.is_empty() {
            ScriptValue::Null
        } else {
            decoder.decode(0)?
        };
        Ok(ScriptData { name, value })
    }

    /// Encode back to AMF0. Dates and long strings are written in their
    /// canonical short forms where possible.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_value(&ScriptValue::String(self.name.clone()), &mut out);
        encode_value(&self.value, &mut out);
        out
    }
}

struct ScriptDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ScriptDecoder<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    const fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ScriptError> {
        let end = self.pos.checked_add(len).ok_or(ScriptError::UnexpectedEof)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(ScriptError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ScriptError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, ScriptError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ScriptError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, ScriptError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, ScriptError> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    fn read_string(&mut self, long: bool) -> Result<String, ScriptError> {
        let len = if long {
            self.read_u32()? as usize
        } else {
            self.read_u16()? as usize
        };
        let bytes = self.read_bytes(len)?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    /// Consume an object-end sequence (`00 00 09`) if one is next.
    fn eat_object_end(&mut self) -> bool {
        if self.data.get(self.pos..self.pos + 3) == Some(&[0, 0, marker::OBJECT_END]) {
            self.pos += 3;
            true
        } else {
            false
        }
    }

    fn decode(&mut self, depth: usize) -> Result<ScriptValue, ScriptError> {
        if depth > MAX_DEPTH {
            return Err(ScriptError::TooDeep(MAX_DEPTH));
        }

        let marker = self.read_u8()?;
        match marker {
            marker::NUMBER => Ok(ScriptValue::Number(self.read_f64()?)),
            marker::BOOLEAN => Ok(ScriptValue::Boolean(self.read_u8()? != 0)),
            marker::STRING => Ok(ScriptValue::String(self.read_string(false)?)),
            marker::LONG_STRING => Ok(ScriptValue::String(self.read_string(true)?)),
            marker::NULL => Ok(ScriptValue::Null),
            marker::UNDEFINED => Ok(ScriptValue::Undefined),
            marker::OBJECT => {
                let mut props = Vec::new();
                while !self.eat_object_end() {
                    let key = self.read_string(false)?;
                    props.push((key, self.decode(depth + 1)?));
                }
                Ok(ScriptValue::Object(props))
            }
            marker::ECMA_ARRAY => {
                // The count is only a hint; real files disagree with it often
                // enough that the object-end marker is the authority.
                let _count = self.read_u32()?;
                let mut props = Vec::new();
                while !self.is_empty() && !self.eat_object_end() {
                    let key = self.read_string(false)?;
                    props.push((key, self.decode(depth + 1)?));
                }
                Ok(ScriptValue::EcmaArray(props))
            }
            marker::STRICT_ARRAY => {
                let len = self.read_u32()? as usize;
                // Each element takes at least one byte.
                let mut values = Vec::with_capacity(len.min(self.data.len() - self.pos));
                for _ in 0..len {
                    values.push(self.decode(depth + 1)?);
                }
                Ok(ScriptValue::StrictArray(values))
            }
            marker::DATE => {
                let timestamp = self.read_f64()?;
                let timezone = i16::from_be_bytes(self.read_array()?);
                Ok(ScriptValue::Date {
                    timestamp,
                    timezone,
                })
            }
            other if other <= marker::LAST_KNOWN => Err(ScriptError::UnsupportedMarker(other)),
            other => Err(ScriptError::UnknownMarker(other)),
        }
    }
}

fn encode_string_body(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn encode_value(value: &ScriptValue, out: &mut Vec<u8>) {
    match value {
        ScriptValue::Number(n) => {
            out.push(marker::NUMBER);
            out.extend_from_slice(&n.to_be_bytes());
        }
        ScriptValue::Boolean(b) => {
            out.push(marker::BOOLEAN);
            out.push(u8::from(*b));
        }
        ScriptValue::String(s) if s.len() <= u16::MAX as usize => {
            out.push(marker::STRING);
            encode_string_body(s, out);
        }
        ScriptValue::String(s) => {
            out.push(marker::LONG_STRING);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        ScriptValue::Object(props) | ScriptValue::EcmaArray(props) => {
            if matches!(value, ScriptValue::Object(_)) {
                out.push(marker::OBJECT);
            } else {
                out.push(marker::ECMA_ARRAY);
                out.extend_from_slice(&(props.len() as u32).to_be_bytes());
            }
            for (key, value) in props {
                encode_string_body(key, out);
                encode_value(value, out);
            }
            out.extend_from_slice(&[0, 0, marker::OBJECT_END]);
        }
        ScriptValue::StrictArray(values) => {
            out.push(marker::STRICT_ARRAY);
            out.extend_from_slice(&(values.len() as u32).to_be_bytes());
            for value in values {
                encode_value(value, out);
            }
        }
        ScriptValue::Date {
            timestamp,
            timezone,
        } => {
            out.push(marker::DATE);
            out.extend_from_slice(&timestamp.to_be_bytes());
            out.extend_from_slice(&timezone.to_be_bytes());
        }
        ScriptValue::Null => out.push(marker::NULL),
        ScriptValue::Undefined => out.push(marker::UNDEFINED),
    }
}
