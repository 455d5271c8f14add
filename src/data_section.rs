//! MMDB data section encoding and decoding
//!
//! Implements the MaxMind DB data type encoding used for both the records
//! attached to networks and the metadata map at the end of the file.
//!
//! # Format
//!
//! Every value starts with a control byte: 3 bits of type and 5 bits of
//! size/payload. Types above 7 are "extended": the control byte carries
//! type 0 and the following byte holds `type - 7`. Sizes of 29 or more spill
//! into 1-3 extra bytes.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Data value that can be stored in the data section
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// Pointer to another data item (only seen while decoding)
    Pointer(u32),
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys, encoded in key order)
    Map(BTreeMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Widen any unsigned integer variant to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the map payload
    pub fn as_map(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

const TYPE_EXTENDED: u8 = 0;
const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical values get the same offset.
pub struct DataEncoder {
    buffer: Vec<u8>,
    dedup_map: FxHashMap<Vec<u8>, u32>,
}

impl DataEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: FxHashMap::default(),
        }
    }

    /// Encode a value and return its offset
    ///
    /// If the value was previously encoded, returns the existing offset.
    pub fn encode(&mut self, value: &DataValue) -> u32 {
        let mut temp = Vec::new();
        Self::encode_to_buffer(value, &mut temp);

        if let Some(&offset) = self.dedup_map.get(&temp) {
            return offset;
        }

        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(&temp);
        self.dedup_map.insert(temp, offset);
        offset
    }

    /// Encoded bytes so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current buffer size
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of distinct values stored
    pub fn unique_values(&self) -> usize {
        self.dedup_map.len()
    }

    /// Encode a value without deduplication
    pub fn encode_to_buffer(value: &DataValue, buffer: &mut Vec<u8>) {
        match value {
            DataValue::Pointer(offset) => Self::encode_pointer(*offset, buffer),
            DataValue::String(s) => {
                Self::write_control(TYPE_STRING, s.len(), buffer);
                buffer.extend_from_slice(s.as_bytes());
            }
            DataValue::Double(d) => {
                Self::write_control(TYPE_DOUBLE, 8, buffer);
                buffer.extend_from_slice(&d.to_be_bytes());
            }
            DataValue::Bytes(b) => {
                Self::write_control(TYPE_BYTES, b.len(), buffer);
                buffer.extend_from_slice(b);
            }
            DataValue::Uint16(n) => Self::encode_uint(TYPE_UINT16, &n.to_be_bytes(), buffer),
            DataValue::Uint32(n) => Self::encode_uint(TYPE_UINT32, &n.to_be_bytes(), buffer),
            DataValue::Map(m) => {
                Self::write_control(TYPE_MAP, m.len(), buffer);
                for (key, value) in m {
                    Self::write_control(TYPE_STRING, key.len(), buffer);
                    buffer.extend_from_slice(key.as_bytes());
                    Self::encode_to_buffer(value, buffer);
                }
            }
            DataValue::Int32(n) => {
                Self::write_control(TYPE_INT32, 4, buffer);
                buffer.extend_from_slice(&n.to_be_bytes());
            }
            DataValue::Uint64(n) => Self::encode_uint(TYPE_UINT64, &n.to_be_bytes(), buffer),
            DataValue::Uint128(n) => Self::encode_uint(TYPE_UINT128, &n.to_be_bytes(), buffer),
            DataValue::Array(a) => {
                Self::write_control(TYPE_ARRAY, a.len(), buffer);
                for value in a {
                    Self::encode_to_buffer(value, buffer);
                }
            }
            // The size field carries the value
            DataValue::Bool(b) => Self::write_control(TYPE_BOOL, *b as usize, buffer),
            DataValue::Float(f) => {
                Self::write_control(TYPE_FLOAT, 4, buffer);
                buffer.extend_from_slice(&f.to_be_bytes());
            }
        }
    }

    /// Unsigned integers drop their leading zero bytes
    fn encode_uint(type_id: u8, be_bytes: &[u8], buffer: &mut Vec<u8>) {
        let skip = be_bytes.iter().take_while(|b| **b == 0).count();
        let payload = &be_bytes[skip..];
        Self::write_control(type_id, payload.len(), buffer);
        buffer.extend_from_slice(payload);
    }

    fn encode_pointer(offset: u32, buffer: &mut Vec<u8>) {
        let type_bits = TYPE_POINTER << 5;
        if offset < 0x800 {
            buffer.push(type_bits | ((offset >> 8) & 0x7) as u8);
            buffer.push(offset as u8);
        } else if offset < 0x80800 {
            let adjusted = offset - 0x800;
            buffer.push(type_bits | (1 << 3) | ((adjusted >> 16) & 0x7) as u8);
            buffer.extend_from_slice(&(adjusted as u16).to_be_bytes());
        } else if offset < 0x8080800 {
            let adjusted = offset - 0x80800;
            buffer.push(type_bits | (2 << 3) | ((adjusted >> 24) & 0x7) as u8);
            buffer.extend_from_slice(&adjusted.to_be_bytes()[1..]);
        } else {
            buffer.push(type_bits | (3 << 3));
            buffer.extend_from_slice(&offset.to_be_bytes());
        }
    }

    /// Write control byte(s) for a type and size
    fn write_control(type_id: u8, size: usize, buffer: &mut Vec<u8>) {
        let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
            (size as u8, Vec::new())
        } else if size < 29 + 256 {
            (29, vec![(size - 29) as u8])
        } else if size < 29 + 256 + 65536 {
            (30, ((size - 285) as u16).to_be_bytes().to_vec())
        } else {
            (31, ((size - 65821) as u32).to_be_bytes()[1..].to_vec())
        };

        if type_id > 7 {
            buffer.push((TYPE_EXTENDED << 5) | size_bits);
            buffer.push(type_id - 7);
        } else {
            buffer.push((type_id << 5) | size_bits);
        }
        buffer.extend_from_slice(&extra);
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Nesting limit while following pointers and containers
const MAX_DEPTH: usize = 64;

/// Data section decoder
///
/// Decodes values from an encoded data section. Pointers are followed, so
/// callers never see [`DataValue::Pointer`].
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder over a data section
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode the value at `offset` (relative to the section start)
    pub fn decode(&self, offset: u32) -> Result<DataValue, String> {
        let mut cursor = offset as usize;
        self.decode_at(&mut cursor, 0)
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<DataValue, String> {
        if depth > MAX_DEPTH {
            return Err("Data nesting too deep".to_string());
        }

        let ctrl = self.read_byte(cursor)?;
        let mut type_id = ctrl >> 5;

        if type_id == TYPE_POINTER {
            let target = self.decode_pointer(cursor, ctrl)?;
            let mut target_cursor = target as usize;
            return self.decode_at(&mut target_cursor, depth + 1);
        }

        if type_id == TYPE_EXTENDED {
            type_id = self
                .read_byte(cursor)?
                .checked_add(7)
                .ok_or_else(|| "Invalid extended type".to_string())?;
            if type_id <= 7 {
                return Err(format!("Invalid extended type {}", type_id));
            }
        }

        let size = self.decode_size(cursor, ctrl & 0x1F)?;

        match type_id {
            TYPE_STRING => {
                let bytes = self.take(cursor, size)?;
                let s = std::str::from_utf8(bytes).map_err(|_| "Invalid UTF-8".to_string())?;
                Ok(DataValue::String(s.to_string()))
            }
            TYPE_DOUBLE => {
                if size != 8 {
                    return Err(format!("Invalid double size {}", size));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(self.take(cursor, 8)?);
                Ok(DataValue::Double(f64::from_be_bytes(bytes)))
            }
            TYPE_BYTES => Ok(DataValue::Bytes(self.take(cursor, size)?.to_vec())),
            TYPE_UINT16 => Ok(DataValue::Uint16(self.read_uint(cursor, size, 2)? as u16)),
            TYPE_UINT32 => Ok(DataValue::Uint32(self.read_uint(cursor, size, 4)? as u32)),
            TYPE_MAP => {
                let mut map = BTreeMap::new();
                for _ in 0..size {
                    let key = match self.decode_at(cursor, depth + 1)? {
                        DataValue::String(key) => key,
                        other => return Err(format!("Map key is not a string: {:?}", other)),
                    };
                    let value = self.decode_at(cursor, depth + 1)?;
                    map.insert(key, value);
                }
                Ok(DataValue::Map(map))
            }
            TYPE_INT32 => Ok(DataValue::Int32(self.read_uint(cursor, size, 4)? as u32 as i32)),
            TYPE_UINT64 => Ok(DataValue::Uint64(self.read_uint(cursor, size, 8)? as u64)),
            TYPE_UINT128 => Ok(DataValue::Uint128(self.read_uint(cursor, size, 16)?)),
            TYPE_ARRAY => {
                let mut items = Vec::with_capacity(size.min(1024));
                for _ in 0..size {
                    items.push(self.decode_at(cursor, depth + 1)?);
                }
                Ok(DataValue::Array(items))
            }
            TYPE_BOOL => match size {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                _ => Err(format!("Invalid bool size {}", size)),
            },
            TYPE_FLOAT => {
                if size != 4 {
                    return Err(format!("Invalid float size {}", size));
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(self.take(cursor, 4)?);
                Ok(DataValue::Float(f32::from_be_bytes(bytes)))
            }
            _ => Err(format!("Unknown data type {}", type_id)),
        }
    }

    fn decode_pointer(&self, cursor: &mut usize, ctrl: u8) -> Result<u32, String> {
        let size = (ctrl >> 3) & 0x3;
        let high = (ctrl & 0x7) as u32;
        let offset = match size {
            0 => (high << 8) | self.read_uint(cursor, 1, 1)? as u32,
            1 => ((high << 16) | self.read_uint(cursor, 2, 2)? as u32) + 0x800,
            2 => ((high << 24) | self.read_uint(cursor, 3, 3)? as u32) + 0x80800,
            _ => self.read_uint(cursor, 4, 4)? as u32,
        };
        Ok(offset)
    }

    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize, String> {
        let size = match size_bits {
            0..=28 => size_bits as usize,
            29 => 29 + self.read_uint(cursor, 1, 1)? as usize,
            30 => 285 + self.read_uint(cursor, 2, 2)? as usize,
            _ => 65821 + self.read_uint(cursor, 3, 3)? as usize,
        };
        Ok(size)
    }

    fn read_uint(&self, cursor: &mut usize, size: usize, max: usize) -> Result<u128, String> {
        if size > max {
            return Err(format!("Integer size {} exceeds {} bytes", size, max));
        }
        Ok(self
            .take(cursor, size)?
            .iter()
            .fold(0u128, |acc, b| (acc << 8) | *b as u128))
    }

    fn read_byte(&self, cursor: &mut usize) -> Result<u8, String> {
        Ok(self.take(cursor, 1)?[0])
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8], String> {
        let end = cursor
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| format!("Data at offset {} out of bounds", cursor))?;
        let buffer: &'a [u8] = self.buffer;
        let bytes = &buffer[*cursor..end];
        *cursor = end;
        Ok(bytes)
    }
}
