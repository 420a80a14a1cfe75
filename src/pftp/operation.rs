//! PFTP message layer
//!
//! Requests and queries travel inside RFC76 fragments:
//!
//! ```text
//! request  = [header length: u16 LE, bit 15 clear][operation header][data]
//! query    = [query id | 0x8000: u16 LE][params]
//! response = [error: u16 LE][payload]
//! ```
//!
//! The operation header and directory listings are protocol buffers. Only
//! the handful of fields used here are encoded, so a small varint codec is
//! enough.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{BleError, Result};

const QUERY_BIT: u16 = 0x8000;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LENGTH_DELIMITED: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Query id returning disk usage.
pub const QUERY_GET_DISK_SPACE: u16 = 14;

/// File operation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Command {
    Get,
    Put,
    Merge,
    Remove,
}

impl Command {
    fn to_varint(self) -> u64 {
        match self {
            Command::Get => 0,
            Command::Put => 1,
            Command::Merge => 2,
            Command::Remove => 3,
        }
    }
}

/// Operation header of a file request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub command: Command,
    pub path: String,
}

impl Operation {
    pub fn new(command: Command, path: impl Into<String>) -> Self {
        Self { command, path: path.into() }
    }

    /// Protobuf encoding `{1: command, 2: path}`.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        put_key(&mut out, 1, WIRE_VARINT);
        put_varint(&mut out, self.command.to_varint());
        put_key(&mut out, 2, WIRE_LENGTH_DELIMITED);
        put_varint(&mut out, self.path.len() as u64);
        out.put_slice(self.path.as_bytes());
        out.freeze()
    }
}

/// Frame an operation request.
pub fn encode_request(header: &[u8], data: &[u8]) -> Result<Bytes> {
    let header_len = u16::try_from(header.len())
        .ok()
        .filter(|len| len & QUERY_BIT == 0)
        .ok_or_else(|| BleError::invalid_argument(format!("PFTP header of {} bytes", header.len())))?;
    let mut out = BytesMut::with_capacity(2 + header.len() + data.len());
    out.put_u16_le(header_len);
    out.put_slice(header);
    out.put_slice(data);
    Ok(out.freeze())
}

/// Frame a query.
pub fn encode_query(id: u16, params: &[u8]) -> Result<Bytes> {
    if id & QUERY_BIT != 0 {
        return Err(BleError::invalid_argument(format!("PFTP query id {} out of range", id)));
    }
    let mut out = BytesMut::with_capacity(2 + params.len());
    out.put_u16_le(id | QUERY_BIT);
    out.put_slice(params);
    Ok(out.freeze())
}

/// Strip the error prefix of a response; non-zero errors fail.
pub fn decode_response(mut message: Bytes) -> Result<Bytes> {
    if message.len() < 2 {
        return Err(BleError::decode("PFTP response", format!("{} byte response has no error code", message.len())));
    }
    let code = message.get_u16_le();
    if code != 0 {
        return Err(BleError::Pftp { code });
    }
    Ok(message)
}

/// One entry of a directory listing. Directory names end with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
}

impl DirectoryEntry {
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Decode `{1: repeated entry {1: name, 2: size}}`.
pub fn decode_directory(data: &[u8]) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    for field in Fields::new(data) {
        if let (1, Value::Bytes(entry)) = field? {
            let mut name = None;
            let mut size = 0;
            for inner in Fields::new(entry) {
                match inner? {
                    (1, Value::Bytes(bytes)) => {
                        name = Some(
                            std::str::from_utf8(bytes)
                                .map_err(|e| BleError::decode("PFTP directory entry", e.to_string()))?
                                .to_string(),
                        )
                    }
                    (2, Value::Varint(v)) => size = v,
                    _ => {}
                }
            }
            let name = name.ok_or_else(|| BleError::decode("PFTP directory entry", "entry without a name"))?;
            entries.push(DirectoryEntry { name, size });
        }
    }
    Ok(entries)
}

/// Device storage usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct DiskSpace {
    pub fragment_size: u64,
    pub total_fragments: u64,
    pub free_fragments: u64,
}

impl DiskSpace {
    /// Decode `{1: fragment_size, 2: total_fragments, 3: free_fragments}`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut space = DiskSpace::default();
        for field in Fields::new(data) {
            match field? {
                (1, Value::Varint(v)) => space.fragment_size = v,
                (2, Value::Varint(v)) => space.total_fragments = v,
                (3, Value::Varint(v)) => space.free_fragments = v,
                _ => {}
            }
        }
        Ok(space)
    }

    pub fn total_bytes(&self) -> u64 {
        self.fragment_size.saturating_mul(self.total_fragments)
    }

    pub fn free_bytes(&self) -> u64 {
        self.fragment_size.saturating_mul(self.free_fragments)
    }
}

fn put_key(out: &mut BytesMut, field: u32, wire_type: u8) {
    put_varint(out, ((field as u64) << 3) | wire_type as u64);
}

fn put_varint(out: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

fn get_varint(data: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *data.first().ok_or_else(|| BleError::decode("protobuf varint", "truncated varint"))?;
        data.advance(1);
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(BleError::decode("protobuf varint", "varint longer than 10 bytes"))
}

enum Value<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    Fixed,
}

/// Iterator over `(field number, value)` pairs of one message.
struct Fields<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, failed: false }
    }

    fn next_field(&mut self) -> Result<(u32, Value<'a>)> {
        let key = get_varint(&mut self.data)?;
        let field = (key >> 3) as u32;
        let value = match (key & 0x07) as u8 {
            WIRE_VARINT => Value::Varint(get_varint(&mut self.data)?),
            WIRE_LENGTH_DELIMITED => {
                let len = get_varint(&mut self.data)? as usize;
                if len > self.data.len() {
                    return Err(BleError::decode(
                        "protobuf field",
                        format!("field {} claims {} bytes, {} left", field, len, self.data.len()),
                    ));
                }
                let (bytes, rest) = self.data.split_at(len);
                self.data = rest;
                Value::Bytes(bytes)
            }
            wire @ (WIRE_FIXED64 | WIRE_FIXED32) => {
                let len = if wire == WIRE_FIXED64 { 8 } else { 4 };
                if len > self.data.len() {
                    return Err(BleError::decode("protobuf field", format!("truncated fixed field {}", field)));
                }
                self.data.advance(len);
                Value::Fixed
            }
            other => {
                return Err(BleError::decode("protobuf field", format!("unsupported wire type {}", other)));
            }
        };
        Ok((field, value))
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<(u32, Value<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.is_empty() {
            return None;
        }
        let field = self.next_field();
        self.failed = field.is_err();
        Some(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64) -> Vec<u8> {
        let mut inner = BytesMut::new();
        put_key(&mut inner, 1, WIRE_LENGTH_DELIMITED);
        put_varint(&mut inner, name.len() as u64);
        inner.put_slice(name.as_bytes());
        put_key(&mut inner, 2, WIRE_VARINT);
        put_varint(&mut inner, size);

        let mut out = BytesMut::new();
        put_key(&mut out, 1, WIRE_LENGTH_DELIMITED);
        put_varint(&mut out, inner.len() as u64);
        out.put_slice(&inner);
        out.to_vec()
    }

    #[test]
    fn operation_header_encoding() {
        let header = Operation::new(Command::Get, "/U/0/").encode();
        assert_eq!(&header[..], &[0x08, 0x00, 0x12, 0x05, b'/', b'U', b'/', b'0', b'/']);
    }

    #[test]
    fn request_and_query_framing() {
        let request = encode_request(&[0xAA, 0xBB], &[0x01]).unwrap();
        assert_eq!(&request[..], &[0x02, 0x00, 0xAA, 0xBB, 0x01]);

        let query = encode_query(QUERY_GET_DISK_SPACE, &[]).unwrap();
        assert_eq!(&query[..], &[0x0E, 0x80]);
        assert!(encode_query(0x8001, &[]).is_err());
        assert!(encode_request(&vec![0; 0x8000], &[]).is_err());
    }

    #[test]
    fn response_error_prefix() {
        let ok = decode_response(Bytes::from_static(&[0x00, 0x00, 0x42])).unwrap();
        assert_eq!(&ok[..], &[0x42]);
        assert!(matches!(decode_response(Bytes::from_static(&[0x67, 0x00])), Err(BleError::Pftp { code: 103 })));
        assert!(matches!(decode_response(Bytes::from_static(&[0x00])), Err(BleError::Decode { .. })));
    }

    #[test]
    fn directory_listing() {
        let mut data = entry("DEVICE.BPB", 300);
        data.extend(entry("U/", 0));
        let entries = decode_directory(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], DirectoryEntry { name: "DEVICE.BPB".into(), size: 300 });
        assert!(entries[1].is_directory());
    }

    #[test]
    fn truncated_listing_is_decode_error() {
        let data = entry("FILE.BIN", 1);
        assert!(decode_directory(&data[..data.len() - 2]).is_err());
    }

    #[test]
    fn disk_space_fields() {
        let mut data = BytesMut::new();
        for (field, value) in [(1, 4096u64), (2, 1000), (3, 250)] {
            put_key(&mut data, field, WIRE_VARINT);
            put_varint(&mut data, value);
        }
        let space = DiskSpace::decode(&data).unwrap();
        assert_eq!(space.total_bytes(), 4_096_000);
        assert_eq!(space.free_bytes(), 1_024_000);
    }

    #[test]
    fn varint_multi_byte() {
        let mut out = BytesMut::new();
        put_varint(&mut out, 300);
        assert_eq!(&out[..], &[0xAC, 0x02]);
        let mut slice: &[u8] = &out;
        assert_eq!(get_varint(&mut slice).unwrap(), 300);
        assert!(slice.is_empty());
    }
}
