//! Fixed-width integer encoding and bucket-path conventions for KV keys.
//!
//! Inode ids are encoded big-endian so lexical key order matches numeric
//! order, using `zerocopy::byteorder::big_endian::{U16, U32, U64}` the way
//! on-disk fixed-width fields are parsed elsewhere in this crate. Values
//! use the `integer-encoding` crate's zig-zag/unsigned varints rather than
//! hand-rolling LEB128.

use integer_encoding::VarInt;
use zerocopy::byteorder::big_endian::U32;
use zerocopy::IntoBytes;

/// Encode an inode id as a 4-byte big-endian key.
pub fn encode_ino_key(ino: u32) -> [u8; 4] {
    U32::new(ino).as_bytes().try_into().expect("4 bytes")
}

/// Decode a 4-byte big-endian inode id key.
pub fn decode_ino_key(bytes: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

/// Encode a signed 64-bit value (e.g. `size`) with zig-zag varint encoding.
pub fn encode_i64(v: i64) -> Vec<u8> {
    v.encode_var_vec()
}

pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
    i64::decode_var(bytes).map(|(v, _)| v)
}

/// Encode an unsigned value (e.g. `mode`, `numLink`) with unsigned varint
/// encoding.
pub fn encode_u64(v: u64) -> Vec<u8> {
    v.encode_var_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    u64::decode_var(bytes).map(|(v, _)| v)
}

pub fn encode_u32(v: u32) -> Vec<u8> {
    encode_u64(v as u64)
}

pub fn decode_u32(bytes: &[u8]) -> Option<u32> {
    decode_u64(bytes).map(|v| v as u32)
}
