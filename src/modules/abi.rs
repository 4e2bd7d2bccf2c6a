use std::fmt;
use std::fmt::Display;

use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::modules::keccak::keccak_bytes;
use crate::modules::types::{pad_left_prime_vec, ByteString, W256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AbiType {
  AbiUIntType(usize),
  AbiIntType(usize),
  AbiAddressType,
  AbiBoolType,
  AbiBytesType(usize),
  AbiBytesDynamicType,
  AbiStringType,
  AbiArrayDynamicType(Box<AbiType>),
  AbiArrayType(usize, Box<AbiType>),
}

impl Display for AbiType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AbiType::AbiUIntType(n) => write!(f, "uint{}", n),
      AbiType::AbiIntType(n) => write!(f, "int{}", n),
      AbiType::AbiAddressType => write!(f, "address"),
      AbiType::AbiBoolType => write!(f, "bool"),
      AbiType::AbiBytesType(n) => write!(f, "bytes{}", n),
      AbiType::AbiBytesDynamicType => write!(f, "bytes"),
      AbiType::AbiStringType => write!(f, "string"),
      AbiType::AbiArrayDynamicType(t) => write!(f, "{}[]", t),
      AbiType::AbiArrayType(n, t) => write!(f, "{}[{}]", t, n),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbiValue {
  AbiUInt(usize, W256),
  AbiAddress(W256),
  AbiBool(bool),
  AbiBytes32(W256),
  AbiBytesDynamic(ByteString),
  AbiString(ByteString),
}

/// The first four bytes of the keccak of a signature string.
pub fn selector(sig: &str) -> Vec<u8> {
  let hash = keccak_bytes(sig.as_bytes());
  let mut out = Vec::with_capacity(4);
  let word = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
  // Written through byteorder so the encoding intent is explicit.
  out.write_u32::<BigEndian>(word).unwrap_or_default();
  out
}

pub fn selector_word(sig: &str) -> u32 {
  let hash = keccak_bytes(sig.as_bytes());
  u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]])
}

fn encode_word(w: W256) -> Vec<u8> {
  w.to_be_bytes().to_vec()
}

fn ceil32(n: usize) -> usize {
  (n + 31) / 32 * 32
}

/// Head/tail encoding of a static-or-single-dynamic tuple, which is all the
/// cheatcode surface needs.
pub fn abi_encode(values: &[AbiValue]) -> Vec<u8> {
  let mut head: Vec<Vec<u8>> = Vec::new();
  let mut tail: Vec<u8> = Vec::new();
  let head_size = values.len() * 32;
  for v in values {
    match v {
      AbiValue::AbiUInt(_, w) => head.push(encode_word(*w)),
      AbiValue::AbiAddress(a) => head.push(encode_word(*a)),
      AbiValue::AbiBool(b) => {
        head.push(encode_word(if *b { W256::one() } else { W256::zero() }))
      }
      AbiValue::AbiBytes32(w) => head.push(encode_word(*w)),
      AbiValue::AbiBytesDynamic(bs) | AbiValue::AbiString(bs) => {
        head.push(encode_word(W256((head_size + tail.len()) as u128, 0)));
        tail.extend(encode_word(W256(bs.len() as u128, 0)));
        let mut padded = bs.clone();
        padded.resize(ceil32(bs.len()), 0);
        tail.extend(padded);
      }
    }
  }
  let mut out: Vec<u8> = head.into_iter().flatten().collect();
  out.extend(tail);
  out
}

/// The revert payload Solidity produces for `revert("msg")`.
pub fn encode_error_string(msg: &str) -> Vec<u8> {
  let mut out = selector("Error(string)");
  out.extend(abi_encode(&[AbiValue::AbiString(msg.as_bytes().to_vec())]));
  out
}

fn read_word_at(data: &[u8], off: usize) -> Option<W256> {
  if off + 32 > data.len() {
    return None;
  }
  Some(W256::from_bytes(data[off..off + 32].to_vec()))
}

fn read_usize_at(data: &[u8], off: usize) -> Option<usize> {
  let w = read_word_at(data, off)?;
  if w.fits_u64() && w.as_u64() <= usize::MAX as u64 {
    Some(w.as_u64() as usize)
  } else {
    None
  }
}

/// Decode a `string[]` argument from post-selector calldata.
pub fn decode_string_array(data: &[u8]) -> Option<Vec<String>> {
  let array_off = read_usize_at(data, 0)?;
  let count = read_usize_at(data, array_off)?;
  let base = array_off + 32;
  let mut out = Vec::with_capacity(count);
  for i in 0..count {
    let elem_off = base + read_usize_at(data, base + i * 32)?;
    let len = read_usize_at(data, elem_off)?;
    if elem_off + 32 + len > data.len() {
      return None;
    }
    let bytes = data[elem_off + 32..elem_off + 32 + len].to_vec();
    out.push(String::from_utf8(bytes).ok()?);
  }
  Some(out)
}

/// Decode a single static word argument at the given index.
pub fn decode_static_arg(data: &[u8], index: usize) -> Option<W256> {
  read_word_at(data, index * 32)
}

/// A bytes32 left-padded from fewer bytes, as test helpers build storage keys.
pub fn bytes32(bytes: &[u8]) -> W256 {
  W256::from_bytes(pad_left_prime_vec(32, bytes.to_vec()))
}
