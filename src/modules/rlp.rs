use crate::modules::types::{Addr, ByteString, W256};

/// The subset of RLP the interpreter needs: encoding of byte strings and
/// lists, enough to derive CREATE addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum RLP {
  BS(ByteString),
  List(Vec<RLP>),
}

fn encode_len(offset: u8, bs: &[u8]) -> Vec<u8> {
  if bs.len() <= 55 {
    let mut out = vec![offset + bs.len() as u8];
    out.extend_from_slice(bs);
    out
  } else {
    let len_bytes = int_to_bytes(bs.len());
    let mut out = vec![offset + len_bytes.len() as u8 + 55];
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(bs);
    out
  }
}

pub fn rlpencode(rlp: &RLP) -> Vec<u8> {
  match rlp {
    RLP::BS(bs) => {
      if bs.len() == 1 && bs[0] < 128 {
        bs.clone()
      } else {
        encode_len(128, bs)
      }
    }
    RLP::List(items) => {
      let encoded: Vec<u8> = items.iter().flat_map(rlpencode).collect();
      encode_len(192, &encoded)
    }
  }
}

pub fn rlp_list(items: Vec<RLP>) -> Vec<u8> {
  rlpencode(&RLP::List(items))
}

fn int_to_bytes(mut num: usize) -> Vec<u8> {
  let mut bytes = Vec::new();
  while num > 0 {
    bytes.push((num & 0xff) as u8);
    num >>= 8;
  }
  bytes.reverse();
  bytes
}

fn octets(x: W256) -> Vec<u8> {
  x.to_be_bytes().iter().copied().skip_while(|&b| b == 0).collect()
}

fn octets_160(x: Addr) -> Vec<u8> {
  x.to_be_bytes()[12..].to_vec()
}

/// Minimal big-endian integer encoding: zero is the empty string.
pub fn rlp_word_256(x: W256) -> RLP {
  if x.is_zero() {
    RLP::BS(Vec::new())
  } else {
    RLP::BS(octets(x))
  }
}

/// A full 20-byte address, as it appears in the CREATE sender position.
pub fn rlp_addr_full(x: Addr) -> RLP {
  RLP::BS(octets_160(x))
}
