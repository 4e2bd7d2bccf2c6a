use num_bigint::BigUint;
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use sha2::{Digest, Sha256};
use substrate_bn::{pairing_batch, AffineG1, AffineG2, Fq, Fq2, Fr, Group, Gt, G1, G2};

use crate::modules::feeschedule::FeeSchedule;
use crate::modules::keccak::keccak_bytes;
use crate::modules::types::{pad_left_prime_vec, pad_right, W256};

#[derive(Debug, Clone, PartialEq)]
pub enum PrecompileResult {
  Success { gas_used: u64, output: Vec<u8> },
  OutOfGas,
  Failure,
}

/// Run the precompile at `addr` (1..=9) against `input` with at most
/// `gas_cap` gas. Insufficient gas and malformed input are distinguished so
/// the caller can burn the right amount.
pub fn execute_precompile(fees: &FeeSchedule, addr: u64, input: &[u8], gas_cap: u64) -> PrecompileResult {
  let cost = cost_of_precompile(fees, addr, input);
  if cost > gas_cap as u128 {
    return PrecompileResult::OutOfGas;
  }
  let gas_used = cost as u64;
  let out = match addr {
    1 => Some(precompile_ecrecover(input).unwrap_or_default()),
    2 => Some(precompile_sha256(input)),
    3 => Some(precompile_ripemd160(input)),
    4 => Some(input.to_vec()),
    5 => precompile_modexp(input),
    6 => precompile_ecadd(input),
    7 => precompile_ecmul(input),
    8 => precompile_ecpairing(input),
    9 => precompile_blake2f(input),
    _ => None,
  };
  match out {
    Some(output) => PrecompileResult::Success { gas_used, output },
    None => PrecompileResult::Failure,
  }
}

/// Gas charged by each precompile, computed wide so absurd inputs saturate
/// into an out-of-gas result instead of wrapping.
pub fn cost_of_precompile(fees: &FeeSchedule, addr: u64, input: &[u8]) -> u128 {
  let words = ((input.len() + 31) / 32) as u128;
  match addr {
    1 => 3000,
    2 => 60 + 12 * words,
    3 => 600 + 120 * words,
    4 => 15 + 3 * words,
    5 => cost_of_modexp(fees, input),
    6 => fees.g_ecadd as u128,
    7 => fees.g_ecmul as u128,
    8 => {
      fees.g_pairing_base as u128 + (input.len() / 192) as u128 * fees.g_pairing_point as u128
    }
    9 => {
      if input.len() < 4 {
        0
      } else {
        let rounds = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
        rounds as u128 * fees.g_fround as u128
      }
    }
    _ => 0,
  }
}

fn padded(input: &[u8], size: usize) -> Vec<u8> {
  pad_right(size, input.to_vec())
}

// 0x01: ecrecover. Invalid signatures yield an empty output, not a failure.
pub fn precompile_ecrecover(input: &[u8]) -> Option<Vec<u8>> {
  let data = padded(input, 128);
  if data[32..63].iter().any(|&b| b != 0) {
    return None;
  }
  let v = data[63];
  if v != 27 && v != 28 {
    return None;
  }
  let recid = RecoveryId::from_i32((v - 27) as i32).ok()?;
  let sig = RecoverableSignature::from_compact(&data[64..128], recid).ok()?;
  let msg = Message::from_digest_slice(&data[0..32]).ok()?;
  let secp = Secp256k1::new();
  let pubkey = secp.recover_ecdsa(&msg, &sig).ok()?;
  let uncompressed = pubkey.serialize_uncompressed();
  let hash = keccak_bytes(&uncompressed[1..65]);
  Some(pad_left_prime_vec(32, hash[12..32].to_vec()))
}

// 0x02: sha-256.
pub fn precompile_sha256(input: &[u8]) -> Vec<u8> {
  let mut hasher = Sha256::new();
  hasher.update(input);
  hasher.finalize().to_vec()
}

// 0x03: ripemd-160, left-padded to a word.
pub fn precompile_ripemd160(input: &[u8]) -> Vec<u8> {
  let mut hasher = Ripemd160::new();
  hasher.update(input);
  pad_left_prime_vec(32, hasher.finalize().to_vec())
}

fn modexp_lengths(input: &[u8]) -> (W256, W256, W256) {
  let header = padded(input, 96);
  (
    W256::from_bytes(header[0..32].to_vec()),
    W256::from_bytes(header[32..64].to_vec()),
    W256::from_bytes(header[64..96].to_vec()),
  )
}

fn read_region(input: &[u8], offset: usize, len: usize) -> Vec<u8> {
  let mut out = vec![0u8; len];
  for (k, slot) in out.iter_mut().enumerate() {
    if let Some(b) = input.get(offset + k) {
      *slot = *b;
    }
  }
  out
}

fn cost_of_modexp(fees: &FeeSchedule, input: &[u8]) -> u128 {
  let (b_len, e_len, m_len) = modexp_lengths(input);
  if !b_len.fits_u64() || !e_len.fits_u64() || !m_len.fits_u64() {
    return u128::MAX;
  }
  let (b_len, e_len, m_len) = (b_len.as_u64(), e_len.as_u64(), m_len.as_u64());
  if b_len > 1 << 20 || e_len > 1 << 20 || m_len > 1 << 20 {
    return u128::MAX;
  }
  let words = (b_len.max(m_len) as u128 + 7) / 8;
  let mult_complexity = words * words;
  let exp_head = W256::from_bytes(read_region(input, 96 + b_len as usize, e_len.min(32) as usize));
  let head_bits = exp_head.bit_length() as u128;
  let iter_count = if e_len <= 32 {
    head_bits.saturating_sub(1)
  } else {
    8 * (e_len as u128 - 32) + head_bits.saturating_sub(1)
  }
  .max(1);
  let gas = mult_complexity.saturating_mul(iter_count) / fees.g_quaddivisor as u128;
  gas.max(200)
}

// 0x05: modexp over arbitrary-size big integers.
pub fn precompile_modexp(input: &[u8]) -> Option<Vec<u8>> {
  let (b_len, e_len, m_len) = modexp_lengths(input);
  if !b_len.fits_u64() || !e_len.fits_u64() || !m_len.fits_u64() {
    return None;
  }
  let (b_len, e_len, m_len) = (b_len.as_u64() as usize, e_len.as_u64() as usize, m_len.as_u64() as usize);
  let base = BigUint::from_bytes_be(&read_region(input, 96, b_len));
  let exponent = BigUint::from_bytes_be(&read_region(input, 96 + b_len, e_len));
  let modulus = BigUint::from_bytes_be(&read_region(input, 96 + b_len + e_len, m_len));
  if modulus == BigUint::from(0u8) {
    return Some(vec![0u8; m_len]);
  }
  let result = base.modpow(&exponent, &modulus);
  Some(pad_left_prime_vec(m_len, result.to_bytes_be()))
}

fn read_fq(data: &[u8], offset: usize) -> Option<Fq> {
  Fq::from_slice(&data[offset..offset + 32]).ok()
}

fn read_g1(data: &[u8], offset: usize) -> Option<G1> {
  let x = read_fq(data, offset)?;
  let y = read_fq(data, offset + 32)?;
  if x == Fq::zero() && y == Fq::zero() {
    Some(G1::zero())
  } else {
    AffineG1::new(x, y).ok().map(G1::from)
  }
}

fn write_g1(point: G1) -> Vec<u8> {
  let mut out = vec![0u8; 64];
  if let Some(affine) = AffineG1::from_jacobian(point) {
    let _ = affine.x().to_big_endian(&mut out[0..32]);
    let _ = affine.y().to_big_endian(&mut out[32..64]);
  }
  out
}

// 0x06: alt-bn128 addition.
pub fn precompile_ecadd(input: &[u8]) -> Option<Vec<u8>> {
  let data = padded(input, 128);
  let p1 = read_g1(&data, 0)?;
  let p2 = read_g1(&data, 64)?;
  Some(write_g1(p1 + p2))
}

// 0x07: alt-bn128 scalar multiplication.
pub fn precompile_ecmul(input: &[u8]) -> Option<Vec<u8>> {
  let data = padded(input, 96);
  let p = read_g1(&data, 0)?;
  let fr = Fr::from_slice(&data[64..96]).ok()?;
  Some(write_g1(p * fr))
}

// 0x08: alt-bn128 pairing check. Input must be a whole number of
// (G1, G2) pairs; the empty product is one.
pub fn precompile_ecpairing(input: &[u8]) -> Option<Vec<u8>> {
  if input.len() % 192 != 0 {
    return None;
  }
  let mut pairs = Vec::new();
  for chunk in 0..input.len() / 192 {
    let base = chunk * 192;
    let g1 = read_g1(input, base)?;
    let ax = read_fq(input, base + 96)?;
    let ay = read_fq(input, base + 64)?;
    let bx = read_fq(input, base + 160)?;
    let by = read_fq(input, base + 128)?;
    let xa = Fq2::new(ax, ay);
    let xb = Fq2::new(bx, by);
    let g2 = if ax == Fq::zero() && ay == Fq::zero() && bx == Fq::zero() && by == Fq::zero() {
      G2::zero()
    } else {
      G2::from(AffineG2::new(xa, xb).ok()?)
    };
    pairs.push((g1, g2));
  }
  let ok = pairing_batch(&pairs) == Gt::one();
  let mut out = vec![0u8; 32];
  if ok {
    out[31] = 1;
  }
  Some(out)
}

const BLAKE2_IV: [u64; 8] = [
  0x6a09e667f3bcc908,
  0xbb67ae8584caa73b,
  0x3c6ef372fe94f82b,
  0xa54ff53a5f1d36f1,
  0x510e527fade682d1,
  0x9b05688c2b3e6c1f,
  0x1f83d9abfb41bd6b,
  0x5be0cd19137e2179,
];

const BLAKE2_SIGMA: [[usize; 16]; 10] = [
  [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
  [14, 10, 4, 8, 9, 15, 13, 6, 1, 12, 0, 2, 11, 7, 5, 3],
  [11, 8, 12, 0, 5, 2, 15, 13, 10, 14, 3, 6, 7, 1, 9, 4],
  [7, 9, 3, 1, 13, 12, 11, 14, 2, 6, 5, 10, 4, 0, 15, 8],
  [9, 0, 5, 7, 2, 4, 10, 15, 14, 1, 11, 12, 6, 8, 3, 13],
  [2, 12, 6, 10, 0, 11, 8, 3, 4, 13, 7, 5, 15, 14, 1, 9],
  [12, 5, 1, 15, 14, 13, 4, 10, 0, 7, 6, 3, 9, 2, 8, 11],
  [13, 11, 7, 14, 12, 1, 3, 9, 5, 0, 15, 4, 8, 6, 2, 10],
  [6, 15, 14, 9, 11, 3, 0, 8, 12, 2, 13, 7, 1, 4, 10, 5],
  [10, 2, 8, 4, 7, 6, 1, 5, 15, 11, 9, 14, 3, 12, 13, 0],
];

fn blake2_g(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize, x: u64, y: u64) {
  v[a] = v[a].wrapping_add(v[b]).wrapping_add(x);
  v[d] = (v[d] ^ v[a]).rotate_right(32);
  v[c] = v[c].wrapping_add(v[d]);
  v[b] = (v[b] ^ v[c]).rotate_right(24);
  v[a] = v[a].wrapping_add(v[b]).wrapping_add(y);
  v[d] = (v[d] ^ v[a]).rotate_right(16);
  v[c] = v[c].wrapping_add(v[d]);
  v[b] = (v[b] ^ v[c]).rotate_right(63);
}

// 0x09: the blake2b compression function F with a caller-chosen round count.
// Exactly 213 input bytes: rounds . h . m . t . final-flag.
pub fn precompile_blake2f(input: &[u8]) -> Option<Vec<u8>> {
  if input.len() != 213 {
    return None;
  }
  let f = match input[212] {
    0 => false,
    1 => true,
    _ => return None,
  };
  let rounds = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
  let mut h = [0u64; 8];
  for (i, slot) in h.iter_mut().enumerate() {
    *slot = u64::from_le_bytes(input[4 + i * 8..12 + i * 8].try_into().ok()?);
  }
  let mut m = [0u64; 16];
  for (i, slot) in m.iter_mut().enumerate() {
    *slot = u64::from_le_bytes(input[68 + i * 8..76 + i * 8].try_into().ok()?);
  }
  let t0 = u64::from_le_bytes(input[196..204].try_into().ok()?);
  let t1 = u64::from_le_bytes(input[204..212].try_into().ok()?);

  let mut v = [0u64; 16];
  v[..8].copy_from_slice(&h);
  v[8..].copy_from_slice(&BLAKE2_IV);
  v[12] ^= t0;
  v[13] ^= t1;
  if f {
    v[14] = !v[14];
  }
  for r in 0..rounds as usize {
    let s = &BLAKE2_SIGMA[r % 10];
    blake2_g(&mut v, 0, 4, 8, 12, m[s[0]], m[s[1]]);
    blake2_g(&mut v, 1, 5, 9, 13, m[s[2]], m[s[3]]);
    blake2_g(&mut v, 2, 6, 10, 14, m[s[4]], m[s[5]]);
    blake2_g(&mut v, 3, 7, 11, 15, m[s[6]], m[s[7]]);
    blake2_g(&mut v, 0, 5, 10, 15, m[s[8]], m[s[9]]);
    blake2_g(&mut v, 1, 6, 11, 12, m[s[10]], m[s[11]]);
    blake2_g(&mut v, 2, 7, 8, 13, m[s[12]], m[s[13]]);
    blake2_g(&mut v, 3, 4, 9, 14, m[s[14]], m[s[15]]);
  }
  let mut out = Vec::with_capacity(64);
  for i in 0..8 {
    out.extend((h[i] ^ v[i] ^ v[i + 8]).to_le_bytes());
  }
  Some(out)
}
