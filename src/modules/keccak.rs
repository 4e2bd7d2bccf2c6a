use tiny_keccak::{Hasher, Keccak};

use crate::modules::types::{Expr, Prop, W256};

pub fn keccak_bytes(input: &[u8]) -> Vec<u8> {
  let mut hasher = Keccak::v256();
  hasher.update(input);
  let mut output = [0u8; 32];
  hasher.finalize(&mut output);
  output.to_vec()
}

/// Keccak-256 of a concrete byte string as a word.
pub fn keccak_prime(input: &[u8]) -> W256 {
  W256::from_bytes(keccak_bytes(input))
}

/// Big-endian u32 from up to four bytes.
pub fn word32(xs: &[u8]) -> u32 {
  xs.iter().take(4).fold(0u32, |acc, &x| (acc << 8) | x as u32)
}

/// The four-byte ABI selector of a signature string.
pub fn abi_keccak(input: &[u8]) -> u32 {
  word32(&keccak_bytes(input)[..4])
}

/// Hash a buffer, folding to a literal when the buffer is concrete.
pub fn keccak(buf: Expr) -> Expr {
  match buf {
    Expr::ConcreteBuf(bs) => Expr::Lit(keccak_prime(&bs)),
    _ => Expr::Keccak(Box::new(buf)),
  }
}

/// The equality proposition recorded for every concrete hash the interpreter
/// computes, so the solver can invert observed hashes.
pub fn keccak_eq_prop(hash: W256, preimage: Vec<u8>) -> Prop {
  Prop::PEq(
    Expr::Lit(hash),
    Expr::Keccak(Box::new(Expr::ConcreteBuf(preimage))),
  )
}
