use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use thiserror::Error;

use crate::modules::feeschedule::FeeSchedule;
use crate::modules::op::Op;

pub type ByteString = Vec<u8>;
pub type Nonce = u64;

// 256-bit words ----------------------------------------------------------------------------------

/// An unsigned 256-bit word stored as `(lo, hi)` 128-bit halves.
/// All arithmetic wraps modulo 2^256, matching machine word semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct W256(pub u128, pub u128);

/// Addresses are words whose low 160 bits are meaningful.
pub type Addr = W256;

impl W256 {
  pub fn zero() -> Self {
    W256(0, 0)
  }

  pub fn one() -> Self {
    W256(1, 0)
  }

  pub fn max() -> Self {
    W256(u128::MAX, u128::MAX)
  }

  pub fn is_zero(&self) -> bool {
    self.0 == 0 && self.1 == 0
  }

  pub fn from_u64(v: u64) -> Self {
    W256(v as u128, 0)
  }

  /// Big-endian bytes, at most 32, left-padded with zeros.
  pub fn from_bytes(bytes: Vec<u8>) -> Self {
    let padded = pad_left_prime_vec(32, bytes);
    let hi = u128::from_be_bytes(padded[0..16].try_into().unwrap_or([0; 16]));
    let lo = u128::from_be_bytes(padded[16..32].try_into().unwrap_or([0; 16]));
    W256(lo, hi)
  }

  pub fn to_be_bytes(&self) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[0..16].copy_from_slice(&self.1.to_be_bytes());
    out[16..32].copy_from_slice(&self.0.to_be_bytes());
    out
  }

  pub fn from_hex(s: &str) -> Option<Self> {
    let t = s.strip_prefix("0x").unwrap_or(s);
    if t.is_empty() || t.len() > 64 || !t.chars().all(|c| c.is_ascii_hexdigit()) {
      return None;
    }
    let split = t.len().saturating_sub(32);
    let lo = u128::from_str_radix(&t[split..], 16).ok()?;
    let hi = if split == 0 { 0 } else { u128::from_str_radix(&t[..split], 16).ok()? };
    Some(W256(lo, hi))
  }

  pub fn to_hex(&self) -> String {
    if self.1 == 0 {
      format!("{:x}", self.0)
    } else {
      format!("{:x}{:032x}", self.1, self.0)
    }
  }

  pub fn to_decimal(&self) -> String {
    if self.is_zero() {
      return "0".to_string();
    }
    let mut digits = Vec::new();
    let mut n = *self;
    let ten = W256(10, 0);
    while !n.is_zero() {
      let (q, r) = n.div_rem(ten);
      digits.push(std::char::from_digit(r.0 as u32, 10).unwrap_or('0'));
      n = q;
    }
    digits.iter().rev().collect()
  }

  /// Truncating conversion to u64 (low 64 bits).
  pub fn as_u64(&self) -> u64 {
    self.0 as u64
  }

  pub fn fits_u64(&self) -> bool {
    self.1 == 0 && self.0 <= u64::MAX as u128
  }

  pub fn bit(&self, i: usize) -> bool {
    if i < 128 {
      (self.0 >> i) & 1 == 1
    } else if i < 256 {
      (self.1 >> (i - 128)) & 1 == 1
    } else {
      false
    }
  }

  fn set_bit(&mut self, i: usize) {
    if i < 128 {
      self.0 |= 1u128 << i;
    } else if i < 256 {
      self.1 |= 1u128 << (i - 128);
    }
  }

  /// Number of significant bits.
  pub fn bit_length(&self) -> usize {
    if self.1 != 0 {
      256 - self.1.leading_zeros() as usize
    } else if self.0 != 0 {
      128 - self.0.leading_zeros() as usize
    } else {
      0
    }
  }

  /// Number of significant bytes, as used by EXP pricing.
  pub fn byte_length(&self) -> usize {
    (self.bit_length() + 7) / 8
  }

  fn to_limbs(self) -> [u64; 4] {
    [self.0 as u64, (self.0 >> 64) as u64, self.1 as u64, (self.1 >> 64) as u64]
  }

  fn from_limbs(l: [u64; 4]) -> Self {
    W256(l[0] as u128 | ((l[1] as u128) << 64), l[2] as u128 | ((l[3] as u128) << 64))
  }

  pub fn wrapping_neg(self) -> Self {
    (!self) + W256::one()
  }

  /// Unsigned division with remainder. Division by zero yields zero, as the
  /// machine defines it.
  pub fn div_rem(self, d: W256) -> (W256, W256) {
    if d.is_zero() {
      return (W256::zero(), W256::zero());
    }
    if self < d {
      return (W256::zero(), self);
    }
    let mut q = W256::zero();
    let mut r = W256::zero();
    for i in (0..256).rev() {
      let overflow = r.bit(255);
      r = r << 1;
      if self.bit(i) {
        r.0 |= 1;
      }
      if overflow || r >= d {
        r = r - d;
        q.set_bit(i);
      }
    }
    (q, r)
  }

  pub fn is_neg(&self) -> bool {
    self.bit(255)
  }

  /// Two's-complement signed division: truncated quotient, MIN / -1 = MIN.
  pub fn sdiv(self, rhs: W256) -> W256 {
    if rhs.is_zero() {
      return W256::zero();
    }
    let min = W256(0, 1u128 << 127);
    if self == min && rhs == W256::max() {
      return min;
    }
    let (na, nb) = (self.is_neg(), rhs.is_neg());
    let a = if na { self.wrapping_neg() } else { self };
    let b = if nb { rhs.wrapping_neg() } else { rhs };
    let (q, _) = a.div_rem(b);
    if na != nb {
      q.wrapping_neg()
    } else {
      q
    }
  }

  /// Two's-complement signed remainder; result takes the sign of the dividend.
  pub fn smod(self, rhs: W256) -> W256 {
    if rhs.is_zero() {
      return W256::zero();
    }
    let na = self.is_neg();
    let a = if na { self.wrapping_neg() } else { self };
    let b = if rhs.is_neg() { rhs.wrapping_neg() } else { rhs };
    let (_, r) = a.div_rem(b);
    if na {
      r.wrapping_neg()
    } else {
      r
    }
  }

  pub fn addmod(self, rhs: W256, m: W256) -> W256 {
    if m.is_zero() {
      return W256::zero();
    }
    let (_, a) = self.div_rem(m);
    let (_, b) = rhs.div_rem(m);
    let (lo, carry_lo) = a.0.overflowing_add(b.0);
    let (hi1, carry_hi1) = a.1.overflowing_add(b.1);
    let (hi, carry_hi2) = hi1.overflowing_add(carry_lo as u128);
    let s = W256(lo, hi);
    if carry_hi1 || carry_hi2 || s >= m {
      s - m
    } else {
      s
    }
  }

  pub fn mulmod(self, rhs: W256, m: W256) -> W256 {
    if m.is_zero() {
      return W256::zero();
    }
    let prod = mul_full(self, rhs);
    let mut r = W256::zero();
    for i in (0..512).rev() {
      let overflow = r.bit(255);
      r = r << 1;
      if (prod[i / 64] >> (i % 64)) & 1 == 1 {
        r.0 |= 1;
      }
      if overflow || r >= m {
        r = r - m;
      }
    }
    r
  }

  /// Exponentiation modulo 2^256 by squaring.
  pub fn exp(self, e: W256) -> W256 {
    let mut result = W256::one();
    let mut base = self;
    let bits = e.bit_length();
    for i in 0..bits {
      if e.bit(i) {
        result = result * base;
      }
      base = base * base;
    }
    result
  }

  /// SIGNEXTEND: extend the sign of the low `b + 1` bytes of `x`.
  pub fn sex(b: W256, x: W256) -> W256 {
    if !b.fits_u64() || b.as_u64() >= 31 {
      return x;
    }
    let bit = (b.as_u64() as usize) * 8 + 7;
    let mask = (W256::one() << (bit as u32 + 1)) - W256::one();
    if x.bit(bit) {
      x | !mask
    } else {
      x & mask
    }
  }

  /// Arithmetic shift right.
  pub fn sar(self, shift: W256) -> W256 {
    let neg = self.is_neg();
    if !shift.fits_u64() || shift.as_u64() >= 256 {
      return if neg { W256::max() } else { W256::zero() };
    }
    let n = shift.as_u64() as u32;
    if n == 0 {
      return self;
    }
    let logical = self >> n;
    if neg {
      logical | (W256::max() << (256 - n))
    } else {
      logical
    }
  }
}

fn mul_full(a: W256, b: W256) -> [u64; 8] {
  let x = a.to_limbs();
  let y = b.to_limbs();
  let mut out = [0u64; 8];
  for i in 0..4 {
    let mut carry: u128 = 0;
    for j in 0..4 {
      let idx = i + j;
      let t = (x[i] as u128) * (y[j] as u128) + out[idx] as u128 + carry;
      out[idx] = t as u64;
      carry = t >> 64;
    }
    out[i + 4] = carry as u64;
  }
  out
}

impl std::ops::Add for W256 {
  type Output = W256;
  fn add(self, rhs: W256) -> W256 {
    let (lo, carry) = self.0.overflowing_add(rhs.0);
    let hi = self.1.wrapping_add(rhs.1).wrapping_add(carry as u128);
    W256(lo, hi)
  }
}

impl std::ops::Sub for W256 {
  type Output = W256;
  fn sub(self, rhs: W256) -> W256 {
    let (lo, borrow) = self.0.overflowing_sub(rhs.0);
    let hi = self.1.wrapping_sub(rhs.1).wrapping_sub(borrow as u128);
    W256(lo, hi)
  }
}

impl std::ops::Mul for W256 {
  type Output = W256;
  fn mul(self, rhs: W256) -> W256 {
    let limbs = mul_full(self, rhs);
    W256::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3]])
  }
}

impl std::ops::Div for W256 {
  type Output = W256;
  fn div(self, rhs: W256) -> W256 {
    self.div_rem(rhs).0
  }
}

impl std::ops::Rem for W256 {
  type Output = W256;
  fn rem(self, rhs: W256) -> W256 {
    self.div_rem(rhs).1
  }
}

impl std::ops::BitAnd for W256 {
  type Output = W256;
  fn bitand(self, rhs: W256) -> W256 {
    W256(self.0 & rhs.0, self.1 & rhs.1)
  }
}

impl std::ops::BitOr for W256 {
  type Output = W256;
  fn bitor(self, rhs: W256) -> W256 {
    W256(self.0 | rhs.0, self.1 | rhs.1)
  }
}

impl std::ops::BitXor for W256 {
  type Output = W256;
  fn bitxor(self, rhs: W256) -> W256 {
    W256(self.0 ^ rhs.0, self.1 ^ rhs.1)
  }
}

impl std::ops::Not for W256 {
  type Output = W256;
  fn not(self) -> W256 {
    W256(!self.0, !self.1)
  }
}

impl std::ops::Shl<u32> for W256 {
  type Output = W256;
  fn shl(self, n: u32) -> W256 {
    if n == 0 {
      self
    } else if n < 128 {
      W256(self.0 << n, (self.1 << n) | (self.0 >> (128 - n)))
    } else if n < 256 {
      W256(0, self.0 << (n - 128))
    } else {
      W256::zero()
    }
  }
}

impl std::ops::Shr<u32> for W256 {
  type Output = W256;
  fn shr(self, n: u32) -> W256 {
    if n == 0 {
      self
    } else if n < 128 {
      W256((self.0 >> n) | (self.1 << (128 - n)), self.1 >> n)
    } else if n < 256 {
      W256(self.1 >> (n - 128), 0)
    } else {
      W256::zero()
    }
  }
}

impl PartialOrd for W256 {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for W256 {
  fn cmp(&self, other: &Self) -> Ordering {
    match self.1.cmp(&other.1) {
      Ordering::Equal => self.0.cmp(&other.0),
      ord => ord,
    }
  }
}

impl From<u64> for W256 {
  fn from(v: u64) -> Self {
    W256::from_u64(v)
  }
}

impl fmt::Display for W256 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{}", self.to_hex())
  }
}

pub fn word256_bytes(w: W256) -> Vec<u8> {
  w.to_be_bytes().to_vec()
}

pub fn pad_left_prime_vec(size: usize, bytes: Vec<u8>) -> Vec<u8> {
  if bytes.len() >= size {
    return bytes;
  }
  let mut out = vec![0u8; size - bytes.len()];
  out.extend(bytes);
  out
}

pub fn pad_right(size: usize, mut bytes: Vec<u8>) -> Vec<u8> {
  if bytes.len() < size {
    bytes.resize(size, 0);
  }
  bytes
}

pub fn unbox<T>(value: Box<T>) -> T {
  *value
}

// Symbolic IR ------------------------------------------------------------------------------------

pub type ConcreteStoreMap = BTreeMap<W256, BTreeMap<W256, W256>>;

/// The expression language shared by words, bytes, buffers, storage and logs.
/// Literal constructors carry concrete values; everything else is a term the
/// interpreter treats opaquely and hands to the value layer in `expr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
  // words
  Lit(W256),
  Var(String),
  Timestamp,
  TxValue,
  Keccak(Box<Expr>),
  SLoad(Box<Expr>, Box<Expr>, Box<Expr>),
  BufLength(Box<Expr>),
  Balance(Box<Expr>),
  BlockHash(Box<Expr>),
  Add(Box<Expr>, Box<Expr>),
  Sub(Box<Expr>, Box<Expr>),
  Mul(Box<Expr>, Box<Expr>),
  Div(Box<Expr>, Box<Expr>),
  SDiv(Box<Expr>, Box<Expr>),
  Mod(Box<Expr>, Box<Expr>),
  SMod(Box<Expr>, Box<Expr>),
  AddMod(Box<Expr>, Box<Expr>, Box<Expr>),
  MulMod(Box<Expr>, Box<Expr>, Box<Expr>),
  Exp(Box<Expr>, Box<Expr>),
  SEx(Box<Expr>, Box<Expr>),
  LT(Box<Expr>, Box<Expr>),
  GT(Box<Expr>, Box<Expr>),
  SLT(Box<Expr>, Box<Expr>),
  SGT(Box<Expr>, Box<Expr>),
  Eq(Box<Expr>, Box<Expr>),
  IsZero(Box<Expr>),
  And(Box<Expr>, Box<Expr>),
  Or(Box<Expr>, Box<Expr>),
  Xor(Box<Expr>, Box<Expr>),
  Not(Box<Expr>),
  SHL(Box<Expr>, Box<Expr>),
  SHR(Box<Expr>, Box<Expr>),
  SAR(Box<Expr>, Box<Expr>),
  IndexWord(Box<Expr>, Box<Expr>),
  ReadWord(Box<Expr>, Box<Expr>),
  // bytes
  LitByte(u8),
  ReadByte(Box<Expr>, Box<Expr>),
  // buffers
  ConcreteBuf(Vec<u8>),
  AbstractBuf(String),
  WriteByte(Box<Expr>, Box<Expr>, Box<Expr>),
  WriteWord(Box<Expr>, Box<Expr>, Box<Expr>),
  CopySlice(Box<Expr>, Box<Expr>, Box<Expr>, Box<Expr>, Box<Expr>),
  // addresses
  LitAddr(Addr),
  SymAddr(String),
  // storage
  ConcreteStore(ConcreteStoreMap),
  AbstractStore,
  SStore(Box<Expr>, Box<Expr>, Box<Expr>, Box<Expr>),
  // logs
  LogEntry(Box<Expr>, Box<Expr>, Vec<Expr>),
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Lit(w) => write!(f, "Lit(0x{})", w.to_hex()),
      Expr::Var(n) => write!(f, "Var({})", n),
      Expr::Timestamp => write!(f, "Timestamp"),
      Expr::TxValue => write!(f, "TxValue"),
      Expr::Keccak(b) => write!(f, "Keccak({})", b),
      Expr::SLoad(a, s, st) => write!(f, "SLoad({}, {}, {})", a, s, st),
      Expr::BufLength(b) => write!(f, "BufLength({})", b),
      Expr::Balance(a) => write!(f, "Balance({})", a),
      Expr::BlockHash(n) => write!(f, "BlockHash({})", n),
      Expr::Add(a, b) => write!(f, "Add({}, {})", a, b),
      Expr::Sub(a, b) => write!(f, "Sub({}, {})", a, b),
      Expr::Mul(a, b) => write!(f, "Mul({}, {})", a, b),
      Expr::Div(a, b) => write!(f, "Div({}, {})", a, b),
      Expr::SDiv(a, b) => write!(f, "SDiv({}, {})", a, b),
      Expr::Mod(a, b) => write!(f, "Mod({}, {})", a, b),
      Expr::SMod(a, b) => write!(f, "SMod({}, {})", a, b),
      Expr::AddMod(a, b, c) => write!(f, "AddMod({}, {}, {})", a, b, c),
      Expr::MulMod(a, b, c) => write!(f, "MulMod({}, {}, {})", a, b, c),
      Expr::Exp(a, b) => write!(f, "Exp({}, {})", a, b),
      Expr::SEx(a, b) => write!(f, "SEx({}, {})", a, b),
      Expr::LT(a, b) => write!(f, "LT({}, {})", a, b),
      Expr::GT(a, b) => write!(f, "GT({}, {})", a, b),
      Expr::SLT(a, b) => write!(f, "SLT({}, {})", a, b),
      Expr::SGT(a, b) => write!(f, "SGT({}, {})", a, b),
      Expr::Eq(a, b) => write!(f, "Eq({}, {})", a, b),
      Expr::IsZero(a) => write!(f, "IsZero({})", a),
      Expr::And(a, b) => write!(f, "And({}, {})", a, b),
      Expr::Or(a, b) => write!(f, "Or({}, {})", a, b),
      Expr::Xor(a, b) => write!(f, "Xor({}, {})", a, b),
      Expr::Not(a) => write!(f, "Not({})", a),
      Expr::SHL(a, b) => write!(f, "SHL({}, {})", a, b),
      Expr::SHR(a, b) => write!(f, "SHR({}, {})", a, b),
      Expr::SAR(a, b) => write!(f, "SAR({}, {})", a, b),
      Expr::IndexWord(i, w) => write!(f, "IndexWord({}, {})", i, w),
      Expr::ReadWord(i, b) => write!(f, "ReadWord({}, {})", i, b),
      Expr::LitByte(b) => write!(f, "LitByte(0x{:02x})", b),
      Expr::ReadByte(i, b) => write!(f, "ReadByte({}, {})", i, b),
      Expr::ConcreteBuf(bytes) => {
        let shown: Vec<String> = bytes.iter().map(|b| format!("{:x}", b)).collect();
        write!(f, "ConcreteBuf([{}])", shown.join(", "))
      }
      Expr::AbstractBuf(n) => write!(f, "AbstractBuf({})", n),
      Expr::WriteByte(o, b, buf) => write!(f, "WriteByte({}, {}, {})", o, b, buf),
      Expr::WriteWord(o, w, buf) => write!(f, "WriteWord({}, {}, {})", o, w, buf),
      Expr::CopySlice(s, d, n, src, dst) => {
        write!(f, "CopySlice({}, {}, {}, {}, {})", s, d, n, src, dst)
      }
      Expr::LitAddr(a) => write!(f, "LitAddr(0x{})", a.to_hex()),
      Expr::SymAddr(n) => write!(f, "SymAddr({})", n),
      Expr::ConcreteStore(_) => write!(f, "ConcreteStore"),
      Expr::AbstractStore => write!(f, "AbstractStore"),
      Expr::SStore(a, s, v, p) => write!(f, "SStore({}, {}, {}, {})", a, s, v, p),
      Expr::LogEntry(a, d, ts) => {
        let topics: Vec<String> = ts.iter().map(|t| t.to_string()).collect();
        write!(f, "LogEntry({}, {}, [{}])", a, d, topics.join(", "))
      }
    }
  }
}

// Propositions -----------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Prop {
  PEq(Expr, Expr),
  PLT(Expr, Expr),
  PGT(Expr, Expr),
  PGEq(Expr, Expr),
  PLEq(Expr, Expr),
  PNeg(Box<Prop>),
  PAnd(Box<Prop>, Box<Prop>),
  POr(Box<Prop>, Box<Prop>),
  PImpl(Box<Prop>, Box<Prop>),
  PBool(bool),
}

// Errors and suspensions -------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  PleaseFetchContract(Addr),
  PleaseFetchSlot(Addr, W256),
  PleaseAskSMT(Expr, Vec<Prop>),
  PleaseDoFFI(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Choose {
  PleaseChoosePath(Expr),
}

/// SMT verdict for a branch condition, supplied by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCondition {
  Case(bool),
  Unknown,
  Inconsistent,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvmError {
  #[error("balance too low: have {1}, need {0}")]
  BalanceTooLow(Box<Expr>, Box<Expr>),
  #[error("unrecognized opcode 0x{0:02x}")]
  UnrecognizedOpcode(u8),
  #[error("self destruction")]
  SelfDestruction,
  #[error("stack underrun")]
  StackUnderrun,
  #[error("bad jump destination")]
  BadJumpDestination,
  #[error("revert: {0}")]
  Revert(Box<Expr>),
  #[error("out of gas: have {0}, need {1}")]
  OutOfGas(u64, u64),
  #[error("bad cheat code: {0:?}")]
  BadCheatCode(Option<u32>),
  #[error("stack limit exceeded")]
  StackLimitExceeded,
  #[error("illegal overflow")]
  IllegalOverflow,
  #[error("state change while static")]
  StateChangeWhileStatic,
  #[error("invalid memory access")]
  InvalidMemoryAccess,
  #[error("call depth limit reached")]
  CallDepthLimitReached,
  #[error("max code size exceeded: limit {0}, got {1}")]
  MaxCodeSizeExceeded(W256, W256),
  #[error("invalid bytecode format")]
  InvalidFormat,
  #[error("precompile failure")]
  PrecompileFailure,
  #[error("unexpected symbolic argument at pc {0}: {1}")]
  UnexpectedSymbolicArg(usize, String, Vec<Expr>),
  #[error("dead path")]
  DeadPath,
  #[error("not unique")]
  NotUnique,
  #[error("SMT timeout")]
  SMTTimeout,
  #[error("ffi failed: {0:?}")]
  FFI(Vec<String>),
  #[error("nonce overflow")]
  NonceOverflow,
  #[error("query: {0:?}")]
  Query(Query),
  #[error("choose: {0:?}")]
  Choose(Choose),
}

/// What the step function was doing when it suspended, so the driver's answer
/// can resume the mutation. Kept as plain data, never as a closure.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
  AwaitContract { addr: Addr },
  AwaitSlot { addr: Addr, slot: W256 },
  AwaitBranch { loc: CodeLocation, cond: Expr, jump_dest: u64 },
  AwaitDeposit { output: Expr, first_byte: Expr },
  AwaitFFI { out_offset: u64, out_size: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VMResult {
  VMFailure(EvmError),
  VMSuccess(Expr),
}

// Contracts --------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCodeStruct {
  ConcreteRuntimeCode(Vec<u8>),
  SymbolicRuntimeCode(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContractCode {
  InitCode(Vec<u8>, Box<Expr>),
  RuntimeCode(RuntimeCodeStruct),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
  pub code: ContractCode,
  pub balance: Expr,
  pub nonce: Option<Nonce>,
  pub codehash: Expr,
  pub op_idx_map: Vec<i32>,
  pub code_ops: Vec<(usize, Op)>,
  pub external: bool,
}

pub fn update_balance(mut c: Contract, balance: Expr) -> Contract {
  c.balance = balance;
  c
}

pub type ExprContractMap = HashMap<Expr, Contract>;

// Frames -----------------------------------------------------------------------------------------

pub type MutableMemory = Vec<u8>;

#[derive(Debug, Clone, PartialEq)]
pub enum Memory {
  ConcreteMemory(MutableMemory),
  SymbolicMemory(Expr),
}

/// The registers of one activation.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
  pub contract: Expr,
  pub code_contract: Expr,
  pub code: ContractCode,
  pub pc: usize,
  pub stack: Vec<Box<Expr>>,
  pub memory: Memory,
  pub memory_size: u64,
  pub calldata: Expr,
  pub callvalue: Expr,
  pub caller: Expr,
  pub gas: u64,
  pub returndata: Expr,
  pub static_flag: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameContext {
  CreationContext {
    address: Expr,
    codehash: Expr,
    reversion: ExprContractMap,
    substate: SubState,
  },
  CallContext {
    target: Expr,
    context: Expr,
    out_offset: u64,
    out_size: u64,
    codehash: Expr,
    abi: Option<W256>,
    calldata: Expr,
    reversion: (ExprContractMap, Expr),
    substate: SubState,
  },
}

#[derive(Debug, Clone)]
pub struct Frame {
  pub context: FrameContext,
  pub state: FrameState,
}

/// Outcome of one frame, dispatched by `finish_frame`.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameResult {
  FrameReturned(Expr),
  FrameReverted(Expr),
  FrameErrored(EvmError),
}

// Transaction-level state ------------------------------------------------------------------------

/// The accrued substate across a transaction. Refund entries may be negative
/// when a prior refund is taken back; the total is clamped at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SubState {
  pub selfdestructs: Vec<Expr>,
  pub touched_accounts: Vec<Expr>,
  pub accessed_addresses: HashSet<Expr>,
  pub accessed_storage_keys: HashSet<(Expr, W256)>,
  pub refunds: Vec<(Expr, i64)>,
}

impl SubState {
  pub fn empty() -> Self {
    SubState {
      selfdestructs: Vec::new(),
      touched_accounts: Vec::new(),
      accessed_addresses: HashSet::new(),
      accessed_storage_keys: HashSet::new(),
      refunds: Vec::new(),
    }
  }

  pub fn refund_total(&self) -> u64 {
    let sum: i64 = self.refunds.iter().map(|(_, n)| *n).sum();
    if sum < 0 {
      0
    } else {
      sum as u64
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseState {
  EmptyBase,
  AbstractBase,
}

#[derive(Debug, Clone)]
pub struct Env {
  pub contracts: ExprContractMap,
  pub chain_id: W256,
  pub storage: Expr,
  pub orig_storage: HashMap<W256, HashMap<W256, W256>>,
  pub sha3_preimages: HashMap<W256, ByteString>,
}

#[derive(Debug, Clone)]
pub struct Block {
  pub coinbase: Expr,
  pub timestamp: Expr,
  pub number: W256,
  pub prev_randao: W256,
  pub gaslimit: u64,
  pub base_fee: W256,
  pub max_code_size: W256,
  pub schedule: FeeSchedule,
}

#[derive(Debug, Clone)]
pub struct TxState {
  pub gasprice: W256,
  pub gaslimit: u64,
  pub priority_fee: W256,
  pub origin: Expr,
  pub to_addr: Expr,
  pub value: Expr,
  pub substate: SubState,
  pub is_create: bool,
  pub tx_reversion: ExprContractMap,
}

pub type CodeLocation = (Expr, usize);

/// Fetched state and explored-path memory. Outlives individual exploration
/// paths; merged with `unify_cached_contract` / `unify_cached_storage`.
#[derive(Debug, Clone, Default)]
pub struct Cache {
  pub fetched_contracts: HashMap<Addr, Contract>,
  pub fetched_storage: HashMap<W256, HashMap<W256, W256>>,
  pub path: HashMap<(CodeLocation, u32), bool>,
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
  pub allow_ffi: bool,
  pub base_state: BaseState,
}

// Traces -----------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum TraceData {
  EventTrace(Expr, Expr, Vec<Expr>),
  FrameTrace(FrameContext),
  ErrorTrace(EvmError),
  EntryTrace(String),
  ReturnTrace(Expr, FrameContext),
}

#[derive(Debug, Clone)]
pub struct Trace {
  pub op_ix: i32,
  pub contract: Expr,
  pub trace_data: TraceData,
}

#[derive(Debug, Clone)]
pub struct TraceNode {
  pub trace: Trace,
  pub parent: Option<usize>,
  pub children: Vec<usize>,
}

/// A cursor into a tree of trace events, backed by an arena of nodes with
/// parent indices. `push` descends into a new child, `insert` records a child
/// without descending, `pop` ascends.
#[derive(Debug, Clone, Default)]
pub struct TraceTree {
  pub arena: Vec<TraceNode>,
  pub current: Option<usize>,
}

impl TraceTree {
  pub fn new() -> Self {
    TraceTree { arena: Vec::new(), current: None }
  }

  fn attach(&mut self, trace: Trace) -> usize {
    let ix = self.arena.len();
    self.arena.push(TraceNode { trace, parent: self.current, children: Vec::new() });
    if let Some(cur) = self.current {
      self.arena[cur].children.push(ix);
    }
    ix
  }

  pub fn push(&mut self, trace: Trace) {
    let ix = self.attach(trace);
    self.current = Some(ix);
  }

  pub fn insert(&mut self, trace: Trace) {
    self.attach(trace);
  }

  pub fn pop(&mut self) {
    self.current = self.current.and_then(|ix| self.arena[ix].parent);
  }

  pub fn roots(&self) -> Vec<usize> {
    (0..self.arena.len()).filter(|&ix| self.arena[ix].parent.is_none()).collect()
  }

  pub fn format(&self) -> String {
    let mut out = String::new();
    for root in self.roots() {
      self.format_node(root, 0, &mut out);
    }
    out
  }

  fn format_node(&self, ix: usize, depth: usize, out: &mut String) {
    let node = &self.arena[ix];
    let pad = "  ".repeat(depth);
    let line = match &node.trace.trace_data {
      TraceData::EventTrace(addr, _, topics) => {
        format!("log from {} ({} topics)", addr, topics.len())
      }
      TraceData::FrameTrace(FrameContext::CallContext { target, .. }) => {
        format!("call {}", target)
      }
      TraceData::FrameTrace(FrameContext::CreationContext { address, .. }) => {
        format!("create {}", address)
      }
      TraceData::ErrorTrace(e) => format!("error: {}", e),
      TraceData::EntryTrace(s) => s.clone(),
      TraceData::ReturnTrace(buf, _) => format!("return {}", buf),
    };
    out.push_str(&pad);
    out.push_str(&line);
    out.push('\n');
    for child in &node.children {
      self.format_node(*child, depth + 1, out);
    }
  }
}

// The VM -----------------------------------------------------------------------------------------

/// The state of a stepwise EVM execution.
#[derive(Debug, Clone)]
pub struct VM {
  pub result: Option<VMResult>,
  pub state: FrameState,
  pub frames: Vec<Frame>,
  pub env: Env,
  pub block: Block,
  pub tx: TxState,
  pub logs: Vec<Expr>,
  pub traces: TraceTree,
  pub cache: Cache,
  pub burned: u64,
  pub iterations: HashMap<CodeLocation, u32>,
  pub constraints: Vec<Prop>,
  pub keccak_eqs: Vec<Prop>,
  pub pending: Option<PendingOp>,
  pub config: RuntimeConfig,
}

pub struct VMOpts {
  pub contract: Contract,
  pub other_contracts: Vec<(Expr, Contract)>,
  pub calldata: (Expr, Vec<Prop>),
  pub base_state: BaseState,
  pub value: Expr,
  pub priority_fee: W256,
  pub address: Expr,
  pub caller: Expr,
  pub origin: Expr,
  pub gas: u64,
  pub gaslimit: u64,
  pub number: W256,
  pub timestamp: Expr,
  pub coinbase: Expr,
  pub prev_randao: W256,
  pub max_code_size: W256,
  pub block_gaslimit: u64,
  pub gasprice: W256,
  pub base_fee: W256,
  pub schedule: FeeSchedule,
  pub chain_id: W256,
  pub create: bool,
  pub tx_access_list: HashMap<Expr, Vec<W256>>,
  pub allow_ffi: bool,
}
