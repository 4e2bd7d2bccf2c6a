use crate::modules::types::{unbox, Expr, W256};

// Conversions ------------------------------------------------------------------------------------

pub fn maybe_lit_word(e: &Expr) -> Option<W256> {
  match e {
    Expr::Lit(w) => Some(*w),
    Expr::LitAddr(a) => Some(*a),
    _ => None,
  }
}

pub fn maybe_lit_byte(e: &Expr) -> Option<u8> {
  match e {
    Expr::LitByte(b) => Some(*b),
    _ => None,
  }
}

pub fn maybe_lit_addr(e: &Expr) -> Option<W256> {
  match e {
    Expr::LitAddr(a) => Some(*a),
    Expr::Lit(w) => Some(mask_addr(*w)),
    _ => None,
  }
}

fn mask_addr(w: W256) -> W256 {
  W256(w.0, w.1 & 0xffffffff)
}

/// Interpret a stack word as an address expression.
pub fn word_to_addr(e: Expr) -> Expr {
  match e {
    Expr::Lit(w) => Expr::LitAddr(mask_addr(w)),
    Expr::LitAddr(a) => Expr::LitAddr(a),
    other => other,
  }
}

/// An address expression as a stack word.
pub fn addr_to_word(e: Expr) -> Expr {
  match e {
    Expr::LitAddr(a) => Expr::Lit(a),
    other => other,
  }
}

fn bool_word(b: bool) -> Expr {
  if b {
    Expr::Lit(W256::one())
  } else {
    Expr::Lit(W256::zero())
  }
}

// Arithmetic -------------------------------------------------------------------------------------
//
// Operands arrive in stack order: the first argument was on top.

pub fn add(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a + b),
    (a, b) => Expr::Add(Box::new(a), Box::new(b)),
  }
}

pub fn sub(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a - b),
    (a, b) => Expr::Sub(Box::new(a), Box::new(b)),
  }
}

pub fn mul(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a * b),
    (a, b) => Expr::Mul(Box::new(a), Box::new(b)),
  }
}

pub fn div(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a / b),
    (a, b) => Expr::Div(Box::new(a), Box::new(b)),
  }
}

pub fn sdiv(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a.sdiv(b)),
    (a, b) => Expr::SDiv(Box::new(a), Box::new(b)),
  }
}

pub fn emod(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a % b),
    (a, b) => Expr::Mod(Box::new(a), Box::new(b)),
  }
}

pub fn smod(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a.smod(b)),
    (a, b) => Expr::SMod(Box::new(a), Box::new(b)),
  }
}

pub fn addmod(a: Box<Expr>, b: Box<Expr>, m: Box<Expr>) -> Expr {
  match (unbox(a), unbox(b), unbox(m)) {
    (Expr::Lit(x), Expr::Lit(y), Expr::Lit(z)) => Expr::Lit(x.addmod(y, z)),
    (x, y, z) => Expr::AddMod(Box::new(x), Box::new(y), Box::new(z)),
  }
}

pub fn mulmod(a: Box<Expr>, b: Box<Expr>, m: Box<Expr>) -> Expr {
  match (unbox(a), unbox(b), unbox(m)) {
    (Expr::Lit(x), Expr::Lit(y), Expr::Lit(z)) => Expr::Lit(x.mulmod(y, z)),
    (x, y, z) => Expr::MulMod(Box::new(x), Box::new(y), Box::new(z)),
  }
}

pub fn exp(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a.exp(b)),
    (a, b) => Expr::Exp(Box::new(a), Box::new(b)),
  }
}

pub fn sex(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(b), Expr::Lit(x)) => Expr::Lit(W256::sex(b, x)),
    (a, b) => Expr::SEx(Box::new(a), Box::new(b)),
  }
}

// Comparison -------------------------------------------------------------------------------------

pub fn lt(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => bool_word(a < b),
    (a, b) => Expr::LT(Box::new(a), Box::new(b)),
  }
}

pub fn gt(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => bool_word(a > b),
    (a, b) => Expr::GT(Box::new(a), Box::new(b)),
  }
}

pub fn leq(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => bool_word(a <= b),
    (a, b) => Expr::IsZero(Box::new(Expr::GT(Box::new(a), Box::new(b)))),
  }
}

pub fn geq(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => bool_word(a >= b),
    (a, b) => Expr::IsZero(Box::new(Expr::LT(Box::new(a), Box::new(b)))),
  }
}

fn signed_cmp(a: W256, b: W256) -> std::cmp::Ordering {
  match (a.is_neg(), b.is_neg()) {
    (true, false) => std::cmp::Ordering::Less,
    (false, true) => std::cmp::Ordering::Greater,
    _ => a.cmp(&b),
  }
}

pub fn slt(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => bool_word(signed_cmp(a, b) == std::cmp::Ordering::Less),
    (a, b) => Expr::SLT(Box::new(a), Box::new(b)),
  }
}

pub fn sgt(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => bool_word(signed_cmp(a, b) == std::cmp::Ordering::Greater),
    (a, b) => Expr::SGT(Box::new(a), Box::new(b)),
  }
}

pub fn eq(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => bool_word(a == b),
    (a, b) => {
      if a == b {
        bool_word(true)
      } else {
        Expr::Eq(Box::new(a), Box::new(b))
      }
    }
  }
}

pub fn iszero(e: Box<Expr>) -> Expr {
  match unbox(e) {
    Expr::Lit(a) => bool_word(a.is_zero()),
    a => Expr::IsZero(Box::new(a)),
  }
}

// Bitwise ----------------------------------------------------------------------------------------

pub fn and(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a & b),
    (a, b) => Expr::And(Box::new(a), Box::new(b)),
  }
}

pub fn or(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a | b),
    (a, b) => Expr::Or(Box::new(a), Box::new(b)),
  }
}

pub fn xor(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(a), Expr::Lit(b)) => Expr::Lit(a ^ b),
    (a, b) => Expr::Xor(Box::new(a), Box::new(b)),
  }
}

pub fn not(e: Box<Expr>) -> Expr {
  match unbox(e) {
    Expr::Lit(a) => Expr::Lit(!a),
    a => Expr::Not(Box::new(a)),
  }
}

/// SHL: first operand is the shift amount.
pub fn shl(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(s), Expr::Lit(v)) => {
      if s.fits_u64() && s.as_u64() < 256 {
        Expr::Lit(v << s.as_u64() as u32)
      } else {
        Expr::Lit(W256::zero())
      }
    }
    (a, b) => Expr::SHL(Box::new(a), Box::new(b)),
  }
}

/// SHR: first operand is the shift amount.
pub fn shr(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(s), Expr::Lit(v)) => {
      if s.fits_u64() && s.as_u64() < 256 {
        Expr::Lit(v >> s.as_u64() as u32)
      } else {
        Expr::Lit(W256::zero())
      }
    }
    (a, b) => Expr::SHR(Box::new(a), Box::new(b)),
  }
}

/// SAR: first operand is the shift amount.
pub fn sar(l: Box<Expr>, r: Box<Expr>) -> Expr {
  match (unbox(l), unbox(r)) {
    (Expr::Lit(s), Expr::Lit(v)) => Expr::Lit(v.sar(s)),
    (a, b) => Expr::SAR(Box::new(a), Box::new(b)),
  }
}

/// A byte-kind expression widened to a word.
pub fn pad_byte_word(b: Expr) -> Expr {
  match b {
    Expr::LitByte(v) => Expr::Lit(W256(v as u128, 0)),
    other => other,
  }
}

/// BYTE: the `i`-th byte of `w` counting from the most significant, as a word.
pub fn index_word(i: Box<Expr>, w: Box<Expr>) -> Expr {
  match (unbox(i), unbox(w)) {
    (Expr::Lit(i), Expr::Lit(w)) => {
      if i.fits_u64() && i.as_u64() < 32 {
        let byte = w.to_be_bytes()[i.as_u64() as usize];
        Expr::Lit(W256(byte as u128, 0))
      } else {
        Expr::Lit(W256::zero())
      }
    }
    (i, w) => Expr::IndexWord(Box::new(i), Box::new(w)),
  }
}

// Buffers ----------------------------------------------------------------------------------------

pub fn read_byte(idx: Box<Expr>, buf: Box<Expr>) -> Expr {
  let idx = unbox(idx);
  match (maybe_lit_word(&idx), unbox(buf)) {
    (Some(i), Expr::ConcreteBuf(bytes)) => {
      if i.fits_u64() && (i.as_u64() as usize) < bytes.len() {
        Expr::LitByte(bytes[i.as_u64() as usize])
      } else {
        Expr::LitByte(0)
      }
    }
    (Some(i), Expr::WriteByte(off, byte, prev)) => match maybe_lit_word(&off) {
      Some(o) if o == i => unbox(byte),
      Some(_) => read_byte(Box::new(Expr::Lit(i)), prev),
      None => Expr::ReadByte(
        Box::new(Expr::Lit(i)),
        Box::new(Expr::WriteByte(off, byte, prev)),
      ),
    },
    (Some(i), Expr::WriteWord(off, word, prev)) => match maybe_lit_word(&off) {
      Some(o) if i >= o && i < o + W256(32, 0) => {
        let pos = (i - o).as_u64();
        match unbox(word) {
          Expr::Lit(w) => Expr::LitByte(w.to_be_bytes()[pos as usize]),
          sym => Expr::IndexWord(Box::new(Expr::Lit(W256(pos as u128, 0))), Box::new(sym)),
        }
      }
      Some(_) => read_byte(Box::new(Expr::Lit(i)), prev),
      None => Expr::ReadByte(
        Box::new(Expr::Lit(i)),
        Box::new(Expr::WriteWord(off, word, prev)),
      ),
    },
    (Some(i), Expr::CopySlice(src_off, dst_off, size, src, dst)) => {
      match (maybe_lit_word(&src_off), maybe_lit_word(&dst_off), maybe_lit_word(&size)) {
        (Some(s), Some(d), Some(n)) => {
          if i >= d && i < d + n {
            read_byte(Box::new(Expr::Lit(i - d + s)), src)
          } else {
            read_byte(Box::new(Expr::Lit(i)), dst)
          }
        }
        _ => Expr::ReadByte(
          Box::new(Expr::Lit(i)),
          Box::new(Expr::CopySlice(src_off, dst_off, size, src, dst)),
        ),
      }
    }
    (_, b) => Expr::ReadByte(Box::new(idx), Box::new(b)),
  }
}

/// Read 32 bytes at `idx` as a big-endian word, zero-padded past the end.
pub fn read_word(idx: Box<Expr>, buf: Box<Expr>) -> Expr {
  let idx = unbox(idx);
  let buf = unbox(buf);
  if let Some(i) = maybe_lit_word(&idx) {
    if let Expr::ConcreteBuf(bytes) = &buf {
      if i.fits_u64() {
        let start = i.as_u64() as usize;
        let mut out = [0u8; 32];
        for (k, slot) in out.iter_mut().enumerate() {
          if let Some(b) = bytes.get(start.wrapping_add(k)) {
            *slot = *b;
          }
        }
        return Expr::Lit(W256::from_bytes(out.to_vec()));
      }
    }
    if let Expr::WriteWord(off, val, prev) = &buf {
      if let Some(o) = maybe_lit_word(off) {
        if o == i {
          return unbox(val.clone());
        }
        if i + W256(32, 0) <= o || o + W256(32, 0) <= i {
          return read_word(Box::new(Expr::Lit(i)), prev.clone());
        }
      }
    }
    // Try to assemble the word byte by byte.
    let mut out = [0u8; 32];
    let mut all_lit = true;
    for (k, slot) in out.iter_mut().enumerate() {
      match read_byte(Box::new(Expr::Lit(i + W256(k as u128, 0))), Box::new(buf.clone())) {
        Expr::LitByte(b) => *slot = b,
        _ => {
          all_lit = false;
          break;
        }
      }
    }
    if all_lit {
      return Expr::Lit(W256::from_bytes(out.to_vec()));
    }
  }
  Expr::ReadWord(Box::new(idx), Box::new(buf))
}

/// Read the first `n` (<= 32) bytes at `off` as a right-aligned word.
pub fn read_bytes(n: usize, off: Box<Expr>, buf: Box<Expr>) -> Expr {
  let n = n.min(32);
  let off = unbox(off);
  let buf = unbox(buf);
  if let Some(o) = maybe_lit_word(&off) {
    let mut out = Vec::with_capacity(n);
    for k in 0..n {
      match read_byte(Box::new(Expr::Lit(o + W256(k as u128, 0))), Box::new(buf.clone())) {
        Expr::LitByte(b) => out.push(b),
        _ => {
          let word = read_word(Box::new(Expr::Lit(o)), Box::new(buf));
          return shr(
            Box::new(Expr::Lit(W256((256 - 8 * n as u32) as u128, 0))),
            Box::new(word),
          );
        }
      }
    }
    return Expr::Lit(W256::from_bytes(out));
  }
  let word = read_word(Box::new(off), Box::new(buf));
  shr(Box::new(Expr::Lit(W256((256 - 8 * n as u32) as u128, 0))), Box::new(word))
}

pub fn write_byte(offset: Box<Expr>, byte: Box<Expr>, src: Box<Expr>) -> Expr {
  match (unbox(offset), unbox(byte), unbox(src)) {
    (Expr::Lit(o), Expr::LitByte(b), Expr::ConcreteBuf(mut buf)) if o.fits_u64() => {
      let pos = o.as_u64() as usize;
      if buf.len() <= pos {
        buf.resize(pos + 1, 0);
      }
      buf[pos] = b;
      Expr::ConcreteBuf(buf)
    }
    (o, b, s) => Expr::WriteByte(Box::new(o), Box::new(b), Box::new(s)),
  }
}

pub fn write_word(offset: Box<Expr>, value: Box<Expr>, src: Box<Expr>) -> Expr {
  match (unbox(offset), unbox(value), unbox(src)) {
    (Expr::Lit(o), Expr::Lit(v), Expr::ConcreteBuf(mut buf)) if o.fits_u64() => {
      let pos = o.as_u64() as usize;
      if buf.len() < pos + 32 {
        buf.resize(pos + 32, 0);
      }
      buf[pos..pos + 32].copy_from_slice(&v.to_be_bytes());
      Expr::ConcreteBuf(buf)
    }
    (o, v, s) => Expr::WriteWord(Box::new(o), Box::new(v), Box::new(s)),
  }
}

/// Copy `size` bytes of `src` starting at `src_offset` into `dst` at
/// `dst_offset`, zero-padding reads past the end of `src`.
pub fn copy_slice(
  src_offset: Box<Expr>,
  dst_offset: Box<Expr>,
  size: Box<Expr>,
  src: Box<Expr>,
  dst: Box<Expr>,
) -> Expr {
  if let Expr::Lit(n) = *size {
    if n.is_zero() {
      return unbox(dst);
    }
  }
  match (unbox(src_offset), unbox(dst_offset), unbox(size), unbox(src), unbox(dst)) {
    (Expr::Lit(s), Expr::Lit(d), Expr::Lit(n), Expr::ConcreteBuf(src_buf), Expr::ConcreteBuf(mut dst_buf))
      if s.fits_u64() && d.fits_u64() && n.fits_u64() =>
    {
      let (s, d, n) = (s.as_u64() as usize, d.as_u64() as usize, n.as_u64() as usize);
      if dst_buf.len() < d + n {
        dst_buf.resize(d + n, 0);
      }
      for k in 0..n {
        dst_buf[d + k] = src_buf.get(s + k).copied().unwrap_or(0);
      }
      Expr::ConcreteBuf(dst_buf)
    }
    (s, d, n, src, dst) => {
      Expr::CopySlice(Box::new(s), Box::new(d), Box::new(n), Box::new(src), Box::new(dst))
    }
  }
}

fn buf_length_lit(buf: &Expr) -> Option<W256> {
  match buf {
    Expr::ConcreteBuf(b) => Some(W256(b.len() as u128, 0)),
    Expr::WriteByte(off, _, prev) => {
      let o = maybe_lit_word(off)?;
      Some(std::cmp::max(o + W256::one(), buf_length_lit(prev)?))
    }
    Expr::WriteWord(off, _, prev) => {
      let o = maybe_lit_word(off)?;
      Some(std::cmp::max(o + W256(32, 0), buf_length_lit(prev)?))
    }
    Expr::CopySlice(_, dst_off, size, _, dst) => {
      let d = maybe_lit_word(dst_off)?;
      let n = maybe_lit_word(size)?;
      Some(std::cmp::max(d + n, buf_length_lit(dst)?))
    }
    _ => None,
  }
}

pub fn buf_length(buf: Expr) -> Expr {
  match buf_length_lit(&buf) {
    Some(n) => Expr::Lit(n),
    None => Expr::BufLength(Box::new(buf)),
  }
}

pub fn from_list(bytes: Vec<Expr>) -> Expr {
  let lits: Option<Vec<u8>> = bytes.iter().map(maybe_lit_byte).collect();
  match lits {
    Some(bs) => Expr::ConcreteBuf(bs),
    None => bytes.into_iter().enumerate().fold(Expr::ConcreteBuf(Vec::new()), |acc, (i, b)| {
      write_byte(Box::new(Expr::Lit(W256(i as u128, 0))), Box::new(b), Box::new(acc))
    }),
  }
}

pub fn to_list(buf: &Expr) -> Option<Vec<Expr>> {
  match buf {
    Expr::ConcreteBuf(bs) => Some(bs.iter().map(|b| Expr::LitByte(*b)).collect()),
    _ => None,
  }
}

/// Length of the longest fully-literal prefix of a buffer.
pub fn conc_prefix(buf: &Expr) -> Option<usize> {
  match buf {
    Expr::ConcreteBuf(bs) => Some(bs.len()),
    _ => None,
  }
}

// Storage ----------------------------------------------------------------------------------------

/// Look a slot up in a storage expression. `None` means the slot is absent
/// from a concrete base and the caller decides between zero and a fetch;
/// `Some` carries either the value or an `SLoad` term when the write history
/// cannot be resolved syntactically.
pub fn read_storage(addr: &Expr, slot: &Expr, store: &Expr) -> Option<Expr> {
  match store {
    Expr::ConcreteStore(m) => match (maybe_lit_addr(addr), maybe_lit_word(slot)) {
      (Some(a), Some(s)) => m.get(&a).and_then(|sm| sm.get(&s)).map(|v| Expr::Lit(*v)),
      _ => Some(Expr::SLoad(
        Box::new(addr.clone()),
        Box::new(slot.clone()),
        Box::new(store.clone()),
      )),
    },
    Expr::AbstractStore => Some(Expr::SLoad(
      Box::new(addr.clone()),
      Box::new(slot.clone()),
      Box::new(store.clone()),
    )),
    Expr::SStore(a2, s2, val, prev) => {
      if addr == &**a2 && slot == &**s2 {
        return Some((**val).clone());
      }
      let distinct = match (
        maybe_lit_addr(addr),
        maybe_lit_addr(a2),
        maybe_lit_word(slot),
        maybe_lit_word(s2),
      ) {
        (Some(a), Some(b), _, _) if a != b => true,
        (_, _, Some(x), Some(y)) if x != y => true,
        _ => false,
      };
      if distinct {
        read_storage(addr, slot, prev)
      } else {
        Some(Expr::SLoad(
          Box::new(addr.clone()),
          Box::new(slot.clone()),
          Box::new(store.clone()),
        ))
      }
    }
    _ => Some(Expr::SLoad(
      Box::new(addr.clone()),
      Box::new(slot.clone()),
      Box::new(store.clone()),
    )),
  }
}

pub fn write_storage(addr: Expr, slot: Expr, val: Expr, store: Expr) -> Expr {
  if let Expr::ConcreteStore(mut m) = store {
    return match (maybe_lit_addr(&addr), maybe_lit_word(&slot), maybe_lit_word(&val)) {
      (Some(a), Some(s), Some(v)) => {
        m.entry(a).or_default().insert(s, v);
        Expr::ConcreteStore(m)
      }
      _ => Expr::SStore(
        Box::new(addr),
        Box::new(slot),
        Box::new(val),
        Box::new(Expr::ConcreteStore(m)),
      ),
    };
  }
  Expr::SStore(Box::new(addr), Box::new(slot), Box::new(val), Box::new(store))
}

/// Whether the base of a storage expression is a concrete map, in which case
/// an unmatched read is zero rather than abstract.
pub fn storage_base_is_concrete(store: &Expr) -> bool {
  match store {
    Expr::ConcreteStore(_) => true,
    Expr::SStore(_, _, _, prev) => storage_base_is_concrete(prev),
    _ => false,
  }
}

/// Drop every slot belonging to `addr`. Only meaningful over a concrete
/// store; symbolic write history is left untouched.
pub fn reset_storage(store: Expr, addr: &Expr) -> Expr {
  match store {
    Expr::ConcreteStore(mut m) => {
      if let Some(a) = maybe_lit_addr(addr) {
        m.remove(&a);
      }
      Expr::ConcreteStore(m)
    }
    other => other,
  }
}
