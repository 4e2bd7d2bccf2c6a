use sevm::modules::expr::{
  add, buf_length, copy_slice, div, eq, geq, gt, index_word, iszero, leq, lt, mul, read_byte,
  read_storage, read_word, shl, shr, storage_base_is_concrete, sub, write_byte, write_storage,
  write_word,
};
use sevm::modules::types::{Expr, W256};

fn lit(n: u128) -> Box<Expr> {
  Box::new(Expr::Lit(W256(n, 0)))
}

#[test]
fn test_add_concrete() {
  assert_eq!(add(lit(3), lit(4)), Expr::Lit(W256(7, 0)));
}

#[test]
fn test_add_symbolic() {
  let y = Expr::Sub(lit(4), lit(2));
  assert_eq!(
    add(lit(3), Box::new(y.clone())),
    Expr::Add(lit(3), Box::new(y))
  );
}

#[test]
fn test_sub_concrete() {
  assert_eq!(sub(lit(10), lit(3)), Expr::Lit(W256(7, 0)));
}

#[test]
fn test_mul_concrete() {
  assert_eq!(mul(lit(3), lit(4)), Expr::Lit(W256(12, 0)));
}

#[test]
fn test_div_by_zero() {
  assert_eq!(div(lit(10), lit(0)), Expr::Lit(W256::zero()));
}

#[test]
fn test_comparisons() {
  assert_eq!(lt(lit(3), lit(4)), Expr::Lit(W256::one()));
  assert_eq!(lt(lit(5), lit(4)), Expr::Lit(W256::zero()));
  assert_eq!(gt(lit(5), lit(4)), Expr::Lit(W256::one()));
  assert_eq!(leq(lit(4), lit(4)), Expr::Lit(W256::one()));
  assert_eq!(geq(lit(3), lit(4)), Expr::Lit(W256::zero()));
  assert_eq!(eq(lit(4), lit(4)), Expr::Lit(W256::one()));
  assert_eq!(iszero(lit(0)), Expr::Lit(W256::one()));
  assert_eq!(iszero(lit(9)), Expr::Lit(W256::zero()));
}

#[test]
fn test_eq_syntactic() {
  let v = Expr::Var("x".into());
  assert_eq!(eq(Box::new(v.clone()), Box::new(v)), Expr::Lit(W256::one()));
}

#[test]
fn test_shifts() {
  assert_eq!(shl(lit(4), lit(1)), Expr::Lit(W256(16, 0)));
  assert_eq!(shr(lit(4), lit(16)), Expr::Lit(W256(1, 0)));
  assert_eq!(shl(lit(256), lit(1)), Expr::Lit(W256::zero()));
}

#[test]
fn test_index_word() {
  // byte 31 is the least significant
  assert_eq!(index_word(lit(31), lit(0xab)), Expr::Lit(W256(0xab, 0)));
  assert_eq!(index_word(lit(30), lit(0xab00)), Expr::Lit(W256(0xab, 0)));
  assert_eq!(index_word(lit(40), lit(0xab)), Expr::Lit(W256::zero()));
}

#[test]
fn test_read_byte_concrete() {
  let buf = Box::new(Expr::ConcreteBuf(vec![0x11, 0x22]));
  assert_eq!(read_byte(lit(1), buf.clone()), Expr::LitByte(0x22));
  assert_eq!(read_byte(lit(5), buf), Expr::LitByte(0));
}

#[test]
fn test_read_byte_through_writes() {
  let base = Expr::ConcreteBuf(vec![0xaa; 4]);
  let written = write_byte(lit(2), Box::new(Expr::LitByte(0x7f)), Box::new(base));
  assert_eq!(read_byte(lit(2), Box::new(written.clone())), Expr::LitByte(0x7f));
  assert_eq!(read_byte(lit(0), Box::new(written)), Expr::LitByte(0xaa));
}

#[test]
fn test_read_word_concrete() {
  let mut bytes = vec![0; 32];
  bytes[31] = 42;
  let buf = Box::new(Expr::ConcreteBuf(bytes));
  assert_eq!(read_word(lit(0), buf), Expr::Lit(W256(42, 0)));
}

#[test]
fn test_read_word_zero_pads_past_end() {
  let buf = Box::new(Expr::ConcreteBuf(vec![0x01]));
  assert_eq!(
    read_word(lit(0), buf),
    Expr::Lit(W256::from_bytes([vec![0x01], vec![0; 31]].concat()))
  );
}

#[test]
fn test_read_word_matches_write_word() {
  let sym = Expr::Var("x".into());
  let buf = write_word(lit(32), Box::new(sym.clone()), Box::new(Expr::AbstractBuf("m".into())));
  assert_eq!(read_word(lit(32), Box::new(buf.clone())), sym);
  // a disjoint read skips over the write
  let deeper = write_word(lit(0), lit(7), Box::new(buf));
  assert_eq!(read_word(lit(32), Box::new(deeper)), Expr::Var("x".into()));
}

#[test]
fn test_read_word_symbolic_index() {
  let idx = Expr::Var("i".into());
  let buf = Expr::AbstractBuf("data".into());
  assert_eq!(
    read_word(Box::new(idx.clone()), Box::new(buf.clone())),
    Expr::ReadWord(Box::new(idx), Box::new(buf))
  );
}

#[test]
fn test_write_word_concrete() {
  let buf = write_word(lit(0), lit(0x2a), Box::new(Expr::ConcreteBuf(Vec::new())));
  let mut expected = vec![0; 32];
  expected[31] = 0x2a;
  assert_eq!(buf, Expr::ConcreteBuf(expected));
}

#[test]
fn test_copy_slice_concrete() {
  let src = Box::new(Expr::ConcreteBuf(vec![1, 2, 3, 4]));
  let dst = Box::new(Expr::ConcreteBuf(vec![9, 9, 9, 9, 9, 9]));
  let out = copy_slice(lit(1), lit(2), lit(3), src, dst);
  assert_eq!(out, Expr::ConcreteBuf(vec![9, 9, 2, 3, 4, 9]));
}

#[test]
fn test_copy_slice_pads_source() {
  let src = Box::new(Expr::ConcreteBuf(vec![1]));
  let dst = Box::new(Expr::ConcreteBuf(Vec::new()));
  let out = copy_slice(lit(0), lit(0), lit(4), src, dst);
  assert_eq!(out, Expr::ConcreteBuf(vec![1, 0, 0, 0]));
}

#[test]
fn test_copy_slice_zero_size() {
  let dst = Expr::ConcreteBuf(vec![5, 6]);
  let out = copy_slice(lit(0), lit(0), lit(0), Box::new(Expr::AbstractBuf("s".into())), Box::new(dst.clone()));
  assert_eq!(out, dst);
}

#[test]
fn test_buf_length() {
  assert_eq!(buf_length(Expr::ConcreteBuf(vec![0; 5])), Expr::Lit(W256(5, 0)));
  let written = write_word(lit(10), Box::new(Expr::Var("x".into())), Box::new(Expr::ConcreteBuf(Vec::new())));
  assert_eq!(buf_length(written), Expr::Lit(W256(42, 0)));
  let abs = Expr::AbstractBuf("b".into());
  assert_eq!(buf_length(abs.clone()), Expr::BufLength(Box::new(abs)));
}

#[test]
fn test_storage_round_trip() {
  let addr = Expr::LitAddr(W256(0xaaaa, 0));
  let store = write_storage(
    addr.clone(),
    Expr::Lit(W256(1, 0)),
    Expr::Lit(W256(99, 0)),
    Expr::ConcreteStore(Default::default()),
  );
  assert!(storage_base_is_concrete(&store));
  assert_eq!(
    read_storage(&addr, &Expr::Lit(W256(1, 0)), &store),
    Some(Expr::Lit(W256(99, 0)))
  );
  assert_eq!(read_storage(&addr, &Expr::Lit(W256(2, 0)), &store), None);
}

#[test]
fn test_storage_symbolic_write_chain() {
  let addr = Expr::LitAddr(W256(0xaaaa, 0));
  let slot = Expr::Var("s".into());
  let store = write_storage(
    addr.clone(),
    slot.clone(),
    Expr::Lit(W256(7, 0)),
    Expr::ConcreteStore(Default::default()),
  );
  // the same symbolic slot reads back the write
  assert_eq!(read_storage(&addr, &slot, &store), Some(Expr::Lit(W256(7, 0))));
  // a literal slot cannot be proven distinct from the symbolic one
  match read_storage(&addr, &Expr::Lit(W256(3, 0)), &store) {
    Some(Expr::SLoad(_, _, _)) => {}
    other => panic!("expected an SLoad term, got {:?}", other),
  }
}

#[test]
fn test_storage_abstract_base() {
  let addr = Expr::LitAddr(W256(0xaaaa, 0));
  assert!(!storage_base_is_concrete(&Expr::AbstractStore));
  match read_storage(&addr, &Expr::Lit(W256(0, 0)), &Expr::AbstractStore) {
    Some(Expr::SLoad(_, _, _)) => {}
    other => panic!("expected an SLoad term, got {:?}", other),
  }
}
