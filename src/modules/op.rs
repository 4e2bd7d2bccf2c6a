use std::fmt;

/// A decoded EVM operation. `Push(n)`, `Dup(n)`, `Swap(n)` and `Log(n)` carry
/// the 1-based variant index; `Unknown` carries the raw byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  Stop,
  Add,
  Mul,
  Sub,
  Div,
  Sdiv,
  Mod,
  Smod,
  Addmod,
  Mulmod,
  Exp,
  Signextend,
  Lt,
  Gt,
  Slt,
  Sgt,
  Eq,
  Iszero,
  And,
  Or,
  Xor,
  Not,
  Byte,
  Shl,
  Shr,
  Sar,
  Sha3,
  Address,
  Balance,
  Origin,
  Caller,
  Callvalue,
  Calldataload,
  Calldatasize,
  Calldatacopy,
  Codesize,
  Codecopy,
  Gasprice,
  Extcodesize,
  Extcodecopy,
  Returndatasize,
  Returndatacopy,
  Extcodehash,
  Blockhash,
  Coinbase,
  Timestamp,
  Number,
  PrevRandao,
  Gaslimit,
  Chainid,
  Selfbalance,
  Basefee,
  Pop,
  Mload,
  Mstore,
  Mstore8,
  Sload,
  Sstore,
  Jump,
  Jumpi,
  Pc,
  Msize,
  Gas,
  Jumpdest,
  Push0,
  Push(u8),
  Dup(u8),
  Swap(u8),
  Log(u8),
  Create,
  Call,
  Callcode,
  Return,
  Delegatecall,
  Create2,
  Staticcall,
  Revert,
  Selfdestruct,
  Unknown(u8),
}

pub fn get_op(byte: u8) -> Op {
  match byte {
    0x00 => Op::Stop,
    0x01 => Op::Add,
    0x02 => Op::Mul,
    0x03 => Op::Sub,
    0x04 => Op::Div,
    0x05 => Op::Sdiv,
    0x06 => Op::Mod,
    0x07 => Op::Smod,
    0x08 => Op::Addmod,
    0x09 => Op::Mulmod,
    0x0a => Op::Exp,
    0x0b => Op::Signextend,
    0x10 => Op::Lt,
    0x11 => Op::Gt,
    0x12 => Op::Slt,
    0x13 => Op::Sgt,
    0x14 => Op::Eq,
    0x15 => Op::Iszero,
    0x16 => Op::And,
    0x17 => Op::Or,
    0x18 => Op::Xor,
    0x19 => Op::Not,
    0x1a => Op::Byte,
    0x1b => Op::Shl,
    0x1c => Op::Shr,
    0x1d => Op::Sar,
    0x20 => Op::Sha3,
    0x30 => Op::Address,
    0x31 => Op::Balance,
    0x32 => Op::Origin,
    0x33 => Op::Caller,
    0x34 => Op::Callvalue,
    0x35 => Op::Calldataload,
    0x36 => Op::Calldatasize,
    0x37 => Op::Calldatacopy,
    0x38 => Op::Codesize,
    0x39 => Op::Codecopy,
    0x3a => Op::Gasprice,
    0x3b => Op::Extcodesize,
    0x3c => Op::Extcodecopy,
    0x3d => Op::Returndatasize,
    0x3e => Op::Returndatacopy,
    0x3f => Op::Extcodehash,
    0x40 => Op::Blockhash,
    0x41 => Op::Coinbase,
    0x42 => Op::Timestamp,
    0x43 => Op::Number,
    0x44 => Op::PrevRandao,
    0x45 => Op::Gaslimit,
    0x46 => Op::Chainid,
    0x47 => Op::Selfbalance,
    0x48 => Op::Basefee,
    0x50 => Op::Pop,
    0x51 => Op::Mload,
    0x52 => Op::Mstore,
    0x53 => Op::Mstore8,
    0x54 => Op::Sload,
    0x55 => Op::Sstore,
    0x56 => Op::Jump,
    0x57 => Op::Jumpi,
    0x58 => Op::Pc,
    0x59 => Op::Msize,
    0x5a => Op::Gas,
    0x5b => Op::Jumpdest,
    0x5f => Op::Push0,
    0x60..=0x7f => Op::Push(byte - 0x5f),
    0x80..=0x8f => Op::Dup(byte - 0x7f),
    0x90..=0x9f => Op::Swap(byte - 0x8f),
    0xa0..=0xa4 => Op::Log(byte - 0xa0),
    0xf0 => Op::Create,
    0xf1 => Op::Call,
    0xf2 => Op::Callcode,
    0xf3 => Op::Return,
    0xf4 => Op::Delegatecall,
    0xf5 => Op::Create2,
    0xfa => Op::Staticcall,
    0xfd => Op::Revert,
    0xff => Op::Selfdestruct,
    _ => Op::Unknown(byte),
  }
}

/// Byte width of the instruction at `byte`: 1 for everything except PUSHn.
pub fn op_size(byte: u8) -> usize {
  match byte {
    0x60..=0x7f => (byte - 0x5f) as usize + 1,
    _ => 1,
  }
}

impl fmt::Display for Op {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Op::Push(n) => write!(f, "PUSH{}", n),
      Op::Dup(n) => write!(f, "DUP{}", n),
      Op::Swap(n) => write!(f, "SWAP{}", n),
      Op::Log(n) => write!(f, "LOG{}", n),
      Op::Unknown(b) => write!(f, "UNKNOWN(0x{:02x})", b),
      Op::PrevRandao => write!(f, "PREVRANDAO"),
      other => write!(f, "{}", format!("{:?}", other).to_uppercase()),
    }
  }
}

/// Decode a whole code region into `(byte_offset, op)` pairs. Push immediates
/// are skipped, so the result indexes operations, not bytes.
pub fn mk_code_ops(code: &[u8]) -> Vec<(usize, Op)> {
  let mut ops = Vec::new();
  let mut pc = 0usize;
  while pc < code.len() {
    let byte = code[pc];
    ops.push((pc, get_op(byte)));
    pc += op_size(byte);
  }
  ops
}

/// Map every byte position to the index (into `mk_code_ops`) of the operation
/// covering it. Bytes inside push immediates map to their PUSH, which is what
/// makes JUMPDEST validation reject `0x5b` hiding in push data.
pub fn mk_op_idx_map(code: &[u8]) -> Vec<i32> {
  let mut map = vec![0i32; code.len()];
  let mut pc = 0usize;
  let mut ix = 0i32;
  while pc < code.len() {
    let width = op_size(code[pc]);
    for entry in map.iter_mut().skip(pc).take(width) {
      *entry = ix;
    }
    pc += width;
    ix += 1;
  }
  map
}
