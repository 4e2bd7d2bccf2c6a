use std::collections::HashMap;

use log::debug;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::modules::abi::{
  abi_encode, decode_static_arg, decode_string_array, encode_error_string, selector_word, AbiValue,
};
use crate::modules::expr::{
  add, addmod, addr_to_word, and, buf_length, conc_prefix, copy_slice, div, emod, eq, exp, gt,
  index_word, iszero, lt, maybe_lit_addr, maybe_lit_byte, maybe_lit_word, mulmod, not, or,
  read_byte, read_storage, read_word, reset_storage, sar, sdiv, sex, sgt, shl, shr, slt, smod,
  storage_base_is_concrete, sub, write_storage, write_word, xor,
};
use crate::modules::expr::mul;
use crate::modules::feeschedule::FeeSchedule;
use crate::modules::keccak::{keccak_bytes, keccak_prime, word32};
use crate::modules::op::{get_op, mk_code_ops, mk_op_idx_map, op_size, Op};
use crate::modules::precompiled::{execute_precompile, PrecompileResult};
use crate::modules::rlp::{rlp_addr_full, rlp_list, rlp_word_256};
use crate::modules::types::{
  Addr, BaseState, BranchCondition, Cache, Choose, Contract, ContractCode, Env, EvmError, Expr,
  Frame, FrameContext, FrameResult, FrameState, Memory, PendingOp, Prop, Query, RuntimeCodeStruct,
  RuntimeConfig, SubState, Trace, TraceData, TraceTree, TxState, VMOpts, VMResult, W256, VM,
};
use crate::modules::types::Block;

/// Step-internal result: `Err` carries either a frame-terminating error or a
/// `Query`/`Choose` suspension, told apart at the top of `exec1`.
pub type Step<T> = Result<T, EvmError>;

const STACK_LIMIT: usize = 1024;
const CALL_DEPTH_LIMIT: usize = 1024;

/// Low 160 bits of keccak("hevm cheat code").
pub fn cheat_code_addr() -> Addr {
  let hash = keccak_prime(b"hevm cheat code");
  W256(hash.0, hash.1 & 0xffffffff)
}

// Contract construction --------------------------------------------------------------------------

fn code_concrete_bytes(code: &ContractCode) -> Vec<u8> {
  match code {
    ContractCode::InitCode(prefix, _) => prefix.clone(),
    ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)) => bytes.clone(),
    ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes)) => {
      // Symbolic bytes decode as INVALID so the op maps stay total.
      bytes.iter().map(|b| maybe_lit_byte(b).unwrap_or(0xfe)).collect()
    }
  }
}

pub fn hashcode(code: &ContractCode) -> Expr {
  match code {
    ContractCode::InitCode(prefix, tail) => match tail.as_ref() {
      Expr::ConcreteBuf(t) if t.is_empty() => Expr::Lit(keccak_prime(prefix)),
      _ => Expr::Keccak(Box::new(copy_slice(
        Box::new(Expr::Lit(W256::zero())),
        Box::new(Expr::Lit(W256(prefix.len() as u128, 0))),
        Box::new(buf_length((**tail).clone())),
        tail.clone(),
        Box::new(Expr::ConcreteBuf(prefix.clone())),
      ))),
    },
    ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)) => {
      Expr::Lit(keccak_prime(bytes))
    }
    ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes)) => {
      Expr::Keccak(Box::new(crate::modules::expr::from_list(bytes.clone())))
    }
  }
}

pub fn is_creation(code: &ContractCode) -> bool {
  matches!(code, ContractCode::InitCode(_, _))
}

pub fn initial_contract(code: ContractCode) -> Contract {
  let bytes = code_concrete_bytes(&code);
  Contract {
    codehash: hashcode(&code),
    op_idx_map: mk_op_idx_map(&bytes),
    code_ops: mk_code_ops(&bytes),
    balance: Expr::Lit(W256::zero()),
    nonce: if is_creation(&code) { Some(1) } else { Some(0) },
    external: false,
    code,
  }
}

pub fn abstract_contract(code: ContractCode, addr: Expr) -> Contract {
  let mut c = initial_contract(code);
  c.balance = Expr::Balance(Box::new(addr));
  c.nonce = None;
  c
}

pub fn empty_contract() -> Contract {
  initial_contract(ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(Vec::new())))
}

pub fn opslen(code: &ContractCode) -> usize {
  match code {
    ContractCode::InitCode(prefix, _) => prefix.len(),
    ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)) => bytes.len(),
    ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes)) => bytes.len(),
  }
}

fn codelen(code: &ContractCode) -> Expr {
  match code {
    ContractCode::InitCode(prefix, tail) => match tail.as_ref() {
      Expr::ConcreteBuf(t) if t.is_empty() => Expr::Lit(W256(prefix.len() as u128, 0)),
      _ => add(
        Box::new(Expr::Lit(W256(prefix.len() as u128, 0))),
        Box::new(buf_length((**tail).clone())),
      ),
    },
    ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)) => {
      Expr::Lit(W256(bytes.len() as u128, 0))
    }
    ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes)) => {
      Expr::Lit(W256(bytes.len() as u128, 0))
    }
  }
}

/// The whole code as a buffer, for CODECOPY. Init code with a symbolic tail
/// becomes the tail spliced after the concrete prefix.
fn to_buf(code: &ContractCode) -> Expr {
  match code {
    ContractCode::InitCode(prefix, tail) => match tail.as_ref() {
      Expr::ConcreteBuf(t) if t.is_empty() => Expr::ConcreteBuf(prefix.clone()),
      _ => copy_slice(
        Box::new(Expr::Lit(W256::zero())),
        Box::new(Expr::Lit(W256(prefix.len() as u128, 0))),
        Box::new(buf_length((**tail).clone())),
        tail.clone(),
        Box::new(Expr::ConcreteBuf(prefix.clone())),
      ),
    },
    ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)) => {
      Expr::ConcreteBuf(bytes.clone())
    }
    ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes)) => {
      crate::modules::expr::from_list(bytes.clone())
    }
  }
}

pub fn bytecode(contract: &Contract) -> Option<Expr> {
  match &contract.code {
    ContractCode::InitCode(_, _) => Some(Expr::ConcreteBuf(Vec::new())),
    code => Some(to_buf(code)),
  }
}

pub fn is_empty_account(c: &Contract) -> bool {
  let no_code = match &c.code {
    ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(b)) => b.is_empty(),
    _ => false,
  };
  no_code
    && c.nonce == Some(0)
    && maybe_lit_word(&c.balance).map(|b| b.is_zero()).unwrap_or(false)
}

// Gas math ---------------------------------------------------------------------------------------

pub fn ceil_div(a: u64, b: u64) -> u64 {
  if b == 0 {
    0
  } else {
    (a + b - 1) / b
  }
}

/// EIP-150: the most gas a caller may pass along.
pub fn all_but_one_64th(n: u64) -> u64 {
  n - n / 64
}

/// Quadratic memory pricing over the word count, saturating so absurd sizes
/// become an out-of-gas rather than an overflow.
pub fn memory_cost(fees: &FeeSchedule, byte_count: u64) -> u64 {
  let words = ceil_div(byte_count, 32) as u128;
  let cost = fees.g_memory as u128 * words + words * words / 512;
  if cost > u64::MAX as u128 {
    u64::MAX
  } else {
    cost as u64
  }
}

fn ceil32(n: u64) -> u64 {
  ceil_div(n, 32) * 32
}

/// `(total_cost, init_gas)` for CREATE / CREATE2; the hash charge only
/// applies when the target address commits to the init code.
pub fn cost_of_create(fees: &FeeSchedule, available: u64, init_size: u64, hash_needed: bool) -> (u64, u64) {
  let hash_cost = if hash_needed { fees.g_sha3word * ceil_div(init_size, 32) } else { 0 };
  let create_cost = fees.g_create + hash_cost;
  let init_gas = if available > create_cost { all_but_one_64th(available - create_cost) } else { 0 };
  (create_cost + init_gas, init_gas)
}

// Address derivation -----------------------------------------------------------------------------

pub fn create_address(sender: Addr, nonce: u64) -> Addr {
  let encoded = rlp_list(vec![rlp_addr_full(sender), rlp_word_256(W256(nonce as u128, 0))]);
  let hash = keccak_bytes(&encoded);
  W256::from_bytes(hash[12..].to_vec())
}

pub fn create2_address(sender: Addr, salt: W256, init_code: &[u8]) -> Addr {
  let mut preimage = vec![0xffu8];
  preimage.extend(&sender.to_be_bytes()[12..]);
  preimage.extend(salt.to_be_bytes());
  preimage.extend(keccak_bytes(init_code));
  let hash = keccak_bytes(&preimage);
  W256::from_bytes(hash[12..].to_vec())
}

/// Split a creation buffer into its longest literal prefix and symbolic tail.
fn split_init_code(buf: Expr) -> (Vec<u8>, Expr) {
  match conc_prefix(&buf) {
    Some(_) => match buf {
      Expr::ConcreteBuf(bytes) => (bytes, Expr::ConcreteBuf(Vec::new())),
      other => (Vec::new(), other),
    },
    None => (Vec::new(), buf),
  }
}

// Cache merging ----------------------------------------------------------------------------------

/// Union of fetched-storage maps, newer entries winning.
pub fn unify_cached_storage(
  base: &mut HashMap<W256, HashMap<W256, W256>>,
  other: &HashMap<W256, HashMap<W256, W256>>,
) {
  for (addr, slots) in other {
    let entry = base.entry(*addr).or_default();
    for (slot, val) in slots {
      entry.insert(*slot, *val);
    }
  }
}

/// Union of fetched-contract maps, newer entries winning.
pub fn unify_cached_contract(base: &mut HashMap<Addr, Contract>, other: &HashMap<Addr, Contract>) {
  for (addr, c) in other {
    base.insert(*addr, c.clone());
  }
}

/// Merge a speculative path's cache back into a longer-lived one.
pub fn merge_caches(base: &mut Cache, other: &Cache) {
  unify_cached_contract(&mut base.fetched_contracts, &other.fetched_contracts);
  unify_cached_storage(&mut base.fetched_storage, &other.fetched_storage);
  for (k, v) in &other.path {
    base.path.insert(k.clone(), *v);
  }
}

// VM construction --------------------------------------------------------------------------------

pub fn blank_state() -> FrameState {
  FrameState {
    contract: Expr::LitAddr(W256::zero()),
    code_contract: Expr::LitAddr(W256::zero()),
    code: ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(Vec::new())),
    pc: 0,
    stack: Vec::new(),
    memory: Memory::ConcreteMemory(Vec::new()),
    memory_size: 0,
    calldata: Expr::ConcreteBuf(Vec::new()),
    callvalue: Expr::Lit(W256::zero()),
    caller: Expr::LitAddr(W256::zero()),
    gas: 0,
    returndata: Expr::ConcreteBuf(Vec::new()),
    static_flag: false,
  }
}

pub fn make_vm(opts: VMOpts) -> VM {
  let mut accessed_addresses: std::collections::HashSet<Expr> = std::collections::HashSet::new();
  accessed_addresses.insert(opts.origin.clone());
  accessed_addresses.insert(opts.address.clone());
  for i in 1..=9u64 {
    accessed_addresses.insert(Expr::LitAddr(W256(i as u128, 0)));
  }
  let mut accessed_storage_keys: std::collections::HashSet<(Expr, W256)> =
    std::collections::HashSet::new();
  for (addr, slots) in &opts.tx_access_list {
    accessed_addresses.insert(addr.clone());
    for slot in slots {
      accessed_storage_keys.insert((addr.clone(), *slot));
    }
  }
  let touched = if opts.create {
    vec![opts.origin.clone()]
  } else {
    vec![opts.origin.clone(), opts.address.clone()]
  };

  let mut contracts: HashMap<Expr, Contract> = opts.other_contracts.into_iter().collect();
  contracts.insert(opts.address.clone(), opts.contract);

  let storage_base = match opts.base_state {
    BaseState::EmptyBase => Expr::ConcreteStore(Default::default()),
    BaseState::AbstractBase => Expr::AbstractStore,
  };

  VM {
    result: None,
    frames: Vec::new(),
    state: FrameState {
      contract: opts.address.clone(),
      code_contract: opts.address.clone(),
      code: contracts
        .get(&opts.address)
        .map(|c| c.code.clone())
        .unwrap_or(ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(Vec::new()))),
      pc: 0,
      stack: Vec::new(),
      memory: Memory::ConcreteMemory(Vec::new()),
      memory_size: 0,
      calldata: opts.calldata.0.clone(),
      callvalue: opts.value.clone(),
      caller: opts.caller.clone(),
      gas: opts.gas,
      returndata: Expr::ConcreteBuf(Vec::new()),
      static_flag: false,
    },
    env: Env {
      contracts,
      chain_id: opts.chain_id,
      storage: storage_base,
      orig_storage: HashMap::new(),
      sha3_preimages: HashMap::new(),
    },
    block: Block {
      coinbase: opts.coinbase,
      timestamp: opts.timestamp,
      number: opts.number,
      prev_randao: opts.prev_randao,
      gaslimit: opts.block_gaslimit,
      base_fee: opts.base_fee,
      max_code_size: opts.max_code_size,
      schedule: opts.schedule,
    },
    tx: TxState {
      gasprice: opts.gasprice,
      gaslimit: opts.gaslimit,
      priority_fee: opts.priority_fee,
      origin: opts.origin,
      to_addr: opts.address,
      value: opts.value,
      substate: SubState {
        selfdestructs: Vec::new(),
        touched_accounts: touched,
        accessed_addresses,
        accessed_storage_keys,
        refunds: Vec::new(),
      },
      is_create: opts.create,
      tx_reversion: HashMap::new(),
    },
    logs: Vec::new(),
    traces: TraceTree::new(),
    cache: Cache::default(),
    burned: 0,
    iterations: HashMap::new(),
    constraints: opts.calldata.1,
    keccak_eqs: Vec::new(),
    pending: None,
    config: RuntimeConfig { allow_ffi: opts.allow_ffi, base_state: opts.base_state },
  }
}

// The interpreter --------------------------------------------------------------------------------

impl VM {
  /// Interpret a single operation, or do nothing if a result is pending.
  pub fn exec1(&mut self) {
    if self.result.is_some() {
      return;
    }
    match self.step() {
      Ok(()) => {}
      Err(e) => self.handle_stop(e),
    }
  }

  fn handle_stop(&mut self, e: EvmError) {
    match e {
      EvmError::Query(_) | EvmError::Choose(_) => {
        self.result = Some(VMResult::VMFailure(e));
      }
      _ => {
        self.trace(TraceData::ErrorTrace(e.clone()));
        if let Err(e2) = self.finish_frame(FrameResult::FrameErrored(e)) {
          self.result = Some(VMResult::VMFailure(e2));
        }
      }
    }
  }

  fn current_contract(&self) -> Step<Contract> {
    self.env.contracts.get(&self.state.code_contract).cloned().ok_or_else(|| {
      EvmError::UnexpectedSymbolicArg(
        self.state.pc,
        "executing code of an unknown contract".into(),
        vec![self.state.code_contract.clone()],
      )
    })
  }

  // Small state helpers --------------------------------------------------------------------------

  fn burn(&mut self, n: u64) -> Step<()> {
    if self.state.gas < n {
      return Err(EvmError::OutOfGas(self.state.gas, n));
    }
    self.state.gas -= n;
    self.burned += n;
    Ok(())
  }

  fn limit_stack(&self, grow: usize) -> Step<()> {
    if self.state.stack.len() + grow > STACK_LIMIT {
      Err(EvmError::StackLimitExceeded)
    } else {
      Ok(())
    }
  }

  fn require_stack(&self, n: usize) -> Step<()> {
    if self.state.stack.len() < n {
      Err(EvmError::StackUnderrun)
    } else {
      Ok(())
    }
  }

  /// The i-th stack item counting from the top.
  fn peek(&self, i: usize) -> Step<Expr> {
    let len = self.state.stack.len();
    if i >= len {
      return Err(EvmError::StackUnderrun);
    }
    Ok((*self.state.stack[len - 1 - i]).clone())
  }

  fn popn(&mut self, n: usize) {
    let len = self.state.stack.len();
    self.state.stack.truncate(len.saturating_sub(n));
  }

  fn push_sym(&mut self, e: Expr) {
    self.state.stack.push(Box::new(e));
  }

  fn push_w256(&mut self, w: W256) {
    self.push_sym(Expr::Lit(w));
  }

  fn next(&mut self, opbyte: u8) {
    self.state.pc += op_size(opbyte);
  }

  fn not_static(&self) -> Step<()> {
    if self.state.static_flag {
      Err(EvmError::StateChangeWhileStatic)
    } else {
      Ok(())
    }
  }

  fn sym_arg(&self, msg: &str, exprs: Vec<Expr>) -> EvmError {
    EvmError::UnexpectedSymbolicArg(self.state.pc, msg.to_string(), exprs)
  }

  fn force_lit(&self, e: &Expr, msg: &str) -> Step<W256> {
    maybe_lit_word(e).ok_or_else(|| self.sym_arg(msg, vec![e.clone()]))
  }

  fn force_u64(&self, e: &Expr, msg: &str) -> Step<u64> {
    let w = self.force_lit(e, msg)?;
    if w.fits_u64() {
      Ok(w.as_u64())
    } else {
      Err(EvmError::IllegalOverflow)
    }
  }

  fn force_addr(&self, e: &Expr, msg: &str) -> Step<Expr> {
    maybe_lit_addr(e).map(Expr::LitAddr).ok_or_else(|| self.sym_arg(msg, vec![e.clone()]))
  }

  fn force_concrete_buf(&self, e: &Expr, msg: &str) -> Step<Vec<u8>> {
    match e {
      Expr::ConcreteBuf(b) => Ok(b.clone()),
      other => Err(self.sym_arg(msg, vec![other.clone()])),
    }
  }

  fn trace(&mut self, data: TraceData) {
    let op_ix = self
      .env
      .contracts
      .get(&self.state.code_contract)
      .and_then(|c| c.op_idx_map.get(self.state.pc).copied())
      .unwrap_or(-1);
    self.traces.insert(Trace { op_ix, contract: self.state.contract.clone(), trace_data: data });
  }

  fn trace_push(&mut self, data: TraceData) {
    let op_ix = self
      .env
      .contracts
      .get(&self.state.code_contract)
      .and_then(|c| c.op_idx_map.get(self.state.pc).copied())
      .unwrap_or(-1);
    self.traces.push(Trace { op_ix, contract: self.state.contract.clone(), trace_data: data });
  }

  // Memory ---------------------------------------------------------------------------------------

  /// Charge for and perform any expansion needed by an access at
  /// `[offset, offset + size)`. Zero-length accesses never extend memory.
  fn access_memory_range(&mut self, offset: u64, size: u64) -> Step<()> {
    if size == 0 {
      return Ok(());
    }
    let end = offset.checked_add(size).ok_or(EvmError::IllegalOverflow)?;
    let new_size = ceil32(end.max(self.state.memory_size));
    if new_size > self.state.memory_size {
      let fees = self.block.schedule;
      let expansion = memory_cost(&fees, new_size) - memory_cost(&fees, self.state.memory_size);
      self.burn(expansion)?;
      self.state.memory_size = new_size;
    }
    if let Memory::ConcreteMemory(mem) = &mut self.state.memory {
      if (mem.len() as u64) < self.state.memory_size {
        mem.resize(self.state.memory_size as usize, 0);
      }
    }
    Ok(())
  }

  fn read_memory(&self, offset: u64, size: u64) -> Expr {
    if size == 0 {
      return Expr::ConcreteBuf(Vec::new());
    }
    match &self.state.memory {
      Memory::ConcreteMemory(mem) => {
        let mut out = vec![0u8; size as usize];
        for (k, slot) in out.iter_mut().enumerate() {
          if let Some(b) = mem.get(offset as usize + k) {
            *slot = *b;
          }
        }
        Expr::ConcreteBuf(out)
      }
      Memory::SymbolicMemory(buf) => copy_slice(
        Box::new(Expr::Lit(W256(offset as u128, 0))),
        Box::new(Expr::Lit(W256::zero())),
        Box::new(Expr::Lit(W256(size as u128, 0))),
        Box::new(buf.clone()),
        Box::new(Expr::ConcreteBuf(Vec::new())),
      ),
    }
  }

  fn freeze_memory(&self) -> Expr {
    match &self.state.memory {
      Memory::ConcreteMemory(mem) => Expr::ConcreteBuf(mem.clone()),
      Memory::SymbolicMemory(buf) => buf.clone(),
    }
  }

  /// Copy a buffer into memory, zero-extending reads past its end. A write
  /// of symbolic bytes freezes concrete memory into a symbolic one.
  fn copy_bytes_to_memory(&mut self, bs: Expr, size: u64, src_offset: u64, mem_offset: u64) {
    if size == 0 {
      return;
    }
    match (&mut self.state.memory, &bs) {
      (Memory::ConcreteMemory(mem), Expr::ConcreteBuf(b)) => {
        let end = mem_offset as usize + size as usize;
        if mem.len() < end {
          mem.resize(end, 0);
        }
        for k in 0..size as usize {
          mem[mem_offset as usize + k] = b.get(src_offset as usize + k).copied().unwrap_or(0);
        }
      }
      _ => {
        let frozen = self.freeze_memory();
        self.state.memory = Memory::SymbolicMemory(copy_slice(
          Box::new(Expr::Lit(W256(src_offset as u128, 0))),
          Box::new(Expr::Lit(W256(mem_offset as u128, 0))),
          Box::new(Expr::Lit(W256(size as u128, 0))),
          Box::new(bs),
          Box::new(frozen),
        ));
      }
    }
  }

  fn mstore_word(&mut self, offset: u64, value: Expr) {
    match (&mut self.state.memory, &value) {
      (Memory::ConcreteMemory(mem), Expr::Lit(v)) => {
        let end = offset as usize + 32;
        if mem.len() < end {
          mem.resize(end, 0);
        }
        mem[offset as usize..end].copy_from_slice(&v.to_be_bytes());
      }
      _ => {
        let frozen = self.freeze_memory();
        self.state.memory = Memory::SymbolicMemory(write_word(
          Box::new(Expr::Lit(W256(offset as u128, 0))),
          Box::new(value),
          Box::new(frozen),
        ));
      }
    }
  }

  fn mstore_byte(&mut self, offset: u64, value: Expr) {
    match (&mut self.state.memory, &value) {
      (Memory::ConcreteMemory(mem), Expr::Lit(v)) => {
        let pos = offset as usize;
        if mem.len() <= pos {
          mem.resize(pos + 1, 0);
        }
        mem[pos] = v.0 as u8;
      }
      _ => {
        let frozen = self.freeze_memory();
        let byte = index_word(Box::new(Expr::Lit(W256(31, 0))), Box::new(value));
        self.state.memory = Memory::SymbolicMemory(crate::modules::expr::write_byte(
          Box::new(Expr::Lit(W256(offset as u128, 0))),
          Box::new(byte),
          Box::new(frozen),
        ));
      }
    }
  }

  // Accounts -------------------------------------------------------------------------------------

  /// Look an account up, suspending with `PleaseFetchContract` when it is
  /// neither in the environment nor in the fetch cache. Must be called
  /// before any mutation of the current operation so a resumed step replays
  /// cleanly.
  fn fetch_account(&mut self, addr: &Expr) -> Step<Contract> {
    if let Some(c) = self.env.contracts.get(addr) {
      return Ok(c.clone());
    }
    let a = maybe_lit_addr(addr)
      .ok_or_else(|| self.sym_arg("account lookup with symbolic address", vec![addr.clone()]))?;
    if let Some(c) = self.cache.fetched_contracts.get(&a).cloned() {
      self.env.contracts.insert(Expr::LitAddr(a), c.clone());
      return Ok(c);
    }
    self.pending = Some(PendingOp::AwaitContract { addr: a });
    Err(EvmError::Query(Query::PleaseFetchContract(a)))
  }

  fn touch_account(&mut self, addr: &Expr) {
    self.tx.substate.touched_accounts.push(addr.clone());
  }

  fn access_and_burn(&mut self, addr: &Expr) -> Step<()> {
    let cold = !self.tx.substate.accessed_addresses.contains(addr);
    let fees = self.block.schedule;
    self.burn(if cold { fees.g_cold_account_access } else { fees.g_warm_storage_read })?;
    self.tx.substate.accessed_addresses.insert(addr.clone());
    Ok(())
  }

  fn contract_balance(&self, addr: &Expr) -> Step<W256> {
    let c = self
      .env
      .contracts
      .get(addr)
      .ok_or_else(|| self.sym_arg("balance of unknown account", vec![addr.clone()]))?;
    self.force_lit(&c.balance, "symbolic balance")
  }

  fn credit(&mut self, addr: &Expr, amount: W256) -> Step<()> {
    let c = self
      .env
      .contracts
      .get_mut(addr)
      .ok_or_else(|| EvmError::UnexpectedSymbolicArg(0, "credit to unknown account".into(), vec![addr.clone()]))?;
    match maybe_lit_word(&c.balance) {
      Some(b) => {
        c.balance = Expr::Lit(b + amount);
        Ok(())
      }
      None => Err(EvmError::UnexpectedSymbolicArg(0, "symbolic balance".into(), vec![c.balance.clone()])),
    }
  }

  fn debit(&mut self, addr: &Expr, amount: W256) -> Step<()> {
    let c = self
      .env
      .contracts
      .get_mut(addr)
      .ok_or_else(|| EvmError::UnexpectedSymbolicArg(0, "debit from unknown account".into(), vec![addr.clone()]))?;
    match maybe_lit_word(&c.balance) {
      Some(b) if b >= amount => {
        c.balance = Expr::Lit(b - amount);
        Ok(())
      }
      Some(b) => Err(EvmError::BalanceTooLow(
        Box::new(Expr::Lit(amount)),
        Box::new(Expr::Lit(b)),
      )),
      None => Err(EvmError::UnexpectedSymbolicArg(0, "symbolic balance".into(), vec![c.balance.clone()])),
    }
  }

  fn transfer(&mut self, from: &Expr, to: &Expr, value: W256) -> Step<()> {
    if value.is_zero() || from == to {
      return Ok(());
    }
    self.debit(from, value)?;
    self.credit(to, value)
  }

  // Storage --------------------------------------------------------------------------------------

  /// Resolve a storage read, consulting the fetch cache and suspending with
  /// `PleaseFetchSlot` for external contracts. No gas is burned here.
  fn resolve_slot(&mut self, addr: &Expr, slot: &Expr) -> Step<Expr> {
    match read_storage(addr, slot, &self.env.storage) {
      Some(v) => Ok(v),
      None => {
        let external = self.env.contracts.get(addr).map(|c| c.external).unwrap_or(false);
        if external {
          if let (Some(a), Some(s)) = (maybe_lit_addr(addr), maybe_lit_word(slot)) {
            if let Some(v) = self.cache.fetched_storage.get(&a).and_then(|m| m.get(&s)).copied() {
              self.env.storage = write_storage(
                Expr::LitAddr(a),
                Expr::Lit(s),
                Expr::Lit(v),
                self.env.storage.clone(),
              );
              self.env.orig_storage.entry(a).or_default().entry(s).or_insert(v);
              return Ok(Expr::Lit(v));
            }
            self.pending = Some(PendingOp::AwaitSlot { addr: a, slot: s });
            return Err(EvmError::Query(Query::PleaseFetchSlot(a, s)));
          }
        }
        if storage_base_is_concrete(&self.env.storage) {
          Ok(Expr::Lit(W256::zero()))
        } else {
          Ok(Expr::SLoad(
            Box::new(addr.clone()),
            Box::new(slot.clone()),
            Box::new(self.env.storage.clone()),
          ))
        }
      }
    }
  }

  fn original_slot(&self, addr: W256, slot: W256) -> Option<W256> {
    match self.env.orig_storage.get(&addr).and_then(|m| m.get(&slot)) {
      Some(v) => Some(*v),
      None => {
        if storage_base_is_concrete(&self.env.storage) {
          Some(W256::zero())
        } else {
          None
        }
      }
    }
  }

  // Generic stack operations ---------------------------------------------------------------------

  fn stack_op1(&mut self, opbyte: u8, gas: u64, f: fn(Box<Expr>) -> Expr) -> Step<()> {
    self.require_stack(1)?;
    self.burn(gas)?;
    let a = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
    self.push_sym(f(Box::new(a)));
    self.next(opbyte);
    Ok(())
  }

  fn stack_op2(&mut self, opbyte: u8, gas: u64, f: fn(Box<Expr>, Box<Expr>) -> Expr) -> Step<()> {
    self.require_stack(2)?;
    self.burn(gas)?;
    let a = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
    let b = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
    self.push_sym(f(Box::new(a), Box::new(b)));
    self.next(opbyte);
    Ok(())
  }

  fn stack_op3(&mut self, opbyte: u8, gas: u64, f: fn(Box<Expr>, Box<Expr>, Box<Expr>) -> Expr) -> Step<()> {
    self.require_stack(3)?;
    self.burn(gas)?;
    let a = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
    let b = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
    let c = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
    self.push_sym(f(Box::new(a), Box::new(b), Box::new(c)));
    self.next(opbyte);
    Ok(())
  }

  // Jumps ----------------------------------------------------------------------------------------

  fn is_valid_jump_dest(&self, dest: u64) -> Step<bool> {
    let c = self.current_contract()?;
    let pos = dest as usize;
    let byte = match &c.code {
      ContractCode::InitCode(prefix, _) => prefix.get(pos).copied(),
      ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(b)) => b.get(pos).copied(),
      ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(b)) => {
        b.get(pos).and_then(maybe_lit_byte)
      }
    };
    if byte != Some(0x5b) {
      return Ok(false);
    }
    let ok = c
      .op_idx_map
      .get(pos)
      .and_then(|ix| c.code_ops.get(*ix as usize))
      .map(|(_, op)| *op == Op::Jumpdest)
      .unwrap_or(false);
    Ok(ok)
  }

  fn do_jump(&mut self, dest: u64) -> Step<()> {
    if self.is_valid_jump_dest(dest)? {
      self.state.pc = dest as usize;
      Ok(())
    } else {
      Err(EvmError::BadJumpDestination)
    }
  }

  /// Resume a suspended branch or code-deposit decision.
  pub fn answer_branch(&mut self, verdict: BranchCondition) {
    let pending = self.pending.clone();
    match pending {
      Some(PendingOp::AwaitBranch { loc, cond, jump_dest }) => match verdict {
        BranchCondition::Case(taken) => {
          self.pending = None;
          self.result = None;
          let iter = *self.iterations.get(&loc).unwrap_or(&0);
          self.cache.path.insert((loc.clone(), iter), taken);
          self.iterations.insert(loc, iter + 1);
          let prop = if taken {
            Prop::PNeg(Box::new(Prop::PEq(cond, Expr::Lit(W256::zero()))))
          } else {
            Prop::PEq(cond, Expr::Lit(W256::zero()))
          };
          self.constraints.push(prop);
          if let Err(e) = self.continue_branch(taken, jump_dest) {
            self.handle_stop(e);
          }
        }
        BranchCondition::Unknown => {
          self.result = Some(VMResult::VMFailure(EvmError::Choose(Choose::PleaseChoosePath(cond))));
        }
        BranchCondition::Inconsistent => {
          self.pending = None;
          self.result = None;
          self.handle_stop(EvmError::DeadPath);
        }
      },
      Some(PendingOp::AwaitDeposit { output, first_byte }) => match verdict {
        BranchCondition::Case(is_ef) => {
          self.pending = None;
          self.result = None;
          self.constraints.push(if is_ef {
            Prop::PEq(first_byte, Expr::Lit(W256(0xef, 0)))
          } else {
            Prop::PNeg(Box::new(Prop::PEq(first_byte, Expr::Lit(W256(0xef, 0)))))
          });
          if is_ef {
            self.handle_stop(EvmError::InvalidFormat);
          } else if let Err(e) = self.finish_create(output) {
            self.handle_stop(e);
          }
        }
        BranchCondition::Unknown => {
          self.result = Some(VMResult::VMFailure(EvmError::Choose(Choose::PleaseChoosePath(
            Expr::Eq(Box::new(first_byte), Box::new(Expr::Lit(W256(0xef, 0)))),
          ))));
        }
        BranchCondition::Inconsistent => {
          self.pending = None;
          self.result = None;
          self.handle_stop(EvmError::DeadPath);
        }
      },
      _ => {}
    }
  }

  fn continue_branch(&mut self, taken: bool, jump_dest: u64) -> Step<()> {
    let fees = self.block.schedule;
    self.burn(fees.g_high)?;
    self.popn(2);
    if taken {
      self.do_jump(jump_dest)
    } else {
      self.state.pc += 1;
      Ok(())
    }
  }

  // Fetch / slot / ffi resumption ----------------------------------------------------------------

  /// Install an answer to `PleaseFetchContract` and let the step replay.
  pub fn answer_contract(&mut self, contract: Contract) {
    if let Some(PendingOp::AwaitContract { addr }) = self.pending.clone() {
      self.cache.fetched_contracts.insert(addr, contract.clone());
      self.env.contracts.insert(Expr::LitAddr(addr), contract);
      self.pending = None;
      self.result = None;
    }
  }

  /// Install an answer to `PleaseFetchSlot` and let the step replay.
  pub fn answer_slot(&mut self, value: W256) {
    if let Some(PendingOp::AwaitSlot { addr, slot }) = self.pending.clone() {
      self.cache.fetched_storage.entry(addr).or_default().insert(slot, value);
      self.env.storage = write_storage(
        Expr::LitAddr(addr),
        Expr::Lit(slot),
        Expr::Lit(value),
        self.env.storage.clone(),
      );
      self.env.orig_storage.entry(addr).or_default().entry(slot).or_insert(value);
      self.pending = None;
      self.result = None;
    }
  }

  /// Hand the stdout of an ffi invocation back to the suspended cheatcode.
  pub fn answer_ffi(&mut self, stdout: Vec<u8>) {
    if let Some(PendingOp::AwaitFFI { out_offset, out_size }) = self.pending.clone() {
      self.pending = None;
      self.result = None;
      let trimmed: Vec<u8> =
        stdout.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
      let decoded = if trimmed.starts_with(b"0x") {
        hex::decode(&trimmed[2..]).unwrap_or(trimmed)
      } else {
        trimmed
      };
      let encoded = abi_encode(&[AbiValue::AbiBytesDynamic(decoded)]);
      self.finish_inline_call(Expr::ConcreteBuf(encoded), out_offset, out_size, true);
    }
  }

  /// Shared tail of the inline (frameless) call paths: set returndata, write
  /// the output region, push the status word.
  fn finish_inline_call(&mut self, output: Expr, out_offset: u64, out_size: u64, success: bool) {
    let len = match crate::modules::expr::buf_length(output.clone()) {
      Expr::Lit(n) if n.fits_u64() => n.as_u64(),
      _ => out_size,
    };
    self.state.returndata = output.clone();
    self.copy_bytes_to_memory(output, out_size.min(len), 0, out_offset);
    self.push_w256(if success { W256::one() } else { W256::zero() });
  }

  // The step function ----------------------------------------------------------------------------

  fn step(&mut self) -> Step<()> {
    // A transaction straight to a precompile executes without code.
    if self.frames.is_empty() && self.state.pc == 0 {
      if let Some(a) = maybe_lit_addr(&self.state.code_contract) {
        if !a.is_zero() && a <= W256(9, 0) {
          return self.run_top_precompile(a.as_u64());
        }
      }
    }

    if self.state.pc >= opslen(&self.state.code) {
      return self.finish_frame(FrameResult::FrameReturned(Expr::ConcreteBuf(Vec::new())));
    }

    let opbyte = match &self.state.code {
      ContractCode::InitCode(prefix, _) => prefix[self.state.pc],
      ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)) => {
        bytes[self.state.pc]
      }
      ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes)) => {
        maybe_lit_byte(&bytes[self.state.pc])
          .ok_or_else(|| self.sym_arg("symbolic opcode byte", vec![bytes[self.state.pc].clone()]))?
      }
    };
    let op = get_op(opbyte);
    debug!("pc 0x{:x}: {}", self.state.pc, op);
    let fees = self.block.schedule;

    match op {
      Op::Stop => self.finish_frame(FrameResult::FrameReturned(Expr::ConcreteBuf(Vec::new()))),

      Op::Add => self.stack_op2(opbyte, fees.g_verylow, add),
      Op::Mul => self.stack_op2(opbyte, fees.g_low, mul),
      Op::Sub => self.stack_op2(opbyte, fees.g_verylow, sub),
      Op::Div => self.stack_op2(opbyte, fees.g_low, div),
      Op::Sdiv => self.stack_op2(opbyte, fees.g_low, sdiv),
      Op::Mod => self.stack_op2(opbyte, fees.g_low, emod),
      Op::Smod => self.stack_op2(opbyte, fees.g_low, smod),
      Op::Addmod => self.stack_op3(opbyte, fees.g_mid, addmod),
      Op::Mulmod => self.stack_op3(opbyte, fees.g_mid, mulmod),
      Op::Exp => {
        self.require_stack(2)?;
        let exponent = self.peek(1)?;
        let e = self.force_lit(&exponent, "EXP with symbolic exponent")?;
        let cost = fees.g_exp + fees.g_expbyte * e.byte_length() as u64;
        self.burn(cost)?;
        let a = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
        let b = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
        self.push_sym(exp(Box::new(a), Box::new(b)));
        self.next(opbyte);
        Ok(())
      }
      Op::Signextend => self.stack_op2(opbyte, fees.g_low, sex),

      Op::Lt => self.stack_op2(opbyte, fees.g_verylow, lt),
      Op::Gt => self.stack_op2(opbyte, fees.g_verylow, gt),
      Op::Slt => self.stack_op2(opbyte, fees.g_verylow, slt),
      Op::Sgt => self.stack_op2(opbyte, fees.g_verylow, sgt),
      Op::Eq => self.stack_op2(opbyte, fees.g_verylow, eq),
      Op::Iszero => self.stack_op1(opbyte, fees.g_verylow, iszero),
      Op::And => self.stack_op2(opbyte, fees.g_verylow, and),
      Op::Or => self.stack_op2(opbyte, fees.g_verylow, or),
      Op::Xor => self.stack_op2(opbyte, fees.g_verylow, xor),
      Op::Not => self.stack_op1(opbyte, fees.g_verylow, not),
      Op::Byte => self.stack_op2(opbyte, fees.g_verylow, index_word),
      Op::Shl => self.stack_op2(opbyte, fees.g_verylow, shl),
      Op::Shr => self.stack_op2(opbyte, fees.g_verylow, shr),
      Op::Sar => self.stack_op2(opbyte, fees.g_verylow, sar),

      Op::Sha3 => {
        self.require_stack(2)?;
        let offset = self.force_u64(&self.peek(0)?, "SHA3 offset")?;
        let size = self.force_u64(&self.peek(1)?, "SHA3 size")?;
        self.burn(fees.g_sha3 + fees.g_sha3word * ceil_div(size, 32))?;
        self.access_memory_range(offset, size)?;
        let buf = self.read_memory(offset, size);
        let hash = match &buf {
          Expr::ConcreteBuf(bytes) => {
            let h = keccak_prime(bytes);
            self.env.sha3_preimages.insert(h, bytes.clone());
            self.keccak_eqs.push(crate::modules::keccak::keccak_eq_prop(h, bytes.clone()));
            Expr::Lit(h)
          }
          _ => Expr::Keccak(Box::new(buf.clone())),
        };
        self.popn(2);
        self.push_sym(hash);
        self.next(opbyte);
        Ok(())
      }

      Op::Address => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let a = addr_to_word(self.state.contract.clone());
        self.push_sym(a);
        self.next(opbyte);
        Ok(())
      }
      Op::Balance => {
        self.require_stack(1)?;
        let addr = self.force_addr(&self.peek(0)?, "BALANCE")?;
        let account = self.fetch_account(&addr)?;
        self.access_and_burn(&addr)?;
        self.popn(1);
        self.push_sym(account.balance);
        self.next(opbyte);
        Ok(())
      }
      Op::Origin => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let a = addr_to_word(self.tx.origin.clone());
        self.push_sym(a);
        self.next(opbyte);
        Ok(())
      }
      Op::Caller => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let a = addr_to_word(self.state.caller.clone());
        self.push_sym(a);
        self.next(opbyte);
        Ok(())
      }
      Op::Callvalue => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let v = self.state.callvalue.clone();
        self.push_sym(v);
        self.next(opbyte);
        Ok(())
      }
      Op::Calldataload => {
        self.require_stack(1)?;
        self.burn(fees.g_verylow)?;
        let idx = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
        let word = read_word(Box::new(idx), Box::new(self.state.calldata.clone()));
        self.push_sym(word);
        self.next(opbyte);
        Ok(())
      }
      Op::Calldatasize => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let len = buf_length(self.state.calldata.clone());
        self.push_sym(len);
        self.next(opbyte);
        Ok(())
      }
      Op::Calldatacopy => {
        self.require_stack(3)?;
        let mem_off = self.force_u64(&self.peek(0)?, "CALLDATACOPY offset")?;
        let src_off = self.force_u64(&self.peek(1)?, "CALLDATACOPY source")?;
        let size = self.force_u64(&self.peek(2)?, "CALLDATACOPY size")?;
        self.burn(fees.g_verylow + fees.g_copy * ceil_div(size, 32))?;
        self.access_memory_range(mem_off, size)?;
        let data = self.state.calldata.clone();
        self.copy_bytes_to_memory(data, size, src_off, mem_off);
        self.popn(3);
        self.next(opbyte);
        Ok(())
      }
      Op::Codesize => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let len = codelen(&self.state.code);
        self.push_sym(len);
        self.next(opbyte);
        Ok(())
      }
      Op::Codecopy => {
        self.require_stack(3)?;
        let mem_off = self.force_u64(&self.peek(0)?, "CODECOPY offset")?;
        let src_off = self.force_u64(&self.peek(1)?, "CODECOPY source")?;
        let size = self.force_u64(&self.peek(2)?, "CODECOPY size")?;
        self.burn(fees.g_verylow + fees.g_copy * ceil_div(size, 32))?;
        self.access_memory_range(mem_off, size)?;
        let code_buf = to_buf(&self.state.code);
        self.copy_bytes_to_memory(code_buf, size, src_off, mem_off);
        self.popn(3);
        self.next(opbyte);
        Ok(())
      }
      Op::Gasprice => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(self.tx.gasprice);
        self.next(opbyte);
        Ok(())
      }
      Op::Extcodesize => {
        self.require_stack(1)?;
        let addr = self.force_addr(&self.peek(0)?, "EXTCODESIZE")?;
        let account = self.fetch_account(&addr)?;
        self.access_and_burn(&addr)?;
        self.popn(1);
        let len = codelen(&account.code);
        self.push_sym(len);
        self.next(opbyte);
        Ok(())
      }
      Op::Extcodecopy => {
        self.require_stack(4)?;
        let addr = self.force_addr(&self.peek(0)?, "EXTCODECOPY")?;
        let mem_off = self.force_u64(&self.peek(1)?, "EXTCODECOPY offset")?;
        let src_off = self.force_u64(&self.peek(2)?, "EXTCODECOPY source")?;
        let size = self.force_u64(&self.peek(3)?, "EXTCODECOPY size")?;
        let account = self.fetch_account(&addr)?;
        let cold = !self.tx.substate.accessed_addresses.contains(&addr);
        let access = if cold { fees.g_cold_account_access } else { fees.g_warm_storage_read };
        self.burn(access + fees.g_copy * ceil_div(size, 32))?;
        self.tx.substate.accessed_addresses.insert(addr.clone());
        self.access_memory_range(mem_off, size)?;
        let code_buf = to_buf(&account.code);
        self.copy_bytes_to_memory(code_buf, size, src_off, mem_off);
        self.popn(4);
        self.next(opbyte);
        Ok(())
      }
      Op::Returndatasize => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let len = buf_length(self.state.returndata.clone());
        self.push_sym(len);
        self.next(opbyte);
        Ok(())
      }
      Op::Returndatacopy => {
        self.require_stack(3)?;
        let mem_off = self.force_u64(&self.peek(0)?, "RETURNDATACOPY offset")?;
        let src_off = self.force_u64(&self.peek(1)?, "RETURNDATACOPY source")?;
        let size = self.force_u64(&self.peek(2)?, "RETURNDATACOPY size")?;
        self.burn(fees.g_verylow + fees.g_copy * ceil_div(size, 32))?;
        self.access_memory_range(mem_off, size)?;
        if let Expr::Lit(len) = buf_length(self.state.returndata.clone()) {
          let end = (src_off as u128).saturating_add(size as u128);
          if end > len.0 || len.1 != 0 {
            return Err(EvmError::InvalidMemoryAccess);
          }
        }
        let data = self.state.returndata.clone();
        self.copy_bytes_to_memory(data, size, src_off, mem_off);
        self.popn(3);
        self.next(opbyte);
        Ok(())
      }
      Op::Extcodehash => {
        self.require_stack(1)?;
        let addr = self.force_addr(&self.peek(0)?, "EXTCODEHASH")?;
        let account = self.fetch_account(&addr)?;
        self.access_and_burn(&addr)?;
        self.popn(1);
        if is_empty_account(&account) {
          self.push_w256(W256::zero());
        } else {
          self.push_sym(account.codehash);
        }
        self.next(opbyte);
        Ok(())
      }

      Op::Blockhash => {
        self.require_stack(1)?;
        self.burn(fees.g_blockhash)?;
        let arg = self.state.stack.pop().map(|b| *b).unwrap_or(Expr::Lit(W256::zero()));
        let result = match maybe_lit_word(&arg) {
          Some(n) => {
            let current = self.block.number;
            if n < current && n + W256(256, 0) >= current {
              Expr::BlockHash(Box::new(Expr::Lit(n)))
            } else {
              Expr::Lit(W256::zero())
            }
          }
          None => Expr::BlockHash(Box::new(arg)),
        };
        self.push_sym(result);
        self.next(opbyte);
        Ok(())
      }
      Op::Coinbase => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let a = addr_to_word(self.block.coinbase.clone());
        self.push_sym(a);
        self.next(opbyte);
        Ok(())
      }
      Op::Timestamp => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        let t = self.block.timestamp.clone();
        self.push_sym(t);
        self.next(opbyte);
        Ok(())
      }
      Op::Number => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(self.block.number);
        self.next(opbyte);
        Ok(())
      }
      Op::PrevRandao => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(self.block.prev_randao);
        self.next(opbyte);
        Ok(())
      }
      Op::Gaslimit => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(W256(self.block.gaslimit as u128, 0));
        self.next(opbyte);
        Ok(())
      }
      Op::Chainid => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(self.env.chain_id);
        self.next(opbyte);
        Ok(())
      }
      Op::Selfbalance => {
        self.limit_stack(1)?;
        self.burn(fees.g_low)?;
        let addr = self.state.contract.clone();
        let account = self.fetch_account(&addr)?;
        self.push_sym(account.balance);
        self.next(opbyte);
        Ok(())
      }
      Op::Basefee => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(self.block.base_fee);
        self.next(opbyte);
        Ok(())
      }

      Op::Pop => {
        self.require_stack(1)?;
        self.burn(fees.g_base)?;
        self.popn(1);
        self.next(opbyte);
        Ok(())
      }
      Op::Mload => {
        self.require_stack(1)?;
        let offset = self.force_u64(&self.peek(0)?, "MLOAD index")?;
        self.burn(fees.g_verylow)?;
        self.access_memory_range(offset, 32)?;
        self.popn(1);
        let word = match &self.state.memory {
          Memory::ConcreteMemory(mem) => {
            let mut bytes = [0u8; 32];
            for (k, slot) in bytes.iter_mut().enumerate() {
              if let Some(b) = mem.get(offset as usize + k) {
                *slot = *b;
              }
            }
            Expr::Lit(W256::from_bytes(bytes.to_vec()))
          }
          Memory::SymbolicMemory(buf) => {
            read_word(Box::new(Expr::Lit(W256(offset as u128, 0))), Box::new(buf.clone()))
          }
        };
        self.push_sym(word);
        self.next(opbyte);
        Ok(())
      }
      Op::Mstore => {
        self.require_stack(2)?;
        let offset = self.force_u64(&self.peek(0)?, "MSTORE index")?;
        self.burn(fees.g_verylow)?;
        self.access_memory_range(offset, 32)?;
        let value = self.peek(1)?;
        self.popn(2);
        self.mstore_word(offset, value);
        self.next(opbyte);
        Ok(())
      }
      Op::Mstore8 => {
        self.require_stack(2)?;
        let offset = self.force_u64(&self.peek(0)?, "MSTORE8 index")?;
        self.burn(fees.g_verylow)?;
        self.access_memory_range(offset, 1)?;
        let value = self.peek(1)?;
        self.popn(2);
        self.mstore_byte(offset, value);
        self.next(opbyte);
        Ok(())
      }

      Op::Sload => {
        self.require_stack(1)?;
        let slot = self.peek(0)?;
        let addr = self.state.contract.clone();
        let value = self.resolve_slot(&addr, &slot)?;
        let cost = match maybe_lit_word(&slot) {
          Some(s) => {
            if self.tx.substate.accessed_storage_keys.contains(&(addr.clone(), s)) {
              fees.g_warm_storage_read
            } else {
              fees.g_cold_sload
            }
          }
          None => fees.g_warm_storage_read,
        };
        self.burn(cost)?;
        if let Some(s) = maybe_lit_word(&slot) {
          self.tx.substate.accessed_storage_keys.insert((addr, s));
        }
        self.popn(1);
        self.push_sym(value);
        self.next(opbyte);
        Ok(())
      }
      Op::Sstore => self.do_sstore(opbyte),

      Op::Jump => {
        self.require_stack(1)?;
        let dest = self.force_u64(&self.peek(0)?, "JUMP destination")?;
        self.burn(fees.g_mid)?;
        self.popn(1);
        self.do_jump(dest)
      }
      Op::Jumpi => self.do_jumpi(),

      Op::Pc => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(W256(self.state.pc as u128, 0));
        self.next(opbyte);
        Ok(())
      }
      Op::Msize => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(W256(self.state.memory_size as u128, 0));
        self.next(opbyte);
        Ok(())
      }
      Op::Gas => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(W256(self.state.gas as u128, 0));
        self.next(opbyte);
        Ok(())
      }
      Op::Jumpdest => {
        self.burn(fees.g_jumpdest)?;
        self.next(opbyte);
        Ok(())
      }

      Op::Push0 => {
        self.limit_stack(1)?;
        self.burn(fees.g_base)?;
        self.push_w256(W256::zero());
        self.next(opbyte);
        Ok(())
      }
      Op::Push(n) => {
        self.limit_stack(1)?;
        self.burn(fees.g_verylow)?;
        let n = n as usize;
        let start = self.state.pc + 1;
        let value = match &self.state.code {
          ContractCode::InitCode(prefix, _) => push_value_concrete(prefix, start, n),
          ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)) => {
            push_value_concrete(bytes, start, n)
          }
          ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes)) => {
            let mut arg = Vec::with_capacity(n);
            for k in 0..n {
              arg.push(bytes.get(start + k).cloned().unwrap_or(Expr::LitByte(0)));
            }
            match arg.iter().map(maybe_lit_byte).collect::<Option<Vec<u8>>>() {
              Some(lits) => Expr::Lit(W256::from_bytes(lits)),
              None => {
                let buf = crate::modules::expr::from_list(arg);
                let word = read_word(Box::new(Expr::Lit(W256::zero())), Box::new(buf));
                shr(Box::new(Expr::Lit(W256((256 - 8 * n) as u128, 0))), Box::new(word))
              }
            }
          }
        };
        self.push_sym(value);
        self.next(opbyte);
        Ok(())
      }
      Op::Dup(i) => {
        let i = i as usize;
        self.require_stack(i)?;
        self.limit_stack(1)?;
        self.burn(fees.g_verylow)?;
        let item = self.peek(i - 1)?;
        self.push_sym(item);
        self.next(opbyte);
        Ok(())
      }
      Op::Swap(i) => {
        let i = i as usize;
        self.require_stack(i + 1)?;
        self.burn(fees.g_verylow)?;
        let len = self.state.stack.len();
        self.state.stack.swap(len - 1, len - 1 - i);
        self.next(opbyte);
        Ok(())
      }

      Op::Log(n) => {
        self.not_static()?;
        let n = n as usize;
        self.require_stack(2 + n)?;
        let offset = self.force_u64(&self.peek(0)?, "LOG offset")?;
        let size = self.force_u64(&self.peek(1)?, "LOG size")?;
        self.burn(fees.g_log + fees.g_logdata * size + n as u64 * fees.g_logtopic)?;
        self.access_memory_range(offset, size)?;
        let data = self.read_memory(offset, size);
        let mut topics = Vec::with_capacity(n);
        for k in 0..n {
          topics.push(self.peek(2 + k)?);
        }
        let entry = Expr::LogEntry(
          Box::new(self.state.contract.clone()),
          Box::new(data.clone()),
          topics.clone(),
        );
        self.trace(TraceData::EventTrace(self.state.contract.clone(), data, topics));
        self.logs.push(entry);
        self.popn(2 + n);
        self.next(opbyte);
        Ok(())
      }

      Op::Create => self.do_create(opbyte, false),
      Op::Create2 => self.do_create(opbyte, true),
      Op::Call => self.general_call(opbyte, Op::Call),
      Op::Callcode => self.general_call(opbyte, Op::Callcode),
      Op::Delegatecall => self.general_call(opbyte, Op::Delegatecall),
      Op::Staticcall => self.general_call(opbyte, Op::Staticcall),

      Op::Return => {
        self.require_stack(2)?;
        let offset = self.force_u64(&self.peek(0)?, "RETURN offset")?;
        let size = self.force_u64(&self.peek(1)?, "RETURN size")?;
        self.access_memory_range(offset, size)?;
        let buf = self.read_memory(offset, size);
        self.finish_frame(FrameResult::FrameReturned(buf))
      }
      Op::Revert => {
        self.require_stack(2)?;
        let offset = self.force_u64(&self.peek(0)?, "REVERT offset")?;
        let size = self.force_u64(&self.peek(1)?, "REVERT size")?;
        self.access_memory_range(offset, size)?;
        let buf = self.read_memory(offset, size);
        self.finish_frame(FrameResult::FrameReverted(buf))
      }
      Op::Selfdestruct => self.do_selfdestruct(),

      Op::Unknown(b) => Err(EvmError::UnrecognizedOpcode(b)),
    }
  }

  fn run_top_precompile(&mut self, which: u64) -> Step<()> {
    let input =
      self.force_concrete_buf(&self.state.calldata.clone(), "symbolic precompile input")?;
    let fees = self.block.schedule;
    let gas = self.state.gas;
    match execute_precompile(&fees, which, &input, gas) {
      PrecompileResult::Success { gas_used, output } => {
        self.burn(gas_used)?;
        self.finish_frame(FrameResult::FrameReturned(Expr::ConcreteBuf(output)))
      }
      PrecompileResult::OutOfGas => Err(EvmError::OutOfGas(gas, gas + 1)),
      PrecompileResult::Failure => Err(EvmError::PrecompileFailure),
    }
  }

  // SSTORE ---------------------------------------------------------------------------------------

  fn do_sstore(&mut self, opbyte: u8) -> Step<()> {
    self.require_stack(2)?;
    self.not_static()?;
    let fees = self.block.schedule;
    // EIP-2200 sentry.
    if self.state.gas <= fees.g_callstipend {
      return Err(EvmError::OutOfGas(self.state.gas, fees.g_callstipend + 1));
    }
    let slot = self.peek(0)?;
    let new = self.peek(1)?;
    let addr = self.state.contract.clone();
    let current = self.resolve_slot(&addr, &slot)?;

    let slot_lit = maybe_lit_word(&slot);
    let addr_lit = maybe_lit_addr(&addr);
    let cold_cost = match slot_lit {
      Some(s) => {
        if self.tx.substate.accessed_storage_keys.contains(&(addr.clone(), s)) {
          0
        } else {
          fees.g_cold_sload
        }
      }
      None => 0,
    };

    let original = match (addr_lit, slot_lit) {
      (Some(a), Some(s)) => self.original_slot(a, s),
      _ => None,
    };
    let current_lit = maybe_lit_word(&current);
    let new_lit = maybe_lit_word(&new);

    let base = match (original, current_lit, new_lit) {
      (Some(o), Some(c), Some(n)) => {
        let mut refund: i64 = 0;
        let base = if c == n {
          fees.g_sload
        } else if c == o {
          if o.is_zero() {
            fees.g_sset
          } else {
            if n.is_zero() {
              refund += (fees.g_sreset + fees.g_access_list_storage_key) as i64;
            }
            fees.g_sreset
          }
        } else {
          if !o.is_zero() {
            if c.is_zero() {
              refund -= (fees.g_sreset + fees.g_access_list_storage_key) as i64;
            }
            if n.is_zero() {
              refund += (fees.g_sreset + fees.g_access_list_storage_key) as i64;
            }
          }
          if o == n {
            if o.is_zero() {
              refund += (fees.g_sset - fees.g_sload) as i64;
            } else {
              refund += (fees.g_sreset - fees.g_sload) as i64;
            }
          }
          fees.g_sload
        };
        if refund != 0 {
          self.tx.substate.refunds.push((addr.clone(), refund));
        }
        base
      }
      // Symbolic triple: pessimistic charge, refunds untouched.
      _ => fees.g_sset,
    };

    self.burn(base + cold_cost)?;
    if let Some(s) = slot_lit {
      self.tx.substate.accessed_storage_keys.insert((addr.clone(), s));
    }
    self.env.storage = write_storage(addr, slot, new, self.env.storage.clone());
    self.popn(2);
    self.next(opbyte);
    Ok(())
  }

  // JUMPI and the branch protocol ----------------------------------------------------------------

  fn do_jumpi(&mut self) -> Step<()> {
    self.require_stack(2)?;
    let fees = self.block.schedule;
    let dest = self.force_u64(&self.peek(0)?, "JUMPI destination")?;
    let cond = self.peek(1)?;
    match maybe_lit_word(&cond) {
      Some(c) => {
        self.burn(fees.g_high)?;
        self.popn(2);
        if c.is_zero() {
          self.state.pc += 1;
          Ok(())
        } else {
          self.do_jump(dest)
        }
      }
      None => {
        let loc = (self.state.contract.clone(), self.state.pc);
        self.pending = Some(PendingOp::AwaitBranch { loc, cond: cond.clone(), jump_dest: dest });
        Err(EvmError::Query(Query::PleaseAskSMT(cond, self.constraints.clone())))
      }
    }
  }

  // Calls ----------------------------------------------------------------------------------------

  /// Warm/cold base plus the value extras, and the gas actually handed to
  /// the callee (EIP-150 capped, stipend included). Warms the target.
  fn cost_of_call(&mut self, recipient_exists: bool, value: W256, requested: u64, target: &Expr) -> (u64, u64) {
    let fees = self.block.schedule;
    let warm = self.tx.substate.accessed_addresses.contains(target);
    self.tx.substate.accessed_addresses.insert(target.clone());
    let base = if warm { fees.g_warm_storage_read } else { fees.g_cold_account_access };
    let mut extras = 0;
    if !recipient_exists && !value.is_zero() {
      extras += fees.g_newaccount;
    }
    if !value.is_zero() {
      extras += fees.g_callvalue;
    }
    let available = self.state.gas;
    let cap = if available >= base + extras {
      requested.min(all_but_one_64th(available - (base + extras)))
    } else {
      requested
    };
    let callee_gas = if value.is_zero() { cap } else { cap.saturating_add(fees.g_callstipend) };
    ((base + extras).saturating_add(cap), callee_gas)
  }

  /// Move the capped gas (stipend excluded, it is subsidized) from the
  /// caller to the callee-to-be.
  fn hand_over_gas(&mut self, callee_gas: u64, value: W256) -> Step<()> {
    let stipend = if value.is_zero() { 0 } else { self.block.schedule.g_callstipend };
    let from_caller = callee_gas.saturating_sub(stipend);
    if self.state.gas < from_caller {
      return Err(EvmError::OutOfGas(self.state.gas, from_caller));
    }
    self.state.gas -= from_caller;
    Ok(())
  }

  fn general_call(&mut self, opbyte: u8, kind: Op) -> Step<()> {
    let has_value_arg = matches!(kind, Op::Call | Op::Callcode);
    let n_args = if has_value_arg { 7 } else { 6 };
    self.require_stack(n_args)?;

    let gas_arg = self.force_lit(&self.peek(0)?, "call gas")?;
    let requested = if gas_arg.fits_u64() { gas_arg.as_u64() } else { u64::MAX };
    let target = self.force_addr(&self.peek(1)?, "call target")?;
    let value = if has_value_arg {
      self.force_lit(&self.peek(2)?, "call value")?
    } else {
      W256::zero()
    };
    let arg_base = if has_value_arg { 3 } else { 2 };
    let in_off = self.force_u64(&self.peek(arg_base)?, "call input offset")?;
    let in_size = self.force_u64(&self.peek(arg_base + 1)?, "call input size")?;
    let out_off = self.force_u64(&self.peek(arg_base + 2)?, "call output offset")?;
    let out_size = self.force_u64(&self.peek(arg_base + 3)?, "call output size")?;

    if kind == Op::Call && !value.is_zero() {
      self.not_static()?;
    }

    let target_addr = maybe_lit_addr(&target).unwrap_or_default();
    if !target_addr.is_zero() && target_addr <= W256(9, 0) {
      return self.precompile_call(opbyte, n_args, target_addr.as_u64(), value, requested, in_off, in_size, out_off, out_size);
    }
    if target_addr == cheat_code_addr() {
      return self.cheat_call(opbyte, n_args, value, requested, in_off, in_size, out_off, out_size);
    }

    // Account resolution first: it can suspend and the step will replay.
    let callee = self.fetch_account(&target)?;
    self.access_memory_range(in_off, in_size)?;
    self.access_memory_range(out_off, out_size)?;

    // Only a plain CALL can bring a dead recipient to life.
    let exists = kind != Op::Call
      || (!is_empty_account(&callee) && self.env.contracts.contains_key(&target));
    let (cost, callee_gas) = self.cost_of_call(exists, value, requested, &target);
    self.burn(cost - callee_gas)?;

    let self_addr = self.state.contract.clone();
    let my_balance = self.contract_balance(&self_addr)?;
    if value > my_balance {
      self.trace(TraceData::ErrorTrace(EvmError::BalanceTooLow(
        Box::new(Expr::Lit(value)),
        Box::new(Expr::Lit(my_balance)),
      )));
      self.popn(n_args);
      self.push_w256(W256::zero());
      self.state.returndata = Expr::ConcreteBuf(Vec::new());
      self.next(opbyte);
      return Ok(());
    }
    if self.frames.len() >= CALL_DEPTH_LIMIT {
      self.trace(TraceData::ErrorTrace(EvmError::CallDepthLimitReached));
      self.popn(n_args);
      self.push_w256(W256::zero());
      self.state.returndata = Expr::ConcreteBuf(Vec::new());
      self.next(opbyte);
      return Ok(());
    }

    self.hand_over_gas(callee_gas, value)?;
    let calldata = self.read_memory(in_off, in_size);
    let abi = match &calldata {
      Expr::ConcreteBuf(b) if b.len() >= 4 => Some(W256(word32(&b[..4]) as u128, 0)),
      _ => None,
    };

    let context = FrameContext::CallContext {
      target: target.clone(),
      context: match kind {
        Op::Call | Op::Staticcall => target.clone(),
        _ => self_addr.clone(),
      },
      out_offset: out_off,
      out_size,
      codehash: callee.codehash.clone(),
      abi,
      calldata: calldata.clone(),
      reversion: (self.env.contracts.clone(), self.env.storage.clone()),
      substate: self.tx.substate.clone(),
    };
    self.trace_push(TraceData::FrameTrace(context.clone()));

    // Parent state is saved with the arguments popped and pc advanced.
    self.popn(n_args);
    self.next(opbyte);
    let saved = self.state.clone();
    self.frames.push(Frame { context, state: saved });

    if kind == Op::Call {
      self.transfer(&self_addr.clone(), &target, value)?;
    }
    self.touch_account(&target);

    let cleared_code = match callee.code.clone() {
      ContractCode::InitCode(prefix, _) => {
        ContractCode::InitCode(prefix, Box::new(Expr::ConcreteBuf(Vec::new())))
      }
      code => code,
    };

    let parent_callvalue = self.state.callvalue.clone();
    let parent_caller = self.state.caller.clone();
    let parent_static = self.state.static_flag;
    self.state = FrameState {
      contract: match kind {
        Op::Call | Op::Staticcall => target.clone(),
        _ => self_addr.clone(),
      },
      code_contract: target.clone(),
      code: cleared_code,
      pc: 0,
      stack: Vec::new(),
      memory: Memory::ConcreteMemory(Vec::new()),
      memory_size: 0,
      calldata,
      callvalue: match kind {
        Op::Delegatecall => parent_callvalue,
        Op::Staticcall => Expr::Lit(W256::zero()),
        _ => Expr::Lit(value),
      },
      caller: match kind {
        Op::Delegatecall => parent_caller,
        _ => self_addr,
      },
      gas: callee_gas,
      returndata: Expr::ConcreteBuf(Vec::new()),
      static_flag: parent_static || kind == Op::Staticcall,
    };
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn precompile_call(
    &mut self,
    opbyte: u8,
    n_args: usize,
    which: u64,
    value: W256,
    requested: u64,
    in_off: u64,
    in_size: u64,
    out_off: u64,
    out_size: u64,
  ) -> Step<()> {
    self.access_memory_range(in_off, in_size)?;
    self.access_memory_range(out_off, out_size)?;
    let target = Expr::LitAddr(W256(which as u128, 0));
    let (cost, callee_gas) = self.cost_of_call(true, value, requested, &target);
    self.burn(cost - callee_gas)?;
    self.hand_over_gas(callee_gas, value)?;
    let handed_over = callee_gas - if value.is_zero() { 0 } else { self.block.schedule.g_callstipend };

    if !value.is_zero() {
      let self_addr = self.state.contract.clone();
      let my_balance = self.contract_balance(&self_addr)?;
      if value > my_balance {
        self.state.gas += handed_over;
        self.popn(n_args);
        self.push_w256(W256::zero());
        self.state.returndata = Expr::ConcreteBuf(Vec::new());
        self.next(opbyte);
        return Ok(());
      }
      if !self.env.contracts.contains_key(&target) {
        self.env.contracts.insert(target.clone(), empty_contract());
      }
      self.transfer(&self_addr, &target, value)?;
      self.touch_account(&target);
    }

    let input = match self.read_memory(in_off, in_size) {
      Expr::ConcreteBuf(b) => b,
      other => return Err(self.sym_arg("symbolic precompile input", vec![other])),
    };
    let fees = self.block.schedule;
    self.popn(n_args);
    self.next(opbyte);
    match execute_precompile(&fees, which, &input, callee_gas) {
      PrecompileResult::Success { gas_used, output } => {
        self.state.gas += callee_gas - gas_used;
        self.burned += gas_used;
        self.finish_inline_call(Expr::ConcreteBuf(output), out_off, out_size, true);
      }
      PrecompileResult::OutOfGas | PrecompileResult::Failure => {
        self.burned += callee_gas;
        self.state.returndata = Expr::ConcreteBuf(Vec::new());
        self.push_w256(W256::zero());
      }
    }
    Ok(())
  }

  // Creation -------------------------------------------------------------------------------------

  fn do_create(&mut self, opbyte: u8, is_create2: bool) -> Step<()> {
    self.not_static()?;
    let n_args = if is_create2 { 4 } else { 3 };
    self.require_stack(n_args)?;
    let value = self.force_lit(&self.peek(0)?, "CREATE value")?;
    let offset = self.force_u64(&self.peek(1)?, "CREATE offset")?;
    let size = self.force_u64(&self.peek(2)?, "CREATE size")?;
    let salt = if is_create2 { Some(self.force_lit(&self.peek(3)?, "CREATE2 salt")?) } else { None };

    self.access_memory_range(offset, size)?;
    let init_buf = self.read_memory(offset, size);

    let self_addr = self.state.contract.clone();
    let sender = maybe_lit_addr(&self_addr)
      .ok_or_else(|| self.sym_arg("CREATE from symbolic address", vec![self_addr.clone()]))?;
    let creator = self
      .env
      .contracts
      .get(&self_addr)
      .cloned()
      .ok_or_else(|| self.sym_arg("CREATE from unknown account", vec![self_addr.clone()]))?;
    let nonce = creator
      .nonce
      .ok_or_else(|| self.sym_arg("CREATE with unknown nonce", vec![self_addr.clone()]))?;

    let fees = self.block.schedule;
    let (total, init_gas) = cost_of_create(&fees, self.state.gas, size, is_create2);
    self.burn(total - init_gas)?;
    self.state.gas -= init_gas;

    let new_addr = match salt {
      Some(s) => {
        let bytes = self.force_concrete_buf(&init_buf, "CREATE2 with symbolic init code")?;
        create2_address(sender, s, &bytes)
      }
      None => create_address(sender, nonce),
    };
    let new_addr_expr = Expr::LitAddr(new_addr);

    let my_balance = self.contract_balance(&self_addr)?;
    let collision = match self.env.contracts.get(&new_addr_expr) {
      Some(c) => {
        c.nonce.map(|n| n > 0).unwrap_or(true)
          || match &c.code {
            ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(b)) => !b.is_empty(),
            ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(b)) => !b.is_empty(),
            ContractCode::InitCode(_, _) => true,
          }
      }
      None => false,
    };

    let fail = |vm: &mut VM, e: EvmError| {
      vm.trace(TraceData::ErrorTrace(e));
      vm.state.gas += init_gas;
      vm.popn(n_args);
      vm.push_w256(W256::zero());
      vm.state.returndata = Expr::ConcreteBuf(Vec::new());
      vm.next(opbyte);
    };

    if nonce == u64::MAX {
      fail(self, EvmError::NonceOverflow);
      return Ok(());
    }
    if value > my_balance {
      fail(
        self,
        EvmError::BalanceTooLow(Box::new(Expr::Lit(value)), Box::new(Expr::Lit(my_balance))),
      );
      return Ok(());
    }
    if self.frames.len() >= CALL_DEPTH_LIMIT {
      fail(self, EvmError::CallDepthLimitReached);
      return Ok(());
    }
    if collision {
      // An address collision consumes everything the caller supplied, and
      // the creator's nonce still advances.
      self.burned += init_gas;
      self.popn(n_args);
      self.push_w256(W256::zero());
      self.state.returndata = Expr::ConcreteBuf(Vec::new());
      self.next(opbyte);
      if let Some(c) = self.env.contracts.get_mut(&self_addr) {
        c.nonce = Some(nonce + 1);
      }
      return Ok(());
    }

    // Nonce bumps before the snapshot: a reverted creation keeps it.
    if let Some(c) = self.env.contracts.get_mut(&self_addr) {
      c.nonce = Some(nonce + 1);
    }
    let reversion = self.env.contracts.clone();
    let substate_snapshot = self.tx.substate.clone();

    let (prefix, tail) = split_init_code(init_buf);
    let init_code = ContractCode::InitCode(prefix, Box::new(tail));
    let old_balance = self
      .env
      .contracts
      .get(&new_addr_expr)
      .and_then(|c| maybe_lit_word(&c.balance))
      .unwrap_or_else(W256::zero);
    let mut createe = initial_contract(init_code.clone());
    createe.balance = Expr::Lit(old_balance);
    self.env.storage = reset_storage(self.env.storage.clone(), &new_addr_expr);
    self.env.contracts.insert(new_addr_expr.clone(), createe);
    self.debit(&self_addr, value)?;
    self.credit(&new_addr_expr, value)?;
    self.touch_account(&new_addr_expr);
    self.tx.substate.accessed_addresses.insert(new_addr_expr.clone());

    let context = FrameContext::CreationContext {
      address: new_addr_expr.clone(),
      codehash: hashcode(&init_code),
      reversion,
      substate: substate_snapshot,
    };
    self.trace_push(TraceData::FrameTrace(context.clone()));

    self.popn(n_args);
    self.next(opbyte);
    let saved = self.state.clone();
    self.frames.push(Frame { context, state: saved });

    let parent_static = self.state.static_flag;
    self.state = FrameState {
      contract: new_addr_expr.clone(),
      code_contract: new_addr_expr,
      code: init_code,
      pc: 0,
      stack: Vec::new(),
      memory: Memory::ConcreteMemory(Vec::new()),
      memory_size: 0,
      calldata: Expr::ConcreteBuf(Vec::new()),
      callvalue: Expr::Lit(value),
      caller: self_addr,
      gas: init_gas,
      returndata: Expr::ConcreteBuf(Vec::new()),
      static_flag: parent_static,
    };
    Ok(())
  }

  // SELFDESTRUCT ---------------------------------------------------------------------------------

  fn do_selfdestruct(&mut self) -> Step<()> {
    self.not_static()?;
    self.require_stack(1)?;
    let recipient = self.force_addr(&self.peek(0)?, "SELFDESTRUCT")?;
    let beneficiary = self.fetch_account(&recipient)?;
    let fees = self.block.schedule;
    let self_addr = self.state.contract.clone();
    let funds = self.contract_balance(&self_addr)?;

    let cold = !self.tx.substate.accessed_addresses.contains(&recipient);
    let mut cost = fees.g_selfdestruct;
    if cold {
      cost += fees.g_cold_account_access;
    }
    if !funds.is_zero() && is_empty_account(&beneficiary) {
      cost += fees.g_selfdestruct_newaccount;
    }
    self.burn(cost)?;
    self.tx.substate.accessed_addresses.insert(recipient.clone());
    self.popn(1);

    self.tx.substate.selfdestructs.push(self_addr.clone());
    self.touch_account(&recipient);
    if recipient != self_addr {
      self.transfer(&self_addr, &recipient, funds)?;
    } else if let Some(c) = self.env.contracts.get_mut(&self_addr) {
      c.balance = Expr::Lit(W256::zero());
    }
    self.finish_frame(FrameResult::FrameReturned(Expr::ConcreteBuf(Vec::new())))
  }

  // Cheatcodes -----------------------------------------------------------------------------------

  #[allow(clippy::too_many_arguments)]
  fn cheat_call(
    &mut self,
    opbyte: u8,
    n_args: usize,
    value: W256,
    requested: u64,
    in_off: u64,
    in_size: u64,
    out_off: u64,
    out_size: u64,
  ) -> Step<()> {
    self.access_memory_range(in_off, in_size)?;
    self.access_memory_range(out_off, out_size)?;
    let target = Expr::LitAddr(cheat_code_addr());
    let (cost, callee_gas) = self.cost_of_call(true, value, requested, &target);
    self.burn(cost - callee_gas)?;
    let input = match self.read_memory(in_off, in_size) {
      Expr::ConcreteBuf(b) => b,
      other => return Err(self.sym_arg("symbolic cheatcode calldata", vec![other])),
    };
    self.popn(n_args);
    self.next(opbyte);
    if input.len() < 4 {
      return Err(EvmError::BadCheatCode(None));
    }
    let sel = word32(&input[..4]);
    let args = &input[4..];
    self.dispatch_cheat(sel, args, out_off, out_size)
  }

  #[cfg(feature = "cheat")]
  fn dispatch_cheat(&mut self, sel: u32, args: &[u8], out_off: u64, out_size: u64) -> Step<()> {
    if sel == selector_word("warp(uint256)") {
      let t = decode_static_arg(args, 0).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      self.block.timestamp = Expr::Lit(t);
      self.finish_inline_call(Expr::ConcreteBuf(Vec::new()), out_off, out_size, true);
      Ok(())
    } else if sel == selector_word("roll(uint256)") {
      let n = decode_static_arg(args, 0).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      self.block.number = n;
      self.finish_inline_call(Expr::ConcreteBuf(Vec::new()), out_off, out_size, true);
      Ok(())
    } else if sel == selector_word("store(address,bytes32,bytes32)") {
      let a = decode_static_arg(args, 0).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let slot = decode_static_arg(args, 1).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let val = decode_static_arg(args, 2).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let addr = Expr::LitAddr(W256(a.0, a.1 & 0xffffffff));
      self.env.storage =
        write_storage(addr, Expr::Lit(slot), Expr::Lit(val), self.env.storage.clone());
      self.finish_inline_call(Expr::ConcreteBuf(Vec::new()), out_off, out_size, true);
      Ok(())
    } else if sel == selector_word("load(address,bytes32)") {
      let a = decode_static_arg(args, 0).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let slot = decode_static_arg(args, 1).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let addr = Expr::LitAddr(W256(a.0, a.1 & 0xffffffff));
      let value = self.resolve_slot(&addr, &Expr::Lit(slot))?;
      let word = maybe_lit_word(&value).unwrap_or_else(W256::zero);
      self.finish_inline_call(
        Expr::ConcreteBuf(word.to_be_bytes().to_vec()),
        out_off,
        out_size,
        true,
      );
      Ok(())
    } else if sel == selector_word("sign(uint256,bytes32)") {
      let sk = decode_static_arg(args, 0).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let digest = decode_static_arg(args, 1).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let (v, r, s) = cheat_sign(sk, digest);
      let out = abi_encode(&[
        AbiValue::AbiUInt(8, W256(v as u128, 0)),
        AbiValue::AbiBytes32(r),
        AbiValue::AbiBytes32(s),
      ]);
      self.finish_inline_call(Expr::ConcreteBuf(out), out_off, out_size, true);
      Ok(())
    } else if sel == selector_word("addr(uint256)") {
      let sk = decode_static_arg(args, 0).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      let a = cheat_addr(sk).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      self.finish_inline_call(Expr::ConcreteBuf(a.to_be_bytes().to_vec()), out_off, out_size, true);
      Ok(())
    } else if sel == selector_word("ffi(string[])") {
      if !self.config.allow_ffi {
        let msg = "ffi disabled: run again with --ffi if you want to allow tests to call external scripts";
        self.finish_inline_call(Expr::ConcreteBuf(encode_error_string(msg)), out_off, out_size, false);
        return Ok(());
      }
      let argv = decode_string_array(args).ok_or(EvmError::BadCheatCode(Some(sel)))?;
      self.pending = Some(PendingOp::AwaitFFI { out_offset: out_off, out_size });
      Err(EvmError::Query(Query::PleaseDoFFI(argv)))
    } else {
      Err(EvmError::BadCheatCode(Some(sel)))
    }
  }

  #[cfg(not(feature = "cheat"))]
  fn dispatch_cheat(&mut self, sel: u32, _args: &[u8], _out_off: u64, _out_size: u64) -> Step<()> {
    Err(EvmError::BadCheatCode(Some(sel)))
  }

  // Frame completion -----------------------------------------------------------------------------

  /// Restore a substate snapshot after a revert or error. Per EIP-2929 the
  /// warm sets survive, and address 0x03 stays touched if the reverted frame
  /// touched it.
  fn revert_substate(&mut self, snapshot: SubState) {
    let child = std::mem::replace(&mut self.tx.substate, snapshot);
    self.tx.substate.accessed_addresses = child.accessed_addresses;
    self.tx.substate.accessed_storage_keys = child.accessed_storage_keys;
    let three = Expr::LitAddr(W256(3, 0));
    if child.touched_accounts.contains(&three) && !self.tx.substate.touched_accounts.contains(&three)
    {
      self.tx.substate.touched_accounts.push(three);
    }
  }

  fn finish_frame(&mut self, result: FrameResult) -> Step<()> {
    match &result {
      FrameResult::FrameReturned(buf) => {
        if let Some(frame) = self.frames.last() {
          self.traces.insert(Trace {
            op_ix: -1,
            contract: self.state.contract.clone(),
            trace_data: TraceData::ReturnTrace(buf.clone(), frame.context.clone()),
          });
        }
      }
      FrameResult::FrameReverted(buf) => {
        self.trace(TraceData::ErrorTrace(EvmError::Revert(Box::new(buf.clone()))));
      }
      FrameResult::FrameErrored(_) => {}
    }

    if self.frames.is_empty() {
      let vm_result = match result.clone() {
        FrameResult::FrameReturned(buf) => VMResult::VMSuccess(buf),
        FrameResult::FrameReverted(buf) => VMResult::VMFailure(EvmError::Revert(Box::new(buf))),
        FrameResult::FrameErrored(e) => VMResult::VMFailure(e),
      };
      crate::modules::transactions::finalize_tx(self, &result);
      self.result = Some(vm_result);
      return Ok(());
    }

    // Creation returns run their deposit checks before anything is popped,
    // so a failed check still errors the child frame.
    if let (FrameResult::FrameReturned(output), Some(frame)) = (&result, self.frames.last()) {
      if let FrameContext::CreationContext { .. } = frame.context {
        let output = output.clone();
        let len_expr = buf_length(output.clone());
        let len = self
          .force_lit(&len_expr, "returning symbolically sized code from a constructor")?;
        let max = self.block.max_code_size;
        if len > max {
          return Err(EvmError::MaxCodeSizeExceeded(max, len));
        }
        if !len.is_zero() {
          match read_byte(Box::new(Expr::Lit(W256::zero())), Box::new(output.clone())) {
            Expr::LitByte(0xef) => return Err(EvmError::InvalidFormat),
            Expr::LitByte(_) => {}
            sym => {
              let first = crate::modules::expr::pad_byte_word(sym);
              self.pending = Some(PendingOp::AwaitDeposit {
                output: output.clone(),
                first_byte: first.clone(),
              });
              return Err(EvmError::Query(Query::PleaseAskSMT(
                Expr::Eq(Box::new(first), Box::new(Expr::Lit(W256(0xef, 0)))),
                self.constraints.clone(),
              )));
            }
          }
        }
        return self.finish_create(output);
      }
    }

    self.traces.pop();
    let frame = match self.frames.pop() {
      Some(f) => f,
      None => return Ok(()),
    };
    let child_gas = self.state.gas;
    let mut parent = frame.state;

    match frame.context {
      FrameContext::CallContext { out_offset, out_size, reversion, substate, .. } => {
        match result {
          FrameResult::FrameReturned(output) => {
            parent.gas += child_gas;
            self.state = parent;
            self.finish_inline_call(output, out_offset, out_size, true);
          }
          FrameResult::FrameReverted(output) => {
            let (contracts, storage) = reversion;
            self.env.contracts = contracts;
            self.env.storage = storage;
            self.revert_substate(substate);
            parent.gas += child_gas;
            self.state = parent;
            self.finish_inline_call(output, out_offset, out_size, false);
          }
          FrameResult::FrameErrored(_) => {
            let (contracts, storage) = reversion;
            self.env.contracts = contracts;
            self.env.storage = storage;
            self.revert_substate(substate);
            self.burned += child_gas;
            self.state = parent;
            self.state.returndata = Expr::ConcreteBuf(Vec::new());
            self.push_w256(W256::zero());
          }
        }
      }
      FrameContext::CreationContext { reversion, substate, .. } => match result {
        FrameResult::FrameReturned(_) => {
          // Unreachable: handled by finish_create above.
          parent.gas += child_gas;
          self.state = parent;
          self.push_w256(W256::zero());
        }
        FrameResult::FrameReverted(output) => {
          self.env.contracts = reversion;
          self.revert_substate(substate);
          parent.gas += child_gas;
          self.state = parent;
          self.state.returndata = output;
          self.push_w256(W256::zero());
        }
        FrameResult::FrameErrored(_) => {
          self.env.contracts = reversion;
          self.revert_substate(substate);
          self.burned += child_gas;
          self.state = parent;
          self.state.returndata = Expr::ConcreteBuf(Vec::new());
          self.push_w256(W256::zero());
        }
      },
    }
    Ok(())
  }

  /// Deposit the runtime code of a completed creation frame and hand the new
  /// address to the parent.
  fn finish_create(&mut self, output: Expr) -> Step<()> {
    let fees = self.block.schedule;
    let len = match buf_length(output.clone()) {
      Expr::Lit(n) => n.as_u64(),
      _ => 0,
    };
    self.burn(fees.g_codedeposit * len)?;

    self.traces.pop();
    let frame = match self.frames.pop() {
      Some(f) => f,
      None => return Ok(()),
    };
    let child_gas = self.state.gas;
    let mut parent = frame.state;
    parent.gas += child_gas;

    let address = match &frame.context {
      FrameContext::CreationContext { address, .. } => address.clone(),
      _ => Expr::LitAddr(W256::zero()),
    };

    let runtime = match &output {
      Expr::ConcreteBuf(bytes) => {
        ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes.clone()))
      }
      other => {
        let bytes = (0..len)
          .map(|i| read_byte(Box::new(Expr::Lit(W256(i as u128, 0))), Box::new(other.clone())))
          .collect();
        ContractCode::RuntimeCode(RuntimeCodeStruct::SymbolicRuntimeCode(bytes))
      }
    };
    if let Some(c) = self.env.contracts.get_mut(&address) {
      let deposited = initial_contract(runtime);
      c.codehash = deposited.codehash;
      c.op_idx_map = deposited.op_idx_map;
      c.code_ops = deposited.code_ops;
      c.code = deposited.code;
      c.nonce = Some(c.nonce.unwrap_or(1));
    }

    self.state = parent;
    self.state.returndata = Expr::ConcreteBuf(Vec::new());
    self.push_sym(addr_to_word(address));
    Ok(())
  }
}

fn push_value_concrete(code: &[u8], start: usize, n: usize) -> Expr {
  let mut bytes = Vec::with_capacity(n);
  for k in 0..n {
    bytes.push(code.get(start + k).copied().unwrap_or(0));
  }
  Expr::Lit(W256::from_bytes(bytes))
}

// Cheatcode signing ------------------------------------------------------------------------------
//
// A deliberately insecure fixed-nonce ECDSA used only by the `sign` cheat:
// k starts at 420 and v is always 28.

#[cfg(feature = "cheat")]
fn secp256k1_order() -> W256 {
  W256::from_hex("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141").unwrap_or_default()
}

#[cfg(feature = "cheat")]
fn secp256k1_prime() -> W256 {
  W256::from_hex("fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f").unwrap_or_default()
}

#[cfg(feature = "cheat")]
fn secp256k1_g() -> (W256, W256) {
  (
    W256::from_hex("79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798").unwrap_or_default(),
    W256::from_hex("483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8").unwrap_or_default(),
  )
}

#[cfg(feature = "cheat")]
fn powmod(mut base: W256, e: W256, m: W256) -> W256 {
  let mut result = W256::one();
  base = base % m;
  for i in 0..e.bit_length() {
    if e.bit(i) {
      result = result.mulmod(base, m);
    }
    base = base.mulmod(base, m);
  }
  result
}

#[cfg(feature = "cheat")]
fn inv_mod(a: W256, m: W256) -> W256 {
  powmod(a, m - W256(2, 0), m)
}

#[cfg(feature = "cheat")]
fn sub_mod(a: W256, b: W256, m: W256) -> W256 {
  a.addmod(m - (b % m), m)
}

#[cfg(feature = "cheat")]
type EcPoint = Option<(W256, W256)>;

#[cfg(feature = "cheat")]
fn ec_double(p: EcPoint, prime: W256) -> EcPoint {
  let (x, y) = p?;
  if y.is_zero() {
    return None;
  }
  let three_x2 = W256(3, 0).mulmod(x.mulmod(x, prime), prime);
  let slope = three_x2.mulmod(inv_mod(W256(2, 0).mulmod(y, prime), prime), prime);
  let x2 = sub_mod(slope.mulmod(slope, prime), W256(2, 0).mulmod(x, prime), prime);
  let y2 = sub_mod(slope.mulmod(sub_mod(x, x2, prime), prime), y, prime);
  Some((x2, y2))
}

#[cfg(feature = "cheat")]
fn ec_add(p: EcPoint, q: EcPoint, prime: W256) -> EcPoint {
  match (p, q) {
    (None, q) => q,
    (p, None) => p,
    (Some((x1, y1)), Some((x2, y2))) => {
      if x1 == x2 {
        if y1 == y2 {
          ec_double(Some((x1, y1)), prime)
        } else {
          None
        }
      } else {
        let slope = sub_mod(y2, y1, prime).mulmod(inv_mod(sub_mod(x2, x1, prime), prime), prime);
        let x3 = sub_mod(sub_mod(slope.mulmod(slope, prime), x1, prime), x2, prime);
        let y3 = sub_mod(slope.mulmod(sub_mod(x1, x3, prime), prime), y1, prime);
        Some((x3, y3))
      }
    }
  }
}

#[cfg(feature = "cheat")]
fn ec_mul(k: W256, point: (W256, W256), prime: W256) -> EcPoint {
  let mut acc: EcPoint = None;
  let mut addend: EcPoint = Some(point);
  for i in 0..k.bit_length() {
    if k.bit(i) {
      acc = ec_add(acc, addend, prime);
    }
    addend = ec_double(addend, prime);
  }
  acc
}

#[cfg(feature = "cheat")]
fn cheat_sign(sk: W256, digest: W256) -> (u8, W256, W256) {
  let n = secp256k1_order();
  let prime = secp256k1_prime();
  let g = secp256k1_g();
  let z = digest % n;
  let d = sk % n;
  let mut k = W256(420, 0);
  loop {
    if let Some((x, _)) = ec_mul(k, g, prime) {
      let r = x % n;
      if !r.is_zero() {
        let s = inv_mod(k, n).mulmod(z.addmod(r.mulmod(d, n), n), n);
        if !s.is_zero() {
          return (28, r, s);
        }
      }
    }
    k = k + W256::one();
  }
}

#[cfg(feature = "cheat")]
fn cheat_addr(sk: W256) -> Option<W256> {
  let secp = Secp256k1::new();
  let key = SecretKey::from_slice(&sk.to_be_bytes()).ok()?;
  let public = PublicKey::from_secret_key(&secp, &key);
  let uncompressed = public.serialize_uncompressed();
  let hash = keccak_bytes(&uncompressed[1..65]);
  Some(W256::from_bytes(hash[12..].to_vec()))
}
