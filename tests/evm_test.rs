use std::collections::HashMap;

use sevm::modules::abi::selector;
use sevm::modules::evm::{
  cheat_code_addr, create_address, empty_contract, initial_contract, make_vm,
};
use sevm::modules::exec::exec;
use sevm::modules::expr::read_storage;
use sevm::modules::feeschedule::fee_schedule;
use sevm::modules::keccak::keccak_prime;
use sevm::modules::precompiled::precompile_ecrecover;
use sevm::modules::transactions::init_tx;
use sevm::modules::types::{
  word256_bytes, BaseState, BranchCondition, Contract, ContractCode, EvmError, Expr, Prop, Query,
  RuntimeCodeStruct, TraceData, VMOpts, VMResult, W256, VM,
};

const ADDR: u128 = 0xaaaa;
const OTHER: u128 = 0xbbbb;
const CALLER: u128 = 0xc0de;
const GAS: u64 = 1_000_000;

fn contract_from_hex(code: &str) -> Contract {
  let bytes = hex::decode(code).expect("valid hex");
  initial_contract(ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)))
}

fn contract_from_bytes(bytes: Vec<u8>) -> Contract {
  initial_contract(ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(bytes)))
}

fn base_opts(contract: Contract) -> VMOpts {
  VMOpts {
    contract,
    other_contracts: Vec::new(),
    calldata: (Expr::ConcreteBuf(Vec::new()), Vec::new()),
    base_state: BaseState::EmptyBase,
    value: Expr::Lit(W256::zero()),
    priority_fee: W256::zero(),
    address: Expr::LitAddr(W256(ADDR, 0)),
    caller: Expr::LitAddr(W256(CALLER, 0)),
    origin: Expr::LitAddr(W256(CALLER, 0)),
    gas: GAS,
    gaslimit: GAS,
    number: W256(1, 0),
    timestamp: Expr::Lit(W256(1, 0)),
    coinbase: Expr::LitAddr(W256::zero()),
    prev_randao: W256::zero(),
    max_code_size: W256(24576, 0),
    block_gaslimit: GAS,
    gasprice: W256::zero(),
    base_fee: W256::zero(),
    schedule: fee_schedule(),
    chain_id: W256(1, 0),
    create: false,
    tx_access_list: HashMap::new(),
    allow_ffi: false,
  }
}

fn vm_from_opts(opts: VMOpts) -> VM {
  let mut vm = make_vm(opts);
  init_tx(&mut vm);
  vm
}

fn vm_from_hex(code: &str) -> VM {
  vm_from_opts(base_opts(contract_from_hex(code)))
}

/// Drive to completion, answering state-fetch queries the way a stateless
/// driver would.
fn run(vm: &mut VM) -> VMResult {
  loop {
    match exec(vm) {
      VMResult::VMFailure(EvmError::Query(Query::PleaseFetchContract(_))) => {
        vm.answer_contract(empty_contract());
      }
      VMResult::VMFailure(EvmError::Query(Query::PleaseFetchSlot(_, _))) => {
        vm.answer_slot(W256::zero());
      }
      other => return other,
    }
  }
}

fn top(vm: &VM) -> Expr {
  (**vm.state.stack.last().expect("stack is not empty")).clone()
}

fn lit_addr(a: u128) -> Expr {
  Expr::LitAddr(W256(a, 0))
}

/// Bytecode for `CALL target` forwarding no value and a large gas allowance.
fn call_block(target: u128, ret_size: u8) -> Vec<u8> {
  let mut code = vec![0x60, ret_size, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x61];
  code.extend(((target as u16) & 0xffff).to_be_bytes());
  code.extend([0x62, 0xff, 0xff, 0xff, 0xf1]);
  code
}

// Scenarios --------------------------------------------------------------------------------------

#[test]
fn test_s1_add() {
  let mut vm = vm_from_hex("6001600101");
  let result = run(&mut vm);
  assert_eq!(result, VMResult::VMSuccess(Expr::ConcreteBuf(Vec::new())));
  assert_eq!(top(&vm), Expr::Lit(W256(2, 0)));
  assert_eq!(vm.burned, 9);
  assert_eq!(vm.state.gas, GAS - 9);
}

#[test]
fn test_s2_mstore_return() {
  let mut vm = vm_from_hex("602a60005260206000f3");
  let result = run(&mut vm);
  assert_eq!(result, VMResult::VMSuccess(Expr::ConcreteBuf(word256_bytes(W256(42, 0)))));
  assert_eq!(vm.state.memory_size, 32);
}

#[test]
fn test_s3_out_of_gas() {
  let mut opts = base_opts(contract_from_hex("5b"));
  opts.gas = 0;
  opts.gaslimit = 0;
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert_eq!(result, VMResult::VMFailure(EvmError::OutOfGas(0, 1)));
  assert_eq!(vm.state.gas, 0);
}

#[test]
fn test_s4_bad_jump() {
  let mut vm = vm_from_hex("6005565b0000");
  let result = run(&mut vm);
  assert_eq!(result, VMResult::VMFailure(EvmError::BadJumpDestination));
}

#[test]
fn test_s5_static_violation() {
  // caller STATICCALLs into a contract that runs SSTORE
  let caller_code = "600060006000600061bbbb62fffffffa00";
  let mut opts = base_opts(contract_from_hex(caller_code));
  opts.other_contracts = vec![(lit_addr(OTHER), contract_from_hex("600160005500"))];
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::zero()));
  // no storage was mutated
  assert_eq!(read_storage(&lit_addr(OTHER), &Expr::Lit(W256::zero()), &vm.env.storage), None);
  // the child frame died on the static check
  let saw_static_error = vm.traces.arena.iter().any(|node| {
    matches!(node.trace.trace_data, TraceData::ErrorTrace(EvmError::StateChangeWhileStatic))
  });
  assert!(saw_static_error);
}

#[test]
fn test_s6_create_collision() {
  let colliding = create_address(W256(ADDR, 0), 0);
  let mut squatter = empty_contract();
  squatter.nonce = Some(1);
  let mut opts = base_opts(contract_from_hex("600060006000f000"));
  opts.other_contracts = vec![(Expr::LitAddr(colliding), squatter)];
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::zero()));
  // the entire supplied gas went up in smoke and the nonce still advanced
  assert!(vm.burned > 32_000);
  assert_eq!(vm.env.contracts[&lit_addr(ADDR)].nonce, Some(1));
}

#[test]
fn test_s7_selfdestruct() {
  let mut contract = contract_from_hex("61bbbbff");
  contract.balance = Expr::Lit(W256(100, 0));
  let mut vm = vm_from_opts(base_opts(contract));
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert!(vm.tx.substate.selfdestructs.contains(&lit_addr(ADDR)));
  // the balance moved and finalisation removed the account
  assert_eq!(vm.env.contracts[&lit_addr(OTHER)].balance, Expr::Lit(W256(100, 0)));
  assert!(!vm.env.contracts.contains_key(&lit_addr(ADDR)));
}

// Properties -------------------------------------------------------------------------------------

#[test]
fn test_stack_underrun_leaves_state_alone() {
  let mut vm = vm_from_hex("90");
  vm.state.stack.push(Box::new(Expr::Lit(W256(1, 0))));
  vm.exec1();
  assert_eq!(vm.result, Some(VMResult::VMFailure(EvmError::StackUnderrun)));
  assert_eq!(vm.state.stack.len(), 1);
  assert_eq!(top(&vm), Expr::Lit(W256(1, 0)));
  assert_eq!(vm.state.memory_size, 0);
}

#[test]
fn test_gas_accounting_is_exact_per_step() {
  let mut vm = vm_from_hex("602a60005260206000f3");
  while vm.result.is_none() {
    vm.exec1();
    let in_frames: u64 = vm.frames.iter().map(|f| f.state.gas).sum();
    assert_eq!(vm.burned + vm.state.gas + in_frames, GAS);
  }
}

#[test]
fn test_memory_stays_word_aligned() {
  let mut vm = vm_from_hex("600160215300");
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(vm.state.memory_size, 64);
}

#[test]
fn test_jump_into_push_data_is_invalid() {
  // 0x5b at offset 4 is a PUSH1 immediate, not an instruction
  let mut vm = vm_from_hex("600456605b00");
  assert_eq!(run(&mut vm), VMResult::VMFailure(EvmError::BadJumpDestination));

  // the same offset holding a real JUMPDEST is fine
  let mut vm = vm_from_hex("600456005b00");
  assert!(matches!(run(&mut vm), VMResult::VMSuccess(_)));
}

#[test]
fn test_access_list_survives_revert() {
  let mut caller_code = call_block(OTHER, 0);
  caller_code.push(0x00);
  let mut opts = base_opts(contract_from_bytes(caller_code));
  // callee: SLOAD slot 5, then revert
  opts.other_contracts = vec![(lit_addr(OTHER), contract_from_hex("6005545060006000fd"))];
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::zero()));
  assert!(vm.tx.substate.accessed_storage_keys.contains(&(lit_addr(OTHER), W256(5, 0))));
  assert!(vm.tx.substate.accessed_addresses.contains(&lit_addr(OTHER)));
}

#[test]
fn test_revert_isolation() {
  let mut caller_code = call_block(OTHER, 0);
  caller_code.push(0x00);
  let mut opts = base_opts(contract_from_bytes(caller_code));
  // callee: SSTORE then revert
  opts.other_contracts = vec![(lit_addr(OTHER), contract_from_hex("600160005560006000fd"))];
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::zero()));
  // the write was rolled back but the warm key remains
  assert_eq!(read_storage(&lit_addr(OTHER), &Expr::Lit(W256::zero()), &vm.env.storage), None);
  assert!(vm.tx.substate.accessed_storage_keys.contains(&(lit_addr(OTHER), W256::zero())));
}

#[test]
fn test_cold_then_warm_account_access() {
  let mut code = call_block(OTHER, 0);
  code.extend(call_block(OTHER, 0));
  code.push(0x00);
  let mut opts = base_opts(contract_from_bytes(code));
  opts.other_contracts = vec![(lit_addr(OTHER), empty_contract())];
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  // 7 pushes per call, one cold and one warm account access
  assert_eq!(vm.burned, 21 + 2600 + 21 + 100);
}

#[test]
fn test_child_out_of_gas_burns_child_gas_only() {
  let mut code = vec![0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x61];
  code.extend((OTHER as u16).to_be_bytes());
  code.extend([0x61, 0x03, 0xe8, 0xf1, 0x00]); // request 1000 gas
  let mut opts = base_opts(contract_from_bytes(code));
  // callee loops until it runs dry
  opts.other_contracts = vec![(lit_addr(OTHER), contract_from_hex("5b600056"))];
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::zero()));
  assert_eq!(vm.burned + vm.state.gas, GAS);
}

#[test]
fn test_exp_gas() {
  // 10 ** 2 costs g_exp + one exponent byte
  let mut vm = vm_from_hex("6002600a0a00");
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256(100, 0)));
  assert_eq!(vm.burned, 3 + 3 + 10 + 50);
}

#[test]
fn test_sha3_records_preimage() {
  let mut vm = vm_from_hex("600260002000");
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  let hash = keccak_prime(&[0, 0]);
  assert_eq!(top(&vm), Expr::Lit(hash));
  assert_eq!(vm.env.sha3_preimages.get(&hash), Some(&vec![0u8, 0u8]));
  assert_eq!(vm.keccak_eqs.len(), 1);
}

#[test]
fn test_call_returns_data_to_caller() {
  let mut code = call_block(OTHER, 0x20);
  code.extend([0x60, 0x20, 0x60, 0x00, 0xf3]); // return the copied word
  let mut opts = base_opts(contract_from_bytes(code));
  opts.other_contracts = vec![(lit_addr(OTHER), contract_from_hex("602a60005260206000f3"))];
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert_eq!(result, VMResult::VMSuccess(Expr::ConcreteBuf(word256_bytes(W256(42, 0)))));
}

#[test]
fn test_symbolic_memory_round_trip() {
  let mut opts = base_opts(contract_from_hex("60003560005260005100"));
  opts.calldata = (Expr::AbstractBuf("txdata".to_string()), Vec::new());
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(
    top(&vm),
    Expr::ReadWord(
      Box::new(Expr::Lit(W256::zero())),
      Box::new(Expr::AbstractBuf("txdata".to_string()))
    )
  );
}

#[test]
fn test_create_deploys_runtime_code() {
  // constructor returns a single STOP byte
  let mut vm = vm_from_hex("6460016000f36000526005601b6000f000");
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  let created = create_address(W256(ADDR, 0), 0);
  assert_eq!(top(&vm), Expr::Lit(created));
  let deployed = &vm.env.contracts[&Expr::LitAddr(created)];
  assert_eq!(
    deployed.code,
    ContractCode::RuntimeCode(RuntimeCodeStruct::ConcreteRuntimeCode(vec![0x00]))
  );
  assert_eq!(deployed.nonce, Some(1));
  assert_eq!(vm.env.contracts[&lit_addr(ADDR)].nonce, Some(1));
}

#[test]
fn test_create_rejects_ef_prefix() {
  // constructor returns 0xef
  let init = "60ef60005360016000f3";
  let code = format!("69{}600052600a60166000f000", init);
  let mut vm = vm_from_hex(&code);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::zero()));
  let created = create_address(W256(ADDR, 0), 0);
  assert!(!vm.env.contracts.contains_key(&Expr::LitAddr(created)));
}

#[test]
fn test_top_level_precompile_call() {
  let mut opts = base_opts(empty_contract());
  opts.address = Expr::LitAddr(W256(4, 0));
  opts.calldata = (Expr::ConcreteBuf(vec![1, 2, 3]), Vec::new());
  let mut vm = vm_from_opts(opts);
  let result = run(&mut vm);
  assert_eq!(result, VMResult::VMSuccess(Expr::ConcreteBuf(vec![1, 2, 3])));
  assert_eq!(vm.burned, 18);
}

/// Run `SSTORE slot1 <- new` with a seeded original and current value,
/// returning the gas burned by the store itself and the net refund delta.
fn run_sstore(original: u128, current: u128, new: u128) -> (u64, i64) {
  let code = vec![0x60, new as u8, 0x60, 0x01, 0x55, 0x00];
  let mut vm = vm_from_opts(base_opts(contract_from_bytes(code)));
  if current != 0 {
    vm.env.storage = sevm::modules::expr::write_storage(
      lit_addr(ADDR),
      Expr::Lit(W256(1, 0)),
      Expr::Lit(W256(current, 0)),
      vm.env.storage.clone(),
    );
  }
  vm.env.orig_storage.entry(W256(ADDR, 0)).or_default().insert(W256(1, 0), W256(original, 0));
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  let refund: i64 = vm.tx.substate.refunds.iter().map(|(_, n)| *n).sum();
  // two pushes and the cold-slot surcharge are constant across cases
  (vm.burned - 6 - 2100, refund)
}

#[test]
fn test_sstore_refund_table() {
  // no-op write
  assert_eq!(run_sstore(1, 1, 1), (100, 0));
  // fresh write to a clean zero slot
  assert_eq!(run_sstore(0, 0, 1), (20000, 0));
  // clearing a clean nonzero slot refunds
  assert_eq!(run_sstore(1, 1, 0), (2900, 4800));
  // overwriting a clean nonzero slot
  assert_eq!(run_sstore(1, 1, 2), (2900, 0));
  // clearing an already-dirty slot refunds
  assert_eq!(run_sstore(1, 2, 0), (100, 4800));
  // restoring a cleared slot takes the earlier refund back
  assert_eq!(run_sstore(1, 0, 1), (100, -4800 + 2800));
  // a zero round trip refunds almost the full set cost
  assert_eq!(run_sstore(0, 5, 0), (100, 19900));
}

// The branch protocol ----------------------------------------------------------------------------

fn branchy_vm() -> VM {
  let mut opts = base_opts(contract_from_hex("600035600757005b00"));
  opts.calldata = (Expr::AbstractBuf("txdata".to_string()), Vec::new());
  vm_from_opts(opts)
}

#[test]
fn test_symbolic_jumpi_suspends() {
  let mut vm = branchy_vm();
  match exec(&mut vm) {
    VMResult::VMFailure(EvmError::Query(Query::PleaseAskSMT(cond, _))) => {
      assert_eq!(
        cond,
        Expr::ReadWord(
          Box::new(Expr::Lit(W256::zero())),
          Box::new(Expr::AbstractBuf("txdata".to_string()))
        )
      );
    }
    other => panic!("expected an SMT query, got {:?}", other),
  }

  vm.answer_branch(BranchCondition::Case(true));
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  // the taken branch recorded its polarity and constraint
  let loc = (lit_addr(ADDR), 5usize);
  assert_eq!(vm.iterations.get(&loc), Some(&1));
  assert_eq!(vm.cache.path.get(&(loc, 0)), Some(&true));
  assert!(matches!(vm.constraints.last(), Some(Prop::PNeg(_))));
}

#[test]
fn test_symbolic_jumpi_not_taken() {
  let mut vm = branchy_vm();
  let _ = exec(&mut vm);
  vm.answer_branch(BranchCondition::Case(false));
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert!(matches!(vm.constraints.last(), Some(Prop::PEq(_, _))));
}

#[test]
fn test_smt_unknown_escalates_to_choice() {
  let mut vm = branchy_vm();
  let _ = exec(&mut vm);
  vm.answer_branch(BranchCondition::Unknown);
  assert!(matches!(
    vm.result,
    Some(VMResult::VMFailure(EvmError::Choose(_)))
  ));
  // the driver (or a user) then picks a side
  vm.answer_branch(BranchCondition::Case(true));
  assert!(matches!(run(&mut vm), VMResult::VMSuccess(_)));
}

#[test]
fn test_smt_inconsistent_kills_the_path() {
  let mut vm = branchy_vm();
  let _ = exec(&mut vm);
  vm.answer_branch(BranchCondition::Inconsistent);
  assert_eq!(vm.result, Some(VMResult::VMFailure(EvmError::DeadPath)));
}

// Cheatcodes -------------------------------------------------------------------------------------

#[test]
fn test_cheat_code_address_constant() {
  assert_eq!(
    cheat_code_addr(),
    W256::from_hex("7109709ecfa91a80626ff3989d68f67f5b1dd12d").unwrap()
  );
}

/// CALLDATACOPY the whole calldata to memory, then CALL the cheatcode
/// contract with it.
fn cheat_caller_code(args_size: u8, ret_size: u8) -> Vec<u8> {
  let mut code = vec![0x60, args_size, 0x60, 0x00, 0x60, 0x00, 0x37];
  code.extend([0x60, ret_size, 0x60, 0x80, 0x60, args_size, 0x60, 0x00, 0x60, 0x00, 0x73]);
  code.extend(&cheat_code_addr().to_be_bytes()[12..]);
  code.extend([0x62, 0xff, 0xff, 0xff, 0xf1, 0x00]);
  code
}

fn cheat_vm(signature: &str, args: &[W256], allow_ffi: bool) -> VM {
  let mut calldata = selector(signature);
  for arg in args {
    calldata.extend(word256_bytes(*arg));
  }
  let args_size = calldata.len() as u8;
  let mut opts = base_opts(contract_from_bytes(cheat_caller_code(args_size, 0x60)));
  opts.calldata = (Expr::ConcreteBuf(calldata), Vec::new());
  opts.allow_ffi = allow_ffi;
  vm_from_opts(opts)
}

#[test]
fn test_cheat_warp() {
  let mut vm = cheat_vm("warp(uint256)", &[W256(1234, 0)], false);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::one()));
  assert_eq!(vm.block.timestamp, Expr::Lit(W256(1234, 0)));
}

#[test]
fn test_cheat_roll() {
  let mut vm = cheat_vm("roll(uint256)", &[W256(777, 0)], false);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(vm.block.number, W256(777, 0));
}

#[test]
fn test_cheat_store_and_load() {
  let mut vm = cheat_vm(
    "store(address,bytes32,bytes32)",
    &[W256(OTHER, 0), W256(1, 0), W256(99, 0)],
    false,
  );
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(
    read_storage(&lit_addr(OTHER), &Expr::Lit(W256(1, 0)), &vm.env.storage),
    Some(Expr::Lit(W256(99, 0)))
  );

  let mut vm = cheat_vm("load(address,bytes32)", &[W256(OTHER, 0), W256(1, 0)], false);
  vm.env.storage = sevm::modules::expr::write_storage(
    lit_addr(OTHER),
    Expr::Lit(W256(1, 0)),
    Expr::Lit(W256(99, 0)),
    vm.env.storage.clone(),
  );
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(vm.state.returndata, Expr::ConcreteBuf(word256_bytes(W256(99, 0))));
}

#[test]
fn test_cheat_sign_recovers_to_signer() {
  let digest = W256(0xdead, 0);
  let mut vm = cheat_vm("sign(uint256,bytes32)", &[W256(1, 0), digest], false);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  let ret = match &vm.state.returndata {
    Expr::ConcreteBuf(b) => b.clone(),
    other => panic!("expected concrete returndata, got {}", other),
  };
  assert_eq!(ret.len(), 96);
  // the nonce is fixed, so v is always 28
  assert_eq!(ret[31], 28);

  let mut input = [0u8; 128];
  input[0..32].copy_from_slice(&word256_bytes(digest));
  input[32..64].copy_from_slice(&ret[0..32]);
  input[64..96].copy_from_slice(&ret[32..64]);
  input[96..128].copy_from_slice(&ret[64..96]);
  let recovered = precompile_ecrecover(&input).expect("signature is valid");
  // the address of private key 1
  let expected = W256::from_hex("7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap();
  assert_eq!(recovered, word256_bytes(expected));
}

#[test]
fn test_cheat_addr() {
  let mut vm = cheat_vm("addr(uint256)", &[W256(1, 0)], false);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  let expected = W256::from_hex("7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap();
  assert_eq!(vm.state.returndata, Expr::ConcreteBuf(word256_bytes(expected)));
}

#[test]
fn test_cheat_ffi_disabled_reverts() {
  // ffi([]) with the empty string array: head offset then a zero length
  let mut vm = cheat_vm("ffi(string[])", &[W256(0x20, 0), W256::zero()], false);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::zero()));
  match &vm.state.returndata {
    Expr::ConcreteBuf(b) => assert_eq!(&b[..4], selector("Error(string)").as_slice()),
    other => panic!("expected concrete returndata, got {}", other),
  }
}

#[test]
fn test_cheat_ffi_suspends_and_resumes() {
  let mut vm = cheat_vm("ffi(string[])", &[W256(0x20, 0), W256::zero()], true);
  match exec(&mut vm) {
    VMResult::VMFailure(EvmError::Query(Query::PleaseDoFFI(argv))) => assert!(argv.is_empty()),
    other => panic!("expected an ffi query, got {:?}", other),
  }
  vm.answer_ffi(b"0x2a\n".to_vec());
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMSuccess(_)));
  assert_eq!(top(&vm), Expr::Lit(W256::one()));
  // abi-encoded dynamic bytes holding 0x2a
  let mut expected = word256_bytes(W256(0x20, 0));
  expected.extend(word256_bytes(W256(1, 0)));
  let mut tail = vec![0x2a];
  tail.resize(32, 0);
  expected.extend(tail);
  assert_eq!(vm.state.returndata, Expr::ConcreteBuf(expected));
}

#[test]
fn test_unknown_cheat_selector_fails() {
  let mut vm = cheat_vm("definitelyNotACheat()", &[], false);
  let result = run(&mut vm);
  assert!(matches!(result, VMResult::VMFailure(EvmError::BadCheatCode(Some(_)))));
}
