use crate::modules::evm::{empty_contract, is_empty_account};
use crate::modules::expr::maybe_lit_word;
use crate::modules::types::{
  Expr, ExprContractMap, FrameResult, SubState, W256, VM,
};

fn ensure_account(contracts: &mut ExprContractMap, addr: &Expr) {
  contracts.entry(addr.clone()).or_insert_with(empty_contract);
}

fn credit(contracts: &mut ExprContractMap, addr: &Expr, amount: W256) {
  if let Some(account) = contracts.get_mut(addr) {
    if let Some(b) = maybe_lit_word(&account.balance) {
      account.balance = Expr::Lit(b + amount);
    }
  }
}

fn debit(contracts: &mut ExprContractMap, addr: &Expr, amount: W256) {
  if let Some(account) = contracts.get_mut(addr) {
    if let Some(b) = maybe_lit_word(&account.balance) {
      account.balance = Expr::Lit(b - amount);
    }
  }
}

/// Set up the transaction-level state: the origin pays the full gas limit up
/// front and its nonce advances, the value moves, and the reversion and
/// original-storage snapshots are taken.
pub fn init_tx(vm: &mut VM) -> &mut VM {
  let origin = vm.tx.origin.clone();
  let coinbase = vm.block.coinbase.clone();
  let to_addr = vm.state.contract.clone();
  let value = maybe_lit_word(&vm.tx.value).unwrap_or_else(W256::zero);
  let gas_cost = vm.tx.gasprice * W256(vm.tx.gaslimit as u128, 0);

  ensure_account(&mut vm.env.contracts, &origin);
  ensure_account(&mut vm.env.contracts, &coinbase);
  ensure_account(&mut vm.env.contracts, &to_addr);

  if let Some(account) = vm.env.contracts.get_mut(&origin) {
    if let Some(n) = account.nonce {
      account.nonce = Some(n + 1);
    }
  }
  debit(&mut vm.env.contracts, &origin, gas_cost);

  // A reverted transaction still pays for gas and keeps the nonce bump.
  vm.tx.tx_reversion = vm.env.contracts.clone();

  debit(&mut vm.env.contracts, &origin, value);
  credit(&mut vm.env.contracts, &to_addr, value);

  if let Expr::ConcreteStore(store) = &vm.env.storage {
    vm.env.orig_storage = store
      .iter()
      .map(|(addr, slots)| (*addr, slots.iter().map(|(k, v)| (*k, *v)).collect()))
      .collect();
  }
  vm
}

/// End-of-transaction accounting: gas refunds capped at a fifth of the gas
/// used, origin and coinbase credits, and the EIP-161 sweep of destructed
/// and empty-touched accounts.
pub fn finalize_tx(vm: &mut VM, outcome: &FrameResult) {
  match outcome {
    FrameResult::FrameErrored(_) => {
      vm.burned += vm.state.gas;
      vm.state.gas = 0;
      vm.env.contracts = vm.tx.tx_reversion.clone();
      vm.tx.substate = SubState::empty();
    }
    FrameResult::FrameReverted(_) => {
      vm.env.contracts = vm.tx.tx_reversion.clone();
      vm.tx.substate = SubState::empty();
    }
    FrameResult::FrameReturned(_) => {}
  }

  let gas_remaining = vm.state.gas;
  let gas_used = vm.tx.gaslimit.saturating_sub(gas_remaining);
  let capped_refund = (gas_used / 5).min(vm.tx.substate.refund_total());

  let origin = vm.tx.origin.clone();
  let coinbase = vm.block.coinbase.clone();
  ensure_account(&mut vm.env.contracts, &coinbase);
  credit(
    &mut vm.env.contracts,
    &origin,
    vm.tx.gasprice * W256((gas_remaining + capped_refund) as u128, 0),
  );
  let fees = vm.block.schedule;
  credit(
    &mut vm.env.contracts,
    &coinbase,
    vm.tx.priority_fee * W256(gas_used as u128, 0) + W256(fees.r_block as u128, 0),
  );

  for addr in vm.tx.substate.selfdestructs.clone() {
    vm.env.contracts.remove(&addr);
  }
  for addr in vm.tx.substate.touched_accounts.clone() {
    let is_empty = vm.env.contracts.get(&addr).map(is_empty_account).unwrap_or(false);
    if is_empty {
      vm.env.contracts.remove(&addr);
    }
  }
}
