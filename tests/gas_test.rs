use std::collections::HashMap;

use sevm::modules::evm::{
  all_but_one_64th, ceil_div, cost_of_create, memory_cost, merge_caches, unify_cached_contract,
  unify_cached_storage, empty_contract,
};
use sevm::modules::feeschedule::fee_schedule;
use sevm::modules::types::{Cache, Expr, W256};

#[test]
fn test_ceil_div() {
  assert_eq!(ceil_div(0, 32), 0);
  assert_eq!(ceil_div(1, 32), 1);
  assert_eq!(ceil_div(32, 32), 1);
  assert_eq!(ceil_div(33, 32), 2);
}

#[test]
fn test_all_but_one_64th() {
  assert_eq!(all_but_one_64th(64), 63);
  assert_eq!(all_but_one_64th(128), 126);
  assert_eq!(all_but_one_64th(63), 63);
  assert_eq!(all_but_one_64th(0), 0);
}

#[test]
fn test_memory_cost_formula() {
  let fees = fee_schedule();
  assert_eq!(memory_cost(&fees, 0), 0);
  assert_eq!(memory_cost(&fees, 32), 3);
  assert_eq!(memory_cost(&fees, 64), 6);
  // 22 words: 3 * 22 + 484 / 512 = 66
  assert_eq!(memory_cost(&fees, 704), 66);
  // 1024 words: 3 * 1024 + 1024^2 / 512 = 5120
  assert_eq!(memory_cost(&fees, 32 * 1024), 5120);
}

#[test]
fn test_memory_cost_saturates() {
  let fees = fee_schedule();
  assert_eq!(memory_cost(&fees, u64::MAX), u64::MAX);
}

#[test]
fn test_cost_of_create() {
  let fees = fee_schedule();
  let (total, init_gas) = cost_of_create(&fees, 100_000, 64, false);
  assert_eq!(init_gas, all_but_one_64th(100_000 - 32_000));
  assert_eq!(total, 32_000 + init_gas);

  // CREATE2 also pays to hash the init code
  let (total2, init_gas2) = cost_of_create(&fees, 100_000, 64, true);
  assert_eq!(total2 - init_gas2, 32_000 + 2 * fees.g_sha3word);
  assert_eq!(init_gas2, all_but_one_64th(100_000 - 32_000 - 12));
}

#[test]
fn test_unify_cached_storage_is_last_write_wins() {
  let mut base: HashMap<W256, HashMap<W256, W256>> = HashMap::new();
  base.entry(W256(1, 0)).or_default().insert(W256(0, 0), W256(10, 0));
  base.entry(W256(1, 0)).or_default().insert(W256(1, 0), W256(11, 0));

  let mut newer: HashMap<W256, HashMap<W256, W256>> = HashMap::new();
  newer.entry(W256(1, 0)).or_default().insert(W256(0, 0), W256(99, 0));
  newer.entry(W256(2, 0)).or_default().insert(W256(5, 0), W256(50, 0));

  unify_cached_storage(&mut base, &newer);
  assert_eq!(base[&W256(1, 0)][&W256(0, 0)], W256(99, 0));
  assert_eq!(base[&W256(1, 0)][&W256(1, 0)], W256(11, 0));
  assert_eq!(base[&W256(2, 0)][&W256(5, 0)], W256(50, 0));
}

#[test]
fn test_unify_cached_contract() {
  let mut base: HashMap<W256, _> = HashMap::new();
  let mut old = empty_contract();
  old.nonce = Some(1);
  base.insert(W256(1, 0), old);

  let mut newer: HashMap<W256, _> = HashMap::new();
  let mut new = empty_contract();
  new.nonce = Some(7);
  newer.insert(W256(1, 0), new);

  unify_cached_contract(&mut base, &newer);
  assert_eq!(base[&W256(1, 0)].nonce, Some(7));
}

#[test]
fn test_merge_caches_unions_paths() {
  let mut base = Cache::default();
  base.path.insert(((Expr::LitAddr(W256(1, 0)), 5), 0), true);
  let mut other = Cache::default();
  other.path.insert(((Expr::LitAddr(W256(1, 0)), 5), 1), false);
  other.fetched_storage.entry(W256(9, 0)).or_default().insert(W256(0, 0), W256(3, 0));

  merge_caches(&mut base, &other);
  assert_eq!(base.path.len(), 2);
  assert_eq!(base.fetched_storage[&W256(9, 0)][&W256(0, 0)], W256(3, 0));
}
