use secp256k1::rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use sevm::modules::feeschedule::fee_schedule;
use sevm::modules::keccak::keccak_bytes;
use sevm::modules::precompiled::{
  cost_of_precompile, execute_precompile, precompile_blake2f, precompile_ecadd,
  precompile_ecpairing, precompile_ecrecover, precompile_modexp, precompile_ripemd160,
  precompile_sha256, PrecompileResult,
};

#[test]
fn test_ecrecover_roundtrip() {
  let secp = Secp256k1::new();
  let mut rng = OsRng;
  let sk = SecretKey::new(&mut rng);
  let pk = PublicKey::from_secret_key(&secp, &sk);

  let message = Message::from_digest_slice(&[0xab; 32]).unwrap();
  let (recid, sig) = secp.sign_ecdsa_recoverable(&message, &sk).serialize_compact();

  let mut input = [0u8; 128];
  input[0..32].copy_from_slice(&[0xab; 32]);
  input[63] = (recid.to_i32() + 27) as u8;
  input[64..128].copy_from_slice(&sig);

  let output = precompile_ecrecover(&input).expect("recovery should succeed");

  let hash = keccak_bytes(&pk.serialize_uncompressed()[1..65]);
  let mut expected = vec![0u8; 12];
  expected.extend(&hash[12..32]);
  assert_eq!(output, expected);
}

#[test]
fn test_ecrecover_invalid_v_is_soft_failure() {
  let mut input = [0u8; 128];
  input[63] = 29;
  assert_eq!(precompile_ecrecover(&input), None);
  // as a precompile call this is still a success with empty output
  let fees = fee_schedule();
  match execute_precompile(&fees, 1, &input, 10_000) {
    PrecompileResult::Success { gas_used, output } => {
      assert_eq!(gas_used, 3000);
      assert!(output.is_empty());
    }
    other => panic!("unexpected result {:?}", other),
  }
}

#[test]
fn test_sha256_vector() {
  let out = precompile_sha256(b"abc");
  assert_eq!(
    hex::encode(out),
    "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
  );
}

#[test]
fn test_ripemd160_vector() {
  let out = precompile_ripemd160(b"abc");
  assert_eq!(
    hex::encode(out),
    "0000000000000000000000008eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
  );
}

#[test]
fn test_identity() {
  let fees = fee_schedule();
  match execute_precompile(&fees, 4, &[1, 2, 3], 100) {
    PrecompileResult::Success { gas_used, output } => {
      assert_eq!(gas_used, 18);
      assert_eq!(output, vec![1, 2, 3]);
    }
    other => panic!("unexpected result {:?}", other),
  }
}

#[test]
fn test_identity_insufficient_gas() {
  let fees = fee_schedule();
  assert_eq!(execute_precompile(&fees, 4, &[1, 2, 3], 17), PrecompileResult::OutOfGas);
}

#[test]
fn test_modexp_small() {
  // 3^5 mod 7 == 5
  let mut input = vec![0u8; 96];
  input[31] = 1;
  input[63] = 1;
  input[95] = 1;
  input.extend([3, 5, 7]);
  assert_eq!(precompile_modexp(&input), Some(vec![5]));
}

#[test]
fn test_modexp_zero_modulus() {
  let mut input = vec![0u8; 96];
  input[31] = 1;
  input[63] = 1;
  input[95] = 2;
  input.extend([3, 5, 0, 0]);
  assert_eq!(precompile_modexp(&input), Some(vec![0, 0]));
}

#[test]
fn test_modexp_floor_price() {
  let fees = fee_schedule();
  let mut input = vec![0u8; 96];
  input[31] = 1;
  input[63] = 1;
  input[95] = 1;
  input.extend([3, 5, 7]);
  assert_eq!(cost_of_precompile(&fees, 5, &input), 200);
}

#[test]
fn test_ecadd_identity() {
  let out = precompile_ecadd(&[0u8; 128]).expect("zero points are valid");
  assert_eq!(out, vec![0u8; 64]);
}

#[test]
fn test_ecadd_rejects_bad_point() {
  let mut input = [0u8; 128];
  input[31] = 1; // (1, 0) is not on the curve
  assert_eq!(precompile_ecadd(&input), None);
}

#[test]
fn test_ecpairing_empty_input_is_one() {
  let out = precompile_ecpairing(&[]).expect("empty pairing is valid");
  let mut expected = vec![0u8; 32];
  expected[31] = 1;
  assert_eq!(out, expected);
}

#[test]
fn test_ecpairing_rejects_truncated_input() {
  assert_eq!(precompile_ecpairing(&[0u8; 100]), None);
}

#[test]
fn test_blake2f_input_validation() {
  assert_eq!(precompile_blake2f(&[0u8; 212]), None);
  let mut bad_final = [0u8; 213];
  bad_final[212] = 2;
  assert_eq!(precompile_blake2f(&bad_final), None);
}

#[test]
fn test_blake2f_round_pricing() {
  let fees = fee_schedule();
  let mut input = [0u8; 213];
  input[3] = 12; // 12 rounds
  assert_eq!(cost_of_precompile(&fees, 9, &input), 12);
  assert_eq!(execute_precompile(&fees, 9, &input, 11), PrecompileResult::OutOfGas);
}

#[test]
fn test_blake2f_zero_rounds() {
  // With no mixing rounds the output is h ^ v, which for an all-zero state
  // folds the t/f tweaks out and leaves the IV itself.
  let input = [0u8; 213];
  let out = precompile_blake2f(&input).expect("well-formed input");
  assert_eq!(out.len(), 64);
  assert_eq!(&out[0..8], &0x6a09e667f3bcc908u64.to_le_bytes());
}
