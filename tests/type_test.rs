use sevm::modules::types::{pad_left_prime_vec, word256_bytes, W256};

#[test]
fn test_w256_format() {
  let x = W256(12, 3);
  assert_eq!("30000000000000000000000000000000c", x.to_hex());
  assert_eq!("1020847100762815390390123822295304634380", x.to_decimal());
  assert_eq!("80", W256(0x80, 0).to_hex());
  assert_eq!("0", W256::zero().to_decimal());
}

#[test]
fn test_w256_from_hex() {
  assert_eq!(W256::from_hex("0x80"), Some(W256(0x80, 0)));
  assert_eq!(W256::from_hex("30000000000000000000000000000000c"), Some(W256(12, 3)));
  assert_eq!(W256::from_hex(""), None);
  assert_eq!(W256::from_hex("zz"), None);
}

#[test]
fn test_pad_left_prime() {
  let input = vec![1, 2, 3];
  let expected = [vec![0; 29], vec![1, 2, 3]].concat();
  assert_eq!(pad_left_prime_vec(32, input), expected);

  let input = vec![1; 32];
  assert_eq!(pad_left_prime_vec(32, input.clone()), input);
}

#[test]
fn test_w256_from_bytes() {
  let input = vec![1, 2, 3];
  let expected_lo =
    u128::from_be_bytes([0; 13].iter().chain(&[1, 2, 3]).cloned().collect::<Vec<u8>>()[..16].try_into().unwrap());
  assert_eq!(W256::from_bytes(input), W256(expected_lo, 0));

  let input = vec![1; 32];
  let half = u128::from_be_bytes([1; 16]);
  assert_eq!(W256::from_bytes(input), W256(half, half));
}

#[test]
fn test_word256_bytes() {
  let w = W256(0x80, 0);
  let mut v: Vec<u8> = vec![0; 32];
  v[31] = 0x80;
  assert_eq!(word256_bytes(w), v);
}

#[test]
fn test_add_carries_between_halves() {
  assert_eq!(W256(u128::MAX, 0) + W256(1, 0), W256(0, 1));
  assert_eq!(W256::max() + W256(1, 0), W256::zero());
}

#[test]
fn test_sub_wraps() {
  assert_eq!(W256::zero() - W256(1, 0), W256::max());
  assert_eq!(W256(5, 7) - W256(2, 3), W256(3, 4));
}

#[test]
fn test_mul_carries_between_halves() {
  let two_64 = W256(1u128 << 64, 0);
  assert_eq!(two_64 * two_64, W256(0, 1));
  assert_eq!(W256(3, 0) * W256(4, 0), W256(12, 0));
  // (2^255) * 2 wraps to zero
  assert_eq!(W256(0, 1u128 << 127) * W256(2, 0), W256::zero());
}

#[test]
fn test_div_rem() {
  let (q, r) = W256(100, 0).div_rem(W256(7, 0));
  assert_eq!(q, W256(14, 0));
  assert_eq!(r, W256(2, 0));
  assert_eq!(W256(100, 0).div_rem(W256::zero()), (W256::zero(), W256::zero()));
  // A dividend spanning both halves
  let (q, r) = W256(0, 1).div_rem(W256(3, 0));
  assert_eq!(q * W256(3, 0) + r, W256(0, 1));
  assert!(r < W256(3, 0));
}

#[test]
fn test_exp() {
  assert_eq!(W256(2, 0).exp(W256(10, 0)), W256(1024, 0));
  assert_eq!(W256(3, 0).exp(W256(4, 0)), W256(81, 0));
  assert_eq!(W256(7, 0).exp(W256::zero()), W256::one());
  assert_eq!(W256(2, 0).exp(W256(128, 0)), W256(0, 1));
}

#[test]
fn test_signed_division() {
  let neg = |x: u128| W256(x, 0).wrapping_neg();
  assert_eq!(neg(4).sdiv(W256(2, 0)), neg(2));
  assert_eq!(W256(4, 0).sdiv(neg(2)), neg(2));
  assert_eq!(neg(4).sdiv(neg(2)), W256(2, 0));
  assert_eq!(neg(5).smod(W256(3, 0)), neg(2));
  assert_eq!(W256(5, 0).smod(neg(3)), W256(2, 0));
  // MIN / -1 stays MIN
  let min = W256(0, 1u128 << 127);
  assert_eq!(min.sdiv(W256::max()), min);
}

#[test]
fn test_addmod_mulmod_wide() {
  // 2^256 is congruent to 2 mod 7, so max is congruent to 1
  assert_eq!(W256::max().addmod(W256::max(), W256(7, 0)), W256(2, 0));
  assert_eq!(W256::max().mulmod(W256::max(), W256(7, 0)), W256(1, 0));
  assert_eq!(W256(10, 0).addmod(W256(10, 0), W256(8, 0)), W256(4, 0));
  assert_eq!(W256(10, 0).mulmod(W256(10, 0), W256(8, 0)), W256(4, 0));
  assert_eq!(W256(10, 0).addmod(W256(10, 0), W256::zero()), W256::zero());
}

#[test]
fn test_signextend() {
  assert_eq!(W256::sex(W256::zero(), W256(0xff, 0)), W256::max());
  assert_eq!(W256::sex(W256::zero(), W256(0x7f, 0)), W256(0x7f, 0));
  assert_eq!(W256::sex(W256(1, 0), W256(0x8000, 0)), W256(0x8000, 0) | (W256::max() << 16));
  assert_eq!(W256::sex(W256(31, 0), W256(0xff, 0)), W256(0xff, 0));
}

#[test]
fn test_sar() {
  let neg_eight = W256(8, 0).wrapping_neg();
  assert_eq!(neg_eight.sar(W256(1, 0)), W256(4, 0).wrapping_neg());
  assert_eq!(W256(8, 0).sar(W256(1, 0)), W256(4, 0));
  assert_eq!(neg_eight.sar(W256(300, 0)), W256::max());
  assert_eq!(W256(8, 0).sar(W256(300, 0)), W256::zero());
}

#[test]
fn test_shifts() {
  assert_eq!(W256(1, 0) << 128, W256(0, 1));
  assert_eq!(W256(0, 1) >> 128, W256(1, 0));
  assert_eq!(W256(1, 0) << 255, W256(0, 1u128 << 127));
  assert_eq!(W256::max() >> 255, W256(1, 0));
}

#[test]
fn test_ordering() {
  assert!(W256(0, 1) > W256(u128::MAX, 0));
  assert!(W256(1, 0) < W256(2, 0));
  assert!(W256(5, 5) == W256(5, 5));
}

#[test]
fn test_bit_lengths() {
  assert_eq!(W256::zero().bit_length(), 0);
  assert_eq!(W256(0xff, 0).bit_length(), 8);
  assert_eq!(W256(0x100, 0).byte_length(), 2);
  assert_eq!(W256(0, 1).bit_length(), 129);
  assert_eq!(W256::max().byte_length(), 32);
}
