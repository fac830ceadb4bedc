//! Mixed-radix mapping between fixed-length candidate strings and integers.
//!
//! A string `s` of length `L` over a charset of `B` symbols maps to
//! `sum(index(s[i]) * B^(L-1-i))`, which makes the candidates of one length a
//! dense interval `[0, B^L)` that can be split arithmetically.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use crate::error::{FleetError, Result};

#[derive(Debug, Clone)]
pub struct RangeCodec {
  symbols: Vec<char>,
  positions: HashMap<char, usize>,
  length: usize,
  exponent: u32,
}

impl RangeCodec {
  /// Build a codec for strings of exactly `length` symbols drawn from `charset`.
  ///
  /// The charset must be non-empty and must not repeat a symbol.
  pub fn new(charset: &str, length: usize) -> Result<Self> {
    let symbols: Vec<char> = charset.chars().collect();
    if symbols.is_empty() {
      return Err(FleetError::InvalidArgument("charset must not be empty".into()));
    }

    let mut positions = HashMap::with_capacity(symbols.len());
    for (idx, symbol) in symbols.iter().enumerate() {
      if positions.insert(*symbol, idx).is_some() {
        return Err(FleetError::InvalidArgument(format!(
          "charset repeats symbol {:?}",
          symbol
        )));
      }
    }

    let exponent = u32::try_from(length)
      .map_err(|_| FleetError::InvalidArgument(format!("candidate length {} is too large", length)))?;

    Ok(Self {
      symbols,
      positions,
      length,
      exponent,
    })
  }

  pub fn base(&self) -> usize {
    self.symbols.len()
  }

  pub fn length(&self) -> usize {
    self.length
  }

  pub fn symbols(&self) -> &[char] {
    &self.symbols
  }

  pub fn position(&self, symbol: char) -> Option<usize> {
    self.positions.get(&symbol).copied()
  }

  /// `B^L`, the number of distinct strings this codec covers.
  pub fn total_combinations(&self) -> BigUint {
    BigUint::from(self.base()).pow(self.exponent)
  }

  pub fn encode(&self, candidate: &str) -> Result<BigUint> {
    let actual = candidate.chars().count();
    if actual != self.length {
      return Err(FleetError::LengthMismatch {
        expected: self.length,
        actual,
      });
    }

    let base = BigUint::from(self.base());
    let mut value = BigUint::zero();
    for symbol in candidate.chars() {
      let digit = self.position(symbol).ok_or(FleetError::InvalidSymbol(symbol))?;
      value = value * &base + BigUint::from(digit);
    }
    Ok(value)
  }

  pub fn decode(&self, value: &BigUint) -> Result<String> {
    if value >= &self.total_combinations() {
      return Err(FleetError::OutOfRange(value.to_string()));
    }

    let base = BigUint::from(self.base());
    let mut remaining = value.clone();
    let mut reversed = Vec::with_capacity(self.length);
    for _ in 0..self.length {
      let digit = (&remaining % &base)
        .to_usize()
        .ok_or_else(|| FleetError::OutOfRange(value.to_string()))?;
      reversed.push(self.symbols[digit]);
      remaining /= &base;
    }

    Ok(reversed.into_iter().rev().collect())
  }

  /// Lexicographic successor over the charset order, or `None` once every
  /// position has wrapped.
  pub fn successor(&self, candidate: &str) -> Result<Option<String>> {
    let mut digits = self.digits_of(candidate)?;
    if increment_digits(&mut digits, self.base()) {
      Ok(Some(digits.iter().map(|d| self.symbols[*d]).collect()))
    } else {
      Ok(None)
    }
  }

  pub(crate) fn digits_of(&self, candidate: &str) -> Result<Vec<usize>> {
    let digits = candidate
      .chars()
      .map(|symbol| self.position(symbol).ok_or(FleetError::InvalidSymbol(symbol)))
      .collect::<Result<Vec<usize>>>()?;
    if digits.len() != self.length {
      return Err(FleetError::LengthMismatch {
        expected: self.length,
        actual: digits.len(),
      });
    }
    Ok(digits)
  }
}

/// Increment the rightmost digit with carry. Returns false on overflow, in
/// which case every digit has wrapped back to zero.
pub(crate) fn increment_digits(digits: &mut [usize], base: usize) -> bool {
  for digit in digits.iter_mut().rev() {
    if *digit + 1 < base {
      *digit += 1;
      return true;
    }
    *digit = 0;
  }
  false
}

/// Number of strings of `length` symbols over `charset`.
pub fn total_combinations(charset: &str, length: usize) -> Result<BigUint> {
  Ok(RangeCodec::new(charset, length)?.total_combinations())
}

/// Sum of `B^l` for every length in `min_length..=max_length`.
pub fn total_combinations_between(charset: &str, min_length: usize, max_length: usize) -> Result<BigUint> {
  let mut total = BigUint::zero();
  for length in min_length..=max_length {
    total += total_combinations(charset, length)?;
  }
  Ok(total)
}

pub fn encode(candidate: &str, charset: &str) -> Result<BigUint> {
  RangeCodec::new(charset, candidate.chars().count())?.encode(candidate)
}

pub fn decode(value: &BigUint, length: usize, charset: &str) -> Result<String> {
  RangeCodec::new(charset, length)?.decode(value)
}

pub(crate) fn to_f64(value: &BigUint) -> f64 {
  value.to_f64().unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
  use super::*;
  use num_traits::One;

  const DIGITS: &str = "0123456789";

  #[test]
  fn encodes_and_decodes_digit_strings() {
    assert_eq!(encode("0005", DIGITS).unwrap(), BigUint::from(5u32));
    assert_eq!(decode(&BigUint::from(5u32), 4, DIGITS).unwrap(), "0005");
    assert_eq!(encode("9999", DIGITS).unwrap(), BigUint::from(9999u32));
  }

  #[test]
  fn every_index_round_trips_for_small_spaces() {
    for (charset, length) in [("ab", 5), ("xyz", 4), ("0123456789abcdef", 2), ("q", 3)] {
      let codec = RangeCodec::new(charset, length).unwrap();
      let total = codec.total_combinations().to_u64().unwrap();
      let mut previous: Option<String> = None;
      for i in 0..total {
        let value = BigUint::from(i);
        let candidate = codec.decode(&value).unwrap();
        assert_eq!(candidate.chars().count(), length);
        assert_eq!(codec.encode(&candidate).unwrap(), value);
        if let Some(prev) = previous {
          assert_eq!(codec.successor(&prev).unwrap(), Some(candidate.clone()));
        }
        previous = Some(candidate);
      }
      assert_eq!(codec.successor(&previous.unwrap()).unwrap(), None);
    }
  }

  #[test]
  fn rejects_symbols_outside_charset() {
    let err = encode("12a4", DIGITS).unwrap_err();
    assert_eq!(err, FleetError::InvalidSymbol('a'));
  }

  #[test]
  fn rejects_wrong_length() {
    let codec = RangeCodec::new(DIGITS, 4).unwrap();
    assert_eq!(
      codec.encode("123").unwrap_err(),
      FleetError::LengthMismatch { expected: 4, actual: 3 }
    );
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn lengths_past_u32_are_rejected() {
    assert!(matches!(
      RangeCodec::new(DIGITS, u32::MAX as usize + 1),
      Err(FleetError::InvalidArgument(_))
    ));
  }

  #[test]
  fn rejects_values_past_the_end() {
    let codec = RangeCodec::new(DIGITS, 4).unwrap();
    assert!(matches!(
      codec.decode(&BigUint::from(10_000u32)),
      Err(FleetError::OutOfRange(_))
    ));
  }

  #[test]
  fn huge_spaces_do_not_overflow() {
    let charset: String = ('!'..='~').collect();
    let codec = RangeCodec::new(&charset, 20).unwrap();
    let last = codec.total_combinations() - BigUint::one();
    let candidate = codec.decode(&last).unwrap();
    assert_eq!(candidate, "~".repeat(20));
    assert_eq!(codec.encode(&candidate).unwrap(), last);
  }

  #[test]
  fn duplicate_symbols_are_invalid() {
    assert!(matches!(RangeCodec::new("abca", 2), Err(FleetError::InvalidArgument(_))));
    assert!(matches!(RangeCodec::new("", 2), Err(FleetError::InvalidArgument(_))));
  }

  #[test]
  fn totals_sum_over_lengths() {
    assert_eq!(total_combinations(DIGITS, 4).unwrap(), BigUint::from(10_000u32));
    assert_eq!(
      total_combinations_between("ab", 1, 3).unwrap(),
      BigUint::from(2u32 + 4 + 8)
    );
  }
}
