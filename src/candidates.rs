//! Candidate generators for every attack mode.
//!
//! Each generator is a plain iterator of `String`s so the engine can drive
//! hashing, progress and cancellation the same way for all modes.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use num_bigint::BigUint;
use num_traits::One;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::error::{FleetError, Result};
use crate::range_codec::{RangeCodec, increment_digits};

pub const DIGITS: &str = "0123456789";
pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
pub const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";
pub const HEX: &str = "0123456789abcdef";
pub const BASE64: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const BUILTIN_WORDS: &[&str] = &[
  "password", "admin", "root", "user", "test", "guest", "qwerty", "password123", "admin123",
  "root123", "user123", "test123", "123456", "1234567890", "abcdef", "letmein", "welcome",
  "password1", "admin1", "root1", "user1", "test1", "pass", "administrator", "login", "secret",
  "default",
];

const ENGLISH_FREQUENCIES: [(char, f64); 26] = [
  ('a', 0.08167), ('b', 0.01492), ('c', 0.02782), ('d', 0.04253), ('e', 0.12702),
  ('f', 0.02228), ('g', 0.02015), ('h', 0.06094), ('i', 0.06966), ('j', 0.00153),
  ('k', 0.00772), ('l', 0.04025), ('m', 0.02406), ('n', 0.06749), ('o', 0.07507),
  ('p', 0.01929), ('q', 0.00095), ('r', 0.05987), ('s', 0.06327), ('t', 0.09056),
  ('u', 0.02758), ('v', 0.00978), ('w', 0.02360), ('x', 0.00150), ('y', 0.01974),
  ('z', 0.00074),
];

/// Boxed candidate stream, owned and sendable to a blocking task.
pub type Candidates = Box<dyn Iterator<Item = String> + Send>;

const MARKOV_MIN_LENGTH: usize = 4;
const COMBINATOR_MAX_WORD_LEN: usize = 8;

/// Resolve a named charset, or treat `name` as a literal charset.
pub fn resolve_charset(name: &str) -> Result<String> {
  let resolved = match name {
    "digits" => DIGITS.to_string(),
    "lowercase" => LOWERCASE.to_string(),
    "uppercase" => UPPERCASE.to_string(),
    "letters" => format!("{}{}", LOWERCASE, UPPERCASE),
    "alphanumeric" => format!("{}{}{}", LOWERCASE, UPPERCASE, DIGITS),
    "symbols" => SYMBOLS.to_string(),
    "hex" => HEX.to_string(),
    "base64" => BASE64.to_string(),
    "all" => format!("{}{}{}{}", LOWERCASE, UPPERCASE, DIGITS, SYMBOLS),
    literal => literal.to_string(),
  };

  if resolved.is_empty() {
    return Err(FleetError::InvalidArgument("charset must not be empty".into()));
  }
  let mut seen = HashSet::new();
  if let Some(dup) = resolved.chars().find(|c| !seen.insert(*c)) {
    return Err(FleetError::InvalidArgument(format!("charset repeats symbol {:?}", dup)));
  }
  Ok(resolved)
}

/// Expand a mask into the alternatives of each position.
///
/// `?d ?l ?u ?s` are the built-in classes, `?1`..`?9` look up
/// `custom_charsets`, `??` is a literal `?`, anything else is literal.
pub fn parse_mask(mask: &str, custom_charsets: &HashMap<String, String>) -> Result<Vec<Vec<char>>> {
  let mut positions = Vec::new();
  let mut chars = mask.chars();
  while let Some(c) = chars.next() {
    if c != '?' {
      positions.push(vec![c]);
      continue;
    }
    let token = chars.next().ok_or_else(|| {
      FleetError::UnsupportedConfiguration(format!("mask {:?} ends with a bare '?'", mask))
    })?;
    let set: Vec<char> = match token {
      'd' => DIGITS.chars().collect(),
      'l' => LOWERCASE.chars().collect(),
      'u' => UPPERCASE.chars().collect(),
      's' => SYMBOLS.chars().collect(),
      '?' => vec!['?'],
      '1'..='9' => {
        let custom = custom_charsets.get(&token.to_string()).ok_or_else(|| {
          FleetError::UnsupportedConfiguration(format!("mask uses undefined custom charset ?{}", token))
        })?;
        resolve_charset(custom)?.chars().collect()
      }
      other => {
        return Err(FleetError::UnsupportedConfiguration(format!(
          "unknown mask token ?{}",
          other
        )));
      }
    };
    positions.push(set);
  }

  if positions.is_empty() {
    return Err(FleetError::InvalidArgument("mask must not be empty".into()));
  }
  Ok(positions)
}

pub fn product_size(positions: &[Vec<char>]) -> BigUint {
  positions
    .iter()
    .fold(BigUint::one(), |acc, set| acc * BigUint::from(set.len()))
}

/// Cartesian product of per-position alternatives, leftmost position most
/// significant.
pub struct ProductIter {
  sets: Vec<Vec<char>>,
  digits: Vec<usize>,
  done: bool,
}

impl ProductIter {
  pub fn new(sets: Vec<Vec<char>>) -> Self {
    let done = sets.iter().any(Vec::is_empty);
    Self {
      digits: vec![0; sets.len()],
      sets,
      done,
    }
  }

  pub fn repeat(charset: &[char], length: usize) -> Self {
    Self::new(vec![charset.to_vec(); length])
  }
}

impl Iterator for ProductIter {
  type Item = String;

  fn next(&mut self) -> Option<String> {
    if self.done {
      return None;
    }
    let current: String = self
      .digits
      .iter()
      .zip(&self.sets)
      .map(|(d, set)| set[*d])
      .collect();

    // Carry from the right; every set can have its own radix.
    let mut carried_out = true;
    for (digit, set) in self.digits.iter_mut().zip(&self.sets).rev() {
      if *digit + 1 < set.len() {
        *digit += 1;
        carried_out = false;
        break;
      }
      *digit = 0;
    }
    self.done = carried_out;
    Some(current)
  }
}

/// Every string from `start` to `end` inclusive in successor order.
pub struct RangeIter {
  codec: RangeCodec,
  current: Vec<usize>,
  end: Vec<usize>,
  done: bool,
}

impl RangeIter {
  pub fn new(charset: &str, start: &str, end: &str) -> Result<Self> {
    let start_len = start.chars().count();
    let end_len = end.chars().count();
    if start_len != end_len {
      return Err(FleetError::RangeMismatch { start_len, end_len });
    }
    let codec = RangeCodec::new(charset, start_len)?;
    let current = codec.digits_of(start)?;
    let end = codec.digits_of(end)?;
    let done = current > end;
    Ok(Self {
      codec,
      current,
      end,
      done,
    })
  }
}

impl Iterator for RangeIter {
  type Item = String;

  fn next(&mut self) -> Option<String> {
    if self.done {
      return None;
    }
    let symbols = self.codec.symbols();
    let candidate: String = self.current.iter().map(|d| symbols[*d]).collect();
    if self.current == self.end || !increment_digits(&mut self.current, self.codec.base()) {
      self.done = true;
    }
    Some(candidate)
  }
}

/// Exhaustive brute force over every length in `min_length..=max_length`.
pub fn brute_force(charset: &str, min_length: usize, max_length: usize) -> Candidates {
  let symbols: Vec<char> = charset.chars().collect();
  Box::new((min_length..=max_length).flat_map(move |length| ProductIter::repeat(&symbols, length)))
}

/// Non-empty trimmed lines of `path`, capped at `max_words`. An unset or
/// unreadable path falls back to the built-in list.
pub fn load_wordlist(path: Option<&Path>, max_words: usize) -> Vec<String> {
  let file = match path {
    Some(path) => match File::open(path) {
      Ok(file) => Some(file),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Wordlist unavailable, using built-in list");
        None
      }
    },
    None => None,
  };

  match file {
    Some(file) => BufReader::new(file)
      .lines()
      .map_while(|line| line.ok())
      .map(|line| line.trim().to_string())
      .filter(|word| !word.is_empty())
      .take(max_words)
      .collect(),
    None => BUILTIN_WORDS
      .iter()
      .take(max_words)
      .map(|w| w.to_string())
      .collect(),
  }
}

/// Each word, then with every suffix of 1..=max_append symbols, then with
/// every prefix of 1..=max_prepend symbols.
pub fn hybrid(
  words: Vec<String>,
  append_chars: &str,
  max_append: usize,
  prepend_chars: &str,
  max_prepend: usize,
) -> Candidates {
  let append: Vec<char> = append_chars.chars().collect();
  let prepend: Vec<char> = prepend_chars.chars().collect();
  Box::new(words.into_iter().flat_map(move |word| {
    let suffixed = {
      let word = word.clone();
      let append = append.clone();
      (1..=max_append).flat_map(move |n| {
        let word = word.clone();
        ProductIter::repeat(&append, n).map(move |tail| format!("{}{}", word, tail))
      })
    };
    let prefixed = {
      let word = word.clone();
      let prepend = prepend.clone();
      (1..=max_prepend).flat_map(move |n| {
        let word = word.clone();
        ProductIter::repeat(&prepend, n).map(move |head| format!("{}{}", head, word))
      })
    };
    std::iter::once(word).chain(suffixed).chain(prefixed)
  }))
}

/// Number of candidates [`hybrid`] yields per word.
pub fn hybrid_fanout(append_len: usize, max_append: usize, prepend_len: usize, max_prepend: usize) -> Result<BigUint> {
  let powers = |base: usize, max: usize| -> Result<BigUint> {
    let max = u32::try_from(max)
      .map_err(|_| FleetError::InvalidArgument(format!("affix length {} is too large", max)))?;
    Ok((1..=max).map(|n| BigUint::from(base).pow(n)).sum())
  };
  Ok(BigUint::one() + powers(append_len, max_append)? + powers(prepend_len, max_prepend)?)
}

pub const RULE_COUNT: usize = 13;

fn capitalize(word: &str) -> String {
  let mut chars = word.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
    None => String::new(),
  }
}

fn apply_rule(rule: usize, word: &str) -> String {
  match rule {
    0 => word.to_string(),
    1 => capitalize(word),
    2 => word.to_uppercase(),
    3 => word.to_lowercase(),
    4 => format!("{}1", word),
    5 => format!("{}123", word),
    6 => format!("{}!", word),
    7 => word.chars().rev().collect(),
    8 => word.replace('a', "@"),
    9 => word.replace('e', "3"),
    10 => word.replace('i', "1"),
    11 => word.replace('o', "0"),
    _ => word.replace('s', "$"),
  }
}

/// The fixed rule list applied in order to every word.
pub fn rule_based(words: Vec<String>) -> Candidates {
  Box::new(
    words
      .into_iter()
      .flat_map(|word| (0..RULE_COUNT).map(move |rule| apply_rule(rule, &word))),
  )
}

/// Seeded samples weighted by English letter frequency. Lengths are uniform
/// in `4..=max_length`.
pub fn markov(samples: usize, max_length: usize, seed: u64) -> Result<Candidates> {
  let letters: Vec<char> = ENGLISH_FREQUENCIES.iter().map(|(c, _)| *c).collect();
  let weights = WeightedIndex::new(ENGLISH_FREQUENCIES.iter().map(|(_, w)| *w))
    .map_err(|e| FleetError::InvalidArgument(e.to_string()))?;
  let max_length = max_length.max(MARKOV_MIN_LENGTH);
  let mut rng = StdRng::seed_from_u64(seed);

  Ok(Box::new((0..samples).map(move |_| {
    let length = rng.gen_range(MARKOV_MIN_LENGTH..=max_length);
    (0..length).map(|_| letters[weights.sample(&mut rng)]).collect()
  })))
}

/// Ordered pairs of distinct words drawn from the first `max_words` short
/// words, capped at `max_combinations`.
pub fn combinator(words: Vec<String>, max_words: usize, max_combinations: usize) -> Candidates {
  let words: Vec<String> = words
    .into_iter()
    .filter(|w| w.chars().count() <= COMBINATOR_MAX_WORD_LEN)
    .take(max_words)
    .collect();
  let n = words.len();
  Box::new(
    (0..n)
      .flat_map(move |i| (0..n).map(move |j| (i, j)))
      .filter(|(i, j)| i != j)
      .map(move |(i, j)| format!("{}{}", words[i], words[j]))
      .take(max_combinations),
  )
}
