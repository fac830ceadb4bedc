use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candidates::{self, Candidates, ProductIter, RangeIter};
use crate::error::{FleetError, Result};
use crate::hashing::HashAlgorithm;
use crate::models::AttackResult;
use crate::range_codec::{self, RangeCodec};

/// Attempts between two progress callbacks.
pub const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
  Dictionary,
  #[serde(alias = "range")]
  BruteForce,
  Mask,
  Hybrid,
  RuleBased,
  Markov,
  #[serde(alias = "prince")]
  Combinator,
}

impl AttackMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      AttackMode::Dictionary => "dictionary",
      AttackMode::BruteForce => "brute_force",
      AttackMode::Mask => "mask",
      AttackMode::Hybrid => "hybrid",
      AttackMode::RuleBased => "rule_based",
      AttackMode::Markov => "markov",
      AttackMode::Combinator => "combinator",
    }
  }
}

impl fmt::Display for AttackMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AttackMode {
  type Err = FleetError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "dictionary" => Ok(AttackMode::Dictionary),
      "brute_force" | "range" => Ok(AttackMode::BruteForce),
      "mask" => Ok(AttackMode::Mask),
      "hybrid" => Ok(AttackMode::Hybrid),
      "rule_based" => Ok(AttackMode::RuleBased),
      "markov" => Ok(AttackMode::Markov),
      "combinator" | "prince" => Ok(AttackMode::Combinator),
      other => Err(FleetError::UnsupportedConfiguration(format!(
        "unsupported attack mode {}",
        other
      ))),
    }
  }
}

/// Mode and mode-specific parameters. Fields a mode does not use are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
  pub mode: AttackMode,
  pub wordlist: Option<PathBuf>,
  pub max_words: usize,
  pub charset: String,
  pub min_length: usize,
  pub max_length: usize,
  pub start_password: Option<String>,
  pub end_password: Option<String>,
  pub mask: String,
  pub custom_charsets: HashMap<String, String>,
  pub append_chars: String,
  pub prepend_chars: String,
  pub max_append: usize,
  pub max_prepend: usize,
  pub markov_samples: usize,
  pub markov_seed: u64,
  pub combinator_words: usize,
  pub max_combinations: usize,
}

impl Default for AttackConfig {
  fn default() -> Self {
    Self {
      mode: AttackMode::BruteForce,
      wordlist: None,
      max_words: 100_000,
      charset: "digits".to_string(),
      min_length: 4,
      max_length: 8,
      start_password: None,
      end_password: None,
      mask: "?d?d?d?d".to_string(),
      custom_charsets: HashMap::new(),
      append_chars: candidates::DIGITS.to_string(),
      prepend_chars: String::new(),
      max_append: 3,
      max_prepend: 0,
      markov_samples: 10_000,
      markov_seed: 42,
      combinator_words: 1000,
      max_combinations: 10_000,
    }
  }
}

/// A candidate stream together with its size, when the size is known.
pub struct CandidatePlan {
  pub candidates: Candidates,
  pub total: BigUint,
}

impl AttackConfig {
  pub fn with_mode(mode: AttackMode) -> Self {
    Self {
      mode,
      ..Self::default()
    }
  }

  /// Resolved brute-force charset.
  pub fn resolved_charset(&self) -> Result<String> {
    candidates::resolve_charset(&self.charset)
  }

  /// Start and end of an explicit range, if both are set.
  pub fn explicit_range(&self) -> Option<(&str, &str)> {
    match (self.start_password.as_deref(), self.end_password.as_deref()) {
      (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => Some((start, end)),
      _ => None,
    }
  }

  /// Checks everything that can be checked without reading a wordlist.
  pub fn validate(&self) -> Result<()> {
    match self.mode {
      AttackMode::BruteForce => {
        let charset = self.resolved_charset()?;
        if let Some((start, end)) = self.explicit_range() {
          let start_len = start.chars().count();
          let end_len = end.chars().count();
          if start_len != end_len {
            return Err(FleetError::RangeMismatch { start_len, end_len });
          }
          let codec = RangeCodec::new(&charset, start_len)?;
          if codec.encode(start)? > codec.encode(end)? {
            return Err(FleetError::InvalidArgument(format!(
              "range start {:?} sorts after range end {:?}",
              start, end
            )));
          }
        } else if self.min_length == 0 || self.min_length > self.max_length {
          return Err(FleetError::InvalidArgument(format!(
            "invalid length bounds {}..={}",
            self.min_length, self.max_length
          )));
        }
      }
      AttackMode::Mask => {
        candidates::parse_mask(&self.mask, &self.custom_charsets)?;
      }
      AttackMode::Hybrid => {
        if self.max_append > 0 {
          candidates::resolve_charset(&self.append_chars)?;
        }
        if self.max_prepend > 0 {
          candidates::resolve_charset(&self.prepend_chars)?;
        }
      }
      _ => {}
    }
    Ok(())
  }

  /// Search-space size without materializing candidates; `None` for modes
  /// whose size depends on the wordlist.
  pub fn space_size(&self) -> Result<Option<BigUint>> {
    self.validate()?;
    Ok(match self.mode {
      AttackMode::BruteForce => {
        let charset = self.resolved_charset()?;
        Some(match self.explicit_range() {
          Some((start, end)) => {
            let codec = RangeCodec::new(&charset, start.chars().count())?;
            codec.encode(end)? - codec.encode(start)? + BigUint::one()
          }
          None => range_codec::total_combinations_between(&charset, self.min_length, self.max_length)?,
        })
      }
      AttackMode::Mask => Some(candidates::product_size(&candidates::parse_mask(
        &self.mask,
        &self.custom_charsets,
      )?)),
      AttackMode::Markov => Some(BigUint::from(self.markov_samples)),
      _ => None,
    })
  }

  /// Build the candidate stream for this configuration.
  pub fn plan(&self) -> Result<CandidatePlan> {
    self.validate()?;
    let words = || candidates::load_wordlist(self.wordlist.as_deref(), self.max_words);

    let plan = match self.mode {
      AttackMode::Dictionary => {
        let words = words();
        CandidatePlan {
          total: BigUint::from(words.len()),
          candidates: Box::new(words.into_iter()),
        }
      }
      AttackMode::BruteForce => {
        let charset = self.resolved_charset()?;
        let total = self.space_size()?.unwrap_or_default();
        let candidates: Candidates = match self.explicit_range() {
          Some((start, end)) => Box::new(RangeIter::new(&charset, start, end)?),
          None => candidates::brute_force(&charset, self.min_length, self.max_length),
        };
        CandidatePlan { candidates, total }
      }
      AttackMode::Mask => {
        let positions = candidates::parse_mask(&self.mask, &self.custom_charsets)?;
        CandidatePlan {
          total: candidates::product_size(&positions),
          candidates: Box::new(ProductIter::new(positions)),
        }
      }
      AttackMode::Hybrid => {
        let words = words();
        let fanout = candidates::hybrid_fanout(
          self.append_chars.chars().count(),
          self.max_append,
          self.prepend_chars.chars().count(),
          self.max_prepend,
        )?;
        CandidatePlan {
          total: fanout * BigUint::from(words.len()),
          candidates: candidates::hybrid(
            words,
            &self.append_chars,
            self.max_append,
            &self.prepend_chars,
            self.max_prepend,
          ),
        }
      }
      AttackMode::RuleBased => {
        let words = words();
        CandidatePlan {
          total: BigUint::from(words.len() * candidates::RULE_COUNT),
          candidates: candidates::rule_based(words),
        }
      }
      AttackMode::Markov => CandidatePlan {
        total: BigUint::from(self.markov_samples),
        candidates: candidates::markov(self.markov_samples, self.max_length, self.markov_seed)?,
      },
      AttackMode::Combinator => {
        let words = words();
        let usable = words
          .iter()
          .filter(|w| w.chars().count() <= 8)
          .take(self.combinator_words)
          .count();
        let pairs = usable * usable.saturating_sub(1);
        CandidatePlan {
          total: BigUint::from(pairs.min(self.max_combinations)),
          candidates: candidates::combinator(words, self.combinator_words, self.max_combinations),
        }
      }
    };
    Ok(plan)
  }
}

/// One unit of work for the engine.
#[derive(Debug, Clone)]
pub struct AttackRequest {
  pub targets: Vec<String>,
  pub hash_type: HashAlgorithm,
  pub config: AttackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackProgress {
  pub percent: f64,
  pub attempts: u64,
  pub current: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttackEvent {
  Progress(AttackProgress),
  Found { hash: String, password: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackReport {
  pub attack_mode: AttackMode,
  pub attempts: u64,
  pub found: HashMap<String, String>,
  pub cancelled: bool,
  pub last_candidate: Option<String>,
}

impl AttackReport {
  pub fn success(&self) -> bool {
    !self.found.is_empty()
  }

  /// One result per target, in target order.
  pub fn results(&self, targets: &[String]) -> Vec<AttackResult> {
    targets
      .iter()
      .map(|hash| {
        let password = self.found.get(hash).cloned();
        AttackResult {
          hash: hash.clone(),
          success: password.is_some(),
          password,
          attempts: self.attempts,
          attack_mode: self.attack_mode,
        }
      })
      .collect()
  }
}

/// Run one attack to completion, cancellation, or until every target is found.
///
/// `on_event` sees every found password and, every [`PROGRESS_INTERVAL`]
/// attempts, a progress sample. Returning `false` from it stops the run.
pub fn run_attack(request: &AttackRequest, on_event: &mut dyn FnMut(AttackEvent) -> bool) -> Result<AttackReport> {
  if request.targets.is_empty() {
    return Err(FleetError::InvalidArgument("no target hashes".into()));
  }
  let algorithm = request.hash_type;
  let mut remaining = request
    .targets
    .iter()
    .map(|hash| algorithm.normalize_target(hash))
    .collect::<Result<HashSet<String>>>()?;

  let CandidatePlan { candidates, total } = request.config.plan()?;
  let total = range_codec::to_f64(&total);
  let mode = request.config.mode;
  info!(%mode, %algorithm, targets = remaining.len(), total, "Starting attack");

  let mut attempts: u64 = 0;
  let mut found = HashMap::new();
  let mut cancelled = false;
  let mut last_candidate: Option<String> = None;

  for candidate in candidates {
    attempts += 1;
    let digest = algorithm.digest_hex(&candidate);
    if remaining.remove(&digest) {
      debug!(%mode, attempts, "Target hash matched");
      found.insert(digest.clone(), candidate.clone());
      if !on_event(AttackEvent::Found {
        hash: digest,
        password: candidate.clone(),
      }) {
        cancelled = true;
      }
      if remaining.is_empty() {
        last_candidate = Some(candidate);
        break;
      }
    }

    if !cancelled && attempts % PROGRESS_INTERVAL == 0 {
      let percent = if total > 0.0 {
        (attempts as f64 / total * 100.0).min(100.0)
      } else {
        100.0
      };
      cancelled = !on_event(AttackEvent::Progress(AttackProgress {
        percent,
        attempts,
        current: candidate.clone(),
      }));
    }

    last_candidate = Some(candidate);
    if cancelled {
      break;
    }
  }

  info!(%mode, attempts, found = found.len(), cancelled, "Attack finished");
  Ok(AttackReport {
    attack_mode: mode,
    attempts,
    found,
    cancelled,
    last_candidate,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn md5(s: &str) -> String {
    HashAlgorithm::Md5.digest_hex(s)
  }

  fn request(targets: Vec<String>, config: AttackConfig) -> AttackRequest {
    AttackRequest {
      targets,
      hash_type: HashAlgorithm::Md5,
      config,
    }
  }

  fn run(req: &AttackRequest) -> AttackReport {
    run_attack(req, &mut |_| true).unwrap()
  }

  #[test]
  fn brute_force_finds_a_pin() {
    let mut config = AttackConfig::default();
    config.max_length = 4;
    let report = run(&request(vec![md5("0042")], config));
    assert!(report.success());
    assert_eq!(report.found[&md5("0042")], "0042");
    assert_eq!(report.attempts, 43);
  }

  #[test]
  fn explicit_range_only_walks_the_range() {
    let mut config = AttackConfig::default();
    config.start_password = Some("5000".into());
    config.end_password = Some("5999".into());
    let miss = run(&request(vec![md5("4999")], config.clone()));
    assert!(!miss.success());
    assert_eq!(miss.attempts, 1000);
    assert_eq!(miss.last_candidate.as_deref(), Some("5999"));

    let hit = run(&request(vec![md5("5010")], config));
    assert_eq!(hit.attempts, 11);
  }

  #[test]
  fn dictionary_reads_a_wordlist() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "alpha\nbravo\ncharlie").unwrap();
    let mut config = AttackConfig::with_mode(AttackMode::Dictionary);
    config.wordlist = Some(file.path().to_path_buf());
    let report = run(&request(vec![md5("bravo")], config));
    assert_eq!(report.found[&md5("bravo")], "bravo");
    assert_eq!(report.attempts, 2);
  }

  #[test]
  fn dictionary_respects_max_words() {
    let mut config = AttackConfig::with_mode(AttackMode::Dictionary);
    config.max_words = 3;
    let report = run(&request(vec![md5("user")], config));
    assert!(!report.success());
    assert_eq!(report.attempts, 3);
  }

  #[test]
  fn mask_runs_every_candidate_when_nothing_matches() {
    let mut config = AttackConfig::with_mode(AttackMode::Mask);
    config.mask = "?l?l?d?d".into();
    assert_eq!(config.space_size().unwrap(), Some(BigUint::from(67_600u32)));
    let report = run(&request(vec![md5("not-in-space")], config));
    assert_eq!(report.attempts, 67_600);
    assert!(!report.cancelled);
  }

  #[test]
  fn hybrid_and_rules_find_variants() {
    let mut hybrid = AttackConfig::with_mode(AttackMode::Hybrid);
    hybrid.max_append = 2;
    let report = run(&request(vec![md5("admin42")], hybrid));
    assert_eq!(report.found[&md5("admin42")], "admin42");

    let rules = AttackConfig::with_mode(AttackMode::RuleBased);
    let report = run(&request(vec![md5("r00t")], rules));
    assert_eq!(report.found[&md5("r00t")], "r00t");
  }

  #[test]
  fn combinator_joins_word_pairs() {
    let config = AttackConfig::with_mode(AttackMode::Combinator);
    let report = run(&request(vec![md5("adminroot")], config));
    assert_eq!(report.found[&md5("adminroot")], "adminroot");
  }

  #[test]
  fn markov_is_bounded_by_samples() {
    let mut config = AttackConfig::with_mode(AttackMode::Markov);
    config.markov_samples = 2500;
    let report = run(&request(vec![md5("0000")], config));
    assert_eq!(report.attempts, 2500);
  }

  #[test]
  fn stops_once_every_target_is_found() {
    let mut config = AttackConfig::default();
    config.max_length = 4;
    let report = run(&request(vec![md5("0003"), md5("0007")], config));
    assert_eq!(report.found.len(), 2);
    assert_eq!(report.attempts, 8);
    let results = report.results(&[md5("0003"), md5("0007")]);
    assert!(results.iter().all(|r| r.success));
  }

  #[test]
  fn cancellation_stops_at_the_next_checkpoint() {
    let mut config = AttackConfig::default();
    config.max_length = 6;
    let mut samples = Vec::new();
    let report = run_attack(&request(vec![md5("zzz")], config), &mut |event| {
      if let AttackEvent::Progress(p) = event {
        samples.push(p);
      }
      samples.len() < 2
    })
    .unwrap();
    assert!(report.cancelled);
    assert!(!report.success());
    assert_eq!(report.attempts, 2000);
    assert_eq!(samples[0].attempts, 1000);
    assert_eq!(samples[0].current, "0999");
    assert_eq!(report.last_candidate.as_deref(), Some("1999"));
  }

  #[test]
  fn bad_configuration_fails_before_work() {
    assert!(matches!(
      "rainbow".parse::<AttackMode>(),
      Err(FleetError::UnsupportedConfiguration(_))
    ));
    let mut config = AttackConfig::with_mode(AttackMode::Mask);
    config.mask = "?q?d".into();
    let mut calls = 0;
    let err = run_attack(&request(vec![md5("x")], config), &mut |_| {
      calls += 1;
      true
    })
    .unwrap_err();
    assert!(matches!(err, FleetError::UnsupportedConfiguration(_)));
    assert_eq!(calls, 0);

    let mut range = AttackConfig::default();
    range.start_password = Some("000".into());
    range.end_password = Some("0000".into());
    assert!(matches!(
      range.validate(),
      Err(FleetError::RangeMismatch { start_len: 3, end_len: 4 })
    ));
  }
}
