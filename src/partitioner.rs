//! Splits search spaces into disjoint work units.
//!
//! Index spaces are split arithmetically on top of [`RangeCodec`]; hash lists
//! are divided by one of the [`DistributionStrategy`] heuristics. Every split
//! is a complete, disjoint cover of its input.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::models::{ClusterNode, PartitionSpan, Priority};
use crate::range_codec::RangeCodec;

const SECONDS_PER_HASH: f64 = 60.0;
const COMPLEX_MIN_CORES: u32 = 4;
const SIMPLE_HASH_MAX_LEN: usize = 32;

/// Half-open interval `[start, end)` of candidate indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRange {
  pub start: BigUint,
  pub end: BigUint,
}

impl IndexRange {
  pub fn len(&self) -> BigUint {
    &self.end - &self.start
  }

  pub fn is_empty(&self) -> bool {
    self.start >= self.end
  }
}

/// Split `[0, total)` into `n` contiguous intervals whose sizes differ by at
/// most one; the first `total % n` intervals carry the extra element. When
/// `total < n` the trailing intervals are empty.
pub fn split_range(total: &BigUint, n: usize) -> Result<Vec<IndexRange>> {
  if n == 0 {
    return Err(FleetError::InvalidArgument("worker count must be positive".into()));
  }

  let workers = BigUint::from(n);
  let base = total / &workers;
  let remainder = (total % &workers).to_usize().unwrap_or(0);

  let mut ranges = Vec::with_capacity(n);
  let mut cursor = BigUint::zero();
  for i in 0..n {
    let size = if i < remainder { &base + BigUint::one() } else { base.clone() };
    let end = &cursor + size;
    ranges.push(IndexRange {
      start: cursor.clone(),
      end: end.clone(),
    });
    cursor = end;
  }
  Ok(ranges)
}

/// A non-empty slice of one fixed-length candidate space with both ends
/// decoded. Indices are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetRange {
  pub charset: String,
  pub length: usize,
  pub start_index: BigUint,
  pub end_index: BigUint,
  pub range_start: String,
  pub range_end: String,
}

impl CharsetRange {
  pub fn size(&self) -> BigUint {
    &self.end_index - &self.start_index + BigUint::one()
  }

  pub fn into_span(self) -> PartitionSpan {
    PartitionSpan::Range {
      start_index: self.start_index,
      end_index: self.end_index,
      charset: self.charset,
      length: self.length,
      range_start: self.range_start,
      range_end: self.range_end,
    }
  }
}

/// Split every string of `length` symbols over `charset` into at most `n`
/// ranges. Empty slices are dropped, so fewer than `n` come back when the
/// space is smaller than `n`.
pub fn split_charset_range(charset: &str, length: usize, n: usize) -> Result<Vec<CharsetRange>> {
  let codec = RangeCodec::new(charset, length)?;
  split_with_offset(&codec, &BigUint::zero(), &codec.total_combinations(), n)
}

/// Split the inclusive range `start..=end` into at most `n` ranges.
pub fn split_custom_range(start: &str, end: &str, charset: &str, n: usize) -> Result<Vec<CharsetRange>> {
  let start_len = start.chars().count();
  let end_len = end.chars().count();
  if start_len != end_len {
    return Err(FleetError::RangeMismatch { start_len, end_len });
  }

  let codec = RangeCodec::new(charset, start_len)?;
  let first = codec.encode(start)?;
  let last = codec.encode(end)?;
  if first > last {
    return Err(FleetError::InvalidArgument(format!(
      "range start {:?} sorts after range end {:?}",
      start, end
    )));
  }

  let total = &last - &first + BigUint::one();
  split_with_offset(&codec, &first, &total, n)
}

fn split_with_offset(codec: &RangeCodec, offset: &BigUint, total: &BigUint, n: usize) -> Result<Vec<CharsetRange>> {
  let charset: String = codec.symbols().iter().collect();
  let mut out = Vec::new();
  for range in split_range(total, n)? {
    if range.is_empty() {
      continue;
    }
    let start_index = offset + &range.start;
    let end_index = offset + &range.end - BigUint::one();
    out.push(CharsetRange {
      charset: charset.clone(),
      length: codec.length(),
      range_start: codec.decode(&start_index)?,
      range_end: codec.decode(&end_index)?,
      start_index,
      end_index,
    });
  }
  Ok(out)
}

// ---------------------------------------------------------------------------
// Hash-list strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
  #[default]
  EqualSplit,
  CapabilityBased,
  DynamicLoad,
  HashBased,
}

impl DistributionStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      DistributionStrategy::EqualSplit => "equal_split",
      DistributionStrategy::CapabilityBased => "capability_based",
      DistributionStrategy::DynamicLoad => "dynamic_load",
      DistributionStrategy::HashBased => "hash_based",
    }
  }
}

impl fmt::Display for DistributionStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DistributionStrategy {
  type Err = FleetError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "equal_split" => Ok(DistributionStrategy::EqualSplit),
      "capability_based" => Ok(DistributionStrategy::CapabilityBased),
      "dynamic_load" => Ok(DistributionStrategy::DynamicLoad),
      "hash_based" => Ok(DistributionStrategy::HashBased),
      other => Err(FleetError::UnsupportedConfiguration(format!(
        "unknown distribution strategy {}",
        other
      ))),
    }
  }
}

/// What a strategy knows about a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerProfile {
  pub worker_id: String,
  pub cpu_cores: u32,
  pub ram_gb: f64,
  pub cpu_usage: f64,
  pub ram_usage: f64,
}

impl WorkerProfile {
  pub fn new(worker_id: impl Into<String>, cpu_cores: u32, ram_gb: f64) -> Self {
    Self {
      worker_id: worker_id.into(),
      cpu_cores,
      ram_gb,
      cpu_usage: 0.0,
      ram_usage: 0.0,
    }
  }

  pub fn with_load(mut self, cpu_usage: f64, ram_usage: f64) -> Self {
    self.cpu_usage = cpu_usage;
    self.ram_usage = ram_usage;
    self
  }
}

impl From<&ClusterNode> for WorkerProfile {
  fn from(node: &ClusterNode) -> Self {
    let metrics = &node.load_metrics;
    Self {
      worker_id: node.node_id.clone(),
      cpu_cores: metrics.cpu_cores.max(1),
      ram_gb: if metrics.ram_total_mb == 0 {
        1.0
      } else {
        metrics.ram_total_mb as f64 / 1000.0
      },
      cpu_usage: metrics.cpu_usage,
      ram_usage: metrics.memory_usage,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashAssignment {
  pub worker_id: String,
  pub assigned_hashes: Vec<String>,
  pub priority: Priority,
  pub estimated_time: f64,
}

/// One assignment per worker (possibly empty), in the order the strategy
/// visited the workers.
pub fn distribute_hashes(
  hashes: &[String],
  workers: &[WorkerProfile],
  strategy: DistributionStrategy,
) -> Result<Vec<HashAssignment>> {
  if workers.is_empty() {
    return Err(FleetError::InvalidArgument("at least one worker is required".into()));
  }
  let mut seen = HashSet::new();
  for worker in workers {
    if !seen.insert(worker.worker_id.as_str()) {
      return Err(FleetError::InvalidArgument(format!(
        "duplicate worker id {}",
        worker.worker_id
      )));
    }
  }

  Ok(match strategy {
    DistributionStrategy::EqualSplit => equal_split(hashes, workers),
    DistributionStrategy::CapabilityBased => capability_based(hashes, workers),
    DistributionStrategy::DynamicLoad => dynamic_load(hashes, workers),
    DistributionStrategy::HashBased => hash_based(hashes, workers),
  })
}

/// Contiguous slice `i` of `n` near-equal slices.
fn equal_slice<T: Clone>(items: &[T], i: usize, n: usize) -> Vec<T> {
  let start = i * items.len() / n;
  let end = (i + 1) * items.len() / n;
  items[start..end].to_vec()
}

fn equal_split(hashes: &[String], workers: &[WorkerProfile]) -> Vec<HashAssignment> {
  workers
    .iter()
    .enumerate()
    .map(|(i, worker)| {
      let assigned = equal_slice(hashes, i, workers.len());
      HashAssignment {
        worker_id: worker.worker_id.clone(),
        estimated_time: assigned.len() as f64 * SECONDS_PER_HASH,
        assigned_hashes: assigned,
        priority: Priority::Normal,
      }
    })
    .collect()
}

fn capability_based(hashes: &[String], workers: &[WorkerProfile]) -> Vec<HashAssignment> {
  let weights: Vec<f64> = workers
    .iter()
    .map(|w| {
      let load_penalty = 1.0 - w.cpu_usage.clamp(0.0, 100.0) / 100.0;
      (w.cpu_cores as f64 * w.ram_gb * load_penalty).max(0.1)
    })
    .collect();
  let total_weight: f64 = weights.iter().sum();

  let mut allocated = 0;
  let mut out = Vec::with_capacity(workers.len());
  for (i, (worker, weight)) in workers.iter().zip(&weights).enumerate() {
    let count = if i == workers.len() - 1 {
      hashes.len() - allocated
    } else {
      let share = (hashes.len() as f64 * weight / total_weight) as usize;
      share.min(hashes.len() - allocated)
    };
    let assigned = hashes[allocated..allocated + count].to_vec();
    allocated += count;
    out.push(HashAssignment {
      worker_id: worker.worker_id.clone(),
      estimated_time: assigned.len() as f64 * (SECONDS_PER_HASH / weight),
      assigned_hashes: assigned,
      priority: if *weight > 1.0 { Priority::High } else { Priority::Normal },
    });
  }
  out
}

fn dynamic_load(hashes: &[String], workers: &[WorkerProfile]) -> Vec<HashAssignment> {
  let mut sorted: Vec<&WorkerProfile> = workers.iter().collect();
  sorted.sort_by(|a, b| {
    (a.cpu_usage + a.ram_usage)
      .partial_cmp(&(b.cpu_usage + b.ram_usage))
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut remaining = hashes;
  let mut out = Vec::with_capacity(workers.len());
  for (i, worker) in sorted.iter().enumerate() {
    let factor = (1.0 - (worker.cpu_usage + worker.ram_usage) / 200.0).max(0.1);
    let assigned = if i == sorted.len() - 1 {
      let all = remaining.to_vec();
      remaining = &[];
      all
    } else {
      let count = ((remaining.len() as f64 * factor) as usize).min(remaining.len());
      let (head, tail) = remaining.split_at(count);
      remaining = tail;
      head.to_vec()
    };
    out.push(HashAssignment {
      worker_id: worker.worker_id.clone(),
      estimated_time: assigned.len() as f64 * (SECONDS_PER_HASH / factor),
      assigned_hashes: assigned,
      priority: if factor > 0.7 { Priority::High } else { Priority::Normal },
    });
  }
  out
}

/// Groups hashes by digest length. Simple hashes go to every worker; complex
/// and unknown ones only to workers with enough cores, or to everyone when
/// no worker qualifies.
fn hash_based(hashes: &[String], workers: &[WorkerProfile]) -> Vec<HashAssignment> {
  let mut simple = Vec::new();
  let mut complex = Vec::new();
  for hash in hashes {
    // Digests longer than 64 chars are "unknown" and routed like complex ones.
    if hash.len() <= SIMPLE_HASH_MAX_LEN {
      simple.push(hash.clone());
    } else {
      complex.push(hash.clone());
    }
  }

  let capable: Vec<usize> = workers
    .iter()
    .enumerate()
    .filter(|(_, w)| w.cpu_cores >= COMPLEX_MIN_CORES)
    .map(|(i, _)| i)
    .collect();
  let heavy_targets: Vec<usize> = if capable.is_empty() {
    (0..workers.len()).collect()
  } else {
    capable
  };

  workers
    .iter()
    .enumerate()
    .map(|(i, worker)| {
      let mut assigned = equal_slice(&simple, i, workers.len());
      if let Some(slot) = heavy_targets.iter().position(|idx| *idx == i) {
        assigned.extend(equal_slice(&complex, slot, heavy_targets.len()));
      }
      let strong = worker.cpu_cores >= COMPLEX_MIN_CORES;
      HashAssignment {
        worker_id: worker.worker_id.clone(),
        estimated_time: assigned.len() as f64 * if strong { 30.0 } else { 90.0 },
        assigned_hashes: assigned,
        priority: if strong { Priority::High } else { Priority::Normal },
      }
    })
    .collect()
}
