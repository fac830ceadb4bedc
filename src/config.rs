use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::partitioner::DistributionStrategy;

#[derive(Debug, Clone)]
pub struct Config {
  pub bind_address: String,
  pub database_url: Option<String>,
  pub cluster: ClusterConfig,
  pub jobs: JobConfig,
  pub worker: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
  pub hostname: String,
  pub address: String,
  pub port: u16,
  /// `host:port` of nodes to contact at startup.
  pub seeds: Vec<String>,
  pub election_timeout: Duration,
  /// Upper bound of the random extra wait added to each election timeout.
  pub election_jitter: Duration,
  pub heartbeat_interval: Duration,
  pub health_check_interval: Duration,
  pub max_missed_heartbeats: u32,
  pub rpc_timeout: Duration,
  /// Multiplier on the 2ms base delay of join and dispatch retries.
  pub retry_backoff_factor: u64,
  pub vote_window: Duration,
  pub snapshot_retention: usize,
}

impl Default for ClusterConfig {
  fn default() -> Self {
    Self {
      hostname: "localhost".into(),
      address: "127.0.0.1".into(),
      port: 8080,
      seeds: Vec::new(),
      election_timeout: Duration::from_secs(30),
      election_jitter: Duration::ZERO,
      heartbeat_interval: Duration::from_secs(5),
      health_check_interval: Duration::from_secs(10),
      max_missed_heartbeats: 3,
      rpc_timeout: Duration::from_secs(3),
      retry_backoff_factor: 1000,
      vote_window: Duration::from_secs(10),
      snapshot_retention: 10,
    }
  }
}

impl ClusterConfig {
  pub fn endpoint(&self) -> String {
    format!("{}:{}", self.address, self.port)
  }

  /// Silence after which the leader marks a node failed.
  pub fn stale_after(&self) -> Duration {
    self.heartbeat_interval * 3
  }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
  pub max_combinations: u64,
  pub default_strategy: DistributionStrategy,
  pub dispatch_retries: usize,
}

impl Default for JobConfig {
  fn default() -> Self {
    Self {
      max_combinations: 10_000_000_000,
      default_strategy: DistributionStrategy::EqualSplit,
      dispatch_retries: 3,
    }
  }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub max_concurrent_partitions: usize,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      max_concurrent_partitions: num_cpus::get().max(1),
    }
  }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: Display,
{
  match env::var(name) {
    Ok(raw) if !raw.trim().is_empty() => raw
      .trim()
      .parse()
      .map_err(|e| anyhow::anyhow!("{}", e))
      .with_context(|| format!("invalid value for {}", name)),
    _ => Ok(default),
  }
}

fn millis_or(name: &str, default: Duration) -> Result<Duration> {
  Ok(Duration::from_millis(var_or(name, default.as_millis() as u64)?))
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let cluster_defaults = ClusterConfig::default();
    let job_defaults = JobConfig::default();

    let seeds = env::var("CLUSTER_PEERS")
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(String::from)
      .collect();

    let cluster = ClusterConfig {
      hostname: var_or("NODE_HOSTNAME", cluster_defaults.hostname)?,
      address: var_or("NODE_ADDRESS", cluster_defaults.address)?,
      port: var_or("SERVER_PORT", cluster_defaults.port)?,
      seeds,
      election_timeout: millis_or("ELECTION_TIMEOUT_MS", cluster_defaults.election_timeout)?,
      election_jitter: millis_or("ELECTION_JITTER_MS", cluster_defaults.election_jitter)?,
      heartbeat_interval: millis_or("HEARTBEAT_INTERVAL_MS", cluster_defaults.heartbeat_interval)?,
      health_check_interval: millis_or("HEALTH_CHECK_INTERVAL_MS", cluster_defaults.health_check_interval)?,
      max_missed_heartbeats: var_or("MAX_MISSED_HEARTBEATS", cluster_defaults.max_missed_heartbeats)?,
      rpc_timeout: millis_or("RPC_TIMEOUT_MS", cluster_defaults.rpc_timeout)?,
      retry_backoff_factor: var_or("RETRY_BACKOFF_FACTOR", cluster_defaults.retry_backoff_factor)?,
      vote_window: millis_or("VOTE_WINDOW_MS", cluster_defaults.vote_window)?,
      snapshot_retention: var_or("SNAPSHOT_RETENTION", cluster_defaults.snapshot_retention)?,
    };

    Ok(Self {
      bind_address: var_or("BIND_ADDRESS", "0.0.0.0".to_string())?,
      database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
      cluster,
      jobs: JobConfig {
        max_combinations: var_or("MAX_COMBINATIONS", job_defaults.max_combinations)?,
        dispatch_retries: var_or("DISPATCH_RETRIES", job_defaults.dispatch_retries)?,
        ..job_defaults
      },
      worker: WorkerConfig {
        max_concurrent_partitions: var_or(
          "MAX_CONCURRENT_PARTITIONS",
          WorkerConfig::default().max_concurrent_partitions,
        )?,
      },
    })
  }
}
