use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::attack_engine::{AttackConfig, AttackMode};
use crate::hashing::HashAlgorithm;

// ---------------------------------------------------------------------------
// Cluster membership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
  Follower,
  Candidate,
  Leader,
}

impl fmt::Display for NodeRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeRole::Follower => write!(f, "follower"),
      NodeRole::Candidate => write!(f, "candidate"),
      NodeRole::Leader => write!(f, "leader"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
  Healthy,
  Degraded,
  Failed,
}

impl fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HealthStatus::Healthy => write!(f, "healthy"),
      HealthStatus::Degraded => write!(f, "degraded"),
      HealthStatus::Failed => write!(f, "failed"),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadMetrics {
  pub cpu_usage: f64,
  pub memory_usage: f64,
  pub disk_usage: f64,
  pub load_average: f64,
  pub cpu_cores: u32,
  pub ram_total_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
  pub node_id: String,
  pub hostname: String,
  pub address: String,
  pub port: u16,
  pub role: NodeRole,
  pub current_term: u64,
  pub last_seen: DateTime<Utc>,
  pub health_status: HealthStatus,
  #[serde(default)]
  pub load_metrics: LoadMetrics,
  #[serde(default)]
  pub missed_heartbeats: u32,
}

impl ClusterNode {
  pub fn new(hostname: &str, address: &str, port: u16) -> Self {
    Self {
      node_id: node_id_for(hostname, address, port),
      hostname: hostname.to_string(),
      address: address.to_string(),
      port,
      role: NodeRole::Follower,
      current_term: 0,
      last_seen: Utc::now(),
      health_status: HealthStatus::Healthy,
      load_metrics: LoadMetrics::default(),
      missed_heartbeats: 0,
    }
  }

  /// `address:port`, the form peers are addressed by.
  pub fn endpoint(&self) -> String {
    format!("{}:{}", self.address, self.port)
  }

  pub fn is_healthy(&self) -> bool {
    self.health_status == HealthStatus::Healthy
  }
}

/// Stable node id: first 16 hex chars of sha256("hostname-address-port").
pub fn node_id_for(hostname: &str, address: &str, port: u16) -> String {
  let digest = Sha256::digest(format!("{}-{}-{}", hostname, address, port).as_bytes());
  hex::encode(digest)[..16].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
  pub leader_node_id: Option<String>,
  pub nodes: HashMap<String, ClusterNode>,
  pub term: u64,
  pub last_heartbeat: DateTime<Utc>,
  pub sync_timestamp: DateTime<Utc>,
}

impl Default for ClusterState {
  fn default() -> Self {
    let now = Utc::now();
    Self {
      leader_node_id: None,
      nodes: HashMap::new(),
      term: 0,
      last_heartbeat: now,
      sync_timestamp: now,
    }
  }
}

impl ClusterState {
  pub fn leader(&self) -> Option<&ClusterNode> {
    self.leader_node_id.as_ref().and_then(|id| self.nodes.get(id))
  }

  pub fn leader_address(&self) -> Option<String> {
    self.leader().map(ClusterNode::endpoint)
  }

  pub fn healthy_count(&self) -> usize {
    self.nodes.values().filter(|n| n.is_healthy()).count()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverKind {
  LeaderElected,
  ElectionFailed,
  ForcedElection,
  SteppedDown,
  NodeJoined,
  NodeLeft,
  NodeFailed,
  NodeRecovered,
  NodeShutdown,
}

impl FailoverKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      FailoverKind::LeaderElected => "leader_elected",
      FailoverKind::ElectionFailed => "election_failed",
      FailoverKind::ForcedElection => "forced_election",
      FailoverKind::SteppedDown => "stepped_down",
      FailoverKind::NodeJoined => "node_joined",
      FailoverKind::NodeLeft => "node_left",
      FailoverKind::NodeFailed => "node_failed",
      FailoverKind::NodeRecovered => "node_recovered",
      FailoverKind::NodeShutdown => "node_shutdown",
    }
  }
}

impl FromStr for FailoverKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "leader_elected" => Ok(FailoverKind::LeaderElected),
      "election_failed" => Ok(FailoverKind::ElectionFailed),
      "forced_election" => Ok(FailoverKind::ForcedElection),
      "stepped_down" => Ok(FailoverKind::SteppedDown),
      "node_joined" => Ok(FailoverKind::NodeJoined),
      "node_left" => Ok(FailoverKind::NodeLeft),
      "node_failed" => Ok(FailoverKind::NodeFailed),
      "node_recovered" => Ok(FailoverKind::NodeRecovered),
      "node_shutdown" => Ok(FailoverKind::NodeShutdown),
      other => Err(format!("unknown failover event type {}", other)),
    }
  }
}

/// Audit record. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
  pub event_type: FailoverKind,
  pub old_leader: Option<String>,
  pub new_leader: Option<String>,
  pub reason: String,
  pub timestamp: DateTime<Utc>,
}

impl FailoverEvent {
  pub fn new(event_type: FailoverKind, reason: impl Into<String>) -> Self {
    Self {
      event_type,
      old_leader: None,
      new_leader: None,
      reason: reason.into(),
      timestamp: Utc::now(),
    }
  }

  pub fn with_leaders(mut self, old_leader: Option<String>, new_leader: Option<String>) -> Self {
    self.old_leader = old_leader;
    self.new_leader = new_leader;
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownNode {
  pub node_id: String,
  pub hostname: String,
  pub address: String,
  pub port: u16,
  pub last_seen: DateTime<Utc>,
}

impl KnownNode {
  pub fn endpoint(&self) -> String {
    format!("{}:{}", self.address, self.port)
  }
}

impl From<&ClusterNode> for KnownNode {
  fn from(node: &ClusterNode) -> Self {
    Self {
      node_id: node.node_id.clone(),
      hostname: node.hostname.clone(),
      address: node.address.clone(),
      port: node.port,
      last_seen: node.last_seen,
    }
  }
}

// ---------------------------------------------------------------------------
// Jobs and partitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Normal,
  High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl PartitionStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      PartitionStatus::Completed | PartitionStatus::Failed | PartitionStatus::Cancelled
    )
  }
}

impl fmt::Display for PartitionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PartitionStatus::Pending => write!(f, "pending"),
      PartitionStatus::Running => write!(f, "running"),
      PartitionStatus::Completed => write!(f, "completed"),
      PartitionStatus::Failed => write!(f, "failed"),
      PartitionStatus::Cancelled => write!(f, "cancelled"),
    }
  }
}

/// The slice of the search space one partition covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionSpan {
  /// Inclusive index interval over strings of `length` symbols.
  Range {
    #[serde(with = "decimal")]
    start_index: BigUint,
    #[serde(with = "decimal")]
    end_index: BigUint,
    charset: String,
    length: usize,
    range_start: String,
    range_end: String,
  },
  Hashes {
    hashes: Vec<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPartition {
  pub partition_id: usize,
  pub owner_id: Option<String>,
  pub span: PartitionSpan,
  pub priority: Priority,
  pub estimated_time: f64,
  pub status: PartitionStatus,
  pub progress: f64,
  pub attempts: u64,
  pub last_candidate: Option<String>,
  pub reassignments: u32,
}

impl WorkPartition {
  pub fn new(partition_id: usize, owner_id: Option<String>, span: PartitionSpan) -> Self {
    Self {
      partition_id,
      owner_id,
      span,
      priority: Priority::Normal,
      estimated_time: 0.0,
      status: PartitionStatus::Pending,
      progress: 0.0,
      attempts: 0,
      last_candidate: None,
      reassignments: 0,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
    )
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JobStatus::Pending => write!(f, "pending"),
      JobStatus::Running => write!(f, "running"),
      JobStatus::Completed => write!(f, "completed"),
      JobStatus::Failed => write!(f, "failed"),
      JobStatus::Cancelled => write!(f, "cancelled"),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub id: Uuid,
  pub name: String,
  pub target_hashes: Vec<String>,
  pub hash_type: HashAlgorithm,
  pub attack: AttackConfig,
  pub strategy: String,
  pub partitions: Vec<WorkPartition>,
  pub status: JobStatus,
  pub found_passwords: HashMap<String, String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
  /// Mean partition progress; 100 once the job completed.
  pub fn progress(&self) -> f64 {
    if self.status == JobStatus::Completed {
      return 100.0;
    }
    if self.partitions.is_empty() {
      return 0.0;
    }
    let sum: f64 = self
      .partitions
      .iter()
      .map(|p| match p.status {
        PartitionStatus::Completed => 100.0,
        _ => p.progress.clamp(0.0, 100.0),
      })
      .sum();
    sum / self.partitions.len() as f64
  }

  pub fn summary(&self) -> JobSummary {
    JobSummary {
      id: self.id,
      name: self.name.clone(),
      status: self.status,
      hash_type: self.hash_type,
      attack_mode: self.attack.mode,
      strategy: self.strategy.clone(),
      progress: self.progress(),
      total_hashes: self.target_hashes.len(),
      cracked_hashes: self.found_passwords.len(),
      partitions: self.partitions.len(),
      running_partitions: self
        .partitions
        .iter()
        .filter(|p| p.status == PartitionStatus::Running)
        .count(),
      found_passwords: self.found_passwords.clone(),
      created_at: self.created_at,
      completed_at: self.completed_at,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
  pub id: Uuid,
  pub name: String,
  pub status: JobStatus,
  pub hash_type: HashAlgorithm,
  pub attack_mode: AttackMode,
  pub strategy: String,
  pub progress: f64,
  pub total_hashes: usize,
  pub cracked_hashes: usize,
  pub partitions: usize,
  pub running_partitions: usize,
  pub found_passwords: HashMap<String, String>,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome for one target hash of one partition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
  pub hash: String,
  pub password: Option<String>,
  pub attempts: u64,
  pub success: bool,
  pub attack_mode: AttackMode,
}

/// Serializes big integers as decimal strings so JSON consumers never see
/// a digit vector.
pub(crate) mod decimal {
  use num_bigint::BigUint;
  use serde::{Deserialize, Deserializer, Serializer, de};

  pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_str_radix(10))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
    let raw = String::deserialize(deserializer)?;
    BigUint::parse_bytes(raw.as_bytes(), 10)
      .ok_or_else(|| de::Error::custom(format!("invalid decimal integer {:?}", raw)))
  }
}
