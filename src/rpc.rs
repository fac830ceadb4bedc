//! JSON bodies exchanged between nodes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attack_engine::{AttackConfig, AttackMode, AttackRequest};
use crate::hashing::HashAlgorithm;
use crate::models::{ClusterNode, ClusterState, PartitionStatus, Priority};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
  pub term: u64,
  pub candidate_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResponse {
  pub term: u64,
  pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
  pub term: u64,
  pub leader_id: String,
  pub cluster_state: ClusterState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
  pub term: u64,
  pub success: bool,
  pub node_info: ClusterNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
  pub node_info: ClusterNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
  pub success: bool,
  pub leader_id: Option<String>,
  pub term: u64,
  pub cluster_state: ClusterState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
  pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveResponse {
  pub success: bool,
}

/// One partition handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
  pub job_id: Uuid,
  pub partition_id: usize,
  pub hash_type: HashAlgorithm,
  pub attack_mode: AttackMode,
  pub hashes: Vec<String>,
  pub range_start: Option<String>,
  pub range_end: Option<String>,
  pub charset: Option<String>,
  pub wordlist_path: Option<PathBuf>,
  pub mask: Option<String>,
  /// Remaining mode parameters.
  #[serde(default)]
  pub attack: AttackConfig,
  pub priority: Priority,
  /// Base URL the worker reports back to.
  pub coordinator_url: String,
}

impl DispatchRequest {
  pub fn attack_request(&self) -> AttackRequest {
    let mut config = self.attack.clone();
    config.mode = self.attack_mode;
    if self.range_start.is_some() && self.range_end.is_some() {
      config.start_password = self.range_start.clone();
      config.end_password = self.range_end.clone();
    }
    if let Some(charset) = &self.charset {
      config.charset = charset.clone();
    }
    if let Some(path) = &self.wordlist_path {
      config.wordlist = Some(path.clone());
    }
    if let Some(mask) = &self.mask {
      config.mask = mask.clone();
    }
    AttackRequest {
      targets: self.hashes.clone(),
      hash_type: self.hash_type,
      config,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAck {
  pub accepted: bool,
  pub queued: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPartitionRequest {
  pub job_id: Uuid,
  pub partition_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
  pub partition_id: usize,
  pub node_id: String,
  pub status: PartitionStatus,
  pub attempts: u64,
  pub last_candidate: Option<String>,
  pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
  pub partition_id: usize,
  pub node_id: String,
  pub percent: f64,
  pub attempts: u64,
  pub current: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordFoundReport {
  pub partition_id: usize,
  pub node_id: String,
  pub hash: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
  pub success: bool,
}
