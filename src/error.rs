use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
  #[error("Symbol {0:?} is not part of the charset")]
  InvalidSymbol(char),

  #[error("Length mismatch: expected {expected}, got {actual}")]
  LengthMismatch { expected: usize, actual: usize },

  #[error("Value {0} is outside the encodable range")]
  OutOfRange(String),

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("Requested space of {requested} combinations exceeds the cap of {cap}")]
  PartitionOverflow { requested: String, cap: u64 },

  #[error("Range start and end differ in length ({start_len} vs {end_len})")]
  RangeMismatch { start_len: usize, end_len: usize },

  #[error("Unsupported configuration: {0}")]
  UnsupportedConfiguration(String),

  #[error("Election for term {term} failed with {votes} of {needed} required votes")]
  ElectionFailure { term: u64, votes: usize, needed: usize },

  #[error("Node {endpoint} unreachable: {reason}")]
  NodeUnreachable { endpoint: String, reason: String },

  #[error("Not the leader, current leader is {leader_id:?}")]
  NotLeader {
    leader_id: Option<String>,
    leader_address: Option<String>,
  },

  #[error("Job not found: {0}")]
  JobNotFound(Uuid),

  #[error("Node not found: {0}")]
  NodeNotFound(String),

  #[error("No healthy workers available")]
  NoWorkersAvailable,

  #[error("Storage error: {0}")]
  Storage(String),
}

impl FleetError {
  /// Short machine-readable name, used in HTTP error bodies.
  pub fn kind(&self) -> &'static str {
    match self {
      FleetError::InvalidSymbol(_) => "invalid_symbol",
      FleetError::LengthMismatch { .. } => "length_mismatch",
      FleetError::OutOfRange(_) => "out_of_range",
      FleetError::InvalidArgument(_) => "invalid_argument",
      FleetError::PartitionOverflow { .. } => "partition_overflow",
      FleetError::RangeMismatch { .. } => "range_mismatch",
      FleetError::UnsupportedConfiguration(_) => "unsupported_configuration",
      FleetError::ElectionFailure { .. } => "election_failure",
      FleetError::NodeUnreachable { .. } => "node_unreachable",
      FleetError::NotLeader { .. } => "not_leader",
      FleetError::JobNotFound(_) => "job_not_found",
      FleetError::NodeNotFound(_) => "node_not_found",
      FleetError::NoWorkersAvailable => "no_workers_available",
      FleetError::Storage(_) => "storage",
    }
  }

  pub(crate) fn unreachable(endpoint: &str, reason: impl ToString) -> Self {
    FleetError::NodeUnreachable {
      endpoint: endpoint.to_string(),
      reason: reason.to_string(),
    }
  }
}

pub type Result<T> = std::result::Result<T, FleetError>;
