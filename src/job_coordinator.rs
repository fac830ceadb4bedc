//! Leader-side job orchestration: planning, dispatch, result aggregation and
//! reassignment of work owned by nodes that failed or left.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attack_engine::{AttackConfig, AttackMode};
use crate::cluster::{ClusterCoordinator, MembershipEvent};
use crate::config::JobConfig;
use crate::error::{FleetError, Result};
use crate::hashing::{HashAlgorithm, identify_hash_type};
use crate::messaging::PeerClient;
use crate::models::{
  ClusterNode, Job, JobStatus, JobSummary, PartitionSpan, PartitionStatus, WorkPartition,
};
use crate::partitioner::{self, CharsetRange, DistributionStrategy, WorkerProfile};
use crate::range_codec::{self, RangeCodec};
use crate::rpc::{
  Ack, CancelPartitionRequest, DispatchAck, DispatchRequest, PasswordFoundReport, ProgressReport, StatusReport,
};

static HASHES_PER_SECOND: f64 = 1_000_000.0;

/// Delivery of partitions to workers.
#[async_trait]
pub trait PartitionDispatcher: Send + Sync {
  async fn dispatch(&self, endpoint: &str, request: &DispatchRequest) -> Result<DispatchAck>;
  async fn cancel(&self, endpoint: &str, request: &CancelPartitionRequest) -> Result<Ack>;
}

#[async_trait]
impl PartitionDispatcher for PeerClient {
  async fn dispatch(&self, endpoint: &str, request: &DispatchRequest) -> Result<DispatchAck> {
    PeerClient::dispatch(self, endpoint, request).await
  }

  async fn cancel(&self, endpoint: &str, request: &CancelPartitionRequest) -> Result<Ack> {
    self.cancel_partition(endpoint, request).await
  }
}

/// Body of `POST /jobs`. Attack parameters sit at the top level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
  #[serde(default)]
  pub name: Option<String>,
  pub hashes: Vec<String>,
  #[serde(default)]
  pub hash_type: Option<String>,
  #[serde(default)]
  pub strategy: Option<String>,
  /// Range partitions per candidate length; defaults to the worker count.
  #[serde(default)]
  pub partitions: Option<usize>,
  #[serde(flatten)]
  pub attack: AttackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmitted {
  pub job_id: Uuid,
  pub status: JobStatus,
  pub partitions: usize,
  pub events_url: String,
}

/// A validated job, ready to be stored.
#[derive(Debug, Clone)]
pub struct JobPlan {
  pub hash_type: HashAlgorithm,
  pub targets: Vec<String>,
  pub strategy: DistributionStrategy,
  pub partitions: Vec<WorkPartition>,
}

/// Validate `request` and split it over `workers`.
///
/// Brute force is split by candidate index, every partition testing every
/// target. The other modes split the target list with the chosen strategy.
pub fn plan_job(request: &JobRequest, workers: &[ClusterNode], config: &JobConfig) -> Result<JobPlan> {
  if request.hashes.is_empty() {
    return Err(FleetError::InvalidArgument("a job needs at least one target hash".into()));
  }
  if workers.is_empty() {
    return Err(FleetError::NoWorkersAvailable);
  }

  let hash_type: HashAlgorithm = match &request.hash_type {
    Some(name) => name.parse()?,
    None => identify_hash_type(&request.hashes[0]).parse()?,
  };
  let mut seen = HashSet::new();
  let mut targets = Vec::with_capacity(request.hashes.len());
  for hash in &request.hashes {
    let hash = hash_type.normalize_target(hash)?;
    if seen.insert(hash.clone()) {
      targets.push(hash);
    }
  }

  let strategy = match &request.strategy {
    Some(name) => name.parse()?,
    None => config.default_strategy,
  };

  let attack = &request.attack;
  if let Some(total) = attack.space_size()? {
    if total > BigUint::from(config.max_combinations) {
      return Err(FleetError::PartitionOverflow {
        requested: total.to_string(),
        cap: config.max_combinations,
      });
    }
  }

  let mut workers: Vec<&ClusterNode> = workers.iter().collect();
  workers.sort_by(|a, b| a.node_id.cmp(&b.node_id));

  let partitions = match attack.mode {
    AttackMode::BruteForce => {
      let n = request.partitions.unwrap_or(workers.len()).max(1);
      let charset = attack.resolved_charset()?;
      let ranges: Vec<CharsetRange> = match attack.explicit_range() {
        Some((start, end)) => partitioner::split_custom_range(start, end, &charset, n)?,
        None => {
          let mut ranges = Vec::new();
          for length in attack.min_length..=attack.max_length {
            ranges.extend(partitioner::split_charset_range(&charset, length, n)?);
          }
          ranges
        }
      };
      ranges
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
          let owner = workers[i % workers.len()].node_id.clone();
          let size = range.size();
          let mut partition = WorkPartition::new(i, Some(owner), range.into_span());
          partition.estimated_time = range_codec::to_f64(&size) / HASHES_PER_SECOND;
          partition
        })
        .collect()
    }
    _ => {
      let profiles: Vec<WorkerProfile> = workers.iter().map(|n| WorkerProfile::from(*n)).collect();
      partitioner::distribute_hashes(&targets, &profiles, strategy)?
        .into_iter()
        .filter(|a| !a.assigned_hashes.is_empty())
        .enumerate()
        .map(|(i, assignment)| {
          let mut partition = WorkPartition::new(i, Some(assignment.worker_id), PartitionSpan::Hashes {
            hashes: assignment.assigned_hashes,
          });
          partition.priority = assignment.priority;
          partition.estimated_time = assignment.estimated_time;
          partition
        })
        .collect()
    }
  };

  Ok(JobPlan {
    hash_type,
    targets,
    strategy,
    partitions,
  })
}

/// The part of a partition's span nobody has searched yet, or `None` when
/// nothing is left.
fn remaining_span(partition: &WorkPartition, found: &HashMap<String, String>) -> Option<PartitionSpan> {
  match &partition.span {
    PartitionSpan::Range {
      start_index,
      end_index,
      charset,
      length,
      range_end,
      ..
    } => {
      let original = || partition.span.clone();
      let Ok(codec) = RangeCodec::new(charset, *length) else {
        return Some(original());
      };
      let resume = partition
        .last_candidate
        .as_deref()
        .and_then(|last| codec.encode(last).ok())
        .filter(|last| last >= start_index && last <= end_index)
        .map(|last| last + BigUint::one());
      match resume {
        None => Some(original()),
        Some(next) if &next > end_index => None,
        Some(next) => {
          let decoded = codec.decode(&next).ok()?;
          Some(PartitionSpan::Range {
            start_index: next,
            end_index: end_index.clone(),
            charset: charset.clone(),
            length: *length,
            range_start: decoded,
            range_end: range_end.clone(),
          })
        }
      }
    }
    PartitionSpan::Hashes { hashes } => {
      let left: Vec<String> = hashes.iter().filter(|h| !found.contains_key(*h)).cloned().collect();
      (!left.is_empty()).then_some(PartitionSpan::Hashes { hashes: left })
    }
  }
}

/// Terminal status the job should move to, if any.
fn settled_status(job: &Job) -> Option<JobStatus> {
  if job.status.is_terminal() {
    return None;
  }
  if !job.target_hashes.is_empty() && job.target_hashes.iter().all(|h| job.found_passwords.contains_key(h)) {
    return Some(JobStatus::Completed);
  }
  if job.partitions.is_empty() || !job.partitions.iter().all(|p| p.status.is_terminal()) {
    return None;
  }
  if job.partitions.iter().any(|p| p.status == PartitionStatus::Failed) {
    Some(JobStatus::Failed)
  } else {
    Some(JobStatus::Completed)
  }
}

/// Partitions still out on workers, as `(owner, partition_id)`.
fn open_partitions(job: &Job) -> Vec<(String, usize)> {
  job
    .partitions
    .iter()
    .filter(|p| !p.status.is_terminal())
    .filter_map(|p| p.owner_id.clone().map(|owner| (owner, p.partition_id)))
    .collect()
}

/// The healthy node outside `excluded` with the fewest open partitions of
/// `job`, ties broken by node id.
fn pick_owner(job: &Job, nodes: &[ClusterNode], excluded: &HashSet<String>) -> Option<String> {
  let load = |node_id: &str| {
    job
      .partitions
      .iter()
      .filter(|p| !p.status.is_terminal() && p.owner_id.as_deref() == Some(node_id))
      .count()
  };
  nodes
    .iter()
    .filter(|n| !excluded.contains(&n.node_id))
    .min_by_key(|n| (load(&n.node_id), n.node_id.clone()))
    .map(|n| n.node_id.clone())
}

/// Move `job` to a terminal status when it is done. Returns the partitions
/// to cancel on their workers.
fn settle(job: &mut Job) -> Vec<(String, usize)> {
  let Some(status) = settled_status(job) else {
    return Vec::new();
  };
  let open = open_partitions(job);
  for partition in job.partitions.iter_mut().filter(|p| !p.status.is_terminal()) {
    partition.status = PartitionStatus::Cancelled;
  }
  job.status = status;
  job.completed_at = Some(Utc::now());
  info!(
    job_id = %job.id,
    status = %status,
    found = job.found_passwords.len(),
    targets = job.target_hashes.len(),
    "Job finished"
  );
  open
}

pub struct JobCoordinator {
  cluster: Arc<ClusterCoordinator>,
  dispatcher: Arc<dyn PartitionDispatcher>,
  config: JobConfig,
  jobs: Mutex<HashMap<Uuid, Job>>,
}

impl JobCoordinator {
  pub fn new(cluster: Arc<ClusterCoordinator>, dispatcher: Arc<dyn PartitionDispatcher>, config: JobConfig) -> Self {
    Self {
      cluster,
      dispatcher,
      config,
      jobs: Mutex::new(HashMap::new()),
    }
  }

  fn coordinator_url(&self) -> String {
    format!("http://{}", self.cluster.local_endpoint())
  }

  async fn require_leader(&self) -> Result<()> {
    let (leader, leader_id, leader_address) = self
      .cluster
      .with_core(|c| (c.is_leader(), c.leader_id().map(String::from), c.leader_address()))
      .await;
    if leader {
      Ok(())
    } else {
      Err(FleetError::NotLeader {
        leader_id,
        leader_address,
      })
    }
  }

  /// Plan and store a job without dispatching it.
  pub async fn create_job(&self, request: JobRequest) -> Result<Uuid> {
    self.require_leader().await?;
    let workers = self.cluster.healthy_nodes().await;
    let plan = plan_job(&request, &workers, &self.config)?;

    let job = Job {
      id: Uuid::new_v4(),
      name: request.name.clone().unwrap_or_else(|| format!("{} job", request.attack.mode)),
      target_hashes: plan.targets,
      hash_type: plan.hash_type,
      attack: request.attack,
      strategy: plan.strategy.to_string(),
      partitions: plan.partitions,
      status: JobStatus::Pending,
      found_passwords: HashMap::new(),
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    };
    let id = job.id;
    info!(
      job_id = %id,
      mode = %job.attack.mode,
      hash_type = %job.hash_type,
      strategy = %job.strategy,
      partitions = job.partitions.len(),
      targets = job.target_hashes.len(),
      "Job created"
    );
    self.jobs.lock().await.insert(id, job);
    Ok(id)
  }

  /// Create a job and dispatch its partitions in the background.
  pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<JobSubmitted> {
    let job_id = self.create_job(request).await?;
    let partitions = self.job(job_id).await?.partitions.len();
    let coordinator = Arc::clone(self);
    tokio::spawn(async move { coordinator.dispatch_job(job_id).await });
    Ok(JobSubmitted {
      job_id,
      status: JobStatus::Pending,
      partitions,
      events_url: format!("/jobs/{}/events", job_id),
    })
  }

  /// Send every pending partition of `job_id` to its owner.
  pub async fn dispatch_job(&self, job_id: Uuid) {
    let pending: Vec<usize> = match self.jobs.lock().await.get(&job_id) {
      Some(job) => job
        .partitions
        .iter()
        .filter(|p| p.status == PartitionStatus::Pending)
        .map(|p| p.partition_id)
        .collect(),
      None => return,
    };
    for partition_id in pending {
      self.dispatch_partition(job_id, partition_id).await;
    }
  }

  /// Dispatch one partition, moving it to another node when its owner cannot
  /// be reached.
  async fn dispatch_partition(&self, job_id: Uuid, partition_id: usize) {
    let mut excluded: HashSet<String> = HashSet::new();
    loop {
      if !self.cluster.is_leader() {
        warn!(job_id = %job_id, partition_id, "Not leader, holding partition back");
        return;
      }
      let nodes = self.cluster.healthy_nodes().await;
      let prepared = {
        let jobs = self.jobs.lock().await;
        let Some(job) = jobs.get(&job_id) else {
          return;
        };
        let Some(partition) = job.partitions.get(partition_id) else {
          return;
        };
        if job.status.is_terminal() || partition.status != PartitionStatus::Pending {
          return;
        }
        let owner = partition.owner_id.clone().unwrap_or_default();
        nodes
          .iter()
          .find(|n| n.node_id == owner)
          .map(|n| (owner, n.endpoint(), self.dispatch_request(job, partition)))
      };

      let failed_owner = match prepared {
        Some((owner, endpoint, request)) => match self.dispatcher.dispatch(&endpoint, &request).await {
          Ok(ack) if ack.accepted => {
            if self.mark_dispatched(job_id, partition_id, &owner).await {
              info!(job_id = %job_id, partition_id, owner = %owner, queued = ack.queued, "Partition dispatched");
            } else {
              debug!(job_id = %job_id, partition_id, owner = %owner, "Partition settled during dispatch, cancelling");
              self.cancel_remote(job_id, vec![(owner, partition_id)]).await;
            }
            return;
          }
          Ok(_) => {
            warn!(job_id = %job_id, partition_id, owner = %owner, "Worker refused partition");
            owner
          }
          Err(e) => {
            warn!(job_id = %job_id, partition_id, owner = %owner, error = %e, "Dispatch failed");
            owner
          }
        },
        None => {
          let jobs = self.jobs.lock().await;
          jobs
            .get(&job_id)
            .and_then(|j| j.partitions.get(partition_id))
            .and_then(|p| p.owner_id.clone())
            .unwrap_or_default()
        }
      };

      excluded.insert(failed_owner);
      if !self.move_partition(job_id, partition_id, &nodes, &excluded).await {
        return;
      }
    }
  }

  /// Returns `false` when the partition was settled or moved while the
  /// dispatch was in flight.
  async fn mark_dispatched(&self, job_id: Uuid, partition_id: usize, owner: &str) -> bool {
    let mut jobs = self.jobs.lock().await;
    let Some(job) = jobs.get_mut(&job_id) else {
      return false;
    };
    if job.status.is_terminal() {
      return false;
    }
    let Some(partition) = job.partitions.get_mut(partition_id) else {
      return false;
    };
    if partition.owner_id.as_deref() != Some(owner) || partition.status.is_terminal() {
      return false;
    }
    if partition.status == PartitionStatus::Pending {
      partition.status = PartitionStatus::Running;
    }
    if job.status == JobStatus::Pending {
      job.status = JobStatus::Running;
      job.started_at = Some(Utc::now());
      info!(job_id = %job_id, "Job running");
    }
    true
  }

  /// Give a partition to the least busy healthy node not in `excluded`.
  /// Returns `false` and fails the partition when no node is left.
  async fn move_partition(
    &self,
    job_id: Uuid,
    partition_id: usize,
    nodes: &[ClusterNode],
    excluded: &HashSet<String>,
  ) -> bool {
    let to_cancel = {
      let mut jobs = self.jobs.lock().await;
      let Some(job) = jobs.get_mut(&job_id) else {
        return false;
      };
      let candidate = pick_owner(job, nodes, excluded);
      let Some(partition) = job.partitions.get_mut(partition_id) else {
        return false;
      };
      match candidate {
        Some(owner) => {
          info!(job_id = %job_id, partition_id, from = ?partition.owner_id, to = %owner, "Reassigning partition");
          partition.owner_id = Some(owner);
          partition.status = PartitionStatus::Pending;
          partition.reassignments += 1;
          return true;
        }
        None => {
          warn!(job_id = %job_id, partition_id, "No healthy node left for partition");
          partition.status = PartitionStatus::Failed;
          settle(job)
        }
      }
    };
    self.cancel_remote(job_id, to_cancel).await;
    false
  }

  fn dispatch_request(&self, job: &Job, partition: &WorkPartition) -> DispatchRequest {
    let remaining: Vec<String> = job
      .target_hashes
      .iter()
      .filter(|h| !job.found_passwords.contains_key(*h))
      .cloned()
      .collect();
    let (hashes, range_start, range_end, charset) = match &partition.span {
      PartitionSpan::Range {
        charset,
        range_start,
        range_end,
        ..
      } => (
        remaining,
        Some(range_start.clone()),
        Some(range_end.clone()),
        Some(charset.clone()),
      ),
      PartitionSpan::Hashes { hashes } => (hashes.clone(), None, None, None),
    };
    DispatchRequest {
      job_id: job.id,
      partition_id: partition.partition_id,
      hash_type: job.hash_type,
      attack_mode: job.attack.mode,
      hashes,
      range_start,
      range_end,
      charset,
      wordlist_path: job.attack.wordlist.clone(),
      mask: (job.attack.mode == AttackMode::Mask).then(|| job.attack.mask.clone()),
      attack: job.attack.clone(),
      priority: partition.priority,
      coordinator_url: self.coordinator_url(),
    }
  }

  async fn cancel_remote(&self, job_id: Uuid, partitions: Vec<(String, usize)>) {
    if partitions.is_empty() {
      return;
    }
    let nodes = self.cluster.info().await.nodes;
    for (owner, partition_id) in partitions {
      let Some(node) = nodes.get(&owner) else {
        continue;
      };
      let request = CancelPartitionRequest { job_id, partition_id };
      if let Err(e) = self.dispatcher.cancel(&node.endpoint(), &request).await {
        debug!(job_id = %job_id, partition_id, error = %e, "Cancel not delivered");
      }
    }
  }

  pub async fn handle_progress(&self, job_id: Uuid, report: ProgressReport) -> Result<()> {
    let mut jobs = self.jobs.lock().await;
    let job = jobs.get_mut(&job_id).ok_or(FleetError::JobNotFound(job_id))?;
    let Some(partition) = job.partitions.get_mut(report.partition_id) else {
      return Ok(());
    };
    if partition.owner_id.as_deref() != Some(report.node_id.as_str()) || partition.status.is_terminal() {
      debug!(job_id = %job_id, partition_id = report.partition_id, node_id = %report.node_id, "Ignoring stale progress");
      return Ok(());
    }
    partition.status = PartitionStatus::Running;
    partition.progress = report.percent.clamp(0.0, 100.0);
    partition.attempts = report.attempts;
    partition.last_candidate = Some(report.current);
    Ok(())
  }

  pub async fn handle_found(&self, job_id: Uuid, report: PasswordFoundReport) -> Result<()> {
    let to_cancel = {
      let mut jobs = self.jobs.lock().await;
      let job = jobs.get_mut(&job_id).ok_or(FleetError::JobNotFound(job_id))?;
      let hash = report.hash.to_lowercase();
      if !job.target_hashes.contains(&hash) {
        warn!(job_id = %job_id, hash = %hash, "Reported hash is not a target");
        return Ok(());
      }
      if job.hash_type.digest_hex(&report.password) != hash {
        warn!(job_id = %job_id, hash = %hash, "Reported password does not match");
        return Ok(());
      }
      if job.found_passwords.insert(hash.clone(), report.password).is_none() {
        info!(
          job_id = %job_id,
          partition_id = report.partition_id,
          node_id = %report.node_id,
          hash = %hash,
          "Password found"
        );
      }
      settle(job)
    };
    self.cancel_remote(job_id, to_cancel).await;
    Ok(())
  }

  pub async fn handle_status(&self, job_id: Uuid, report: StatusReport) -> Result<()> {
    let (to_cancel, retry) = {
      let mut jobs = self.jobs.lock().await;
      let job = jobs.get_mut(&job_id).ok_or(FleetError::JobNotFound(job_id))?;
      let Some(partition) = job.partitions.get_mut(report.partition_id) else {
        return Ok(());
      };
      if job.status.is_terminal()
        || partition.owner_id.as_deref() != Some(report.node_id.as_str())
        || partition.status.is_terminal()
      {
        debug!(job_id = %job_id, partition_id = report.partition_id, node_id = %report.node_id, "Ignoring stale status");
        return Ok(());
      }

      partition.attempts = partition.attempts.max(report.attempts);
      if report.last_candidate.is_some() {
        partition.last_candidate = report.last_candidate.clone();
      }
      let mut retry = false;
      match report.status {
        PartitionStatus::Completed => {
          partition.status = PartitionStatus::Completed;
          partition.progress = 100.0;
        }
        PartitionStatus::Failed => {
          warn!(
            job_id = %job_id,
            partition_id = report.partition_id,
            error = ?report.error,
            "Partition failed on worker"
          );
          retry = true;
        }
        // Stopped before the job settled, e.g. its node shut down.
        PartitionStatus::Cancelled => {
          warn!(
            job_id = %job_id,
            partition_id = report.partition_id,
            last_candidate = ?report.last_candidate,
            "Partition stopped early on worker"
          );
          retry = true;
        }
        PartitionStatus::Running | PartitionStatus::Pending => partition.status = PartitionStatus::Running,
      }
      debug!(job_id = %job_id, partition_id = report.partition_id, status = %report.status, "Partition status");
      (settle(job), retry)
    };
    self.cancel_remote(job_id, to_cancel).await;
    if retry {
      self.reassign(job_id, &[report.partition_id], &report.node_id).await;
    }
    Ok(())
  }

  /// Reassign the open partitions a lost node owned, resuming ranges after the
  /// last candidate it reported.
  pub async fn handle_node_loss(&self, node_id: &str) {
    let affected: Vec<(Uuid, Vec<usize>)> = {
      let jobs = self.jobs.lock().await;
      jobs
        .values()
        .filter(|job| !job.status.is_terminal())
        .filter_map(|job| {
          let job_id = job.id;
          let ids: Vec<usize> = job
            .partitions
            .iter()
            .filter(|p| !p.status.is_terminal() && p.owner_id.as_deref() == Some(node_id))
            .map(|p| {
              warn!(job_id = %job_id, partition_id = p.partition_id, node_id, "Owner lost");
              p.partition_id
            })
            .collect();
          (!ids.is_empty()).then_some((job_id, ids))
        })
        .collect()
    };
    for (job_id, ids) in affected {
      self.reassign(job_id, &ids, node_id).await;
    }
  }

  /// Hand the open partitions `lost` owned to other healthy nodes. A
  /// partition with nothing left completes; one with no node to go to fails.
  async fn reassign(&self, job_id: Uuid, partition_ids: &[usize], lost: &str) {
    if !self.cluster.is_leader() {
      warn!(job_id = %job_id, "Not leader, leaving partitions unassigned");
      return;
    }
    let nodes = self.cluster.healthy_nodes().await;
    let excluded = HashSet::from([lost.to_string()]);
    let (moved, to_cancel) = {
      let mut jobs = self.jobs.lock().await;
      let Some(job) = jobs.get_mut(&job_id) else {
        return;
      };
      if job.status.is_terminal() {
        return;
      }
      let mut moved = Vec::new();
      for &id in partition_ids {
        let Some(partition) = job.partitions.get(id) else {
          continue;
        };
        if partition.status.is_terminal() || partition.owner_id.as_deref() != Some(lost) {
          continue;
        }
        let span = remaining_span(partition, &job.found_passwords);
        let owner = pick_owner(job, &nodes, &excluded);
        let partition = &mut job.partitions[id];
        match (span, owner) {
          (None, _) => {
            debug!(job_id = %job_id, partition_id = id, "Nothing left to search");
            partition.status = PartitionStatus::Completed;
            partition.progress = 100.0;
          }
          (Some(span), Some(owner)) => {
            info!(job_id = %job_id, partition_id = id, from = %lost, to = %owner, "Reassigning partition");
            partition.span = span;
            partition.progress = 0.0;
            partition.owner_id = Some(owner);
            partition.status = PartitionStatus::Pending;
            partition.reassignments += 1;
            moved.push(id);
          }
          (Some(_), None) => {
            warn!(job_id = %job_id, partition_id = id, "No healthy node left for partition");
            partition.status = PartitionStatus::Failed;
          }
        }
      }
      (moved, settle(job))
    };
    self.cancel_remote(job_id, to_cancel).await;

    for id in moved {
      self.dispatch_partition(job_id, id).await;
    }
  }

  pub async fn cancel_job(&self, job_id: Uuid) -> Result<JobSummary> {
    let (summary, to_cancel) = {
      let mut jobs = self.jobs.lock().await;
      let job = jobs.get_mut(&job_id).ok_or(FleetError::JobNotFound(job_id))?;
      let mut open = Vec::new();
      if !job.status.is_terminal() {
        open = open_partitions(job);
        for partition in job.partitions.iter_mut().filter(|p| !p.status.is_terminal()) {
          partition.status = PartitionStatus::Cancelled;
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        info!(job_id = %job_id, "Job cancelled");
      }
      (job.summary(), open)
    };
    self.cancel_remote(job_id, to_cancel).await;
    Ok(summary)
  }

  pub async fn job(&self, job_id: Uuid) -> Result<Job> {
    self
      .jobs
      .lock()
      .await
      .get(&job_id)
      .cloned()
      .ok_or(FleetError::JobNotFound(job_id))
  }

  pub async fn job_summary(&self, job_id: Uuid) -> Result<JobSummary> {
    Ok(self.job(job_id).await?.summary())
  }

  /// Newest first.
  pub async fn list_jobs(&self) -> Vec<JobSummary> {
    let mut summaries: Vec<JobSummary> = self.jobs.lock().await.values().map(Job::summary).collect();
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    summaries
  }

  /// React to membership changes until shutdown.
  pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
    let coordinator = Arc::clone(self);
    let mut events = self.cluster.subscribe_membership();
    tokio::spawn(async move {
      let shutdown = coordinator.cluster.shutdown_token().clone();
      loop {
        let event = tokio::select! {
          _ = shutdown.cancelled() => break,
          event = events.recv() => event,
        };
        match event {
          Ok(MembershipEvent::Failed(node_id)) | Ok(MembershipEvent::Left(node_id)) => {
            coordinator.handle_node_loss(&node_id).await;
          }
          Ok(MembershipEvent::Joined(node)) => {
            debug!(node_id = %node.node_id, "Worker available");
          }
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, "Membership events dropped");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex as StdMutex;
  use std::time::Duration;

  use super::*;
  use crate::config::ClusterConfig;
  use crate::database::MemoryStore;
  use crate::election::run_election;
  use crate::metrics::StaticMetrics;
  use crate::rpc::JoinRequest;
  use tokio_util::sync::CancellationToken;

  #[derive(Default)]
  struct FakeDispatcher {
    sent: StdMutex<Vec<(String, DispatchRequest)>>,
    cancelled: StdMutex<Vec<(String, usize)>>,
    down: StdMutex<HashSet<String>>,
  }

  impl FakeDispatcher {
    fn sent(&self) -> Vec<(String, DispatchRequest)> {
      self.sent.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl PartitionDispatcher for FakeDispatcher {
    async fn dispatch(&self, endpoint: &str, request: &DispatchRequest) -> Result<DispatchAck> {
      if self.down.lock().unwrap().contains(endpoint) {
        return Err(FleetError::unreachable(endpoint, "down"));
      }
      self.sent.lock().unwrap().push((endpoint.to_string(), request.clone()));
      Ok(DispatchAck {
        accepted: true,
        queued: 1,
      })
    }

    async fn cancel(&self, endpoint: &str, request: &CancelPartitionRequest) -> Result<Ack> {
      self
        .cancelled
        .lock()
        .unwrap()
        .push((endpoint.to_string(), request.partition_id));
      Ok(Ack { success: true })
    }
  }

  fn md5(s: &str) -> String {
    HashAlgorithm::Md5.digest_hex(s)
  }

  fn node(port: u16) -> ClusterNode {
    let mut node = ClusterNode::new("worker", "127.0.0.1", port);
    node.load_metrics.cpu_cores = 4;
    node.load_metrics.ram_total_mb = 4000;
    node
  }

  /// A leader at port 1 with extra members at `ports`.
  async fn setup(ports: &[u16]) -> (Arc<JobCoordinator>, Arc<FakeDispatcher>, Arc<ClusterCoordinator>) {
    let cluster = Arc::new(ClusterCoordinator::new(
      ClusterConfig {
        port: 1,
        ..ClusterConfig::default()
      },
      Arc::new(MemoryStore::new()),
      PeerClient::new(Duration::from_millis(100)),
      Arc::new(StaticMetrics::idle()),
      CancellationToken::new(),
    ));
    assert!(run_election(&cluster).await);
    for port in ports {
      cluster
        .handle_join(JoinRequest { node_info: node(*port) })
        .await
        .unwrap();
    }
    let dispatcher = Arc::new(FakeDispatcher::default());
    let jobs = Arc::new(JobCoordinator::new(
      cluster.clone(),
      dispatcher.clone(),
      JobConfig::default(),
    ));
    (jobs, dispatcher, cluster)
  }

  fn range_job(hashes: Vec<String>, start: &str, end: &str, partitions: usize) -> JobRequest {
    let mut attack = AttackConfig::with_mode(AttackMode::BruteForce);
    attack.charset = "digits".into();
    attack.start_password = Some(start.into());
    attack.end_password = Some(end.into());
    JobRequest {
      hashes,
      hash_type: Some("md5".into()),
      partitions: Some(partitions),
      attack,
      ..JobRequest::default()
    }
  }

  #[test]
  fn plan_splits_ranges_round_robin() {
    let workers = vec![node(2), node(3), node(4)];
    let plan = plan_job(
      &range_job(vec![md5("1234")], "0000", "9999", 3),
      &workers,
      &JobConfig::default(),
    )
    .unwrap();
    assert_eq!(plan.partitions.len(), 3);
    let bounds: Vec<(String, String)> = plan
      .partitions
      .iter()
      .map(|p| match &p.span {
        PartitionSpan::Range {
          range_start, range_end, ..
        } => (range_start.clone(), range_end.clone()),
        PartitionSpan::Hashes { .. } => unreachable!(),
      })
      .collect();
    assert_eq!(bounds[0], ("0000".to_string(), "3333".to_string()));
    assert_eq!(bounds[1], ("3334".to_string(), "6666".to_string()));
    assert_eq!(bounds[2], ("6667".to_string(), "9999".to_string()));
    let owners: HashSet<_> = plan.partitions.iter().map(|p| p.owner_id.clone()).collect();
    assert_eq!(owners.len(), 3);
  }

  #[test]
  fn plan_rejects_oversized_and_unsupported_jobs() {
    let workers = vec![node(2)];
    let mut request = range_job(vec![md5("1")], "0", "9", 1);
    request.attack.start_password = None;
    request.attack.end_password = None;
    request.attack.charset = "all".into();
    request.attack.min_length = 8;
    request.attack.max_length = 12;
    let err = plan_job(&request, &workers, &JobConfig::default()).unwrap_err();
    assert!(matches!(err, FleetError::PartitionOverflow { .. }));

    let mut bcrypt = range_job(vec!["$2b$12$abcdefghijklmnopqrstuv".into()], "0", "9", 1);
    bcrypt.hash_type = None;
    assert!(matches!(
      plan_job(&bcrypt, &workers, &JobConfig::default()),
      Err(FleetError::UnsupportedConfiguration(_))
    ));

    let mismatch = range_job(vec![md5("1")], "00", "999", 1);
    assert!(matches!(
      plan_job(&mismatch, &workers, &JobConfig::default()),
      Err(FleetError::RangeMismatch { .. })
    ));
    assert!(matches!(
      plan_job(&range_job(vec![md5("1")], "0", "9", 1), &[], &JobConfig::default()),
      Err(FleetError::NoWorkersAvailable)
    ));
  }

  #[test]
  fn plan_splits_hash_lists_for_dictionary_jobs() {
    let workers = vec![node(2), node(3)];
    let hashes: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| md5(s)).collect();
    let request = JobRequest {
      hashes: hashes.clone(),
      attack: AttackConfig::with_mode(AttackMode::Dictionary),
      ..JobRequest::default()
    };
    let plan = plan_job(&request, &workers, &JobConfig::default()).unwrap();
    assert_eq!(plan.hash_type, HashAlgorithm::Md5);
    let mut covered: Vec<String> = plan
      .partitions
      .iter()
      .flat_map(|p| match &p.span {
        PartitionSpan::Hashes { hashes } => hashes.clone(),
        PartitionSpan::Range { .. } => Vec::new(),
      })
      .collect();
    covered.sort();
    let mut expected = hashes;
    expected.sort();
    assert_eq!(covered, expected);
  }

  #[test]
  fn remaining_span_resumes_after_last_candidate() {
    let range = partitioner::split_custom_range("0000", "0999", "0123456789", 1).unwrap();
    let mut partition = WorkPartition::new(0, Some("a".into()), range[0].clone().into_span());
    partition.last_candidate = Some("0499".into());
    match remaining_span(&partition, &HashMap::new()).unwrap() {
      PartitionSpan::Range {
        start_index,
        range_start,
        range_end,
        ..
      } => {
        assert_eq!(start_index, BigUint::from(500u32));
        assert_eq!(range_start, "0500");
        assert_eq!(range_end, "0999");
      }
      PartitionSpan::Hashes { .. } => panic!("expected a range"),
    }

    partition.last_candidate = Some("0999".into());
    assert!(remaining_span(&partition, &HashMap::new()).is_none());

    let hashes = WorkPartition::new(1, None, PartitionSpan::Hashes {
      hashes: vec!["x".into(), "y".into()],
    });
    let found = HashMap::from([("x".to_string(), "pw".to_string())]);
    assert_eq!(
      remaining_span(&hashes, &found),
      Some(PartitionSpan::Hashes {
        hashes: vec!["y".into()]
      })
    );
  }

  #[tokio::test]
  async fn two_partitions_both_succeed() {
    let (jobs, dispatcher, _cluster) = setup(&[2]).await;
    let targets = vec![md5("0042"), md5("7777")];
    let job_id = jobs
      .create_job(range_job(targets.clone(), "0000", "9999", 2))
      .await
      .unwrap();
    assert_eq!(jobs.job(job_id).await.unwrap().status, JobStatus::Pending);

    jobs.dispatch_job(job_id).await;
    let job = jobs.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(dispatcher.sent().len(), 2);

    for (partition, password) in job.partitions.iter().zip(["0042", "7777"]) {
      let owner = partition.owner_id.clone().unwrap();
      jobs
        .handle_found(job_id, PasswordFoundReport {
          partition_id: partition.partition_id,
          node_id: owner.clone(),
          hash: md5(password),
          password: password.into(),
        })
        .await
        .unwrap();
      jobs
        .handle_status(job_id, StatusReport {
          partition_id: partition.partition_id,
          node_id: owner,
          status: PartitionStatus::Completed,
          attempts: 50,
          last_candidate: Some(password.into()),
          error: None,
        })
        .await
        .unwrap();
    }

    let summary = jobs.job_summary(job_id).await.unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.found_passwords.len(), 2);
    assert_eq!(summary.progress, 100.0);
  }

  #[tokio::test]
  async fn exhausted_partitions_complete_without_finds() {
    let (jobs, _dispatcher, _cluster) = setup(&[]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("nope")], "00", "99", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let job = jobs.job(job_id).await.unwrap();
    for partition in &job.partitions {
      jobs
        .handle_status(job_id, StatusReport {
          partition_id: partition.partition_id,
          node_id: partition.owner_id.clone().unwrap(),
          status: PartitionStatus::Completed,
          attempts: 50,
          last_candidate: None,
          error: None,
        })
        .await
        .unwrap();
    }
    let summary = jobs.job_summary(job_id).await.unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert!(summary.found_passwords.is_empty());
  }

  #[tokio::test]
  async fn finding_every_target_cancels_the_rest() {
    let (jobs, dispatcher, _cluster) = setup(&[2]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("0042")], "0000", "9999", 4))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let job = jobs.job(job_id).await.unwrap();
    let first = &job.partitions[0];
    jobs
      .handle_found(job_id, PasswordFoundReport {
        partition_id: 0,
        node_id: first.owner_id.clone().unwrap(),
        hash: md5("0042"),
        password: "0042".into(),
      })
      .await
      .unwrap();

    let job = jobs.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.partitions.iter().all(|p| p.status == PartitionStatus::Cancelled));
    assert_eq!(dispatcher.cancelled.lock().unwrap().len(), 4);
  }

  #[tokio::test]
  async fn wrong_password_and_stale_owner_reports_are_ignored() {
    let (jobs, _dispatcher, _cluster) = setup(&[2]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("0042")], "0000", "9999", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;

    jobs
      .handle_found(job_id, PasswordFoundReport {
        partition_id: 0,
        node_id: "anyone".into(),
        hash: md5("0042"),
        password: "0043".into(),
      })
      .await
      .unwrap();
    jobs
      .handle_status(job_id, StatusReport {
        partition_id: 0,
        node_id: "not-the-owner".into(),
        status: PartitionStatus::Completed,
        attempts: 1,
        last_candidate: None,
        error: None,
      })
      .await
      .unwrap();

    let job = jobs.job(job_id).await.unwrap();
    assert!(job.found_passwords.is_empty());
    assert_eq!(job.partitions[0].status, PartitionStatus::Running);
    assert!(matches!(
      jobs.handle_progress(Uuid::new_v4(), ProgressReport {
        partition_id: 0,
        node_id: "x".into(),
        percent: 1.0,
        attempts: 1,
        current: "0".into(),
      })
      .await,
      Err(FleetError::JobNotFound(_))
    ));
  }

  #[tokio::test]
  async fn lost_node_partition_resumes_elsewhere() {
    let (jobs, dispatcher, cluster) = setup(&[2]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("9999")], "0000", "9999", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;

    let job = jobs.job(job_id).await.unwrap();
    let leader_id = cluster.local_id().to_string();
    let lost = job
      .partitions
      .iter()
      .find(|p| p.owner_id.as_deref() != Some(leader_id.as_str()))
      .unwrap()
      .clone();
    let lost_owner = lost.owner_id.clone().unwrap();
    // Partition 0 covers 0000-4999, partition 1 covers 5000-9999.
    let (current, resume, end) = if lost.partition_id == 0 {
      ("1999", "2000", "4999")
    } else {
      ("6999", "7000", "9999")
    };
    jobs
      .handle_progress(job_id, ProgressReport {
        partition_id: lost.partition_id,
        node_id: lost_owner.clone(),
        percent: 40.0,
        attempts: 2000,
        current: current.into(),
      })
      .await
      .unwrap();

    cluster.handle_leave(&lost_owner).await.unwrap();
    jobs.handle_node_loss(&lost_owner).await;

    let job = jobs.job(job_id).await.unwrap();
    let moved = &job.partitions[lost.partition_id];
    assert_eq!(moved.owner_id.as_deref(), Some(leader_id.as_str()));
    assert_eq!(moved.status, PartitionStatus::Running);
    assert_eq!(moved.reassignments, 1);
    let last = dispatcher.sent().pop().unwrap().1;
    assert_eq!(last.range_start.as_deref(), Some(resume));
    assert_eq!(last.range_end.as_deref(), Some(end));
  }

  fn status(partition: &WorkPartition, status: PartitionStatus, last: Option<&str>) -> StatusReport {
    StatusReport {
      partition_id: partition.partition_id,
      node_id: partition.owner_id.clone().unwrap(),
      status,
      attempts: 10,
      last_candidate: last.map(String::from),
      error: None,
    }
  }

  /// `(leader's partition, the other node's partition)` of a two-way job.
  fn split_by_owner(job: &Job, leader_id: &str) -> (WorkPartition, WorkPartition) {
    let (mine, theirs): (Vec<_>, Vec<_>) = job
      .partitions
      .iter()
      .cloned()
      .partition(|p| p.owner_id.as_deref() == Some(leader_id));
    (mine[0].clone(), theirs[0].clone())
  }

  #[tokio::test]
  async fn losing_the_last_open_partition_reassigns_it() {
    let (jobs, dispatcher, cluster) = setup(&[2]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("nope")], "0000", "9999", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let leader_id = cluster.local_id().to_string();
    let (mine, theirs) = split_by_owner(&jobs.job(job_id).await.unwrap(), &leader_id);

    jobs
      .handle_status(job_id, status(&mine, PartitionStatus::Completed, None))
      .await
      .unwrap();
    let lost_owner = theirs.owner_id.clone().unwrap();
    cluster.handle_leave(&lost_owner).await.unwrap();
    jobs.handle_node_loss(&lost_owner).await;

    let job = jobs.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    let moved = &job.partitions[theirs.partition_id];
    assert_eq!(moved.owner_id.as_deref(), Some(leader_id.as_str()));
    assert_eq!(moved.status, PartitionStatus::Running);
    assert_eq!(dispatcher.sent().len(), 3);

    jobs
      .handle_status(job_id, status(moved, PartitionStatus::Completed, None))
      .await
      .unwrap();
    assert_eq!(jobs.job(job_id).await.unwrap().status, JobStatus::Completed);
  }

  #[tokio::test]
  async fn worker_side_cancel_resumes_the_partition_elsewhere() {
    let (jobs, dispatcher, cluster) = setup(&[2]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("9999")], "0000", "9999", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let leader_id = cluster.local_id().to_string();
    let (mine, theirs) = split_by_owner(&jobs.job(job_id).await.unwrap(), &leader_id);
    // Partition 0 covers 0000-4999, partition 1 covers 5000-9999.
    let (last, resume, end) = if theirs.partition_id == 0 {
      ("2999", "3000", "4999")
    } else {
      ("5999", "6000", "9999")
    };

    jobs
      .handle_status(job_id, status(&mine, PartitionStatus::Completed, None))
      .await
      .unwrap();
    jobs
      .handle_status(job_id, status(&theirs, PartitionStatus::Cancelled, Some(last)))
      .await
      .unwrap();

    let job = jobs.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    let moved = &job.partitions[theirs.partition_id];
    assert_eq!(moved.status, PartitionStatus::Running);
    assert_eq!(moved.owner_id.as_deref(), Some(leader_id.as_str()));
    let (endpoint, request) = dispatcher.sent().pop().unwrap();
    assert_eq!(endpoint, "127.0.0.1:1");
    assert_eq!(request.range_start.as_deref(), Some(resume));
    assert_eq!(request.range_end.as_deref(), Some(end));
  }

  #[tokio::test]
  async fn cancel_reports_after_a_job_cancel_are_ignored() {
    let (jobs, dispatcher, _cluster) = setup(&[]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("1")], "0", "9", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let partition = jobs.job(job_id).await.unwrap().partitions[0].clone();
    jobs.cancel_job(job_id).await.unwrap();

    jobs
      .handle_status(job_id, status(&partition, PartitionStatus::Cancelled, Some("3")))
      .await
      .unwrap();
    let job = jobs.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.partitions[0].reassignments, 0);
    assert_eq!(dispatcher.sent().len(), 2);
  }

  #[tokio::test]
  async fn failure_with_no_spare_node_fails_the_job() {
    let (jobs, _dispatcher, _cluster) = setup(&[]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("nope")], "00", "99", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let job = jobs.job(job_id).await.unwrap();

    jobs
      .handle_status(job_id, status(&job.partitions[0], PartitionStatus::Completed, None))
      .await
      .unwrap();
    let mut failed = status(&job.partitions[1], PartitionStatus::Failed, None);
    failed.error = Some("wordlist missing".into());
    jobs.handle_status(job_id, failed).await.unwrap();

    let job = jobs.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.partitions[1].status, PartitionStatus::Failed);
  }

  #[tokio::test]
  async fn lost_hash_list_partition_moves_without_found_hashes() {
    let (jobs, dispatcher, cluster) = setup(&[2]).await;
    let hashes: Vec<String> = ["alpha", "bravo", "charlie", "delta"].iter().map(|s| md5(s)).collect();
    let job_id = jobs
      .create_job(JobRequest {
        hashes,
        hash_type: Some("md5".into()),
        attack: AttackConfig::with_mode(AttackMode::Dictionary),
        ..JobRequest::default()
      })
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let leader_id = cluster.local_id().to_string();
    let (_, theirs) = split_by_owner(&jobs.job(job_id).await.unwrap(), &leader_id);
    let PartitionSpan::Hashes { hashes: assigned } = theirs.span.clone() else {
      panic!("expected a hash list");
    };
    assert_eq!(assigned.len(), 2);
    let cracked = ["alpha", "bravo", "charlie", "delta"]
      .into_iter()
      .find(|w| md5(w) == assigned[0])
      .unwrap();

    let lost_owner = theirs.owner_id.clone().unwrap();
    jobs
      .handle_found(job_id, PasswordFoundReport {
        partition_id: theirs.partition_id,
        node_id: lost_owner.clone(),
        hash: assigned[0].clone(),
        password: cracked.into(),
      })
      .await
      .unwrap();
    cluster.handle_leave(&lost_owner).await.unwrap();
    jobs.handle_node_loss(&lost_owner).await;

    let job = jobs.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    let moved = &job.partitions[theirs.partition_id];
    assert_eq!(moved.owner_id.as_deref(), Some(leader_id.as_str()));
    assert_eq!(moved.span, PartitionSpan::Hashes {
      hashes: vec![assigned[1].clone()]
    });
    let (_, request) = dispatcher.sent().pop().unwrap();
    assert_eq!(request.hashes, vec![assigned[1].clone()]);
  }

  #[tokio::test]
  async fn unreachable_owner_gets_replaced_at_dispatch() {
    let (jobs, dispatcher, _cluster) = setup(&[2]).await;
    dispatcher.down.lock().unwrap().insert("127.0.0.1:2".into());
    let job_id = jobs
      .create_job(range_job(vec![md5("1")], "0", "9", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;

    let sent = dispatcher.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(endpoint, _)| endpoint == "127.0.0.1:1"));
    let job = jobs.job(job_id).await.unwrap();
    assert!(job.partitions.iter().all(|p| p.status == PartitionStatus::Running));
  }

  #[tokio::test]
  async fn cancel_marks_everything_cancelled() {
    let (jobs, dispatcher, _cluster) = setup(&[]).await;
    let job_id = jobs
      .create_job(range_job(vec![md5("1")], "0", "9", 2))
      .await
      .unwrap();
    jobs.dispatch_job(job_id).await;
    let summary = jobs.cancel_job(job_id).await.unwrap();
    assert_eq!(summary.status, JobStatus::Cancelled);
    assert_eq!(dispatcher.cancelled.lock().unwrap().len(), 2);
    assert!(matches!(
      jobs.cancel_job(Uuid::new_v4()).await,
      Err(FleetError::JobNotFound(_))
    ));
  }

  #[tokio::test]
  async fn followers_refuse_jobs() {
    let cluster = Arc::new(ClusterCoordinator::new(
      ClusterConfig::default(),
      Arc::new(MemoryStore::new()),
      PeerClient::new(Duration::from_millis(100)),
      Arc::new(StaticMetrics::idle()),
      CancellationToken::new(),
    ));
    let jobs = JobCoordinator::new(cluster, Arc::new(FakeDispatcher::default()), JobConfig::default());
    let err = jobs
      .create_job(range_job(vec![md5("1")], "0", "9", 1))
      .await
      .unwrap_err();
    assert!(matches!(err, FleetError::NotLeader { .. }));
  }
}
