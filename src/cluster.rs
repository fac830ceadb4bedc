//! Cluster membership, leadership and failure detection.
//!
//! [`ClusterCore`] is the synchronous state machine: every transition is a
//! plain method so it can be tested without a network. [`ClusterCoordinator`]
//! owns the core behind a single mutex and does all I/O (RPC, persistence,
//! notifications) outside of it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::database::ClusterStore;
use crate::error::{FleetError, Result};
use crate::messaging::PeerClient;
use crate::metrics::SystemMetrics;
use crate::models::{
  ClusterNode, ClusterState, FailoverEvent, FailoverKind, HealthStatus, KnownNode, LoadMetrics, NodeRole,
};
use crate::rpc::{
  HeartbeatRequest, HeartbeatResponse, JoinRequest, JoinResponse, LeaveResponse, VoteRequest, VoteResponse,
};
use crate::{election, heartbeat};

/// Membership changes observed by the leader.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipEvent {
  Joined(ClusterNode),
  Left(String),
  Failed(String),
}

#[derive(Debug, Clone)]
pub struct ElectionTicket {
  pub term: u64,
  pub request: VoteRequest,
  pub peers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTally {
  Pending,
  Won,
  /// The election was superseded by a higher term or another leader.
  Abandoned,
}

/// Result of one heartbeat exchange with a peer, as seen by the leader.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerUpdate {
  Acked,
  Discovered(ClusterNode),
  Recovered(ClusterNode),
  Degraded(String),
  Failed(ClusterNode),
  Unreachable,
  SteppedDown { term: u64 },
}

pub struct ClusterCore {
  local_id: String,
  local_endpoint: String,
  role: NodeRole,
  current_term: u64,
  voted_for: Option<String>,
  votes: HashSet<String>,
  previous_leader: Option<String>,
  state: ClusterState,
  peers: BTreeSet<String>,
  missed: HashMap<String, u32>,
  last_heartbeat: Instant,
}

impl ClusterCore {
  pub fn new(local: ClusterNode, seeds: &[String]) -> Self {
    let local_id = local.node_id.clone();
    let local_endpoint = local.endpoint();
    let mut state = ClusterState::default();
    state.nodes.insert(local_id.clone(), local);

    let mut core = Self {
      local_id,
      local_endpoint,
      role: NodeRole::Follower,
      current_term: 0,
      voted_for: None,
      votes: HashSet::new(),
      previous_leader: None,
      state,
      peers: BTreeSet::new(),
      missed: HashMap::new(),
      last_heartbeat: Instant::now(),
    };
    for seed in seeds {
      core.add_peer(seed);
    }
    core
  }

  pub fn local_id(&self) -> &str {
    &self.local_id
  }

  pub fn role(&self) -> NodeRole {
    self.role
  }

  pub fn is_leader(&self) -> bool {
    self.role == NodeRole::Leader
  }

  pub fn current_term(&self) -> u64 {
    self.current_term
  }

  pub fn voted_for(&self) -> Option<&str> {
    self.voted_for.as_deref()
  }

  pub fn leader_id(&self) -> Option<&str> {
    self.state.leader_node_id.as_deref()
  }

  pub fn leader_address(&self) -> Option<String> {
    self.state.leader_address()
  }

  pub fn peers(&self) -> Vec<String> {
    self.peers.iter().cloned().collect()
  }

  pub fn node(&self, node_id: &str) -> Option<&ClusterNode> {
    self.state.nodes.get(node_id)
  }

  pub fn add_peer(&mut self, endpoint: &str) {
    if endpoint != self.local_endpoint && !endpoint.is_empty() {
      self.peers.insert(endpoint.to_string());
    }
  }

  /// Discovered peers plus this node.
  pub fn cluster_size(&self) -> usize {
    self.peers.len() + 1
  }

  pub fn quorum(&self) -> usize {
    self.cluster_size() / 2 + 1
  }

  pub fn has_majority(&self) -> bool {
    self.votes.len() >= self.quorum()
  }

  /// Seed the core from persisted state. The snapshot term is a floor; the
  /// leader pointer is not trusted after a restart.
  pub fn restore(&mut self, snapshot: Option<ClusterState>, known: &[KnownNode]) {
    if let Some(snapshot) = snapshot {
      if snapshot.term > self.current_term {
        self.current_term = snapshot.term;
        self.state.term = snapshot.term;
      }
      for node in snapshot.nodes.values() {
        self.add_peer(&node.endpoint());
      }
    }
    for node in known {
      self.add_peer(&node.endpoint());
    }
  }

  pub fn reset_election_timer(&mut self) {
    self.last_heartbeat = Instant::now();
  }

  pub fn election_due(&self, timeout: Duration) -> bool {
    self.role != NodeRole::Leader && self.last_heartbeat.elapsed() > timeout
  }

  pub fn start_election(&mut self) -> ElectionTicket {
    if self.state.leader_node_id.is_some() {
      self.previous_leader = self.state.leader_node_id.clone();
    }
    self.current_term += 1;
    self.role = NodeRole::Candidate;
    self.voted_for = Some(self.local_id.clone());
    self.votes = HashSet::from([self.local_id.clone()]);
    self.state.leader_node_id = None;
    self.state.term = self.current_term;
    self.last_heartbeat = Instant::now();
    info!(term = self.current_term, peers = self.peers.len(), "Starting election");

    ElectionTicket {
      term: self.current_term,
      request: VoteRequest {
        term: self.current_term,
        candidate_id: self.local_id.clone(),
      },
      peers: self.peers(),
    }
  }

  /// Tally one vote response for the election of `term`.
  pub fn record_vote(&mut self, term: u64, voter: &str, response: &VoteResponse) -> VoteTally {
    if response.term > self.current_term {
      self.become_follower(response.term, None);
      return VoteTally::Abandoned;
    }
    if self.role != NodeRole::Candidate || self.current_term != term {
      return VoteTally::Abandoned;
    }
    if response.vote_granted {
      self.votes.insert(voter.to_string());
      debug!(voter, term, votes = self.votes.len(), "Vote granted");
    }
    if self.has_majority() {
      VoteTally::Won
    } else {
      VoteTally::Pending
    }
  }

  /// Close the election of `term`: become leader on a majority, otherwise
  /// fall back to follower and wait out the timeout again.
  pub fn conclude_election(&mut self, term: u64) -> Option<FailoverEvent> {
    if self.role != NodeRole::Candidate || self.current_term != term {
      return None;
    }
    if self.has_majority() {
      return Some(self.become_leader());
    }

    let failure = FleetError::ElectionFailure {
      term,
      votes: self.votes.len(),
      needed: self.quorum(),
    };
    warn!(term, "{}", failure);
    self.role = NodeRole::Follower;
    self.votes.clear();
    self.last_heartbeat = Instant::now();
    Some(FailoverEvent::new(FailoverKind::ElectionFailed, failure.to_string()))
  }

  fn become_leader(&mut self) -> FailoverEvent {
    self.role = NodeRole::Leader;
    self.state.leader_node_id = Some(self.local_id.clone());
    self.missed.clear();
    // Followers' last_seen values were written by the previous leader.
    let now = Utc::now();
    for node in self.state.nodes.values_mut() {
      node.last_seen = now;
    }
    self.refresh_local(None);
    info!(term = self.current_term, votes = self.votes.len(), "Became leader");

    FailoverEvent::new(
      FailoverKind::LeaderElected,
      format!(
        "won term {} with {} of {} votes",
        self.current_term,
        self.votes.len(),
        self.cluster_size()
      ),
    )
    .with_leaders(self.previous_leader.clone(), Some(self.local_id.clone()))
  }

  fn become_follower(&mut self, term: u64, leader_id: Option<String>) {
    if term > self.current_term {
      self.current_term = term;
      self.voted_for = None;
    }
    if self.role != NodeRole::Follower {
      info!(term = self.current_term, role = %self.role, "Stepping down to follower");
    }
    self.role = NodeRole::Follower;
    self.votes.clear();
    self.state.leader_node_id = leader_id;
    self.state.term = self.current_term;
  }

  pub fn handle_vote_request(&mut self, request: &VoteRequest) -> VoteResponse {
    if request.term > self.current_term {
      self.become_follower(request.term, None);
    }

    let grant = request.term == self.current_term
      && self
        .voted_for
        .as_ref()
        .is_none_or(|v| *v == request.candidate_id);
    if grant {
      self.voted_for = Some(request.candidate_id.clone());
      self.last_heartbeat = Instant::now();
    }
    debug!(
      candidate = %request.candidate_id,
      term = request.term,
      grant,
      "Vote requested"
    );

    VoteResponse {
      term: self.current_term,
      vote_granted: grant,
    }
  }

  /// Apply a leader heartbeat. Stale terms are refused; otherwise the
  /// leader's view of the membership replaces the local one.
  pub fn handle_heartbeat(&mut self, request: &HeartbeatRequest) -> HeartbeatResponse {
    if request.term < self.current_term {
      debug!(term = request.term, current = self.current_term, "Ignoring stale heartbeat");
      return HeartbeatResponse {
        term: self.current_term,
        success: false,
        node_info: self.local_node(),
      };
    }

    let leader_changed = self.leader_id() != Some(request.leader_id.as_str());
    self.become_follower(request.term, Some(request.leader_id.clone()));
    self.last_heartbeat = Instant::now();
    self.state.last_heartbeat = Utc::now();

    let local = self.state.nodes.remove(&self.local_id);
    self.state.nodes = request
      .cluster_state
      .nodes
      .iter()
      .filter(|(id, _)| **id != self.local_id)
      .map(|(id, node)| (id.clone(), node.clone()))
      .collect();
    if let Some(local) = local {
      self.state.nodes.insert(self.local_id.clone(), local);
    }
    self.peers = self
      .state
      .nodes
      .values()
      .map(ClusterNode::endpoint)
      .filter(|e| *e != self.local_endpoint)
      .collect();
    self.refresh_local(None);

    if leader_changed {
      info!(leader = %request.leader_id, term = request.term, "Following new leader");
    }

    HeartbeatResponse {
      term: self.current_term,
      success: true,
      node_info: self.local_node(),
    }
  }

  /// Leader-only: admit a node.
  pub fn handle_join(&mut self, mut node: ClusterNode) -> Result<(JoinResponse, ClusterNode, FailoverEvent)> {
    self.require_leader()?;
    node.last_seen = Utc::now();
    node.health_status = HealthStatus::Healthy;
    node.role = NodeRole::Follower;
    node.current_term = self.current_term;
    node.missed_heartbeats = 0;
    let endpoint = node.endpoint();
    self.missed.remove(&endpoint);
    self.add_peer(&endpoint);
    let event = FailoverEvent::new(
      FailoverKind::NodeJoined,
      format!("{} joined from {}", node.node_id, endpoint),
    );
    info!(node_id = %node.node_id, %endpoint, "Node joined");
    self.state.nodes.insert(node.node_id.clone(), node.clone());

    Ok((
      JoinResponse {
        success: true,
        leader_id: Some(self.local_id.clone()),
        term: self.current_term,
        cluster_state: self.snapshot(),
      },
      node,
      event,
    ))
  }

  /// Leader-only: remove a node from the membership.
  pub fn handle_leave(&mut self, node_id: &str) -> Result<(ClusterNode, FailoverEvent)> {
    self.require_leader()?;
    if node_id == self.local_id {
      return Err(FleetError::InvalidArgument("the leader cannot remove itself".into()));
    }
    let node = self
      .state
      .nodes
      .remove(node_id)
      .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;
    let endpoint = node.endpoint();
    self.peers.remove(&endpoint);
    self.missed.remove(&endpoint);
    info!(node_id, %endpoint, "Node left");
    let event = FailoverEvent::new(FailoverKind::NodeLeft, format!("{} left the cluster", node_id));
    Ok((node, event))
  }

  fn require_leader(&self) -> Result<()> {
    if self.is_leader() {
      Ok(())
    } else {
      Err(FleetError::NotLeader {
        leader_id: self.state.leader_node_id.clone(),
        leader_address: self.leader_address(),
      })
    }
  }

  /// Heartbeat payload and targets, or `None` when not leading.
  pub fn heartbeat_round(&mut self) -> Option<(HeartbeatRequest, Vec<String>)> {
    if !self.is_leader() {
      return None;
    }
    self.state.last_heartbeat = Utc::now();
    let request = HeartbeatRequest {
      term: self.current_term,
      leader_id: self.local_id.clone(),
      cluster_state: self.snapshot(),
    };
    Some((request, self.peers()))
  }

  pub fn record_heartbeat_ack(&mut self, endpoint: &str, response: HeartbeatResponse) -> PeerUpdate {
    if response.term > self.current_term {
      warn!(peer = endpoint, peer_term = response.term, "Peer has higher term, stepping down");
      self.become_follower(response.term, None);
      return PeerUpdate::SteppedDown { term: response.term };
    }

    self.missed.remove(endpoint);
    let mut node = response.node_info;
    node.last_seen = Utc::now();
    node.health_status = HealthStatus::Healthy;
    node.missed_heartbeats = 0;
    // The endpoint we reach the node at wins over what it advertises.
    self.add_peer(endpoint);

    let previous = self.state.nodes.insert(node.node_id.clone(), node.clone());
    match previous.map(|p| p.health_status) {
      None => PeerUpdate::Discovered(node),
      Some(HealthStatus::Failed) | Some(HealthStatus::Degraded) => {
        info!(node_id = %node.node_id, "Node recovered");
        PeerUpdate::Recovered(node)
      }
      Some(HealthStatus::Healthy) => PeerUpdate::Acked,
    }
  }

  /// One failed heartbeat: first miss degrades, `max_missed` fails.
  pub fn record_heartbeat_miss(&mut self, endpoint: &str, max_missed: u32) -> PeerUpdate {
    let misses = {
      let count = self.missed.entry(endpoint.to_string()).or_insert(0);
      *count += 1;
      *count
    };

    let Some(node) = self.state.nodes.values_mut().find(|n| n.endpoint() == endpoint) else {
      return PeerUpdate::Unreachable;
    };
    node.missed_heartbeats = misses;
    match node.health_status {
      HealthStatus::Failed => PeerUpdate::Unreachable,
      _ if misses >= max_missed.max(1) => {
        node.health_status = HealthStatus::Failed;
        warn!(node_id = %node.node_id, misses, "Node failed after missed heartbeats");
        PeerUpdate::Failed(node.clone())
      }
      HealthStatus::Healthy => {
        node.health_status = HealthStatus::Degraded;
        PeerUpdate::Degraded(node.node_id.clone())
      }
      HealthStatus::Degraded => PeerUpdate::Unreachable,
    }
  }

  /// Mark every node not seen within `stale_after` as failed.
  pub fn sweep_stale(&mut self, stale_after: Duration) -> Vec<ClusterNode> {
    let now = Utc::now();
    let mut failed = Vec::new();
    for node in self.state.nodes.values_mut() {
      if node.node_id == self.local_id || node.health_status == HealthStatus::Failed {
        continue;
      }
      let stale = (now - node.last_seen)
        .to_std()
        .map(|age| age > stale_after)
        .unwrap_or(false);
      if stale {
        warn!(node_id = %node.node_id, "Node not seen within {:?}, marking failed", stale_after);
        node.health_status = HealthStatus::Failed;
        failed.push(node.clone());
      }
    }
    failed
  }

  /// Share of healthy nodes, in percent.
  pub fn health_percentage(&self) -> f64 {
    if self.state.nodes.is_empty() {
      return 100.0;
    }
    100.0 * self.state.healthy_count() as f64 / self.state.nodes.len() as f64
  }

  pub fn refresh_local(&mut self, metrics: Option<LoadMetrics>) {
    let role = self.role;
    let term = self.current_term;
    if let Some(local) = self.state.nodes.get_mut(&self.local_id) {
      local.role = role;
      local.current_term = term;
      local.last_seen = Utc::now();
      local.health_status = HealthStatus::Healthy;
      if let Some(metrics) = metrics {
        local.load_metrics = metrics;
      }
    }
  }

  pub fn local_node(&self) -> ClusterNode {
    let mut node = self
      .state
      .nodes
      .get(&self.local_id)
      .cloned()
      .unwrap_or_else(|| {
        let (address, port) = split_endpoint(&self.local_endpoint);
        let mut node = ClusterNode::new("", &address, port);
        node.node_id = self.local_id.clone();
        node
      });
    node.role = self.role;
    node.current_term = self.current_term;
    node
  }

  pub fn snapshot(&self) -> ClusterState {
    let mut state = self.state.clone();
    state.term = self.current_term;
    state.sync_timestamp = Utc::now();
    if let Some(local) = state.nodes.get_mut(&self.local_id) {
      local.role = self.role;
      local.current_term = self.current_term;
    }
    state
  }

  pub fn healthy_nodes(&self) -> Vec<ClusterNode> {
    let mut nodes: Vec<ClusterNode> = self
      .state
      .nodes
      .values()
      .filter(|n| n.is_healthy())
      .cloned()
      .collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    nodes
  }
}

fn split_endpoint(endpoint: &str) -> (String, u16) {
  match endpoint.rsplit_once(':') {
    Some((address, port)) => (address.to_string(), port.parse().unwrap_or(0)),
    None => (endpoint.to_string(), 0),
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
  pub node_id: String,
  pub endpoint: String,
  pub role: NodeRole,
  pub health_status: HealthStatus,
  pub load_metrics: LoadMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMetrics {
  pub leader_id: Option<String>,
  pub term: u64,
  pub total_nodes: usize,
  pub healthy_nodes: usize,
  pub health_percentage: f64,
  pub avg_cpu_usage: f64,
  pub avg_memory_usage: f64,
  pub avg_disk_usage: f64,
  pub nodes: Vec<NodeMetrics>,
}

impl ClusterMetrics {
  pub fn from_state(state: &ClusterState) -> Self {
    let total = state.nodes.len();
    let avg = |f: fn(&LoadMetrics) -> f64| {
      if total == 0 {
        0.0
      } else {
        state.nodes.values().map(|n| f(&n.load_metrics)).sum::<f64>() / total as f64
      }
    };
    let healthy = state.healthy_count();
    let mut nodes: Vec<NodeMetrics> = state
      .nodes
      .values()
      .map(|n| NodeMetrics {
        node_id: n.node_id.clone(),
        endpoint: n.endpoint(),
        role: n.role,
        health_status: n.health_status,
        load_metrics: n.load_metrics.clone(),
      })
      .collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    Self {
      leader_id: state.leader_node_id.clone(),
      term: state.term,
      total_nodes: total,
      healthy_nodes: healthy,
      health_percentage: if total == 0 {
        100.0
      } else {
        100.0 * healthy as f64 / total as f64
      },
      avg_cpu_usage: avg(|m| m.cpu_usage),
      avg_memory_usage: avg(|m| m.memory_usage),
      avg_disk_usage: avg(|m| m.disk_usage),
      nodes,
    }
  }
}

pub struct ClusterCoordinator {
  config: ClusterConfig,
  local_id: String,
  local_endpoint: String,
  core: Mutex<ClusterCore>,
  store: Arc<dyn ClusterStore>,
  client: PeerClient,
  metrics: Arc<dyn SystemMetrics>,
  role_tx: watch::Sender<NodeRole>,
  membership_tx: broadcast::Sender<MembershipEvent>,
  shutdown: CancellationToken,
}

impl ClusterCoordinator {
  pub fn new(
    config: ClusterConfig,
    store: Arc<dyn ClusterStore>,
    client: PeerClient,
    metrics: Arc<dyn SystemMetrics>,
    shutdown: CancellationToken,
  ) -> Self {
    let mut local = ClusterNode::new(&config.hostname, &config.address, config.port);
    local.load_metrics = metrics.sample();
    let local_id = local.node_id.clone();
    let local_endpoint = local.endpoint();
    let core = ClusterCore::new(local, &config.seeds);
    let (role_tx, _) = watch::channel(NodeRole::Follower);
    let (membership_tx, _) = broadcast::channel(64);

    Self {
      config,
      local_id,
      local_endpoint,
      core: Mutex::new(core),
      store,
      client,
      metrics,
      role_tx,
      membership_tx,
      shutdown,
    }
  }

  pub fn local_id(&self) -> &str {
    &self.local_id
  }

  pub fn local_endpoint(&self) -> &str {
    &self.local_endpoint
  }

  pub fn config(&self) -> &ClusterConfig {
    &self.config
  }

  pub fn client(&self) -> &PeerClient {
    &self.client
  }

  pub fn store(&self) -> &Arc<dyn ClusterStore> {
    &self.store
  }

  pub fn shutdown_token(&self) -> &CancellationToken {
    &self.shutdown
  }

  /// Run `f` under the state lock and publish the resulting role.
  pub async fn with_core<R>(&self, f: impl FnOnce(&mut ClusterCore) -> R) -> R {
    let mut core = self.core.lock().await;
    let result = f(&mut core);
    let role = core.role();
    drop(core);
    self.role_tx.send_if_modified(|current| {
      if *current != role {
        *current = role;
        true
      } else {
        false
      }
    });
    result
  }

  pub fn role(&self) -> NodeRole {
    *self.role_tx.borrow()
  }

  pub fn is_leader(&self) -> bool {
    self.role() == NodeRole::Leader
  }

  pub fn subscribe_role(&self) -> watch::Receiver<NodeRole> {
    self.role_tx.subscribe()
  }

  pub fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
    self.membership_tx.subscribe()
  }

  pub fn sample_metrics(&self) -> LoadMetrics {
    self.metrics.sample()
  }

  pub async fn info(&self) -> ClusterState {
    self.with_core(|c| c.snapshot()).await
  }

  pub async fn healthy_nodes(&self) -> Vec<ClusterNode> {
    self.with_core(|c| c.healthy_nodes()).await
  }

  pub async fn cluster_metrics(&self) -> ClusterMetrics {
    ClusterMetrics::from_state(&self.info().await)
  }

  pub async fn failover_history(&self, limit: usize) -> Result<Vec<FailoverEvent>> {
    self.store.failover_history(limit).await
  }

  /// Election timeout for the next wait, jitter included.
  pub fn next_election_timeout(&self) -> Duration {
    let jitter = self.config.election_jitter.as_millis() as u64;
    let extra = if jitter == 0 {
      0
    } else {
      rand::thread_rng().gen_range(0..=jitter)
    };
    self.config.election_timeout + Duration::from_millis(extra)
  }

  pub(crate) async fn record(&self, event: FailoverEvent) {
    info!(event_type = event.event_type.as_str(), reason = %event.reason, "Cluster event");
    if let Err(e) = self.store.append_failover(&event).await {
      warn!(error = %e, "Failed to append failover event");
    }
  }

  pub(crate) async fn persist_snapshot(&self) {
    let snapshot = self.with_core(|c| c.is_leader().then(|| c.snapshot())).await;
    let Some(snapshot) = snapshot else {
      return;
    };
    if let Err(e) = self.store.save_snapshot(&snapshot, self.config.snapshot_retention).await {
      warn!(error = %e, "Failed to persist cluster snapshot");
    }
  }

  fn notify(&self, event: MembershipEvent) {
    // No subscribers is fine.
    let _ = self.membership_tx.send(event);
  }

  pub async fn handle_vote(&self, request: &VoteRequest) -> VoteResponse {
    self.with_core(|c| c.handle_vote_request(request)).await
  }

  pub async fn handle_heartbeat(&self, request: &HeartbeatRequest) -> HeartbeatResponse {
    let metrics = self.sample_metrics();
    self
      .with_core(|c| {
        c.refresh_local(Some(metrics));
        c.handle_heartbeat(request)
      })
      .await
  }

  pub async fn handle_join(&self, request: JoinRequest) -> Result<JoinResponse> {
    let (response, node, event) = self.with_core(|c| c.handle_join(request.node_info)).await?;
    if let Err(e) = self.store.upsert_known_node(&KnownNode::from(&node)).await {
      warn!(error = %e, "Failed to persist known node");
    }
    self.record(event).await;
    self.notify(MembershipEvent::Joined(node));
    self.persist_snapshot().await;
    Ok(response)
  }

  pub async fn handle_leave(&self, node_id: &str) -> Result<LeaveResponse> {
    let (node, event) = self.with_core(|c| c.handle_leave(node_id)).await?;
    if let Err(e) = self.store.remove_known_node(&node.node_id).await {
      warn!(error = %e, "Failed to remove known node");
    }
    self.record(event).await;
    self.notify(MembershipEvent::Left(node.node_id));
    self.persist_snapshot().await;
    Ok(LeaveResponse { success: true })
  }

  /// Record the outcome of one heartbeat exchange.
  pub(crate) async fn apply_peer_update(&self, update: PeerUpdate) {
    match update {
      PeerUpdate::Acked | PeerUpdate::Unreachable => {}
      PeerUpdate::Discovered(node) => {
        debug!(node_id = %node.node_id, "Discovered node through heartbeat");
        if let Err(e) = self.store.upsert_known_node(&KnownNode::from(&node)).await {
          warn!(error = %e, "Failed to persist known node");
        }
      }
      PeerUpdate::Recovered(node) => {
        self
          .record(FailoverEvent::new(
            FailoverKind::NodeRecovered,
            format!("{} answered heartbeats again", node.node_id),
          ))
          .await;
        if let Err(e) = self.store.upsert_known_node(&KnownNode::from(&node)).await {
          warn!(error = %e, "Failed to persist known node");
        }
      }
      PeerUpdate::Degraded(node_id) => {
        warn!(node_id = %node_id, "Node degraded after a missed heartbeat");
      }
      PeerUpdate::Failed(node) => {
        self
          .record(FailoverEvent::new(
            FailoverKind::NodeFailed,
            format!("{} stopped answering at {}", node.node_id, node.endpoint()),
          ))
          .await;
        self.notify(MembershipEvent::Failed(node.node_id));
      }
      PeerUpdate::SteppedDown { term } => {
        self
          .record(
            FailoverEvent::new(FailoverKind::SteppedDown, format!("observed higher term {}", term))
              .with_leaders(Some(self.local_id.clone()), None),
          )
          .await;
      }
    }
  }

  /// Load the persisted term floor and known peers.
  pub async fn restore(&self) {
    let snapshot = match self.store.latest_snapshot().await {
      Ok(snapshot) => snapshot,
      Err(e) => {
        warn!(error = %e, "Could not load cluster snapshot, starting empty");
        None
      }
    };
    let known = self.store.known_nodes().await.unwrap_or_else(|e| {
      warn!(error = %e, "Could not load known nodes");
      Vec::new()
    });
    let term = self
      .with_core(|c| {
        c.restore(snapshot, &known);
        c.current_term()
      })
      .await;
    info!(term, known = known.len(), "Cluster state restored");
  }

  /// Ask every known peer for its view; join through the first leader found.
  pub async fn bootstrap(&self) -> bool {
    let peers = self.with_core(|c| c.peers()).await;
    for endpoint in peers {
      let state = match self.client.cluster_info(&endpoint).await {
        Ok(state) => state,
        Err(e) => {
          debug!(peer = %endpoint, error = %e, "Seed unavailable");
          continue;
        }
      };
      let (Some(leader_id), Some(leader_address)) = (state.leader_node_id.clone(), state.leader_address())
      else {
        continue;
      };
      if leader_id == self.local_id {
        continue;
      }

      let adopt = HeartbeatRequest {
        term: state.term,
        leader_id: leader_id.clone(),
        cluster_state: state,
      };
      let node_info = self
        .with_core(|c| {
          c.handle_heartbeat(&adopt);
          c.local_node()
        })
        .await;

      match self.client.join(&leader_address, &JoinRequest { node_info }).await {
        Ok(response) => {
          if let Some(leader_id) = response.leader_id {
            let joined = HeartbeatRequest {
              term: response.term,
              leader_id,
              cluster_state: response.cluster_state,
            };
            self.with_core(|c| c.handle_heartbeat(&joined)).await;
          }
          info!(leader = %leader_address, "Joined cluster");
          return true;
        }
        Err(e) => warn!(leader = %leader_address, error = %e, "Join failed"),
      }
    }
    info!("No leader reachable, waiting for election timeout");
    false
  }

  pub async fn force_election(self: &Arc<Self>) -> ClusterState {
    let old_leader = self.with_core(|c| c.leader_id().map(String::from)).await;
    self
      .record(
        FailoverEvent::new(FailoverKind::ForcedElection, "election requested through the API")
          .with_leaders(old_leader, None),
      )
      .await;
    election::run_election(self).await;
    self.info().await
  }

  /// Spawn the election monitor and the leader loops.
  pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
    vec![
      election::start_election_monitor(Arc::clone(self)),
      heartbeat::start_leader_loops(Arc::clone(self)),
    ]
  }

  pub async fn shutdown(&self) {
    let (leader, term) = self
      .with_core(|c| (c.is_leader().then(|| c.local_id().to_string()), c.current_term()))
      .await;
    self
      .record(
        FailoverEvent::new(
          FailoverKind::NodeShutdown,
          format!("{} shutting down in term {}", self.local_id, term),
        )
        .with_leaders(leader, None),
      )
      .await;
    self.shutdown.cancel();
  }
}
