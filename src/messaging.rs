use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::models::ClusterState;
use crate::rpc::{
  Ack, CancelPartitionRequest, DispatchAck, DispatchRequest, HeartbeatRequest, HeartbeatResponse,
  JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, PasswordFoundReport, ProgressReport,
  StatusReport, VoteRequest, VoteResponse,
};

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 2;
static MAX_DELAY: Duration = Duration::from_secs(30);

/// HTTP client for node-to-node calls. Every request carries the RPC timeout.
#[derive(Debug, Clone)]
pub struct PeerClient {
  http: Client,
  retries: usize,
  backoff_factor: u64,
}

impl PeerClient {
  pub fn new(rpc_timeout: Duration) -> Self {
    let http = Client::builder()
      .timeout(rpc_timeout)
      .build()
      .unwrap_or_else(|_| Client::new());
    Self {
      http,
      retries: MAX_RETRIES,
      backoff_factor: 1000,
    }
  }

  /// Retry schedule for dispatch and join: `DELAY * factor` milliseconds,
  /// doubling, capped at 30s, `retries` extra attempts.
  pub fn with_retry(mut self, retries: usize, backoff_factor: u64) -> Self {
    self.retries = retries;
    self.backoff_factor = backoff_factor.max(1);
    self
  }

  fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
    ExponentialBackoff::from_millis(DELAY)
      .factor(self.backoff_factor)
      .max_delay(MAX_DELAY)
      .take(self.retries)
  }

  async fn post<B, R>(&self, url: &str, body: &B) -> Result<R>
  where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
  {
    let response = self
      .http
      .post(url)
      .json(body)
      .send()
      .await
      .map_err(|e| FleetError::unreachable(url, e))?;
    let response = response
      .error_for_status()
      .map_err(|e| FleetError::unreachable(url, e))?;
    response.json::<R>().await.map_err(|e| FleetError::unreachable(url, e))
  }

  async fn get<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
    let response = self
      .http
      .get(url)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| FleetError::unreachable(url, e))?;
    response.json::<R>().await.map_err(|e| FleetError::unreachable(url, e))
  }

  pub async fn request_vote(&self, endpoint: &str, request: &VoteRequest) -> Result<VoteResponse> {
    self.post(&format!("http://{}/cluster/vote", endpoint), request).await
  }

  pub async fn send_heartbeat(&self, endpoint: &str, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
    self.post(&format!("http://{}/cluster/heartbeat", endpoint), request).await
  }

  pub async fn cluster_info(&self, endpoint: &str) -> Result<ClusterState> {
    self.get(&format!("http://{}/cluster/info", endpoint)).await
  }

  /// Join through `endpoint`. A non-leader answers with a redirect to the
  /// leader, which the HTTP client follows.
  pub async fn join(&self, endpoint: &str, request: &JoinRequest) -> Result<JoinResponse> {
    let url = format!("http://{}/cluster/join", endpoint);
    Retry::spawn(self.backoff(), || async {
      let result = self.post(&url, request).await;
      if let Err(e) = &result {
        debug!(endpoint, error = %e, "Join attempt failed");
      }
      result
    })
    .await
  }

  pub async fn leave(&self, endpoint: &str, node_id: &str) -> Result<LeaveResponse> {
    let request = LeaveRequest {
      node_id: node_id.to_string(),
    };
    self.post(&format!("http://{}/cluster/leave", endpoint), &request).await
  }

  pub async fn dispatch(&self, endpoint: &str, request: &DispatchRequest) -> Result<DispatchAck> {
    let url = format!("http://{}/worker/partitions", endpoint);
    Retry::spawn(self.backoff(), || async {
      let result = self.post(&url, request).await;
      if let Err(e) = &result {
        debug!(endpoint, job_id = %request.job_id, error = %e, "Dispatch attempt failed");
      }
      result
    })
    .await
  }

  pub async fn cancel_partition(&self, endpoint: &str, request: &CancelPartitionRequest) -> Result<Ack> {
    self.post(&format!("http://{}/worker/partitions/cancel", endpoint), request).await
  }

  // Worker reports are single attempt.

  pub async fn report_status(&self, coordinator_url: &str, job_id: Uuid, report: &StatusReport) -> Result<Ack> {
    self.post(&format!("{}/jobs/{}/status", coordinator_url, job_id), report).await
  }

  pub async fn report_progress(&self, coordinator_url: &str, job_id: Uuid, report: &ProgressReport) -> Result<Ack> {
    self.post(&format!("{}/jobs/{}/progress", coordinator_url, job_id), report).await
  }

  pub async fn report_found(&self, coordinator_url: &str, job_id: Uuid, report: &PasswordFoundReport) -> Result<Ack> {
    self.post(&format!("{}/jobs/{}/password-found", coordinator_url, job_id), report).await
  }
}
