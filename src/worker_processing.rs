use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::attack_engine::{AttackEvent, AttackProgress, AttackReport, run_attack};
use crate::error::{FleetError, Result};
use crate::messaging::PeerClient;
use crate::models::PartitionStatus;
use crate::rpc::{DispatchRequest, PasswordFoundReport, ProgressReport, StatusReport};

static PROGRESS_REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Posts a partition's events back to the coordinator that dispatched it.
/// Every post is a single attempt; failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct Reporter {
  client: PeerClient,
  coordinator_url: String,
  job_id: Uuid,
  partition_id: usize,
  node_id: String,
}

impl Reporter {
  pub fn new(client: PeerClient, request: &DispatchRequest, node_id: &str) -> Self {
    Self {
      client,
      coordinator_url: request.coordinator_url.trim_end_matches('/').to_string(),
      job_id: request.job_id,
      partition_id: request.partition_id,
      node_id: node_id.to_string(),
    }
  }

  pub async fn progress(&self, progress: &AttackProgress) {
    let report = ProgressReport {
      partition_id: self.partition_id,
      node_id: self.node_id.clone(),
      percent: progress.percent,
      attempts: progress.attempts,
      current: progress.current.clone(),
    };
    if let Err(e) = self.client.report_progress(&self.coordinator_url, self.job_id, &report).await {
      debug!(job_id = %self.job_id, partition_id = self.partition_id, error = %e, "Progress report dropped");
    }
  }

  pub async fn found(&self, hash: &str, password: &str) {
    let report = PasswordFoundReport {
      partition_id: self.partition_id,
      node_id: self.node_id.clone(),
      hash: hash.to_string(),
      password: password.to_string(),
    };
    if let Err(e) = self.client.report_found(&self.coordinator_url, self.job_id, &report).await {
      error!(job_id = %self.job_id, partition_id = self.partition_id, error = %e, "Found password not delivered");
    }
  }

  pub async fn status(&self, status: PartitionStatus, attempts: u64, last_candidate: Option<String>, error: Option<String>) {
    let report = StatusReport {
      partition_id: self.partition_id,
      node_id: self.node_id.clone(),
      status,
      attempts,
      last_candidate,
      error,
    };
    if let Err(e) = self.client.report_status(&self.coordinator_url, self.job_id, &report).await {
      debug!(job_id = %self.job_id, partition_id = self.partition_id, error = %e, "Status report dropped");
    }
  }
}

/// Run the attack for one partition on the blocking pool, forwarding its
/// events to `on_event` as they happen. Progress is thinned to one event per
/// [`PROGRESS_REPORT_INTERVAL`]; found passwords always pass.
pub async fn process_partition<F, Fut>(
  request: &DispatchRequest,
  cancel: CancellationToken,
  mut on_event: F,
) -> Result<AttackReport>
where
  F: FnMut(AttackEvent) -> Fut,
  Fut: Future<Output = ()>,
{
  let attack = request.attack_request();
  attack.config.validate()?;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let token = cancel.clone();
  let engine = tokio::task::spawn_blocking(move || {
    run_attack(&attack, &mut |event| {
      let _ = tx.send(event);
      !token.is_cancelled()
    })
  });

  let mut last_progress: Option<Instant> = None;
  while let Some(event) = rx.recv().await {
    if let AttackEvent::Progress(_) = &event {
      if last_progress.is_some_and(|at| at.elapsed() < PROGRESS_REPORT_INTERVAL) {
        continue;
      }
      last_progress = Some(Instant::now());
    }
    on_event(event).await;
  }

  engine
    .await
    .map_err(|e| FleetError::InvalidArgument(format!("attack task aborted: {}", e)))?
}

/// Execute a dispatched partition end to end and report the outcome.
pub async fn execute_partition(request: DispatchRequest, reporter: Reporter, cancel: CancellationToken) {
  info!(
    job_id = %request.job_id,
    partition_id = request.partition_id,
    mode = %request.attack_mode,
    range_start = ?request.range_start,
    range_end = ?request.range_end,
    hashes = request.hashes.len(),
    "Processing partition"
  );
  reporter.status(PartitionStatus::Running, 0, None, None).await;

  let outcome = process_partition(&request, cancel, |event| {
    let reporter = reporter.clone();
    async move {
      match event {
        AttackEvent::Progress(progress) => reporter.progress(&progress).await,
        AttackEvent::Found { hash, password } => reporter.found(&hash, &password).await,
      }
    }
  })
  .await;

  match outcome {
    Ok(report) => {
      let status = if report.cancelled {
        PartitionStatus::Cancelled
      } else {
        PartitionStatus::Completed
      };
      info!(
        job_id = %request.job_id,
        partition_id = request.partition_id,
        attempts = report.attempts,
        found = report.found.len(),
        status = %status,
        "Partition finished"
      );
      reporter.status(status, report.attempts, report.last_candidate, None).await;
    }
    Err(e) => {
      error!(job_id = %request.job_id, partition_id = request.partition_id, error = %e, "Partition failed");
      reporter.status(PartitionStatus::Failed, 0, None, Some(e.to_string())).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use super::*;
  use crate::attack_engine::{AttackConfig, AttackMode};
  use crate::hashing::HashAlgorithm;
  use crate::models::Priority;

  fn brute_force(hashes: Vec<String>, start: &str, end: &str) -> DispatchRequest {
    DispatchRequest {
      job_id: Uuid::new_v4(),
      partition_id: 0,
      hash_type: HashAlgorithm::Md5,
      attack_mode: AttackMode::BruteForce,
      hashes,
      range_start: Some(start.into()),
      range_end: Some(end.into()),
      charset: Some("0123456789".into()),
      wordlist_path: None,
      mask: None,
      attack: AttackConfig::default(),
      priority: Priority::Normal,
      coordinator_url: "http://127.0.0.1:1".into(),
    }
  }

  #[tokio::test]
  async fn finds_password_inside_range() {
    let target = HashAlgorithm::Md5.digest_hex("4321");
    let request = brute_force(vec![target.clone()], "4000", "4999");
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let report = process_partition(&request, CancellationToken::new(), move |event| {
      sink.lock().unwrap().push(event);
      async {}
    })
    .await
    .unwrap();

    assert_eq!(report.found.get(&target).map(String::as_str), Some("4321"));
    assert_eq!(report.attempts, 322);
    let events = events.lock().unwrap();
    assert!(events.contains(&AttackEvent::Found {
      hash: target,
      password: "4321".into()
    }));
  }

  #[tokio::test]
  async fn cancelled_token_stops_the_engine() {
    let request = brute_force(vec![HashAlgorithm::Md5.digest_hex("x")], "000000", "999999");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = process_partition(&request, cancel, |_| async {}).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.attempts, 1000);
  }

  #[tokio::test]
  async fn invalid_configuration_is_rejected_before_running() {
    let request = brute_force(vec![HashAlgorithm::Md5.digest_hex("x")], "00", "999");
    let err = process_partition(&request, CancellationToken::new(), |_| async {})
      .await
      .unwrap_err();
    assert!(matches!(err, FleetError::RangeMismatch { .. }));
  }
}
