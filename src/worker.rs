use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::messaging::PeerClient;
use crate::rpc::{DispatchAck, DispatchRequest};
use crate::worker_processing::{Reporter, execute_partition};
use crate::worker_scheduler::Scheduler;

static IDLE_POLL: Duration = Duration::from_millis(100);

type PartitionKey = (Uuid, usize);

/// Executes partitions dispatched to this node.
pub struct WorkerRuntime {
  node_id: String,
  client: PeerClient,
  scheduler: Scheduler,
  semaphore: Arc<Semaphore>,
  running: Mutex<HashMap<PartitionKey, CancellationToken>>,
  shutdown: CancellationToken,
}

impl WorkerRuntime {
  pub fn new(node_id: &str, client: PeerClient, config: &WorkerConfig, shutdown: CancellationToken) -> Self {
    Self {
      node_id: node_id.to_string(),
      client,
      scheduler: Scheduler::new(),
      semaphore: Arc::new(Semaphore::new(config.max_concurrent_partitions.max(1))),
      running: Mutex::new(HashMap::new()),
      shutdown,
    }
  }

  /// Validate and queue a partition.
  pub async fn accept(&self, request: DispatchRequest) -> Result<DispatchAck> {
    request.attack_request().config.validate()?;
    info!(job_id = %request.job_id, partition_id = request.partition_id, priority = ?request.priority, "Partition received");
    let queued = self.scheduler.add_partition(request).await;
    Ok(DispatchAck { accepted: true, queued })
  }

  /// Cancel a queued or running partition. Returns whether it was known.
  pub async fn cancel(&self, job_id: Uuid, partition_id: usize) -> bool {
    if self.scheduler.remove(job_id, partition_id).await {
      info!(job_id = %job_id, partition_id, "Queued partition dropped");
      return true;
    }
    match self.running.lock().await.get(&(job_id, partition_id)) {
      Some(token) => {
        info!(job_id = %job_id, partition_id, "Cancelling running partition");
        token.cancel();
        true
      }
      None => false,
    }
  }

  pub async fn queued(&self) -> usize {
    self.scheduler.len().await
  }

  /// Partitions taken off the queue: executing or waiting for a slot.
  pub async fn running(&self) -> usize {
    self.running.lock().await.len()
  }

  /// Pull partitions off the queue and run them, bounded by the semaphore.
  pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
    let runtime = Arc::clone(self);
    tokio::spawn(async move {
      loop {
        if runtime.shutdown.is_cancelled() {
          break;
        }
        // Popped and registered under one lock so `cancel` always finds it.
        let next = {
          let mut running = runtime.running.lock().await;
          match runtime.scheduler.get_next().await {
            Some(scheduled) if running.contains_key(&(scheduled.request.job_id, scheduled.request.partition_id)) => {
              warn!(
                job_id = %scheduled.request.job_id,
                partition_id = scheduled.request.partition_id,
                "Partition already taken, dropping duplicate"
              );
              continue;
            }
            Some(scheduled) => {
              let request = scheduled.request;
              let key = (request.job_id, request.partition_id);
              let token = runtime.shutdown.child_token();
              running.insert(key, token.clone());
              Some((request, key, token))
            }
            None => None,
          }
        };
        let Some((request, key, token)) = next else {
          tokio::select! {
            _ = runtime.shutdown.cancelled() => break,
            _ = tokio::time::sleep(IDLE_POLL) => continue,
          }
        };

        let permit = tokio::select! {
          _ = token.cancelled() => None,
          permit = runtime.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
          runtime.running.lock().await.remove(&key);
          if runtime.shutdown.is_cancelled() {
            break;
          }
          debug!(job_id = %key.0, partition_id = key.1, "Partition cancelled before it started");
          continue;
        };

        let reporter = Reporter::new(runtime.client.clone(), &request, &runtime.node_id);
        let worker = Arc::clone(&runtime);
        tokio::spawn(async move {
          execute_partition(request, reporter, token).await;
          worker.running.lock().await.remove(&key);
          drop(permit);
        });
      }
      debug!("Worker loop stopped");
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::attack_engine::{AttackConfig, AttackMode};
  use crate::hashing::HashAlgorithm;
  use crate::models::Priority;
  use tokio_test::{assert_err, assert_ok};

  fn runtime() -> Arc<WorkerRuntime> {
    Arc::new(WorkerRuntime::new(
      "worker-1",
      PeerClient::new(Duration::from_millis(50)),
      &WorkerConfig {
        max_concurrent_partitions: 1,
      },
      CancellationToken::new(),
    ))
  }

  fn request(partition_id: usize, start: &str, end: &str) -> DispatchRequest {
    DispatchRequest {
      job_id: Uuid::nil(),
      partition_id,
      hash_type: HashAlgorithm::Md5,
      attack_mode: AttackMode::BruteForce,
      hashes: vec![HashAlgorithm::Md5.digest_hex("never")],
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
  async fn rejects_invalid_partitions() {
    let worker = runtime();
    assert_err!(worker.accept(request(0, "00", "999")).await);
    assert_eq!(worker.queued().await, 0);
  }

  #[tokio::test]
  async fn queued_partition_can_be_cancelled() {
    let worker = runtime();
    let ack = assert_ok!(worker.accept(request(0, "0000", "0099")).await);
    assert!(ack.accepted);
    assert_eq!(ack.queued, 1);
    assert!(worker.cancel(Uuid::nil(), 0).await);
    assert!(!worker.cancel(Uuid::nil(), 0).await);
  }

  #[tokio::test]
  async fn running_partition_stops_on_cancel() {
    let worker = runtime();
    let handle = worker.start();
    assert_ok!(worker.accept(request(0, "0000000000", "9999999999")).await);

    let mut started = false;
    for _ in 0..50 {
      if worker.running().await == 1 {
        started = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(started);
    assert!(worker.cancel(Uuid::nil(), 0).await);

    let mut stopped = false;
    for _ in 0..100 {
      if worker.running().await == 0 {
        stopped = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(stopped);
    worker.shutdown.cancel();
    handle.await.unwrap();
  }

  async fn wait_for_running(worker: &WorkerRuntime, expected: usize) -> bool {
    for _ in 0..100 {
      if worker.running().await == expected {
        return true;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
  }

  #[tokio::test]
  async fn partition_waiting_for_a_slot_can_be_cancelled() {
    let worker = runtime();
    let handle = worker.start();
    assert_ok!(worker.accept(request(0, "0000000000", "9999999999")).await);
    assert!(wait_for_running(&worker, 1).await);

    assert_ok!(worker.accept(request(1, "0000000000", "9999999999")).await);
    assert!(wait_for_running(&worker, 2).await);
    assert_eq!(worker.queued().await, 0);

    assert!(worker.cancel(Uuid::nil(), 1).await);
    assert!(wait_for_running(&worker, 1).await);
    assert!(!worker.cancel(Uuid::nil(), 1).await);

    assert!(worker.cancel(Uuid::nil(), 0).await);
    assert!(wait_for_running(&worker, 0).await);
    worker.shutdown.cancel();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn duplicate_delivery_keeps_the_first_run() {
    let worker = Arc::new(WorkerRuntime::new(
      "worker-1",
      PeerClient::new(Duration::from_millis(50)),
      &WorkerConfig {
        max_concurrent_partitions: 2,
      },
      CancellationToken::new(),
    ));
    let handle = worker.start();
    assert_ok!(worker.accept(request(0, "0000000000", "9999999999")).await);
    assert!(wait_for_running(&worker, 1).await);

    assert_ok!(worker.accept(request(0, "0000000000", "9999999999")).await);
    for _ in 0..50 {
      if worker.queued().await == 0 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(worker.queued().await, 0);
    assert_eq!(worker.running().await, 1);

    assert!(worker.cancel(Uuid::nil(), 0).await);
    assert!(wait_for_running(&worker, 0).await);
    worker.shutdown.cancel();
    handle.await.unwrap();
  }
}
