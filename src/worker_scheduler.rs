use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::Priority;
use crate::rpc::DispatchRequest;

#[derive(Debug)]
pub struct ScheduledPartition {
  pub priority: Priority,
  pub seq: u64,
  pub request: DispatchRequest,
}

impl ScheduledPartition {
  fn rank(&self) -> u8 {
    match self.priority {
      Priority::High => 1,
      Priority::Normal => 0,
    }
  }
}

impl Eq for ScheduledPartition {}

impl PartialEq for ScheduledPartition {
  fn eq(&self, other: &Self) -> bool {
    self.priority == other.priority && self.seq == other.seq
  }
}

impl PartialOrd for ScheduledPartition {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

// High before normal; FIFO within a priority.
impl Ord for ScheduledPartition {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .rank()
      .cmp(&other.rank())
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

#[derive(Debug, Default)]
pub struct Scheduler {
  queue: Mutex<BinaryHeap<ScheduledPartition>>,
  next_seq: AtomicU64,
}

impl Scheduler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a partition; returns the queue length afterwards.
  pub async fn add_partition(&self, request: DispatchRequest) -> usize {
    let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
    let mut queue = self.queue.lock().await;
    queue.push(ScheduledPartition {
      priority: request.priority,
      seq,
      request,
    });
    queue.len()
  }

  pub async fn get_next(&self) -> Option<ScheduledPartition> {
    self.queue.lock().await.pop()
  }

  /// Drop a queued partition that has not started yet.
  pub async fn remove(&self, job_id: Uuid, partition_id: usize) -> bool {
    let mut queue = self.queue.lock().await;
    let before = queue.len();
    queue.retain(|p| !(p.request.job_id == job_id && p.request.partition_id == partition_id));
    queue.len() != before
  }

  pub async fn len(&self) -> usize {
    self.queue.lock().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.queue.lock().await.is_empty()
  }
}
