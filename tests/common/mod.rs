#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use crackfleet::config::{ClusterConfig, Config, JobConfig, WorkerConfig};
use crackfleet::database::MemoryStore;
use crackfleet::metrics::StaticMetrics;
use crackfleet::models::NodeRole;
use crackfleet::node::{FleetNode, NodeHandle};

pub fn free_port() -> u16 {
  TcpListener::bind("127.0.0.1:0")
    .and_then(|l| l.local_addr())
    .map(|a| a.port())
    .expect("no free port")
}

pub fn node_config(port: u16, seeds: Vec<String>) -> Config {
  Config {
    bind_address: "127.0.0.1".into(),
    database_url: None,
    cluster: ClusterConfig {
      hostname: "localhost".into(),
      address: "127.0.0.1".into(),
      port,
      seeds,
      election_timeout: Duration::from_millis(400),
      election_jitter: Duration::from_millis(400),
      heartbeat_interval: Duration::from_millis(50),
      health_check_interval: Duration::from_millis(100),
      max_missed_heartbeats: 2,
      rpc_timeout: Duration::from_millis(250),
      retry_backoff_factor: 5,
      vote_window: Duration::from_millis(300),
      snapshot_retention: 5,
    },
    jobs: JobConfig {
      dispatch_retries: 2,
      ..JobConfig::default()
    },
    worker: WorkerConfig {
      max_concurrent_partitions: 2,
    },
  }
}

pub async fn spawn_node(config: Config) -> NodeHandle {
  FleetNode::with_store(config, Arc::new(MemoryStore::new()), Arc::new(StaticMetrics::idle()))
    .spawn()
    .await
    .expect("node failed to start")
}

/// Start `n` nodes that all know each other.
pub async fn spawn_cluster(n: usize) -> Vec<NodeHandle> {
  let ports: Vec<u16> = (0..n).map(|_| free_port()).collect();
  let mut nodes = Vec::with_capacity(n);
  for port in &ports {
    let seeds = ports
      .iter()
      .filter(|p| *p != port)
      .map(|p| format!("127.0.0.1:{}", p))
      .collect();
    nodes.push(spawn_node(node_config(*port, seeds)).await);
  }
  nodes
}

/// Index of the single leader every live node agrees on.
pub async fn wait_for_leader(nodes: &[&NodeHandle], within: Duration) -> usize {
  let deadline = tokio::time::Instant::now() + within;
  loop {
    let leaders: Vec<usize> = (0..nodes.len())
      .filter(|&i| nodes[i].cluster.role() == NodeRole::Leader)
      .collect();
    if let [leader] = leaders[..] {
      let leader_id = nodes[leader].cluster.local_id().to_string();
      let mut agreed = true;
      for node in nodes {
        if node.cluster.info().await.leader_node_id.as_deref() != Some(leader_id.as_str()) {
          agreed = false;
        }
      }
      if agreed {
        return leader;
      }
    }
    assert!(tokio::time::Instant::now() < deadline, "no leader elected in {:?}", within);
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
}

pub fn base_url(node: &NodeHandle) -> String {
  format!("http://{}", node.cluster.local_endpoint())
}

/// Poll `check` until it holds or `within` runs out.
pub async fn eventually<F, Fut>(within: Duration, what: &str, mut check: F)
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + within;
  while !check().await {
    assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
}
