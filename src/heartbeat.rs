use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterCoordinator, PeerUpdate};
use crate::models::{KnownNode, NodeRole};

static LOW_HEALTH_PERCENT: f64 = 50.0;

/// Heartbeat and health loops. They only run while this node is leader.
pub(crate) fn start_leader_loops(coord: Arc<ClusterCoordinator>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut role_rx = coord.subscribe_role();
    loop {
      while *role_rx.borrow_and_update() != NodeRole::Leader {
        tokio::select! {
          _ = coord.shutdown_token().cancelled() => return,
          changed = role_rx.changed() => {
            if changed.is_err() {
              return;
            }
          }
        }
      }

      info!(node_id = %coord.local_id(), "Leader loops started");
      lead(&coord, &role_rx).await;
      if coord.shutdown_token().is_cancelled() {
        return;
      }
      info!(node_id = %coord.local_id(), "Leader loops stopped");
    }
  })
}

async fn lead(coord: &ClusterCoordinator, role_rx: &watch::Receiver<NodeRole>) {
  let config = coord.config();
  let mut heartbeat = interval(config.heartbeat_interval);
  heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let mut health = interval(config.health_check_interval);
  health.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = coord.shutdown_token().cancelled() => return,
      _ = demoted(role_rx.clone()) => return,
      _ = heartbeat.tick() => {
        tokio::select! {
          _ = send_heartbeats(coord) => {}
          _ = demoted(role_rx.clone()) => return,
        }
      }
      _ = health.tick() => health_check(coord).await,
    }
  }
}

async fn demoted(mut role_rx: watch::Receiver<NodeRole>) {
  loop {
    if *role_rx.borrow_and_update() != NodeRole::Leader {
      return;
    }
    if role_rx.changed().await.is_err() {
      return;
    }
  }
}

/// One heartbeat round to every peer, in parallel.
async fn send_heartbeats(coord: &ClusterCoordinator) {
  let metrics = coord.sample_metrics();
  let round = coord
    .with_core(|c| {
      c.refresh_local(Some(metrics));
      c.heartbeat_round()
    })
    .await;
  let Some((request, targets)) = round else {
    return;
  };

  let request = &request;
  let client = coord.client();
  let mut pending: FuturesUnordered<_> = targets
    .into_iter()
    .map(|endpoint| async move {
      let result = client.send_heartbeat(&endpoint, request).await;
      (endpoint, result)
    })
    .collect();

  let max_missed = coord.config().max_missed_heartbeats;
  while let Some((endpoint, result)) = pending.next().await {
    let update = match result {
      Ok(response) => {
        coord
          .with_core(|c| c.record_heartbeat_ack(&endpoint, response))
          .await
      }
      Err(e) => {
        debug!(peer = %endpoint, error = %e, "Heartbeat failed");
        coord
          .with_core(|c| c.record_heartbeat_miss(&endpoint, max_missed))
          .await
      }
    };
    let stepped_down = matches!(update, PeerUpdate::SteppedDown { .. });
    coord.apply_peer_update(update).await;
    if stepped_down {
      return;
    }
  }
}

/// Sweep stale nodes, log cluster health and persist a snapshot.
async fn health_check(coord: &ClusterCoordinator) {
  let metrics = coord.sample_metrics();
  let stale_after = coord.config().stale_after();
  let Some((failed, health, snapshot)) = coord
    .with_core(|c| {
      if !c.is_leader() {
        return None;
      }
      c.refresh_local(Some(metrics));
      let failed = c.sweep_stale(stale_after);
      Some((failed, c.health_percentage(), c.snapshot()))
    })
    .await
  else {
    return;
  };

  for node in failed {
    coord.apply_peer_update(PeerUpdate::Failed(node)).await;
  }

  if health < LOW_HEALTH_PERCENT {
    warn!(health_percent = health, nodes = snapshot.nodes.len(), "Cluster health is low");
  } else {
    debug!(health_percent = health, nodes = snapshot.nodes.len(), "Cluster health");
  }

  let store = coord.store();
  if let Err(e) = store
    .save_snapshot(&snapshot, coord.config().snapshot_retention)
    .await
  {
    warn!(error = %e, "Failed to persist cluster snapshot");
  }
  for node in snapshot.nodes.values().filter(|n| n.is_healthy()) {
    if let Err(e) = store.upsert_known_node(&KnownNode::from(node)).await {
      warn!(error = %e, "Failed to persist known node");
      break;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::config::ClusterConfig;
  use crate::database::{ClusterStore, MemoryStore};
  use crate::election::run_election;
  use crate::messaging::PeerClient;
  use crate::metrics::StaticMetrics;
  use crate::models::{ClusterNode, FailoverKind, HealthStatus};
  use crate::rpc::JoinRequest;
  use tokio_util::sync::CancellationToken;

  async fn lone_leader(store: Arc<MemoryStore>) -> Arc<ClusterCoordinator> {
    let config = ClusterConfig {
      port: 1,
      heartbeat_interval: Duration::from_millis(20),
      health_check_interval: Duration::from_millis(50),
      max_missed_heartbeats: 2,
      ..ClusterConfig::default()
    };
    let coord = Arc::new(ClusterCoordinator::new(
      config,
      store,
      PeerClient::new(Duration::from_millis(50)),
      Arc::new(StaticMetrics::idle()),
      CancellationToken::new(),
    ));
    assert!(run_election(&coord).await);
    coord
  }

  #[tokio::test]
  async fn unreachable_member_is_failed_and_announced() {
    let store = Arc::new(MemoryStore::new());
    let coord = lone_leader(store.clone()).await;
    let mut membership = coord.subscribe_membership();
    let ghost = ClusterNode::new("ghost", "127.0.0.1", 9);
    coord
      .handle_join(JoinRequest {
        node_info: ghost.clone(),
      })
      .await
      .unwrap();

    send_heartbeats(&coord).await;
    let node = coord.info().await.nodes[&ghost.node_id].clone();
    assert_eq!(node.health_status, HealthStatus::Degraded);
    send_heartbeats(&coord).await;

    let mut saw_failure = false;
    while let Ok(event) = membership.try_recv() {
      if event == crate::cluster::MembershipEvent::Failed(ghost.node_id.clone()) {
        saw_failure = true;
      }
    }
    assert!(saw_failure);
    let history = store.failover_history(10).await.unwrap();
    assert_eq!(history[0].event_type, FailoverKind::NodeFailed);
  }

  #[tokio::test]
  async fn leader_loops_persist_snapshots_and_stop_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let coord = lone_leader(store.clone()).await;
    let handle = start_leader_loops(coord.clone());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.snapshot_count().await >= 2);

    coord.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .unwrap()
      .unwrap();
    let history = store.failover_history(1).await.unwrap();
    assert_eq!(history[0].event_type, FailoverKind::NodeShutdown);
  }
}
