//! Cluster persistence: state snapshots, known nodes, failover audit log.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{FleetError, Result};
use crate::models::{ClusterState, FailoverEvent, FailoverKind, KnownNode};

static MIGRATOR: Migrator = sqlx::migrate!();

#[async_trait]
pub trait ClusterStore: Send + Sync {
  /// Store a snapshot and keep only the newest `retention` ones.
  async fn save_snapshot(&self, state: &ClusterState, retention: usize) -> Result<()>;

  /// Newest snapshot. An undecodable snapshot is logged and reported as none.
  async fn latest_snapshot(&self) -> Result<Option<ClusterState>>;

  async fn upsert_known_node(&self, node: &KnownNode) -> Result<()>;
  async fn remove_known_node(&self, node_id: &str) -> Result<()>;
  async fn known_nodes(&self) -> Result<Vec<KnownNode>>;

  /// Append-only.
  async fn append_failover(&self, event: &FailoverEvent) -> Result<()>;

  /// Newest first.
  async fn failover_history(&self, limit: usize) -> Result<Vec<FailoverEvent>>;
}

fn decode_snapshot(raw: &str) -> Option<ClusterState> {
  match serde_json::from_str(raw) {
    Ok(state) => Some(state),
    Err(e) => {
      warn!(error = %e, "Discarding unreadable cluster snapshot");
      None
    }
  }
}

fn storage_err(e: impl std::fmt::Display) -> FleetError {
  FleetError::Storage(e.to_string())
}

pub async fn setup_database(database_url: &str) -> anyhow::Result<Pool<Postgres>> {
  let pool = Pool::<Postgres>::connect(database_url)
    .await
    .context("Failed to connect to database")?;

  MIGRATOR.run(&pool)
    .await
    .context("Failed to run database migrations")?;
  info!("Database migrations complete");
  Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgStore {
  pool: Pool<Postgres>,
}

impl PgStore {
  pub fn new(pool: Pool<Postgres>) -> Self {
    Self { pool }
  }

  pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
    Ok(Self::new(setup_database(database_url).await?))
  }
}

#[async_trait]
impl ClusterStore for PgStore {
  async fn save_snapshot(&self, state: &ClusterState, retention: usize) -> Result<()> {
    let data = serde_json::to_string(state).map_err(storage_err)?;
    sqlx::query("INSERT INTO cluster_snapshots (state_data, created_at) VALUES ($1, $2)")
      .bind(data)
      .bind(state.sync_timestamp)
      .execute(&self.pool)
      .await
      .map_err(storage_err)?;

    sqlx::query(
      "DELETE FROM cluster_snapshots WHERE id NOT IN \
       (SELECT id FROM cluster_snapshots ORDER BY id DESC LIMIT $1)",
    )
    .bind(retention.max(1) as i64)
    .execute(&self.pool)
    .await
    .map_err(storage_err)?;
    Ok(())
  }

  async fn latest_snapshot(&self) -> Result<Option<ClusterState>> {
    let row = sqlx::query("SELECT state_data FROM cluster_snapshots ORDER BY id DESC LIMIT 1")
      .fetch_optional(&self.pool)
      .await
      .map_err(storage_err)?;
    Ok(match row {
      Some(row) => {
        let raw: String = row.try_get("state_data").map_err(storage_err)?;
        decode_snapshot(&raw)
      }
      None => None,
    })
  }

  async fn upsert_known_node(&self, node: &KnownNode) -> Result<()> {
    sqlx::query(
      "INSERT INTO known_nodes (node_id, hostname, address, port, last_seen) \
       VALUES ($1, $2, $3, $4, $5) \
       ON CONFLICT (node_id) DO UPDATE SET hostname = EXCLUDED.hostname, \
       address = EXCLUDED.address, port = EXCLUDED.port, last_seen = EXCLUDED.last_seen",
    )
    .bind(&node.node_id)
    .bind(&node.hostname)
    .bind(&node.address)
    .bind(node.port as i32)
    .bind(node.last_seen)
    .execute(&self.pool)
    .await
    .map_err(storage_err)?;
    Ok(())
  }

  async fn remove_known_node(&self, node_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM known_nodes WHERE node_id = $1")
      .bind(node_id)
      .execute(&self.pool)
      .await
      .map_err(storage_err)?;
    Ok(())
  }

  async fn known_nodes(&self) -> Result<Vec<KnownNode>> {
    let rows = sqlx::query("SELECT node_id, hostname, address, port, last_seen FROM known_nodes")
      .fetch_all(&self.pool)
      .await
      .map_err(storage_err)?;
    rows
      .into_iter()
      .map(|row| {
        let port: i32 = row.try_get("port").map_err(storage_err)?;
        Ok(KnownNode {
          node_id: row.try_get("node_id").map_err(storage_err)?,
          hostname: row.try_get("hostname").map_err(storage_err)?,
          address: row.try_get("address").map_err(storage_err)?,
          port: u16::try_from(port).map_err(storage_err)?,
          last_seen: row.try_get::<DateTime<Utc>, _>("last_seen").map_err(storage_err)?,
        })
      })
      .collect()
  }

  async fn append_failover(&self, event: &FailoverEvent) -> Result<()> {
    sqlx::query(
      "INSERT INTO failover_log (event_type, old_leader, new_leader, reason, timestamp) \
       VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(event.event_type.as_str())
    .bind(&event.old_leader)
    .bind(&event.new_leader)
    .bind(&event.reason)
    .bind(event.timestamp)
    .execute(&self.pool)
    .await
    .map_err(storage_err)?;
    Ok(())
  }

  async fn failover_history(&self, limit: usize) -> Result<Vec<FailoverEvent>> {
    let rows = sqlx::query(
      "SELECT event_type, old_leader, new_leader, reason, timestamp FROM failover_log \
       ORDER BY timestamp DESC, id DESC LIMIT $1",
    )
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await
    .map_err(storage_err)?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
      let kind: String = row.try_get("event_type").map_err(storage_err)?;
      let Ok(event_type) = kind.parse::<FailoverKind>() else {
        warn!(event_type = %kind, "Skipping failover row with unknown type");
        continue;
      };
      events.push(FailoverEvent {
        event_type,
        old_leader: row.try_get("old_leader").map_err(storage_err)?,
        new_leader: row.try_get("new_leader").map_err(storage_err)?,
        reason: row.try_get("reason").map_err(storage_err)?,
        timestamp: row.try_get("timestamp").map_err(storage_err)?,
      });
    }
    Ok(events)
  }
}

/// Process-local store used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
  snapshots: Mutex<Vec<String>>,
  known: Mutex<HashMap<String, KnownNode>>,
  failovers: Mutex<Vec<FailoverEvent>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Push a raw snapshot body, bypassing serialization.
  pub async fn push_raw_snapshot(&self, raw: &str) {
    self.snapshots.lock().await.push(raw.to_string());
  }

  pub async fn snapshot_count(&self) -> usize {
    self.snapshots.lock().await.len()
  }
}

#[async_trait]
impl ClusterStore for MemoryStore {
  async fn save_snapshot(&self, state: &ClusterState, retention: usize) -> Result<()> {
    let data = serde_json::to_string(state).map_err(storage_err)?;
    let mut snapshots = self.snapshots.lock().await;
    snapshots.push(data);
    let keep = retention.max(1);
    if snapshots.len() > keep {
      let excess = snapshots.len() - keep;
      snapshots.drain(..excess);
    }
    Ok(())
  }

  async fn latest_snapshot(&self) -> Result<Option<ClusterState>> {
    Ok(self.snapshots.lock().await.last().and_then(|raw| decode_snapshot(raw)))
  }

  async fn upsert_known_node(&self, node: &KnownNode) -> Result<()> {
    self.known.lock().await.insert(node.node_id.clone(), node.clone());
    Ok(())
  }

  async fn remove_known_node(&self, node_id: &str) -> Result<()> {
    self.known.lock().await.remove(node_id);
    Ok(())
  }

  async fn known_nodes(&self) -> Result<Vec<KnownNode>> {
    Ok(self.known.lock().await.values().cloned().collect())
  }

  async fn append_failover(&self, event: &FailoverEvent) -> Result<()> {
    self.failovers.lock().await.push(event.clone());
    Ok(())
  }

  async fn failover_history(&self, limit: usize) -> Result<Vec<FailoverEvent>> {
    Ok(self.failovers.lock().await.iter().rev().take(limit).cloned().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::ClusterNode;

  #[tokio::test]
  async fn snapshots_are_trimmed_to_retention() {
    let store = MemoryStore::new();
    for term in 1..=5 {
      let state = ClusterState {
        term,
        ..ClusterState::default()
      };
      store.save_snapshot(&state, 3).await.unwrap();
    }
    assert_eq!(store.snapshot_count().await, 3);
    assert_eq!(store.latest_snapshot().await.unwrap().unwrap().term, 5);
  }

  #[tokio::test]
  async fn corrupt_snapshot_reads_as_empty() {
    let store = MemoryStore::new();
    store.push_raw_snapshot("{not json").await;
    assert!(store.latest_snapshot().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn failover_history_is_newest_first() {
    let store = MemoryStore::new();
    store
      .append_failover(&FailoverEvent::new(FailoverKind::NodeJoined, "first"))
      .await
      .unwrap();
    store
      .append_failover(&FailoverEvent::new(FailoverKind::NodeLeft, "second"))
      .await
      .unwrap();
    let history = store.failover_history(10).await.unwrap();
    assert_eq!(history[0].reason, "second");
    assert_eq!(store.failover_history(1).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn known_nodes_upsert_and_remove() {
    let store = MemoryStore::new();
    let node = ClusterNode::new("a", "10.0.0.1", 9000);
    store.upsert_known_node(&KnownNode::from(&node)).await.unwrap();
    store.upsert_known_node(&KnownNode::from(&node)).await.unwrap();
    assert_eq!(store.known_nodes().await.unwrap().len(), 1);
    store.remove_known_node(&node.node_id).await.unwrap();
    assert!(store.known_nodes().await.unwrap().is_empty());
  }
}
