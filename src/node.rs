//! One fleet member: cluster participant, job coordinator while leader, and
//! worker, all served from the same HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster::ClusterCoordinator;
use crate::config::Config;
use crate::database::{ClusterStore, MemoryStore, PgStore};
use crate::job_coordinator::JobCoordinator;
use crate::messaging::PeerClient;
use crate::metrics::{SystemMetrics, platform_metrics};
use crate::routes::routes;
use crate::worker::WorkerRuntime;

static SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct FleetNode {
  config: Config,
  store: Arc<dyn ClusterStore>,
  metrics: Arc<dyn SystemMetrics>,
}

impl FleetNode {
  /// Postgres when `DATABASE_URL` is set, otherwise process memory.
  pub async fn build(config: Config) -> anyhow::Result<Self> {
    let store: Arc<dyn ClusterStore> = match &config.database_url {
      Some(url) => Arc::new(PgStore::connect(url).await?),
      None => {
        warn!("DATABASE_URL not set, cluster state is kept in memory only");
        Arc::new(MemoryStore::new())
      }
    };
    Ok(Self::with_store(config, store, platform_metrics()))
  }

  pub fn with_store(config: Config, store: Arc<dyn ClusterStore>, metrics: Arc<dyn SystemMetrics>) -> Self {
    Self { config, store, metrics }
  }

  /// Bind the listener and start every background loop.
  pub async fn spawn(self) -> anyhow::Result<NodeHandle> {
    let Self { config, store, metrics } = self;
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.cluster.port)
      .parse()
      .with_context(|| format!("invalid bind address {}:{}", config.bind_address, config.cluster.port))?;

    let shutdown = CancellationToken::new();
    let client = PeerClient::new(config.cluster.rpc_timeout)
      .with_retry(config.jobs.dispatch_retries, config.cluster.retry_backoff_factor);

    let cluster = Arc::new(ClusterCoordinator::new(
      config.cluster.clone(),
      store,
      client.clone(),
      metrics,
      shutdown.clone(),
    ));
    let jobs = Arc::new(JobCoordinator::new(
      cluster.clone(),
      Arc::new(client.clone()),
      config.jobs.clone(),
    ));
    let worker = Arc::new(WorkerRuntime::new(
      cluster.local_id(),
      client,
      &config.worker,
      shutdown.clone(),
    ));

    let api = routes(cluster.clone(), jobs.clone(), worker.clone());
    let (addr, server) = warp::serve(api)
      .try_bind_with_graceful_shutdown(addr, shutdown.clone().cancelled_owned())
      .with_context(|| format!("failed to bind {}", addr))?;

    cluster.restore().await;
    let mut tasks = vec![tokio::spawn(server)];
    tasks.extend(cluster.start());
    tasks.push(jobs.start());
    tasks.push(worker.start());

    info!(
      node_id = %cluster.local_id(),
      endpoint = %cluster.local_endpoint(),
      %addr,
      "Node started"
    );
    Ok(NodeHandle {
      addr,
      cluster,
      jobs,
      worker,
      tasks,
    })
  }

  /// Serve until ctrl-c.
  pub async fn run(self) -> anyhow::Result<()> {
    let handle = self.spawn().await?;
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Shutdown requested");
    handle.shutdown().await;
    Ok(())
  }
}

pub struct NodeHandle {
  pub addr: SocketAddr,
  pub cluster: Arc<ClusterCoordinator>,
  pub jobs: Arc<JobCoordinator>,
  pub worker: Arc<WorkerRuntime>,
  tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
  /// Record the shutdown, stop every loop and wait for them briefly.
  pub async fn shutdown(self) {
    self.cluster.shutdown().await;
    for task in self.tasks {
      if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
        warn!("Background task did not stop in time");
      }
    }
    info!(node_id = %self.cluster.local_id(), "Node stopped");
  }
}
