use std::sync::Arc;

use serde::Deserialize;
use tracing::info;
use warp::Filter;

use super::{leader_redirect, reject, with_cluster};
use crate::cluster::ClusterCoordinator;
use crate::rpc::{HeartbeatRequest, JoinRequest, LeaveRequest, VoteRequest};

static DEFAULT_FAILOVER_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct FailoverQuery {
  pub limit: Option<usize>,
}

pub fn cluster_routes(
  cluster: Arc<ClusterCoordinator>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let info = warp::path!("cluster" / "info")
    .and(warp::get())
    .and(with_cluster(cluster.clone()))
    .and_then(handle_info);

  let vote = warp::path!("cluster" / "vote")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_cluster(cluster.clone()))
    .and_then(handle_vote);

  let heartbeat = warp::path!("cluster" / "heartbeat")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_cluster(cluster.clone()))
    .and_then(handle_heartbeat);

  let join = warp::path!("cluster" / "join")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_cluster(cluster.clone()))
    .and_then(handle_join);

  let leave = warp::path!("cluster" / "leave")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_cluster(cluster.clone()))
    .and_then(handle_leave);

  let force_election = warp::path!("cluster" / "force-election")
    .and(warp::post())
    .and(with_cluster(cluster.clone()))
    .and_then(handle_force_election);

  let failover = warp::path!("cluster" / "failover")
    .and(warp::get())
    .and(warp::query::<FailoverQuery>())
    .and(with_cluster(cluster.clone()))
    .and_then(handle_failover);

  let metrics = warp::path!("cluster" / "metrics")
    .and(warp::get())
    .and(with_cluster(cluster))
    .and_then(handle_metrics);

  info
    .or(vote)
    .or(heartbeat)
    .or(join)
    .or(leave)
    .or(force_election)
    .or(failover)
    .or(metrics)
}

async fn handle_info(cluster: Arc<ClusterCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&cluster.info().await))
}

async fn handle_vote(
  request: VoteRequest,
  cluster: Arc<ClusterCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&cluster.handle_vote(&request).await))
}

async fn handle_heartbeat(
  request: HeartbeatRequest,
  cluster: Arc<ClusterCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&cluster.handle_heartbeat(&request).await))
}

async fn handle_join(
  request: JoinRequest,
  cluster: Arc<ClusterCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let node_id = request.node_info.node_id.clone();
  let response = cluster
    .handle_join(request)
    .await
    .map_err(|e| leader_redirect(e, "/cluster/join"))?;
  info!(node_id = %node_id, "Join accepted");
  Ok(warp::reply::json(&response))
}

async fn handle_leave(
  request: LeaveRequest,
  cluster: Arc<ClusterCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let response = cluster
    .handle_leave(&request.node_id)
    .await
    .map_err(|e| leader_redirect(e, "/cluster/leave"))?;
  Ok(warp::reply::json(&response))
}

async fn handle_force_election(cluster: Arc<ClusterCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&cluster.force_election().await))
}

async fn handle_failover(
  query: FailoverQuery,
  cluster: Arc<ClusterCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let history = cluster
    .failover_history(query.limit.unwrap_or(DEFAULT_FAILOVER_LIMIT))
    .await
    .map_err(reject)?;
  Ok(warp::reply::json(&history))
}

async fn handle_metrics(cluster: Arc<ClusterCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&cluster.cluster_metrics().await))
}
