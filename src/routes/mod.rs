use std::convert::Infallible;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error};
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

use crate::cluster::ClusterCoordinator;
use crate::error::FleetError;
use crate::job_coordinator::JobCoordinator;
use crate::worker::WorkerRuntime;

pub mod cluster;
pub mod jobs;
pub mod sse;
pub mod worker;

/// A [`FleetError`] travelling through warp as a rejection. `redirect` is
/// set when the request should be retried against the leader.
#[derive(Debug)]
pub struct ApiError {
  pub error: FleetError,
  pub redirect: Option<String>,
}

impl warp::reject::Reject for ApiError {}

pub fn reject(error: FleetError) -> Rejection {
  warp::reject::custom(ApiError { error, redirect: None })
}

/// Like [`reject`], but a `NotLeader` error with a known leader turns into a
/// redirect to the same `path` on the leader.
pub fn leader_redirect(error: FleetError, path: &str) -> Rejection {
  let redirect = match &error {
    FleetError::NotLeader {
      leader_address: Some(address),
      ..
    } => Some(format!("http://{}{}", address, path)),
    _ => None,
  };
  warp::reject::custom(ApiError { error, redirect })
}

pub(crate) fn with_cluster(
  cluster: Arc<ClusterCoordinator>,
) -> impl Filter<Extract = (Arc<ClusterCoordinator>,), Error = Infallible> + Clone {
  warp::any().map(move || cluster.clone())
}

pub(crate) fn with_jobs(
  jobs: Arc<JobCoordinator>,
) -> impl Filter<Extract = (Arc<JobCoordinator>,), Error = Infallible> + Clone {
  warp::any().map(move || jobs.clone())
}

pub(crate) fn with_worker(
  worker: Arc<WorkerRuntime>,
) -> impl Filter<Extract = (Arc<WorkerRuntime>,), Error = Infallible> + Clone {
  warp::any().map(move || worker.clone())
}

pub fn routes(
  cluster: Arc<ClusterCoordinator>,
  jobs: Arc<JobCoordinator>,
  worker: Arc<WorkerRuntime>,
) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
  cluster::cluster_routes(cluster)
    .or(sse::sse_route(jobs.clone()))
    .or(jobs::job_routes(jobs))
    .or(worker::worker_routes(worker))
    .map(|reply| Reply::into_response(reply))
    .recover(handle_rejection)
    .unify()
}

fn status_for(error: &FleetError) -> StatusCode {
  match error {
    FleetError::InvalidSymbol(_)
    | FleetError::LengthMismatch { .. }
    | FleetError::OutOfRange(_)
    | FleetError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
    FleetError::PartitionOverflow { .. }
    | FleetError::RangeMismatch { .. }
    | FleetError::UnsupportedConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
    FleetError::JobNotFound(_) | FleetError::NodeNotFound(_) => StatusCode::NOT_FOUND,
    FleetError::NotLeader { .. } => StatusCode::CONFLICT,
    FleetError::NoWorkersAvailable => StatusCode::SERVICE_UNAVAILABLE,
    FleetError::NodeUnreachable { .. } => StatusCode::BAD_GATEWAY,
    FleetError::ElectionFailure { .. } | FleetError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

fn error_reply(status: StatusCode, message: &str, kind: &str) -> Response {
  warp::reply::with_status(warp::reply::json(&json!({ "error": message, "kind": kind })), status).into_response()
}

pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
  if let Some(ApiError { error, redirect }) = rejection.find::<ApiError>() {
    if let Some(location) = redirect {
      debug!(location = %location, "Redirecting to leader");
      let body = warp::reply::json(&json!({ "error": error.to_string(), "kind": error.kind() }));
      let reply = warp::reply::with_status(body, StatusCode::TEMPORARY_REDIRECT);
      return Ok(warp::reply::with_header(reply, "location", location.as_str()).into_response());
    }
    let status = status_for(error);
    if status.is_server_error() {
      error!(error = %error, "Request failed");
    }
    return Ok(error_reply(status, &error.to_string(), error.kind()));
  }

  if rejection.is_not_found() {
    return Ok(error_reply(StatusCode::NOT_FOUND, "Not found", "not_found"));
  }
  if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
    return Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string(), "invalid_body"));
  }
  if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
    return Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string(), "invalid_query"));
  }
  if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
    return Ok(error_reply(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", "method_not_allowed"));
  }

  error!(rejection = ?rejection, "Unhandled rejection");
  Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal error", "internal"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn errors_map_to_status_codes() {
    assert_eq!(status_for(&FleetError::InvalidSymbol('x')), StatusCode::BAD_REQUEST);
    assert_eq!(
      status_for(&FleetError::PartitionOverflow {
        requested: "1".into(),
        cap: 0
      }),
      StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(status_for(&FleetError::NoWorkersAvailable), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
      status_for(&FleetError::NodeNotFound("n".into())),
      StatusCode::NOT_FOUND
    );
  }

  #[tokio::test]
  async fn known_leader_becomes_a_redirect() {
    let rejection = leader_redirect(
      FleetError::NotLeader {
        leader_id: Some("abc".into()),
        leader_address: Some("10.0.0.2:8080".into()),
      },
      "/jobs",
    );
    let response = handle_rejection(rejection).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()["location"], "http://10.0.0.2:8080/jobs");
  }

  #[tokio::test]
  async fn unknown_leader_is_a_conflict() {
    let rejection = leader_redirect(
      FleetError::NotLeader {
        leader_id: None,
        leader_address: None,
      },
      "/jobs",
    );
    let response = handle_rejection(rejection).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
  }
}
