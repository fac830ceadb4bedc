use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;
use warp::Filter;

use super::{leader_redirect, reject, with_jobs};
use crate::error::FleetError;
use crate::job_coordinator::{JobCoordinator, JobRequest};
use crate::models::{JobSummary, WorkPartition};
use crate::rpc::{Ack, PasswordFoundReport, ProgressReport, StatusReport};

/// `GET /jobs/{id}`: the summary plus per-partition detail.
#[derive(Serialize)]
pub struct JobDetail {
  #[serde(flatten)]
  pub summary: JobSummary,
  pub target_hashes: Vec<String>,
  pub partitions: Vec<WorkPartition>,
}

fn sanitize_input(input: &str) -> Result<bool, FleetError> {
  let re = Regex::new(r"^[\w\s.,@!?\-]+$").map_err(|e| FleetError::InvalidArgument(e.to_string()))?;
  Ok(re.is_match(input))
}

fn validate_request(request: &JobRequest) -> Result<(), FleetError> {
  if let Some(name) = &request.name {
    if !sanitize_input(name)? {
      return Err(FleetError::InvalidArgument(format!("unsafe job name {:?}", name)));
    }
  }
  if request.hashes.is_empty() {
    return Err(FleetError::InvalidArgument("no hashes supplied".into()));
  }
  Ok(())
}

pub fn job_routes(jobs: Arc<JobCoordinator>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let submit = warp::path!("jobs")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_jobs(jobs.clone()))
    .and_then(handle_submit);

  let list = warp::path!("jobs")
    .and(warp::get())
    .and(with_jobs(jobs.clone()))
    .and_then(handle_list);

  let detail = warp::path!("jobs" / Uuid)
    .and(warp::get())
    .and(with_jobs(jobs.clone()))
    .and_then(handle_detail);

  let cancel = warp::path!("jobs" / Uuid / "cancel")
    .and(warp::post())
    .and(with_jobs(jobs.clone()))
    .and_then(handle_cancel);

  let status = warp::path!("jobs" / Uuid / "status")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_jobs(jobs.clone()))
    .and_then(handle_status);

  let progress = warp::path!("jobs" / Uuid / "progress")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_jobs(jobs.clone()))
    .and_then(handle_progress);

  let found = warp::path!("jobs" / Uuid / "password-found")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_jobs(jobs))
    .and_then(handle_found);

  submit
    .or(list)
    .or(detail)
    .or(cancel)
    .or(status)
    .or(progress)
    .or(found)
}

async fn handle_submit(request: JobRequest, jobs: Arc<JobCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  if let Err(e) = validate_request(&request) {
    error!("Job validation failed: {}", e);
    return Err(reject(e));
  }
  let submitted = jobs.submit(request).await.map_err(|e| leader_redirect(e, "/jobs"))?;
  info!(job_id = %submitted.job_id, partitions = submitted.partitions, "Job submitted");
  Ok(warp::reply::with_status(
    warp::reply::json(&submitted),
    warp::http::StatusCode::ACCEPTED,
  ))
}

async fn handle_list(jobs: Arc<JobCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&jobs.list_jobs().await))
}

async fn handle_detail(job_id: Uuid, jobs: Arc<JobCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  let job = jobs.job(job_id).await.map_err(reject)?;
  let detail = JobDetail {
    summary: job.summary(),
    target_hashes: job.target_hashes,
    partitions: job.partitions,
  };
  Ok(warp::reply::json(&detail))
}

async fn handle_cancel(job_id: Uuid, jobs: Arc<JobCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  let summary = jobs.cancel_job(job_id).await.map_err(reject)?;
  Ok(warp::reply::json(&summary))
}

async fn handle_status(
  job_id: Uuid,
  report: StatusReport,
  jobs: Arc<JobCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  jobs.handle_status(job_id, report).await.map_err(reject)?;
  Ok(warp::reply::json(&Ack { success: true }))
}

async fn handle_progress(
  job_id: Uuid,
  report: ProgressReport,
  jobs: Arc<JobCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  jobs.handle_progress(job_id, report).await.map_err(reject)?;
  Ok(warp::reply::json(&Ack { success: true }))
}

async fn handle_found(
  job_id: Uuid,
  report: PasswordFoundReport,
  jobs: Arc<JobCoordinator>,
) -> Result<impl warp::Reply, warp::Rejection> {
  jobs.handle_found(job_id, report).await.map_err(reject)?;
  Ok(warp::reply::json(&Ack { success: true }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio_test::assert_ok;

  #[test]
  fn unsafe_names_are_rejected() {
    let mut request = JobRequest {
      name: Some("office dump, batch 2".into()),
      hashes: vec!["5f4dcc3b5aa765d61d8327deb882cf99".into()],
      ..JobRequest::default()
    };
    assert_ok!(validate_request(&request));

    request.name = Some("<script>".into());
    assert!(matches!(validate_request(&request), Err(FleetError::InvalidArgument(_))));
  }

  #[test]
  fn empty_hash_lists_are_rejected() {
    assert!(validate_request(&JobRequest::default()).is_err());
  }
}
