use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tracing::debug;
use uuid::Uuid;
use warp::Filter;

use super::{reject, with_jobs};
use crate::job_coordinator::JobCoordinator;
use crate::models::JobStatus;

static EVENT_INTERVAL: Duration = Duration::from_secs(2);

pub fn sse_route(jobs: Arc<JobCoordinator>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("jobs" / Uuid / "events")
    .and(warp::get())
    .and(with_jobs(jobs))
    .and_then(handle_sse)
}

/// Stream the job summary every two seconds once the job has left `pending`.
async fn handle_sse(job_id: Uuid, jobs: Arc<JobCoordinator>) -> Result<impl warp::Reply, warp::Rejection> {
  jobs.job_summary(job_id).await.map_err(reject)?;

  let interval = IntervalStream::new(tokio::time::interval(EVENT_INTERVAL));
  let stream = interval
    .then(move |_| {
      let jobs = jobs.clone();
      async move {
        match jobs.job_summary(job_id).await {
          Ok(summary) if summary.status != JobStatus::Pending => {
            let event = warp::sse::Event::default()
              .event(summary.status.to_string())
              .json_data(&summary);
            match event {
              Ok(event) => Some(Ok::<_, Infallible>(event)),
              Err(e) => {
                debug!(job_id = %job_id, error = %e, "Could not encode job event");
                None
              }
            }
          }
          Ok(_) => None,
          Err(e) => {
            debug!(job_id = %job_id, error = %e, "Job vanished from the event stream");
            None
          }
        }
      }
    })
    .filter_map(|x| x);

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}
