use std::sync::Arc;

use warp::Filter;

use super::{reject, with_worker};
use crate::rpc::{Ack, CancelPartitionRequest, DispatchRequest};
use crate::worker::WorkerRuntime;

pub fn worker_routes(
  worker: Arc<WorkerRuntime>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  let dispatch = warp::path!("worker" / "partitions")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_worker(worker.clone()))
    .and_then(handle_dispatch);

  let cancel = warp::path!("worker" / "partitions" / "cancel")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_worker(worker))
    .and_then(handle_cancel);

  dispatch.or(cancel)
}

async fn handle_dispatch(
  request: DispatchRequest,
  worker: Arc<WorkerRuntime>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let ack = worker.accept(request).await.map_err(reject)?;
  Ok(warp::reply::json(&ack))
}

async fn handle_cancel(
  request: CancelPartitionRequest,
  worker: Arc<WorkerRuntime>,
) -> Result<impl warp::Reply, warp::Rejection> {
  let known = worker.cancel(request.job_id, request.partition_id).await;
  Ok(warp::reply::json(&Ack { success: known }))
}
