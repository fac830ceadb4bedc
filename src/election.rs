use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout_at};
use tracing::{debug, info};

use crate::cluster::{ClusterCoordinator, VoteTally};

static MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Watch for a silent leader and start elections.
pub(crate) fn start_election_monitor(coord: Arc<ClusterCoordinator>) -> JoinHandle<()> {
  tokio::spawn(async move {
    coord.bootstrap().await;
    coord.with_core(|c| c.reset_election_timer()).await;

    let mut timeout = coord.next_election_timeout();
    let check = (coord.config().election_timeout / 10).max(MIN_CHECK_INTERVAL);
    let mut ticker = interval(check);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(?timeout, "Election monitor started");

    loop {
      tokio::select! {
        _ = coord.shutdown_token().cancelled() => break,
        _ = ticker.tick() => {}
      }

      if coord.with_core(|c| c.election_due(timeout)).await {
        info!(?timeout, "No heartbeat from a leader, starting election");
        run_election(&coord).await;
        timeout = coord.next_election_timeout();
      }
    }
    debug!("Election monitor stopped");
  })
}

/// One election round. Votes are requested in parallel and tallied as they
/// arrive until a majority, a step-down or the end of the vote window.
pub(crate) async fn run_election(coord: &ClusterCoordinator) -> bool {
  let ticket = coord.with_core(|c| c.start_election()).await;
  let deadline = Instant::now() + coord.config().vote_window;

  let mut pending: FuturesUnordered<_> = ticket
    .peers
    .iter()
    .map(|endpoint| {
      let client = coord.client().clone();
      let request = ticket.request.clone();
      let endpoint = endpoint.clone();
      async move {
        let result = client.request_vote(&endpoint, &request).await;
        (endpoint, result)
      }
    })
    .collect();

  let mut tally = if coord.with_core(|c| c.has_majority()).await {
    VoteTally::Won
  } else {
    VoteTally::Pending
  };
  while tally == VoteTally::Pending {
    match timeout_at(deadline, pending.next()).await {
      Ok(Some((endpoint, Ok(response)))) => {
        tally = coord
          .with_core(|c| c.record_vote(ticket.term, &endpoint, &response))
          .await;
      }
      Ok(Some((endpoint, Err(e)))) => {
        debug!(peer = %endpoint, error = %e, "Vote request failed");
      }
      Ok(None) => break,
      Err(_) => {
        debug!(term = ticket.term, "Vote window closed");
        break;
      }
    }
  }
  drop(pending);

  let Some(event) = coord.with_core(|c| c.conclude_election(ticket.term)).await else {
    return false;
  };
  let won = coord.is_leader();
  coord.record(event).await;
  if won {
    coord.persist_snapshot().await;
  }
  won
}
