//! Server-Sent Events (SSE) for live poll results.
//!
//! A results stream always opens with a `gate` event. Voters who are allowed
//! to see the results then receive a `results` event per fresh snapshot,
//! produced by a [`RealtimeSynchronizer`] that lives exactly as long as the
//! connection. Everyone else gets the gate event and the stream ends.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    routing::get,
};
use futures::StreamExt;
use futures::future;
use futures::stream::{self, BoxStream};
use serde::Serialize;
use tracing::debug;
use unirank_core::{GateState, GateTarget, PollResults, RealtimeSynchronizer};

use crate::{extractors::VoterIdentity, middleware::AppState};

/// Event name of gate events.
pub const GATE_EVENT: &str = "gate";
/// Event name of result snapshot events.
pub const RESULTS_EVENT: &str = "results";

type EventStream = BoxStream<'static, Result<Event, Infallible>>;
type ResultsSse = Sse<KeepAliveStream<EventStream>>;

/// Payload of a gate event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatePayload<'a> {
    poll_id: &'a str,
    state: GateState,
}

fn gate_event(poll_id: &str, state: GateState) -> Event {
    Event::default()
        .event(GATE_EVENT)
        .json_data(GatePayload { poll_id, state })
        .unwrap_or_else(|_| Event::default().event(GATE_EVENT).data("error"))
}

fn results_event(results: &PollResults) -> Event {
    Event::default()
        .event(RESULTS_EVENT)
        .json_data(results)
        .unwrap_or_else(|_| Event::default().event(RESULTS_EVENT).data("error"))
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(30))
        .text("ping")
}

/// Stream of result snapshots that owns its synchronizer.
///
/// Dropping the stream (client disconnect) drops the synchronizer, which
/// cancels its timer and unsubscribes from the invalidation bus.
fn snapshot_stream(sync: RealtimeSynchronizer) -> EventStream {
    let rx = sync.snapshots();

    stream::unfold((sync, rx), |(sync, mut rx)| async move {
        loop {
            if rx.changed().await.is_err() {
                return None;
            }
            let snapshot = rx.borrow_and_update().clone();
            if let Some(results) = snapshot {
                return Some((Ok(results_event(&results)), (sync, rx)));
            }
        }
    })
    .boxed()
}

/// Live results of a poll.
async fn poll_results(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
) -> ResultsSse {
    let gate = state
        .gate_service
        .get_gate_state(&GateTarget::Poll(poll_id.clone()), &identity)
        .await;
    let opening = stream::once(future::ready(Ok(gate_event(&poll_id, gate))));

    if gate != GateState::Unlocked {
        debug!(poll_id = %poll_id, ?gate, "Results stream closed by gate");
        return Sse::new(opening.boxed()).keep_alive(keep_alive());
    }

    let sync = RealtimeSynchronizer::start(
        &poll_id,
        state.aggregator.clone(),
        &state.bus,
        state.sync_config.clone(),
    )
    .await;

    Sse::new(opening.chain(snapshot_stream(sync)).boxed()).keep_alive(keep_alive())
}

/// Create SSE router.
pub fn router() -> Router<AppState> {
    Router::new().route("/polls/{poll_id}/results", get(poll_results))
}
