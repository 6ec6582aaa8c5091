//! SSE progress stream.
//!
//! GET /research/jobs/:id/stream
//!
//! Sends `connected`, replays the job's buffered events, then follows live
//! events until the terminal status event. Slow clients get a `lagged`
//! event with the number of events they missed. A finished job whose
//! events were already evicted gets its final status from the snapshot.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use research_pipeline::{EventKind, Job, JobEvent, JobId};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::server::app::AppState;
use crate::server::error::ApiError;

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// SSE stream handler.
pub async fn stream_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<JobId>,
) -> Result<Sse<EventStream>, ApiError> {
    // 404 before opening a stream.
    let job = state.deps.registry.get(id).await?;

    let (mut backlog, rx) = state.deps.registry.events().subscribe(id).await;
    let last_seq = backlog.last().map_or(0, |e| e.seq);
    let mut finished = backlog.iter().any(JobEvent::is_terminal);
    if !finished && job.status.is_terminal() {
        backlog.push(final_status(&job, last_seq + 1));
        finished = true;
    }

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });
    let replay = stream::iter(backlog.into_iter().filter_map(|e| to_sse(&e).map(Ok)));

    let live: EventStream = if finished {
        stream::empty().boxed()
    } else {
        BroadcastStream::new(rx)
            .filter(move |result| {
                let fresh = !matches!(result, Ok(e) if e.seq <= last_seq);
                future::ready(fresh)
            })
            .scan(false, |done, result| {
                if *done {
                    return future::ready(None);
                }
                let event = match result {
                    Ok(e) => {
                        *done = e.is_terminal();
                        to_sse(&e)
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                        .event("lagged")
                        .json_data(serde_json::json!({ "missed": n }))
                        .ok(),
                };
                future::ready(Some(event))
            })
            .filter_map(|event| future::ready(event.map(Ok)))
            .boxed()
    };

    let events: EventStream = connected.chain(replay).chain(live).boxed();
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Terminal status event rebuilt from a stored snapshot.
fn final_status(job: &Job, seq: u64) -> JobEvent {
    JobEvent {
        seq,
        ts: job.finished_at.unwrap_or(job.updated_at),
        kind: EventKind::Status {
            status: job.status,
            reason: job.failure_reason,
        },
    }
}

fn to_sse(event: &JobEvent) -> Option<Event> {
    Event::default()
        .event(event.event_name())
        .id(event.seq.to_string())
        .json_data(event)
        .ok()
}
