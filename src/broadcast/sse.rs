//! SSE Endpoint
//!
//! `GET /milestones/:id/stream` — unauthenticated, read-only. Frames are
//! `data: <json>\n\n` with an explicit `ping` at most 30 seconds apart.
//! A disconnecting client drops its receiver, which releases the hub slot
//! on the next prune.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::messages::BroadcastMessage;
use crate::api::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(25);

pub async fn milestone_stream(
    State(state): State<Arc<AppState>>,
    Path(milestone_id): Path<i64>,
) -> impl IntoResponse {
    let rx = state.hub.subscribe(milestone_id);
    tracing::debug!(
        "SSE subscriber connected for milestone {} ({} total)",
        milestone_id,
        state.hub.subscriber_count(milestone_id)
    );

    let stream = event_stream(milestone_id, rx);

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
}

fn event_stream(
    milestone_id: i64,
    rx: broadcast::Receiver<BroadcastMessage>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    enum StreamState {
        Greeting,
        Live,
    }

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    futures::stream::unfold(
        (StreamState::Greeting, rx, ping),
        move |(phase, mut rx, mut ping)| async move {
            if let StreamState::Greeting = phase {
                let hello = frame(&BroadcastMessage::connection(milestone_id));
                return Some((hello, (StreamState::Live, rx, ping)));
            }

            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Ok(message) => {
                            return Some((frame(&message), (StreamState::Live, rx, ping)));
                        }
                        // Slow consumer: intermediate frames are gone by
                        // design; keep streaming from the tail.
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            metrics::counter!("sse_frames_dropped").increment(n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return None;
                        }
                    },
                    _ = ping.tick() => {
                        return Some((frame(&BroadcastMessage::ping()), (StreamState::Live, rx, ping)));
                    }
                }
            }
        },
    )
}

fn frame(message: &BroadcastMessage) -> Result<Event, Infallible> {
    let event = match serde_json::to_string(message) {
        Ok(json) => Event::default().data(json),
        Err(e) => Event::default().data(format!(
            r#"{{"type":"error","message":"encode failed: {e}"}}"#
        )),
    };
    Ok(event)
}
