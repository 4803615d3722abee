//! Server-Sent Events (SSE) utilities
//!
//! Converts a progress channel receiver into an axum SSE response. The stream
//! ends when the sending side of the channel is dropped, which is how the
//! progress notifier closes idle or torn-down channels.

use crate::events::ProgressEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Build an SSE response streaming every event received on `rx`
///
/// Heartbeat events are emitted as SSE comments so observers do not have to
/// filter them. `keep_alive` is a transport-level fallback independent of the
/// notifier's own heartbeat.
pub fn progress_sse_stream(
    mut rx: mpsc::Receiver<ProgressEvent>,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        info!("SSE: progress stream started");

        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        while let Some(event) = rx.recv().await {
            if let ProgressEvent::Heartbeat { .. } = event {
                debug!("SSE: Sending heartbeat");
                yield Ok(Event::default().comment("heartbeat"));
                continue;
            }

            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(event_json) => {
                    debug!("SSE: Broadcasting progress event: {}", event_type);
                    yield Ok(Event::default().event(event_type).data(event_json));
                }
                Err(e) => {
                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                }
            }
        }

        info!("SSE: progress stream closed");
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive).text("heartbeat"))
}
