//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE plumbing for Cueflow services.

use crate::events::CueflowEvent;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Create an SSE stream that mirrors a broadcast receiver of CueflowEvents.
///
/// Lagged receivers skip ahead rather than terminating the stream; SSE
/// clients are monitoring surfaces and must not block the ingest path.
pub fn create_event_sse_stream(
    service_name: &'static str,
    mut rx: broadcast::Receiver<CueflowEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);

    let stream = async_stream::stream! {
        // Send initial connected status
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = match serde_json::to_string(&event) {
                        Ok(data) => data,
                        Err(e) => {
                            debug!("SSE: failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    yield Ok(Event::default().event(event.event_name()).data(data));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("SSE: {} client lagged, skipped {} events", service_name, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("SSE: {} event channel closed", service_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
