use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::base::DeleteEvent;
use super::bus::DeleteEventBus;

/// Server-sent-events adapter over the bus's broadcast channel.
///
/// Each event is rendered as a `data: <json>\n\n` frame; a comment heartbeat
/// frame goes out on an interval so proxies keep the connection open. The
/// pump task ends as soon as the consumer drops its receiver.
pub struct SseStream {
    rx: mpsc::Receiver<String>,
    task: JoinHandle<()>,
}

impl SseStream {
    pub fn attach(bus: &DeleteEventBus, heartbeat: Duration) -> Self {
        let events = bus.subscribe();
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(pump(events, tx, heartbeat));
        Self { rx, task }
    }

    /// Next frame, or `None` once the stream is closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn render_frame(event: &DeleteEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(format!("data: {}\n\n", json)),
        Err(e) => {
            warn!("Failed to render SSE frame for event {}: {}", event.id, e);
            None
        }
    }
}

async fn pump(
    mut events: broadcast::Receiver<DeleteEvent>,
    tx: mpsc::Sender<String>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately; swallow it so the heartbeat cadence
    // starts one full interval after attach.
    ticker.tick().await;

    loop {
        tokio::select! {
            received = events.recv() => {
                match received {
                    Ok(event) => {
                        let Some(frame) = render_frame(&event) else { continue };
                        if tx.send(frame).await.is_err() {
                            debug!("SSE consumer disconnected, stopping stream");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("SSE stream lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event bus closed, stopping SSE stream");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if tx.send(": heartbeat\n\n".to_string()).await.is_err() {
                    debug!("SSE consumer disconnected during heartbeat");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::base::EventKind;
    use crate::ports::EntityKind;

    #[tokio::test]
    async fn test_event_frame_shape() {
        let bus = DeleteEventBus::new(10);
        let mut stream = SseStream::attach(&bus, Duration::from_secs(60));

        bus.emit(DeleteEvent::new(EventKind::Delete, EntityKind::Contact, "c1", "tester"))
            .await;

        let frame = stream.next_frame().await.unwrap();
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
        let json: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(json["entity_id"], "c1");
        assert_eq!(json["kind"], "delete");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_frames() {
        let bus = DeleteEventBus::new(10);
        let mut stream = SseStream::attach(&bus, Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(250)).await;
        let frame = stream.next_frame().await.unwrap();
        assert_eq!(frame, ": heartbeat\n\n");
    }
}
