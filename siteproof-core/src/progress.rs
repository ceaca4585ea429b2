use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::EntityType;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStage {
    Hashing,
    Storing,
    Processing,
    Thumbnail,
    Complete,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Capture {
        evidence_id: String,
        stage: CaptureStage,
    },
    Upload {
        evidence_id: String,
        bytes_sent: u64,
        total_bytes: u64,
    },
    EntrySynced {
        entity_type: EntityType,
        entity_id: String,
    },
}

/// Fan-out of progress to whoever is listening. Publishing with no
/// subscribers is not an error; slow subscribers lose old events.
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = ProgressBus::new();
        bus.publish(ProgressEvent::Capture {
            evidence_id: "dropped".into(),
            stage: CaptureStage::Hashing,
        });

        let mut rx = bus.subscribe();
        for stage in [CaptureStage::Hashing, CaptureStage::Storing] {
            bus.publish(ProgressEvent::Capture {
                evidence_id: "e1".into(),
                stage,
            });
        }

        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::Capture {
                evidence_id: "e1".into(),
                stage: CaptureStage::Hashing
            }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::Capture {
                stage: CaptureStage::Storing,
                ..
            }
        ));
    }
}
