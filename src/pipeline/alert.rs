use serde::Serialize;
use tokio::sync::broadcast;

use crate::detect::{Detection, Priority};

/// Buffered alert events per subscriber before slow subscribers start lagging.
pub const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Notification for a batch that contains HIGH priority detections.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertEvent {
    pub timestamp: u64,
    pub detections: Vec<Detection>,
}

/// Picks HIGH detections out of a batch and notifies subscribers.
///
/// Notification is a non-blocking broadcast send; a slow or absent subscriber never
/// holds up the next detection cycle.
pub struct AlertEvaluator {
    sender: broadcast::Sender<AlertEvent>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }

    /// Return the HIGH subset of `batch`, or nothing when alerts are disabled.
    pub fn evaluate(&self, batch: &[Detection], enable_alerts: bool) -> Vec<Detection> {
        if !enable_alerts {
            return Vec::new();
        }
        let alerts: Vec<Detection> = batch
            .iter()
            .filter(|d| d.priority == Priority::High)
            .cloned()
            .collect();
        if let Some(first) = alerts.first() {
            log::warn!("HIGH PRIORITY DETECTION: {} safety alerts", alerts.len());
            let event = AlertEvent {
                timestamp: first.timestamp,
                detections: alerts.clone(),
            };
            // No subscribers is fine.
            let _ = self.sender.send(event);
        }
        alerts
    }
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
