// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! In-process publish/subscribe event bus for execution and metric events.

use crate::model::{Alert, ExecutionId, ExecutionStatus, MetricPoint, SystemMetrics, Violation};
use std::collections::HashMap;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 1024;

/// A tagged message published by engine components.
#[derive(Debug, Clone)]
pub enum Event {
    ExecutionStarted {
        execution_id: ExecutionId,
        config_name: String,
    },
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        duration: chrono::Duration,
        error: Option<String>,
    },
    MetricsSystem {
        snapshot: SystemMetrics,
    },
    MetricsExecution {
        execution_id: ExecutionId,
        fields: HashMap<String, f64>,
    },
    SafetyViolation {
        violation: Violation,
    },
    SafetyAlert {
        alert: Alert,
    },
}

/// Cloneable handle onto the bus. Publish never blocks; with no subscribers or a full
/// subscriber queue, the message is simply dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publishes an event. Ignores the "no receivers" error: publishers never observe
    /// backpressure from subscribers.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Registers a new subscriber. A slow subscriber that falls more than `BUS_CAPACITY`
    /// messages behind will observe `RecvError::Lagged` on its next `recv` and should skip
    /// forward rather than treat it as fatal.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = EventBus::new();
        bus.publish(Event::ExecutionStarted {
            execution_id: Uuid::new_v4(),
            config_name: "cpu-stress".into(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(Event::ExecutionStarted {
            execution_id: id,
            config_name: "cpu-stress".into(),
        });

        let event = rx.recv().await.unwrap();
        match event {
            Event::ExecutionStarted { execution_id, .. } => assert_eq!(execution_id, id),
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking_publisher() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for _ in 0..(BUS_CAPACITY + 10) {
            bus.publish(Event::MetricsSystem {
                snapshot: SystemMetrics::zero(),
            });
        }

        // Publisher never blocked above. The lagging subscriber observes Lagged, not a hang.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Ok(_) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
}
