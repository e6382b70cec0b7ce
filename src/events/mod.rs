use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::entities::quality_test::TestStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event whose owning transaction has already committed. A
    /// closed channel is only logged.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped after commit");
        }
    }
}

/// Domain events, emitted after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BatchIssued {
        batch_id: i32,
        sku_id: i32,
        prefix: String,
        quantity: i32,
        first_sequence: String,
        last_sequence: String,
        issued_at: DateTime<Utc>,
    },
    BatchDeleted {
        batch_id: i32,
        barcodes_removed: u64,
    },
    TestRecorded {
        test_id: i32,
        barcode_id: i32,
        status: TestStatus,
        failed_answers: usize,
    },
    TestStatusChanged {
        test_id: i32,
        old_status: TestStatus,
        new_status: TestStatus,
    },
    TemplateDeleted {
        template_id: i32,
        detached_tests: u64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BatchIssued { .. } => "batch_issued",
            Event::BatchDeleted { .. } => "batch_deleted",
            Event::TestRecorded { .. } => "test_recorded",
            Event::TestStatusChanged { .. } => "test_status_changed",
            Event::TemplateDeleted { .. } => "template_deleted",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Writes every event to the log as structured fields.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::BatchIssued {
                batch_id,
                prefix,
                quantity,
                first_sequence,
                last_sequence,
                ..
            } => info!(
                batch_id,
                prefix = %prefix,
                quantity,
                first = %first_sequence,
                last = %last_sequence,
                "batch issued"
            ),
            Event::BatchDeleted {
                batch_id,
                barcodes_removed,
            } => info!(batch_id, barcodes_removed, "batch deleted"),
            Event::TestRecorded {
                test_id,
                barcode_id,
                status,
                failed_answers,
            } => info!(test_id, barcode_id, status = %status, failed_answers, "test recorded"),
            Event::TestStatusChanged {
                test_id,
                old_status,
                new_status,
            } => info!(test_id, from = %old_status, to = %new_status, "test status changed"),
            Event::TemplateDeleted {
                template_id,
                detached_tests,
            } => info!(template_id, detached_tests, "template deleted"),
        }
        Ok(())
    }
}

/// Counts events per kind.
pub struct MetricsEventHandler;

#[async_trait]
impl EventHandler for MetricsEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        metrics::counter!("batchtrace.events", 1, "event" => event.name());
        Ok(())
    }
}

pub fn default_handlers() -> Vec<Arc<dyn EventHandler>> {
    vec![Arc::new(LoggingEventHandler), Arc::new(MetricsEventHandler)]
}

// Fan each incoming event out to all handlers until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let results = join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
        for e in results.into_iter().filter_map(Result::err) {
            error!(event = event.name(), error = %e, "event handler failed");
        }
    }

    info!("Event channel closed; stopping event processing");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: &Event) -> Result<(), String> {
            self.0.lock().unwrap().push(event.name());
            Ok(())
        }
    }

    #[tokio::test]
    async fn process_events_dispatches_until_closed() {
        let (tx, rx) = mpsc::channel(4);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![recorder.clone(), Arc::new(LoggingEventHandler)];
        let worker = tokio::spawn(process_events(rx, handlers));

        let sender = EventSender::new(tx);
        sender
            .send(Event::BatchDeleted {
                batch_id: 1,
                barcodes_removed: 3,
            })
            .await
            .unwrap();
        sender
            .send(Event::TemplateDeleted {
                template_id: 2,
                detached_tests: 0,
            })
            .await
            .unwrap();
        drop(sender);
        worker.await.unwrap();

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["batch_deleted", "template_deleted"]
        );
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender
            .send(Event::BatchDeleted {
                batch_id: 1,
                barcodes_removed: 0
            })
            .await
            .is_err());
        sender
            .send_or_log(Event::BatchDeleted {
                batch_id: 1,
                barcodes_removed: 0,
            })
            .await;
    }
}
