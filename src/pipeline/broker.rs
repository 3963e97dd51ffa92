use std::collections::VecDeque;

use async_trait::async_trait;

use tokio::sync::mpsc;
use tokio::sync::{Mutex, Notify};

use crate::error::PipelineError;
use crate::models::IngestionEvent;

/// At-least-once delivery seam between the upload side and the worker.
///
/// `ack` marks the in-flight event consumed; `nack` with `requeue` puts
/// it back for redelivery. Implementations may redeliver an event that
/// was neither acked nor nacked, so downstream processing must stay
/// idempotent.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Next event, or `None` when the stream is closed.
    async fn next(&self) -> Option<IngestionEvent>;

    async fn ack(&self, event: &IngestionEvent) -> Result<(), PipelineError>;

    async fn nack(&self, event: &IngestionEvent, requeue: bool) -> Result<(), PipelineError>;
}

/// Sender half handed to whatever produces ingestion events.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<IngestionEvent>,
}

impl EventPublisher {
    pub async fn publish(&self, event: IngestionEvent) -> Result<(), PipelineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::Broker("event channel closed".to_string()))
    }
}

/// Bounded in-process broker. Nacked events land on a broker-internal
/// redelivery queue drained before fresh events, so holding redeliveries
/// never keeps the publisher channel open: once all publishers drop and
/// the redelivery queue is empty, `next` returns `None`.
pub struct ChannelBroker {
    rx: Mutex<mpsc::Receiver<IngestionEvent>>,
    requeued: std::sync::Mutex<VecDeque<IngestionEvent>>,
    notify: Notify,
}

impl ChannelBroker {
    pub fn channel(capacity: usize) -> (EventPublisher, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let broker = Self {
            rx: Mutex::new(rx),
            requeued: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        };
        (EventPublisher { tx }, broker)
    }

    fn pop_requeued(&self) -> Option<IngestionEvent> {
        self.requeued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl EventBroker for ChannelBroker {
    async fn next(&self) -> Option<IngestionEvent> {
        loop {
            if let Some(event) = self.pop_requeued() {
                return Some(event);
            }

            let mut rx = self.rx.lock().await;
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => return Some(event),
                        // Publishers are gone; whatever was nacked in the
                        // meantime still gets redelivered before closing.
                        None => return self.pop_requeued(),
                    }
                }
                _ = self.notify.notified() => {}
            }
        }
    }

    async fn ack(&self, _event: &IngestionEvent) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn nack(&self, event: &IngestionEvent, requeue: bool) -> Result<(), PipelineError> {
        if requeue {
            self.requeued
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push_back(event.clone());
            self.notify.notify_one();
        }
        Ok(())
    }
}
