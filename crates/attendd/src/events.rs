//! Fire-and-forget delivery of presence events to the backend.
//!
//! Camera loops hand events to a bounded queue without waiting; a single
//! dispatcher task drains it. Delivery failures are logged and dropped.

use crate::backend::{BackendClient, BackendError, EventPayload};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Destination for presence events.
pub trait EventSink {
    fn deliver(
        &self,
        event: &EventPayload,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

impl EventSink for BackendClient {
    async fn deliver(&self, event: &EventPayload) -> Result<(), BackendError> {
        self.send_event(event).await
    }
}

/// Clone-safe handle used by camera loops.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EventPayload>,
}

impl EventSender {
    /// Sender backed by a plain channel, for observing submitted events.
    #[cfg(test)]
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventPayload>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue an event without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, event: EventPayload) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    employee = %event.employee_id,
                    kind = %event.kind,
                    "event queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(
                    employee = %event.employee_id,
                    kind = %event.kind,
                    "event dispatcher stopped, dropping event"
                );
                false
            }
        }
    }
}

/// Spawn the dispatcher task. It exits once every [`EventSender`] is dropped.
pub fn spawn_dispatcher<S>(sink: S, capacity: usize) -> (EventSender, JoinHandle<()>)
where
    S: EventSink + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EventPayload>(capacity.max(1));

    let handle = tokio::spawn(async move {
        tracing::debug!("event dispatcher started");
        while let Some(event) = rx.recv().await {
            match sink.deliver(&event).await {
                Ok(()) => tracing::info!(
                    employee = %event.employee_id,
                    kind = %event.kind,
                    camera = ?event.camera_id,
                    "event delivered"
                ),
                Err(e) => tracing::error!(
                    employee = %event.employee_id,
                    kind = %event.kind,
                    error = %e,
                    "event delivery failed"
                ),
            }
        }
        tracing::debug!("event dispatcher stopped");
    });

    (EventSender { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_core::{EmployeeId, EventKind};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        delivered: Arc<Mutex<Vec<EventPayload>>>,
        fail_first: bool,
    }

    impl EventSink for RecordingSink {
        async fn deliver(&self, event: &EventPayload) -> Result<(), BackendError> {
            let mut delivered = self.delivered.lock().unwrap();
            let first = delivered.is_empty();
            delivered.push(event.clone());
            if self.fail_first && first {
                return Err(BackendError::Status {
                    url: "http://backend/api/events".into(),
                    status: 500,
                });
            }
            Ok(())
        }
    }

    fn event(id: i64, kind: EventKind) -> EventPayload {
        EventPayload {
            employee_id: EmployeeId(id),
            kind,
            timestamp: Utc::now(),
            camera_id: None,
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let sink = RecordingSink::default();
        let (sender, handle) = spawn_dispatcher(sink.clone(), 8);
        assert!(sender.submit(event(1, EventKind::In)));
        assert!(sender.submit(event(2, EventKind::Out)));
        drop(sender);
        handle.await.unwrap();

        let delivered = sink.delivered.lock().unwrap();
        let ids: Vec<_> = delivered.iter().map(|e| (e.employee_id.0, e.kind)).collect();
        assert_eq!(ids, vec![(1, EventKind::In), (2, EventKind::Out)]);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_stop_dispatcher() {
        let sink = RecordingSink {
            fail_first: true,
            ..RecordingSink::default()
        };
        let (sender, handle) = spawn_dispatcher(sink.clone(), 8);
        sender.submit(event(1, EventKind::In));
        sender.submit(event(2, EventKind::In));
        drop(sender);
        handle.await.unwrap();
        assert_eq!(sink.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_event() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = EventSender { tx };
        assert!(sender.submit(event(1, EventKind::In)));
        assert!(!sender.submit(event(2, EventKind::In)));
    }

    #[tokio::test]
    async fn test_closed_queue_drops_event() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender { tx };
        assert!(!sender.submit(event(1, EventKind::Out)));
    }
}
