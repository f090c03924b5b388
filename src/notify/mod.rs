// Outbound notifications: bounded queue drained by a dispatcher task
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::execution::position_manager::PositionClosed;
use crate::models::Signal;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    SignalOpened { signal: Signal, entry_price: f64 },
    PositionClosed(PositionClosed),
    ErrorOccurred {
        asset: String,
        stage: String,
        message: String,
    },
}

impl NotificationEvent {
    /// Short human-readable line for chat-style transports
    pub fn summary(&self) -> String {
        match self {
            NotificationEvent::SignalOpened {
                signal,
                entry_price,
            } => format!(
                "BUY {} @ {:.4} | score {:.1} | target +{:.1}%",
                signal.asset, entry_price, signal.score, signal.take_profit_pct
            ),
            NotificationEvent::PositionClosed(closed) => format!(
                "EXIT {} @ {:.4} | {} | {:+.2}%",
                closed.asset, closed.exit_price, closed.reason, closed.pnl_pct
            ),
            NotificationEvent::ErrorOccurred {
                asset,
                stage,
                message,
            } => format!("ERROR {} during {}: {}", asset, stage, message),
        }
    }
}

/// Delivers events to subscribers (chat bot, webhook, ...)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}

/// Sink that writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        match event {
            NotificationEvent::ErrorOccurred { .. } => {
                tracing::warn!(target: "signalbot::notify", "{}", event.summary())
            }
            _ => tracing::info!(target: "signalbot::notify", "{}", event.summary()),
        }
        Ok(())
    }
}

/// Producer side of the notification queue
///
/// Publishing never blocks the scan loop: when the queue is full the
/// event is dropped with a warning.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(event = %event.summary(), "Notification queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(event = %event.summary(), "Notification dispatcher stopped, dropping event");
            }
        }
    }
}

/// Drain the queue into `sink` until every producer is dropped
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<NotificationEvent>,
    sink: Arc<dyn NotificationSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delivered = 0u64;

        while let Some(event) = rx.recv().await {
            match sink.notify(&event).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::error!(error = %e, "Failed to deliver notification"),
            }
        }

        tracing::debug!(delivered, "Notification dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<NotificationEvent>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, event: &NotificationEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn notify(&self, _event: &NotificationEvent) -> anyhow::Result<()> {
            anyhow::bail!("transport down")
        }
    }

    fn error_event(asset: &str) -> NotificationEvent {
        NotificationEvent::ErrorOccurred {
            asset: asset.to_string(),
            stage: "fetch".to_string(),
            message: "timeout".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (queue, rx) = NotificationQueue::channel(8);
        let handle = spawn_dispatcher(rx, sink.clone());

        queue.publish(error_event("BTC/USD"));
        queue.publish(error_event("AAPL"));
        drop(queue);
        handle.await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], error_event("AAPL"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (queue, mut rx) = NotificationQueue::channel(1);

        queue.publish(error_event("BTC/USD"));
        queue.publish(error_event("ETH/USD"));

        assert_eq!(rx.recv().await, Some(error_event("BTC/USD")));
        tokio_test::assert_pending!(tokio_test::task::spawn(rx.recv()).poll());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_dispatcher() {
        let (queue, rx) = NotificationQueue::channel(4);
        let handle = spawn_dispatcher(rx, Arc::new(FailingSink));

        queue.publish(error_event("BTC/USD"));
        queue.publish(error_event("ETH/USD"));
        drop(queue);

        handle.await.unwrap();
    }

    #[test]
    fn test_summary_lines() {
        let signal = Signal {
            asset: "SOL/USD".to_string(),
            score: 61.3,
            take_profit_pct: 14.4,
            timestamp: Utc::now(),
        };
        let line = NotificationEvent::SignalOpened {
            signal,
            entry_price: 142.5,
        }
        .summary();

        assert_eq!(line, "BUY SOL/USD @ 142.5000 | score 61.3 | target +14.4%");
    }
}
