//! Bounded in-process queue between analytics recording and the durable sink.

use std::sync::Arc;
use std::time::Duration;

use leavewatch_core::analytics::{AnalyticsEvent, AnalyticsRecorder, AnalyticsSink};
use leavewatch_core::config::AnalyticsConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct QueuedAnalytics {
    sender: mpsc::Sender<AnalyticsEvent>,
}

impl QueuedAnalytics {
    pub fn new(sender: mpsc::Sender<AnalyticsEvent>) -> Self {
        Self { sender }
    }
}

impl AnalyticsRecorder for QueuedAnalytics {
    fn record(&self, event: AnalyticsEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    event_name = "analytics.queue.full",
                    correlation_id = %event.correlation_id,
                    dropped_event = %event.event_type,
                    "analytics queue full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(
                    event_name = "analytics.queue.closed",
                    correlation_id = %event.correlation_id,
                    dropped_event = %event.event_type,
                    "analytics writer stopped, event dropped"
                );
            }
        }
    }
}

/// Starts the single writer task. The handle resolves to the number of
/// events handed to the sink once the shutdown signal has been drained.
pub fn start(
    sink: Arc<dyn AnalyticsSink>,
    settings: &AnalyticsConfig,
    shutdown: watch::Receiver<bool>,
) -> (QueuedAnalytics, JoinHandle<usize>) {
    let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
    let batch_size = settings.batch_size.max(1);
    let flush_interval = Duration::from_millis(settings.flush_interval_ms.max(1));

    let handle = tokio::spawn(run_writer(receiver, sink, batch_size, flush_interval, shutdown));
    (QueuedAnalytics::new(sender), handle)
}

async fn run_writer(
    mut receiver: mpsc::Receiver<AnalyticsEvent>,
    sink: Arc<dyn AnalyticsSink>,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut buffer = Vec::with_capacity(batch_size);
    let mut written = 0;
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(event) => {
                    buffer.push(event);
                    if buffer.len() >= batch_size {
                        written += flush(sink.as_ref(), &mut buffer).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    written += flush(sink.as_ref(), &mut buffer).await;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    receiver.close();
    while let Some(event) = receiver.recv().await {
        buffer.push(event);
        if buffer.len() >= batch_size {
            written += flush(sink.as_ref(), &mut buffer).await;
        }
    }
    if !buffer.is_empty() {
        written += flush(sink.as_ref(), &mut buffer).await;
    }

    info!(
        event_name = "analytics.queue.drained",
        correlation_id = "shutdown",
        written,
        "analytics writer stopped"
    );
    written
}

async fn flush(sink: &dyn AnalyticsSink, buffer: &mut Vec<AnalyticsEvent>) -> usize {
    let count = buffer.len();
    let result = sink.write_batch(buffer.as_slice()).await;
    buffer.clear();

    match result {
        Ok(()) => count,
        Err(error) => {
            warn!(
                event_name = "analytics.queue.write_failed",
                correlation_id = "analytics",
                batch_size = count,
                error = %error,
                "analytics batch dropped"
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use leavewatch_core::analytics::{
        AnalyticsCategory, AnalyticsEvent, AnalyticsRecorder, InMemoryAnalytics,
    };
    use leavewatch_core::config::AnalyticsConfig;
    use tokio::sync::{mpsc, watch};

    use super::{start, QueuedAnalytics};

    fn event(n: usize) -> AnalyticsEvent {
        AnalyticsEvent::new(
            AnalyticsCategory::Mention,
            "mention.processed",
            format!("msg-{n}"),
            Utc::now(),
        )
    }

    fn settings(batch_size: usize) -> AnalyticsConfig {
        AnalyticsConfig { enabled: true, batch_size, flush_interval_ms: 60_000, queue_capacity: 16 }
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_events_into_the_sink() {
        let sink = InMemoryAnalytics::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (recorder, handle) = start(Arc::new(sink.clone()), &settings(10), shutdown_rx);

        for n in 0..3 {
            recorder.record(event(n));
        }
        shutdown_tx.send(true).expect("signal shutdown");

        let written = handle.await.expect("writer task");
        assert_eq!(written, 3);
        assert_eq!(sink.events().len(), 3);
    }

    #[tokio::test]
    async fn full_batches_are_written_without_waiting_for_the_interval() {
        let sink = InMemoryAnalytics::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (recorder, handle) = start(Arc::new(sink.clone()), &settings(2), shutdown_rx);

        recorder.record(event(1));
        recorder.record(event(2));

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.events().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("batch should flush once full");

        shutdown_tx.send(true).expect("signal shutdown");
        assert_eq!(handle.await.expect("writer task"), 2);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (sender, mut receiver) = mpsc::channel(1);
        let recorder = QueuedAnalytics::new(sender);

        recorder.record(event(1));
        recorder.record(event(2));

        let first = receiver.try_recv().expect("first event queued");
        assert_eq!(first.correlation_id, "msg-1");
        assert!(receiver.try_recv().is_err());
    }
}
