//! Periodic driver: channel polling on one cadence, compliance sweeps on a
//! slower one. Both loops stop when the shutdown signal flips.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leavewatch_core::compliance::ComplianceService;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Message ids are `{unix_secs}.{micros}`; starting at "now" skips history
/// posted while the service was down.
pub fn initial_cursor(now: DateTime<Utc>) -> String {
    format!("{}.000000", now.timestamp())
}

/// Runs until shutdown and returns the last cursor reached.
pub async fn run_poll_loop(
    service: Arc<ComplianceService>,
    interval: Duration,
    start_cursor: Option<String>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<String> {
    let mut cursor = start_cursor;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        event_name = "driver.poll.started",
        correlation_id = "driver",
        interval_secs = interval.as_secs(),
        "channel polling started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.poll_channel(cursor.as_deref()).await {
                    Ok(report) => {
                        if report.fetched > 0 {
                            debug!(
                                event_name = "driver.poll.completed",
                                correlation_id = "driver",
                                fetched = report.fetched,
                                processed = report.processed,
                                "channel poll completed"
                            );
                        }
                        cursor = report.cursor.or(cursor);
                    }
                    Err(error) => {
                        warn!(
                            event_name = "driver.poll.failed",
                            correlation_id = "driver",
                            error = %error,
                            "channel poll failed, retrying next tick"
                        );
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(event_name = "driver.poll.stopped", correlation_id = "shutdown", "channel polling stopped");
    cursor
}

/// Runs until shutdown and returns the number of completed sweeps.
pub async fn run_sweep_loop(
    service: Arc<ComplianceService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut sweeps = 0;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = service.sweep().await;
                sweeps += 1;
                debug!(
                    event_name = "driver.sweep.completed",
                    correlation_id = "driver",
                    approval_actions = report.approval_actions,
                    reminder_steps = report.reminder_steps.len(),
                    verification_steps = report.verification_steps.len(),
                    purged = report.purged,
                    "sweep completed"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(
        event_name = "driver.sweep.stopped",
        correlation_id = "shutdown",
        sweeps,
        "sweeps stopped"
    );
    sweeps
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use leavewatch_core::analytics::NoopAnalytics;
    use leavewatch_core::compliance::{Collaborators, ComplianceService};
    use leavewatch_core::config::AppConfig;
    use leavewatch_core::messaging::{InboundMessage, RecordingMessenger};
    use leavewatch_core::{
        InMemoryDocumentStore, MessageTemplates, OrgHierarchy, SystemClock, UnavailableHrSystem,
    };
    use tokio::sync::watch;

    use super::{initial_cursor, run_poll_loop, run_sweep_loop};

    fn service(messenger: RecordingMessenger) -> Arc<ComplianceService> {
        let mut config = AppConfig::default();
        config.slack.leave_channel_id = "C0LEAVE".to_owned();
        Arc::new(ComplianceService::build(
            &config,
            Collaborators {
                store: Arc::new(InMemoryDocumentStore::default()),
                messenger: Arc::new(messenger),
                hr: Arc::new(UnavailableHrSystem::default()),
                directory: Arc::new(OrgHierarchy::default()),
                clock: Arc::new(SystemClock),
                analytics: Arc::new(NoopAnalytics),
                templates: Arc::new(MessageTemplates::builtin()),
            },
        ))
    }

    #[test]
    fn initial_cursor_uses_slack_timestamp_shape() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).single().expect("valid time");
        assert_eq!(initial_cursor(now), "1710061200.000000");
    }

    #[tokio::test]
    async fn poll_loop_advances_past_new_messages_and_stops_on_shutdown() {
        let messenger = RecordingMessenger::default();
        messenger.push_inbound(InboundMessage {
            message_id: "1710061300.000100".to_owned(),
            channel_id: "C0LEAVE".to_owned(),
            person_id: Some("U0ALICE".to_owned()),
            text: "lunch anyone?".to_owned(),
            bot_id: None,
            subtype: None,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_poll_loop(
            service(messenger),
            Duration::from_millis(10),
            Some("1710061200.000000".to_owned()),
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).expect("signal shutdown");

        let cursor = task.await.expect("poll task");
        assert_eq!(cursor.as_deref(), Some("1710061300.000100"));
    }

    #[tokio::test]
    async fn sweep_loop_runs_until_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_sweep_loop(
            service(RecordingMessenger::default()),
            Duration::from_millis(10),
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).expect("signal shutdown");

        assert!(task.await.expect("sweep task") >= 1);
    }
}
