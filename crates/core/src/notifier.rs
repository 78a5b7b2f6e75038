//! Outbound sends with content-fingerprint deduplication.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::errors::IntegrationError;
use crate::messaging::{ApprovalCard, MessagingClient};
use crate::store::Collection;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentFingerprint {
    pub fingerprint: String,
    pub target: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// An identical send went out inside the dedup window.
    Suppressed,
}

pub fn fingerprint(target: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(target.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Wraps the messaging client so a retried delivery of the same text to the
/// same target inside the window is sent once.
pub struct Notifier {
    messenger: Arc<dyn MessagingClient>,
    sent: Collection<SentFingerprint>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl Notifier {
    pub fn new(
        messenger: Arc<dyn MessagingClient>,
        sent: Collection<SentFingerprint>,
        clock: Arc<dyn Clock>,
        window_secs: u64,
    ) -> Self {
        let window_secs = i64::try_from(window_secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
        let window = Duration::seconds(window_secs);
        Self { messenger, sent, clock, window }
    }

    pub fn messenger(&self) -> &Arc<dyn MessagingClient> {
        &self.messenger
    }

    pub async fn reply(
        &self,
        channel_id: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<SendOutcome, IntegrationError> {
        let target = format!("reply:{channel_id}:{thread_id}");
        self.deliver(&target, text, self.messenger.post_reply(channel_id, thread_id, text)).await
    }

    pub async fn direct(&self, person_id: &str, text: &str) -> Result<SendOutcome, IntegrationError> {
        let target = format!("direct:{person_id}");
        self.deliver(&target, text, self.messenger.post_direct(person_id, text)).await
    }

    pub async fn channel(&self, channel_id: &str, text: &str) -> Result<SendOutcome, IntegrationError> {
        let target = format!("channel:{channel_id}");
        self.deliver(&target, text, self.messenger.post_channel(channel_id, text)).await
    }

    pub async fn approval_card(&self, card: &ApprovalCard) -> Result<SendOutcome, IntegrationError> {
        let target = format!("card:{}:{}:{}", card.recipient, card.request_id, card.level);
        self.deliver(&target, &card.summary, self.messenger.post_approval_card(card)).await
    }

    async fn deliver(
        &self,
        target: &str,
        text: &str,
        send: impl std::future::Future<Output = Result<(), IntegrationError>>,
    ) -> Result<SendOutcome, IntegrationError> {
        let fingerprint = fingerprint(target, text);
        let now = self.clock.now();

        if let Some(previous) = self.sent.load(&fingerprint).await {
            if now - previous.sent_at < self.window {
                debug!(
                    event_name = "notifier.send.suppressed",
                    correlation_id = %fingerprint,
                    target,
                    "identical message sent recently"
                );
                return Ok(SendOutcome::Suppressed);
            }
        }

        if let Err(error) = send.await {
            warn!(
                event_name = "notifier.send.failed",
                correlation_id = %fingerprint,
                target,
                error = %error,
                "outbound message failed"
            );
            return Err(error);
        }

        let record = SentFingerprint {
            fingerprint: fingerprint.clone(),
            target: target.to_owned(),
            sent_at: now,
        };
        // The message is out; a failed fingerprint write only weakens dedup.
        let _ = self.sent.save(&fingerprint, &record).await;
        info!(
            event_name = "notifier.send.delivered",
            correlation_id = %fingerprint,
            target,
            "message sent"
        );
        Ok(SendOutcome::Sent)
    }

    /// Drops fingerprints older than the window.
    pub async fn purge_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.window;
        let expired = self.sent.matching(|record| record.sent_at < cutoff).await;

        let mut purged = 0;
        for record in expired {
            if matches!(self.sent.delete(&record.fingerprint).await, Ok(true)) {
                purged += 1;
            }
        }
        purged
    }
}
