use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::locks::KeyedLocks;
use crate::store::Collection;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageClaim {
    pub key: String,
    pub channel_id: String,
    pub message_id: String,
    pub claimed_at: DateTime<Utc>,
}

/// The set of inbound messages already taken by a poll cycle. A message is
/// claimed before anything is sent for it, so overlapping polls process it
/// once.
pub struct MessageClaims {
    claims: Collection<MessageClaim>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl MessageClaims {
    pub fn new(claims: Collection<MessageClaim>, clock: Arc<dyn Clock>) -> Self {
        Self { claims, clock, locks: KeyedLocks::default() }
    }

    pub fn key_for(channel_id: &str, message_id: &str) -> String {
        format!("{channel_id}:{message_id}")
    }

    /// `Ok(true)` for the first caller only. A failed write leaves the message
    /// unclaimed so the next poll picks it up again.
    pub async fn claim(&self, channel_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let key = Self::key_for(channel_id, message_id);
        let _guard = self.locks.lock(&key).await;

        if self.claims.load(&key).await.is_some() {
            debug!(
                event_name = "claims.message.duplicate",
                correlation_id = %message_id,
                "message already claimed"
            );
            return Ok(false);
        }

        let claim = MessageClaim {
            key: key.clone(),
            channel_id: channel_id.to_owned(),
            message_id: message_id.to_owned(),
            claimed_at: self.clock.now(),
        };
        self.claims.save(&key, &claim).await?;
        Ok(true)
    }

    pub async fn is_claimed(&self, channel_id: &str, message_id: &str) -> bool {
        self.claims.load(&Self::key_for(channel_id, message_id)).await.is_some()
    }

    pub async fn purge_older_than(&self, days: u32) -> usize {
        let cutoff = self.clock.now() - Duration::days(i64::from(days));
        let stale = self.claims.matching(|claim| claim.claimed_at < cutoff).await;

        let mut purged = 0;
        for claim in stale {
            if matches!(self.claims.delete(&claim.key).await, Ok(true)) {
                purged += 1;
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::MessageClaims;
    use crate::clock::FixedClock;
    use crate::domain::approval::fixtures::created_at;
    use crate::store::testing::FlakyStore;
    use crate::store::{Collection, DocumentStore, InMemoryDocumentStore, CLAIMED_MESSAGES};

    fn claims_on(store: Arc<dyn DocumentStore>) -> (MessageClaims, FixedClock) {
        let clock = FixedClock::new(created_at());
        let claims =
            MessageClaims::new(Collection::new(store, CLAIMED_MESSAGES), Arc::new(clock.clone()));
        (claims, clock)
    }

    #[tokio::test]
    async fn concurrent_claims_succeed_once() {
        let (claims, _) = claims_on(Arc::new(InMemoryDocumentStore::default()));
        let claims = Arc::new(claims);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let claims = Arc::clone(&claims);
                tokio::spawn(async move { claims.claim("C0LEAVE", "171.1").await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join").expect("claim") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(claims.is_claimed("C0LEAVE", "171.1").await);
    }

    #[tokio::test]
    async fn failed_claim_writes_leave_the_message_unclaimed() {
        let store = Arc::new(FlakyStore::default());
        let (claims, _) = claims_on(store.clone());

        store.fail_writes(true);
        assert!(claims.claim("C0LEAVE", "171.1").await.is_err());
        store.fail_writes(false);

        assert!(claims.claim("C0LEAVE", "171.1").await.expect("retry"));
    }

    #[tokio::test]
    async fn old_claims_are_purged() {
        let (claims, clock) = claims_on(Arc::new(InMemoryDocumentStore::default()));
        claims.claim("C0LEAVE", "171.1").await.expect("claim");

        clock.advance(Duration::days(31));
        assert_eq!(claims.purge_older_than(30).await, 1);
        assert!(!claims.is_claimed("C0LEAVE", "171.1").await);
    }
}
