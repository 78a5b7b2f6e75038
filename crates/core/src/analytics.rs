use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsCategory {
    Mention,
    Reconciliation,
    Reminder,
    Verification,
    Approval,
}

impl AnalyticsCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::Reconciliation => "reconciliation",
            Self::Reminder => "reminder",
            Self::Verification => "verification",
            Self::Approval => "approval",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: String,
    pub category: AnalyticsCategory,
    pub event_type: String,
    pub correlation_id: String,
    pub person_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(
        category: AnalyticsCategory,
        event_type: impl Into<String>,
        correlation_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            category,
            event_type: event_type.into(),
            correlation_id: correlation_id.into(),
            person_id: None,
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_person(mut self, person_id: impl Into<String>) -> Self {
        self.person_id = Some(person_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Fire-and-forget recording. Implementations must not block the caller.
pub trait AnalyticsRecorder: Send + Sync {
    fn record(&self, event: AnalyticsEvent);
}

/// Durable destination for batches drained from the recording queue.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn write_batch(&self, events: &[AnalyticsEvent]) -> Result<(), StoreError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAnalytics;

impl AnalyticsRecorder for NoopAnalytics {
    fn record(&self, _event: AnalyticsEvent) {}
}

#[derive(Clone, Default)]
pub struct InMemoryAnalytics {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl InMemoryAnalytics {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.event_type).collect()
    }
}

impl AnalyticsRecorder for InMemoryAnalytics {
    fn record(&self, event: AnalyticsEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[async_trait]
impl AnalyticsSink for InMemoryAnalytics {
    async fn write_batch(&self, events: &[AnalyticsEvent]) -> Result<(), StoreError> {
        match self.events.lock() {
            Ok(mut stored) => stored.extend_from_slice(events),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(events),
        }
        Ok(())
    }
}
