use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::domain::reconciliation::{HrPerson, HrRecord, ManagerContact, RecordKind};
use crate::errors::IntegrationError;

const SERVICE: &str = "hr";

/// Authoritative absence records.
#[async_trait]
pub trait HrSystem: Send + Sync {
    async fn find_person(&self, email: &str) -> Result<Option<HrPerson>, IntegrationError>;

    async fn absence_records(
        &self,
        person_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HrRecord>, IntegrationError>;

    async fn remote_work_records(
        &self,
        person_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HrRecord>, IntegrationError>;

    /// Reporting manager from the person's HR profile.
    async fn manager_of(&self, email: &str) -> Result<Option<ManagerContact>, IntegrationError>;
}

/// Stand-in used until a concrete HR adapter is wired. Every call reports the
/// system as unreachable, which reconciliation treats as "could not check".
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableHrSystem;

#[async_trait]
impl HrSystem for UnavailableHrSystem {
    async fn find_person(&self, _email: &str) -> Result<Option<HrPerson>, IntegrationError> {
        Err(IntegrationError::NotConfigured { service: SERVICE })
    }

    async fn absence_records(
        &self,
        _person_id: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<HrRecord>, IntegrationError> {
        Err(IntegrationError::NotConfigured { service: SERVICE })
    }

    async fn remote_work_records(
        &self,
        _person_id: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<HrRecord>, IntegrationError> {
        Err(IntegrationError::NotConfigured { service: SERVICE })
    }

    async fn manager_of(&self, _email: &str) -> Result<Option<ManagerContact>, IntegrationError> {
        Err(IntegrationError::NotConfigured { service: SERVICE })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: RecordKind,
    pub person_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Default)]
struct HrState {
    people: HashMap<String, HrPerson>,
    records: HashMap<String, Vec<HrRecord>>,
    managers: HashMap<String, ManagerContact>,
    outage: Option<String>,
    queries: Vec<RecordQuery>,
}

#[derive(Default)]
pub struct InMemoryHrSystem {
    state: RwLock<HrState>,
}

impl InMemoryHrSystem {
    pub async fn add_person(&self, person: HrPerson) {
        self.state.write().await.people.insert(person.email.to_ascii_lowercase(), person);
    }

    pub async fn add_record(&self, person_id: &str, record: HrRecord) {
        self.state.write().await.records.entry(person_id.to_owned()).or_default().push(record);
    }

    pub async fn set_manager(&self, email: &str, manager: ManagerContact) {
        self.state.write().await.managers.insert(email.to_ascii_lowercase(), manager);
    }

    /// `Some(reason)` makes every following call fail until cleared.
    pub async fn set_outage(&self, reason: Option<&str>) {
        self.state.write().await.outage = reason.map(str::to_owned);
    }

    pub async fn queries(&self) -> Vec<RecordQuery> {
        self.state.read().await.queries.clone()
    }

    fn check_outage(state: &HrState) -> Result<(), IntegrationError> {
        match &state.outage {
            Some(reason) => {
                Err(IntegrationError::Request { service: SERVICE, message: reason.clone() })
            }
            None => Ok(()),
        }
    }

    async fn records_of(
        &self,
        kind: RecordKind,
        person_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HrRecord>, IntegrationError> {
        let mut state = self.state.write().await;
        Self::check_outage(&state)?;
        state.queries.push(RecordQuery { kind, person_id: person_id.to_owned(), from, to });

        Ok(state
            .records
            .get(person_id)
            .map(|records| records.iter().filter(|record| record.kind == kind).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl HrSystem for InMemoryHrSystem {
    async fn find_person(&self, email: &str) -> Result<Option<HrPerson>, IntegrationError> {
        let state = self.state.read().await;
        Self::check_outage(&state)?;
        Ok(state.people.get(&email.to_ascii_lowercase()).cloned())
    }

    async fn absence_records(
        &self,
        person_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HrRecord>, IntegrationError> {
        self.records_of(RecordKind::Leave, person_id, from, to).await
    }

    async fn remote_work_records(
        &self,
        person_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HrRecord>, IntegrationError> {
        self.records_of(RecordKind::RemoteWork, person_id, from, to).await
    }

    async fn manager_of(&self, email: &str) -> Result<Option<ManagerContact>, IntegrationError> {
        let state = self.state.read().await;
        Self::check_outage(&state)?;
        Ok(state.managers.get(&email.to_ascii_lowercase()).cloned())
    }
}
