use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::approval::{ApprovalId, ApprovalStatus};

/// Rejections raised before an approval request is created.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("request must cover between 1 and {max} dates, got {count}")]
    DateCount { count: usize, max: usize },
    #[error("date {date} is outside the accepted window ({earliest} to {latest})")]
    DateOutOfWindow { date: NaiveDate, earliest: NaiveDate, latest: NaiveDate },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("approval request `{0}` was not found")]
    ApprovalNotFound(ApprovalId),
    #[error("actor `{actor}` is not the approver for level {level} (expected `{expected}`)")]
    ApproverMismatch { actor: String, expected: String, level: usize },
    #[error("level {requested} is not the current level {current}")]
    LevelOutOfTurn { requested: usize, current: usize },
    #[error("approval request is {0:?} and no longer accepts decisions")]
    NotPending(ApprovalStatus),
    #[error("approval request expired before the decision arrived")]
    Expired,
    #[error("`{0}` is not authorised to override approval decisions")]
    NotHr(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures from an external collaborator (HR system, messaging channel, directory).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("{service} request failed: {message}")]
    Request { service: &'static str, message: String },
    #[error("{service} timed out")]
    Timeout { service: &'static str },
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },
    #[error("{service} returned an unexpected payload: {message}")]
    Decode { service: &'static str, message: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("could not encode `{collection}/{id}`: {message}")]
    Encode { collection: String, id: String, message: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<IntegrationError> for ApplicationError {
    fn from(value: IntegrationError) -> Self {
        Self::Integration(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "That request could not be processed. Check the dates and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Validation(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
