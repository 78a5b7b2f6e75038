pub mod analytics;
pub mod approvals;
pub mod claims;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod domain;
pub mod errors;
pub mod extraction;
pub mod locks;
pub mod messaging;
pub mod notifier;
pub mod reconciliation;
pub mod reminders;
pub mod store;
pub mod templates;
pub mod verification;

pub use analytics::{AnalyticsCategory, AnalyticsEvent, AnalyticsRecorder, AnalyticsSink};
pub use approvals::{ApprovalWorkflow, OrgDirectory, OrgHierarchy, TimeoutAction};
pub use clock::{Clock, SystemClock};
pub use compliance::{
    ApprovalAction, ApprovalDecision, Collaborators, ComplianceService, DecisionOutcome,
    IntakeOutcome, PollReport, SweepReport, VerificationDisposition,
};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
pub use errors::{
    ApplicationError, DomainError, IntegrationError, InterfaceError, StoreError, ValidationError,
};
pub use messaging::{ApprovalCard, CardAudience, InboundMessage, MessagingClient};
pub use reconciliation::{HrSystem, ReconciliationEngine, UnavailableHrSystem};
pub use store::{DocumentStore, InMemoryDocumentStore};
pub use templates::{MessageTemplates, Template};
