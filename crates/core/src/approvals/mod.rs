//! Approval policy, org-directory routing and the approval state machine.

pub mod org;
pub mod policy;
pub mod workflow;

pub use org::{Employee, OrgDirectory, OrgHierarchy};
pub use policy::{ApprovalPolicy, PolicyDecision, PolicyRule};
pub use workflow::{
    validate_new_request, ApprovalOutcome, ApprovalWorkflow, NewApprovalRequest,
    RejectionOutcome, TimeoutAction,
};
