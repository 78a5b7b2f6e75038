use serde::Serialize;

use crate::config::ApprovalConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    AutoApprove,
    ManagerApproval,
    SeniorApproval,
    RemoteAutoApprove,
    RemoteManagerApproval,
}

impl PolicyRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::ManagerApproval => "manager_approval",
            Self::SeniorApproval => "senior_approval",
            Self::RemoteAutoApprove => "remote_auto_approve",
            Self::RemoteManagerApproval => "remote_manager_approval",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub rule: PolicyRule,
    pub auto_approve: bool,
    pub chain_length: usize,
}

impl PolicyDecision {
    fn auto(rule: PolicyRule) -> Self {
        Self { rule, auto_approve: true, chain_length: 0 }
    }

    fn chain(rule: PolicyRule, chain_length: usize) -> Self {
        Self { rule, auto_approve: false, chain_length }
    }
}

/// Maps an absence length to the approval it needs. Bands are inclusive at
/// the top: `auto_approve_days` itself still auto-approves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApprovalPolicy {
    auto_approve_days: u32,
    senior_approval_days: u32,
    remote_policy_enabled: bool,
    remote_auto_approve_days: u32,
}

impl ApprovalPolicy {
    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self {
            auto_approve_days: config.auto_approve_days,
            senior_approval_days: config.senior_approval_days,
            remote_policy_enabled: config.remote_policy_enabled,
            remote_auto_approve_days: config.effective_remote_auto_approve_days(),
        }
    }

    pub fn evaluate(&self, days: usize, is_remote_work: bool) -> PolicyDecision {
        let days = u32::try_from(days).unwrap_or(u32::MAX);

        if is_remote_work && self.remote_policy_enabled {
            return if days <= self.remote_auto_approve_days {
                PolicyDecision::auto(PolicyRule::RemoteAutoApprove)
            } else {
                PolicyDecision::chain(PolicyRule::RemoteManagerApproval, 1)
            };
        }

        if days <= self.auto_approve_days {
            PolicyDecision::auto(PolicyRule::AutoApprove)
        } else if days <= self.senior_approval_days {
            PolicyDecision::chain(PolicyRule::ManagerApproval, 1)
        } else {
            PolicyDecision::chain(PolicyRule::SeniorApproval, 2)
        }
    }
}
