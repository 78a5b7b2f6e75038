//! User-facing message texts.
//!
//! Every text is a tera template with a built-in default. A directory of
//! `<name>.txt` files may override any of them. Rendering never fails from
//! the caller's view: a broken template falls back to a fixed sentence.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use tera::{Context, Tera};
use tracing::{info, warn};

use crate::extraction::calendar::format_dates;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Template {
    MentionNoted,
    NoDatesFound,
    MissingEmail,
    AlreadyApplied,
    ComplianceConfirmed,
    ApplyInHr,
    PartiallyRecorded,
    PersonNotInHr,
    CheckDeferred,
    ReminderLevel1,
    ReminderLevel2,
    ReminderLevel3,
    ReminderLevel3Direct,
    NonComplianceAlert,
    ReminderProgress,
    ReminderResolved,
    VerificationEscalated,
    ApprovalCardSummary,
    ApprovalSubmitted,
    ApprovalAutoApproved,
    ApprovalGranted,
    ApprovalRejected,
    ApprovalExpired,
    ApprovalEscalatedToHr,
    ApproverReminder,
    ApprovalRoutingFailed,
}

pub const ALL_TEMPLATES: &[Template] = &[
    Template::MentionNoted,
    Template::NoDatesFound,
    Template::MissingEmail,
    Template::AlreadyApplied,
    Template::ComplianceConfirmed,
    Template::ApplyInHr,
    Template::PartiallyRecorded,
    Template::PersonNotInHr,
    Template::CheckDeferred,
    Template::ReminderLevel1,
    Template::ReminderLevel2,
    Template::ReminderLevel3,
    Template::ReminderLevel3Direct,
    Template::NonComplianceAlert,
    Template::ReminderProgress,
    Template::ReminderResolved,
    Template::VerificationEscalated,
    Template::ApprovalCardSummary,
    Template::ApprovalSubmitted,
    Template::ApprovalAutoApproved,
    Template::ApprovalGranted,
    Template::ApprovalRejected,
    Template::ApprovalExpired,
    Template::ApprovalEscalatedToHr,
    Template::ApproverReminder,
    Template::ApprovalRoutingFailed,
];

impl Template {
    pub fn name(self) -> &'static str {
        match self {
            Self::MentionNoted => "mention_noted",
            Self::NoDatesFound => "no_dates_found",
            Self::MissingEmail => "missing_email",
            Self::AlreadyApplied => "already_applied",
            Self::ComplianceConfirmed => "compliance_confirmed",
            Self::ApplyInHr => "apply_in_hr",
            Self::PartiallyRecorded => "partially_recorded",
            Self::PersonNotInHr => "person_not_in_hr",
            Self::CheckDeferred => "check_deferred",
            Self::ReminderLevel1 => "reminder_level1",
            Self::ReminderLevel2 => "reminder_level2",
            Self::ReminderLevel3 => "reminder_level3",
            Self::ReminderLevel3Direct => "reminder_level3_direct",
            Self::NonComplianceAlert => "non_compliance_alert",
            Self::ReminderProgress => "reminder_progress",
            Self::ReminderResolved => "reminder_resolved",
            Self::VerificationEscalated => "verification_escalated",
            Self::ApprovalCardSummary => "approval_card_summary",
            Self::ApprovalSubmitted => "approval_submitted",
            Self::ApprovalAutoApproved => "approval_auto_approved",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalRejected => "approval_rejected",
            Self::ApprovalExpired => "approval_expired",
            Self::ApprovalEscalatedToHr => "approval_escalated_to_hr",
            Self::ApproverReminder => "approver_reminder",
            Self::ApprovalRoutingFailed => "approval_routing_failed",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::MentionNoted => {
                "Thanks <@{{ person_id }}>, noted your {{ kind }} for {{ dates }}. I'll check the HR system shortly."
            }
            Self::NoDatesFound => {
                "Hi <@{{ person_id }}>, I couldn't work out which dates you mean. Could you reply with the dates, e.g. \"on leave 12th March\"?"
            }
            Self::MissingEmail => {
                "Hi <@{{ person_id }}>, I couldn't find an email address on your profile, so I can't check your HR record. Please add one or contact HR."
            }
            Self::AlreadyApplied => {
                "Thanks <@{{ person_id }}>, good to hear your {{ kind }} for {{ dates }} is already applied."
            }
            Self::ComplianceConfirmed => {
                "Thanks <@{{ person_id }}>, your {{ kind }} for {{ dates }} is recorded in the HR system."
            }
            Self::ApplyInHr => {
                "Hi <@{{ person_id }}>, I couldn't find your {{ kind }} for {{ dates }} in the HR system. Please apply it there."
            }
            Self::PartiallyRecorded => {
                "Hi <@{{ person_id }}>, {{ matched }} is recorded, but {{ missing }} is still missing in the HR system. Please apply the remaining dates."
            }
            Self::PersonNotInHr => {
                "Hi <@{{ person_id }}>, I couldn't find {{ email }} in the HR system. Please check the email on your HR profile."
            }
            Self::CheckDeferred => {
                "Thanks <@{{ person_id }}>, noted your {{ kind }} for {{ dates }}. I couldn't reach the HR system just now and will check again later."
            }
            Self::ReminderLevel1 => {
                "Reminder <@{{ person_id }}>: your {{ kind }} for {{ dates }} is not yet applied in the HR system."
            }
            Self::ReminderLevel2 => {
                "Second reminder <@{{ person_id }}>: {{ dates }} is still not applied in the HR system. cc {{ manager }}"
            }
            Self::ReminderLevel3 => {
                "Urgent <@{{ person_id }}>: {{ dates }} has been missing from the HR system for {{ hours }} hours. cc {{ manager }}"
            }
            Self::ReminderLevel3Direct => {
                "Your {{ kind }} for {{ dates }} is still not applied in the HR system. Please apply it today."
            }
            Self::NonComplianceAlert => {
                "Non-compliance: <@{{ person_id }}> has not applied {{ kind }} for {{ dates }} after {{ hours }} hours. Manager: {{ manager }}."
            }
            Self::ReminderProgress => {
                "Thanks <@{{ person_id }}>, some dates are now recorded. Still missing: {{ missing }}."
            }
            Self::ReminderResolved => {
                "Thanks <@{{ person_id }}>, all of {{ dates }} is now recorded in the HR system."
            }
            Self::VerificationEscalated => {
                "<@{{ person_id }}> mentioned {{ kind }} for {{ dates }} but it is still missing from the HR system after {{ checks }} checks."
            }
            Self::ApprovalCardSummary => {
                "{{ requester }} requests {{ kind }} for {{ dates }} ({{ days }} day{% if days != 1 %}s{% endif %}). Level {{ level }} of {{ levels }}."
            }
            Self::ApprovalSubmitted => {
                "Your {{ kind }} request for {{ dates }} needs approval from {{ approver }}. I'll let you know once it is decided."
            }
            Self::ApprovalAutoApproved => {
                "Your {{ kind }} for {{ dates }} is auto-approved."
            }
            Self::ApprovalGranted => {
                "Your {{ kind }} request for {{ dates }} was approved."
            }
            Self::ApprovalRejected => {
                "Your {{ kind }} request for {{ dates }} was rejected: {{ reason }}"
            }
            Self::ApprovalExpired => {
                "Your {{ kind }} request for {{ dates }} expired without a decision. Please talk to your manager."
            }
            Self::ApprovalEscalatedToHr => {
                "Approval for {{ requester }} ({{ dates }}) timed out waiting for {{ approver }}. HR review needed."
            }
            Self::ApproverReminder => {
                "Reminder: {{ requester }}'s request for {{ dates }} is waiting for your decision and times out in {{ hours }} hours."
            }
            Self::ApprovalRoutingFailed => {
                "Hi <@{{ person_id }}>, I couldn't route your request for {{ dates }} for approval right now. Please contact your manager directly."
            }
        }
    }

    fn fallback(self) -> &'static str {
        match self {
            Self::MentionNoted | Self::CheckDeferred => "Noted. I'll check the HR system shortly.",
            Self::NoDatesFound => "Could you reply with the dates you'll be away?",
            Self::MissingEmail => "I couldn't find an email address on your profile.",
            Self::AlreadyApplied | Self::ComplianceConfirmed | Self::ReminderResolved => {
                "Thanks, your absence is recorded."
            }
            Self::ApplyInHr
            | Self::PartiallyRecorded
            | Self::ReminderLevel1
            | Self::ReminderLevel2
            | Self::ReminderLevel3
            | Self::ReminderLevel3Direct
            | Self::ReminderProgress => "Please apply your absence in the HR system.",
            Self::PersonNotInHr => "Please check the email on your HR profile.",
            Self::NonComplianceAlert | Self::VerificationEscalated => {
                "An absence is still missing from the HR system."
            }
            Self::ApprovalCardSummary | Self::ApproverReminder => {
                "An absence request is waiting for your decision."
            }
            Self::ApprovalSubmitted => "Your request was sent for approval.",
            Self::ApprovalAutoApproved | Self::ApprovalGranted => "Your request was approved.",
            Self::ApprovalRejected => "Your request was rejected.",
            Self::ApprovalExpired => "Your request expired without a decision.",
            Self::ApprovalEscalatedToHr => "An approval request needs HR review.",
            Self::ApprovalRoutingFailed => "Please contact your manager about your request.",
        }
    }
}

pub fn absence_kind(is_remote_work: bool) -> &'static str {
    if is_remote_work {
        "remote work"
    } else {
        "leave"
    }
}

/// Variables shared by every person-facing text: `person_id`, `kind`, `dates`.
pub fn absence_context<'a>(
    person_id: &str,
    is_remote_work: bool,
    dates: impl IntoIterator<Item = &'a NaiveDate>,
) -> Context {
    let dates: Vec<NaiveDate> = dates.into_iter().copied().collect();
    let mut context = Context::new();
    context.insert("person_id", person_id);
    context.insert("kind", absence_kind(is_remote_work));
    context.insert("dates", &format_dates(&dates));
    context
}

pub struct MessageTemplates {
    tera: Tera,
}

impl MessageTemplates {
    pub fn builtin() -> Self {
        let mut tera = Tera::default();
        for template in ALL_TEMPLATES {
            if let Err(err) = tera.add_raw_template(template.name(), template.source()) {
                warn!(
                    event_name = "templates.builtin.invalid",
                    template = template.name(),
                    error = %err,
                    "built-in template did not compile; fallback text will be used"
                );
            }
        }
        Self { tera }
    }

    /// Built-ins, replaced by `<dir>/<name>.txt` where such a file exists and
    /// compiles.
    pub fn with_overrides(directory: Option<&Path>) -> Self {
        let mut templates = Self::builtin();
        let Some(directory) = directory else {
            return templates;
        };

        for template in ALL_TEMPLATES {
            let path = directory.join(format!("{}.txt", template.name()));
            let Ok(source) = fs::read_to_string(&path) else {
                continue;
            };
            match templates.tera.add_raw_template(template.name(), source.trim_end()) {
                Ok(()) => info!(
                    event_name = "templates.override.loaded",
                    template = template.name(),
                    path = %path.display(),
                    "template override loaded"
                ),
                Err(err) => {
                    warn!(
                        event_name = "templates.override.invalid",
                        template = template.name(),
                        path = %path.display(),
                        error = %err,
                        "template override did not compile; keeping built-in"
                    );
                    let _ = templates.tera.add_raw_template(template.name(), template.source());
                }
            }
        }
        templates
    }

    pub fn render(&self, template: Template, context: &Context) -> String {
        match self.tera.render(template.name(), context) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    event_name = "templates.render.failed",
                    template = template.name(),
                    error = %err,
                    "template render failed; using fallback text"
                );
                template.fallback().to_owned()
            }
        }
    }
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}
