use tracing::{debug, info, warn};

use super::{AbsenceSubject, ComplianceService, VerificationDisposition};
use crate::analytics::{AnalyticsCategory, AnalyticsEvent};
use crate::approvals::NewApprovalRequest;
use crate::domain::approval::{ApprovalId, ApprovalStatus, Requester};
use crate::domain::mention::{AbsenceMention, MentionSource};
use crate::errors::IntegrationError;
use crate::messaging::InboundMessage;
use crate::templates::{absence_context, Template};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Another poll cycle already took this message.
    Duplicate,
    /// The claim could not be stored; the message is left for the next poll.
    ClaimFailed,
    Ignored { reason: &'static str },
    NoDatesFound,
    MissingEmail,
    AlreadyApplied,
    AwaitingApproval { request_id: ApprovalId },
    ApprovalRoutingFailed,
    Verified(VerificationDisposition),
}

enum ApprovalRouting {
    /// Verification can go ahead right away.
    AutoApproved,
    Pending(ApprovalId),
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub processed: usize,
    /// Newest message id handled; the next poll starts after it. Never moves
    /// past a message whose claim could not be stored.
    pub cursor: Option<String>,
}

impl ComplianceService {
    /// Fetches new messages from the leave channel and runs intake on each.
    pub async fn poll_channel(&self, since: Option<&str>) -> Result<PollReport, IntegrationError> {
        let messages = self
            .notifier
            .messenger()
            .fetch_new_messages(&self.leave_channel_id, since)
            .await?;

        let mut report = PollReport {
            fetched: messages.len(),
            processed: 0,
            cursor: since.map(str::to_owned),
        };
        for message in &messages {
            let outcome = self.handle_message(message).await;
            if outcome == IntakeOutcome::ClaimFailed {
                warn!(
                    event_name = "intake.poll.held",
                    correlation_id = %message.message_id,
                    "claim not stored, cursor held before this message"
                );
                break;
            }
            if !matches!(outcome, IntakeOutcome::Duplicate | IntakeOutcome::Ignored { .. }) {
                report.processed += 1;
            }
            if report.cursor.as_deref().map_or(true, |cursor| message.message_id.as_str() > cursor) {
                report.cursor = Some(message.message_id.clone());
            }
        }
        Ok(report)
    }

    /// One inbound message. The message is claimed before anything is sent,
    /// and the sender always gets a reply once it reads as an absence.
    pub async fn handle_message(&self, message: &InboundMessage) -> IntakeOutcome {
        match self.claims.claim(&message.channel_id, &message.message_id).await {
            Ok(true) => {}
            Ok(false) => return IntakeOutcome::Duplicate,
            Err(_) => return IntakeOutcome::ClaimFailed,
        }

        let person_id = match (&message.person_id, message.is_automated()) {
            (Some(person_id), false) => person_id.clone(),
            _ => {
                debug!(
                    event_name = "intake.message.automated",
                    correlation_id = %message.message_id,
                    "automated message ignored"
                );
                return IntakeOutcome::Ignored { reason: "automated" };
            }
        };

        let intent = self.intents.detect(&message.text);
        if !intent.is_absence {
            return IntakeOutcome::Ignored { reason: "not_an_absence" };
        }

        let now = self.now();
        let extracted = self.extractor.extract(&message.text, now.date_naive());
        let mention = AbsenceMention::new(
            MentionSource {
                message_id: &message.message_id,
                channel_id: &message.channel_id,
                person_id: &person_id,
                text: &message.text,
            },
            &extracted,
            intent.is_remote_work,
            intent.already_applied,
            now,
        );
        info!(
            event_name = "intake.mention.detected",
            correlation_id = %message.message_id,
            person_id = %person_id,
            dates = mention.dates().len(),
            strategy = extracted.strategy,
            confidence = mention.confidence(),
            remote = mention.is_remote_work(),
            "absence mention detected"
        );
        self.record(
            AnalyticsEvent::new(
                AnalyticsCategory::Mention,
                "mention.detected",
                message.message_id.clone(),
                now,
            )
            .with_person(person_id.clone())
            .with_metadata("strategy", extracted.strategy)
            .with_metadata("dates", mention.dates().len().to_string()),
        );

        let context = absence_context(&person_id, mention.is_remote_work(), mention.dates());
        let mut subject = AbsenceSubject {
            person_id: person_id.clone(),
            email: String::new(),
            message_id: message.message_id.clone(),
            channel_id: message.channel_id.clone(),
            dates: mention.dates().to_vec(),
            is_remote_work: mention.is_remote_work(),
        };

        if mention.dates().is_empty() {
            self.reply(&subject, Template::NoDatesFound, &context).await;
            return IntakeOutcome::NoDatesFound;
        }

        subject.email = match self.notifier.messenger().resolve_person_email(&person_id).await {
            Ok(Some(email)) if !email.trim().is_empty() => email,
            Ok(_) => {
                self.reply(&subject, Template::MissingEmail, &context).await;
                return IntakeOutcome::MissingEmail;
            }
            Err(error) => {
                warn!(
                    event_name = "intake.email.lookup_failed",
                    correlation_id = %message.message_id,
                    person_id = %person_id,
                    error = %error,
                    "email lookup failed"
                );
                self.reply(&subject, Template::MissingEmail, &context).await;
                return IntakeOutcome::MissingEmail;
            }
        };

        if mention.already_applied() {
            self.reply(&subject, Template::AlreadyApplied, &context).await;
            return IntakeOutcome::AlreadyApplied;
        }

        if self.approval_enabled {
            match self.request_approval(&mention, &subject).await {
                ApprovalRouting::AutoApproved => {}
                ApprovalRouting::Pending(request_id) => {
                    return IntakeOutcome::AwaitingApproval { request_id };
                }
                ApprovalRouting::Failed => {
                    self.reply(&subject, Template::ApprovalRoutingFailed, &context).await;
                    return IntakeOutcome::ApprovalRoutingFailed;
                }
            }
        }

        IntakeOutcome::Verified(self.verify_absence(&subject).await)
    }

    async fn request_approval(
        &self,
        mention: &AbsenceMention,
        subject: &AbsenceSubject,
    ) -> ApprovalRouting {
        let messenger = self.notifier.messenger();
        let name = match messenger.resolve_display_name(&subject.person_id).await {
            Ok(Some(name)) => name,
            _ => subject.email.clone(),
        };

        let created = self
            .approvals
            .create(NewApprovalRequest {
                requester: Requester {
                    person_id: subject.person_id.clone(),
                    email: subject.email.clone(),
                    name,
                },
                message_id: subject.message_id.clone(),
                channel_id: subject.channel_id.clone(),
                dates: mention.dates().to_vec(),
                leave_type: mention.leave_type(),
                is_remote_work: mention.is_remote_work(),
            })
            .await;

        let request = match created {
            Ok(request) => request,
            Err(error) => {
                warn!(
                    event_name = "intake.approval.routing_failed",
                    correlation_id = %subject.message_id,
                    person_id = %subject.person_id,
                    error = %error,
                    "approval request could not be created"
                );
                return ApprovalRouting::Failed;
            }
        };

        self.record(
            AnalyticsEvent::new(
                AnalyticsCategory::Approval,
                "approval.created",
                request.id.to_string(),
                self.now(),
            )
            .with_person(subject.person_id.clone())
            .with_metadata("status", request.status.as_str())
            .with_metadata("levels", request.chain.len().to_string()),
        );

        if request.status == ApprovalStatus::AutoApproved {
            self.direct_to_requester(&request, Template::ApprovalAutoApproved, &[]).await;
            return ApprovalRouting::AutoApproved;
        }

        self.send_current_card(&request).await;
        let approver = request
            .current_approver()
            .map(|approver| approver.name.clone())
            .unwrap_or_else(|| "your manager".to_owned());
        self.direct_to_requester(&request, Template::ApprovalSubmitted, &[("approver", approver)])
            .await;
        ApprovalRouting::Pending(request.id)
    }
}
