use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalId;
use crate::errors::IntegrationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel-scoped message id; replies thread under it.
    pub message_id: String,
    pub channel_id: String,
    pub person_id: Option<String>,
    pub text: String,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

impl InboundMessage {
    /// Bot posts, joins, edits and other subtyped events are never mentions.
    pub fn is_automated(&self) -> bool {
        self.bot_id.is_some() || self.subtype.is_some() || self.person_id.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardAudience {
    /// Buttons act on one chain level.
    Approver,
    /// Buttons force a decision; only HR identities may press them.
    HrReview,
}

/// Interactive decision card. Rendering belongs to the channel adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCard {
    pub request_id: ApprovalId,
    pub level: usize,
    pub audience: CardAudience,
    /// Direct-message recipient, or channel id for HR review cards.
    pub recipient: String,
    pub requester_name: String,
    pub requester_person_id: String,
    pub dates_label: String,
    pub day_count: usize,
    pub leave_type: String,
    pub is_remote_work: bool,
    pub summary: String,
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Messages newer than `since` (a message id), oldest first.
    async fn fetch_new_messages(
        &self,
        channel_id: &str,
        since: Option<&str>,
    ) -> Result<Vec<InboundMessage>, IntegrationError>;

    async fn post_reply(
        &self,
        channel_id: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<(), IntegrationError>;

    async fn post_direct(&self, person_id: &str, text: &str) -> Result<(), IntegrationError>;

    async fn post_channel(&self, channel_id: &str, text: &str) -> Result<(), IntegrationError>;

    async fn post_approval_card(&self, card: &ApprovalCard) -> Result<(), IntegrationError>;

    async fn resolve_person_email(
        &self,
        person_id: &str,
    ) -> Result<Option<String>, IntegrationError>;

    async fn resolve_person_id_by_email(
        &self,
        email: &str,
    ) -> Result<Option<String>, IntegrationError>;

    async fn resolve_display_name(
        &self,
        person_id: &str,
    ) -> Result<Option<String>, IntegrationError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    Reply { channel_id: String, thread_id: String, text: String },
    Direct { person_id: String, text: String },
    Channel { channel_id: String, text: String },
    Card(ApprovalCard),
}

impl SentMessage {
    pub fn text(&self) -> &str {
        match self {
            Self::Reply { text, .. } | Self::Direct { text, .. } | Self::Channel { text, .. } => {
                text
            }
            Self::Card(card) => &card.summary,
        }
    }
}

#[derive(Default)]
struct RecorderState {
    inbox: Vec<InboundMessage>,
    sent: Vec<SentMessage>,
    emails: HashMap<String, String>,
    names: HashMap<String, String>,
    fail_sends: bool,
}

/// In-process messaging client that records every send.
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingMessenger {
    fn with_state<R>(&self, apply: impl FnOnce(&mut RecorderState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => apply(&mut state),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }

    pub fn add_person(&self, person_id: &str, email: &str, name: &str) {
        self.with_state(|state| {
            state.emails.insert(person_id.to_owned(), email.to_owned());
            state.names.insert(person_id.to_owned(), name.to_owned());
        });
    }

    pub fn push_inbound(&self, message: InboundMessage) {
        self.with_state(|state| state.inbox.push(message));
    }

    pub fn fail_sends(&self, fail: bool) {
        self.with_state(|state| state.fail_sends = fail);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.with_state(|state| state.sent.clone())
    }

    pub fn clear_sent(&self) {
        self.with_state(|state| state.sent.clear());
    }

    fn record(&self, message: SentMessage) -> Result<(), IntegrationError> {
        self.with_state(|state| {
            if state.fail_sends {
                return Err(IntegrationError::Request {
                    service: "messaging",
                    message: "channel_not_found".to_owned(),
                });
            }
            state.sent.push(message);
            Ok(())
        })
    }
}

#[async_trait]
impl MessagingClient for RecordingMessenger {
    async fn fetch_new_messages(
        &self,
        channel_id: &str,
        since: Option<&str>,
    ) -> Result<Vec<InboundMessage>, IntegrationError> {
        Ok(self.with_state(|state| {
            state
                .inbox
                .iter()
                .filter(|message| message.channel_id == channel_id)
                .filter(|message| since.map_or(true, |since| message.message_id.as_str() > since))
                .cloned()
                .collect()
        }))
    }

    async fn post_reply(
        &self,
        channel_id: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<(), IntegrationError> {
        self.record(SentMessage::Reply {
            channel_id: channel_id.to_owned(),
            thread_id: thread_id.to_owned(),
            text: text.to_owned(),
        })
    }

    async fn post_direct(&self, person_id: &str, text: &str) -> Result<(), IntegrationError> {
        self.record(SentMessage::Direct { person_id: person_id.to_owned(), text: text.to_owned() })
    }

    async fn post_channel(&self, channel_id: &str, text: &str) -> Result<(), IntegrationError> {
        self.record(SentMessage::Channel {
            channel_id: channel_id.to_owned(),
            text: text.to_owned(),
        })
    }

    async fn post_approval_card(&self, card: &ApprovalCard) -> Result<(), IntegrationError> {
        self.record(SentMessage::Card(card.clone()))
    }

    async fn resolve_person_email(
        &self,
        person_id: &str,
    ) -> Result<Option<String>, IntegrationError> {
        Ok(self.with_state(|state| state.emails.get(person_id).cloned()))
    }

    async fn resolve_person_id_by_email(
        &self,
        email: &str,
    ) -> Result<Option<String>, IntegrationError> {
        Ok(self.with_state(|state| {
            state
                .emails
                .iter()
                .find(|(_, known)| known.eq_ignore_ascii_case(email))
                .map(|(person_id, _)| person_id.clone())
        }))
    }

    async fn resolve_display_name(
        &self,
        person_id: &str,
    ) -> Result<Option<String>, IntegrationError> {
        Ok(self.with_state(|state| state.names.get(person_id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::{InboundMessage, MessagingClient, RecordingMessenger, SentMessage};

    fn message(id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.to_owned(),
            channel_id: "C0LEAVE".to_owned(),
            person_id: Some("U0ALICE".to_owned()),
            text: text.to_owned(),
            bot_id: None,
            subtype: None,
        }
    }

    #[tokio::test]
    async fn fetch_returns_only_messages_after_the_cursor() {
        let messenger = RecordingMessenger::default();
        messenger.push_inbound(message("1710061200.000100", "on leave tomorrow"));
        messenger.push_inbound(message("1710061300.000100", "wfh friday"));

        let all = messenger.fetch_new_messages("C0LEAVE", None).await.expect("fetch");
        assert_eq!(all.len(), 2);

        let newer =
            messenger.fetch_new_messages("C0LEAVE", Some("1710061200.000100")).await.expect("fetch");
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].text, "wfh friday");
    }

    #[tokio::test]
    async fn identity_lookups_work_in_both_directions() {
        let messenger = RecordingMessenger::default();
        messenger.add_person("U0ALICE", "alice@example.com", "Alice");

        assert_eq!(
            messenger.resolve_person_email("U0ALICE").await.expect("lookup").as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(
            messenger.resolve_person_id_by_email("ALICE@example.com").await.expect("lookup"),
            Some("U0ALICE".to_owned())
        );
    }

    #[tokio::test]
    async fn failed_sends_are_not_recorded() {
        let messenger = RecordingMessenger::default();
        messenger.fail_sends(true);
        assert!(messenger.post_direct("U0ALICE", "hello").await.is_err());

        messenger.fail_sends(false);
        messenger.post_direct("U0ALICE", "hello").await.expect("send");
        assert_eq!(
            messenger.sent(),
            vec![SentMessage::Direct { person_id: "U0ALICE".to_owned(), text: "hello".to_owned() }]
        );
    }

    #[test]
    fn bot_and_subtyped_messages_are_automated() {
        let mut bot = message("1", "on leave");
        bot.bot_id = Some("B01".to_owned());
        assert!(bot.is_automated());

        let mut edited = message("2", "on leave");
        edited.subtype = Some("message_changed".to_owned());
        assert!(edited.is_automated());

        assert!(!message("3", "on leave").is_automated());
    }
}
