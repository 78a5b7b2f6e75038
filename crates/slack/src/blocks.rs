use serde::Serialize;

use leavewatch_core::messaging::{ApprovalCard, CardAudience};

pub const ACTION_APPROVE: &str = "approval_approve";
pub const ACTION_REJECT: &str = "approval_reject";
pub const ACTION_HR_APPROVE: &str = "approval_hr_approve";
pub const ACTION_HR_REJECT: &str = "approval_hr_reject";

/// Input block carrying the optional rejection / override reason.
pub const REASON_BLOCK_ID: &str = "approval.reason.v1";
pub const REASON_ACTION_ID: &str = "approval_reason";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { action_id: action_id.into(), text: TextObject::plain(label), style: None, value: None }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "plain_text_input")]
pub struct PlainTextInput {
    pub action_id: String,
    pub multiline: bool,
    pub placeholder: TextObject,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
    Input { block_id: String, label: TextObject, element: PlainTextInput, optional: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section(mut self, block_id: impl Into<String>, text: TextObject) -> Self {
        self.blocks.push(Block::Section { block_id: block_id.into(), text });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.elements });
        self
    }

    pub fn context(mut self, block_id: impl Into<String>, elements: Vec<TextObject>) -> Self {
        self.blocks.push(Block::Context { block_id: block_id.into(), elements });
        self
    }

    pub fn reason_input(mut self, label: impl Into<String>) -> Self {
        self.blocks.push(Block::Input {
            block_id: REASON_BLOCK_ID.to_owned(),
            label: TextObject::plain(label),
            element: PlainTextInput {
                action_id: REASON_ACTION_ID.to_owned(),
                multiline: false,
                placeholder: TextObject::plain("Optional reason"),
            },
            optional: true,
        });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }
}

/// `{request_id}:{level}`, parsed back by the interactivity layer.
pub fn action_value(card: &ApprovalCard) -> String {
    format!("{}:{}", card.request_id, card.level)
}

pub fn approval_card_message(card: &ApprovalCard) -> MessageTemplate {
    let value = action_value(card);
    let kind = if card.is_remote_work { "Remote work" } else { "Leave" };
    let days = if card.day_count == 1 { "1 day".to_owned() } else { format!("{} days", card.day_count) };

    let builder = MessageBuilder::new(card.summary.clone())
        .section("approval.summary.v1", TextObject::mrkdwn(format!("*{kind} request*\n{}", card.summary)))
        .context(
            "approval.details.v1",
            vec![
                TextObject::mrkdwn(format!("*Requested by:* <@{}>", card.requester_person_id)),
                TextObject::mrkdwn(format!("*Dates:* {} ({days})", card.dates_label)),
                TextObject::mrkdwn(format!("*Type:* {}", card.leave_type)),
            ],
        )
        .reason_input("Reason");

    let builder = match card.audience {
        CardAudience::Approver => builder.actions("approval.actions.v1", |actions| {
            actions
                .button(
                    ButtonElement::new(ACTION_APPROVE, "Approve")
                        .style(ButtonStyle::Primary)
                        .value(value.clone()),
                )
                .button(
                    ButtonElement::new(ACTION_REJECT, "Reject")
                        .style(ButtonStyle::Danger)
                        .value(value.clone()),
                );
        }),
        CardAudience::HrReview => builder
            .context(
                "approval.hr_notice.v1",
                vec![TextObject::plain("The approver did not respond in time. HR decision required.")],
            )
            .actions("approval.hr_actions.v1", |actions| {
                actions
                    .button(
                        ButtonElement::new(ACTION_HR_APPROVE, "HR approve")
                            .style(ButtonStyle::Primary)
                            .value(value.clone()),
                    )
                    .button(
                        ButtonElement::new(ACTION_HR_REJECT, "HR reject")
                            .style(ButtonStyle::Danger)
                            .value(value.clone()),
                    );
            }),
    };
    builder.build()
}

/// Ephemeral reply to the person who pressed a button.
pub fn decision_ack_message(text: impl Into<String>) -> MessageTemplate {
    let text = text.into();
    MessageBuilder::new(text.clone()).section("approval.ack.v1", TextObject::plain(text)).build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(format!("{summary} (ref: {correlation_id})"))
        .section("approval.error.v1", TextObject::mrkdwn(format!(":warning: {summary}")))
        .context("approval.error.ref.v1", vec![TextObject::plain(format!("Reference: {correlation_id}"))])
        .build()
}

#[cfg(test)]
mod tests {
    use leavewatch_core::domain::approval::ApprovalId;
    use leavewatch_core::messaging::{ApprovalCard, CardAudience};

    use super::{
        approval_card_message, error_message, Block, ButtonStyle, ACTION_APPROVE,
        ACTION_HR_APPROVE, ACTION_HR_REJECT, ACTION_REJECT, REASON_BLOCK_ID,
    };

    fn card(audience: CardAudience) -> ApprovalCard {
        ApprovalCard {
            request_id: ApprovalId("apr-1".to_owned()),
            level: 1,
            audience,
            recipient: "U0CAROL".to_owned(),
            requester_name: "Alice".to_owned(),
            requester_person_id: "U0ALICE".to_owned(),
            dates_label: "11 Mar 2024 to 13 Mar 2024".to_owned(),
            day_count: 3,
            leave_type: "annual".to_owned(),
            is_remote_work: false,
            summary: "Alice requests leave for 11 Mar 2024 to 13 Mar 2024 (3 days). Level 2 of 2."
                .to_owned(),
        }
    }

    fn buttons(message: &super::MessageTemplate) -> Vec<(String, Option<ButtonStyle>, Option<String>)> {
        message
            .blocks
            .iter()
            .filter_map(|block| match block {
                Block::Actions { elements, .. } => Some(elements),
                _ => None,
            })
            .flatten()
            .map(|button| (button.action_id.clone(), button.style.clone(), button.value.clone()))
            .collect()
    }

    #[test]
    fn approver_card_carries_request_and_level_in_both_buttons() {
        let message = approval_card_message(&card(CardAudience::Approver));

        let buttons = buttons(&message);
        assert_eq!(
            buttons,
            vec![
                (ACTION_APPROVE.to_owned(), Some(ButtonStyle::Primary), Some("apr-1:1".to_owned())),
                (ACTION_REJECT.to_owned(), Some(ButtonStyle::Danger), Some("apr-1:1".to_owned())),
            ]
        );
        assert!(message.fallback_text.contains("Level 2 of 2"));
    }

    #[test]
    fn hr_review_card_offers_override_buttons() {
        let message = approval_card_message(&card(CardAudience::HrReview));

        let actions: Vec<String> = buttons(&message).into_iter().map(|(id, _, _)| id).collect();
        assert_eq!(actions, vec![ACTION_HR_APPROVE.to_owned(), ACTION_HR_REJECT.to_owned()]);
    }

    #[test]
    fn cards_include_an_optional_reason_input() {
        let message = approval_card_message(&card(CardAudience::Approver));
        assert!(message.blocks.iter().any(|block| matches!(
            block,
            Block::Input { block_id, optional: true, .. } if block_id == REASON_BLOCK_ID
        )));
    }

    #[test]
    fn blocks_serialize_with_slack_type_tags() {
        let message = approval_card_message(&card(CardAudience::Approver));
        let json = serde_json::to_value(&message.blocks).expect("serialize");

        assert_eq!(json[0]["type"], "section");
        assert_eq!(json[0]["text"]["type"], "mrkdwn");
        assert_eq!(json[2]["element"]["type"], "plain_text_input");
        assert_eq!(json[3]["elements"][0]["type"], "button");
        assert_eq!(json[3]["elements"][0]["text"]["type"], "plain_text");
    }

    #[test]
    fn error_template_contains_correlation_id() {
        let message = error_message("Cannot process decision", "apr-1");
        assert!(message.fallback_text.contains("apr-1"));
    }
}
