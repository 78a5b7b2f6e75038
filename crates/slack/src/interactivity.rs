//! Parsing of `application/x-www-form-urlencoded` interactivity posts into
//! dispatcher envelopes, and of button presses into approval decisions.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use leavewatch_core::compliance::{ApprovalAction, ApprovalDecision};
use leavewatch_core::domain::approval::ApprovalId;

use crate::blocks::{
    ACTION_APPROVE, ACTION_HR_APPROVE, ACTION_HR_REJECT, ACTION_REJECT, REASON_ACTION_ID,
    REASON_BLOCK_ID,
};
use crate::events::{BlockActionEvent, SlackEnvelope, SlackEvent};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InteractivityError {
    #[error("form body could not be decoded: {0}")]
    Form(String),
    #[error("payload is not valid JSON: {0}")]
    Payload(String),
    #[error("block action carried no actions")]
    NoAction,
    #[error("action `{0}` is not an approval decision")]
    UnknownAction(String),
    #[error("button value `{0}` is not `<request_id>:<level>`")]
    MalformedValue(String),
}

#[derive(Deserialize)]
struct ActionForm {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct InteractionPayload {
    #[serde(rename = "type")]
    kind: String,
    trigger_id: Option<String>,
    user: PayloadUser,
    channel: Option<PayloadChannel>,
    container: Option<PayloadContainer>,
    #[serde(default)]
    actions: Vec<PayloadAction>,
    state: Option<PayloadState>,
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PayloadChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PayloadContainer {
    message_ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadAction {
    action_id: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadState {
    #[serde(default)]
    values: HashMap<String, HashMap<String, StateValue>>,
}

#[derive(Debug, Deserialize)]
struct StateValue {
    value: Option<String>,
}

/// Decodes the form body Slack posts to the interactivity URL.
pub fn parse_form(body: &[u8]) -> Result<SlackEnvelope, InteractivityError> {
    let form: ActionForm =
        serde_urlencoded::from_bytes(body).map_err(|err| InteractivityError::Form(err.to_string()))?;
    parse_payload(&form.payload)
}

pub fn parse_payload(payload: &str) -> Result<SlackEnvelope, InteractivityError> {
    let payload: InteractionPayload =
        serde_json::from_str(payload).map_err(|err| InteractivityError::Payload(err.to_string()))?;
    let envelope_id = payload.trigger_id.clone().unwrap_or_else(|| "no-trigger".to_owned());

    if payload.kind != "block_actions" {
        return Ok(SlackEnvelope { envelope_id, event: SlackEvent::Unsupported { event_type: payload.kind } });
    }

    let reason = payload
        .state
        .as_ref()
        .and_then(|state| state.values.get(REASON_BLOCK_ID))
        .and_then(|block| block.get(REASON_ACTION_ID))
        .and_then(|input| input.value.as_deref())
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_owned);

    let action = payload.actions.into_iter().next().ok_or(InteractivityError::NoAction)?;
    Ok(SlackEnvelope {
        envelope_id,
        event: SlackEvent::BlockAction(BlockActionEvent {
            channel_id: payload.channel.map(|channel| channel.id),
            message_ts: payload.container.and_then(|container| container.message_ts),
            user_id: payload.user.id,
            action_id: action.action_id,
            value: action.value,
            reason,
            response_url: payload.response_url,
        }),
    })
}

/// Splits `{request_id}:{level}`. Request ids never contain `:`, but the
/// split is from the right anyway.
pub fn parse_action_value(value: &str) -> Result<(ApprovalId, usize), InteractivityError> {
    let malformed = || InteractivityError::MalformedValue(value.to_owned());
    let (request_id, level) = value.rsplit_once(':').ok_or_else(malformed)?;
    if request_id.is_empty() {
        return Err(malformed());
    }
    let level = level.parse().map_err(|_| malformed())?;
    Ok((ApprovalId(request_id.to_owned()), level))
}

pub fn action_for(action_id: &str) -> Option<ApprovalAction> {
    match action_id {
        ACTION_APPROVE => Some(ApprovalAction::Approve),
        ACTION_REJECT => Some(ApprovalAction::Reject),
        ACTION_HR_APPROVE => Some(ApprovalAction::HrApprove),
        ACTION_HR_REJECT => Some(ApprovalAction::HrReject),
        _ => None,
    }
}

pub fn decision_from_event(event: &BlockActionEvent) -> Result<ApprovalDecision, InteractivityError> {
    let action = action_for(&event.action_id)
        .ok_or_else(|| InteractivityError::UnknownAction(event.action_id.clone()))?;
    let value = event
        .value
        .as_deref()
        .ok_or_else(|| InteractivityError::MalformedValue(String::new()))?;
    let (request_id, level) = parse_action_value(value)?;

    Ok(ApprovalDecision {
        request_id,
        level,
        actor: event.user_id.clone(),
        action,
        reason: event.reason.clone(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_action_value, parse_form, parse_payload, InteractivityError};
    use crate::events::SlackEvent;

    fn block_actions(action_id: &str, value: &str, reason: Option<&str>) -> String {
        json!({
            "type": "block_actions",
            "trigger_id": "trig-1",
            "user": { "id": "U0BOB", "username": "bob" },
            "channel": { "id": "D0BOB" },
            "container": { "type": "message", "message_ts": "1710061200.000100" },
            "actions": [{ "action_id": action_id, "block_id": "approval.actions.v1", "value": value }],
            "state": { "values": { "approval.reason.v1": { "approval_reason": {
                "type": "plain_text_input", "value": reason
            } } } },
            "response_url": "https://hooks.slack.com/actions/T0/1/abc"
        })
        .to_string()
    }

    #[test]
    fn form_bodies_decode_into_block_actions() {
        let payload = block_actions("approval_reject", "apr-9:1", Some("  release week "));
        let body = serde_urlencoded::to_string([("payload", payload)]).expect("encode form");

        let envelope = parse_form(body.as_bytes()).expect("parse");

        assert_eq!(envelope.envelope_id, "trig-1");
        let SlackEvent::BlockAction(event) = envelope.event else {
            panic!("expected a block action");
        };
        assert_eq!(event.user_id, "U0BOB");
        assert_eq!(event.action_id, "approval_reject");
        assert_eq!(event.value.as_deref(), Some("apr-9:1"));
        assert_eq!(event.reason.as_deref(), Some("release week"));
        assert_eq!(event.message_ts.as_deref(), Some("1710061200.000100"));
        assert_eq!(event.response_url.as_deref(), Some("https://hooks.slack.com/actions/T0/1/abc"));
    }

    #[test]
    fn blank_reasons_are_dropped() {
        let envelope = parse_payload(&block_actions("approval_reject", "apr-9:1", Some("   ")))
            .expect("parse");
        let SlackEvent::BlockAction(event) = envelope.event else {
            panic!("expected a block action");
        };
        assert_eq!(event.reason, None);
    }

    #[test]
    fn other_interaction_types_are_unsupported() {
        let payload = json!({ "type": "view_submission", "user": { "id": "U0BOB" } }).to_string();
        let envelope = parse_payload(&payload).expect("parse");
        assert_eq!(envelope.event, SlackEvent::Unsupported { event_type: "view_submission".to_owned() });
    }

    #[test]
    fn bodies_without_payload_field_are_rejected() {
        assert!(matches!(parse_form(b"token=abc"), Err(InteractivityError::Form(_))));
    }

    #[test]
    fn action_values_split_into_request_and_level() {
        let (request_id, level) = parse_action_value("apr-4f2a:2").expect("value");
        assert_eq!(request_id.0, "apr-4f2a");
        assert_eq!(level, 2);

        for bad in ["apr-1", ":1", "apr-1:x", ""] {
            assert_eq!(
                parse_action_value(bad),
                Err(InteractivityError::MalformedValue(bad.to_owned()))
            );
        }
    }
}
