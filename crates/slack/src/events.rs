use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use leavewatch_core::compliance::{ApprovalDecision, ComplianceService, DecisionOutcome};
use leavewatch_core::errors::{ApplicationError, InterfaceError};

use crate::blocks::{decision_ack_message, error_message, MessageTemplate};
use crate::interactivity::{decision_from_event, InteractivityError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    BlockAction,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub channel_id: Option<String>,
    pub message_ts: Option<String>,
    pub user_id: String,
    pub action_id: String,
    pub value: Option<String>,
    /// Text typed into the card's reason input, if any.
    pub reason: Option<String>,
    pub response_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Interactivity(#[from] InteractivityError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher with the approval button handler wired to `service`.
pub fn approval_dispatcher<S>(service: S) -> EventDispatcher
where
    S: ApprovalDecisionService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(ApprovalActionHandler::new(service));
    dispatcher
}

/// Seam between button presses and the approval state machine.
#[async_trait]
pub trait ApprovalDecisionService: Send + Sync {
    async fn decide(&self, decision: ApprovalDecision) -> Result<DecisionOutcome, ApplicationError>;
}

#[async_trait]
impl ApprovalDecisionService for ComplianceService {
    async fn decide(&self, decision: ApprovalDecision) -> Result<DecisionOutcome, ApplicationError> {
        self.handle_decision(decision).await
    }
}

#[async_trait]
impl<S> ApprovalDecisionService for Arc<S>
where
    S: ApprovalDecisionService + ?Sized,
{
    async fn decide(&self, decision: ApprovalDecision) -> Result<DecisionOutcome, ApplicationError> {
        (**self).decide(decision).await
    }
}

pub struct ApprovalActionHandler<S> {
    service: S,
}

impl<S> ApprovalActionHandler<S>
where
    S: ApprovalDecisionService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for ApprovalActionHandler<S>
where
    S: ApprovalDecisionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let decision = match decision_from_event(event) {
            Ok(decision) => decision,
            // Reason typing fires block actions too; only buttons decide.
            Err(InteractivityError::UnknownAction(action_id)) => {
                info!(
                    event_name = "slack.action.ignored",
                    correlation_id = %ctx.correlation_id,
                    action_id = %action_id,
                    "non-decision block action"
                );
                return Ok(HandlerResult::Processed);
            }
            Err(error) => return Err(error.into()),
        };
        let correlation_id = decision.request_id.to_string();

        match self.service.decide(decision).await {
            Ok(outcome) => Ok(HandlerResult::Responded(decision_ack_message(ack_text(&outcome)))),
            Err(error) => {
                warn!(
                    event_name = "slack.action.refused",
                    correlation_id = %correlation_id,
                    person_id = %event.user_id,
                    error = %error,
                    "approval decision refused"
                );
                let interface = error.into_interface(correlation_id);
                Ok(HandlerResult::Responded(error_message(
                    &refusal_text(&interface),
                    interface.correlation_id(),
                )))
            }
        }
    }
}

fn ack_text(outcome: &DecisionOutcome) -> String {
    match outcome {
        DecisionOutcome::Advanced { next_level } => {
            format!("Approved. Forwarded to the next approver (level {}).", next_level + 1)
        }
        DecisionOutcome::Approved(_) => "Approved. The requester has been told.".to_owned(),
        DecisionOutcome::Rejected => "Rejected. The requester has been told.".to_owned(),
        DecisionOutcome::Overridden { status } => {
            format!("HR override recorded: {}.", status.as_str())
        }
        DecisionOutcome::Unchanged => "This decision was already recorded.".to_owned(),
    }
}

fn refusal_text(error: &InterfaceError) -> String {
    match error {
        InterfaceError::BadRequest { message, .. } => {
            format!("That action was not accepted: {message}")
        }
        other => other.user_message().to_owned(),
    }
}
