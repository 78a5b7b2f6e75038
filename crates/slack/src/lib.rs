//! Slack adapter for the leave-compliance bot.
//!
//! - **Web API** (`web_api`) - `MessagingClient` over `conversations.history`,
//!   `chat.postMessage` and the user lookup methods
//! - **Block Kit** (`blocks`) - approval cards and decision acknowledgements
//! - **Interactivity** (`interactivity`, `signature`) - signed button posts
//!   decoded into envelopes
//! - **Events** (`events`) - dispatcher routing button presses to the approval
//!   state machine
//!
//! Channel messages are polled; only button presses are pushed to us.

pub mod blocks;
pub mod events;
pub mod interactivity;
pub mod signature;
pub mod web_api;

pub use events::{approval_dispatcher, ApprovalDecisionService, EventContext, EventDispatcher, HandlerResult};
pub use interactivity::parse_form;
pub use web_api::{SlackApiError, SlackWebClient};
