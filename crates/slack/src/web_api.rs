//! Web API client implementing the core messaging interface.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use leavewatch_core::config::SlackConfig;
use leavewatch_core::errors::IntegrationError;
use leavewatch_core::messaging::{ApprovalCard, CardAudience, InboundMessage, MessagingClient};

use crate::blocks::{approval_card_message, MessageTemplate};

const SERVICE: &str = "slack";
const HISTORY_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("http transport failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("http status {0}")]
    Status(u16),
    #[error("api error `{0}`")]
    Api(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SlackApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<SlackApiError> for IntegrationError {
    fn from(error: SlackApiError) -> Self {
        match error {
            SlackApiError::Timeout => IntegrationError::Timeout { service: SERVICE },
            SlackApiError::Decode(message) => IntegrationError::Decode { service: SERVICE, message },
            other => IntegrationError::Request { service: SERVICE, message: other.to_string() },
        }
    }
}

#[derive(Deserialize)]
struct ApiStatus {
    ok: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Deserialize)]
struct HistoryMessage {
    ts: String,
    user: Option<String>,
    #[serde(default)]
    text: String,
    bot_id: Option<String>,
    subtype: Option<String>,
}

#[derive(Deserialize)]
struct UserResponse {
    user: SlackUser,
}

#[derive(Deserialize)]
struct SlackUser {
    id: String,
    real_name: Option<String>,
    #[serde(default)]
    profile: SlackProfile,
}

#[derive(Default, Deserialize)]
struct SlackProfile {
    email: Option<String>,
    display_name: Option<String>,
    real_name: Option<String>,
}

#[derive(Deserialize)]
struct OpenResponse {
    channel: OpenedChannel,
}

#[derive(Deserialize)]
struct OpenedChannel {
    id: String,
}

pub struct SlackWebClient {
    http: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl SlackWebClient {
    pub fn new(config: &SlackConfig) -> Result<Self, SlackApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            token: config.bot_token.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, SlackApiError> {
        let response = self
            .http
            .post(self.url(method))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await?;
        decode(method, response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SlackApiError> {
        let response = self
            .http
            .get(self.url(method))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await?;
        decode(method, response).await
    }

    async fn open_direct_channel(&self, person_id: &str) -> Result<String, SlackApiError> {
        let opened: OpenResponse = self.post("conversations.open", json!({ "users": person_id })).await?;
        Ok(opened.channel.id)
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
        template: Option<&MessageTemplate>,
    ) -> Result<(), SlackApiError> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = json!(thread_ts);
        }
        if let Some(template) = template {
            body["blocks"] = serde_json::to_value(&template.blocks)
                .map_err(|err| SlackApiError::Decode(err.to_string()))?;
        }
        let _: Value = self.post("chat.postMessage", body).await?;
        Ok(())
    }

    async fn user(&self, person_id: &str) -> Result<Option<SlackUser>, SlackApiError> {
        match self.get::<UserResponse>("users.info", &[("user", person_id)]).await {
            Ok(response) => Ok(Some(response.user)),
            Err(SlackApiError::Api(code)) if code == "user_not_found" => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Posts an ephemeral answer to an interaction's `response_url`.
    pub async fn respond(&self, response_url: &str, template: &MessageTemplate) -> Result<(), SlackApiError> {
        let blocks =
            serde_json::to_value(&template.blocks).map_err(|err| SlackApiError::Decode(err.to_string()))?;
        let response = self
            .http
            .post(response_url)
            .json(&json!({
                "response_type": "ephemeral",
                "replace_original": false,
                "text": template.fallback_text,
                "blocks": blocks,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SlackApiError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T, SlackApiError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(60);
        warn!(event_name = "slack.api.rate_limited", method, retry_after_secs, "slack rate limit hit");
        return Err(SlackApiError::RateLimited { retry_after_secs });
    }
    if !status.is_success() {
        return Err(SlackApiError::Status(status.as_u16()));
    }

    let body: Value = response.json().await?;
    let api_status: ApiStatus =
        serde_json::from_value(body.clone()).map_err(|err| SlackApiError::Decode(err.to_string()))?;
    if !api_status.ok {
        let code = api_status.error.unwrap_or_else(|| "unknown_error".to_owned());
        debug!(event_name = "slack.api.error", method, code = %code, "slack api returned ok=false");
        return Err(SlackApiError::Api(code));
    }
    serde_json::from_value(body).map_err(|err| SlackApiError::Decode(err.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}

#[async_trait]
impl MessagingClient for SlackWebClient {
    async fn fetch_new_messages(
        &self,
        channel_id: &str,
        since: Option<&str>,
    ) -> Result<Vec<InboundMessage>, IntegrationError> {
        let limit = HISTORY_PAGE_LIMIT.to_string();
        let mut query = vec![("channel", channel_id), ("limit", limit.as_str())];
        if let Some(since) = since {
            // `oldest` is exclusive unless `inclusive` is set.
            query.push(("oldest", since));
        }

        let history: HistoryResponse = self.get("conversations.history", &query).await?;
        // Newest first on the wire.
        let messages = history
            .messages
            .into_iter()
            .rev()
            .map(|message| InboundMessage {
                message_id: message.ts,
                channel_id: channel_id.to_owned(),
                person_id: message.user,
                text: message.text,
                bot_id: message.bot_id,
                subtype: message.subtype,
            })
            .collect();
        Ok(messages)
    }

    async fn post_reply(&self, channel_id: &str, thread_id: &str, text: &str) -> Result<(), IntegrationError> {
        Ok(self.post_message(channel_id, text, Some(thread_id), None).await?)
    }

    async fn post_direct(&self, person_id: &str, text: &str) -> Result<(), IntegrationError> {
        let channel = self.open_direct_channel(person_id).await?;
        Ok(self.post_message(&channel, text, None, None).await?)
    }

    async fn post_channel(&self, channel_id: &str, text: &str) -> Result<(), IntegrationError> {
        Ok(self.post_message(channel_id, text, None, None).await?)
    }

    async fn post_approval_card(&self, card: &ApprovalCard) -> Result<(), IntegrationError> {
        let channel = match card.audience {
            CardAudience::Approver => self.open_direct_channel(&card.recipient).await?,
            CardAudience::HrReview => card.recipient.clone(),
        };
        let template = approval_card_message(card);
        Ok(self.post_message(&channel, &template.fallback_text, None, Some(&template)).await?)
    }

    async fn resolve_person_email(&self, person_id: &str) -> Result<Option<String>, IntegrationError> {
        Ok(self.user(person_id).await?.and_then(|user| non_empty(user.profile.email)))
    }

    async fn resolve_person_id_by_email(&self, email: &str) -> Result<Option<String>, IntegrationError> {
        match self.get::<UserResponse>("users.lookupByEmail", &[("email", email)]).await {
            Ok(response) => Ok(Some(response.user.id)),
            Err(SlackApiError::Api(code)) if code == "users_not_found" => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn resolve_display_name(&self, person_id: &str) -> Result<Option<String>, IntegrationError> {
        Ok(self.user(person_id).await?.and_then(|user| {
            non_empty(user.profile.display_name)
                .or_else(|| non_empty(user.profile.real_name))
                .or_else(|| non_empty(user.real_name))
        }))
    }
}
