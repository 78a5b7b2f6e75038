//! `POST /slack/actions`: signed button presses from approval cards.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use leavewatch_slack::events::{EventContext, EventDispatcher, HandlerResult, SlackEvent};
use leavewatch_slack::signature::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use leavewatch_slack::{parse_form, SlackWebClient};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

#[derive(Clone)]
pub struct ActionsState {
    signing_secret: Option<SecretString>,
    dispatcher: Arc<EventDispatcher>,
    slack: Arc<SlackWebClient>,
}

impl ActionsState {
    pub fn new(
        signing_secret: Option<SecretString>,
        dispatcher: Arc<EventDispatcher>,
        slack: Arc<SlackWebClient>,
    ) -> Self {
        Self { signing_secret, dispatcher, slack }
    }
}

pub fn router(state: ActionsState) -> Router {
    Router::new().route("/slack/actions", post(slack_actions)).with_state(state)
}

/// Acknowledges within Slack's three-second window; the decision itself and
/// the ephemeral answer run on a spawned task.
pub async fn slack_actions(
    State(state): State<ActionsState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(secret) = state.signing_secret.as_ref() else {
        warn!(
            event_name = "slack.actions.unconfigured",
            correlation_id = "unknown",
            "interactivity request refused: no signing secret configured"
        );
        return StatusCode::UNAUTHORIZED;
    };

    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    if let Err(error) = signature::verify(
        secret.expose_secret().as_bytes(),
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        &body,
        unix_now(),
    ) {
        warn!(
            event_name = "slack.actions.signature_rejected",
            correlation_id = "unknown",
            error = %error,
            "interactivity request failed signature check"
        );
        return StatusCode::UNAUTHORIZED;
    }

    let envelope = match parse_form(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(
                event_name = "slack.actions.malformed",
                correlation_id = "unknown",
                error = %error,
                "interactivity payload could not be parsed"
            );
            return StatusCode::BAD_REQUEST;
        }
    };

    tokio::spawn(async move {
        let ctx = EventContext { correlation_id: envelope.envelope_id.clone() };
        let response_url = match &envelope.event {
            SlackEvent::BlockAction(event) => event.response_url.clone(),
            SlackEvent::Unsupported { .. } => None,
        };

        match state.dispatcher.dispatch(&envelope, &ctx).await {
            Ok(HandlerResult::Responded(message)) => {
                let Some(url) = response_url else {
                    return;
                };
                if let Err(error) = state.slack.respond(&url, &message).await {
                    warn!(
                        event_name = "slack.actions.respond_failed",
                        correlation_id = %ctx.correlation_id,
                        error = %error,
                        "could not post the decision acknowledgement"
                    );
                }
            }
            Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
            Err(error) => {
                info!(
                    event_name = "slack.actions.dispatch_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "interactivity event not handled"
                );
            }
        }
    });

    StatusCode::OK
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use leavewatch_core::compliance::{ApprovalAction, ApprovalDecision, DecisionOutcome};
    use leavewatch_core::config::AppConfig;
    use leavewatch_core::errors::ApplicationError;
    use leavewatch_slack::signature::{sign, SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use leavewatch_slack::{approval_dispatcher, ApprovalDecisionService, SlackWebClient};
    use secrecy::SecretString;
    use serde_json::json;
    use tower::ServiceExt;

    use super::{router, unix_now, ActionsState};

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    #[derive(Clone, Default)]
    struct RecordingService {
        decisions: Arc<Mutex<Vec<ApprovalDecision>>>,
    }

    impl RecordingService {
        fn decisions(&self) -> Vec<ApprovalDecision> {
            self.decisions.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl ApprovalDecisionService for RecordingService {
        async fn decide(
            &self,
            decision: ApprovalDecision,
        ) -> Result<DecisionOutcome, ApplicationError> {
            self.decisions.lock().expect("lock").push(decision);
            Ok(DecisionOutcome::Unchanged)
        }
    }

    fn state(secret: Option<&str>, service: RecordingService) -> ActionsState {
        let slack = SlackWebClient::new(&AppConfig::default().slack).expect("client");
        ActionsState::new(
            secret.map(|secret| SecretString::from(secret.to_owned())),
            Arc::new(approval_dispatcher(service)),
            Arc::new(slack),
        )
    }

    fn approve_body() -> String {
        let payload = json!({
            "type": "block_actions",
            "trigger_id": "trig-7",
            "user": { "id": "U0CAROL" },
            "actions": [{ "action_id": "approval_approve", "value": "apr-7:0" }]
        })
        .to_string();
        serde_urlencoded::to_string([("payload", payload)]).expect("encode form")
    }

    fn signed_request(body: &str, secret: &str) -> Request<Body> {
        let timestamp = unix_now().to_string();
        Request::builder()
            .method("POST")
            .uri("/slack/actions")
            .header("content-type", "application/x-www-form-urlencoded")
            .header(TIMESTAMP_HEADER, &timestamp)
            .header(SIGNATURE_HEADER, sign(secret.as_bytes(), &timestamp, body.as_bytes()))
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    #[tokio::test]
    async fn signed_button_press_reaches_the_approval_service() {
        let service = RecordingService::default();
        let app = router(state(Some(SECRET), service.clone()));

        let response =
            app.oneshot(signed_request(&approve_body(), SECRET)).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::timeout(Duration::from_secs(5), async {
            while service.decisions().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("decision should be dispatched");

        let decision = &service.decisions()[0];
        assert_eq!(decision.request_id.0, "apr-7");
        assert_eq!(decision.level, 0);
        assert_eq!(decision.actor, "U0CAROL");
        assert_eq!(decision.action, ApprovalAction::Approve);
    }

    #[tokio::test]
    async fn wrong_signature_is_unauthorized() {
        let service = RecordingService::default();
        let app = router(state(Some(SECRET), service.clone()));

        let response =
            app.oneshot(signed_request(&approve_body(), "other-secret")).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(service.decisions().is_empty());
    }

    #[tokio::test]
    async fn missing_signing_secret_rejects_everything() {
        let app = router(state(None, RecordingService::default()));

        let response =
            app.oneshot(signed_request(&approve_body(), SECRET)).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_garbage_is_a_bad_request() {
        let app = router(state(Some(SECRET), RecordingService::default()));

        let response = app.oneshot(signed_request("token=abc", SECRET)).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
