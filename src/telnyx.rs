use crate::consts::{SPEAK_LANGUAGE, SPEAK_VOICE};
use crate::error::{ApiError, AppError};
use crate::telnyx_types::{DialData, DialRequest, DialResponse, TelnyxAction};

use http::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, error};

/// Thin client for the provider's Call Control REST API.  Per-call actions
/// are keyed by the call control id in the URL path and bearer-authorized.
#[derive(Clone)]
pub struct TelnyxClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TelnyxClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// Issue one call action.  A non-2xx from the provider is logged with
    /// status and body but reported as `Ok`: the webhook's own response never
    /// depends on it.  `Err` means the request could not be sent at all.
    pub async fn execute(&self, call_control_id: &str, action: &TelnyxAction) -> Result<(), AppError> {
        let (name, body) = match action {
            TelnyxAction::Answer => ("answer", json!({})),
            TelnyxAction::Speak { text } => (
                "speak",
                json!({
                    "payload": text,
                    "voice": SPEAK_VOICE,
                    "language": SPEAK_LANGUAGE,
                }),
            ),
            TelnyxAction::GatherUsingSpeak {
                text,
                min_digits,
                max_digits,
                timeout_millis,
            } => (
                "gather_using_speak",
                json!({
                    "payload": text,
                    "voice": SPEAK_VOICE,
                    "language": SPEAK_LANGUAGE,
                    "minimum_digits": min_digits,
                    "maximum_digits": max_digits,
                    "timeout_millis": timeout_millis,
                }),
            ),
            TelnyxAction::Transfer { to } => ("transfer", json!({ "to": to })),
            TelnyxAction::RecordStart => (
                "record_start",
                json!({ "format": "mp3", "channels": "single" }),
            ),
        };
        self.post_action(call_control_id, name, &body).await
    }

    /// Run a sequence of actions in order, each awaited before the next
    /// (speak-then-transfer must not race).  A transport failure aborts the
    /// remainder; provider-side rejections do not.
    pub async fn run_plan(&self, call_control_id: &str, plan: &[TelnyxAction]) {
        for action in plan {
            if self.execute(call_control_id, action).await.is_err() {
                break;
            }
        }
    }

    async fn post_action(
        &self,
        call_control_id: &str,
        action: &str,
        body: &Value,
    ) -> Result<(), AppError> {
        let url = format!("{}/calls/{}/actions/{}", self.base_url, call_control_id, action);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, action, call_control_id, "failed to reach telnyx");
                AppError("telnyx unreachable")
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.is_success() {
            debug!(action, call_control_id, status=%status, "telnyx action accepted");
        } else {
            error!(action, call_control_id, status=%status, body=%text, "telnyx action rejected");
        }

        Ok(())
    }

    /// Originate an outbound call.  This path has a synchronous caller, so
    /// provider rejections surface with their status and body.
    pub async fn dial(&self, req: &DialRequest) -> Result<DialData, ApiError> {
        let url = format!("{}/calls", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, to=%req.to, "failed to reach telnyx for dial");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to reach telnyx")
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status=%status, body=%text, to=%req.to, "telnyx dial rejected");
            return Err(ApiError::new(
                status,
                format!("failed to initiate call: {text}"),
            ));
        }

        let parsed: DialResponse = resp.json().await.map_err(|e| {
            error!(error=%e, "failed to deserialize telnyx dial response");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "unexpected response from telnyx",
            )
        })?;

        Ok(parsed.data)
    }
}
