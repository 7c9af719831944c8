use crate::call_flow::{
    attempt_status, build_greeting, call_duration_secs, gather_plan, greeting_gather,
    terminal_call_state,
};
use crate::consts::{ATTEMPT_WINDOW_HOURS, VOICEMAIL_SUMMARY};
use crate::db_types::{CallDirection, CallState, NewAttempt, NewCall};
use crate::error::{ApiError, AppError};
use crate::scheduler;
use crate::telnyx_types::{
    parse_timestamp, DialRequest, EventKind, EventPayload, TelnyxAction, WebhookEvent,
};
use crate::types::AppState;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::types::time::OffsetDateTime;
use std::sync::Arc;
use time::Duration;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/telnyx", post(telnyx_webhook))
        .route("/webhooks/tasks", post(task_webhook))
        .route("/calls", post(originate_handler))
        .route("/jobs/follow-ups", post(run_follow_ups))
        .route("/", get(|| async { "Hello, World!" }))
        .with_state(app_state)
}

/// Call-event webhook.  The provider retries aggressively on non-2xx, so
/// every syntactically-anything body is acknowledged with 200; failures are
/// logged and marked in the response body instead of the status line.
pub async fn telnyx_webhook(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "telnyx webhook body");

    if app_state.config.telnyx_public_key.is_some()
        && !headers.contains_key("telnyx-signature-ed25519")
    {
        warn!("telnyx webhook arrived without a signature header");
    }

    let value: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            error!(error=%e, "telnyx webhook body is not valid json");
            return Json(json!({ "received": true, "error": "invalid json" }));
        }
    };

    let Some(event) = WebhookEvent::from_value(&value) else {
        warn!("telnyx webhook envelope carries no event_type");
        return Json(json!({ "received": true, "error": "missing event_type" }));
    };

    debug!(
        event_type=%event.event_type,
        call_control_id=?event.payload.call_control_id,
        direction=?event.payload.direction,
        "dispatching call event"
    );

    match dispatch_event(&app_state, event.kind(), &event.payload).await {
        Ok(action) => Json(json!({
            "received": true,
            "event_type": event.event_type,
            "action": action,
        })),
        Err(e) => {
            error!(error=%e, event_type=%event.event_type, "call event handling failed");
            Json(json!({
                "received": true,
                "event_type": event.event_type,
                "error": "internal",
            }))
        }
    }
}

/// Route one event through the state machine.  Store writes happen inline;
/// provider actions are spawned fire-and-forget so the acknowledgement never
/// waits on the provider API.
async fn dispatch_event(
    app_state: &Arc<AppState>,
    kind: EventKind,
    payload: &EventPayload,
) -> Result<&'static str, AppError> {
    let Some(call_control_id) = payload.call_control_id.as_deref() else {
        warn!("call event without call_control_id; acknowledged and dropped");
        return Ok("ignored");
    };

    match kind {
        EventKind::CallInitiated => on_call_initiated(app_state, call_control_id, payload).await,
        EventKind::CallRinging => {
            app_state
                .store
                .update_call_state(call_control_id, CallState::Ringing)
                .await?;
            Ok("ringing")
        }
        EventKind::CallAnswered => on_call_answered(app_state, call_control_id, payload).await,
        EventKind::GatherEnded => on_gather_ended(app_state, call_control_id, payload).await,
        EventKind::MachineDetectionEnded => {
            if payload.is_machine() {
                app_state
                    .store
                    .update_call_state(call_control_id, CallState::NoAnswer)
                    .await?;
                app_state
                    .store
                    .set_call_summary(call_control_id, VOICEMAIL_SUMMARY)
                    .await?;
                Ok("voicemail_detected")
            } else {
                Ok("human_detected")
            }
        }
        EventKind::RecordingSaved => on_recording_saved(app_state, call_control_id, payload).await,
        EventKind::CallHangup => on_call_hangup(app_state, call_control_id, payload).await,
        EventKind::Unknown => {
            info!("unhandled call event type; acknowledged");
            Ok("ignored")
        }
    }
}

fn event_direction(payload: &EventPayload) -> CallDirection {
    if payload.is_inbound() {
        CallDirection::Inbound
    } else {
        CallDirection::Outbound
    }
}

async fn on_call_initiated(
    app_state: &Arc<AppState>,
    call_control_id: &str,
    payload: &EventPayload,
) -> Result<&'static str, AppError> {
    app_state
        .store
        .ensure_call(NewCall {
            client_id: None,
            call_control_id: call_control_id.to_string(),
            call_session_id: payload.call_session_id.clone(),
            direction: event_direction(payload),
            from_number: payload.from.clone().unwrap_or_default(),
            to_number: payload.to.clone().unwrap_or_default(),
            call_state: CallState::Initiated,
            answered_at: None,
        })
        .await?;

    if payload.is_inbound() {
        let telnyx = app_state.telnyx.clone();
        let id = call_control_id.to_string();
        tokio::spawn(async move {
            let _ = telnyx.execute(&id, &TelnyxAction::Answer).await;
        });
        Ok("answering")
    } else {
        Ok("initiated")
    }
}

async fn on_call_answered(
    app_state: &Arc<AppState>,
    call_control_id: &str,
    payload: &EventPayload,
) -> Result<&'static str, AppError> {
    let now = OffsetDateTime::now_utc();

    // A lookup failure degrades to the generic greeting; it must never stop
    // the call from being answered and prompted.
    let client = match payload.from.as_deref() {
        Some(from) => app_state
            .store
            .find_client_by_phone(from)
            .await
            .ok()
            .flatten(),
        None => None,
    };
    let client_id = client.as_ref().map(|c| c.id);

    // Synthesize the row when call.initiated was missed.
    app_state
        .store
        .ensure_call(NewCall {
            client_id,
            call_control_id: call_control_id.to_string(),
            call_session_id: payload.call_session_id.clone(),
            direction: event_direction(payload),
            from_number: payload.from.clone().unwrap_or_default(),
            to_number: payload.to.clone().unwrap_or_default(),
            call_state: CallState::Answered,
            answered_at: Some(now),
        })
        .await?;
    app_state
        .store
        .mark_answered(call_control_id, client_id, now)
        .await?;

    if payload.is_inbound() {
        let greeting = build_greeting(client.as_ref());
        let telnyx = app_state.telnyx.clone();
        let id = call_control_id.to_string();
        tokio::spawn(async move {
            let _ = telnyx.execute(&id, &greeting_gather(greeting)).await;
        });
        Ok("processing_greeting")
    } else {
        Ok("answered")
    }
}

async fn on_gather_ended(
    app_state: &Arc<AppState>,
    call_control_id: &str,
    payload: &EventPayload,
) -> Result<&'static str, AppError> {
    let plan = gather_plan(
        payload.digits.as_deref(),
        app_state.config.forward_phone_number.as_deref(),
    );
    debug!(digits=?payload.digits, steps = plan.len(), "gather ended");

    let telnyx = app_state.telnyx.clone();
    let id = call_control_id.to_string();
    tokio::spawn(async move {
        telnyx.run_plan(&id, &plan).await;
    });

    Ok("processing_gather")
}

async fn on_recording_saved(
    app_state: &Arc<AppState>,
    call_control_id: &str,
    payload: &EventPayload,
) -> Result<&'static str, AppError> {
    let Some(url) = payload.recording_url() else {
        warn!(call_control_id, "recording.saved without a recording url");
        return Ok("ignored");
    };
    let Some(call) = app_state.store.get_call(call_control_id).await? else {
        warn!(call_control_id, "recording.saved for an unknown call");
        return Ok("ignored");
    };
    app_state
        .store
        .upsert_recording(call.id, url, payload.channels.as_deref())
        .await?;
    Ok("recording_saved")
}

async fn on_call_hangup(
    app_state: &Arc<AppState>,
    call_control_id: &str,
    payload: &EventPayload,
) -> Result<&'static str, AppError> {
    let now = OffsetDateTime::now_utc();
    let ended_at = payload
        .end_time
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    let Some(call) = app_state.store.get_call(call_control_id).await? else {
        warn!(call_control_id, "hangup for an unknown call; acknowledged");
        return Ok("ignored");
    };

    // A terminal row means this hangup (or machine detection) was already
    // processed; a redelivery must not write a second attempt.
    if call.call_state.is_terminal() {
        debug!(call_control_id, "hangup for an already-finished call; acknowledged");
        return Ok("already_processed");
    }

    let duration = call_duration_secs(call.created_at, call.answered_at, ended_at);
    let status = attempt_status(call.call_state, payload.hangup_cause.as_deref());
    app_state
        .store
        .finish_call(call_control_id, terminal_call_state(status), ended_at, duration)
        .await?;

    if let Some(url) = payload.recording_url() {
        app_state
            .store
            .upsert_recording(call.id, url, payload.channels.as_deref())
            .await?;
    }

    // Retry accounting is per client; anonymous calls have nothing to count
    // against.
    if let Some(client_id) = call.client_id {
        let since = now - Duration::hours(ATTEMPT_WINDOW_HOURS);
        let attempt_number = app_state.store.latest_attempt_number(client_id, since).await? + 1;
        app_state
            .store
            .insert_attempt(NewAttempt {
                client_id,
                call_id: Some(call.id),
                attempt_number,
                status,
                note: payload.hangup_cause.clone(),
            })
            .await?;
    }

    Ok("hangup_processed")
}

/// Task-automation webhook: client-row touch-ups driven by an external
/// task runner.
#[derive(Debug, Deserialize)]
pub struct TaskEvent {
    pub event: String,
    pub task_id: String,
    pub client_id: Option<Uuid>,
    pub action: Option<String>,
    pub scheduled_time: Option<String>,
}

pub async fn task_webhook(
    State(app_state): State<Arc<AppState>>,
    Json(event): Json<TaskEvent>,
) -> impl IntoResponse {
    let now = OffsetDateTime::now_utc();
    let mut result = Map::new();
    result.insert("success".into(), json!(true));
    result.insert("event".into(), json!(event.event));
    result.insert("task_id".into(), json!(event.task_id));

    match event.event.as_str() {
        "task.completed" => {
            if let Some(client_id) = event.client_id {
                if app_state.store.touch_task_update(client_id, now).await.is_ok() {
                    result.insert("client_updated".into(), json!(true));
                }
            }
        }
        "task.scheduled" => {
            if let (Some(client_id), Some(at)) = (
                event.client_id,
                event.scheduled_time.as_deref().and_then(parse_timestamp),
            ) {
                let scheduled = app_state.store.set_next_follow_up(client_id, at).await.is_ok()
                    && app_state.store.touch_task_update(client_id, now).await.is_ok();
                if scheduled {
                    result.insert("follow_up_scheduled".into(), json!(true));
                }
            }
        }
        "action.required" => match (event.action.as_deref(), event.client_id) {
            (Some("make_call"), Some(client_id)) => {
                result.insert("action".into(), json!("call_scheduled"));
                result.insert(
                    "message".into(),
                    json!(format!("Call action received for client {client_id}")),
                );
            }
            (Some("follow_up"), Some(client_id)) => {
                if app_state
                    .store
                    .set_requires_follow_up(client_id, true)
                    .await
                    .is_ok()
                {
                    result.insert("follow_up_flagged".into(), json!(true));
                }
            }
            _ => {}
        },
        "reminder.triggered" => {
            if let Some(client_id) = event.client_id {
                if app_state.store.touch_reminder(client_id, now).await.is_ok() {
                    result.insert("reminder_logged".into(), json!(true));
                }
            }
        }
        other => {
            warn!(event = other, "unknown task event type");
            result.insert("warning".into(), json!(format!("Unknown event type: {other}")));
        }
    }

    Json(Value::Object(result))
}

#[derive(Debug, Default, Deserialize)]
pub struct OriginateRequest {
    pub client_id: Option<Uuid>,
    pub phone_number: Option<String>,
    pub direction: Option<CallDirection>,
}

#[derive(Debug, Serialize)]
pub struct OriginateResponse {
    pub success: bool,
    pub call_control_id: String,
    pub call_session_id: Option<String>,
    pub call_id: Option<Uuid>,
    pub client_name: Option<String>,
}

pub async fn originate_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<OriginateRequest>,
) -> Result<Json<OriginateResponse>, ApiError> {
    originate_call(&app_state, req).await.map(Json)
}

/// Originate an outbound call: validate the target, dial through the
/// provider, persist the call row, and touch the client's last-call stamp.
/// Used by the dashboard trigger and the follow-up scheduler alike.
pub async fn originate_call(
    app_state: &AppState,
    req: OriginateRequest,
) -> Result<OriginateResponse, ApiError> {
    if req.client_id.is_none() && req.phone_number.is_none() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "either client_id or phone_number is required",
        ));
    }

    let mut client = None;
    let mut target_phone = req.phone_number.clone();

    if let Some(client_id) = req.client_id {
        let found = app_state
            .store
            .get_client(client_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "client not found"))?;
        if found.do_not_call {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "client is on the do-not-call list",
            ));
        }
        let phone = found
            .phone_number
            .clone()
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "client has no phone number"))?;
        target_phone = Some(phone);
        client = Some(found);
    }

    let Some(to) = target_phone else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "no target phone number",
        ));
    };

    let config = &app_state.config;
    let dial = DialRequest {
        connection_id: config.telnyx_connection_id.clone(),
        to: to.clone(),
        from: config.telnyx_phone_number.clone(),
        webhook_url: config.public_webhook_url.clone(),
        record: "record-from-answer",
        record_channels: "dual",
    };
    let data = app_state.telnyx.dial(&dial).await?;

    // The provider call exists either way now; a failed record write is
    // logged but cannot be compensated, so the response still succeeds.
    let call_id = match app_state
        .store
        .ensure_call(NewCall {
            client_id: client.as_ref().map(|c| c.id),
            call_control_id: data.call_control_id.clone(),
            call_session_id: data.call_session_id.clone(),
            direction: req.direction.unwrap_or(CallDirection::Outbound),
            from_number: config.telnyx_phone_number.clone(),
            to_number: to,
            call_state: CallState::Initiated,
            answered_at: None,
        })
        .await
    {
        Ok(call) => Some(call.id),
        Err(_) => None,
    };

    if let Some(c) = &client {
        let _ = app_state
            .store
            .touch_last_call(c.id, OffsetDateTime::now_utc())
            .await;
    }

    Ok(OriginateResponse {
        success: true,
        call_control_id: data.call_control_id,
        call_session_id: data.call_session_id,
        call_id,
        client_name: client.map(|c| c.name),
    })
}

pub async fn run_follow_ups(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<scheduler::FollowUpReport>, ApiError> {
    let report = scheduler::run_follow_up_batch(&app_state).await?;
    Ok(Json(report))
}
