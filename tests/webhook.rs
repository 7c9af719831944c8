mod common;

use common::{paid_client, test_state};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use sally_rs::db_types::{AttemptStatus, CallDirection, CallState, NewCall};
use sally_rs::handlers;
use sally_rs::store::CallStore;
use serde_json::{json, Value};
use sqlx::types::time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::Duration;
use tower::ServiceExt;

async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn call_event(event_type: &str, payload: Value) -> String {
    json!({ "data": { "event_type": event_type, "payload": payload } }).to_string()
}

#[tokio::test]
async fn duplicate_initiated_creates_exactly_one_call() {
    let (state, store) = test_state();
    let app = handlers::router(state);
    let body = call_event(
        "call.initiated",
        json!({
            "call_control_id": "v3:dup",
            "direction": "incoming",
            "from": "+15551230000",
            "to": "+15550001111"
        }),
    );

    let (status, ack) = post(&app, "/webhooks/telnyx", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], json!(true));
    let (status, _) = post(&app, "/webhooks/telnyx", body).await;
    assert_eq!(status, StatusCode::OK);

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].call_state, CallState::Initiated);
    assert_eq!(calls[0].direction, CallDirection::Inbound);
}

#[tokio::test]
async fn malformed_json_is_acknowledged_with_error_marker() {
    let (state, _) = test_state();
    let app = handlers::router(state);

    let (status, ack) = post(&app, "/webhooks/telnyx", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], json!(true));
    assert_eq!(ack["error"], json!("invalid json"));
}

#[tokio::test]
async fn unknown_event_type_is_acknowledged() {
    let (state, store) = test_state();
    let app = handlers::router(state);

    let (status, ack) = post(
        &app,
        "/webhooks/telnyx",
        call_event("call.fork.started", json!({ "call_control_id": "v3:x" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["event_type"], json!("call.fork.started"));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn answered_attaches_known_client_and_marks_state() {
    let (state, store) = test_state();
    let client = paid_client("Dana", "+15551230000");
    let client_id = client.id;
    store.add_client(client);
    let app = handlers::router(state);

    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.initiated",
            json!({
                "call_control_id": "v3:ans",
                "direction": "incoming",
                "from": "+15551230000",
                "to": "+15550001111"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.answered",
            json!({
                "call_control_id": "v3:ans",
                "direction": "incoming",
                "from": "+15551230000",
                "to": "+15550001111"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let call = store.calls().into_iter().next().unwrap();
    assert_eq!(call.call_state, CallState::Answered);
    assert_eq!(call.client_id, Some(client_id));
    assert!(call.answered_at.is_some());
}

#[tokio::test]
async fn answered_without_initiated_synthesizes_the_row() {
    let (state, store) = test_state();
    let app = handlers::router(state);

    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.answered",
            json!({
                "call_control_id": "v3:late",
                "direction": "incoming",
                "from": "+15559998888",
                "to": "+15550001111"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].call_state, CallState::Answered);
}

#[tokio::test]
async fn hangup_computes_duration_and_records_completed_attempt() {
    let (state, store) = test_state();
    let client = paid_client("Dana", "+15551230000");
    let client_id = client.id;
    store.add_client(client);
    let app = handlers::router(state);

    for event in ["call.initiated", "call.answered"] {
        let (status, _) = post(
            &app,
            "/webhooks/telnyx",
            call_event(
                event,
                json!({
                    "call_control_id": "v3:dur",
                    "direction": "incoming",
                    "from": "+15551230000",
                    "to": "+15550001111"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let answered_at = store.calls()[0].answered_at.unwrap();
    let end_time = (answered_at + Duration::seconds(90)).format(&Rfc3339).unwrap();
    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.hangup",
            json!({
                "call_control_id": "v3:dur",
                "direction": "incoming",
                "hangup_cause": "normal_clearing",
                "end_time": end_time
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let call = store.calls().into_iter().next().unwrap();
    assert_eq!(call.call_state, CallState::Completed);
    assert_eq!(call.duration_secs, Some(90));
    assert!(call.ended_at.is_some());

    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].client_id, client_id);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].status, AttemptStatus::Completed);
}

#[tokio::test]
async fn unanswered_hangup_classifies_attempt_by_cause() {
    let (state, store) = test_state();
    let client = paid_client("Lee", "+15552224444");
    let client_id = client.id;
    store.add_client(client);

    // Outbound leg created by the originate path, hung up before answer.
    store
        .ensure_call(NewCall {
            client_id: Some(client_id),
            call_control_id: "v3:busy".to_string(),
            call_session_id: None,
            direction: CallDirection::Outbound,
            from_number: "+15550001111".to_string(),
            to_number: "+15552224444".to_string(),
            call_state: CallState::Initiated,
            answered_at: None,
        })
        .await
        .unwrap();

    let app = handlers::router(state);
    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.hangup",
            json!({ "call_control_id": "v3:busy", "hangup_cause": "USER_BUSY" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Busy);
    assert_eq!(store.calls()[0].call_state, CallState::Busy);
    assert!(store.calls()[0].duration_secs.unwrap() >= 0);
}

#[tokio::test]
async fn redelivered_hangup_records_exactly_one_attempt() {
    let (state, store) = test_state();
    let client = paid_client("Lee", "+15552224444");
    let client_id = client.id;
    store.add_client(client);

    store
        .ensure_call(NewCall {
            client_id: Some(client_id),
            call_control_id: "v3:redeliver".to_string(),
            call_session_id: None,
            direction: CallDirection::Outbound,
            from_number: "+15550001111".to_string(),
            to_number: "+15552224444".to_string(),
            call_state: CallState::Initiated,
            answered_at: None,
        })
        .await
        .unwrap();

    let app = handlers::router(state);
    let body = call_event(
        "call.hangup",
        json!({ "call_control_id": "v3:redeliver", "hangup_cause": "USER_BUSY" }),
    );
    let (status, _) = post(&app, "/webhooks/telnyx", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, ack) = post(&app, "/webhooks/telnyx", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["action"], json!("already_processed"));

    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].status, AttemptStatus::Busy);
    assert_eq!(store.calls()[0].call_state, CallState::Busy);
}

#[tokio::test]
async fn hangup_after_machine_detection_adds_no_attempt() {
    let (state, store) = test_state();
    let client = paid_client("Lee", "+15552224444");
    let client_id = client.id;
    store.add_client(client);

    store
        .ensure_call(NewCall {
            client_id: Some(client_id),
            call_control_id: "v3:amd-hup".to_string(),
            call_session_id: None,
            direction: CallDirection::Outbound,
            from_number: "+15550001111".to_string(),
            to_number: "+15552224444".to_string(),
            call_state: CallState::Answered,
            answered_at: Some(OffsetDateTime::now_utc()),
        })
        .await
        .unwrap();

    let app = handlers::router(state);
    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.machine.detection.ended",
            json!({ "call_control_id": "v3:amd-hup", "result": "machine" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.hangup",
            json!({ "call_control_id": "v3:amd-hup", "hangup_cause": "normal_clearing" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert!(store.attempts().is_empty());
    assert_eq!(store.calls()[0].call_state, CallState::NoAnswer);
}

#[tokio::test]
async fn repeated_recording_saved_keeps_one_row() {
    let (state, store) = test_state();
    let app = handlers::router(state);

    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.initiated",
            json!({
                "call_control_id": "v3:rec",
                "direction": "incoming",
                "from": "+15551230000",
                "to": "+15550001111"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for url in ["https://r/take1.mp3", "https://r/take2.mp3"] {
        let (status, _) = post(
            &app,
            "/webhooks/telnyx",
            call_event(
                "call.recording.saved",
                json!({
                    "call_control_id": "v3:rec",
                    "recording_urls": { "mp3": url },
                    "channels": "dual"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let recordings = store.recordings();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].recording_url, "https://r/take2.mp3");
}

#[tokio::test]
async fn machine_detection_marks_voicemail() {
    let (state, store) = test_state();
    let app = handlers::router(state);

    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.initiated",
            json!({
                "call_control_id": "v3:amd",
                "direction": "outgoing",
                "from": "+15550001111",
                "to": "+15553334444"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &app,
        "/webhooks/telnyx",
        call_event(
            "call.machine.detection.ended",
            json!({ "call_control_id": "v3:amd", "result": "machine" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let call = store.calls().into_iter().next().unwrap();
    assert_eq!(call.call_state, CallState::NoAnswer);
    assert_eq!(call.summary.as_deref(), Some("voicemail detected"));
}

#[tokio::test]
async fn originate_requires_a_target() {
    let (state, store) = test_state();
    let app = handlers::router(state);

    let (status, body) = post(&app, "/calls", json!({}).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("required"));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn originate_refuses_do_not_call_clients() {
    let (state, store) = test_state();
    let mut client = paid_client("Quiet", "+15556667777");
    client.do_not_call = true;
    let client_id = client.id;
    store.add_client(client);
    let app = handlers::router(state);

    let (status, body) = post(
        &app,
        "/calls",
        json!({ "client_id": client_id }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("do-not-call"));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn originate_rejects_unknown_clients() {
    let (state, _) = test_state();
    let app = handlers::router(state);

    let (status, body) = post(
        &app,
        "/calls",
        json!({ "client_id": uuid::Uuid::new_v4() }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("client not found"));
}

#[tokio::test]
async fn task_webhook_schedules_follow_up() {
    let (state, store) = test_state();
    let client = paid_client("Dana", "+15551230000");
    let client_id = client.id;
    store.add_client(client);
    let app = handlers::router(state);

    let scheduled = (OffsetDateTime::now_utc() + Duration::days(2))
        .format(&Rfc3339)
        .unwrap();
    let (status, body) = post(
        &app,
        "/webhooks/tasks",
        json!({
            "event": "task.scheduled",
            "task_id": "t-1",
            "client_id": client_id,
            "scheduled_time": scheduled
        })
        .to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["follow_up_scheduled"], json!(true));

    let updated = store.client(client_id).unwrap();
    assert!(updated.next_follow_up.is_some());
    assert!(updated.last_task_update.is_some());
}

#[tokio::test]
async fn task_webhook_flags_follow_up_action() {
    let (state, store) = test_state();
    let client = paid_client("Dana", "+15551230000");
    let client_id = client.id;
    store.add_client(client);
    let app = handlers::router(state);

    let (status, body) = post(
        &app,
        "/webhooks/tasks",
        json!({
            "event": "action.required",
            "task_id": "t-2",
            "client_id": client_id,
            "action": "follow_up"
        })
        .to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["follow_up_flagged"], json!(true));
    assert!(store.client(client_id).unwrap().requires_follow_up);
}

#[tokio::test]
async fn task_webhook_warns_on_unknown_events() {
    let (state, _) = test_state();
    let app = handlers::router(state);

    let (status, body) = post(
        &app,
        "/webhooks/tasks",
        json!({ "event": "task.exploded", "task_id": "t-3" }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["warning"].as_str().unwrap().contains("task.exploded"));
}
