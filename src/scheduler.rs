use crate::consts::{
    ATTEMPT_WINDOW_HOURS, DIAL_THROTTLE_MILLIS, FOLLOW_UP_BATCH_LIMIT, FOLLOW_UP_LONG_DAYS,
    FOLLOW_UP_SHORT_DAYS, MAX_DIAL_ATTEMPTS,
};
use crate::db_types::Client;
use crate::error::AppError;
use crate::handlers::{originate_call, OriginateRequest};
use crate::types::AppState;

use serde::Serialize;
use serde_json::json;
use sqlx::types::time::OffsetDateTime;
use std::sync::Arc;
use time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
pub struct FollowUpReport {
    pub processed: usize,
    pub calls_made: usize,
    pub results: Vec<FollowUpResult>,
}

#[derive(Debug, Serialize)]
pub struct FollowUpResult {
    pub client_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One batch of follow-up dialing.  Candidates are processed strictly in
/// sequence with a fixed throttle between dials; there is no guard against a
/// second batch running concurrently (see DESIGN.md).
pub async fn run_follow_up_batch(app_state: &AppState) -> Result<FollowUpReport, AppError> {
    let now = OffsetDateTime::now_utc();
    let due = app_state
        .store
        .clients_due_for_follow_up(now, FOLLOW_UP_BATCH_LIMIT)
        .await?;

    if due.is_empty() {
        info!("no clients due for follow-up");
        return Ok(FollowUpReport {
            processed: 0,
            calls_made: 0,
            results: vec![],
        });
    }

    let mut results = Vec::new();
    for client in &due {
        if client.do_not_call {
            info!(client=%client.name, "skipping follow-up, client is on the do-not-call list");
            continue;
        }

        let since = now - Duration::hours(ATTEMPT_WINDOW_HOURS);
        let attempt = app_state
            .store
            .latest_attempt_number(client.id, since)
            .await?
            + 1;
        if attempt > MAX_DIAL_ATTEMPTS {
            info!(client=%client.name, "retry cap exceeded, deferring follow-up");
            app_state
                .store
                .set_next_follow_up(client.id, now + Duration::days(FOLLOW_UP_LONG_DAYS))
                .await?;
            continue;
        }

        if let Some(context) = fetch_client_context(app_state, client).await {
            debug!(client=%client.name, context_len = context.len(), "knowledge context fetched");
        }

        match originate_call(
            app_state,
            OriginateRequest {
                client_id: Some(client.id),
                ..Default::default()
            },
        )
        .await
        {
            Ok(_) => {
                app_state
                    .store
                    .set_next_follow_up(client.id, now + Duration::days(FOLLOW_UP_SHORT_DAYS))
                    .await?;
                info!(client=%client.name, attempt, "follow-up call placed");
                results.push(FollowUpResult {
                    client_name: client.name.clone(),
                    success: true,
                    attempt: Some(attempt),
                    error: None,
                });
            }
            Err(e) => {
                error!(client=%client.name, error=%e, "follow-up call failed");
                results.push(FollowUpResult {
                    client_name: client.name.clone(),
                    success: false,
                    attempt: Some(attempt),
                    error: Some(e.message),
                });
            }
        }

        // Stay under the provider's origination rate.
        tokio::time::sleep(std::time::Duration::from_millis(DIAL_THROTTLE_MILLIS)).await;
    }

    let calls_made = results.iter().filter(|r| r.success).count();
    Ok(FollowUpReport {
        processed: due.len(),
        calls_made,
        results,
    })
}

/// Best-effort context lookup against the knowledge endpoint.  Any failure
/// is swallowed; follow-up calls go out with or without context.
async fn fetch_client_context(app_state: &AppState, client: &Client) -> Option<String> {
    let url = app_state.config.knowledge_query_url.as_ref()?;
    let body = json!({
        "query": format!(
            "What recent deliverables and tasks have been completed for {}?",
            client.name
        ),
        "client_id": client.id,
    });

    let resp = match app_state.http_client.post(url).json(&body).send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error=%e, client=%client.name, "knowledge query failed");
            return None;
        }
    };
    if !resp.status().is_success() {
        warn!(status=%resp.status(), client=%client.name, "knowledge query rejected");
        return None;
    }

    let parsed: serde_json::Value = resp.json().await.ok()?;
    parsed
        .get("context")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// In-process cron: run the batch on a fixed interval.
pub async fn run_interval(app_state: Arc<AppState>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = run_follow_up_batch(&app_state).await {
            error!(error=%e, "follow-up batch failed");
        }
    }
}
