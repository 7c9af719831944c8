//! Pure decision logic for the call state machine: greeting construction,
//! gather branching, and hangup bookkeeping.  Keeping these free of I/O lets
//! the ordering and mapping rules be tested without a provider or database.

use crate::consts::{
    FALLBACK_MESSAGE, GATHER_TIMEOUT_MILLIS, GREETING_BASE, MENU_KNOWN, MENU_UNKNOWN,
    TRANSFER_MESSAGE, VOICEMAIL_PROMPT,
};
use crate::db_types::{AttemptStatus, CallState, Client};
use crate::telnyx_types::TelnyxAction;

use sqlx::types::time::OffsetDateTime;

/// Greeting for an answered inbound call.  A recognized caller is addressed
/// by name; an unknown number gets the generic identification prompt.  Both
/// end in the same one-digit menu.
pub fn build_greeting(client: Option<&Client>) -> String {
    match client {
        Some(client) => format!(
            "{GREETING_BASE}Hi {}, it's great to hear from you! {MENU_KNOWN}",
            client.name
        ),
        None => format!("{GREETING_BASE}{MENU_UNKNOWN}"),
    }
}

pub fn greeting_gather(greeting: String) -> TelnyxAction {
    TelnyxAction::GatherUsingSpeak {
        text: greeting,
        min_digits: 1,
        max_digits: 1,
        timeout_millis: GATHER_TIMEOUT_MILLIS,
    }
}

/// Actions to run when a gather completes.  `1` hands off to a human, `2`
/// starts voicemail recording, and anything else (timeouts included) falls
/// back to the human transfer as the safe default.
pub fn gather_plan(digits: Option<&str>, forward_number: Option<&str>) -> Vec<TelnyxAction> {
    let transfer_to = |message: &str| {
        let mut plan = vec![TelnyxAction::Speak {
            text: message.to_string(),
        }];
        if let Some(to) = forward_number {
            plan.push(TelnyxAction::Transfer { to: to.to_string() });
        }
        plan
    };

    match digits {
        Some("1") => transfer_to(TRANSFER_MESSAGE),
        Some("2") => vec![
            TelnyxAction::Speak {
                text: VOICEMAIL_PROMPT.to_string(),
            },
            TelnyxAction::RecordStart,
        ],
        _ => transfer_to(FALLBACK_MESSAGE),
    }
}

/// Non-negative call duration in seconds: measured from `answered_at` when
/// the call was answered, else from row creation.
pub fn call_duration_secs(
    created_at: OffsetDateTime,
    answered_at: Option<OffsetDateTime>,
    ended_at: OffsetDateTime,
) -> i64 {
    let start = answered_at.unwrap_or(created_at);
    (ended_at - start).whole_seconds().max(0)
}

/// Attempt outcome recorded at hangup.  A call that never progressed past
/// `initiated`/`ringing` is classified by its hangup cause; anything that
/// was answered counts as a completed contact.
pub fn attempt_status(state_before_hangup: CallState, hangup_cause: Option<&str>) -> AttemptStatus {
    if !matches!(
        state_before_hangup,
        CallState::Initiated | CallState::Ringing
    ) {
        return AttemptStatus::Completed;
    }

    match hangup_cause {
        Some(cause) if cause.eq_ignore_ascii_case("no_answer") => AttemptStatus::NoAnswer,
        Some(cause) if cause.eq_ignore_ascii_case("user_busy") => AttemptStatus::Busy,
        _ => AttemptStatus::Failed,
    }
}

/// Terminal call state recorded at hangup, aligned with the attempt outcome
/// so an unanswered call ends as `busy`/`no_answer`/`failed` rather than
/// `completed`.
pub fn terminal_call_state(status: AttemptStatus) -> CallState {
    match status {
        AttemptStatus::Completed => CallState::Completed,
        AttemptStatus::Busy => CallState::Busy,
        AttemptStatus::NoAnswer => CallState::NoAnswer,
        AttemptStatus::Failed => CallState::Failed,
    }
}
