use serde::{Deserialize, Serialize};
use sqlx::types::time::OffsetDateTime;
use uuid::Uuid;

/// Call session state.  Updates are last-write-wins except that a terminal
/// state is never overwritten; ordering among non-terminal states is not
/// otherwise guarded, so an out-of-order `ringing` can still land on top of
/// `answered` (known gap, see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "call_state", rename_all = "snake_case")]
pub enum CallState {
    Initiated,
    Ringing,
    Answered,
    Completed,
    Hangup,
    NoAnswer,
    Failed,
    Busy,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Completed
                | CallState::Hangup
                | CallState::NoAnswer
                | CallState::Failed
                | CallState::Busy
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "call_direction", rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
pub enum AttemptStatus {
    Completed,
    Busy,
    NoAnswer,
    Failed,
}

/// The slice of the CRM's client row the call core reads and writes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub payment_status: String,
    pub do_not_call: bool,
    pub requires_follow_up: bool,
    pub next_follow_up: Option<OffsetDateTime>,
    pub last_call_at: Option<OffsetDateTime>,
    pub last_task_update: Option<OffsetDateTime>,
    pub last_reminder_at: Option<OffsetDateTime>,
}

/// One telephony session, keyed by the provider's call control id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Call {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub call_control_id: String,
    pub call_session_id: Option<String>,
    pub direction: CallDirection,
    pub from_number: String,
    pub to_number: String,
    pub call_state: CallState,
    pub answered_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub duration_secs: Option<i64>,
    pub summary: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewCall {
    pub client_id: Option<Uuid>,
    pub call_control_id: String,
    pub call_session_id: Option<String>,
    pub direction: CallDirection,
    pub from_number: String,
    pub to_number: String,
    pub call_state: CallState,
    pub answered_at: Option<OffsetDateTime>,
}

/// One logged outcome of a contact attempt toward a client, used for retry
/// accounting within a rolling lookback window.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CallAttempt {
    pub id: Uuid,
    pub client_id: Uuid,
    pub call_id: Option<Uuid>,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub note: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub client_id: Uuid,
    pub call_id: Option<Uuid>,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub note: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CallRecording {
    pub id: Uuid,
    pub call_id: Uuid,
    pub recording_url: String,
    pub channels: Option<String>,
    pub saved_at: OffsetDateTime,
}
