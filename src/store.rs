use crate::db_types::{
    Call, CallAttempt, CallRecording, CallState, Client, NewAttempt, NewCall,
};
use crate::error::AppError;

use async_trait::async_trait;
use sqlx::types::time::OffsetDateTime;
use sqlx::{Pool, Postgres};
use std::sync::Mutex;
use tracing::error;
use uuid::Uuid;

/// Call Record Store seam.  All call-core state lives behind this trait so
/// handlers take it as an explicit dependency; the Postgres implementation
/// backs the service, the in-memory one backs tests.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>, AppError>;
    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, AppError>;
    async fn clients_due_for_follow_up(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Client>, AppError>;
    async fn set_next_follow_up(&self, client_id: Uuid, at: OffsetDateTime)
        -> Result<(), AppError>;
    async fn touch_last_call(&self, client_id: Uuid, at: OffsetDateTime) -> Result<(), AppError>;
    async fn set_requires_follow_up(&self, client_id: Uuid, flag: bool) -> Result<(), AppError>;
    async fn touch_task_update(&self, client_id: Uuid, at: OffsetDateTime)
        -> Result<(), AppError>;
    async fn touch_reminder(&self, client_id: Uuid, at: OffsetDateTime) -> Result<(), AppError>;

    /// Insert the call row if its call control id has not been seen, and
    /// return the row either way.  Duplicate `call.initiated` deliveries must
    /// end with exactly one row.
    async fn ensure_call(&self, call: NewCall) -> Result<Call, AppError>;
    async fn get_call(&self, call_control_id: &str) -> Result<Option<Call>, AppError>;
    /// Mark the call answered, keeping the earliest answered timestamp and
    /// attaching the client when one was resolved.
    async fn mark_answered(
        &self,
        call_control_id: &str,
        client_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<(), AppError>;
    /// Last-write-wins state overwrite; terminal states are never replaced.
    async fn update_call_state(
        &self,
        call_control_id: &str,
        state: CallState,
    ) -> Result<(), AppError>;
    async fn set_call_summary(&self, call_control_id: &str, summary: &str)
        -> Result<(), AppError>;
    /// Terminal update: state, end timestamp, and computed duration.  A call
    /// already in a terminal state is left untouched.
    async fn finish_call(
        &self,
        call_control_id: &str,
        state: CallState,
        ended_at: OffsetDateTime,
        duration_secs: i64,
    ) -> Result<(), AppError>;

    /// At most one recording row per call; repeated saves update in place.
    async fn upsert_recording(
        &self,
        call_id: Uuid,
        url: &str,
        channels: Option<&str>,
    ) -> Result<(), AppError>;
    /// Highest attempt number recorded for the client since `since`, or 0.
    async fn latest_attempt_number(
        &self,
        client_id: Uuid,
        since: OffsetDateTime,
    ) -> Result<i32, AppError>;
    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<(), AppError>;
}

const TERMINAL_GUARD: &str =
    "call_state not in ('completed', 'hangup', 'no_answer', 'failed', 'busy')";

pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error, what: &'static str) -> AppError {
    error!(error=%e, what, "database operation failed");
    AppError("db error")
}

#[async_trait]
impl CallStore for PgStore {
    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>, AppError> {
        sqlx::query_as::<_, Client>("select * from clients where phone_number = $1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "find client by phone"))
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, AppError> {
        sqlx::query_as::<_, Client>("select * from clients where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "get client"))
    }

    async fn clients_due_for_follow_up(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Client>, AppError> {
        sqlx::query_as::<_, Client>(
            "select * from clients \
             where payment_status = 'paid' \
               and phone_number is not null \
               and next_follow_up <= $1 \
             order by next_follow_up asc \
             limit $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(e, "query due clients"))
    }

    async fn set_next_follow_up(
        &self,
        client_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), AppError> {
        sqlx::query("update clients set next_follow_up = $2 where id = $1")
            .bind(client_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "set next follow-up"))?;
        Ok(())
    }

    async fn touch_last_call(&self, client_id: Uuid, at: OffsetDateTime) -> Result<(), AppError> {
        sqlx::query("update clients set last_call_at = $2 where id = $1")
            .bind(client_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "touch last call"))?;
        Ok(())
    }

    async fn set_requires_follow_up(&self, client_id: Uuid, flag: bool) -> Result<(), AppError> {
        sqlx::query("update clients set requires_follow_up = $2 where id = $1")
            .bind(client_id)
            .bind(flag)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "set requires follow-up"))?;
        Ok(())
    }

    async fn touch_task_update(
        &self,
        client_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), AppError> {
        sqlx::query("update clients set last_task_update = $2 where id = $1")
            .bind(client_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "touch task update"))?;
        Ok(())
    }

    async fn touch_reminder(&self, client_id: Uuid, at: OffsetDateTime) -> Result<(), AppError> {
        sqlx::query("update clients set last_reminder_at = $2 where id = $1")
            .bind(client_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "touch reminder"))?;
        Ok(())
    }

    async fn ensure_call(&self, call: NewCall) -> Result<Call, AppError> {
        let inserted = sqlx::query_as::<_, Call>(
            "insert into calls ( \
               client_id, call_control_id, call_session_id, direction, \
               from_number, to_number, call_state, answered_at \
             ) values ($1, $2, $3, $4, $5, $6, $7, $8) \
             on conflict (call_control_id) do nothing \
             returning *",
        )
        .bind(call.client_id)
        .bind(&call.call_control_id)
        .bind(&call.call_session_id)
        .bind(call.direction)
        .bind(&call.from_number)
        .bind(&call.to_number)
        .bind(call.call_state)
        .bind(call.answered_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(e, "insert call"))?;

        match inserted {
            Some(row) => Ok(row),
            // Lost the insert race or the row already existed.
            None => self
                .get_call(&call.call_control_id)
                .await?
                .ok_or(AppError("call row missing after upsert")),
        }
    }

    async fn get_call(&self, call_control_id: &str) -> Result<Option<Call>, AppError> {
        sqlx::query_as::<_, Call>("select * from calls where call_control_id = $1")
            .bind(call_control_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(e, "get call"))
    }

    async fn mark_answered(
        &self,
        call_control_id: &str,
        client_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<(), AppError> {
        let sql = format!(
            "update calls set call_state = 'answered', \
               answered_at = coalesce(answered_at, $2), \
               client_id = coalesce($3, client_id) \
             where call_control_id = $1 and {TERMINAL_GUARD}"
        );
        sqlx::query(&sql)
            .bind(call_control_id)
            .bind(at)
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "mark answered"))?;
        Ok(())
    }

    async fn update_call_state(
        &self,
        call_control_id: &str,
        state: CallState,
    ) -> Result<(), AppError> {
        let sql = format!(
            "update calls set call_state = $2 where call_control_id = $1 and {TERMINAL_GUARD}"
        );
        sqlx::query(&sql)
            .bind(call_control_id)
            .bind(state)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "update call state"))?;
        Ok(())
    }

    async fn set_call_summary(
        &self,
        call_control_id: &str,
        summary: &str,
    ) -> Result<(), AppError> {
        sqlx::query("update calls set summary = $2 where call_control_id = $1")
            .bind(call_control_id)
            .bind(summary)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "set call summary"))?;
        Ok(())
    }

    async fn finish_call(
        &self,
        call_control_id: &str,
        state: CallState,
        ended_at: OffsetDateTime,
        duration_secs: i64,
    ) -> Result<(), AppError> {
        let sql = format!(
            "update calls set call_state = $2, ended_at = $3, duration_secs = $4 \
             where call_control_id = $1 and {TERMINAL_GUARD}"
        );
        sqlx::query(&sql)
            .bind(call_control_id)
            .bind(state)
            .bind(ended_at)
            .bind(duration_secs)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(e, "finish call"))?;
        Ok(())
    }

    async fn upsert_recording(
        &self,
        call_id: Uuid,
        url: &str,
        channels: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "insert into call_recordings (call_id, recording_url, channels) \
             values ($1, $2, $3) \
             on conflict (call_id) do update set \
               recording_url = excluded.recording_url, \
               channels = excluded.channels, \
               saved_at = now()",
        )
        .bind(call_id)
        .bind(url)
        .bind(channels)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e, "upsert recording"))?;
        Ok(())
    }

    async fn latest_attempt_number(
        &self,
        client_id: Uuid,
        since: OffsetDateTime,
    ) -> Result<i32, AppError> {
        sqlx::query_scalar::<_, i32>(
            "select coalesce(max(attempt_number), 0) from call_attempts \
             where client_id = $1 and created_at >= $2",
        )
        .bind(client_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err(e, "latest attempt number"))
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<(), AppError> {
        sqlx::query(
            "insert into call_attempts (client_id, call_id, attempt_number, status, note) \
             values ($1, $2, $3, $4, $5)",
        )
        .bind(attempt.client_id)
        .bind(attempt.call_id)
        .bind(attempt.attempt_number)
        .bind(attempt.status)
        .bind(&attempt.note)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(e, "insert attempt"))?;
        Ok(())
    }
}

/// In-memory store mirroring the Postgres semantics, used by tests and local
/// experiments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    clients: Vec<Client>,
    calls: Vec<Call>,
    attempts: Vec<CallAttempt>,
    recordings: Vec<CallRecording>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&self, client: Client) {
        self.inner.lock().unwrap().clients.push(client);
    }

    /// Seed a fully-formed attempt row, timestamps included.
    pub fn seed_attempt(&self, attempt: CallAttempt) {
        self.inner.lock().unwrap().attempts.push(attempt);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn attempts(&self) -> Vec<CallAttempt> {
        self.inner.lock().unwrap().attempts.clone()
    }

    pub fn recordings(&self) -> Vec<CallRecording> {
        self.inner.lock().unwrap().recordings.clone()
    }

    pub fn client(&self, id: Uuid) -> Option<Client> {
        self.inner
            .lock()
            .unwrap()
            .clients
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .clients
            .iter()
            .find(|c| c.phone_number.as_deref() == Some(phone))
            .cloned())
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, AppError> {
        Ok(self.client(id))
    }

    async fn clients_due_for_follow_up(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Client>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<Client> = inner
            .clients
            .iter()
            .filter(|c| {
                c.payment_status == "paid"
                    && c.phone_number.is_some()
                    && c.next_follow_up.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| c.next_follow_up);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn set_next_follow_up(
        &self,
        client_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.clients.iter_mut().find(|c| c.id == client_id) {
            c.next_follow_up = Some(at);
        }
        Ok(())
    }

    async fn touch_last_call(&self, client_id: Uuid, at: OffsetDateTime) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.clients.iter_mut().find(|c| c.id == client_id) {
            c.last_call_at = Some(at);
        }
        Ok(())
    }

    async fn set_requires_follow_up(&self, client_id: Uuid, flag: bool) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.clients.iter_mut().find(|c| c.id == client_id) {
            c.requires_follow_up = flag;
        }
        Ok(())
    }

    async fn touch_task_update(
        &self,
        client_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.clients.iter_mut().find(|c| c.id == client_id) {
            c.last_task_update = Some(at);
        }
        Ok(())
    }

    async fn touch_reminder(&self, client_id: Uuid, at: OffsetDateTime) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.clients.iter_mut().find(|c| c.id == client_id) {
            c.last_reminder_at = Some(at);
        }
        Ok(())
    }

    async fn ensure_call(&self, call: NewCall) -> Result<Call, AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .calls
            .iter()
            .find(|c| c.call_control_id == call.call_control_id)
        {
            return Ok(existing.clone());
        }
        let row = Call {
            id: Uuid::new_v4(),
            client_id: call.client_id,
            call_control_id: call.call_control_id,
            call_session_id: call.call_session_id,
            direction: call.direction,
            from_number: call.from_number,
            to_number: call.to_number,
            call_state: call.call_state,
            answered_at: call.answered_at,
            ended_at: None,
            duration_secs: None,
            summary: None,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.calls.push(row.clone());
        Ok(row)
    }

    async fn get_call(&self, call_control_id: &str) -> Result<Option<Call>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .find(|c| c.call_control_id == call_control_id)
            .cloned())
    }

    async fn mark_answered(
        &self,
        call_control_id: &str,
        client_id: Option<Uuid>,
        at: OffsetDateTime,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner
            .calls
            .iter_mut()
            .find(|c| c.call_control_id == call_control_id && !c.call_state.is_terminal())
        {
            c.call_state = CallState::Answered;
            c.answered_at.get_or_insert(at);
            if client_id.is_some() {
                c.client_id = client_id;
            }
        }
        Ok(())
    }

    async fn update_call_state(
        &self,
        call_control_id: &str,
        state: CallState,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner
            .calls
            .iter_mut()
            .find(|c| c.call_control_id == call_control_id && !c.call_state.is_terminal())
        {
            c.call_state = state;
        }
        Ok(())
    }

    async fn set_call_summary(
        &self,
        call_control_id: &str,
        summary: &str,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner
            .calls
            .iter_mut()
            .find(|c| c.call_control_id == call_control_id)
        {
            c.summary = Some(summary.to_string());
        }
        Ok(())
    }

    async fn finish_call(
        &self,
        call_control_id: &str,
        state: CallState,
        ended_at: OffsetDateTime,
        duration_secs: i64,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner
            .calls
            .iter_mut()
            .find(|c| c.call_control_id == call_control_id && !c.call_state.is_terminal())
        {
            c.call_state = state;
            c.ended_at = Some(ended_at);
            c.duration_secs = Some(duration_secs);
        }
        Ok(())
    }

    async fn upsert_recording(
        &self,
        call_id: Uuid,
        url: &str,
        channels: Option<&str>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(r) = inner.recordings.iter_mut().find(|r| r.call_id == call_id) {
            r.recording_url = url.to_string();
            r.channels = channels.map(str::to_string);
            r.saved_at = OffsetDateTime::now_utc();
        } else {
            inner.recordings.push(CallRecording {
                id: Uuid::new_v4(),
                call_id,
                recording_url: url.to_string(),
                channels: channels.map(str::to_string),
                saved_at: OffsetDateTime::now_utc(),
            });
        }
        Ok(())
    }

    async fn latest_attempt_number(
        &self,
        client_id: Uuid,
        since: OffsetDateTime,
    ) -> Result<i32, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|a| a.client_id == client_id && a.created_at >= since)
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0))
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<(), AppError> {
        self.inner.lock().unwrap().attempts.push(CallAttempt {
            id: Uuid::new_v4(),
            client_id: attempt.client_id,
            call_id: attempt.call_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            note: attempt.note,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }
}
