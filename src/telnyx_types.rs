use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Provider call-event envelope.  The raw `event_type` string is kept for
/// logging and acknowledgement; `kind()` maps it onto the closed set of
/// events we dispatch on.
#[derive(Debug)]
pub struct WebhookEvent {
    pub event_type: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CallInitiated,
    CallRinging,
    CallAnswered,
    GatherEnded,
    MachineDetectionEnded,
    RecordingSaved,
    CallHangup,
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventPayload {
    pub call_control_id: Option<String>,
    pub call_session_id: Option<String>,
    pub direction: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub digits: Option<String>,
    pub hangup_cause: Option<String>,
    pub result: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub recording_urls: Option<RecordingUrls>,
    pub public_recording_urls: Option<RecordingUrls>,
    pub channels: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordingUrls {
    pub mp3: Option<String>,
    pub wav: Option<String>,
}

impl WebhookEvent {
    /// Pull the envelope out of a parsed body.  Provider variants differ in
    /// nesting, so we try `data.payload`, then `payload`, then `data`, then
    /// the body itself, and take `event_type` from `data` before the top
    /// level.  Unrecognized payload shapes degrade to an empty payload
    /// rather than a rejection.
    pub fn from_value(body: &Value) -> Option<Self> {
        let event_type = body
            .pointer("/data/event_type")
            .or_else(|| body.get("event_type"))
            .and_then(Value::as_str)?
            .to_string();
        let payload_value = body
            .pointer("/data/payload")
            .or_else(|| body.get("payload"))
            .or_else(|| body.get("data"))
            .unwrap_or(body);
        let payload = serde_json::from_value(payload_value.clone()).unwrap_or_default();

        Some(Self {
            event_type,
            payload,
        })
    }

    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            "call.initiated" => EventKind::CallInitiated,
            "call.ringing" => EventKind::CallRinging,
            "call.answered" => EventKind::CallAnswered,
            "call.gather.ended" => EventKind::GatherEnded,
            "call.machine.detection.ended" => EventKind::MachineDetectionEnded,
            "call.recording.saved" => EventKind::RecordingSaved,
            "call.hangup" => EventKind::CallHangup,
            _ => EventKind::Unknown,
        }
    }
}

impl EventPayload {
    /// The provider reports `incoming`/`outgoing` on events but our records
    /// use `inbound`/`outbound`; accept both spellings.
    pub fn is_inbound(&self) -> bool {
        matches!(self.direction.as_deref(), Some("incoming") | Some("inbound"))
    }

    pub fn is_machine(&self) -> bool {
        self.result.as_deref() == Some("machine")
    }

    /// Preferred recording link: public mp3, then private mp3, then wav.
    pub fn recording_url(&self) -> Option<&str> {
        self.public_recording_urls
            .as_ref()
            .and_then(|u| u.mp3.as_deref())
            .or_else(|| self.recording_urls.as_ref().and_then(|u| u.mp3.as_deref()))
            .or_else(|| self.recording_urls.as_ref().and_then(|u| u.wav.as_deref()))
    }
}

pub fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).ok()
}

/// One outbound provider command against an in-flight call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnyxAction {
    Answer,
    Speak {
        text: String,
    },
    GatherUsingSpeak {
        text: String,
        min_digits: u8,
        max_digits: u8,
        timeout_millis: u32,
    },
    Transfer {
        to: String,
    },
    RecordStart,
}

#[derive(Debug, Serialize)]
pub struct DialRequest {
    pub connection_id: String,
    pub to: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub record: &'static str,
    pub record_channels: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct DialResponse {
    pub data: DialData,
}

#[derive(Debug, Deserialize)]
pub struct DialData {
    pub call_control_id: String,
    pub call_session_id: Option<String>,
}
