pub mod call_flow;
pub mod config;
pub mod db_types;
pub mod error;
pub mod handlers;
pub mod scheduler;
pub mod store;
pub mod telnyx;
pub mod telnyx_types;
pub mod types;

pub mod consts {
    pub const GREETING_BASE: &str = "Hello! You've reached Sally with Dopa Buzz. ";
    pub const MENU_KNOWN: &str =
        "How can I help you today? Press 1 to speak with our team, or press 2 to leave a message.";
    pub const MENU_UNKNOWN: &str = "I don't recognize this number. Press 1 to speak with our \
         team about our services, or press 2 to leave a message.";
    pub const TRANSFER_MESSAGE: &str = "One moment please, transferring you now.";
    pub const VOICEMAIL_PROMPT: &str =
        "Please leave your message after the beep, and we'll get back to you shortly.";
    pub const FALLBACK_MESSAGE: &str = "I didn't catch that. Transferring you to our team now.";
    pub const VOICEMAIL_SUMMARY: &str = "voicemail detected";

    pub const SPEAK_VOICE: &str = "female";
    pub const SPEAK_LANGUAGE: &str = "en-US";
    pub const GATHER_TIMEOUT_MILLIS: u32 = 10_000;

    pub const MAX_DIAL_ATTEMPTS: i32 = 3;
    pub const ATTEMPT_WINDOW_HOURS: i64 = 24;
    pub const FOLLOW_UP_SHORT_DAYS: i64 = 3;
    pub const FOLLOW_UP_LONG_DAYS: i64 = 7;
    pub const FOLLOW_UP_BATCH_LIMIT: i64 = 10;
    pub const DIAL_THROTTLE_MILLIS: u64 = 2_000;
}
