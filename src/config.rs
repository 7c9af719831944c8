use crate::error::AppError;
use std::env;
use std::net::SocketAddr;
use tracing::error;

/// Service configuration resolved once at startup.  A missing credential
/// aborts startup here instead of surfacing as a 500 per request.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub telnyx_api_key: String,
    pub telnyx_api_base: String,
    pub telnyx_phone_number: String,
    pub telnyx_connection_id: String,
    /// When set, webhook requests without a signature header are logged.
    pub telnyx_public_key: Option<String>,
    /// Human destination for "press 1" transfers.
    pub forward_phone_number: Option<String>,
    /// Public URL the provider should deliver call events to, passed along
    /// on outbound dial requests.
    pub public_webhook_url: Option<String>,
    /// Knowledge-base query endpoint used to enrich follow-up calls.
    pub knowledge_query_url: Option<String>,
    /// When set, the follow-up batch also runs on this in-process interval.
    pub follow_up_interval_secs: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()
            .map_err(|e| {
                error!(error=%e, "BIND_ADDR is not a valid socket address");
                AppError("invalid BIND_ADDR")
            })?;

        Ok(Self {
            bind_addr,
            database_url: required("DATABASE_URL")?,
            telnyx_api_key: required("TELNYX_API_KEY")?,
            telnyx_api_base: env::var("TELNYX_API_BASE")
                .unwrap_or_else(|_| "https://api.telnyx.com/v2".to_string()),
            telnyx_phone_number: required("TELNYX_PHONE_NUMBER")?,
            telnyx_connection_id: required("TELNYX_CONNECTION_ID")?,
            telnyx_public_key: optional("TELNYX_PUBLIC_KEY"),
            forward_phone_number: optional("FORWARD_PHONE_NUMBER"),
            public_webhook_url: optional("PUBLIC_WEBHOOK_URL"),
            knowledge_query_url: optional("KNOWLEDGE_QUERY_URL"),
            follow_up_interval_secs: optional("FOLLOW_UP_INTERVAL_SECS")
                .and_then(|v| v.parse().ok()),
        })
    }
}

fn required(name: &'static str) -> Result<String, AppError> {
    env::var(name).map_err(|_| {
        error!(var = name, "required environment variable not set");
        AppError("missing configuration")
    })
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
