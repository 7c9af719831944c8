use crate::config::Config;
use crate::store::CallStore;
use crate::telnyx::TelnyxClient;

use std::sync::Arc;

/// Shared per-request context.  Everything a handler touches comes through
/// here explicitly; there are no process-wide singletons.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CallStore>,
    pub telnyx: TelnyxClient,
    pub http_client: reqwest::Client,
}
