use sally_rs::config::Config;
use sally_rs::db_types::Client;
use sally_rs::store::MemoryStore;
use sally_rs::telnyx::TelnyxClient;
use sally_rs::types::AppState;

use std::sync::Arc;
use uuid::Uuid;

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        telnyx_api_key: "test-key".to_string(),
        // Unroutable: provider calls are fire-and-forget and expected to
        // fail fast in tests.
        telnyx_api_base: "http://127.0.0.1:9".to_string(),
        telnyx_phone_number: "+15550001111".to_string(),
        telnyx_connection_id: "conn-1".to_string(),
        telnyx_public_key: None,
        forward_phone_number: Some("+15557770000".to_string()),
        public_webhook_url: None,
        knowledge_query_url: None,
        follow_up_interval_secs: None,
    }
}

pub fn test_state() -> (Arc<AppState>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = test_config();
    let http_client = reqwest::Client::new();
    let telnyx = TelnyxClient::new(
        http_client.clone(),
        config.telnyx_api_base.clone(),
        config.telnyx_api_key.clone(),
    );
    let app_state = Arc::new(AppState {
        config,
        store: store.clone(),
        telnyx,
        http_client,
    });
    (app_state, store)
}

pub fn paid_client(name: &str, phone: &str) -> Client {
    Client {
        id: Uuid::new_v4(),
        name: name.to_string(),
        phone_number: Some(phone.to_string()),
        email: None,
        payment_status: "paid".to_string(),
        do_not_call: false,
        requires_follow_up: false,
        next_follow_up: None,
        last_call_at: None,
        last_task_update: None,
        last_reminder_at: None,
    }
}
