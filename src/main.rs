use sally_rs::config::Config;
use sally_rs::handlers;
use sally_rs::scheduler;
use sally_rs::store::PgStore;
use sally_rs::telnyx::TelnyxClient;
use sally_rs::types::AppState;

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("sally_rs", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = Config::from_env().expect("configuration error");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let http_client = reqwest::Client::new();
    let telnyx = TelnyxClient::new(
        http_client.clone(),
        config.telnyx_api_base.clone(),
        config.telnyx_api_key.clone(),
    );

    let bind_addr = config.bind_addr;
    let app_state = Arc::new(AppState {
        config,
        store: Arc::new(PgStore::new(db_pool)),
        telnyx,
        http_client,
    });

    if let Some(secs) = app_state.config.follow_up_interval_secs {
        tokio::spawn(scheduler::run_interval(
            app_state.clone(),
            std::time::Duration::from_secs(secs),
        ));
    }

    let app = handlers::router(app_state);

    axum::Server::bind(&bind_addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
