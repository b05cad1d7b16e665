use std::sync::Arc;

use jot_server::db::Store;
use jot_server::{app_router, AppConfig, AppState};

/// Load .env for local development.
#[cfg(debug_assertions)]
fn load_dev_dotenv() {
    let server_env = std::path::Path::new(".env");
    if server_env.exists() {
        let _ = dotenvy::from_path(server_env);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(debug_assertions)]
    load_dev_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jot_server=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting jot-server with config: {:?}", config);

    let store = Store::open(&config.database_url)?;
    let bind_addr = config.bind_addr();
    let state = AppState::new(config, store);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("jot-server listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
