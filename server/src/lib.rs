//! HTTP surface of the aidesk workspace: the chat entry (buffered and SSE),
//! history, files, direct generators, browser control, and the auxiliary
//! team/requirement routes. Everything funnels into `aidesk-core`; this crate
//! only owns transport concerns.

mod auth;
pub mod error;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use aidesk_core::ChatService;
use aidesk_core::config::Config;
use aidesk_core::store::Store;
use axum::Router;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use auth::PrincipalResolver;
pub use auth::TokenResolver;
pub use state::AppState;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    routes::router(state).layer(cors)
}

/// Boots the full server: store, bootstrap credentials, background
/// maintenance, and the listener. Runs until ctrl-c.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = Store::open(&config.db_path).await?;
    if let Some(token) = store.bootstrap().await? {
        info!("first run: created team `default`; api token: {token}");
    }

    let bind_addr = config.bind_addr.clone();
    let chat = Arc::new(ChatService::new(config, store.clone())?);
    let state = AppState {
        chat: Arc::clone(&chat),
        resolver: Arc::new(TokenResolver::new(store)),
    };

    let maintenance = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                ticker.tick().await;
                chat.maintenance_tick().await;
            }
        })
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on {bind_addr}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await?;

    maintenance.abort();
    Ok(())
}
