//! Ops Hub vote server.
//!
//! Hosts the vote aggregator behind a small HTTP API for the site frontend:
//! - `GET  /api/health`
//! - `GET  /api/session`
//! - `GET  /api/items?sort=newest|votes`
//! - `GET  /api/items/:item_id`
//! - `POST /api/items/:item_id/vote`
//! - `GET  /api/items/:item_id/stream` (WebSocket)
//! - `GET  /api/votes`
//! - `GET  /api/votes/stream` (WebSocket)

pub mod api;
pub mod config;
pub mod seed;
pub mod throttle;

use std::sync::Arc;

use opshub_protocol::{AdminAllowlist, AdminPolicy};
use opshub_store::MemoryStore;
use opshub_votes::VoteAggregator;
use tokio::sync::Mutex;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::throttle::VoteThrottle;

/// Build the shared state from configuration.
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let store = Arc::new(MemoryStore::new(config.store.clone()));
    let seeded = seed::seed_items(store.as_ref(), &config.votes.items_root, &config.seed).await?;
    if seeded > 0 {
        tracing::info!(count = seeded, root = %config.votes.items_root, "Seeded initial items");
    }

    let policy = AdminAllowlist::new(&config.admin.emails);
    if policy.is_empty() {
        tracing::warn!("No admin e-mails configured; authoring screens are disabled");
    } else {
        tracing::info!(admins = policy.len(), "Admin allowlist loaded");
    }
    let policy: Arc<dyn AdminPolicy> = Arc::new(policy);

    Ok(AppState {
        aggregator: Arc::new(VoteAggregator::new(store, config.votes.clone())),
        policy,
        throttle: Arc::new(Mutex::new(VoteThrottle::new(
            config.throttle.burst,
            config.throttle.refill_per_sec,
        ))),
    })
}

/// Serve the API until the listener fails.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    tracing::info!(addr = %config.server.listen, "Vote API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
