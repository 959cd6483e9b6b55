//! Admin HTTP API.
//!
//! # Routes
//! - `GET /health` (no auth)
//! - `GET /transactions/{operation_id}`
//! - `GET /circuit-breakers`
//! - `POST /jobs` (enqueue a raw job message)
//!
//! Every route except `/health` requires `Authorization: Bearer <api_key>`
//! when an API key is configured.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::blockchain::ChainRegistry;
use crate::config::schema::AdminConfig;
use crate::queue::Delivery;
use crate::repository::TransactionRepository;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub repository: Arc<dyn TransactionRepository>,
    pub registry: Arc<ChainRegistry>,
    pub jobs: mpsc::Sender<Delivery>,
    pub api_key: Option<Arc<str>>,
}

impl AdminState {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        registry: Arc<ChainRegistry>,
        jobs: mpsc::Sender<Delivery>,
        config: &AdminConfig,
    ) -> Self {
        Self {
            repository,
            registry,
            jobs,
            api_key: config
                .api_key
                .as_deref()
                .filter(|key| !key.is_empty())
                .map(Arc::from),
        }
    }
}

pub fn admin_router(state: AdminState, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/transactions/{operation_id}", get(get_transaction))
        .route("/circuit-breakers", get(get_circuit_breakers))
        .route("/jobs", post(submit_job))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(get_health))
        .merge(protected)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
