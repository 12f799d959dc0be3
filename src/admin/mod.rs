//! Admin API over a [`ProxyRegistry`].
//!
//! # Routes
//! ```text
//! GET  /admin/status                       version, uptime, proxy count
//! GET  /admin/proxies                      stats of every proxy
//! GET  /admin/proxies/{name}               settings and stats of one proxy
//! POST /admin/proxies/{name}/cache/clear
//! POST /admin/proxies/{name}/breaker/reset
//! POST /admin/proxies/{name}/probe         run one invoke through the proxy
//! ```
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`. The key is
//! read from the live config on each request, so a reload rotates it.

pub mod auth;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::GuardConfig;
use crate::proxy::ProxyRegistry;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<ProxyRegistry>,
    pub config: Arc<ArcSwap<GuardConfig>>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(registry: Arc<ProxyRegistry>, config: Arc<ArcSwap<GuardConfig>>) -> Self {
        Self {
            registry,
            config,
            started_at: Instant::now(),
        }
    }
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/proxies", get(list_proxies))
        .route("/admin/proxies/{name}", get(get_proxy))
        .route("/admin/proxies/{name}/cache/clear", post(clear_cache))
        .route("/admin/proxies/{name}/breaker/reset", post(reset_breaker))
        .route("/admin/proxies/{name}/probe", post(probe))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `listener` until `shutdown` resolves.
pub async fn serve_admin<F>(
    listener: TcpListener,
    state: AdminState,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, admin_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
