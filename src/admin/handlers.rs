use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::backend::InvokeOptions;
use crate::config::ProxySettings;
use crate::proxy::{ProxyError, StatsSnapshot};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub proxies: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProxySummary {
    pub name: String,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProxyDetail {
    pub name: String,
    pub settings: ProxySettings,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub proxy: String,
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: InvokeOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub output: String,
}

/// Error body shared by every failing admin route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<f64>,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("no proxy named '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, kind, retry_after) = match &self {
            AdminError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            AdminError::Proxy(e) => {
                let status = match e {
                    ProxyError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                    ProxyError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                    ProxyError::Backend(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.kind(), e.retry_after())
            }
        };

        let body = ErrorBody {
            error: kind.to_string(),
            message: self.to_string(),
            retry_after_secs: retry_after.map(|d| d.as_secs_f64()),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = retry_after {
            let secs = retry_after.as_secs_f64().ceil() as u64;
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        proxies: state.registry.len(),
    })
}

pub async fn list_proxies(State(state): State<AdminState>) -> Json<Vec<ProxySummary>> {
    let proxies = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(name, stats)| ProxySummary { name, stats })
        .collect();
    Json(proxies)
}

pub async fn get_proxy(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ProxyDetail>, AdminError> {
    let proxy = state.registry.get(&name).ok_or(AdminError::NotFound(name))?;
    Ok(Json(ProxyDetail {
        name: proxy.name().to_string(),
        settings: proxy.settings().clone(),
        stats: proxy.stats(),
    }))
}

pub async fn clear_cache(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ActionResult>, AdminError> {
    let proxy = state.registry.get(&name).ok_or_else(|| AdminError::NotFound(name.clone()))?;
    proxy.clear_cache();
    Ok(Json(ActionResult {
        proxy: name,
        action: "cache_cleared".to_string(),
    }))
}

pub async fn reset_breaker(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ActionResult>, AdminError> {
    let proxy = state.registry.get(&name).ok_or_else(|| AdminError::NotFound(name.clone()))?;
    proxy.reset_breaker();
    Ok(Json(ActionResult {
        proxy: name,
        action: "breaker_reset".to_string(),
    }))
}

pub async fn probe(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(request): Json<ProbeRequest>,
) -> Result<Json<ProbeResponse>, AdminError> {
    let proxy = state.registry.get(&name).ok_or(AdminError::NotFound(name))?;
    let output = proxy.invoke(&request.prompt, &request.options).await?;
    Ok(Json(ProbeResponse { output }))
}
