//! Admin API over real sockets.

use std::sync::Arc;

use arc_swap::ArcSwap;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use inference_guard::admin::{serve_admin, AdminState};
use inference_guard::backend::BackendError;
use inference_guard::config::{parse_config, GuardConfig, ProxySettings};
use inference_guard::proxy::ProxyRegistry;

mod common;
use common::ScriptedBackend;

const CONFIG: &str = r#"
[admin]
api_key = "test-key"

[[backends]]
name = "local"

[backends.access]
blocked_terms = ["forbidden"]
"#;

struct Harness {
    base: String,
    client: reqwest::Client,
    registry: Arc<ProxyRegistry>,
    config: Arc<ArcSwap<GuardConfig>>,
}

impl Harness {
    async fn start() -> Self {
        let config = parse_config(CONFIG).unwrap();
        let registry = Arc::new(ProxyRegistry::new());
        registry.sync_profiles(&config).unwrap();
        let config = Arc::new(ArcSwap::from_pointee(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AdminState::new(registry.clone(), config.clone());
        tokio::spawn(serve_admin(listener, state, std::future::pending()));

        Self {
            base: format!("http://{addr}/admin"),
            client: reqwest::Client::new(),
            registry,
            config,
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base, path))
            .bearer_auth("test-key")
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base, path))
            .bearer_auth("test-key")
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let h = Harness::start().await;

    let res = h.client.get(format!("{}/status", h.base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = h
        .client
        .get(format!("{}/status", h.base))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(h.get("/status").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_key_rotation_applies_on_reload() {
    let h = Harness::start().await;

    let mut rotated = GuardConfig::clone(&h.config.load());
    rotated.admin.api_key = "rotated".into();
    h.config.store(Arc::new(rotated));

    assert_eq!(h.get("/status").await.status(), StatusCode::UNAUTHORIZED);
    let res = h
        .client
        .get(format!("{}/status", h.base))
        .bearer_auth("rotated")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_and_listing() {
    let h = Harness::start().await;
    h.registry
        .get_or_create("manual", Arc::new(ScriptedBackend::new()), ProxySettings::default());

    let status: Value = h.get("/status").await.json().await.unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["proxies"], 2);

    let proxies: Value = h.get("/proxies").await.json().await.unwrap();
    let names: Vec<&str> = proxies
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["local", "manual"]);
    assert_eq!(proxies[0]["stats"]["breaker_state"], "closed");
}

#[tokio::test]
async fn test_unknown_proxy_is_not_found() {
    let h = Harness::start().await;

    let res = h.get("/proxies/missing").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = h.post("/proxies/missing/cache/clear", json!({})).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_probe_populates_cache_and_clear_empties_it() {
    let h = Harness::start().await;

    let res = h.post("/proxies/local/probe", json!({ "prompt": "hi" })).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["output"], "echo: hi");

    h.post("/proxies/local/probe", json!({ "prompt": "hi" })).await;
    let detail: Value = h.get("/proxies/local").await.json().await.unwrap();
    assert_eq!(detail["stats"]["cache_hits"], 1);
    assert_eq!(detail["stats"]["cache_entries"], 1);
    assert_eq!(detail["settings"]["max_calls_per_window"], 60);

    let res = h.post("/proxies/local/cache/clear", json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);
    let detail: Value = h.get("/proxies/local").await.json().await.unwrap();
    assert_eq!(detail["stats"]["cache_entries"], 0);
}

#[tokio::test]
async fn test_probe_maps_access_denied_to_forbidden() {
    let h = Harness::start().await;

    let res = h
        .post("/proxies/local/probe", json!({ "prompt": "something Forbidden" }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "access_denied");
}

#[tokio::test]
async fn test_probe_maps_breaker_and_backend_failures() {
    let h = Harness::start().await;
    let backend = Arc::new(ScriptedBackend::new());
    backend.push_err(BackendError::Status {
        status: 500,
        body: "boom".into(),
    });
    h.registry.get_or_create(
        "flaky",
        backend.clone(),
        ProxySettings {
            failure_threshold: 1,
            cache_enabled: false,
            ..ProxySettings::default()
        },
    );

    let res = h.post("/proxies/flaky/probe", json!({ "prompt": "q" })).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let res = h.post("/proxies/flaky/probe", json!({ "prompt": "q" })).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "circuit_open");

    let res = h.post("/proxies/flaky/breaker/reset", json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = h.post("/proxies/flaky/probe", json!({ "prompt": "q" })).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(backend.invoke_calls(), 2);
}

#[tokio::test]
async fn test_probe_maps_rate_limit_to_too_many_requests() {
    let h = Harness::start().await;
    h.registry.get_or_create(
        "tight",
        Arc::new(ScriptedBackend::new()),
        ProxySettings {
            max_calls_per_window: 1,
            ..ProxySettings::default()
        },
    );

    let res = h
        .post("/proxies/tight/probe", json!({ "prompt": "q", "options": { "model": "m" } }))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = h
        .post("/proxies/tight/probe", json!({ "prompt": "q", "options": { "model": "m" } }))
        .await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
}
