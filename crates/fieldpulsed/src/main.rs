// SPDX-License-Identifier: Apache-2.0
//! HTTP control surface (spec.md §6): a thin axum router over one shared
//! [`RunController`]. All the hard logic lives in `fieldpulse-runtime` and
//! below; this binary only does request parsing, validation-error mapping,
//! and process wiring (env config, tracing, graceful shutdown).

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fieldpulse_config::{AppConfig, ConfigService, FsConfigStore, OperatorPrefs};
use fieldpulse_geo::LocationCatalog;
use fieldpulse_producer::ProducerLimits;
use fieldpulse_runtime::{RunController, RunRequest, StartError};
use fieldpulse_scheduler::RepairConfig;
use fieldpulse_store::{InMemoryStore, Store};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct AppState {
    controller: Mutex<RunController>,
    prefs: Option<ConfigService<FsConfigStore>>,
}

/// `{ ok: false, error: string }`, the uniform failure shape of §6.
#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

impl ErrorBody {
    fn response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
        (
            status,
            Json(ErrorBody {
                ok: false,
                error: error.into(),
            }),
        )
            .into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().context("loading environment configuration")?;

    let catalog = Arc::new(
        LocationCatalog::load_from_path(&config.catalog_path)
            .with_context(|| format!("loading catalog from {}", config.catalog_path.display()))?,
    );
    info!(catalog_size = catalog.len(), "location catalog loaded");

    // The real document-store driver is an external collaborator (spec.md
    // §1); the standalone binary runs against the in-memory adapter so the
    // control surface is exercisable without a live database.
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let limits = ProducerLimits {
        max_rate: config.max_rate,
        max_batch: config.max_batch,
        max_shards: config.max_shards,
    };
    let controller = RunController::new(Arc::clone(&catalog), store, limits);

    let prefs = FsConfigStore::project_default()
        .map(ConfigService::new)
        .map_err(|err| warn!(error = %err, "operator preferences unavailable, continuing without them"))
        .ok();

    let state = Arc::new(AppState {
        controller: Mutex::new(controller),
        prefs,
    });

    let cors = CorsLayer::new()
        .allow_origin(allowed_origin_layer(&config.allowed_origin))
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/status", get(status_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/healthz", get(healthz_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.control_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding control surface to {addr}"))?;
    info!(addr = %addr, "control surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control surface server failed")?;

    Ok(())
}

fn allowed_origin_layer(origin: &str) -> tower_http::cors::AllowOrigin {
    if origin == "*" {
        tower_http::cors::AllowOrigin::any()
    } else {
        match origin.parse::<axum::http::HeaderValue>() {
            Ok(value) => tower_http::cors::AllowOrigin::exact(value),
            Err(_) => {
                warn!(origin, "invalid FIELDPULSE_ALLOWED_ORIGIN, falling back to '*'");
                tower_http::cors::AllowOrigin::any()
            }
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler, shutdown will rely on process kill");
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let controller = state.controller.lock().await;
    Json(controller.status().await).into_response()
}

/// Wire shape of `POST /start`'s body (spec.md §6).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    rate: u32,
    batch: u32,
    shards: u32,
    spread: f64,
    seed: Option<u32>,
    note: Option<String>,
    #[serde(default)]
    repairs_enabled: bool,
    #[serde(default)]
    repair_config: Option<RepairConfigBody>,
}

/// Optional per-call overrides for the repair scheduler (spec.md §4.E.3);
/// any field left `None` falls through to [`RepairConfig::default`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepairConfigBody {
    cadence_ms: Option<u64>,
    budget_per_tick: Option<u32>,
    recent_window_sec: Option<i64>,
    delay_median_sec: Option<f64>,
    delay_p95_sec: Option<f64>,
    delay_jitter_sec: Option<i64>,
    p_fix_probability: Option<f64>,
    max_delay_sec: Option<u64>,
    policy: Option<String>,
    version: Option<String>,
}

impl RepairConfigBody {
    fn into_config(self) -> RepairConfig {
        let default = RepairConfig::default();
        RepairConfig {
            cadence_ms: self.cadence_ms.unwrap_or(default.cadence_ms),
            budget_per_tick: self.budget_per_tick.unwrap_or(default.budget_per_tick),
            recent_window_sec: self.recent_window_sec.unwrap_or(default.recent_window_sec),
            delay_median_sec: self.delay_median_sec.unwrap_or(default.delay_median_sec),
            delay_p95_sec: self.delay_p95_sec.unwrap_or(default.delay_p95_sec),
            delay_jitter_sec: self.delay_jitter_sec.unwrap_or(default.delay_jitter_sec),
            p_fix_probability: self.p_fix_probability.unwrap_or(default.p_fix_probability),
            max_delay_sec: self.max_delay_sec.unwrap_or(default.max_delay_sec),
            policy: self.policy.unwrap_or(default.policy),
            policy_version: self.version.unwrap_or(default.policy_version),
        }
    }
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartBody>,
) -> axum::response::Response {
    let repair_config = body
        .repair_config
        .map(RepairConfigBody::into_config)
        .unwrap_or_default();

    let request = RunRequest {
        rate: body.rate,
        batch: body.batch,
        shards: body.shards,
        spread_factor: body.spread,
        seed: body.seed,
        note: body.note.clone(),
        repairs_enabled: body.repairs_enabled,
        repair_config,
    };

    let mut controller = state.controller.lock().await;
    match controller.start(request).await {
        Ok(snapshot) => {
            drop(controller);
            remember_prefs(&state, body.note, body.seed).await;
            Json(snapshot).into_response()
        }
        Err(StartError::InvalidArgument(msg)) => ErrorBody::response(StatusCode::BAD_REQUEST, msg),
        Err(StartError::Resource(msg)) => {
            error!(error = %msg, "start failed with a resource error");
            ErrorBody::response(StatusCode::INTERNAL_SERVER_ERROR, msg)
        }
    }
}

async fn remember_prefs(state: &AppState, note: Option<String>, seed: Option<u32>) {
    let Some(prefs_service) = &state.prefs else {
        return;
    };
    let prefs = OperatorPrefs {
        last_note: note,
        last_seed: seed,
    };
    if let Err(err) = prefs_service.save(&prefs) {
        warn!(error = %err, "failed to persist operator preferences");
    }
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut controller = state.controller.lock().await;
    Json(controller.stop().await).into_response()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use fieldpulse_geo::Location;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_catalog() -> Arc<LocationCatalog> {
        Arc::new(
            LocationCatalog::from_entries(vec![Location {
                name: "Metro A".to_string(),
                latitude: 40.0,
                longitude: -74.0,
                weight: 1.0,
                sigma_km: 5.0,
            }])
            .expect("built"),
        )
    }

    fn test_app() -> Router {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let controller = RunController::new(test_catalog(), store, ProducerLimits::default());
        let state = Arc::new(AppState {
            controller: Mutex::new(controller),
            prefs: None,
        });
        Router::new()
            .route("/status", get(status_handler))
            .route("/start", post(start_handler))
            .route("/stop", post(stop_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_200() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_with_no_run_has_no_run_id() {
        let app = test_app();
        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let value = body_json(response).await;
        assert_eq!(value["ok"], true);
        assert!(value["runId"].is_null());
    }

    #[tokio::test]
    async fn start_rejects_shards_greater_than_rate() {
        let app = test_app();
        let body = serde_json::json!({
            "rate": 3, "batch": 1, "shards": 5, "spread": 1.0
        });
        let response = app
            .oneshot(
                Request::post("/start")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["ok"], false);
    }

    #[tokio::test]
    async fn start_then_stop_round_trips_through_http() {
        let app = test_app();
        let body = serde_json::json!({
            "rate": 10, "batch": 5, "shards": 2, "spread": 1.0, "seed": 1
        });
        let start_response = app
            .clone()
            .oneshot(
                Request::post("/start")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(start_response.status(), StatusCode::OK);
        let started = body_json(start_response).await;
        assert!(started["runId"].is_string());

        let stop_response = app
            .oneshot(Request::post("/stop").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stopped = body_json(stop_response).await;
        assert_eq!(stopped["producer"]["running"], false);
    }
}
