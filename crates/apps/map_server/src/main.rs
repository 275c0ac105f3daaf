use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use foundation::LatLng;
use serde::Deserialize;
use serde_json::json;
use streaming::Point;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod aqi;
mod catalog;
mod config;
mod reports;
mod sampler;
mod session;
mod ws_bridge;

use aqi::OpenMeteoProvider;
use config::MapConfig;
use reports::ReportStore;
use sampler::AqiGridSampler;
use session::SessionDeps;

#[derive(Clone)]
struct AppState {
    config: Arc<MapConfig>,
    catalog: Arc<Vec<Point>>,
    reports: Arc<ReportStore>,
    sampler: Arc<AqiGridSampler>,
}

impl AppState {
    fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            catalog: self.catalog.clone(),
            reports: self.reports.clone(),
            sampler: self.sampler.clone(),
            default_center: self.config.default_center,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = MapConfig::from_env();
    let addr: SocketAddr = match config.addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::error!("invalid MAP_ADDR {:?}: {err}", config.addr);
            return;
        }
    };

    if let Err(err) = tokio::fs::create_dir_all(&config.data_root).await {
        warn!("failed to create data root: {err}");
    }

    let catalog = match catalog::load_catalog(&config.catalog_path).await {
        Ok(points) => points,
        Err(err) => {
            warn!("static catalog unavailable, continuing without it: {err}");
            Vec::new()
        }
    };

    let reports = ReportStore::open(config.reports_path.clone()).await;

    let http = reqwest::Client::new();
    let provider = Arc::new(OpenMeteoProvider::new(config.aqi_base_url.clone(), http));
    let mut sampler = AqiGridSampler::new(provider, config.aqi_timeout);
    if let Some(seed) = config.aqi_seed {
        sampler = sampler.with_seed(seed);
    }
    info!(
        "AQI provider {} (timeout {}ms)",
        sampler.provider_name(),
        config.aqi_timeout.as_millis()
    );

    let state = AppState {
        config: Arc::new(config),
        catalog: Arc::new(catalog),
        reports: Arc::new(reports),
        sampler: Arc::new(sampler),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/catalog", get(catalog::get_catalog))
        .route(
            "/api/reports",
            get(reports::list_reports).post(reports::upsert_report),
        )
        .route("/api/reports/:id", delete(reports::delete_report))
        .route("/api/aqi", get(preview_aqi))
        .route("/ws", get(ws_bridge::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("map server listening on http://{addr}");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!("failed to bind {addr}: {err}");
            return;
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("server error: {err}");
    }
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

#[derive(Debug, Deserialize)]
struct AqiQuery {
    lat: f64,
    lng: f64,
}

async fn preview_aqi(State(state): State<AppState>, Query(q): Query<AqiQuery>) -> Response {
    let center = match LatLng::try_new(q.lat, q.lng) {
        Ok(c) => c,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    };
    let points = state.sampler.sample(center).await;
    (StatusCode::OK, Json(points)).into_response()
}
