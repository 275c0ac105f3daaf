//! User-submitted waste reports and their live snapshot stream.
//!
//! Reports are persisted as a JSON array. Every successful mutation publishes
//! the complete current set to all subscribers (snapshot semantics, never
//! deltas). A store whose file cannot be read publishes an error snapshot
//! instead, which map sessions treat as "reports unavailable".

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use foundation::LatLng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use streaming::{Category, Point};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::AppState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub title: String,
    #[serde(default)]
    pub description: String,

    // Timestamps (ms since epoch).
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Report {
    pub fn to_point(&self) -> Point {
        let mut p = Point::marker(
            self.id.clone(),
            LatLng::new(self.lat, self.lng),
            Category::Waste,
            self.title.clone(),
        );
        if !self.description.trim().is_empty() {
            p.description = Some(self.description.clone());
        }
        p
    }

    fn validate(&self) -> Result<(), ReportStoreError> {
        if self.id.trim().is_empty() {
            return Err(ReportStoreError::Invalid("report id is required".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(ReportStoreError::Invalid("report title is required".to_string()));
        }
        LatLng::try_new(self.lat, self.lng)
            .map_err(|e| ReportStoreError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportStoreError {
    Io(String),
    Corrupt(String),
    Invalid(String),
}

impl std::fmt::Display for ReportStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "report storage error: {msg}"),
            Self::Corrupt(msg) => write!(f, "report storage corrupt: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid report: {msg}"),
        }
    }
}

impl std::error::Error for ReportStoreError {}

/// Full report set as map points, or why it is unavailable.
pub type ReportSnapshot = Result<Arc<[Point]>, ReportStoreError>;

pub struct ReportStore {
    path: PathBuf,
    lock: Mutex<()>,
    snapshots: watch::Sender<ReportSnapshot>,
}

impl ReportStore {
    /// Open the store and publish its initial snapshot.
    pub async fn open(path: PathBuf) -> Self {
        let (snapshots, _) = watch::channel(Ok(Arc::from(Vec::new())));
        let store = Self {
            path,
            lock: Mutex::new(()),
            snapshots,
        };
        match store.load_unlocked().await {
            Ok(reports) => {
                info!("loaded {} reports from {}", reports.len(), store.path.display());
                store.publish(&reports);
            }
            Err(e) => store.publish_error(e),
        }
        store
    }

    /// Load for a mutation. An unreadable file also turns the stream into an
    /// error snapshot so subscribers stop showing the last good set.
    async fn load_for_update(&self) -> Result<Vec<Report>, ReportStoreError> {
        match self.load_unlocked().await {
            Ok(reports) => Ok(reports),
            Err(e) => {
                self.publish_error(e.clone());
                Err(e)
            }
        }
    }

    async fn load_unlocked(&self) -> Result<Vec<Report>, ReportStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => serde_json::from_str(&s).map_err(|e| ReportStoreError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ReportStoreError::Io(e.to_string())),
        }
    }

    async fn save_unlocked(&self, reports: &[Report]) -> Result<(), ReportStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReportStoreError::Io(e.to_string()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(reports)
            .map_err(|e| ReportStoreError::Io(e.to_string()))?;
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| ReportStoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ReportStoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn publish(&self, reports: &[Report]) {
        let points: Vec<Point> = reports
            .iter()
            .map(Report::to_point)
            .filter(|p| match p.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("dropping report {} from snapshot: {e}", p.id);
                    false
                }
            })
            .collect();
        debug!(
            "publishing report snapshot ({} reports, {} subscribers)",
            points.len(),
            self.subscriber_count()
        );
        // The replaced snapshot is not needed.
        let _ = self.snapshots.send_replace(Ok(Arc::from(points)));
    }

    fn publish_error(&self, e: ReportStoreError) {
        warn!("report stream unavailable: {e}");
        let _ = self.snapshots.send_replace(Err(e));
    }

    pub async fn list(&self) -> Result<Vec<Report>, ReportStoreError> {
        let _g = self.lock.lock().await;
        self.load_unlocked().await
    }

    pub async fn upsert(&self, mut report: Report, now_ms: u64) -> Result<Report, ReportStoreError> {
        report.validate()?;

        let _g = self.lock.lock().await;
        let mut reports = self.load_for_update().await?;

        report.updated_at = now_ms;
        if let Some(existing) = reports.iter().find(|r| r.id == report.id) {
            report.created_at = existing.created_at;
        }
        if report.created_at == 0 {
            report.created_at = now_ms;
        }

        reports.retain(|r| r.id != report.id);
        reports.push(report.clone());
        self.save_unlocked(&reports).await?;
        self.publish(&reports);
        Ok(report)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ReportStoreError> {
        let _g = self.lock.lock().await;
        let mut reports = self.load_for_update().await?;
        let before = reports.len();
        reports.retain(|r| r.id != id);
        let removed = reports.len() != before;
        if removed {
            self.save_unlocked(&reports).await?;
            self.publish(&reports);
        }
        Ok(removed)
    }

    /// Subscribe to full-set snapshots. The current set is available
    /// immediately via `ReportSubscription::current`.
    pub fn subscribe(&self) -> ReportSubscription {
        ReportSubscription {
            rx: self.snapshots.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshots.receiver_count()
    }
}

/// Live handle on the report stream. Dropping it unsubscribes.
pub struct ReportSubscription {
    rx: watch::Receiver<ReportSnapshot>,
}

impl ReportSubscription {
    pub fn current(&mut self) -> ReportSnapshot {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next snapshot. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<ReportSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

impl Drop for ReportSubscription {
    fn drop(&mut self) {
        debug!("report subscription released");
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn store_error(e: ReportStoreError) -> (StatusCode, Json<Value>) {
    let status = match e {
        ReportStoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

/// Body of `POST /api/reports`; a missing id creates a new report.
#[derive(Debug, Deserialize)]
pub struct ReportInput {
    #[serde(default)]
    pub id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

pub async fn list_reports(
    State(state): State<AppState>,
) -> Result<Json<Vec<Report>>, (StatusCode, Json<Value>)> {
    let reports = state.reports.list().await.map_err(store_error)?;
    Ok(Json(reports))
}

pub async fn upsert_report(
    State(state): State<AppState>,
    Json(input): Json<ReportInput>,
) -> Result<Json<Report>, (StatusCode, Json<Value>)> {
    let report = Report {
        id: input
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        lat: input.lat,
        lng: input.lng,
        title: input.title,
        description: input.description,
        created_at: 0,
        updated_at: 0,
    };

    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let saved = state
        .reports
        .upsert(report, now_ms)
        .await
        .map_err(store_error)?;
    Ok(Json(saved))
}

pub async fn delete_report(
    State(state): State<AppState>,
    AxumPath(report_id): AxumPath<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let removed = state
        .reports
        .delete(&report_id)
        .await
        .map_err(store_error)?;

    if !removed {
        return Err(api_error(StatusCode::NOT_FOUND, "Report not found"));
    }

    Ok((StatusCode::NO_CONTENT, ""))
}
