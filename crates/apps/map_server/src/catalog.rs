//! Static collection-point catalog.

use std::path::Path;

use axum::extract::State;
use axum::Json;
use streaming::{Category, Point};
use tracing::{info, warn};

use crate::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogError {
    Io(String),
    Corrupt(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(msg) => write!(f, "catalog read error: {msg}"),
            CatalogError::Corrupt(msg) => write!(f, "catalog corrupt: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Load the catalog from a JSON array of points.
///
/// A missing file is an empty catalog. Entries with bad coordinates or the
/// `aqi` category are skipped; AQI points only come from live sampling.
pub async fn load_catalog(path: &Path) -> Result<Vec<Point>, CatalogError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no catalog at {}, starting empty", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(CatalogError::Io(e.to_string())),
    };
    parse_catalog(&text)
}

fn parse_catalog(text: &str) -> Result<Vec<Point>, CatalogError> {
    let entries: Vec<Point> =
        serde_json::from_str(text).map_err(|e| CatalogError::Corrupt(e.to_string()))?;
    let total = entries.len();
    let points: Vec<Point> = entries
        .into_iter()
        .filter(|p| {
            if p.category == Category::Aqi {
                warn!("catalog entry {} has category aqi, skipping", p.id);
                return false;
            }
            if let Err(e) = p.validate() {
                warn!("catalog entry {} invalid, skipping: {e}", p.id);
                return false;
            }
            true
        })
        .collect();
    info!("catalog: {} of {total} entries usable", points.len());
    Ok(points)
}

pub async fn get_catalog(State(state): State<AppState>) -> Json<Vec<Point>> {
    Json(state.catalog.as_ref().clone())
}
