use std::env;
use std::path::PathBuf;
use std::time::Duration;

use foundation::LatLng;
use tracing::warn;

/// Hanoi city center; used when location is unavailable.
pub const FALLBACK_CENTER: LatLng = LatLng::new(21.0285, 105.8542);

pub const DEFAULT_AQI_BASE_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

#[derive(Clone, Debug)]
pub struct MapConfig {
    pub addr: String,
    pub data_root: PathBuf,
    pub catalog_path: PathBuf,
    pub reports_path: PathBuf,
    pub aqi_base_url: String,
    pub aqi_timeout: Duration,
    pub default_center: LatLng,
    /// Fixed RNG seed for the AQI sampler; random when unset.
    pub aqi_seed: Option<u64>,
}

impl MapConfig {
    pub fn from_env() -> Self {
        let data_root = env::var("MAP_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let catalog_path = env::var("MAP_CATALOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join("catalog.json"));
        let reports_path = env::var("MAP_REPORTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join("reports.json"));

        let default_center = match LatLng::try_new(
            env_var_f64("MAP_DEFAULT_LAT", FALLBACK_CENTER.lat),
            env_var_f64("MAP_DEFAULT_LNG", FALLBACK_CENTER.lng),
        ) {
            Ok(c) => c,
            Err(err) => {
                warn!("invalid default center ({err}), using {FALLBACK_CENTER:?}");
                FALLBACK_CENTER
            }
        };

        Self {
            addr: env::var("MAP_ADDR").unwrap_or_else(|_| "127.0.0.1:9200".to_string()),
            data_root,
            catalog_path,
            reports_path,
            aqi_base_url: env::var("AQI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_AQI_BASE_URL.to_string()),
            aqi_timeout: Duration::from_millis(env_var_u64("AQI_TIMEOUT_MS", 8_000)),
            default_center,
            aqi_seed: env::var("AQI_SEED").ok().and_then(|v| v.parse().ok()),
        }
    }
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
