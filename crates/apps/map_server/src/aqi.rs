//! Air-quality providers.
//!
//! `AqiProvider` is the seam the grid sampler fans out over. The production
//! implementation queries the Open-Meteo air-quality API; tests substitute
//! in-memory providers.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use foundation::LatLng;
use serde::Deserialize;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw pollutant reading at one location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirSample {
    /// Fine particulate concentration (µg/m³).
    pub pm2_5: f64,
    pub pm10: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AqiError {
    Network(String),
    Timeout(Duration),
    Status(u16),
    Decode(String),
}

impl std::fmt::Display for AqiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            Self::Status(code) => write!(f, "HTTP error: {code}"),
            Self::Decode(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for AqiError {}

/// Source of air-quality readings.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait AqiProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_aqi(&self, at: LatLng) -> BoxFuture<'_, Result<AirSample, AqiError>>;
}

/// Open-Meteo air-quality API (`current=pm2_5,pm10`).
pub struct OpenMeteoProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OpenMeteoProvider {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: Option<OpenMeteoCurrent>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    pm2_5: Option<f64>,
    pm10: Option<f64>,
}

fn parse_response(body: &str) -> Result<AirSample, AqiError> {
    let resp: OpenMeteoResponse =
        serde_json::from_str(body).map_err(|e| AqiError::Decode(e.to_string()))?;
    let current = resp
        .current
        .ok_or_else(|| AqiError::Decode("missing 'current' block".to_string()))?;
    let pm2_5 = current
        .pm2_5
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| AqiError::Decode("missing pm2_5".to_string()))?;
    Ok(AirSample {
        pm2_5,
        pm10: current.pm10,
    })
}

impl AqiProvider for OpenMeteoProvider {
    fn name(&self) -> &str {
        "open-meteo"
    }

    fn fetch_aqi(&self, at: LatLng) -> BoxFuture<'_, Result<AirSample, AqiError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("latitude", format!("{:.5}", at.lat)),
                    ("longitude", format!("{:.5}", at.lng)),
                    ("current", "pm2_5,pm10".to_string()),
                ])
                .send()
                .await
                .map_err(classify)?;

            if !resp.status().is_success() {
                return Err(AqiError::Status(resp.status().as_u16()));
            }

            let body = resp.text().await.map_err(classify)?;
            parse_response(&body)
        })
    }
}

fn classify(e: reqwest::Error) -> AqiError {
    if e.is_timeout() {
        AqiError::Timeout(Duration::ZERO)
    } else {
        AqiError::Network(e.to_string())
    }
}
