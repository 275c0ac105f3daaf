//! Wire types shared by the map host and the embedded renderer.
//!
//! This module defines:
//! - The canonical `Point` every data source is normalized into
//! - Marker categories and the filter that selects among them
//! - Messages from host to renderer (`MapMessage`)
//! - Commands from the renderer page / host UI back to the session (`HostCommand`)
//!
//! Everything here is plain serde data so it can cross any JSON transport.

use foundation::{CoordError, LatLng};
use serde::{Deserialize, Serialize};

/// Smallest AQI display value a point may carry.
pub const MIN_AQI_VALUE: f64 = 10.0;

/// Description attached to AQI points whose reading had to be estimated.
pub const SYNTHETIC_DESCRIPTION: &str = "Estimated value: live reading unavailable";

/// Marker category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Aqi,
    Waste,
    EWaste,
    Paper,
    Organic,
    Metal,
    Plastic,
    Glass,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Aqi,
        Category::Waste,
        Category::EWaste,
        Category::Paper,
        Category::Organic,
        Category::Metal,
        Category::Plastic,
        Category::Glass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Aqi => "aqi",
            Category::Waste => "waste",
            Category::EWaste => "e_waste",
            Category::Paper => "paper",
            Category::Organic => "organic",
            Category::Metal => "metal",
            Category::Plastic => "plastic",
            Category::Glass => "glass",
        }
    }
}

/// Active map filter. Selects both the data source and what gets drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Aqi,
    #[default]
    All,
    Waste,
    EWaste,
    Paper,
    Organic,
    Metal,
    Plastic,
    Glass,
}

impl Filter {
    pub fn is_aqi(&self) -> bool {
        matches!(self, Filter::Aqi)
    }

    /// The drawing rule shared by the aggregator and the renderer:
    /// `aqi` keeps only AQI points, `all` keeps every non-AQI point, and a
    /// category filter keeps exactly that category.
    pub fn matches(&self, category: Category) -> bool {
        match self {
            Filter::Aqi => category == Category::Aqi,
            Filter::All => category != Category::Aqi,
            other => other.category() == Some(category),
        }
    }

    /// The single category this filter selects, if it selects exactly one.
    pub fn category(&self) -> Option<Category> {
        match self {
            Filter::All => None,
            Filter::Aqi => Some(Category::Aqi),
            Filter::Waste => Some(Category::Waste),
            Filter::EWaste => Some(Category::EWaste),
            Filter::Paper => Some(Category::Paper),
            Filter::Organic => Some(Category::Organic),
            Filter::Metal => Some(Category::Metal),
            Filter::Plastic => Some(Category::Plastic),
            Filter::Glass => Some(Category::Glass),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.category() {
            Some(c) => c.as_str(),
            None => "all",
        }
    }
}

impl From<Category> for Filter {
    fn from(c: Category) -> Self {
        match c {
            Category::Aqi => Filter::Aqi,
            Category::Waste => Filter::Waste,
            Category::EWaste => Filter::EWaste,
            Category::Paper => Filter::Paper,
            Category::Organic => Filter::Organic,
            Category::Metal => Filter::Metal,
            Category::Plastic => Filter::Plastic,
            Category::Glass => Filter::Glass,
        }
    }
}

impl std::str::FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "all" {
            return Ok(Filter::All);
        }
        Category::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .map(|c| Filter::from(*c))
            .ok_or_else(|| format!("unknown filter '{s}'"))
    }
}

/// A single drawable map point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointError {
    Coord(CoordError),
    MissingAqiValue,
    AqiBelowMinimum(f64),
}

impl std::fmt::Display for PointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointError::Coord(e) => write!(f, "invalid coordinate: {e}"),
            PointError::MissingAqiValue => write!(f, "aqi point without a value"),
            PointError::AqiBelowMinimum(v) => {
                write!(f, "aqi value {v} below minimum {MIN_AQI_VALUE}")
            }
        }
    }
}

impl std::error::Error for PointError {}

impl From<CoordError> for PointError {
    fn from(e: CoordError) -> Self {
        PointError::Coord(e)
    }
}

impl Point {
    /// Non-AQI point at `at`.
    pub fn marker(
        id: impl Into<String>,
        at: LatLng,
        category: Category,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            lat: at.lat,
            lng: at.lng,
            category,
            value: None,
            title: title.into(),
            description: None,
        }
    }

    /// AQI point; `value` is clamped up to `MIN_AQI_VALUE`.
    pub fn aqi(id: impl Into<String>, at: LatLng, value: f64, title: impl Into<String>) -> Self {
        let value = if value.is_nan() {
            MIN_AQI_VALUE
        } else {
            value.max(MIN_AQI_VALUE)
        };
        Self {
            id: id.into(),
            lat: at.lat,
            lng: at.lng,
            category: Category::Aqi,
            value: Some(value),
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn is_synthetic(&self) -> bool {
        self.description.as_deref() == Some(SYNTHETIC_DESCRIPTION)
    }

    pub fn validate(&self) -> Result<(), PointError> {
        self.position().validate()?;
        if self.category == Category::Aqi {
            match self.value {
                None => return Err(PointError::MissingAqiValue),
                Some(v) if !(v >= MIN_AQI_VALUE) => return Err(PointError::AqiBelowMinimum(v)),
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Message from host to renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MapMessage {
    /// Full marker snapshot; replaces everything previously drawn.
    #[serde(rename = "UPDATE_MARKERS")]
    UpdateMarkers { points: Vec<Point>, filter: Filter },
}

/// Command from the renderer page or host UI to the map session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    /// The renderer finished constructing its map instance.
    RendererReady,

    /// Switch the active filter.
    SetFilter { filter: Filter },

    /// Device location resolved.
    Location { lat: f64, lng: f64 },

    /// Location permission was denied; use the default center.
    LocationDenied,

    /// Show an externally supplied single-category point list instead of the
    /// live sources.
    Override {
        initial_filter: Filter,
        initial_points: Vec<Point>,
    },
}
