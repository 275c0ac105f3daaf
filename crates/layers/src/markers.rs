//! Renderer-side handling of `UPDATE_MARKERS` messages.
//!
//! `MarkerLayer` owns the drawn marker set and drives an abstract `Viewport`,
//! so the protocol can run against a real map engine or a test double.

use foundation::{GeoBounds, LatLng};
use streaming::{Category, Filter, MapMessage, Point};
use tracing::{debug, warn};

use crate::symbology::MarkerStyle;

/// Padding applied when fitting the viewport to drawn markers.
pub const DEFAULT_FIT_PADDING_PX: u32 = 40;

/// The part of the map engine the marker layer needs.
pub trait Viewport {
    fn fit_bounds(&mut self, bounds: &GeoBounds, padding_px: u32);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    pub position: LatLng,
    pub title: String,
    pub description: Option<String>,
    pub style: MarkerStyle,
}

#[derive(Debug)]
pub struct MarkerLayer<V> {
    viewport: V,
    markers: Vec<Marker>,
    padding_px: u32,
    rejected_messages: u64,
}

impl<V: Viewport> MarkerLayer<V> {
    pub fn new(viewport: V) -> Self {
        Self {
            viewport,
            markers: Vec::new(),
            padding_px: DEFAULT_FIT_PADDING_PX,
            rejected_messages: 0,
        }
    }

    pub fn with_padding(mut self, padding_px: u32) -> Self {
        self.padding_px = padding_px;
        self
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn viewport(&self) -> &V {
        &self.viewport
    }

    /// Messages dropped because they could not be parsed.
    pub fn rejected_messages(&self) -> u64 {
        self.rejected_messages
    }

    /// Entry point for raw text arriving over the bridge. Anything that does
    /// not parse as a `MapMessage` is logged and dropped.
    pub fn on_receive(&mut self, raw: &str) {
        match serde_json::from_str::<MapMessage>(raw) {
            Ok(message) => self.apply(&message),
            Err(e) => {
                self.rejected_messages += 1;
                warn!("ignoring unrecognized renderer message: {e}");
            }
        }
    }

    pub fn apply(&mut self, message: &MapMessage) {
        match message {
            MapMessage::UpdateMarkers { points, filter } => self.update_markers(points, *filter),
        }
    }

    fn update_markers(&mut self, points: &[Point], filter: Filter) {
        self.markers.clear();
        let mut bounds = GeoBounds::new();

        for point in points {
            if !filter.matches(point.category) {
                continue;
            }
            if let Err(e) = point.validate() {
                warn!("skipping marker {}: {e}", point.id);
                continue;
            }
            let style = match (point.category, point.value) {
                (Category::Aqi, Some(value)) => MarkerStyle::aqi_badge(value),
                (category, _) => MarkerStyle::dot(category),
            };
            let position = point.position();
            bounds.extend(position);
            self.markers.push(Marker {
                id: point.id.clone(),
                position,
                title: point.title.clone(),
                description: point.description.clone(),
                style,
            });
        }

        debug!(
            "drew {} of {} markers for filter {}",
            self.markers.len(),
            points.len(),
            filter.as_str()
        );

        if !bounds.is_empty() {
            self.viewport.fit_bounds(&bounds, self.padding_px);
        }
    }
}
