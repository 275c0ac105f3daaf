use crate::geo::LatLng;

/// Geographic bounding box accumulated from points.
///
/// Starts empty; `extend` grows it to include each point. Longitude is not
/// treated as cyclic, so boxes spanning the antimeridian come out wide.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct GeoBounds {
    extent: Option<(LatLng, LatLng)>,
}

impl GeoBounds {
    pub fn new() -> Self {
        Self { extent: None }
    }

    pub fn extend(&mut self, p: LatLng) {
        self.extent = Some(match self.extent {
            None => (p, p),
            Some((sw, ne)) => (
                LatLng::new(sw.lat.min(p.lat), sw.lng.min(p.lng)),
                LatLng::new(ne.lat.max(p.lat), ne.lng.max(p.lng)),
            ),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.extent.is_none()
    }

    /// South-west corner.
    pub fn south_west(&self) -> Option<LatLng> {
        self.extent.map(|(sw, _)| sw)
    }

    /// North-east corner.
    pub fn north_east(&self) -> Option<LatLng> {
        self.extent.map(|(_, ne)| ne)
    }
}
