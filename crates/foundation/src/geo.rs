/// WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Copy, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoordError {
    LatOutOfRange(f64),
    LngOutOfRange(f64),
}

impl std::fmt::Display for CoordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordError::LatOutOfRange(v) => write!(f, "latitude {v} outside [-90, 90]"),
            CoordError::LngOutOfRange(v) => write!(f, "longitude {v} outside [-180, 180]"),
        }
    }
}

impl std::error::Error for CoordError {}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build a coordinate, rejecting NaN and out of range values.
    pub fn try_new(lat: f64, lng: f64) -> Result<Self, CoordError> {
        let c = Self { lat, lng };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), CoordError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoordError::LatOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoordError::LngOutOfRange(self.lng));
        }
        Ok(())
    }

    /// Shift by a degree offset, clamping latitude and wrapping longitude
    /// back into range.
    pub fn offset_deg(self, dlat: f64, dlng: f64) -> Self {
        let lat = (self.lat + dlat).clamp(-90.0, 90.0);
        let mut lng = self.lng + dlng;
        if lng > 180.0 {
            lng -= 360.0;
        } else if lng < -180.0 {
            lng += 360.0;
        }
        Self { lat, lng }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoordError, LatLng};

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(
            LatLng::try_new(91.0, 0.0),
            Err(CoordError::LatOutOfRange(91.0))
        );
        assert_eq!(
            LatLng::try_new(0.0, -180.5),
            Err(CoordError::LngOutOfRange(-180.5))
        );
        assert!(LatLng::try_new(f64::NAN, 0.0).is_err());
        assert!(LatLng::try_new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn offset_wraps_longitude() {
        let c = LatLng::new(89.9, 179.9).offset_deg(0.5, 0.5);
        assert_eq!(c.lat, 90.0);
        assert!((c.lng - (-179.6)).abs() < 1e-9);
        assert!(c.validate().is_ok());
    }
}
