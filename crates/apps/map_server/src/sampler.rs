//! Five-point air-quality constellation around a center coordinate.
//!
//! All provider calls run concurrently and settle independently: a failed or
//! timed-out call is replaced by an estimated value instead of failing the
//! batch, so `sample` always yields `SAMPLE_COUNT` points in offset order.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use foundation::LatLng;
use foundation::math::{meters_to_lat_deg, meters_to_lng_deg};
use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use streaming::{Point, SYNTHETIC_DESCRIPTION};
use tracing::{debug, warn};

use crate::aqi::{AqiError, AqiProvider};

pub const SAMPLE_COUNT: usize = 5;

/// Display value per µg/m³ of PM2.5.
pub const PM25_SCALE: f64 = 4.0;

/// Symmetric jitter added to live readings so neighbours rarely tie.
pub const JITTER: f64 = 5.0;

/// Range for estimated values when a reading is unavailable.
pub const FALLBACK_RANGE: RangeInclusive<f64> = 30.0..=180.0;

/// Kilometer ranges for one satellite sample, east and north of the center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetRangeKm {
    pub east: (f64, f64),
    pub north: (f64, f64),
}

/// Satellite placement, one per quadrant (NE, SE, SW, NW). The ranges are
/// deliberately lopsided so the scatter does not read as a grid. Every bound
/// stays within 40 m .. 4 km of the center on each axis.
pub const OFFSET_RANGES_KM: [OffsetRangeKm; SAMPLE_COUNT - 1] = [
    OffsetRangeKm {
        east: (0.05, 1.8),
        north: (0.3, 2.6),
    },
    OffsetRangeKm {
        east: (0.6, 3.2),
        north: (-1.4, -0.04),
    },
    OffsetRangeKm {
        east: (-2.1, -0.08),
        north: (-3.0, -0.5),
    },
    OffsetRangeKm {
        east: (-4.0, -0.9),
        north: (0.1, 1.2),
    },
];

/// Offset of one sample from the center, in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOffset {
    /// Longitude delta.
    pub dx: f64,
    /// Latitude delta.
    pub dy: f64,
    pub label: Option<&'static str>,
}

pub struct AqiGridSampler {
    provider: Arc<dyn AqiProvider>,
    timeout: Duration,
    rng: Mutex<StdRng>,
}

impl AqiGridSampler {
    pub fn new(provider: Arc<dyn AqiProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Center offset first, then one randomized offset per quadrant range.
    pub fn offsets(&self, center: LatLng) -> Vec<SampleOffset> {
        let mut rng = self.rng.lock();
        let mut offsets = Vec::with_capacity(SAMPLE_COUNT);
        offsets.push(SampleOffset {
            dx: 0.0,
            dy: 0.0,
            label: Some("center"),
        });
        for range in OFFSET_RANGES_KM {
            let east_m = rng.gen_range(range.east.0..=range.east.1) * 1000.0;
            let north_m = rng.gen_range(range.north.0..=range.north.1) * 1000.0;
            offsets.push(SampleOffset {
                dx: meters_to_lng_deg(east_m, center.lat),
                dy: meters_to_lat_deg(north_m),
                label: None,
            });
        }
        offsets
    }

    pub async fn sample(&self, center: LatLng) -> Vec<Point> {
        let offsets = self.offsets(center);
        let positions: Vec<LatLng> = offsets
            .iter()
            .map(|o| center.offset_deg(o.dy, o.dx))
            .collect();

        let fetches = positions.iter().map(|at| {
            let call = self.provider.fetch_aqi(*at);
            let timeout = self.timeout;
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(AqiError::Timeout(timeout)),
                }
            }
        });
        let results = join_all(fetches).await;

        let mut rng = self.rng.lock();
        let points: Vec<Point> = results
            .into_iter()
            .zip(positions)
            .zip(offsets)
            .enumerate()
            .map(|(index, ((result, at), offset))| {
                let id = format!("aqi-{index}");
                let title = match offset.label {
                    Some(label) => format!("Air quality ({label})"),
                    None => "Air quality".to_string(),
                };
                match result {
                    Ok(sample) => {
                        let jitter = rng.gen_range(-JITTER..=JITTER);
                        let value = (sample.pm2_5 * PM25_SCALE + jitter).round();
                        let description = match sample.pm10 {
                            Some(pm10) => format!(
                                "PM2.5 {:.1} µg/m³, PM10 {pm10:.1} µg/m³",
                                sample.pm2_5
                            ),
                            None => format!("PM2.5 {:.1} µg/m³", sample.pm2_5),
                        };
                        Point::aqi(id, at, value, title).with_description(description)
                    }
                    Err(err) => {
                        warn!("AQI sample {index} unavailable, estimating: {err}");
                        let value = rng.gen_range(FALLBACK_RANGE).round();
                        Point::aqi(id, at, value, title).with_description(SYNTHETIC_DESCRIPTION)
                    }
                }
            })
            .collect();

        debug!(
            "sampled {} AQI points around ({:.4}, {:.4}), {} estimated",
            points.len(),
            center.lat,
            center.lng,
            points.iter().filter(|p| p.is_synthetic()).count()
        );
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aqi::{AirSample, BoxFuture};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use streaming::{Category, MIN_AQI_VALUE};

    const CENTER: LatLng = LatLng::new(21.0285, 105.8542);

    /// Provider that answers in call order; calls whose index is in `fail`
    /// error out and those in `hang` never resolve.
    struct ScriptedProvider {
        pm2_5: f64,
        pm10: Option<f64>,
        fail: HashSet<usize>,
        hang: HashSet<usize>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(pm2_5: f64) -> Self {
            Self {
                pm2_5,
                pm10: None,
                fail: HashSet::new(),
                hang: HashSet::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(mut self, idx: impl IntoIterator<Item = usize>) -> Self {
            self.fail.extend(idx);
            self
        }

        fn with_pm10(mut self, pm10: f64) -> Self {
            self.pm10 = Some(pm10);
            self
        }

        fn hanging(mut self, idx: impl IntoIterator<Item = usize>) -> Self {
            self.hang.extend(idx);
            self
        }
    }

    impl AqiProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch_aqi(&self, _at: LatLng) -> BoxFuture<'_, Result<AirSample, AqiError>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail.contains(&n);
            let hang = self.hang.contains(&n);
            let pm2_5 = self.pm2_5;
            let pm10 = self.pm10;
            Box::pin(async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                if fail {
                    return Err(AqiError::Network("connection reset".to_string()));
                }
                Ok(AirSample { pm2_5, pm10 })
            })
        }
    }

    fn sampler(provider: ScriptedProvider, seed: u64) -> AqiGridSampler {
        AqiGridSampler::new(Arc::new(provider), Duration::from_secs(8)).with_seed(seed)
    }

    #[tokio::test]
    async fn live_readings_describe_particulates() {
        let s = sampler(ScriptedProvider::new(12.0).with_pm10(20.5), 3);
        let points = s.sample(CENTER).await;
        assert_eq!(
            points[0].description.as_deref(),
            Some("PM2.5 12.0 µg/m³, PM10 20.5 µg/m³")
        );

        let s = sampler(ScriptedProvider::new(12.0), 3);
        let points = s.sample(CENTER).await;
        assert_eq!(points[0].description.as_deref(), Some("PM2.5 12.0 µg/m³"));
    }

    #[tokio::test]
    async fn always_five_points_in_offset_order() {
        let s = sampler(ScriptedProvider::new(12.0), 7);
        let points = s.sample(CENTER).await;
        assert_eq!(points.len(), SAMPLE_COUNT);
        let ids: Vec<_> = points.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["aqi-0", "aqi-1", "aqi-2", "aqi-3", "aqi-4"]);
        assert_eq!(points[0].title, "Air quality (center)");
        assert_eq!(points[0].position(), CENTER);
        for p in &points {
            assert_eq!(p.category, Category::Aqi);
            assert!(p.validate().is_ok());
            assert!(!p.is_synthetic());
        }
    }

    #[tokio::test]
    async fn live_values_are_scaled_with_bounded_jitter() {
        let s = sampler(ScriptedProvider::new(20.0), 11);
        for p in s.sample(CENTER).await {
            let v = p.value.unwrap();
            assert!((75.0..=85.0).contains(&v), "value {v} outside 80 ± 5");
        }
    }

    #[tokio::test]
    async fn one_failed_fetch_is_estimated() {
        let s = sampler(ScriptedProvider::new(12.0).failing([3]), 3);
        let points = s.sample(CENTER).await;
        assert_eq!(points.len(), SAMPLE_COUNT);
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.is_synthetic(), i == 3, "point {i}");
        }
        let v = points[3].value.unwrap();
        assert!(FALLBACK_RANGE.contains(&v), "estimate {v} out of range");
    }

    #[tokio::test]
    async fn total_failure_still_yields_five_points() {
        let s = sampler(ScriptedProvider::new(12.0).failing(0..SAMPLE_COUNT), 5);
        let points = s.sample(CENTER).await;
        assert_eq!(points.len(), SAMPLE_COUNT);
        assert!(points.iter().all(|p| p.is_synthetic()));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_times_out_into_estimate() {
        let s = sampler(ScriptedProvider::new(12.0).hanging([1]), 9);
        let points = s.sample(CENTER).await;
        assert_eq!(points.len(), SAMPLE_COUNT);
        assert!(points[1].is_synthetic());
        assert!(!points[0].is_synthetic());
    }

    #[tokio::test]
    async fn clean_air_never_drops_below_minimum() {
        for seed in 0..50 {
            let s = sampler(ScriptedProvider::new(0.0), seed);
            for p in s.sample(CENTER).await {
                assert!(p.value.unwrap() >= MIN_AQI_VALUE);
            }
        }
    }

    #[test]
    fn offsets_stay_within_documented_box() {
        let s = sampler(ScriptedProvider::new(0.0), 42);
        for _ in 0..100 {
            let offsets = s.offsets(CENTER);
            assert_eq!(offsets.len(), SAMPLE_COUNT);
            assert_eq!(offsets[0].dx, 0.0);
            assert_eq!(offsets[0].dy, 0.0);
            assert_eq!(offsets[0].label, Some("center"));
            for (o, range) in offsets[1..].iter().zip(OFFSET_RANGES_KM) {
                let north_km = o.dy * foundation::math::METERS_PER_DEG_LAT / 1000.0;
                assert!(north_km >= range.north.0 - 1e-9 && north_km <= range.north.1 + 1e-9);
                assert!(o.dx.abs() < 0.05, "longitude offset {} too large", o.dx);
                assert!(o.label.is_none());
            }
        }
    }
}
