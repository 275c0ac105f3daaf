//! Fusion of the map's point sources into one snapshot.

use std::fmt::Display;

use streaming::{Filter, Point};
use tracing::warn;

/// Merge the static catalog, the live report snapshot and the AQI samples
/// into the point set for `filter`.
///
/// In `aqi` mode the samples are returned as-is and the other sources are
/// ignored. Otherwise catalog and reports are merged and narrowed by
/// `Filter::matches`. A failed report source degrades to the catalog alone.
pub fn aggregate<E: Display>(
    filter: Filter,
    catalog: &[Point],
    live_reports: Result<&[Point], &E>,
    aqi_samples: &[Point],
) -> Vec<Point> {
    if filter.is_aqi() {
        return aqi_samples.to_vec();
    }

    let reports: &[Point] = match live_reports {
        Ok(reports) => reports,
        Err(e) => {
            warn!("live reports unavailable, using static catalog only: {e}");
            &[]
        }
    };

    catalog
        .iter()
        .chain(reports)
        .filter(|p| filter.matches(p.category))
        .cloned()
        .collect()
}
