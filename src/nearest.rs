// Nearest historical project to a point picked on the map.
use geo::{Distance, Haversine, Point};

use crate::io::ProjectRecord;

/// Closest record that has coordinates, with its great-circle distance in kilometers.
pub fn nearest_project(records: &[ProjectRecord], lat: f64, lon: f64) -> Option<(&ProjectRecord, f64)> {
    let origin = Point::new(lon, lat);
    records
        .iter()
        .filter_map(|r| {
            r.coordinates()
                .map(|(rlat, rlon)| (r, Haversine.distance(origin, Point::new(rlon, rlat)) / 1000.0))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}
