//! Caller-relative distances for a page of reports.

use dcare_core::{Location, Record};
use serde::Serialize;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(a: Location, b: Location) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let x = (d_lat / 2.0).sin().powi(2) + (d_lng / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * x.sqrt().atan2((1.0 - x).sqrt());
    EARTH_RADIUS_KM * c
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedRecord {
    #[serde(flatten)]
    pub record: Record,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// Attach distances from `caller`. Without a caller location, or for records
/// lacking coordinates, the distance is left out.
pub fn annotate(records: impl IntoIterator<Item = Record>, caller: Option<Location>) -> Vec<AnnotatedRecord> {
    records
        .into_iter()
        .map(|record| {
            let distance_km = caller.zip(record.location()).map(|(me, at)| distance_km(me, at));
            AnnotatedRecord { record, distance_km }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcare_core::Department;

    fn rec(lat: Option<f64>, lng: Option<f64>) -> Record {
        Record {
            id: "p".into(),
            title: String::new(),
            description: String::new(),
            department_tag: Department::Road,
            status: "pending".into(),
            lat,
            lng,
            created_at: 0,
            created_by: String::new(),
            action_note: String::new(),
            image_ref: None,
        }
    }

    #[test]
    fn zero_distance_to_self() {
        let p = Location { lat: 12.97, lng: 77.59 };
        assert!(distance_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = distance_km(Location { lat: 0.0, lng: 0.0 }, Location { lat: 1.0, lng: 0.0 });
        assert!((d - 111.19).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn no_caller_location_leaves_records_unannotated() {
        let out = annotate(vec![rec(Some(1.0), Some(1.0))], None);
        assert_eq!(out.len(), 1);
        assert!(out[0].distance_km.is_none());
        assert_eq!(out[0].record, rec(Some(1.0), Some(1.0)));
    }

    #[test]
    fn records_without_coordinates_get_no_distance() {
        let me = Some(Location { lat: 0.0, lng: 0.0 });
        let out = annotate(vec![rec(None, Some(1.0)), rec(Some(0.0), Some(1.0))], me);
        assert!(out[0].distance_km.is_none());
        assert!(out[1].distance_km.unwrap() > 111.0);
    }
}
