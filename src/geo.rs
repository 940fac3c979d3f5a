use serde_json::{Value, json};

use crate::construct::GeoPoint;

/// A closed ring of (longitude, latitude) positions.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    ring: Vec<GeoPoint>,
}

impl Polygon {
    /// Closes the points into a ring by repeating the first point as the last.
    /// At least three points are needed to enclose anything.
    pub fn closed(points: &[GeoPoint]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let mut ring = Vec::with_capacity(points.len() + 1);
        ring.extend_from_slice(points);
        ring.push(points[0]);
        Some(Self { ring })
    }
    pub fn ring(&self) -> &[GeoPoint] {
        &self.ring
    }
    /// Even-odd ray casting in the plane of longitude and latitude.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let (x, y) = (point.longitude(), point.latitude());
        let mut inside = false;
        for edge in self.ring.windows(2) {
            let (xi, yi) = (edge[0].longitude(), edge[0].latitude());
            let (xj, yj) = (edge[1].longitude(), edge[1].latitude());
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
        }
        inside
    }
    /// GeoJSON rendering, as the store's geospatial operators expect it.
    pub fn to_geo_json(&self) -> Value {
        let coordinates: Vec<Value> = self
            .ring
            .iter()
            .map(|p| json!([p.longitude(), p.latitude()]))
            .collect();
        json!({ "type": "Polygon", "coordinates": [coordinates] })
    }
}
