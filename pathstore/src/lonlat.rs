use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A position in WGS84. Longitude is x, latitude is y. Serializes as a `[lon, lat]` array, the
/// same as GeoJSON positions and OSRM geometry.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct LonLat(pub f64, pub f64);

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> LonLat {
        LonLat(lon, lat)
    }

    pub fn longitude(self) -> f64 {
        self.0
    }

    pub fn latitude(self) -> f64 {
        self.1
    }

    /// GeoJSON positions may carry altitude; it's dropped. Anything shorter than 2 is rejected.
    pub fn from_position(pos: &[f64]) -> Option<LonLat> {
        if pos.len() < 2 {
            return None;
        }
        Some(LonLat(pos[0], pos[1]))
    }
}

impl fmt::Display for LonLat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{}", self.0, self.1)
    }
}

/// Parses waypoints in the `lon,lat;lon,lat;...` form the routing service expects. At least two
/// are required to ask for a route.
pub fn parse_waypoints(raw: &str) -> Result<Vec<LonLat>, StoreError> {
    let mut pts = Vec::new();
    for pair in raw.split(';') {
        let parts: Vec<&str> = pair.split(',').collect();
        if parts.len() != 2 {
            return Err(StoreError::Malformed(format!(
                "waypoint {:?} isn't of the form lon,lat",
                pair
            )));
        }
        let lon = parse_coord(parts[0], pair)?;
        let lat = parse_coord(parts[1], pair)?;
        pts.push(LonLat(lon, lat));
    }
    if pts.len() < 2 {
        return Err(StoreError::Malformed(format!(
            "need at least 2 waypoints, got {}",
            pts.len()
        )));
    }
    Ok(pts)
}

fn parse_coord(x: &str, pair: &str) -> Result<f64, StoreError> {
    match x.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(StoreError::Malformed(format!(
            "waypoint {:?} has a bad number {:?}",
            pair, x
        ))),
    }
}

/// A path whose first and last points are identical, so replaying it never jumps.
#[derive(Clone, PartialEq, Debug)]
pub struct ClosedLoop(Vec<LonLat>);

impl ClosedLoop {
    /// Appends the first point if the path doesn't already end there. Paths with fewer than 2
    /// points aren't routes and are rejected.
    pub fn close(mut pts: Vec<LonLat>) -> Option<ClosedLoop> {
        if pts.len() < 2 {
            return None;
        }
        let first = pts[0];
        if pts[pts.len() - 1] != first {
            pts.push(first);
        }
        Some(ClosedLoop(pts))
    }

    pub fn points(&self) -> &[LonLat] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> LonLat {
        self.0[0]
    }

    pub fn last(&self) -> LonLat {
        self.0[self.0.len() - 1]
    }

    pub fn into_points(self) -> Vec<LonLat> {
        self.0
    }
}
