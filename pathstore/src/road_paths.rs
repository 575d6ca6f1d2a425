use std::path::PathBuf;

use geojson::{GeoJson, Value};

use crate::error::{StoreError, StoreResult};
use crate::io::read_json;
use crate::lonlat::LonLat;

const MISSING: &str = "Road paths file not found.";

/// The static road geometry document. It's produced outside this service and never written here,
/// so every call re-reads the file.
pub struct RoadPaths {
    path: PathBuf,
}

impl RoadPaths {
    pub fn new(path: PathBuf) -> RoadPaths {
        RoadPaths { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// The document exactly as parsed, for clients that render it themselves.
    pub fn load_raw(&self) -> StoreResult<serde_json::Value> {
        read_json(&self.path, MISSING)
    }

    /// One coordinate sequence per feature, in file order. A feature without usable line geometry
    /// still occupies its slot, with no coordinates.
    pub fn load_coordinates(&self) -> StoreResult<Vec<Vec<LonLat>>> {
        let raw = self.load_raw()?;
        let fc = match GeoJson::from_json_value(raw) {
            Ok(GeoJson::FeatureCollection(fc)) => fc,
            Ok(_) => {
                return Err(StoreError::Malformed(format!(
                    "{} isn't a FeatureCollection",
                    self.path.display()
                )));
            }
            Err(err) => {
                return Err(StoreError::Malformed(format!(
                    "{} isn't valid GeoJSON: {}",
                    self.path.display(),
                    err
                )));
            }
        };

        let mut result = Vec::new();
        for (idx, feature) in fc.features.into_iter().enumerate() {
            let pts = match feature.geometry {
                Some(geom) => coordinates(&geom.value),
                None => Vec::new(),
            };
            if pts.is_empty() {
                warn!("Road feature {} has no line geometry; skipping it", idx);
            }
            result.push(pts);
        }
        Ok(result)
    }
}

fn coordinates(value: &Value) -> Vec<LonLat> {
    match value {
        Value::Point(pos) => LonLat::from_position(pos).into_iter().collect(),
        Value::LineString(line) => line
            .iter()
            .filter_map(|pos| LonLat::from_position(pos))
            .collect(),
        Value::MultiLineString(lines) => lines
            .iter()
            .flatten()
            .filter_map(|pos| LonLat::from_position(pos))
            .collect(),
        _ => Vec::new(),
    }
}
