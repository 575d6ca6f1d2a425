use std::collections::BTreeMap;
use std::sync::Mutex;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};

use pathstore::LonLat;

/// Fake vehicles creeping along the road geometries. Each road feature gets one vehicle, which
/// moves one coordinate further every time positions are requested, wrapping at the end.
///
/// The state lives only in memory and starts over when the process does.
pub struct VehicleSimulator {
    // path_<ordinal> -> index of the coordinate last handed out
    positions: Mutex<BTreeMap<String, usize>>,
}

/// Where one vehicle is after a tick
#[derive(Clone, Debug, PartialEq)]
pub struct VehiclePosition {
    pub vehicle_id: String,
    pub pos: LonLat,
}

impl VehicleSimulator {
    pub fn new() -> VehicleSimulator {
        VehicleSimulator {
            positions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Advances every vehicle by one coordinate. `roads` holds one coordinate sequence per road
    /// feature, in file order; features without coordinates produce no vehicle, but still use up
    /// their ordinal.
    pub fn tick(&self, roads: &[Vec<LonLat>]) -> Vec<VehiclePosition> {
        // Recover from poisoning; the map of counters can't be left half-updated
        let mut positions = self.positions.lock().unwrap_or_else(|err| err.into_inner());

        let mut result = Vec::new();
        for (i, coords) in roads.iter().enumerate() {
            if coords.is_empty() {
                continue;
            }
            let current = positions.entry(format!("path_{}", i)).or_insert(0);
            // The road file may have shrunk since the last tick
            let next = (*current % coords.len() + 1) % coords.len();
            *current = next;
            result.push(VehiclePosition {
                vehicle_id: format!("vehicle_{}", i),
                pos: coords[next],
            });
        }
        result
    }

    pub fn current_index(&self, path_id: &str) -> Option<usize> {
        self.positions
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(path_id)
            .cloned()
    }
}

impl Default for VehicleSimulator {
    fn default() -> Self {
        VehicleSimulator::new()
    }
}

/// One Point feature per vehicle, stamped with `timestamp` (seconds since the Unix epoch).
pub fn to_feature_collection(positions: &[VehiclePosition], timestamp: f64) -> FeatureCollection {
    let features = positions
        .iter()
        .map(|v| {
            let mut properties = JsonObject::new();
            properties.insert("vehicle_id".to_string(), v.vehicle_id.clone().into());
            properties.insert("timestamp".to_string(), timestamp.into());
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![
                    v.pos.longitude(),
                    v.pos.latitude(),
                ]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
