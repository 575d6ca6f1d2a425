//! The two JSON documents the simulator works from: a static file of road geometries, and a
//! file of per-device driving loops that grows as routes are generated. This crate finds, reads,
//! and writes them; it knows nothing about HTTP.

#[macro_use]
extern crate log;

pub use crate::device_paths::DevicePaths;
pub use crate::error::StoreError;
pub use crate::io::{read_json, to_json, write_json_atomic};
pub use crate::lonlat::{parse_waypoints, ClosedLoop, LonLat};
pub use crate::road_paths::RoadPaths;

mod device_paths;
mod error;
mod io;
mod lonlat;
mod road_paths;

/// Name of the static road geometry document inside the data directory
pub const ROAD_PATHS_FILE: &str = "road-paths.json";
/// Name of the generated device path document inside the data directory
pub const DEVICE_PATHS_FILE: &str = "paths.json";
