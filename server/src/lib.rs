//! A small location simulator. It serves static road geometry, moves fake vehicles along it,
//! fetches driving loops for devices from OSRM, and replays those loops over Server-Sent Events.

#[macro_use]
extern crate log;

mod app;
mod error;
mod http;
pub mod logger;
mod osrm;
mod stream;
mod vehicles;

pub use crate::app::{App, Config, GeneratedPath};
pub use crate::error::ApiError;
pub use crate::http::{bind, serve_req};
pub use crate::osrm::OSRM;
pub use crate::stream::{
    cancel_token, CancelToken, CancelTrigger, LiveStreams, PositionFrame, PositionReplay,
};
pub use crate::vehicles::{to_feature_collection, VehiclePosition, VehicleSimulator};

/// Fractional seconds since the Unix epoch
pub(crate) fn unix_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
