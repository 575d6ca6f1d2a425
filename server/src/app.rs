use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use hyper::Body;
use serde::Serialize;

use pathstore::{
    parse_waypoints, ClosedLoop, DevicePaths, LonLat, RoadPaths, DEVICE_PATHS_FILE,
    ROAD_PATHS_FILE,
};

use crate::error::ApiError;
use crate::osrm::OSRM;
use crate::stream::{CancelToken, LiveStreams, PositionReplay};
use crate::vehicles::{to_feature_collection, VehicleSimulator};

/// Everything needed to build an `App`. `locsim`'s flags fill this in.
#[derive(Clone, Debug)]
pub struct Config {
    /// Holds `road-paths.json` and `paths.json`
    pub data_dir: PathBuf,
    pub osrm_url: String,
    pub osrm_timeout: Duration,
    /// Pause between streamed positions. Zero means as fast as the subscriber reads.
    pub stream_interval: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            data_dir: PathBuf::from("data"),
            osrm_url: "http://router.project-osrm.org".to_string(),
            osrm_timeout: Duration::from_secs(10),
            stream_interval: Duration::ZERO,
        }
    }
}

/// State shared by every request.
pub struct App {
    pub road_paths: RoadPaths,
    pub device_paths: DevicePaths,
    pub vehicles: VehicleSimulator,
    osrm: OSRM,
    stream_interval: Duration,
    cancel: CancelToken,
    live_streams: LiveStreams,
}

/// Reply to a successful path generation
#[derive(Debug, Serialize)]
pub struct GeneratedPath {
    pub message: String,
    pub points: usize,
    pub first: LonLat,
    pub last: LonLat,
}

impl App {
    /// Creates the data directory if needed. Streams stop when `cancel` fires.
    pub fn new(config: Config, cancel: CancelToken) -> Result<App> {
        fs_err::create_dir_all(&config.data_dir)?;
        Ok(App {
            road_paths: RoadPaths::new(config.data_dir.join(ROAD_PATHS_FILE)),
            device_paths: DevicePaths::new(config.data_dir.join(DEVICE_PATHS_FILE)),
            vehicles: VehicleSimulator::new(),
            osrm: OSRM::new(config.osrm_url, config.osrm_timeout)
                .context("building the routing client")?,
            stream_interval: config.stream_interval,
            cancel,
            live_streams: LiveStreams::default(),
        })
    }

    // The road and device files are small, so the handlers below read them inline on the runtime
    // worker. Only the device path write goes through the blocking pool.

    pub fn get_road_paths(&self) -> Result<serde_json::Value, ApiError> {
        Ok(self.road_paths.load_raw()?)
    }

    pub fn get_vehicles(&self) -> Result<geojson::FeatureCollection, ApiError> {
        let roads = self.road_paths.load_coordinates()?;
        let positions = self.vehicles.tick(&roads);
        Ok(to_feature_collection(&positions, crate::unix_timestamp()))
    }

    /// Routes through `coords` (`lon,lat;lon,lat;...`), closes the route into a loop, and stores
    /// it for `device_id`.
    pub async fn generate_path(
        &self,
        device_id: &str,
        coords: &str,
    ) -> Result<GeneratedPath, ApiError> {
        if device_id.is_empty() {
            return Err(ApiError::BadRequest("device_id can't be empty".to_string()));
        }
        let waypoints = parse_waypoints(coords)
            .map_err(|err| ApiError::BadRequest(format!("bad coords: {}", err)))?;

        let route = self.osrm.pathfind(&waypoints).await?;
        let num_pts = route.len();
        let path = ClosedLoop::close(route).ok_or_else(|| {
            ApiError::UpstreamInvalid(format!(
                "route for {} has only {} point(s)",
                device_id, num_pts
            ))
        })?;
        self.device_paths.save(device_id, &path).await?;

        Ok(GeneratedPath {
            message: format!("{} path saved", device_id),
            points: path.len(),
            first: path.first(),
            last: path.last(),
        })
    }

    /// Looks up the device's loop now, so a missing device fails before any stream opens.
    pub fn start_stream(&self, device_id: &str) -> Result<Body, ApiError> {
        let path = self.device_paths.get(device_id)?;
        let replay = PositionReplay::new(device_id.to_string(), path);
        Ok(crate::stream::spawn(
            replay,
            self.stream_interval,
            self.cancel.clone(),
            &self.live_streams,
        ))
    }

    /// Streams still feeding a subscriber
    pub fn live_streams(&self) -> usize {
        self.live_streams.count()
    }
}
