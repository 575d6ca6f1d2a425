use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use pathstore::LonLat;

use crate::error::ApiError;

/// Asks an [OSRM](http://project-osrm.org/) server for driving routes. No routing happens here.
pub struct OSRM {
    client: Client,
    address: String,
}

impl OSRM {
    /// `address` is the base URL, like `http://router.project-osrm.org`. Every request, including
    /// reading the body, gives up after `timeout`.
    pub fn new(address: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
        })
    }

    pub fn route_url(&self, waypoints: &[LonLat]) -> String {
        let coords = waypoints
            .iter()
            .map(|pt| pt.to_string())
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/route/v1/driving/{}?overview=full&geometries=geojson",
            self.address, coords
        )
    }

    /// The full geometry of the first route through all waypoints, in order.
    pub async fn pathfind(&self, waypoints: &[LonLat]) -> Result<Vec<LonLat>, ApiError> {
        let url = self.route_url(waypoints);
        debug!("Requesting {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ApiError::UpstreamFailure(err.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| ApiError::UpstreamFailure(err.to_string()))?;
        parse_route(status, &body)
    }
}

fn parse_route(status: StatusCode, body: &str) -> Result<Vec<LonLat>, ApiError> {
    let resp: Response = match serde_json::from_str(body) {
        Ok(resp) => resp,
        Err(err) => {
            return Err(ApiError::UpstreamInvalid(if status.is_success() {
                format!("couldn't parse response: {}", err)
            } else {
                format!("HTTP {}", status)
            }));
        }
    };
    if !status.is_success() || resp.code != "Ok" {
        return Err(ApiError::UpstreamInvalid(match resp.message {
            Some(msg) => format!("HTTP {}, code {}: {}", status, resp.code, msg),
            None => format!("HTTP {}, code {}", status, resp.code),
        }));
    }
    match resp.routes.into_iter().next() {
        Some(route) => Ok(route.geometry.coordinates),
        None => Err(ApiError::UpstreamInvalid("no routes returned".to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<LonLat>,
}
