//! Runs the location simulator as an HTTP service.

#[macro_use]
extern crate log;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use structopt::StructOpt;

use locsim::{cancel_token, App, Config};

#[derive(StructOpt)]
#[structopt(name = "locsim", about = "Simulated vehicle and device positions over HTTP")]
struct Args {
    /// The port to run the HTTP server on
    #[structopt(long, default_value = "8000")]
    port: u16,
    /// The address to listen on
    #[structopt(long, default_value = "127.0.0.1")]
    host: IpAddr,
    /// Directory holding road-paths.json and paths.json. Created if missing.
    #[structopt(long = "data_dir", default_value = "data", parse(from_os_str))]
    data_dir: PathBuf,
    /// Base URL of the OSRM server used to generate device paths
    #[structopt(long = "osrm_url", default_value = "http://router.project-osrm.org")]
    osrm_url: String,
    /// Give up on the routing service after this many seconds
    #[structopt(long = "osrm_timeout_secs", default_value = "10")]
    osrm_timeout_secs: u64,
    /// Milliseconds between streamed positions. 0 sends as fast as the client reads.
    #[structopt(long = "stream_interval_ms", default_value = "0")]
    stream_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::from_args();
    locsim::logger::setup();

    let config = Config {
        data_dir: args.data_dir,
        osrm_url: args.osrm_url,
        osrm_timeout: Duration::from_secs(args.osrm_timeout_secs),
        stream_interval: Duration::from_millis(args.stream_interval_ms),
    };
    info!("Serving files from {}", config.data_dir.display());
    if !config.data_dir.join(pathstore::ROAD_PATHS_FILE).exists() {
        warn!(
            "No {} yet; road and vehicle requests will 404 until it's added",
            pathstore::ROAD_PATHS_FILE
        );
    }

    let (trigger, cancel) = cancel_token();
    let app = Arc::new(App::new(config, cancel)?);

    let shutdown = async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Can't listen for ctrl-c: {}", err);
            return std::future::pending().await;
        }
        info!("Shutting down");
        // Open streams never end on their own, so stop them before waiting on connections
        trigger.cancel();
    };

    let (_, server) = locsim::bind(app, SocketAddr::new(args.host, args.port), shutdown)?;
    server.await?;
    Ok(())
}
