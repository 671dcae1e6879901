#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use daytopper_rs::api::ApiClient;
use daytopper_rs::coordinator::Coordinator;
use daytopper_rs::model::DeviceIdentity;
use daytopper_rs::sensor::{self, Sensor};
use daytopper_rs::Error;
use rocket::http::ContentType;
use rocket::State;
use std::process;
use std::sync::Arc;
use std::time::Duration;

mod metrics;

const DEFAULT_HOST: &str = "http://daytopper.local";
const DEFAULT_INTERVAL_SECS: i64 =
    daytopper_rs::coordinator::DEFAULT_SCAN_INTERVAL.as_secs() as i64;

#[derive(Clone, serde::Deserialize)]
pub struct DaytopperConfig {
    host: String,
    interval: u64,
}

/// Structure containing state for the route handlers.
pub struct StateData {
    coordinator: Arc<Coordinator>,
    sensors: Vec<Sensor>,
    device: DeviceIdentity,
}

pub fn read_settings() -> DaytopperConfig {
    let mut settings = Config::default();
    settings
        .merge(config::Environment::with_prefix("DT"))
        .unwrap()
        .set_default("host", DEFAULT_HOST)
        .unwrap()
        .set_default("interval", DEFAULT_INTERVAL_SECS)
        .unwrap();

    settings.try_into().expect("Configuration error")
}

#[derive(serde::Serialize)]
struct StatusBody<'a> {
    ready: bool,
    attempts: u64,
    last_error: Option<String>,
    last_update: Option<String>,
    device: &'a DeviceIdentity,
}

fn render_status(state: &StateData) -> Result<String, Error> {
    let current = state.coordinator.current();
    let body = StatusBody {
        ready: current.snapshot.is_some(),
        attempts: current.attempts,
        last_update: current
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.last_update().map(String::from)),
        last_error: current.last_error,
        device: &state.device,
    };

    serde_json::to_string(&body).or(Err(Error::Format))
}

#[get("/metrics")]
fn metrics_route(state: &State<StateData>) -> Result<String, Error> {
    let snapshot = state.coordinator.current().snapshot.ok_or(Error::NotReady)?;
    metrics::collect(&state.sensors, &snapshot, &state.device);
    metrics::read()
}

#[get("/status")]
fn status_route(state: &State<StateData>) -> Result<(ContentType, String), Error> {
    render_status(state).map(|body| (ContentType::JSON, body))
}

/* An explicit reload. Coalesces with any refresh already in flight. */
#[post("/refresh")]
async fn refresh_route(state: &State<StateData>) -> Result<(ContentType, String), Error> {
    state.coordinator.refresh().await;
    render_status(state).map(|body| (ContentType::JSON, body))
}

#[rocket::main]
async fn main() {
    env_logger::init();

    let settings = read_settings();
    let host = settings.host.trim_end_matches('/').to_string();

    let endpoint = match daytopper_rs::validate_host(&host) {
        Ok(url) => url,
        Err(error) => {
            log::error!("Refusing to start: {}", error);
            process::exit(2);
        }
    };

    let client = match ApiClient::new(endpoint) {
        Ok(client) => client,
        Err(error) => {
            log::error!("Error building the HTTP client: {}", error);
            process::exit(2);
        }
    };
    if !client.probe().await {
        log::error!("Cannot connect to the Daytopper device at {}", host);
        process::exit(2);
    }

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(client),
        Duration::from_secs(settings.interval),
    ));

    /* The first refresh is mandatory: without one complete snapshot there is
     * nothing to enumerate sensors from, so a failure here ends the process. */
    let snapshot = match coordinator.first_refresh().await {
        Ok(snapshot) => snapshot,
        Err(error) => {
            log::error!("First refresh failed, not ready: {}", error);
            process::exit(1);
        }
    };

    let sensors = sensor::build_sensors(&snapshot);
    let device = DeviceIdentity::from_snapshot(&snapshot, &host);
    log::debug!(
        "Projecting {} sensors for device {}",
        sensors.len(),
        device.chip_id
    );

    let _poll = coordinator.spawn();

    let state = StateData {
        coordinator,
        sensors,
        device,
    };
    let server = rocket::build()
        .manage(state)
        .mount("/", routes![metrics_route, status_route, refresh_route]);

    if let Err(error) = server.launch().await {
        log::error!("HTTP server error: {}", error);
        process::exit(1);
    }
}
