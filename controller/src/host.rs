use std::{
    future::IntoFuture,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use heating_common::{
    command_topic, parse_schalter_echo_topic, parse_sensor_topic, parse_switch_payload,
    parse_zone_command_topic, Command, HealthWatchdog, Heating, HeatingError, HeatingStatus,
    Periodic, RuntimeConfig, ZoneCommand, ZoneConfig, TOPIC_SCHALTER_ECHO_FILTER,
    TOPIC_SENSOR_TEMPERATURE_FILTER, TOPIC_STATUS, TOPIC_ZONE_COMMAND_FILTER,
};

use crate::publish::StatePublisher;

#[derive(Clone)]
struct AppState {
    heating: Arc<Mutex<Heating>>,
    reconnected: Arc<AtomicBool>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    healthy: bool,
    boiler: bool,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });

    let now_ms = monotonic_ms();
    let mut heating = Heating::new(runtime.controller.clone());
    for zone in runtime.zones {
        let name = zone.name.clone();
        if let Err(err) = heating.add_zone(zone, now_ms) {
            warn!("skipping stored zone {name:?}: {err}");
        }
    }
    info!("loaded {} zones", heating.zones().len());

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("heating-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        heating: Arc::new(Mutex::new(heating)),
        reconnected: Arc::new(AtomicBool::new(false)),
        mqtt,
        store,
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);
    let control = spawn_control_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/health", get(handle_get_health))
        .route("/api/zones", get(handle_get_zones).post(handle_post_zone))
        .route(
            "/api/zones/{name}",
            get(handle_get_zone)
                .put(handle_put_zone)
                .delete(handle_delete_zone),
        )
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result.context("http server failed")?;
        }
        result = control => {
            result.context("control loop panicked")??;
        }
    }
    Ok(())
}

fn subscribe_topics(mqtt: &AsyncClient) {
    let topics = [
        TOPIC_SENSOR_TEMPERATURE_FILTER,
        TOPIC_SCHALTER_ECHO_FILTER,
        TOPIC_ZONE_COMMAND_FILTER,
    ];

    // The event loop task calls this, so it must not wait on the request queue.
    for topic in topics {
        if let Err(err) = mqtt.try_subscribe(topic, QoS::AtMostOnce) {
            warn!("mqtt subscribe to {topic} failed: {err}");
        }
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    subscribe_topics(&app_state.mqtt);
                    app_state.reconnected.store(true, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Drives the control core. Only returns when the health watchdog trips.
///
/// Nothing in here waits on the MQTT request queue: while the broker is away
/// the queue fills up, and the watchdog has to keep running regardless.
fn spawn_control_loop(app_state: AppState) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let config = app_state.heating.lock().await.config().clone();
        let tick = Duration::from_millis(config.tick_interval_ms.max(100));
        let mut interval = tokio::time::interval(tick);
        let mut status_publish = Periodic::new(config.state_publish_interval_ms);
        let mut watchdog = HealthWatchdog::new(config.unhealthy_restart_ms);
        let mut publisher = StatePublisher::new(app_state.mqtt.clone());

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let (commands, status) = {
                let mut heating = app_state.heating.lock().await;
                let commands = heating.tick(now_ms);
                (commands, heating.status())
            };

            send_commands(&app_state.mqtt, commands);

            publisher.tick(&status);
            if app_state.reconnected.swap(false, Ordering::Relaxed) {
                publisher.force_fire();
            }

            if status_publish.due(now_ms) {
                publish_status(&app_state.mqtt, &status);
            }

            if watchdog.update(status.healthy, now_ms) {
                anyhow::bail!(
                    "heating unhealthy for {} ms, giving up",
                    config.unhealthy_restart_ms
                );
            }
        }
    })
}

/// Queues commands without waiting. A command that does not fit is dropped;
/// the periodic resend delivers it once the broker is back.
fn send_commands(mqtt: &AsyncClient, commands: Vec<Command>) {
    for command in commands {
        let topic = command_topic(&command);
        debug!("sending {} to {topic}", command.payload());
        if let Err(err) =
            mqtt.try_publish(topic.as_str(), QoS::AtLeastOnce, false, command.payload())
        {
            warn!("command publish to {topic} failed: {err}");
        }
    }
}

fn publish_status(mqtt: &AsyncClient, status: &HeatingStatus) {
    match serde_json::to_vec(status) {
        Ok(body) => {
            if let Err(err) = mqtt.try_publish(TOPIC_STATUS, QoS::AtLeastOnce, true, body) {
                warn!("heating status publish failed: {err}");
            }
        }
        Err(err) => warn!("heating status serialization failed: {err}"),
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();
    let now_ms = monotonic_ms();

    if let Some(address) = parse_sensor_topic(&topic) {
        let accepted = match message.parse::<f64>() {
            Ok(celsius) => app_state
                .heating
                .lock()
                .await
                .update_sensor(address, celsius, now_ms),
            Err(_) => false,
        };
        if !accepted {
            debug!("ignoring reading {message:?} from sensor {address}");
        }
        return Ok(());
    }

    if let Some(device) = parse_schalter_echo_topic(&topic) {
        let Some(active) = parse_switch_payload(message) else {
            debug!("ignoring echo {message:?} from {device}");
            return Ok(());
        };
        if !app_state
            .heating
            .lock()
            .await
            .note_echo(&device, active, now_ms)
        {
            debug!("ignoring echo from unconfigured {device}");
        }
        return Ok(());
    }

    if let Some((unique_id, command)) = parse_zone_command_topic(&topic) {
        let changed = {
            let mut heating = app_state.heating.lock().await;
            let Some(name) = heating
                .zone_by_unique_id(unique_id)
                .map(|zone| zone.name().to_string())
            else {
                warn!("command for unknown zone {unique_id}");
                return Ok(());
            };
            match command {
                ZoneCommand::DesiredTemperature => match message.parse::<f64>() {
                    Ok(desired) => heating.set_desired(&name, desired)?,
                    Err(_) => {
                        warn!("invalid desired temperature {message:?} for zone {name}");
                        false
                    }
                },
                ZoneCommand::Mode => match message.to_ascii_lowercase().as_str() {
                    "heat" => heating.set_enabled(&name, true)?,
                    "off" => heating.set_enabled(&name, false)?,
                    _ => {
                        warn!("invalid mode {message:?} for zone {name}");
                        false
                    }
                },
            }
        };
        if changed {
            persist_runtime_from_state(app_state).await?;
        }
    }

    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.heating.lock().await.status();
    Json(status)
}

async fn handle_get_health(State(state): State<AppState>) -> impl IntoResponse {
    let (healthy, boiler) = {
        let heating = state.heating.lock().await;
        (heating.healthcheck(), heating.boiler_on())
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthBody { healthy, boiler }))
}

async fn handle_get_zones(State(state): State<AppState>) -> impl IntoResponse {
    let zones = state.heating.lock().await.zone_configs();
    Json(zones)
}

async fn handle_post_zone(
    State(state): State<AppState>,
    Json(config): Json<ZoneConfig>,
) -> impl IntoResponse {
    let result = {
        let mut heating = state.heating.lock().await;
        let name = config.name.trim().to_string();
        heating
            .add_zone(config, monotonic_ms())
            .and_then(|()| heating.zone_config(&name))
    };

    match result {
        Ok(config) => match persist_runtime_from_state(&state).await {
            Ok(()) => (StatusCode::CREATED, Json(config)).into_response(),
            Err(err) => persist_failed(err),
        },
        Err(err) => heating_error_response(err),
    }
}

async fn handle_get_zone(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.heating.lock().await.zone_config(&name) {
        Ok(config) => Json(config).into_response(),
        Err(err) => heating_error_response(err),
    }
}

async fn handle_put_zone(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(config): Json<ZoneConfig>,
) -> impl IntoResponse {
    let result = {
        let mut heating = state.heating.lock().await;
        let renamed = config.name.trim().to_string();
        heating
            .set_zone_config(&name, config, monotonic_ms())
            .and_then(|()| heating.zone_config(&renamed))
    };

    match result {
        Ok(config) => match persist_runtime_from_state(&state).await {
            Ok(()) => Json(config).into_response(),
            Err(err) => persist_failed(err),
        },
        Err(err) => heating_error_response(err),
    }
}

async fn handle_delete_zone(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let result = state.heating.lock().await.remove_zone(&name);

    match result {
        Ok(config) => match persist_runtime_from_state(&state).await {
            Ok(()) => Json(config).into_response(),
            Err(err) => persist_failed(err),
        },
        Err(err) => heating_error_response(err),
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HEATING_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.heating"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid {}", self.runtime_path.display()))?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let (controller, zones) = {
        let heating = state.heating.lock().await;
        (heating.config().clone(), heating.zone_configs())
    };

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.controller = controller;
    runtime.zones = zones;
    state.store.save_runtime_config(&runtime).await
}

fn heating_error_response(err: HeatingError) -> axum::response::Response {
    let status = match err {
        HeatingError::EmptyZoneName => StatusCode::BAD_REQUEST,
        HeatingError::UnknownZone(_) => StatusCode::NOT_FOUND,
        HeatingError::DuplicateZone(_) => StatusCode::CONFLICT,
    };
    error_response(status, &err.to_string())
}

fn persist_failed(err: anyhow::Error) -> axum::response::Response {
    warn!("failed to persist zone update: {err:#}");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to persist runtime settings",
    )
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
