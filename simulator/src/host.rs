use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tracing::{debug, info, warn};

use heating_common::{
    parse_schalter_command_topic, parse_switch_payload, schalter_echo_topic,
    sensor_temperature_topic, DeviceAddress, RuntimeConfig, SensorConfig,
    TOPIC_BOILER, TOPIC_SCHALTER_COMMAND_FILTER,
};

const SENSOR_BUS: &str = "sim";
const START_CELSIUS: f64 = 19.0;
const WARMING_C_PER_S: f64 = 0.01;
const COOLING_C_PER_S: f64 = 0.004;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addresses = sensor_addresses().await?;
    if addresses.is_empty() {
        warn!("no sensor addresses configured, only echoing switch commands");
    }

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let interval_s = std::env::var("SIM_INTERVAL_S")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(10)
        .max(1);
    let echo_delay = Duration::from_millis(
        std::env::var("SIM_ECHO_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(500),
    );

    let mut mqtt_options = MqttOptions::new("heating-simulator", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let boiler = Arc::new(AtomicBool::new(false));
    spawn_mqtt_loop(mqtt.clone(), eventloop, Arc::clone(&boiler), echo_delay);

    info!("simulating {} sensors every {interval_s} s", addresses.len());

    let mut rooms: Vec<(String, f64)> = addresses
        .into_iter()
        .enumerate()
        .map(|(index, address)| (address, START_CELSIUS + index as f64 * 0.3))
        .collect();
    let mut interval = tokio::time::interval(Duration::from_secs(interval_s));

    loop {
        interval.tick().await;
        let heating = boiler.load(Ordering::Relaxed);

        for (address, celsius) in &mut rooms {
            *celsius = step_temperature(*celsius, heating, interval_s);
            mqtt.publish(
                sensor_temperature_topic(SENSOR_BUS, address),
                QoS::AtLeastOnce,
                false,
                format!("{celsius:.2}"),
            )
            .await
            .context("failed to publish simulated temperature")?;
        }
    }
}

fn spawn_mqtt_loop(
    mqtt: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    boiler: Arc<AtomicBool>,
    echo_delay: Duration,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let Ok(payload) = std::str::from_utf8(&message.payload) else {
                        continue;
                    };
                    let Some(on) = parse_switch_payload(payload) else {
                        debug!("ignoring {payload:?} on {}", message.topic);
                        continue;
                    };
                    if message.topic == TOPIC_BOILER {
                        if boiler.swap(on, Ordering::Relaxed) != on {
                            info!("boiler is now {}", if on { "ON" } else { "OFF" });
                        }
                    } else if let Some(device) = parse_schalter_command_topic(&message.topic) {
                        spawn_echo(mqtt.clone(), device, on, echo_delay);
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    for topic in [TOPIC_SCHALTER_COMMAND_FILTER, TOPIC_BOILER] {
                        if let Err(err) = mqtt.try_subscribe(topic, QoS::AtMostOnce) {
                            warn!("mqtt subscribe to {topic} failed: {err}");
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("simulator mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Confirms a switch command after the simulated relay delay.
fn spawn_echo(mqtt: AsyncClient, device: DeviceAddress, on: bool, delay: Duration) {
    let DeviceAddress::Schalter { address, index } = device else {
        return;
    };
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let payload = if on { "ON" } else { "OFF" };
        if let Err(err) = mqtt
            .publish(schalter_echo_topic(&address, index), QoS::AtLeastOnce, false, payload)
            .await
        {
            warn!("echo for schalter {address}/{index} failed: {err}");
        }
    });
}

/// Sensor addresses from `SIM_SENSORS` (comma separated) or, failing that,
/// from the controller's stored zone list.
async fn sensor_addresses() -> anyhow::Result<Vec<String>> {
    if let Ok(list) = std::env::var("SIM_SENSORS") {
        return Ok(list
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect());
    }

    let path = std::env::var("HEATING_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.heating"))
        .join("runtime.json");
    let runtime = match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid {}", path.display()))?,
        Err(err) => {
            warn!("cannot read {}: {err}", path.display());
            RuntimeConfig::default()
        }
    };

    let mut addresses = Vec::new();
    for zone in &runtime.zones {
        collect_addresses(&zone.sensor, &mut addresses);
    }
    Ok(addresses)
}

fn collect_addresses(config: &SensorConfig, addresses: &mut Vec<String>) {
    match config {
        SensorConfig::Address(address) => {
            let address = address.trim();
            if !address.is_empty() && !addresses.iter().any(|known| known == address) {
                addresses.push(address.to_string());
            }
        }
        SensorConfig::Chain(members) => {
            for member in members {
                collect_addresses(member, addresses);
            }
        }
        SensorConfig::None => {}
    }
}

fn step_temperature(celsius: f64, heating: bool, elapsed_s: u64) -> f64 {
    let rate = if heating {
        WARMING_C_PER_S
    } else {
        -COOLING_C_PER_S
    };
    (celsius + rate * elapsed_s as f64).clamp(10.0, 28.0)
}
