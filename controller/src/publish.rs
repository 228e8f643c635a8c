use std::collections::HashMap;

use rumqttc::{AsyncClient, QoS};
use tracing::{debug, warn};

use heating_common::{
    zone_topic, HeatingStatus, Watch, ZoneStatus, TOPIC_PROBLEM, ZONE_ACTION,
    ZONE_CURRENT_TEMPERATURE, ZONE_DESIRED_TEMPERATURE, ZONE_MODE, ZONE_STATE,
};

/// Retained per-zone state topics, republished only when a value changes.
pub struct StatePublisher {
    mqtt: AsyncClient,
    problem: Watch<String>,
    zones: HashMap<String, ZoneWatches>,
}

struct ZoneWatches {
    current_temperature: Watch<String>,
    desired_temperature: Watch<String>,
    action: Watch<String>,
    mode: Watch<String>,
    state: Watch<String>,
}

impl ZoneWatches {
    fn new(mqtt: &AsyncClient, unique_id: &str) -> Self {
        Self {
            current_temperature: zone_watch(mqtt, unique_id, ZONE_CURRENT_TEMPERATURE),
            desired_temperature: zone_watch(mqtt, unique_id, ZONE_DESIRED_TEMPERATURE),
            action: zone_watch(mqtt, unique_id, ZONE_ACTION),
            mode: zone_watch(mqtt, unique_id, ZONE_MODE),
            state: zone_watch(mqtt, unique_id, ZONE_STATE),
        }
    }

    fn tick(&mut self, zone: &ZoneStatus) {
        self.current_temperature.tick(match zone.reading {
            Some(celsius) => format!("{celsius:.1}"),
            None => "None".to_string(),
        });
        self.desired_temperature.tick(format!("{:.1}", zone.desired));
        self.action
            .tick(if zone.boiler_demand { "heating" } else { "idle" }.to_string());
        self.mode
            .tick(if zone.enabled { "heat" } else { "off" }.to_string());
        self.state.tick(zone.state.to_string());
    }

    fn force_fire(&mut self) {
        self.current_temperature.force_fire();
        self.desired_temperature.force_fire();
        self.action.force_fire();
        self.mode.force_fire();
        self.state.force_fire();
    }
}

impl StatePublisher {
    pub fn new(mqtt: AsyncClient) -> Self {
        Self {
            problem: retained_watch(&mqtt, TOPIC_PROBLEM.to_string()),
            mqtt,
            zones: HashMap::new(),
        }
    }

    pub fn tick(&mut self, status: &HeatingStatus) {
        self.problem
            .tick(if status.healthy { "OFF" } else { "ON" }.to_string());

        self.zones
            .retain(|unique_id, _| status.zones.iter().any(|z| &z.unique_id == unique_id));
        for zone in &status.zones {
            let mqtt = &self.mqtt;
            self.zones
                .entry(zone.unique_id.clone())
                .or_insert_with(|| ZoneWatches::new(mqtt, &zone.unique_id))
                .tick(zone);
        }
    }

    /// Republishes every last known value, e.g. after the broker connection
    /// was re-established. Whatever does not fit into the request queue is
    /// published again by the following ticks.
    pub fn force_fire(&mut self) {
        self.problem.force_fire();
        for watches in self.zones.values_mut() {
            watches.force_fire();
        }
    }
}

fn zone_watch(mqtt: &AsyncClient, unique_id: &str, field: &str) -> Watch<String> {
    retained_watch(mqtt, zone_topic(unique_id, field))
}

fn retained_watch(mqtt: &AsyncClient, topic: String) -> Watch<String> {
    let mqtt = mqtt.clone();
    Watch::new(move |payload: &String| {
        debug!("publishing {payload} to {topic}");
        match mqtt.try_publish(topic.as_str(), QoS::AtLeastOnce, true, payload.as_bytes()) {
            Ok(()) => true,
            Err(err) => {
                warn!("state publish to {topic} failed: {err}");
                false
            }
        }
    })
}
