use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    actuator::ActuatorState,
    config::{ActuatorConfig, ZoneConfig},
    group::ActuatorNode,
    plant::Plant,
    requests::RequesterId,
    sensor::{SensorNode, SensorState},
    types::ZoneStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    Init,
    Off,
    On,
    OpenValve,
    CloseValve,
    Error,
}

impl ZoneState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Off => "wait",
            Self::On => "heat",
            Self::OpenValve => "open valve",
            Self::CloseValve => "close valve",
            Self::Error => "error",
        }
    }
}

/// One independently controlled heating area.
///
/// The zone reads its sensor, decides whether it wants heat and asks its
/// valve to open first; the boiler is only wanted once the valve has
/// confirmed it is fully open.
#[derive(Debug, Clone)]
pub struct Zone {
    name: String,
    desired: f64,
    hysteresis: f64,
    enabled: bool,
    requester: RequesterId,
    sensor: SensorNode,
    valve: Option<ActuatorNode>,
    state: ZoneState,
}

impl Zone {
    pub fn new(mut config: ZoneConfig, plant: &mut Plant, now_ms: u64) -> Self {
        config.sanitize();
        let sensor = SensorNode::build(&config.sensor, &mut plant.sensors, now_ms);
        let valve = ActuatorNode::build(
            &config.valve,
            &mut plant.actuators,
            &mut plant.requesters,
            now_ms,
        );
        Self {
            name: config.name,
            desired: config.desired,
            hysteresis: config.hysteresis,
            enabled: config.enabled,
            requester: plant.requesters.allocate(),
            sensor,
            valve,
            state: ZoneState::Init,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short, topic-safe identity derived from the name.
    pub fn unique_id(&self) -> String {
        unique_id(&self.name)
    }

    pub fn state(&self) -> ZoneState {
        self.state
    }

    pub fn desired(&self) -> f64 {
        self.desired
    }

    pub fn hysteresis(&self) -> f64 {
        self.hysteresis
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn reading(&self, plant: &Plant) -> f64 {
        self.sensor.reading(&plant.sensors)
    }

    pub fn valve_state(&self, plant: &Plant) -> Option<ActuatorState> {
        self.valve.as_ref().map(|v| v.state(&plant.actuators))
    }

    pub fn boiler_desired_state(&self) -> bool {
        self.state == ZoneState::On
    }

    pub fn valve_desired_state(&self) -> bool {
        matches!(self.state, ZoneState::On | ZoneState::OpenValve)
    }

    pub fn healthcheck(&self) -> bool {
        self.state != ZoneState::Error
    }

    pub fn set_desired(&mut self, desired: f64) -> bool {
        let mut config = ZoneConfig::new(self.name.clone());
        config.desired = desired;
        config.sanitize();
        if (self.desired - config.desired).abs() > f64::EPSILON {
            self.desired = config.desired;
            true
        } else {
            false
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled != enabled {
            self.enabled = enabled;
            true
        } else {
            false
        }
    }

    pub fn config(&self, plant: &Plant) -> ZoneConfig {
        ZoneConfig {
            name: self.name.clone(),
            desired: self.desired,
            hysteresis: self.hysteresis,
            enabled: self.enabled,
            sensor: self.sensor.config(&plant.sensors),
            valve: self.valve_config(plant),
        }
    }

    /// Applies new settings. The sensor and valve topologies are rebuilt only
    /// when their descriptors changed, so a setpoint tweak does not reset
    /// any device state.
    pub fn apply_config(&mut self, mut config: ZoneConfig, plant: &mut Plant, now_ms: u64) {
        config.sanitize();

        if self.sensor.config(&plant.sensors) != config.sensor {
            info!(
                "zone {} switching sensor from {} to {:?}",
                self.name,
                self.sensor.describe(&plant.sensors),
                config.sensor
            );
            self.sensor = SensorNode::build(&config.sensor, &mut plant.sensors, now_ms);
        }

        if self.valve_config(plant) != config.valve {
            self.release(plant);
            self.valve = ActuatorNode::build(
                &config.valve,
                &mut plant.actuators,
                &mut plant.requesters,
                now_ms,
            );
            info!(
                "zone {} valve is now {}",
                self.name,
                self.valve
                    .as_ref()
                    .map(|v| v.describe(&plant.actuators))
                    .unwrap_or_else(|| "none".to_string())
            );
        }

        self.name = config.name;
        self.desired = config.desired;
        self.hysteresis = config.hysteresis;
        self.enabled = config.enabled;
    }

    /// Withdraws every request this zone has placed on its valve topology
    /// and lets go of its devices.
    pub fn release(&mut self, plant: &mut Plant) {
        if let Some(valve) = &mut self.valve {
            valve.release(&mut plant.actuators, self.requester);
        }
    }

    /// One control step. Leaf sensors and physical actuators must already
    /// have been ticked for this pass; the demand registered here is acted
    /// upon during the next pass.
    pub fn tick(&mut self, plant: &mut Plant) {
        self.sensor.tick(&plant.sensors);
        if let Some(valve) = &mut self.valve {
            valve.tick(&mut plant.actuators);
        }

        let next = self.next_state(
            self.sensor.reading(&plant.sensors),
            self.sensor.state(&plant.sensors),
            self.valve_state(plant),
        );
        self.set_state(next);

        let demand = self.valve_desired_state();
        if let Some(valve) = &mut self.valve {
            valve.set_request(&mut plant.actuators, self.requester, demand);
        }
    }

    pub fn status(&self, plant: &Plant) -> ZoneStatus {
        let reading = self.reading(plant);
        ZoneStatus {
            name: self.name.clone(),
            unique_id: self.unique_id(),
            reading: (!reading.is_nan()).then_some(reading),
            desired: self.desired,
            hysteresis: self.hysteresis,
            enabled: self.enabled,
            state: self.state.as_str(),
            sensor_state: self.sensor.state(&plant.sensors).as_str(),
            valve_state: self.valve_state(plant).map(ActuatorState::as_str),
            boiler_demand: self.boiler_desired_state(),
            valve_demand: self.valve_desired_state(),
            healthy: self.healthcheck(),
        }
    }

    fn valve_config(&self, plant: &Plant) -> ActuatorConfig {
        self.valve
            .as_ref()
            .map(|v| v.config(&plant.actuators))
            .unwrap_or_default()
    }

    fn next_state(
        &self,
        reading: f64,
        sensor_state: SensorState,
        valve: Option<ActuatorState>,
    ) -> ZoneState {
        let valve_failed = valve == Some(ActuatorState::Error);
        let error = valve_failed || reading.is_nan();
        let comms_timeout = valve_failed || sensor_state == SensorState::Error;

        // Half-width band around the setpoint: the API documents "desired ±
        // hysteresis" as the total width.
        let half_band = self.hysteresis / 2.0;
        let cold = self.enabled && reading <= self.desired - half_band;
        let warm = !self.enabled || reading >= self.desired + half_band;

        // Without a valve there is nothing to wait for.
        let (fully_open, fully_closed) = match valve {
            None => (true, true),
            Some(state) => (state == ActuatorState::Open, state == ActuatorState::Closed),
        };
        let heat = if valve.is_some() {
            ZoneState::OpenValve
        } else {
            ZoneState::On
        };
        let stop = if valve.is_some() {
            ZoneState::CloseValve
        } else {
            ZoneState::Off
        };

        match self.state {
            ZoneState::Init if comms_timeout => ZoneState::Error,
            ZoneState::Init if !error => ZoneState::Off,
            ZoneState::Init => ZoneState::Init,
            ZoneState::Error if error => ZoneState::Error,
            ZoneState::Error => ZoneState::Off,
            ZoneState::Off | ZoneState::CloseValve => {
                if error {
                    ZoneState::Error
                } else if cold {
                    heat
                } else if fully_closed {
                    ZoneState::Off
                } else {
                    ZoneState::CloseValve
                }
            }
            ZoneState::On | ZoneState::OpenValve => {
                if error {
                    ZoneState::Error
                } else if warm {
                    stop
                } else if fully_open {
                    ZoneState::On
                } else {
                    ZoneState::OpenValve
                }
            }
        }
    }

    fn set_state(&mut self, state: ZoneState) {
        if self.state == state {
            return;
        }
        info!(
            "zone {} changing state from {} to {}",
            self.name,
            self.state.as_str(),
            state.as_str()
        );
        self.state = state;
    }
}

pub fn unique_id(name: &str) -> String {
    Sha256::digest(name.as_bytes())
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
