use crate::{
    actuator::{ActuatorBank, ActuatorTiming},
    config::ControllerConfig,
    requests::RequesterIds,
    sensor::SensorBank,
    types::Command,
};

/// Every physical sensor and actuator known to the controller, plus the
/// requester identities handed out to zones and groups.
#[derive(Debug)]
pub struct Plant {
    pub sensors: SensorBank,
    pub actuators: ActuatorBank,
    pub requesters: RequesterIds,
}

impl Plant {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            sensors: SensorBank::new(config.sensor_stale_timeout_ms),
            actuators: ActuatorBank::new(ActuatorTiming {
                echo_timeout_ms: config.echo_timeout_ms,
                resend_interval_ms: config.command_resend_interval_ms,
            }),
            requesters: RequesterIds::default(),
        }
    }

    /// Ages every leaf sensor and steps every physical actuator with the
    /// demand registered during the previous pass.
    pub fn tick(&mut self, now_ms: u64, commands: &mut Vec<Command>) {
        self.sensors.tick(now_ms);
        self.actuators.tick(now_ms, commands);
    }
}
