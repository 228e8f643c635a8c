use serde::Serialize;

use crate::actuator::DeviceAddress;

/// Outbound instruction for the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Actuator { device: DeviceAddress, on: bool },
    Boiler { on: bool },
}

impl Command {
    pub fn payload(&self) -> &'static str {
        let on = match self {
            Self::Actuator { on, .. } | Self::Boiler { on } => *on,
        };
        if on {
            "ON"
        } else {
            "OFF"
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub name: String,
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    /// `None` while no trustworthy reading is available.
    pub reading: Option<f64>,
    pub desired: f64,
    pub hysteresis: f64,
    pub enabled: bool,
    pub state: &'static str,
    #[serde(rename = "sensorState")]
    pub sensor_state: &'static str,
    #[serde(rename = "valveState")]
    pub valve_state: Option<&'static str>,
    #[serde(rename = "boilerDemand")]
    pub boiler_demand: bool,
    #[serde(rename = "valveDemand")]
    pub valve_demand: bool,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActuatorStatus {
    pub device: String,
    pub state: &'static str,
    pub requested: bool,
    /// Last confirmed output, `None` until the device has reported.
    pub echo: Option<bool>,
    #[serde(rename = "travelTimeMs")]
    pub travel_time_ms: u64,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatingStatus {
    pub boiler: bool,
    pub healthy: bool,
    pub zones: Vec<ZoneStatus>,
    pub actuators: Vec<ActuatorStatus>,
}
