use serde::{Deserialize, Serialize};

pub const DEFAULT_DESIRED_C: f64 = 21.0;
pub const DEFAULT_HYSTERESIS_C: f64 = 0.5;
pub const DEFAULT_SWITCH_TIME_S: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub sensor_stale_timeout_ms: u64,
    pub echo_timeout_ms: u64,
    pub command_resend_interval_ms: u64,
    pub boiler_resend_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub state_publish_interval_ms: u64,
    pub unhealthy_restart_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sensor_stale_timeout_ms: 300_000,
            echo_timeout_ms: 120_000,
            command_resend_interval_ms: 30_000,
            boiler_resend_interval_ms: 30_000,
            tick_interval_ms: 1_000,
            state_publish_interval_ms: 10_000,
            unhealthy_restart_ms: 900_000,
        }
    }
}

/// Where a zone reads its temperature from.
///
/// Serialized untagged: `null` for no sensor, a string for a single sensor
/// address, a list for a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorConfig {
    Address(String),
    Chain(Vec<SensorConfig>),
    #[default]
    None,
}

/// Topology of the valve (or valves) serving a zone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActuatorConfig {
    #[default]
    None,
    Local {
        #[serde(default = "default_switch_time")]
        switch_time: u64,
    },
    Schalter {
        #[serde(default)]
        address: String,
        #[serde(default)]
        index: u32,
        #[serde(default = "default_switch_time")]
        switch_time: u64,
    },
    Set {
        #[serde(default)]
        members: Vec<ActuatorConfig>,
    },
    Sequence {
        #[serde(default)]
        members: Vec<ActuatorConfig>,
    },
}

fn default_switch_time() -> u64 {
    DEFAULT_SWITCH_TIME_S
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default = "default_desired")]
    pub desired: f64,
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub valve: ActuatorConfig,
}

fn default_desired() -> f64 {
    DEFAULT_DESIRED_C
}

fn default_hysteresis() -> f64 {
    DEFAULT_HYSTERESIS_C
}

fn default_enabled() -> bool {
    true
}

impl ZoneConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desired: DEFAULT_DESIRED_C,
            hysteresis: DEFAULT_HYSTERESIS_C,
            enabled: true,
            sensor: SensorConfig::None,
            valve: ActuatorConfig::None,
        }
    }

    pub fn sanitize(&mut self) {
        self.name = self.name.trim().to_string();
        self.desired = sanitize_celsius(self.desired, DEFAULT_DESIRED_C, 5.0, 30.0);
        self.hysteresis = sanitize_celsius(self.hysteresis, DEFAULT_HYSTERESIS_C, 0.1, 5.0);
        self.sensor.sanitize();
        self.valve.sanitize();
    }
}

impl SensorConfig {
    /// Trims addresses; a blank address means no sensor.
    pub fn sanitize(&mut self) {
        match self {
            Self::Address(address) => {
                let trimmed = address.trim();
                if trimmed.is_empty() {
                    *self = Self::None;
                } else {
                    *address = trimmed.to_string();
                }
            }
            Self::Chain(members) => members.iter_mut().for_each(Self::sanitize),
            Self::None => {}
        }
    }
}

impl ActuatorConfig {
    pub fn sanitize(&mut self) {
        match self {
            Self::Schalter { address, .. } => *address = address.trim().to_string(),
            Self::Set { members } | Self::Sequence { members } => {
                members.iter_mut().for_each(Self::sanitize)
            }
            Self::None | Self::Local { .. } => {}
        }
    }
}

fn sanitize_celsius(value: f64, fallback: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    pub network: NetworkConfig,
    pub zones: Vec<ZoneConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_replaces_non_finite_and_clamps() {
        let mut config = ZoneConfig::new("  Attic ");
        config.desired = f64::NAN;
        config.hysteresis = 12.0;
        config.sanitize();

        assert_eq!(config.name, "Attic");
        assert_eq!(config.desired, DEFAULT_DESIRED_C);
        assert_eq!(config.hysteresis, 5.0);
    }

    #[test]
    fn sanitize_trims_device_addresses_down_the_tree() {
        let mut config = ZoneConfig::new("Hall");
        config.sensor = SensorConfig::Chain(vec![
            SensorConfig::Address(" 28-01 ".to_string()),
            SensorConfig::Address("   ".to_string()),
        ]);
        config.valve = ActuatorConfig::Sequence {
            members: vec![
                ActuatorConfig::Local { switch_time: 30 },
                ActuatorConfig::Set {
                    members: vec![ActuatorConfig::Schalter {
                        address: "\tfloor ".to_string(),
                        index: 1,
                        switch_time: 60,
                    }],
                },
            ],
        };
        config.sanitize();

        assert_eq!(
            config.sensor,
            SensorConfig::Chain(vec![
                SensorConfig::Address("28-01".to_string()),
                SensorConfig::None,
            ])
        );
        assert_eq!(
            config.valve,
            ActuatorConfig::Sequence {
                members: vec![
                    ActuatorConfig::Local { switch_time: 30 },
                    ActuatorConfig::Set {
                        members: vec![ActuatorConfig::Schalter {
                            address: "floor".to_string(),
                            index: 1,
                            switch_time: 60,
                        }],
                    },
                ],
            }
        );
    }

    #[test]
    fn zone_config_parses_nested_topology() {
        let raw = r#"{
            "name": "Living room",
            "desired": 21.5,
            "sensor": ["28-0001", ["28-0002", "28-0003"]],
            "valve": {
                "type": "sequence",
                "members": [
                    {"type": "local"},
                    {"type": "set", "members": [
                        {"type": "schalter", "address": "floor", "index": 2, "switch_time": 60}
                    ]}
                ]
            }
        }"#;
        let config: ZoneConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.hysteresis, DEFAULT_HYSTERESIS_C);
        assert!(config.enabled);
        assert_eq!(
            config.sensor,
            SensorConfig::Chain(vec![
                SensorConfig::Address("28-0001".to_string()),
                SensorConfig::Chain(vec![
                    SensorConfig::Address("28-0002".to_string()),
                    SensorConfig::Address("28-0003".to_string()),
                ]),
            ])
        );
        assert_eq!(
            config.valve,
            ActuatorConfig::Sequence {
                members: vec![
                    ActuatorConfig::Local { switch_time: 120 },
                    ActuatorConfig::Set {
                        members: vec![ActuatorConfig::Schalter {
                            address: "floor".to_string(),
                            index: 2,
                            switch_time: 60,
                        }],
                    },
                ],
            }
        );
    }

    #[test]
    fn missing_sensor_and_valve_default_to_none() {
        let raw = r#"{"name": "Garage", "sensor": null}"#;
        let config: ZoneConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.sensor, SensorConfig::None);
        assert_eq!(config.valve, ActuatorConfig::None);
    }

    #[test]
    fn runtime_config_tolerates_partial_files() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{"controller": {"echo_timeout_ms": 60000}}"#).unwrap();
        assert_eq!(runtime.controller.echo_timeout_ms, 60_000);
        assert_eq!(runtime.controller.sensor_stale_timeout_ms, 300_000);
        assert!(runtime.zones.is_empty());
    }
}
