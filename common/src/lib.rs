pub mod actuator;
pub mod config;
pub mod error;
pub mod group;
pub mod heating;
pub mod plant;
pub mod requests;
pub mod scheduler;
pub mod sensor;
pub mod timed;
pub mod topics;
pub mod types;
pub mod watchdog;
pub mod zone;

pub use actuator::{ActuatorState, DeviceAddress};
pub use config::{ActuatorConfig, ControllerConfig, RuntimeConfig, SensorConfig, ZoneConfig};
pub use error::HeatingError;
pub use heating::Heating;
pub use scheduler::{Periodic, Watch};
pub use sensor::SensorState;
pub use topics::*;
pub use types::{Command, HeatingStatus, ZoneStatus};
pub use watchdog::HealthWatchdog;
pub use zone::{Zone, ZoneState};
