use tracing::info;

use crate::{
    actuator::{DeviceAddress, PhysicalActuator},
    config::{ControllerConfig, ZoneConfig},
    error::HeatingError,
    plant::Plant,
    timed::Timed,
    types::{Command, HeatingStatus},
    zone::Zone,
};

/// The whole controller: every zone, the devices they share, and the boiler
/// relay fed by the OR of all zones' demand.
#[derive(Debug)]
pub struct Heating {
    config: ControllerConfig,
    plant: Plant,
    zones: Vec<Zone>,
    boiler: Option<Timed<bool>>,
}

impl Heating {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            plant: Plant::new(&config),
            config,
            zones: Vec::new(),
            boiler: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, name: &str) -> Result<&Zone, HeatingError> {
        self.position(name).map(|index| &self.zones[index])
    }

    pub fn zone_by_unique_id(&self, unique_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.unique_id() == unique_id)
    }

    pub fn add_zone(&mut self, mut config: ZoneConfig, now_ms: u64) -> Result<(), HeatingError> {
        config.sanitize();
        if config.name.is_empty() {
            return Err(HeatingError::EmptyZoneName);
        }
        if self.position(&config.name).is_ok() {
            return Err(HeatingError::DuplicateZone(config.name));
        }
        info!("adding zone {}", config.name);
        let zone = Zone::new(config, &mut self.plant, now_ms);
        self.zones.push(zone);
        Ok(())
    }

    /// Replaces a zone's settings, possibly renaming it.
    pub fn set_zone_config(
        &mut self,
        name: &str,
        mut config: ZoneConfig,
        now_ms: u64,
    ) -> Result<(), HeatingError> {
        config.sanitize();
        if config.name.is_empty() {
            return Err(HeatingError::EmptyZoneName);
        }
        let index = self.position(name)?;
        if config.name != self.zones[index].name() && self.position(&config.name).is_ok() {
            return Err(HeatingError::DuplicateZone(config.name));
        }
        self.zones[index].apply_config(config, &mut self.plant, now_ms);
        Ok(())
    }

    /// Removes a zone and withdraws its demand from every shared device.
    /// Devices no other zone uses are forgotten once they are switched off.
    pub fn remove_zone(&mut self, name: &str) -> Result<ZoneConfig, HeatingError> {
        let index = self.position(name)?;
        let mut zone = self.zones.remove(index);
        let config = zone.config(&self.plant);
        zone.release(&mut self.plant);
        info!("removed zone {}", zone.name());
        Ok(config)
    }

    pub fn zone_config(&self, name: &str) -> Result<ZoneConfig, HeatingError> {
        self.zone(name).map(|zone| zone.config(&self.plant))
    }

    pub fn zone_configs(&self) -> Vec<ZoneConfig> {
        self.zones
            .iter()
            .map(|zone| zone.config(&self.plant))
            .collect()
    }

    pub fn set_desired(&mut self, name: &str, desired: f64) -> Result<bool, HeatingError> {
        let index = self.position(name)?;
        Ok(self.zones[index].set_desired(desired))
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<bool, HeatingError> {
        let index = self.position(name)?;
        Ok(self.zones[index].set_enabled(enabled))
    }

    /// Feeds a temperature reading. Returns false when no zone uses the
    /// address or the value is implausible.
    pub fn update_sensor(&mut self, address: &str, celsius: f64, now_ms: u64) -> bool {
        self.plant.sensors.update(address, celsius, now_ms)
    }

    pub fn note_echo(&mut self, device: &DeviceAddress, active: bool, now_ms: u64) -> bool {
        self.plant.actuators.note_echo(device, active, now_ms)
    }

    pub fn sensor_addresses(&self) -> Vec<String> {
        self.plant
            .sensors
            .addresses()
            .map(str::to_string)
            .collect()
    }

    /// One control pass. Returns the commands the transport must deliver.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Command> {
        let mut commands = Vec::new();
        self.plant.tick(now_ms, &mut commands);
        for zone in &mut self.zones {
            zone.tick(&mut self.plant);
        }

        let on = self.zones.iter().any(Zone::boiler_desired_state);
        let send = match self.boiler {
            None => true,
            Some(last) => {
                last.get() != on
                    || last.is_older_than(self.config.boiler_resend_interval_ms, now_ms)
            }
        };
        if send {
            if self.boiler.map(|last| last.get()) != Some(on) {
                info!("boiler switching {}", if on { "ON" } else { "OFF" });
            }
            commands.push(Command::Boiler { on });
            self.boiler = Some(Timed::new(on, now_ms));
        }
        commands
    }

    pub fn boiler_on(&self) -> bool {
        self.boiler.is_some_and(|last| last.get())
    }

    pub fn healthcheck(&self) -> bool {
        self.zones.iter().all(Zone::healthcheck)
    }

    pub fn status(&self) -> HeatingStatus {
        HeatingStatus {
            boiler: self.boiler_on(),
            healthy: self.healthcheck(),
            zones: self
                .zones
                .iter()
                .map(|zone| zone.status(&self.plant))
                .collect(),
            actuators: self
                .plant
                .actuators
                .iter()
                .map(PhysicalActuator::status)
                .collect(),
        }
    }

    fn position(&self, name: &str) -> Result<usize, HeatingError> {
        let name = name.trim();
        self.zones
            .iter()
            .position(|zone| zone.name() == name)
            .ok_or_else(|| HeatingError::UnknownZone(name.to_string()))
    }
}
