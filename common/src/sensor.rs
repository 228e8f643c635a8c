use std::ops::RangeInclusive;

use tracing::{debug, info};

use crate::{config::SensorConfig, timed::Timed};

/// Readings outside this range come from a faulty sensor and are ignored.
pub const VALID_READING_C: RangeInclusive<f64> = -55.0..=125.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Init,
    Ok,
    Error,
}

impl SensorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One temperature source, fed by external updates and aged by `tick`.
#[derive(Debug, Clone)]
pub struct LeafSensor {
    address: String,
    reading: Timed<f64>,
    state: SensorState,
}

impl LeafSensor {
    pub fn new(address: impl Into<String>, now_ms: u64) -> Self {
        Self {
            address: address.into(),
            reading: Timed::new(f64::NAN, now_ms),
            state: SensorState::Init,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn reading(&self) -> f64 {
        self.reading.get()
    }

    /// Stores a fresh reading. Non-finite or implausible values carry no
    /// information and are dropped without touching the state.
    pub fn update(&mut self, celsius: f64, now_ms: u64) -> bool {
        if !celsius.is_finite() || !VALID_READING_C.contains(&celsius) {
            debug!("sensor {} ignoring invalid reading {celsius}", self.address);
            return false;
        }
        self.reading.set(celsius, now_ms);
        self.set_state(SensorState::Ok);
        true
    }

    pub fn tick(&mut self, now_ms: u64, stale_timeout_ms: u64) {
        if self.state != SensorState::Error && self.reading.is_older_than(stale_timeout_ms, now_ms)
        {
            self.reading.set(f64::NAN, now_ms);
            self.set_state(SensorState::Error);
        }
    }

    fn set_state(&mut self, state: SensorState) {
        if self.state == state {
            return;
        }
        info!(
            "sensor {} changing state from {} to {}",
            self.address,
            self.state.as_str(),
            state.as_str()
        );
        self.state = state;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorId(usize);

/// Owns every leaf sensor; zones refer to them by [`SensorId`], so two zones
/// naming the same address read the same device.
#[derive(Debug, Clone)]
pub struct SensorBank {
    sensors: Vec<LeafSensor>,
    stale_timeout_ms: u64,
}

impl SensorBank {
    pub fn new(stale_timeout_ms: u64) -> Self {
        Self {
            sensors: Vec::new(),
            stale_timeout_ms,
        }
    }

    pub fn get_or_insert(&mut self, address: &str, now_ms: u64) -> SensorId {
        if let Some(index) = self.sensors.iter().position(|s| s.address == address) {
            return SensorId(index);
        }
        self.sensors.push(LeafSensor::new(address, now_ms));
        SensorId(self.sensors.len() - 1)
    }

    pub fn get(&self, id: SensorId) -> &LeafSensor {
        &self.sensors[id.0]
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(LeafSensor::address)
    }

    /// Routes an external reading to the sensor with this address. Returns
    /// false when the address is unknown or the value was rejected.
    pub fn update(&mut self, address: &str, celsius: f64, now_ms: u64) -> bool {
        match self.sensors.iter_mut().find(|s| s.address == address) {
            Some(sensor) => sensor.update(celsius, now_ms),
            None => false,
        }
    }

    pub fn tick(&mut self, now_ms: u64) {
        for sensor in &mut self.sensors {
            sensor.tick(now_ms, self.stale_timeout_ms);
        }
    }
}

/// Ordered fallback over several sources: the first member that is OK wins.
#[derive(Debug, Clone)]
pub struct SensorChain {
    members: Vec<SensorNode>,
    state: SensorState,
}

/// The temperature source a zone reads from.
#[derive(Debug, Clone)]
pub enum SensorNode {
    /// No sensor configured; permanently in error so the zone fails closed.
    Dummy,
    Leaf(SensorId),
    Chain(SensorChain),
}

impl SensorNode {
    pub fn build(config: &SensorConfig, bank: &mut SensorBank, now_ms: u64) -> Self {
        match config {
            SensorConfig::Address(address) if !address.trim().is_empty() => {
                Self::Leaf(bank.get_or_insert(address.trim(), now_ms))
            }
            SensorConfig::Chain(members) => Self::Chain(SensorChain {
                members: members
                    .iter()
                    .map(|member| Self::build(member, bank, now_ms))
                    .collect(),
                state: SensorState::Init,
            }),
            _ => Self::Dummy,
        }
    }

    /// Recomputes derived chain state. Leaf sensors are aged by
    /// [`SensorBank::tick`] before this runs.
    pub fn tick(&mut self, bank: &SensorBank) {
        let Self::Chain(chain) = self else {
            return;
        };

        for member in &mut chain.members {
            member.tick(bank);
        }

        let state = if chain
            .members
            .iter()
            .any(|member| member.state(bank) == SensorState::Ok)
        {
            SensorState::Ok
        } else {
            SensorState::Error
        };

        if chain.state != state {
            info!(
                "sensor chain {} changing state from {} to {}",
                chain.describe(bank),
                chain.state.as_str(),
                state.as_str()
            );
            chain.state = state;
        }
    }

    pub fn state(&self, bank: &SensorBank) -> SensorState {
        match self {
            Self::Dummy => SensorState::Error,
            Self::Leaf(id) => bank.get(*id).state(),
            Self::Chain(chain) => chain.state,
        }
    }

    pub fn reading(&self, bank: &SensorBank) -> f64 {
        match self {
            Self::Dummy => f64::NAN,
            Self::Leaf(id) => bank.get(*id).reading(),
            Self::Chain(chain) => chain
                .members
                .iter()
                .find(|member| member.state(bank) == SensorState::Ok)
                .map(|member| member.reading(bank))
                .unwrap_or(f64::NAN),
        }
    }

    pub fn config(&self, bank: &SensorBank) -> SensorConfig {
        match self {
            Self::Dummy => SensorConfig::None,
            Self::Leaf(id) => SensorConfig::Address(bank.get(*id).address().to_string()),
            Self::Chain(chain) => {
                SensorConfig::Chain(chain.members.iter().map(|m| m.config(bank)).collect())
            }
        }
    }

    pub fn describe(&self, bank: &SensorBank) -> String {
        match self {
            Self::Dummy => "dummy".to_string(),
            Self::Leaf(id) => bank.get(*id).address().to_string(),
            Self::Chain(chain) => chain.describe(bank),
        }
    }
}

impl SensorChain {
    fn describe(&self, bank: &SensorBank) -> String {
        let members: Vec<String> = self.members.iter().map(|m| m.describe(bank)).collect();
        format!("[{}]", members.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE_MS: u64 = 300_000;

    fn chain_of(addresses: &[&str], bank: &mut SensorBank) -> SensorNode {
        let config = SensorConfig::Chain(
            addresses
                .iter()
                .map(|a| SensorConfig::Address(a.to_string()))
                .collect(),
        );
        SensorNode::build(&config, bank, 0)
    }

    #[test]
    fn first_valid_update_makes_sensor_ok() {
        let mut sensor = LeafSensor::new("28-01", 0);
        assert_eq!(sensor.state(), SensorState::Init);
        assert!(sensor.reading().is_nan());

        assert!(sensor.update(20.5, 1_000));
        assert_eq!(sensor.state(), SensorState::Ok);
        assert_eq!(sensor.reading(), 20.5);
    }

    #[test]
    fn invalid_updates_are_ignored() {
        let mut sensor = LeafSensor::new("28-01", 0);
        sensor.update(19.0, 0);

        assert!(!sensor.update(f64::NAN, 1_000));
        assert!(!sensor.update(f64::INFINITY, 1_000));
        assert!(!sensor.update(850.0, 1_000));

        assert_eq!(sensor.state(), SensorState::Ok);
        assert_eq!(sensor.reading(), 19.0);
    }

    #[test]
    fn stale_sensor_errors_and_recovers_on_next_update() {
        let mut sensor = LeafSensor::new("28-01", 0);
        sensor.update(21.0, 10_000);

        sensor.tick(10_000 + STALE_MS - 1, STALE_MS);
        assert_eq!(sensor.state(), SensorState::Ok);

        sensor.tick(10_000 + STALE_MS, STALE_MS);
        assert_eq!(sensor.state(), SensorState::Error);
        assert!(sensor.reading().is_nan());

        sensor.update(21.5, 400_000);
        sensor.tick(400_001, STALE_MS);
        assert_eq!(sensor.state(), SensorState::Ok);
        assert_eq!(sensor.reading(), 21.5);
    }

    #[test]
    fn silent_sensor_leaves_init_for_error() {
        let mut sensor = LeafSensor::new("28-01", 0);
        sensor.tick(STALE_MS, STALE_MS);
        assert_eq!(sensor.state(), SensorState::Error);
    }

    #[test]
    fn bank_deduplicates_addresses() {
        let mut bank = SensorBank::new(STALE_MS);
        let a = bank.get_or_insert("28-01", 0);
        let b = bank.get_or_insert("28-02", 0);
        assert_eq!(bank.get_or_insert("28-01", 0), a);
        assert_ne!(a, b);
        assert!(!bank.update("unknown", 20.0, 0));
    }

    #[test]
    fn chain_falls_back_in_declaration_order() {
        let mut bank = SensorBank::new(STALE_MS);
        let mut chain = chain_of(&["primary", "backup"], &mut bank);

        bank.update("backup", 18.0, 1_000);
        bank.tick(1_000);
        chain.tick(&bank);
        assert_eq!(chain.state(&bank), SensorState::Ok);
        assert_eq!(chain.reading(&bank), 18.0);

        bank.update("primary", 20.0, 2_000);
        bank.tick(2_000);
        chain.tick(&bank);
        assert_eq!(chain.reading(&bank), 20.0);

        // primary goes silent, backup keeps reporting
        bank.update("backup", 18.5, 2_000 + STALE_MS);
        bank.tick(2_000 + STALE_MS);
        chain.tick(&bank);
        assert_eq!(chain.state(&bank), SensorState::Ok);
        assert_eq!(chain.reading(&bank), 18.5);
    }

    #[test]
    fn chain_without_ok_member_is_error() {
        let mut bank = SensorBank::new(STALE_MS);
        let mut chain = chain_of(&["primary", "backup"], &mut bank);
        bank.tick(1_000);
        chain.tick(&bank);

        assert_eq!(chain.state(&bank), SensorState::Error);
        assert!(chain.reading(&bank).is_nan());
    }

    #[test]
    fn missing_or_blank_address_builds_dummy() {
        let mut bank = SensorBank::new(STALE_MS);
        let dummy = SensorNode::build(&SensorConfig::None, &mut bank, 0);
        let blank = SensorNode::build(&SensorConfig::Address("  ".into()), &mut bank, 0);

        for node in [dummy, blank] {
            assert_eq!(node.state(&bank), SensorState::Error);
            assert!(node.reading(&bank).is_nan());
            assert_eq!(node.config(&bank), SensorConfig::None);
        }
    }

    #[test]
    fn config_and_description_mirror_topology() {
        let mut bank = SensorBank::new(STALE_MS);
        let config = SensorConfig::Chain(vec![
            SensorConfig::Address("a".into()),
            SensorConfig::Chain(vec![SensorConfig::Address("b".into())]),
        ]);
        let node = SensorNode::build(&config, &mut bank, 0);

        assert_eq!(node.config(&bank), config);
        assert_eq!(node.describe(&bank), "[a, [b]]");
    }
}
