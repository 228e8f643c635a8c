use std::{collections::BTreeMap, fmt};

use tracing::{debug, info, warn};

use crate::{
    config::ActuatorConfig,
    requests::{RequesterId, RequesterRegistry},
    timed::Timed,
    types::{ActuatorStatus, Command},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorState {
    Init,
    Closed,
    Opening,
    Closing,
    Open,
    Error,
}

impl ActuatorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Closing => "closing",
            Self::Open => "open",
            Self::Error => "error",
        }
    }

    pub fn is_ok(self) -> bool {
        !matches!(self, Self::Init | Self::Error)
    }
}

/// Identity of a physical on/off device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    /// The controller board's own valve relay.
    Local,
    /// A remote switch channel, confirmed over the network.
    Schalter { address: String, index: u32 },
}

impl DeviceAddress {
    pub fn schalter(address: impl Into<String>, index: u32) -> Self {
        Self::Schalter {
            address: address.into(),
            index,
        }
    }

    /// A schalter without an address can never be commanded or confirmed.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Local => true,
            Self::Schalter { address, .. } => !address.trim().is_empty(),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Schalter { address, index } => write!(f, "schalter:{address}/{index}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorTiming {
    pub echo_timeout_ms: u64,
    pub resend_interval_ms: u64,
}

/// One physical valve or switch.
///
/// Only the echo advances the state; the aggregate request is merely sent
/// out as a command. A device that never confirms therefore ends up in
/// `Error` instead of being assumed to have moved.
#[derive(Debug, Clone)]
pub struct PhysicalActuator {
    device: DeviceAddress,
    travel_time_ms: u64,
    registry: RequesterRegistry,
    echo: Timed<Option<bool>>,
    state: Timed<ActuatorState>,
    last_command: Option<Timed<bool>>,
    users: usize,
}

impl PhysicalActuator {
    pub fn new(device: DeviceAddress, travel_time_ms: u64, now_ms: u64) -> Self {
        let state = if device.is_valid() {
            ActuatorState::Init
        } else {
            warn!("actuator {device} has no address, it will stay in error");
            ActuatorState::Error
        };
        Self {
            device,
            travel_time_ms,
            registry: RequesterRegistry::default(),
            echo: Timed::new(None, now_ms),
            state: Timed::new(state, now_ms),
            last_command: None,
            users: 0,
        }
    }

    pub fn device(&self) -> &DeviceAddress {
        &self.device
    }

    pub fn state(&self) -> ActuatorState {
        self.state.get()
    }

    pub fn is_requested(&self) -> bool {
        self.registry.has_requests()
    }

    pub fn echo(&self) -> Option<bool> {
        self.echo.get()
    }

    pub fn healthcheck(&self) -> bool {
        self.state() != ActuatorState::Error
    }

    pub fn set_request(&mut self, requester: RequesterId, requesting: bool) {
        self.registry.set_request(requester, requesting);
    }

    /// Records the device's own report of its output. Ignored for the local
    /// relay, whose readback is refreshed on every tick.
    pub fn note_echo(&mut self, active: bool, now_ms: u64) {
        if self.device == DeviceAddress::Local || !self.device.is_valid() {
            return;
        }
        debug!("actuator {} echo {}", self.device, if active { "ON" } else { "OFF" });
        self.echo.set(Some(active), now_ms);
    }

    pub fn config(&self) -> ActuatorConfig {
        let switch_time = self.travel_time_ms / 1_000;
        match &self.device {
            DeviceAddress::Local => ActuatorConfig::Local { switch_time },
            DeviceAddress::Schalter { address, index } => ActuatorConfig::Schalter {
                address: address.clone(),
                index: *index,
                switch_time,
            },
        }
    }

    pub fn tick(&mut self, now_ms: u64, timing: ActuatorTiming, commands: &mut Vec<Command>) {
        if !self.device.is_valid() {
            return;
        }

        let requested = self.registry.has_requests();
        let resend = match self.last_command {
            None => true,
            Some(last) => {
                last.get() != requested || last.is_older_than(timing.resend_interval_ms, now_ms)
            }
        };
        if resend {
            commands.push(Command::Actuator {
                device: self.device.clone(),
                on: requested,
            });
            self.last_command = Some(Timed::new(requested, now_ms));
        }

        if self.device == DeviceAddress::Local {
            self.echo.set(Some(requested), now_ms);
        }

        if self.echo.is_older_than(timing.echo_timeout_ms, now_ms) {
            self.set_state(ActuatorState::Error, now_ms);
            return;
        }

        let Some(active) = self.echo.get() else {
            return;
        };
        let travelled = self.state.is_older_than(self.travel_time_ms, now_ms);

        let next = match self.state() {
            ActuatorState::Init | ActuatorState::Error => {
                if active {
                    ActuatorState::Open
                } else {
                    ActuatorState::Closed
                }
            }
            ActuatorState::Closed if active => ActuatorState::Opening,
            ActuatorState::Open if !active => ActuatorState::Closing,
            ActuatorState::Opening if !active => ActuatorState::Closing,
            ActuatorState::Opening if travelled => ActuatorState::Open,
            ActuatorState::Closing if active => ActuatorState::Opening,
            ActuatorState::Closing if travelled => ActuatorState::Closed,
            current => current,
        };
        self.set_state(next, now_ms);
    }

    pub fn status(&self) -> ActuatorStatus {
        ActuatorStatus {
            device: self.device.to_string(),
            state: self.state().as_str(),
            requested: self.is_requested(),
            echo: self.echo(),
            travel_time_ms: self.travel_time_ms,
            healthy: self.healthcheck(),
        }
    }

    /// Nothing references the device any more and its last word was `OFF`:
    /// either confirmed closed, or never going to confirm anything.
    fn is_abandoned(&self) -> bool {
        if self.users > 0 || self.is_requested() {
            return false;
        }
        if !self.device.is_valid() {
            return true;
        }
        let sent_off = self.last_command.is_some_and(|last| !last.get());
        sent_off && matches!(self.state(), ActuatorState::Closed | ActuatorState::Error)
    }

    fn set_state(&mut self, state: ActuatorState, now_ms: u64) {
        if let Some(previous) = self.state.change(state, now_ms) {
            info!(
                "actuator {} changing state from {} to {}",
                self.device,
                previous.as_str(),
                state.as_str()
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActuatorId(usize);

/// Owns every physical actuator. Devices are de-duplicated by address, so
/// zones naming the same device share one requester registry.
///
/// Ids stay valid for as long as a topology node holds them. A device nobody
/// holds is dropped once it has been switched off.
#[derive(Debug, Clone)]
pub struct ActuatorBank {
    actuators: BTreeMap<ActuatorId, PhysicalActuator>,
    next_id: usize,
    timing: ActuatorTiming,
}

impl ActuatorBank {
    pub fn new(timing: ActuatorTiming) -> Self {
        Self {
            actuators: BTreeMap::new(),
            next_id: 0,
            timing,
        }
    }

    /// Returns the existing actuator for `device`, or registers a new one.
    /// The travel time of the first registration wins. Every call must be
    /// paired with a [`ActuatorBank::release`].
    pub fn get_or_insert(
        &mut self,
        device: DeviceAddress,
        travel_time_ms: u64,
        now_ms: u64,
    ) -> ActuatorId {
        if let Some((id, actuator)) = self.actuators.iter_mut().find(|(_, a)| a.device == device) {
            if actuator.travel_time_ms != travel_time_ms {
                warn!(
                    "actuator {device} already registered with travel time {} ms, \
                     ignoring {travel_time_ms} ms",
                    actuator.travel_time_ms
                );
            }
            actuator.users += 1;
            return *id;
        }

        let id = ActuatorId(self.next_id);
        self.next_id += 1;
        let mut actuator = PhysicalActuator::new(device, travel_time_ms, now_ms);
        actuator.users = 1;
        self.actuators.insert(id, actuator);
        id
    }

    /// Withdraws `requester` and drops one reference to the device.
    pub fn release(&mut self, id: ActuatorId, requester: RequesterId) {
        if let Some(actuator) = self.actuators.get_mut(&id) {
            actuator.set_request(requester, false);
            actuator.users = actuator.users.saturating_sub(1);
        }
    }

    pub fn get(&self, id: ActuatorId) -> &PhysicalActuator {
        &self.actuators[&id]
    }

    pub fn find(&self, device: &DeviceAddress) -> Option<&PhysicalActuator> {
        self.actuators.values().find(|a| &a.device == device)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhysicalActuator> {
        self.actuators.values()
    }

    pub fn set_request(&mut self, id: ActuatorId, requester: RequesterId, requesting: bool) {
        if let Some(actuator) = self.actuators.get_mut(&id) {
            actuator.set_request(requester, requesting);
        }
    }

    /// Routes an external confirmation to the matching device. Returns false
    /// for devices nobody has configured.
    pub fn note_echo(&mut self, device: &DeviceAddress, active: bool, now_ms: u64) -> bool {
        match self.actuators.values_mut().find(|a| &a.device == device) {
            Some(actuator) => {
                actuator.note_echo(active, now_ms);
                true
            }
            None => false,
        }
    }

    pub fn tick(&mut self, now_ms: u64, commands: &mut Vec<Command>) {
        for actuator in self.actuators.values_mut() {
            actuator.tick(now_ms, self.timing, commands);
        }

        self.actuators.retain(|_, actuator| {
            if actuator.is_abandoned() {
                info!(
                    "forgetting actuator {} in state {}",
                    actuator.device,
                    actuator.state().as_str()
                );
                return false;
            }
            true
        });
    }
}
