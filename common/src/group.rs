use tracing::{info, warn};

use crate::{
    actuator::{ActuatorBank, ActuatorId, ActuatorState, DeviceAddress},
    config::ActuatorConfig,
    requests::{RequesterId, RequesterIds, RequesterRegistry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Members switch together; one active member is enough to serve.
    Set,
    /// Members activate one after another; all must be active to serve.
    Sequence,
}

/// Derives a group's state from its members' states and its own demand.
pub fn aggregate(kind: GroupKind, requested: bool, members: &[ActuatorState]) -> ActuatorState {
    if members.is_empty() {
        return ActuatorState::Error;
    }

    let count = |wanted: ActuatorState| members.iter().filter(|s| **s == wanted).count();

    if count(ActuatorState::Error) > 0 {
        return ActuatorState::Error;
    }
    if count(ActuatorState::Init) > 0 {
        return ActuatorState::Init;
    }

    let active = count(ActuatorState::Open);
    let serving = match kind {
        GroupKind::Set => active > 0,
        GroupKind::Sequence => active == members.len(),
    };

    if requested && serving {
        ActuatorState::Open
    } else if !requested && count(ActuatorState::Closed) == members.len() {
        ActuatorState::Closed
    } else if requested {
        ActuatorState::Opening
    } else {
        ActuatorState::Closing
    }
}

/// A set or sequence of actuators that behaves like a single one.
#[derive(Debug, Clone)]
pub struct ActuatorGroup {
    kind: GroupKind,
    requester: RequesterId,
    registry: RequesterRegistry,
    members: Vec<ActuatorNode>,
    state: ActuatorState,
}

impl ActuatorGroup {
    fn tick(&mut self, bank: &mut ActuatorBank) {
        for member in &mut self.members {
            member.tick(bank);
        }

        let states: Vec<ActuatorState> = self.members.iter().map(|m| m.state(bank)).collect();
        let requested = self.registry.has_requests();
        let next = aggregate(self.kind, requested, &states);

        // A faulty or still initialising group never asks its members to open.
        let activate = requested && next.is_ok();
        let mut upstream_active = true;
        for (member, state) in self.members.iter_mut().zip(&states) {
            let member_requested = match self.kind {
                GroupKind::Set => activate,
                GroupKind::Sequence => activate && upstream_active,
            };
            member.set_request(bank, self.requester, member_requested);
            upstream_active = upstream_active && *state == ActuatorState::Open;
        }

        if self.state != next {
            info!(
                "actuator group {} changing state from {} to {}",
                self.describe(bank),
                self.state.as_str(),
                next.as_str()
            );
            self.state = next;
        }
    }

    fn describe(&self, bank: &ActuatorBank) -> String {
        let members: Vec<String> = self.members.iter().map(|m| m.describe(bank)).collect();
        match self.kind {
            GroupKind::Set => format!("[{}]", members.join(", ")),
            GroupKind::Sequence => format!("[{}]", members.join(" -> ")),
        }
    }
}

/// The valve topology serving a zone: a single device or a nested group.
#[derive(Debug, Clone)]
pub enum ActuatorNode {
    Physical(ActuatorId),
    Group(ActuatorGroup),
}

impl ActuatorNode {
    /// Builds the topology described by `config`. `None` means "no valve".
    pub fn build(
        config: &ActuatorConfig,
        bank: &mut ActuatorBank,
        ids: &mut RequesterIds,
        now_ms: u64,
    ) -> Option<Self> {
        let (kind, members) = match config {
            ActuatorConfig::None => return None,
            ActuatorConfig::Local { switch_time } => {
                let id = bank.get_or_insert(DeviceAddress::Local, switch_time * 1_000, now_ms);
                return Some(Self::Physical(id));
            }
            ActuatorConfig::Schalter {
                address,
                index,
                switch_time,
            } => {
                let device = DeviceAddress::schalter(address.trim(), *index);
                let id = bank.get_or_insert(device, switch_time * 1_000, now_ms);
                return Some(Self::Physical(id));
            }
            ActuatorConfig::Set { members } => (GroupKind::Set, members),
            ActuatorConfig::Sequence { members } => (GroupKind::Sequence, members),
        };

        let members: Vec<ActuatorNode> = members
            .iter()
            .filter_map(|member| Self::build(member, bank, ids, now_ms))
            .collect();
        if members.is_empty() {
            warn!("actuator group without members, it will stay in error");
        }

        Some(Self::Group(ActuatorGroup {
            kind,
            requester: ids.allocate(),
            registry: RequesterRegistry::default(),
            members,
            state: ActuatorState::Init,
        }))
    }

    pub fn set_request(&mut self, bank: &mut ActuatorBank, requester: RequesterId, on: bool) {
        match self {
            Self::Physical(id) => bank.set_request(*id, requester, on),
            Self::Group(group) => group.registry.set_request(requester, on),
        }
    }

    /// Withdraws `requester` and every request this topology placed on its
    /// members, then lets go of the physical devices. The node must not be
    /// used afterwards.
    pub fn release(&mut self, bank: &mut ActuatorBank, requester: RequesterId) {
        match self {
            Self::Physical(id) => bank.release(*id, requester),
            Self::Group(group) => {
                group.registry.set_request(requester, false);
                for member in &mut group.members {
                    member.release(bank, group.requester);
                }
            }
        }
    }

    /// Recomputes group states bottom-up and forwards requests to members.
    /// Physical devices are ticked by [`ActuatorBank::tick`].
    pub fn tick(&mut self, bank: &mut ActuatorBank) {
        if let Self::Group(group) = self {
            group.tick(bank);
        }
    }

    pub fn state(&self, bank: &ActuatorBank) -> ActuatorState {
        match self {
            Self::Physical(id) => bank.get(*id).state(),
            Self::Group(group) => group.state,
        }
    }

    pub fn healthcheck(&self, bank: &ActuatorBank) -> bool {
        self.state(bank) != ActuatorState::Error
    }

    pub fn config(&self, bank: &ActuatorBank) -> ActuatorConfig {
        match self {
            Self::Physical(id) => bank.get(*id).config(),
            Self::Group(group) => {
                let members = group.members.iter().map(|m| m.config(bank)).collect();
                match group.kind {
                    GroupKind::Set => ActuatorConfig::Set { members },
                    GroupKind::Sequence => ActuatorConfig::Sequence { members },
                }
            }
        }
    }

    pub fn describe(&self, bank: &ActuatorBank) -> String {
        match self {
            Self::Physical(id) => bank.get(*id).device().to_string(),
            Self::Group(group) => group.describe(bank),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{actuator::ActuatorTiming, types::Command};
    use pretty_assertions::assert_eq;

    use crate::actuator::ActuatorState::{Closed, Closing, Error, Init, Open, Opening};

    const TIMING: ActuatorTiming = ActuatorTiming {
        echo_timeout_ms: 120_000,
        resend_interval_ms: 30_000,
    };

    fn schalter(index: u32) -> ActuatorConfig {
        ActuatorConfig::Schalter {
            address: "manifold".to_string(),
            index,
            switch_time: 10,
        }
    }

    fn device(index: u32) -> DeviceAddress {
        DeviceAddress::schalter("manifold", index)
    }

    struct Rig {
        bank: ActuatorBank,
        ids: RequesterIds,
        node: ActuatorNode,
        zone: RequesterId,
    }

    impl Rig {
        fn new(config: ActuatorConfig) -> Self {
            let mut bank = ActuatorBank::new(TIMING);
            let mut ids = RequesterIds::default();
            let node = ActuatorNode::build(&config, &mut bank, &mut ids, 0).unwrap();
            let zone = ids.allocate();
            Self {
                bank,
                ids,
                node,
                zone,
            }
        }

        fn echo(&mut self, index: u32, active: bool, now_ms: u64) {
            assert!(self.bank.note_echo(&device(index), active, now_ms));
        }

        fn tick(&mut self, now_ms: u64) -> Vec<Command> {
            let mut commands = Vec::new();
            self.bank.tick(now_ms, &mut commands);
            self.node.tick(&mut self.bank);
            commands
        }

        fn member_requested(&self, index: u32) -> bool {
            self.bank.find(&device(index)).unwrap().is_requested()
        }
    }

    #[test]
    fn set_aggregation_is_tolerant_or() {
        assert_eq!(aggregate(GroupKind::Set, true, &[Open, Closed]), Open);
        assert_eq!(aggregate(GroupKind::Set, true, &[Opening, Closed]), Opening);
        assert_eq!(aggregate(GroupKind::Set, false, &[Closed, Closed]), Closed);
        assert_eq!(aggregate(GroupKind::Set, false, &[Open, Closed]), Closing);
        assert_eq!(aggregate(GroupKind::Set, true, &[Open, Init]), Init);
        assert_eq!(aggregate(GroupKind::Set, true, &[Open, Init, Error]), Error);
    }

    #[test]
    fn sequence_aggregation_needs_every_member() {
        assert_eq!(aggregate(GroupKind::Sequence, true, &[Open, Closed]), Opening);
        assert_eq!(aggregate(GroupKind::Sequence, true, &[Open, Open]), Open);
        assert_eq!(aggregate(GroupKind::Sequence, false, &[Closed, Closed]), Closed);
        assert_eq!(aggregate(GroupKind::Sequence, false, &[Closing, Closed]), Closing);
        assert_eq!(aggregate(GroupKind::Sequence, false, &[Init, Closed]), Init);
    }

    #[test]
    fn empty_group_is_an_error() {
        assert_eq!(aggregate(GroupKind::Set, true, &[]), Error);

        let mut rig = Rig::new(ActuatorConfig::Set { members: vec![] });
        rig.tick(0);
        assert_eq!(rig.node.state(&rig.bank), Error);
    }

    #[test]
    fn set_fans_out_request_to_every_member() {
        let mut rig = Rig::new(ActuatorConfig::Set {
            members: vec![schalter(0), schalter(1)],
        });
        rig.echo(0, false, 0);
        rig.echo(1, false, 0);
        rig.tick(0);
        rig.tick(0);
        assert_eq!(rig.node.state(&rig.bank), Closed);

        let zone = rig.zone;
        rig.node.set_request(&mut rig.bank, zone, true);
        rig.tick(1_000);
        assert!(rig.member_requested(0));
        assert!(rig.member_requested(1));
        assert_eq!(rig.node.state(&rig.bank), Opening);

        // only the first member confirms, that is enough for a set
        rig.echo(0, true, 2_000);
        rig.tick(2_000);
        rig.tick(12_000);
        assert_eq!(rig.node.state(&rig.bank), Open);
    }

    #[test]
    fn sequence_activates_members_in_order() {
        let mut rig = Rig::new(ActuatorConfig::Sequence {
            members: vec![schalter(0), schalter(1)],
        });
        rig.echo(0, false, 0);
        rig.echo(1, false, 0);
        rig.tick(0);

        let zone = rig.zone;
        rig.node.set_request(&mut rig.bank, zone, true);
        rig.tick(1_000);
        assert!(rig.member_requested(0));
        assert!(!rig.member_requested(1));

        rig.echo(0, true, 2_000);
        rig.tick(2_000);
        assert_eq!(rig.bank.find(&device(0)).unwrap().state(), Opening);
        assert!(!rig.member_requested(1));

        rig.echo(0, true, 12_000);
        rig.tick(12_000);
        assert_eq!(rig.bank.find(&device(0)).unwrap().state(), Open);
        assert!(rig.member_requested(1));
        assert_eq!(rig.node.state(&rig.bank), Opening);

        rig.echo(1, true, 13_000);
        rig.tick(13_000);
        rig.echo(0, true, 23_000);
        rig.echo(1, true, 23_000);
        rig.tick(23_000);
        assert_eq!(rig.node.state(&rig.bank), Open);
    }

    #[test]
    fn sequence_deactivates_every_member_at_once() {
        let mut rig = Rig::new(ActuatorConfig::Sequence {
            members: vec![schalter(0), schalter(1)],
        });
        rig.echo(0, true, 0);
        rig.echo(1, true, 0);
        let zone = rig.zone;
        rig.node.set_request(&mut rig.bank, zone, true);
        rig.tick(0);
        rig.tick(0);
        assert_eq!(rig.node.state(&rig.bank), Open);
        assert!(rig.member_requested(1));

        rig.node.set_request(&mut rig.bank, zone, false);
        rig.tick(1_000);
        assert!(!rig.member_requested(0));
        assert!(!rig.member_requested(1));
    }

    #[test]
    fn faulty_member_withdraws_requests_from_all() {
        let mut rig = Rig::new(ActuatorConfig::Set {
            members: vec![schalter(0), schalter(1)],
        });
        rig.echo(0, false, 0);
        rig.tick(0);
        let zone = rig.zone;
        rig.node.set_request(&mut rig.bank, zone, true);

        // member 1 never reports
        rig.echo(0, false, 120_000);
        rig.tick(120_000);
        assert_eq!(rig.node.state(&rig.bank), Error);
        assert!(!rig.member_requested(0));
        assert!(!rig.node.healthcheck(&rig.bank));
    }

    #[test]
    fn nested_groups_round_trip_their_config() {
        let config = ActuatorConfig::Sequence {
            members: vec![
                ActuatorConfig::Local { switch_time: 30 },
                ActuatorConfig::Set {
                    members: vec![schalter(0), schalter(1)],
                },
            ],
        };
        let rig = Rig::new(config.clone());
        assert_eq!(rig.node.config(&rig.bank), config);
        assert_eq!(
            rig.node.describe(&rig.bank),
            "[local -> [schalter:manifold/0, schalter:manifold/1]]"
        );
    }

    #[test]
    fn release_clears_requests_down_the_tree() {
        let mut rig = Rig::new(ActuatorConfig::Set {
            members: vec![schalter(0)],
        });
        rig.echo(0, false, 0);
        rig.tick(0);
        let zone = rig.zone;
        rig.node.set_request(&mut rig.bank, zone, true);
        rig.tick(1_000);
        assert!(rig.member_requested(0));

        rig.node.release(&mut rig.bank, zone);
        assert!(!rig.member_requested(0));

        // the device was never switched on, so nothing holds it any more
        let mut commands = Vec::new();
        rig.bank.tick(2_000, &mut commands);
        assert!(rig.bank.find(&device(0)).is_none());
    }

    #[test]
    fn nested_sequence_opens_inner_set_after_first_stage() {
        let mut rig = Rig::new(ActuatorConfig::Sequence {
            members: vec![
                ActuatorConfig::Local { switch_time: 10 },
                ActuatorConfig::Set {
                    members: vec![schalter(0), schalter(1)],
                },
            ],
        });
        let local_requested = |rig: &Rig| {
            rig.bank
                .find(&DeviceAddress::Local)
                .is_some_and(|local| local.is_requested())
        };
        rig.echo(0, false, 0);
        rig.echo(1, false, 0);
        rig.tick(0);
        assert_eq!(rig.node.state(&rig.bank), Closed);

        let zone = rig.zone;
        rig.node.set_request(&mut rig.bank, zone, true);
        rig.tick(1_000);
        assert!(local_requested(&rig));
        assert!(!rig.member_requested(0));
        assert!(!rig.member_requested(1));

        // the relay confirms itself and then travels
        rig.tick(2_000);
        assert_eq!(rig.bank.find(&DeviceAddress::Local).unwrap().state(), Opening);
        assert!(!rig.member_requested(0));

        rig.tick(12_000);
        assert_eq!(rig.bank.find(&DeviceAddress::Local).unwrap().state(), Open);
        assert_eq!(rig.node.state(&rig.bank), Opening);
        assert!(!rig.member_requested(0));

        // the inner set sees its request on the following pass
        rig.tick(13_000);
        assert!(rig.member_requested(0));
        assert!(rig.member_requested(1));

        let commands = rig.tick(14_000);
        assert!(commands.contains(&Command::Actuator {
            device: device(0),
            on: true,
        }));
        assert!(commands.contains(&Command::Actuator {
            device: device(1),
            on: true,
        }));

        rig.echo(0, true, 15_000);
        rig.echo(1, true, 15_000);
        rig.tick(15_000);
        rig.echo(0, true, 25_000);
        rig.echo(1, true, 25_000);
        rig.tick(25_000);
        assert_eq!(rig.node.state(&rig.bank), Open);

        rig.node.set_request(&mut rig.bank, zone, false);
        rig.tick(26_000);
        assert_eq!(rig.node.state(&rig.bank), Closing);
        assert!(!local_requested(&rig));

        rig.tick(27_000);
        assert!(!local_requested(&rig));
        assert!(!rig.member_requested(0));
        assert!(!rig.member_requested(1));

        let commands = rig.tick(28_000);
        assert!(commands.contains(&Command::Actuator {
            device: device(0),
            on: false,
        }));
        assert!(commands.contains(&Command::Actuator {
            device: device(1),
            on: false,
        }));
    }
}
