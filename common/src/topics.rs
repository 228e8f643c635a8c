use crate::{actuator::DeviceAddress, types::Command};

pub const TOPIC_SENSOR_TEMPERATURE_FILTER: &str = "celsius/+/+/temperature";
pub const TOPIC_SCHALTER_ECHO_FILTER: &str = "schalter/+/+";
pub const TOPIC_SCHALTER_COMMAND_FILTER: &str = "schalter/+/+/set";
pub const TOPIC_ZONE_COMMAND_FILTER: &str = "heating/+/+/set";

pub const TOPIC_BOILER: &str = "heating/boiler";
pub const TOPIC_LOCAL_VALVE: &str = "heating/valve";
pub const TOPIC_PROBLEM: &str = "heating/problem";
pub const TOPIC_STATUS: &str = "heating/status";

pub const ZONE_CURRENT_TEMPERATURE: &str = "current_temperature";
pub const ZONE_DESIRED_TEMPERATURE: &str = "desired_temperature";
pub const ZONE_ACTION: &str = "action";
pub const ZONE_MODE: &str = "mode";
pub const ZONE_STATE: &str = "state";

/// Inbound per-zone command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneCommand {
    DesiredTemperature,
    Mode,
}

pub fn zone_topic(unique_id: &str, field: &str) -> String {
    format!("heating/{unique_id}/{field}")
}

pub fn zone_command_topic(unique_id: &str, command: ZoneCommand) -> String {
    let field = match command {
        ZoneCommand::DesiredTemperature => ZONE_DESIRED_TEMPERATURE,
        ZoneCommand::Mode => ZONE_MODE,
    };
    format!("heating/{unique_id}/{field}/set")
}

/// `heating/{unique_id}/{field}/set` -> `(unique_id, command)`.
pub fn parse_zone_command_topic(topic: &str) -> Option<(&str, ZoneCommand)> {
    let mut parts = topic.split('/');
    let (Some("heating"), Some(unique_id), Some(field), Some("set"), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };
    let command = match field {
        ZONE_DESIRED_TEMPERATURE => ZoneCommand::DesiredTemperature,
        ZONE_MODE => ZoneCommand::Mode,
        _ => return None,
    };
    Some((unique_id, command))
}

pub fn sensor_temperature_topic(bus: &str, address: &str) -> String {
    format!("celsius/{bus}/{address}/temperature")
}

/// `celsius/{bus}/{address}/temperature` -> `address`.
pub fn parse_sensor_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some("celsius"), Some(_), Some(address), Some("temperature"), None)
            if !address.is_empty() =>
        {
            Some(address)
        }
        _ => None,
    }
}

pub fn schalter_echo_topic(address: &str, index: u32) -> String {
    format!("schalter/{address}/{index}")
}

pub fn schalter_command_topic(address: &str, index: u32) -> String {
    format!("schalter/{address}/{index}/set")
}

/// `schalter/{address}/{index}` -> the device it confirms.
pub fn parse_schalter_echo_topic(topic: &str) -> Option<DeviceAddress> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("schalter"), Some(address), Some(index), None) if !address.is_empty() => {
            Some(DeviceAddress::schalter(address, index.parse().ok()?))
        }
        _ => None,
    }
}

/// `schalter/{address}/{index}/set` -> the device being commanded.
pub fn parse_schalter_command_topic(topic: &str) -> Option<DeviceAddress> {
    let base = topic.strip_suffix("/set")?;
    parse_schalter_echo_topic(base)
}

/// Where a command has to be published.
pub fn command_topic(command: &Command) -> String {
    match command {
        Command::Boiler { .. } => TOPIC_BOILER.to_string(),
        Command::Actuator {
            device: DeviceAddress::Local,
            ..
        } => TOPIC_LOCAL_VALVE.to_string(),
        Command::Actuator {
            device: DeviceAddress::Schalter { address, index },
            ..
        } => schalter_command_topic(address, *index),
    }
}

/// `ON` / `OFF`, case-insensitive. Anything else is not a switch payload.
pub fn parse_switch_payload(payload: &str) -> Option<bool> {
    let payload = payload.trim();
    if payload.eq_ignore_ascii_case("on") {
        Some(true)
    } else if payload.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sensor_topics_yield_the_address() {
        assert_eq!(
            parse_sensor_topic("celsius/boiler-room/28-0001/temperature"),
            Some("28-0001")
        );
        assert_eq!(
            parse_sensor_topic(&sensor_temperature_topic("bus", "28-02")),
            Some("28-02")
        );
        assert_eq!(parse_sensor_topic("celsius/x/28-0001/humidity"), None);
        assert_eq!(parse_sensor_topic("celsius/x/28-0001/temperature/raw"), None);
    }

    #[test]
    fn schalter_echo_and_command_topics_differ() {
        let device = DeviceAddress::schalter("manifold", 2);
        assert_eq!(
            parse_schalter_echo_topic("schalter/manifold/2"),
            Some(device.clone())
        );
        assert_eq!(parse_schalter_echo_topic("schalter/manifold/2/set"), None);
        assert_eq!(parse_schalter_echo_topic("schalter/manifold/two"), None);
        assert_eq!(
            parse_schalter_command_topic("schalter/manifold/2/set"),
            Some(device.clone())
        );
        assert_eq!(
            command_topic(&Command::Actuator { device, on: true }),
            "schalter/manifold/2/set"
        );
        assert_eq!(command_topic(&Command::Boiler { on: false }), TOPIC_BOILER);
    }

    #[test]
    fn zone_commands_are_recognised() {
        assert_eq!(
            parse_zone_command_topic("heating/0badc0de/desired_temperature/set"),
            Some(("0badc0de", ZoneCommand::DesiredTemperature))
        );
        assert_eq!(
            parse_zone_command_topic(&zone_command_topic("0badc0de", ZoneCommand::Mode)),
            Some(("0badc0de", ZoneCommand::Mode))
        );
        assert_eq!(parse_zone_command_topic("heating/0badc0de/state/set"), None);
        assert_eq!(parse_zone_command_topic("heating/0badc0de/mode"), None);
    }

    #[test]
    fn switch_payloads() {
        assert_eq!(parse_switch_payload(" ON\n"), Some(true));
        assert_eq!(parse_switch_payload("off"), Some(false));
        assert_eq!(parse_switch_payload("1"), None);
    }
}
