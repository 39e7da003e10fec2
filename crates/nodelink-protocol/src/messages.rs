//! Message types for remote parameter management.
//!
//! - Inbound: [`ParamCommand`] parsed from a local topic
//! - Outbound: [`Reply`] on a value/schema topic, [`Announcement`] on entering Networked

use std::sync::OnceLock;

use nodelink_core::{ConnectivityState, ParamType, ParameterStore};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Topic namespace reserved for the framework.
pub const PREFIX: &str = "nodelink";

pub const DESCRIBE_TOPIC: &str = "nodelink/describe";
pub const SCHEMA_TOPIC: &str = "nodelink/schema";
pub const ANNOUNCEMENT_TOPIC: &str = "nodelink/announcement";

/// Local topic filters the application host subscribes to while networked.
pub const COMMAND_FILTERS: [&str; 4] = [
    "nodelink/get/+",
    "nodelink/set/+",
    "nodelink/unset/+",
    DESCRIBE_TOPIC,
];

/// Topic a parameter's value is reported on.
pub fn value_topic(name: &str) -> String {
    format!("{PREFIX}/value/{name}")
}

/// Device log lines, published while device logging is enabled.
pub const LOG_TOPIC: &str = "nodelink/log";

pub const UPDATE_BEGIN_TOPIC: &str = "nodelink/update/begin";
pub const UPDATE_WRITE_TOPIC: &str = "nodelink/update/write";
pub const UPDATE_FINISH_TOPIC: &str = "nodelink/update/finish";
/// The node asks for the next chunk here; the payload is the maximum size.
pub const UPDATE_REQUEST_TOPIC: &str = "nodelink/update/request";

/// Local topics the application host subscribes to while a firmware sink
/// is installed.
pub const UPDATE_FILTERS: [&str; 3] = [
    UPDATE_BEGIN_TOPIC,
    UPDATE_WRITE_TOPIC,
    UPDATE_FINISH_TOPIC,
];

/// Largest firmware chunk a node requests at once.
pub const UPDATE_CHUNK_SIZE: usize = 4096;

fn command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^nodelink/(get|set|unset)/([A-Za-z0-9_.\-]+)$")
            .unwrap_or_else(|e| panic!("invalid command pattern: {e}"))
    })
}

// ============================================================================
// Inbound
// ============================================================================

/// A remote parameter management request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamCommand {
    Get(String),
    Set { name: String, value: String },
    Unset(String),
    Describe,
}

impl ParamCommand {
    /// Parse a command from a local topic. Returns `None` for topics outside
    /// the command namespace.
    pub fn parse(topic: &str, payload: &str) -> Option<Self> {
        if topic == DESCRIBE_TOPIC {
            return Some(ParamCommand::Describe);
        }

        let captures = command_pattern().captures(topic)?;
        let name = captures[2].to_string();
        match &captures[1] {
            "get" => Some(ParamCommand::Get(name)),
            "set" => Some(ParamCommand::Set {
                name,
                value: payload.to_string(),
            }),
            "unset" => Some(ParamCommand::Unset(name)),
            _ => None,
        }
    }

    /// Whether a local topic belongs to the command namespace.
    pub fn matches(topic: &str) -> bool {
        topic == DESCRIBE_TOPIC || command_pattern().is_match(topic)
    }

    pub fn param_name(&self) -> Option<&str> {
        match self {
            ParamCommand::Get(name) | ParamCommand::Unset(name) => Some(name),
            ParamCommand::Set { name, .. } => Some(name),
            ParamCommand::Describe => None,
        }
    }
}

/// A step of the firmware update exchange.
///
/// Tooling publishes `begin` with the image size, then answers every chunk
/// request with a `write` of at most the requested size, and sends `finish`
/// once the whole image was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCommand {
    Begin(usize),
    Write(Vec<u8>),
    Finish,
}

impl UpdateCommand {
    /// Whether a local topic belongs to the update namespace.
    pub fn matches(topic: &str) -> bool {
        UPDATE_FILTERS.contains(&topic)
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// A local-scope publication answering a [`ParamCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub topic: String,
    pub payload: String,
}

impl Reply {
    pub fn value(name: &str, value: impl Into<String>) -> Self {
        Self {
            topic: value_topic(name),
            payload: value.into(),
        }
    }

    pub fn schema(listing: impl Into<String>) -> Self {
        Self {
            topic: SCHEMA_TOPIC.to_string(),
            payload: listing.into(),
        }
    }
}

/// Declared parameter as advertised to remote tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
}

impl ParamDescriptor {
    /// Descriptors of every declared parameter, in declaration order.
    pub fn from_store(store: &ParameterStore) -> Vec<Self> {
        store
            .parameters()
            .iter()
            .map(|p| ParamDescriptor {
                name: p.name().to_string(),
                param_type: p.param_type(),
            })
            .collect()
    }
}

/// Retained device announcement published on entering Networked.
///
/// # Example
/// ```json
/// {
///   "deviceType": "thermostat",
///   "firmwareVersion": "1.2.0",
///   "baseTopic": "home/living-room",
///   "state": "Networked",
///   "parameters": [{ "name": "setpoint", "type": "double" }],
///   "timestamp": "2026-01-17T10:30:00.000Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub device_type: String,
    pub firmware_version: String,
    pub base_topic: String,
    pub state: ConnectivityState,
    pub parameters: Vec<ParamDescriptor>,
    /// ISO 8601 time the announcement was built.
    pub timestamp: String,
}

impl Announcement {
    pub fn new(
        device_type: impl Into<String>,
        firmware_version: impl Into<String>,
        base_topic: impl Into<String>,
        state: ConnectivityState,
        parameters: Vec<ParamDescriptor>,
    ) -> Self {
        Self {
            device_type: device_type.into(),
            firmware_version: firmware_version.into(),
            base_topic: base_topic.into(),
            state,
            parameters,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ParamCommand::parse("nodelink/get/wifi_ssid", ""),
            Some(ParamCommand::Get("wifi_ssid".to_string()))
        );
        assert_eq!(
            ParamCommand::parse("nodelink/set/retries", "7"),
            Some(ParamCommand::Set {
                name: "retries".to_string(),
                value: "7".to_string()
            })
        );
        assert_eq!(
            ParamCommand::parse("nodelink/unset/retries", "ignored"),
            Some(ParamCommand::Unset("retries".to_string()))
        );
        assert_eq!(
            ParamCommand::parse("nodelink/describe", ""),
            Some(ParamCommand::Describe)
        );
    }

    #[test]
    fn test_parse_rejects_foreign_topics() {
        assert_eq!(ParamCommand::parse("nodelink/value/x", ""), None);
        assert_eq!(ParamCommand::parse("nodelink/get/", ""), None);
        assert_eq!(ParamCommand::parse("nodelink/get/a/b", ""), None);
        assert_eq!(ParamCommand::parse("sensors/get/x", ""), None);
        assert!(!ParamCommand::matches("nodelink/schema"));
        assert!(ParamCommand::matches("nodelink/set/mqtt_host"));
    }

    #[test]
    fn test_replies() {
        assert_eq!(
            Reply::value("retries", "7"),
            Reply {
                topic: "nodelink/value/retries".to_string(),
                payload: "7".to_string()
            }
        );
        assert_eq!(Reply::schema("a:s").topic, SCHEMA_TOPIC);
    }

    #[test]
    fn test_announcement_serialization() {
        let announcement = Announcement::new(
            "thermostat",
            "1.2.0",
            "home/living",
            ConnectivityState::Networked,
            vec![ParamDescriptor {
                name: "setpoint".to_string(),
                param_type: ParamType::Double,
            }],
        );
        let json = serde_json::to_string(&announcement).unwrap();

        assert!(json.contains("\"deviceType\":\"thermostat\""));
        assert!(json.contains("\"state\":\"Networked\""));
        assert!(json.contains("{\"name\":\"setpoint\",\"type\":\"double\"}"));
        assert!(announcement.timestamp.ends_with('Z'));
    }
}
