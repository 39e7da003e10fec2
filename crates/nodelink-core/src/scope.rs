//! Topic scopes and broker message types.
//!
//! A topic in the local scope lives under the device's base topic, a topic
//! in the global scope is used as-is.

use serde::{Deserialize, Serialize};

/// Whether a topic is prefixed with the device's base topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Prefixed with the configured base topic.
    Local,
    /// Used without prefix.
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Global => "global",
        }
    }

    /// Build the full broker topic for `topic` in this scope.
    ///
    /// An empty base topic leaves local topics unprefixed.
    pub fn resolve(&self, base_topic: &str, topic: &str) -> String {
        match self {
            Scope::Local if !base_topic.is_empty() => {
                format!("{}/{}", base_topic.trim_end_matches('/'), topic)
            }
            _ => topic.to_string(),
        }
    }

    /// Split a full broker topic into its scope and the scope-relative topic.
    ///
    /// Topics below `base_topic` are local and returned without the prefix
    /// (and without a leading `/`); everything else is global.
    pub fn classify<'a>(base_topic: &str, topic: &'a str) -> (Scope, &'a str) {
        let base = base_topic.trim_end_matches('/');
        if !base.is_empty() {
            if let Some(rest) = topic.strip_prefix(base) {
                if let Some(rest) = rest.strip_prefix('/') {
                    return (Scope::Local, rest);
                }
            }
        }
        (Scope::Global, topic)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality of service level for publish and subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A message delivered by the broker client.
///
/// `topic` is scope-relative: for local messages the base topic has already
/// been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub scope: Scope,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, scope: Scope) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            scope,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as UTF-8, replacing invalid sequences.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
