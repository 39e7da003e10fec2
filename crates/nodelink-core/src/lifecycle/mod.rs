//! Connectivity lifecycle.
//!
//! The lifecycle manager owns the single authoritative [`ConnectivityState`]
//! and sequences the wireless link, the broker session and the application
//! runtime:
//!
//! ```text
//!   Disconnected --link up--> Connected --session up--> Networked
//!        ^                        ^  |                      |
//!        |                        |  +--session down--------+ (restart broker)
//!        +------link down---------+-------------------------+
//! ```
//!
//! Collaborators (radio, broker client, provisioning, indicator, application)
//! are reached only through the traits in this module. Their status signals
//! are fed back into [`LifecycleManager`] by the embedding runtime.

mod manager;
mod system;

pub use manager::{Collaborators, Followup, LifecycleManager, StateObserver};
pub use system::{
    system_parameters, BrokerConfig, WifiCredentials, DEFAULT_BROKER_PORT, DEVICE_LOGGING,
};

use serde::{Deserialize, Serialize};

use crate::error::ParamError;
use crate::scope::{InboundMessage, QoS, Scope};

/// Connectivity state, ordered from least to most connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectivityState {
    Disconnected,
    Connected,
    Networked,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Disconnected => "Disconnected",
            ConnectivityState::Connected => "Connected",
            ConnectivityState::Networked => "Networked",
        }
    }

    /// Indicator signal `(link, network)` rendered for this state.
    pub fn signal(&self) -> (bool, bool) {
        match self {
            ConnectivityState::Disconnected => (false, false),
            ConnectivityState::Connected => (true, false),
            ConnectivityState::Networked => (false, true),
        }
    }

    /// The next state down, used when tearing layers off.
    pub fn below(&self) -> ConnectivityState {
        match self {
            ConnectivityState::Networked => ConnectivityState::Connected,
            _ => ConnectivityState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wireless link status reported by the radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

/// Broker session status reported by the broker client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Up,
    Down,
}

/// Named fields of the provisioning interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningField {
    WifiSsid,
    WifiPassword,
    MqttHost,
    MqttClientId,
    MqttUsername,
    MqttPassword,
    BaseTopic,
    /// Free-text command (`restart-wifi`, `restart-mqtt`).
    Command,
    /// Read-only connection status mirror.
    ConnectionStatus,
}

impl ProvisioningField {
    pub const ALL: [ProvisioningField; 9] = [
        ProvisioningField::WifiSsid,
        ProvisioningField::WifiPassword,
        ProvisioningField::MqttHost,
        ProvisioningField::MqttClientId,
        ProvisioningField::MqttUsername,
        ProvisioningField::MqttPassword,
        ProvisioningField::BaseTopic,
        ProvisioningField::Command,
        ProvisioningField::ConnectionStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningField::WifiSsid => "wifi-ssid",
            ProvisioningField::WifiPassword => "wifi-password",
            ProvisioningField::MqttHost => "mqtt-host",
            ProvisioningField::MqttClientId => "mqtt-client-id",
            ProvisioningField::MqttUsername => "mqtt-username",
            ProvisioningField::MqttPassword => "mqtt-password",
            ProvisioningField::BaseTopic => "base-topic",
            ProvisioningField::Command => "command",
            ProvisioningField::ConnectionStatus => "connection-status",
        }
    }

    /// The system parameter backing this field, if any.
    pub fn param_name(&self) -> Option<&'static str> {
        match self {
            ProvisioningField::WifiSsid => Some(system::WIFI_SSID),
            ProvisioningField::WifiPassword => Some(system::WIFI_PASSWORD),
            ProvisioningField::MqttHost => Some(system::MQTT_HOST),
            ProvisioningField::MqttClientId => Some(system::MQTT_CLIENT_ID),
            ProvisioningField::MqttUsername => Some(system::MQTT_USERNAME),
            ProvisioningField::MqttPassword => Some(system::MQTT_PASSWORD),
            ProvisioningField::BaseTopic => Some(system::BASE_TOPIC),
            ProvisioningField::Command | ProvisioningField::ConnectionStatus => None,
        }
    }
}

impl std::str::FromStr for ProvisioningField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProvisioningField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("unknown provisioning field: {s}"))
    }
}

/// Commands accepted on the provisioning command field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningCommand {
    RestartWifi,
    RestartMqtt,
}

impl ProvisioningCommand {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "restart-wifi" => Some(ProvisioningCommand::RestartWifi),
            "restart-mqtt" => Some(ProvisioningCommand::RestartMqtt),
            _ => None,
        }
    }
}

// ============================================================================
// Collaborator contracts
// ============================================================================

/// Wireless radio driver.
pub trait WifiLink: Send + Sync {
    /// One-time setup at boot.
    fn init(&self) {}

    /// (Re)connect with the given credentials. Status is reported back
    /// asynchronously as [`LinkStatus`].
    fn configure(&self, ssid: &str, password: &str);
}

/// Message-broker client.
pub trait BrokerSession: Send + Sync {
    fn init(&self) {}

    /// Start a session. Status is reported back as [`SessionStatus`].
    fn start(&self, config: &BrokerConfig);

    /// Stop the session. Must be idempotent.
    fn stop(&self);

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retained: bool, scope: Scope)
        -> bool;

    fn subscribe(&self, topic: &str, qos: QoS, scope: Scope) -> bool;

    fn unsubscribe(&self, topic: &str, scope: Scope) -> bool;
}

/// Application runtime hosted on top of the broker session.
///
/// `start` is called only when entering Networked, `stop` only when
/// leaving it.
pub trait ApplicationRuntime: Send + Sync {
    fn start(&self);

    fn stop(&self);

    /// Deliver an inbound broker message. Only persistent storage faults
    /// are returned.
    fn forward(&self, message: &InboundMessage) -> Result<(), ParamError>;
}

/// Visual/remote status indicator.
pub trait StatusIndicator: Send + Sync {
    fn init(&self) {}

    /// Two-signal rendering of the state (link-level, network-level).
    fn set_signal(&self, link: bool, network: bool);

    /// Free-text status for remote display.
    fn set_status(&self, status: &str);
}

/// Short-range provisioning interface.
pub trait ProvisioningInterface: Send + Sync {
    fn init(&self) {}

    /// Current value of a field.
    fn read(&self, field: ProvisioningField) -> String;
}
