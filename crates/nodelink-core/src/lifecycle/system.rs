//! System parameters read by the lifecycle manager.

use crate::error::ParamError;
use crate::params::{Parameter, ParameterStore};

pub(crate) const WIFI_SSID: &str = "wifi_ssid";
pub(crate) const WIFI_PASSWORD: &str = "wifi_password";
pub(crate) const MQTT_HOST: &str = "mqtt_host";
pub(crate) const MQTT_PORT: &str = "mqtt_port";
pub(crate) const MQTT_CLIENT_ID: &str = "mqtt_client_id";
pub(crate) const MQTT_USERNAME: &str = "mqtt_username";
pub(crate) const MQTT_PASSWORD: &str = "mqtt_password";
pub(crate) const BASE_TOPIC: &str = "base_topic";
/// Bool parameter enabling device log publication over the broker.
pub const DEVICE_LOGGING: &str = "device_logging";

pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Declarations of the connectivity parameters. Embedding applications
/// declare these alongside their own parameters.
pub fn system_parameters(default_client_id: &str) -> Vec<Parameter> {
    vec![
        Parameter::string(WIFI_SSID, ""),
        Parameter::string(WIFI_PASSWORD, ""),
        Parameter::string(MQTT_HOST, ""),
        Parameter::long(MQTT_PORT, i32::from(DEFAULT_BROKER_PORT)),
        Parameter::string(MQTT_CLIENT_ID, default_client_id),
        Parameter::string(MQTT_USERNAME, ""),
        Parameter::string(MQTT_PASSWORD, ""),
        Parameter::string(BASE_TOPIC, ""),
        Parameter::bool(DEVICE_LOGGING, false),
    ]
}

/// Wireless credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    pub fn load(store: &ParameterStore) -> Result<Self, ParamError> {
        Ok(Self {
            ssid: store.get(WIFI_SSID)?,
            password: store.get(WIFI_PASSWORD)?,
        })
    }
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

/// Broker session parameters passed to [`BrokerSession::start`](super::BrokerSession::start).
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub base_topic: String,
}

impl BrokerConfig {
    /// Read the broker configuration. A missing or out-of-range port falls
    /// back to [`DEFAULT_BROKER_PORT`].
    pub fn load(store: &ParameterStore) -> Result<Self, ParamError> {
        let port = u16::try_from(store.get_long(MQTT_PORT)?)
            .ok()
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_BROKER_PORT);

        Ok(Self {
            host: store.get(MQTT_HOST)?,
            port,
            client_id: store.get(MQTT_CLIENT_ID)?,
            username: store.get(MQTT_USERNAME)?,
            password: store.get(MQTT_PASSWORD)?,
            base_topic: store.get(BASE_TOPIC)?,
        })
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("base_topic", &self.base_topic)
            .finish()
    }
}
