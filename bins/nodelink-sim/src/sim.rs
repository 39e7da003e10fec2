//! Simulated platform collaborators.
//!
//! The wireless link and the broker session "connect" after a short delay
//! once configured, as long as they are marked reachable. The HTTP control
//! surface drives drops, reachability and inbound messages.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nodelink_core::{
    BrokerConfig, BrokerSession, InboundMessage, ParamError, ParameterStore, ProvisioningField,
    ProvisioningInterface, QoS, Scope, StatusIndicator, WifiLink,
};
use nodelink_runtime::{EventSender, FirmwareError, FirmwareSink, LinkStatus, SessionStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

const PUBLISH_HISTORY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f` after `delay` on the current tokio runtime, if any.
fn after(delay: Duration, f: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                f();
            });
        }
        Err(_) => warn!("no tokio runtime, simulated connect skipped"),
    }
}

// ============================================================================
// Wireless link
// ============================================================================

pub struct SimWifi {
    events: EventSender,
    connect_delay: Duration,
    reachable: Arc<AtomicBool>,
    /// Bumped on every configure so a stale connect is discarded.
    generation: Arc<AtomicU64>,
    ssid: Mutex<String>,
}

impl SimWifi {
    pub fn new(events: EventSender, connect_delay: Duration) -> Self {
        Self {
            events,
            connect_delay,
            reachable: Arc::new(AtomicBool::new(true)),
            generation: Arc::new(AtomicU64::new(0)),
            ssid: Mutex::new(String::new()),
        }
    }

    pub fn ssid(&self) -> String {
        lock(&self.ssid).clone()
    }

    /// Make the access point (un)reachable. Going unreachable drops the link.
    pub fn set_reachable(&self, reachable: bool) {
        let was = self.reachable.swap(reachable, Ordering::SeqCst);
        if was && !reachable {
            info!("simulated access point lost");
            self.events.link(LinkStatus::Down);
        } else if !was && reachable {
            let ssid = self.ssid();
            self.connect(&ssid);
        }
    }

    fn connect(&self, ssid: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if ssid.is_empty() {
            warn!("no ssid configured, waiting for provisioning");
            return;
        }

        let events = self.events.clone();
        let current = Arc::clone(&self.generation);
        let reachable = Arc::clone(&self.reachable);
        after(self.connect_delay, move || {
            if current.load(Ordering::SeqCst) == generation && reachable.load(Ordering::SeqCst) {
                events.link(LinkStatus::Up);
            }
        });
    }
}

impl WifiLink for SimWifi {
    fn configure(&self, ssid: &str, _password: &str) {
        info!(ssid, "simulated wifi configured");
        *lock(&self.ssid) = ssid.to_string();
        self.connect(ssid);
    }
}

// ============================================================================
// Broker session
// ============================================================================

/// A message the simulated broker accepted for publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retained: bool,
    pub timestamp: String,
}

pub struct SimBroker {
    events: EventSender,
    connect_delay: Duration,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    base_topic: Mutex<String>,
    subscriptions: Mutex<BTreeMap<String, QoS>>,
    published: Mutex<VecDeque<PublishedMessage>>,
}

impl SimBroker {
    pub fn new(events: EventSender, connect_delay: Duration) -> Self {
        Self {
            events,
            connect_delay,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            base_topic: Mutex::new(String::new()),
            subscriptions: Mutex::new(BTreeMap::new()),
            published: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Full topic filters currently subscribed.
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).keys().cloned().collect()
    }

    /// Most recent publications, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).iter().cloned().collect()
    }

    /// Simulate the broker dropping the session.
    pub fn drop_session(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscriptions).clear();
        info!("simulated broker session dropped");
        self.events.session(SessionStatus::Down)
    }

    /// Deliver a message published by another client. Returns `false` when
    /// no subscription matches.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        if !lock(&self.subscriptions)
            .keys()
            .any(|filter| topic_matches(filter, topic))
        {
            debug!(topic, "no matching subscription");
            return false;
        }

        let base = lock(&self.base_topic).clone();
        let (scope, relative) = Scope::classify(&base, topic);
        self.events
            .message(InboundMessage::new(relative, payload.to_vec(), scope))
    }

    fn resolve(&self, topic: &str, scope: Scope) -> String {
        scope.resolve(&lock(&self.base_topic), topic)
    }
}

impl BrokerSession for SimBroker {
    fn start(&self, config: &BrokerConfig) {
        *lock(&self.base_topic) = config.base_topic.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if config.host.is_empty() {
            warn!("no broker host configured, waiting for provisioning");
            return;
        }
        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "simulated broker connecting"
        );

        let events = self.events.clone();
        let current = Arc::clone(&self.generation);
        let connected = Arc::clone(&self.connected);
        after(self.connect_delay, move || {
            if current.load(Ordering::SeqCst) == generation {
                connected.store(true, Ordering::SeqCst);
                events.session(SessionStatus::Up);
            }
        });
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.subscriptions).clear();
        debug!("simulated broker stopped");
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retained: bool, scope: Scope) -> bool {
        if !self.is_connected() {
            return false;
        }

        let message = PublishedMessage {
            topic: self.resolve(topic, scope),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos: qos.level(),
            retained,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };
        debug!(topic = %message.topic, retained, "published");

        let mut published = lock(&self.published);
        if published.len() == PUBLISH_HISTORY {
            published.pop_front();
        }
        published.push_back(message);
        true
    }

    fn subscribe(&self, topic: &str, qos: QoS, scope: Scope) -> bool {
        if !self.is_connected() {
            return false;
        }
        let filter = self.resolve(topic, scope);
        lock(&self.subscriptions).insert(filter, qos);
        true
    }

    fn unsubscribe(&self, topic: &str, scope: Scope) -> bool {
        let filter = self.resolve(topic, scope);
        lock(&self.subscriptions).remove(&filter).is_some()
    }
}

/// MQTT-style filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        match level {
            "#" => return true,
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if topic_levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    topic_levels.next().is_none()
}

// ============================================================================
// Provisioning and indicator
// ============================================================================

/// Why a provisioning write was refused.
#[derive(Debug)]
pub enum ProvisioningWriteError {
    ReadOnly,
    Params(ParamError),
}

/// Provisioning fields backed by the parameter store, plus the command and
/// connection-status fields.
pub struct SimProvisioning {
    params: Arc<ParameterStore>,
    events: EventSender,
    command: Mutex<String>,
    status: Mutex<String>,
}

impl SimProvisioning {
    pub fn new(params: Arc<ParameterStore>, events: EventSender) -> Self {
        Self {
            params,
            events,
            command: Mutex::new(String::new()),
            status: Mutex::new(String::new()),
        }
    }

    /// Write a field and notify the lifecycle.
    pub fn write(
        &self,
        field: ProvisioningField,
        value: &str,
    ) -> Result<(), ProvisioningWriteError> {
        match field {
            ProvisioningField::ConnectionStatus => return Err(ProvisioningWriteError::ReadOnly),
            ProvisioningField::Command => *lock(&self.command) = value.to_string(),
            _ => {
                if let Some(name) = field.param_name() {
                    self.params
                        .set(name, value)
                        .map_err(ProvisioningWriteError::Params)?;
                }
            }
        }

        debug!(field = field.as_str(), "provisioning field written");
        self.events.provisioning(field);
        Ok(())
    }

    pub(crate) fn set_connection_status(&self, status: &str) {
        *lock(&self.status) = status.to_string();
    }
}

impl ProvisioningInterface for SimProvisioning {
    fn init(&self) {
        info!("simulated provisioning interface ready");
    }

    fn read(&self, field: ProvisioningField) -> String {
        match field {
            ProvisioningField::Command => lock(&self.command).clone(),
            ProvisioningField::ConnectionStatus => lock(&self.status).clone(),
            _ => field
                .param_name()
                .map(|name| {
                    self.params.get(name).unwrap_or_else(|e| {
                        warn!(param = name, error = %e, "provisioning read failed");
                        String::new()
                    })
                })
                .unwrap_or_default(),
        }
    }
}

/// Two status LEDs plus the provisioning connection-status mirror.
pub struct SimIndicator {
    provisioning: Arc<SimProvisioning>,
    signal: Mutex<(bool, bool)>,
}

impl SimIndicator {
    pub fn new(provisioning: Arc<SimProvisioning>) -> Self {
        Self {
            provisioning,
            signal: Mutex::new((false, false)),
        }
    }

    pub fn signal(&self) -> (bool, bool) {
        *lock(&self.signal)
    }
}

impl StatusIndicator for SimIndicator {
    fn set_signal(&self, link: bool, network: bool) {
        *lock(&self.signal) = (link, network);
        debug!(link, network, "status leds");
    }

    fn set_status(&self, status: &str) {
        self.provisioning.set_connection_status(status);
    }
}

// ============================================================================
// Firmware
// ============================================================================

/// Keeps the last complete image in memory instead of flashing it.
#[derive(Default)]
pub struct SimFirmware {
    staging: Mutex<Vec<u8>>,
    installed: Mutex<Option<Vec<u8>>>,
}

impl SimFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the last image installed.
    pub fn installed_size(&self) -> Option<usize> {
        lock(&self.installed).as_ref().map(Vec::len)
    }
}

impl FirmwareSink for SimFirmware {
    fn begin(&self, size: usize) -> Result<(), FirmwareError> {
        let mut staging = lock(&self.staging);
        staging.clear();
        staging.try_reserve(size).map_err(|e| FirmwareError::Rejected(e.to_string()))
    }

    fn write(&self, chunk: &[u8]) -> Result<(), FirmwareError> {
        lock(&self.staging).extend_from_slice(chunk);
        Ok(())
    }

    fn finish(&self) -> Result<(), FirmwareError> {
        let image = std::mem::take(&mut *lock(&self.staging));
        info!(size = image.len(), "firmware image installed, reboot skipped");
        *lock(&self.installed) = Some(image);
        Ok(())
    }

    fn abort(&self) {
        lock(&self.staging).clear();
    }
}
