//! The lifecycle manager.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::system::{BrokerConfig, WifiCredentials};
use super::{
    ApplicationRuntime, BrokerSession, ConnectivityState, LinkStatus, ProvisioningCommand,
    ProvisioningField, ProvisioningInterface, SessionStatus, StatusIndicator, WifiLink,
};
use crate::config::ReconnectPolicy;
use crate::error::LifecycleError;
use crate::params::ParameterStore;
use crate::scope::InboundMessage;

/// Callback invoked after every state change, while the lifecycle lock is held.
pub type StateObserver = Box<dyn Fn(ConnectivityState) + Send + Sync>;

/// Work the caller has to schedule after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    None,
    /// Deliver `generation` to [`LifecycleManager::handle_broker_retry`]
    /// once the delay has elapsed.
    RetryBroker { delay: Duration, generation: u64 },
}

/// The external components driven by the lifecycle manager.
#[derive(Clone)]
pub struct Collaborators {
    pub indicator: Arc<dyn StatusIndicator>,
    pub provisioning: Arc<dyn ProvisioningInterface>,
    pub wifi: Arc<dyn WifiLink>,
    pub broker: Arc<dyn BrokerSession>,
    pub application: Arc<dyn ApplicationRuntime>,
}

#[derive(Debug)]
struct Inner {
    state: ConnectivityState,
    /// Consecutive session losses since the last successful session.
    retry_attempt: u32,
    /// Last generation handed out for a deferred broker restart.
    retry_generation: u64,
    /// Generation of the outstanding deferred restart, if any.
    pending_retry: Option<u64>,
}

/// Owner of the connectivity state.
///
/// Every handler runs to completion under one lock, so collaborator calls
/// triggered by a transition never interleave with another transition.
/// Collaborators must therefore not call back into the manager
/// synchronously; they report status through the runtime's event queue.
pub struct LifecycleManager {
    inner: Mutex<Inner>,
    params: Arc<ParameterStore>,
    collaborators: Collaborators,
    reconnect: ReconnectPolicy,
    observer: Option<StateObserver>,
}

impl LifecycleManager {
    pub fn new(params: Arc<ParameterStore>, collaborators: Collaborators) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectivityState::Disconnected,
                retry_attempt: 0,
                retry_generation: 0,
                pending_retry: None,
            }),
            params,
            collaborators,
            reconnect: ReconnectPolicy::Immediate,
            observer: None,
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> ConnectivityState {
        self.lock().state
    }

    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Initialize collaborators, publish the initial state and start the
    /// wireless link.
    pub fn boot(&self) -> Result<(), LifecycleError> {
        let mut inner = self.lock();

        self.collaborators.indicator.init();
        self.collaborators.provisioning.init();
        self.collaborators.wifi.init();
        self.collaborators.broker.init();

        self.publish_state(&mut inner, ConnectivityState::Disconnected);
        self.configure_wifi()?;

        info!("lifecycle booted");
        Ok(())
    }

    pub fn handle_link(&self, status: LinkStatus) -> Result<Followup, LifecycleError> {
        let mut inner = self.lock();

        match (status, inner.state) {
            (LinkStatus::Up, ConnectivityState::Disconnected) => {
                let config = BrokerConfig::load(&self.params)?;
                inner.retry_attempt = 0;
                inner.pending_retry = None;
                self.publish_state(&mut inner, ConnectivityState::Connected);
                self.start_broker(&config);
            }
            (LinkStatus::Down, state) if state > ConnectivityState::Disconnected => {
                inner.pending_retry = None;
                self.teardown_to(&mut inner, ConnectivityState::Disconnected);
            }
            (status, state) => {
                debug!(?status, %state, "link status ignored");
            }
        }

        Ok(Followup::None)
    }

    pub fn handle_session(&self, status: SessionStatus) -> Result<Followup, LifecycleError> {
        let mut inner = self.lock();

        match (status, inner.state) {
            (SessionStatus::Up, ConnectivityState::Connected) => {
                inner.retry_attempt = 0;
                inner.pending_retry = None;
                self.publish_state(&mut inner, ConnectivityState::Networked);
                self.collaborators.application.start();
                Ok(Followup::None)
            }
            (SessionStatus::Down, state) if state > ConnectivityState::Disconnected => {
                self.teardown_to(&mut inner, ConnectivityState::Connected);
                self.collaborators.broker.stop();
                self.schedule_broker_restart(&mut inner)
            }
            (status, state) => {
                debug!(?status, %state, "session status ignored");
                Ok(Followup::None)
            }
        }
    }

    /// React to a write on a provisioning field. Only the command field
    /// triggers lifecycle work.
    pub fn handle_provisioning(
        &self,
        field: ProvisioningField,
    ) -> Result<Followup, LifecycleError> {
        if field != ProvisioningField::Command {
            debug!(field = field.as_str(), "provisioning field changed");
            return Ok(Followup::None);
        }

        let mut inner = self.lock();
        let value = self
            .collaborators
            .provisioning
            .read(ProvisioningField::Command);

        match ProvisioningCommand::parse(&value) {
            Some(ProvisioningCommand::RestartWifi) => {
                info!("restarting wireless link");
                inner.pending_retry = None;
                self.teardown_to(&mut inner, ConnectivityState::Disconnected);
                self.configure_wifi()?;
            }
            Some(ProvisioningCommand::RestartMqtt) => {
                if inner.state == ConnectivityState::Disconnected {
                    debug!("broker restart ignored while disconnected");
                } else {
                    info!("restarting broker session");
                    let config = BrokerConfig::load(&self.params)?;
                    inner.pending_retry = None;
                    self.teardown_to(&mut inner, ConnectivityState::Connected);
                    self.collaborators.broker.stop();
                    self.start_broker(&config);
                }
            }
            None => {
                warn!(command = %value.trim(), "unknown provisioning command");
            }
        }

        Ok(Followup::None)
    }

    /// Perform the deferred broker restart scheduled as `generation`.
    /// Retries superseded by a later schedule, a restart command or a link
    /// change are ignored.
    pub fn handle_broker_retry(&self, generation: u64) -> Result<Followup, LifecycleError> {
        let mut inner = self.lock();

        if inner.state != ConnectivityState::Connected || inner.pending_retry != Some(generation) {
            debug!(
                state = %inner.state,
                generation,
                pending = ?inner.pending_retry,
                "stale broker retry ignored"
            );
            return Ok(Followup::None);
        }

        let config = BrokerConfig::load(&self.params)?;
        inner.pending_retry = None;
        self.start_broker(&config);
        Ok(Followup::None)
    }

    /// Pass an inbound message to the application. Messages are only
    /// delivered while Networked; returns whether it was delivered.
    pub fn forward(&self, message: &InboundMessage) -> Result<bool, LifecycleError> {
        let inner = self.lock();

        if inner.state != ConnectivityState::Networked {
            debug!(
                topic = %message.topic,
                state = %inner.state,
                "message dropped while not networked"
            );
            return Ok(false);
        }

        self.collaborators.application.forward(message)?;
        Ok(true)
    }

    // ========================================================================
    // Internals (all called with the lock held)
    // ========================================================================

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_state(&self, inner: &mut Inner, next: ConnectivityState) {
        let previous = inner.state;
        inner.state = next;

        let (link, network) = next.signal();
        self.collaborators.indicator.set_signal(link, network);
        self.collaborators.indicator.set_status(next.as_str());

        if previous == next {
            debug!(state = %next, "state republished");
        } else {
            info!(from = %previous, to = %next, "connectivity state changed");
        }

        if let Some(observer) = &self.observer {
            observer(next);
        }
    }

    /// Stop layers top-down until `target` is reached, publishing every
    /// intermediate state.
    fn teardown_to(&self, inner: &mut Inner, target: ConnectivityState) {
        while inner.state > target {
            match inner.state {
                ConnectivityState::Networked => self.collaborators.application.stop(),
                ConnectivityState::Connected => self.collaborators.broker.stop(),
                ConnectivityState::Disconnected => unreachable!("nothing below Disconnected"),
            }
            let next = inner.state.below();
            self.publish_state(inner, next);
        }
    }

    fn schedule_broker_restart(&self, inner: &mut Inner) -> Result<Followup, LifecycleError> {
        inner.retry_attempt = inner.retry_attempt.saturating_add(1);
        let delay = self.reconnect.delay_for(inner.retry_attempt);

        if delay.is_zero() {
            let config = BrokerConfig::load(&self.params)?;
            inner.pending_retry = None;
            self.start_broker(&config);
            return Ok(Followup::None);
        }

        inner.retry_generation = inner.retry_generation.wrapping_add(1);
        let generation = inner.retry_generation;
        inner.pending_retry = Some(generation);
        debug!(
            attempt = inner.retry_attempt,
            generation,
            ?delay,
            "broker restart deferred"
        );
        Ok(Followup::RetryBroker { delay, generation })
    }

    fn start_broker(&self, config: &BrokerConfig) {
        debug!(host = %config.host, port = config.port, "starting broker session");
        self.collaborators.broker.start(config);
    }

    fn configure_wifi(&self) -> Result<(), LifecycleError> {
        let credentials = WifiCredentials::load(&self.params)?;
        debug!(ssid = %credentials.ssid, "configuring wireless link");
        self.collaborators
            .wifi
            .configure(&credentials.ssid, &credentials.password);
        Ok(())
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("LifecycleManager")
            .field("state", &inner.state)
            .field("retry_attempt", &inner.retry_attempt)
            .field("pending_retry", &inner.pending_retry)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::{BackendError, ParamError};
    use crate::lifecycle::system_parameters;
    use crate::scope::{InboundMessage, QoS, Scope};
    use crate::KvBackend;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Init(&'static str),
        Signal(bool, bool),
        Status(String),
        WifiConfigure(String, String),
        BrokerStart(String, u16),
        BrokerStop,
        AppStart,
        AppStop,
        AppForward(String),
    }

    #[derive(Default, Clone)]
    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
        command: Arc<Mutex<String>>,
    }

    impl Recorder {
        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        /// Calls other than indicator updates.
        fn take_actions(&self) -> Vec<Call> {
            self.take()
                .into_iter()
                .filter(|c| !matches!(c, Call::Signal(..) | Call::Status(_)))
                .collect()
        }

        fn statuses(&self) -> Vec<String> {
            self.take()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Status(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    struct Indicator(Recorder);
    struct Provisioning(Recorder);
    struct Wifi(Recorder);
    struct Broker(Recorder);
    struct App(Recorder);

    impl StatusIndicator for Indicator {
        fn init(&self) {
            self.0.push(Call::Init("indicator"));
        }
        fn set_signal(&self, link: bool, network: bool) {
            self.0.push(Call::Signal(link, network));
        }
        fn set_status(&self, status: &str) {
            self.0.push(Call::Status(status.to_string()));
        }
    }

    impl ProvisioningInterface for Provisioning {
        fn init(&self) {
            self.0.push(Call::Init("provisioning"));
        }
        fn read(&self, field: ProvisioningField) -> String {
            match field {
                ProvisioningField::Command => self.0.command.lock().unwrap().clone(),
                _ => String::new(),
            }
        }
    }

    impl WifiLink for Wifi {
        fn init(&self) {
            self.0.push(Call::Init("wifi"));
        }
        fn configure(&self, ssid: &str, password: &str) {
            self.0
                .push(Call::WifiConfigure(ssid.to_string(), password.to_string()));
        }
    }

    impl BrokerSession for Broker {
        fn init(&self) {
            self.0.push(Call::Init("broker"));
        }
        fn start(&self, config: &BrokerConfig) {
            self.0.push(Call::BrokerStart(config.host.clone(), config.port));
        }
        fn stop(&self) {
            self.0.push(Call::BrokerStop);
        }
        fn publish(&self, _: &str, _: &[u8], _: QoS, _: bool, _: Scope) -> bool {
            true
        }
        fn subscribe(&self, _: &str, _: QoS, _: Scope) -> bool {
            true
        }
        fn unsubscribe(&self, _: &str, _: Scope) -> bool {
            true
        }
    }

    impl ApplicationRuntime for App {
        fn start(&self) {
            self.0.push(Call::AppStart);
        }
        fn stop(&self) {
            self.0.push(Call::AppStop);
        }
        fn forward(&self, message: &InboundMessage) -> Result<(), ParamError> {
            self.0.push(Call::AppForward(message.topic.clone()));
            Ok(())
        }
    }

    fn collaborators(recorder: &Recorder) -> Collaborators {
        Collaborators {
            indicator: Arc::new(Indicator(recorder.clone())),
            provisioning: Arc::new(Provisioning(recorder.clone())),
            wifi: Arc::new(Wifi(recorder.clone())),
            broker: Arc::new(Broker(recorder.clone())),
            application: Arc::new(App(recorder.clone())),
        }
    }

    fn setup() -> (LifecycleManager, Recorder) {
        let store = ParameterStore::with_parameters(
            MemoryBackend::new("test"),
            8,
            system_parameters("node-1"),
        )
        .unwrap();
        store.init().unwrap();
        store.set("wifi_ssid", "home").unwrap();
        store.set("wifi_password", "secret").unwrap();
        store.set("mqtt_host", "broker.local").unwrap();

        let recorder = Recorder::default();
        let manager = LifecycleManager::new(Arc::new(store), collaborators(&recorder));
        (manager, recorder)
    }

    fn networked() -> (LifecycleManager, Recorder) {
        let (manager, recorder) = setup();
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        manager.handle_session(SessionStatus::Up).unwrap();
        recorder.take();
        (manager, recorder)
    }

    fn start_call() -> Call {
        Call::BrokerStart("broker.local".to_string(), 1883)
    }

    #[test]
    fn test_boot_order() {
        let (manager, recorder) = setup();
        manager.boot().unwrap();

        assert_eq!(
            recorder.take(),
            vec![
                Call::Init("indicator"),
                Call::Init("provisioning"),
                Call::Init("wifi"),
                Call::Init("broker"),
                Call::Signal(false, false),
                Call::Status("Disconnected".to_string()),
                Call::WifiConfigure("home".to_string(), "secret".to_string()),
            ]
        );
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
    }

    #[test]
    fn test_happy_path() {
        let (manager, recorder) = setup();
        manager.boot().unwrap();
        recorder.take();

        manager.handle_link(LinkStatus::Up).unwrap();
        assert_eq!(manager.state(), ConnectivityState::Connected);
        assert_eq!(
            recorder.take(),
            vec![
                Call::Signal(true, false),
                Call::Status("Connected".to_string()),
                start_call(),
            ]
        );

        manager.handle_session(SessionStatus::Up).unwrap();
        assert_eq!(manager.state(), ConnectivityState::Networked);
        assert_eq!(
            recorder.take(),
            vec![
                Call::Signal(false, true),
                Call::Status("Networked".to_string()),
                Call::AppStart,
            ]
        );
    }

    #[test]
    fn test_session_loss_restarts_broker() {
        let (manager, recorder) = networked();

        let followup = manager.handle_session(SessionStatus::Down).unwrap();
        assert_eq!(followup, Followup::None);
        assert_eq!(manager.state(), ConnectivityState::Connected);
        assert_eq!(
            recorder.take(),
            vec![
                Call::AppStop,
                Call::Signal(true, false),
                Call::Status("Connected".to_string()),
                Call::BrokerStop,
                start_call(),
            ]
        );
    }

    #[test]
    fn test_link_loss_from_networked_tears_down_in_order() {
        let (manager, recorder) = networked();

        manager.handle_link(LinkStatus::Down).unwrap();
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
        assert_eq!(
            recorder.take(),
            vec![
                Call::AppStop,
                Call::Signal(true, false),
                Call::Status("Connected".to_string()),
                Call::BrokerStop,
                Call::Signal(false, false),
                Call::Status("Disconnected".to_string()),
            ]
        );
    }

    #[test]
    fn test_link_loss_from_connected() {
        let (manager, recorder) = setup();
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        recorder.take();

        manager.handle_link(LinkStatus::Down).unwrap();
        assert_eq!(recorder.take_actions(), vec![Call::BrokerStop]);
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
    }

    #[test]
    fn test_restart_wifi_while_networked() {
        let (manager, recorder) = networked();
        *recorder.command.lock().unwrap() = "restart-wifi".to_string();

        manager
            .handle_provisioning(ProvisioningField::Command)
            .unwrap();
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
        assert_eq!(
            recorder.take_actions(),
            vec![
                Call::AppStop,
                Call::BrokerStop,
                Call::WifiConfigure("home".to_string(), "secret".to_string()),
            ]
        );
    }

    #[test]
    fn test_restart_wifi_while_disconnected_only_reconfigures() {
        let (manager, recorder) = setup();
        manager.boot().unwrap();
        recorder.take();
        *recorder.command.lock().unwrap() = "restart-wifi".to_string();

        manager
            .handle_provisioning(ProvisioningField::Command)
            .unwrap();
        assert_eq!(
            recorder.take(),
            vec![Call::WifiConfigure("home".to_string(), "secret".to_string())]
        );
    }

    #[test]
    fn test_restart_mqtt_while_networked() {
        let (manager, recorder) = networked();
        *recorder.command.lock().unwrap() = "restart-mqtt".to_string();

        manager
            .handle_provisioning(ProvisioningField::Command)
            .unwrap();
        assert_eq!(manager.state(), ConnectivityState::Connected);
        assert_eq!(
            recorder.take_actions(),
            vec![Call::AppStop, Call::BrokerStop, start_call()]
        );
    }

    #[test]
    fn test_restart_mqtt_while_connected_restarts_broker_only() {
        let (manager, recorder) = setup();
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        recorder.take();
        *recorder.command.lock().unwrap() = "restart-mqtt".to_string();

        manager
            .handle_provisioning(ProvisioningField::Command)
            .unwrap();
        assert_eq!(manager.state(), ConnectivityState::Connected);
        assert_eq!(recorder.take(), vec![Call::BrokerStop, start_call()]);
    }

    #[test]
    fn test_restart_mqtt_while_disconnected_is_ignored() {
        let (manager, recorder) = setup();
        manager.boot().unwrap();
        recorder.take();
        *recorder.command.lock().unwrap() = "restart-mqtt".to_string();

        manager
            .handle_provisioning(ProvisioningField::Command)
            .unwrap();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_other_fields_and_unknown_commands_are_ignored() {
        let (manager, recorder) = networked();
        manager
            .handle_provisioning(ProvisioningField::MqttHost)
            .unwrap();
        *recorder.command.lock().unwrap() = "reboot".to_string();
        manager
            .handle_provisioning(ProvisioningField::Command)
            .unwrap();

        assert!(recorder.take().is_empty());
        assert_eq!(manager.state(), ConnectivityState::Networked);
    }

    #[test]
    fn test_out_of_order_signals_are_ignored() {
        let (manager, recorder) = setup();
        manager.boot().unwrap();
        recorder.take();

        manager.handle_session(SessionStatus::Up).unwrap();
        manager.handle_session(SessionStatus::Down).unwrap();
        manager.handle_link(LinkStatus::Down).unwrap();
        assert!(recorder.take().is_empty());
        assert_eq!(manager.state(), ConnectivityState::Disconnected);

        manager.handle_link(LinkStatus::Up).unwrap();
        recorder.take();
        manager.handle_link(LinkStatus::Up).unwrap();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_app_start_and_stop_are_paired() {
        let (manager, recorder) = networked();
        manager.handle_session(SessionStatus::Down).unwrap();
        manager.handle_session(SessionStatus::Up).unwrap();
        manager.handle_link(LinkStatus::Down).unwrap();

        let app_calls: Vec<Call> = recorder
            .take()
            .into_iter()
            .filter(|c| matches!(c, Call::AppStart | Call::AppStop))
            .collect();
        assert_eq!(app_calls, vec![Call::AppStop, Call::AppStart, Call::AppStop]);
    }

    fn with_backoff(manager: LifecycleManager) -> LifecycleManager {
        manager.with_reconnect(ReconnectPolicy::Backoff {
            initial_ms: 100,
            max_ms: 1000,
            jitter_ms: 0,
        })
    }

    fn retry(followup: Followup) -> (Duration, u64) {
        match followup {
            Followup::RetryBroker { delay, generation } => (delay, generation),
            Followup::None => panic!("expected a deferred retry"),
        }
    }

    #[test]
    fn test_backoff_defers_restart() {
        let (manager, recorder) = setup();
        let manager = with_backoff(manager);
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        recorder.take();

        let (delay, generation) = retry(manager.handle_session(SessionStatus::Down).unwrap());
        assert_eq!(delay, Duration::from_millis(100));
        assert_eq!(recorder.take_actions(), vec![Call::BrokerStop]);

        manager.handle_broker_retry(generation).unwrap();
        assert_eq!(recorder.take_actions(), vec![start_call()]);

        // A second consecutive failure doubles the delay.
        let (delay, _) = retry(manager.handle_session(SessionStatus::Down).unwrap());
        assert_eq!(delay, Duration::from_millis(200));
    }

    #[test]
    fn test_stale_retry_is_ignored() {
        let (manager, recorder) = setup();
        let manager = with_backoff(manager);
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        let (_, generation) = retry(manager.handle_session(SessionStatus::Down).unwrap());
        manager.handle_link(LinkStatus::Down).unwrap();
        recorder.take();

        manager.handle_broker_retry(generation).unwrap();
        assert!(recorder.take().is_empty());

        // Retry without any pending restart.
        manager.handle_link(LinkStatus::Up).unwrap();
        recorder.take();
        manager.handle_broker_retry(generation).unwrap();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_superseded_retry_does_not_cut_backoff_short() {
        let (manager, recorder) = setup();
        let manager = with_backoff(manager);
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();

        let (first_delay, first) = retry(manager.handle_session(SessionStatus::Down).unwrap());
        *recorder.command.lock().unwrap() = "restart-mqtt".to_string();
        manager
            .handle_provisioning(ProvisioningField::Command)
            .unwrap();
        let (second_delay, second) = retry(manager.handle_session(SessionStatus::Down).unwrap());
        assert_eq!(first_delay, Duration::from_millis(100));
        assert_eq!(second_delay, Duration::from_millis(200));
        assert_ne!(first, second);
        recorder.take();

        // The earlier retry fires first and must not start the broker.
        manager.handle_broker_retry(first).unwrap();
        assert!(recorder.take().is_empty());

        manager.handle_broker_retry(second).unwrap();
        assert_eq!(recorder.take_actions(), vec![start_call()]);

        // Each generation is honored at most once.
        manager.handle_broker_retry(second).unwrap();
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_session_up_resets_backoff() {
        let (manager, _recorder) = setup();
        let manager = with_backoff(manager);
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        let (_, generation) = retry(manager.handle_session(SessionStatus::Down).unwrap());
        manager.handle_broker_retry(generation).unwrap();
        manager.handle_session(SessionStatus::Up).unwrap();

        let (delay, _) = retry(manager.handle_session(SessionStatus::Down).unwrap());
        assert_eq!(delay, Duration::from_millis(100));
    }

    #[test]
    fn test_forward_only_while_networked() {
        let (manager, recorder) = setup();
        let message = InboundMessage::new("target", b"21".to_vec(), Scope::Local);
        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        recorder.take();

        assert!(!manager.forward(&message).unwrap());
        assert!(recorder.take().is_empty());

        manager.handle_session(SessionStatus::Up).unwrap();
        recorder.take();
        assert!(manager.forward(&message).unwrap());
        assert_eq!(recorder.take(), vec![Call::AppForward("target".to_string())]);
    }

    #[test]
    fn test_status_sequence_and_observer() {
        let (manager, recorder) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let manager = manager.with_observer(Box::new(move |state| {
            sink.lock().unwrap().push(state);
        }));

        manager.boot().unwrap();
        manager.handle_link(LinkStatus::Up).unwrap();
        manager.handle_session(SessionStatus::Up).unwrap();

        assert_eq!(
            recorder.statuses(),
            vec!["Disconnected", "Connected", "Networked"]
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectivityState::Disconnected,
                ConnectivityState::Connected,
                ConnectivityState::Networked,
            ]
        );
    }

    struct BrokenBackend;

    impl KvBackend for BrokenBackend {
        fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError::Read {
                key: key.to_string(),
                message: "flash fault".to_string(),
            })
        }
        fn set(&self, key: &str, _: &str) -> Result<(), BackendError> {
            Err(BackendError::Write {
                key: key.to_string(),
                message: "flash fault".to_string(),
            })
        }
        fn erase(&self, _: &str) -> Result<bool, BackendError> {
            Ok(false)
        }
    }

    #[test]
    fn test_backend_fault_surfaces_from_link_up() {
        let recorder = Recorder::default();
        let store = ParameterStore::new(BrokenBackend, 4);
        let manager = LifecycleManager::new(Arc::new(store), collaborators(&recorder));

        assert!(matches!(
            manager.boot(),
            Err(LifecycleError::Params(ParamError::Backend(_)))
        ));
        assert!(manager.handle_link(LinkStatus::Up).is_err());
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
    }
}
