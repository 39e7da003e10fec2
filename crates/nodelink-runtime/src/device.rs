//! Application callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nodelink_core::{BrokerSession, ConnectivityState, ParameterStore, QoS, Scope, DEVICE_LOGGING};
use nodelink_protocol::LOG_TOPIC;
use tracing::{info, warn};

/// What a device callback can reach: the broker session and the parameter
/// store.
#[derive(Clone)]
pub struct DeviceContext {
    broker: Arc<dyn BrokerSession>,
    params: Arc<ParameterStore>,
    online: Arc<AtomicBool>,
}

impl DeviceContext {
    pub fn new(broker: Arc<dyn BrokerSession>, params: Arc<ParameterStore>) -> Self {
        Self {
            broker,
            params,
            online: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    /// Whether the application is running, i.e. the node is Networked.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retained: bool,
        scope: Scope,
    ) -> bool {
        self.broker.publish(topic, payload, qos, retained, scope)
    }

    /// Write a device log line. It always goes to the console and is also
    /// published on the local log topic while online with device logging
    /// enabled. Returns whether it was published.
    pub fn log(&self, message: &str) -> bool {
        info!(target: "nodelink::device", "{message}");

        if !self.is_online() {
            return false;
        }
        match self.params.get_bool(DEVICE_LOGGING) {
            Ok(true) => self.publish_str(LOG_TOPIC, message, Scope::Local),
            Ok(false) => false,
            Err(e) => {
                warn!(error = %e, "cannot read device logging flag");
                false
            }
        }
    }

    /// Publish a UTF-8 payload at QoS 0 without the retained flag.
    pub fn publish_str(&self, topic: &str, payload: &str, scope: Scope) -> bool {
        self.publish(topic, payload.as_bytes(), QoS::AtMostOnce, false, scope)
    }

    pub fn subscribe(&self, topic: &str, qos: QoS, scope: Scope) -> bool {
        self.broker.subscribe(topic, qos, scope)
    }

    pub fn unsubscribe(&self, topic: &str, scope: Scope) -> bool {
        self.broker.unsubscribe(topic, scope)
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext").finish_non_exhaustive()
    }
}

/// Callbacks of the embedding application. All have empty defaults.
///
/// `on_online`, `on_loop`, `on_message` and `on_update` only run while the
/// node is Networked. Use [`DeviceContext::log`] for log lines that should
/// reach remote tooling.
pub trait Device: Send + Sync {
    /// The node entered Networked. Subscribe to application topics here.
    fn on_online(&self, ctx: &DeviceContext) {
        let _ = ctx;
    }

    /// The node left Networked.
    fn on_offline(&self, ctx: &DeviceContext) {
        let _ = ctx;
    }

    /// Inbound message outside the framework's own topics. Local topics are
    /// relative to the base topic.
    fn on_message(&self, ctx: &DeviceContext, topic: &str, payload: &[u8], scope: Scope) {
        let _ = (ctx, topic, payload, scope);
    }

    /// Periodic callback at the configured loop interval.
    fn on_loop(&self, ctx: &DeviceContext) {
        let _ = ctx;
    }

    /// A parameter was written remotely.
    fn on_update(&self, ctx: &DeviceContext, param: &str, value: &str) {
        let _ = (ctx, param, value);
    }

    /// Every connectivity state change, including the initial Disconnected.
    fn on_status(&self, state: ConnectivityState) {
        let _ = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelink_core::{system_parameters, BrokerConfig, MemoryBackend};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Broker {
        published: Mutex<Vec<(String, String)>>,
    }

    impl BrokerSession for Broker {
        fn start(&self, _: &BrokerConfig) {}
        fn stop(&self) {}
        fn publish(&self, topic: &str, payload: &[u8], _: QoS, _: bool, _: Scope) -> bool {
            self.published.lock().unwrap().push((
                topic.to_string(),
                String::from_utf8_lossy(payload).into_owned(),
            ));
            true
        }
        fn subscribe(&self, _: &str, _: QoS, _: Scope) -> bool {
            true
        }
        fn unsubscribe(&self, _: &str, _: Scope) -> bool {
            true
        }
    }

    fn context() -> (DeviceContext, Arc<Broker>) {
        let store =
            ParameterStore::with_parameters(MemoryBackend::new("t"), 4, system_parameters("id"))
                .unwrap();
        store.init().unwrap();
        let broker = Arc::new(Broker::default());
        (DeviceContext::new(broker.clone(), Arc::new(store)), broker)
    }

    #[test]
    fn test_log_is_gated_by_flag_and_online_state() {
        let (ctx, broker) = context();

        ctx.set_online(true);
        assert!(!ctx.log("flag off"));

        ctx.params().set_bool(DEVICE_LOGGING, true).unwrap();
        assert!(ctx.log("sensor ready"));

        ctx.set_online(false);
        assert!(!ctx.log("offline"));

        assert_eq!(
            *broker.published.lock().unwrap(),
            vec![("nodelink/log".to_string(), "sensor ready".to_string())]
        );
    }
}
