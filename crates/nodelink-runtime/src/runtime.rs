//! The node event loop.

use std::sync::Arc;
use std::time::Duration;

use nodelink_core::{
    BrokerSession, Collaborators, Followup, LifecycleManager, NodeConfig, ParameterStore,
    ProvisioningInterface, StatusIndicator, WifiLink,
};
use tracing::{error, info};

use crate::device::Device;
use crate::error::RuntimeError;
use crate::event::{EventQueue, EventReceiver, EventSender, NodeEvent};
use crate::host::DeviceHost;
use crate::update::FirmwareSink;

/// Platform collaborators. The application runtime is always a [`DeviceHost`].
#[derive(Clone)]
pub struct Peripherals {
    pub indicator: Arc<dyn StatusIndicator>,
    pub provisioning: Arc<dyn ProvisioningInterface>,
    pub wifi: Arc<dyn WifiLink>,
    pub broker: Arc<dyn BrokerSession>,
    /// Firmware target; updates over the broker are refused when absent.
    pub firmware: Option<Arc<dyn FirmwareSink>>,
}

/// Owns the lifecycle manager and consumes the event queue.
pub struct NodeRuntime {
    config: NodeConfig,
    manager: Arc<LifecycleManager>,
    host: Arc<DeviceHost>,
    sender: EventSender,
    rx: EventReceiver,
}

impl NodeRuntime {
    pub fn new(
        config: NodeConfig,
        params: Arc<ParameterStore>,
        peripherals: Peripherals,
        device: Arc<dyn Device>,
        events: EventQueue,
    ) -> Self {
        let mut host = DeviceHost::new(
            Arc::clone(&device),
            Arc::clone(&peripherals.broker),
            Arc::clone(&params),
            &config,
        );
        if let Some(sink) = peripherals.firmware {
            host = host.with_firmware(sink);
        }
        let host = Arc::new(host);

        let collaborators = Collaborators {
            indicator: peripherals.indicator,
            provisioning: peripherals.provisioning,
            wifi: peripherals.wifi,
            broker: peripherals.broker,
            application: host.clone(),
        };

        let manager = LifecycleManager::new(params, collaborators)
            .with_reconnect(config.reconnect)
            .with_observer(Box::new(move |state| device.on_status(state)));

        let (sender, rx) = events.into_parts();

        Self {
            config,
            manager: Arc::new(manager),
            host,
            sender,
            rx,
        }
    }

    pub fn manager(&self) -> Arc<LifecycleManager> {
        Arc::clone(&self.manager)
    }

    pub fn host(&self) -> Arc<DeviceHost> {
        Arc::clone(&self.host)
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Wait out the startup jitter, boot the lifecycle and process events
    /// until shutdown. Returns an error on persistent storage faults.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        if let Some(max) = self.config.startup_jitter() {
            let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
            let delay = Duration::from_millis(rand::random_range(0..=max_ms));
            info!(?delay, "startup delay");
            tokio::time::sleep(delay).await;
        }

        self.manager.boot().inspect_err(|e| error!(error = %e, "boot failed"))?;

        while let Some(event) = self.rx.recv().await {
            if matches!(event, NodeEvent::Shutdown) {
                info!("shutting down");
                break;
            }
            if let Err(e) = self.dispatch(event) {
                error!(error = %e, "fatal fault, stopping event loop");
                return Err(e);
            }
        }

        Ok(())
    }

    fn dispatch(&self, event: NodeEvent) -> Result<(), RuntimeError> {
        let followup = match event {
            NodeEvent::Link(status) => self.manager.handle_link(status)?,
            NodeEvent::Session(status) => self.manager.handle_session(status)?,
            NodeEvent::Provisioning(field) => self.manager.handle_provisioning(field)?,
            NodeEvent::BrokerRetry(generation) => self.manager.handle_broker_retry(generation)?,
            NodeEvent::Message(message) => {
                self.manager.forward(&message)?;
                Followup::None
            }
            NodeEvent::Shutdown => Followup::None,
        };

        if let Followup::RetryBroker { delay, generation } = followup {
            let sender = self.sender.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                sender.send(NodeEvent::BrokerRetry(generation)).await;
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish()
    }
}
