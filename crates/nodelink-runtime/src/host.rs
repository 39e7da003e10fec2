//! Application runtime hosting a [`Device`].
//!
//! While the node is Networked the host:
//! - subscribes to the remote parameter command topics
//! - publishes a retained announcement
//! - calls [`Device::on_loop`] at the configured interval
//! - answers remote get/set/unset/describe commands and passes every other
//!   message to the device
//! - streams firmware updates into a [`FirmwareSink`], if one is installed

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nodelink_core::{
    ApplicationRuntime, BrokerConfig, BrokerSession, ConnectivityState, InboundMessage, NodeConfig,
    ParamError, ParameterStore, QoS, Scope,
};
use nodelink_protocol::{
    decode_command, decode_update, encode_announcement, Announcement, ParamCommand,
    ParamDescriptor, Reply, UpdateCommand, ANNOUNCEMENT_TOPIC, COMMAND_FILTERS, UPDATE_FILTERS,
    UPDATE_REQUEST_TOPIC,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::device::{Device, DeviceContext};
use crate::update::{FirmwareSink, FirmwareUpdater};

pub struct DeviceHost {
    device: Arc<dyn Device>,
    ctx: DeviceContext,
    device_type: String,
    firmware_version: String,
    loop_interval: Duration,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    firmware: Option<FirmwareUpdater>,
}

impl DeviceHost {
    pub fn new(
        device: Arc<dyn Device>,
        broker: Arc<dyn BrokerSession>,
        params: Arc<ParameterStore>,
        config: &NodeConfig,
    ) -> Self {
        Self {
            device,
            ctx: DeviceContext::new(broker, params),
            device_type: config.device_type.clone(),
            firmware_version: config.firmware_version.clone(),
            loop_interval: config.loop_interval(),
            loop_task: Mutex::new(None),
            firmware: None,
        }
    }

    /// Accept firmware updates over the broker.
    pub fn with_firmware(mut self, sink: Arc<dyn FirmwareSink>) -> Self {
        self.firmware = Some(FirmwareUpdater::new(sink));
        self
    }

    /// Whether a firmware image is currently being received.
    pub fn updating(&self) -> bool {
        self.firmware
            .as_ref()
            .is_some_and(FirmwareUpdater::in_progress)
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Whether the loop task is running.
    pub fn is_running(&self) -> bool {
        self.loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Handle an inbound message. Only persistent storage faults are
    /// returned; malformed commands are logged and dropped.
    pub fn route(&self, message: &InboundMessage) -> Result<(), ParamError> {
        if message.scope == Scope::Local && UpdateCommand::matches(&message.topic) {
            if let Some(updater) = &self.firmware {
                self.update(updater, message);
                return Ok(());
            }
        }

        if message.scope != Scope::Local || !ParamCommand::matches(&message.topic) {
            self.device
                .on_message(&self.ctx, &message.topic, &message.payload, message.scope);
            return Ok(());
        }

        let command = match decode_command(&message.topic, &message.payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "dropping malformed command");
                return Ok(());
            }
        };

        debug!(?command, "remote parameter command");
        if let Some(reply) = self.execute(command)? {
            self.ctx.publish(
                &reply.topic,
                reply.payload.as_bytes(),
                QoS::AtMostOnce,
                false,
                Scope::Local,
            );
        }
        Ok(())
    }

    fn update(&self, updater: &FirmwareUpdater, message: &InboundMessage) {
        let command = match decode_update(&message.topic, &message.payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "dropping malformed update step");
                return;
            }
        };

        match updater.handle(command) {
            Ok(Some(chunk)) => {
                self.ctx
                    .publish_str(UPDATE_REQUEST_TOPIC, &chunk.to_string(), Scope::Local);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "firmware update aborted"),
        }
    }

    fn execute(&self, command: ParamCommand) -> Result<Option<Reply>, ParamError> {
        let params = self.ctx.params();

        match command {
            ParamCommand::Get(name) => Ok(Some(Reply::value(&name, params.get(&name)?))),
            ParamCommand::Set { name, value } => {
                match params.set(&name, &value) {
                    Ok(()) => self.device.on_update(&self.ctx, &name, &value),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(param = %name, error = %e, "remote set rejected"),
                }
                Ok(Some(Reply::value(&name, params.get(&name)?)))
            }
            ParamCommand::Unset(name) => {
                if params.unset(&name)? {
                    self.device.on_update(&self.ctx, &name, "");
                }
                Ok(None)
            }
            ParamCommand::Describe => Ok(Some(Reply::schema(params.describe()))),
        }
    }

    fn announce(&self) {
        let base_topic = match BrokerConfig::load(self.ctx.params()) {
            Ok(config) => config.base_topic,
            Err(e) => {
                error!(error = %e, "cannot read base topic for announcement");
                return;
            }
        };

        let announcement = Announcement::new(
            &self.device_type,
            &self.firmware_version,
            base_topic,
            ConnectivityState::Networked,
            ParamDescriptor::from_store(self.ctx.params()),
        );

        match encode_announcement(&announcement) {
            Ok(json) => {
                self.ctx.publish(
                    ANNOUNCEMENT_TOPIC,
                    json.as_bytes(),
                    QoS::AtLeastOnce,
                    true,
                    Scope::Local,
                );
            }
            Err(e) => error!(error = %e, "failed to encode announcement"),
        }
    }

    /// Local topic filters served while running.
    fn filters(&self) -> Vec<&'static str> {
        let mut filters = COMMAND_FILTERS.to_vec();
        if self.firmware.is_some() {
            filters.extend(UPDATE_FILTERS);
        }
        filters
    }

    fn spawn_loop(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, device loop disabled");
            return;
        };

        let device = Arc::clone(&self.device);
        let ctx = self.ctx.clone();
        let period = self.loop_interval;
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                device.on_loop(&ctx);
            }
        });

        let mut slot = self.loop_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }
}

impl ApplicationRuntime for DeviceHost {
    fn start(&self) {
        self.ctx.set_online(true);
        for filter in self.filters() {
            if !self.ctx.subscribe(filter, QoS::AtLeastOnce, Scope::Local) {
                warn!(filter, "subscription failed");
            }
        }
        self.announce();
        self.device.on_online(&self.ctx);
        self.spawn_loop();
        info!(device_type = %self.device_type, "application started");
    }

    fn stop(&self) {
        if let Some(task) = self
            .loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if let Some(updater) = &self.firmware {
            updater.cancel();
        }
        for filter in self.filters() {
            self.ctx.unsubscribe(filter, Scope::Local);
        }
        self.ctx.set_online(false);
        self.device.on_offline(&self.ctx);
        info!("application stopped");
    }

    fn forward(&self, message: &InboundMessage) -> Result<(), ParamError> {
        self.route(message)
            .inspect_err(|e| error!(error = %e, "failed to handle inbound message"))
    }
}

impl std::fmt::Debug for DeviceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHost")
            .field("device_type", &self.device_type)
            .field("firmware_version", &self.firmware_version)
            .field("loop_interval", &self.loop_interval)
            .field("running", &self.is_running())
            .field("updating", &self.updating())
            .finish()
    }
}
