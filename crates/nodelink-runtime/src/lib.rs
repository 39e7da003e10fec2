//! # nodelink-runtime
//!
//! Tokio host for a nodelink device.
//!
//! - [`NodeRuntime`]: single-consumer event loop feeding the lifecycle manager
//! - [`EventSender`]: handle collaborators use to report link/session status,
//!   provisioning writes and inbound broker messages
//! - [`Device`]: callbacks of the embedding application
//! - [`DeviceHost`]: application runtime that serves remote parameter
//!   commands and drives the device callbacks while networked
//! - [`FirmwareSink`]: target for firmware images streamed over the broker

pub mod device;
pub mod error;
pub mod event;
pub mod host;
pub mod runtime;
pub mod update;

pub use device::{Device, DeviceContext};
pub use error::{FirmwareError, RuntimeError};
pub use event::{EventQueue, EventReceiver, EventSender, NodeEvent};
pub use host::DeviceHost;
pub use runtime::{NodeRuntime, Peripherals};
pub use update::FirmwareSink;

pub use nodelink_core::{
    ConnectivityState, InboundMessage, LinkStatus, NodeConfig, ParameterStore, ProvisioningField,
    QoS, Scope, SessionStatus,
};
