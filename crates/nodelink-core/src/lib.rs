//! # nodelink-core
//!
//! Core of the nodelink device framework.
//!
//! This crate provides:
//! - Typed parameter store with live variable synchronization
//! - Key-value backend abstraction (plus an in-memory backend)
//! - Connectivity lifecycle state machine (wireless link, broker session, application)
//! - Collaborator traits for the radio, broker client, provisioning and indicator
//! - Node configuration types
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! so the same state machine drives a tokio host or a bare-metal task.

pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod params;
pub mod scope;

pub use backend::{KvBackend, MemoryBackend};
pub use config::{NodeConfig, ReconnectPolicy};
pub use error::{BackendError, LifecycleError, ParamError};
pub use lifecycle::{
    system_parameters, ApplicationRuntime, BrokerConfig, BrokerSession, Collaborators,
    ConnectivityState, Followup, LifecycleManager, LinkStatus, ProvisioningCommand,
    ProvisioningField, ProvisioningInterface, SessionStatus, StatusIndicator, WifiLink,
    DEVICE_LOGGING,
};
pub use params::{ParamType, ParamValue, Parameter, ParameterStore, SyncCell};
pub use scope::{InboundMessage, QoS, Scope};
