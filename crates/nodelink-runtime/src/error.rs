//! Runtime errors.

use nodelink_core::{LifecycleError, ParamError};
use thiserror::Error;

/// Faults that terminate the event loop. Both wrap persistent storage
/// faults, which the node cannot recover from without a restart.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("parameter store fault: {0}")]
    Params(#[from] ParamError),
}

/// Reasons a firmware update is refused or aborted.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("firmware rejected: {0}")]
    Rejected(String),

    #[error("no firmware update in progress")]
    NotStarted,

    #[error("image overrun: {written} bytes written, {size} announced")]
    Overrun { size: usize, written: usize },

    #[error("image incomplete: {written} of {size} bytes written")]
    Incomplete { size: usize, written: usize },
}
