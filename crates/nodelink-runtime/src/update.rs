//! Firmware update over the broker.
//!
//! The image is streamed in chunks the node asks for: tooling publishes
//! `begin` with the image size, the node answers on the request topic with
//! the largest chunk it accepts, tooling writes a chunk, and so on until it
//! sends `finish`. Image storage is left to a [`FirmwareSink`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nodelink_protocol::{UpdateCommand, UPDATE_CHUNK_SIZE};
use tracing::{debug, info, warn};

use crate::error::FirmwareError;

/// Platform storage for a new firmware image.
pub trait FirmwareSink: Send + Sync {
    /// Prepare for an image of `size` bytes.
    fn begin(&self, size: usize) -> Result<(), FirmwareError>;

    fn write(&self, chunk: &[u8]) -> Result<(), FirmwareError>;

    /// The whole image was written. A device typically validates it and
    /// reboots into it.
    fn finish(&self) -> Result<(), FirmwareError>;

    /// Discard a partially written image.
    fn abort(&self) {}
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    size: usize,
    written: usize,
}

/// Tracks the update in progress and feeds the sink.
pub(crate) struct FirmwareUpdater {
    sink: Arc<dyn FirmwareSink>,
    progress: Mutex<Option<Progress>>,
}

impl FirmwareUpdater {
    pub(crate) fn new(sink: Arc<dyn FirmwareSink>) -> Self {
        Self {
            sink,
            progress: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Progress>> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one step. Returns the size of the next chunk to request, or
    /// `None` once the image is complete. Any error aborts the update.
    pub(crate) fn handle(&self, command: UpdateCommand) -> Result<Option<usize>, FirmwareError> {
        let mut progress = self.lock();

        match command {
            UpdateCommand::Begin(size) => {
                if progress.take().is_some() {
                    warn!("firmware update restarted");
                    self.sink.abort();
                }
                self.sink.begin(size)?;
                *progress = Some(Progress { size, written: 0 });
                info!(size, "firmware update started");
                Ok(Some(UPDATE_CHUNK_SIZE))
            }
            UpdateCommand::Write(chunk) => {
                let Some(mut current) = *progress else {
                    return Err(FirmwareError::NotStarted);
                };
                let written = current.written + chunk.len();
                if written > current.size {
                    *progress = None;
                    self.sink.abort();
                    return Err(FirmwareError::Overrun {
                        size: current.size,
                        written,
                    });
                }
                if let Err(e) = self.sink.write(&chunk) {
                    *progress = None;
                    self.sink.abort();
                    return Err(e);
                }
                current.written = written;
                *progress = Some(current);
                debug!(written, size = current.size, "firmware chunk written");
                Ok(Some(UPDATE_CHUNK_SIZE))
            }
            UpdateCommand::Finish => {
                let current = progress.take().ok_or(FirmwareError::NotStarted)?;
                if current.written != current.size {
                    self.sink.abort();
                    return Err(FirmwareError::Incomplete {
                        size: current.size,
                        written: current.written,
                    });
                }
                self.sink.finish()?;
                info!(size = current.size, "firmware update finished");
                Ok(None)
            }
        }
    }

    /// Abort an update in progress, e.g. when the node goes offline.
    pub(crate) fn cancel(&self) {
        if self.lock().take().is_some() {
            warn!("firmware update aborted");
            self.sink.abort();
        }
    }

    pub(crate) fn in_progress(&self) -> bool {
        self.lock().is_some()
    }
}
