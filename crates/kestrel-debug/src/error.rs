use kestrel_vm::VmError;
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    /// The target went away while an operation was in flight.
    #[error("target disconnected")]
    Disconnected,
    #[error("vm: {0}")]
    Vm(VmError),
    #[error("internal debugger error: {0}")]
    Internal(String),
    #[error("coordinator has shut down")]
    CoordinatorStopped,
}

impl DebugError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, DebugError::Disconnected)
    }
}

impl From<VmError> for DebugError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::Disconnected => DebugError::Disconnected,
            other => DebugError::Vm(other),
        }
    }
}

/// Treat anything but a disconnect as an expected miss.
///
/// Absent debug info, collected objects and dead threads are routine while
/// inspecting a live target; only losing the target ends the operation.
pub(crate) fn tolerate<T>(result: kestrel_vm::Result<T>) -> DebugResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(VmError::Disconnected) => Err(DebugError::Disconnected),
        Err(err) => {
            tracing::debug!(target: "kestrel.debug", error = %err, "vm query failed");
            Ok(None)
        }
    }
}
