//! Native debug-interface boundary for Kestrel.
//!
//! `kestrel-debug` drives a target JVM exclusively through the traits in this
//! crate. A production backend (JDI bridge, JDWP socket, ...) implements
//! [`VmLauncher`], [`Vm`] and [`EventQueue`]; the in-memory [`MockVm`] double
//! implements them for tests.
//!
//! The vocabulary deliberately follows JDWP: event kinds, suspend policies,
//! step sizes/depths and request modifiers keep their wire codes so a socket
//! backend can encode them directly.

#[cfg(any(test, feature = "test-support"))]
mod mock;
mod types;

use std::{io, path::PathBuf};

use thiserror::Error;

#[cfg(any(test, feature = "test-support"))]
pub use mock::{
    InstalledRequest, MockClass, MockFrame, MockLauncher, MockMethod, MockObject, MockObjectKind,
    MockVm,
};
pub use types::{
    signature_to_type_name, ClassInfo, EventKind, EventModifier, FieldInfo, FrameInfo, Location,
    MethodInfo, StepDepth, StepSize, SuspendPolicy, VariableInfo, VmEvent, VmValue, TAG_ARRAY,
    TAG_CLASS_LOADER, TAG_CLASS_OBJECT, TAG_OBJECT, TAG_STRING, TAG_THREAD, TAG_THREAD_GROUP,
};

pub type ThreadId = u64;
pub type FrameId = u64;
pub type ObjectId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type RequestId = i32;

pub type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error)]
pub enum VmError {
    /// The target went away while (or before) the command was issued.
    #[error("target VM is disconnected")]
    Disconnected,
    /// The class was compiled without the debug info needed to answer.
    #[error("debug information is absent")]
    AbsentInformation,
    #[error("invalid object id {0}")]
    InvalidObject(ObjectId),
    #[error("invalid thread id {0}")]
    InvalidThread(ThreadId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("VM command failed with error code {error_code}")]
    CommandFailed { error_code: u16 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

impl VmError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, VmError::Disconnected)
    }
}

/// Arguments used to start a target VM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Main class followed by program arguments, as typed by the user.
    pub command_line: String,
    pub classpath: Vec<PathBuf>,
    pub vm_options: Vec<String>,
    /// Start with every thread suspended.
    pub suspend: bool,
}

impl LaunchOptions {
    /// The `-classpath` value in the host platform's separator convention.
    pub fn classpath_arg(&self) -> Option<String> {
        if self.classpath.is_empty() {
            return None;
        }
        let joined = std::env::join_paths(&self.classpath).ok()?;
        Some(joined.to_string_lossy().into_owned())
    }
}

/// Everything a successful launch hands back.
pub struct LaunchedVm {
    pub vm: Box<dyn Vm>,
    pub events: Box<dyn EventQueue>,
    pub stdout: Box<dyn io::Read + Send>,
    pub stderr: Box<dyn io::Read + Send>,
}

impl std::fmt::Debug for LaunchedVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedVm").finish_non_exhaustive()
    }
}

/// Starts target processes.
pub trait VmLauncher: Send + Sync {
    fn launch(&self, options: &LaunchOptions) -> Result<LaunchedVm>;
}

/// Blocking access to the target's event queue.
///
/// Returns one event set per call. After the target disconnects the queue
/// returns [`VmError::Disconnected`] forever.
pub trait EventQueue: Send {
    fn remove(&mut self) -> Result<Vec<VmEvent>>;
}

/// Synchronous command interface to one attached target.
///
/// Any call may fail with [`VmError::Disconnected`] if the target died in the
/// meantime; callers are expected to treat that as a session-ending outcome.
pub trait Vm: Send {
    /// Reference types currently loaded (prepared) in the target.
    fn all_classes(&mut self) -> Result<Vec<ClassInfo>>;
    fn methods(&mut self, type_id: ReferenceTypeId) -> Result<Vec<MethodInfo>>;
    /// Declared and inherited fields, most-derived first.
    fn all_fields(&mut self, type_id: ReferenceTypeId) -> Result<Vec<FieldInfo>>;

    /// Executable locations of `line` inside one method body.
    fn method_locations_of_line(
        &mut self,
        type_id: ReferenceTypeId,
        method_id: MethodId,
        line: u32,
    ) -> Result<Vec<Location>>;
    /// Executable locations of `line` in the type's own line table.
    fn type_locations_of_line(
        &mut self,
        type_id: ReferenceTypeId,
        line: u32,
    ) -> Result<Vec<Location>>;

    fn all_threads(&mut self) -> Result<Vec<ThreadId>>;
    fn thread_name(&mut self, thread: ThreadId) -> Result<String>;
    /// Stack frames, innermost first. `length == None` requests every frame
    /// from `start` on.
    fn frames(
        &mut self,
        thread: ThreadId,
        start: usize,
        length: Option<usize>,
    ) -> Result<Vec<FrameInfo>>;
    fn visible_variables(&mut self, thread: ThreadId, frame: FrameId) -> Result<Vec<VariableInfo>>;
    fn frame_get_values(
        &mut self,
        thread: ThreadId,
        frame: FrameId,
        variables: &[VariableInfo],
    ) -> Result<Vec<VmValue>>;
    /// The receiver of the frame's method, `None` for static and native frames.
    fn frame_this_object(&mut self, thread: ThreadId, frame: FrameId) -> Result<Option<ObjectId>>;

    fn object_reference_type(&mut self, object: ObjectId) -> Result<ClassInfo>;
    fn object_get_values(&mut self, object: ObjectId, fields: &[FieldId]) -> Result<Vec<VmValue>>;
    fn string_value(&mut self, string: ObjectId) -> Result<String>;
    fn array_length(&mut self, array: ObjectId) -> Result<usize>;
    fn array_get_values(
        &mut self,
        array: ObjectId,
        first: usize,
        length: usize,
    ) -> Result<Vec<VmValue>>;

    fn event_request_set(
        &mut self,
        kind: EventKind,
        suspend: SuspendPolicy,
        modifiers: Vec<EventModifier>,
    ) -> Result<RequestId>;
    fn event_request_clear(&mut self, kind: EventKind, request_id: RequestId) -> Result<()>;

    fn resume(&mut self) -> Result<()>;
    fn dispose(&mut self) -> Result<()>;
}
