use std::{collections::HashMap, sync::Arc};

use kestrel_config::DebuggerConfig;
use kestrel_vm::{
    signature_to_type_name, ClassInfo, EventKind, EventModifier, LaunchOptions, LaunchedVm,
    Location, ObjectId, ReferenceTypeId, RequestId, StepDepth, StepSize, SuspendPolicy, ThreadId,
    VariableInfo, Vm, VmError, VmValue,
};
use tokio::sync::mpsc;

use crate::{
    breakpoints::BreakpointTarget,
    coordinator::Message,
    error::{tolerate, DebugError, DebugResult},
    inspect::ValueInspector,
    protocol::{DebugBacktrace, DebugLocation, DebugStackFrame, DebugStackLocal},
    pump::{spawn_event_pump, spawn_output_relay, OutputSink, OutputStream},
    source_index::{SourceIndex, SourcePosition},
    DebugValue,
};

/// Launch arguments for `command_line` under the configured classpath and
/// VM options.
pub fn launch_options(command_line: &str, config: &DebuggerConfig) -> LaunchOptions {
    LaunchOptions {
        command_line: command_line.trim().to_string(),
        classpath: config.classpath.clone(),
        vm_options: config.vm_options.clone(),
        suspend: false,
    }
}

/// One launched target and every native request made against it.
///
/// Dropping the session disposes the target.
pub struct TargetSession {
    vm: Box<dyn Vm>,
    generation: u64,
    inspector: ValueInspector,
    /// Loaded types by bare source file name.
    types_by_source: HashMap<String, Vec<ClassInfo>>,
    type_names: HashMap<ReferenceTypeId, String>,
    /// At most one live step request per thread.
    step_requests: HashMap<ThreadId, RequestId>,
    breakpoint_requests: HashMap<SourcePosition, RequestId>,
    /// Thread each handed-out object was first seen on.
    object_threads: HashMap<ObjectId, ThreadId>,
    disposed: bool,
}

impl std::fmt::Debug for TargetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSession")
            .field("generation", &self.generation)
            .field("types", &self.type_names.len())
            .field("breakpoints", &self.breakpoint_requests.len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl TargetSession {
    /// Take ownership of a freshly launched target: install the standing
    /// requests, then start the event pump and both output relays.
    pub fn start(
        launched: LaunchedVm,
        generation: u64,
        inspector: ValueInspector,
        inbox: mpsc::Sender<Message>,
        output: Arc<dyn OutputSink>,
    ) -> DebugResult<Self> {
        let LaunchedVm {
            vm,
            events,
            stdout,
            stderr,
        } = launched;
        let mut session = Self::new(vm, generation, inspector);
        session.install_standing_requests()?;

        let spawn_err =
            |err: std::io::Error| DebugError::Internal(format!("failed to spawn worker: {err}"));
        spawn_event_pump(events, inbox, generation).map_err(spawn_err)?;
        spawn_output_relay(OutputStream::Stdout, stdout, output.clone()).map_err(spawn_err)?;
        spawn_output_relay(OutputStream::Stderr, stderr, output).map_err(spawn_err)?;

        tracing::info!(target: "kestrel.debug", generation, "target session started");
        Ok(session)
    }

    pub(crate) fn new(vm: Box<dyn Vm>, generation: u64, inspector: ValueInspector) -> Self {
        Self {
            vm,
            generation,
            inspector,
            types_by_source: HashMap::new(),
            type_names: HashMap::new(),
            step_requests: HashMap::new(),
            breakpoint_requests: HashMap::new(),
            object_threads: HashMap::new(),
            disposed: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn install_standing_requests(&mut self) -> DebugResult<()> {
        let vm = &mut self.vm;
        vm.event_request_set(EventKind::ClassPrepare, SuspendPolicy::None, Vec::new())?;
        vm.event_request_set(EventKind::ThreadStart, SuspendPolicy::None, Vec::new())?;
        vm.event_request_set(EventKind::ThreadDeath, SuspendPolicy::None, Vec::new())?;
        vm.event_request_set(
            EventKind::Exception,
            SuspendPolicy::All,
            vec![EventModifier::ExceptionOnly {
                exception_or_null: 0,
                caught: false,
                uncaught: true,
            }],
        )?;
        Ok(())
    }

    /// Seed the per-source type index from everything already loaded.
    pub fn index_loaded_types(&mut self) -> DebugResult<usize> {
        let classes = self.vm.all_classes()?;
        let count = classes.len();
        for class in &classes {
            self.type_loaded(class);
        }
        tracing::debug!(target: "kestrel.debug", types = count, "indexed loaded types");
        Ok(count)
    }

    /// Record a newly prepared type. Returns its source file name, if the
    /// type has one.
    pub fn type_loaded(&mut self, class: &ClassInfo) -> Option<String> {
        self.type_names.insert(class.type_id, class.name());
        let source = class.source_name.clone()?;
        let types = self.types_by_source.entry(source.clone()).or_default();
        if !types.iter().any(|known| known.type_id == class.type_id) {
            types.push(class.clone());
        }
        Some(source)
    }

    pub fn thread_by_id(&mut self, thread: ThreadId) -> DebugResult<Option<ThreadId>> {
        let threads = self.vm.all_threads()?;
        let found = threads.contains(&thread).then_some(thread);
        if found.is_none() {
            tracing::info!(target: "kestrel.debug", thread_id = thread, "no such thread");
        }
        Ok(found)
    }

    pub fn resume(&mut self) -> DebugResult<()> {
        Ok(self.vm.resume()?)
    }

    /// Single-step `thread` one line at `depth`, then let the target run.
    /// Returns false when the thread does not exist.
    pub fn step(&mut self, thread: ThreadId, depth: StepDepth) -> DebugResult<bool> {
        if self.thread_by_id(thread)?.is_none() {
            return Ok(false);
        }
        // The target refuses a second step request on the same thread.
        if let Some(stale) = self.step_requests.remove(&thread) {
            self.vm.event_request_clear(EventKind::SingleStep, stale)?;
        }
        let request_id = self.vm.event_request_set(
            EventKind::SingleStep,
            SuspendPolicy::All,
            vec![
                EventModifier::Step {
                    thread,
                    size: StepSize::Line,
                    depth,
                },
                EventModifier::Count { count: 1 },
            ],
        )?;
        self.step_requests.insert(thread, request_id);
        self.vm.resume()?;
        Ok(true)
    }

    /// Drop the request behind a completed step.
    pub fn step_completed(&mut self, thread: ThreadId, request_id: RequestId) -> DebugResult<()> {
        if self.step_requests.get(&thread) == Some(&request_id) {
            self.step_requests.remove(&thread);
            self.vm
                .event_request_clear(EventKind::SingleStep, request_id)?;
        }
        Ok(())
    }

    /// First executable location of `line` in any loaded type compiled from
    /// `source_name`: method bodies first, then type-level line tables.
    pub fn resolve_location(
        &mut self,
        source_name: &str,
        line: u32,
    ) -> DebugResult<Option<Location>> {
        let Some(types) = self.types_by_source.get(source_name).cloned() else {
            return Ok(None);
        };

        for class in &types {
            let Some(methods) = tolerate(self.vm.methods(class.type_id))? else {
                continue;
            };
            for method in methods {
                let found =
                    tolerate(self.vm.method_locations_of_line(class.type_id, method.method_id, line))?;
                if let Some(location) = found.into_iter().flatten().next() {
                    return Ok(Some(location));
                }
            }
        }
        for class in &types {
            let found = tolerate(self.vm.type_locations_of_line(class.type_id, line))?;
            if let Some(location) = found.into_iter().flatten().next() {
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    /// Resolve `name` in the scope of `thread`: visible locals from the
    /// innermost frame outwards, then fields of frame 0's receiver.
    pub fn value_for_name(
        &mut self,
        thread: ThreadId,
        name: &str,
    ) -> DebugResult<Option<DebugValue>> {
        if self.thread_by_id(thread)?.is_none() {
            return Ok(None);
        }
        let frames = self.vm.frames(thread, 0, None)?;

        for frame in &frames {
            let Some(variables) = tolerate(self.vm.visible_variables(thread, frame.frame_id))?
            else {
                continue;
            };
            if let Some(variable) = variables.into_iter().find(|v| v.name == name) {
                let value = self.frame_value(thread, frame.frame_id, &variable)?;
                return self
                    .convert(&value, Some(&variable.signature), thread)
                    .map(Some);
            }
        }

        let Some(frame) = frames.first() else {
            return Ok(None);
        };
        let Some(receiver) = tolerate(self.vm.frame_this_object(thread, frame.frame_id))?.flatten()
        else {
            return Ok(None);
        };
        let value = tolerate(
            self.inspector
                .field_value(self.vm.as_mut(), receiver, name, thread),
        )?
        .flatten();
        if let Some(value) = &value {
            self.remember(value, thread);
        }
        Ok(value)
    }

    /// Frames `index..index + count` of `thread` (`count < 0`: to the end).
    pub fn backtrace(
        &mut self,
        thread: ThreadId,
        index: usize,
        count: i32,
        sources: &SourceIndex,
    ) -> DebugResult<Option<DebugBacktrace>> {
        if self.thread_by_id(thread)?.is_none() {
            return Ok(None);
        }
        let length = usize::try_from(count).ok();
        let frames = self.vm.frames(thread, index, length)?;
        let thread_name = tolerate(self.vm.thread_name(thread))?.unwrap_or_default();

        let mut out = Vec::with_capacity(frames.len());
        for (offset, frame) in frames.into_iter().enumerate() {
            let variables =
                tolerate(self.vm.visible_variables(thread, frame.frame_id))?.unwrap_or_default();
            let values = if variables.is_empty() {
                Vec::new()
            } else {
                self.vm.frame_get_values(thread, frame.frame_id, &variables)?
            };

            let mut locals = Vec::with_capacity(variables.len());
            for (slot, (variable, value)) in variables.iter().zip(&values).enumerate() {
                locals.push(DebugStackLocal {
                    index: slot,
                    name: variable.name.clone(),
                    summary: self.inspector.summary(self.vm.as_mut(), value)?,
                    type_name: signature_to_type_name(&variable.signature),
                });
            }

            let method_name = tolerate(self.vm.methods(frame.location.type_id))?
                .and_then(|methods| {
                    methods
                        .into_iter()
                        .find(|m| m.method_id == frame.location.method_id)
                })
                .map(|m| m.name)
                .unwrap_or_else(|| "<unknown>".to_string());
            let this_object_id =
                tolerate(self.vm.frame_this_object(thread, frame.frame_id))?.flatten();
            if let Some(object) = this_object_id {
                self.object_threads.entry(object).or_insert(thread);
            }

            out.push(DebugStackFrame {
                index: index + offset,
                num_args: variables.iter().filter(|v| v.is_argument).count(),
                locals,
                class_name: self
                    .type_names
                    .get(&frame.location.type_id)
                    .cloned()
                    .unwrap_or_else(|| "<unknown>".to_string()),
                method_name,
                position: sources.position_of(&frame.location),
                this_object_id,
            });
        }

        Ok(Some(DebugBacktrace {
            frames: out,
            thread_id: thread,
            thread_name,
        }))
    }

    /// Fetch one value on demand. Objects must have been handed out by this
    /// session before; unknown ids resolve to none.
    pub fn value_at(&mut self, location: &DebugLocation) -> DebugResult<Option<DebugValue>> {
        match location {
            DebugLocation::ObjectReference { object_id } => {
                let Some(thread) = self.object_threads.get(object_id).copied() else {
                    return Ok(None);
                };
                let value = tolerate(self.inspector.object_value(self.vm.as_mut(), *object_id, thread))?;
                Ok(value)
            }
            DebugLocation::ObjectField { object_id, field } => {
                let Some(thread) = self.object_threads.get(object_id).copied() else {
                    return Ok(None);
                };
                let value = tolerate(self.inspector.field_value(
                    self.vm.as_mut(),
                    *object_id,
                    field,
                    thread,
                ))?
                .flatten();
                if let Some(value) = &value {
                    self.remember(value, thread);
                }
                Ok(value)
            }
            DebugLocation::ArrayElement { object_id, index } => {
                let Some(thread) = self.object_threads.get(object_id).copied() else {
                    return Ok(None);
                };
                let value = tolerate(self.inspector.array_element(
                    self.vm.as_mut(),
                    *object_id,
                    *index,
                    thread,
                ))?
                .flatten();
                if let Some(value) = &value {
                    self.remember(value, thread);
                }
                Ok(value)
            }
            DebugLocation::StackSlot {
                thread_id,
                frame,
                offset,
            } => {
                let Some(frames) = tolerate(self.vm.frames(*thread_id, *frame, Some(1)))? else {
                    return Ok(None);
                };
                let Some(frame) = frames.into_iter().next() else {
                    return Ok(None);
                };
                let Some(variable) = tolerate(self.vm.visible_variables(*thread_id, frame.frame_id))?
                    .into_iter()
                    .flatten()
                    .find(|v| v.slot == *offset)
                else {
                    return Ok(None);
                };
                let value = self.frame_value(*thread_id, frame.frame_id, &variable)?;
                self.convert(&value, Some(&variable.signature), *thread_id)
                    .map(Some)
            }
        }
    }

    /// Short description of a thrown exception: its runtime type name.
    pub fn exception_description(
        &mut self,
        exception: ObjectId,
        thread: ThreadId,
    ) -> DebugResult<String> {
        self.object_threads.entry(exception).or_insert(thread);
        Ok(tolerate(self.vm.object_reference_type(exception))?
            .map(|class| class.name())
            .unwrap_or_else(|| "<unknown exception>".to_string()))
    }

    /// Best effort; a target that is already gone is not an error here.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.step_requests.clear();
        self.breakpoint_requests.clear();
        match self.vm.dispose() {
            Ok(()) | Err(VmError::Disconnected) => {}
            Err(err) => {
                tracing::warn!(target: "kestrel.debug", generation = self.generation, error = %err, "failed to dispose target")
            }
        }
        tracing::info!(target: "kestrel.debug", generation = self.generation, "target session disposed");
    }

    fn frame_value(
        &mut self,
        thread: ThreadId,
        frame: u64,
        variable: &VariableInfo,
    ) -> DebugResult<VmValue> {
        Ok(self
            .vm
            .frame_get_values(thread, frame, std::slice::from_ref(variable))?
            .into_iter()
            .next()
            .unwrap_or(VmValue::Null))
    }

    fn convert(
        &mut self,
        value: &VmValue,
        signature: Option<&str>,
        thread: ThreadId,
    ) -> DebugResult<DebugValue> {
        let value = self
            .inspector
            .to_debug_value(self.vm.as_mut(), value, signature, thread)?;
        self.remember(&value, thread);
        Ok(value)
    }

    fn remember(&mut self, value: &DebugValue, thread: ThreadId) {
        if let Some(object) = value.object_id() {
            self.object_threads.entry(object).or_insert(thread);
        }
    }
}

impl BreakpointTarget for TargetSession {
    fn install_breakpoint(&mut self, position: &SourcePosition) -> DebugResult<bool> {
        if self.breakpoint_requests.contains_key(position) {
            return Ok(true);
        }
        let Some(location) = self.resolve_location(&position.file_name(), position.line)? else {
            return Ok(false);
        };
        let request = self.vm.event_request_set(
            EventKind::Breakpoint,
            SuspendPolicy::All,
            vec![EventModifier::LocationOnly { location }],
        );
        match request {
            Ok(request_id) => {
                tracing::info!(
                    target: "kestrel.debug",
                    file = %position.file.display(),
                    line = position.line,
                    request_id,
                    "breakpoint installed"
                );
                self.breakpoint_requests.insert(position.clone(), request_id);
                Ok(true)
            }
            Err(VmError::Disconnected) => Err(DebugError::Disconnected),
            Err(err) => {
                tracing::warn!(
                    target: "kestrel.debug",
                    file = %position.file.display(),
                    line = position.line,
                    error = %err,
                    "breakpoint request rejected"
                );
                Ok(false)
            }
        }
    }

    fn remove_breakpoint(&mut self, position: &SourcePosition) -> DebugResult<()> {
        if let Some(&request_id) = self.breakpoint_requests.get(position) {
            self.vm
                .event_request_clear(EventKind::Breakpoint, request_id)?;
            self.breakpoint_requests.remove(position);
        }
        Ok(())
    }

    /// Requests the target refuses to clear stay mapped; the first such
    /// error is returned once every other request has been tried.
    fn remove_all_breakpoints(&mut self) -> DebugResult<()> {
        let vm = &mut self.vm;
        let mut first_error = None;
        self.breakpoint_requests.retain(|_, request_id| {
            match vm.event_request_clear(EventKind::Breakpoint, *request_id) {
                Ok(()) => false,
                Err(err) => {
                    first_error.get_or_insert(err);
                    true
                }
            }
        });
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl Drop for TargetSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
