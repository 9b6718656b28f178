use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::Cursor,
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    ClassInfo, EventKind, EventModifier, EventQueue, FieldId, FieldInfo, FrameId, FrameInfo,
    LaunchOptions, LaunchedVm, Location, MethodId, MethodInfo, ObjectId, ReferenceTypeId,
    RequestId, Result, SuspendPolicy, ThreadId, VariableInfo, Vm, VmError, VmEvent, VmLauncher,
    VmValue,
};

/// Thread reported by the synthetic `VmStart` event.
const MAIN_THREAD: ThreadId = 1;

#[derive(Clone, Debug)]
pub struct MockMethod {
    pub info: MethodInfo,
    pub lines: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct MockClass {
    pub info: ClassInfo,
    pub source_path: Option<String>,
    pub superclass: Option<ReferenceTypeId>,
    pub methods: Vec<MockMethod>,
    /// Lines covered by the type's own line table (static initializers and
    /// the like), outside any declared method.
    pub type_lines: Vec<u32>,
    pub fields: Vec<FieldInfo>,
}

impl MockClass {
    pub fn new(type_id: ReferenceTypeId, signature: &str, source_name: Option<&str>) -> Self {
        Self {
            info: ClassInfo {
                type_id,
                signature: signature.to_string(),
                source_name: source_name.map(str::to_string),
            },
            source_path: None,
            superclass: None,
            methods: Vec::new(),
            type_lines: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_method(mut self, method_id: MethodId, name: &str, lines: &[u32]) -> Self {
        self.methods.push(MockMethod {
            info: MethodInfo {
                method_id,
                name: name.to_string(),
                signature: "()V".to_string(),
            },
            lines: lines.to_vec(),
        });
        self
    }

    pub fn with_type_lines(mut self, lines: &[u32]) -> Self {
        self.type_lines = lines.to_vec();
        self
    }

    pub fn with_field(mut self, field_id: FieldId, name: &str, signature: &str) -> Self {
        self.fields.push(FieldInfo {
            field_id,
            name: name.to_string(),
            signature: signature.to_string(),
            mod_bits: 0,
        });
        self
    }

    pub fn with_superclass(mut self, superclass: ReferenceTypeId) -> Self {
        self.superclass = Some(superclass);
        self
    }

    pub fn with_source_path(mut self, source_path: &str) -> Self {
        self.source_path = Some(source_path.to_string());
        self
    }

    /// Location of `line` inside `method_id`, shaped like the backend reports it.
    pub fn location(&self, method_id: MethodId, line: u32) -> Location {
        Location {
            type_id: self.info.type_id,
            method_id,
            index: u64::from(line),
            line: Some(line),
            source_name: self.info.source_name.clone(),
            source_path: self.source_path.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MockFrame {
    pub frame_id: FrameId,
    pub location: Location,
    pub variables: Vec<(VariableInfo, VmValue)>,
    pub this_object: Option<ObjectId>,
}

impl MockFrame {
    pub fn new(frame_id: FrameId, location: Location) -> Self {
        Self {
            frame_id,
            location,
            variables: Vec::new(),
            this_object: None,
        }
    }

    pub fn with_local(mut self, name: &str, signature: &str, value: VmValue) -> Self {
        let slot = self.variables.len() as u32;
        self.variables.push((
            VariableInfo {
                name: name.to_string(),
                signature: signature.to_string(),
                slot,
                is_argument: false,
            },
            value,
        ));
        self
    }

    pub fn with_argument(mut self, name: &str, signature: &str, value: VmValue) -> Self {
        let slot = self.variables.len() as u32;
        self.variables.push((
            VariableInfo {
                name: name.to_string(),
                signature: signature.to_string(),
                slot,
                is_argument: true,
            },
            value,
        ));
        self
    }

    pub fn with_this(mut self, object: ObjectId) -> Self {
        self.this_object = Some(object);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MockObjectKind {
    Plain,
    String(String),
    Array(Vec<VmValue>),
}

#[derive(Clone, Debug)]
pub struct MockObject {
    pub type_id: ReferenceTypeId,
    pub kind: MockObjectKind,
    pub field_values: HashMap<FieldId, VmValue>,
}

impl MockObject {
    pub fn new(type_id: ReferenceTypeId, kind: MockObjectKind) -> Self {
        Self {
            type_id,
            kind,
            field_values: HashMap::new(),
        }
    }

    pub fn with_field_value(mut self, field_id: FieldId, value: VmValue) -> Self {
        self.field_values.insert(field_id, value);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstalledRequest {
    pub request_id: RequestId,
    pub kind: EventKind,
    pub suspend: SuspendPolicy,
    pub modifiers: Vec<EventModifier>,
}

#[derive(Debug, Default)]
struct MockThread {
    name: String,
    frames: Vec<MockFrame>,
}

#[derive(Debug, Default)]
struct MockState {
    classes: BTreeMap<ReferenceTypeId, MockClass>,
    loaded: BTreeSet<ReferenceTypeId>,
    threads: BTreeMap<ThreadId, MockThread>,
    objects: HashMap<ObjectId, MockObject>,
    requests: BTreeMap<RequestId, InstalledRequest>,
    next_request_id: RequestId,
    events: Option<mpsc::UnboundedSender<Vec<VmEvent>>>,
    disconnected: bool,
    disposed: bool,
    resume_count: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    launch_error: Option<String>,
    launches: Vec<LaunchOptions>,
}

impl MockState {
    fn check(&self) -> Result<()> {
        if self.disconnected || self.disposed {
            Err(VmError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn send(&self, events: Vec<VmEvent>) -> bool {
        match &self.events {
            Some(tx) => tx.send(events).is_ok(),
            None => false,
        }
    }

    fn loaded_class(&self, type_id: ReferenceTypeId) -> Result<&MockClass> {
        if !self.loaded.contains(&type_id) {
            return Err(VmError::CommandFailed { error_code: 21 });
        }
        self.classes
            .get(&type_id)
            .ok_or(VmError::CommandFailed { error_code: 21 })
    }

    fn thread(&self, thread: ThreadId) -> Result<&MockThread> {
        self.threads.get(&thread).ok_or(VmError::InvalidThread(thread))
    }

    fn frame(&self, thread: ThreadId, frame: FrameId) -> Result<&MockFrame> {
        self.thread(thread)?
            .frames
            .iter()
            .find(|f| f.frame_id == frame)
            .ok_or(VmError::CommandFailed { error_code: 30 })
    }

    fn object(&self, object: ObjectId) -> Result<&MockObject> {
        self.objects
            .get(&object)
            .ok_or(VmError::InvalidObject(object))
    }

    fn request_ids(&self, kind: EventKind) -> Vec<RequestId> {
        self.requests
            .values()
            .filter(|r| r.kind == kind)
            .map(|r| r.request_id)
            .collect()
    }
}

/// Deterministic, in-memory target VM.
///
/// Clones share state, so a test keeps one handle to script the target while
/// the session under test owns another through [`MockLauncher`].
#[derive(Clone, Debug, Default)]
pub struct MockVm {
    state: Arc<Mutex<MockState>>,
}

impl MockVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&self, class: MockClass) {
        self.state.lock().classes.insert(class.info.type_id, class);
    }

    /// Mark a class as loaded without announcing it.
    pub fn preload_class(&self, type_id: ReferenceTypeId) {
        self.state.lock().loaded.insert(type_id);
    }

    /// Load a class and deliver a `ClassPrepare` event to every class-prepare
    /// request. Returns whether an event was delivered.
    pub fn load_class(&self, type_id: ReferenceTypeId) -> bool {
        let mut state = self.state.lock();
        state.loaded.insert(type_id);
        let Some(class) = state.classes.get(&type_id).map(|c| c.info.clone()) else {
            return false;
        };
        let events: Vec<VmEvent> = state
            .request_ids(EventKind::ClassPrepare)
            .into_iter()
            .map(|request_id| VmEvent::ClassPrepare {
                request_id,
                thread: MAIN_THREAD,
                class: class.clone(),
            })
            .collect();
        !events.is_empty() && state.send(events)
    }

    pub fn add_thread(&self, thread: ThreadId, name: &str) {
        self.state.lock().threads.insert(
            thread,
            MockThread {
                name: name.to_string(),
                frames: Vec::new(),
            },
        );
    }

    pub fn remove_thread(&self, thread: ThreadId) {
        self.state.lock().threads.remove(&thread);
    }

    pub fn set_frames(&self, thread: ThreadId, frames: Vec<MockFrame>) {
        let mut state = self.state.lock();
        state.threads.entry(thread).or_default().frames = frames;
    }

    pub fn add_object(&self, object: ObjectId, value: MockObject) {
        self.state.lock().objects.insert(object, value);
    }

    pub fn set_output(&self, stdout: &[u8], stderr: &[u8]) {
        let mut state = self.state.lock();
        state.stdout = stdout.to_vec();
        state.stderr = stderr.to_vec();
    }

    /// Make the next launch fail with `message`.
    pub fn fail_next_launch(&self, message: &str) {
        self.state.lock().launch_error = Some(message.to_string());
    }

    /// Deliver an arbitrary event set.
    pub fn emit(&self, events: Vec<VmEvent>) -> bool {
        self.state.lock().send(events)
    }

    /// Fire the breakpoint request installed at `location`, if any.
    pub fn hit_breakpoint(&self, thread: ThreadId, location: &Location) -> Option<RequestId> {
        let state = self.state.lock();
        let request_id = state.requests.values().find_map(|r| {
            let matches = r.kind == EventKind::Breakpoint
                && r.modifiers.iter().any(|m| {
                    matches!(m, EventModifier::LocationOnly { location: l } if l == location)
                });
            matches.then_some(r.request_id)
        })?;
        state.send(vec![VmEvent::Breakpoint {
            request_id,
            thread,
            location: location.clone(),
        }]);
        Some(request_id)
    }

    /// Complete the outstanding step request of `thread` at `location`.
    pub fn complete_step(&self, thread: ThreadId, location: &Location) -> Option<RequestId> {
        let state = self.state.lock();
        let request_id = state.requests.values().find_map(|r| {
            let matches = r.kind == EventKind::SingleStep
                && r.modifiers
                    .iter()
                    .any(|m| matches!(m, EventModifier::Step { thread: t, .. } if *t == thread));
            matches.then_some(r.request_id)
        })?;
        state.send(vec![VmEvent::SingleStep {
            request_id,
            thread,
            location: location.clone(),
        }]);
        Some(request_id)
    }

    /// Simulate the target exiting: death, disconnect, then a closed queue.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.send(vec![VmEvent::VmDeath]);
        state.send(vec![VmEvent::VmDisconnect]);
        state.disconnected = true;
        state.events = None;
    }

    /// Simulate the connection dropping: every later command fails with
    /// [`VmError::Disconnected`], no event is delivered.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn requests(&self, kind: EventKind) -> Vec<InstalledRequest> {
        self.state
            .lock()
            .requests
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn resume_count(&self) -> usize {
        self.state.lock().resume_count
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn launches(&self) -> Vec<LaunchOptions> {
        self.state.lock().launches.clone()
    }
}

impl Vm for MockVm {
    fn all_classes(&mut self) -> Result<Vec<ClassInfo>> {
        let state = self.state.lock();
        state.check()?;
        Ok(state
            .loaded
            .iter()
            .filter_map(|id| state.classes.get(id))
            .map(|c| c.info.clone())
            .collect())
    }

    fn methods(&mut self, type_id: ReferenceTypeId) -> Result<Vec<MethodInfo>> {
        let state = self.state.lock();
        state.check()?;
        Ok(state
            .loaded_class(type_id)?
            .methods
            .iter()
            .map(|m| m.info.clone())
            .collect())
    }

    fn all_fields(&mut self, type_id: ReferenceTypeId) -> Result<Vec<FieldInfo>> {
        let state = self.state.lock();
        state.check()?;
        let mut out = Vec::new();
        let mut next = Some(type_id);
        while let Some(id) = next {
            let class = state
                .classes
                .get(&id)
                .ok_or(VmError::CommandFailed { error_code: 21 })?;
            out.extend(class.fields.iter().cloned());
            next = class.superclass;
        }
        Ok(out)
    }

    fn method_locations_of_line(
        &mut self,
        type_id: ReferenceTypeId,
        method_id: MethodId,
        line: u32,
    ) -> Result<Vec<Location>> {
        let state = self.state.lock();
        state.check()?;
        let class = state.loaded_class(type_id)?;
        let method = class
            .methods
            .iter()
            .find(|m| m.info.method_id == method_id)
            .ok_or(VmError::CommandFailed { error_code: 23 })?;
        if method.lines.is_empty() {
            return Err(VmError::AbsentInformation);
        }
        Ok(method
            .lines
            .iter()
            .filter(|&&l| l == line)
            .map(|&l| class.location(method_id, l))
            .collect())
    }

    fn type_locations_of_line(
        &mut self,
        type_id: ReferenceTypeId,
        line: u32,
    ) -> Result<Vec<Location>> {
        let state = self.state.lock();
        state.check()?;
        let class = state.loaded_class(type_id)?;
        Ok(class
            .type_lines
            .iter()
            .filter(|&&l| l == line)
            .map(|&l| class.location(0, l))
            .collect())
    }

    fn all_threads(&mut self) -> Result<Vec<ThreadId>> {
        let state = self.state.lock();
        state.check()?;
        Ok(state.threads.keys().copied().collect())
    }

    fn thread_name(&mut self, thread: ThreadId) -> Result<String> {
        let state = self.state.lock();
        state.check()?;
        Ok(state.thread(thread)?.name.clone())
    }

    fn frames(
        &mut self,
        thread: ThreadId,
        start: usize,
        length: Option<usize>,
    ) -> Result<Vec<FrameInfo>> {
        let state = self.state.lock();
        state.check()?;
        let frames = &state.thread(thread)?.frames;
        let end = match length {
            Some(length) => start.saturating_add(length).min(frames.len()),
            None => frames.len(),
        };
        Ok(frames
            .get(start.min(end)..end)
            .unwrap_or_default()
            .iter()
            .map(|f| FrameInfo {
                frame_id: f.frame_id,
                location: f.location.clone(),
            })
            .collect())
    }

    fn visible_variables(&mut self, thread: ThreadId, frame: FrameId) -> Result<Vec<VariableInfo>> {
        let state = self.state.lock();
        state.check()?;
        Ok(state
            .frame(thread, frame)?
            .variables
            .iter()
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn frame_get_values(
        &mut self,
        thread: ThreadId,
        frame: FrameId,
        variables: &[VariableInfo],
    ) -> Result<Vec<VmValue>> {
        let state = self.state.lock();
        state.check()?;
        let frame = state.frame(thread, frame)?;
        variables
            .iter()
            .map(|wanted| {
                frame
                    .variables
                    .iter()
                    .find(|(info, _)| info.slot == wanted.slot)
                    .map(|(_, value)| value.clone())
                    .ok_or(VmError::CommandFailed { error_code: 35 })
            })
            .collect()
    }

    fn frame_this_object(&mut self, thread: ThreadId, frame: FrameId) -> Result<Option<ObjectId>> {
        let state = self.state.lock();
        state.check()?;
        Ok(state.frame(thread, frame)?.this_object)
    }

    fn object_reference_type(&mut self, object: ObjectId) -> Result<ClassInfo> {
        let state = self.state.lock();
        state.check()?;
        let type_id = state.object(object)?.type_id;
        state
            .classes
            .get(&type_id)
            .map(|c| c.info.clone())
            .ok_or(VmError::CommandFailed { error_code: 21 })
    }

    fn object_get_values(&mut self, object: ObjectId, fields: &[FieldId]) -> Result<Vec<VmValue>> {
        let state = self.state.lock();
        state.check()?;
        let obj = state.object(object)?;
        Ok(fields
            .iter()
            .map(|id| obj.field_values.get(id).cloned().unwrap_or(VmValue::Null))
            .collect())
    }

    fn string_value(&mut self, string: ObjectId) -> Result<String> {
        let state = self.state.lock();
        state.check()?;
        match &state.object(string)?.kind {
            MockObjectKind::String(value) => Ok(value.clone()),
            _ => Err(VmError::InvalidRequest(format!("object {string} is not a string"))),
        }
    }

    fn array_length(&mut self, array: ObjectId) -> Result<usize> {
        let state = self.state.lock();
        state.check()?;
        match &state.object(array)?.kind {
            MockObjectKind::Array(values) => Ok(values.len()),
            _ => Err(VmError::InvalidRequest(format!("object {array} is not an array"))),
        }
    }

    fn array_get_values(
        &mut self,
        array: ObjectId,
        first: usize,
        length: usize,
    ) -> Result<Vec<VmValue>> {
        let state = self.state.lock();
        state.check()?;
        match &state.object(array)?.kind {
            MockObjectKind::Array(values) => values
                .get(first..first.saturating_add(length))
                .map(<[VmValue]>::to_vec)
                .ok_or(VmError::CommandFailed { error_code: 503 }),
            _ => Err(VmError::InvalidRequest(format!("object {array} is not an array"))),
        }
    }

    fn event_request_set(
        &mut self,
        kind: EventKind,
        suspend: SuspendPolicy,
        modifiers: Vec<EventModifier>,
    ) -> Result<RequestId> {
        let mut state = self.state.lock();
        state.check()?;

        match kind {
            EventKind::Breakpoint => {
                let location = modifiers.iter().find_map(|m| match m {
                    EventModifier::LocationOnly { location } => Some(location),
                    _ => None,
                });
                let Some(location) = location else {
                    return Err(VmError::InvalidRequest("breakpoint without location".into()));
                };
                state.loaded_class(location.type_id)?;
            }
            EventKind::SingleStep => {
                let thread = modifiers.iter().find_map(|m| match m {
                    EventModifier::Step { thread, .. } => Some(*thread),
                    _ => None,
                });
                let Some(thread) = thread else {
                    return Err(VmError::InvalidRequest("step without thread".into()));
                };
                state.thread(thread)?;
                // The VM allows at most one step request per thread.
                let duplicate = state.requests.values().any(|r| {
                    r.kind == EventKind::SingleStep
                        && r.modifiers.iter().any(
                            |m| matches!(m, EventModifier::Step { thread: t, .. } if *t == thread),
                        )
                });
                if duplicate {
                    return Err(VmError::InvalidRequest(format!(
                        "duplicate step request for thread {thread}"
                    )));
                }
            }
            _ => {}
        }

        state.next_request_id += 1;
        let request_id = state.next_request_id;
        state.requests.insert(
            request_id,
            InstalledRequest {
                request_id,
                kind,
                suspend,
                modifiers,
            },
        );
        Ok(request_id)
    }

    fn event_request_clear(&mut self, kind: EventKind, request_id: RequestId) -> Result<()> {
        let mut state = self.state.lock();
        state.check()?;
        if state
            .requests
            .get(&request_id)
            .is_some_and(|r| r.kind == kind)
        {
            state.requests.remove(&request_id);
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.check()?;
        state.resume_count += 1;
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.check()?;
        state.disposed = true;
        state.requests.clear();
        state.send(vec![VmEvent::VmDisconnect]);
        state.events = None;
        Ok(())
    }
}

struct MockEventQueue {
    rx: mpsc::UnboundedReceiver<Vec<VmEvent>>,
}

impl EventQueue for MockEventQueue {
    fn remove(&mut self) -> Result<Vec<VmEvent>> {
        self.rx.blocking_recv().ok_or(VmError::Disconnected)
    }
}

/// Launcher handing out sessions backed by one shared [`MockVm`].
#[derive(Clone, Debug, Default)]
pub struct MockLauncher {
    vm: MockVm,
}

impl MockLauncher {
    pub fn new(vm: MockVm) -> Self {
        Self { vm }
    }
}

impl VmLauncher for MockLauncher {
    fn launch(&self, options: &LaunchOptions) -> Result<LaunchedVm> {
        let mut state = self.vm.state.lock();
        if let Some(message) = state.launch_error.take() {
            return Err(VmError::Other(message));
        }
        state.launches.push(options.clone());
        state.disconnected = false;
        state.disposed = false;
        state.requests.clear();

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(vec![VmEvent::VmStart {
            thread: MAIN_THREAD,
        }]);
        state.events = Some(tx);

        Ok(LaunchedVm {
            vm: Box::new(self.vm.clone()),
            events: Box::new(MockEventQueue { rx }),
            stdout: Box::new(Cursor::new(state.stdout.clone())),
            stderr: Box::new(Cursor::new(state.stderr.clone())),
        })
    }
}
