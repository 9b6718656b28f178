//! The session coordinator: a single task that owns every piece of debugger
//! state and processes client requests and target events strictly in the
//! order they reach its inbox.

use std::{
    collections::HashMap,
    ops::ControlFlow,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
};

use kestrel_config::DebuggerConfig;
use kestrel_vm::{LaunchedVm, StepDepth, VmEvent, VmLauncher};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    breakpoints::BreakpointRegistry,
    error::{DebugError, DebugResult},
    inspect::ValueInspector,
    protocol::{CorrelationId, ErrorCode, Notification, Request, Response, ResponseBody},
    pump::OutputSink,
    session::{launch_options, TargetSession},
    source_index::{canonical_file, SourceIndex},
};

/// Everything the coordinator consumes, from clients and from background
/// workers alike.
pub enum Message {
    Request {
        id: CorrelationId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// Posted by the launch worker once the launcher returns.
    Launched {
        id: CorrelationId,
        generation: u64,
        result: kestrel_vm::Result<LaunchedVm>,
    },
    /// One target event, tagged with the session generation that produced it.
    Target { generation: u64, event: VmEvent },
    Shutdown,
}

/// Client side of the coordinator inbox. Cheap to clone.
#[derive(Clone)]
pub struct CoordinatorHandle {
    inbox: mpsc::Sender<Message>,
    next_id: Arc<AtomicU64>,
}

impl CoordinatorHandle {
    /// Send `request` and wait for its response.
    pub async fn request(&self, request: Request) -> DebugResult<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Message::Request { id, request, reply })
            .await
            .map_err(|_| DebugError::CoordinatorStopped)?;
        response.await.map_err(|_| DebugError::CoordinatorStopped)
    }

    /// Dispose the target (if any) and stop the coordinator.
    pub async fn shutdown(&self) -> DebugResult<()> {
        self.inbox
            .send(Message::Shutdown)
            .await
            .map_err(|_| DebugError::CoordinatorStopped)
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

/// Start a coordinator on the current tokio runtime.
pub fn spawn(
    config: &DebuggerConfig,
    launcher: Arc<dyn VmLauncher>,
    output: Arc<dyn OutputSink>,
) -> (
    CoordinatorHandle,
    mpsc::UnboundedReceiver<Notification>,
    JoinHandle<()>,
) {
    let (coordinator, handle, notifications) = Coordinator::new(config, launcher, output);
    let task = tokio::spawn(coordinator.run());
    (handle, notifications, task)
}

pub struct Coordinator {
    config: DebuggerConfig,
    launcher: Arc<dyn VmLauncher>,
    output: Arc<dyn OutputSink>,
    inspector: ValueInspector,
    sources: SourceIndex,
    breakpoints: BreakpointRegistry,
    session: Option<TargetSession>,
    /// Bumped whenever a session is created or deliberately dropped; target
    /// events carrying an older value are ignored.
    generation: u64,
    /// A `Disconnected` notification went out for the current generation.
    disconnect_reported: bool,
    pending_launches: HashMap<CorrelationId, oneshot::Sender<Response>>,
    stopped: bool,
    inbox: mpsc::Receiver<Message>,
    /// Weak so that dropping every client handle ends an idle loop. A live
    /// event pump holds a strong sender until its target goes away.
    inbox_tx: mpsc::WeakSender<Message>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl Coordinator {
    pub fn new(
        config: &DebuggerConfig,
        launcher: Arc<dyn VmLauncher>,
        output: Arc<dyn OutputSink>,
    ) -> (Self, CoordinatorHandle, mpsc::UnboundedReceiver<Notification>) {
        let (inbox_tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));
        let (notifications, notifications_rx) = mpsc::unbounded_channel();
        let sources = SourceIndex::from_files(config.source_files());
        tracing::info!(target: "kestrel.debug", files = sources.len(), "source index built");

        let coordinator = Self {
            config: config.clone(),
            launcher,
            output,
            inspector: ValueInspector::new(config.string_preview_len),
            sources,
            breakpoints: BreakpointRegistry::new(),
            session: None,
            generation: 0,
            disconnect_reported: false,
            pending_launches: HashMap::new(),
            stopped: false,
            inbox,
            inbox_tx: inbox_tx.downgrade(),
            notifications,
        };
        let handle = CoordinatorHandle {
            inbox: inbox_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (coordinator, handle, notifications_rx)
    }

    /// Process messages until shutdown, or until every sender is gone.
    pub async fn run(mut self) {
        tracing::info!(target: "kestrel.debug", "coordinator running");
        while let Some(message) = self.inbox.recv().await {
            match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(message))) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(_) => {
                    tracing::error!(target: "kestrel.debug", "panic while dispatching a message; continuing")
                }
            }
        }
        self.shut_down();
        tracing::info!(target: "kestrel.debug", "coordinator stopped");
    }

    fn dispatch(&mut self, message: Message) -> ControlFlow<()> {
        match message {
            Message::Shutdown => {
                self.shut_down();
                return ControlFlow::Break(());
            }
            Message::Request {
                id,
                request: Request::Shutdown,
                reply,
            } => {
                self.shut_down();
                let _ = reply.send(Response::ok(id, ResponseBody::Bool(true)));
                return ControlFlow::Break(());
            }
            Message::Request {
                id,
                request: Request::Launch { command_line },
                reply,
            } => self.begin_launch(id, &command_line, reply),
            Message::Request { id, request, reply } => {
                let response = self.handle_request(id, request);
                if reply.send(response).is_err() {
                    tracing::debug!(target: "kestrel.debug", id, "requester went away before the response");
                }
            }
            Message::Launched {
                id,
                generation,
                result,
            } => self.finish_launch(id, generation, result),
            Message::Target { generation, event } => self.handle_target_event(generation, event),
        }
        ControlFlow::Continue(())
    }

    fn handle_request(&mut self, id: CorrelationId, request: Request) -> Response {
        let name = request.name();
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(request))) {
            Ok(Ok(body)) => Response::ok(id, body),
            Ok(Err(err)) if err.is_disconnected() => {
                tracing::warn!(target: "kestrel.debug", request = name, "target disconnected during request");
                self.target_lost(Notification::Disconnected);
                Response::error(id, ErrorCode::TargetDisconnected, "target disconnected")
            }
            Ok(Err(err)) => {
                tracing::error!(target: "kestrel.debug", request = name, error = %err, "request failed");
                Response::error(id, ErrorCode::Internal, err.to_string())
            }
            Err(_) => {
                tracing::error!(target: "kestrel.debug", request = name, "panic in request handler");
                Response::error(
                    id,
                    ErrorCode::Internal,
                    format!("internal debugger error while handling {name}"),
                )
            }
        }
    }

    fn execute(&mut self, request: Request) -> DebugResult<ResponseBody> {
        use ResponseBody::Bool;

        Ok(match request {
            Request::IsActive => Bool(self.session.is_some()),
            Request::Stop => Bool(self.stop()),
            Request::Run => match self.session.as_mut() {
                Some(session) => {
                    session.resume()?;
                    Bool(true)
                }
                None => Bool(false),
            },
            Request::Continue { thread_id } => match self.session.as_mut() {
                Some(session) => {
                    let found = session.thread_by_id(thread_id)?.is_some();
                    if found {
                        session.resume()?;
                    }
                    Bool(found)
                }
                None => Bool(false),
            },
            Request::Next { thread_id } => self.step(thread_id, StepDepth::Over)?,
            Request::StepInto { thread_id } => self.step(thread_id, StepDepth::Into)?,
            Request::StepOut { thread_id } => self.step(thread_id, StepDepth::Out)?,
            Request::ValueForName { thread_id, name } => ResponseBody::Value(match self.session.as_mut() {
                Some(session) => session.value_for_name(thread_id, &name)?,
                None => None,
            }),
            Request::SetBreakpoint { file, line } => Bool(self.breakpoints.set_breakpoint(
                self.session.as_mut(),
                canonical_file(&file),
                line,
            )?),
            Request::ClearBreakpoint { file, line } => {
                self.breakpoints
                    .clear_breakpoint(self.session.as_mut(), canonical_file(&file), line)?;
                Bool(true)
            }
            Request::ClearAllBreakpoints => {
                self.breakpoints.clear_all(self.session.as_mut())?;
                Bool(true)
            }
            Request::ListBreakpoints => ResponseBody::Breakpoints(self.breakpoints.list()),
            Request::Backtrace {
                thread_id,
                index,
                count,
            } => ResponseBody::Backtrace(match self.session.as_mut() {
                Some(session) => session.backtrace(thread_id, index, count, &self.sources)?,
                None => None,
            }),
            Request::Value { location } => ResponseBody::Value(match self.session.as_mut() {
                Some(session) => session.value_at(&location)?,
                None => None,
            }),
            Request::SetSources { files } => {
                self.sources
                    .rebuild(files.into_iter().map(|file| canonical_file(&file)));
                tracing::info!(target: "kestrel.debug", files = self.sources.len(), "source index rebuilt");
                Bool(true)
            }
            Request::Launch { .. } | Request::Shutdown => {
                return Err(DebugError::Internal(
                    "lifecycle request reached the generic handler".to_string(),
                ))
            }
        })
    }

    fn step(&mut self, thread: kestrel_vm::ThreadId, depth: StepDepth) -> DebugResult<ResponseBody> {
        Ok(ResponseBody::Bool(match self.session.as_mut() {
            Some(session) => session.step(thread, depth)?,
            None => false,
        }))
    }

    fn begin_launch(
        &mut self,
        id: CorrelationId,
        command_line: &str,
        reply: oneshot::Sender<Response>,
    ) {
        self.drop_session("relaunch");
        self.generation += 1;
        self.disconnect_reported = false;
        let generation = self.generation;

        let Some(inbox) = self.inbox_tx.upgrade() else {
            let _ = reply.send(Response::error(id, ErrorCode::Internal, "coordinator is stopping"));
            return;
        };
        let options = launch_options(command_line, &self.config);
        let launcher = Arc::clone(&self.launcher);
        tracing::info!(target: "kestrel.debug", generation, command_line = %options.command_line, "launching target");

        self.pending_launches.insert(id, reply);
        let spawned = thread::Builder::new()
            .name(format!("kestrel-launch-{generation}"))
            .spawn(move || {
                let result = launcher.launch(&options);
                if let Err(mpsc::error::SendError(Message::Launched {
                    result: Ok(mut launched),
                    ..
                })) = inbox.blocking_send(Message::Launched {
                    id,
                    generation,
                    result,
                }) {
                    let _ = launched.vm.dispose();
                }
            });

        if let Err(err) = spawned {
            tracing::error!(target: "kestrel.debug", error = %err, "failed to spawn launch worker");
            if let Some(reply) = self.pending_launches.remove(&id) {
                let _ = reply.send(Response::error(
                    id,
                    ErrorCode::Internal,
                    format!("failed to spawn launch worker: {err}"),
                ));
            }
        }
    }

    fn finish_launch(
        &mut self,
        id: CorrelationId,
        generation: u64,
        result: kestrel_vm::Result<LaunchedVm>,
    ) {
        let reply = self.pending_launches.remove(&id);
        let started = match result {
            Err(err) => {
                tracing::warn!(target: "kestrel.debug", generation, error = %err, "launch failed");
                false
            }
            Ok(mut launched) if generation != self.generation || self.stopped => {
                tracing::info!(target: "kestrel.debug", generation, "discarding superseded launch");
                let _ = launched.vm.dispose();
                false
            }
            Ok(mut launched) => match self.inbox_tx.upgrade() {
                None => {
                    let _ = launched.vm.dispose();
                    false
                }
                Some(inbox) => match TargetSession::start(
                    launched,
                    generation,
                    self.inspector.clone(),
                    inbox,
                    Arc::clone(&self.output),
                ) {
                    Ok(session) => {
                        self.session = Some(session);
                        true
                    }
                    Err(err) => {
                        tracing::warn!(target: "kestrel.debug", generation, error = %err, "failed to start target session");
                        false
                    }
                },
            },
        };

        if let Some(reply) = reply {
            let _ = reply.send(Response::ok(id, ResponseBody::Bool(started)));
        }
    }

    fn handle_target_event(&mut self, generation: u64, event: VmEvent) {
        if generation != self.generation {
            tracing::debug!(target: "kestrel.debug", generation, current = self.generation, ?event, "dropping event from a retired target");
            return;
        }
        let lifecycle = matches!(event, VmEvent::VmDeath | VmEvent::VmDisconnect);
        if self.session.is_none() && !lifecycle {
            tracing::debug!(target: "kestrel.debug", ?event, "dropping event without a target");
            return;
        }

        match self.translate_event(event) {
            Ok(()) => {}
            Err(err) if err.is_disconnected() => self.target_lost(Notification::Disconnected),
            Err(err) => {
                tracing::warn!(target: "kestrel.debug", error = %err, "failed to handle target event")
            }
        }
    }

    fn translate_event(&mut self, event: VmEvent) -> DebugResult<()> {
        match event {
            VmEvent::VmStart { .. } => {
                if let Some(session) = self.session.as_mut() {
                    session.index_loaded_types()?;
                    self.breakpoints.retry_all_pending(session)?;
                }
                self.notify(Notification::Started);
            }
            VmEvent::VmDeath => self.target_lost(Notification::Died),
            VmEvent::VmDisconnect => self.target_lost(Notification::Disconnected),
            VmEvent::ClassPrepare { class, .. } => {
                if let Some(session) = self.session.as_mut() {
                    if let Some(source) = session.type_loaded(&class) {
                        self.breakpoints.retry_pending(session, &source)?;
                    }
                }
            }
            VmEvent::ClassUnload { .. } => {}
            VmEvent::ThreadStart { thread, .. } => {
                self.notify(Notification::ThreadStarted { thread_id: thread })
            }
            VmEvent::ThreadDeath { thread, .. } => {
                self.notify(Notification::ThreadDied { thread_id: thread })
            }
            VmEvent::Breakpoint {
                thread, location, ..
            } => match self.sources.position_of(&location) {
                Some(position) => self.notify(Notification::BreakpointHit {
                    thread_id: thread,
                    position,
                }),
                None => tracing::warn!(
                    target: "kestrel.debug",
                    thread_id = thread,
                    source = ?location.source_name,
                    line = ?location.line,
                    "breakpoint hit at an unknown source position; dropped"
                ),
            },
            VmEvent::SingleStep {
                request_id,
                thread,
                location,
            } => {
                if let Some(session) = self.session.as_mut() {
                    session.step_completed(thread, request_id)?;
                }
                match self.sources.position_of(&location) {
                    Some(position) => self.notify(Notification::Stepped {
                        thread_id: thread,
                        position,
                    }),
                    None => tracing::warn!(
                        target: "kestrel.debug",
                        thread_id = thread,
                        source = ?location.source_name,
                        line = ?location.line,
                        "step ended at an unknown source position; dropped"
                    ),
                }
            }
            VmEvent::Exception {
                thread,
                location,
                exception,
                ..
            } => {
                let description = match self.session.as_mut() {
                    Some(session) => session.exception_description(exception, thread)?,
                    None => "<unknown exception>".to_string(),
                };
                self.notify(Notification::ExceptionThrown {
                    description,
                    thread_id: thread,
                    exception_id: exception,
                    position: self.sources.position_of(&location),
                });
            }
        }
        Ok(())
    }

    /// The target went away on its own: forget it, park its breakpoints and
    /// tell the client.
    fn target_lost(&mut self, notification: Notification) {
        if let Some(session) = self.session.take() {
            tracing::info!(target: "kestrel.debug", generation = session.generation(), ?notification, "target lost");
        }
        let moved = self.breakpoints.deactivate_all();
        if moved > 0 {
            tracing::info!(target: "kestrel.debug", moved, "active breakpoints returned to pending");
        }
        if notification == Notification::Disconnected {
            if self.disconnect_reported {
                return;
            }
            self.disconnect_reported = true;
        }
        self.notify(notification);
    }

    /// Drop the current target and abandon any launch still in flight.
    /// Returns whether there was anything to stop.
    fn stop(&mut self) -> bool {
        let had_target = self.drop_session("stop requested");
        let had_launch = self.cancel_pending_launches();
        had_target || had_launch
    }

    /// Answer every in-flight launch with `false`. The generation moves on,
    /// so the targets they eventually produce are disposed on arrival.
    fn cancel_pending_launches(&mut self) -> bool {
        if self.pending_launches.is_empty() {
            return false;
        }
        self.generation += 1;
        for (id, reply) in self.pending_launches.drain() {
            tracing::info!(target: "kestrel.debug", id, "launch cancelled");
            let _ = reply.send(Response::ok(id, ResponseBody::Bool(false)));
        }
        true
    }

    /// Dispose the current target on our own initiative. Its remaining
    /// events are ignored. Returns whether there was a target.
    fn drop_session(&mut self, reason: &'static str) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        tracing::info!(target: "kestrel.debug", generation = session.generation(), reason, "disposing target");
        drop(session);
        self.generation += 1;
        self.breakpoints.deactivate_all();
        true
    }

    fn shut_down(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.drop_session("shutdown");
        self.cancel_pending_launches();
        tracing::info!(target: "kestrel.debug", "coordinator shut down");
    }

    fn notify(&self, notification: Notification) {
        tracing::debug!(target: "kestrel.debug", ?notification, "notify");
        if self.notifications.send(notification).is_err() {
            tracing::debug!(target: "kestrel.debug", "no notification listener");
        }
    }
}
