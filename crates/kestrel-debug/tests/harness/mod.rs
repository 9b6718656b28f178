#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use kestrel_config::DebuggerConfig;
use kestrel_debug::{
    protocol::{Notification, Request, Response, ResponseBody},
    BreakpointList, CapturedOutput, CoordinatorHandle,
};
use kestrel_vm::{
    Location, MockClass, MockLauncher, MockVm, ReferenceTypeId, ThreadId, VmEvent, VmLauncher,
};
use tempfile::TempDir;
use tokio::{sync::mpsc, task::JoinHandle};

pub const FOO: ReferenceTypeId = 10;
pub const BAR: ReferenceTypeId = 20;
pub const POINT: ReferenceTypeId = 30;
/// The thread the mock target reports in `VmStart`.
pub const MAIN: ThreadId = 1;

const TIMEOUT: Duration = Duration::from_secs(5);
const SOURCES: &[&str] = &["com/acme/Foo.scala", "com/acme/Bar.scala", "com/acme/Point.scala"];

/// `com.acme.Foo`: constructor on line 3, `run` on lines 10-12 and 20.
pub fn foo_class() -> MockClass {
    MockClass::new(FOO, "Lcom/acme/Foo;", Some("Foo.scala"))
        .with_source_path("com/acme/Foo.scala")
        .with_method(1, "<init>", &[3])
        .with_method(2, "run", &[10, 11, 12, 20])
        .with_field(1, "x", "I")
        .with_field(2, "name", "Ljava/lang/String;")
}

pub fn bar_class() -> MockClass {
    MockClass::new(BAR, "Lcom/acme/Bar;", Some("Bar.scala"))
        .with_source_path("com/acme/Bar.scala")
        .with_method(3, "go", &[5, 6])
}

pub fn point_class() -> MockClass {
    MockClass::new(POINT, "Lcom/acme/Point;", Some("Point.scala"))
        .with_source_path("com/acme/Point.scala")
        .with_field(5, "x", "I")
        .with_field(6, "y", "I")
}

pub fn foo_location(line: u32) -> Location {
    foo_class().location(2, line)
}

/// A coordinator driving a scripted [`MockVm`] over a temporary source tree.
pub struct TestDebugger {
    pub vm: MockVm,
    pub handle: CoordinatorHandle,
    pub output: Arc<CapturedOutput>,
    notifications: mpsc::UnboundedReceiver<Notification>,
    seen: Vec<Notification>,
    task: JoinHandle<()>,
    next_marker: ThreadId,
    sources: TempDir,
}

impl TestDebugger {
    pub fn new() -> Self {
        Self::with_config(DebuggerConfig::default())
    }

    /// `config.source_roots` is replaced by the temporary source tree.
    pub fn with_config(config: DebuggerConfig) -> Self {
        Self::with_launcher(config, |vm| Arc::new(MockLauncher::new(vm)))
    }

    /// Launches go through whatever `launcher` builds around the shared mock.
    pub fn with_launcher(
        mut config: DebuggerConfig,
        launcher: impl FnOnce(MockVm) -> Arc<dyn VmLauncher>,
    ) -> Self {
        let sources = tempfile::tempdir().unwrap();
        for rel in SOURCES {
            let path = sources.path().join("src").join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "// source\n").unwrap();
        }
        config.source_roots = vec![sources.path().join("src")];

        let vm = MockVm::new();
        vm.add_class(foo_class());
        vm.add_class(bar_class());
        vm.add_class(point_class());
        vm.add_thread(MAIN, "main");

        let output = Arc::new(CapturedOutput::new());
        let (handle, notifications, task) = kestrel_debug::spawn(
            &config,
            launcher(vm.clone()),
            output.clone(),
        );

        Self {
            vm,
            handle,
            output,
            notifications,
            seen: Vec::new(),
            task,
            next_marker: 9_000,
            sources,
        }
    }

    /// Canonical path of a file in the source tree.
    pub fn source(&self, rel: &str) -> PathBuf {
        std::fs::canonicalize(self.sources.path().join("src").join(rel)).unwrap()
    }

    pub async fn request(&self, request: Request) -> Response {
        tokio::time::timeout(TIMEOUT, self.handle.request(request))
            .await
            .expect("timed out waiting for a response")
            .expect("coordinator stopped")
    }

    pub async fn bool(&self, request: Request) -> bool {
        let response = self.request(request).await;
        response
            .as_bool()
            .unwrap_or_else(|| panic!("expected a boolean response, got {response:?}"))
    }

    pub async fn set_breakpoint(&self, rel: &str, line: u32) -> bool {
        self.bool(Request::SetBreakpoint {
            file: self.source(rel),
            line,
        })
        .await
    }

    pub async fn clear_breakpoint(&self, rel: &str, line: u32) -> bool {
        self.bool(Request::ClearBreakpoint {
            file: self.source(rel),
            line,
        })
        .await
    }

    pub async fn breakpoints(&self) -> BreakpointList {
        match self.request(Request::ListBreakpoints).await.result {
            Ok(ResponseBody::Breakpoints(list)) => list,
            other => panic!("unexpected listBreakpoints result: {other:?}"),
        }
    }

    /// Launch the target and wait until the coordinator has processed its
    /// start event.
    pub async fn launch(&mut self) {
        assert!(
            self.bool(Request::Launch {
                command_line: "com.acme.Main".to_string(),
            })
            .await,
            "launch failed"
        );
        self.wait_for(|n| *n == Notification::Started).await;
    }

    pub async fn next_notification(&mut self) -> Notification {
        let notification = tokio::time::timeout(TIMEOUT, self.notifications.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("notification channel closed");
        self.seen.push(notification.clone());
        notification
    }

    /// Skip notifications until one matches.
    pub async fn wait_for(&mut self, pred: impl Fn(&Notification) -> bool) -> Notification {
        loop {
            let notification = self.next_notification().await;
            if pred(&notification) {
                return notification;
            }
        }
    }

    /// Wait until every target event emitted so far has been processed.
    pub async fn settle(&mut self) {
        self.next_marker += 1;
        let marker = self.next_marker;
        assert!(
            self.vm.emit(vec![VmEvent::ThreadStart {
                request_id: 0,
                thread: marker,
            }]),
            "target event queue is closed"
        );
        self.wait_for(|n| *n == Notification::ThreadStarted { thread_id: marker })
            .await;
    }

    /// Every notification received so far, in order.
    pub fn seen(&self) -> &[Notification] {
        &self.seen
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        self.join().await;
    }

    /// Drop the only client handle; an idle coordinator must notice.
    pub async fn release_handle(self) {
        let Self { handle, task, .. } = self;
        drop(handle);
        tokio::time::timeout(TIMEOUT, task)
            .await
            .expect("coordinator outlived its last handle")
            .unwrap();
    }

    /// Wait for a coordinator that was told to stop some other way.
    pub async fn join(self) {
        tokio::time::timeout(TIMEOUT, self.task)
            .await
            .expect("coordinator did not stop")
            .unwrap();
    }
}
