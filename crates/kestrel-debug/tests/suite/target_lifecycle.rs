use std::{sync::Arc, time::Duration};

use kestrel_config::DebuggerConfig;
use kestrel_debug::{
    protocol::{Notification, Request},
    Breakpoint,
};
use kestrel_vm::{
    EventKind, EventModifier, LaunchOptions, LaunchedVm, MockLauncher, SuspendPolicy, VmLauncher,
};

use crate::harness::{TestDebugger, FOO};

#[tokio::test]
async fn launch_installs_standing_requests() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;

    assert!(debugger.bool(Request::IsActive).await);
    let vm = &debugger.vm;
    for kind in [
        EventKind::ClassPrepare,
        EventKind::ThreadStart,
        EventKind::ThreadDeath,
    ] {
        let requests = vm.requests(kind);
        assert_eq!(requests.len(), 1, "{kind:?}");
        assert_eq!(requests[0].suspend, SuspendPolicy::None);
    }
    let exceptions = vm.requests(EventKind::Exception);
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].suspend, SuspendPolicy::All);
    assert_eq!(
        exceptions[0].modifiers,
        vec![EventModifier::ExceptionOnly {
            exception_or_null: 0,
            caught: false,
            uncaught: true,
        }]
    );
    debugger.shutdown().await;
}

#[tokio::test]
async fn launch_uses_configured_classpath_and_options() {
    let mut debugger = TestDebugger::with_config(DebuggerConfig {
        classpath: vec!["/opt/app/classes".into()],
        vm_options: vec!["-Xmx256m".to_string()],
        ..DebuggerConfig::default()
    });
    debugger.launch().await;

    let launches = debugger.vm.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].command_line, "com.acme.Main");
    assert_eq!(launches[0].classpath, vec![std::path::PathBuf::from("/opt/app/classes")]);
    assert_eq!(launches[0].vm_options, vec!["-Xmx256m"]);
    debugger.shutdown().await;
}

#[tokio::test]
async fn failed_launch_leaves_no_target() {
    let debugger = TestDebugger::new();
    debugger.vm.fail_next_launch("no such main class");

    assert!(
        !debugger
            .bool(Request::Launch {
                command_line: "com.acme.Missing".to_string(),
            })
            .await
    );
    assert!(!debugger.bool(Request::IsActive).await);
    debugger.shutdown().await;
}

#[tokio::test]
async fn death_moves_active_breakpoints_to_pending() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;
    debugger.vm.load_class(FOO);
    debugger.settle().await;
    assert!(debugger.set_breakpoint("com/acme/Foo.scala", 10).await);

    debugger.vm.terminate();
    debugger.wait_for(|n| *n == Notification::Died).await;
    debugger
        .wait_for(|n| *n == Notification::Disconnected)
        .await;

    assert!(!debugger.bool(Request::IsActive).await);
    let list = debugger.breakpoints().await;
    assert!(list.active.is_empty());
    assert_eq!(
        list.pending,
        vec![Breakpoint::new(debugger.source("com/acme/Foo.scala"), 10)]
    );
    debugger.shutdown().await;
}

#[tokio::test]
async fn relaunch_reactivates_breakpoints_of_loaded_classes() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;
    debugger.vm.load_class(FOO);
    debugger.settle().await;
    debugger.set_breakpoint("com/acme/Foo.scala", 10).await;

    debugger.vm.terminate();
    debugger
        .wait_for(|n| *n == Notification::Disconnected)
        .await;

    // The mock keeps Foo loaded across launches.
    debugger.launch().await;
    assert_eq!(debugger.breakpoints().await.active.len(), 1);
    assert_eq!(debugger.vm.requests(EventKind::Breakpoint).len(), 1);
    debugger.shutdown().await;
}

#[tokio::test]
async fn stop_disposes_the_target() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;

    assert!(debugger.bool(Request::Stop).await);
    assert!(debugger.vm.is_disposed());
    assert!(!debugger.bool(Request::IsActive).await);
    // Nothing left to stop.
    assert!(!debugger.bool(Request::Stop).await);
    debugger.shutdown().await;
}

/// Takes its time before handing over to the mock.
struct SlowLauncher {
    inner: MockLauncher,
    delay: Duration,
}

impl VmLauncher for SlowLauncher {
    fn launch(&self, options: &LaunchOptions) -> kestrel_vm::Result<LaunchedVm> {
        std::thread::sleep(self.delay);
        self.inner.launch(options)
    }
}

#[tokio::test]
async fn stop_cancels_a_launch_in_flight() {
    let debugger = TestDebugger::with_launcher(DebuggerConfig::default(), |vm| {
        Arc::new(SlowLauncher {
            inner: MockLauncher::new(vm),
            delay: Duration::from_millis(300),
        })
    });

    let launch = debugger.bool(Request::Launch {
        command_line: "com.acme.Main".to_string(),
    });
    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        debugger.bool(Request::Stop).await
    };
    let (launched, stopped) = tokio::join!(launch, stop);
    assert!(stopped);
    assert!(!launched);
    assert!(!debugger.bool(Request::IsActive).await);

    // The target shows up after the stop and is thrown away.
    let vm = debugger.vm.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while vm.launches().is_empty() || !vm.is_disposed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("late target was not disposed");
    assert!(!debugger.bool(Request::IsActive).await);
    debugger.shutdown().await;
}

#[tokio::test]
async fn relaunch_replaces_the_running_target() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;
    debugger.launch().await;

    assert!(debugger.bool(Request::IsActive).await);
    assert_eq!(debugger.vm.launches().len(), 2);
    debugger.settle().await;
    assert!(
        !debugger.seen().contains(&Notification::Disconnected),
        "disposing the first target must not look like losing the second: {:?}",
        debugger.seen()
    );
    debugger.shutdown().await;
}

#[tokio::test]
async fn target_output_is_relayed() {
    let mut debugger = TestDebugger::new();
    debugger.vm.set_output(b"hello from the target\n", b"warning: low memory\n");
    debugger.launch().await;

    let output = debugger.output.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while output.stdout() != b"hello from the target\n"
            || output.stderr() != b"warning: low memory\n"
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("target output was not relayed");
    debugger.shutdown().await;
}
