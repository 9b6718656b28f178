use kestrel_debug::Breakpoint;
use kestrel_vm::{EventKind, EventModifier};

use crate::harness::{foo_location, TestDebugger, BAR, FOO};

#[tokio::test]
async fn breakpoint_before_launch_is_pending() {
    let debugger = TestDebugger::new();

    assert!(!debugger.set_breakpoint("com/acme/Foo.scala", 10).await);

    let list = debugger.breakpoints().await;
    assert!(list.active.is_empty());
    assert_eq!(
        list.pending,
        vec![Breakpoint::new(debugger.source("com/acme/Foo.scala"), 10)]
    );
    debugger.shutdown().await;
}

#[tokio::test]
async fn breakpoint_activates_when_its_class_loads() {
    let mut debugger = TestDebugger::new();
    assert!(!debugger.set_breakpoint("com/acme/Foo.scala", 10).await);

    debugger.launch().await;
    // Foo is not loaded yet.
    assert_eq!(debugger.breakpoints().await.pending.len(), 1);
    assert!(debugger.vm.requests(EventKind::Breakpoint).is_empty());

    assert!(debugger.vm.load_class(FOO));
    debugger.settle().await;

    let list = debugger.breakpoints().await;
    assert!(list.pending.is_empty());
    assert_eq!(
        list.active,
        vec![Breakpoint::new(debugger.source("com/acme/Foo.scala"), 10)]
    );

    let installed = debugger.vm.requests(EventKind::Breakpoint);
    assert_eq!(installed.len(), 1);
    assert_eq!(
        installed[0].modifiers,
        vec![EventModifier::LocationOnly {
            location: foo_location(10)
        }]
    );
    debugger.shutdown().await;
}

#[tokio::test]
async fn unrelated_class_load_leaves_breakpoint_pending() {
    let mut debugger = TestDebugger::new();
    debugger.set_breakpoint("com/acme/Foo.scala", 10).await;
    debugger.launch().await;

    assert!(debugger.vm.load_class(BAR));
    debugger.settle().await;

    let list = debugger.breakpoints().await;
    assert!(list.active.is_empty());
    assert_eq!(list.pending.len(), 1);
    debugger.shutdown().await;
}

#[tokio::test]
async fn line_without_code_stays_pending_after_load() {
    let mut debugger = TestDebugger::new();
    debugger.set_breakpoint("com/acme/Foo.scala", 15).await;
    debugger.launch().await;

    debugger.vm.load_class(FOO);
    debugger.settle().await;

    assert_eq!(debugger.breakpoints().await.pending.len(), 1);
    assert!(debugger.vm.requests(EventKind::Breakpoint).is_empty());
    debugger.shutdown().await;
}

#[tokio::test]
async fn classes_loaded_before_start_activate_pending_breakpoints() {
    let mut debugger = TestDebugger::new();
    debugger.vm.preload_class(FOO);
    debugger.set_breakpoint("com/acme/Foo.scala", 11).await;

    debugger.launch().await;

    let list = debugger.breakpoints().await;
    assert_eq!(list.active.len(), 1);
    assert!(list.pending.is_empty());
    debugger.shutdown().await;
}
