use kestrel_debug::protocol::{ErrorCode, Notification, Request};

use crate::harness::{TestDebugger, FOO, MAIN};

#[tokio::test]
async fn disconnect_mid_request_is_reported_distinctly() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;
    debugger.vm.load_class(FOO);
    debugger.settle().await;
    assert!(debugger.set_breakpoint("com/acme/Foo.scala", 10).await);

    debugger.vm.disconnect();
    let response = debugger
        .request(Request::ValueForName {
            thread_id: MAIN,
            name: "x".to_string(),
        })
        .await;
    assert_eq!(response.error_code(), Some(ErrorCode::TargetDisconnected));

    debugger
        .wait_for(|n| *n == Notification::Disconnected)
        .await;
    assert!(!debugger.bool(Request::IsActive).await);
    let list = debugger.breakpoints().await;
    assert!(list.active.is_empty());
    assert_eq!(list.pending.len(), 1);
    debugger.shutdown().await;
}

#[tokio::test]
async fn breakpoint_set_during_disconnect_is_kept_pending() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;
    debugger.vm.load_class(FOO);
    debugger.settle().await;

    debugger.vm.disconnect();
    let response = debugger
        .request(Request::SetBreakpoint {
            file: debugger.source("com/acme/Foo.scala"),
            line: 10,
        })
        .await;
    assert_eq!(response.error_code(), Some(ErrorCode::TargetDisconnected));
    assert_eq!(debugger.breakpoints().await.pending.len(), 1);

    // Later requests simply find no target.
    assert!(!debugger.bool(Request::Run).await);
    debugger.shutdown().await;
}

#[tokio::test]
async fn a_late_disconnect_from_an_old_target_is_ignored() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;
    assert!(debugger.bool(Request::Stop).await);

    debugger.launch().await;
    debugger.settle().await;

    assert!(debugger.bool(Request::IsActive).await);
    assert!(!debugger.seen().contains(&Notification::Disconnected));
    debugger.shutdown().await;
}
