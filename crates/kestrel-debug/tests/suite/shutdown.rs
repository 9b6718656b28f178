use kestrel_debug::{protocol::Request, DebugError};

use crate::harness::TestDebugger;

#[tokio::test]
async fn shutdown_request_disposes_the_target_and_stops() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;

    assert!(debugger.bool(Request::Shutdown).await);
    assert!(debugger.vm.is_disposed());

    let handle = debugger.handle.clone();
    debugger.join().await;
    assert!(handle.is_closed());
    assert!(matches!(
        handle.request(Request::IsActive).await,
        Err(DebugError::CoordinatorStopped)
    ));
}

#[tokio::test]
async fn handle_shutdown_disposes_the_target() {
    let mut debugger = TestDebugger::new();
    debugger.launch().await;
    let vm = debugger.vm.clone();

    debugger.shutdown().await;
    assert!(vm.is_disposed());
}

#[tokio::test]
async fn dropping_every_handle_stops_an_idle_coordinator() {
    let debugger = TestDebugger::new();
    debugger.release_handle().await;
}
