use kestrel_debug::{
    protocol::{DebugBacktrace, Request, ResponseBody},
    SourcePosition,
};
use kestrel_vm::{MockFrame, VmValue};

use crate::harness::{foo_location, TestDebugger, FOO, MAIN};

async fn backtrace(debugger: &TestDebugger, thread_id: u64, index: usize, count: i32) -> Option<DebugBacktrace> {
    match debugger
        .request(Request::Backtrace {
            thread_id,
            index,
            count,
        })
        .await
        .result
    {
        Ok(ResponseBody::Backtrace(backtrace)) => backtrace,
        other => panic!("unexpected backtrace result: {other:?}"),
    }
}

async fn two_frames_deep() -> TestDebugger {
    let mut debugger = TestDebugger::new();
    debugger.vm.set_frames(
        MAIN,
        vec![
            MockFrame::new(1, foo_location(11))
                .with_argument("n", "I", VmValue::Int(7))
                .with_local("done", "Z", VmValue::Boolean(false))
                .with_this(500),
            MockFrame::new(2, foo_location(20)),
        ],
    );
    debugger.launch().await;
    debugger.vm.load_class(FOO);
    debugger.settle().await;
    debugger
}

#[tokio::test]
async fn frames_describe_method_position_and_locals() {
    let debugger = two_frames_deep().await;

    let trace = backtrace(&debugger, MAIN, 0, -1).await.unwrap();
    assert_eq!(trace.thread_id, MAIN);
    assert_eq!(trace.thread_name, "main");
    assert_eq!(trace.frames.len(), 2);

    let top = &trace.frames[0];
    assert_eq!(top.index, 0);
    assert_eq!(top.class_name, "com.acme.Foo");
    assert_eq!(top.method_name, "run");
    assert_eq!(
        top.position,
        Some(SourcePosition::new(debugger.source("com/acme/Foo.scala"), 11))
    );
    assert_eq!(top.num_args, 1);
    assert_eq!(top.this_object_id, Some(500));
    let locals: Vec<_> = top
        .locals
        .iter()
        .map(|l| (l.name.as_str(), l.summary.as_str(), l.type_name.as_str()))
        .collect();
    assert_eq!(locals, vec![("n", "7", "int"), ("done", "false", "boolean")]);

    assert!(trace.frames[1].locals.is_empty());
    assert_eq!(trace.frames[1].this_object_id, None);
    debugger.shutdown().await;
}

#[tokio::test]
async fn frames_can_be_paged() {
    let debugger = two_frames_deep().await;

    let rest = backtrace(&debugger, MAIN, 1, -1).await.unwrap();
    assert_eq!(rest.frames.len(), 1);
    assert_eq!(rest.frames[0].index, 1);
    assert_eq!(
        rest.frames[0].position,
        Some(SourcePosition::new(debugger.source("com/acme/Foo.scala"), 20))
    );

    let first = backtrace(&debugger, MAIN, 0, 1).await.unwrap();
    assert_eq!(first.frames.len(), 1);
    assert_eq!(first.frames[0].index, 0);

    let past_the_end = backtrace(&debugger, MAIN, 5, -1).await.unwrap();
    assert!(past_the_end.frames.is_empty());
    debugger.shutdown().await;
}

#[tokio::test]
async fn unknown_threads_have_no_backtrace() {
    let debugger = two_frames_deep().await;

    assert!(backtrace(&debugger, 404, 0, -1).await.is_none());
    debugger.shutdown().await;
}
