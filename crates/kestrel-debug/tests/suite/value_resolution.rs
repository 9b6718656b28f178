use kestrel_debug::{
    protocol::{DebugLocation, Request, ResponseBody},
    DebugValue,
};
use kestrel_vm::{MockFrame, MockObject, MockObjectKind, VmValue, TAG_OBJECT};

use crate::harness::{foo_location, TestDebugger, FOO, MAIN, POINT};

const RECEIVER: u64 = 500;
const POINT_OBJ: u64 = 600;

async fn value(debugger: &TestDebugger, request: Request) -> Option<DebugValue> {
    match debugger.request(request).await.result {
        Ok(ResponseBody::Value(value)) => value,
        other => panic!("unexpected value result: {other:?}"),
    }
}

async fn value_for_name(debugger: &TestDebugger, name: &str) -> Option<DebugValue> {
    value(
        debugger,
        Request::ValueForName {
            thread_id: MAIN,
            name: name.to_string(),
        },
    )
    .await
}

fn summary(value: &DebugValue) -> &str {
    match value {
        DebugValue::Primitive { summary, .. } => summary,
        other => panic!("expected a primitive, got {other:?}"),
    }
}

/// Frame 0 runs `Foo.run` on a receiver whose field `x` is 99.
async fn stopped_in_foo(frame0: MockFrame) -> TestDebugger {
    let mut debugger = TestDebugger::new();
    debugger.vm.add_object(
        RECEIVER,
        MockObject::new(FOO, MockObjectKind::Plain).with_field_value(1, VmValue::Int(99)),
    );
    debugger.vm.add_object(
        POINT_OBJ,
        MockObject::new(POINT, MockObjectKind::Plain)
            .with_field_value(5, VmValue::Int(3))
            .with_field_value(6, VmValue::Int(4)),
    );
    debugger.vm.set_frames(
        MAIN,
        vec![
            frame0.with_this(RECEIVER),
            MockFrame::new(2, foo_location(20)).with_local("outer", "J", VmValue::Long(8)),
        ],
    );
    debugger.launch().await;
    debugger.vm.load_class(FOO);
    debugger.vm.load_class(POINT);
    debugger.settle().await;
    debugger
}

#[tokio::test]
async fn local_shadows_receiver_field() {
    let debugger = stopped_in_foo(
        MockFrame::new(1, foo_location(11)).with_local("x", "I", VmValue::Int(5)),
    )
    .await;

    let x = value_for_name(&debugger, "x").await.unwrap();
    assert_eq!(summary(&x), "5");
    assert_eq!(x.type_name(), "int");
    debugger.shutdown().await;
}

#[tokio::test]
async fn receiver_field_is_the_fallback() {
    let debugger = stopped_in_foo(MockFrame::new(1, foo_location(11))).await;

    let x = value_for_name(&debugger, "x").await.unwrap();
    assert_eq!(summary(&x), "99");
    debugger.shutdown().await;
}

#[tokio::test]
async fn outer_frames_are_searched() {
    let debugger = stopped_in_foo(MockFrame::new(1, foo_location(11))).await;

    let outer = value_for_name(&debugger, "outer").await.unwrap();
    assert_eq!(summary(&outer), "8L");
    debugger.shutdown().await;
}

#[tokio::test]
async fn unknown_names_and_threads_resolve_to_none() {
    let debugger = stopped_in_foo(MockFrame::new(1, foo_location(11))).await;

    assert!(value_for_name(&debugger, "nothing").await.is_none());
    let other_thread = value(
        &debugger,
        Request::ValueForName {
            thread_id: 77,
            name: "x".to_string(),
        },
    )
    .await;
    assert!(other_thread.is_none());
    debugger.shutdown().await;
}

#[tokio::test]
async fn object_fields_are_fetched_on_demand() {
    let debugger = stopped_in_foo(MockFrame::new(1, foo_location(11)).with_local(
        "p",
        "Lcom/acme/Point;",
        VmValue::Object {
            id: POINT_OBJ,
            tag: TAG_OBJECT,
        },
    ))
    .await;

    let p = value_for_name(&debugger, "p").await.unwrap();
    let DebugValue::Object {
        fields,
        type_name,
        object_id,
        thread_id,
    } = &p
    else {
        panic!("expected an object, got {p:?}");
    };
    assert_eq!(type_name, "com.acme.Point");
    assert_eq!((*object_id, *thread_id), (POINT_OBJ, MAIN));
    assert_eq!(
        fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        vec!["x", "y"]
    );
    assert!(fields.iter().all(|f| f.value.is_none()));

    let y = value(
        &debugger,
        Request::Value {
            location: DebugLocation::ObjectField {
                object_id: POINT_OBJ,
                field: "y".to_string(),
            },
        },
    )
    .await
    .unwrap();
    assert_eq!(summary(&y), "4");

    let by_id = value(
        &debugger,
        Request::Value {
            location: DebugLocation::ObjectReference {
                object_id: POINT_OBJ,
            },
        },
    )
    .await
    .unwrap();
    assert_eq!(by_id, p);
    debugger.shutdown().await;
}

#[tokio::test]
async fn stack_slots_are_addressable() {
    let debugger = stopped_in_foo(MockFrame::new(1, foo_location(11))).await;

    let outer = value(
        &debugger,
        Request::Value {
            location: DebugLocation::StackSlot {
                thread_id: MAIN,
                frame: 1,
                offset: 0,
            },
        },
    )
    .await
    .unwrap();
    assert_eq!(summary(&outer), "8L");
    debugger.shutdown().await;
}
