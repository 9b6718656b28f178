use crate::{FieldId, FrameId, MethodId, ObjectId, ReferenceTypeId, RequestId, ThreadId};

pub const TAG_ARRAY: u8 = b'[';
pub const TAG_OBJECT: u8 = b'L';
pub const TAG_STRING: u8 = b's';
pub const TAG_THREAD: u8 = b't';
pub const TAG_THREAD_GROUP: u8 = b'g';
pub const TAG_CLASS_LOADER: u8 = b'l';
pub const TAG_CLASS_OBJECT: u8 = b'c';

const FIELD_MODIFIER_STATIC: u32 = 0x0008;

#[derive(Clone, Debug, PartialEq)]
pub enum VmValue {
    Null,
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object { id: ObjectId, tag: u8 },
}

impl VmValue {
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::Object { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// A code position inside the target.
///
/// Source information is filled in by the backend when the owning class has
/// debug info; `line` is 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
    pub line: Option<u32>,
    /// Bare file name from the `SourceFile` attribute (`Foo.scala`).
    pub source_name: Option<String>,
    /// Package-relative path (`com/acme/Foo.scala`) when the backend knows it.
    pub source_path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassInfo {
    pub type_id: ReferenceTypeId,
    pub signature: String,
    pub source_name: Option<String>,
}

impl ClassInfo {
    pub fn name(&self) -> String {
        signature_to_type_name(&self.signature)
    }

    pub fn is_array(&self) -> bool {
        self.signature.starts_with('[')
    }

    /// Element type name for array classes.
    pub fn component_type_name(&self) -> Option<String> {
        self.signature
            .strip_prefix('[')
            .map(signature_to_type_name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & FIELD_MODIFIER_STATIC != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub signature: String,
    pub slot: u32,
    pub is_argument: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub location: Location,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    SingleStep = 1,
    Breakpoint = 2,
    Exception = 4,
    ThreadStart = 6,
    ThreadDeath = 7,
    ClassPrepare = 8,
    ClassUnload = 9,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendPolicy {
    None = 0,
    EventThread = 1,
    All = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepSize {
    Min = 0,
    Line = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepDepth {
    Into = 0,
    Over = 1,
    Out = 2,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventModifier {
    /// Fire at most `count` times, then expire.
    Count { count: u32 },
    ThreadOnly { thread: ThreadId },
    ClassMatch { pattern: String },
    LocationOnly { location: Location },
    ExceptionOnly {
        exception_or_null: ReferenceTypeId,
        caught: bool,
        uncaught: bool,
    },
    Step {
        thread: ThreadId,
        size: StepSize,
        depth: StepDepth,
    },
}

/// Asynchronous notifications produced by the target.
#[derive(Clone, Debug, PartialEq)]
pub enum VmEvent {
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    VmDisconnect,
    ClassPrepare {
        request_id: RequestId,
        thread: ThreadId,
        class: ClassInfo,
    },
    ClassUnload {
        request_id: RequestId,
        signature: String,
    },
    ThreadStart {
        request_id: RequestId,
        thread: ThreadId,
    },
    ThreadDeath {
        request_id: RequestId,
        thread: ThreadId,
    },
    Breakpoint {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    SingleStep {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    Exception {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
        exception: ObjectId,
        catch_location: Option<Location>,
    },
}

/// Convert a JVM type signature (`Ljava/lang/String;`, `[I`) into the
/// user-facing type name (`java.lang.String`, `int[]`).
pub fn signature_to_type_name(signature: &str) -> String {
    let mut sig = signature;
    let mut dims = 0usize;
    while let Some(rest) = sig.strip_prefix('[') {
        dims += 1;
        sig = rest;
    }

    let base = if let Some(class) = sig.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        class.replace('/', ".")
    } else {
        match sig.as_bytes().first().copied() {
            Some(b'B') => "byte".to_string(),
            Some(b'C') => "char".to_string(),
            Some(b'D') => "double".to_string(),
            Some(b'F') => "float".to_string(),
            Some(b'I') => "int".to_string(),
            Some(b'J') => "long".to_string(),
            Some(b'S') => "short".to_string(),
            Some(b'Z') => "boolean".to_string(),
            Some(b'V') => "void".to_string(),
            _ => "<unknown>".to_string(),
        }
    };

    let mut out = base;
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}
