//! Logical request/response/notification model exchanged with a client.
//!
//! Framing and transport are up to the embedder; every type here is serde
//! serializable so a JSON or s-expression codec can sit on top.

use std::path::PathBuf;

use kestrel_vm::{ObjectId, ThreadId};
use serde::{Deserialize, Serialize};

use crate::{breakpoints::BreakpointList, inspect::DebugValue, source_index::SourcePosition};

/// Client-chosen id echoed on the matching response.
pub type CorrelationId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    /// Main class followed by program arguments.
    Launch { command_line: String },
    IsActive,
    Stop,
    Run,
    Continue { thread_id: ThreadId },
    Next { thread_id: ThreadId },
    StepInto { thread_id: ThreadId },
    StepOut { thread_id: ThreadId },
    ValueForName { thread_id: ThreadId, name: String },
    SetBreakpoint { file: PathBuf, line: u32 },
    ClearBreakpoint { file: PathBuf, line: u32 },
    ClearAllBreakpoints,
    ListBreakpoints,
    /// `count < 0` requests every frame from `index` on.
    Backtrace {
        thread_id: ThreadId,
        index: usize,
        count: i32,
    },
    Value { location: DebugLocation },
    SetSources { files: Vec<PathBuf> },
    Shutdown,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Launch { .. } => "launch",
            Request::IsActive => "isActive",
            Request::Stop => "stop",
            Request::Run => "run",
            Request::Continue { .. } => "continue",
            Request::Next { .. } => "next",
            Request::StepInto { .. } => "stepInto",
            Request::StepOut { .. } => "stepOut",
            Request::ValueForName { .. } => "valueForName",
            Request::SetBreakpoint { .. } => "setBreakpoint",
            Request::ClearBreakpoint { .. } => "clearBreakpoint",
            Request::ClearAllBreakpoints => "clearAllBreakpoints",
            Request::ListBreakpoints => "listBreakpoints",
            Request::Backtrace { .. } => "backtrace",
            Request::Value { .. } => "value",
            Request::SetSources { .. } => "setSources",
            Request::Shutdown => "shutdown",
        }
    }
}

/// Address of a value to fetch on demand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DebugLocation {
    ObjectReference { object_id: ObjectId },
    ObjectField { object_id: ObjectId, field: String },
    ArrayElement { object_id: ObjectId, index: usize },
    StackSlot {
        thread_id: ThreadId,
        frame: usize,
        offset: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ResponseBody {
    Bool(bool),
    Value(Option<DebugValue>),
    Breakpoints(BreakpointList),
    Backtrace(Option<DebugBacktrace>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    TargetDisconnected = 1,
    Internal = 2,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: CorrelationId,
    pub result: Result<ResponseBody, ErrorResponse>,
}

impl Response {
    pub fn ok(id: CorrelationId, body: ResponseBody) -> Self {
        Self { id, result: Ok(body) }
    }

    pub fn error(id: CorrelationId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Err(ErrorResponse {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.result {
            Ok(ResponseBody::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.result.as_ref().err().map(|err| err.code)
    }
}

/// Unsolicited events pushed to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
    Started,
    Died,
    Disconnected,
    Stepped {
        thread_id: ThreadId,
        position: SourcePosition,
    },
    BreakpointHit {
        thread_id: ThreadId,
        position: SourcePosition,
    },
    ExceptionThrown {
        description: String,
        thread_id: ThreadId,
        exception_id: ObjectId,
        position: Option<SourcePosition>,
    },
    ThreadStarted {
        thread_id: ThreadId,
    },
    ThreadDied {
        thread_id: ThreadId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugBacktrace {
    pub frames: Vec<DebugStackFrame>,
    pub thread_id: ThreadId,
    pub thread_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStackFrame {
    pub index: usize,
    pub locals: Vec<DebugStackLocal>,
    pub num_args: usize,
    pub class_name: String,
    pub method_name: String,
    pub position: Option<SourcePosition>,
    pub this_object_id: Option<ObjectId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStackLocal {
    pub index: usize,
    pub name: String,
    pub summary: String,
    pub type_name: String,
}
