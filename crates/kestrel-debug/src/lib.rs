//! Debug-session coordinator for JVM targets.
//!
//! A [`Coordinator`] owns the breakpoint registry, the source index and at
//! most one [`TargetSession`]. Clients talk to it through a
//! [`CoordinatorHandle`] using the [`protocol`] types; the target talks to it
//! through an event pump thread. Both feed the same ordered inbox, so all
//! debugger state is touched from exactly one task.
//!
//! ```no_run
//! # async fn demo(launcher: std::sync::Arc<dyn kestrel_vm::VmLauncher>) -> kestrel_debug::DebugResult<()> {
//! use std::sync::Arc;
//! use kestrel_debug::{protocol::Request, HostOutput};
//!
//! let config = kestrel_config::DebuggerConfig::default();
//! let (handle, mut notifications, _task) =
//!     kestrel_debug::spawn(&config, launcher, Arc::new(HostOutput));
//! handle
//!     .request(Request::SetBreakpoint { file: "src/Foo.scala".into(), line: 10 })
//!     .await?;
//! handle
//!     .request(Request::Launch { command_line: "com.acme.Main".into() })
//!     .await?;
//! while let Some(notification) = notifications.recv().await {
//!     println!("{notification:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod breakpoints;
pub mod coordinator;
pub mod error;
pub mod inspect;
pub mod protocol;
pub mod pump;
pub mod session;
pub mod source_index;

pub use breakpoints::{Breakpoint, BreakpointList, BreakpointRegistry, BreakpointTarget};
pub use coordinator::{spawn, Coordinator, CoordinatorHandle, Message};
pub use error::{DebugError, DebugResult};
pub use inspect::{DebugClassField, DebugValue, ValueInspector};
pub use pump::{CapturedOutput, HostOutput, OutputSink, OutputStream};
pub use session::TargetSession;
pub use source_index::{SourceIndex, SourcePosition};
