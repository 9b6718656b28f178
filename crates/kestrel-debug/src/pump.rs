//! Background workers owned by one target session: the event pump that feeds
//! target events into the coordinator inbox, and the relays that copy the
//! target's stdout/stderr to the host.

use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use kestrel_vm::{EventQueue, VmError, VmEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::coordinator::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        })
    }
}

/// Destination for bytes the target writes to its standard streams.
pub trait OutputSink: Send + Sync {
    fn write(&self, stream: OutputStream, bytes: &[u8]);
}

/// Copies target output onto the host process's own stdout/stderr.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostOutput;

impl OutputSink for HostOutput {
    fn write(&self, stream: OutputStream, bytes: &[u8]) {
        let result = match stream {
            OutputStream::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(bytes).and_then(|()| out.flush())
            }
            OutputStream::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(bytes).and_then(|()| err.flush())
            }
        };
        if let Err(err) = result {
            tracing::debug!(target: "kestrel.debug", %stream, error = %err, "failed to relay target output");
        }
    }
}

/// Keeps target output in memory.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.lock().clone()
    }

    pub fn stderr(&self) -> Vec<u8> {
        self.stderr.lock().clone()
    }
}

impl OutputSink for CapturedOutput {
    fn write(&self, stream: OutputStream, bytes: &[u8]) {
        match stream {
            OutputStream::Stdout => self.stdout.lock().extend_from_slice(bytes),
            OutputStream::Stderr => self.stderr.lock().extend_from_slice(bytes),
        }
    }
}

/// Consecutive failed queue reads after which the target is given up.
const MAX_QUEUE_FAILURES: u32 = 8;

/// Forward every event of one target generation into the coordinator inbox.
///
/// Stops after forwarding `VmDisconnect`. A queue that is closed, fails with
/// an I/O error or keeps failing gets a synthetic `VmDisconnect` first, so
/// the coordinator always observes the end of the session.
pub fn spawn_event_pump(
    mut queue: Box<dyn EventQueue>,
    inbox: mpsc::Sender<Message>,
    generation: u64,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("kestrel-event-pump-{generation}"))
        .spawn(move || {
            let mut failures = 0u32;
            loop {
                let events = match queue.remove() {
                    Ok(events) => {
                        failures = 0;
                        events
                    }
                    Err(err) => {
                        failures += 1;
                        let terminal = matches!(err, VmError::Disconnected | VmError::Io(_))
                            || failures >= MAX_QUEUE_FAILURES;
                        if terminal {
                            tracing::debug!(target: "kestrel.debug", generation, failures, error = %err, "event queue closed");
                            let _ = inbox.blocking_send(Message::Target {
                                generation,
                                event: VmEvent::VmDisconnect,
                            });
                            return;
                        }
                        tracing::warn!(target: "kestrel.debug", generation, failures, error = %err, "event queue read failed");
                        thread::sleep(Duration::from_millis(5 << failures));
                        continue;
                    }
                };

                for event in events {
                    let last = matches!(event, VmEvent::VmDisconnect);
                    if inbox
                        .blocking_send(Message::Target { generation, event })
                        .is_err()
                    {
                        tracing::debug!(target: "kestrel.debug", generation, "coordinator gone; stopping event pump");
                        return;
                    }
                    if last {
                        return;
                    }
                }
            }
        })
}

/// Copy one target output stream into `sink` until end of stream.
pub fn spawn_output_relay(
    stream: OutputStream,
    mut reader: Box<dyn Read + Send>,
    sink: Arc<dyn OutputSink>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("kestrel-{stream}-relay"))
        .spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => sink.write(stream, &buf[..n]),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::debug!(target: "kestrel.debug", %stream, error = %err, "output relay stopped");
                        break;
                    }
                }
            }
        })
}
