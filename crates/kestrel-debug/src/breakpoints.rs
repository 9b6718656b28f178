use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::{error::DebugResult, source_index::SourcePosition};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Breakpoint {
    pub position: SourcePosition,
}

impl Breakpoint {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            position: SourcePosition::new(file, line),
        }
    }
}

/// Snapshot returned by `ListBreakpoints`, both halves in position order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointList {
    pub active: Vec<Breakpoint>,
    pub pending: Vec<Breakpoint>,
}

/// Whatever can turn a source position into a native breakpoint request.
pub trait BreakpointTarget {
    /// Install a native request at `position`. `Ok(false)` means the position
    /// does not (yet) map to any loaded code.
    fn install_breakpoint(&mut self, position: &SourcePosition) -> DebugResult<bool>;
    fn remove_breakpoint(&mut self, position: &SourcePosition) -> DebugResult<()>;
    fn remove_all_breakpoints(&mut self) -> DebugResult<()>;
}

/// User breakpoints, partitioned into active (installed in the target) and
/// pending (waiting for their type to load).
///
/// A breakpoint is never in both sets at once.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    /// Keyed by bare file name, which is how class-prepare events identify
    /// the code that just became available.
    pending: BTreeMap<String, BTreeSet<Breakpoint>>,
    active: BTreeSet<Breakpoint>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the breakpoint is active after the call.
    pub fn set_breakpoint<T: BreakpointTarget + ?Sized>(
        &mut self,
        target: Option<&mut T>,
        file: PathBuf,
        line: u32,
    ) -> DebugResult<bool> {
        let breakpoint = Breakpoint::new(file, line);
        if self.active.contains(&breakpoint) {
            return Ok(true);
        }
        self.remove_pending(&breakpoint);

        if let Some(target) = target {
            match target.install_breakpoint(&breakpoint.position) {
                Ok(true) => {
                    self.active.insert(breakpoint);
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => {
                    self.insert_pending(breakpoint);
                    return Err(err);
                }
            }
        }

        tracing::info!(
            target: "kestrel.debug",
            file = %breakpoint.position.file.display(),
            line,
            "breakpoint pending until its code is loaded"
        );
        self.insert_pending(breakpoint);
        Ok(false)
    }

    /// Clearing an unknown breakpoint is a no-op.
    pub fn clear_breakpoint<T: BreakpointTarget + ?Sized>(
        &mut self,
        target: Option<&mut T>,
        file: PathBuf,
        line: u32,
    ) -> DebugResult<()> {
        let breakpoint = Breakpoint::new(file, line);
        self.remove_pending(&breakpoint);
        if self.active.contains(&breakpoint) {
            // Stays active if the target still holds the native request.
            if let Some(target) = target {
                target.remove_breakpoint(&breakpoint.position)?;
            }
            self.active.remove(&breakpoint);
        }
        Ok(())
    }

    pub fn clear_all<T: BreakpointTarget + ?Sized>(
        &mut self,
        target: Option<&mut T>,
    ) -> DebugResult<()> {
        self.pending.clear();
        if let Some(target) = target {
            target.remove_all_breakpoints()?;
        }
        self.active.clear();
        Ok(())
    }

    /// Re-attempt installation of the pending breakpoints of one source file.
    /// Returns how many became active.
    pub fn retry_pending<T: BreakpointTarget + ?Sized>(
        &mut self,
        target: &mut T,
        source_name: &str,
    ) -> DebugResult<usize> {
        // Installing mutates the pending set, so work from a snapshot.
        let Some(snapshot) = self.pending.get(source_name).cloned() else {
            return Ok(0);
        };

        let mut installed = 0;
        for breakpoint in snapshot {
            if target.install_breakpoint(&breakpoint.position)? {
                self.remove_pending(&breakpoint);
                self.active.insert(breakpoint);
                installed += 1;
            }
        }
        if installed > 0 {
            tracing::info!(
                target: "kestrel.debug",
                source = source_name,
                installed,
                "activated pending breakpoints"
            );
        }
        Ok(installed)
    }

    pub fn retry_all_pending<T: BreakpointTarget + ?Sized>(
        &mut self,
        target: &mut T,
    ) -> DebugResult<usize> {
        let names: Vec<String> = self.pending.keys().cloned().collect();
        let mut installed = 0;
        for name in names {
            installed += self.retry_pending(target, &name)?;
        }
        Ok(installed)
    }

    /// Move every active breakpoint back to pending. Used when the target
    /// goes away; returns how many moved.
    pub fn deactivate_all(&mut self) -> usize {
        let active = std::mem::take(&mut self.active);
        let moved = active.len();
        for breakpoint in active {
            self.insert_pending(breakpoint);
        }
        moved
    }

    pub fn list(&self) -> BreakpointList {
        let pending: BTreeSet<&Breakpoint> = self.pending.values().flatten().collect();
        BreakpointList {
            active: self.active.iter().cloned().collect(),
            pending: pending.into_iter().cloned().collect(),
        }
    }

    pub fn is_active(&self, breakpoint: &Breakpoint) -> bool {
        self.active.contains(breakpoint)
    }

    pub fn is_pending(&self, breakpoint: &Breakpoint) -> bool {
        self.pending
            .get(&breakpoint.position.file_name())
            .is_some_and(|set| set.contains(breakpoint))
    }

    fn insert_pending(&mut self, breakpoint: Breakpoint) {
        self.pending
            .entry(breakpoint.position.file_name())
            .or_default()
            .insert(breakpoint);
    }

    fn remove_pending(&mut self, breakpoint: &Breakpoint) {
        let key = breakpoint.position.file_name();
        if let Some(set) = self.pending.get_mut(&key) {
            set.remove(breakpoint);
            if set.is_empty() {
                self.pending.remove(&key);
            }
        }
    }
}
