//! The ordered system pipeline.
//!
//! Systems are boxed callbacks invoked once per step in registration order.
//! Registration assigns each system an id from an always-incrementing
//! counter; removal is by id. Changes made while the pipeline is mid-run
//! (a system adding or removing systems) take effect from the next step.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::world::World;

// ---------------------------------------------------------------------------
// SystemId
// ---------------------------------------------------------------------------

/// Stable identifier assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemId(pub u32);

/// A step callback. Receives the world and the current step's data.
pub type SystemFn = Box<dyn FnMut(&mut World, &Value)>;

pub(crate) struct SystemEntry {
    pub(crate) id: SystemId,
    run: SystemFn,
}

impl SystemEntry {
    pub(crate) fn invoke(&mut self, world: &mut World, data: &Value) {
        (self.run)(world, data);
    }
}

// ---------------------------------------------------------------------------
// SystemPipeline
// ---------------------------------------------------------------------------

/// Registration-ordered list of systems with stable ids.
#[derive(Default)]
pub struct SystemPipeline {
    entries: Vec<SystemEntry>,
    pending_adds: Vec<SystemEntry>,
    pending_removals: Vec<SystemId>,
    next_id: u32,
    running: bool,
    latest: Option<SystemId>,
}

impl SystemPipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system at the end of the pipeline.
    pub fn add<F>(&mut self, system: F) -> SystemId
    where
        F: FnMut(&mut World, &Value) + 'static,
    {
        let id = SystemId(self.next_id);
        self.next_id += 1;
        let entry = SystemEntry {
            id,
            run: Box::new(system),
        };
        if self.running {
            self.pending_adds.push(entry);
        } else {
            self.entries.push(entry);
        }
        id
    }

    /// Remove a system by id. Returns whether it was (or will be) removed.
    pub fn remove(&mut self, id: SystemId) -> bool {
        if self.running {
            let known = self.pending_adds.iter().any(|e| e.id == id) || id.0 < self.next_id;
            if known {
                self.pending_removals.push(id);
            }
            return known;
        }
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Number of registered systems (excluding mid-step pending changes).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no systems are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the system currently executing, if any.
    pub fn latest(&self) -> Option<SystemId> {
        self.latest
    }

    /// Whether the pipeline is mid-run.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_latest(&mut self, id: Option<SystemId>) {
        self.latest = id;
    }

    /// Take the entries for execution. The pipeline records that it is
    /// mid-run so registrations and removals defer to the next step.
    pub(crate) fn begin_run(&mut self) -> Vec<SystemEntry> {
        self.running = true;
        std::mem::take(&mut self.entries)
    }

    /// Restore the entries after execution and fold in deferred changes.
    pub(crate) fn finish_run(&mut self, mut entries: Vec<SystemEntry>) {
        entries.append(&mut self.pending_adds);
        if !self.pending_removals.is_empty() {
            let removals = std::mem::take(&mut self.pending_removals);
            entries.retain(|e| !removals.contains(&e.id));
        }
        self.entries = entries;
        self.running = false;
        self.latest = None;
    }

    /// Drop every system.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending_adds.clear();
        self.pending_removals.clear();
        self.latest = None;
    }
}

impl fmt::Debug for SystemPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemPipeline")
            .field("systems", &self.entries.len())
            .field("latest", &self.latest)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
