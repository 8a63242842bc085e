//! Incremental change tracking for an execution tree
//!
//! One tracker is shared by the root flow instance and every nested
//! sub-flow instance under a single root. Each tracked mutation is
//! appended to the sequence of its owning sub-flow ordinal, so a
//! persistence collaborator can checkpoint an execution without
//! re-serializing the whole tree.

use crate::domain::flow_instance::{FlowStatus, LinkId, TaskId};
use crate::domain::task_instance::{LinkSnapshot, TaskSnapshot};
use crate::types::AttrValue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of structural or attribute mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    /// A record or attribute was created
    Add,
    /// A record or attribute was updated
    Update,
    /// A record or attribute was removed
    Delete,
}

/// One tracked mutation, tagged with the owning sub-flow's ordinal by
/// its position in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeEntry {
    /// A task run-time record changed
    Task {
        /// Mutation kind
        op: ChangeOp,
        /// Task definition id
        id: TaskId,
        /// Record state after the mutation; absent for deletes
        snapshot: Option<TaskSnapshot>,
    },

    /// A link run-time record changed
    Link {
        /// Mutation kind
        op: ChangeOp,
        /// Link definition id
        id: LinkId,
        /// Record state after the mutation; absent for deletes
        snapshot: Option<LinkSnapshot>,
    },

    /// An instance attribute changed
    Attribute {
        /// Mutation kind
        op: ChangeOp,
        /// Attribute name
        name: String,
        /// Value after the mutation; absent for deletes
        value: Option<AttrValue>,
    },

    /// The instance status was overwritten
    Status {
        /// The new status
        status: FlowStatus,
    },
}

/// Drained view of the log: per-ordinal ordered entry sequences
pub type ChangeSet = HashMap<u32, Vec<ChangeEntry>>;

/// Change-tracking behavior of a root instance, fixed at construction
///
/// The mode never changes over the lifetime of a tracker, so concurrent
/// sub-flow workers cannot race on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Normal forward execution: every tracked mutation is logged
    Track,
    /// State rehydration/replay: mutations are applied but not re-logged
    ReplayNoTrack,
    /// Tracking off entirely
    Disabled,
}

/// Append-only, per-sub-flow ordered log of mutations
///
/// Appends are internally synchronized: parallel branches may drive
/// their own sub-flow instances from different workers while sharing
/// this one tracker. Entries for a given ordinal are observed in exactly
/// the order they were appended.
#[derive(Debug)]
pub struct ChangeTracker {
    mode: TrackingMode,
    log: DashMap<u32, Vec<ChangeEntry>>,
}

impl ChangeTracker {
    /// Create a tracker with the given mode
    pub fn new(mode: TrackingMode) -> Self {
        Self {
            mode,
            log: DashMap::new(),
        }
    }

    /// The construction-fixed tracking mode
    #[inline]
    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Whether appends are currently recorded
    #[inline]
    pub fn is_tracking(&self) -> bool {
        self.mode == TrackingMode::Track
    }

    fn append(&self, ordinal: u32, entry: ChangeEntry) {
        if self.mode != TrackingMode::Track {
            return;
        }
        self.log.entry(ordinal).or_default().push(entry);
    }

    /// Record a task-record mutation for the given sub-flow
    pub fn track_task_change(
        &self,
        ordinal: u32,
        op: ChangeOp,
        id: TaskId,
        snapshot: Option<TaskSnapshot>,
    ) {
        self.append(ordinal, ChangeEntry::Task { op, id, snapshot });
    }

    /// Record a link-record mutation for the given sub-flow
    pub fn track_link_change(
        &self,
        ordinal: u32,
        op: ChangeOp,
        id: LinkId,
        snapshot: Option<LinkSnapshot>,
    ) {
        self.append(ordinal, ChangeEntry::Link { op, id, snapshot });
    }

    /// Record an attribute mutation for the given sub-flow
    pub fn track_attribute_change(
        &self,
        ordinal: u32,
        op: ChangeOp,
        name: &str,
        value: Option<AttrValue>,
    ) {
        self.append(
            ordinal,
            ChangeEntry::Attribute {
                op,
                name: name.to_string(),
                value,
            },
        );
    }

    /// Record a status overwrite for the given sub-flow
    pub fn track_status_change(&self, ordinal: u32, status: FlowStatus) {
        self.append(ordinal, ChangeEntry::Status { status });
    }

    /// Non-destructive read of the full log
    ///
    /// Lets a persistence collaborator retry a failed durable write
    /// against the same entries before clearing.
    pub fn peek(&self) -> ChangeSet {
        let mut out = ChangeSet::new();
        for entry in self.log.iter() {
            if !entry.value().is_empty() {
                out.insert(*entry.key(), entry.value().clone());
            }
        }
        out
    }

    /// Read the full log and clear it in one step
    pub fn drain(&self) -> ChangeSet {
        let mut out = ChangeSet::new();
        for mut entry in self.log.iter_mut() {
            if !entry.value().is_empty() {
                out.insert(*entry.key(), std::mem::take(entry.value_mut()));
            }
        }
        out
    }

    /// Discard all pending entries
    pub fn clear(&self) {
        self.log.clear();
    }

    /// Whether any entries are pending
    pub fn is_empty(&self) -> bool {
        self.log.iter().all(|entry| entry.value().is_empty())
    }

    /// Pending entries for one sub-flow ordinal, in append order
    pub fn entries_for(&self, ordinal: u32) -> Vec<ChangeEntry> {
        self.log
            .get(&ordinal)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}
