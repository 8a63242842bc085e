//! The root of one execution tree
//!
//! A root instance owns the flow instance at ordinal 0 plus every nested
//! sub-flow instance spawned during the run, hands all of them one shared
//! change tracker, and assigns each sub-flow its ordinal and external id.

use crate::domain::change_tracker::{ChangeTracker, TrackingMode};
use crate::domain::flow_definition::FlowDefinition;
use crate::domain::flow_instance::{FlowInstance, FlowSnapshot};
use crate::error::StateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// External identifier of a flow instance within an execution tree
///
/// The root flow is identified by the root id alone; a sub-flow appends
/// its ordinal, e.g. `R1` and `R1-3`. The rendered form is built once at
/// construction, so handing the id to log sites and adapters never
/// reformats it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecId {
    root: String,
    ordinal: u32,
    full: String,
}

impl ExecId {
    /// Id of the root flow instance (ordinal 0)
    pub fn root(root_id: impl Into<String>) -> Self {
        let root = root_id.into();
        let full = root.clone();
        Self {
            root,
            ordinal: 0,
            full,
        }
    }

    /// Id of a sub-flow instance under the same root
    pub fn child(&self, ordinal: u32) -> Self {
        Self {
            root: self.root.clone(),
            ordinal,
            full: format!("{}-{}", self.root, ordinal),
        }
    }

    /// The root id shared by every instance in the tree
    #[inline]
    pub fn root_id(&self) -> &str {
        &self.root
    }

    /// The sub-flow ordinal this id belongs to (0 = root)
    #[inline]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Whether this id names the root flow instance
    #[inline]
    pub fn is_root(&self) -> bool {
        self.ordinal == 0
    }

    /// The rendered id
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Root of one execution tree: the ordinal-0 flow instance plus all of
/// its nested sub-flow instances
///
/// The root assigns sub-flow ordinals, shares one [`ChangeTracker`]
/// across the tree, and is the unit of persistence. The tracking mode is
/// fixed when the root is created and never changes afterwards.
pub struct RootInstance {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    tracker: Arc<ChangeTracker>,
    instances: HashMap<u32, FlowInstance>,
    next_ordinal: u32,
}

impl RootInstance {
    /// Start a fresh execution tree with the given root id
    pub fn new(id: impl Into<String>, def: Arc<FlowDefinition>, mode: TrackingMode) -> Self {
        let id = id.into();
        let tracker = Arc::new(ChangeTracker::new(mode));
        let exec_id = ExecId::root(id.clone());
        debug!(instance = %exec_id, flow = def.name(), "starting execution tree");

        let root_flow = FlowInstance::new(0, exec_id, def, Arc::clone(&tracker));
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            tracker,
            instances: HashMap::from([(0, root_flow)]),
            next_ordinal: 1,
        }
    }

    /// Start a fresh execution tree under a generated id
    pub fn with_generated_id(def: Arc<FlowDefinition>, mode: TrackingMode) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), def, mode)
    }

    /// The root id of this execution tree
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When this tree was started
    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When this tree last gained or released a flow instance
    #[inline]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The change tracker shared by every instance in this tree
    #[inline]
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// The construction-fixed tracking mode
    #[inline]
    pub fn tracking_mode(&self) -> TrackingMode {
        self.tracker.mode()
    }

    /// The root flow instance (ordinal 0)
    pub fn root(&self) -> &FlowInstance {
        // Installed in new()/from_snapshot() and never releasable
        self.instances
            .get(&0)
            .expect("root flow instance is always registered")
    }

    /// Mutable access to the root flow instance
    pub fn root_mut(&mut self) -> &mut FlowInstance {
        self.instances
            .get_mut(&0)
            .expect("root flow instance is always registered")
    }

    /// Look up a flow instance by ordinal
    pub fn instance(&self, ordinal: u32) -> Option<&FlowInstance> {
        self.instances.get(&ordinal)
    }

    /// Mutable lookup of a flow instance by ordinal
    pub fn instance_mut(&mut self, ordinal: u32) -> Option<&mut FlowInstance> {
        self.instances.get_mut(&ordinal)
    }

    /// Ordinals of the live flow instances, root included
    pub fn ordinals(&self) -> Vec<u32> {
        let mut ordinals: Vec<u32> = self.instances.keys().copied().collect();
        ordinals.sort_unstable();
        ordinals
    }

    /// Register a nested sub-flow instance and return its ordinal
    ///
    /// Ordinals are assigned from a monotonic counter and never reused
    /// within a tree, so a released sub-flow's entries in the change log
    /// can never be confused with a later one's.
    pub fn new_embedded_instance(&mut self, def: Arc<FlowDefinition>) -> u32 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let exec_id = ExecId::root(self.id.clone()).child(ordinal);
        debug!(instance = %exec_id, flow = def.name(), "starting sub-flow");
        let instance = FlowInstance::new(ordinal, exec_id, def, Arc::clone(&self.tracker));
        self.instances.insert(ordinal, instance);
        self.updated_at = Utc::now();
        ordinal
    }

    /// Drop a finished sub-flow instance
    ///
    /// The root instance (ordinal 0) cannot be released; it lives as
    /// long as the tree. Returns whether an instance was removed.
    pub fn release_instance(&mut self, ordinal: u32) -> bool {
        if ordinal == 0 {
            warn!(root = %self.id, "refusing to release the root flow instance");
            return false;
        }
        let removed = self.instances.remove(&ordinal).is_some();
        if removed {
            debug!(root = %self.id, ordinal, "released sub-flow instance");
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Serializable view of the whole execution tree
    pub fn snapshot(&self) -> RootSnapshot {
        let mut instances: Vec<FlowSnapshot> =
            self.instances.values().map(FlowInstance::snapshot).collect();
        instances.sort_by_key(|s| s.ordinal);

        RootSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            next_ordinal: self.next_ordinal,
            instances,
        }
    }

    /// Rebuild an execution tree from a persisted snapshot
    ///
    /// `resolve_definition` maps a flow URI back to its compiled
    /// definition. Rehydration installs state directly and never emits
    /// change entries, whatever the mode.
    ///
    /// The mode stays fixed for the rebuilt tree, so choose it for what
    /// happens after rehydration: [`TrackingMode::Track`] when the tree
    /// resumes forward execution and its mutations must keep being
    /// logged, [`TrackingMode::ReplayNoTrack`] only for read-only
    /// inspection or replay of already-persisted state.
    pub fn from_snapshot<F>(
        snapshot: RootSnapshot,
        resolve_definition: F,
        mode: TrackingMode,
    ) -> Result<Self, StateError>
    where
        F: Fn(&str) -> Option<Arc<FlowDefinition>>,
    {
        if !snapshot.instances.iter().any(|s| s.ordinal == 0) {
            return Err(StateError::HydrationError(format!(
                "snapshot {} has no root flow instance",
                snapshot.id
            )));
        }

        let tracker = Arc::new(ChangeTracker::new(mode));
        let root_exec_id = ExecId::root(snapshot.id.clone());
        let mut instances = HashMap::with_capacity(snapshot.instances.len());

        for flow in snapshot.instances {
            let def = resolve_definition(&flow.flow_uri)
                .ok_or_else(|| StateError::DefinitionNotFound(flow.flow_uri.clone()))?;
            let exec_id = if flow.ordinal == 0 {
                root_exec_id.clone()
            } else {
                root_exec_id.child(flow.ordinal)
            };
            let ordinal = flow.ordinal;
            instances.insert(
                ordinal,
                FlowInstance::from_snapshot(flow, exec_id, def, Arc::clone(&tracker)),
            );
        }

        debug!(root = %root_exec_id, count = instances.len(), "rehydrated execution tree");
        Ok(Self {
            id: snapshot.id,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            tracker,
            instances,
            next_ordinal: snapshot.next_ordinal,
        })
    }
}

/// Persisted form of a [`RootInstance`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSnapshot {
    /// Root id of the execution tree
    pub id: String,
    /// When the tree was started
    pub created_at: DateTime<Utc>,
    /// When the tree last gained or released a flow instance
    pub updated_at: DateTime<Utc>,
    /// Next sub-flow ordinal to assign
    pub next_ordinal: u32,
    /// Per-instance snapshots, ordered by ordinal
    pub instances: Vec<FlowSnapshot>,
}
