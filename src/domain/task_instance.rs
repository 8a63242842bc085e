use crate::domain::flow_instance::{LinkId, TaskId};
use serde::{Deserialize, Serialize};

/// Execution state of a task run-time record
///
/// Transitions are driven by the evaluator; this core only records them
/// and mirrors each one into the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Created but not yet eligible to run
    Waiting,

    /// All inbound links satisfied, eligible to run
    Ready,

    /// An activity is currently executing for this task
    Executing,

    /// Finished successfully
    Done,

    /// Skipped by branch pruning
    Skipped,

    /// Finished with an error
    Failed,
}

impl TaskState {
    /// Whether the task has reached a final state
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Skipped | TaskState::Failed)
    }
}

/// Activation state of a link run-time record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Not yet evaluated
    Pending,

    /// Condition held, the link fired
    Activated,

    /// Condition did not hold or the branch was pruned
    Skipped,
}

/// Run-time record for one task-node occurrence within a flow instance
///
/// Created lazily on first reference by the evaluator and deleted when
/// the node is released, e.g. on loop re-entry.
#[derive(Debug, Clone)]
pub struct TaskInst {
    id: TaskId,
    state: TaskState,
}

impl TaskInst {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Waiting,
        }
    }

    /// The task definition id this record belongs to
    #[inline]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Current execution state
    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    /// Serializable view of this record
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            state: self.state,
        }
    }

    pub(crate) fn from_snapshot(snapshot: TaskSnapshot) -> Self {
        Self {
            id: snapshot.id,
            state: snapshot.state,
        }
    }
}

/// Run-time record for one link-edge occurrence within a flow instance
#[derive(Debug, Clone)]
pub struct LinkInst {
    id: LinkId,
    state: LinkState,
}

impl LinkInst {
    pub(crate) fn new(id: LinkId) -> Self {
        Self {
            id,
            state: LinkState::Pending,
        }
    }

    /// The link definition id this record belongs to
    #[inline]
    pub fn id(&self) -> &LinkId {
        &self.id
    }

    /// Current activation state
    #[inline]
    pub fn state(&self) -> LinkState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LinkState) {
        self.state = state;
    }

    /// Serializable view of this record
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            id: self.id.clone(),
            state: self.state,
        }
    }

    pub(crate) fn from_snapshot(snapshot: LinkSnapshot) -> Self {
        Self {
            id: snapshot.id,
            state: snapshot.state,
        }
    }
}

/// Persisted form of a [`TaskInst`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task definition id
    pub id: TaskId,
    /// Execution state at snapshot time
    pub state: TaskState,
}

/// Persisted form of a [`LinkInst`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    /// Link definition id
    pub id: LinkId,
    /// Activation state at snapshot time
    pub state: LinkState,
}
