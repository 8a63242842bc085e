//! Run-time state core for a flow execution engine
//!
//! This crate models what a flow run *is*, not how it is scheduled: an
//! execution tree of flow instances (a root plus nested sub-flows), the
//! task and link records each instance accumulates while an external
//! evaluator drives it, the attribute scopes those records read and
//! write, and an ordered change log that lets a persistence collaborator
//! checkpoint a tree incrementally.
//!
//! The expression evaluator, scheduler and activity implementations are
//! hosts of this crate. They reach the state through [`FlowInstance`]
//! and the [`ActivityHost`] surface, persist it through
//! [`InstanceRepository`], and bring it back up with
//! [`RootInstance::from_snapshot`].
//!
//! # Example
//!
//! ```
//! use flowstate_core::{
//!     FlowDefinition, FlowId, FlowStatus, IoMetadata, RootInstance, TrackingMode,
//! };
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let def = Arc::new(FlowDefinition {
//!     id: FlowId("hello".to_string()),
//!     uri: "res://flow:hello".to_string(),
//!     name: "Hello".to_string(),
//!     version: "1.0".to_string(),
//!     description: None,
//!     tasks: vec![],
//!     links: vec![],
//!     metadata: IoMetadata::default(),
//!     attrs: HashMap::new(),
//! });
//!
//! let mut root = RootInstance::new("R1", def, TrackingMode::Track);
//! root.root_mut().set_status(FlowStatus::Active);
//! assert_eq!(root.root().id().as_str(), "R1");
//!
//! // Everything that just happened is pending in the change log
//! let changes = root.tracker().drain();
//! assert_eq!(changes[&0].len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod domain;
pub mod error;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

pub use domain::change_tracker::{ChangeEntry, ChangeOp, ChangeSet, ChangeTracker, TrackingMode};
pub use domain::flow_definition::{FlowDefinition, IoMetadata, LinkDefinition, TaskDefinition};
pub use domain::flow_instance::{
    FlowId, FlowInstance, FlowSnapshot, FlowStatus, LinkId, TaskId,
};
pub use domain::repository::InstanceRepository;
pub use domain::root_instance::{ExecId, RootInstance, RootSnapshot};
pub use domain::scope::{AttributeScope, CompositeResolver, Resolver, ScopeResolver};
pub use domain::task_instance::{
    LinkInst, LinkSnapshot, LinkState, TaskInst, TaskSnapshot, TaskState,
};
pub use error::StateError;
pub use types::AttrValue;

#[cfg(feature = "testing")]
pub use domain::repository::memory::MemoryInstanceRepository;

/// A named attribute mapping, as passed across the host surface
pub type Attrs = HashMap<String, AttrValue>;

/// Receiver for mid-flow results delivered via [`ActivityHost::reply`]
///
/// Typically the trigger that started the flow, waiting to answer its
/// caller before the flow finishes.
pub trait ResultHandler: Send + Sync {
    /// Accept a result mapping and an optional error
    fn handle_result(&self, results: Attrs, err: Option<StateError>);
}

/// The surface a running activity sees of its owning flow instance
///
/// Activities never hold a flow instance directly; the engine hands them
/// this narrowed view instead.
pub trait ActivityHost {
    /// Declared input/output attribute names of the flow
    fn io_metadata(&self) -> &IoMetadata;

    /// The working attribute scope of the flow instance
    fn working_data(&mut self) -> &mut dyn AttributeScope;

    /// Resolver for `$scope.name` expressions
    fn resolver(&self) -> Arc<CompositeResolver>;

    /// Deliver a mid-flow result without completing the flow
    ///
    /// A no-op when no [`ResultHandler`] is attached.
    fn reply(&self, results: Attrs, err: Option<StateError>);

    /// Short-circuit the flow with an explicit final result
    ///
    /// Terminal for the instance; if called more than once the last
    /// call's data and error stand.
    fn force_return(&mut self, data: Option<Attrs>, err: Option<StateError>);
}
