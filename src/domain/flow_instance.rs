use crate::domain::change_tracker::{ChangeEntry, ChangeOp, ChangeTracker};
use crate::domain::flow_definition::{FlowDefinition, IoMetadata};
use crate::domain::root_instance::ExecId;
use crate::domain::scope::{shared_resolver, AttributeScope, CompositeResolver};
use crate::domain::table::SlotTable;
use crate::domain::task_instance::{
    LinkInst, LinkSnapshot, LinkState, TaskInst, TaskSnapshot, TaskState,
};
use crate::error::StateError;
use crate::types::AttrValue;
use crate::{ActivityHost, Attrs, ResultHandler};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Overall status of one flow instance
///
/// Transition legality is the evaluator's concern; this core records
/// whatever status it is handed and mirrors the write into the change
/// log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    /// Instance exists but execution has not begun
    Created,

    /// Execution in progress
    Active,

    /// Finished successfully
    Completed,

    /// Cancelled before completion
    Cancelled,

    /// Finished with a terminal error
    Failed,
}

/// Value object: Flow definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// Value object: Task definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

/// Value object: Link definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub String);

/// Run-time state for one execution of a task/link graph
///
/// The root flow of an execution tree is the instance at ordinal 0; each
/// nested sub-flow gets its own instance under the same root. All
/// instances of a tree share one [`ChangeTracker`]. Exactly one worker
/// drives a given instance at a time (enforced by the external
/// scheduler), so no locking happens here.
pub struct FlowInstance {
    ordinal: u32,
    exec_id: ExecId,
    status: FlowStatus,
    def: Arc<FlowDefinition>,
    tracker: Arc<ChangeTracker>,

    tasks: SlotTable<TaskId, TaskInst>,
    links: SlotTable<LinkId, LinkInst>,

    // Lazily allocated: most sub-flows never write an attribute
    attrs: Option<HashMap<String, AttrValue>>,

    handling_error: bool,
    force_completion: bool,
    return_data: Option<Attrs>,
    return_error: Option<StateError>,

    result_handler: Option<Arc<dyn ResultHandler>>,
}

impl FlowInstance {
    pub(crate) fn new(
        ordinal: u32,
        exec_id: ExecId,
        def: Arc<FlowDefinition>,
        tracker: Arc<ChangeTracker>,
    ) -> Self {
        Self {
            ordinal,
            exec_id,
            status: FlowStatus::Created,
            def,
            tracker,
            tasks: SlotTable::new(),
            links: SlotTable::new(),
            attrs: None,
            handling_error: false,
            force_completion: false,
            return_data: None,
            return_error: None,
            result_handler: None,
        }
    }

    /// External identifier of this instance: the root id alone for
    /// ordinal 0, `rootId-ordinal` for sub-flows
    #[inline]
    pub fn id(&self) -> &ExecId {
        &self.exec_id
    }

    /// Sub-flow ordinal within the execution tree (0 = root)
    #[inline]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Name of the flow definition backing this instance
    #[inline]
    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Resource URI of the flow definition
    #[inline]
    pub fn flow_uri(&self) -> &str {
        self.def.uri()
    }

    /// The flow definition backing this instance
    #[inline]
    pub fn definition(&self) -> &Arc<FlowDefinition> {
        &self.def
    }

    /// Current overall status
    #[inline]
    pub fn status(&self) -> FlowStatus {
        self.status
    }

    /// Overwrite the status and mirror the write into the change log
    pub fn set_status(&mut self, status: FlowStatus) {
        debug!(instance = %self.exec_id, ?status, "status change");
        self.status = status;
        self.tracker.track_status_change(self.ordinal, status);
    }

    /// Attach the result handler that [`ActivityHost::reply`] delivers to
    pub fn set_result_handler(&mut self, handler: Arc<dyn ResultHandler>) {
        self.result_handler = Some(handler);
    }

    /// Find the task record for `id`, creating it in state Waiting on
    /// first reference
    ///
    /// Idempotent: repeated calls with the same id never create twice.
    /// Exactly one Add entry is recorded per created record.
    pub fn find_or_create_task(&mut self, id: &TaskId) -> (&TaskInst, bool) {
        let ordinal = self.ordinal;
        let tracker = Arc::clone(&self.tracker);
        let (inst, created) = self
            .tasks
            .get_or_insert_with(id.clone(), || TaskInst::new(id.clone()));

        if created {
            debug!(task = %id.0, "created task instance");
            tracker.track_task_change(ordinal, ChangeOp::Add, id.clone(), Some(inst.snapshot()));
        }

        (&*inst, created)
    }

    /// Find the link record for `id`, creating it in state Pending on
    /// first reference
    pub fn find_or_create_link(&mut self, id: &LinkId) -> (&LinkInst, bool) {
        let ordinal = self.ordinal;
        let tracker = Arc::clone(&self.tracker);
        let (inst, created) = self
            .links
            .get_or_insert_with(id.clone(), || LinkInst::new(id.clone()));

        if created {
            debug!(link = %id.0, "created link instance");
            tracker.track_link_change(ordinal, ChangeOp::Add, id.clone(), Some(inst.snapshot()));
        }

        (&*inst, created)
    }

    /// Release a task record together with every link record whose
    /// definition source is that task
    ///
    /// Emits a Delete entry for the task, then one per removed link, in
    /// definition order. No-op when the task id has no record.
    pub fn release_task(&mut self, id: &TaskId) {
        if self.tasks.remove(id).is_none() {
            return;
        }
        debug!(task = %id.0, "released task instance");
        self.tracker
            .track_task_change(self.ordinal, ChangeOp::Delete, id.clone(), None);

        let def = Arc::clone(&self.def);
        for link in def.links_from(id) {
            if self.links.remove(&link.id).is_some() {
                self.tracker
                    .track_link_change(self.ordinal, ChangeOp::Delete, link.id.clone(), None);
            }
        }
    }

    /// Apply an evaluator-driven task state transition
    ///
    /// Returns false (and records nothing) when the task has no record.
    pub fn set_task_state(&mut self, id: &TaskId, state: TaskState) -> bool {
        let snapshot = match self.tasks.get_mut(id) {
            Some(task) => {
                task.set_state(state);
                task.snapshot()
            }
            None => return false,
        };
        self.tracker
            .track_task_change(self.ordinal, ChangeOp::Update, id.clone(), Some(snapshot));
        true
    }

    /// Apply an evaluator-driven link state transition
    pub fn set_link_state(&mut self, id: &LinkId, state: LinkState) -> bool {
        let snapshot = match self.links.get_mut(id) {
            Some(link) => {
                link.set_state(state);
                link.snapshot()
            }
            None => return false,
        };
        self.tracker
            .track_link_change(self.ordinal, ChangeOp::Update, id.clone(), Some(snapshot));
        true
    }

    /// Look up a task record
    pub fn task_instance(&self, id: &TaskId) -> Option<&TaskInst> {
        self.tasks.get(id)
    }

    /// Look up a link record
    pub fn link_instance(&self, id: &LinkId) -> Option<&LinkInst> {
        self.links.get(id)
    }

    /// Snapshot list of the live task records
    pub fn task_instances(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(TaskInst::snapshot).collect()
    }

    /// Snapshot list of the live link records
    pub fn link_instances(&self) -> Vec<LinkSnapshot> {
        self.links.iter().map(LinkInst::snapshot).collect()
    }

    /// Merge a bulk attribute mapping into the instance table
    ///
    /// Used for bulk input binding at flow start; this path is not
    /// mirrored into the change log. An empty mapping is a no-op.
    pub fn update_attrs(&mut self, attrs: Attrs) {
        if attrs.is_empty() {
            return;
        }
        debug!(instance = %self.exec_id, count = attrs.len(), "bulk attribute update");
        let table = self.attrs.get_or_insert_with(HashMap::new);
        for (name, value) in attrs {
            table.insert(name, value);
        }
    }

    /// Whether an explicit return has short-circuited this instance
    ///
    /// Terminal once set: an evaluation loop must stop issuing further
    /// work for this instance after observing it.
    #[inline]
    pub fn is_force_completed(&self) -> bool {
        self.force_completion
    }

    /// Whether this instance is currently executing its error branch
    #[inline]
    pub fn is_handling_error(&self) -> bool {
        self.handling_error
    }

    /// Mark this instance as executing (or done executing) its error
    /// branch
    pub fn set_handling_error(&mut self, handling: bool) {
        self.handling_error = handling;
    }

    /// Final outcome of this instance
    ///
    /// If `force_return` was called, exactly the stored data and error.
    /// Otherwise the mapping derived from the definition's declared
    /// output names, taking each from the attribute table when present;
    /// absent output names are omitted, never an error.
    pub fn return_data(&self) -> (Option<Attrs>, Option<StateError>) {
        if self.force_completion || self.return_data.is_some() {
            return (self.return_data.clone(), self.return_error.clone());
        }

        let output = &self.def.metadata().output;
        if output.is_empty() {
            return (None, self.return_error.clone());
        }

        let mut derived = Attrs::new();
        if let Some(attrs) = &self.attrs {
            for name in output {
                if let Some(value) = attrs.get(name) {
                    derived.insert(name.clone(), value.clone());
                }
            }
        }
        (Some(derived), self.return_error.clone())
    }

    /// Serializable view of this instance
    ///
    /// Task and link records are listed in id order, independent of how
    /// slots were reused by release/recreate cycles.
    pub fn snapshot(&self) -> FlowSnapshot {
        let mut tasks = self.task_instances();
        tasks.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        let mut links = self.link_instances();
        links.sort_by(|a, b| a.id.0.cmp(&b.id.0));

        FlowSnapshot {
            ordinal: self.ordinal,
            flow_uri: self.def.uri().to_string(),
            status: self.status,
            tasks,
            links,
            attrs: self.attrs.clone().unwrap_or_default(),
            force_completion: self.force_completion,
            return_data: self.return_data.clone(),
            return_error: self.return_error.clone(),
        }
    }

    /// Rebuild an instance from a persisted snapshot
    ///
    /// Table and attribute contents are installed directly; nothing is
    /// emitted into the change log.
    pub(crate) fn from_snapshot(
        snapshot: FlowSnapshot,
        exec_id: ExecId,
        def: Arc<FlowDefinition>,
        tracker: Arc<ChangeTracker>,
    ) -> Self {
        let mut instance = Self::new(snapshot.ordinal, exec_id, def, tracker);
        instance.status = snapshot.status;
        instance.force_completion = snapshot.force_completion;
        instance.return_data = snapshot.return_data;
        instance.return_error = snapshot.return_error;

        for task in snapshot.tasks {
            let id = task.id.clone();
            instance
                .tasks
                .get_or_insert_with(id, || TaskInst::from_snapshot(task));
        }
        for link in snapshot.links {
            let id = link.id.clone();
            instance
                .links
                .get_or_insert_with(id, || LinkInst::from_snapshot(link));
        }
        if !snapshot.attrs.is_empty() {
            instance.attrs = Some(snapshot.attrs);
        }
        instance
    }
}

impl AttributeScope for FlowInstance {
    fn get_value(&self, name: &str) -> Option<AttrValue> {
        if let Some(attrs) = &self.attrs {
            if let Some(value) = attrs.get(name) {
                return Some(value.clone());
            }
        }
        self.def.get_attr(name).cloned()
    }

    // Writes the backing table directly; the historical re-entrant
    // setter caused unbounded recursion.
    fn set_value(&mut self, name: &str, value: AttrValue) {
        debug!(instance = %self.exec_id, attr = name, "set attribute");
        self.attrs
            .get_or_insert_with(HashMap::new)
            .insert(name.to_string(), value.clone());
        self.tracker
            .track_attribute_change(self.ordinal, ChangeOp::Update, name, Some(value));
    }
}

impl ActivityHost for FlowInstance {
    fn io_metadata(&self) -> &IoMetadata {
        self.def.metadata()
    }

    fn working_data(&mut self) -> &mut dyn AttributeScope {
        self
    }

    fn resolver(&self) -> Arc<CompositeResolver> {
        shared_resolver()
    }

    fn reply(&self, results: Attrs, err: Option<StateError>) {
        if let Some(handler) = &self.result_handler {
            handler.handle_result(results, err);
        }
    }

    fn force_return(&mut self, data: Option<Attrs>, err: Option<StateError>) {
        debug!(instance = %self.exec_id, has_err = err.is_some(), "forced return");
        self.force_completion = true;
        self.return_data = data;
        self.return_error = err;
    }
}

/// Persisted form of a [`FlowInstance`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    /// Sub-flow ordinal within the execution tree
    pub ordinal: u32,
    /// Resource URI of the backing flow definition
    pub flow_uri: String,
    /// Overall status at snapshot time
    pub status: FlowStatus,
    /// Live task records
    pub tasks: Vec<TaskSnapshot>,
    /// Live link records
    pub links: Vec<LinkSnapshot>,
    /// Instance attribute table
    pub attrs: HashMap<String, AttrValue>,
    /// Whether an explicit return short-circuited the instance
    pub force_completion: bool,
    /// Stored return data, if any
    pub return_data: Option<Attrs>,
    /// Stored return error, if any
    pub return_error: Option<StateError>,
}

impl FlowSnapshot {
    /// Fold one change entry into this snapshot
    ///
    /// This is the consumer half of the change log: applying a drained
    /// sequence to the previous checkpoint yields the same snapshot a
    /// full re-serialization would have produced. Records stay in id
    /// order, matching [`FlowInstance::snapshot`].
    pub fn apply(&mut self, entry: &ChangeEntry) {
        match entry {
            ChangeEntry::Task { op, id, snapshot } => match op {
                ChangeOp::Add | ChangeOp::Update => {
                    if let Some(snapshot) = snapshot {
                        match self.tasks.iter_mut().find(|t| &t.id == id) {
                            Some(existing) => *existing = snapshot.clone(),
                            None => {
                                self.tasks.push(snapshot.clone());
                                self.tasks.sort_by(|a, b| a.id.0.cmp(&b.id.0));
                            }
                        }
                    }
                }
                ChangeOp::Delete => self.tasks.retain(|t| &t.id != id),
            },
            ChangeEntry::Link { op, id, snapshot } => match op {
                ChangeOp::Add | ChangeOp::Update => {
                    if let Some(snapshot) = snapshot {
                        match self.links.iter_mut().find(|l| &l.id == id) {
                            Some(existing) => *existing = snapshot.clone(),
                            None => {
                                self.links.push(snapshot.clone());
                                self.links.sort_by(|a, b| a.id.0.cmp(&b.id.0));
                            }
                        }
                    }
                }
                ChangeOp::Delete => self.links.retain(|l| &l.id != id),
            },
            ChangeEntry::Attribute { op, name, value } => match op {
                ChangeOp::Add | ChangeOp::Update => {
                    if let Some(value) = value {
                        self.attrs.insert(name.clone(), value.clone());
                    }
                }
                ChangeOp::Delete => {
                    self.attrs.remove(name);
                }
            },
            ChangeEntry::Status { status } => self.status = *status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::change_tracker::TrackingMode;
    use crate::domain::flow_definition::{LinkDefinition, TaskDefinition};
    use std::sync::Mutex;

    fn diamond_definition() -> Arc<FlowDefinition> {
        Arc::new(FlowDefinition {
            id: FlowId("diamond".to_string()),
            uri: "res://flow:diamond".to_string(),
            name: "Diamond".to_string(),
            version: "1.0".to_string(),
            description: None,
            tasks: vec![
                TaskDefinition {
                    id: TaskId("t1".to_string()),
                    name: None,
                },
                TaskDefinition {
                    id: TaskId("t2".to_string()),
                    name: None,
                },
                TaskDefinition {
                    id: TaskId("t3".to_string()),
                    name: None,
                },
            ],
            links: vec![
                LinkDefinition {
                    id: LinkId("l1".to_string()),
                    from: TaskId("t1".to_string()),
                    to: TaskId("t2".to_string()),
                },
                LinkDefinition {
                    id: LinkId("l2".to_string()),
                    from: TaskId("t1".to_string()),
                    to: TaskId("t3".to_string()),
                },
            ],
            metadata: IoMetadata {
                input: vec!["order".to_string()],
                output: vec!["a".to_string(), "b".to_string()],
            },
            attrs: HashMap::from([("x".to_string(), AttrValue::from(5))]),
        })
    }

    fn tracked_instance() -> (FlowInstance, Arc<ChangeTracker>) {
        let tracker = Arc::new(ChangeTracker::new(TrackingMode::Track));
        let instance = FlowInstance::new(
            0,
            ExecId::root("R1"),
            diamond_definition(),
            tracker.clone(),
        );
        (instance, tracker)
    }

    #[test]
    fn test_find_or_create_task_is_idempotent() {
        let (mut instance, tracker) = tracked_instance();
        let id = TaskId("t1".to_string());

        let (_, created) = instance.find_or_create_task(&id);
        assert!(created);
        let (task, created) = instance.find_or_create_task(&id);
        assert!(!created);
        assert_eq!(task.state(), TaskState::Waiting);

        let adds = tracker
            .entries_for(0)
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    ChangeEntry::Task {
                        op: ChangeOp::Add,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(adds, 1, "exactly one Add entry per created record");
    }

    #[test]
    fn test_find_or_create_link_starts_pending() {
        let (mut instance, _tracker) = tracked_instance();

        let (link, created) = instance.find_or_create_link(&LinkId("l1".to_string()));
        assert!(created);
        assert_eq!(link.state(), LinkState::Pending);
    }

    #[test]
    fn test_release_task_cascades_to_outbound_links() {
        let (mut instance, tracker) = tracked_instance();
        let t1 = TaskId("t1".to_string());

        instance.find_or_create_task(&t1);
        instance.find_or_create_link(&LinkId("l1".to_string()));
        instance.find_or_create_link(&LinkId("l2".to_string()));
        tracker.clear();

        instance.release_task(&t1);

        assert!(instance.task_instance(&t1).is_none());
        assert!(instance.link_instance(&LinkId("l1".to_string())).is_none());
        assert!(instance.link_instance(&LinkId("l2".to_string())).is_none());

        // Task delete first, then its links in definition order
        let entries = tracker.entries_for(0);
        assert_eq!(entries.len(), 3);
        assert!(matches!(
            &entries[0],
            ChangeEntry::Task { op: ChangeOp::Delete, id, .. } if id.0 == "t1"
        ));
        assert!(matches!(
            &entries[1],
            ChangeEntry::Link { op: ChangeOp::Delete, id, .. } if id.0 == "l1"
        ));
        assert!(matches!(
            &entries[2],
            ChangeEntry::Link { op: ChangeOp::Delete, id, .. } if id.0 == "l2"
        ));
    }

    #[test]
    fn test_release_absent_task_emits_nothing() {
        let (mut instance, tracker) = tracked_instance();

        instance.release_task(&TaskId("ghost".to_string()));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_release_task_skips_uninstantiated_links() {
        let (mut instance, tracker) = tracked_instance();
        let t1 = TaskId("t1".to_string());

        // Only l1 has a record; l2 exists in the definition alone
        instance.find_or_create_task(&t1);
        instance.find_or_create_link(&LinkId("l1".to_string()));
        tracker.clear();

        instance.release_task(&t1);

        let entries = tracker.entries_for(0);
        assert_eq!(entries.len(), 2, "no Delete entry for a link never created");
    }

    #[test]
    fn test_task_state_transition_emits_update() {
        let (mut instance, tracker) = tracked_instance();
        let id = TaskId("t1".to_string());
        instance.find_or_create_task(&id);
        tracker.clear();

        assert!(instance.set_task_state(&id, TaskState::Executing));
        assert_eq!(
            instance.task_instance(&id).unwrap().state(),
            TaskState::Executing
        );

        let entries = tracker.entries_for(0);
        assert!(matches!(
            &entries[0],
            ChangeEntry::Task {
                op: ChangeOp::Update,
                snapshot: Some(s),
                ..
            } if s.state == TaskState::Executing
        ));

        assert!(!instance.set_task_state(&TaskId("ghost".to_string()), TaskState::Done));
    }

    #[test]
    fn test_set_status_always_emits() {
        let (mut instance, tracker) = tracked_instance();

        instance.set_status(FlowStatus::Active);
        // No legality check: any overwrite is accepted and recorded
        instance.set_status(FlowStatus::Active);

        assert_eq!(instance.status(), FlowStatus::Active);
        let statuses = tracker
            .entries_for(0)
            .into_iter()
            .filter(|e| matches!(e, ChangeEntry::Status { .. }))
            .count();
        assert_eq!(statuses, 2);
    }

    #[test]
    fn test_attribute_shadowing() {
        let (mut instance, tracker) = tracked_instance();

        // Definition default visible through the scope
        assert_eq!(instance.get_value("x").and_then(|v| v.as_i64()), Some(5));

        instance.set_value("x", AttrValue::from(7));
        assert_eq!(instance.get_value("x").and_then(|v| v.as_i64()), Some(7));

        // The definition default itself is untouched
        assert_eq!(
            instance.definition().get_attr("x").and_then(|v| v.as_i64()),
            Some(5)
        );

        let entries = tracker.entries_for(0);
        assert!(entries.iter().any(|e| matches!(
            e,
            ChangeEntry::Attribute { op: ChangeOp::Update, name, .. } if name == "x"
        )));
    }

    #[test]
    fn test_get_value_miss_is_none() {
        let (instance, _tracker) = tracked_instance();
        assert!(instance.get_value("nowhere").is_none());
        assert!(!instance.has_value("nowhere"));
    }

    #[test]
    fn test_update_attrs_bypasses_change_log() {
        // Deliberate exception: the bulk bind path emits no entries
        let (mut instance, tracker) = tracked_instance();

        instance.update_attrs(Attrs::from([
            ("order".to_string(), AttrValue::from(1)),
            ("x".to_string(), AttrValue::from(9)),
        ]));

        assert_eq!(instance.get_value("x").and_then(|v| v.as_i64()), Some(9));
        assert!(tracker.is_empty(), "bulk update must not be tracked");

        // Empty mapping is a no-op
        instance.update_attrs(Attrs::new());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_terminal_override() {
        let (mut instance, _tracker) = tracked_instance();
        instance.set_value("a", AttrValue::from(1));

        instance.force_return(
            Some(Attrs::from([("y".to_string(), AttrValue::from(1))])),
            None,
        );
        assert!(instance.is_force_completed());

        let (data, err) = instance.return_data();
        assert_eq!(
            data,
            Some(Attrs::from([("y".to_string(), AttrValue::from(1))]))
        );
        assert!(err.is_none());

        // Last call wins
        instance.force_return(None, Some(StateError::ActivityError("late".to_string())));
        let (data, err) = instance.return_data();
        assert!(data.is_none());
        assert_eq!(err, Some(StateError::ActivityError("late".to_string())));
    }

    #[test]
    fn test_output_derivation_omits_absent_names() {
        let (mut instance, _tracker) = tracked_instance();

        // Declared outputs are {a, b}; only a is present
        instance.set_value("a", AttrValue::from(1));

        let (data, err) = instance.return_data();
        assert_eq!(
            data,
            Some(Attrs::from([("a".to_string(), AttrValue::from(1))]))
        );
        assert!(err.is_none());
    }

    struct RecordingHandler {
        calls: Mutex<Vec<(Attrs, Option<StateError>)>>,
    }

    impl ResultHandler for RecordingHandler {
        fn handle_result(&self, results: Attrs, err: Option<StateError>) {
            self.calls.lock().unwrap().push((results, err));
        }
    }

    #[test]
    fn test_reply_delivers_to_handler_without_completion() {
        let (mut instance, _tracker) = tracked_instance();
        let handler = Arc::new(RecordingHandler {
            calls: Mutex::new(Vec::new()),
        });
        instance.set_result_handler(handler.clone());

        instance.reply(
            Attrs::from([("code".to_string(), AttrValue::from(200))]),
            None,
        );

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.get("code").and_then(|v| v.as_i64()), Some(200));
        drop(calls);

        assert!(!instance.is_force_completed());
        assert_eq!(instance.status(), FlowStatus::Created);
    }

    #[test]
    fn test_reply_without_handler_is_noop() {
        let (instance, _tracker) = tracked_instance();
        instance.reply(Attrs::new(), Some(StateError::ActivityError("e".to_string())));
    }

    #[test]
    fn test_handling_error_flag() {
        let (mut instance, _tracker) = tracked_instance();
        assert!(!instance.is_handling_error());
        instance.set_handling_error(true);
        assert!(instance.is_handling_error());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (mut instance, tracker) = tracked_instance();
        instance.set_status(FlowStatus::Active);
        instance.find_or_create_task(&TaskId("t1".to_string()));
        instance.set_task_state(&TaskId("t1".to_string()), TaskState::Done);
        instance.find_or_create_link(&LinkId("l1".to_string()));
        instance.set_value("a", AttrValue::from(3));

        let snapshot = instance.snapshot();
        let restored = FlowInstance::from_snapshot(
            snapshot.clone(),
            ExecId::root("R1"),
            diamond_definition(),
            tracker.clone(),
        );

        assert_eq!(restored.status(), FlowStatus::Active);
        assert_eq!(
            restored
                .task_instance(&TaskId("t1".to_string()))
                .unwrap()
                .state(),
            TaskState::Done
        );
        assert_eq!(restored.get_value("a").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_rehydration_emits_no_entries() {
        let (mut instance, tracker) = tracked_instance();
        instance.set_status(FlowStatus::Active);
        instance.find_or_create_task(&TaskId("t1".to_string()));
        let snapshot = instance.snapshot();
        tracker.clear();

        let _restored = FlowInstance::from_snapshot(
            snapshot,
            ExecId::root("R1"),
            diamond_definition(),
            tracker.clone(),
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_snapshot_apply_matches_direct_mutation() {
        let (mut instance, tracker) = tracked_instance();
        let mut checkpoint = instance.snapshot();

        instance.set_status(FlowStatus::Active);
        instance.find_or_create_task(&TaskId("t1".to_string()));
        instance.set_task_state(&TaskId("t1".to_string()), TaskState::Executing);
        instance.find_or_create_link(&LinkId("l1".to_string()));
        instance.set_value("a", AttrValue::from(11));
        instance.release_task(&TaskId("t1".to_string()));

        for entry in tracker.drain().remove(&0).unwrap() {
            checkpoint.apply(&entry);
        }
        assert_eq!(checkpoint, instance.snapshot());
    }

    #[test]
    fn test_snapshot_fold_matches_after_release_and_reuse() {
        let (mut instance, tracker) = tracked_instance();
        let mut checkpoint = instance.snapshot();

        instance.find_or_create_task(&TaskId("t1".to_string()));
        instance.find_or_create_task(&TaskId("t2".to_string()));
        instance.release_task(&TaskId("t1".to_string()));
        // t3 reuses t1's freed slot, so slot order no longer matches
        // the order the change entries were appended in
        instance.find_or_create_task(&TaskId("t3".to_string()));

        for entry in tracker.drain().remove(&0).unwrap() {
            checkpoint.apply(&entry);
        }
        assert_eq!(checkpoint, instance.snapshot());
        assert_eq!(
            checkpoint
                .tasks
                .iter()
                .map(|t| t.id.0.as_str())
                .collect::<Vec<_>>(),
            vec!["t2", "t3"]
        );
    }
}
