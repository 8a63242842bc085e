use crate::domain::flow_instance::{FlowId, LinkId, TaskId};
use crate::error::StateError;
use crate::types::AttrValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A parsed and validated flow definition
///
/// Produced by the external graph compiler; this core only reads it.
/// Instance attribute lookups fall back to the read-only defaults
/// declared here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// ID of the flow
    pub id: FlowId,

    /// Resource URI the definition was loaded from
    pub uri: String,

    /// Human-readable name of the flow
    pub name: String,

    /// The flow version
    pub version: String,

    /// Description of the flow
    pub description: Option<String>,

    /// Task nodes of the graph
    pub tasks: Vec<TaskDefinition>,

    /// Link edges of the graph
    pub links: Vec<LinkDefinition>,

    /// Declared input/output attribute names
    pub metadata: IoMetadata,

    /// Default attribute values, read-only at run time
    pub attrs: HashMap<String, AttrValue>,
}

/// A task node in a flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// ID of the task, unique within the flow
    pub id: TaskId,

    /// Human-readable name
    pub name: Option<String>,
}

/// A link edge in a flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDefinition {
    /// ID of the link, unique within the flow
    pub id: LinkId,

    /// Source task id
    pub from: TaskId,

    /// Target task id
    pub to: TaskId,
}

/// Declared input and output attribute names of a flow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoMetadata {
    /// Input attribute names
    pub input: Vec<String>,

    /// Output attribute names
    pub output: Vec<String>,
}

impl FlowDefinition {
    /// Human-readable name of the flow
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource URI the definition was loaded from
    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Declared input/output attribute names
    #[inline]
    pub fn metadata(&self) -> &IoMetadata {
        &self.metadata
    }

    /// Default value declared for an attribute, if any
    #[inline]
    pub fn get_attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Look up a task definition by id
    pub fn task(&self, id: &TaskId) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    /// Links whose source is the given task, in definition order
    pub fn links_from<'a>(&'a self, task_id: &'a TaskId) -> impl Iterator<Item = &'a LinkDefinition> {
        self.links.iter().filter(move |link| &link.from == task_id)
    }

    /// Validate the flow definition
    pub fn validate(&self) -> Result<(), StateError> {
        let mut task_ids = std::collections::HashSet::new();
        for task in &self.tasks {
            if !task_ids.insert(&task.id) {
                return Err(StateError::ValidationError(format!(
                    "Duplicate task ID: {}",
                    task.id.0
                )));
            }
        }

        let mut link_ids = std::collections::HashSet::new();
        for link in &self.links {
            if !link_ids.insert(&link.id) {
                return Err(StateError::ValidationError(format!(
                    "Duplicate link ID: {}",
                    link.id.0
                )));
            }

            for endpoint in [&link.from, &link.to] {
                if !task_ids.contains(endpoint) {
                    return Err(StateError::ValidationError(format!(
                        "Link {} references non-existent task: {}",
                        link.id.0, endpoint.0
                    )));
                }
            }
        }

        Ok(())
    }
}
