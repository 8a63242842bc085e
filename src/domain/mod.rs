//! Domain model of the flow state runtime

pub mod change_tracker;
pub mod flow_definition;
pub mod flow_instance;
pub mod repository;
pub mod root_instance;
pub mod scope;
pub mod task_instance;

pub(crate) mod table;
