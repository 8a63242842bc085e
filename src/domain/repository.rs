//! Persistence seam for execution trees
//!
//! The state core never talks to a store directly; a host wires an
//! [`InstanceRepository`] implementation in. Checkpointing is two-phase:
//! a full [`RootSnapshot`] establishes tree membership, and drained
//! change sets are committed incrementally on top of it.

use crate::domain::change_tracker::ChangeSet;
use crate::domain::root_instance::RootSnapshot;
use crate::error::StateError;
use async_trait::async_trait;

/// Durable storage for execution-tree snapshots
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Load the stored snapshot for a root id
    async fn load(&self, root_id: &str) -> Result<RootSnapshot, StateError>;

    /// Store a full snapshot, replacing any previous one
    ///
    /// Must be called whenever tree membership changed, i.e. a sub-flow
    /// instance was created or released since the last full save.
    async fn save_snapshot(&self, snapshot: &RootSnapshot) -> Result<(), StateError>;

    /// Fold a drained change set into the stored snapshot
    ///
    /// Entries target instances already present in the stored snapshot;
    /// an unknown ordinal is a contract violation and fails the commit.
    async fn commit(&self, root_id: &str, changes: &ChangeSet) -> Result<(), StateError>;

    /// Remove the stored snapshot for a root id
    async fn delete(&self, root_id: &str) -> Result<(), StateError>;
}

#[cfg(feature = "testing")]
pub mod memory {
    //! In-memory repository for tests and examples

    use super::*;
    use dashmap::DashMap;

    /// Thread-safe in-memory [`InstanceRepository`]
    #[derive(Debug, Default)]
    pub struct MemoryInstanceRepository {
        snapshots: DashMap<String, RootSnapshot>,
    }

    impl MemoryInstanceRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of stored trees
        pub fn len(&self) -> usize {
            self.snapshots.len()
        }

        /// Whether the repository holds no trees
        pub fn is_empty(&self) -> bool {
            self.snapshots.is_empty()
        }
    }

    #[async_trait]
    impl InstanceRepository for MemoryInstanceRepository {
        async fn load(&self, root_id: &str) -> Result<RootSnapshot, StateError> {
            self.snapshots
                .get(root_id)
                .map(|entry| entry.clone())
                .ok_or_else(|| StateError::InstanceNotFound(root_id.to_string()))
        }

        async fn save_snapshot(&self, snapshot: &RootSnapshot) -> Result<(), StateError> {
            self.snapshots
                .insert(snapshot.id.clone(), snapshot.clone());
            Ok(())
        }

        async fn commit(&self, root_id: &str, changes: &ChangeSet) -> Result<(), StateError> {
            let mut stored = self
                .snapshots
                .get_mut(root_id)
                .ok_or_else(|| StateError::InstanceNotFound(root_id.to_string()))?;

            for (ordinal, entries) in changes {
                let flow = stored
                    .instances
                    .iter_mut()
                    .find(|s| s.ordinal == *ordinal)
                    .ok_or_else(|| {
                        StateError::StoreError(format!(
                            "commit for {} targets unknown sub-flow ordinal {}",
                            root_id, ordinal
                        ))
                    })?;
                for entry in entries {
                    flow.apply(entry);
                }
            }
            Ok(())
        }

        async fn delete(&self, root_id: &str) -> Result<(), StateError> {
            self.snapshots
                .remove(root_id)
                .map(|_| ())
                .ok_or_else(|| StateError::InstanceNotFound(root_id.to_string()))
        }
    }
}
