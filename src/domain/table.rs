use std::collections::HashMap;
use std::hash::Hash;

/// Slot arena for task and link run-time records
///
/// Records live in a `Vec` of slots with an id -> slot index map on the
/// side. Removal marks the slot free for reuse instead of shifting
/// entries, so snapshots taken while a flow loops do not observe records
/// moving around.
#[derive(Debug)]
pub(crate) struct SlotTable<K, T> {
    slots: Vec<Option<T>>,
    index: HashMap<K, usize>,
    free: Vec<usize>,
}

impl<K, T> SlotTable<K, T>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub(crate) fn get(&self, key: &K) -> Option<&T> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref()
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_mut()
    }

    /// Look up a record, inserting a freshly built one if absent
    ///
    /// Returns the record plus whether it was created by this call.
    pub(crate) fn get_or_insert_with<F>(&mut self, key: K, make: F) -> (&mut T, bool)
    where
        F: FnOnce() -> T,
    {
        let (slot, created) = match self.index.get(&key) {
            Some(&slot) => (slot, false),
            None => {
                let slot = match self.free.pop() {
                    Some(free_slot) => {
                        self.slots[free_slot] = Some(make());
                        free_slot
                    }
                    None => {
                        self.slots.push(Some(make()));
                        self.slots.len() - 1
                    }
                };
                self.index.insert(key, slot);
                (slot, true)
            }
        };

        match self.slots[slot].as_mut() {
            Some(record) => (record, created),
            // The index never points at a freed slot
            None => unreachable!("slot table index points at a free slot"),
        }
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<T> {
        let slot = self.index.remove(key)?;
        let record = self.slots[slot].take();
        self.free.push(slot);
        record
    }

    /// Iterate live records in slot order
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }
}
