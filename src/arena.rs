use serde::{Deserialize, Serialize};
use std::fmt;

/// Generational handle to a node.
/// A handle outlives its node: once the slot is freed the generation moves on
/// and every lookup through the old handle misses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena owning every node of a compiler. Parent/child relations are stored
/// as `NodeId`s, never as owning pointers.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> NodeId {
        self.insert_with(|_| value)
    }

    /// Allocates a slot and builds the value with its own id in hand.
    pub fn insert_with(&mut self, build: impl FnOnce(NodeId) -> T) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            let id = NodeId {
                index,
                generation: slot.generation,
            };
            slot.value = Some(build(id));
            id
        } else {
            let index = self.slots.len() as u32;
            let id = NodeId {
                index,
                generation: 0,
            };
            self.slots.push(Slot {
                generation: 0,
                value: Some(build(id)),
            });
            id
        }
    }

    /// Frees the slot and returns its value. Stale ids return `None`.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let slot = &mut self.slots[id.index as usize];
        // Bump generation immediately to invalidate outstanding handles
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        self.len -= 1;
        slot.value.take()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index as usize)
            .map(|slot| slot.generation == id.generation && slot.value.is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    NodeId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}
