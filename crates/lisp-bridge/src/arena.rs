//! Generation-tagged arena.
//!
//! Callback and reverse-proxy registries hand out integer indices that the host
//! stores inside its own data (closure forms, marker lists). A slot may only be
//! reused after it has been explicitly removed, and every reuse bumps the slot's
//! generation, so a stale `Key` held by the host never resolves to an unrelated
//! entry. A slot whose generation is exhausted is retired instead of reused,
//! and once every index is taken `insert` refuses new entries.

use std::collections::VecDeque;
use std::fmt;

/// Index plus generation of an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    /// Rebuild a key from the two integers carried in host forms.
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Vec-backed arena whose keys carry a generation counter.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: VecDeque<u32>,
    len: usize,
    max_slots: usize,
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
            free: VecDeque::new(),
            len: 0,
            max_slots: usize::MAX,
        }
    }

    #[cfg(test)]
    fn with_max_slots(max_slots: usize) -> Self {
        Self {
            max_slots,
            ..Self::new()
        }
    }

    /// Store `value` and return its key, or hand `value` back when no index
    /// is left.
    ///
    /// Freed slots are reused oldest-first; fresh slots are appended so indices
    /// grow monotonically until something has been removed.
    pub fn insert(&mut self, value: T) -> Result<Key, T> {
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(Key {
                index,
                generation: slot.generation,
            });
        }

        if self.slots.len() >= self.max_slots {
            return Err(value);
        }
        let Ok(index) = u32::try_from(self.slots.len()) else {
            return Err(value);
        };
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(Key {
            index,
            generation: 0,
        })
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Remove the entry for `key`. Removing a stale or unknown key is a no-op.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.len -= 1;
        // A wrapped generation would let old keys match again.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push_back(key.index);
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_monotonic_without_removal() {
        let mut arena = Arena::new();
        let a = arena.insert("a").unwrap();
        let b = arena.insert("b").unwrap();
        let c = arena.insert("c").unwrap();

        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn test_stale_key_is_rejected_after_reuse() {
        let mut arena = Arena::new();
        let old = arena.insert(1).unwrap();
        assert_eq!(arena.remove(old), Some(1));

        let new = arena.insert(2).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut arena = Arena::new();
        let key = arena.insert(()).unwrap();
        assert!(arena.remove(key).is_some());
        assert!(arena.remove(key).is_none());
        assert!(arena.remove(Key::from_parts(40, 0)).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_full_arena_refuses_insert() {
        let mut arena = Arena::with_max_slots(2);
        let a = arena.insert('a').unwrap();
        let b = arena.insert('b').unwrap();

        assert_eq!(arena.insert('c'), Err('c'));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&'a'));
        assert_eq!(arena.get(b), Some(&'b'));

        arena.remove(a);
        let reused = arena.insert('d').unwrap();
        assert_eq!(reused.index(), a.index());
        assert_eq!(arena.get(a), None);
    }

    #[test]
    fn test_exhausted_generation_retires_slot() {
        let mut arena = Arena::new();
        let key = arena.insert(1).unwrap();
        arena.slots[0].generation = u32::MAX;
        let last = Key::from_parts(key.index(), u32::MAX);

        assert_eq!(arena.remove(last), Some(1));
        let fresh = arena.insert(2).unwrap();
        assert_eq!(fresh.index(), 1);
        assert_eq!(arena.get(Key::from_parts(0, 0)), None);
    }
}
