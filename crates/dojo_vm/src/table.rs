use crate::heap::Heap;
use crate::value::{ObjRef, Value};

// ── Open-addressed hash table ─────────────────────────────────────────────
//
// Linear probing, power-of-two capacity (>= 8), 70% load factor. Keys
// are interned strings, so comparison is index equality. The hash is
// stored in the slot so that get/put/grow never need the heap; only
// `find_string` compares bytes.
//
// `count` includes tombstones: a delete frees no space until the next
// growth.

const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Tombstone,
    Live { key: ObjRef, hash: u32, value: Value },
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    slots: Vec<Slot>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Table { slots: Vec::new(), count: 0 }
    }

    /// Number of live entries (tombstones do not count).
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Live { .. }))
            .count()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.slots.len() * std::mem::size_of::<Slot>()
    }

    /// Index of the live entry for `key`, or of the first reusable slot
    /// (a tombstone if one was passed, otherwise the first empty).
    fn find_slot(&self, key: ObjRef, hash: u32) -> usize {
        let mask = self.slots.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Live { key: k, .. } => {
                    if *k == key {
                        return index;
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        match &self.slots[self.find_slot(key, hash)] {
            Slot::Live { key: k, value, .. } if *k == key => Some(*value),
            _ => None,
        }
    }

    /// Inserts or updates; true if the key was not present.
    pub fn put(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 10 > self.slots.len() * 7 {
            self.grow();
        }
        // find_slot returns a live slot only when the key matches
        let index = self.find_slot(key, hash);
        let (existing, was_empty) = match &self.slots[index] {
            Slot::Live { .. } => (true, false),
            Slot::Tombstone => (false, false), // reuse: count stays the same
            Slot::Empty => (false, true),
        };
        self.slots[index] = Slot::Live { key, hash, value };
        if was_empty {
            self.count += 1;
        }
        !existing
    }

    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let index = self.find_slot(key, hash);
        let hit = matches!(&self.slots[index], Slot::Live { key: k, .. } if *k == key);
        if hit {
            self.slots[index] = Slot::Tombstone;
        }
        hit
    }

    fn grow(&mut self) {
        let new_cap = (self.slots.len() * 2).max(MIN_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; new_cap]);
        self.count = 0;
        for slot in old {
            if let Slot::Live { key, hash, value } = slot {
                let index = self.find_slot(key, hash);
                self.slots[index] = Slot::Live { key, hash, value };
                self.count += 1;
            }
        }
    }

    /// Lookup by raw bytes, without allocating a transient key. This is
    /// the entry point the interner uses.
    pub fn find_string(&self, s: &str, hash: u32, heap: &Heap) -> Option<ObjRef> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Live { key, hash: h, .. } => {
                    if *h == hash && &*heap.string(*key).chars == s {
                        return Some(*key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// During GC: drop every entry whose key is unmarked.
    pub fn remove_white(&mut self, marks: &[bool]) {
        for slot in self.slots.iter_mut() {
            if let Slot::Live { key, .. } = slot {
                if !marks[key.0 as usize] {
                    *slot = Slot::Tombstone;
                }
            }
        }
    }

    /// Copies every live entry of `src` (used by INHERIT).
    pub fn put_all(&mut self, src: &Table) {
        for (key, hash, value) in src.iter() {
            self.put(key, hash, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, u32, Value)> + '_ {
        self.slots.iter().filter_map(|s| match s {
            Slot::Live { key, hash, value } => Some((*key, *hash, *value)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keys here are arbitrary ObjRefs: the Table never dereferences its
    // keys, only find_string does (covered by the interner tests).
    fn k(i: u32) -> ObjRef {
        ObjRef(i)
    }

    #[test]
    fn t_put_get() {
        let mut t = Table::new();
        assert!(t.put(k(1), 100, Value::number(1.0)));
        assert!(!t.put(k(1), 100, Value::number(2.0)));
        assert_eq!(t.get(k(1), 100), Some(Value::number(2.0)));
        assert_eq!(t.get(k(2), 200), None);
    }

    #[test]
    fn t_get_on_empty() {
        let t = Table::new();
        assert_eq!(t.get(k(1), 1), None);
    }

    #[test]
    fn t_delete_leaves_tombstone() {
        let mut t = Table::new();
        t.put(k(1), 7, Value::TRUE);
        assert!(t.delete(k(1), 7));
        assert!(!t.delete(k(1), 7));
        assert_eq!(t.get(k(1), 7), None);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn t_probe_through_tombstone() {
        // two keys with the same hash: the second probes past the first
        let mut t = Table::new();
        t.put(k(1), 5, Value::number(1.0));
        t.put(k(2), 5, Value::number(2.0));
        t.delete(k(1), 5);
        assert_eq!(t.get(k(2), 5), Some(Value::number(2.0)));
        // the tombstone gets reused
        assert!(t.put(k(3), 5, Value::number(3.0)));
        assert_eq!(t.get(k(3), 5), Some(Value::number(3.0)));
    }

    #[test]
    fn t_grow_keeps_entries() {
        let mut t = Table::new();
        for i in 0..64 {
            t.put(k(i), i, Value::number(i as f64));
        }
        for i in 0..64 {
            assert_eq!(t.get(k(i), i as u32), Some(Value::number(i as f64)));
        }
        assert_eq!(t.live_count(), 64);
    }

    #[test]
    fn t_put_all() {
        let mut a = Table::new();
        a.put(k(1), 1, Value::TRUE);
        a.put(k(2), 2, Value::FALSE);
        let mut b = Table::new();
        b.put(k(2), 2, Value::NIL);
        b.put_all(&a);
        assert_eq!(b.get(k(1), 1), Some(Value::TRUE));
        // put_all overwrites
        assert_eq!(b.get(k(2), 2), Some(Value::FALSE));
    }
}
