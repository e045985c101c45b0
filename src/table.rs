// Open-addressed hash table keyed by interned strings.
//
// Both the VM's global-variable table and the interner's string set
// use this structure: linear probing, a 0.75 maximum load factor, and
// tombstone deletion so a removal can never strand entries that
// probed past the removed slot.

use std::rc::Rc;

use crate::object::ObjString;
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
enum Entry {
    Empty,
    Tombstone,
    Occupied { key: Rc<ObjString>, value: Value },
}

pub struct Table {
    // Occupied entries plus tombstones, for the load factor.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        match &self.entries[self.find_entry(key)] {
            Entry::Occupied { value, .. } => Some(value.clone()),
            _ => None,
        }
    }

    /// Insert or overwrite. Returns true when the key was not already
    /// present.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            self.grow();
        }
        let index = self.find_entry(&key);
        if let Entry::Empty = self.entries[index] {
            self.count += 1;
        }
        let is_new = !matches!(self.entries[index], Entry::Occupied { .. });
        self.entries[index] = Entry::Occupied { key, value };
        is_new
    }

    /// Remove a key, leaving a tombstone in its slot. Returns true
    /// when the key was present.
    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = self.find_entry(key);
        match self.entries[index] {
            Entry::Occupied { .. } => {
                self.entries[index] = Entry::Tombstone;
                true
            }
            _ => false,
        }
    }

    /// Interning lookup: compares length, hash, then bytes, because
    /// the caller does not yet hold an interned key to compare by
    /// pointer.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            match &self.entries[index] {
                Entry::Empty => return None,
                Entry::Tombstone => {}
                Entry::Occupied { key, .. } => {
                    if key.len() == chars.len() && key.hash() == hash && key.as_str() == chars {
                        return Some(key.clone());
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    // First slot holding the key, or the slot an insert of it should
    // use. A reusable tombstone wins over the terminating empty slot.
    // The load factor keeps some slots empty, so the probe terminates.
    fn find_entry(&self, key: &Rc<ObjString>) -> usize {
        let capacity = self.entries.len();
        let mut index = key.hash() as usize % capacity;
        let mut tombstone = None;
        loop {
            match &self.entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Occupied { key: existing, .. } => {
                    if Rc::ptr_eq(existing, key) {
                        return index;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let capacity = if self.entries.len() < 8 {
            8
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; capacity]);
        self.count = 0;
        for entry in old {
            if let Entry::Occupied { key, value } = entry {
                let index = self.find_entry(&key);
                self.entries[index] = Entry::Occupied { key, value };
                self.count += 1;
            }
        }
    }
}

impl Default for Table {
    fn default() -> Table {
        Table::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{hash_string, ObjectHeap};

    fn key(heap: &mut ObjectHeap, name: &str) -> Rc<ObjString> {
        heap.copy_string(name)
    }

    #[test]
    fn set_then_get() {
        let mut heap = ObjectHeap::new();
        let mut table = Table::new();
        let k = key(&mut heap, "answer");
        assert!(table.set(k.clone(), Value::Number(42.0)));
        assert_eq!(table.get(&k), Some(Value::Number(42.0)));
    }

    #[test]
    fn overwrite_reports_existing_key() {
        let mut heap = ObjectHeap::new();
        let mut table = Table::new();
        let k = key(&mut heap, "x");
        assert!(table.set(k.clone(), Value::Number(1.0)));
        assert!(!table.set(k.clone(), Value::Number(2.0)));
        assert_eq!(table.get(&k), Some(Value::Number(2.0)));
    }

    #[test]
    fn missing_key_is_none() {
        let mut heap = ObjectHeap::new();
        let table = Table::new();
        let k = key(&mut heap, "ghost");
        assert_eq!(table.get(&k), None);
    }

    #[test]
    fn delete_then_reinsert_counts_as_new() {
        let mut heap = ObjectHeap::new();
        let mut table = Table::new();
        let k = key(&mut heap, "x");
        table.set(k.clone(), Value::Bool(true));
        assert!(table.delete(&k));
        assert_eq!(table.get(&k), None);
        assert!(!table.delete(&k));
        assert!(table.set(k.clone(), Value::Bool(false)));
        assert_eq!(table.get(&k), Some(Value::Bool(false)));
    }

    #[test]
    fn deletion_does_not_strand_probed_entries() {
        let mut heap = ObjectHeap::new();
        let mut table = Table::new();
        let keys: Vec<_> = (0..64).map(|i| key(&mut heap, &format!("k{}", i))).collect();
        for (i, k) in keys.iter().enumerate() {
            table.set(k.clone(), Value::Number(i as f64));
        }
        // Remove half the keys, then every survivor must still probe
        // through the tombstones to its slot.
        for k in keys.iter().step_by(2) {
            assert!(table.delete(k));
        }
        for (i, k) in keys.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(table.get(k), None);
            } else {
                assert_eq!(table.get(k), Some(Value::Number(i as f64)));
            }
        }
    }

    #[test]
    fn survives_growth() {
        let mut heap = ObjectHeap::new();
        let mut table = Table::new();
        let keys: Vec<_> = (0..200).map(|i| key(&mut heap, &format!("g{}", i))).collect();
        for (i, k) in keys.iter().enumerate() {
            table.set(k.clone(), Value::Number(i as f64));
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.get(k), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn find_string_matches_by_contents() {
        let mut heap = ObjectHeap::new();
        let mut table = Table::new();
        let k = key(&mut heap, "needle");
        table.set(k.clone(), Value::Nil);
        let found = table.find_string("needle", hash_string("needle"));
        assert!(found.map_or(false, |f| Rc::ptr_eq(&f, &k)));
        assert!(table.find_string("noodle", hash_string("noodle")).is_none());
    }
}
