//! Append-only, time-ordered key/value history.
//!
//! The correlation question is never "what does key K map to" but "what did
//! key K map to at time T": a file handle gets reused, a thread id gets
//! recycled, and the answer depends on when you ask. `TemporalMap` keeps
//! every binding a key has ever had, ordered by start time, and answers
//! as-of-time lookups with a predecessor search. Both the thread and the
//! name correlators are built on it.

use std::collections::HashMap;
use std::hash::Hash;
use std::io::{Read, Write};

use anyhow::Result;

use crate::persist::{Tape, TapeReader, TapeWriter};

/// Start time for entries that predate the capture window (rundown state):
/// earlier than any real timestamp, so they resolve for all time.
pub const TIME_BEGINNING: i64 = i64::MIN;

struct Entry<V> {
    start: i64,
    /// `None` tombstones the key from `start` on.
    value: Option<V>,
}

pub struct TemporalMap<K, V> {
    entries: HashMap<K, Vec<Entry<V>>>,
}

impl<K: Eq + Hash, V> TemporalMap<K, V> {
    pub fn new() -> Self {
        TemporalMap {
            entries: HashMap::new(),
        }
    }

    /// Record that `key` maps to `value` from `start` until a later entry
    /// supersedes it.
    pub fn insert(&mut self, key: K, start: i64, value: V) {
        self.push(key, start, Some(value));
    }

    /// Hide `key` from every lookup at or after `time`. Entries already
    /// recorded stay reachable for lookups at earlier times.
    pub fn remove(&mut self, key: K, time: i64) {
        self.push(key, time, None);
    }

    fn push(&mut self, key: K, start: i64, value: Option<V>) {
        let list = self.entries.entry(key).or_default();
        // The stream is time-ordered, so appending is the common case. An
        // out-of-order insert sorts into place; ties land after existing
        // entries so the latest insert wins.
        let at = list.partition_point(|e| e.start <= start);
        if at == list.len() {
            list.push(Entry { start, value });
        } else {
            list.insert(at, Entry { start, value });
        }
    }

    /// Value of `key` as of `as_of`: the entry with the greatest start time
    /// `<= as_of`, or `None` if the key had no binding yet (or was removed
    /// by then).
    pub fn lookup(&self, key: &K, as_of: i64) -> Option<&V> {
        let list = self.entries.get(key)?;
        let at = list.partition_point(|e| e.start <= as_of);
        if at == 0 {
            return None;
        }
        list[at - 1].value.as_ref()
    }

    /// Number of keys with any history.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Total entries, tombstones included.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    fn iter_entries(&self) -> impl Iterator<Item = (&K, i64, Option<&V>)> {
        self.entries
            .iter()
            .flat_map(|(k, list)| list.iter().map(move |e| (k, e.start, e.value.as_ref())))
    }
}

impl<K: Eq + Hash, V> Default for TemporalMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Tape, V: Tape> Tape for TemporalMap<K, V> {
    /// Serialized as a length-prefixed (key, start, value) triple list.
    /// Per-key time order is preserved; tombstones travel as a missing
    /// value.
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        w.write_u32(self.entry_count() as u32)?;
        for (key, start, value) in self.iter_entries() {
            key.store(w)?;
            w.write_i64(start)?;
            match value {
                Some(value) => {
                    w.write_u8(1)?;
                    value.store(w)?;
                }
                None => w.write_u8(0)?,
            }
        }
        Ok(())
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        let count = r.read_u32()?;
        let mut map = TemporalMap::new();
        for _ in 0..count {
            let key = K::load(r)?;
            let start = r.read_i64()?;
            let value = if r.read_u8()? != 0 {
                Some(V::load(r)?)
            } else {
                None
            };
            map.push(key, start, value);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_predecessor_search() {
        let mut map = TemporalMap::new();
        map.insert(1u64, 10, "a");
        map.insert(1u64, 20, "b");

        assert_eq!(map.lookup(&1, 5), None);
        assert_eq!(map.lookup(&1, 10), Some(&"a"));
        assert_eq!(map.lookup(&1, 19), Some(&"a"));
        assert_eq!(map.lookup(&1, 20), Some(&"b"));
        assert_eq!(map.lookup(&1, 1000), Some(&"b"));
        assert_eq!(map.lookup(&2, 10), None);
    }

    #[test]
    fn test_remove_tombstones_future_lookups_only() {
        let mut map = TemporalMap::new();
        map.insert(1u64, 10, "a");
        map.remove(1u64, 30);

        assert_eq!(map.lookup(&1, 29), Some(&"a"));
        assert_eq!(map.lookup(&1, 30), None);
        assert_eq!(map.lookup(&1, 1000), None);

        // A fresh binding after the tombstone resolves again.
        map.insert(1u64, 40, "b");
        assert_eq!(map.lookup(&1, 35), None);
        assert_eq!(map.lookup(&1, 40), Some(&"b"));
    }

    #[test]
    fn test_same_timestamp_last_insert_wins() {
        let mut map = TemporalMap::new();
        map.insert(1u64, 10, "a");
        map.insert(1u64, 10, "b");
        assert_eq!(map.lookup(&1, 10), Some(&"b"));
        assert_eq!(map.lookup(&1, 9), None);
    }

    #[test]
    fn test_out_of_order_insert_sorts_into_place() {
        let mut map = TemporalMap::new();
        map.insert(1u64, 30, "c");
        map.insert(1u64, 10, "a");
        assert_eq!(map.lookup(&1, 15), Some(&"a"));
        assert_eq!(map.lookup(&1, 30), Some(&"c"));
    }

    #[test]
    fn test_beginning_of_time_resolves_for_all_time() {
        let mut map = TemporalMap::new();
        map.insert(1u64, TIME_BEGINNING, "rundown");
        assert_eq!(map.lookup(&1, i64::MIN), Some(&"rundown"));
        assert_eq!(map.lookup(&1, 0), Some(&"rundown"));
    }

    #[test]
    fn test_store_load_round_trip() {
        let mut map = TemporalMap::new();
        map.insert(1u64, TIME_BEGINNING, "rundown".to_string());
        map.insert(1u64, 20, "live".to_string());
        map.insert(2u64, 5, "other".to_string());
        map.remove(2u64, 50);

        let mut buf = Vec::new();
        map.store(&mut TapeWriter::new(&mut buf)).unwrap();
        let loaded: TemporalMap<u64, String> =
            Tape::load(&mut TapeReader::new(buf.as_slice())).unwrap();

        assert_eq!(loaded.entry_count(), 4);
        assert_eq!(loaded.lookup(&1, 0).map(String::as_str), Some("rundown"));
        assert_eq!(loaded.lookup(&1, 25).map(String::as_str), Some("live"));
        assert_eq!(loaded.lookup(&2, 10).map(String::as_str), Some("other"));
        assert_eq!(loaded.lookup(&2, 60), None);
    }
}
