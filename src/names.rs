//! Numeric-key to name resolution for files and kernel objects.

use std::collections::HashMap;
use std::io::{Read, Write};

use anyhow::Result;

use crate::persist::{Tape, TapeReader, TapeWriter};
use crate::temporal::{TemporalMap, TIME_BEGINNING};

/// Resolves the numeric keys records use to refer to named entities.
///
/// Two key spaces can denote the same file: the persistent name-defining key
/// the kernel hands out for the name itself, and the per-open object address
/// of one instance of it. Both land in the same table and both resolve to
/// the same name; a lookup tries the caller's primary key first and falls
/// back to the secondary.
#[derive(Default)]
pub struct NameTable {
    names: TemporalMap<u64, String>,
    /// Object type id to type name, last write wins.
    type_names: HashMap<u32, String>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `name` from `time` on. Rundown and name-definition
    /// records are emitted out of band at trace boundaries and describe
    /// state that already existed, so they are valid for all time rather
    /// than from their own timestamp.
    pub fn add(&mut self, key: u64, time: i64, name: String, rundown: bool) {
        let start = if rundown { TIME_BEGINNING } else { time };
        self.names.insert(key, start, name);
    }

    /// Tombstone `key` from `time` on. Without this a long-running live
    /// capture would pin every name it ever saw.
    pub fn remove(&mut self, key: u64, time: i64) {
        self.names.remove(key, time);
    }

    /// Name for `key` (or `secondary`) as of `time`. A miss on both is the
    /// empty string, not an error: plenty of handles legitimately predate
    /// the capture.
    pub fn lookup(&self, key: u64, secondary: Option<u64>, time: i64) -> &str {
        if let Some(name) = self.names.lookup(&key, time) {
            return name;
        }
        if let Some(secondary) = secondary {
            if let Some(name) = self.names.lookup(&secondary, time) {
                return name;
            }
        }
        ""
    }

    pub fn set_type_name(&mut self, object_type: u32, name: String) {
        self.type_names.insert(object_type, name);
    }

    pub fn type_name(&self, object_type: u32) -> &str {
        self.type_names
            .get(&object_type)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn name_count(&self) -> usize {
        self.names.key_count()
    }
}

impl Tape for NameTable {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        self.names.store(w)?;
        w.write_u32(self.type_names.len() as u32)?;
        for (&object_type, name) in &self.type_names {
            w.write_u32(object_type)?;
            w.write_str(name)?;
        }
        Ok(())
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        let names = TemporalMap::load(r)?;
        let count = r.read_u32()?;
        let mut type_names = HashMap::new();
        for _ in 0..count {
            let object_type = r.read_u32()?;
            type_names.insert(object_type, r.read_str()?);
        }
        Ok(NameTable { names, type_names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{TapeReader, TapeWriter};

    #[test]
    fn test_add_then_lookup() {
        let mut table = NameTable::new();
        table.add(0x1000, 5, "C:\\a.txt".to_string(), false);

        assert_eq!(table.lookup(0x1000, None, 10), "C:\\a.txt");
        assert_eq!(table.lookup(0x1000, None, 4), "");
    }

    #[test]
    fn test_remove_tombstones_key() {
        let mut table = NameTable::new();
        table.add(0x1000, 5, "C:\\a.txt".to_string(), false);
        table.remove(0x1000, 15);

        assert_eq!(table.lookup(0x1000, None, 10), "C:\\a.txt");
        assert_eq!(table.lookup(0x1000, None, 20), "");
    }

    #[test]
    fn test_rundown_is_valid_for_all_time() {
        let mut table = NameTable::new();
        // Rundown record observed at t=1000 describing a file that existed
        // all along.
        table.add(0x2000, 1000, "C:\\pagefile.sys".to_string(), true);
        assert_eq!(table.lookup(0x2000, None, 1), "C:\\pagefile.sys");
    }

    #[test]
    fn test_secondary_key_fallback() {
        let mut table = NameTable::new();
        // Name known under the file key, queried by the per-open object.
        table.add(0x3000, 5, "C:\\b.txt".to_string(), false);

        assert_eq!(table.lookup(0xdead, Some(0x3000), 10), "C:\\b.txt");
        assert_eq!(table.lookup(0xdead, Some(0xbeef), 10), "");
    }

    #[test]
    fn test_type_names_last_write_wins() {
        let mut table = NameTable::new();
        table.set_type_name(30, "Mutant".to_string());
        table.set_type_name(30, "File".to_string());
        assert_eq!(table.type_name(30), "File");
        assert_eq!(table.type_name(99), "");
    }

    #[test]
    fn test_store_load_round_trip() {
        let mut table = NameTable::new();
        table.add(0x1000, 5, "C:\\a.txt".to_string(), false);
        table.add(0x2000, 900, "C:\\pagefile.sys".to_string(), true);
        table.set_type_name(30, "File".to_string());

        let mut buf = Vec::new();
        table.store(&mut TapeWriter::new(&mut buf)).unwrap();
        let loaded = NameTable::load(&mut TapeReader::new(buf.as_slice())).unwrap();

        assert_eq!(loaded.lookup(0x1000, None, 10), "C:\\a.txt");
        assert_eq!(loaded.lookup(0x2000, None, 1), "C:\\pagefile.sys");
        assert_eq!(loaded.type_name(30), "File");
    }
}
