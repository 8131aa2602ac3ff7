//! Thread-to-process ownership over time.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use anyhow::Result;

use crate::persist::{Tape, TapeReader, TapeWriter};
use crate::temporal::TemporalMap;

/// Answers "which process owned thread T at time X".
///
/// The primary index is built from thread Start/DCStart records. In a
/// ring-buffer capture a thread's Start can be overwritten before its Stop
/// shows up, so Stops whose tid the primary index cannot resolve are kept in
/// a fallback index keyed by stop time: a thread's process affiliation is
/// constant between the missing Start and its eventual Stop, so the nearest
/// Stop at or after the query time gives the right pid.
#[derive(Default)]
pub struct ThreadTable {
    starts: TemporalMap<i32, i32>,
    stops: BTreeMap<(i32, i64), i32>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a thread Start or DCStart.
    pub fn record_start(&mut self, tid: i32, time: i64, pid: i32) {
        self.starts.insert(tid, time, pid);
    }

    /// Record a thread Stop or DCStop. Only Stops the start history cannot
    /// already explain go into the fallback index.
    pub fn record_stop(&mut self, tid: i32, time: i64, pid: i32) {
        if self.starts.lookup(&tid, time).is_none() {
            self.stops.insert((tid, time), pid);
        }
    }

    /// Owning pid of `tid` as of `time`, or `None` when neither the start
    /// history nor the stop fallback can say. Never pid 0: an unresolvable
    /// thread stays explicitly unknown.
    pub fn lookup(&self, tid: i32, time: i64) -> Option<i32> {
        if let Some(pid) = self.starts.lookup(&tid, time) {
            return Some(*pid);
        }
        // Smallest recorded stop time >= the query time for this tid.
        self.stops
            .range((tid, time)..=(tid, i64::MAX))
            .next()
            .map(|(_, pid)| *pid)
    }

    pub fn start_count(&self) -> usize {
        self.starts.entry_count()
    }

    pub fn stop_fallback_count(&self) -> usize {
        self.stops.len()
    }
}

impl Tape for ThreadTable {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        self.starts.store(w)?;
        w.write_u32(self.stops.len() as u32)?;
        for (&(tid, stop), &pid) in &self.stops {
            w.write_i32(tid)?;
            w.write_i64(stop)?;
            w.write_i32(pid)?;
        }
        Ok(())
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        let starts = TemporalMap::load(r)?;
        let count = r.read_u32()?;
        let mut stops = BTreeMap::new();
        for _ in 0..count {
            let tid = r.read_i32()?;
            let stop = r.read_i64()?;
            let pid = r.read_i32()?;
            stops.insert((tid, stop), pid);
        }
        Ok(ThreadTable { starts, stops })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{TapeReader, TapeWriter};

    #[test]
    fn test_start_then_lookup() {
        let mut table = ThreadTable::new();
        table.record_start(5, 10, 100);

        assert_eq!(table.lookup(5, 10), Some(100));
        assert_eq!(table.lookup(5, 1000), Some(100));
        // Before the start the thread did not exist yet.
        assert_eq!(table.lookup(5, 5), None);
    }

    #[test]
    fn test_tid_reuse_resolves_by_time() {
        let mut table = ThreadTable::new();
        table.record_start(5, 10, 100);
        table.record_start(5, 50, 200);

        assert_eq!(table.lookup(5, 30), Some(100));
        assert_eq!(table.lookup(5, 50), Some(200));
    }

    #[test]
    fn test_stop_fallback_for_overwritten_start() {
        let mut table = ThreadTable::new();
        // The ring buffer ate this thread's Start; all we ever see is the
        // Stop at t=50.
        table.record_stop(6, 50, 200);

        // Any query before the stop resolves through the fallback...
        assert_eq!(table.lookup(6, 30), Some(200));
        assert_eq!(table.lookup(6, 50), Some(200));
        // ...but after the stop the thread is gone and stays unknown.
        assert_eq!(table.lookup(6, 60), None);
    }

    #[test]
    fn test_stop_with_known_start_skips_fallback() {
        let mut table = ThreadTable::new();
        table.record_start(7, 10, 300);
        table.record_stop(7, 90, 300);

        assert_eq!(table.stop_fallback_count(), 0);
        assert_eq!(table.lookup(7, 40), Some(300));
    }

    #[test]
    fn test_fallback_picks_nearest_stop_at_or_after() {
        let mut table = ThreadTable::new();
        // Same tid stopped twice with a reuse in between, both Starts lost.
        table.record_stop(8, 40, 100);
        table.record_stop(8, 90, 200);

        assert_eq!(table.lookup(8, 20), Some(100));
        assert_eq!(table.lookup(8, 41), Some(200));
        assert_eq!(table.lookup(8, 95), None);
    }

    #[test]
    fn test_store_load_round_trip() {
        let mut table = ThreadTable::new();
        table.record_start(5, 10, 100);
        table.record_stop(6, 50, 200);

        let mut buf = Vec::new();
        table.store(&mut TapeWriter::new(&mut buf)).unwrap();
        let loaded = ThreadTable::load(&mut TapeReader::new(buf.as_slice())).unwrap();

        assert_eq!(loaded.lookup(5, 20), Some(100));
        assert_eq!(loaded.lookup(6, 30), Some(200));
        assert_eq!(loaded.lookup(6, 60), None);
    }
}
