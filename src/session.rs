//! The per-trace processing context.
//!
//! One `TraceSession` is constructed per processed stream and owns every
//! piece of correlation state: there are no globals, and nothing outlives
//! the session unless it is explicitly serialized at the end. Processing is
//! single-threaded and single-pass; record N+1 is never touched before
//! record N's dispatch has returned, so no index is ever mutated
//! concurrently and subscribers always see every index consistent up to the
//! current record's timestamp.

use std::io::{Read, Write};

use anyhow::{bail, Result};

use crate::cursor::DecodeError;
use crate::disk::DiskServiceTimes;
use crate::events;
use crate::fixup::FixupPipeline;
use crate::names::NameTable;
use crate::paths::PathMapper;
use crate::persist::{LazyRegion, Tape, TapeReader, TapeWriter};
use crate::record::{RawRecord, UNKNOWN_ID};
use crate::registry::EventRegistry;
use crate::threads::ThreadTable;

/// Read-only window over the session handed to subscribers during dispatch.
pub struct ReadView<'a> {
    pub threads: &'a ThreadTable,
    pub names: &'a NameTable,
    pub paths: &'a PathMapper,
    pub disks: &'a DiskServiceTimes,
    /// Service-time estimate for disk completion records, `None` for
    /// everything else.
    pub disk_service_msec: Option<f64>,
}

#[derive(Default, Clone, Debug)]
pub struct SessionStats {
    pub records: u64,
    pub corrupt: u64,
    pub unknown_process: u64,
}

pub struct TraceSession {
    pub threads: ThreadTable,
    pub names: NameTable,
    pub disks: DiskServiceTimes,
    pub paths: PathMapper,
    pub registry: EventRegistry,
    fixups: FixupPipeline,
    qpc_frequency: u64,
    stats: SessionStats,
}

impl TraceSession {
    pub fn new(qpc_frequency: u64) -> Self {
        let mut fixups = FixupPipeline::new();
        events::install_kernel_fixups(&mut fixups);
        TraceSession {
            threads: ThreadTable::new(),
            names: NameTable::new(),
            disks: DiskServiceTimes::new(),
            paths: PathMapper::new(),
            registry: EventRegistry::new(),
            fixups,
            qpc_frequency,
            stats: SessionStats::default(),
        }
    }

    /// A session for pass-through re-emission: records are still decoded
    /// and the indexes still built, but no record is rewritten, so the
    /// relogged stream carries the original identity bytes.
    pub fn new_passthrough(qpc_frequency: u64) -> Self {
        let mut session = Self::new(qpc_frequency);
        session.fixups.set_passthrough(true);
        session
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn qpc_to_msec(&self, ticks: i64) -> f64 {
        ticks as f64 * 1000.0 / self.qpc_frequency as f64
    }

    /// Run one record through the pipeline: correlator bookkeeping, then
    /// identity fixup, then dispatch. All state mutation happens before the
    /// first subscriber sees the record.
    pub fn process(&mut self, rec: &mut RawRecord) {
        self.stats.records += 1;
        let disk_service_msec = match self.bookkeep(rec) {
            Ok(service) => service,
            Err(err) => {
                // A record whose length contradicts its declared version
                // would misdecode every later field offset; drop it rather
                // than guess.
                log::warn!("dropping corrupt record: {err}");
                self.stats.corrupt += 1;
                return;
            }
        };
        self.fixups.apply(rec, &self.threads);
        if rec.process_id == UNKNOWN_ID {
            self.stats.unknown_process += 1;
        }
        let view = ReadView {
            threads: &self.threads,
            names: &self.names,
            paths: &self.paths,
            disks: &self.disks,
            disk_service_msec,
        };
        self.registry.dispatch(rec, &view);
    }

    /// Feed the correlation indexes from the well-known shapes.
    fn bookkeep(&mut self, rec: &RawRecord) -> Result<Option<f64>, DecodeError> {
        let time = rec.timestamp;
        match rec.key() {
            events::THREAD_START | events::THREAD_DC_START => {
                let t = events::decode_thread(rec)?;
                self.threads.record_start(t.thread_id, time, t.process_id);
            }
            events::THREAD_STOP | events::THREAD_DC_STOP => {
                let t = events::decode_thread(rec)?;
                self.threads.record_stop(t.thread_id, time, t.process_id);
            }
            events::FILE_NAME | events::FILE_RUNDOWN => {
                let f = events::decode_file_name(rec)?;
                self.names.add(f.file_key, time, f.name, true);
            }
            events::FILE_CREATE => {
                let f = events::decode_file_name(rec)?;
                self.names.add(f.file_key, time, f.name, false);
            }
            events::FILE_DELETE => {
                let f = events::decode_file_name(rec)?;
                self.names.remove(f.file_key, time);
            }
            events::DISK_READ | events::DISK_WRITE => {
                let d = events::decode_disk_io(rec)?;
                let completion = self.qpc_to_msec(time);
                let elapsed = self.qpc_to_msec(d.elapsed_qpc as i64);
                let service = self.disks.service_time(d.disk_number, completion, elapsed);
                self.disks.record_completion(d.disk_number, completion);
                return Ok(Some(service));
            }
            events::VOLUME_MAPPING => {
                let m = events::decode_volume_mapping(rec)?;
                if let Err(err) = self.paths.add_trace_rule(&m.kernel_path, &m.user_path) {
                    log::warn!("ignoring volume mapping {}: {err}", m.kernel_path);
                }
            }
            events::SYSTEM_PATHS => {
                let p = events::decode_system_paths(rec)?;
                if let Some(drive) = p
                    .system_directory
                    .split('\\')
                    .find(|part| !part.is_empty())
                    .filter(|part| part.ends_with(':'))
                {
                    self.paths.set_system_drive(drive);
                }
            }
            _ => {}
        }
        Ok(None)
    }

    /// Serialize the correlation indexes at end of processing so a later
    /// session over the same trace can answer lookups without replaying.
    pub fn store_indexes<W: Write>(&self, out: W) -> Result<()> {
        let mut w = TapeWriter::new(out);
        w.write_region("threads", |w| self.threads.store(w))?;
        w.write_region("names", |w| self.names.store(w))?;
        Ok(())
    }

    pub fn load_indexes<R: Read>(input: R) -> Result<SavedIndexes> {
        let mut r = TapeReader::new(input);
        let mut threads = None;
        let mut names = None;
        while let Some((name, body)) = r.next_region()? {
            match name.as_str() {
                "threads" => threads = Some(LazyRegion::new(body)),
                "names" => names = Some(LazyRegion::new(body)),
                other => bail!("unknown index region {other:?}"),
            }
        }
        let (Some(threads), Some(names)) = (threads, names) else {
            bail!("index file is missing a region");
        };
        Ok(SavedIndexes { threads, names })
    }
}

/// Correlation indexes reloaded from a previous session. Each region stays
/// undecoded until first access.
pub struct SavedIndexes {
    pub threads: LazyRegion<ThreadTable>,
    pub names: LazyRegion<NameTable>,
}
