//! Ambient identity correction, run once per record before dispatch.
//!
//! Plenty of record shapes do not self-report the identity a consumer
//! should attribute them to: a thread Start is logged on the *creating*
//! thread, a stop carries the dying thread only in its payload. The fixup
//! stage rewrites the ambient thread/process fields from the payload before
//! anybody sees the record, so every subscriber gets the same corrected
//! view without knowing shape internals.

use std::collections::HashMap;

use crate::record::{EventKey, RawRecord, UNKNOWN_ID};
use crate::threads::ThreadTable;

/// Offset rule for an identity field in a payload: the 32-bit fixed offset
/// plus the number of address-typed fields ahead of it.
#[derive(Clone, Copy, Debug)]
pub struct FieldRule {
    pub offset: usize,
    pub preceding_pointers: usize,
}

impl FieldRule {
    pub const fn at(offset: usize) -> Self {
        FieldRule {
            offset,
            preceding_pointers: 0,
        }
    }

    pub const fn after_pointers(offset: usize, preceding_pointers: usize) -> Self {
        FieldRule {
            offset,
            preceding_pointers,
        }
    }
}

/// What a shape needs done to its ambient identity.
pub enum IdentityFixup {
    /// The ambient identity is already right; at most an unknown process is
    /// filled in from the thread table.
    Ambient,
    /// The true identity is in the payload; adopt it.
    Payload {
        thread: Option<FieldRule>,
        process: Option<FieldRule>,
    },
    /// Start-type shape: the ambient identity is the *reporter* (whoever did
    /// the starting). Keep it aside, then adopt the started entity's
    /// identity from the payload so both remain available.
    PayloadPreservingReporter {
        thread: Option<FieldRule>,
        process: Option<FieldRule>,
    },
}

#[derive(Default)]
pub struct FixupPipeline {
    shapes: HashMap<EventKey, IdentityFixup>,
    passthrough: bool,
}

impl FixupPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: EventKey, fixup: IdentityFixup) {
        self.shapes.insert(key, fixup);
    }

    /// Pass-through mode for relogging consumers: a re-emitted stream must
    /// carry the original identity bytes, so no rewriting happens at all.
    pub fn set_passthrough(&mut self, passthrough: bool) {
        self.passthrough = passthrough;
    }

    pub fn passthrough(&self) -> bool {
        self.passthrough
    }

    /// Correct `rec`'s ambient identity. Runs once per record before
    /// dispatch; every step checks before it writes, so running it again is
    /// a no-op.
    pub fn apply(&self, rec: &mut RawRecord, threads: &ThreadTable) {
        if self.passthrough {
            return;
        }
        match self.shapes.get(&rec.key()) {
            Some(IdentityFixup::Payload { thread, process }) => {
                adopt(rec, *thread, *process);
            }
            Some(IdentityFixup::PayloadPreservingReporter { thread, process }) => {
                if rec.reporter_thread_id.is_none() && rec.reporter_process_id.is_none() {
                    rec.reporter_thread_id = Some(rec.thread_id);
                    rec.reporter_process_id = Some(rec.process_id);
                }
                adopt(rec, *thread, *process);
            }
            Some(IdentityFixup::Ambient) | None => {}
        }
        if rec.process_id == UNKNOWN_ID && rec.thread_id != UNKNOWN_ID {
            if let Some(pid) = threads.lookup(rec.thread_id, rec.timestamp) {
                rec.process_id = pid;
            }
        }
    }
}

fn adopt(rec: &mut RawRecord, thread: Option<FieldRule>, process: Option<FieldRule>) {
    let (tid, pid) = {
        let c = rec.cursor();
        (
            thread.map(|f| c.read_i32(c.host_offset(f.offset, f.preceding_pointers))),
            process.map(|f| c.read_i32(c.host_offset(f.offset, f.preceding_pointers))),
        )
    };
    if let Some(tid) = tid {
        rec.thread_id = tid;
    }
    if let Some(pid) = pid {
        rec.process_id = pid;
    }
}
