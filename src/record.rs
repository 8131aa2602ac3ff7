//! The transient envelope every decoded event flows through.

use crate::cursor::FieldCursor;

/// Ambient identity value meaning "the capture did not say".
pub const UNKNOWN_ID: i32 = -1;

/// Identity of one physical event type on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EventKey {
    pub provider: u64,
    pub task: u16,
    pub opcode: u8,
}

impl EventKey {
    pub const fn new(provider: u64, task: u16, opcode: u8) -> Self {
        EventKey {
            provider,
            task,
            opcode,
        }
    }
}

/// One record as delivered by the capture source.
///
/// Lives exactly as long as its trip through the session: correlator
/// bookkeeping, fixup, dispatch, gone. Nothing may hold on to it past
/// dispatch.
#[derive(Clone, Debug)]
pub struct RawRecord {
    pub provider: u64,
    pub task: u16,
    pub opcode: u8,
    pub version: u8,
    /// Pointer width of the captured process: 4 or 8.
    pub pointer_width: u8,
    /// QPC tick the event fired at. Non-decreasing across the stream.
    pub timestamp: i64,
    /// Ambient thread the capture attributed the event to. The fixup stage
    /// may overwrite this with an identity decoded from the payload.
    pub thread_id: i32,
    pub process_id: i32,
    /// For start-type shapes: the thread that reported the event, kept when
    /// fixup reassigns the primary identity to the started entity.
    pub reporter_thread_id: Option<i32>,
    pub reporter_process_id: Option<i32>,
    pub payload: Vec<u8>,
}

impl RawRecord {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.provider, self.task, self.opcode)
    }

    pub fn cursor(&self) -> FieldCursor<'_> {
        FieldCursor::new(&self.payload, self.pointer_width)
    }
}
