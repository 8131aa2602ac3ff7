//! tracestitch - decode binary kernel trace streams and correlate identity
//! across records.
//!
//! A captured kernel trace is a flat sequence of versioned binary records,
//! and individually the records are almost useless: a disk completion names
//! its file by a numeric key, a lifetime record is logged on whatever thread
//! happened to do the work, and in a ring-buffer capture the record that
//! would explain an id may have been overwritten long before the stream
//! starts. The modules here decode the raw payloads and maintain the
//! point-in-time indexes that turn those references back into answers.
//!
//! # Modules
//!
//! - [`cursor`] - version- and pointer-width-aware payload field extraction
//! - [`temporal`] - append-only "value of K as of time T" map
//! - [`threads`] - thread-to-process ownership over time
//! - [`names`] - numeric-key to file/object-name resolution
//! - [`disk`] - queued-versus-service time split per disk
//! - [`paths`] - kernel-path to user-path translation
//! - [`fixup`] - ambient identity correction before dispatch
//! - [`registry`] - per-event-type subscriber multicast
//! - [`persist`] - index serialization between sessions
//! - [`source`] - replay reader/writer for captured streams
//! - [`events`] - layout tables for the well-known kernel record shapes
//! - [`session`] - the per-trace context that ties it all together

pub mod cursor;
pub mod disk;
pub mod events;
pub mod fixup;
pub mod names;
pub mod paths;
pub mod persist;
pub mod record;
pub mod registry;
pub mod session;
pub mod source;
pub mod temporal;
pub mod threads;

// Re-export the types almost every consumer touches.
pub use cursor::{DecodeError, FieldCursor, LayoutTable, VersionLayout};
pub use record::{EventKey, RawRecord, UNKNOWN_ID};
pub use session::{ReadView, SavedIndexes, SessionStats, TraceSession};
pub use temporal::{TemporalMap, TIME_BEGINNING};
