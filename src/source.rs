//! Replay container for captured record streams.
//!
//! The capture side lives elsewhere; what reaches this crate is its output,
//! a flat file of length-prefixed records behind a small fixed header. The
//! reader hands out [`RawRecord`]s one at a time, the writer produces the
//! same format for tests and for relogged output.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::mem;
use std::path::Path;

use anyhow::{bail, Context, Result};
use plain::Plain;

use crate::record::RawRecord;

const MAGIC: [u8; 8] = *b"TSTITCH\0";
const FORMAT_VERSION: u16 = 1;

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
struct FileHeader {
    magic: [u8; 8],
    format_version: u16,
    pointer_width: u8,
    _pad: [u8; 5],
    /// QPC ticks per second for every timestamp in the file.
    qpc_frequency: u64,
}

unsafe impl Plain for FileHeader {}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
struct RecordHeader {
    provider: u64,
    timestamp: i64,
    task: u16,
    opcode: u8,
    version: u8,
    thread_id: i32,
    process_id: i32,
    payload_len: u32,
}

unsafe impl Plain for RecordHeader {}

pub struct TraceReader<R: Read> {
    input: R,
    pointer_width: u8,
    qpc_frequency: u64,
}

impl TraceReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("opening trace {}", path.as_ref().display()))?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(mut input: R) -> Result<Self> {
        let mut buf = [0u8; mem::size_of::<FileHeader>()];
        input.read_exact(&mut buf).context("reading trace header")?;
        let mut header = FileHeader::default();
        plain::copy_from_bytes(&mut header, &buf).expect("buffer sized to header");
        if header.magic != MAGIC {
            bail!("not a trace file (bad magic)");
        }
        if header.format_version != FORMAT_VERSION {
            bail!("unsupported trace format version {}", header.format_version);
        }
        if header.pointer_width != 4 && header.pointer_width != 8 {
            bail!("trace declares pointer width {}", header.pointer_width);
        }
        if header.qpc_frequency == 0 {
            bail!("trace declares a zero timestamp frequency");
        }
        Ok(TraceReader {
            input,
            pointer_width: header.pointer_width,
            qpc_frequency: header.qpc_frequency,
        })
    }

    pub fn pointer_width(&self) -> u8 {
        self.pointer_width
    }

    pub fn qpc_frequency(&self) -> u64 {
        self.qpc_frequency
    }

    /// Next record, or `None` at a clean end of stream. A stream that ends
    /// mid-record is an error, not an end.
    pub fn next_record(&mut self) -> Result<Option<RawRecord>> {
        let mut first = [0u8; 1];
        match self.input.read_exact(&mut first) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("reading record header"),
        }
        let mut buf = [0u8; mem::size_of::<RecordHeader>()];
        buf[0] = first[0];
        self.input
            .read_exact(&mut buf[1..])
            .context("truncated record header")?;
        let mut header = RecordHeader::default();
        plain::copy_from_bytes(&mut header, &buf).expect("buffer sized to header");

        let mut payload = vec![0u8; header.payload_len as usize];
        self.input
            .read_exact(&mut payload)
            .context("truncated record payload")?;
        Ok(Some(RawRecord {
            provider: header.provider,
            task: header.task,
            opcode: header.opcode,
            version: header.version,
            pointer_width: self.pointer_width,
            timestamp: header.timestamp,
            thread_id: header.thread_id,
            process_id: header.process_id,
            reporter_thread_id: None,
            reporter_process_id: None,
            payload,
        }))
    }
}

pub struct TraceWriter<W: Write> {
    out: W,
}

impl TraceWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, pointer_width: u8, qpc_frequency: u64) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("creating trace {}", path.as_ref().display()))?;
        Self::new(BufWriter::new(file), pointer_width, qpc_frequency)
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(mut out: W, pointer_width: u8, qpc_frequency: u64) -> Result<Self> {
        out.write_all(&MAGIC)?;
        out.write_all(&FORMAT_VERSION.to_ne_bytes())?;
        out.write_all(&[pointer_width])?;
        out.write_all(&[0u8; 5])?;
        out.write_all(&qpc_frequency.to_ne_bytes())?;
        Ok(TraceWriter { out })
    }

    pub fn write_record(&mut self, rec: &RawRecord) -> Result<()> {
        self.out.write_all(&rec.provider.to_ne_bytes())?;
        self.out.write_all(&rec.timestamp.to_ne_bytes())?;
        self.out.write_all(&rec.task.to_ne_bytes())?;
        self.out.write_all(&[rec.opcode, rec.version])?;
        self.out.write_all(&rec.thread_id.to_ne_bytes())?;
        self.out.write_all(&rec.process_id.to_ne_bytes())?;
        self.out.write_all(&(rec.payload.len() as u32).to_ne_bytes())?;
        self.out.write_all(&rec.payload)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UNKNOWN_ID;

    fn sample_record(timestamp: i64) -> RawRecord {
        RawRecord {
            provider: 0xabcd,
            task: 7,
            opcode: 1,
            version: 2,
            pointer_width: 8,
            timestamp,
            thread_id: 42,
            process_id: UNKNOWN_ID,
            reporter_thread_id: None,
            reporter_process_id: None,
            payload: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut buf = Vec::new();
        let mut writer = TraceWriter::new(&mut buf, 8, 10_000_000).unwrap();
        writer.write_record(&sample_record(100)).unwrap();
        writer.write_record(&sample_record(200)).unwrap();
        writer.finish().unwrap();

        let mut reader = TraceReader::new(buf.as_slice()).unwrap();
        assert_eq!(reader.pointer_width(), 8);
        assert_eq!(reader.qpc_frequency(), 10_000_000);

        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.provider, 0xabcd);
        assert_eq!(rec.task, 7);
        assert_eq!(rec.timestamp, 100);
        assert_eq!(rec.thread_id, 42);
        assert_eq!(rec.process_id, UNKNOWN_ID);
        assert_eq!(rec.payload, vec![1, 2, 3, 4, 5]);

        let rec = reader.next_record().unwrap().unwrap();
        assert_eq!(rec.timestamp, 200);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let buf = vec![0u8; 64];
        assert!(TraceReader::new(buf.as_slice()).is_err());
    }

    #[test]
    fn test_truncated_record_is_an_error_not_an_end() {
        let mut buf = Vec::new();
        let mut writer = TraceWriter::new(&mut buf, 8, 10_000_000).unwrap();
        writer.write_record(&sample_record(100)).unwrap();
        writer.finish().unwrap();
        buf.truncate(buf.len() - 2);

        let mut reader = TraceReader::new(buf.as_slice()).unwrap();
        assert!(reader.next_record().is_err());
    }
}
