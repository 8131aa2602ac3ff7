//! Serialization of correlation indexes between sessions.
//!
//! A processed trace can hand its indexes to a later session (a loaded
//! trace file keeps its thread and name history next to the event data).
//! The format is deliberately dumb: ordered little-endian primitives,
//! length-prefixed strings, and named length-prefixed regions so a reader
//! can carry a region around undecoded until somebody asks for it.

use std::cell::{Cell, OnceCell};
use std::io::{self, Read, Write};

use anyhow::{anyhow, Context, Result};

/// Ordered primitive writes. Everything higher level is layered on these.
pub struct TapeWriter<W: Write> {
    out: W,
}

impl<W: Write> TapeWriter<W> {
    pub fn new(out: W) -> Self {
        TapeWriter { out }
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.out.write_all(&[v])?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.out.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_u32(s.len() as u32)?;
        self.out.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Write a named, length-prefixed region. The body is buffered so the
    /// length is known up front and a reader can skip or defer it.
    pub fn write_region<F>(&mut self, name: &str, fill: F) -> Result<()>
    where
        F: FnOnce(&mut TapeWriter<&mut Vec<u8>>) -> Result<()>,
    {
        let mut buf = Vec::new();
        fill(&mut TapeWriter::new(&mut buf))?;
        self.write_str(name)?;
        self.write_u32(buf.len() as u32)?;
        self.out.write_all(&buf)?;
        Ok(())
    }
}

/// Ordered primitive reads mirroring [`TapeWriter`].
pub struct TapeReader<R: Read> {
    input: R,
}

impl<R: Read> TapeReader<R> {
    pub fn new(input: R) -> Self {
        TapeReader { input }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.input.read_exact(buf)?;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        String::from_utf8(buf).context("string is not valid utf-8")
    }

    /// Next named region, or `None` at a clean end of stream.
    pub fn next_region(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        let mut lenbuf = [0u8; 4];
        match self.input.read_exact(&mut lenbuf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("reading region name"),
        }
        let name_len = u32::from_le_bytes(lenbuf) as usize;
        let mut name = vec![0u8; name_len];
        self.fill(&mut name)?;
        let name = String::from_utf8(name).context("region name is not valid utf-8")?;
        let body_len = self.read_u32()? as usize;
        let mut body = vec![0u8; body_len];
        self.fill(&mut body)?;
        Ok(Some((name, body)))
    }
}

/// A value that knows how to write itself to and read itself back from a
/// tape, in the same field order.
pub trait Tape: Sized {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()>;
    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self>;
}

impl Tape for i32 {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        w.write_i32(*self)
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        r.read_i32()
    }
}

impl Tape for i64 {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        w.write_i64(*self)
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        r.read_i64()
    }
}

impl Tape for u32 {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        w.write_u32(*self)
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        r.read_u32()
    }
}

impl Tape for u64 {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        w.write_u64(*self)
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        r.read_u64()
    }
}

impl Tape for String {
    fn store<W: Write>(&self, w: &mut TapeWriter<W>) -> Result<()> {
        w.write_str(self)
    }

    fn load<R: Read>(r: &mut TapeReader<R>) -> Result<Self> {
        r.read_str()
    }
}

/// A named region held undecoded until first access.
///
/// Loading a processed trace should not pay for indexes nobody asks about,
/// so regions are kept as raw bytes and decoded once, on the first `get`.
/// Processing is single-threaded, and the decode blocks to completion.
pub struct LazyRegion<T> {
    raw: Cell<Option<Vec<u8>>>,
    value: OnceCell<T>,
}

impl<T: Tape> LazyRegion<T> {
    pub fn new(raw: Vec<u8>) -> Self {
        LazyRegion {
            raw: Cell::new(Some(raw)),
            value: OnceCell::new(),
        }
    }

    /// The decoded value, decoding on first access.
    pub fn get(&self) -> Result<&T> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let raw = self
            .raw
            .take()
            .ok_or_else(|| anyhow!("region was consumed by an earlier failed decode"))?;
        let value = T::load(&mut TapeReader::new(raw.as_slice()))?;
        Ok(self.value.get_or_init(|| value))
    }

    /// Whether the region has been decoded yet.
    pub fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }
}
