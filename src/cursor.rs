//! Offset-based field extraction from schema-less record payloads.
//!
//! Kernel trace payloads carry no per-field metadata. Every field lives at an
//! offset that depends on the record's declared version and on the pointer
//! width of the captured process: address-typed fields are 4 bytes in a
//! record captured from a 32-bit process and 8 bytes from a 64-bit one, while
//! every other scalar keeps its size. [`FieldCursor`] does the width-aware
//! offset arithmetic and scalar/string reads; [`LayoutTable`] checks a
//! record's declared length against the lengths its version is known to have
//! before any field is trusted.

use thiserror::Error;

/// A single record failed to decode. Fatal for that record only, the stream
/// keeps going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{shape} v{version}: payload is {actual} bytes, layout requires {expected}")]
    Corrupt {
        shape: &'static str,
        version: u8,
        expected: usize,
        actual: usize,
    },
}

/// Read-only view over one record's payload bytes.
pub struct FieldCursor<'a> {
    data: &'a [u8],
    pointer_width: u8,
}

impl<'a> FieldCursor<'a> {
    pub fn new(data: &'a [u8], pointer_width: u8) -> Self {
        debug_assert!(pointer_width == 4 || pointer_width == 8);
        FieldCursor {
            data,
            pointer_width,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pointer_width(&self) -> u8 {
        self.pointer_width
    }

    /// Fixed-size read backing the scalar accessors. A read past the end of
    /// the payload yields zeroes, so a short (corrupt) record decodes its
    /// in-range fields and nothing else.
    fn fixed<const N: usize>(&self, offset: usize) -> [u8; N] {
        match offset
            .checked_add(N)
            .and_then(|end| self.data.get(offset..end))
        {
            Some(bytes) => bytes.try_into().unwrap(),
            None => {
                debug_assert!(
                    false,
                    "read of {} bytes at offset {} past payload end ({} bytes)",
                    N,
                    offset,
                    self.data.len()
                );
                [0; N]
            }
        }
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.fixed::<1>(offset)[0]
    }

    pub fn read_i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.fixed(offset))
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.fixed(offset))
    }

    pub fn read_i64(&self, offset: usize) -> i64 {
        i64::from_le_bytes(self.fixed(offset))
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.fixed(offset))
    }

    /// Address-typed field: 4 bytes on a 32-bit capture, 8 on 64-bit,
    /// widened to u64 either way.
    pub fn read_address(&self, offset: usize) -> u64 {
        if self.pointer_width == 8 {
            self.read_u64(offset)
        } else {
            self.read_u32(offset) as u64
        }
    }

    /// Offset of a field that sits after `preceding_pointer_fields`
    /// address-typed fields. Layout tables record offsets as captured from a
    /// 32-bit process; each preceding pointer grows by 4 bytes on a 64-bit
    /// capture.
    pub fn host_offset(&self, fixed_offset: usize, preceding_pointer_fields: usize) -> usize {
        fixed_offset + preceding_pointer_fields * (self.pointer_width as usize - 4)
    }

    /// Null-terminated UTF-16 string starting at `offset`. Returns the value
    /// and the bytes consumed including the terminator. Strings are not
    /// length-prefixed, so the caller needs the consumed length to know
    /// where the next field starts. An unterminated string consumes to the
    /// end of the payload.
    pub fn read_utf16_string(&self, offset: usize) -> (String, usize) {
        let mut units = Vec::new();
        let mut pos = offset;
        loop {
            if pos + 2 > self.data.len() {
                let consumed = self.data.len().saturating_sub(offset);
                return (String::from_utf16_lossy(&units), consumed);
            }
            let unit = u16::from_le_bytes([self.data[pos], self.data[pos + 1]]);
            pos += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        (String::from_utf16_lossy(&units), pos - offset)
    }

    /// Null-terminated UTF-8 (ANSI) string starting at `offset`. Same
    /// consumed-length contract as [`read_utf16_string`].
    ///
    /// [`read_utf16_string`]: FieldCursor::read_utf16_string
    pub fn read_utf8_string(&self, offset: usize) -> (String, usize) {
        let rest = match self.data.get(offset..) {
            Some(rest) => rest,
            None => return (String::new(), 0),
        };
        match rest.iter().position(|&b| b == 0) {
            Some(end) => (
                String::from_utf8_lossy(&rest[..end]).into_owned(),
                end + 1,
            ),
            None => (String::from_utf8_lossy(rest).into_owned(), rest.len()),
        }
    }

    /// Fixed-size UTF-16 field of `max_bytes` bytes, null-padded. Unlike the
    /// variable readers this never consumes past the field.
    pub fn read_fixed_utf16(&self, offset: usize, max_bytes: usize) -> String {
        let field = match offset
            .checked_add(max_bytes)
            .and_then(|end| self.data.get(offset..end))
        {
            Some(field) => field,
            None => return String::new(),
        };
        let mut units = Vec::with_capacity(max_bytes / 2);
        for pair in field.chunks_exact(2) {
            let unit = u16::from_le_bytes([pair[0], pair[1]]);
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16_lossy(&units)
    }
}

/// One known `(version, layout)` pair for a record shape.
pub struct VersionLayout {
    pub version: u8,
    /// Payload length as captured from a 32-bit process.
    pub len32: usize,
    /// Address-typed fields in the fixed portion; each grows by 4 bytes on a
    /// 64-bit capture.
    pub pointer_fields: usize,
    /// The layout ends in variable-length string fields, so `len32` is a
    /// minimum rather than an exact size.
    pub variable_tail: bool,
}

/// Per-shape table of the payload lengths each version is known to have.
pub struct LayoutTable {
    shape: &'static str,
    versions: &'static [VersionLayout],
}

impl LayoutTable {
    pub const fn new(shape: &'static str, versions: &'static [VersionLayout]) -> Self {
        LayoutTable { shape, versions }
    }

    fn expected(&self, layout: &VersionLayout, pointer_width: u8) -> usize {
        layout.len32 + layout.pointer_fields * (pointer_width as usize - 4)
    }

    /// Gate a record before any field read. A known version must match its
    /// recorded length exactly (or meet it, for string-tailed shapes). An
    /// unrecognized newer version passes if it is at least as large as the
    /// newest layout we know, on the assumption that newer layouts only
    /// append fields. Anything else would put every later field offset in
    /// the wrong place, so the record is rejected outright.
    pub fn validate(
        &self,
        version: u8,
        pointer_width: u8,
        declared_len: usize,
    ) -> Result<(), DecodeError> {
        if let Some(layout) = self.versions.iter().find(|l| l.version == version) {
            let expected = self.expected(layout, pointer_width);
            let ok = if layout.variable_tail {
                declared_len >= expected
            } else {
                declared_len == expected
            };
            if ok {
                return Ok(());
            }
            return Err(DecodeError::Corrupt {
                shape: self.shape,
                version,
                expected,
                actual: declared_len,
            });
        }
        let newest = self
            .versions
            .iter()
            .map(|l| self.expected(l, pointer_width))
            .max()
            .unwrap_or(0);
        if declared_len >= newest {
            return Ok(());
        }
        Err(DecodeError::Corrupt {
            shape: self.shape,
            version,
            expected: newest,
            actual: declared_len,
        })
    }
}
