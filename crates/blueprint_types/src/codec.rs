// Codec - Primitive reader/writer for the binary graph format
//
// All integers and doubles are big-endian. Strings and blobs are prefixed with a
// 4-byte signed length. Every read is bounds-checked and reports the offset it
// failed at.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::DecodeError;

// ─────────────────────────────────────────────────────────────────────────────
// Reader
// ─────────────────────────────────────────────────────────────────────────────

/// Bounds-checked cursor over an immutable buffer
#[derive(Debug, Clone)]
pub struct Reader {
    buf: Bytes,
    total: usize,
}

impl Reader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        let buf = buf.into();
        let total = buf.len();
        Self { buf, total }
    }

    /// Offset of the next unread byte
    pub fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                offset: self.offset(),
                needed: needed - self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn f64(&mut self) -> Result<f64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    /// Read a non-negative `int` count or length
    pub fn count(&mut self) -> Result<usize, DecodeError> {
        let offset = self.offset();
        let length = self.i32()?;
        usize::try_from(length).map_err(|_| DecodeError::NegativeLength { offset, length })
    }

    /// Read a length-prefixed byte blob without copying
    pub fn blob(&mut self) -> Result<Bytes, DecodeError> {
        let length = self.count()?;
        self.ensure(length)?;
        Ok(self.buf.split_to(length))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn string(&mut self) -> Result<String, DecodeError> {
        let offset = self.offset();
        let raw = self.blob()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(offset))
    }

    /// Take the rest of the buffer
    pub fn rest(&mut self) -> Bytes {
        let n = self.buf.remaining();
        self.buf.split_to(n)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

/// Growable output buffer mirroring [`Reader`]
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Write a count or length as an `int`.
    ///
    /// Counts beyond `i32::MAX` cannot be represented by the format and are clamped.
    pub fn count(&mut self, n: usize) {
        self.buf.put_i32(i32::try_from(n).unwrap_or(i32::MAX));
    }

    pub fn blob(&mut self, data: &[u8]) {
        self.count(data.len());
        self.buf.put_slice(data);
    }

    pub fn string(&mut self, s: &str) {
        self.blob(s.as_bytes());
    }

    pub fn raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
