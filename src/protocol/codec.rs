//! Field-level encoding
//!
//! `FieldReader` walks a received frame and refuses to read past its end;
//! `FieldWriter` adds the string, blob and bool encodings to any `BufMut`.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Bounds-checked reader over one frame
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    /// Length-prefixed byte blob, borrowed from the frame
    pub fn read_blob(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(ProtocolError::NegativeLength(len));
        }
        let len = len as usize;
        self.ensure(len)?;

        let (blob, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(blob)
    }

    /// Length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_blob()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidString)
    }

    /// Value preceded by a presence flag
    pub fn read_optional<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Option<T>, ProtocolError> {
        if self.read_bool()? {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Relay field encodings on top of `BufMut`
pub trait FieldWriter: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn put_blob(&mut self, bytes: &[u8]) {
        self.put_i32_le(bytes.len() as i32);
        self.put_slice(bytes);
    }

    fn put_string(&mut self, value: &str) {
        self.put_blob(value.as_bytes());
    }
}

impl<B: BufMut> FieldWriter for B {}

/// Encoded size of a string field
pub fn string_len(value: &str) -> usize {
    4 + value.len()
}
