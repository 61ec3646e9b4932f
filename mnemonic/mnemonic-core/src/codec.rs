//! Bounds-checked reads over big-endian byte buffers

use bytes::Buf;

use crate::error::{Error, Result};

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    /// `what` names the structure in truncation errors.
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn need(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(Error::corrupted(format!("truncated {}", self.what)));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// A `u32` length followed by UTF-8.
    pub(crate) fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        String::from_utf8(self.bytes(len)?.to_vec())
            .map_err(|_| Error::corrupted(format!("non UTF-8 text in {}", self.what)))
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }
}
