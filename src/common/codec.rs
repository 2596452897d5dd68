//! Checked big-endian primitives shared by every on-disk codec.
//!
//! `bytes::Buf` panics on short input, so every read goes through these
//! helpers which turn truncation into [`DbError::Corruption`].

use bytes::{Buf, BytesMut};

use super::{DbError, Result};

/// An object with a binary page/blob encoding.
pub trait Marshal: Sized {
    /// Exact number of bytes `marshal` will append.
    fn marshal_size(&self) -> usize;

    /// Appends the encoding to `buf`.
    fn marshal(&self, buf: &mut BytesMut);

    /// Decodes one object from the front of `buf`, advancing it.
    fn unmarshal(buf: &mut &[u8]) -> Result<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        self.marshal(&mut buf);
        buf.to_vec()
    }
}

fn ensure(buf: &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(DbError::corruption(format!(
            "truncated input: need {} bytes, have {}",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn get_bytes(buf: &mut &[u8], n: usize) -> Result<Vec<u8>> {
    ensure(buf, n)?;
    let out = buf[..n].to_vec();
    buf.advance(n);
    Ok(out)
}

pub fn get_string(buf: &mut &[u8], n: usize) -> Result<String> {
    let raw = get_bytes(buf, n)?;
    String::from_utf8(raw).map_err(|e| DbError::corruption(format!("invalid utf-8: {}", e)))
}
