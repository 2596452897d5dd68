//! Length-prefixed framing: every message is a big-endian `u32` length
//! followed by that many payload bytes.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};

use crate::common::{DbError, Result};

/// Sentinel closing every response.
pub const END: &[u8] = b"END";

pub const AUTH_SUCCEED: &str = "Auth succeed";

const LEN_SIZE: usize = 4;

/// Writes one framed message. Does not flush.
pub fn write_message<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| DbError::ValueTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = BytesMut::with_capacity(LEN_SIZE + payload.len());
    frame.put_u32(len);
    frame.put_slice(payload);
    w.write_all(&frame)?;
    Ok(())
}

/// Reads one framed message. Returns `Ok(None)` when the peer closed the
/// connection between messages; a message longer than `max` is rejected
/// before its payload is read.
pub fn read_message<R: Read>(r: &mut R, max: usize) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; LEN_SIZE];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = (&header[..]).get_u32() as usize;
    if len > max {
        return Err(DbError::ValueTooLarge { size: len, max });
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Writes `rows` as data messages followed by `END`, then flushes.
pub fn write_response<W, I>(w: &mut W, rows: I) -> Result<()>
where
    W: Write,
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    for row in rows {
        write_message(w, row.as_ref())?;
    }
    write_message(w, END)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_framing() {
        let mut buf = Vec::new();
        write_response(&mut buf, ["[1,\"a\"]", "[2,\"b\"]"]).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 7]);

        let mut r = Cursor::new(buf);
        assert_eq!(read_message(&mut r, 64).unwrap().unwrap(), b"[1,\"a\"]");
        assert_eq!(read_message(&mut r, 64).unwrap().unwrap(), b"[2,\"b\"]");
        assert_eq!(read_message(&mut r, 64).unwrap().unwrap(), END);
        assert!(read_message(&mut r, 64).unwrap().is_none());
    }

    #[test]
    fn test_limits() {
        let mut buf = Vec::new();
        write_message(&mut buf, &[7u8; 100]).unwrap();
        assert!(matches!(
            read_message(&mut Cursor::new(buf.clone()), 99),
            Err(DbError::ValueTooLarge { size: 100, max: 99 })
        ));

        buf.truncate(50);
        assert!(matches!(
            read_message(&mut Cursor::new(buf), 1000),
            Err(DbError::Io(_))
        ));
    }
}
