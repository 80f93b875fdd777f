//! Low level framing helpers.
//!
//! Every established channel frames messages with the 6-byte mini
//! header. Outbound packets are always built as one contiguous buffer
//! (header plus payload) so a single `write_all` emits the whole thing
//! under the channel's send lock.

use crate::error::{Result, SpiceError};
use crate::protocol::SPICE_MINI_HEADER_SIZE;

/// Build a complete outbound packet: mini header followed by `payload`.
pub(crate) fn packet(msg_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SPICE_MINI_HEADER_SIZE + payload.len());
    append_packet(&mut buf, msg_type, payload);
    buf
}

/// Append a framed packet to an existing buffer. Used when several
/// packets must go out in one socket write, e.g. mouse motion bursts.
pub(crate) fn append_packet(buf: &mut Vec<u8>, msg_type: u16, payload: &[u8]) {
    buf.extend_from_slice(&msg_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
}

/// Build a packet whose header announces `extra` more payload bytes than
/// are present in `payload`; the remainder is written separately under
/// the same channel lock (record audio data, agent data carriers).
pub(crate) fn packet_with_extra(msg_type: u16, payload: &[u8], extra: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SPICE_MINI_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&msg_type.to_le_bytes());
    buf.extend_from_slice(&((payload.len() + extra) as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Cursor-style reader over a received payload. All multi-byte fields in
/// the SPICE protocol are little-endian.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(SpiceError::Protocol(format!(
                "payload truncated: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.buf.len()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Milliseconds on a monotonic clock, for the disconnecting packet.
pub(crate) fn monotonic_ms() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_prefixes_mini_header() {
        let p = packet(0x0071, &[1, 2, 3]);
        assert_eq!(p.len(), 9);
        assert_eq!(&p[0..2], &0x0071u16.to_le_bytes());
        assert_eq!(&p[2..6], &3u32.to_le_bytes());
        assert_eq!(&p[6..], &[1, 2, 3]);
    }

    #[test]
    fn packet_with_extra_announces_full_size() {
        let p = packet_with_extra(101, &[0xAA; 4], 16);
        assert_eq!(&p[2..6], &20u32.to_le_bytes());
        assert_eq!(p.len(), 10);
    }

    #[test]
    fn byte_reader_reads_le_fields() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0xFF];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        assert_eq!(r.read_u32().unwrap(), 0xFF050403);
        assert_eq!(r.remaining(), 0);
        assert!(r.read_u8().is_err());
    }
}
