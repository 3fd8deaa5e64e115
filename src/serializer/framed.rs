//! serializer/framed: binary frame around an inner codec.
//!
//! Frame (12-byte header, little endian):
//! - [0..4)  = MAGIC "HKSN"
//! - [4..8)  = payload length u32
//! - [8..12) = CRC32C of payload
//! - [12..)  = payload produced by the inner serializer
//!
//! A torn tail (header or payload cut short) decodes as Ok(None); a bad magic
//! or CRC mismatch is an error.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};

use super::Serializer;
use crate::context::TransactionContext;

pub const FRAME_MAGIC: &[u8; 4] = b"HKSN";
pub const FRAME_HDR_SIZE: usize = 12;

const OFF_LEN: usize = 4;
const OFF_CRC: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct FramedSerializer<S> {
    inner: S,
}

impl<S: Serializer> FramedSerializer<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    fn frame(payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > u32::MAX as usize {
            return Err(anyhow!(
                "payload too large for frame: {} bytes (max {})",
                payload.len(),
                u32::MAX
            ));
        }
        let mut out = Vec::with_capacity(FRAME_HDR_SIZE + payload.len());
        out.extend_from_slice(FRAME_MAGIC);
        let mut tmp = [0u8; 4];
        LittleEndian::write_u32(&mut tmp, payload.len() as u32);
        out.extend_from_slice(&tmp);
        LittleEndian::write_u32(&mut tmp, crc32c::crc32c(payload));
        out.extend_from_slice(&tmp);
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Validate the frame at buf[0]; returns the payload slice and total length.
    fn unframe(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        // Частичный заголовок: хвост, не ошибка (магию проверим, если она уже есть)
        if buf.len() < FRAME_HDR_SIZE {
            let n = buf.len().min(FRAME_MAGIC.len());
            if buf[..n] != FRAME_MAGIC[..n] {
                return Err(anyhow!("bad frame magic"));
            }
            return Ok(None);
        }
        if &buf[..4] != FRAME_MAGIC {
            return Err(anyhow!("bad frame magic"));
        }
        let len = LittleEndian::read_u32(&buf[OFF_LEN..OFF_LEN + 4]) as usize;
        let total = FRAME_HDR_SIZE + len;
        if buf.len() < total {
            return Ok(None);
        }
        let payload = &buf[FRAME_HDR_SIZE..total];
        let stored = LittleEndian::read_u32(&buf[OFF_CRC..OFF_CRC + 4]);
        let calc = crc32c::crc32c(payload);
        if stored != calc {
            return Err(anyhow!(
                "frame CRC mismatch (stored={}, calc={})",
                stored,
                calc
            ));
        }
        Ok(Some((payload, total)))
    }
}

impl<S: Serializer> Serializer for FramedSerializer<S> {
    fn name(&self) -> &'static str {
        "framed"
    }

    fn serialize(&self, ctx: &TransactionContext) -> Result<Vec<u8>> {
        let payload = self.inner.serialize(ctx)?;
        Self::frame(&payload)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TransactionContext> {
        match Self::unframe(bytes)? {
            Some((payload, total)) if total == bytes.len() => self.inner.deserialize(payload),
            Some((_, total)) => Err(anyhow!(
                "trailing bytes after frame: {} of {}",
                bytes.len() - total,
                bytes.len()
            )),
            None => Err(anyhow!("truncated frame ({} bytes)", bytes.len())),
        }
    }

    fn decode_block(&self, buf: &[u8]) -> Result<Option<(TransactionContext, usize)>> {
        match Self::unframe(buf)? {
            Some((payload, total)) => {
                let ctx = self
                    .inner
                    .deserialize(payload)
                    .with_context(|| format!("{} frame payload", self.inner.name()))?;
                Ok(Some((ctx, total)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActivityId;
    use crate::serializer::JsonSerializer;

    fn sample() -> TransactionContext {
        TransactionContext::new(ActivityId::new("g", "9").unwrap(), serde_json::json!([1, 2]))
    }

    #[test]
    fn header_layout() {
        let s = FramedSerializer::new(JsonSerializer);
        let ctx = sample();
        let bytes = s.serialize(&ctx).unwrap();
        assert_eq!(&bytes[..4], FRAME_MAGIC);
        let len = LittleEndian::read_u32(&bytes[OFF_LEN..OFF_LEN + 4]) as usize;
        assert_eq!(len + FRAME_HDR_SIZE, bytes.len());
        assert_eq!(s.deserialize(&bytes).unwrap(), ctx);
    }

    #[test]
    fn crc_mismatch_detected() {
        let s = FramedSerializer::new(JsonSerializer);
        let mut bytes = s.serialize(&sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(s.decode_block(&bytes).is_err());
    }

    #[test]
    fn partial_tail_is_none() {
        let s = FramedSerializer::new(JsonSerializer);
        let bytes = s.serialize(&sample()).unwrap();
        assert!(s.decode_block(&bytes[..3]).unwrap().is_none());
        assert!(s.decode_block(&bytes[..FRAME_HDR_SIZE + 1]).unwrap().is_none());
        assert!(s.decode_block(b"XYZ").is_err());
        assert!(s.deserialize(&bytes[..bytes.len() - 1]).is_err());
    }
}
