use anyhow::{Context, Result};

use super::Serializer;
use crate::context::TransactionContext;

/// Compact JSON. Each block is one top-level object, so concatenated blocks
/// split cleanly with a streaming deserializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, ctx: &TransactionContext) -> Result<Vec<u8>> {
        serde_json::to_vec(ctx).context("encode context as json")
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TransactionContext> {
        serde_json::from_slice(bytes).context("decode context from json")
    }

    fn decode_block(&self, buf: &[u8]) -> Result<Option<(TransactionContext, usize)>> {
        let mut stream =
            serde_json::Deserializer::from_slice(buf).into_iter::<TransactionContext>();
        match stream.next() {
            None => Ok(None),
            Some(Ok(ctx)) => Ok(Some((ctx, stream.byte_offset()))),
            // torn tail
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e).context("decode json block"),
        }
    }
}
