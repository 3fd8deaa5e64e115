//! Context codecs.
//!
//! The activity log stores no length header of its own: a log file is the
//! plain concatenation of `serialize` outputs. Every codec therefore has to be
//! self-framing, and exposes `decode_block` to split such a concatenation.
//!
//! - json.rs  : compact JSON objects (self-delimiting by syntax).
//! - framed.rs: [magic][len][crc32c] header around any inner codec.

use anyhow::Result;

use crate::context::TransactionContext;

pub mod framed;
pub mod json;

pub use framed::FramedSerializer;
pub use json::JsonSerializer;

pub trait Serializer: Send + Sync {
    /// Short codec name for logs.
    fn name(&self) -> &'static str;

    fn serialize(&self, ctx: &TransactionContext) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<TransactionContext>;

    /// Decode the block starting at `buf[0]`.
    ///
    /// - Ok(Some((ctx, consumed))): one block decoded, `consumed` bytes used.
    /// - Ok(None): nothing left, or only a partial tail.
    /// - Err: the bytes are not a valid block (corruption).
    fn decode_block(&self, buf: &[u8]) -> Result<Option<(TransactionContext, usize)>>;
}
