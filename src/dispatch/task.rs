use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};

use super::handle::CancelToken;
use crate::context::TransactionContext;
use crate::error::{ActionFailure, ActionStage, Interrupted, TryError};
use crate::serializer::Serializer;

/// Opaque remote call. Returns the participant's encoded reply.
pub type RemoteCall = Box<dyn FnOnce(&CancelToken) -> Result<Vec<u8>> + Send + 'static>;

/// Description of one participant call: operation name plus the call itself.
pub struct Invocation {
    operation: String,
    call: RemoteCall,
}

impl Invocation {
    pub fn new<F>(operation: impl Into<String>, call: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<Vec<u8>> + Send + 'static,
    {
        Self {
            operation: operation.into(),
            call: Box::new(call),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Run the call on the current thread.
    pub fn invoke(self, token: &CancelToken) -> Result<Vec<u8>> {
        (self.call)(token)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

/// "Invoke Try, decode the reply into a context, or fail". Consumed by `run`.
pub struct TryTask {
    invocation: Invocation,
    decoder: Arc<dyn Serializer>,
}

impl TryTask {
    pub fn new(invocation: Invocation, decoder: Arc<dyn Serializer>) -> Self {
        Self {
            invocation,
            decoder,
        }
    }

    pub fn operation(&self) -> &str {
        self.invocation.operation()
    }

    pub fn run(self, token: &CancelToken) -> Result<TransactionContext, TryError> {
        let operation = self.invocation.operation.clone();
        info!("Try request: {}", operation);

        let reply = self
            .invocation
            .invoke(token)
            .map_err(|e| classify(&operation, ActionStage::Invoke, e))?;

        let ctx = self
            .decoder
            .deserialize(&reply)
            .map_err(|e| classify(&operation, ActionStage::Decode, e))?;
        debug!(
            "Try reply: {} -> activity {} ({} bytes, {})",
            operation,
            ctx.activity_id(),
            reply.len(),
            self.decoder.name()
        );
        Ok(ctx)
    }
}

impl fmt::Debug for TryTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryTask")
            .field("operation", &self.invocation.operation)
            .field("decoder", &self.decoder.name())
            .finish()
    }
}

// A task that bailed out at a checkpoint was cancelled, not failed.
fn classify(operation: &str, stage: ActionStage, e: anyhow::Error) -> TryError {
    if e.downcast_ref::<Interrupted>().is_some() {
        TryError::Cancelled {
            operation: operation.to_string(),
        }
    } else {
        ActionFailure::new(operation, stage, &e).into()
    }
}
