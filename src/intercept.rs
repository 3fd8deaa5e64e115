//! Explicit interception chain around a participant call.
//!
//! A `Pipeline` runs its `Middleware` layers in order; each layer gets the
//! `Call` and a `Next` it may forward to. When no layer is left the call is
//! executed inline on the caller's thread.
//!
//! Typical Try chain: `SnapshotLayer` (persist context, forward) →
//! `TryDispatchLayer` (submit to the pool, stop).

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use log::debug;

use crate::context::TransactionContext;
use crate::dispatch::{CancelToken, Invocation, TryDispatcher, TryHandle, TryTask};
use crate::logger::ActivityLogger;
use crate::serializer::Serializer;

/// One participant call travelling through the chain.
pub struct Call {
    pub ctx: TransactionContext,
    pub invocation: Invocation,
}

impl Call {
    pub fn new(ctx: TransactionContext, invocation: Invocation) -> Self {
        Self { ctx, invocation }
    }
}

pub enum Outcome {
    /// Handed to the worker pool.
    Dispatched(TryHandle),
    /// Executed inline; the participant's raw reply.
    Replied(Vec<u8>),
}

impl Outcome {
    pub fn handle(&self) -> Option<&TryHandle> {
        match self {
            Outcome::Dispatched(h) => Some(h),
            Outcome::Replied(_) => None,
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Dispatched(h) => f.debug_tuple("Dispatched").field(h).finish(),
            Outcome::Replied(b) => write!(f, "Replied({} bytes)", b.len()),
        }
    }
}

pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;
    fn handle(&self, call: Call, next: Next<'_>) -> Result<Outcome>;
}

/// The remainder of the chain after the current layer.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub fn run(self, call: Call) -> Result<Outcome> {
        match self.rest.split_first() {
            Some((layer, rest)) => {
                debug!("intercept: {} -> {}", call.invocation.operation(), layer.name());
                layer.handle(call, Next { rest })
            }
            None => {
                let reply = call.invocation.invoke(&CancelToken::new())?;
                Ok(Outcome::Replied(reply))
            }
        }
    }
}

#[derive(Default, Clone)]
pub struct Pipeline {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, m: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(m));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn run(&self, call: Call) -> Result<Outcome> {
        Next { rest: &self.layers }.run(call)
    }
}

/// Snapshot the context, then forward. Snapshot failures never stop the call.
pub struct SnapshotLayer {
    logger: Arc<ActivityLogger>,
}

impl SnapshotLayer {
    pub fn new(logger: Arc<ActivityLogger>) -> Self {
        Self { logger }
    }
}

impl Middleware for SnapshotLayer {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn handle(&self, mut call: Call, next: Next<'_>) -> Result<Outcome> {
        self.logger.persist(&mut call.ctx);
        next.run(call)
    }
}

/// Terminal layer: submit the invocation as a Try task.
pub struct TryDispatchLayer {
    dispatcher: Arc<TryDispatcher>,
    decoder: Arc<dyn Serializer>,
}

impl TryDispatchLayer {
    pub fn new(dispatcher: Arc<TryDispatcher>, decoder: Arc<dyn Serializer>) -> Self {
        Self {
            dispatcher,
            decoder,
        }
    }
}

impl Middleware for TryDispatchLayer {
    fn name(&self) -> &'static str {
        "try-dispatch"
    }

    fn handle(&self, call: Call, _next: Next<'_>) -> Result<Outcome> {
        let task = TryTask::new(call.invocation, self.decoder.clone());
        let handle = self.dispatcher.submit(task)?;
        Ok(Outcome::Dispatched(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActivityId;
    use std::sync::Mutex;

    struct Trace {
        tag: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Trace {
        fn name(&self) -> &'static str {
            self.tag
        }
        fn handle(&self, call: Call, next: Next<'_>) -> Result<Outcome> {
            self.seen.lock().unwrap().push(self.tag);
            next.run(call)
        }
    }

    struct Stop;

    impl Middleware for Stop {
        fn name(&self) -> &'static str {
            "stop"
        }
        fn handle(&self, _call: Call, _next: Next<'_>) -> Result<Outcome> {
            Ok(Outcome::Replied(b"stopped".to_vec()))
        }
    }

    fn call(reply: &'static [u8]) -> Call {
        Call::new(
            TransactionContext::new(ActivityId::new("g", "1").unwrap(), serde_json::Value::Null),
            Invocation::new("op", move |_t: &CancelToken| Ok(reply.to_vec())),
        )
    }

    #[test]
    fn layers_run_in_order_then_inline() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let p = Pipeline::new()
            .layer(Trace { tag: "a", seen: seen.clone() })
            .layer(Trace { tag: "b", seen: seen.clone() });
        assert_eq!(p.layer_names(), vec!["a", "b"]);
        match p.run(call(b"pong")).unwrap() {
            Outcome::Replied(r) => assert_eq!(r, b"pong"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn a_layer_may_short_circuit() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let p = Pipeline::new()
            .layer(Stop)
            .layer(Trace { tag: "never", seen: seen.clone() });
        let out = p.run(call(b"pong")).unwrap();
        assert!(out.handle().is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_pipeline_propagates_call_error() {
        let c = Call::new(
            TransactionContext::new(ActivityId::new("g", "1").unwrap(), serde_json::Value::Null),
            Invocation::new("op", |_t: &CancelToken| Err(anyhow::anyhow!("down"))),
        );
        let err = Pipeline::new().run(c).unwrap_err();
        assert!(format!("{err:#}").contains("down"));
    }
}
