//! Name-keyed action/event handlers behind one uniform invocation contract.
//!
//! A module registers a typed `async fn(RequestCtx, I) -> Result<O, E>`; the
//! adapter built here decodes the raw payload into `I`, calls the function and
//! encodes `O` back, so the host only ever deals with bytes in and bytes out.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::RequestCtx;

/// Failure of a single handler invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to decode handler input: {0}")]
    Decode(#[source] serde_json::Error),
    /// Error returned by the handler itself; displays as the handler's message.
    #[error(transparent)]
    Handler(anyhow::Error),
    #[error("failed to encode handler output: {0}")]
    Encode(#[source] serde_json::Error),
}

type InvokeFn =
    dyn Fn(RequestCtx, Bytes) -> BoxFuture<'static, Result<Bytes, InvokeError>> + Send + Sync;

/// Type-erased handler: `(RequestCtx, raw JSON) -> raw JSON`.
#[derive(Clone)]
pub struct Handler {
    invoke: Arc<InvokeFn>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

impl Handler {
    /// Wrap a typed handler.
    ///
    /// The accepted shape is enforced by the bounds here, so a handler with the
    /// wrong signature never makes it past compilation.
    pub fn new<F, Fut, I, O, E>(f: F) -> Self
    where
        F: Fn(RequestCtx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let f = Arc::new(f);
        let invoke = move |ctx: RequestCtx,
                           payload: Bytes|
              -> BoxFuture<'static, Result<Bytes, InvokeError>> {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let input: I = serde_json::from_slice(&payload).map_err(InvokeError::Decode)?;
                let output = (*f)(ctx, input)
                    .await
                    .map_err(|e| InvokeError::Handler(e.into()))?;
                serde_json::to_vec(&output)
                    .map(Bytes::from)
                    .map_err(InvokeError::Encode)
            })
        };
        Self {
            invoke: Arc::new(invoke),
        }
    }

    /// Wrap a handler that works on untyped JSON values.
    pub fn raw<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestCtx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(f)
    }

    pub async fn invoke(&self, ctx: RequestCtx, payload: Bytes) -> Result<Bytes, InvokeError> {
        (self.invoke)(ctx, payload).await
    }
}

/// Which of the two independent namespaces a handler lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Action,
    Event,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Action => "action",
            HandlerKind::Event => "event",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two disjoint name -> handler maps. Filled during module finalization and
/// read-only once the host serves traffic.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    actions: HashMap<String, Handler>,
    events: HashMap<String, Handler>,
}

impl HandlerRegistry {
    fn map(&self, kind: HandlerKind) -> &HashMap<String, Handler> {
        match kind {
            HandlerKind::Action => &self.actions,
            HandlerKind::Event => &self.events,
        }
    }

    /// Insert or overwrite; returns the handler previously bound to `name`.
    pub fn insert(
        &mut self,
        kind: HandlerKind,
        name: impl Into<String>,
        handler: Handler,
    ) -> Option<Handler> {
        let map = match kind {
            HandlerKind::Action => &mut self.actions,
            HandlerKind::Event => &mut self.events,
        };
        map.insert(name.into(), handler)
    }

    pub fn get(&self, kind: HandlerKind, name: &str) -> Option<&Handler> {
        self.map(kind).get(name)
    }

    /// Sorted handler names of one kind.
    pub fn names(&self, kind: HandlerKind) -> Vec<&str> {
        let mut names: Vec<&str> = self.map(kind).keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self, kind: HandlerKind) -> usize {
        self.map(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }
}
