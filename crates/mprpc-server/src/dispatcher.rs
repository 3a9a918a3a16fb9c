//! Method table and request dispatch
//!
//! Methods are registered by name on a [`MethodTableBuilder`] once, before
//! the server starts, and the frozen [`MethodTable`] is then shared
//! read-only by every connection task.
//!
//! Every outcome of a dispatch is a [`Response`]. Unknown methods, bad
//! params, handler errors and handler panics all become the response's
//! `error` field so the connection keeps serving.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use mprpc_common::protocol::error::{MprpcError, Result};
use mprpc_common::protocol::{Request, Response};
use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Boxed future returned by every registered handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

type Handler = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Collects method registrations. See [`MethodTable::builder`].
///
/// # Example
///
/// ```rust
/// use mprpc_server::MethodTable;
/// use rmpv::Value;
///
/// let methods = MethodTable::builder()
///     .register("echo", |mut params| Ok(params.pop().unwrap_or(Value::Nil)))
///     .register_typed("sum", |(a, b): (i64, i64)| Ok::<_, String>(a + b))
///     .build();
///
/// assert!(methods.contains("sum"));
/// ```
#[derive(Default)]
pub struct MethodTableBuilder {
    methods: HashMap<String, Handler>,
}

impl MethodTableBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a synchronous handler taking the raw positional params.
    ///
    /// The handler runs inline on the connection task, so it should not
    /// block; use [`register_async`](Self::register_async) for anything
    /// that waits.
    pub fn register<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(
            name.into(),
            Arc::new(move |params| Box::pin(std::future::ready(handler(params))) as HandlerFuture),
        )
    }

    /// Registers a handler returning a future.
    pub fn register_async<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert(
            name.into(),
            Arc::new(move |params| Box::pin(handler(params)) as HandlerFuture),
        )
    }

    /// Registers a handler with serde-typed arguments and result.
    ///
    /// The params array is deserialized into `A`, so a tuple unpacks the
    /// positional params. A params array that does not fit `A` is answered
    /// with an invalid params error. An `Err(e)` from the handler reaches the
    /// caller as exactly `e.to_string()`.
    pub fn register_typed<A, R, E, F>(self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        E: Display,
        F: Fn(A) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        self.register(name, move |params| {
            let args: A = rmpv::ext::from_value(Value::Array(params))
                .map_err(|e| MprpcError::InvalidParams(e.to_string()))?;
            let result = handler(args).map_err(|e| MprpcError::Application(e.to_string()))?;
            Ok(rmpv::ext::to_value(result)?)
        })
    }

    fn insert(mut self, name: String, handler: Handler) -> Self {
        if self.methods.insert(name.clone(), handler).is_some() {
            tracing::warn!(method = %name, "Method registered twice, keeping the later handler");
        }
        self
    }

    /// Freezes the registrations into a [`MethodTable`].
    pub fn build(self) -> MethodTable {
        MethodTable {
            methods: self.methods,
        }
    }
}

/// Immutable name-to-handler map consulted for every incoming request.
pub struct MethodTable {
    methods: HashMap<String, Handler>,
}

impl MethodTable {
    /// Starts a new set of registrations.
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::new()
    }

    /// True if a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Registered method names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Runs the handler for `request` and builds its response.
    ///
    /// Never fails: every error is encoded in the response's `error` field as
    /// its message string.
    pub async fn dispatch(&self, request: Request) -> Response {
        let msgid = request.msgid;
        match self.invoke(request).await {
            Ok(result) => Response::success(msgid, result),
            Err(err) => Response::error(msgid, err.to_string()),
        }
    }

    async fn invoke(&self, request: Request) -> Result<Value> {
        let Request {
            msgid,
            method,
            params,
        } = request;

        let name = match method {
            Value::String(name) => name.into_str().ok_or_else(|| {
                MprpcError::InvalidParams("method name is not valid UTF-8".to_string())
            })?,
            other => {
                return Err(MprpcError::InvalidParams(format!(
                    "method name must be a string, got {}",
                    other
                )))
            }
        };

        let handler = self
            .methods
            .get(&name)
            .cloned()
            .ok_or_else(|| MprpcError::MethodNotFound(name.clone()))?;

        let params = match params {
            Value::Array(params) => params,
            other => {
                return Err(MprpcError::InvalidParams(format!(
                    "params must be an array, got {}",
                    other
                )))
            }
        };

        tracing::debug!(msgid, method = %name, "Dispatching request");

        // Calling the handler inside the future catches panics raised before
        // it returns its future as well as those raised while polling it.
        let outcome = AssertUnwindSafe(async move { handler(params).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => {
                tracing::debug!(msgid, method = %name, error = %err, "Handler failed");
                Err(err)
            }
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("handler panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("handler panicked: {s}")
                } else {
                    "handler panicked".to_string()
                };
                tracing::error!(msgid, method = %name, "{}", message);
                Err(MprpcError::Application(message))
            }
        }
    }
}
