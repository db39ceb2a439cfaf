//! Service handlers and the blocking-task executor they may offload to.

use std::{any::Any, future::Future, sync::Arc};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::{
    error::{BoxError, DispatchError},
    invocation::{InvocationContext, InvocationPromise},
    message::HttpResponse,
};

/// Value a handler completes its promise with.
pub enum ServiceOutput {
    /// A complete HTTP response, passed to the wire as-is.
    Response(HttpResponse),
    /// A codec-level result object, encoded by the service's codec.
    Value(Box<dyn Any + Send>),
}

impl ServiceOutput {
    /// Wrap an arbitrary result object for codec encoding.
    #[must_use]
    pub fn value(value: impl Any + Send) -> Self { Self::Value(Box::new(value)) }
}

impl std::fmt::Debug for ServiceOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response(res) => f.debug_tuple("Response").field(&res.status()).finish(),
            Self::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// A service's entry point.
///
/// `invoke` runs on the connection's task and must not block: it starts
/// the work (inline, on a spawned task, or on the blocking executor) and
/// arranges for `promise` to be completed. Panics are trapped by the
/// dispatcher and fail the promise.
pub trait ServiceHandler: Send + Sync {
    /// Start handling a decoded invocation.
    fn invoke(
        &self,
        ctx: Arc<InvocationContext>,
        blocking: &BlockingTaskExecutor,
        promise: InvocationPromise,
    );
}

/// Executor for handler work that would block the connection's task.
///
/// Wraps the runtime's blocking thread pool; an explicit handle pins work
/// to a specific runtime, otherwise the ambient runtime is used.
#[derive(Clone, Default)]
pub struct BlockingTaskExecutor {
    handle: Option<tokio::runtime::Handle>,
}

impl BlockingTaskExecutor {
    /// Executor bound to the runtime current at call time.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Executor pinned to an explicit runtime handle.
    #[must_use]
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Run `work` on the blocking thread pool.
    pub fn execute<F, R>(&self, work: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match &self.handle {
            Some(handle) => handle.spawn_blocking(work),
            None => tokio::task::spawn_blocking(work),
        }
    }
}

type AsyncHandlerFn =
    dyn Fn(Arc<InvocationContext>) -> BoxFuture<'static, Result<ServiceOutput, BoxError>>
        + Send
        + Sync;

/// Handler backed by an async function.
///
/// The future is spawned onto the runtime; its result completes the
/// promise, so the connection task is never blocked.
pub struct ServiceFn {
    f: Box<AsyncHandlerFn>,
}

/// Adapt an async function into a [`ServiceHandler`].
pub fn service_fn<F, Fut>(f: F) -> ServiceFn
where
    F: Fn(Arc<InvocationContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceOutput, BoxError>> + Send + 'static,
{
    ServiceFn {
        f: Box::new(move |ctx| Box::pin(f(ctx))),
    }
}

impl ServiceHandler for ServiceFn {
    fn invoke(
        &self,
        ctx: Arc<InvocationContext>,
        _blocking: &BlockingTaskExecutor,
        promise: InvocationPromise,
    ) {
        let fut = (self.f)(ctx);
        tokio::spawn(async move {
            match fut.await {
                Ok(output) => {
                    promise.try_complete(output);
                }
                Err(cause) => {
                    promise.try_fail(DispatchError::Service(cause));
                }
            }
        });
    }
}
