//! Per-request invocation state: context, completion promise, deadlines.
//!
//! A dispatched request produces an [`InvocationContext`] (published
//! task-locally around the handler call) and an [`InvocationPromise`]. The
//! promise is single-shot: whichever of the handler, the timeout task, or
//! a panic trap transitions it first wins, and the transition posts a
//! [`Completion`] back to the connection's task, which serializes all
//! state mutation.

use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};

use log::warn;
use tokio::{sync::mpsc, task::AbortHandle, time::sleep};

use crate::{
    error::DispatchError,
    protocol::SessionProtocol,
    service::{BlockingTaskExecutor, ServiceHandler, ServiceOutput},
};

tokio::task_local! {
    static CURRENT: Arc<InvocationContext>;
}

/// Identity of one service invocation.
#[derive(Debug)]
pub struct InvocationContext {
    service_name: String,
    hostname: String,
    path: String,
    mapped_path: String,
    session_protocol: SessionProtocol,
}

impl InvocationContext {
    /// Build a context for a routed and decoded request.
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        hostname: impl Into<String>,
        path: impl Into<String>,
        mapped_path: impl Into<String>,
        session_protocol: SessionProtocol,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            hostname: hostname.into(),
            path: path.into(),
            mapped_path: mapped_path.into(),
            session_protocol,
        }
    }

    #[must_use]
    pub fn service_name(&self) -> &str { &self.service_name }

    #[must_use]
    pub fn hostname(&self) -> &str { &self.hostname }

    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    #[must_use]
    pub fn mapped_path(&self) -> &str { &self.mapped_path }

    #[must_use]
    pub fn session_protocol(&self) -> SessionProtocol { self.session_protocol }

    /// The invocation context published for the currently running handler
    /// call, if any.
    #[must_use]
    pub fn current() -> Option<Arc<Self>> { CURRENT.try_with(Arc::clone).ok() }
}

impl std::fmt::Display for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}://{}{}#{}",
            self.session_protocol, self.hostname, self.path, self.service_name
        )
    }
}

/// Completion of an invocation, posted to the connection's task.
#[derive(Debug)]
pub struct Completion {
    /// Sequence number of the request this completion answers.
    pub seq: u32,
    /// The handler's result or the failure that beat it.
    pub result: Result<ServiceOutput, DispatchError>,
}

struct PromiseInner {
    seq: u32,
    slot: Mutex<Option<mpsc::UnboundedSender<Completion>>>,
}

/// Single-shot completion handle for one invocation.
///
/// Cloned freely across the handler, the timeout task, and the codec; the
/// first successful `try_complete`/`try_fail` posts the completion and
/// every later attempt reports `false`.
#[derive(Clone)]
pub struct InvocationPromise {
    inner: Arc<PromiseInner>,
}

impl InvocationPromise {
    pub(crate) fn new(seq: u32, tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                seq,
                slot: Mutex::new(Some(tx)),
            }),
        }
    }

    /// Sequence number of the request this promise answers.
    #[must_use]
    pub fn seq(&self) -> u32 { self.inner.seq }

    /// Whether the promise has already transitioned.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.slot.lock().map_or(true, |slot| slot.is_none())
    }

    /// Complete the promise with a handler result.
    ///
    /// Returns `false` when the promise had already transitioned.
    pub fn try_complete(&self, output: ServiceOutput) -> bool { self.transition(Ok(output)) }

    /// Fail the promise.
    ///
    /// Returns `false` when the promise had already transitioned.
    pub fn try_fail(&self, cause: DispatchError) -> bool { self.transition(Err(cause)) }

    fn transition(&self, result: Result<ServiceOutput, DispatchError>) -> bool {
        let taken = self.inner.slot.lock().ok().and_then(|mut slot| slot.take());
        match taken {
            Some(tx) => {
                // The connection may already be gone; the transition still
                // counts so later attempts observe a completed promise.
                let _ = tx.send(Completion {
                    seq: self.inner.seq,
                    result,
                });
                true
            }
            None => false,
        }
    }
}

/// Call a handler with the context published task-locally.
///
/// Panics are trapped and fail the promise; a panic that loses the race
/// against an earlier transition is only logged.
pub(crate) fn run_invocation(
    handler: &dyn ServiceHandler,
    ctx: &Arc<InvocationContext>,
    blocking: &BlockingTaskExecutor,
    promise: &InvocationPromise,
) {
    let outcome = CURRENT.sync_scope(Arc::clone(ctx), || {
        catch_unwind(AssertUnwindSafe(|| {
            handler.invoke(Arc::clone(ctx), blocking, promise.clone());
        }))
    });

    if let Err(payload) = outcome {
        let message = panic_message(payload.as_ref());
        if !promise.try_fail(DispatchError::HandlerPanic(message.clone())) {
            warn!("handler panicked with a finished promise: ctx={ctx}, panic={message}");
        }
    }
}

/// Arm the per-request deadline.
///
/// The returned handle aborts the timer; aborting an already-finished or
/// already-aborted task is a no-op, so cancellation is idempotent. If the
/// timer fires first, its failure transition wins the promise.
pub(crate) fn schedule_timeout(
    timeout: Duration,
    ctx: &Arc<InvocationContext>,
    promise: &InvocationPromise,
) -> AbortHandle {
    let promise = promise.clone();
    let context = ctx.to_string();
    let timer = tokio::spawn(async move {
        sleep(timeout).await;
        if promise.try_fail(DispatchError::RequestTimeout { timeout, context }) {
            crate::metrics::inc_request_timeouts();
        }
    });
    timer.abort_handle()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("non-string panic payload")
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::service::ServiceOutput;

    fn promise() -> (InvocationPromise, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InvocationPromise::new(7, tx), rx)
    }

    #[test]
    fn first_transition_wins() {
        let (promise, mut rx) = promise();
        assert!(!promise.is_done());
        assert!(promise.try_complete(ServiceOutput::value("ok")));
        assert!(!promise.try_fail(DispatchError::ServiceNotFound));
        assert!(promise.is_done());

        let completion = rx.try_recv().expect("completion posted");
        assert_eq!(completion.seq, 7);
        assert!(completion.result.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failure_posts_the_cause() {
        let (promise, mut rx) = promise();
        assert!(promise.try_fail(DispatchError::ServiceNotFound));
        let completion = rx.try_recv().expect("completion posted");
        assert!(matches!(
            completion.result,
            Err(DispatchError::ServiceNotFound)
        ));
    }

    #[test]
    fn transition_survives_a_dropped_connection() {
        let (promise, rx) = promise();
        drop(rx);
        assert!(promise.try_complete(ServiceOutput::value(1_u32)));
        assert!(promise.is_done());
    }

    #[tokio::test]
    async fn current_context_is_scoped_to_the_handler_call() {
        struct Probe;
        impl ServiceHandler for Probe {
            fn invoke(
                &self,
                ctx: Arc<InvocationContext>,
                _blocking: &BlockingTaskExecutor,
                promise: InvocationPromise,
            ) {
                let current = InvocationContext::current().expect("published");
                assert_eq!(current.service_name(), ctx.service_name());
                promise.try_complete(ServiceOutput::value("done"));
            }
        }

        let (promise, _rx) = promise();
        let ctx = Arc::new(InvocationContext::new(
            "probe",
            "a",
            "/p",
            "/p",
            SessionProtocol::H1C,
        ));
        run_invocation(&Probe, &ctx, &BlockingTaskExecutor::new(), &promise);
        assert!(InvocationContext::current().is_none());
    }

    #[tokio::test]
    async fn panicking_handler_fails_the_promise_and_clears_context() {
        struct Exploding;
        impl ServiceHandler for Exploding {
            fn invoke(
                &self,
                _ctx: Arc<InvocationContext>,
                _blocking: &BlockingTaskExecutor,
                _promise: InvocationPromise,
            ) {
                panic!("kaboom");
            }
        }

        let (promise, mut rx) = promise();
        let ctx = Arc::new(InvocationContext::new(
            "exploding",
            "a",
            "/p",
            "/p",
            SessionProtocol::H1C,
        ));
        run_invocation(&Exploding, &ctx, &BlockingTaskExecutor::new(), &promise);

        assert!(InvocationContext::current().is_none());
        let completion = rx.try_recv().expect("completion posted");
        match completion.result {
            Err(DispatchError::HandlerPanic(message)) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
