//! Shared fixtures for dispatch-core integration tests.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use bytes::Bytes;
use http::{
    header::{HeaderValue, CONNECTION, HOST},
    Method, StatusCode,
};
use portico::{
    error::status_for, service_fn, BlockingTaskExecutor, BoxError, DecodeRequest, DecodeResult,
    DispatchError, HttpRequest, HttpResponse, InvocationContext, InvocationPromise, PathMapping,
    ResponseSink, ServerConfig, ServiceCodec, ServiceHandler, ServiceOutput, VirtualHost,
};
use tokio::sync::Notify;

/// Wire event captured by [`RecordingSink`].
#[derive(Debug)]
pub enum SinkEvent {
    Response(HttpResponse),
    Flush,
    Close,
}

/// Sink recording everything the writer schedules, shared with the test
/// through clones.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    fail_writes: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self { Self::default() }

    /// Make every subsequent write fail like a reset connection.
    pub fn fail_writes(&self) { self.fail_writes.store(true, Ordering::SeqCst); }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| match event {
                SinkEvent::Response(res) => format!("response:{}", res.status().as_u16()),
                SinkEvent::Flush => "flush".into(),
                SinkEvent::Close => "close".into(),
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<HttpResponse> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Response(res) => Some(res.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.responses()
            .iter()
            .map(|res| String::from_utf8_lossy(res.body()).into_owned())
            .collect()
    }

    pub fn closed(&self) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|event| matches!(event, SinkEvent::Close))
    }

    pub fn flushes(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, SinkEvent::Flush))
            .count()
    }
}

impl ResponseSink for RecordingSink {
    fn write(&mut self, res: HttpResponse) -> std::io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        self.events.lock().unwrap().push(SinkEvent::Response(res));
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.events.lock().unwrap().push(SinkEvent::Flush);
        Ok(())
    }

    fn close(&mut self) { self.events.lock().unwrap().push(SinkEvent::Close); }
}

/// What the test codec should do with a decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecMode {
    /// Decode into an invocation context.
    Success,
    /// Decline the request.
    NotFound,
    /// Fail, optionally supplying a complete error response.
    Failure { with_response: bool },
    /// Decode fine, but fail when encoding the handler's result.
    BrokenEncoder,
    /// Decode fine, but deliver handler failures inside `200 OK`.
    TunnelledFailures,
}

/// Text codec with scriptable failure modes.
pub struct TestCodec {
    mode: CodecMode,
}

impl TestCodec {
    pub fn new(mode: CodecMode) -> Arc<Self> { Arc::new(Self { mode }) }
}

impl ServiceCodec for TestCodec {
    fn decode_request(
        &self,
        request: DecodeRequest<'_>,
        _promise: &InvocationPromise,
    ) -> DecodeResult {
        match self.mode {
            CodecMode::NotFound => DecodeResult::NotFound,
            CodecMode::Failure { with_response } => DecodeResult::Failure {
                error_response: with_response.then(|| {
                    HttpResponse::new(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Bytes::from_static(b"unprocessable payload"),
                    )
                }),
                cause: "payload did not parse".into(),
            },
            _ => DecodeResult::Success(InvocationContext::new(
                "test-service",
                request.hostname,
                request.path,
                request.mapped_path,
                request.session_protocol,
            )),
        }
    }

    fn encode_response(
        &self,
        _ctx: &InvocationContext,
        result: Box<dyn std::any::Any + Send>,
    ) -> Result<Bytes, BoxError> {
        if self.mode == CodecMode::BrokenEncoder {
            return Err("encoder exploded".into());
        }
        result
            .downcast::<String>()
            .map(|value| Bytes::from(*value))
            .map_err(|_| BoxError::from("result was not a string"))
    }

    fn encode_failure_response(
        &self,
        _ctx: &InvocationContext,
        cause: &DispatchError,
    ) -> Result<Bytes, BoxError> {
        let status = status_for(cause);
        let reason = status.canonical_reason().unwrap_or("Unknown");
        Ok(Bytes::from(format!("{} {reason}", status.as_u16())))
    }

    fn failure_response_fails_session(&self, _ctx: &InvocationContext) -> bool {
        self.mode != CodecMode::TunnelledFailures
    }
}

/// Handler completing its promise synchronously, inside `invoke`.
pub struct ImmediateHandler {
    body: &'static str,
}

impl ImmediateHandler {
    pub fn new(body: &'static str) -> Arc<Self> { Arc::new(Self { body }) }
}

impl ServiceHandler for ImmediateHandler {
    fn invoke(
        &self,
        _ctx: Arc<InvocationContext>,
        _blocking: &BlockingTaskExecutor,
        promise: InvocationPromise,
    ) {
        promise.try_complete(ServiceOutput::Response(HttpResponse::new(
            StatusCode::OK,
            Bytes::from_static(self.body.as_bytes()),
        )));
    }
}

/// Handler that panics inside `invoke`.
pub struct PanickingHandler;

impl ServiceHandler for PanickingHandler {
    fn invoke(
        &self,
        _ctx: Arc<InvocationContext>,
        _blocking: &BlockingTaskExecutor,
        _promise: InvocationPromise,
    ) {
        panic!("handler exploded");
    }
}

/// Async handler releasing its response when the returned notifier fires.
pub fn gated_handler(body: &'static str) -> (Arc<dyn ServiceHandler>, Arc<Notify>) {
    let gate = Arc::new(Notify::new());
    let waiter = Arc::clone(&gate);
    let handler = service_fn(move |_ctx| {
        let gate = Arc::clone(&waiter);
        async move {
            gate.notified().await;
            Ok(ServiceOutput::Response(HttpResponse::new(
                StatusCode::OK,
                Bytes::from_static(body.as_bytes()),
            )))
        }
    });
    (Arc::new(handler), gate)
}

/// Async handler answering after a fixed delay.
pub fn sleepy_handler(delay: std::time::Duration, body: &'static str) -> Arc<dyn ServiceHandler> {
    Arc::new(service_fn(move |_ctx| async move {
        tokio::time::sleep(delay).await;
        Ok(ServiceOutput::Response(HttpResponse::new(
            StatusCode::OK,
            Bytes::from_static(body.as_bytes()),
        )))
    }))
}

/// Async handler completing with a codec-encodable value.
pub fn value_handler(value: &'static str) -> Arc<dyn ServiceHandler> {
    Arc::new(service_fn(move |_ctx| async move {
        Ok(ServiceOutput::value(String::from(value)))
    }))
}

/// Async handler failing with an application error.
pub fn failing_handler(message: &'static str) -> Arc<dyn ServiceHandler> {
    Arc::new(service_fn(move |_ctx| async move {
        Err(BoxError::from(message))
    }))
}

/// Config with a single service mounted at `/hello` on the default host.
pub fn single_service_config(
    codec: Arc<dyn ServiceCodec>,
    handler: Arc<dyn ServiceHandler>,
) -> Arc<ServerConfig> {
    let host = VirtualHost::new("a").service(
        "hello",
        PathMapping::Exact("/hello".into()),
        codec,
        handler,
    );
    Arc::new(ServerConfig::builder(host).build())
}

pub fn get(path: &str) -> HttpRequest {
    HttpRequest::new(Method::GET, path).with_header(HOST, HeaderValue::from_static("a"))
}

pub fn get_closing(path: &str) -> HttpRequest {
    get(path).with_header(CONNECTION, HeaderValue::from_static("close"))
}

/// Let spawned handler tasks make progress on the current-thread runtime.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
