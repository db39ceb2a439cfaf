//! Per-connection dispatch state machine.
//!
//! One [`ServerConnection`] exists per accepted connection. The framing
//! layer feeds it decoded messages; it routes each request to a
//! virtual-hosted service, starts the invocation, and schedules the
//! response back onto the wire in protocol order. All state lives on the
//! connection's task; nothing here is shared across threads.
//!
//! The inbound side is push-driven (`on_message`, `on_read_complete`,
//! `on_exception`) so a framing layer can drive the machine directly; the
//! [`ServerConnection::run`] loop adapts those entry points to channels,
//! treating each burst of buffered messages as one read batch.

mod orderer;
mod writer;

pub use writer::{ChannelSink, ResponseSink, WireEvent};

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use log::{debug, warn};
use tokio::{sync::mpsc, task::AbortHandle};

use crate::{
    codec::{DecodeRequest, DecodeResult, ServiceCodec},
    config::ServerConfig,
    error::{self, log_unexpected, DispatchError},
    invocation::{self, Completion, InvocationContext, InvocationPromise},
    message::{Http2Settings, HttpRequest, HttpResponse, InboundMessage},
    metrics,
    protocol::SessionProtocol,
    service::ServiceOutput,
};
use writer::{ResponseWriter, WriteOptions};

/// Invocation state retained from dispatch until completion.
///
/// Holds the dispatcher's reference to the request payload; dropping the
/// entry is the single release point for that buffer.
struct PendingInvocation {
    ctx: Arc<InvocationContext>,
    codec: Arc<dyn ServiceCodec>,
    stream_id: Option<HeaderValue>,
    payload: Bytes,
    timeout: Option<AbortHandle>,
}

/// Dispatch state machine for one accepted connection.
pub struct ServerConnection<S> {
    config: Arc<ServerConfig>,
    session_protocol: SessionProtocol,
    writer: ResponseWriter<S>,
    req_seq: u32,
    handled_last_request: bool,
    last_req_seq: Option<u32>,
    is_reading: bool,
    invocations: HashMap<u32, PendingInvocation>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: Option<mpsc::UnboundedReceiver<Completion>>,
    label: String,
}

impl<S: ResponseSink> ServerConnection<S> {
    /// State machine for a connection negotiated as `protocol`.
    #[must_use]
    pub fn new(config: Arc<ServerConfig>, protocol: SessionProtocol, sink: S) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let label = String::from("?");
        metrics::inc_connections();
        Self {
            config,
            session_protocol: protocol,
            writer: ResponseWriter::new(sink, !protocol.is_multiplex(), label.clone()),
            req_seq: 0,
            handled_last_request: false,
            last_req_seq: None,
            is_reading: false,
            invocations: HashMap::new(),
            completions_tx,
            completions_rx: Some(completions_rx),
            label,
        }
    }

    /// Label log lines with the peer address.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.label = addr.to_string();
        self.writer.set_label(self.label.clone());
        self
    }

    /// Protocol currently negotiated for the session.
    #[must_use]
    pub fn session_protocol(&self) -> SessionProtocol { self.session_protocol }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.writer.is_closed() }

    /// Number of responses buffered behind head-of-line blocking.
    #[must_use]
    pub fn pending_responses(&self) -> usize { self.writer.pending_responses() }

    /// A message arrived from the framing layer.
    pub fn on_message(&mut self, msg: InboundMessage) {
        self.is_reading = true;
        match msg {
            InboundMessage::Settings(settings) => self.on_settings(settings),
            InboundMessage::Request(req) => self.dispatch(req),
        }
    }

    /// The framing layer has no more readable data for now.
    pub fn on_read_complete(&mut self) {
        self.is_reading = false;
        self.writer.flush();
    }

    /// The framing layer failed; the connection is torn down.
    pub fn on_exception(&mut self, cause: &dyn std::fmt::Display) {
        log_unexpected(&self.label, cause);
        self.close();
    }

    /// Tear the connection down, cancelling outstanding deadlines and
    /// releasing everything buffered.
    pub fn close(&mut self) {
        self.abort_invocations();
        self.writer.close_now();
    }

    /// Drain completions that are already available, without waiting.
    ///
    /// Only useful when the machine is driven directly through
    /// `on_message`; the [`run`](Self::run) loop drains the channel
    /// itself.
    pub fn process_completions(&mut self) -> usize {
        let mut processed = 0;
        while let Some(completion) = self
            .completions_rx
            .as_mut()
            .and_then(|rx| rx.try_recv().ok())
        {
            self.on_completion(completion);
            processed += 1;
        }
        processed
    }

    /// Drive the state machine from channels until the connection closes.
    ///
    /// Messages already buffered in `inbound` are treated as one read
    /// batch: writes they produce are flushed once, at batch end.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>) {
        let Some(mut completions) = self.completions_rx.take() else {
            return;
        };
        loop {
            tokio::select! {
                biased;
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        self.on_message(msg);
                        while let Ok(more) = inbound.try_recv() {
                            self.on_message(more);
                        }
                        self.on_read_complete();
                    }
                    None => self.close(),
                },
                Some(completion) = completions.recv() => self.on_completion(completion),
            }
            if self.is_closed() {
                break;
            }
        }
    }

    fn on_settings(&mut self, settings: Http2Settings) {
        debug!(
            "HTTP/2 settings observed: conn={}, settings={settings:?}",
            self.label
        );
        self.writer.disable_hol_blocking();
        match self.session_protocol.upgraded() {
            Some(upgraded) => self.session_protocol = upgraded,
            None => warn!(
                "duplicate HTTP/2 upgrade: conn={}, protocol={}",
                self.label, self.session_protocol
            ),
        }
    }

    fn dispatch(&mut self, req: HttpRequest) {
        // Requests behind a close-latched exchange are never answered;
        // the connection is about to go away.
        if self.handled_last_request {
            return;
        }
        if !req.is_keep_alive() {
            self.handled_last_request = true;
        }

        let seq = self.req_seq;
        self.req_seq = self.req_seq.wrapping_add(1);
        if self.handled_last_request {
            self.last_req_seq = Some(seq);
        }
        metrics::inc_requests_dispatched();

        if let Some(failure) = req.decoder_failure() {
            warn!(
                "request failed wire decoding: conn={}, cause={failure}",
                self.label
            );
            self.respond_error(seq, req.stream_id(), StatusCode::BAD_REQUEST);
            return;
        }

        if req.method() == Method::CONNECT {
            self.respond_error(seq, req.stream_id(), StatusCode::METHOD_NOT_ALLOWED);
            return;
        }

        let config = Arc::clone(&self.config);
        let hostname = hostname(&req);
        let path = strip_query(req.uri()).to_string();
        let Some(service) = config.find_virtual_host(&hostname).find_service(&path) else {
            self.respond_error(seq, req.stream_id(), StatusCode::NOT_FOUND);
            return;
        };

        let promise = InvocationPromise::new(seq, self.completions_tx.clone());
        let decoded = service.codec().decode_request(
            DecodeRequest {
                session_protocol: self.session_protocol,
                hostname: &hostname,
                path: &path,
                mapped_path: service.mapped_path(),
                payload: req.payload().clone(),
                request: &req,
            },
            &promise,
        );

        match decoded {
            DecodeResult::Success(ctx) => {
                let ctx = Arc::new(ctx);
                let timeout = config.request_timeout_policy().timeout(&ctx);
                invocation::run_invocation(
                    service.handler().as_ref(),
                    &ctx,
                    config.blocking_task_executor(),
                    &promise,
                );

                // A promise that is already done needs no deadline; its
                // completion is sitting in the channel.
                let timeout_task = (!promise.is_done() && timeout > Duration::ZERO)
                    .then(|| invocation::schedule_timeout(timeout, &ctx, &promise));
                let completed_synchronously = promise.is_done();

                let stream_id = req.stream_id();
                self.invocations.insert(
                    seq,
                    PendingInvocation {
                        ctx,
                        codec: Arc::clone(service.codec()),
                        stream_id,
                        payload: req.into_payload(),
                        timeout: timeout_task,
                    },
                );

                if completed_synchronously {
                    self.process_completions();
                }
            }
            DecodeResult::Failure {
                error_response,
                cause,
            } => {
                let rendered = cause.to_string();
                warn!(
                    "request decode failed: conn={}, cause={rendered}",
                    self.label
                );
                match error_response {
                    Some(res) => {
                        promise.try_fail(DispatchError::RequestDecode {
                            cause: Some(cause),
                            error_response_len: res.body().len(),
                        });
                        self.respond(seq, req.stream_id(), res);
                    }
                    None => {
                        promise.try_fail(DispatchError::RequestDecode {
                            cause: Some(cause),
                            error_response_len: 0,
                        });
                        self.respond_error(seq, req.stream_id(), StatusCode::BAD_REQUEST);
                    }
                }
            }
            DecodeResult::NotFound => {
                promise.try_fail(DispatchError::ServiceNotFound);
                self.respond_error(seq, req.stream_id(), StatusCode::NOT_FOUND);
            }
        }
    }

    /// An invocation finished; turn its result into a response.
    pub fn on_completion(&mut self, completion: Completion) {
        let Completion { seq, result } = completion;
        let Some(pending) = self.invocations.remove(&seq) else {
            debug!(
                "completion for untracked request: conn={}, seq={seq}",
                self.label
            );
            return;
        };
        let PendingInvocation {
            ctx,
            codec,
            stream_id,
            payload,
            timeout,
        } = pending;

        // The dispatcher's hold on the request buffer ends here.
        drop(payload);
        if let Some(timeout) = timeout {
            timeout.abort();
        }

        if let Err(cause) =
            self.handle_invocation_result(seq, &ctx, codec.as_ref(), stream_id.clone(), result)
        {
            warn!(
                "failed to handle invocation result: conn={}, ctx={ctx}, cause={cause}",
                self.label
            );
            self.respond_error(seq, stream_id, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    fn handle_invocation_result(
        &mut self,
        seq: u32,
        ctx: &InvocationContext,
        codec: &dyn ServiceCodec,
        stream_id: Option<HeaderValue>,
        result: Result<ServiceOutput, DispatchError>,
    ) -> Result<(), crate::error::BoxError> {
        match result {
            Ok(ServiceOutput::Response(res)) => self.respond(seq, stream_id, res),
            Ok(ServiceOutput::Value(value)) => {
                let body = codec.encode_response(ctx, value)?;
                self.respond(seq, stream_id, HttpResponse::new(StatusCode::OK, body));
            }
            Err(cause) => {
                let body = codec.encode_failure_response(ctx, &cause)?;
                let status = if codec.failure_response_fails_session(ctx) {
                    error::status_for(&cause)
                } else {
                    StatusCode::OK
                };
                self.respond(seq, stream_id, HttpResponse::new(status, body));
            }
        }
        Ok(())
    }

    fn respond_error(&mut self, seq: u32, stream_id: Option<HeaderValue>, status: StatusCode) {
        metrics::inc_dispatch_errors();
        self.respond(seq, stream_id, HttpResponse::error(status));
    }

    fn respond(&mut self, seq: u32, stream_id: Option<HeaderValue>, res: HttpResponse) {
        let opts = WriteOptions {
            is_reading: self.is_reading,
            closing_seq: if self.handled_last_request {
                self.last_req_seq
            } else {
                None
            },
        };
        metrics::inc_responses_written();
        self.writer.respond(seq, stream_id, res, opts);
    }
}

impl<S> ServerConnection<S> {
    /// Cancel every outstanding deadline and release the retained
    /// request payloads.
    fn abort_invocations(&mut self) {
        for (_, pending) in self.invocations.drain() {
            if let Some(timeout) = pending.timeout {
                timeout.abort();
            }
        }
    }
}

impl<S> Drop for ServerConnection<S> {
    fn drop(&mut self) {
        self.abort_invocations();
        metrics::dec_connections();
    }
}

/// The request path with everything at and after the first `?` removed.
fn strip_query(uri: &str) -> &str { uri.split_once('?').map_or(uri, |(path, _)| path) }

/// The `Host` header without its port suffix; empty when absent.
///
/// The port is split off at the last `:` unless the authority ends with
/// `]`, so bracketed IPv6 literals keep their brackets.
fn hostname(req: &HttpRequest) -> String {
    let Some(value) = req.headers().get(header::HOST) else {
        return String::new();
    };
    let Ok(host) = value.to_str() else {
        return String::new();
    };
    if host.ends_with(']') {
        return host.to_string();
    }
    match host.rfind(':') {
        Some(colon) => host[..colon].to_string(),
        None => host.to_string(),
    }
}
