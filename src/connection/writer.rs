//! Response scheduling onto the wire.
//!
//! The writer owns the outbound half of a connection: it consults the
//! orderer under head-of-line blocking, attaches keep-alive headers,
//! coalesces flushes across a read batch, and closes the connection after
//! the final response of a close-latched exchange has been flushed.

use std::io;

use http::header::HeaderValue;
use log::debug;
use tokio::sync::mpsc;

use super::orderer::{ResponseOrderer, Submission};
use crate::{
    error::log_unexpected,
    message::{HttpResponse, STREAM_ID_HEADER},
};

/// Outbound half of a connection, as seen by the dispatch core.
///
/// `write` enqueues a response without forcing it onto the wire; `flush`
/// pushes everything enqueued so far. Implementations are driven entirely
/// from the connection's task.
pub trait ResponseSink {
    /// Enqueue a response.
    ///
    /// # Errors
    ///
    /// Fails when the transport is no longer writable; the connection is
    /// closed in response.
    fn write(&mut self, res: HttpResponse) -> io::Result<()>;

    /// Push enqueued responses to the peer.
    ///
    /// # Errors
    ///
    /// Fails when the transport is no longer writable.
    fn flush(&mut self) -> io::Result<()>;

    /// Tear the transport down. Must be idempotent.
    fn close(&mut self);
}

/// Wire-bound event consumed by a framing layer.
#[derive(Debug)]
pub enum WireEvent {
    /// A response to encode onto the stream.
    Response(HttpResponse),
    /// Push buffered responses to the peer.
    Flush,
    /// Tear the connection down.
    Close,
}

/// [`ResponseSink`] feeding a framing layer through a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WireEvent>,
}

impl ChannelSink {
    /// A sink delivering wire events to `tx`.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<WireEvent>) -> Self { Self { tx } }

    fn send(&self, event: WireEvent) -> io::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed by framing layer"))
    }
}

impl ResponseSink for ChannelSink {
    fn write(&mut self, res: HttpResponse) -> io::Result<()> { self.send(WireEvent::Response(res)) }

    fn flush(&mut self) -> io::Result<()> { self.send(WireEvent::Flush) }

    fn close(&mut self) {
        let _ = self.tx.send(WireEvent::Close);
    }
}

/// Per-write context the dispatcher supplies.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WriteOptions {
    /// Whether an inbound batch is still being processed; if so, flushing
    /// is deferred to read-complete.
    pub(crate) is_reading: bool,
    /// Sequence of the final accepted request, once the connection has
    /// latched close-after-last-response.
    pub(crate) closing_seq: Option<u32>,
}

pub(crate) struct ResponseWriter<S> {
    sink: S,
    orderer: ResponseOrderer,
    use_hol_blocking: bool,
    close_on_flush: bool,
    closed: bool,
    label: String,
}

impl<S: ResponseSink> ResponseWriter<S> {
    pub(crate) fn new(sink: S, use_hol_blocking: bool, label: String) -> Self {
        Self {
            sink,
            orderer: ResponseOrderer::default(),
            use_hol_blocking,
            close_on_flush: false,
            closed: false,
            label,
        }
    }

    pub(crate) fn is_closed(&self) -> bool { self.closed }

    pub(crate) fn set_label(&mut self, label: String) { self.label = label; }

    pub(crate) fn pending_responses(&self) -> usize { self.orderer.pending_len() }

    /// Stop ordering responses; HTTP/2 multiplexing has its own streams.
    pub(crate) fn disable_hol_blocking(&mut self) { self.use_hol_blocking = false; }

    /// Schedule `res` as the answer to request `seq`.
    pub(crate) fn respond(
        &mut self,
        seq: u32,
        stream_id: Option<HeaderValue>,
        mut res: HttpResponse,
        opts: WriteOptions,
    ) {
        if self.closed {
            debug!("response dropped after close: conn={}, seq={seq}", self.label);
            return;
        }

        if let Some(id) = stream_id {
            res.headers_mut().insert(STREAM_ID_HEADER, id);
        }

        if self.use_hol_blocking {
            match self.orderer.submit(seq, res) {
                Submission::Buffered => return,
                Submission::Emit(run) => {
                    for (emitted_seq, emitted) in run {
                        self.write_one(emitted_seq, emitted, opts.closing_seq);
                        if self.closed {
                            return;
                        }
                    }
                }
            }
        } else {
            self.write_one(seq, res, opts.closing_seq);
            if self.closed {
                return;
            }
        }

        if !opts.is_reading {
            self.flush();
        }
    }

    fn write_one(&mut self, seq: u32, mut res: HttpResponse, closing_seq: Option<u32>) {
        let closing = closing_seq == Some(seq);
        if !closing {
            res.add_keep_alive_headers();
        } else {
            self.close_on_flush = true;
        }

        if let Err(cause) = self.sink.write(res) {
            log_unexpected(&self.label, &cause);
            self.close_now();
        }
    }

    /// Flush the batch; called at read-complete and after any write made
    /// outside a read batch.
    pub(crate) fn flush(&mut self) {
        if self.closed {
            return;
        }
        if let Err(cause) = self.sink.flush() {
            log_unexpected(&self.label, &cause);
            self.close_now();
            return;
        }
        if self.close_on_flush {
            self.close_now();
        }
    }

    pub(crate) fn close_now(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sink.close();
    }
}
