#![doc(html_root_url = "https://docs.rs/portico/latest")]
//! Server-side request dispatch core for an asynchronous HTTP/RPC server
//! framework.
//!
//! The crate sits between a framing layer, which owns the socket and the
//! HTTP wire format, and application services. For each accepted
//! connection a [`ServerConnection`] routes decoded requests to services
//! registered under virtual hosts, decodes them through the matched
//! service's codec, runs the handler under a per-request deadline, and
//! schedules responses back onto the wire, preserving HTTP/1.1 pipelining
//! order and keep-alive semantics. The client side contributes an
//! [`IdleTimeoutMonitor`] that retires connections with nothing in
//! flight.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod invocation;
pub mod message;
pub mod metrics;
pub mod protocol;
pub mod route;
pub mod service;

pub use client::{IdleHandle, IdleTimeoutMonitor};
pub use codec::{DecodeRequest, DecodeResult, ServiceCodec};
pub use config::{FixedRequestTimeout, RequestTimeoutPolicy, ServerConfig, ServerConfigBuilder};
pub use connection::{ChannelSink, ResponseSink, ServerConnection, WireEvent};
pub use error::{BoxError, DispatchError};
pub use invocation::{Completion, InvocationContext, InvocationPromise};
pub use message::{
    DecoderFailure, Http2Settings, HttpRequest, HttpResponse, InboundMessage, STREAM_ID_HEADER,
};
pub use protocol::SessionProtocol;
pub use route::{MappedService, PathMapping, VirtualHost};
pub use service::{service_fn, BlockingTaskExecutor, ServiceFn, ServiceHandler, ServiceOutput};
