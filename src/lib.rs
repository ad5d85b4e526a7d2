#![doc(html_root_url = "https://docs.rs/httpwire/latest")]
//! Non-blocking HTTP/1.1 and WebSocket engine.
//!
//! A server and a client built on readiness-driven reactors. Each reactor
//! owns its sockets on a single thread and hands application callbacks to a
//! bounded worker pool, so slow handlers never stall I/O and overload is
//! answered with `503` instead of unbounded queueing.
//!
//! The codec layers are usable on their own: [`codec::MessageDecoder`] is a
//! resumable push parser for requests and responses, and [`websocket`]
//! provides RFC 6455 framing and the upgrade handshake.

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod headers;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod server;
pub mod timer;
pub mod transport;
pub mod websocket;

pub use codec::{DecodeError, DecodeState, MessageDecoder};
pub use config::{ClientConfig, Limits, ProxyProtocol, ServerConfig};
pub use headers::Headers;
pub use message::{Head, Message};
pub use metrics::{CONNECTIONS_ACTIVE, DISPATCH_REJECTED, Direction, ERRORS_TOTAL, MESSAGES_TOTAL};
