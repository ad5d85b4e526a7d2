//! Asynchronous HTTP/1.1 client.
//!
//! [`HttpClient`] owns a single reactor thread that connects, writes
//! requests, decodes responses and keeps idle connections in a
//! [`ConnectionPool`] for reuse. Responses are delivered incrementally to a
//! [`ResponseListener`]; [`CollectingListener`] buffers one for callers that
//! simply want to block on the result.
//!
//! A request that fails on a pooled connection before any response byte
//! arrives is retried once on a fresh connection, since the server most
//! likely closed the idle connection while it sat in the pool.

mod error;
mod listener;
mod pool;
mod reactor;
mod request;
mod runtime;

pub use error::{ClientError, TimeoutPhase};
pub use listener::{Abort, ClientResponse, CollectingListener, PendingResponse, ResponseListener};
pub use pool::ConnectionPool;
pub use request::ClientRequest;
pub use runtime::HttpClient;
