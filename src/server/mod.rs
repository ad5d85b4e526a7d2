//! Reactor-based HTTP/1.1 and WebSocket server.
//!
//! One thread owns every socket and runs a `mio` poll loop. Decoded requests
//! are handed to a bounded [`Dispatcher`](crate::dispatch::Dispatcher) pool
//! where the application [`Handler`] runs. Responses travel back to the
//! reactor as commands and are written in request order, which keeps
//! pipelined exchanges correct even when handlers finish out of order.

use std::{net::TcpListener as StdTcpListener, sync::Arc};

use crate::config::ServerConfig;

/// HTTP server builder.
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// or [`Bound`]. Only a bound server can be started.
///
/// ```compile_fail
/// use httpwire::server::{HttpServer, Response, respond};
///
/// HttpServer::new(respond(|_| Some(Response::ok("hi"))))
///     .start()
///     .expect("unbound servers do not expose start()");
/// ```
pub struct HttpServer<S = Unbound>
where
    S: ServerState,
{
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) config: ServerConfig,
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server holds a listening socket.
#[derive(Debug)]
pub struct Bound {
    pub(crate) listener: StdTcpListener,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

mod command;
mod config;
mod connection;
pub mod error;
mod handler;
mod reactor;
mod runtime;
mod sink;

pub use config::binding;
pub use error::ServerError;
pub use handler::{Body, Handler, Request, Respond, Response, respond};
pub use runtime::ServerHandle;
pub use sink::{
    ResponseSink,
    ResponseStream,
    WebSocketChannel,
    WebSocketHandler,
    WsMessage,
};

#[cfg(test)]
pub(crate) mod test_util;
