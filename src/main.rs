//! Demo server for `httpwire`.
//!
//! Serves a greeting on `/`, echoes request bodies on `/echo`, streams a
//! countdown on `/count` and echoes WebSocket messages on `/ws`.

mod cli;

use std::{error::Error, thread};

use clap::Parser;
use http::StatusCode;
use httpwire::{
    headers::Headers,
    server::{HttpServer, Request, Response, ResponseSink, WebSocketChannel, WebSocketHandler, WsMessage},
};
use tracing::info;

struct Echo;

impl WebSocketHandler for Echo {
    fn on_open(&self, channel: &WebSocketChannel) {
        info!(peer = %channel.peer_addr(), "websocket opened");
    }

    fn on_message(&self, channel: &WebSocketChannel, message: WsMessage) {
        match message {
            WsMessage::Text(text) => channel.send_text(text),
            WsMessage::Binary(data) => channel.send_binary(data),
        };
    }

    fn on_close(&self, channel: &WebSocketChannel, code: u16) {
        info!(peer = %channel.peer_addr(), code, "websocket closed");
    }
}

fn route(request: Request, sink: ResponseSink) {
    let path = request.path().unwrap_or_default().to_owned();
    match path.as_str() {
        "/" => sink.send(Response::text(StatusCode::OK, "Hello from httpwire!\n")),
        "/echo" => {
            let body = request.into_message().into_body();
            sink.send(Response::ok(body));
        }
        "/count" => {
            let stream = sink.stream(StatusCode::OK, &Headers::new());
            for n in (1..=5).rev() {
                stream.send(format!("{n}\n"));
            }
        }
        "/ws" => {
            sink.upgrade(Echo);
        }
        _ => drop(sink),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "metrics exporter listening");
    }
    #[cfg(not(feature = "metrics"))]
    let _ = cli.metrics_addr;

    let mut server = HttpServer::new(route);
    if let Some(workers) = cli.workers {
        server = server.workers(workers);
    }
    if let Some(size) = cli.queue_size {
        server = server.queue_size(size);
    }
    if let Some(timeout) = cli.idle_timeout {
        server = server.idle_timeout(timeout);
    }
    let handle = server.bind(cli.addr)?.start()?;
    info!(addr = %handle.local_addr(), "serving; press Ctrl-C to stop");

    loop {
        thread::park();
    }
}
