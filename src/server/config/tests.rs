//! Tests for the `HttpServer` builder and binding typestate.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    time::Duration,
};

use rstest::rstest;

use super::*;
use crate::server::{
    ServerError,
    test_util::{free_listener, hello_handler, listener_addr},
};

#[rstest]
fn new_server_uses_defaults(hello_handler: impl Handler) {
    let server = HttpServer::new(hello_handler);
    assert_eq!(server.worker_count(), ServerConfig::default().workers);
    assert!(server.local_addr().is_none());
}

#[rstest]
#[case(0, 1)]
#[case(1, 1)]
#[case(16, 16)]
fn worker_count_is_clamped(hello_handler: impl Handler, #[case] requested: usize, #[case] expected: usize) {
    let server = HttpServer::new(hello_handler).workers(requested);
    assert_eq!(server.worker_count(), expected);
}

#[rstest]
fn builder_methods_chain(hello_handler: impl Handler) {
    let server = HttpServer::new(hello_handler)
        .queue_size(0)
        .idle_timeout(Duration::from_secs(5))
        .max_line(512)
        .max_body(4096)
        .max_ws_message(1024)
        .server_name("")
        .worker_thread_prefix("api")
        .proxy_protocol(ProxyProtocol::Optional);
    let cfg = server.config();
    assert_eq!(cfg.queue_size, 1);
    assert_eq!(cfg.idle_timeout, Duration::from_secs(5));
    assert_eq!(cfg.limits.max_line, 512);
    assert_eq!(cfg.limits.max_body, 4096);
    assert_eq!(cfg.limits.max_ws_message, 1024);
    assert!(cfg.server_name.is_empty());
    assert_eq!(cfg.worker_thread_prefix, "api");
    assert_eq!(cfg.proxy_protocol, ProxyProtocol::Optional);
}

#[rstest]
fn with_config_replaces_settings(hello_handler: impl Handler) {
    let config = ServerConfig {
        workers: 7,
        ..ServerConfig::default()
    };
    let server = HttpServer::new(hello_handler).with_config(config.clone());
    assert_eq!(server.config(), &config);
}

#[rstest]
fn bind_existing_listener_reports_address(hello_handler: impl Handler, free_listener: StdTcpListener) {
    let expected = listener_addr(&free_listener);
    let server = HttpServer::new(hello_handler)
        .bind_existing_listener(free_listener)
        .expect("bind");
    assert_eq!(server.local_addr(), Some(expected));
}

#[rstest]
fn bind_preserves_configuration(hello_handler: impl Handler) {
    let server = HttpServer::new(hello_handler)
        .workers(3)
        .bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0))
        .expect("bind");
    assert_eq!(server.worker_count(), 3);
    assert!(server.local_addr().is_some_and(|addr| addr.port() != 0));
}

#[rstest]
fn binding_an_occupied_port_fails(hello_handler: impl Handler, free_listener: StdTcpListener) {
    let taken = listener_addr(&free_listener);
    let err = HttpServer::new(hello_handler)
        .bind(taken)
        .err()
        .expect("port already in use");
    assert!(matches!(err, ServerError::Bind(_)));
}
