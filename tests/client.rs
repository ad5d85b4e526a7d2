//! End-to-end tests for the HTTP client.

mod common;

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    thread::{self, JoinHandle},
    time::Duration,
};

use common::{loopback, serve};
use crossbeam_channel::{Sender, unbounded};
use http::{Method, StatusCode};
use httpwire::{
    client::{Abort, ClientError, ClientRequest, HttpClient, ResponseListener, TimeoutPhase},
    config::ClientConfig,
    headers::Headers,
    server::{Request, Response, ResponseSink},
};
use rstest::{fixture, rstest};
use serial_test::serial;

#[fixture]
fn client() -> HttpClient {
    HttpClient::new(ClientConfig {
        sweep_interval: Duration::from_millis(20),
        ..ClientConfig::default()
    })
    .expect("start client")
}

fn url(addr: SocketAddr, path: &str) -> String { format!("http://{addr}{path}") }

fn echo(req: Request, sink: ResponseSink) {
    let port = req.peer_addr().port();
    let method = req.method().map(ToString::to_string).unwrap_or_default();
    let body = req.into_message().into_body();
    sink.send(
        Response::ok(body)
            .with_header("x-peer-port", port.to_string())
            .with_header("x-method", method),
    );
}

/// Read one request head from `stream`, returning it as text.
fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0_u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Raw peer running `script` for each accepted connection, in order.
fn raw_server<F>(connections: usize, script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(usize, TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind(loopback()).expect("bind raw server");
    let addr = listener.local_addr().expect("raw server address");
    let handle = thread::spawn(move || {
        for n in 0..connections {
            let (stream, _) = listener.accept().expect("accept");
            script(n, stream);
        }
    });
    (addr, handle)
}

#[rstest]
fn fetch_returns_complete_response(client: HttpClient) {
    let server = serve(echo);
    let request = ClientRequest::new(Method::POST, &url(server.local_addr(), "/items"))
        .expect("valid url")
        .with_body("payload");

    let response = client.fetch(&request).expect("response");
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.text(), "payload");
    assert_eq!(response.headers.get("x-method"), Some("POST"));
}

#[rstest]
fn keep_alive_reuses_connection(client: HttpClient) {
    let server = serve(echo);
    let request = ClientRequest::get(&url(server.local_addr(), "/")).expect("valid url");

    let first = client.fetch(&request).expect("first response");
    let second = client.fetch(&request).expect("second response");
    assert_eq!(
        first.headers.get("x-peer-port"),
        second.headers.get("x-peer-port")
    );
}

#[rstest]
fn connection_close_request_is_not_pooled(client: HttpClient) {
    let server = serve(echo);
    let request = ClientRequest::get(&url(server.local_addr(), "/"))
        .expect("valid url")
        .with_header("Connection", "close");

    let first = client.fetch(&request).expect("first response");
    let second = client.fetch(&request).expect("second response");
    assert_ne!(
        first.headers.get("x-peer-port"),
        second.headers.get("x-peer-port")
    );
}

#[rstest]
fn head_response_leaves_connection_usable(client: HttpClient) {
    let server = serve(echo);
    let addr = server.local_addr();
    let head = ClientRequest::new(Method::HEAD, &url(addr, "/")).expect("valid url");
    let response = client.fetch(&head).expect("head response");
    assert!(response.body.is_empty());

    let get = ClientRequest::get(&url(addr, "/")).expect("valid url");
    assert_eq!(client.fetch(&get).expect("get response").status, StatusCode::OK);
}

#[rstest]
fn chunked_response_is_decoded(client: HttpClient) {
    let server = serve(|_req: Request, sink: ResponseSink| {
        let stream = sink.stream(StatusCode::OK, &Headers::new());
        stream.send("chunked ");
        stream.send("body");
    });
    let request = ClientRequest::get(&url(server.local_addr(), "/")).expect("valid url");
    let response = client.fetch(&request).expect("response");
    assert_eq!(response.text(), "chunked body");
}

#[rstest]
fn body_delimited_by_close_completes_on_eof(client: HttpClient) {
    let (addr, peer) = raw_server(1, |_, mut stream| {
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\n\r\nuntil close")
            .expect("write response");
    });
    let request = ClientRequest::get(&url(addr, "/")).expect("valid url");
    let response = client.fetch(&request).expect("response");
    assert_eq!(response.text(), "until close");
    peer.join().expect("raw server");
}

#[rstest]
fn interim_response_is_skipped(client: HttpClient) {
    let (addr, peer) = raw_server(1, |_, mut stream| {
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok")
            .expect("write response");
    });
    let request = ClientRequest::get(&url(addr, "/")).expect("valid url");
    let response = client.fetch(&request).expect("response");
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.text(), "ok");
    peer.join().expect("raw server");
}

#[rstest]
fn stale_pooled_connection_is_retried(client: HttpClient) {
    let (seen_tx, seen_rx) = unbounded();
    let (addr, peer) = raw_server(2, move |n, mut stream| {
        // First connection answers once, then drops the second request.
        let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        seen_tx.send(read_head(&mut stream)).expect("record request");
        stream.write_all(reply).expect("write response");
        if n == 0 {
            seen_tx.send(read_head(&mut stream)).expect("record request");
        }
    });
    let request = ClientRequest::get(&url(addr, "/")).expect("valid url");

    assert_eq!(client.fetch(&request).expect("first").text(), "ok");
    assert_eq!(client.fetch(&request).expect("retried").text(), "ok");
    peer.join().expect("raw server");
    assert_eq!(seen_rx.try_iter().count(), 3);
}

#[rstest]
#[serial]
fn silent_server_times_out(client: HttpClient) {
    let (hold_tx, hold_rx) = unbounded::<()>();
    let (addr, peer) = raw_server(1, move |_, mut stream| {
        read_head(&mut stream);
        let _ = hold_rx.recv();
    });
    let request = ClientRequest::get(&url(addr, "/"))
        .expect("valid url")
        .with_timeout(Duration::from_millis(100));

    let err = client.fetch(&request).expect_err("timeout");
    assert!(matches!(
        err,
        ClientError::Timeout {
            phase: TimeoutPhase::Read
        }
    ));
    drop(hold_tx);
    peer.join().expect("raw server");
}

#[rstest]
fn refused_connection_reports_io_error(client: HttpClient) {
    let addr = TcpListener::bind(loopback())
        .and_then(|listener| listener.local_addr())
        .expect("reserve port");
    let request = ClientRequest::get(&url(addr, "/")).expect("valid url");
    assert!(matches!(client.fetch(&request), Err(ClientError::Io(_))));
}

#[rstest]
fn unsupported_scheme_is_reported(client: HttpClient) {
    let request = ClientRequest::get("https://127.0.0.1/").expect("valid url");
    assert!(matches!(
        client.fetch(&request),
        Err(ClientError::UnsupportedScheme(scheme)) if scheme == "https"
    ));
}

struct AbortOnHeaders(Sender<ClientError>);

impl ResponseListener for AbortOnHeaders {
    fn on_headers(&mut self, _headers: &Headers) -> Result<(), Abort> { Err(Abort) }

    fn on_completed(&mut self) {}

    fn on_error(&mut self, error: ClientError) { let _ = self.0.send(error); }
}

#[rstest]
fn listener_can_abort_exchange(client: HttpClient) {
    let server = serve(echo);
    let (tx, rx) = unbounded();
    let request = ClientRequest::get(&url(server.local_addr(), "/")).expect("valid url");
    client.exec(&request, AbortOnHeaders(tx));
    let error = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("listener notified");
    assert!(matches!(error, ClientError::Aborted));
}

struct PanicOnBody(Sender<ClientError>);

impl ResponseListener for PanicOnBody {
    fn on_body(&mut self, _chunk: bytes::Bytes) -> Result<(), Abort> { panic!("listener bug") }

    fn on_completed(&mut self) {}

    fn on_error(&mut self, error: ClientError) { let _ = self.0.send(error); }
}

#[rstest]
fn panicking_listener_is_contained(client: HttpClient) {
    let server = serve(echo);
    let (tx, rx) = unbounded();
    let request = ClientRequest::new(Method::POST, &url(server.local_addr(), "/"))
        .expect("valid url")
        .with_body("data");
    client.exec(&request, PanicOnBody(tx));
    let error = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("listener notified");
    assert!(matches!(error, ClientError::ListenerPanicked));

    let request = ClientRequest::get(&url(server.local_addr(), "/")).expect("valid url");
    assert!(client.fetch(&request).is_ok());
}

#[test]
#[serial]
fn shutdown_fails_pending_exchanges() {
    let client = HttpClient::new(ClientConfig::default()).expect("start client");
    let (hold_tx, hold_rx) = unbounded::<()>();
    let (addr, peer) = raw_server(1, move |_, mut stream| {
        read_head(&mut stream);
        let _ = hold_rx.recv();
    });
    let (listener, pending) = httpwire::client::CollectingListener::new();
    client.exec(
        &ClientRequest::get(&url(addr, "/")).expect("valid url"),
        listener,
    );
    thread::sleep(Duration::from_millis(100));
    client.shutdown();
    assert!(matches!(pending.wait(), Err(ClientError::Shutdown)));
    drop(hold_tx);
    peer.join().expect("raw server");
}
