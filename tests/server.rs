//! End-to-end tests for the HTTP server over real sockets.

mod common;

use std::{thread, time::Duration};

use common::{RawConn, body_text, serve, start, status};
use crossbeam_channel::unbounded;
use http::StatusCode;
use httpwire::{
    config::ProxyProtocol,
    headers::Headers,
    server::{HttpServer, Request, Response, ResponseSink, respond},
};
use rstest::rstest;
use serial_test::serial;

fn hello() -> HttpServer {
    HttpServer::new(respond(|req| {
        (req.path() == Some("/")).then(|| Response::ok("hello"))
    }))
}

#[test]
fn get_returns_body_with_standard_headers() {
    let server = start(hello().server_name("httpwire-test"));
    let mut conn = RawConn::connect(server.local_addr());

    let response = conn.get("/");
    assert_eq!(status(&response), 200);
    assert_eq!(body_text(&response), "hello");
    assert_eq!(response.headers().get("content-length"), Some("5"));
    assert_eq!(response.headers().get("server"), Some("httpwire-test"));
    assert!(response.headers().contains("date"));
    assert!(response.keep_alive());
}

#[test]
fn keep_alive_serves_sequential_requests() {
    let server = start(hello());
    let mut conn = RawConn::connect(server.local_addr());
    for _ in 0..3 {
        assert_eq!(body_text(&conn.get("/")), "hello");
    }
}

#[test]
fn unanswered_request_gets_not_found() {
    let server = start(hello());
    let mut conn = RawConn::connect(server.local_addr());
    assert_eq!(status(&conn.get("/missing")), 404);
    assert_eq!(status(&conn.get("/")), 200);
}

#[test]
fn panicking_handler_gets_internal_error() {
    let server = serve(|req: Request, _sink: ResponseSink| {
        panic!("handler failed for {:?}", req.path());
    });
    let mut conn = RawConn::connect(server.local_addr());
    assert_eq!(status(&conn.get("/")), 500);
}

#[test]
#[serial]
fn pipelined_responses_keep_request_order() {
    let server = serve(|req: Request, sink: ResponseSink| {
        let path = req.path().unwrap_or_default().to_owned();
        if path == "/slow" {
            thread::sleep(Duration::from_millis(200));
        }
        sink.send(Response::ok(path));
    });
    let mut conn = RawConn::connect(server.local_addr());
    conn.send(concat!(
        "GET /slow HTTP/1.1\r\nHost: t\r\n\r\n",
        "GET /fast HTTP/1.1\r\nHost: t\r\n\r\n",
        "GET /last HTTP/1.1\r\nHost: t\r\n\r\n",
    ));
    assert_eq!(body_text(&conn.response()), "/slow");
    assert_eq!(body_text(&conn.response()), "/fast");
    assert_eq!(body_text(&conn.response()), "/last");
}

#[rstest]
#[case::garbage_request_line("NOT-HTTP\r\n\r\n", 400)]
#[case::missing_version("GET /\r\n\r\n", 400)]
#[case::oversized_target(&format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(300)), 414)]
#[case::oversized_body("POST / HTTP/1.1\r\nContent-Length: 5000\r\n\r\n", 413)]
fn malformed_requests_are_rejected_and_closed(#[case] request: &str, #[case] expected: u16) {
    let server = start(hello().max_line(256).max_body(1024));
    let mut conn = RawConn::connect(server.local_addr());
    conn.send(request);

    let response = conn.response();
    assert_eq!(status(&response), expected);
    assert!(!response.keep_alive());
    assert!(conn.is_closed());
}

#[test]
fn http10_connection_closes_after_response() {
    let server = start(hello());
    let mut conn = RawConn::connect(server.local_addr());
    conn.send("GET / HTTP/1.0\r\n\r\n");
    let response = conn.response();
    assert_eq!(body_text(&response), "hello");
    assert!(conn.is_closed());
}

#[test]
fn head_response_has_length_but_no_body() {
    let server = start(hello());
    let mut conn = RawConn::connect(server.local_addr());
    conn.send("HEAD / HTTP/1.1\r\nHost: t\r\n\r\n");
    let response = conn.head_response();
    assert_eq!(status(&response), 200);
    assert_eq!(response.headers().get("content-length"), Some("5"));
    assert!(response.body().is_empty());

    assert_eq!(body_text(&conn.get("/")), "hello");
}

#[test]
fn expect_continue_is_acknowledged_before_body() {
    let server = serve(|req: Request, sink: ResponseSink| {
        let body = req.into_message().into_body();
        sink.send(Response::ok(body));
    });
    let mut conn = RawConn::connect(server.local_addr());
    conn.send("POST /upload HTTP/1.1\r\nHost: t\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n");
    assert_eq!(status(&conn.response()), 100);

    conn.send("hello");
    let response = conn.response();
    assert_eq!(status(&response), 200);
    assert_eq!(body_text(&response), "hello");
}

#[test]
fn chunked_request_body_is_reassembled() {
    let server = serve(|req: Request, sink: ResponseSink| {
        let body = req.into_message().into_body();
        sink.send(Response::ok(body));
    });
    let mut conn = RawConn::connect(server.local_addr());
    conn.send(concat!(
        "POST / HTTP/1.1\r\nHost: t\r\nTransfer-Encoding: chunked\r\n\r\n",
        "5\r\nhello\r\n7;ext=1\r\n, world\r\n0\r\n\r\n",
    ));
    assert_eq!(body_text(&conn.response()), "hello, world");
}

#[test]
fn streamed_response_uses_chunked_coding() {
    let server = serve(|_req: Request, sink: ResponseSink| {
        let stream = sink.stream(StatusCode::OK, &Headers::new());
        for part in ["one ", "two ", "three"] {
            stream.send(part);
        }
        stream.finish();
    });
    let mut conn = RawConn::connect(server.local_addr());
    let response = conn.get("/");
    assert!(response.headers().is_chunked());
    assert_eq!(body_text(&response), "one two three");
    assert_eq!(status(&conn.get("/")), 200);
}

#[test]
fn response_can_be_sent_from_another_thread() {
    let server = serve(|_req: Request, sink: ResponseSink| {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            sink.send(Response::ok("later"));
        });
    });
    let mut conn = RawConn::connect(server.local_addr());
    assert_eq!(body_text(&conn.get("/")), "later");
}

#[test]
#[serial]
fn full_queue_answers_service_unavailable() {
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    let server = start(
        HttpServer::new(move |_req: Request, sink: ResponseSink| {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            sink.send(Response::ok("done"));
        })
        .workers(1)
        .queue_size(1),
    );
    let addr = server.local_addr();

    let mut busy = RawConn::connect(addr);
    busy.send("GET / HTTP/1.1\r\nHost: t\r\n\r\n");
    started_rx.recv().expect("worker picked up first request");

    let mut queued = RawConn::connect(addr);
    queued.send("GET / HTTP/1.1\r\nHost: t\r\n\r\n");
    thread::sleep(Duration::from_millis(100));

    let mut rejected = RawConn::connect(addr);
    let response = rejected.get("/");
    assert_eq!(status(&response), 503);

    release_tx.send(()).expect("release first");
    release_tx.send(()).expect("release second");
    assert_eq!(status(&busy.response()), 200);
    assert_eq!(status(&queued.response()), 200);
}

#[test]
#[serial]
fn idle_connection_is_closed() {
    let server = start(
        hello()
            .idle_timeout(Duration::from_millis(150))
            .sweep_interval(Duration::from_millis(20)),
    );
    let mut conn = RawConn::connect(server.local_addr());
    assert_eq!(status(&conn.get("/")), 200);
    thread::sleep(Duration::from_millis(400));
    assert!(conn.is_closed());
}

#[test]
#[serial]
fn slow_upload_keeps_connection_alive() {
    let server = start(
        HttpServer::new(|req: Request, sink: ResponseSink| {
            let body = req.into_message().into_body();
            sink.send(Response::ok(body));
        })
        .idle_timeout(Duration::from_millis(200))
        .sweep_interval(Duration::from_millis(20)),
    );
    let mut conn = RawConn::connect(server.local_addr());
    conn.send("POST /upload HTTP/1.1\r\nHost: t\r\nContent-Length: 10\r\n\r\n");
    for byte in b"0123456789" {
        thread::sleep(Duration::from_millis(60));
        conn.send([*byte]);
    }
    let response = conn.response();
    assert_eq!(status(&response), 200);
    assert_eq!(body_text(&response), "0123456789");
}

#[test]
fn proxy_preface_sets_remote_address() {
    let server = start(
        HttpServer::new(respond(|req| Some(Response::ok(req.remote_addr()))))
            .proxy_protocol(ProxyProtocol::Enabled),
    );
    let mut conn = RawConn::connect(server.local_addr());
    conn.send("PROXY TCP4 192.0.2.7 10.0.0.1 56324 80\r\n");
    assert_eq!(body_text(&conn.get("/")), "192.0.2.7");
    assert_eq!(body_text(&conn.get("/again")), "192.0.2.7");
}

#[test]
fn missing_required_preface_is_rejected() {
    let server = start(hello().proxy_protocol(ProxyProtocol::Enabled));
    let mut conn = RawConn::connect(server.local_addr());
    let response = conn.get("/");
    assert_eq!(status(&response), 400);
    assert!(conn.is_closed());
}

#[test]
fn stopped_server_refuses_new_requests() {
    let server = start(hello());
    let addr = server.local_addr();
    let mut conn = RawConn::connect(addr);
    assert_eq!(status(&conn.get("/")), 200);

    server.stop(Duration::from_secs(1));
    assert!(conn.is_closed());
    assert!(std::net::TcpStream::connect(addr).is_err());
}
