//! [`MessageDecoder`] as a `tokio_util` codec.

use futures::StreamExt;
use http::{Method, StatusCode};
use httpwire::codec::{DecodeError, MessageDecoder};
use tokio_util::codec::FramedRead;

#[tokio::test]
async fn framed_read_yields_pipelined_requests() {
    let input: &[u8] = concat!(
        "GET /a HTTP/1.1\r\nHost: t\r\n\r\n",
        "POST /b HTTP/1.1\r\nHost: t\r\nContent-Length: 3\r\n\r\nabc",
        "\r\n",
        "DELETE /c HTTP/1.1\r\nHost: t\r\n\r\n",
    )
    .as_bytes();
    let mut frames = FramedRead::new(input, MessageDecoder::request(1024, 1024));

    let mut seen = Vec::new();
    while let Some(message) = frames.next().await {
        let message = message.expect("valid request");
        seen.push((
            message.method().cloned().expect("request method"),
            message.path().map(str::to_owned).expect("request path"),
            message.body().clone(),
        ));
    }
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].0, Method::GET);
    assert_eq!(seen[1].1, "/b");
    assert_eq!(seen[1].2.as_ref(), b"abc");
    assert_eq!(seen[2].0, Method::DELETE);
}

#[tokio::test]
async fn framed_read_completes_body_on_eof() {
    let input: &[u8] = b"HTTP/1.0 200 OK\r\n\r\nread until close";
    let mut frames = FramedRead::new(input, MessageDecoder::response(1024, 1024));
    let message = frames
        .next()
        .await
        .expect("one message")
        .expect("valid response");
    assert_eq!(message.status(), Some(StatusCode::OK));
    assert_eq!(message.body().as_ref(), b"read until close");
    assert!(frames.next().await.is_none());
}

#[tokio::test]
async fn truncated_message_is_an_error() {
    let input: &[u8] = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort";
    let mut frames = FramedRead::new(input, MessageDecoder::request(1024, 1024));
    let result = frames.next().await.expect("an item");
    assert!(matches!(result, Err(DecodeError::UnexpectedEof { .. })));
}
