//! Generated checks that decoding is independent of how input is split.

use bytes::BytesMut;
use http::StatusCode;
use proptest::{
    collection::vec,
    prelude::{Strategy, any},
    prop_assert_eq,
    test_runner::{Config as ProptestConfig, RngAlgorithm, TestCaseError, TestRng, TestRunner},
};
use rstest::rstest;

use crate::codec::{DecodeState, MessageDecoder, encode_chunked};

fn deterministic_runner(cases: u32) -> TestRunner {
    let config = ProptestConfig {
        cases,
        ..ProptestConfig::default()
    };
    TestRunner::new_with_rng(config, TestRng::deterministic_rng(RngAlgorithm::ChaCha))
}

fn wire_request(body: &[u8], chunked: bool) -> Vec<u8> {
    let mut wire = BytesMut::new();
    if chunked {
        wire.extend_from_slice(
            b"POST /items HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        encode_chunked(body, 7, &mut wire);
    } else {
        wire.extend_from_slice(
            format!(
                "POST /items HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .as_bytes(),
        );
        wire.extend_from_slice(body);
    }
    wire.to_vec()
}

/// How a generated response delimits its body.
#[derive(Clone, Copy, Debug)]
enum Framing {
    Length,
    Chunked,
    UntilClose,
}

fn wire_response(body: &[u8], framing: Framing) -> Vec<u8> {
    let mut wire = BytesMut::from(&b"HTTP/1.1 200 OK\r\nServer: generated\r\n"[..]);
    match framing {
        Framing::Length => {
            wire.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            wire.extend_from_slice(body);
        }
        Framing::Chunked => {
            wire.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
            encode_chunked(body, 11, &mut wire);
        }
        Framing::UntilClose => {
            wire.extend_from_slice(b"\r\n");
            wire.extend_from_slice(body);
        }
    }
    wire.to_vec()
}

/// Feed `wire` to `decoder` in pieces sized by cycling through `sizes`.
fn decode_in_pieces(
    decoder: &mut MessageDecoder,
    wire: &[u8],
    sizes: &[usize],
) -> Result<DecodeState, TestCaseError> {
    let mut offset = 0;
    let mut state = decoder.state();
    for size in sizes.iter().cycle() {
        if offset >= wire.len() {
            break;
        }
        let end = (offset + size).min(wire.len());
        let mut piece = &wire[offset..end];
        state = decoder
            .decode(&mut piece)
            .map_err(|err| TestCaseError::fail(format!("decode failed: {err}")))?;
        prop_assert_eq!(piece.len(), 0);
        offset = end;
    }
    Ok(state)
}

fn split_strategy() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
    (vec(any::<u8>(), 0..300), vec(1usize..40, 1..64))
}

#[rstest]
#[case::fixed_length(false, 96)]
#[case::chunked(true, 96)]
fn arbitrary_splits_yield_the_same_message(#[case] chunked: bool, #[case] cases: u32) {
    let mut runner = deterministic_runner(cases);

    runner
        .run(&split_strategy(), |(body, sizes)| {
            let wire = wire_request(&body, chunked);
            let mut decoder = MessageDecoder::request(512, 4096);
            let state = decode_in_pieces(&mut decoder, &wire, &sizes)?;

            prop_assert_eq!(state, DecodeState::AllRead);
            let message = decoder
                .take_message()
                .ok_or_else(|| TestCaseError::fail("missing message".to_owned()))?;
            prop_assert_eq!(message.body().as_ref(), body.as_slice());
            prop_assert_eq!(message.headers().get("host"), Some("localhost"));
            Ok(())
        })
        .expect("split input should decode identically");
}

#[rstest]
#[case::fixed_length(Framing::Length)]
#[case::chunked(Framing::Chunked)]
#[case::until_close(Framing::UntilClose)]
fn arbitrary_splits_yield_the_same_response(#[case] framing: Framing) {
    let mut runner = deterministic_runner(64);

    runner
        .run(&split_strategy(), |(body, sizes)| {
            let wire = wire_response(&body, framing);
            let mut decoder = MessageDecoder::response(512, 4096);
            let mut state = decode_in_pieces(&mut decoder, &wire, &sizes)?;
            if matches!(framing, Framing::UntilClose) {
                prop_assert_eq!(state, DecodeState::ReadVariableLengthContent);
                state = decoder
                    .decode_eof()
                    .map_err(|err| TestCaseError::fail(format!("eof failed: {err}")))?;
            }

            prop_assert_eq!(state, DecodeState::AllRead);
            let message = decoder
                .take_message()
                .ok_or_else(|| TestCaseError::fail("missing message".to_owned()))?;
            prop_assert_eq!(message.status(), Some(StatusCode::OK));
            prop_assert_eq!(message.body().as_ref(), body.as_slice());
            prop_assert_eq!(message.headers().get("server"), Some("generated"));
            Ok(())
        })
        .expect("split response should decode identically");
}
