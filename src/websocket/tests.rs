//! Unit tests for WebSocket framing and the opening handshake.

use bytes::{BufMut, BytesMut};
use rstest::rstest;

use super::{encoder::encode_frame_at, *};

const MAX_MESSAGE: usize = 128 * 1024;
const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

fn server_decoder() -> FrameDecoder { FrameDecoder::new(Endpoint::Server, MAX_MESSAGE) }

fn decode_one(decoder: &mut FrameDecoder, wire: &[u8]) -> Result<Option<Frame>, FrameError> {
    let mut src = wire;
    decoder.decode(&mut src)
}

#[rstest]
#[case::short_length(10)]
#[case::extended_16(200)]
#[case::extended_64(70_000)]
fn masked_client_frames_round_trip(#[case] len: usize) {
    let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
    let mut wire = BytesMut::new();
    FrameEncoder::new(Endpoint::Client).encode_into(&Frame::binary(payload.clone()), &mut wire);

    let frame = decode_one(&mut server_decoder(), &wire)
        .expect("decode")
        .expect("frame");
    assert_eq!(frame.opcode, Opcode::Binary);
    assert_eq!(frame.payload.as_ref(), payload.as_slice());
}

#[test]
fn server_frames_are_sent_unmasked() {
    let mut wire = BytesMut::new();
    FrameEncoder::new(Endpoint::Server).encode_into(&Frame::text("hi"), &mut wire);
    assert_eq!(&wire[..], &[0x81, 0x02, b'h', b'i']);

    let mut client = FrameDecoder::new(Endpoint::Client, MAX_MESSAGE);
    let frame = decode_one(&mut client, &wire).expect("decode").expect("frame");
    assert_eq!(frame.as_text().expect("utf8"), "hi");
}

#[test]
fn frames_resume_one_byte_at_a_time() {
    let mut wire = BytesMut::new();
    encode_frame(Opcode::Text, true, &[b'x'; 300], Some(MASK), &mut wire);

    let mut decoder = server_decoder();
    let mut frames = Vec::new();
    for byte in wire.iter() {
        let mut src: &[u8] = std::slice::from_ref(byte);
        if let Some(frame) = decoder.decode(&mut src).expect("decode") {
            frames.push(frame);
        }
    }
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload.as_ref(), &[b'x'; 300][..]);
    assert_eq!(decoder.state(), FrameState::FrameStart);
}

#[test]
fn unmasked_client_frame_is_rejected() {
    let mut wire = BytesMut::new();
    encode_frame(Opcode::Text, true, b"plain", None, &mut wire);
    let err = decode_one(&mut server_decoder(), &wire).expect_err("unmasked");
    assert!(matches!(err, FrameError::MaskMismatch));
    assert_eq!(err.close_code(), CloseCode::PROTOCOL_ERROR);
}

#[rstest]
#[case::sixteen_bit_for_short(&[0x82, 0xFE, 0x00, 0x7D])]
#[case::sixty_four_bit_for_medium(&[0x82, 0xFF, 0, 0, 0, 0, 0, 0, 0x03, 0xE8])]
fn non_minimal_lengths_are_rejected(#[case] wire: &[u8]) {
    let err = decode_one(&mut server_decoder(), wire).expect_err("non-minimal");
    assert!(matches!(err, FrameError::NonMinimalLength { .. }));
}

#[test]
fn fragments_reassemble_around_control_frames() {
    let mut wire = BytesMut::new();
    encode_frame_at(Opcode::Text, false, b"Hel", Some(MASK), 0, &mut wire);
    encode_frame(Opcode::Ping, true, b"are you there", Some(MASK), &mut wire);
    encode_frame_at(Opcode::Continuation, false, b"lo, ", Some([1, 2, 3, 4]), 3, &mut wire);
    encode_frame_at(Opcode::Continuation, true, b"world", Some([9, 8, 7, 6]), 7, &mut wire);

    let mut decoder = server_decoder();
    let mut src: &[u8] = &wire;

    let ping = decoder.decode(&mut src).expect("decode").expect("ping");
    assert_eq!(ping.opcode, Opcode::Ping);
    assert_eq!(ping.payload.as_ref(), b"are you there");
    assert!(decoder.in_message());

    let text = decoder.decode(&mut src).expect("decode").expect("text");
    assert_eq!(text.opcode, Opcode::Text);
    assert_eq!(text.as_text().expect("utf8"), "Hello, world");
    assert!(!decoder.in_message());
    assert!(src.is_empty());
}

#[test]
fn mask_index_continues_across_fragments() {
    let mask = [1, 2, 3, 4];
    let mut wire = BytesMut::new();
    encode_frame(Opcode::Binary, false, &[0; 3], Some(mask), &mut wire);
    wire.put_slice(&[0x80, 0x83]);
    wire.put_slice(&mask);
    // Three zero bytes masked from index 3 onwards.
    wire.put_slice(&[4, 1, 2]);

    let frame = decode_one(&mut server_decoder(), &wire)
        .expect("decode")
        .expect("frame");
    assert_eq!(frame.payload.as_ref(), &[0; 6]);
}

#[test]
fn fragmented_encoder_output_decodes_to_one_message() {
    let payload = vec![0xAB_u8; 1000];
    let mut wire = BytesMut::new();
    FrameEncoder::new(Endpoint::Client).encode_fragmented(
        &Frame::binary(payload.clone()),
        300,
        &mut wire,
    );

    let frame = decode_one(&mut server_decoder(), &wire)
        .expect("decode")
        .expect("frame");
    assert_eq!(frame.payload.as_ref(), payload.as_slice());
}

#[rstest]
#[case::orphan_continuation(Opcode::Continuation, None)]
#[case::new_message_mid_fragment(Opcode::Binary, Some(Opcode::Text))]
fn out_of_sequence_frames_are_rejected(#[case] opcode: Opcode, #[case] open: Option<Opcode>) {
    let mut wire = BytesMut::new();
    if let Some(first) = open {
        encode_frame(first, false, b"part", Some(MASK), &mut wire);
    }
    encode_frame(opcode, true, b"next", Some(MASK), &mut wire);

    let mut decoder = server_decoder();
    let mut src: &[u8] = &wire;
    let err = loop {
        match decoder.decode(&mut src) {
            Ok(Some(frame)) => panic!("unexpected frame {frame:?}"),
            Ok(None) if src.is_empty() => panic!("input exhausted without error"),
            Ok(None) => {}
            Err(err) => break err,
        }
    };
    assert!(matches!(err, FrameError::OpcodeMismatch { .. }));
}

#[test]
fn repeated_data_opcode_continues_open_message() {
    let mut wire = BytesMut::new();
    encode_frame(Opcode::Text, false, b"ab", Some(MASK), &mut wire);
    encode_frame(Opcode::Text, true, b"cd", Some(MASK), &mut wire);

    let frame = decode_one(&mut server_decoder(), &wire)
        .expect("decode")
        .expect("frame");
    assert_eq!(frame.payload.as_ref(), b"abcd");
}

#[test]
fn message_limit_applies_across_fragments() {
    let mut decoder = FrameDecoder::new(Endpoint::Server, 16);
    let mut wire = BytesMut::new();
    encode_frame(Opcode::Binary, false, &[0; 10], Some(MASK), &mut wire);
    encode_frame(Opcode::Continuation, true, &[0; 10], Some(MASK), &mut wire);

    let mut src: &[u8] = &wire;
    let err = decoder.decode(&mut src).expect_err("too large");
    assert!(matches!(
        err,
        FrameError::MessageTooLarge {
            attempted: 20,
            max: 16
        }
    ));
    assert_eq!(err.close_code(), CloseCode::MESSAGE_TOO_BIG);
}

#[rstest]
#[case::fragmented_ping(false, 4)]
#[case::oversized_ping(true, 126)]
fn invalid_control_frames_are_rejected(#[case] fin: bool, #[case] len: usize) {
    let mut wire = BytesMut::new();
    encode_frame(Opcode::Ping, fin, &vec![0; len], Some(MASK), &mut wire);
    let err = decode_one(&mut server_decoder(), &wire).expect_err("invalid control");
    assert!(matches!(err, FrameError::InvalidControlFrame));
}

#[test]
fn reserved_opcode_is_rejected() {
    let mut wire = BytesMut::new();
    wire.put_u8(0x83);
    wire.put_u8(0x80);
    let err = decode_one(&mut server_decoder(), &wire).expect_err("reserved");
    assert!(matches!(err, FrameError::ReservedOpcode(0x3)));
}

#[rstest]
#[case::with_code(Frame::close(CloseCode::GOING_AWAY, "bye"), Some(1001))]
#[case::empty_close(Frame::new(Opcode::Close, Vec::new()), Some(1000))]
#[case::not_close(Frame::text("x"), None)]
fn close_codes_are_read_from_payload(#[case] frame: Frame, #[case] expected: Option<u16>) {
    assert_eq!(frame.close_code(), expected);
}

#[test]
fn upgrade_response_carries_accept_key() {
    let response = upgrade_response("dGhlIHNhbXBsZSBub25jZQ==");
    let text = std::str::from_utf8(&response).expect("utf8");
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}
