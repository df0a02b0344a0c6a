mod common;

use switchyard::FrameError;
use switchyard::error::Error;
use switchyard::ws::frame::{Frame, MAX_INLINE_LEN, Opcode, read_frame};

use common::client_frame;

async fn decode(bytes: &[u8]) -> switchyard::Result<Frame> {
    let mut reader = bytes;
    read_frame(&mut reader, 1 << 20).await
}

fn protocol_error(result: switchyard::Result<Frame>) -> FrameError {
    match result {
        Err(Error::Protocol(e)) => e,
        other => panic!("expected a protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_round_trip_across_length_boundaries() {
    for len in [0usize, 1, 125, 126, 127, 65535, 65536, 70000] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        for sent in [Frame::text(payload.clone()), Frame::binary(payload.clone())] {
            let decoded = decode(&sent.to_bytes()).await.unwrap();

            assert_eq!(decoded.opcode, sent.opcode, "len {len}");
            assert!(decoded.fin, "len {len}");
            assert!(!decoded.is_masked(), "len {len}");
            assert_eq!(decoded.payload, sent.payload, "len {len}");
        }
    }
}

#[test]
fn test_header_length_encoding_at_boundaries() {
    let header_len = |len: usize| Frame::binary(vec![0; len]).to_bytes().len() - len;

    assert_eq!(header_len(0), 2);
    assert_eq!(header_len(MAX_INLINE_LEN), 2);
    assert_eq!(header_len(126), 4);
    assert_eq!(header_len(65535), 4);
    assert_eq!(header_len(65536), 10);
}

#[test]
fn test_server_frames_are_final_and_unmasked() {
    let mut frame = Frame::text("x");
    frame.fin = false;
    frame.mask = Some([1, 2, 3, 4]);

    let bytes = frame.to_bytes();

    assert_eq!(bytes[0], 0x81);
    assert_eq!(bytes[1] & 0x80, 0);
    assert_eq!(&bytes[2..], b"x");
}

#[tokio::test]
async fn test_unmasks_client_frames_of_every_length_class() {
    let key = [0xde, 0xad, 0xbe, 0xef];
    for len in [5usize, 300, 70000] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 7) as u8).collect();

        let frame = decode(&client_frame(0x82, &payload, Some(key))).await.unwrap();

        assert_eq!(frame.mask, Some(key));
        assert_eq!(frame.payload, payload);
    }
}

#[tokio::test]
async fn test_fragmented_frames_are_refused() {
    let first = client_frame(0x01, b"Hel", Some([1, 1, 1, 1]));
    assert_eq!(protocol_error(decode(&first).await), FrameError::Fragmented);
}

#[tokio::test]
async fn test_fragment_is_consumed_before_the_error() {
    let mut wire = client_frame(0x01, b"part", Some([9, 9, 9, 9]));
    wire.extend(client_frame(0x89, b"p", Some([9, 9, 9, 9])));
    let mut reader = wire.as_slice();

    assert!(read_frame(&mut reader, 1024).await.is_err());
    let next = read_frame(&mut reader, 1024).await.unwrap();

    assert_eq!(next.opcode, Opcode::Ping);
    assert_eq!(next.payload, b"p");
}

#[tokio::test]
async fn test_reserved_bits_and_opcodes_are_protocol_errors() {
    assert_eq!(
        protocol_error(decode(&client_frame(0xC1, b"", None)).await),
        FrameError::ReservedBits
    );
    assert_eq!(
        protocol_error(decode(&client_frame(0x83, b"", None)).await),
        FrameError::ReservedOpcode(0x3)
    );
}

#[tokio::test]
async fn test_oversized_control_frames_are_refused() {
    let ping = client_frame(0x89, &[0u8; 126], None);
    assert_eq!(
        protocol_error(decode(&ping).await),
        FrameError::ControlFrameTooLong(126)
    );
}

#[tokio::test]
async fn test_payload_limit_is_checked_before_reading() {
    // Header claims 2^40 bytes; none follow.
    let mut wire = vec![0x82, 127];
    wire.extend_from_slice(&(1u64 << 40).to_be_bytes());

    assert_eq!(
        protocol_error(decode(&wire).await),
        FrameError::PayloadTooLarge {
            len: 1 << 40,
            max: 1 << 20
        }
    );
}

#[tokio::test]
async fn test_truncated_frame_is_an_io_error() {
    let result = decode(&[0x81, 0x05, b'H', b'i']).await;
    assert!(matches!(result, Err(Error::StreamIo(_))));
}
