//! Netstring framing over real byte streams: split reads, several frames
//! back to back, and the end-of-session cases.

use pretty_assertions::assert_eq;
use tokio::io::{duplex, AsyncWriteExt, BufReader};
use tokio_test::io::Builder;

use tunclip::transport::protocol::{self, FramingError};
use tunclip::transport::{Outbox, TransportError};

#[tokio::test]
async fn test_frame_split_across_reads() {
    let mut reader = Builder::new()
        .read(b"1")
        .read(b"3:Hello")
        .read(b", World")
        .read(b"!,")
        .build();

    let payload = protocol::read_frame(&mut reader).await.unwrap();
    assert_eq!(payload, b"Hello, World!");
}

#[tokio::test]
async fn test_consecutive_frames_then_goodbye() {
    let mut reader = Builder::new().read(b"3:one,3:two,0:,").build();

    assert_eq!(protocol::read_frame(&mut reader).await.unwrap(), b"one");
    assert_eq!(protocol::read_frame(&mut reader).await.unwrap(), b"two");
    let last = protocol::read_frame(&mut reader).await.unwrap();
    assert!(protocol::is_goodbye(&last));
}

#[tokio::test]
async fn test_binary_payload_with_separators() {
    let payload = b"a:b,c\n\0d".to_vec();
    let mut reader = Builder::new().read(&protocol::encode(&payload)).build();
    assert_eq!(protocol::read_frame(&mut reader).await.unwrap(), payload);
}

#[tokio::test]
async fn test_clean_eof_between_frames() {
    let mut reader = Builder::new().read(b"2:ok,").build();
    protocol::read_frame(&mut reader).await.unwrap();

    let err = protocol::read_frame(&mut reader).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionClosed));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_eof_inside_payload_is_truncation() {
    let mut reader = Builder::new().read(b"10:short").build();

    let err = protocol::read_frame(&mut reader).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Framing(FramingError::Truncated {
            expected: 10,
            received: 5
        })
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_oversized_length_rejected_before_payload() {
    let mut reader = Builder::new().read(b"10485761:").build();

    let err = protocol::read_frame(&mut reader).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Framing(FramingError::PayloadTooLarge { .. })
    ));
}

#[tokio::test]
async fn test_eof_inside_length_names_digits_read() {
    let mut reader = Builder::new().read(b"4").read(b"2").build();

    let err = protocol::read_frame(&mut reader).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Framing(FramingError::TruncatedLength(ref digits)) if digits == "42"
    ));
    assert!(err.to_string().contains("\"42\""));
}

#[tokio::test]
async fn test_outbox_over_duplex() {
    let (mut local, remote) = duplex(64);
    let mut remote = BufReader::new(remote);

    let mut outbox = Outbox::new();
    outbox.push(b"clip");
    outbox.push_goodbye();
    outbox.drain(&mut local).await.unwrap();
    local.shutdown().await.unwrap();

    assert_eq!(protocol::read_frame(&mut remote).await.unwrap(), b"clip");
    assert!(protocol::is_goodbye(
        &protocol::read_frame(&mut remote).await.unwrap()
    ));
    assert!(matches!(
        protocol::read_frame(&mut remote).await,
        Err(TransportError::ConnectionClosed)
    ));
}
