//! Wire protocol for the tunclip link
//!
//! Every message is a netstring: `<ASCII decimal length>:<payload>,`.
//! The payload is the raw clipboard content. A zero-length payload is the
//! goodbye message, sent when a peer disconnects on purpose.
//!
//! ```text
//! "13:Hello, World!,"   13-byte clipboard payload
//! "0:,"                 goodbye
//! ```

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::transport::{Result, TransportError};

/// Maximum payload size accepted or produced (10 MiB).
pub const MAX_CONTENT_SIZE: usize = crate::MAX_PAYLOAD_SIZE;

/// Maximum number of digits in the length field.
pub const MAX_LENGTH_DIGITS: usize = 8;

/// The encoded goodbye message.
pub const GOODBYE: &[u8] = b"0:,";

/// Framing violations. All of them are fatal to the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A byte other than an ASCII digit appeared before the colon
    #[error("invalid character in length field: {0:#04x}")]
    InvalidLengthByte(u8),

    /// The length field had no digits
    #[error("empty length field")]
    EmptyLength,

    /// The length field exceeded the digit limit
    #[error("length field exceeds {MAX_LENGTH_DIGITS} digits")]
    LengthTooLong,

    /// The declared length exceeds the payload limit
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// The stream ended inside the length field
    #[error("stream ended inside length field after {0:?}")]
    TruncatedLength(String),

    /// The stream ended inside the payload
    #[error("stream ended after {received} of {expected} payload bytes")]
    Truncated { expected: usize, received: usize },

    /// The byte after the payload was not `,`
    #[error("expected ',' terminator, got {0:?}")]
    MissingTerminator(Option<u8>),
}

/// Encode a payload as a netstring.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let header = format!("{}:", payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len() + 1);
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame.push(b',');
    frame
}

/// Check a payload against the size limit before sending it.
pub fn validate_content_size(payload: &[u8]) -> bool {
    payload.len() <= MAX_CONTENT_SIZE
}

/// Whether a decoded payload is the goodbye message.
pub fn is_goodbye(payload: &[u8]) -> bool {
    payload.is_empty()
}

/// Read one netstring from `reader` and return its payload.
///
/// End of stream before the first byte of a frame is reported as
/// [`TransportError::ConnectionClosed`]; end of stream anywhere inside a
/// frame is a [`FramingError`].
///
/// Not cancel safe: dropping the future mid-frame loses the bytes already
/// consumed. Callers keep one read in flight until it completes.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let length = read_length(reader).await?;

    let mut payload = vec![0u8; length];
    let mut received = 0;
    while received < length {
        let n = reader.read(&mut payload[received..]).await?;
        if n == 0 {
            return Err(FramingError::Truncated {
                expected: length,
                received,
            }
            .into());
        }
        received += n;
    }

    match read_byte(reader).await? {
        Some(b',') => Ok(payload),
        other => Err(FramingError::MissingTerminator(other).into()),
    }
}

async fn read_length<R>(reader: &mut R) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut digits = String::with_capacity(MAX_LENGTH_DIGITS);
    loop {
        let byte = match read_byte(reader).await? {
            Some(byte) => byte,
            None if digits.is_empty() => return Err(TransportError::ConnectionClosed),
            None => return Err(FramingError::TruncatedLength(digits).into()),
        };

        if byte == b':' {
            break;
        }
        if !byte.is_ascii_digit() {
            return Err(FramingError::InvalidLengthByte(byte).into());
        }
        if digits.len() == MAX_LENGTH_DIGITS {
            return Err(FramingError::LengthTooLong.into());
        }
        digits.push(byte as char);
    }

    if digits.is_empty() {
        return Err(FramingError::EmptyLength.into());
    }

    // At most 8 ASCII digits, always fits.
    let length: usize = digits.parse().map_err(|_| FramingError::LengthTooLong)?;
    if length > MAX_CONTENT_SIZE {
        return Err(FramingError::PayloadTooLarge {
            size: length,
            max: MAX_CONTENT_SIZE,
        }
        .into());
    }
    Ok(length)
}

async fn read_byte<R>(reader: &mut R) -> Result<Option<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 1];
    match reader.read(&mut buf).await? {
        0 => Ok(None),
        _ => Ok(Some(buf[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    async fn decode(bytes: &[u8]) -> Result<Vec<u8>> {
        let mut reader = bytes;
        read_frame(&mut reader).await
    }

    #[test]
    fn test_encode_exact_bytes() {
        assert_eq!(encode(b"Hello, World!"), b"13:Hello, World!,".to_vec());
        assert_eq!(encode(b""), GOODBYE.to_vec());
    }

    #[tokio::test]
    async fn test_decode_simple_frame() {
        assert_eq!(decode(b"5:hello,").await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_decode_goodbye() {
        let payload = decode(GOODBYE).await.unwrap();
        assert!(is_goodbye(&payload));
    }

    #[tokio::test]
    async fn test_decode_binary_payload_with_separators() {
        let payload = b"1:2,3:\x00\xff,".to_vec();
        let frame = encode(&payload);
        assert_eq!(decode(&frame).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_decode_consecutive_frames() {
        let mut stream: &[u8] = b"3:abc,0:,";
        assert_eq!(read_frame(&mut stream).await.unwrap(), b"abc".to_vec());
        assert!(read_frame(&mut stream).await.unwrap().is_empty());
        assert!(matches!(
            read_frame(&mut stream).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[rstest]
    #[case::non_digit(b"1a:x,".as_slice(), FramingError::InvalidLengthByte(b'a'))]
    #[case::sign(b"-1:x,".as_slice(), FramingError::InvalidLengthByte(b'-'))]
    #[case::empty_length(b":,".as_slice(), FramingError::EmptyLength)]
    #[case::nine_digits(b"000000001:x,".as_slice(), FramingError::LengthTooLong)]
    #[case::oversized(b"10485761:".as_slice(), FramingError::PayloadTooLarge { size: 10_485_761, max: MAX_CONTENT_SIZE })]
    #[case::truncated(b"5:abc".as_slice(), FramingError::Truncated { expected: 5, received: 3 })]
    #[case::truncated_length(b"12".as_slice(), FramingError::TruncatedLength("12".to_string()))]
    #[case::wrong_terminator(b"3:abc;".as_slice(), FramingError::MissingTerminator(Some(b';')))]
    #[case::no_terminator(b"3:abc".as_slice(), FramingError::MissingTerminator(None))]
    #[tokio::test]
    async fn test_decode_rejects_malformed_frames(
        #[case] input: &[u8],
        #[case] expected: FramingError,
    ) {
        match decode(input).await {
            Err(TransportError::Framing(e)) => assert_eq!(e, expected),
            other => panic!("expected framing error {expected:?}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_eight_digit_length_is_accepted() {
        let mut frame = b"00000003:".to_vec();
        frame.extend_from_slice(b"abc,");
        assert_eq!(decode(&frame).await.unwrap(), b"abc".to_vec());
    }

    #[tokio::test]
    async fn test_max_size_payload_is_accepted() {
        let payload = vec![b'x'; MAX_CONTENT_SIZE];
        assert!(validate_content_size(&payload));
        assert_eq!(decode(&encode(&payload)).await.unwrap().len(), MAX_CONTENT_SIZE);
        assert!(!validate_content_size(&vec![b'x'; MAX_CONTENT_SIZE + 1]));
    }

    #[tokio::test]
    async fn test_eof_before_frame_is_connection_closed() {
        assert!(matches!(
            decode(b"").await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let decoded = runtime.block_on(decode(&encode(&payload))).unwrap();
            prop_assert_eq!(decoded, payload);
        }
    }
}
