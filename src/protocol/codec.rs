use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::ProtocolError;
use crate::protocol::backend::BackendMessage;
use crate::protocol::frontend::{FrontendMessage, StartupMessage};

/// Maximum message size in bytes (16 MB).
/// PostgreSQL allows up to 1 GB, but 16 MB is a reasonable default here.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Read a null-terminated string from a BytesMut buffer.
/// Returns an error if there's no null terminator within the buffer.
/// Returns the string (without the null terminator) if successful.
///
/// The search is bounded to keep malformed input from scanning unbounded
/// memory.
pub fn get_cstring(src: &mut BytesMut) -> Result<String, ProtocolError> {
    const MAX_CSTRING_LENGTH: usize = 64 * 1024;

    let Some(null_pos) = src.iter().take(MAX_CSTRING_LENGTH).position(|&b| b == 0) else {
        return Err(ProtocolError::InvalidMessage);
    };

    let bytes = src.split_to(null_pos);
    src.advance(1);
    String::from_utf8(bytes.to_vec()).map_err(ProtocolError::InvalidUtf8)
}

/// Read a nullable byte array from a BytesMut buffer.
/// Returns None if the value is SQL NULL (length = -1).
///
/// Wire format: Int32 length (-1 for NULL, >= 0 for data), then data bytes.
pub fn get_nullable_bytes(src: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
    if src.len() < 4 {
        return Err(ProtocolError::InvalidMessage);
    }

    let len = src.get_i32();
    if len < 0 {
        return Ok(None);
    }

    let len = len as usize;
    if src.len() < len {
        return Err(ProtocolError::InvalidMessage);
    }
    let bytes = src.split_to(len);
    Ok(Some(bytes.to_vec()))
}

/// Write a null-terminated string to a BytesMut buffer.
pub fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.extend_from_slice(s.as_bytes());
    dst.extend_from_slice(&[0]);
}

/// Splits off one complete typed frame (type byte + Int32 length + body).
///
/// Returns the type byte and the frame body with the header consumed, or
/// `None` if the buffer does not yet hold a complete frame.
fn split_typed_frame(
    src: &mut BytesMut,
    max_message_size: usize,
) -> Result<Option<(u8, BytesMut)>, ProtocolError> {
    // Need at least 5 bytes (type + length)
    if src.len() < 5 {
        return Ok(None);
    }

    // Peek at the length (bytes 1-4, don't consume yet)
    let len = i32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
    if len < 4 {
        return Err(ProtocolError::InvalidMessage);
    }
    if len > max_message_size {
        return Err(ProtocolError::MessageTooLarge(len));
    }

    // Total frame size = 1 (type byte) + length
    let total = 1 + len;
    if src.len() < total {
        return Ok(None);
    }

    let mut frame = src.split_to(total);
    let tag = frame.get_u8();
    frame.advance(4); // length, already validated
    Ok(Some((tag, frame)))
}

/// Client-role codec: encodes frontend messages (including the untyped
/// startup frame), decodes backend messages.
pub struct ClientCodec {
    pub(crate) max_message_size: usize,
}

impl ClientCodec {
    /// Creates a new ClientCodec with the default maximum message size.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ClientCodec {
    type Item = BackendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, mut frame)) = split_typed_frame(src, self.max_message_size)? else {
            return Ok(None);
        };
        BackendMessage::decode(tag, &mut frame).map(Some)
    }
}

impl Encoder<StartupMessage> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: StartupMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

impl Encoder<FrontendMessage> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: FrontendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

/// Backend-role codec for the startup phase: decodes the untyped startup
/// frame, encodes backend messages. Used by the scripted test backend.
pub struct StartupCodec {
    pub(crate) max_message_size: usize,
}

impl StartupCodec {
    /// Creates a new StartupCodec with the default maximum message size.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Transitions to the query-phase codec after successful startup.
    pub fn ready(self) -> BackendCodec {
        BackendCodec {
            max_message_size: self.max_message_size,
        }
    }
}

impl Default for StartupCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StartupCodec {
    type Item = StartupMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 8 bytes (length + protocol version)
        if src.len() < 8 {
            return Ok(None);
        }

        // Peek at the length (don't consume yet)
        let len = i32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len < 8 {
            return Err(ProtocolError::InvalidMessage);
        }
        if len > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge(len));
        }

        // Wait for the complete frame
        if src.len() < len {
            return Ok(None);
        }

        let mut frame = src.split_to(len);
        StartupMessage::decode(&mut frame).map(Some)
    }
}

impl Encoder<BackendMessage> for StartupCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

/// Backend-role codec for the query phase: decodes typed frontend messages,
/// encodes backend messages.
pub struct BackendCodec {
    pub(crate) max_message_size: usize,
}

impl BackendCodec {
    /// Creates a new BackendCodec with the default maximum message size.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for BackendCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BackendCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, mut frame)) = split_typed_frame(src, self.max_message_size)? else {
            return Ok(None);
        };
        FrontendMessage::decode(tag, &mut frame).map(Some)
    }
}

impl Encoder<BackendMessage> for BackendCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_cstring() {
        let mut buf = BytesMut::from(&b"hello\0world"[..]);
        assert_eq!(get_cstring(&mut buf).unwrap(), "hello".to_string());
        assert_eq!(buf, b"world"[..]);
    }

    #[test]
    fn test_get_cstring_incomplete() {
        let mut buf = BytesMut::from(&b"hello"[..]);
        assert!(get_cstring(&mut buf).is_err());
    }

    #[test]
    fn test_get_nullable_bytes_null() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFF][..]); // -1
        assert_eq!(get_nullable_bytes(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_get_nullable_bytes_data() {
        let mut buf = BytesMut::from(&[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'][..]);
        assert_eq!(
            get_nullable_bytes(&mut buf).unwrap(),
            Some(b"hello".to_vec())
        );
    }

    #[test]
    fn test_put_cstring() {
        let mut buf = BytesMut::new();
        put_cstring(&mut buf, "test");
        assert_eq!(buf, b"test\0"[..]);
    }

    #[test]
    fn test_split_typed_frame_incomplete() {
        // Header says 8 bytes of body, only 2 present
        let mut buf = BytesMut::from(&[b'D', 0, 0, 0, 12, 1, 2][..]);
        assert!(split_typed_frame(&mut buf, 1024).unwrap().is_none());
    }

    #[test]
    fn test_split_typed_frame_too_large() {
        let mut buf = BytesMut::from(&[b'D', 0x7F, 0, 0, 0][..]);
        assert!(matches!(
            split_typed_frame(&mut buf, 1024),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }
}
