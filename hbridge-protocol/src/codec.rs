//! MessagePack codec for bridge messages

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum message size (10 MB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Pre-encoded `{success: false, error: "Unsupported message type"}`.
///
/// Sent in answer to text frames so that path never touches the encoder.
pub const UNSUPPORTED_FRAME_REPLY: &[u8] = b"\x82\xa7success\xc2\xa5error\xb8Unsupported message type";

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Message encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Message decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Encode a value as MessagePack with named struct fields
pub fn encode<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    encode_with_limit(value, MAX_MESSAGE_SIZE)
}

/// Encode, rejecting output larger than `max` bytes
pub fn encode_with_limit<T>(value: &T, max: usize) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let bytes = rmp_serde::to_vec_named(value)?;
    if bytes.len() > max {
        return Err(CodecError::MessageTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(bytes)
}

/// Decode a MessagePack payload
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    decode_with_limit(bytes, MAX_MESSAGE_SIZE)
}

/// Decode, rejecting input larger than `max` bytes
pub fn decode_with_limit<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::MessageTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(rmp_serde::from_slice(bytes)?)
}
