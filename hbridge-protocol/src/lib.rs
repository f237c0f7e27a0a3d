//! hbridge-protocol: wire definitions for the agent-control bridge
//!
//! Messages are MessagePack maps carried in binary WebSocket frames. This
//! crate defines the dynamic [`Value`] model, the codec, and the envelope
//! and reply types shared by the server and its clients.

pub mod codec;
pub mod messages;
pub mod value;

// Re-export main types at crate root
pub use codec::{decode, encode, CodecError, MAX_MESSAGE_SIZE, UNSUPPORTED_FRAME_REPLY};
pub use messages::{
    message_type, ApprovalMode, Envelope, EnvelopeError, InvalidApprovalMode, Reply,
    CANCELLED_BY_USER,
};
pub use value::{Map, Value};
