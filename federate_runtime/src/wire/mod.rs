//! The federation wire protocol: primitive encode/decode plus the message
//! catalogue built on top of it (spec.md §4.2–§4.3).

pub mod codec;
pub mod message;

pub use codec::{read_u8, write_u8, FrameIoError};
pub use message::{
    read_message, read_message_body, write_message, CodecError, Message, MessageType,
    RejectReason, TimedPayload, MAX_FEDERATION_ID_LEN,
};
