//! Message types of the federation wire protocol (spec.md §4.3).
//!
//! Every frame starts with a 1-byte [`MessageType`], followed by a
//! type-determined fixed payload, followed by an optional variable-length
//! body whose length is declared in the fixed payload (spec.md invariant 3).
//! There is no overall length prefix.

use std::io::{Read, Write};

use federate_core::{FederateId, PortId, Timestamp};

use super::codec::{
    read_exact, read_i64_le, read_u16_le, read_u32_le, read_u8, write_all, write_i64_le,
    write_u16_le, write_u32_le, write_u8, FrameIoError,
};

/// Maximum length of a federation identifier, per spec.md §3.
pub const MAX_FEDERATION_ID_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    FedId = 1,
    Ack = 2,
    Reject = 3,
    AddressAd = 4,
    AddressQuery = 5,
    AddressReply = 6,
    Timestamp = 7,
    NextEventTime = 8,
    TimeAdvanceGrant = 9,
    LogicalTimeComplete = 10,
    Stop = 11,
    TimedMessage = 12,
    P2pTimedMessage = 13,
    P2pSendingFedId = 14,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        use MessageType::*;
        Ok(match byte {
            1 => FedId,
            2 => Ack,
            3 => Reject,
            4 => AddressAd,
            5 => AddressQuery,
            6 => AddressReply,
            7 => Timestamp,
            8 => NextEventTime,
            9 => TimeAdvanceGrant,
            10 => LogicalTimeComplete,
            11 => Stop,
            12 => TimedMessage,
            13 => P2pTimedMessage,
            14 => P2pSendingFedId,
            other => return Err(other),
        })
    }
}

/// Cause carried by a [`Message::Reject`] frame (spec.md §4.3/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    FederationIdDoesNotMatch = 1,
    WrongServer = 2,
    FederateIdInUse = 3,
    FederateIdOutOfRange = 4,
    UnexpectedMessage = 5,
}

impl TryFrom<u8> for RejectReason {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        use RejectReason::*;
        Ok(match byte {
            1 => FederationIdDoesNotMatch,
            2 => WrongServer,
            3 => FederateIdInUse,
            4 => FederateIdOutOfRange,
            5 => UnexpectedMessage,
            other => return Err(other),
        })
    }
}

/// A timestamped payload addressed to a port of a remote federate, common to
/// `TIMED_MESSAGE` and `P2P_TIMED_MESSAGE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedPayload {
    pub dest_port: PortId,
    pub dest_federate: FederateId,
    pub timestamp: Timestamp,
    pub body: Vec<u8>,
}

/// One parsed protocol message. See spec.md §4.3 for the wire shape of each
/// variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    FedId {
        fed_id: FederateId,
        federation_id: String,
    },
    Ack,
    Reject {
        cause: RejectReason,
    },
    AddressAd {
        port: u32,
    },
    AddressQuery {
        fed_id: FederateId,
    },
    /// `port == -1` means "unknown, retry" (spec.md §4.3).
    AddressReply {
        port: i32,
        addr: [u8; 4],
    },
    Timestamp(Timestamp),
    NextEventTime(Timestamp),
    TimeAdvanceGrant(Timestamp),
    LogicalTimeComplete(Timestamp),
    /// The carried time is informational only (spec.md §9 open questions).
    Stop(Timestamp),
    TimedMessage(TimedPayload),
    P2pTimedMessage(TimedPayload),
    P2pSendingFedId {
        fed_id: FederateId,
        federation_id: String,
    },
}

/// Errors specific to message framing, layered over [`FrameIoError`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] FrameIoError),
    #[error("unknown message type byte: {0}")]
    UnknownMessageType(u8),
    #[error("unknown reject cause byte: {0}")]
    UnknownRejectCause(u8),
    #[error("federation id {len} bytes exceeds the {MAX_FEDERATION_ID_LEN}-byte limit")]
    FederationIdTooLong { len: usize },
    #[error("federation id is not valid UTF-8")]
    FederationIdNotUtf8(#[from] std::string::FromUtf8Error),
    #[error("declared body length {len} exceeds the {max} byte limit")]
    BodyTooLarge { len: u32, max: u32 },
}

fn read_federation_id(reader: &mut impl Read) -> Result<String, CodecError> {
    let len = read_u8(reader)? as usize;
    let mut bytes = vec![0u8; len];
    read_exact(reader, &mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

fn write_federation_id(writer: &mut impl Write, federation_id: &str) -> Result<(), CodecError> {
    let bytes = federation_id.as_bytes();
    if bytes.len() > MAX_FEDERATION_ID_LEN {
        return Err(CodecError::FederationIdTooLong { len: bytes.len() });
    }
    write_u8(writer, bytes.len() as u8)?;
    write_all(writer, bytes)?;
    Ok(())
}

fn read_timed_payload(reader: &mut impl Read, max_body_len: u32) -> Result<TimedPayload, CodecError> {
    let dest_port = PortId::new(read_u16_le(reader)?);
    let dest_federate = FederateId::new(read_u16_le(reader)?);
    let length = read_u32_le(reader)?;
    if length > max_body_len {
        return Err(CodecError::BodyTooLarge {
            len: length,
            max: max_body_len,
        });
    }
    let timestamp = Timestamp::from_nanos(read_i64_le(reader)?);
    let mut body = vec![0u8; length as usize];
    read_exact(reader, &mut body)?;
    Ok(TimedPayload {
        dest_port,
        dest_federate,
        timestamp,
        body,
    })
}

fn write_timed_payload(writer: &mut impl Write, payload: &TimedPayload) -> Result<(), CodecError> {
    write_u16_le(writer, payload.dest_port.get())?;
    write_u16_le(writer, payload.dest_federate.get())?;
    write_u32_le(writer, payload.body.len() as u32)?;
    write_i64_le(writer, payload.timestamp.as_nanos())?;
    write_all(writer, &payload.body)?;
    Ok(())
}

/// Read one frame, including its leading type byte. A clean peer close at
/// the frame boundary surfaces as `Err(CodecError::Io(FrameIoError::Closed))`.
pub fn read_message(reader: &mut impl Read, max_body_len: u32) -> Result<Message, CodecError> {
    let type_byte = read_u8(reader)?;
    let message_type =
        MessageType::try_from(type_byte).map_err(CodecError::UnknownMessageType)?;
    read_message_body(reader, message_type, max_body_len)
}

/// Read a frame's body given its already-consumed type byte. Used by readers
/// that dispatch on the type byte before deciding how (or whether) to parse
/// the rest (spec.md §4.5).
pub fn read_message_body(
    reader: &mut impl Read,
    message_type: MessageType,
    max_body_len: u32,
) -> Result<Message, CodecError> {
    Ok(match message_type {
        MessageType::FedId => {
            let fed_id = FederateId::new(read_u16_le(reader)?);
            let federation_id = read_federation_id(reader)?;
            Message::FedId {
                fed_id,
                federation_id,
            }
        }
        MessageType::Ack => Message::Ack,
        MessageType::Reject => {
            let cause_byte = read_u8(reader)?;
            let cause =
                RejectReason::try_from(cause_byte).map_err(CodecError::UnknownRejectCause)?;
            Message::Reject { cause }
        }
        MessageType::AddressAd => Message::AddressAd {
            port: read_u32_le(reader)?,
        },
        MessageType::AddressQuery => Message::AddressQuery {
            fed_id: FederateId::new(read_u16_le(reader)?),
        },
        MessageType::AddressReply => {
            let port = read_u32_le(reader)? as i32;
            let mut addr = [0u8; 4];
            read_exact(reader, &mut addr)?;
            Message::AddressReply { port, addr }
        }
        MessageType::Timestamp => Message::Timestamp(Timestamp::from_nanos(read_i64_le(reader)?)),
        MessageType::NextEventTime => {
            Message::NextEventTime(Timestamp::from_nanos(read_i64_le(reader)?))
        }
        MessageType::TimeAdvanceGrant => {
            Message::TimeAdvanceGrant(Timestamp::from_nanos(read_i64_le(reader)?))
        }
        MessageType::LogicalTimeComplete => {
            Message::LogicalTimeComplete(Timestamp::from_nanos(read_i64_le(reader)?))
        }
        MessageType::Stop => Message::Stop(Timestamp::from_nanos(read_i64_le(reader)?)),
        MessageType::TimedMessage => {
            Message::TimedMessage(read_timed_payload(reader, max_body_len)?)
        }
        MessageType::P2pTimedMessage => {
            Message::P2pTimedMessage(read_timed_payload(reader, max_body_len)?)
        }
        MessageType::P2pSendingFedId => {
            let fed_id = FederateId::new(read_u16_le(reader)?);
            let federation_id = read_federation_id(reader)?;
            Message::P2pSendingFedId {
                fed_id,
                federation_id,
            }
        }
    })
}

/// Write one frame, including its leading type byte.
pub fn write_message(writer: &mut impl Write, message: &Message) -> Result<(), CodecError> {
    match message {
        Message::FedId {
            fed_id,
            federation_id,
        } => {
            write_u8(writer, MessageType::FedId as u8)?;
            write_u16_le(writer, fed_id.get())?;
            write_federation_id(writer, federation_id)?;
        }
        Message::Ack => {
            write_u8(writer, MessageType::Ack as u8)?;
        }
        Message::Reject { cause } => {
            write_u8(writer, MessageType::Reject as u8)?;
            write_u8(writer, *cause as u8)?;
        }
        Message::AddressAd { port } => {
            write_u8(writer, MessageType::AddressAd as u8)?;
            write_u32_le(writer, *port)?;
        }
        Message::AddressQuery { fed_id } => {
            write_u8(writer, MessageType::AddressQuery as u8)?;
            write_u16_le(writer, fed_id.get())?;
        }
        Message::AddressReply { port, addr } => {
            write_u8(writer, MessageType::AddressReply as u8)?;
            write_u32_le(writer, *port as u32)?;
            write_all(writer, addr)?;
        }
        Message::Timestamp(ts) => {
            write_u8(writer, MessageType::Timestamp as u8)?;
            write_i64_le(writer, ts.as_nanos())?;
        }
        Message::NextEventTime(ts) => {
            write_u8(writer, MessageType::NextEventTime as u8)?;
            write_i64_le(writer, ts.as_nanos())?;
        }
        Message::TimeAdvanceGrant(ts) => {
            write_u8(writer, MessageType::TimeAdvanceGrant as u8)?;
            write_i64_le(writer, ts.as_nanos())?;
        }
        Message::LogicalTimeComplete(ts) => {
            write_u8(writer, MessageType::LogicalTimeComplete as u8)?;
            write_i64_le(writer, ts.as_nanos())?;
        }
        Message::Stop(ts) => {
            write_u8(writer, MessageType::Stop as u8)?;
            write_i64_le(writer, ts.as_nanos())?;
        }
        Message::TimedMessage(payload) => {
            write_u8(writer, MessageType::TimedMessage as u8)?;
            write_timed_payload(writer, payload)?;
        }
        Message::P2pTimedMessage(payload) => {
            write_u8(writer, MessageType::P2pTimedMessage as u8)?;
            write_timed_payload(writer, payload)?;
        }
        Message::P2pSendingFedId {
            fed_id,
            federation_id,
        } => {
            write_u8(writer, MessageType::P2pSendingFedId as u8)?;
            write_u16_le(writer, fed_id.get())?;
            write_federation_id(writer, federation_id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(message: Message) -> Message {
        let mut buf = Vec::new();
        write_message(&mut buf, &message).unwrap();
        let mut cursor = Cursor::new(buf);
        read_message(&mut cursor, 1 << 20).unwrap()
    }

    #[test]
    fn fed_id_round_trips() {
        let message = Message::FedId {
            fed_id: FederateId::new(3),
            federation_id: "fed-a".to_string(),
        };
        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn timed_message_round_trips_with_body() {
        let message = Message::TimedMessage(TimedPayload {
            dest_port: PortId::new(7),
            dest_federate: FederateId::new(2),
            timestamp: Timestamp::from_nanos(123_456_789),
            body: vec![1, 2, 3, 4, 5],
        });
        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn address_reply_preserves_negative_one_sentinel() {
        let message = Message::AddressReply {
            port: -1,
            addr: [0, 0, 0, 0],
        };
        assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn oversized_body_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &Message::TimedMessage(TimedPayload {
                dest_port: PortId::new(0),
                dest_federate: FederateId::new(0),
                timestamp: Timestamp::ZERO,
                body: vec![0u8; 1024],
            }),
        )
        .unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_message(&mut cursor, 16).unwrap_err();
        assert!(matches!(err, CodecError::BodyTooLarge { .. }));
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let mut cursor = Cursor::new(vec![200u8]);
        let err = read_message(&mut cursor, 1024).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageType(200)));
    }

    #[test]
    fn every_declared_frame_writes_exactly_its_length() {
        let message = Message::NextEventTime(Timestamp::from_nanos(42));
        let mut buf = Vec::new();
        write_message(&mut buf, &message).unwrap();
        // 1 type byte + 8 byte i64.
        assert_eq!(buf.len(), 9);
    }
}
