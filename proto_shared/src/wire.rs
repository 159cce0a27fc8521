//! Bit-exact wire framing: a 4-byte header plus one of four message bodies.
//!
//! This picks the 12-byte SampleUp/SampleDown payload (session/peer header plus
//! body) and the Controller-owned-registry design over the protocol-only
//! variant documented as an alternative; see `DESIGN.md`.

use crate::bitio::{BitReader, BitWriter};
use crate::error::CodecError;

/// `{ messageType: u8, reserved: u8, payloadLength: u16 BE }`.
pub const HEADER_SIZE: usize = 4;

/// Negotiation payloads: `sessionId: u16 BE | peerId: u16 BE`.
pub const NEGOTIATION_PAYLOAD_SIZE: u16 = 4;

/// SampleUp/SampleDown payloads: session/peer header pair + packed body.
pub const SAMPLE_PAYLOAD_SIZE: u16 = 12;

/// Wire type codes for the four message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    NegotiationRequest = 0x01,
    NegotiationResponse = 0x02,
    SampleUp = 0x03,
    SampleDown = 0x04,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::NegotiationRequest),
            0x02 => Some(Self::NegotiationResponse),
            0x03 => Some(Self::SampleUp),
            0x04 => Some(Self::SampleDown),
            _ => None,
        }
    }
}

/// `CommandType` carried in the `kind` field of a SampleUp message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    None,
    Start,
    Stop,
    Reset,
    Query,
    Update,
    /// Values 6-7 are reserved by the spec; preserved verbatim on round-trip.
    Reserved(u8),
}

impl CommandType {
    fn to_bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Start => 1,
            Self::Stop => 2,
            Self::Reset => 3,
            Self::Query => 4,
            Self::Update => 5,
            Self::Reserved(v) => v,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::None,
            1 => Self::Start,
            2 => Self::Stop,
            3 => Self::Reset,
            4 => Self::Query,
            5 => Self::Update,
            other => Self::Reserved(other),
        }
    }
}

/// `StatusType` carried in the `kind` field of a SampleDown message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    Unknown,
    Ready,
    Running,
    Paused,
    Error,
    Complete,
    /// Values 6-7 are reserved by the spec; preserved verbatim on round-trip.
    Reserved(u8),
}

impl StatusType {
    fn to_bits(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Ready => 1,
            Self::Running => 2,
            Self::Paused => 3,
            Self::Error => 4,
            Self::Complete => 5,
            Self::Reserved(v) => v,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Unknown,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Error,
            5 => Self::Complete,
            other => Self::Reserved(other),
        }
    }
}

/// Shared payload of NegotiationRequest and NegotiationResponse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiation {
    pub session_id: u16,
    pub peer_id: u16,
}

/// Peer -> Controller telemetry/command sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleUpMessage {
    pub session_id: u16,
    pub peer_id: u16,
    pub command: CommandType,
    /// Logical signed value, saturated to `[-255, 255]` on encode.
    pub signed_value: i16,
    pub sequence: u16,
    pub value: f64,
}

/// Controller -> Peer telemetry/status sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleDownMessage {
    pub session_id: u16,
    pub peer_id: u16,
    pub status: StatusType,
    /// Logical signed value, saturated to `[-255, 255]` on encode.
    pub signed_value: i16,
    pub timestamp: u16,
    pub value: f64,
}

/// Any one of the four wire messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    NegotiationRequest(Negotiation),
    NegotiationResponse(Negotiation),
    SampleUp(SampleUpMessage),
    SampleDown(SampleDownMessage),
}

impl Message {
    fn message_type(&self) -> MessageType {
        match self {
            Self::NegotiationRequest(_) => MessageType::NegotiationRequest,
            Self::NegotiationResponse(_) => MessageType::NegotiationResponse,
            Self::SampleUp(_) => MessageType::SampleUp,
            Self::SampleDown(_) => MessageType::SampleDown,
        }
    }
}

fn encode_negotiation(w: &mut BitWriter, n: Negotiation) -> Result<(), CodecError> {
    w.write_u16(n.session_id)?;
    w.write_u16(n.peer_id)?;
    Ok(())
}

fn decode_negotiation(r: &mut BitReader<'_>) -> Result<Negotiation, CodecError> {
    let session_id = r.read_u16()?;
    let peer_id = r.read_u16()?;
    Ok(Negotiation {
        session_id,
        peer_id,
    })
}

/// Splits a logical signed value into the wire's sign+magnitude(8) pair,
/// saturating the magnitude at 255.
fn encode_signed9(value: i16) -> (bool, u8) {
    let sign = value < 0;
    let magnitude = (value as i32).unsigned_abs().min(255) as u8;
    (sign, magnitude)
}

fn decode_signed9(sign: bool, magnitude: u8) -> i16 {
    let m = magnitude as i16;
    if sign {
        -m
    } else {
        m
    }
}

fn encode_sample_body(
    w: &mut BitWriter,
    session_id: u16,
    peer_id: u16,
    kind_bits: u8,
    signed_value: i16,
    sequence_or_timestamp: u16,
    value: f64,
) -> Result<(), CodecError> {
    w.write_u16(session_id)?;
    w.write_u16(peer_id)?;
    w.write_bits(kind_bits as u32, 3)?;
    let (sign, magnitude) = encode_signed9(signed_value);
    w.write_bool(sign)?;
    w.write_bits(magnitude as u32, 8)?;
    w.write_bits(0, 4)?; // reserved
    w.write_u16(sequence_or_timestamp)?;
    w.write_fixed16_16(value)?;
    Ok(())
}

struct SampleBody {
    session_id: u16,
    peer_id: u16,
    kind_bits: u8,
    signed_value: i16,
    sequence_or_timestamp: u16,
    value: f64,
}

fn decode_sample_body(r: &mut BitReader<'_>) -> Result<SampleBody, CodecError> {
    let session_id = r.read_u16()?;
    let peer_id = r.read_u16()?;
    let kind_bits = r.read_bits(3)? as u8;
    let sign = r.read_bool()?;
    let magnitude = r.read_bits(8)? as u8;
    r.skip(4)?; // reserved
    let sequence_or_timestamp = r.read_u16()?;
    let value = r.read_fixed16_16()?;
    Ok(SampleBody {
        session_id,
        peer_id,
        kind_bits,
        signed_value: decode_signed9(sign, magnitude),
        sequence_or_timestamp,
        value,
    })
}

/// Serializes a full datagram: 4-byte header followed by the message's payload.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let mut body = BitWriter::new();
    let payload_len = match *msg {
        Message::NegotiationRequest(n) | Message::NegotiationResponse(n) => {
            encode_negotiation(&mut body, n)?;
            NEGOTIATION_PAYLOAD_SIZE
        }
        Message::SampleUp(m) => {
            encode_sample_body(
                &mut body,
                m.session_id,
                m.peer_id,
                m.command.to_bits(),
                m.signed_value,
                m.sequence,
                m.value,
            )?;
            SAMPLE_PAYLOAD_SIZE
        }
        Message::SampleDown(m) => {
            encode_sample_body(
                &mut body,
                m.session_id,
                m.peer_id,
                m.status.to_bits(),
                m.signed_value,
                m.timestamp,
                m.value,
            )?;
            SAMPLE_PAYLOAD_SIZE
        }
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + payload_len as usize);
    out.push(msg.message_type().code());
    out.push(0); // reserved
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(&body.finish());
    Ok(out)
}

/// Parses a full datagram: header first (from the whole buffer), then a
/// body-only reader sliced to exactly `payloadLength` bytes from offset 4.
/// This two-pass shape detects truncated payloads before any body parsing
/// starts.
pub fn decode_message(datagram: &[u8]) -> Result<Message, CodecError> {
    if datagram.len() < HEADER_SIZE {
        return Err(CodecError::out_of_range("datagram shorter than header"));
    }
    let type_code = datagram[0];
    let payload_length = u16::from_be_bytes([datagram[2], datagram[3]]);
    let end = HEADER_SIZE + payload_length as usize;
    if datagram.len() < end {
        return Err(CodecError::out_of_range("datagram shorter than payload"));
    }
    let body_bytes = &datagram[HEADER_SIZE..end];

    let message_type = MessageType::from_code(type_code)
        .ok_or_else(|| CodecError::out_of_range(format!("unknown message type {type_code:#x}")))?;

    let mut r = BitReader::new(body_bytes);
    match message_type {
        MessageType::NegotiationRequest => {
            Ok(Message::NegotiationRequest(decode_negotiation(&mut r)?))
        }
        MessageType::NegotiationResponse => {
            Ok(Message::NegotiationResponse(decode_negotiation(&mut r)?))
        }
        MessageType::SampleUp => {
            let b = decode_sample_body(&mut r)?;
            Ok(Message::SampleUp(SampleUpMessage {
                session_id: b.session_id,
                peer_id: b.peer_id,
                command: CommandType::from_bits(b.kind_bits),
                signed_value: b.signed_value,
                sequence: b.sequence_or_timestamp,
                value: b.value,
            }))
        }
        MessageType::SampleDown => {
            let b = decode_sample_body(&mut r)?;
            Ok(Message::SampleDown(SampleDownMessage {
                session_id: b.session_id,
                peer_id: b.peer_id,
                status: StatusType::from_bits(b.kind_bits),
                signed_value: b.signed_value,
                timestamp: b.sequence_or_timestamp,
                value: b.value,
            }))
        }
    }
}
