//! Binary wire protocol between the game server and its clients
//!
//! Every message travels as a frame: a 4-byte header followed by the payload.
//!
//! ```text
//! +--------+------------------------+=====================+
//! | tag u8 | payload length u24 BE  | payload (len bytes) |
//! +--------+------------------------+=====================+
//! ```
//!
//! TCP delivers a byte stream, not frames, so a single read may carry half a
//! frame or several frames at once. [`FrameBuffer`] accumulates bytes and
//! yields only complete frames, keeping any remainder for the next read.
//!
//! Messages are split by direction into [`ClientMessage`] and
//! [`ServerMessage`]; decoding a frame against the wrong direction yields
//! [`ProtocolError::UnexpectedMessage`]. All multi-byte integers are big-endian.

use crate::map::{LevelMap, MapError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 4;

/// Largest payload expressible in the 3-byte length field
pub const MAX_PAYLOAD_SIZE: usize = 0xFF_FFFF;

/// GameEnd payload meaning that nobody won the round
pub const NO_WINNER: u8 = 0xFF;

/// Encoded size of one [`PlayerRecord`] inside a GameState payload
pub const PLAYER_RECORD_SIZE: usize = 8;

/// Encoded size of a Collision payload
pub const COLLISION_SIZE: usize = 5;

/// Message catalogue, with the tag byte each message carries on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client announces itself after connecting
    Connect = 1,
    /// Server sends the level to a new connection
    MapData = 2,
    /// Server announces that a round has started
    GameStart = 3,
    /// Client reports its jetpack button state
    PlayerInput = 4,
    /// Server broadcasts every player's position and score
    GameState = 5,
    /// Server reports a coin pickup or hazard hit
    Collision = 6,
    /// Server announces the end of a round and its winner
    GameEnd = 7,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(MessageType::Connect),
            2 => Ok(MessageType::MapData),
            3 => Ok(MessageType::GameStart),
            4 => Ok(MessageType::PlayerInput),
            5 => Ok(MessageType::GameState),
            6 => Ok(MessageType::Collision),
            7 => Ok(MessageType::GameEnd),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Errors raised while framing or decoding messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("need {needed} bytes, only {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("{0:?} is not valid in this direction")]
    UnexpectedMessage(MessageType),
    #[error("invalid {message:?} payload: {reason}")]
    InvalidPayload {
        message: MessageType,
        reason: String,
    },
    #[error("invalid map payload: {0}")]
    Map(#[from] MapError),
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw tag byte; may not name a known message
    pub tag: u8,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Total number of bytes the frame occupies, header included
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len
    }

    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.tag)
    }
}

/// Builds a frame from a message type and raw payload
pub fn create_packet(message_type: MessageType, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u8(message_type.tag());
    frame.put_uint(payload.len() as u64, 3);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Reads a frame header from the start of `buffer`
///
/// Only the header is inspected. The caller must still check that
/// `buffer.len() >= header.frame_len()` before treating the frame as complete.
pub fn parse_header(buffer: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if buffer.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            needed: HEADER_SIZE,
            available: buffer.len(),
        });
    }

    let payload_len =
        (buffer[1] as usize) << 16 | (buffer[2] as usize) << 8 | buffer[3] as usize;

    Ok(FrameHeader {
        tag: buffer[0],
        payload_len,
    })
}

/// One complete frame taken off the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.tag)
    }
}

/// Reassembles frames from arbitrarily split stream reads
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Removes and returns the next complete frame, if one is buffered
    ///
    /// Returns `None` when the buffer holds less than a full frame; those
    /// bytes stay buffered until more data arrives.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let header = parse_header(&self.buffer).ok()?;
        if self.buffer.len() < header.frame_len() {
            return None;
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(header.payload_len).freeze();
        Some(Frame {
            tag: header.tag,
            payload,
        })
    }

    /// Removes every complete frame currently buffered
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Number of buffered bytes not yet returned as frames
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// One player's entry in a GameState broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerRecord {
    pub player_number: u8,
    pub x: u16,
    pub y: u16,
    pub score: u16,
    pub jetpack_active: bool,
}

impl PlayerRecord {
    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.player_number);
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.score);
        buf.put_u8(u8::from(self.jetpack_active));
    }

    fn decode_from(mut data: &[u8]) -> Self {
        PlayerRecord {
            player_number: data.get_u8(),
            x: data.get_u16(),
            y: data.get_u16(),
            score: data.get_u16(),
            jetpack_active: data.get_u8() != 0,
        }
    }
}

/// What a player ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CollisionKind {
    Coin,
    Hazard,
}

impl CollisionKind {
    pub fn code(self) -> u8 {
        match self {
            CollisionKind::Coin => b'c',
            CollisionKind::Hazard => b'e',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'c' => Some(CollisionKind::Coin),
            b'e' => Some(CollisionKind::Hazard),
            _ => None,
        }
    }
}

/// A coin pickup or hazard hit at a tile position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub kind: CollisionKind,
    pub x: u16,
    pub y: u16,
}

/// Messages a client sends to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    Connect,
    PlayerInput { jetpack: bool },
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Connect => MessageType::Connect,
            ClientMessage::PlayerInput { .. } => MessageType::PlayerInput,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        match self {
            ClientMessage::Connect => create_packet(MessageType::Connect, &[]),
            ClientMessage::PlayerInput { jetpack } => {
                create_packet(MessageType::PlayerInput, &[u8::from(*jetpack)])
            }
        }
    }

    /// Decodes a frame sent by a client
    ///
    /// PlayerInput only looks at the first payload byte; any non-zero value
    /// switches the jetpack on.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.message_type()? {
            MessageType::Connect => Ok(ClientMessage::Connect),
            MessageType::PlayerInput => match frame.payload.first() {
                Some(&value) => Ok(ClientMessage::PlayerInput {
                    jetpack: value != 0,
                }),
                None => Err(ProtocolError::InvalidPayload {
                    message: MessageType::PlayerInput,
                    reason: "empty payload".to_string(),
                }),
            },
            other @ (MessageType::MapData
            | MessageType::GameStart
            | MessageType::GameState
            | MessageType::Collision
            | MessageType::GameEnd) => Err(ProtocolError::UnexpectedMessage(other)),
        }
    }
}

/// Messages the server sends to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    MapData(LevelMap),
    GameStart,
    GameState(Vec<PlayerRecord>),
    Collision(Collision),
    /// `None` when the round ended without a winner
    GameEnd { winner: Option<u8> },
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::MapData(_) => MessageType::MapData,
            ServerMessage::GameStart => MessageType::GameStart,
            ServerMessage::GameState(_) => MessageType::GameState,
            ServerMessage::Collision(_) => MessageType::Collision,
            ServerMessage::GameEnd { .. } => MessageType::GameEnd,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let payload = match self {
            ServerMessage::MapData(map) => map.serialize(),
            ServerMessage::GameStart => Vec::new(),
            ServerMessage::GameState(records) => {
                let mut buf = BytesMut::with_capacity(records.len() * PLAYER_RECORD_SIZE);
                for record in records {
                    record.encode_into(&mut buf);
                }
                buf.to_vec()
            }
            ServerMessage::Collision(collision) => {
                let mut buf = BytesMut::with_capacity(COLLISION_SIZE);
                buf.put_u8(collision.kind.code());
                buf.put_u16(collision.x);
                buf.put_u16(collision.y);
                buf.to_vec()
            }
            ServerMessage::GameEnd { winner } => vec![winner.unwrap_or(NO_WINNER)],
        };

        create_packet(self.message_type(), &payload)
    }

    /// Decodes a frame sent by the server
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let payload = &frame.payload[..];

        match frame.message_type()? {
            MessageType::MapData => Ok(ServerMessage::MapData(LevelMap::load_from_bytes(
                payload,
            )?)),
            MessageType::GameStart => Ok(ServerMessage::GameStart),
            MessageType::GameState => {
                if payload.len() % PLAYER_RECORD_SIZE != 0 {
                    return Err(ProtocolError::InvalidPayload {
                        message: MessageType::GameState,
                        reason: format!(
                            "{} bytes is not a multiple of {}",
                            payload.len(),
                            PLAYER_RECORD_SIZE
                        ),
                    });
                }

                let records = payload
                    .chunks_exact(PLAYER_RECORD_SIZE)
                    .map(PlayerRecord::decode_from)
                    .collect();
                Ok(ServerMessage::GameState(records))
            }
            MessageType::Collision => {
                if payload.len() != COLLISION_SIZE {
                    return Err(ProtocolError::InvalidPayload {
                        message: MessageType::Collision,
                        reason: format!("expected {} bytes, got {}", COLLISION_SIZE, payload.len()),
                    });
                }

                let mut data = payload;
                let code = data.get_u8();
                let kind =
                    CollisionKind::from_code(code).ok_or_else(|| ProtocolError::InvalidPayload {
                        message: MessageType::Collision,
                        reason: format!("unknown collision type {:#04x}", code),
                    })?;

                Ok(ServerMessage::Collision(Collision {
                    kind,
                    x: data.get_u16(),
                    y: data.get_u16(),
                }))
            }
            MessageType::GameEnd => match payload.first() {
                Some(&NO_WINNER) => Ok(ServerMessage::GameEnd { winner: None }),
                Some(&number) => Ok(ServerMessage::GameEnd {
                    winner: Some(number),
                }),
                None => Err(ProtocolError::InvalidPayload {
                    message: MessageType::GameEnd,
                    reason: "empty payload".to_string(),
                }),
            },
            other @ (MessageType::Connect | MessageType::PlayerInput) => {
                Err(ProtocolError::UnexpectedMessage(other))
            }
        }
    }
}
