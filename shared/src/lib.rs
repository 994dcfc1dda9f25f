//! Types shared between the jetpack server and its clients: the level map and
//! the binary wire protocol.

pub mod map;
pub mod protocol;

pub use map::{LevelMap, MapError, Tile};
pub use protocol::{
    create_packet, parse_header, ClientMessage, Collision, CollisionKind, Frame, FrameBuffer,
    FrameHeader, MessageType, PlayerRecord, ProtocolError, ServerMessage, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, NO_WINNER,
};
