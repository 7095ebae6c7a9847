//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat hub.
//!
//! This crate defines the JSON frames exchanged between chat clients and the
//! hub, the identifier types they carry, and the codec that moves them on and
//! off the wire.
//!
//! ## Frame Types
//!
//! - `InboundFrame` - a chat message sent by a client
//! - `MessageFrame` - a chat message forwarded to its recipient
//! - `Notice::Status` - presence (`online` / `offline`)
//! - `Notice::ChatRoomCreated` - a room was created for a new pair
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, OutboundFrame, PresenceState, UserId};
//!
//! let frame = OutboundFrame::status(UserId::new_v4(), PresenceState::Online);
//! let text = codec::encode(&frame).unwrap();
//! let decoded = codec::decode_outbound(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod ids;

pub use codec::{decode_inbound, encode, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{InboundFrame, MessageFrame, Notice, OutboundFrame, PresenceState};
pub use ids::{MessageId, RoomId, UserId};
