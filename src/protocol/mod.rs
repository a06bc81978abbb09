//! Relay wire protocol
//!
//! Every relay frame starts with a one-byte opcode followed by its fields:
//!
//! ```text
//! +--------+----------------------------------+
//! | opcode | fields (little-endian)           |
//! +--------+----------------------------------+
//!   1 byte   strings: i32 length + UTF-8
//!            blobs:   i32 length + bytes
//!            bools:   1 byte
//! ```
//!
//! Frame boundaries and channel reliability belong to the transport; this
//! module only sees complete frames.

pub mod codec;
pub mod message;
pub mod opcode;

pub use message::{ClientMessage, RoomDataUpdate, ServerMessage};
pub use opcode::OpCode;

/// Bytes a `GetData` frame adds around its payload: opcode, length prefix and
/// the trailing sender id.
pub const DATA_FRAME_OVERHEAD: usize = 1 + 4 + 4;
