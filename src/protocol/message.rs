//! Relay messages
//!
//! [`ClientMessage`] is what a game client sends to its relay node,
//! [`ServerMessage`] what the node sends back. Both borrow their payloads
//! from the frame they were decoded from so forwarding never copies twice.

use bytes::BufMut;

use super::codec::{string_len, FieldReader, FieldWriter};
use super::opcode::OpCode;
use crate::error::ProtocolError;
use crate::types::ConnectionId;

/// Host-side room metadata change; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomDataUpdate {
    pub name: Option<String>,
    pub data: Option<String>,
    pub is_public: Option<bool>,
    pub max_players: Option<i32>,
}

/// Message sent by a client to its relay node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage<'a> {
    AuthenticationResponse {
        key: String,
    },
    CreateRoom {
        max_players: i32,
        name: String,
        is_public: bool,
        data: String,
        app_id: i32,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom,
    KickPlayer {
        target: ConnectionId,
    },
    UpdateRoomData(RoomDataUpdate),
    SendData {
        payload: &'a [u8],
        target: ConnectionId,
    },
}

impl<'a> ClientMessage<'a> {
    /// Decode one complete frame
    pub fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut reader = FieldReader::new(frame);
        let op = OpCode::try_from(reader.read_u8().map_err(|_| ProtocolError::EmptyFrame)?)?;

        let message = match op {
            OpCode::AuthenticationResponse => ClientMessage::AuthenticationResponse {
                key: reader.read_string()?,
            },
            OpCode::CreateRoom => ClientMessage::CreateRoom {
                max_players: reader.read_i32()?,
                name: reader.read_string()?,
                is_public: reader.read_bool()?,
                data: reader.read_string()?,
                app_id: reader.read_i32()?,
            },
            OpCode::JoinRoom => ClientMessage::JoinRoom {
                room_id: reader.read_string()?,
            },
            OpCode::LeaveRoom => ClientMessage::LeaveRoom,
            OpCode::KickPlayer => ClientMessage::KickPlayer {
                target: ConnectionId(reader.read_u32()?),
            },
            OpCode::UpdateRoomData => ClientMessage::UpdateRoomData(RoomDataUpdate {
                name: reader.read_optional(|r| r.read_string())?,
                data: reader.read_optional(|r| r.read_string())?,
                is_public: reader.read_optional(|r| r.read_bool())?,
                max_players: reader.read_optional(|r| r.read_i32())?,
            }),
            OpCode::SendData => ClientMessage::SendData {
                payload: reader.read_blob()?,
                target: ConnectionId(reader.read_u32()?),
            },
            // Server-to-client opcodes are never valid from a client
            other => return Err(ProtocolError::UnknownOpCode(other.as_u8())),
        };

        Ok(message)
    }

    /// Append the encoded frame to `buf`
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            ClientMessage::AuthenticationResponse { key } => {
                buf.put_u8(OpCode::AuthenticationResponse.as_u8());
                buf.put_string(key);
            }
            ClientMessage::CreateRoom {
                max_players,
                name,
                is_public,
                data,
                app_id,
            } => {
                buf.put_u8(OpCode::CreateRoom.as_u8());
                buf.put_i32_le(*max_players);
                buf.put_string(name);
                buf.put_bool(*is_public);
                buf.put_string(data);
                buf.put_i32_le(*app_id);
            }
            ClientMessage::JoinRoom { room_id } => {
                buf.put_u8(OpCode::JoinRoom.as_u8());
                buf.put_string(room_id);
            }
            ClientMessage::LeaveRoom => buf.put_u8(OpCode::LeaveRoom.as_u8()),
            ClientMessage::KickPlayer { target } => {
                buf.put_u8(OpCode::KickPlayer.as_u8());
                buf.put_u32_le(target.0);
            }
            ClientMessage::UpdateRoomData(update) => {
                buf.put_u8(OpCode::UpdateRoomData.as_u8());
                put_optional(buf, update.name.as_deref(), |b, v| b.put_string(v));
                put_optional(buf, update.data.as_deref(), |b, v| b.put_string(v));
                put_optional(buf, update.is_public, |b, v| b.put_bool(v));
                put_optional(buf, update.max_players, |b, v| b.put_i32_le(v));
            }
            ClientMessage::SendData { payload, target } => {
                buf.put_u8(OpCode::SendData.as_u8());
                buf.put_blob(payload);
                buf.put_u32_le(target.0);
            }
        }
    }
}

fn put_optional<B: BufMut, T>(buf: &mut B, value: Option<T>, put: impl FnOnce(&mut B, T)) {
    match value {
        Some(value) => {
            buf.put_bool(true);
            put(buf, value);
        }
        None => buf.put_bool(false),
    }
}

/// Message sent by a relay node to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage<'a> {
    AuthenticationRequest,
    Authenticated,
    GetId(ConnectionId),
    RoomCreated(&'a str),
    RoomJoined(ConnectionId),
    RoomLeft,
    PlayerDisconnected(ConnectionId),
    /// Relayed payload; `sender` is set only on frames delivered to a host
    GetData {
        payload: &'a [u8],
        sender: Option<ConnectionId>,
    },
}

impl<'a> ServerMessage<'a> {
    pub fn opcode(&self) -> OpCode {
        match self {
            ServerMessage::AuthenticationRequest => OpCode::AuthenticationRequest,
            ServerMessage::Authenticated => OpCode::Authenticated,
            ServerMessage::GetId(_) => OpCode::GetId,
            ServerMessage::RoomCreated(_) => OpCode::RoomCreated,
            ServerMessage::RoomJoined(_) => OpCode::RoomJoined,
            ServerMessage::RoomLeft => OpCode::RoomLeft,
            ServerMessage::PlayerDisconnected(_) => OpCode::PlayerDisconnected,
            ServerMessage::GetData { .. } => OpCode::GetData,
        }
    }

    /// Exact number of bytes `encode` will write
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            ServerMessage::AuthenticationRequest
            | ServerMessage::Authenticated
            | ServerMessage::RoomLeft => 0,
            ServerMessage::GetId(_)
            | ServerMessage::RoomJoined(_)
            | ServerMessage::PlayerDisconnected(_) => 4,
            ServerMessage::RoomCreated(id) => string_len(id),
            ServerMessage::GetData { payload, sender } => {
                4 + payload.len() + if sender.is_some() { 4 } else { 0 }
            }
        }
    }

    /// Append the encoded frame to `buf`
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.opcode().as_u8());
        match self {
            ServerMessage::AuthenticationRequest
            | ServerMessage::Authenticated
            | ServerMessage::RoomLeft => {}
            ServerMessage::GetId(id)
            | ServerMessage::RoomJoined(id)
            | ServerMessage::PlayerDisconnected(id) => buf.put_u32_le(id.0),
            ServerMessage::RoomCreated(room_id) => buf.put_string(room_id),
            ServerMessage::GetData { payload, sender } => {
                buf.put_blob(payload);
                if let Some(sender) = sender {
                    buf.put_u32_le(sender.0);
                }
            }
        }
    }

    /// Decode a frame received from a relay node
    pub fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut reader = FieldReader::new(frame);
        let op = OpCode::try_from(reader.read_u8().map_err(|_| ProtocolError::EmptyFrame)?)?;

        let message = match op {
            OpCode::AuthenticationRequest => ServerMessage::AuthenticationRequest,
            OpCode::Authenticated => ServerMessage::Authenticated,
            OpCode::GetId => ServerMessage::GetId(ConnectionId(reader.read_u32()?)),
            OpCode::RoomCreated => {
                let id = std::str::from_utf8(reader.read_blob()?)
                    .map_err(|_| ProtocolError::InvalidString)?;
                ServerMessage::RoomCreated(id)
            }
            OpCode::RoomJoined => ServerMessage::RoomJoined(ConnectionId(reader.read_u32()?)),
            OpCode::RoomLeft => ServerMessage::RoomLeft,
            OpCode::PlayerDisconnected => {
                ServerMessage::PlayerDisconnected(ConnectionId(reader.read_u32()?))
            }
            OpCode::GetData => {
                let payload = reader.read_blob()?;
                let sender = if reader.remaining() >= 4 {
                    Some(ConnectionId(reader.read_u32()?))
                } else {
                    None
                };
                ServerMessage::GetData { payload, sender }
            }
            other => return Err(ProtocolError::UnknownOpCode(other.as_u8())),
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn encode_client(msg: &ClientMessage<'_>) -> BytesMut {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        buf
    }

    #[test]
    fn test_decode_create_room() {
        let frame = encode_client(&ClientMessage::CreateRoom {
            max_players: 8,
            name: "Lobby".into(),
            is_public: true,
            data: "map=forest".into(),
            app_id: 42,
        });

        match ClientMessage::decode(&frame).unwrap() {
            ClientMessage::CreateRoom {
                max_players,
                name,
                is_public,
                data,
                app_id,
            } => {
                assert_eq!(max_players, 8);
                assert_eq!(name, "Lobby");
                assert!(is_public);
                assert_eq!(data, "map=forest");
                assert_eq!(app_id, 42);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_send_data_borrows_payload() {
        let frame = encode_client(&ClientMessage::SendData {
            payload: &[9, 8, 7],
            target: ConnectionId(3),
        });

        let msg = ClientMessage::decode(&frame).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SendData {
                payload: &[9, 8, 7],
                target: ConnectionId(3)
            }
        );
    }

    #[test]
    fn test_decode_partial_room_update() {
        let update = RoomDataUpdate {
            name: Some("Renamed".into()),
            max_players: Some(12),
            ..RoomDataUpdate::default()
        };
        let frame = encode_client(&ClientMessage::UpdateRoomData(update.clone()));

        assert_eq!(
            ClientMessage::decode(&frame).unwrap(),
            ClientMessage::UpdateRoomData(update)
        );
    }

    #[test]
    fn test_client_rejects_server_opcodes() {
        let frame = [OpCode::GetData.as_u8(), 0, 0, 0, 0];
        assert_eq!(
            ClientMessage::decode(&frame),
            Err(ProtocolError::UnknownOpCode(OpCode::GetData.as_u8()))
        );
        assert_eq!(ClientMessage::decode(&[]), Err(ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_truncated_send_data() {
        let mut frame = encode_client(&ClientMessage::SendData {
            payload: &[1, 2, 3, 4],
            target: ConnectionId(1),
        });
        frame.truncate(frame.len() - 2);

        assert!(matches!(
            ClientMessage::decode(&frame),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_get_data_with_sender() {
        let msg = ServerMessage::GetData {
            payload: b"state",
            sender: Some(ConnectionId(77)),
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);

        assert_eq!(buf.len(), msg.encoded_len());
        assert_eq!(buf[0], OpCode::GetData.as_u8());
        // Sender id trails the payload
        assert_eq!(&buf[buf.len() - 4..], &77u32.to_le_bytes());
        assert_eq!(ServerMessage::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn test_get_id_frame_layout() {
        let mut buf = BytesMut::new();
        ServerMessage::GetId(ConnectionId(0x0102_0304)).encode(&mut buf);

        assert_eq!(&buf[..], &[4, 0x04, 0x03, 0x02, 0x01]);
    }
}
