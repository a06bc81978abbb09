//! Relay opcodes

use crate::error::ProtocolError;

/// First byte of every relay frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    AuthenticationRequest = 1,
    AuthenticationResponse = 2,
    Authenticated = 3,
    GetId = 4,
    CreateRoom = 5,
    RoomCreated = 6,
    JoinRoom = 7,
    RoomJoined = 8,
    LeaveRoom = 9,
    RoomLeft = 10,
    PlayerDisconnected = 11,
    KickPlayer = 12,
    UpdateRoomData = 13,
    SendData = 14,
    GetData = 15,
}

impl OpCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let op = match value {
            1 => OpCode::AuthenticationRequest,
            2 => OpCode::AuthenticationResponse,
            3 => OpCode::Authenticated,
            4 => OpCode::GetId,
            5 => OpCode::CreateRoom,
            6 => OpCode::RoomCreated,
            7 => OpCode::JoinRoom,
            8 => OpCode::RoomJoined,
            9 => OpCode::LeaveRoom,
            10 => OpCode::RoomLeft,
            11 => OpCode::PlayerDisconnected,
            12 => OpCode::KickPlayer,
            13 => OpCode::UpdateRoomData,
            14 => OpCode::SendData,
            15 => OpCode::GetData,
            other => return Err(ProtocolError::UnknownOpCode(other)),
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_byte() {
        assert_eq!(OpCode::try_from(4), Ok(OpCode::GetId));
        assert_eq!(OpCode::try_from(15), Ok(OpCode::GetData));
        assert_eq!(OpCode::GetData.as_u8(), 15);
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(OpCode::try_from(0), Err(ProtocolError::UnknownOpCode(0)));
        assert_eq!(OpCode::try_from(200), Err(ProtocolError::UnknownOpCode(200)));
    }
}
