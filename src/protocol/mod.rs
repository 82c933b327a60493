//! Protocol module - Defines the CIP wire protocol
//!
//! Every message is a frame with a 3 byte header:
//! - 1 byte frame type
//! - 2 bytes payload length (big-endian)
//! - Variable length payload
//!
//! Join state travels inside Data frames (type 0x05).

mod codec;
mod join;
mod registration;

pub use codec::*;
pub use join::*;
pub use registration::*;

/// Default TCP port of a control processor
pub const DEFAULT_PORT: u16 = 41794;

/// Program ID presented during registration unless configured otherwise
pub const DEFAULT_PROGRAM_ID: u8 = 0x03;

/// Frame type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Registration identify (outbound only)
    Register = 0x01,
    /// IP registration response
    RegistrationResponse = 0x02,
    /// Program stop or disconnect
    ProgramStop = 0x03,
    /// Join data (bidirectional)
    Data = 0x05,
    /// Heartbeat outbound, heartbeat disconnect notice inbound
    Heartbeat = 0x0D,
    /// Heartbeat acknowledgment
    HeartbeatAck = 0x0E,
    /// Connection control
    ConnectionControl = 0x0F,
}

impl FrameType {
    /// Map a raw type byte to a known frame type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(FrameType::Register),
            0x02 => Some(FrameType::RegistrationResponse),
            0x03 => Some(FrameType::ProgramStop),
            0x05 => Some(FrameType::Data),
            0x0D => Some(FrameType::Heartbeat),
            0x0E => Some(FrameType::HeartbeatAck),
            0x0F => Some(FrameType::ConnectionControl),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Heartbeat frame payload
pub const HEARTBEAT_PAYLOAD: [u8; 2] = [0x00, 0x00];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_bytes() {
        for ty in [
            FrameType::Register,
            FrameType::RegistrationResponse,
            FrameType::ProgramStop,
            FrameType::Data,
            FrameType::Heartbeat,
            FrameType::HeartbeatAck,
            FrameType::ConnectionControl,
        ] {
            assert_eq!(FrameType::from_byte(ty.as_byte()), Some(ty));
        }
        assert_eq!(FrameType::from_byte(0x04), None);
        assert_eq!(FrameType::Data.as_byte(), 0x05);
    }
}
