//! Registration handshake state machine
//!
//! Classifies inbound frames by type and decides what the connection has
//! to do next. Performs no I/O itself.

use bytes::Bytes;
use thiserror::Error;

use super::{Frame, FrameType};

/// Device response rejecting the presented program ID
const BAD_DEVICE_ID: [u8; 3] = [0xFF, 0xFF, 0x02];

/// Connection control payload announcing the start of registration
const CONNECTION_START: u8 = 0x02;

/// Length of a successful registration response
const REGISTRATION_OK_LEN: usize = 4;

/// Fatal registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Device rejected program ID {0:#04x}")]
    BadDeviceId(u8),

    #[error("Bad registration: unexpected connection control payload {0:02x?}")]
    BadRegistration(Vec<u8>),
}

/// State of the registration handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, waiting for the device to start registration
    Connecting,
    /// Identify frame sent, waiting for the registration response
    AwaitingRegistrationAck,
    /// Handshake complete
    Registered,
    /// Fatal error or explicit shutdown
    Closed,
}

/// What the connection must do after an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do
    None,
    /// Send the identify frame (type 0x01) with this payload
    Identify([u8; 7]),
    /// Registration accepted; send a heartbeat and an update request
    Registered,
    /// Hand this Data payload to the join translator
    Data(Bytes),
}

/// Registration state machine for one connection
#[derive(Debug, Clone)]
pub struct Registration {
    program_id: u8,
    state: ConnectionState,
}

impl Registration {
    pub fn new(program_id: u8) -> Self {
        Self {
            program_id,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn program_id(&self) -> u8 {
        self.program_id
    }

    /// Identify payload presenting `program_id` to the device
    pub fn identify_payload(program_id: u8) -> [u8; 7] {
        [0x7F, 0x00, 0x00, 0x01, 0x00, program_id, 0x40]
    }

    /// Move to the terminal state
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Classify an inbound frame and advance the handshake.
    ///
    /// A fatal error moves the machine to `Closed`; once closed, every frame
    /// is ignored.
    pub fn handle(&mut self, frame: &Frame) -> Result<Action, RegistrationError> {
        if self.state == ConnectionState::Closed {
            return Ok(Action::None);
        }

        let Some(kind) = frame.kind() else {
            tracing::trace!("Ignoring frame type {:#04x}", frame.frame_type);
            return Ok(Action::None);
        };

        match kind {
            FrameType::RegistrationResponse => {
                if frame.payload.starts_with(&BAD_DEVICE_ID) {
                    self.state = ConnectionState::Closed;
                    return Err(RegistrationError::BadDeviceId(self.program_id));
                }
                if frame.len() == REGISTRATION_OK_LEN {
                    self.state = ConnectionState::Registered;
                    return Ok(Action::Registered);
                }
                tracing::debug!("Ignoring registration response {:02x?}", frame.payload.as_ref());
                Ok(Action::None)
            }
            FrameType::Data => Ok(Action::Data(frame.payload.clone())),
            FrameType::ConnectionControl => {
                if frame.payload[..] == [CONNECTION_START] {
                    self.state = ConnectionState::AwaitingRegistrationAck;
                    Ok(Action::Identify(Self::identify_payload(self.program_id)))
                } else {
                    self.state = ConnectionState::Closed;
                    Err(RegistrationError::BadRegistration(frame.payload.to_vec()))
                }
            }
            FrameType::ProgramStop => {
                tracing::debug!("Device reported program stop");
                Ok(Action::None)
            }
            FrameType::Heartbeat => {
                tracing::debug!("Device reported heartbeat disconnect");
                Ok(Action::None)
            }
            FrameType::HeartbeatAck | FrameType::Register => Ok(Action::None),
        }
    }
}
