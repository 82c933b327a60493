//! Join translation
//!
//! Converts digital/analog join state to and from Data frame payloads.
//! Join numbers are 1-based everywhere in the public API and 0-based on
//! the wire.

use serde::Serialize;
use thiserror::Error;

/// Highest digital join; the wire carries 15 bits of join number
pub const MAX_DIGITAL_JOIN: u16 = 0x8000;

/// Highest analog join
pub const MAX_ANALOG_JOIN: u16 = u16::MAX;

/// Data payload requesting a full state refresh from the device
pub const UPDATE_REQUEST: [u8; 5] = [0x00, 0x00, 0x02, 0x03, 0x00];

/// Data payload sub-types, found at `payload[3]`
pub mod sub_types {
    /// Digital join from the device
    pub const DIGITAL: u8 = 0x00;
    /// Analog join from the device
    pub const ANALOG: u8 = 0x01;
    /// Serial join (not decoded)
    pub const SERIAL: u8 = 0x02;
    /// Update request confirmation
    pub const UPDATE_CONFIRM: u8 = 0x03;
    /// Analog join command sent by a client
    pub const ANALOG_COMMAND: u8 = 0x14;
    /// Digital join command sent by a client
    pub const DIGITAL_COMMAND: u8 = 0x27;
}

/// Analog payload length variants, found at `payload[2]`
const ANALOG_SHORT: u8 = 0x04;
const ANALOG_LONG: u8 = 0x05;

/// Bit set in the digital high byte when the join is off
const DIGITAL_OFF: u8 = 0x80;

/// Join translation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("Join {join} out of range (1..={max})")]
    OutOfRange { join: u16, max: u16 },
}

/// A decoded join state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JoinEvent {
    Digital { join: u16, state: bool },
    Analog { join: u16, value: u16 },
}

impl JoinEvent {
    pub fn join(&self) -> u16 {
        match self {
            JoinEvent::Digital { join, .. } | JoinEvent::Analog { join, .. } => *join,
        }
    }
}

fn wire_join(join: u16, max: u16) -> Result<u16, JoinError> {
    if join == 0 || join > max {
        return Err(JoinError::OutOfRange { join, max });
    }
    Ok(join - 1)
}

/// Build the Data payload setting a digital join
pub fn encode_digital(join: u16, state: bool) -> Result<[u8; 6], JoinError> {
    let j = wire_join(join, MAX_DIGITAL_JOIN)?;
    let mut high = ((j >> 8) & 0x7F) as u8;
    if !state {
        high |= DIGITAL_OFF;
    }
    Ok([0x00, 0x00, 0x03, sub_types::DIGITAL_COMMAND, (j & 0xFF) as u8, high])
}

/// Build the Data payload setting an analog join
pub fn encode_analog(join: u16, value: u16) -> Result<[u8; 8], JoinError> {
    let j = wire_join(join, MAX_ANALOG_JOIN)?;
    let [j_hi, j_lo] = j.to_be_bytes();
    let [v_hi, v_lo] = value.to_be_bytes();
    Ok([
        0x00,
        0x00,
        ANALOG_LONG,
        sub_types::ANALOG_COMMAND,
        j_hi,
        j_lo,
        v_hi,
        v_lo,
    ])
}

/// Decode a Data frame payload into a join event.
///
/// Serial joins, update confirmations, unknown sub-types and payloads too
/// short for their sub-type produce no event.
pub fn decode_data(payload: &[u8]) -> Option<JoinEvent> {
    let sub_type = *payload.get(3)?;

    match sub_type {
        sub_types::DIGITAL | sub_types::DIGITAL_COMMAND => {
            let (low, high) = (*payload.get(4)?, *payload.get(5)?);
            let j = (u16::from(high & 0x7F) << 8) | u16::from(low);
            Some(JoinEvent::Digital {
                join: j + 1,
                state: high & DIGITAL_OFF == 0,
            })
        }
        sub_types::ANALOG | sub_types::ANALOG_COMMAND => match payload[2] {
            ANALOG_SHORT => {
                let bytes = payload.get(4..7)?;
                Some(JoinEvent::Analog {
                    join: u16::from(bytes[0]) + 1,
                    value: u16::from_be_bytes([bytes[1], bytes[2]]),
                })
            }
            ANALOG_LONG => {
                let bytes = payload.get(4..8)?;
                let j = u16::from_be_bytes([bytes[0], bytes[1]]);
                Some(JoinEvent::Analog {
                    // 0xFFFF has no 1-based join
                    join: j.checked_add(1)?,
                    value: u16::from_be_bytes([bytes[2], bytes[3]]),
                })
            }
            other => {
                tracing::debug!("Ignoring analog payload with length variant {:#04x}", other);
                None
            }
        },
        sub_types::SERIAL => {
            tracing::trace!("Serial join data ignored");
            None
        }
        sub_types::UPDATE_CONFIRM => {
            tracing::trace!("Update request confirmed");
            None
        }
        other => {
            tracing::trace!("Ignoring data sub-type {:#04x}", other);
            None
        }
    }
}
