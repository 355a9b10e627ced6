//! Handshake for the proprietary steering accessory.
//!
//! The central writes commands to the Rx characteristic and expects answers on the
//! Tx characteristic. Commands start with a big-endian 16-bit code. The challenge
//! carries a little-endian 32-bit nonce that must be scrambled with a fixed key.
//! This is an obfuscation the central checks, not a security boundary.
//!
//! Every write is acknowledged at the GATT layer whatever its content. Whether an
//! answer is indicated depends only on the command; nothing is remembered between
//! writes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Result, TrainerError};

/// Capability negotiation; also the code of the greeting sent on Tx subscription
pub const CMD_CAPABILITIES: u16 = 0x0310;

/// Scrambled challenge carrying a nonce
pub const CMD_CHALLENGE: u16 = 0x0312;

/// Central accepted our challenge answer
pub const CMD_CHALLENGE_ACK: u16 = 0x0313;

/// Status report from the central, answered with nothing
pub const CMD_STATUS: u16 = 0x0202;

/// Value returned with [`CMD_CAPABILITIES`]
pub const CAPABILITIES_VALUE: u16 = 0x4A89;

/// Value returned with [`CMD_CHALLENGE_ACK`]
pub const CHALLENGE_ACK_VALUE: u8 = 0xFF;

/// Constant added to the nonce before mixing
pub const CHALLENGE_KEY: u32 = 0x16FA_5717;

/// Command code plus a 32-bit nonce
pub const CHALLENGE_LEN: usize = 6;

/// Decoded write on the steering Rx characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRequest {
    /// Single-byte keepalive, acknowledged and otherwise ignored
    Ping(u8),
    /// Capability negotiation
    Capabilities,
    /// Challenge with its nonce
    Challenge(u32),
    /// Acknowledgment of our challenge answer
    ChallengeAck,
    /// Status report
    Status,
    /// Any other command code
    Unknown(u16),
}

impl HandshakeRequest {
    /// Parse an Rx write
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::ParseError`] for an empty write and
    /// [`TrainerError::InvalidParameters`] for a challenge without a full nonce.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        match buf.remaining() {
            0 => {
                return Err(TrainerError::ParseError("Empty steering write".to_string()));
            }
            1 => return Ok(Self::Ping(buf.get_u8())),
            _ => {}
        }

        let request = match buf.get_u16() {
            CMD_CAPABILITIES => Self::Capabilities,
            CMD_CHALLENGE => {
                if data.len() < CHALLENGE_LEN {
                    return Err(TrainerError::InvalidParameters(format!(
                        "Challenge too short: {} bytes, expected {CHALLENGE_LEN}",
                        data.len()
                    )));
                }
                Self::Challenge(buf.get_u32_le())
            }
            CMD_CHALLENGE_ACK => Self::ChallengeAck,
            CMD_STATUS => Self::Status,
            other => Self::Unknown(other),
        };

        Ok(request)
    }
}

/// Scramble a challenge nonce
///
/// `rotl(x, x mod 11) ^ (x + 0x16FA5717)`, all modulo 2^32.
#[must_use]
pub const fn challenge_response(nonce: u32) -> u32 {
    let rotated = nonce.rotate_left(nonce % 11);
    rotated ^ nonce.wrapping_add(CHALLENGE_KEY)
}

/// Indication sent when a central subscribes to Tx and in answer to [`CMD_CAPABILITIES`]
#[must_use]
pub fn greeting() -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16(CMD_CAPABILITIES);
    buf.put_u16(CAPABILITIES_VALUE);
    buf.freeze()
}

/// Answer for one decoded request, if it gets one
#[must_use]
pub fn response(request: &HandshakeRequest) -> Option<Bytes> {
    match *request {
        HandshakeRequest::Capabilities => Some(greeting()),
        HandshakeRequest::Challenge(nonce) => {
            let answer = challenge_response(nonce);
            debug!("Steering challenge {nonce:#010x}, answering {answer:#010x}");
            let mut buf = BytesMut::with_capacity(CHALLENGE_LEN);
            buf.put_u16(CMD_CHALLENGE);
            buf.put_u32_le(answer);
            Some(buf.freeze())
        }
        HandshakeRequest::ChallengeAck => {
            debug!("Steering challenge accepted by central");
            let mut buf = BytesMut::with_capacity(3);
            buf.put_u16(CMD_CHALLENGE_ACK);
            buf.put_u8(CHALLENGE_ACK_VALUE);
            Some(buf.freeze())
        }
        HandshakeRequest::Ping(value) => {
            debug!("Steering ping {value:02X}");
            None
        }
        HandshakeRequest::Status => {
            debug!("Steering status report received");
            None
        }
        HandshakeRequest::Unknown(code) => {
            debug!("Unknown steering command {code:04X}");
            None
        }
    }
}

/// Decode an Rx write and produce the Tx indication it calls for
#[must_use]
pub fn respond(data: &[u8]) -> Option<Bytes> {
    match HandshakeRequest::from_bytes(data) {
        Ok(request) => response(&request),
        Err(e) => {
            warn!("Dropping steering write {data:02X?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_response_golden() {
        // 0x12345678 mod 11 = 1
        assert_eq!(challenge_response(0x1234_5678), 0x0D46_017F);
        assert_eq!(challenge_response(0), CHALLENGE_KEY);
        // rotation by zero
        assert_eq!(challenge_response(11), 11 ^ (11 + CHALLENGE_KEY));
        // key addition wraps
        assert_eq!(challenge_response(u32::MAX), 0xE905_A8E9);
    }

    #[test]
    fn test_challenge_indication_layout() {
        let answer = respond(&[0x03, 0x12, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(&answer[..], &[0x03, 0x12, 0x7F, 0x01, 0x46, 0x0D]);
    }

    #[test]
    fn test_challenge_too_short() {
        assert!(matches!(
            HandshakeRequest::from_bytes(&[0x03, 0x12, 0x01]),
            Err(TrainerError::InvalidParameters(_))
        ));
        assert!(respond(&[0x03, 0x12, 0x01, 0x02, 0x03]).is_none());
    }

    #[test]
    fn test_fixed_answers() {
        assert_eq!(&respond(&[0x03, 0x10]).unwrap()[..], &[0x03, 0x10, 0x4A, 0x89]);
        assert_eq!(&respond(&[0x03, 0x13]).unwrap()[..], &[0x03, 0x13, 0xFF]);
        assert_eq!(&greeting()[..], &[0x03, 0x10, 0x4A, 0x89]);
    }

    #[test]
    fn test_silent_commands() {
        assert!(respond(&[]).is_none());
        assert!(respond(&[0x01]).is_none());
        assert!(respond(&[0x02, 0x02]).is_none());
        assert!(respond(&[0xAB, 0xCD, 0x00]).is_none());
        assert_eq!(
            HandshakeRequest::from_bytes(&[0xAB, 0xCD]).unwrap(),
            HandshakeRequest::Unknown(0xABCD)
        );
    }

    #[test]
    fn test_stateless() {
        let first = respond(&[0x03, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);
        let _ = respond(&[0x03, 0x13]);
        let second = respond(&[0x03, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(first, second);
    }
}
