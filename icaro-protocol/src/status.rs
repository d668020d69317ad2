//! Handshake status codes held in register 0

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handshake phase of the attitude node
///
/// The controller writes `Calibrating` and `Running` to request a phase
/// change. The node writes `Initializing` and `ReadyToStart` to announce
/// where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StatusCode {
    /// Node booting, sensors not yet configured
    Initializing,
    /// Calibration requested or in progress
    Calibrating,
    /// Calibration finished, waiting for the start command
    ReadyToStart,
    /// Attitude registers are live
    Running,
}

// Wire format values
const STATUS_INITIALIZING: u8 = 1;
const STATUS_CALIBRATING: u8 = 2;
const STATUS_READY_TO_START: u8 = 3;
const STATUS_RUNNING: u8 = 10;

impl StatusCode {
    /// Parse a status from its register byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            STATUS_INITIALIZING => Some(StatusCode::Initializing),
            STATUS_CALIBRATING => Some(StatusCode::Calibrating),
            STATUS_READY_TO_START => Some(StatusCode::ReadyToStart),
            STATUS_RUNNING => Some(StatusCode::Running),
            _ => None,
        }
    }

    /// Convert to register byte
    pub const fn to_byte(self) -> u8 {
        match self {
            StatusCode::Initializing => STATUS_INITIALIZING,
            StatusCode::Calibrating => STATUS_CALIBRATING,
            StatusCode::ReadyToStart => STATUS_READY_TO_START,
            StatusCode::Running => STATUS_RUNNING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        assert_eq!(StatusCode::Initializing.to_byte(), 1);
        assert_eq!(StatusCode::Calibrating.to_byte(), 2);
        assert_eq!(StatusCode::ReadyToStart.to_byte(), 3);
        assert_eq!(StatusCode::Running.to_byte(), 10);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            StatusCode::Initializing,
            StatusCode::Calibrating,
            StatusCode::ReadyToStart,
            StatusCode::Running,
        ] {
            assert_eq!(StatusCode::from_byte(status.to_byte()), Some(status));
        }
    }

    #[test]
    fn test_unknown_status() {
        assert!(StatusCode::from_byte(0).is_none());
        assert!(StatusCode::from_byte(4).is_none());
        assert!(StatusCode::from_byte(0xFF).is_none());
    }

    #[test]
    fn test_ordering_is_monotonic() {
        assert!(StatusCode::Initializing < StatusCode::Calibrating);
        assert!(StatusCode::Calibrating < StatusCode::ReadyToStart);
        assert!(StatusCode::ReadyToStart < StatusCode::Running);
    }
}
