//! Register writes as they travel on the bus
//!
//! Every bus write to the attitude node has the same shape:
//! - byte 0: register pointer
//! - bytes 1..: values stored from the pointer upward
//!
//! A write with no values only moves the pointer. The transaction layer
//! builds those itself before a register read.

use heapless::Vec;

use crate::registers::{MAX_TRANSFER, STATUS_ADDRESS};
use crate::status::StatusCode;

/// Largest value payload that still fits one transfer with its pointer
pub const MAX_WRITE_PAYLOAD: usize = MAX_TRANSFER - 1;

/// Register write errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Values do not fit a single transfer
    PayloadTooLarge,
}

/// One register write: pointer plus values
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterWrite {
    /// Register pointer
    pub address: u8,
    /// Values stored from `address` upward
    pub values: Vec<u8, MAX_WRITE_PAYLOAD>,
}

impl RegisterWrite {
    /// Store raw values starting at `address`
    pub fn new(address: u8, values: &[u8]) -> Result<Self, CommandError> {
        let values = Vec::from_slice(values).map_err(|_| CommandError::PayloadTooLarge)?;
        Ok(Self { address, values })
    }

    /// Write a status code to register 0
    pub fn status(status: StatusCode) -> Self {
        let mut values = Vec::new();
        // Capacity is far above one byte
        let _ = values.push(status.to_byte());
        Self {
            address: STATUS_ADDRESS,
            values,
        }
    }

    /// Encode into the bytes sent on the bus
    pub fn encode(&self) -> Vec<u8, MAX_TRANSFER> {
        let mut out = Vec::new();
        let _ = out.push(self.address);
        let _ = out.extend_from_slice(&self.values);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::ROLL_ADDRESS;
    use proptest::prelude::*;

    #[test]
    fn test_status_write_bytes() {
        let write = RegisterWrite::status(StatusCode::Calibrating);
        assert_eq!(write.encode().as_slice(), &[0x00, 0x02]);
    }

    #[test]
    fn test_payload_limit() {
        assert!(RegisterWrite::new(0, &[0u8; MAX_WRITE_PAYLOAD]).is_ok());
        assert_eq!(
            RegisterWrite::new(0, &[0u8; MAX_WRITE_PAYLOAD + 1]),
            Err(CommandError::PayloadTooLarge)
        );
    }

    #[test]
    fn test_empty_write_is_pointer_only() {
        let write = RegisterWrite::new(ROLL_ADDRESS, &[]).unwrap();
        assert_eq!(write.encode().as_slice(), &[ROLL_ADDRESS]);
    }

    proptest! {
        #[test]
        fn test_encode_prefixes_pointer(
            address in any::<u8>(),
            values in proptest::collection::vec(any::<u8>(), 0..=MAX_WRITE_PAYLOAD),
        ) {
            let bytes = RegisterWrite::new(address, &values).unwrap().encode();
            prop_assert_eq!(bytes[0], address);
            prop_assert_eq!(&bytes[1..], values.as_slice());
        }
    }
}
