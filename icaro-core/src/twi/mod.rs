//! Two-wire bus transport
//!
//! [`TwiEngine`] owns the bus state machine and is driven from the bus
//! interrupt. [`Wire`] layers buffered controller transactions on top of
//! it. Peripheral-role traffic is delivered to a [`PeripheralHandler`].

pub mod engine;
pub mod wire;

pub use engine::{BusState, BusStats, Completed, Direction, Role, TwiEngine};
pub use wire::Wire;

use heapless::Vec;

/// Maximum bytes moved by one bus transfer
pub const BUFFER_LENGTH: usize = icaro_protocol::MAX_TRANSFER;

/// Byte sent when a peripheral request handler supplies nothing
pub const PLACEHOLDER_BYTE: u8 = 0x00;

/// Fixed-capacity transfer buffer
pub type TwiBuffer = Vec<u8, BUFFER_LENGTH>;

/// Classified outcome of a failed controller transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// Nobody acknowledged the address byte
    AddressNack,
    /// Peer refused a data byte
    DataNack,
    /// Another controller won the bus
    ArbitrationLost,
    /// Illegal START/STOP seen on the bus
    BusError,
    /// Transfer did not finish in time
    Timeout,
    /// Fewer bytes arrived than requested
    Truncated,
}

impl TransferError {
    /// Worth trying again without any recovery action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::AddressNack
                | TransferError::DataNack
                | TransferError::ArbitrationLost
                | TransferError::Truncated
        )
    }
}

/// Reasons a transfer cannot be started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartError {
    /// Engine is not in `BusState::Ready`
    Busy,
    /// Zero-length read or more than [`BUFFER_LENGTH`] bytes
    InvalidLength,
}

/// Peripheral-role hooks invoked from the bus interrupt
///
/// Both methods run in interrupt context and must return quickly.
pub trait PeripheralHandler {
    /// A controller finished writing `data` to us
    fn on_receive(&mut self, data: &[u8]);

    /// A controller wants to read from us
    ///
    /// Fill `response` with the bytes to send. Leaving it empty sends a
    /// single [`PLACEHOLDER_BYTE`].
    fn on_request(&mut self, response: &mut TwiBuffer);
}

/// Handler for nodes that never act as a peripheral
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeripheral;

impl PeripheralHandler for NoPeripheral {
    fn on_receive(&mut self, _data: &[u8]) {}

    fn on_request(&mut self, _response: &mut TwiBuffer) {}
}

impl<T: PeripheralHandler + ?Sized> PeripheralHandler for &mut T {
    fn on_receive(&mut self, data: &[u8]) {
        (**self).on_receive(data)
    }

    fn on_request(&mut self, response: &mut TwiBuffer) {
        (**self).on_request(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(TransferError::ArbitrationLost.is_retryable());
        assert!(TransferError::AddressNack.is_retryable());
        assert!(!TransferError::BusError.is_retryable());
        assert!(!TransferError::Timeout.is_retryable());
    }
}
