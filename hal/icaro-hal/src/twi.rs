//! Two-wire (I2C/TWI) bus abstractions
//!
//! The bus engine is driven one hardware condition at a time. A chip HAL
//! decodes its status registers into a [`BusStatus`] and then performs
//! whatever the engine asks for through the [`TwiHardware`] methods.
//!
//! Every condition leaves the hardware stretching the clock until the
//! engine answers it with exactly one of [`TwiHardware::reply`],
//! [`TwiHardware::stop`], [`TwiHardware::hold_bus`] or
//! [`TwiHardware::release`].

/// Bus condition reported by the two-wire controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusStatus {
    // Controller conditions
    /// START condition transmitted
    StartSent,
    /// Repeated START transmitted while we still owned the bus
    RepeatedStartSent,
    /// Address + write sent, peer acknowledged
    WriteAddressAcked,
    /// Address + write sent, no acknowledge
    WriteAddressNacked,
    /// Data byte sent, peer acknowledged
    WriteDataAcked,
    /// Data byte sent, peer did not acknowledge
    WriteDataNacked,
    /// Another controller won arbitration
    ArbitrationLost,
    /// Address + read sent, peer acknowledged
    ReadAddressAcked,
    /// Address + read sent, no acknowledge
    ReadAddressNacked,
    /// Data byte received and acknowledged by us
    ReadDataAcked,
    /// Data byte received and not acknowledged by us (last byte)
    ReadDataNacked,

    // Peripheral conditions
    /// Own address (or general call) + write received, acknowledged
    AddressedAsReceiver,
    /// Data byte received while addressed, acknowledged
    ReceivedDataAcked,
    /// Data byte received while addressed, not acknowledged
    ReceivedDataNacked,
    /// STOP or repeated START seen while addressed as receiver
    StopReceived,
    /// Own address + read received, acknowledged
    AddressedAsTransmitter,
    /// Data byte transmitted, controller acknowledged
    TransmittedDataAcked,
    /// Data byte transmitted, controller did not acknowledge
    TransmittedDataNacked,
    /// Final byte (sent with nack expected) was acknowledged anyway
    LastDataAcked,

    // Miscellaneous
    /// No relevant state information
    NoInfo,
    /// Illegal START or STOP on the bus
    BusError,
}

/// Interrupt-level two-wire controller
///
/// Implemented by chip HALs (and by the host simulator). All methods are
/// called from the bus interrupt and must not block.
pub trait TwiHardware {
    /// Enable the peripheral with the given configuration
    fn enable(&mut self, config: &TwiConfig);

    /// Disable the peripheral and release the pins
    fn disable(&mut self);

    /// Set the own 7-bit address answered in peripheral role
    fn set_address(&mut self, address: u8);

    /// Next pending bus condition, if any
    fn status(&mut self) -> Option<BusStatus>;

    /// Byte most recently received from the bus
    fn read_data(&mut self) -> u8;

    /// Load the next byte to shift out (address byte or data)
    fn load_data(&mut self, byte: u8);

    /// Continue the current transfer
    ///
    /// `ack` selects whether the next received byte is acknowledged. In
    /// transmit roles it tells the hardware whether more bytes follow.
    fn reply(&mut self, ack: bool);

    /// Generate a START, or a repeated START when the bus is held
    fn start(&mut self);

    /// Generate a STOP and return to idle
    fn stop(&mut self);

    /// Keep ownership of the bus after a transfer so that the next
    /// [`start`](TwiHardware::start) becomes a repeated START
    fn hold_bus(&mut self);

    /// Let go of the bus without generating a condition and keep
    /// answering our own address
    fn release(&mut self);

    /// Announce how the controller will end a read before its final byte
    /// is clocked in
    ///
    /// Controllers that must schedule STOP or repeated START before the
    /// final byte override this. The default does nothing.
    fn prepare_end(&mut self, _send_stop: bool) {}
}

/// Bus configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TwiConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
    /// Own 7-bit address for peripheral role
    pub own_address: Option<u8>,
    /// Answer the general call address (0x00) as a receiver
    pub general_call: bool,
}

impl Default for TwiConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl TwiConfig {
    /// Standard mode (100 kHz)
    pub const STANDARD: Self = Self {
        frequency: 100_000,
        own_address: None,
        general_call: false,
    };

    /// Same configuration answering `address` as a peripheral
    pub const fn with_address(self, address: u8) -> Self {
        Self {
            own_address: Some(address & 0x7F),
            ..self
        }
    }
}

/// Address byte for a 7-bit address and direction
pub const fn address_byte(address: u8, read: bool) -> u8 {
    (address << 1) | read as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_standard_mode() {
        let config = TwiConfig::default();
        assert_eq!(config.frequency, 100_000);
        assert_eq!(config.own_address, None);
    }

    #[test]
    fn test_with_address_masks_to_seven_bits() {
        let config = TwiConfig::STANDARD.with_address(0x81);
        assert_eq!(config.own_address, Some(0x01));
        assert_eq!(config.frequency, 100_000);
    }

    #[test]
    fn test_address_byte() {
        assert_eq!(address_byte(0x01, false), 0x02);
        assert_eq!(address_byte(0x01, true), 0x03);
        assert_eq!(address_byte(0x68, true), 0xD1);
    }
}
