//! Register map and bus constants

/// Bus address of the attitude node
pub const IMU_ADDRESS: u8 = 0x01;

/// Bus clock in Hz
pub const BUS_FREQUENCY_HZ: u32 = 100_000;

/// Largest single bus transfer in bytes
pub const MAX_TRANSFER: usize = 32;

/// Handshake status byte
pub const STATUS_ADDRESS: u8 = 0;
/// Roll angle, f32 little-endian
pub const ROLL_ADDRESS: u8 = 1;
/// Pitch angle, f32 little-endian
pub const PITCH_ADDRESS: u8 = 5;
/// Yaw angle, f32 little-endian
pub const YAW_ADDRESS: u8 = 9;

/// Size of one float register
pub const FLOAT_LEN: usize = 4;

/// Bytes covered by the three attitude registers
pub const ATTITUDE_LEN: usize = 3 * FLOAT_LEN;

/// Total register file size
pub const REGISTER_FILE_LEN: usize = 1 + ATTITUDE_LEN;

/// Check whether `address` falls inside the register file
pub const fn is_valid_address(address: u8) -> bool {
    (address as usize) < REGISTER_FILE_LEN
}

/// Offset of an attitude register within the attitude block
///
/// Returns `None` for the status register and anything out of range.
pub const fn attitude_offset(address: u8) -> Option<usize> {
    if address >= ROLL_ADDRESS && is_valid_address(address) {
        Some((address - ROLL_ADDRESS) as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_contiguous() {
        assert_eq!(PITCH_ADDRESS as usize, ROLL_ADDRESS as usize + FLOAT_LEN);
        assert_eq!(YAW_ADDRESS as usize, PITCH_ADDRESS as usize + FLOAT_LEN);
        assert_eq!(REGISTER_FILE_LEN, YAW_ADDRESS as usize + FLOAT_LEN);
        assert_eq!(REGISTER_FILE_LEN, 13);
    }

    #[test]
    fn test_attitude_offset() {
        assert_eq!(attitude_offset(STATUS_ADDRESS), None);
        assert_eq!(attitude_offset(ROLL_ADDRESS), Some(0));
        assert_eq!(attitude_offset(YAW_ADDRESS), Some(8));
        assert_eq!(attitude_offset(12), Some(11));
        assert_eq!(attitude_offset(13), None);
    }

    #[test]
    fn test_whole_file_fits_one_transfer() {
        assert!(REGISTER_FILE_LEN < MAX_TRANSFER);
    }
}
