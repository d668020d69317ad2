//! IMU calibration data types
//!
//! Bias offsets measured while the node rests. They are persisted so a
//! reboot does not require the controller to trigger a new calibration
//! before attitude output is trustworthy.

use serde::{Deserialize, Serialize};

use icaro_hal::FlashError;

/// Magic number to identify valid calibration data
pub const CALIBRATION_MAGIC: u32 = 0x4C41_4349; // "ICAL"

/// Current calibration data version
pub const CALIBRATION_VERSION: u8 = 1;

/// Upper bound of an encoded [`CalibrationRecord`]
pub const MAX_CALIBRATION_SIZE: usize = 64;

/// Calibration persistence errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Storage operation failed
    Storage(FlashError),
    /// Serialization failed
    Serialize,
    /// Deserialization failed
    Deserialize,
    /// CRC check failed
    CrcMismatch,
    /// Invalid magic or version
    InvalidFormat,
}

impl From<FlashError> for CalibrationError {
    fn from(e: FlashError) -> Self {
        CalibrationError::Storage(e)
    }
}

/// Raw sensor bias offsets
///
/// Units are raw sensor counts, so the values stay meaningful only for the
/// sensor range they were measured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationOffsets {
    /// Accelerometer x/y/z bias
    pub accel: [i16; 3],
    /// Gyroscope x/y/z bias
    pub gyro: [i16; 3],
}

impl CalibrationOffsets {
    /// Create offsets from accelerometer and gyroscope biases
    pub const fn new(accel: [i16; 3], gyro: [i16; 3]) -> Self {
        Self { accel, gyro }
    }

    /// All six values in storage order: ax, ay, az, gx, gy, gz
    pub fn to_array(&self) -> [i16; 6] {
        let [ax, ay, az] = self.accel;
        let [gx, gy, gz] = self.gyro;
        [ax, ay, az, gx, gy, gz]
    }
}

/// Calibration record stored in flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    /// Magic number for validation
    pub magic: u32,
    /// Data format version
    pub version: u8,
    /// Measured offsets
    pub offsets: CalibrationOffsets,
    /// CRC32 checksum (calculated over magic..offsets)
    pub crc: u32,
}

impl CalibrationRecord {
    /// Wrap offsets in a record with a valid CRC
    pub fn new(offsets: CalibrationOffsets) -> Self {
        let mut record = Self {
            magic: CALIBRATION_MAGIC,
            version: CALIBRATION_VERSION,
            offsets,
            crc: 0,
        };
        record.update_crc();
        record
    }

    /// Check if the header is valid (magic and version match)
    pub fn is_valid(&self) -> bool {
        self.magic == CALIBRATION_MAGIC && self.version == CALIBRATION_VERSION
    }

    /// Calculate CRC32 for the data (excluding the crc field itself)
    pub fn calculate_crc(&self) -> u32 {
        let mut crc: u32 = 0xFFFF_FFFF;
        crc = crc32_update(crc, &self.magic.to_le_bytes());
        crc = crc32_update(crc, &[self.version]);
        for value in self.offsets.to_array() {
            crc = crc32_update(crc, &value.to_le_bytes());
        }
        !crc
    }

    /// Update the CRC field
    pub fn update_crc(&mut self) {
        self.crc = self.calculate_crc();
    }

    /// Verify the CRC is correct
    pub fn verify_crc(&self) -> bool {
        self.crc == self.calculate_crc()
    }

    /// Serialize into `buffer`, returning the used prefix
    pub fn encode<'a>(&self, buffer: &'a mut [u8]) -> Result<&'a mut [u8], CalibrationError> {
        postcard::to_slice(self, buffer).map_err(|_| CalibrationError::Serialize)
    }

    /// Deserialize and validate a stored record
    pub fn decode(bytes: &[u8]) -> Result<Self, CalibrationError> {
        let record: Self = postcard::from_bytes(bytes).map_err(|_| CalibrationError::Deserialize)?;
        if !record.is_valid() {
            return Err(CalibrationError::InvalidFormat);
        }
        if !record.verify_crc() {
            return Err(CalibrationError::CrcMismatch);
        }
        Ok(record)
    }
}

/// Simple CRC32 update function (IEEE 802.3 polynomial)
fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc = crc;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CalibrationOffsets {
        CalibrationOffsets::new([-120, 45, 16_384], [12, -7, 3])
    }

    #[test]
    fn test_new_record_is_valid() {
        let record = CalibrationRecord::new(sample());
        assert!(record.is_valid());
        assert!(record.verify_crc());
    }

    #[test]
    fn test_crc_detects_change() {
        let mut record = CalibrationRecord::new(sample());
        record.offsets.gyro[0] = 13;
        assert!(!record.verify_crc());
    }

    #[test]
    fn test_encode_decode_keeps_axis_order() {
        let mut buffer = [0u8; MAX_CALIBRATION_SIZE];
        let record = CalibrationRecord::new(sample());
        let bytes = record.encode(&mut buffer).unwrap();
        let decoded = CalibrationRecord::decode(bytes).unwrap();

        // Each gyro axis comes back under its own name
        assert_eq!(decoded.offsets.gyro, [12, -7, 3]);
        assert_eq!(decoded.offsets.accel, [-120, 45, 16_384]);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut buffer = [0u8; MAX_CALIBRATION_SIZE];
        let mut record = CalibrationRecord::new(sample());
        record.crc ^= 1;
        let bytes = record.encode(&mut buffer).unwrap();
        assert_eq!(
            CalibrationRecord::decode(bytes),
            Err(CalibrationError::CrcMismatch)
        );
    }

    #[test]
    fn test_decode_rejects_wrong_magic() {
        let mut buffer = [0u8; MAX_CALIBRATION_SIZE];
        let mut record = CalibrationRecord::new(sample());
        record.magic = 0x5049_4443;
        record.update_crc();
        let bytes = record.encode(&mut buffer).unwrap();
        assert_eq!(
            CalibrationRecord::decode(bytes),
            Err(CalibrationError::InvalidFormat)
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert_eq!(
            CalibrationRecord::decode(&[]),
            Err(CalibrationError::Deserialize)
        );
    }

    #[test]
    fn test_array_order() {
        let offsets = sample();
        assert_eq!(offsets.to_array(), [-120, 45, 16_384, 12, -7, 3]);
    }

    #[test]
    fn test_crc32_reference_value() {
        // CRC-32 of "123456789"
        assert_eq!(!crc32_update(0xFFFF_FFFF, b"123456789"), 0xCBF4_3926);
    }
}
