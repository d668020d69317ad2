//! Persistent records
//!
//! The node keeps two small records in flash: its configuration and the
//! resting bias offsets measured during calibration. Chip HALs provide
//! the storage; the record formats live in `icaro-core`.

/// Storage keys for persisted node data
///
/// Each key names one record in the storage partition. The storage
/// implementation handles wear leveling; record integrity (magic, CRC)
/// is the caller's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StorageKey {
    /// Node configuration (binary postcard format)
    NodeConfig = 0,
    /// Accelerometer and gyroscope bias offsets
    ImuCalibration = 1,
}

impl StorageKey {
    /// Get the key as a byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create a key from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StorageKey::NodeConfig),
            1 => Some(StorageKey::ImuCalibration),
            _ => None,
        }
    }
}

/// Why a record could not be read or stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// No record under this key; a fresh node has neither config nor
    /// calibration
    NotFound,
    /// Stored record is larger than the caller's buffer
    RecordTooLarge,
    /// Partition metadata is damaged
    Corrupted,
    /// No room left for another record, even after compaction
    Full,
    /// Erase, program or read failed in the flash controller
    Device,
}

/// Record store for the node configuration and the IMU calibration
///
/// One record per [`StorageKey`]; a write replaces the previous record
/// for that key. A record interrupted by a reset must read back as the
/// previous one or as `NotFound`, never half-written.
pub trait FlashStorage {
    /// Copy the record for `key` into `buffer` and return its length
    fn read(
        &mut self,
        key: StorageKey,
        buffer: &mut [u8],
    ) -> impl core::future::Future<Output = Result<usize, FlashError>>;

    /// Store `data` as the record for `key`
    fn write(
        &mut self,
        key: StorageKey,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), FlashError>>;
}

#[cfg(feature = "sequential-storage")]
impl sequential_storage::map::Key for StorageKey {
    fn serialize_into(
        &self,
        buffer: &mut [u8],
    ) -> Result<usize, sequential_storage::map::SerializationError> {
        if buffer.is_empty() {
            return Err(sequential_storage::map::SerializationError::BufferTooSmall);
        }
        buffer[0] = self.as_u8();
        Ok(1)
    }

    fn deserialize_from(
        buffer: &[u8],
    ) -> Result<(Self, usize), sequential_storage::map::SerializationError> {
        if buffer.is_empty() {
            return Err(sequential_storage::map::SerializationError::BufferTooSmall);
        }
        match StorageKey::from_u8(buffer[0]) {
            Some(key) => Ok((key, 1)),
            None => Err(sequential_storage::map::SerializationError::InvalidFormat),
        }
    }
}
