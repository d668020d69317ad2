//! Calibration data persistence
//!
//! Loads and saves IMU bias offsets to flash storage as a
//! [`CalibrationRecord`] (magic, version, CRC).

use defmt::*;

use icaro_core::config::{
    CalibrationError, CalibrationOffsets, CalibrationRecord, MAX_CALIBRATION_SIZE,
};
use icaro_core::traits::CalibrationStore;
use icaro_hal::FlashStorage as _;
use icaro_hal_stm32::flash::{FlashError, FlashStorage, StorageKey};

/// [`CalibrationStore`] backed by the flash storage partition
pub struct FlashCalibrationStore<'d> {
    storage: FlashStorage<'d>,
}

impl<'d> FlashCalibrationStore<'d> {
    pub fn new(storage: FlashStorage<'d>) -> Self {
        Self { storage }
    }
}

impl<'d> CalibrationStore for FlashCalibrationStore<'d> {
    type Error = CalibrationError;

    /// Invalid records are reported as `None`; only storage failures are
    /// errors
    async fn load(&mut self) -> Result<Option<CalibrationOffsets>, CalibrationError> {
        let mut buffer = [0u8; MAX_CALIBRATION_SIZE];
        let len = match self
            .storage
            .read(StorageKey::ImuCalibration, &mut buffer)
            .await
        {
            Ok(len) => len,
            Err(FlashError::NotFound) => {
                debug!("No calibration data in flash");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Read {} bytes of calibration from flash", len);

        match CalibrationRecord::decode(&buffer[..len]) {
            Ok(record) => {
                info!(
                    "Loaded IMU calibration: accel={} gyro={}",
                    record.offsets.accel, record.offsets.gyro
                );
                Ok(Some(record.offsets))
            }
            Err(e) => {
                warn!("Ignoring stored calibration: {:?}", e);
                Ok(None)
            }
        }
    }

    async fn save(&mut self, offsets: &CalibrationOffsets) -> Result<(), CalibrationError> {
        let mut buffer = [0u8; MAX_CALIBRATION_SIZE];
        let bytes = CalibrationRecord::new(*offsets).encode(&mut buffer)?;

        debug!("Saving {} bytes of calibration to flash", bytes.len());

        self.storage
            .write(StorageKey::ImuCalibration, bytes)
            .await?;

        info!("Saved IMU calibration to flash");
        Ok(())
    }
}
