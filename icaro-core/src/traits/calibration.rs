//! Sensor calibration and its persistence

use core::future::Future;

use crate::config::CalibrationOffsets;

/// Errors that can occur while reading the inertial sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Sensor did not answer on its bus
    NotResponding,
    /// Identity register did not match
    WrongDevice,
    /// Readings moved too much to be a resting sample
    NotStationary,
    /// A measurement hit the end of the sensor's range
    Saturated,
}

/// Measures sensor biases while the node rests
pub trait ImuCalibrator {
    /// Run a calibration and return the measured offsets
    ///
    /// Takes long enough (hundreds of samples) that implementations are
    /// async.
    fn calibrate(&mut self) -> impl Future<Output = Result<CalibrationOffsets, SensorError>>;
}

/// Persistent home for calibration offsets
pub trait CalibrationStore {
    /// Error type for storage operations
    type Error;

    /// Load stored offsets, or `None` if nothing valid is stored
    fn load(&mut self) -> impl Future<Output = Result<Option<CalibrationOffsets>, Self::Error>>;

    /// Store offsets, replacing any previous record
    fn save(
        &mut self,
        offsets: &CalibrationOffsets,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}
