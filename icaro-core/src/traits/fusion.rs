//! Orientation estimation

use icaro_protocol::AttitudeSample;

use crate::config::CalibrationOffsets;

/// Sensor fusion filter
///
/// Implementations combine accelerometer and gyroscope
/// readings into an orientation estimate. The node calls
/// [`produce_attitude`](FusionFilter::produce_attitude) once per publish
/// interval.
pub trait FusionFilter {
    /// Latest orientation estimate
    fn produce_attitude(&mut self) -> AttitudeSample;

    /// Apply sensor bias offsets from calibration
    fn apply_calibration(&mut self, offsets: &CalibrationOffsets);
}
