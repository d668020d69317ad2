//! Events that trigger node state transitions

use icaro_protocol::StatusCode;

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeEvent {
    // Controller commands
    /// Controller wrote `Calibrating` to register 0
    CalibrationRequested,
    /// Controller wrote `Running` to register 0
    StartRequested,

    // Calibration outcome
    /// Offsets measured (and stored)
    CalibrationComplete,
    /// Sensor failed during calibration
    CalibrationFailed,
}

impl NodeEvent {
    /// Event carried by a status byte written by the controller
    pub fn from_command(status: StatusCode) -> Option<Self> {
        match status {
            StatusCode::Calibrating => Some(NodeEvent::CalibrationRequested),
            StatusCode::Running => Some(NodeEvent::StartRequested),
            StatusCode::Initializing | StatusCode::ReadyToStart => None,
        }
    }
}
