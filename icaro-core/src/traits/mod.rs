//! Collaborator traits
//!
//! These traits define the interface between the core logic and the
//! parts that live in firmware: the fusion filter, the sensor calibration
//! routine, persistent storage and the millisecond clock.

pub mod calibration;
pub mod clock;
pub mod fusion;

pub use calibration::{CalibrationStore, ImuCalibrator, SensorError};
pub use clock::Clock;
pub use fusion::FusionFilter;
