//! Configuration and calibration persistence
//!
//! Both records live in the flash storage partition as postcard data.

pub mod calibration;
pub mod loader;

pub use calibration::FlashCalibrationStore;
pub use loader::ConfigPersistence;
