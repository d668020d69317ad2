//! State shared between tasks
//!
//! The IMU bus is shared by the sensor task and the calibrator; the
//! filter by the sensor task (updates) and the node task (publishing).

use core::cell::RefCell;

use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::mode::Async;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;

use icaro_core::config::CalibrationOffsets;
use icaro_core::traits::{FusionFilter, SensorError};
use icaro_drivers::fusion::MahonyFilter;
use icaro_drivers::imu::{MotionSource, Mpu6050, RawMotion};
use icaro_protocol::AttitudeSample;

pub type Imu = Mpu6050<I2c<'static, Async, i2c::Master>>;

/// IMU behind an async mutex; calibration holds it for seconds
pub type ImuMutex = Mutex<CriticalSectionRawMutex, Imu>;

/// Filter behind a blocking mutex; every access is short
pub type FilterCell = BlockingMutex<CriticalSectionRawMutex, RefCell<MahonyFilter>>;

/// Calibrator's handle on the shared IMU
pub struct SharedImu(pub &'static ImuMutex);

impl MotionSource for SharedImu {
    async fn read_motion(&mut self) -> Result<RawMotion, SensorError> {
        self.0.lock().await.read().await
    }
}

/// Node's handle on the shared filter
pub struct SharedFilter(pub &'static FilterCell);

impl FusionFilter for SharedFilter {
    fn produce_attitude(&mut self) -> AttitudeSample {
        self.0.lock(|filter| filter.borrow_mut().produce_attitude())
    }

    fn apply_calibration(&mut self, offsets: &CalibrationOffsets) {
        self.0
            .lock(|filter| filter.borrow_mut().apply_calibration(offsets));
    }
}
