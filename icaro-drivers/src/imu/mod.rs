//! Inertial sensor drivers

pub mod calibration;
pub mod hmc5883l;
pub mod mpu6050;

pub use calibration::{BiasEstimator, RestingCalibrator};
pub use hmc5883l::Hmc5883l;
pub use mpu6050::Mpu6050;

use core::future::Future;

use icaro_core::traits::SensorError;

/// One raw accelerometer + gyroscope reading in sensor counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawMotion {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
}

/// Conversion from raw counts to physical units
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorScale {
    /// Counts per g
    pub accel_per_g: f32,
    /// Counts per degree per second
    pub gyro_per_dps: f32,
}

impl SensorScale {
    /// ±8 g accelerometer, ±500 °/s gyroscope
    pub const MPU6050_8G_500DPS: Self = Self {
        accel_per_g: 4096.0,
        gyro_per_dps: 65.5,
    };

    /// Accelerometer counts for 1 g, as an integer
    pub fn gravity_counts(&self) -> i16 {
        self.accel_per_g as i16
    }
}

/// Anything that can produce raw motion samples
pub trait MotionSource {
    /// Read one sample
    fn read_motion(&mut self) -> impl Future<Output = Result<RawMotion, SensorError>>;
}

impl<T: MotionSource + ?Sized> MotionSource for &mut T {
    fn read_motion(&mut self) -> impl Future<Output = Result<RawMotion, SensorError>> {
        (**self).read_motion()
    }
}
