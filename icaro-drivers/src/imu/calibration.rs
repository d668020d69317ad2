//! Resting bias calibration
//!
//! The node must lie still while the controller runs the handshake. The
//! first samples are thrown away while the sensor settles, the rest are
//! averaged. Whatever the gyroscope reads at rest is bias; the
//! accelerometer should read exactly 1 g on Z and nothing on X/Y.

use embedded_hal_async::delay::DelayNs;

use icaro_core::config::CalibrationOffsets;
use icaro_core::traits::{ImuCalibrator, SensorError};

use super::{MotionSource, RawMotion};

/// Largest gyro swing (counts) still accepted as resting, about ±4 °/s
pub const MAX_REST_GYRO_SPREAD: i16 = 500;

/// Running sums over resting samples
#[derive(Debug, Clone, Copy, Default)]
pub struct BiasEstimator {
    count: u32,
    accel_sum: [i64; 3],
    gyro_sum: [i64; 3],
    gyro_min: [i16; 3],
    gyro_max: [i16; 3],
}

impl BiasEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample
    pub fn add(&mut self, motion: &RawMotion) {
        for axis in 0..3 {
            self.accel_sum[axis] += motion.accel[axis] as i64;
            self.gyro_sum[axis] += motion.gyro[axis] as i64;
            if self.count == 0 {
                self.gyro_min[axis] = motion.gyro[axis];
                self.gyro_max[axis] = motion.gyro[axis];
            } else {
                self.gyro_min[axis] = self.gyro_min[axis].min(motion.gyro[axis]);
                self.gyro_max[axis] = self.gyro_max[axis].max(motion.gyro[axis]);
            }
        }
        self.count += 1;
    }

    /// Samples seen so far
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Offsets from the averaged samples
    ///
    /// `gravity_counts` is what Z should read at rest.
    pub fn finish(&self, gravity_counts: i16) -> Result<CalibrationOffsets, SensorError> {
        if self.count == 0 {
            return Err(SensorError::NotResponding);
        }
        for axis in 0..3 {
            let spread = self.gyro_max[axis] as i32 - self.gyro_min[axis] as i32;
            if spread > MAX_REST_GYRO_SPREAD as i32 {
                return Err(SensorError::NotStationary);
            }
        }

        let mean = |sum: i64| saturate(sum / self.count as i64);
        let mut accel = self.accel_sum.map(mean);
        accel[2] = saturate(accel[2] as i64 - gravity_counts as i64);
        Ok(CalibrationOffsets::new(accel, self.gyro_sum.map(mean)))
    }
}

fn saturate(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// [`ImuCalibrator`] that averages samples from a resting sensor
pub struct RestingCalibrator<S, D> {
    source: S,
    delay: D,
    samples: u16,
    settle_samples: u16,
    interval_ms: u32,
    gravity_counts: i16,
}

impl<S: MotionSource, D: DelayNs> RestingCalibrator<S, D> {
    /// Discard samples before averaging
    pub const SETTLE_SAMPLES: u16 = 100;

    /// Spacing so consecutive reads see fresh data
    pub const INTERVAL_MS: u32 = 10;

    /// Average `samples` readings, spaced [`INTERVAL_MS`](Self::INTERVAL_MS) apart
    pub fn new(source: S, delay: D, samples: u16, gravity_counts: i16) -> Self {
        Self {
            source,
            delay,
            samples: samples.max(1),
            settle_samples: Self::SETTLE_SAMPLES,
            interval_ms: Self::INTERVAL_MS,
            gravity_counts,
        }
    }

    /// Override the settle count and spacing
    pub fn with_timing(mut self, settle_samples: u16, interval_ms: u32) -> Self {
        self.settle_samples = settle_samples;
        self.interval_ms = interval_ms;
        self
    }

    /// Motion source
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: MotionSource, D: DelayNs> ImuCalibrator for RestingCalibrator<S, D> {
    async fn calibrate(&mut self) -> Result<CalibrationOffsets, SensorError> {
        for _ in 0..self.settle_samples {
            self.source.read_motion().await?;
            self.delay.delay_ms(self.interval_ms).await;
        }

        let mut estimator = BiasEstimator::new();
        for _ in 0..self.samples {
            let motion = self.source.read_motion().await?;
            estimator.add(&motion);
            self.delay.delay_ms(self.interval_ms).await;
        }
        estimator.finish(self.gravity_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use proptest::prelude::*;
    use std::vec::Vec;

    struct NoDelay;

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Replays samples, then keeps repeating the last one
    struct Replay {
        samples: Vec<RawMotion>,
        next: usize,
        fail: bool,
    }

    impl Replay {
        fn still(motion: RawMotion) -> Self {
            Self {
                samples: std::vec![motion],
                next: 0,
                fail: false,
            }
        }
    }

    impl MotionSource for Replay {
        async fn read_motion(&mut self) -> Result<RawMotion, SensorError> {
            if self.fail {
                return Err(SensorError::NotResponding);
            }
            let index = self.next.min(self.samples.len() - 1);
            self.next += 1;
            Ok(self.samples[index])
        }
    }

    const AT_REST: RawMotion = RawMotion {
        accel: [-120, 45, 4096 + 30],
        gyro: [12, -7, 3],
    };

    #[test]
    fn test_resting_offsets() {
        let mut calibrator = RestingCalibrator::new(Replay::still(AT_REST), NoDelay, 50, 4096);
        let offsets = block_on(calibrator.calibrate()).unwrap();
        assert_eq!(offsets.accel, [-120, 45, 30]);
        assert_eq!(offsets.gyro, [12, -7, 3]);
    }

    #[test]
    fn test_settle_samples_are_discarded() {
        let mut samples = std::vec![RawMotion { accel: [9_000; 3], gyro: [9_000; 3] }; 100];
        samples.push(AT_REST);
        let source = Replay {
            samples,
            next: 0,
            fail: false,
        };
        let mut calibrator = RestingCalibrator::new(source, NoDelay, 20, 4096);
        let offsets = block_on(calibrator.calibrate()).unwrap();
        assert_eq!(offsets.gyro, [12, -7, 3]);
        assert_eq!(calibrator.source_mut().next, 120);
    }

    #[test]
    fn test_moving_sensor_is_rejected() {
        let mut estimator = BiasEstimator::new();
        estimator.add(&AT_REST);
        estimator.add(&RawMotion {
            gyro: [12, 900, 3],
            ..AT_REST
        });
        assert_eq!(estimator.finish(4096), Err(SensorError::NotStationary));
    }

    #[test]
    fn test_sensor_failure_propagates() {
        let mut source = Replay::still(AT_REST);
        source.fail = true;
        let mut calibrator = RestingCalibrator::new(source, NoDelay, 10, 4096).with_timing(0, 0);
        assert_eq!(
            block_on(calibrator.calibrate()),
            Err(SensorError::NotResponding)
        );
    }

    #[test]
    fn test_empty_estimator() {
        assert_eq!(
            BiasEstimator::new().finish(4096),
            Err(SensorError::NotResponding)
        );
    }

    proptest! {
        #[test]
        fn prop_constant_input_is_its_own_bias(
            accel in proptest::array::uniform3(-8000i16..8000),
            gyro in proptest::array::uniform3(i16::MIN..i16::MAX),
            count in 1u32..64,
        ) {
            let mut estimator = BiasEstimator::new();
            for _ in 0..count {
                estimator.add(&RawMotion { accel, gyro });
            }
            let offsets = estimator.finish(4096).unwrap();
            prop_assert_eq!(offsets.gyro, gyro);
            prop_assert_eq!(offsets.accel[0], accel[0]);
            prop_assert_eq!(offsets.accel[2], accel[2] - 4096);
        }
    }
}
