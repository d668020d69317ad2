//! IMU sampling task
//!
//! Reads the MPU6050 at a fixed rate and feeds the Mahony filter. The
//! node task only samples the filter output, so the filter keeps running
//! in every node state. When the HMC5883L answered at start-up, its field
//! is read at the conversion rate through the IMU's bypass and steers
//! yaw.

use defmt::*;
use embassy_time::{Duration, Instant, Ticker};

use icaro_drivers::imu::{hmc5883l, Hmc5883l};

use crate::channels::{FilterCell, ImuMutex};

/// Sampling period
const SAMPLE_INTERVAL_MS: u64 = 5;

/// Longest step handed to the filter, in seconds
///
/// Calibration can hold the IMU for a while; a long gap must not turn
/// into one giant gyro integration step.
const MAX_DT_S: f32 = 0.05;

/// Motion samples per field reading; a single conversion needs ~6 ms and
/// the configured rate is 15 Hz
const FIELD_EVERY: u32 = 14;

/// Failures between two warnings
const WARN_EVERY: u32 = 200;

#[embassy_executor::task]
pub async fn sensor_task(imu: &'static ImuMutex, filter: &'static FilterCell, has_field: bool) {
    info!("Sensor task started, magnetometer {}", if has_field { "on" } else { "off" });

    let mut ticker = Ticker::every(Duration::from_millis(SAMPLE_INTERVAL_MS));
    let mut last = Instant::now();
    let mut failures: u32 = 0;
    let mut field_failures: u32 = 0;
    let mut tick: u32 = 0;

    loop {
        ticker.next().await;
        tick = tick.wrapping_add(1);

        let (result, field) = {
            let mut imu = imu.lock().await;
            let result = imu.read().await;
            let field = if has_field && tick % FIELD_EVERY == 0 {
                let mut magnetometer = Hmc5883l::new(imu.bus(), hmc5883l::DEFAULT_ADDRESS);
                Some(magnetometer.read().await)
            } else {
                None
            };
            (result, field)
        };

        match field {
            Some(Ok(field)) => {
                field_failures = 0;
                filter.lock(|f| f.borrow_mut().observe_field(field));
            }
            Some(Err(e)) => {
                if field_failures % WARN_EVERY == 0 {
                    warn!("Magnetometer read failed: {:?}", e);
                }
                field_failures = field_failures.wrapping_add(1);
                filter.lock(|f| f.borrow_mut().forget_field());
            }
            None => {}
        }

        let now = Instant::now();
        let dt = ((now - last).as_micros() as f32 / 1_000_000.0).min(MAX_DT_S);
        last = now;

        match result {
            Ok(motion) => {
                if failures > 0 {
                    info!("IMU reads recovered after {} failures", failures);
                    failures = 0;
                }
                filter.lock(|f| f.borrow_mut().update(&motion, dt));
            }
            Err(e) => {
                if failures % WARN_EVERY == 0 {
                    warn!("IMU read failed: {:?}", e);
                }
                failures = failures.wrapping_add(1);
            }
        }
    }
}
