//! Mahony complementary filter
//!
//! Gyroscope rates are integrated into a quaternion; the angle between
//! measured and estimated gravity feeds back through a PI term so the
//! estimate does not drift in roll and pitch. When a magnetometer reading
//! is available, the horizontal field direction adds the same kind of
//! feedback for yaw. Without one, yaw drifts slowly.

use core::f32::consts::PI;

use micromath::F32Ext;

use icaro_core::config::CalibrationOffsets;
use icaro_core::traits::FusionFilter;
use icaro_protocol::AttitudeSample;

use crate::imu::{RawMotion, SensorScale};

const RAD_TO_DEG: f32 = 180.0 / PI;
const DEG_TO_RAD: f32 = PI / 180.0;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Roll, pitch and yaw in degrees
    pub fn to_euler_degrees(&self) -> AttitudeSample {
        let Self { w, x, y, z } = *self;
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        AttitudeSample::new(roll * RAD_TO_DEG, pitch * RAD_TO_DEG, yaw * RAD_TO_DEG)
    }
}

/// Mahony filter, six-axis with an optional magnetometer
pub struct MahonyFilter {
    kp: f32,
    ki: f32,
    integral: [f32; 3],
    q: Quaternion,
    scale: SensorScale,
    offsets: CalibrationOffsets,
    /// Latest field direction, unit length, sensor frame
    field: Option<[f32; 3]>,
}

impl MahonyFilter {
    /// Proportional gain
    pub const DEFAULT_KP: f32 = 2.0;
    /// Integral gain
    pub const DEFAULT_KI: f32 = 0.005;

    pub fn new(scale: SensorScale) -> Self {
        Self::with_gains(scale, Self::DEFAULT_KP, Self::DEFAULT_KI)
    }

    pub fn with_gains(scale: SensorScale, kp: f32, ki: f32) -> Self {
        Self {
            kp,
            ki,
            integral: [0.0; 3],
            q: Quaternion::IDENTITY,
            scale,
            offsets: CalibrationOffsets::default(),
            field: None,
        }
    }

    /// Current orientation
    pub fn quaternion(&self) -> Quaternion {
        self.q
    }

    /// Offsets subtracted from every sample
    pub fn offsets(&self) -> CalibrationOffsets {
        self.offsets
    }

    /// Use a magnetometer reading for yaw until the next one arrives
    ///
    /// Axes must match the accelerometer's. Only the direction matters.
    pub fn observe_field(&mut self, field: [i16; 3]) {
        let [x, y, z] = field.map(|v| v as f32);
        let norm = x * x + y * y + z * z;
        self.field = if norm > 0.0 {
            let recip_norm = norm.sqrt().recip();
            Some([x * recip_norm, y * recip_norm, z * recip_norm])
        } else {
            None
        };
    }

    /// Stop correcting yaw, e.g. after magnetometer reads started failing
    pub fn forget_field(&mut self) {
        self.field = None;
    }

    /// Back to level with no accumulated error
    pub fn reset(&mut self) {
        self.q = Quaternion::IDENTITY;
        self.integral = [0.0; 3];
    }

    /// Feed one raw sample taken `dt` seconds after the previous one
    pub fn update(&mut self, motion: &RawMotion, dt: f32) {
        let gyro_scale = DEG_TO_RAD / self.scale.gyro_per_dps;
        let corrected = |raw: i16, bias: i16| (raw as i32 - bias as i32) as f32;

        let gx = corrected(motion.gyro[0], self.offsets.gyro[0]) * gyro_scale;
        let gy = corrected(motion.gyro[1], self.offsets.gyro[1]) * gyro_scale;
        let gz = corrected(motion.gyro[2], self.offsets.gyro[2]) * gyro_scale;
        // Units cancel in the normalisation
        let ax = corrected(motion.accel[0], self.offsets.accel[0]);
        let ay = corrected(motion.accel[1], self.offsets.accel[1]);
        let az = corrected(motion.accel[2], self.offsets.accel[2]);

        self.update_rates(dt, [gx, gy, gz], [ax, ay, az]);
    }

    /// Filter step with gyro rates in rad/s and accel in any unit
    pub fn update_rates(&mut self, dt: f32, gyro: [f32; 3], accel: [f32; 3]) {
        let Quaternion {
            w: q0,
            x: q1,
            y: q2,
            z: q3,
        } = self.q;
        let [mut gx, mut gy, mut gz] = gyro;
        let [ax, ay, az] = accel;

        let norm = ax * ax + ay * ay + az * az;
        // Free fall gives no gravity reference; integrate gyro only
        if norm > 0.0 {
            let recip_norm = norm.sqrt().recip();
            let (ax, ay, az) = (ax * recip_norm, ay * recip_norm, az * recip_norm);

            // Estimated gravity direction, halved
            let halfvx = q1 * q3 - q0 * q2;
            let halfvy = q0 * q1 + q2 * q3;
            let halfvz = q0 * q0 - 0.5 + q3 * q3;

            let mut halfex = ay * halfvz - az * halfvy;
            let mut halfey = az * halfvx - ax * halfvz;
            let mut halfez = ax * halfvy - ay * halfvx;

            if let Some([mx, my, mz]) = self.field {
                let (q0q1, q0q2, q0q3) = (q0 * q1, q0 * q2, q0 * q3);
                let (q1q1, q1q2, q1q3) = (q1 * q1, q1 * q2, q1 * q3);
                let (q2q2, q2q3, q3q3) = (q2 * q2, q2 * q3, q3 * q3);

                // Field in the earth frame, folded onto the x-z plane
                let hx = 2.0
                    * (mx * (0.5 - q2q2 - q3q3) + my * (q1q2 - q0q3) + mz * (q1q3 + q0q2));
                let hy = 2.0
                    * (mx * (q1q2 + q0q3) + my * (0.5 - q1q1 - q3q3) + mz * (q2q3 - q0q1));
                let bx = (hx * hx + hy * hy).sqrt();
                let bz = 2.0
                    * (mx * (q1q3 - q0q2) + my * (q2q3 + q0q1) + mz * (0.5 - q1q1 - q2q2));

                // Expected field direction in the sensor frame, halved
                let halfwx = bx * (0.5 - q2q2 - q3q3) + bz * (q1q3 - q0q2);
                let halfwy = bx * (q1q2 - q0q3) + bz * (q0q1 + q2q3);
                let halfwz = bx * (q0q2 + q1q3) + bz * (0.5 - q1q1 - q2q2);

                halfex += my * halfwz - mz * halfwy;
                halfey += mz * halfwx - mx * halfwz;
                halfez += mx * halfwy - my * halfwx;
            }

            if self.ki > 0.0 {
                self.integral[0] += 2.0 * self.ki * halfex * dt;
                self.integral[1] += 2.0 * self.ki * halfey * dt;
                self.integral[2] += 2.0 * self.ki * halfez * dt;
            } else {
                self.integral = [0.0; 3];
            }

            gx += 2.0 * self.kp * halfex + self.integral[0];
            gy += 2.0 * self.kp * halfey + self.integral[1];
            gz += 2.0 * self.kp * halfez + self.integral[2];
        }

        let half_dt = 0.5 * dt;
        let (gx, gy, gz) = (gx * half_dt, gy * half_dt, gz * half_dt);

        let w = q0 - q1 * gx - q2 * gy - q3 * gz;
        let x = q1 + q0 * gx + q2 * gz - q3 * gy;
        let y = q2 + q0 * gy - q1 * gz + q3 * gx;
        let z = q3 + q0 * gz + q1 * gy - q2 * gx;

        let norm = w * w + x * x + y * y + z * z;
        if norm > 0.0 {
            let recip_norm = norm.sqrt().recip();
            self.q = Quaternion {
                w: w * recip_norm,
                x: x * recip_norm,
                y: y * recip_norm,
                z: z * recip_norm,
            };
        }
    }
}

impl FusionFilter for MahonyFilter {
    fn produce_attitude(&mut self) -> AttitudeSample {
        self.q.to_euler_degrees()
    }

    fn apply_calibration(&mut self, offsets: &CalibrationOffsets) {
        self.offsets = *offsets;
        self.integral = [0.0; 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: SensorScale = SensorScale::MPU6050_8G_500DPS;
    const DT: f32 = 0.005;

    fn run(filter: &mut MahonyFilter, motion: RawMotion, steps: usize) {
        for _ in 0..steps {
            filter.update(&motion, DT);
        }
    }

    fn close(a: f32, b: f32, tolerance: f32) -> bool {
        (a - b).abs() <= tolerance
    }

    #[test]
    fn test_level_and_still() {
        let mut filter = MahonyFilter::new(SCALE);
        run(
            &mut filter,
            RawMotion {
                accel: [0, 0, 4096],
                gyro: [0; 3],
            },
            200,
        );
        let attitude = filter.produce_attitude();
        assert!(close(attitude.roll, 0.0, 0.01));
        assert!(close(attitude.pitch, 0.0, 0.01));
        assert!(close(attitude.yaw, 0.0, 0.01));
    }

    #[test]
    fn test_converges_to_tilt() {
        // Gravity seen 30 degrees around X
        let mut filter = MahonyFilter::new(SCALE);
        run(
            &mut filter,
            RawMotion {
                accel: [0, 2048, 3547],
                gyro: [0; 3],
            },
            4000,
        );
        let attitude = filter.produce_attitude();
        assert!(close(attitude.roll, 30.0, 1.0), "roll {}", attitude.roll);
        assert!(close(attitude.pitch, 0.0, 1.0), "pitch {}", attitude.pitch);
    }

    #[test]
    fn test_calibrated_bias_does_not_drift() {
        let bias = RawMotion {
            accel: [0, 0, 4096],
            gyro: [0, 0, 655],
        };

        let mut raw = MahonyFilter::new(SCALE);
        run(&mut raw, bias, 400);
        // 10 °/s for two seconds
        assert!(raw.produce_attitude().yaw > 15.0);

        let mut calibrated = MahonyFilter::new(SCALE);
        calibrated.apply_calibration(&CalibrationOffsets::new([0; 3], [0, 0, 655]));
        run(&mut calibrated, bias, 400);
        assert!(close(calibrated.produce_attitude().yaw, 0.0, 0.01));
    }

    #[test]
    fn test_yaw_follows_gyro() {
        let mut filter = MahonyFilter::new(SCALE);
        // 90 °/s about Z for one second
        run(
            &mut filter,
            RawMotion {
                accel: [0, 0, 4096],
                gyro: [0, 0, 5895],
            },
            200,
        );
        let yaw = filter.produce_attitude().yaw;
        assert!(close(yaw, 90.0, 2.0), "yaw {}", yaw);
    }

    #[test]
    fn test_free_fall_keeps_orientation() {
        let mut filter = MahonyFilter::new(SCALE);
        run(
            &mut filter,
            RawMotion {
                accel: [0; 3],
                gyro: [0; 3],
            },
            100,
        );
        let q = filter.quaternion();
        assert!(close(q.w, 1.0, 1e-4));
        assert!(close(q.x, 0.0, 1e-6) && close(q.y, 0.0, 1e-6) && close(q.z, 0.0, 1e-6));
    }

    fn yaw_after_field(filter: &mut MahonyFilter, field: [i16; 3], steps: usize) -> f32 {
        filter.observe_field(field);
        run(
            filter,
            RawMotion {
                accel: [0, 0, 4096],
                gyro: [0; 3],
            },
            steps,
        );
        filter.produce_attitude().yaw
    }

    #[test]
    fn test_field_pulls_yaw_to_heading() {
        // North seen 30 degrees clockwise of the sensor's X axis
        let mut filter = MahonyFilter::new(SCALE);
        let yaw = yaw_after_field(&mut filter, [866, -500, 0], 4000);
        assert!(close(yaw, 30.0, 2.0), "yaw {}", yaw);
    }

    #[test]
    fn test_field_dip_does_not_tilt() {
        // Same heading with a steep inclination
        let mut filter = MahonyFilter::new(SCALE);
        let yaw = yaw_after_field(&mut filter, [433, -250, -800], 4000);
        let attitude = filter.produce_attitude();
        assert!(close(yaw, 30.0, 2.0), "yaw {}", yaw);
        assert!(close(attitude.roll, 0.0, 1.0), "roll {}", attitude.roll);
        assert!(close(attitude.pitch, 0.0, 1.0), "pitch {}", attitude.pitch);
    }

    #[test]
    fn test_field_cancels_gyro_drift() {
        let mut filter = MahonyFilter::new(SCALE);
        // Rotate to 90 degrees on the gyro alone
        run(
            &mut filter,
            RawMotion {
                accel: [0, 0, 4096],
                gyro: [0, 0, 5895],
            },
            200,
        );
        assert!(filter.produce_attitude().yaw > 80.0);

        // The magnetometer still says the sensor faces north
        let yaw = yaw_after_field(&mut filter, [1000, 0, 0], 4000);
        assert!(close(yaw, 0.0, 2.0), "yaw {}", yaw);
    }

    #[test]
    fn test_forgotten_field_stops_correction() {
        let mut filter = MahonyFilter::new(SCALE);
        filter.observe_field([866, -500, 0]);
        filter.forget_field();
        run(
            &mut filter,
            RawMotion {
                accel: [0, 0, 4096],
                gyro: [0; 3],
            },
            400,
        );
        assert!(close(filter.produce_attitude().yaw, 0.0, 0.01));

        // A zero reading carries no direction
        filter.observe_field([0; 3]);
        assert!(filter.field.is_none());
    }

    #[test]
    fn test_reset() {
        let mut filter = MahonyFilter::new(SCALE);
        run(
            &mut filter,
            RawMotion {
                accel: [0, 2048, 3547],
                gyro: [100, 0, 0],
            },
            50,
        );
        filter.reset();
        assert_eq!(filter.quaternion(), Quaternion::IDENTITY);
    }
}
