//! Hardware driver implementations
//!
//! This crate provides concrete implementations of the collaborator
//! traits defined in icaro-core:
//!
//! - MPU-6050 accelerometer/gyroscope driver (async I2C)
//! - HMC5883L magnetometer driver, reached through the MPU-6050 bypass
//! - Resting bias calibration ([`icaro_core::traits::ImuCalibrator`])
//! - Mahony orientation filter ([`icaro_core::traits::FusionFilter`])

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod fusion;
pub mod imu;
