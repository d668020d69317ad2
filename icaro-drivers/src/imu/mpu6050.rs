//! MPU-6050 driver
//!
//! Configures the sensor for ±8 g / ±500 °/s with the gyro PLL as clock
//! source and reads all six axes in one burst. The auxiliary I2C master
//! is disabled and bypass enabled so the magnetometer behind the sensor
//! is reachable through [`Mpu6050::bus`].

use embedded_hal_async::i2c::I2c;

use icaro_core::traits::SensorError;

use super::{MotionSource, RawMotion};

/// Default bus address (AD0 low)
pub const DEFAULT_ADDRESS: u8 = 0x68;

/// Register map (only what the driver touches)
pub mod registers {
    pub const SMPLRT_DIV: u8 = 0x19;
    pub const CONFIG: u8 = 0x1A;
    pub const GYRO_CONFIG: u8 = 0x1B;
    pub const ACCEL_CONFIG: u8 = 0x1C;
    pub const INT_PIN_CFG: u8 = 0x37;
    pub const ACCEL_XOUT_H: u8 = 0x3B;
    pub const USER_CTRL: u8 = 0x6A;
    pub const PWR_MGMT_1: u8 = 0x6B;
    pub const WHO_AM_I: u8 = 0x75;

    /// WHO_AM_I bits 6..1
    pub const DEVICE_ID: u8 = 0x34;

    pub const CLOCK_PLL_XGYRO: u8 = 0x01;
    pub const GYRO_FS_500: u8 = 0x01 << 3;
    pub const ACCEL_FS_8: u8 = 0x02 << 3;
    pub const INT_PIN_CFG_BYPASS_EN: u8 = 0x02;
    /// 44 Hz accel / 42 Hz gyro low-pass
    pub const DLPF_44HZ: u8 = 0x03;
    /// 1 kHz / (1 + 4) = 200 Hz
    pub const SAMPLE_DIV_200HZ: u8 = 4;

    /// Burst covering accel, temperature and gyro
    pub const MOTION_LEN: usize = 14;
}

/// MPU-6050 on an async I2C bus
pub struct Mpu6050<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Mpu6050<I2C> {
    /// Wrap a bus; call [`init`](Self::init) before reading
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Check identity and configure ranges
    pub async fn init(&mut self) -> Result<(), SensorError> {
        let id = self.read_register(registers::WHO_AM_I).await?;
        if (id >> 1) & 0x3F != registers::DEVICE_ID {
            return Err(SensorError::WrongDevice);
        }

        self.write_register(registers::USER_CTRL, 0x00).await?;
        self.write_register(registers::INT_PIN_CFG, registers::INT_PIN_CFG_BYPASS_EN)
            .await?;
        // Also clears SLEEP
        self.write_register(registers::PWR_MGMT_1, registers::CLOCK_PLL_XGYRO)
            .await?;
        self.write_register(registers::GYRO_CONFIG, registers::GYRO_FS_500)
            .await?;
        self.write_register(registers::ACCEL_CONFIG, registers::ACCEL_FS_8)
            .await?;
        self.write_register(registers::CONFIG, registers::DLPF_44HZ)
            .await?;
        self.write_register(registers::SMPLRT_DIV, registers::SAMPLE_DIV_200HZ)
            .await?;
        Ok(())
    }

    /// Read accelerometer and gyroscope in one burst
    pub async fn read(&mut self) -> Result<RawMotion, SensorError> {
        let mut buffer = [0u8; registers::MOTION_LEN];
        self.i2c
            .write_read(self.address, &[registers::ACCEL_XOUT_H], &mut buffer)
            .await
            .map_err(|_| SensorError::NotResponding)?;

        let word = |i: usize| i16::from_be_bytes([buffer[i], buffer[i + 1]]);
        // Bytes 6..8 hold the die temperature
        Ok(RawMotion {
            accel: [word(0), word(2), word(4)],
            gyro: [word(8), word(10), word(12)],
        })
    }

    /// The bus, for devices reachable through bypass
    pub fn bus(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }

    async fn read_register(&mut self, register: u8) -> Result<u8, SensorError> {
        let mut value = [0u8];
        self.i2c
            .write_read(self.address, &[register], &mut value)
            .await
            .map_err(|_| SensorError::NotResponding)?;
        Ok(value[0])
    }

    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[register, value])
            .await
            .map_err(|_| SensorError::NotResponding)
    }
}

impl<I2C: I2c> MotionSource for Mpu6050<I2C> {
    async fn read_motion(&mut self) -> Result<RawMotion, SensorError> {
        self.read().await
    }
}
