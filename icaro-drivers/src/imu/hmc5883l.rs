//! HMC5883L magnetometer driver
//!
//! The magnetometer sits behind the MPU-6050's auxiliary bus and is
//! reachable from the host once the IMU has bypass enabled. It runs in
//! single-measurement mode: every read collects the finished conversion
//! and triggers the next one, so reads spaced at least one conversion
//! apart never wait.

use embedded_hal_async::i2c::I2c;

use icaro_core::traits::SensorError;

/// Fixed bus address
pub const DEFAULT_ADDRESS: u8 = 0x1E;

pub mod registers {
    pub const CONFIG_A: u8 = 0x00;
    pub const CONFIG_B: u8 = 0x01;
    pub const MODE: u8 = 0x02;
    pub const DATA_X_H: u8 = 0x03;
    pub const IDENT_A: u8 = 0x0A;

    /// Identification registers A..C
    pub const IDENTITY: [u8; 3] = *b"H43";

    /// 8 samples averaged, 15 Hz, no bias
    pub const AVERAGE_8_15HZ: u8 = 0x70;
    /// ±1.3 Ga, 1090 counts per gauss
    pub const GAIN_1090: u8 = 0x20;
    pub const MODE_SINGLE: u8 = 0x01;

    /// X, Z, Y output registers, big-endian
    pub const DATA_LEN: usize = 6;
    /// Output value of a saturated axis
    pub const OVERFLOW: i16 = -4096;
}

/// HMC5883L on an async I2C bus
pub struct Hmc5883l<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Hmc5883l<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Check identity, configure gain and rate, start the first conversion
    pub async fn init(&mut self) -> Result<(), SensorError> {
        let mut identity = [0u8; 3];
        self.i2c
            .write_read(self.address, &[registers::IDENT_A], &mut identity)
            .await
            .map_err(|_| SensorError::NotResponding)?;
        if identity != registers::IDENTITY {
            return Err(SensorError::WrongDevice);
        }

        // Config A, B and mode are consecutive
        self.i2c
            .write(
                self.address,
                &[
                    registers::CONFIG_A,
                    registers::AVERAGE_8_15HZ,
                    registers::GAIN_1090,
                    registers::MODE_SINGLE,
                ],
            )
            .await
            .map_err(|_| SensorError::NotResponding)
    }

    /// Field in counts as X, Y, Z, then start the next conversion
    pub async fn read(&mut self) -> Result<[i16; 3], SensorError> {
        let mut buffer = [0u8; registers::DATA_LEN];
        self.i2c
            .write_read(self.address, &[registers::DATA_X_H], &mut buffer)
            .await
            .map_err(|_| SensorError::NotResponding)?;
        self.i2c
            .write(self.address, &[registers::MODE, registers::MODE_SINGLE])
            .await
            .map_err(|_| SensorError::NotResponding)?;

        let word = |i: usize| i16::from_be_bytes([buffer[i], buffer[i + 1]]);
        let field = [word(0), word(4), word(2)];
        if field.contains(&registers::OVERFLOW) {
            return Err(SensorError::Saturated);
        }
        Ok(field)
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }
}
