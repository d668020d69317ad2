//! Attitude sample and its register encoding
//!
//! Floats travel as IEEE-754 binary32 in little-endian byte order. The
//! conversion goes through `to_le_bytes`/`from_le_bytes` so the wire layout
//! does not depend on the host's endianness.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::registers::{ATTITUDE_LEN, FLOAT_LEN};

/// Orientation estimate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AttitudeSample {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl AttitudeSample {
    /// Create a new sample
    pub const fn new(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self { roll, pitch, yaw }
    }

    /// Encode roll, pitch, yaw as consecutive little-endian floats
    pub fn to_bytes(&self) -> [u8; ATTITUDE_LEN] {
        let mut out = [0u8; ATTITUDE_LEN];
        out[..FLOAT_LEN].copy_from_slice(&encode_f32(self.roll));
        out[FLOAT_LEN..2 * FLOAT_LEN].copy_from_slice(&encode_f32(self.pitch));
        out[2 * FLOAT_LEN..].copy_from_slice(&encode_f32(self.yaw));
        out
    }

    /// Decode the 12-byte attitude block
    pub fn from_bytes(bytes: &[u8; ATTITUDE_LEN]) -> Self {
        Self {
            roll: decode_f32(&float_register(bytes, 0)),
            pitch: decode_f32(&float_register(bytes, 1)),
            yaw: decode_f32(&float_register(bytes, 2)),
        }
    }

    /// Decode from a slice, returning `None` if it is too short
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let block: &[u8; ATTITUDE_LEN] = bytes.get(..ATTITUDE_LEN)?.try_into().ok()?;
        Some(Self::from_bytes(block))
    }

    /// True if every angle is a finite number
    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }
}

/// Encode one float register
pub fn encode_f32(value: f32) -> [u8; FLOAT_LEN] {
    value.to_le_bytes()
}

/// Decode one float register
pub fn decode_f32(bytes: &[u8; FLOAT_LEN]) -> f32 {
    f32::from_le_bytes(*bytes)
}

/// The `index`-th float register of an attitude block
fn float_register(bytes: &[u8; ATTITUDE_LEN], index: usize) -> [u8; FLOAT_LEN] {
    let base = index * FLOAT_LEN;
    [bytes[base], bytes[base + 1], bytes[base + 2], bytes[base + 3]]
}
