//! Attitude node register file protocol
//!
//! This crate defines the byte-level contract between the controller node
//! and the attitude node. The attitude node exposes a small register file
//! as a bus peripheral:
//!
//! ```text
//! ┌────────┬──────────────┬──────────────┬──────────────┐
//! │ STATUS │ ROLL         │ PITCH        │ YAW          │
//! │ 0      │ 1..=4        │ 5..=8        │ 9..=12       │
//! │ u8     │ f32 LE       │ f32 LE       │ f32 LE       │
//! └────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! A bus write carries the register pointer in its first byte followed by
//! values stored from that address upward. A bus read streams bytes from
//! the pointer left by the most recent write.

#![no_std]
#![deny(unsafe_code)]

pub mod attitude;
pub mod command;
pub mod registers;
pub mod status;

pub use attitude::AttitudeSample;
pub use command::{CommandError, RegisterWrite};
pub use registers::{
    ATTITUDE_LEN, IMU_ADDRESS, MAX_TRANSFER, PITCH_ADDRESS, REGISTER_FILE_LEN, ROLL_ADDRESS,
    STATUS_ADDRESS, YAW_ADDRESS,
};
pub use status::StatusCode;
