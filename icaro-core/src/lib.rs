//! Board-agnostic core logic for the attitude node system
//!
//! This crate contains everything that does not touch real hardware:
//!
//! - Interrupt-driven two-wire bus engine and its transaction layer
//! - Register file exposed by the attitude node
//! - Controller-side telemetry client and handshake
//! - Attitude node lifecycle state machine
//! - Link health monitoring
//! - Configuration and calibration record types
//! - Collaborator traits (fusion filter, calibration store, clock)

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod link;
pub mod node;
pub mod registers;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod state;
pub mod telemetry;
pub mod traits;
pub mod twi;
