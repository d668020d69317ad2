//! Controller-side telemetry
//!
//! The controller node runs the handshake with the attitude node and then
//! streams attitude samples out of its register file:
//!
//! ```text
//! RequestCalibration ──write Calibrating──► AwaitReady
//!                                              │ poll register 0
//!                                              │ (bounded)
//!                                              ▼
//!              Streaming ◄──write Running── StartRunning
//!                  │ read 12 bytes from register 1
//!                  ▼
//!           AttitudeSample
//! ```

pub mod client;

pub use client::{ClientPhase, Reading, TelemetryClient, TelemetryError, TelemetryEvent};
