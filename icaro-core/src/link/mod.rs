//! Link health
//!
//! Tracks how well the controller is hearing from the attitude node.

pub mod monitor;

pub use monitor::{LinkMonitor, LinkStatus};
