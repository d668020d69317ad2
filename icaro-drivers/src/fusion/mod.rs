//! Orientation filters

pub mod mahony;

pub use mahony::{MahonyFilter, Quaternion};
