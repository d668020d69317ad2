//! STM32F4-specific HAL for the Icaro firmware
//!
//! This crate provides STM32F4 implementations of the `icaro-hal` traits.
//! Both nodes run on the STM32F405RG, which has the v1 I2C block.
//!
//! # Features
//!
//! - `stm32f405rg` - Select the chip
//! - `defmt` - Enable debug formatting support
//!
//! # Usage
//!
//! Embassy's own I2C driver only acts as a bus controller, and the node
//! has to answer as a peripheral on the same bus. [`twi::Stm32Twi`]
//! therefore drives the I2C registers directly and reports one bus
//! condition per call to the engine in `icaro-core`. Sensor buses that
//! only need controller transfers keep using `embassy_stm32::i2c`.

#![no_std]
#![deny(unsafe_code)]

pub mod flash;
pub mod twi;

// Re-export shared types from icaro-hal
pub use icaro_hal::flash::StorageKey;
pub use icaro_hal::twi::{BusStatus, TwiConfig};
