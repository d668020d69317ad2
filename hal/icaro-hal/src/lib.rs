//! Icaro Hardware Abstraction Layer
//!
//! This crate defines hardware abstraction traits that can be implemented
//! by chip-specific HALs. The bus engine in `icaro-core` only ever talks to
//! the two-wire controller through [`twi::TwiHardware`], so the same engine
//! runs on the STM32 adapter and on the host-side bus simulator.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Firmware (icaro-firmware, master-fw)   │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  icaro-core (bus engine, register file) │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  icaro-hal (this crate - traits)        │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ icaro-hal-    │       │ icaro-core    │
//! │    stm32      │       │   sim (host)  │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`twi::TwiHardware`] - Interrupt-level two-wire bus controller
//! - [`flash::FlashStorage`] - Persistent storage

#![no_std]
#![deny(unsafe_code)]

pub mod flash;
pub mod twi;

// Re-export key traits at crate root for convenience
pub use flash::{FlashError, FlashStorage, StorageKey};
pub use twi::{BusStatus, TwiConfig, TwiHardware};
