//! Configuration type definitions
//!
//! Both nodes run from these structures. The attitude node stores its
//! [`NodeConfig`] in flash as postcard data; anything missing falls back
//! to the defaults below.

use serde::{Deserialize, Serialize};

use icaro_protocol::registers::{BUS_FREQUENCY_HZ, IMU_ADDRESS};

/// Current config format version
pub const CONFIG_VERSION: u8 = 1;

/// Bus settings shared by both nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Own peripheral address (None for a pure controller)
    pub own_address: Option<u8>,
    /// Bus clock in Hz
    pub frequency_hz: u32,
    /// Longest time a single transfer may take before recovery
    pub transfer_timeout_ms: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            own_address: None,
            frequency_hz: BUS_FREQUENCY_HZ,
            transfer_timeout_ms: 10,
        }
    }
}

impl BusConfig {
    /// Bus settings for the attitude node
    pub fn peripheral(address: u8) -> Self {
        Self {
            own_address: Some(address),
            ..Self::default()
        }
    }

    /// Hardware configuration for the engine
    pub fn twi_config(&self) -> icaro_hal::TwiConfig {
        icaro_hal::TwiConfig {
            frequency: self.frequency_hz,
            own_address: self.own_address,
            general_call: false,
        }
    }
}

/// Controller-side handshake and polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryConfig {
    /// Bus address of the attitude node
    pub peripheral_address: u8,
    /// Delay between status register polls
    pub status_poll_interval_ms: u32,
    /// Status polls before the handshake gives up
    pub max_status_polls: u16,
    /// Delay between attitude reads once running
    pub sample_interval_ms: u32,
    /// Attempts for each handshake write
    pub max_command_retries: u8,
    /// Age after which the last good sample counts as stale
    pub stale_after_ms: u32,
    /// Consecutive failed reads before the link counts as lost
    pub max_consecutive_failures: u8,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            peripheral_address: IMU_ADDRESS,
            status_poll_interval_ms: 100,
            max_status_polls: 50,
            sample_interval_ms: 20,
            max_command_retries: 3,
            stale_after_ms: 200,
            max_consecutive_failures: 10,
        }
    }
}

/// Attitude node configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// Config format version
    pub version: u8,
    /// Bus settings
    pub bus: BusConfig,
    /// Interval between attitude publications
    pub publish_interval_ms: u32,
    /// Resting samples averaged per calibration
    pub calibration_samples: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            bus: BusConfig::peripheral(IMU_ADDRESS),
            publish_interval_ms: 10,
            calibration_samples: 500,
        }
    }
}

impl NodeConfig {
    /// Check the format version
    pub fn is_current(&self) -> bool {
        self.version == CONFIG_VERSION
    }
}
