//! Configuration persistence
//!
//! Loads the node configuration from flash storage.
//! Falls back to built-in defaults if flash is empty or stale.

use defmt::*;

use icaro_core::config::NodeConfig;
use icaro_hal::FlashStorage as _;
use icaro_hal_stm32::flash::{FlashError, FlashStorage, StorageKey};

/// Maximum serialized config size (binary)
const MAX_CONFIG_SIZE: usize = 64;

/// Configuration persistence errors
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Flash operation failed
    Flash(FlashError),
    /// Deserialization failed
    Deserialize,
    /// Config version mismatch
    VersionMismatch,
}

impl From<FlashError> for ConfigError {
    fn from(e: FlashError) -> Self {
        ConfigError::Flash(e)
    }
}

/// Configuration persistence manager
pub struct ConfigPersistence<'d> {
    storage: FlashStorage<'d>,
}

impl<'d> ConfigPersistence<'d> {
    pub fn new(storage: FlashStorage<'d>) -> Self {
        Self { storage }
    }

    /// Consume this persistence manager and return the underlying storage
    ///
    /// The calibration store takes over the flash once config is loaded.
    pub fn into_storage(self) -> FlashStorage<'d> {
        self.storage
    }

    /// Load the stored configuration
    pub async fn load(&mut self) -> Result<NodeConfig, ConfigError> {
        let mut buffer = [0u8; MAX_CONFIG_SIZE];
        let len = self
            .storage
            .read(StorageKey::NodeConfig, &mut buffer)
            .await?;

        debug!("Read {} bytes of config from flash", len);

        let config: NodeConfig =
            postcard::from_bytes(&buffer[..len]).map_err(|_| ConfigError::Deserialize)?;

        if !config.is_current() {
            return Err(ConfigError::VersionMismatch);
        }

        Ok(config)
    }

    /// Load the stored configuration, or defaults if there is none
    pub async fn load_or_default(&mut self) -> NodeConfig {
        match self.load().await {
            Ok(config) => {
                info!("Loaded configuration from flash");
                log_config_summary(&config);
                config
            }
            Err(ConfigError::Flash(FlashError::NotFound)) => {
                info!("No configuration in flash, using defaults");
                NodeConfig::default()
            }
            Err(e) => {
                warn!("Failed to load configuration: {:?}, using defaults", e);
                NodeConfig::default()
            }
        }
    }
}

fn log_config_summary(config: &NodeConfig) {
    info!(
        "Config: address={:?} bus={}Hz publish={}ms calibration_samples={}",
        config.bus.own_address,
        config.bus.frequency_hz,
        config.publish_interval_ms,
        config.calibration_samples
    );
}
