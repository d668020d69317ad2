//! Calibration and configuration records on the STM32F405
//!
//! Records live in a sequential-storage map in the last two 128 KiB
//! sectors of the 1 MiB part (sectors 10 and 11), one item per
//! [`StorageKey`]. The map alternates between the two sectors, so a
//! calibration saved on every boot wears them evenly.

use embassy_stm32::flash::{Async, Flash, InterruptHandler};
use embassy_stm32::interrupt;
use embassy_stm32::peripherals::FLASH;
use embassy_stm32::Peri;
use sequential_storage::cache::NoCache;
use sequential_storage::map;

pub use icaro_hal::flash::{FlashError, StorageKey};

pub const FLASH_SIZE: usize = 1024 * 1024;
pub const STORAGE_SECTOR_SIZE: usize = 128 * 1024;
pub const STORAGE_PARTITION_SIZE: usize = 2 * STORAGE_SECTOR_SIZE;
pub const STORAGE_PARTITION_START: usize = FLASH_SIZE - STORAGE_PARTITION_SIZE;

/// Storage partition as offsets from the flash base
pub const STORAGE_RANGE: core::ops::Range<u32> =
    (STORAGE_PARTITION_START as u32)..(FLASH_SIZE as u32);

/// Scratch space for one map item; both records are far smaller
const ITEM_BUFFER_SIZE: usize = 128;

/// Record store on the internal flash
///
/// `memory.x` keeps the firmware image below sector 10.
pub struct Stm32FlashStorage<'d> {
    flash: Flash<'d, Async>,
}

impl<'d> Stm32FlashStorage<'d> {
    pub fn new(
        flash: Peri<'d, FLASH>,
        irq: impl interrupt::typelevel::Binding<interrupt::typelevel::FLASH, InterruptHandler> + 'd,
    ) -> Self {
        Self {
            flash: Flash::new(flash, irq),
        }
    }
}

impl<'d> icaro_hal::FlashStorage for Stm32FlashStorage<'d> {
    async fn read(&mut self, key: StorageKey, buffer: &mut [u8]) -> Result<usize, FlashError> {
        let mut item = [0u8; ITEM_BUFFER_SIZE];

        let record = map::fetch_item::<StorageKey, &[u8], _>(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            &mut item,
            &key,
        )
        .await
        .map_err(storage_error)?
        .ok_or(FlashError::NotFound)?;

        let target = buffer
            .get_mut(..record.len())
            .ok_or(FlashError::RecordTooLarge)?;
        target.copy_from_slice(record);
        Ok(record.len())
    }

    async fn write(&mut self, key: StorageKey, data: &[u8]) -> Result<(), FlashError> {
        let mut item = [0u8; ITEM_BUFFER_SIZE];

        map::store_item(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            &mut item,
            &key,
            &data,
        )
        .await
        .map_err(storage_error)
    }
}

fn storage_error<E>(error: sequential_storage::Error<E>) -> FlashError {
    match error {
        sequential_storage::Error::FullStorage => FlashError::Full,
        sequential_storage::Error::Corrupted { .. } => FlashError::Corrupted,
        _ => FlashError::Device,
    }
}

pub type FlashStorage<'d> = Stm32FlashStorage<'d>;

// The partition has to line up with whole erase units
const _: () = assert!(STORAGE_PARTITION_START % STORAGE_SECTOR_SIZE == 0);
