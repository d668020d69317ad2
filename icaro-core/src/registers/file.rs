use portable_atomic::{fence, AtomicBool, AtomicU32, AtomicU8, Ordering};

use icaro_protocol::registers::{attitude_offset, ATTITUDE_LEN, REGISTER_FILE_LEN, STATUS_ADDRESS};
use icaro_protocol::{AttitudeSample, StatusCode};

use crate::twi::{PeripheralHandler, TwiBuffer};

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU8 = AtomicU8::new(0);
#[allow(clippy::declare_interior_mutable_const)]
const BANK: [AtomicU8; ATTITUDE_LEN] = [ZERO; ATTITUDE_LEN];

/// Status byte, cursor and double-buffered attitude registers
///
/// The attitude registers live in two banks. A writer always fills the
/// bank that readers are not pointed at and then bumps `generation`,
/// whose low bit selects the live bank. Readers copy the live bank and
/// retry if the generation moved underneath them, so a read never mixes
/// bytes of two publications.
///
/// Only one writer may fill a bank at a time. The main loop takes the
/// `writing` flag for the whole publication; a bus write that arrives
/// meanwhile is dropped because the publication in progress replaces it
/// anyway.
pub struct RegisterFile {
    status: AtomicU8,
    cursor: AtomicU8,
    generation: AtomicU32,
    banks: [[AtomicU8; ATTITUDE_LEN]; 2],
    writing: AtomicBool,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    /// Empty file announcing `Initializing`, cursor at the status register
    pub const fn new() -> Self {
        Self {
            status: AtomicU8::new(StatusCode::Initializing.to_byte()),
            cursor: AtomicU8::new(STATUS_ADDRESS),
            generation: AtomicU32::new(0),
            banks: [BANK; 2],
            writing: AtomicBool::new(false),
        }
    }

    /// Raw content of register 0
    pub fn status_byte(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    /// Register 0 decoded, `None` if it holds an unknown value
    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_byte(self.status_byte())
    }

    /// Overwrite register 0
    pub fn set_status(&self, status: StatusCode) {
        self.status.store(status.to_byte(), Ordering::Release);
    }

    /// Replace register 0 only if it still holds `current`
    ///
    /// Returns the value found on failure, so a command written by the bus
    /// after `current` was observed is never lost.
    pub fn compare_exchange_status(&self, current: u8, new: StatusCode) -> Result<u8, u8> {
        self.status
            .compare_exchange(current, new.to_byte(), Ordering::AcqRel, Ordering::Acquire)
    }

    /// Register address the next bus read starts at
    pub fn cursor(&self) -> u8 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Number of attitude publications so far
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Publish a new attitude sample
    ///
    /// Called from the main loop. Readers observe either the previous
    /// sample or this one, never a mix.
    pub fn publish(&self, sample: &AttitudeSample) {
        let bytes = sample.to_bytes();
        while self
            .writing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Only reachable with a bus handler on another core
            core::hint::spin_loop();
        }
        self.commit(&bytes);
        self.writing.store(false, Ordering::Release);
    }

    /// Current attitude registers as raw bytes
    pub fn attitude_bytes(&self) -> [u8; ATTITUDE_LEN] {
        let mut bytes = [0u8; ATTITUDE_LEN];
        loop {
            let before = self.generation.load(Ordering::Acquire);
            for (byte, cell) in bytes.iter_mut().zip(&self.banks[bank(before)]) {
                *byte = cell.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            if self.generation.load(Ordering::Relaxed) == before {
                return bytes;
            }
        }
    }

    /// Current attitude registers decoded
    pub fn attitude(&self) -> AttitudeSample {
        AttitudeSample::from_bytes(&self.attitude_bytes())
    }

    /// Whole register file, status first
    pub fn snapshot(&self) -> [u8; REGISTER_FILE_LEN] {
        let mut file = [0u8; REGISTER_FILE_LEN];
        file[0] = self.status_byte();
        file[1..].copy_from_slice(&self.attitude_bytes());
        file
    }

    /// Apply a bus write: pointer byte, then values from the pointer up
    ///
    /// Values past the end of the file are dropped. The cursor ends up
    /// just after the last value stored, so a following read continues
    /// from there.
    pub fn receive(&self, data: &[u8]) {
        let Some((&start, values)) = data.split_first() else {
            return;
        };

        let room = REGISTER_FILE_LEN.saturating_sub(start as usize);
        let values = &values[..values.len().min(room)];

        let mut patch: Option<[u8; ATTITUDE_LEN]> = None;
        for (i, &value) in values.iter().enumerate() {
            // In range after clamping
            let address = start + i as u8;
            if address == STATUS_ADDRESS {
                self.status.store(value, Ordering::Release);
            } else if let Some(offset) = attitude_offset(address) {
                let bytes = patch.get_or_insert_with(|| self.attitude_bytes());
                bytes[offset] = value;
            }
        }

        if let Some(bytes) = patch {
            if self
                .writing
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.commit(&bytes);
                self.writing.store(false, Ordering::Release);
            }
        }

        // `values` is clamped to the file, so this cannot wrap
        self.cursor
            .store(start.saturating_add(values.len() as u8), Ordering::Release);
    }

    /// Fill a bus read response from the cursor to the end of the file
    ///
    /// A cursor past the end leaves `response` empty.
    pub fn respond(&self, response: &mut TwiBuffer) {
        let cursor = self.cursor() as usize;
        if cursor >= REGISTER_FILE_LEN {
            return;
        }
        let file = self.snapshot();
        // The file is smaller than one transfer
        let _ = response.extend_from_slice(&file[cursor..]);
    }

    /// Write the inactive bank and make it live
    ///
    /// Caller holds `writing`.
    fn commit(&self, bytes: &[u8; ATTITUDE_LEN]) {
        let current = self.generation.load(Ordering::Acquire);
        let next = current.wrapping_add(1);
        fence(Ordering::Release);
        for (cell, &byte) in self.banks[bank(next)].iter().zip(bytes) {
            cell.store(byte, Ordering::Relaxed);
        }
        self.generation.store(next, Ordering::Release);
    }
}

fn bank(generation: u32) -> usize {
    (generation & 1) as usize
}

impl PeripheralHandler for &RegisterFile {
    fn on_receive(&mut self, data: &[u8]) {
        self.receive(data);
    }

    fn on_request(&mut self, response: &mut TwiBuffer) {
        self.respond(response);
    }
}
