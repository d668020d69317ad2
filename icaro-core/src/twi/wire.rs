//! Buffered bus transactions
//!
//! [`Wire`] turns the engine into a small controller API:
//!
//! - `begin_transmission` / `write` / `end_transmission` accumulate up to
//!   [`BUFFER_LENGTH`] bytes and flush them as one bus write
//! - `request_from` optionally sets the peer's register pointer with an
//!   unterminated write and then reads, joined by a repeated START
//! - `available` / `read` hand out the last received bytes one at a time
//! - `read_register` / `write_register` and their byte, word and bit-field
//!   variants wrap the above for peers with byte-wide registers behind an
//!   auto-incrementing pointer
//!
//! Every operation is non-blocking and returns `nb::Result`. Call it again
//! with the same arguments until it stops returning `WouldBlock`. Only one
//! operation is in flight at a time. [`Wire::block_on`] adds a bounded
//! wait for callers that prefer to block.

use icaro_hal::twi::{TwiConfig, TwiHardware};

use super::engine::{BusState, TwiEngine};
use super::{PeripheralHandler, StartError, TransferError, TwiBuffer, BUFFER_LENGTH};
use crate::traits::Clock;

/// Operation currently driven by the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Pending {
    Idle,
    Write,
    /// Register pointer write in flight
    Pointer,
    /// Pointer set, read not yet started
    ReadQueued,
    Read,
}

/// Controller-side transaction layer over a [`TwiEngine`]
pub struct Wire<H, P> {
    engine: TwiEngine<H, P>,
    tx_address: u8,
    tx_buffer: TwiBuffer,
    transmitting: bool,
    rx_buffer: TwiBuffer,
    rx_index: usize,
    pending: Pending,
    /// Byte to write back once the read half of an update finished
    modified: Option<u8>,
}

impl<H: TwiHardware, P: PeripheralHandler> Wire<H, P> {
    /// Wrap an engine
    pub fn new(engine: TwiEngine<H, P>) -> Self {
        Self {
            engine,
            tx_address: 0,
            tx_buffer: TwiBuffer::new(),
            transmitting: false,
            rx_buffer: TwiBuffer::new(),
            rx_index: 0,
            pending: Pending::Idle,
            modified: None,
        }
    }

    /// Build the engine from hardware and a peripheral handler
    pub fn with_handler(hw: H, handler: P) -> Self {
        Self::new(TwiEngine::new(hw, handler))
    }

    /// Enable the bus
    pub fn init(&mut self, config: &TwiConfig) {
        self.engine.init(config);
        self.clear();
    }

    /// Answer `address` in peripheral role
    pub fn set_address(&mut self, address: u8) {
        self.engine.set_address(address);
    }

    /// Service the bus interrupt
    pub fn on_interrupt(&mut self) -> bool {
        self.engine.on_interrupt()
    }

    /// Engine state
    pub fn state(&self) -> BusState {
        self.engine.state()
    }

    /// Underlying engine
    pub fn engine(&self) -> &TwiEngine<H, P> {
        &self.engine
    }

    /// Underlying engine, mutably
    pub fn engine_mut(&mut self) -> &mut TwiEngine<H, P> {
        &mut self.engine
    }

    /// Start collecting bytes for a write to `address`
    pub fn begin_transmission(&mut self, address: u8) {
        self.tx_address = address;
        self.tx_buffer.clear();
        self.transmitting = true;
    }

    /// Queue one byte. Returns the number of bytes accepted (0 or 1).
    pub fn write(&mut self, byte: u8) -> usize {
        if !self.transmitting {
            return 0;
        }
        match self.tx_buffer.push(byte) {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }

    /// Queue as many of `data` as fit. Returns the number accepted.
    pub fn write_all(&mut self, data: &[u8]) -> usize {
        data.iter().take_while(|&&byte| self.write(byte) == 1).count()
    }

    /// Flush the queued bytes as one bus write
    ///
    /// `send_stop == false` keeps the bus for a following repeated START.
    pub fn end_transmission(&mut self, send_stop: bool) -> nb::Result<(), TransferError> {
        match self.pending {
            Pending::Idle => {
                self.engine
                    .start_write(self.tx_address, &self.tx_buffer, send_stop)
                    .map_err(start_error)?;
                self.pending = Pending::Write;
                Err(nb::Error::WouldBlock)
            }
            Pending::Write => {
                let result = self.engine.poll();
                if !matches!(result, Err(nb::Error::WouldBlock)) {
                    self.pending = Pending::Idle;
                    self.transmitting = false;
                    self.tx_buffer.clear();
                }
                result.map(|_| ())
            }
            _ => self.drain(),
        }
    }

    /// Read `quantity` bytes from `address`
    ///
    /// With `register` set, a pointer write without STOP precedes the
    /// read. `quantity` is clamped to [`BUFFER_LENGTH`]; larger reads must
    /// be split by the caller. On success the bytes are available through
    /// [`read`](Wire::read). A short read leaves what arrived available and
    /// reports `Truncated`.
    pub fn request_from(
        &mut self,
        address: u8,
        quantity: usize,
        register: Option<u8>,
        send_stop: bool,
    ) -> nb::Result<usize, TransferError> {
        let quantity = quantity.min(BUFFER_LENGTH);

        if self.pending == Pending::Idle {
            if quantity == 0 {
                self.rx_buffer.clear();
                self.rx_index = 0;
                return Ok(0);
            }
            match register {
                Some(register) => {
                    self.engine
                        .start_write(address, &[register], false)
                        .map_err(start_error)?;
                    self.pending = Pending::Pointer;
                }
                None => self.pending = Pending::ReadQueued,
            }
        }

        if self.pending == Pending::Pointer {
            match self.engine.poll() {
                Ok(_) => self.pending = Pending::ReadQueued,
                Err(nb::Error::WouldBlock) => return Err(nb::Error::WouldBlock),
                Err(nb::Error::Other(e)) => {
                    self.pending = Pending::Idle;
                    return Err(nb::Error::Other(e));
                }
            }
        }

        match self.pending {
            Pending::ReadQueued => {
                self.engine
                    .start_read(address, quantity, send_stop)
                    .map_err(start_error)?;
                self.pending = Pending::Read;
                Err(nb::Error::WouldBlock)
            }
            Pending::Read => {
                let completed = match self.engine.poll() {
                    Ok(completed) => completed,
                    Err(nb::Error::WouldBlock) => return Err(nb::Error::WouldBlock),
                    Err(nb::Error::Other(e)) => {
                        self.pending = Pending::Idle;
                        return Err(nb::Error::Other(e));
                    }
                };
                self.pending = Pending::Idle;
                self.rx_buffer = completed.data;
                self.rx_index = 0;
                if self.rx_buffer.len() < quantity {
                    return Err(nb::Error::Other(TransferError::Truncated));
                }
                Ok(self.rx_buffer.len())
            }
            _ => self.drain(),
        }
    }

    /// Received bytes not yet consumed
    pub fn available(&self) -> usize {
        self.rx_buffer.len() - self.rx_index
    }

    /// Next received byte, or `None` once the buffer is exhausted
    pub fn read(&mut self) -> Option<u8> {
        let byte = *self.rx_buffer.get(self.rx_index)?;
        self.rx_index += 1;
        Some(byte)
    }

    /// Copy up to `out.len()` received bytes. Returns the number copied.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let mut count = 0;
        for slot in out.iter_mut() {
            match self.read() {
                Some(byte) => *slot = byte,
                None => break,
            }
            count += 1;
        }
        count
    }

    /// Abandon whatever is in flight and force the bus back to idle
    pub fn recover(&mut self) {
        self.engine.recover();
        self.clear();
    }

    /// Read `buf.len()` bytes starting at `register`
    pub fn read_register(
        &mut self,
        address: u8,
        register: u8,
        buf: &mut [u8],
    ) -> nb::Result<(), TransferError> {
        if buf.len() > BUFFER_LENGTH {
            return Err(nb::Error::Other(TransferError::Truncated));
        }
        self.request_from(address, buf.len(), Some(register), true)?;
        self.read_into(buf);
        Ok(())
    }

    /// Write `data` starting at `register`
    pub fn write_register(
        &mut self,
        address: u8,
        register: u8,
        data: &[u8],
    ) -> nb::Result<(), TransferError> {
        if self.pending == Pending::Idle {
            // One byte goes to the pointer
            if data.len() >= BUFFER_LENGTH {
                return Err(nb::Error::Other(TransferError::Truncated));
            }
            self.begin_transmission(address);
            self.write(register);
            self.write_all(data);
        }
        self.end_transmission(true)
    }

    pub fn read_byte(&mut self, address: u8, register: u8) -> nb::Result<u8, TransferError> {
        let mut value = [0u8];
        self.read_register(address, register, &mut value)?;
        Ok(value[0])
    }

    pub fn write_byte(
        &mut self,
        address: u8,
        register: u8,
        value: u8,
    ) -> nb::Result<(), TransferError> {
        self.write_register(address, register, &[value])
    }

    /// Big-endian 16-bit value at `register` and the one after it
    pub fn read_word(&mut self, address: u8, register: u8) -> nb::Result<u16, TransferError> {
        let mut value = [0u8; 2];
        self.read_register(address, register, &mut value)?;
        Ok(u16::from_be_bytes(value))
    }

    pub fn write_word(
        &mut self,
        address: u8,
        register: u8,
        value: u16,
    ) -> nb::Result<(), TransferError> {
        self.write_register(address, register, &value.to_be_bytes())
    }

    /// Field of `length` bits whose most significant bit is `bit_start`,
    /// shifted down to bit 0
    pub fn read_bits(
        &mut self,
        address: u8,
        register: u8,
        bit_start: u8,
        length: u8,
    ) -> nb::Result<u8, TransferError> {
        let (mask, shift) = bit_field(bit_start, length);
        let value = self.read_byte(address, register)?;
        Ok((value & mask) >> shift)
    }

    pub fn read_bit(
        &mut self,
        address: u8,
        register: u8,
        bit: u8,
    ) -> nb::Result<bool, TransferError> {
        Ok(self.read_bits(address, register, bit, 1)? != 0)
    }

    /// Replace a bit field, leaving the other bits of the register as read
    ///
    /// Takes a read and a write transfer. Bits of `value` that do not fit
    /// the field are ignored.
    pub fn write_bits(
        &mut self,
        address: u8,
        register: u8,
        bit_start: u8,
        length: u8,
        value: u8,
    ) -> nb::Result<(), TransferError> {
        let (mask, shift) = bit_field(bit_start, length);
        self.update_register(address, register, mask, value << shift)
    }

    pub fn write_bit(
        &mut self,
        address: u8,
        register: u8,
        bit: u8,
        set: bool,
    ) -> nb::Result<(), TransferError> {
        self.write_bits(address, register, bit, 1, set as u8)
    }

    /// Read-modify-write of the bits selected by `mask`
    fn update_register(
        &mut self,
        address: u8,
        register: u8,
        mask: u8,
        bits: u8,
    ) -> nb::Result<(), TransferError> {
        let value = match self.modified {
            Some(value) => value,
            None => {
                let current = self.read_byte(address, register)?;
                let value = (current & !mask) | (bits & mask);
                self.modified = Some(value);
                value
            }
        };
        let result = self.write_register(address, register, &[value]);
        if !matches!(result, Err(nb::Error::WouldBlock)) {
            self.modified = None;
        }
        result
    }

    /// Drive `op` until it completes or `timeout_ms` elapses
    ///
    /// On timeout the bus is recovered and `Timeout` returned.
    pub fn block_on<C, T, F>(
        &mut self,
        clock: &C,
        timeout_ms: u32,
        mut op: F,
    ) -> Result<T, TransferError>
    where
        C: Clock,
        F: FnMut(&mut Self) -> nb::Result<T, TransferError>,
    {
        let started = clock.now_ms();
        loop {
            match op(self) {
                Ok(value) => return Ok(value),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {
                    if clock.now_ms().wrapping_sub(started) >= timeout_ms {
                        self.recover();
                        return Err(TransferError::Timeout);
                    }
                }
            }
        }
    }

    /// A different operation is still in flight: keep driving it and
    /// discard its outcome
    fn drain<T>(&mut self) -> nb::Result<T, TransferError> {
        match self.engine.poll() {
            Err(nb::Error::WouldBlock) if !self.engine.state().is_ready() => {}
            _ => {
                self.pending = Pending::Idle;
                self.transmitting = false;
            }
        }
        Err(nb::Error::WouldBlock)
    }

    fn clear(&mut self) {
        self.pending = Pending::Idle;
        self.transmitting = false;
        self.tx_buffer.clear();
        self.rx_buffer.clear();
        self.rx_index = 0;
        self.modified = None;
    }
}

/// Mask and shift of a register bit field
///
/// `bit_start` is the field's most significant bit. Out-of-range
/// arguments are clamped to the byte.
fn bit_field(bit_start: u8, length: u8) -> (u8, u8) {
    let bit_start = bit_start.min(7);
    let length = length.clamp(1, bit_start + 1);
    let shift = bit_start + 1 - length;
    let mask = (((1u16 << length) - 1) as u8) << shift;
    (mask, shift)
}

fn start_error(error: StartError) -> nb::Error<TransferError> {
    match error {
        // Addressed as a peripheral right now; try again shortly
        StartError::Busy => nb::Error::WouldBlock,
        // Wire buffers never exceed the engine limit
        StartError::InvalidLength => nb::Error::Other(TransferError::Truncated),
    }
}
