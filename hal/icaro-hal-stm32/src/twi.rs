//! Two-wire bus adapter for the STM32 v1 I2C block
//!
//! [`Stm32Twi`] decodes SR1/SR2 into one [`BusStatus`] per call and maps
//! the engine's replies onto CR1/CR2. It never blocks; every method is
//! called from the I2C event or error interrupt.
//!
//! The v1 block differs from a classic status-code TWI in a few places
//! that this adapter papers over:
//!
//! - ADDR for a controller read is left pending until the engine replies,
//!   so ACK can be cleared before the first byte of a one-byte read.
//! - STOP and repeated START for a read are scheduled in
//!   [`prepare_end`](TwiHardware::prepare_end), before the final byte.
//! - Controller writes advance on BTF, so each byte is known to be
//!   acknowledged before the next one is loaded.

use core::marker::PhantomData;

use embassy_stm32::pac;
use embassy_stm32::pac::i2c::vals;
use embassy_stm32::peripherals::{I2C1, PB6, PB7};
use embassy_stm32::Peri;

use icaro_hal::twi::{BusStatus, TwiConfig, TwiHardware};

/// Alternate function number of the I2C pins on F4 parts
const I2C_AF: u8 = 4;

/// Where the current transfer stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Phase {
    Idle,
    /// START sent, address byte on its way
    Addressing { read: bool },
    ControllerTx,
    /// Controller read; `ending` once the next byte is the last
    ControllerRx { ending: bool },
    PeripheralRx,
    PeripheralTx,
}

/// STM32 I2C v1 controller driven by the bus engine
pub struct Stm32Twi<'d> {
    regs: pac::i2c::I2c,
    pclk1_hz: u32,
    phase: Phase,
    /// Bus still owned from a transfer that ended without STOP
    holding: bool,
    /// ADDR of a controller read not yet cleared
    addr_pending: bool,
    /// How the current read ends, once the engine has said so
    pending_end: Option<bool>,
    /// STOP or START already requested for the end of a read
    end_scheduled: bool,
    own_address: Option<u8>,
    _peri: PhantomData<&'d mut ()>,
}

impl<'d> Stm32Twi<'d> {
    /// Wrap an I2C register block clocked from APB1 at `pclk1_hz`
    ///
    /// The caller enables the peripheral clock and routes the pins; see
    /// [`Stm32Twi::i2c1`].
    pub fn new(regs: pac::i2c::I2c, pclk1_hz: u32) -> Self {
        Self {
            regs,
            pclk1_hz,
            phase: Phase::Idle,
            holding: false,
            addr_pending: false,
            pending_end: None,
            end_scheduled: false,
            own_address: None,
            _peri: PhantomData,
        }
    }

    /// I2C1 on PB6 (SCL) / PB7 (SDA)
    pub fn i2c1(
        _peri: Peri<'d, I2C1>,
        _scl: Peri<'d, PB6>,
        _sda: Peri<'d, PB7>,
        pclk1_hz: u32,
    ) -> Self {
        pac::RCC.apb1enr().modify(|w| w.set_i2c1en(true));
        pac::RCC.apb1rstr().modify(|w| w.set_i2c1rst(true));
        pac::RCC.apb1rstr().modify(|w| w.set_i2c1rst(false));
        route_gpiob_pin(6);
        route_gpiob_pin(7);
        Self::new(pac::I2C1, pclk1_hz)
    }

    fn set_buffer_interrupts(&mut self, enabled: bool) {
        self.regs.cr2().modify(|w| w.set_itbufen(enabled));
    }

    /// Back to listening for our own address
    fn idle(&mut self) {
        let listening = self.own_address.is_some();
        self.phase = Phase::Idle;
        self.addr_pending = false;
        self.pending_end = None;
        self.end_scheduled = false;
        self.regs.cr1().modify(|w| w.set_ack(listening));
        self.regs.cr2().modify(|w| {
            w.set_itevten(true);
            w.set_itbufen(listening);
        });
    }

    /// Read SR2 after SR1 to release a pending ADDR
    fn clear_addr(&mut self) -> bool {
        self.regs.sr2().read().tra()
    }

    /// Apply the STOP or START the engine asked for in `prepare_end`
    fn schedule_end(&mut self) {
        if let Some(send_stop) = self.pending_end.take() {
            self.regs.cr1().modify(|w| {
                if send_stop {
                    w.set_stop(true);
                } else {
                    w.set_start(true);
                }
            });
            self.end_scheduled = true;
        }
    }
}

impl<'d> TwiHardware for Stm32Twi<'d> {
    fn enable(&mut self, config: &TwiConfig) {
        let freq_mhz = (self.pclk1_hz / 1_000_000).clamp(2, 50) as u8;

        self.regs.cr1().modify(|w| w.set_pe(false));
        self.regs.cr1().modify(|w| w.set_swrst(true));
        self.regs.cr1().modify(|w| w.set_swrst(false));

        self.regs.cr2().modify(|w| {
            w.set_freq(freq_mhz);
            w.set_iterren(true);
            w.set_itevten(true);
            w.set_itbufen(false);
        });

        let frequency = config.frequency.max(1);
        if frequency <= 100_000 {
            let ccr = (self.pclk1_hz / (2 * frequency)).max(4) as u16;
            self.regs.ccr().write(|w| {
                w.set_f_s(vals::FS::STANDARD);
                w.set_ccr(ccr);
            });
            self.regs.trise().write(|w| w.set_trise(freq_mhz + 1));
        } else {
            let ccr = (self.pclk1_hz / (3 * frequency)).max(1) as u16;
            self.regs.ccr().write(|w| {
                w.set_f_s(vals::FS::FAST);
                w.set_duty(vals::Duty::DUTY2_1);
                w.set_ccr(ccr);
            });
            // 300 ns maximum rise time in fast mode
            let trise = (freq_mhz as u16 * 300 / 1000) as u8 + 1;
            self.regs.trise().write(|w| w.set_trise(trise));
        }

        self.own_address = None;
        if let Some(address) = config.own_address {
            self.set_address(address);
        }

        self.regs.cr1().modify(|w| {
            w.set_engc(config.general_call);
            w.set_pe(true);
        });
        self.holding = false;
        self.idle();
    }

    fn disable(&mut self) {
        self.regs.cr2().modify(|w| {
            w.set_iterren(false);
            w.set_itevten(false);
            w.set_itbufen(false);
        });
        self.regs.cr1().modify(|w| w.set_pe(false));
        self.phase = Phase::Idle;
        self.holding = false;
    }

    fn set_address(&mut self, address: u8) {
        let address = address & 0x7F;
        self.own_address = Some(address);
        // Bit 14 must be kept at 1 by software
        self.regs
            .oar1()
            .write(|w| w.0 = (1 << 14) | ((address as u32) << 1));
    }

    fn status(&mut self) -> Option<BusStatus> {
        let sr1 = self.regs.sr1().read();

        if sr1.berr() {
            self.regs.sr1().modify(|w| w.set_berr(false));
            self.phase = Phase::Idle;
            self.holding = false;
            return Some(BusStatus::BusError);
        }
        if sr1.arlo() {
            self.regs.sr1().modify(|w| w.set_arlo(false));
            self.phase = Phase::Idle;
            self.holding = false;
            return Some(BusStatus::ArbitrationLost);
        }
        if sr1.af() {
            self.regs.sr1().modify(|w| w.set_af(false));
            return Some(match self.phase {
                Phase::Addressing { read: false } => BusStatus::WriteAddressNacked,
                Phase::Addressing { read: true } => BusStatus::ReadAddressNacked,
                Phase::ControllerTx => BusStatus::WriteDataNacked,
                Phase::PeripheralTx => {
                    // TXE stays set until STOP
                    self.set_buffer_interrupts(false);
                    self.phase = Phase::Idle;
                    BusStatus::TransmittedDataNacked
                }
                _ => BusStatus::NoInfo,
            });
        }
        if sr1.sb() {
            let repeated = self.holding;
            self.holding = false;
            self.end_scheduled = false;
            self.phase = Phase::Addressing { read: false };
            return Some(if repeated {
                BusStatus::RepeatedStartSent
            } else {
                BusStatus::StartSent
            });
        }
        if sr1.addr() {
            return Some(match self.phase {
                Phase::Addressing { read: false } => {
                    self.clear_addr();
                    self.phase = Phase::ControllerTx;
                    BusStatus::WriteAddressAcked
                }
                Phase::Addressing { read: true } => {
                    // Cleared in `reply`, once ACK is set up for the first byte
                    self.addr_pending = true;
                    self.phase = Phase::ControllerRx { ending: false };
                    BusStatus::ReadAddressAcked
                }
                _ => {
                    if self.clear_addr() {
                        self.phase = Phase::PeripheralTx;
                        BusStatus::AddressedAsTransmitter
                    } else {
                        self.phase = Phase::PeripheralRx;
                        BusStatus::AddressedAsReceiver
                    }
                }
            });
        }
        if sr1.stopf() {
            // STOPF clears on SR1 read followed by a CR1 write
            self.regs.cr1().modify(|_| {});
            self.phase = Phase::Idle;
            return Some(BusStatus::StopReceived);
        }
        if sr1.rxne() {
            return Some(match self.phase {
                Phase::ControllerRx { ending: true } => BusStatus::ReadDataNacked,
                Phase::ControllerRx { ending: false } => BusStatus::ReadDataAcked,
                Phase::PeripheralRx if self.regs.cr1().read().ack() => {
                    BusStatus::ReceivedDataAcked
                }
                Phase::PeripheralRx => BusStatus::ReceivedDataNacked,
                _ => {
                    // Stray byte; drain it so RXNE does not fire forever
                    let _ = self.regs.dr().read();
                    BusStatus::NoInfo
                }
            });
        }
        if sr1.btf() && self.phase == Phase::ControllerTx {
            return Some(BusStatus::WriteDataAcked);
        }
        if sr1.txe() && self.phase == Phase::PeripheralTx {
            return Some(BusStatus::TransmittedDataAcked);
        }
        None
    }

    fn read_data(&mut self) -> u8 {
        self.regs.dr().read().dr()
    }

    fn load_data(&mut self, byte: u8) {
        if let Phase::Addressing { .. } = self.phase {
            self.phase = Phase::Addressing {
                read: byte & 1 == 1,
            };
        }
        self.regs.dr().write(|w| w.set_dr(byte));
    }

    fn reply(&mut self, ack: bool) {
        match self.phase {
            Phase::ControllerRx { .. } => {
                self.regs.cr1().modify(|w| w.set_ack(ack));
                if self.addr_pending {
                    self.addr_pending = false;
                    self.clear_addr();
                }
                // Must follow the ADDR clear on a one-byte read
                self.schedule_end();
                self.phase = Phase::ControllerRx { ending: !ack };
                self.set_buffer_interrupts(true);
            }
            Phase::PeripheralRx => self.regs.cr1().modify(|w| w.set_ack(ack)),
            // Address bytes, controller data and peripheral data all move
            // as soon as DR is loaded
            _ => {}
        }
    }

    fn start(&mut self) {
        self.set_buffer_interrupts(false);
        self.phase = Phase::Addressing { read: false };
        if !self.end_scheduled {
            self.regs.cr1().modify(|w| {
                w.set_ack(true);
                w.set_start(true);
            });
        }
        self.regs.cr2().modify(|w| w.set_itevten(true));
    }

    fn stop(&mut self) {
        if !self.end_scheduled {
            self.regs.cr1().modify(|w| w.set_stop(true));
        }
        self.holding = false;
        self.idle();
    }

    fn hold_bus(&mut self) {
        // A pending BTF or SB keeps firing until the next `start`
        self.regs.cr2().modify(|w| {
            w.set_itevten(false);
            w.set_itbufen(false);
        });
        self.phase = Phase::Idle;
        self.addr_pending = false;
        self.holding = true;
    }

    fn release(&mut self) {
        self.holding = false;
        self.idle();
    }

    fn prepare_end(&mut self, send_stop: bool) {
        self.regs.cr1().modify(|w| w.set_ack(false));
        self.pending_end = Some(send_stop);
    }
}

/// Put a GPIOB pin into open-drain I2C alternate function mode
fn route_gpiob_pin(pin: usize) {
    use pac::gpio::vals::{Moder, Ospeedr, Ot, Pupdr};

    let port = pac::GPIOB;
    pac::RCC.ahb1enr().modify(|w| w.set_gpioben(true));
    port.otyper().modify(|w| w.set_ot(pin, Ot::OPENDRAIN));
    port.pupdr().modify(|w| w.set_pupdr(pin, Pupdr::PULLUP));
    port.ospeedr().modify(|w| w.set_ospeedr(pin, Ospeedr::HIGHSPEED));
    port.afr(pin / 8).modify(|w| w.set_afr(pin % 8, I2C_AF));
    port.moder().modify(|w| w.set_moder(pin, Moder::ALTERNATE));
}
