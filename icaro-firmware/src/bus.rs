//! Node bus: register file served from the I2C1 interrupt
//!
//! The engine lives in a critical-section mutex so the interrupt handler
//! and tasks can both reach it. Tasks only read counters; everything else
//! happens in interrupt context.

use core::cell::RefCell;

use embassy_stm32::interrupt::typelevel::{Binding, Handler, Interrupt, I2C1_ER, I2C1_EV};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use icaro_core::config::BusConfig;
use icaro_core::registers::RegisterFile;
use icaro_core::twi::{BusStats, Wire};
use icaro_hal_stm32::twi::Stm32Twi;

/// Conditions handled per interrupt before returning
const MAX_CONDITIONS_PER_IRQ: usize = 4;

/// Register file exposed to the controller
pub static REGISTERS: RegisterFile = RegisterFile::new();

type NodeWire = Wire<Stm32Twi<'static>, &'static RegisterFile>;

static NODE_BUS: Mutex<CriticalSectionRawMutex, RefCell<Option<NodeWire>>> =
    Mutex::new(RefCell::new(None));

/// Event and error interrupt handler for the node bus
pub struct BusInterruptHandler;

impl Handler<I2C1_EV> for BusInterruptHandler {
    unsafe fn on_interrupt() {
        service();
    }
}

impl Handler<I2C1_ER> for BusInterruptHandler {
    unsafe fn on_interrupt() {
        service();
    }
}

fn service() {
    NODE_BUS.lock(|bus| {
        if let Some(wire) = bus.borrow_mut().as_mut() {
            for _ in 0..MAX_CONDITIONS_PER_IRQ {
                if !wire.on_interrupt() {
                    break;
                }
            }
        }
    });
}

/// Start answering the controller
pub fn install(
    twi: Stm32Twi<'static>,
    config: &BusConfig,
    _irq: impl Binding<I2C1_EV, BusInterruptHandler> + Binding<I2C1_ER, BusInterruptHandler>,
) {
    let mut wire = Wire::with_handler(twi, &REGISTERS);
    wire.init(&config.twi_config());
    NODE_BUS.lock(|bus| bus.replace(Some(wire)));

    I2C1_EV::unpend();
    I2C1_ER::unpend();
    // SAFETY: the handlers only touch NODE_BUS through its mutex
    unsafe {
        I2C1_EV::enable();
        I2C1_ER::enable();
    }
}

/// Transfer counters, if the bus is installed
pub fn stats() -> Option<BusStats> {
    NODE_BUS.lock(|bus| bus.borrow().as_ref().map(|wire| wire.engine().stats()))
}
