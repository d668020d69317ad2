//! Controller side of the node bus
//!
//! Same arrangement as on the node: the engine sits in a critical-section
//! mutex, the interrupt advances it and the telemetry task drives
//! transactions through it.

use core::cell::RefCell;

use embassy_stm32::interrupt::typelevel::{Binding, Handler, Interrupt, I2C1_ER, I2C1_EV};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use icaro_core::config::BusConfig;
use icaro_core::twi::{NoPeripheral, Wire};
use icaro_hal_stm32::twi::Stm32Twi;

/// Conditions handled per interrupt before returning
const MAX_CONDITIONS_PER_IRQ: usize = 4;

pub type MasterWire = Wire<Stm32Twi<'static>, NoPeripheral>;

static MASTER_BUS: Mutex<CriticalSectionRawMutex, RefCell<Option<MasterWire>>> =
    Mutex::new(RefCell::new(None));

/// Event and error interrupt handler for the controller bus
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
    MASTER_BUS.lock(|bus| {
        if let Some(wire) = bus.borrow_mut().as_mut() {
            for _ in 0..MAX_CONDITIONS_PER_IRQ {
                if !wire.on_interrupt() {
                    break;
                }
            }
        }
    });
}

/// Bring the controller bus up
pub fn install(
    twi: Stm32Twi<'static>,
    config: &BusConfig,
    _irq: impl Binding<I2C1_EV, BusInterruptHandler> + Binding<I2C1_ER, BusInterruptHandler>,
) {
    let mut wire = Wire::with_handler(twi, NoPeripheral);
    wire.init(&config.twi_config());
    MASTER_BUS.lock(|bus| bus.replace(Some(wire)));

    I2C1_EV::unpend();
    I2C1_ER::unpend();
    // SAFETY: the handlers only touch MASTER_BUS through its mutex
    unsafe {
        I2C1_EV::enable();
        I2C1_ER::enable();
    }
}

/// Run `f` with the wire, if the bus is installed
///
/// Runs inside a critical section; keep `f` short.
pub fn with_wire<R>(f: impl FnOnce(&mut MasterWire) -> R) -> Option<R> {
    MASTER_BUS.lock(|bus| bus.borrow_mut().as_mut().map(f))
}
