//! Icaro - Controller Firmware
//!
//! Drives the node bus as controller: asks the attitude node to
//! calibrate, waits for it to become ready, starts it and then polls
//! roll/pitch/yaw.

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::bind_interrupts;
use {defmt_rtt as _, panic_probe as _};

use icaro_core::config::{BusConfig, TelemetryConfig};
use icaro_hal_stm32::twi::Stm32Twi;

mod bus;
mod telemetry;

bind_interrupts!(struct Irqs {
    I2C1_EV => bus::BusInterruptHandler;
    I2C1_ER => bus::BusInterruptHandler;
});

/// APB1 clock feeding I2C1
const PCLK1_HZ: u32 = 42_000_000;

/// Main entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Icaro controller starting...");

    let p = embassy_stm32::init(clock_config());

    let bus_config = BusConfig::default();
    let twi = Stm32Twi::i2c1(p.I2C1, p.PB6, p.PB7, PCLK1_HZ);
    bus::install(twi, &bus_config, Irqs);
    info!("Controller bus up at {} Hz", bus_config.frequency_hz);

    spawner
        .spawn(telemetry::telemetry_task(TelemetryConfig::default(), bus_config))
        .unwrap();
}

/// 168 MHz from the internal oscillator, APB1 at 42 MHz
fn clock_config() -> embassy_stm32::Config {
    use embassy_stm32::rcc::*;

    let mut config = embassy_stm32::Config::default();
    config.rcc.hsi = true;
    config.rcc.pll_src = PllSource::HSI;
    config.rcc.pll = Some(Pll {
        prediv: PllPreDiv::DIV16,
        mul: PllMul::MUL336,
        divp: Some(PllPDiv::DIV2),
        divq: Some(PllQDiv::DIV7),
        divr: None,
    });
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config.rcc.sys = Sysclk::PLL1_P;
    config
}
