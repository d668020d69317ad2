//! Icaro - Attitude Node Firmware
//!
//! Firmware for the STM32F405 attitude node. Reads an MPU6050 and, when
//! fitted, an HMC5883L behind it, fuses them into roll/pitch/yaw and
//! serves the result as a register file on the controller's two-wire bus.
//!
//! # Buses
//!
//! - I2C1 (PB6/PB7): node bus, peripheral role, interrupt driven
//! - I2C2 (PB10/PB11): IMU, embassy async driver with DMA

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::peripherals::I2C2;
use embassy_stm32::time::Hertz;
use embassy_stm32::{bind_interrupts, flash};
use embassy_time::{Delay, Duration};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use icaro_drivers::fusion::MahonyFilter;
use icaro_drivers::imu::{hmc5883l, Hmc5883l, Mpu6050, RestingCalibrator, SensorScale};
use icaro_hal_stm32::flash::FlashStorage;
use icaro_hal_stm32::twi::Stm32Twi;

use crate::channels::{FilterCell, ImuMutex, SharedFilter, SharedImu};
use crate::config::{ConfigPersistence, FlashCalibrationStore};

mod bus;
mod channels;
mod config;
mod tasks;

bind_interrupts!(struct Irqs {
    I2C1_EV => bus::BusInterruptHandler;
    I2C1_ER => bus::BusInterruptHandler;
    I2C2_EV => i2c::EventInterruptHandler<I2C2>;
    I2C2_ER => i2c::ErrorInterruptHandler<I2C2>;
    FLASH => flash::InterruptHandler;
});

/// APB1 clock feeding both I2C peripherals
const PCLK1_HZ: u32 = 42_000_000;

/// IMU bus speed
const IMU_BUS_HZ: u32 = 400_000;

static IMU: StaticCell<ImuMutex> = StaticCell::new();
static FILTER: StaticCell<FilterCell> = StaticCell::new();

/// Main entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Icaro attitude node starting...");

    let p = embassy_stm32::init(clock_config());

    // Configuration first; the calibration store inherits the flash
    let mut persistence = ConfigPersistence::new(FlashStorage::new(p.FLASH, Irqs));
    let node_config = persistence.load_or_default().await;
    let store = FlashCalibrationStore::new(persistence.into_storage());

    // Node bus: the register file answers from here on
    let twi = Stm32Twi::i2c1(p.I2C1, p.PB6, p.PB7, PCLK1_HZ);
    bus::install(twi, &node_config.bus, Irqs);
    info!(
        "Node bus listening at {:?}, {} Hz",
        node_config.bus.own_address, node_config.bus.frequency_hz
    );

    // IMU
    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(IMU_BUS_HZ);
    i2c_config.timeout = Duration::from_millis(20);
    let i2c = I2c::new(
        p.I2C2, p.PB10, p.PB11, Irqs, p.DMA1_CH7, p.DMA1_CH2, i2c_config,
    );

    let mut imu = Mpu6050::new(i2c, icaro_drivers::imu::mpu6050::DEFAULT_ADDRESS);
    match imu.init().await {
        Ok(()) => info!("MPU6050 initialized"),
        // Keep going: the controller sees the node stuck in Initializing
        Err(e) => error!("MPU6050 init failed: {:?}", e),
    }

    // Reachable once the MPU6050 has bypass enabled
    let mut magnetometer = Hmc5883l::new(imu.bus(), hmc5883l::DEFAULT_ADDRESS);
    let has_field = match magnetometer.init().await {
        Ok(()) => {
            info!("HMC5883L initialized");
            true
        }
        Err(e) => {
            warn!("No magnetometer ({:?}), yaw from gyro only", e);
            false
        }
    };

    let scale = SensorScale::MPU6050_8G_500DPS;
    let imu: &'static ImuMutex = IMU.init(ImuMutex::new(imu));
    let filter: &'static FilterCell =
        FILTER.init(FilterCell::new(core::cell::RefCell::new(MahonyFilter::new(scale))));

    let calibrator = RestingCalibrator::new(
        SharedImu(imu),
        Delay,
        node_config.calibration_samples,
        scale.gravity_counts(),
    );

    let node = tasks::Node::new(
        &bus::REGISTERS,
        SharedFilter(filter),
        calibrator,
        store,
        node_config,
    );

    info!("Spawning tasks...");
    spawner.spawn(tasks::sensor_task(imu, filter, has_field)).unwrap();
    spawner.spawn(tasks::node_task(node)).unwrap();
    spawner.spawn(tasks::bus_monitor_task()).unwrap();

    info!("Icaro attitude node running");
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
        divp: Some(PllPDiv::DIV2), // 16 / 16 * 336 / 2 = 168 MHz
        divq: Some(PllQDiv::DIV7),
        divr: None,
    });
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config.rcc.sys = Sysclk::PLL1_P;
    config
}
