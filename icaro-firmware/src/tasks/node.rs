//! Attitude node task
//!
//! Owns the [`AttitudeNode`] and steps it every millisecond. Handshake
//! commands arrive through the register file from the bus interrupt.

use defmt::*;
use embassy_time::{Delay, Duration, Instant, Ticker};

use icaro_core::node::{AttitudeNode, NodeActivity};
use icaro_drivers::imu::RestingCalibrator;

use crate::channels::{SharedFilter, SharedImu};
use crate::config::FlashCalibrationStore;

/// The node as wired up on this board
pub type Node = AttitudeNode<
    'static,
    SharedFilter,
    RestingCalibrator<SharedImu, Delay>,
    FlashCalibrationStore<'static>,
>;

/// Main loop period
const STEP_INTERVAL_MS: u64 = 1;

#[embassy_executor::task]
pub async fn node_task(mut node: Node) {
    info!("Node task started");

    match node.start().await {
        Ok(Some(_)) => info!("Stored calibration applied, waiting for controller"),
        Ok(None) => info!("No stored calibration, waiting for controller"),
        Err(e) => warn!("Calibration storage unavailable: {:?}", e),
    }

    let mut ticker = Ticker::every(Duration::from_millis(STEP_INTERVAL_MS));
    let start = Instant::now();

    loop {
        ticker.next().await;

        let now_ms = start.elapsed().as_millis() as u32;

        match node.step(now_ms).await {
            NodeActivity::Idle => {}
            NodeActivity::Transitioned(state) => info!("Node state: {:?}", state),
            NodeActivity::Rejected(byte) => {
                warn!("Rejected status {=u8:#x} in {:?}", byte, node.state())
            }
            NodeActivity::Calibrated { offsets, stored } => {
                info!(
                    "Calibration complete: accel={} gyro={}",
                    offsets.accel, offsets.gyro
                );
                if !stored {
                    warn!("Calibration could not be saved to flash");
                }
            }
            NodeActivity::CalibrationFailed(e) => warn!("Calibration failed: {:?}", e),
            NodeActivity::Published(sample) => trace!(
                "Attitude roll={} pitch={} yaw={}",
                sample.roll,
                sample.pitch,
                sample.yaw
            ),
        }
    }
}
