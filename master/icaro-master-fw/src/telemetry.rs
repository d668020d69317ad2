//! Telemetry task
//!
//! Runs the handshake with the attitude node, then reads attitude for as
//! long as the link holds. Gives the node a pause and starts over when
//! the client gives up.

use defmt::*;
use embassy_time::{Duration, Instant, Ticker, Timer};

use icaro_core::config::{BusConfig, TelemetryConfig};
use icaro_core::telemetry::{TelemetryClient, TelemetryError, TelemetryEvent};

use crate::bus;

/// Client step period
const STEP_INTERVAL_MS: u64 = 1;

/// Pause before a new handshake after the client gave up
const RESTART_DELAY_MS: u64 = 1_000;

/// Period of the attitude summary at `info` level
const REPORT_INTERVAL_MS: u32 = 1_000;

#[embassy_executor::task]
pub async fn telemetry_task(config: TelemetryConfig, bus_config: BusConfig) {
    info!(
        "Telemetry task started, node at {=u8:#x}",
        config.peripheral_address
    );

    let mut client = TelemetryClient::new(config, &bus_config);
    let mut ticker = Ticker::every(Duration::from_millis(STEP_INTERVAL_MS));
    let start = Instant::now();
    let mut last_report_ms: u32 = 0;

    loop {
        ticker.next().await;

        let now_ms = start.elapsed().as_millis() as u32;
        let Some(result) = bus::with_wire(|wire| client.step(wire, now_ms)) else {
            continue;
        };

        match result {
            Ok(event) => log_event(event, client.status_polls()),
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(e)) => {
                match e {
                    TelemetryError::HandshakeTimeout => {
                        error!("Node never became ready, retrying handshake")
                    }
                    TelemetryError::LinkLost(last) => {
                        error!("Link to node lost ({:?}), retrying handshake", last)
                    }
                }
                Timer::after(Duration::from_millis(RESTART_DELAY_MS)).await;
                client.restart();
                ticker.reset();
            }
        }

        if now_ms.wrapping_sub(last_report_ms) >= REPORT_INTERVAL_MS {
            last_report_ms = now_ms;
            if let Some(reading) = client.latest(now_ms) {
                let sample = reading.sample;
                if reading.stale {
                    warn!(
                        "Attitude (stale) roll={} pitch={} yaw={}",
                        sample.roll, sample.pitch, sample.yaw
                    );
                } else {
                    info!(
                        "Attitude roll={} pitch={} yaw={}",
                        sample.roll, sample.pitch, sample.yaw
                    );
                }
            }
        }
    }
}

fn log_event(event: TelemetryEvent, polls: u16) {
    match event {
        TelemetryEvent::CalibrationRequested => info!("Calibration requested"),
        TelemetryEvent::StatusPolled(status) => {
            debug!("Node status {:?} after {} polls", status, polls)
        }
        TelemetryEvent::PeripheralReady => info!("Node ready after {} polls", polls),
        TelemetryEvent::Started => info!("Node running, streaming attitude"),
        TelemetryEvent::Attitude(sample) => debug!(
            "roll={} pitch={} yaw={}",
            sample.roll, sample.pitch, sample.yaw
        ),
        TelemetryEvent::SampleRejected(sample) => warn!(
            "Discarded non-finite attitude roll={} pitch={} yaw={}",
            sample.roll, sample.pitch, sample.yaw
        ),
        TelemetryEvent::TransferFailed(e) => warn!("Transfer failed: {:?}", e),
    }
}
