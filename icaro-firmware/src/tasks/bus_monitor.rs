//! Bus counter reporting task

use defmt::*;
use embassy_time::{Duration, Ticker};

use icaro_core::twi::BusStats;

use crate::bus;

/// Reporting period
const REPORT_INTERVAL_MS: u64 = 5_000;

/// Periodically log bus counters when faults were recorded
#[embassy_executor::task]
pub async fn bus_monitor_task() {
    info!("Bus monitor task started");

    let mut ticker = Ticker::every(Duration::from_millis(REPORT_INTERVAL_MS));
    let mut last = BusStats::default();

    loop {
        ticker.next().await;

        let Some(stats) = bus::stats() else {
            continue;
        };

        if has_new_faults(&last, &stats) {
            warn!(
                "Bus faults: nacks={} arbitration_lost={} bus_errors={} recoveries={}",
                stats.nacks, stats.arbitration_lost, stats.bus_errors, stats.recoveries
            );
        }
        debug!("Bus transfers completed: {}", stats.completed);
        last = stats;
    }
}

fn has_new_faults(last: &BusStats, now: &BusStats) -> bool {
    now.nacks != last.nacks
        || now.arbitration_lost != last.arbitration_lost
        || now.bus_errors != last.bus_errors
        || now.recoveries != last.recoveries
}
