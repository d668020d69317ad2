//! Handshake and attitude polling state machine

use icaro_hal::twi::TwiHardware;
use icaro_protocol::registers::{ATTITUDE_LEN, ROLL_ADDRESS, STATUS_ADDRESS};
use icaro_protocol::{AttitudeSample, RegisterWrite, StatusCode};

use crate::config::{BusConfig, TelemetryConfig};
use crate::link::{LinkMonitor, LinkStatus};
use crate::traits::clock::elapsed_ms;
use crate::twi::{PeripheralHandler, TransferError, Wire};

/// Reasons the client gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryError {
    /// The node never announced `ReadyToStart`
    HandshakeTimeout,
    /// Transfers kept failing; carries the last failure
    LinkLost(TransferError),
}

/// Something the caller may want to log or act on
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEvent {
    /// `Calibrating` written to the node
    CalibrationRequested,
    /// Status register read, node not ready yet
    StatusPolled(Option<StatusCode>),
    /// Node announced `ReadyToStart`
    PeripheralReady,
    /// `Running` written to the node
    Started,
    /// Fresh attitude sample
    Attitude(AttitudeSample),
    /// Read succeeded but held a NaN or infinite angle
    SampleRejected(AttitudeSample),
    /// A transfer failed; the client will try again
    TransferFailed(TransferError),
}

/// Where the client is in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientPhase {
    RequestCalibration,
    AwaitReady,
    StartRunning,
    Streaming,
    Failed(TelemetryError),
}

/// Last decoded sample and whether it can still be trusted
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub sample: AttitudeSample,
    /// Too old, or reads failed since it arrived
    pub stale: bool,
}

/// Controller-side handshake and attitude reader
///
/// Drive it with [`step`](TelemetryClient::step) from a loop that also
/// lets the bus interrupt run. Every call does a bounded amount of work
/// and returns `WouldBlock` until something happens.
pub struct TelemetryClient {
    config: TelemetryConfig,
    transfer_timeout_ms: u32,
    phase: ClientPhase,
    /// Start of the transfer in flight
    in_flight_since: Option<u32>,
    /// No new transfer before `idle_since + idle_for_ms`
    idle_since: u32,
    idle_for_ms: u32,
    command_attempts: u8,
    status_polls: u16,
    monitor: LinkMonitor,
    last_sample: Option<AttitudeSample>,
}

impl TelemetryClient {
    /// Create a client
    pub fn new(config: TelemetryConfig, bus: &BusConfig) -> Self {
        Self {
            config,
            transfer_timeout_ms: bus.transfer_timeout_ms,
            phase: ClientPhase::RequestCalibration,
            in_flight_since: None,
            idle_since: 0,
            idle_for_ms: 0,
            command_attempts: 0,
            status_polls: 0,
            monitor: LinkMonitor::from_config(&config),
            last_sample: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    /// Status polls spent in the current handshake
    pub fn status_polls(&self) -> u16 {
        self.status_polls
    }

    /// Link health tracker
    pub fn monitor(&self) -> &LinkMonitor {
        &self.monitor
    }

    /// Last good sample, flagged stale when the link is not healthy
    pub fn latest(&self, now_ms: u32) -> Option<Reading> {
        self.last_sample.map(|sample| Reading {
            sample,
            stale: self.monitor.status(now_ms) != LinkStatus::Healthy,
        })
    }

    /// Start the handshake over, keeping the last sample
    pub fn restart(&mut self) {
        self.phase = ClientPhase::RequestCalibration;
        self.in_flight_since = None;
        self.idle_for_ms = 0;
        self.command_attempts = 0;
        self.status_polls = 0;
        self.monitor.reset();
    }

    /// Make progress
    ///
    /// Returns an event when something happened, `WouldBlock` while
    /// waiting for the bus or the next poll, and an error once the client
    /// has given up. After an error, [`restart`](TelemetryClient::restart)
    /// begins a new handshake.
    pub fn step<H, P>(
        &mut self,
        wire: &mut Wire<H, P>,
        now_ms: u32,
    ) -> nb::Result<TelemetryEvent, TelemetryError>
    where
        H: TwiHardware,
        P: PeripheralHandler,
    {
        if let ClientPhase::Failed(error) = self.phase {
            return Err(nb::Error::Other(error));
        }
        if self.in_flight_since.is_none() && elapsed_ms(now_ms, self.idle_since) < self.idle_for_ms
        {
            return Err(nb::Error::WouldBlock);
        }

        match self.phase {
            ClientPhase::RequestCalibration => {
                self.command(wire, now_ms, StatusCode::Calibrating)
            }
            ClientPhase::AwaitReady => self.poll_status(wire, now_ms),
            ClientPhase::StartRunning => self.command(wire, now_ms, StatusCode::Running),
            ClientPhase::Streaming => self.read_attitude(wire, now_ms),
            ClientPhase::Failed(error) => Err(nb::Error::Other(error)),
        }
    }

    fn command<H, P>(
        &mut self,
        wire: &mut Wire<H, P>,
        now_ms: u32,
        status: StatusCode,
    ) -> nb::Result<TelemetryEvent, TelemetryError>
    where
        H: TwiHardware,
        P: PeripheralHandler,
    {
        if self.in_flight_since.is_none() {
            wire.begin_transmission(self.config.peripheral_address);
            wire.write_all(&RegisterWrite::status(status).encode());
        }

        match self.transfer(wire, now_ms, |w| w.end_transmission(true)) {
            Ok(()) => {
                self.command_attempts = 0;
                let event = match status {
                    StatusCode::Running => {
                        self.phase = ClientPhase::Streaming;
                        self.monitor.reset();
                        self.idle(now_ms, self.config.sample_interval_ms);
                        TelemetryEvent::Started
                    }
                    _ => {
                        self.phase = ClientPhase::AwaitReady;
                        self.status_polls = 0;
                        self.idle(now_ms, self.config.status_poll_interval_ms);
                        TelemetryEvent::CalibrationRequested
                    }
                };
                Ok(event)
            }
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(e)) => {
                self.command_attempts = self.command_attempts.saturating_add(1);
                // A bus fault or stall will not clear by writing again
                if !e.is_retryable() || self.command_attempts >= self.config.max_command_retries {
                    return self.fail(TelemetryError::LinkLost(e));
                }
                self.idle(now_ms, 0);
                Ok(TelemetryEvent::TransferFailed(e))
            }
        }
    }

    fn poll_status<H, P>(
        &mut self,
        wire: &mut Wire<H, P>,
        now_ms: u32,
    ) -> nb::Result<TelemetryEvent, TelemetryError>
    where
        H: TwiHardware,
        P: PeripheralHandler,
    {
        let address = self.config.peripheral_address;
        let result = self.transfer(wire, now_ms, |w| {
            w.request_from(address, 1, Some(STATUS_ADDRESS), true)
        });

        let event = match result {
            Err(nb::Error::WouldBlock) => return Err(nb::Error::WouldBlock),
            Ok(_) => {
                let status = wire.read().and_then(StatusCode::from_byte);
                if status == Some(StatusCode::ReadyToStart) {
                    self.phase = ClientPhase::StartRunning;
                    self.command_attempts = 0;
                    self.idle(now_ms, 0);
                    return Ok(TelemetryEvent::PeripheralReady);
                }
                TelemetryEvent::StatusPolled(status)
            }
            Err(nb::Error::Other(e)) => TelemetryEvent::TransferFailed(e),
        };

        // Failed polls count too, so a dead node cannot stall the handshake
        self.status_polls = self.status_polls.saturating_add(1);
        if self.status_polls >= self.config.max_status_polls {
            return self.fail(TelemetryError::HandshakeTimeout);
        }
        self.idle(now_ms, self.config.status_poll_interval_ms);
        Ok(event)
    }

    fn read_attitude<H, P>(
        &mut self,
        wire: &mut Wire<H, P>,
        now_ms: u32,
    ) -> nb::Result<TelemetryEvent, TelemetryError>
    where
        H: TwiHardware,
        P: PeripheralHandler,
    {
        let address = self.config.peripheral_address;
        let result = self.transfer(wire, now_ms, |w| {
            w.request_from(address, ATTITUDE_LEN, Some(ROLL_ADDRESS), true)
        });

        match result {
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Ok(_) => {
                let mut bytes = [0u8; ATTITUDE_LEN];
                let count = wire.read_into(&mut bytes);
                self.idle(now_ms, self.config.sample_interval_ms);
                match AttitudeSample::from_slice(&bytes[..count]) {
                    Some(sample) if sample.is_finite() => {
                        self.monitor.record_success(now_ms);
                        self.last_sample = Some(sample);
                        Ok(TelemetryEvent::Attitude(sample))
                    }
                    // The transfer itself worked; the last sample just ages
                    Some(sample) => Ok(TelemetryEvent::SampleRejected(sample)),
                    None => self.read_failed(now_ms, TransferError::Truncated),
                }
            }
            Err(nb::Error::Other(e)) => self.read_failed(now_ms, e),
        }
    }

    fn read_failed(
        &mut self,
        now_ms: u32,
        error: TransferError,
    ) -> nb::Result<TelemetryEvent, TelemetryError> {
        self.monitor.record_failure();
        if self.monitor.status(now_ms) == LinkStatus::Lost {
            return self.fail(TelemetryError::LinkLost(error));
        }
        self.idle(now_ms, self.config.sample_interval_ms);
        Ok(TelemetryEvent::TransferFailed(error))
    }

    /// Run one wire operation under the transfer timeout
    fn transfer<H, P, T>(
        &mut self,
        wire: &mut Wire<H, P>,
        now_ms: u32,
        mut op: impl FnMut(&mut Wire<H, P>) -> nb::Result<T, TransferError>,
    ) -> nb::Result<T, TransferError>
    where
        H: TwiHardware,
        P: PeripheralHandler,
    {
        let since = *self.in_flight_since.get_or_insert(now_ms);
        let result = match op(wire) {
            Err(nb::Error::WouldBlock)
                if elapsed_ms(now_ms, since) >= self.transfer_timeout_ms =>
            {
                wire.recover();
                Err(nb::Error::Other(TransferError::Timeout))
            }
            other => other,
        };
        if !matches!(result, Err(nb::Error::WouldBlock)) {
            self.in_flight_since = None;
        }
        result
    }

    fn idle(&mut self, now_ms: u32, for_ms: u32) {
        self.idle_since = now_ms;
        self.idle_for_ms = for_ms;
    }

    fn fail<T>(&mut self, error: TelemetryError) -> nb::Result<T, TelemetryError> {
        self.phase = ClientPhase::Failed(error);
        Err(nb::Error::Other(error))
    }
}
