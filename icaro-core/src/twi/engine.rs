//! Interrupt-driven bus engine
//!
//! One engine instance owns one bus controller. The bus interrupt calls
//! [`TwiEngine::on_interrupt`], which pulls a single [`BusStatus`] from the
//! hardware and advances the state machine. Controller transfers are
//! started from thread context and their outcome collected with
//! [`TwiEngine::poll`].
//!
//! State transitions:
//!
//! ```text
//!            start_write            start_read
//!   ┌────────────────┐ Ready ┌────────────────┐
//!   ▼                └──┬──┘                  ▼
//! ControllerTx          │              ControllerRx
//!   │ acked: next byte  │                     │ data: store, ack/nack
//!   │ exhausted / nack  │ addressed (w/r)     │ last byte / nack
//!   └──────► Ready ◄────┼────────────► Ready ◄┘
//!                       ▼
//!            PeripheralRx / PeripheralTx
//!                       │ stop / nack / last byte
//!                       ▼
//!                     Ready
//! ```

use icaro_hal::twi::{address_byte, BusStatus, TwiConfig, TwiHardware};

use super::{
    PeripheralHandler, StartError, TransferError, TwiBuffer, BUFFER_LENGTH, PLACEHOLDER_BYTE,
};

/// Bus engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// Idle, a new transfer may start
    Ready,
    /// Sending as bus controller
    ControllerTx,
    /// Receiving as bus controller
    ControllerRx,
    /// Addressed by a controller, receiving
    PeripheralRx,
    /// Addressed by a controller, transmitting
    PeripheralTx,
}

impl BusState {
    /// Check if a transfer may start
    pub fn is_ready(&self) -> bool {
        matches!(self, BusState::Ready)
    }

    /// Check if we currently drive the bus
    pub fn is_controller(&self) -> bool {
        matches!(self, BusState::ControllerTx | BusState::ControllerRx)
    }

    /// Check if a remote controller currently addresses us
    pub fn is_peripheral(&self) -> bool {
        matches!(self, BusState::PeripheralRx | BusState::PeripheralTx)
    }
}

/// Which side of the bus a transaction is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Controller,
    Peripheral,
}

/// Data direction from our point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Transmit,
    Receive,
}

/// One bus transfer in flight
///
/// Created when a transfer starts and dropped, or turned into a
/// [`Completed`], when it ends.
#[derive(Debug, Clone)]
struct BusTransaction {
    role: Role,
    direction: Direction,
    address: u8,
    buffer: TwiBuffer,
    /// Bytes to receive (controller read)
    length: usize,
    /// Next byte to send (transmit directions)
    index: usize,
    send_stop: bool,
}

impl BusTransaction {
    fn controller_write(address: u8, data: &[u8], send_stop: bool) -> Result<Self, StartError> {
        let buffer = TwiBuffer::from_slice(data).map_err(|_| StartError::InvalidLength)?;
        Ok(Self {
            role: Role::Controller,
            direction: Direction::Transmit,
            address,
            length: buffer.len(),
            buffer,
            index: 0,
            send_stop,
        })
    }

    fn controller_read(address: u8, length: usize, send_stop: bool) -> Result<Self, StartError> {
        if length == 0 || length > BUFFER_LENGTH {
            return Err(StartError::InvalidLength);
        }
        Ok(Self {
            role: Role::Controller,
            direction: Direction::Receive,
            address,
            buffer: TwiBuffer::new(),
            length,
            index: 0,
            send_stop,
        })
    }

    fn peripheral(direction: Direction) -> Self {
        Self {
            role: Role::Peripheral,
            direction,
            address: 0,
            buffer: TwiBuffer::new(),
            length: 0,
            index: 0,
            send_stop: false,
        }
    }

    fn is(&self, role: Role, direction: Direction) -> bool {
        self.role == role && self.direction == direction
    }

    fn state(&self) -> BusState {
        match (self.role, self.direction) {
            (Role::Controller, Direction::Transmit) => BusState::ControllerTx,
            (Role::Controller, Direction::Receive) => BusState::ControllerRx,
            (Role::Peripheral, Direction::Receive) => BusState::PeripheralRx,
            (Role::Peripheral, Direction::Transmit) => BusState::PeripheralTx,
        }
    }

    fn address_byte(&self) -> u8 {
        address_byte(self.address, self.direction == Direction::Receive)
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = *self.buffer.get(self.index)?;
        self.index += 1;
        Some(byte)
    }

    fn has_more_to_send(&self) -> bool {
        self.index < self.buffer.len()
    }

    fn wants_more_after_next(&self) -> bool {
        self.buffer.len() + 1 < self.length
    }
}

/// Result of a finished controller transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    /// Direction of the transfer
    pub direction: Direction,
    /// Bytes acknowledged (write) or received (read)
    pub transferred: usize,
    /// Received bytes; empty for writes
    pub data: TwiBuffer,
}

/// Running counters, mostly for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusStats {
    pub completed: u32,
    pub nacks: u32,
    pub arbitration_lost: u32,
    pub bus_errors: u32,
    pub recoveries: u32,
}

/// Two-wire bus engine
pub struct TwiEngine<H, P> {
    hw: H,
    handler: P,
    state: BusState,
    transaction: Option<BusTransaction>,
    outcome: Option<Result<Completed, TransferError>>,
    holding_bus: bool,
    stats: BusStats,
}

impl<H: TwiHardware, P: PeripheralHandler> TwiEngine<H, P> {
    /// Create an engine around a bus controller and a peripheral handler
    pub fn new(hw: H, handler: P) -> Self {
        Self {
            hw,
            handler,
            state: BusState::Ready,
            transaction: None,
            outcome: None,
            holding_bus: false,
            stats: BusStats::default(),
        }
    }

    /// Enable the hardware
    pub fn init(&mut self, config: &TwiConfig) {
        self.hw.enable(config);
        if let Some(address) = config.own_address {
            self.hw.set_address(address);
        }
        self.reset();
    }

    /// Disable the hardware and drop anything in flight
    pub fn shutdown(&mut self) {
        self.hw.disable();
        self.reset();
    }

    /// Answer `address` in peripheral role
    pub fn set_address(&mut self, address: u8) {
        self.hw.set_address(address);
    }

    /// Current bus state
    pub fn state(&self) -> BusState {
        self.state
    }

    /// True after a transfer that ended without STOP
    pub fn is_holding_bus(&self) -> bool {
        self.holding_bus
    }

    /// Transfer counters
    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Peripheral handler
    pub fn handler(&self) -> &P {
        &self.handler
    }

    /// Peripheral handler, mutably
    pub fn handler_mut(&mut self) -> &mut P {
        &mut self.handler
    }

    /// Start a controller write of `data` to `address`
    ///
    /// With `send_stop == false` the bus stays held after the last byte
    /// and the next transfer begins with a repeated START.
    pub fn start_write(
        &mut self,
        address: u8,
        data: &[u8],
        send_stop: bool,
    ) -> Result<(), StartError> {
        if !self.state.is_ready() {
            return Err(StartError::Busy);
        }
        let transaction = BusTransaction::controller_write(address, data, send_stop)?;
        self.begin(transaction);
        Ok(())
    }

    /// Start a controller read of `length` bytes from `address`
    pub fn start_read(
        &mut self,
        address: u8,
        length: usize,
        send_stop: bool,
    ) -> Result<(), StartError> {
        if !self.state.is_ready() {
            return Err(StartError::Busy);
        }
        let transaction = BusTransaction::controller_read(address, length, send_stop)?;
        self.begin(transaction);
        Ok(())
    }

    /// Collect the outcome of the last controller transfer
    ///
    /// Returns `WouldBlock` while the transfer is in flight. An outcome is
    /// handed out exactly once.
    pub fn poll(&mut self) -> nb::Result<Completed, TransferError> {
        match self.outcome.take() {
            Some(outcome) => outcome.map_err(nb::Error::Other),
            None => Err(nb::Error::WouldBlock),
        }
    }

    /// Force a STOP and return to `Ready`
    ///
    /// Used after a bounded wait expired. Whatever was in flight is
    /// dropped without reporting an outcome.
    pub fn recover(&mut self) {
        self.hw.stop();
        self.reset();
        self.stats.recoveries = self.stats.recoveries.wrapping_add(1);
    }

    /// Service one pending bus condition
    ///
    /// Call from the bus interrupt. Returns false if the hardware had
    /// nothing pending.
    pub fn on_interrupt(&mut self) -> bool {
        match self.hw.status() {
            Some(status) => {
                self.on_status(status);
                true
            }
            None => false,
        }
    }

    /// Advance the state machine by one bus condition
    pub fn on_status(&mut self, status: BusStatus) {
        match status {
            BusStatus::StartSent | BusStatus::RepeatedStartSent => {
                match self.transaction.as_ref() {
                    Some(t) if t.role == Role::Controller => {
                        self.hw.load_data(t.address_byte());
                        self.hw.reply(true);
                    }
                    // START we did not ask for
                    _ => self.hw.release(),
                }
            }

            // Controller transmitter
            BusStatus::WriteAddressAcked | BusStatus::WriteDataAcked => self.transmit_next(),
            BusStatus::WriteAddressNacked | BusStatus::ReadAddressNacked => {
                self.fail(TransferError::AddressNack)
            }
            BusStatus::WriteDataNacked => self.fail(TransferError::DataNack),
            BusStatus::ArbitrationLost => {
                self.stats.arbitration_lost = self.stats.arbitration_lost.wrapping_add(1);
                self.hw.release();
                self.abort(TransferError::ArbitrationLost);
            }

            // Controller receiver
            BusStatus::ReadDataAcked => {
                self.store_received();
                self.request_next();
            }
            BusStatus::ReadAddressAcked => self.request_next(),
            BusStatus::ReadDataNacked => {
                self.store_received();
                self.complete();
            }

            // Peripheral receiver
            BusStatus::AddressedAsReceiver => {
                self.close_for_new_address();
                self.enter(BusTransaction::peripheral(Direction::Receive));
                self.hw.reply(true);
            }
            BusStatus::ReceivedDataAcked => {
                let byte = self.hw.read_data();
                let stored = match self.transaction.as_mut() {
                    Some(t) if t.is(Role::Peripheral, Direction::Receive) => {
                        t.buffer.push(byte).is_ok()
                    }
                    _ => false,
                };
                // Refuse anything beyond the buffer
                self.hw.reply(stored);
            }
            BusStatus::ReceivedDataNacked => self.hw.reply(false),
            BusStatus::StopReceived => {
                self.hw.release();
                self.deliver_received();
            }

            // Peripheral transmitter
            BusStatus::AddressedAsTransmitter => {
                self.close_for_new_address();
                let mut transaction = BusTransaction::peripheral(Direction::Transmit);
                self.handler.on_request(&mut transaction.buffer);
                if transaction.buffer.is_empty() {
                    let _ = transaction.buffer.push(PLACEHOLDER_BYTE);
                }
                self.enter(transaction);
                self.transmit_peripheral_next();
            }
            BusStatus::TransmittedDataAcked => self.transmit_peripheral_next(),
            BusStatus::TransmittedDataNacked | BusStatus::LastDataAcked => {
                self.hw.reply(true);
                self.transaction = None;
                self.state = BusState::Ready;
            }

            BusStatus::NoInfo => {}
            BusStatus::BusError => {
                self.stats.bus_errors = self.stats.bus_errors.wrapping_add(1);
                self.hw.stop();
                self.holding_bus = false;
                // Partial peripheral data is discarded, never delivered
                self.abort(TransferError::BusError);
            }
        }
    }

    fn begin(&mut self, transaction: BusTransaction) {
        self.outcome = None;
        self.enter(transaction);
        // Issues a repeated START when the previous transfer held the bus
        self.holding_bus = false;
        self.hw.start();
    }

    fn enter(&mut self, transaction: BusTransaction) {
        debug_assert!(self.state.is_ready());
        self.state = transaction.state();
        self.transaction = Some(transaction);
    }

    fn transmit_next(&mut self) {
        let next = match self.transaction.as_mut() {
            Some(t) if t.is(Role::Controller, Direction::Transmit) => t.next_byte(),
            _ => {
                self.hw.release();
                return;
            }
        };
        match next {
            Some(byte) => {
                self.hw.load_data(byte);
                self.hw.reply(true);
            }
            None => self.complete(),
        }
    }

    fn request_next(&mut self) {
        let (more, send_stop) = match self.transaction.as_ref() {
            Some(t) if t.is(Role::Controller, Direction::Receive) => {
                (t.wants_more_after_next(), t.send_stop)
            }
            _ => {
                self.hw.release();
                return;
            }
        };
        if !more {
            self.hw.prepare_end(send_stop);
        }
        self.hw.reply(more);
    }

    fn store_received(&mut self) {
        let byte = self.hw.read_data();
        if let Some(t) = self.transaction.as_mut() {
            if t.is(Role::Controller, Direction::Receive) {
                let _ = t.buffer.push(byte);
            }
        }
    }

    fn transmit_peripheral_next(&mut self) {
        let next = match self.transaction.as_mut() {
            Some(t) if t.is(Role::Peripheral, Direction::Transmit) => {
                t.next_byte().map(|byte| (byte, t.has_more_to_send()))
            }
            _ => None,
        };
        match next {
            Some((byte, more)) => {
                self.hw.load_data(byte);
                self.hw.reply(more);
            }
            // Controller keeps clocking past the end
            None => {
                self.hw.load_data(PLACEHOLDER_BYTE);
                self.hw.reply(false);
            }
        }
    }

    /// Finish a controller transfer that ran to completion
    fn complete(&mut self) {
        let Some(t) = self.transaction.take() else {
            self.state = BusState::Ready;
            return;
        };
        if t.send_stop {
            self.hw.stop();
        } else {
            self.hw.hold_bus();
            self.holding_bus = true;
        }
        self.state = BusState::Ready;
        self.stats.completed = self.stats.completed.wrapping_add(1);

        let completed = match t.direction {
            Direction::Transmit => Completed {
                direction: Direction::Transmit,
                transferred: t.index,
                data: TwiBuffer::new(),
            },
            Direction::Receive => Completed {
                direction: Direction::Receive,
                transferred: t.buffer.len(),
                data: t.buffer,
            },
        };
        self.outcome = Some(Ok(completed));
    }

    /// Peer refused: STOP and report
    fn fail(&mut self, error: TransferError) {
        self.stats.nacks = self.stats.nacks.wrapping_add(1);
        self.hw.stop();
        self.holding_bus = false;
        self.abort(error);
    }

    /// Drop the transfer in flight, reporting `error` for controller ones
    fn abort(&mut self, error: TransferError) {
        if let Some(t) = self.transaction.take() {
            if t.role == Role::Controller {
                self.outcome = Some(Err(error));
            }
        }
        self.state = BusState::Ready;
    }

    /// We were addressed while something else was in flight
    fn close_for_new_address(&mut self) {
        match self.state {
            // Lost arbitration to the controller now addressing us
            BusState::ControllerTx | BusState::ControllerRx => {
                self.stats.arbitration_lost = self.stats.arbitration_lost.wrapping_add(1);
                self.holding_bus = false;
                self.abort(TransferError::ArbitrationLost);
            }
            // Repeated START ends the previous write
            BusState::PeripheralRx => self.deliver_received(),
            BusState::PeripheralTx => {
                self.transaction = None;
                self.state = BusState::Ready;
            }
            BusState::Ready => {}
        }
    }

    fn deliver_received(&mut self) {
        let received = match self.transaction.take() {
            Some(t) if t.is(Role::Peripheral, Direction::Receive) => Some(t),
            other => {
                self.transaction = other;
                None
            }
        };
        if let Some(t) = received {
            self.state = BusState::Ready;
            self.handler.on_receive(&t.buffer);
        } else if self.state.is_peripheral() {
            self.transaction = None;
            self.state = BusState::Ready;
        }
    }

    fn reset(&mut self) {
        self.transaction = None;
        self.outcome = None;
        self.holding_bus = false;
        self.state = BusState::Ready;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Load(u8),
        Reply(bool),
        Start,
        Stop,
        Hold,
        Release,
        PrepareEnd(bool),
    }

    /// Hardware that replays scripted conditions and records responses
    #[derive(Default)]
    struct ScriptedHw {
        statuses: VecDeque<BusStatus>,
        received: VecDeque<u8>,
        calls: Vec<Call>,
    }

    impl TwiHardware for ScriptedHw {
        fn enable(&mut self, _config: &TwiConfig) {}
        fn disable(&mut self) {}
        fn set_address(&mut self, _address: u8) {}
        fn status(&mut self) -> Option<BusStatus> {
            self.statuses.pop_front()
        }
        fn read_data(&mut self) -> u8 {
            self.received.pop_front().unwrap_or(0xEE)
        }
        fn load_data(&mut self, byte: u8) {
            self.calls.push(Call::Load(byte));
        }
        fn reply(&mut self, ack: bool) {
            self.calls.push(Call::Reply(ack));
        }
        fn start(&mut self) {
            self.calls.push(Call::Start);
        }
        fn stop(&mut self) {
            self.calls.push(Call::Stop);
        }
        fn hold_bus(&mut self) {
            self.calls.push(Call::Hold);
        }
        fn release(&mut self) {
            self.calls.push(Call::Release);
        }
        fn prepare_end(&mut self, send_stop: bool) {
            self.calls.push(Call::PrepareEnd(send_stop));
        }
    }

    #[derive(Default)]
    struct Recorder {
        received: Vec<Vec<u8>>,
        response: Vec<u8>,
    }

    impl PeripheralHandler for Recorder {
        fn on_receive(&mut self, data: &[u8]) {
            self.received.push(data.to_vec());
        }
        fn on_request(&mut self, response: &mut TwiBuffer) {
            let _ = response.extend_from_slice(&self.response);
        }
    }

    fn engine() -> TwiEngine<ScriptedHw, Recorder> {
        TwiEngine::new(ScriptedHw::default(), Recorder::default())
    }

    fn run(engine: &mut TwiEngine<ScriptedHw, Recorder>, statuses: &[BusStatus]) {
        engine.hw.statuses.extend(statuses.iter().copied());
        while engine.on_interrupt() {}
    }

    #[test]
    fn test_initial_state_is_ready() {
        let engine = engine();
        assert_eq!(engine.state(), BusState::Ready);
        assert!(!engine.is_holding_bus());
    }

    #[test]
    fn test_controller_write_sends_all_bytes_then_stop() {
        let mut engine = engine();
        engine.start_write(0x01, &[0x00, 0x02], true).unwrap();
        assert_eq!(engine.state(), BusState::ControllerTx);
        assert!(matches!(engine.poll(), Err(nb::Error::WouldBlock)));

        run(
            &mut engine,
            &[
                BusStatus::StartSent,
                BusStatus::WriteAddressAcked,
                BusStatus::WriteDataAcked,
                BusStatus::WriteDataAcked,
            ],
        );

        assert_eq!(
            engine.hw.calls,
            [
                Call::Start,
                Call::Load(0x02),
                Call::Reply(true),
                Call::Load(0x00),
                Call::Reply(true),
                Call::Load(0x02),
                Call::Reply(true),
                Call::Stop,
            ]
        );
        assert_eq!(engine.state(), BusState::Ready);
        let done = engine.poll().unwrap();
        assert_eq!(done.transferred, 2);
        assert_eq!(done.direction, Direction::Transmit);
        // Outcome is handed out once
        assert!(matches!(engine.poll(), Err(nb::Error::WouldBlock)));
    }

    #[test]
    fn test_start_while_busy_is_rejected() {
        let mut engine = engine();
        engine.start_write(0x01, &[1], true).unwrap();
        assert_eq!(engine.start_read(0x01, 1, true), Err(StartError::Busy));
        assert_eq!(engine.start_write(0x01, &[1], true), Err(StartError::Busy));
    }

    #[test]
    fn test_invalid_lengths() {
        let mut engine = engine();
        assert_eq!(
            engine.start_write(0x01, &[0u8; BUFFER_LENGTH + 1], true),
            Err(StartError::InvalidLength)
        );
        assert_eq!(engine.start_read(0x01, 0, true), Err(StartError::InvalidLength));
        assert_eq!(
            engine.start_read(0x01, BUFFER_LENGTH + 1, true),
            Err(StartError::InvalidLength)
        );
        assert_eq!(engine.state(), BusState::Ready);
    }

    #[test]
    fn test_address_nack_forces_stop() {
        let mut engine = engine();
        engine.start_write(0x42, &[1, 2], true).unwrap();
        run(&mut engine, &[BusStatus::StartSent, BusStatus::WriteAddressNacked]);

        assert_eq!(engine.hw.calls.last(), Some(&Call::Stop));
        assert_eq!(engine.state(), BusState::Ready);
        assert_eq!(engine.poll(), Err(nb::Error::Other(TransferError::AddressNack)));
        assert_eq!(engine.stats().nacks, 1);
    }

    #[test]
    fn test_data_nack_classified() {
        let mut engine = engine();
        engine.start_write(0x01, &[1, 2], true).unwrap();
        run(
            &mut engine,
            &[
                BusStatus::StartSent,
                BusStatus::WriteAddressAcked,
                BusStatus::WriteDataNacked,
            ],
        );
        assert_eq!(engine.poll(), Err(nb::Error::Other(TransferError::DataNack)));
    }

    #[test]
    fn test_arbitration_lost_releases_without_stop() {
        let mut engine = engine();
        engine.start_write(0x01, &[1], true).unwrap();
        run(&mut engine, &[BusStatus::StartSent, BusStatus::ArbitrationLost]);

        assert_eq!(engine.hw.calls.last(), Some(&Call::Release));
        assert!(!engine.hw.calls.contains(&Call::Stop));
        assert_eq!(
            engine.poll(),
            Err(nb::Error::Other(TransferError::ArbitrationLost))
        );
        assert_eq!(engine.state(), BusState::Ready);
    }

    #[test]
    fn test_controller_read_acks_all_but_last() {
        let mut engine = engine();
        engine.hw.received.extend([0xA1, 0xA2, 0xA3]);
        engine.start_read(0x01, 3, true).unwrap();
        assert_eq!(engine.state(), BusState::ControllerRx);

        run(
            &mut engine,
            &[
                BusStatus::StartSent,
                BusStatus::ReadAddressAcked,
                BusStatus::ReadDataAcked,
                BusStatus::ReadDataAcked,
                BusStatus::ReadDataNacked,
            ],
        );

        assert_eq!(
            engine.hw.calls,
            [
                Call::Start,
                Call::Load(0x03),
                Call::Reply(true),
                Call::Reply(true),
                Call::Reply(true),
                Call::PrepareEnd(true),
                Call::Reply(false),
                Call::Stop,
            ]
        );
        let done = engine.poll().unwrap();
        assert_eq!(done.data.as_slice(), &[0xA1, 0xA2, 0xA3]);
        assert_eq!(done.transferred, 3);
    }

    #[test]
    fn test_single_byte_read_nacks_immediately() {
        let mut engine = engine();
        engine.hw.received.push_back(0x03);
        engine.start_read(0x01, 1, true).unwrap();
        run(
            &mut engine,
            &[
                BusStatus::StartSent,
                BusStatus::ReadAddressAcked,
                BusStatus::ReadDataNacked,
            ],
        );
        assert!(engine.hw.calls.contains(&Call::Reply(false)));
        assert_eq!(engine.poll().unwrap().data.as_slice(), &[0x03]);
    }

    #[test]
    fn test_unterminated_write_holds_bus_for_repeated_start() {
        let mut engine = engine();
        engine.start_write(0x01, &[0x01], false).unwrap();
        run(
            &mut engine,
            &[
                BusStatus::StartSent,
                BusStatus::WriteAddressAcked,
                BusStatus::WriteDataAcked,
            ],
        );
        assert_eq!(engine.hw.calls.last(), Some(&Call::Hold));
        assert!(engine.is_holding_bus());
        assert_eq!(engine.state(), BusState::Ready);
        assert!(engine.poll().is_ok());

        engine.hw.received.push_back(0x55);
        engine.start_read(0x01, 1, true).unwrap();
        assert!(!engine.is_holding_bus());
        run(
            &mut engine,
            &[
                BusStatus::RepeatedStartSent,
                BusStatus::ReadAddressAcked,
                BusStatus::ReadDataNacked,
            ],
        );
        assert_eq!(engine.poll().unwrap().data.as_slice(), &[0x55]);
    }

    #[test]
    fn test_peripheral_receive_delivers_on_stop() {
        let mut engine = engine();
        engine.hw.received.extend([0x00, 0x02]);
        run(
            &mut engine,
            &[
                BusStatus::AddressedAsReceiver,
                BusStatus::ReceivedDataAcked,
            ],
        );
        assert_eq!(engine.state(), BusState::PeripheralRx);
        assert!(engine.handler().received.is_empty());

        run(
            &mut engine,
            &[BusStatus::ReceivedDataAcked, BusStatus::StopReceived],
        );
        assert_eq!(engine.state(), BusState::Ready);
        assert_eq!(engine.handler().received, [std::vec![0x00, 0x02]]);
    }

    #[test]
    fn test_peripheral_receive_overflow_is_nacked() {
        let mut engine = engine();
        engine.hw.received.extend(0..=(BUFFER_LENGTH as u8));
        run(&mut engine, &[BusStatus::AddressedAsReceiver]);
        for _ in 0..=BUFFER_LENGTH {
            run(&mut engine, &[BusStatus::ReceivedDataAcked]);
        }
        assert_eq!(engine.hw.calls.last(), Some(&Call::Reply(false)));
        run(&mut engine, &[BusStatus::StopReceived]);
        assert_eq!(engine.handler().received[0].len(), BUFFER_LENGTH);
    }

    #[test]
    fn test_repeated_start_into_read_delivers_write_first() {
        let mut engine = engine();
        engine.handler_mut().response = std::vec![0xAB];
        engine.hw.received.push_back(0x05);
        run(
            &mut engine,
            &[
                BusStatus::AddressedAsReceiver,
                BusStatus::ReceivedDataAcked,
                BusStatus::AddressedAsTransmitter,
            ],
        );
        assert_eq!(engine.handler().received, [std::vec![0x05]]);
        assert_eq!(engine.state(), BusState::PeripheralTx);
        assert!(engine.hw.calls.contains(&Call::Load(0xAB)));
    }

    #[test]
    fn test_peripheral_transmit_streams_response() {
        let mut engine = engine();
        engine.handler_mut().response = std::vec![1, 2, 3];
        run(&mut engine, &[BusStatus::AddressedAsTransmitter]);
        assert_eq!(engine.state(), BusState::PeripheralTx);
        run(
            &mut engine,
            &[
                BusStatus::TransmittedDataAcked,
                BusStatus::TransmittedDataAcked,
                BusStatus::LastDataAcked,
            ],
        );
        assert_eq!(engine.state(), BusState::Ready);
        assert_eq!(
            engine.hw.calls,
            [
                Call::Load(1),
                Call::Reply(true),
                Call::Load(2),
                Call::Reply(true),
                Call::Load(3),
                Call::Reply(false),
                Call::Reply(true),
            ]
        );
    }

    #[test]
    fn test_empty_response_sends_placeholder() {
        let mut engine = engine();
        run(&mut engine, &[BusStatus::AddressedAsTransmitter]);
        assert_eq!(
            engine.hw.calls,
            [Call::Load(PLACEHOLDER_BYTE), Call::Reply(false)]
        );
    }

    #[test]
    fn test_bus_error_discards_peripheral_data() {
        let mut engine = engine();
        engine.hw.received.extend([0x01, 0x02]);
        run(
            &mut engine,
            &[
                BusStatus::AddressedAsReceiver,
                BusStatus::ReceivedDataAcked,
                BusStatus::ReceivedDataAcked,
                BusStatus::BusError,
            ],
        );
        assert_eq!(engine.state(), BusState::Ready);
        assert_eq!(engine.hw.calls.last(), Some(&Call::Stop));
        assert!(engine.handler().received.is_empty());
        // Nothing to report for a peripheral transfer
        assert!(matches!(engine.poll(), Err(nb::Error::WouldBlock)));
    }

    #[test]
    fn test_bus_error_fails_controller_transfer() {
        let mut engine = engine();
        engine.start_read(0x01, 4, true).unwrap();
        run(&mut engine, &[BusStatus::StartSent, BusStatus::BusError]);
        assert_eq!(engine.poll(), Err(nb::Error::Other(TransferError::BusError)));
        assert_eq!(engine.stats().bus_errors, 1);
    }

    #[test]
    fn test_addressed_during_controller_transfer_loses_arbitration() {
        let mut engine = engine();
        engine.start_write(0x02, &[1], true).unwrap();
        run(
            &mut engine,
            &[BusStatus::StartSent, BusStatus::AddressedAsReceiver],
        );
        assert_eq!(engine.state(), BusState::PeripheralRx);
        assert_eq!(
            engine.poll(),
            Err(nb::Error::Other(TransferError::ArbitrationLost))
        );
    }

    #[test]
    fn test_recover_returns_to_ready() {
        let mut engine = engine();
        engine.start_write(0x01, &[1], false).unwrap();
        engine.recover();
        assert_eq!(engine.state(), BusState::Ready);
        assert_eq!(engine.hw.calls.last(), Some(&Call::Stop));
        assert!(matches!(engine.poll(), Err(nb::Error::WouldBlock)));
        assert_eq!(engine.stats().recoveries, 1);
    }

    #[test]
    fn test_exactly_one_state_through_a_read() {
        let mut engine = engine();
        engine.hw.received.extend([1, 2]);
        engine.start_read(0x01, 2, true).unwrap();
        let script = [
            BusStatus::StartSent,
            BusStatus::ReadAddressAcked,
            BusStatus::ReadDataAcked,
            BusStatus::ReadDataNacked,
        ];
        let mut seen = Vec::new();
        for status in script {
            engine.on_status(status);
            seen.push(engine.state());
        }
        assert_eq!(
            seen,
            [
                BusState::ControllerRx,
                BusState::ControllerRx,
                BusState::ControllerRx,
                BusState::Ready,
            ]
        );
    }
}
