//! Deterministic two-node bus model
//!
//! [`SimBus`] connects two [`SimPort`]s, each implementing [`TwiHardware`],
//! so two complete engines can talk to each other on the host. A byte
//! only moves once both ends have answered the previous condition, the
//! same handshake the clock-stretching hardware enforces.
//!
//! ```text
//!   engine A ──► SimPort A ─┐                 ┌─ SimPort B ◄── engine B
//!                           └──► SimBus ◄─────┘
//!                      (phase, per-node event queues)
//! ```
//!
//! Faults are injected from the test: bus errors, lost arbitration and a
//! stalled bus that stops delivering conditions.

use core::cell::RefCell;

use heapless::Deque;
use icaro_hal::twi::{BusStatus, TwiConfig, TwiHardware};

use crate::twi::{PeripheralHandler, TwiEngine};

/// Byte seen by a controller that clocks past the peripheral's data
pub const IDLE_LINE: u8 = 0xFF;

/// Upper bound of conditions serviced by one [`pump`] call
const PUMP_LIMIT: usize = 1024;

const QUEUE_DEPTH: usize = 16;

/// One end of the simulated bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// START issued, address byte not sent yet
    Addressing { controller: Side },
    Writing { controller: Side },
    /// `drained` once the peripheral stopped supplying bytes
    Reading { controller: Side, drained: bool },
    /// Nobody answered the address, waiting for STOP
    Unanswered { controller: Side },
    /// Transfer ended without STOP
    Held { controller: Side, addressed: bool },
}

impl Phase {
    fn controller(&self) -> Option<Side> {
        match *self {
            Phase::Idle => None,
            Phase::Addressing { controller }
            | Phase::Writing { controller }
            | Phase::Reading { controller, .. }
            | Phase::Unanswered { controller }
            | Phase::Held { controller, .. } => Some(controller),
        }
    }

    /// Whether the controller's peer is currently addressed
    fn peer_addressed(&self) -> bool {
        matches!(
            self,
            Phase::Writing { .. } | Phase::Reading { .. } | Phase::Held { addressed: true, .. }
        )
    }
}

#[derive(Default)]
struct Node {
    enabled: bool,
    address: Option<u8>,
    general_call: bool,
    events: Deque<BusStatus, QUEUE_DEPTH>,
    data_in: u8,
    data_out: Option<u8>,
    reply: Option<bool>,
    lose_arbitration: bool,
}

impl Node {
    fn clear_handshake(&mut self) {
        self.data_out = None;
        self.reply = None;
    }

    fn answers(&self, address: u8, read: bool) -> bool {
        self.enabled
            && (self.address == Some(address) || (address == 0 && !read && self.general_call))
    }
}

struct SimState {
    nodes: [Node; 2],
    phase: Phase,
    stalled: bool,
}

impl SimState {
    fn node(&mut self, side: Side) -> &mut Node {
        &mut self.nodes[side.index()]
    }

    fn push(&mut self, side: Side, status: BusStatus) {
        // Overflow means a test stopped pumping; drop like a missed IRQ
        let _ = self.node(side).events.push_back(status);
    }

    fn start(&mut self, side: Side) {
        self.node(side).clear_handshake();
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Addressing { controller: side };
                self.push(side, BusStatus::StartSent);
            }
            Phase::Held {
                controller,
                addressed,
            } if controller == side => {
                if addressed {
                    self.push(side.other(), BusStatus::StopReceived);
                }
                self.phase = Phase::Addressing { controller: side };
                self.push(side, BusStatus::RepeatedStartSent);
            }
            // The other node owns the bus
            _ => self.push(side, BusStatus::ArbitrationLost),
        }
    }

    fn stop(&mut self, side: Side) {
        self.node(side).clear_handshake();
        if self.phase.controller() != Some(side) {
            return;
        }
        if self.phase.peer_addressed() {
            self.push(side.other(), BusStatus::StopReceived);
        }
        self.phase = Phase::Idle;
        self.node(side).events.clear();
    }

    fn hold(&mut self, side: Side) {
        self.node(side).clear_handshake();
        if self.phase.controller() != Some(side) {
            return;
        }
        self.phase = Phase::Held {
            controller: side,
            addressed: self.phase.peer_addressed(),
        };
    }

    fn release(&mut self, side: Side) {
        self.node(side).clear_handshake();
        if self.phase.controller() == Some(side) {
            self.phase = Phase::Idle;
        }
    }

    /// Move the next byte if both ends are ready
    fn advance(&mut self) {
        match self.phase {
            Phase::Addressing { controller } => self.send_address(controller),
            Phase::Writing { controller } => self.send_data(controller),
            Phase::Reading {
                controller,
                drained,
            } => self.receive_data(controller, drained),
            _ => {}
        }
    }

    fn send_address(&mut self, controller: Side) {
        let node = self.node(controller);
        let (Some(byte), Some(_)) = (node.data_out, node.reply) else {
            return;
        };
        let lose = core::mem::take(&mut node.lose_arbitration);
        let peripheral = controller.other();
        self.node(controller).clear_handshake();
        self.node(peripheral).clear_handshake();

        if lose {
            self.phase = Phase::Idle;
            self.push(controller, BusStatus::ArbitrationLost);
            return;
        }

        let address = byte >> 1;
        let read = byte & 1 == 1;
        let answered = self.node(peripheral).answers(address, read);
        match (answered, read) {
            (true, false) => {
                self.phase = Phase::Writing { controller };
                self.push(peripheral, BusStatus::AddressedAsReceiver);
                self.push(controller, BusStatus::WriteAddressAcked);
            }
            (true, true) => {
                self.phase = Phase::Reading {
                    controller,
                    drained: false,
                };
                self.push(peripheral, BusStatus::AddressedAsTransmitter);
                self.push(controller, BusStatus::ReadAddressAcked);
            }
            (false, read) => {
                self.phase = Phase::Unanswered { controller };
                let status = if read {
                    BusStatus::ReadAddressNacked
                } else {
                    BusStatus::WriteAddressNacked
                };
                self.push(controller, status);
            }
        }
    }

    fn send_data(&mut self, controller: Side) {
        let peripheral = controller.other();
        let (Some(byte), Some(_)) = (self.node(controller).data_out, self.node(controller).reply)
        else {
            return;
        };
        let Some(ack) = self.node(peripheral).reply else {
            return;
        };
        self.node(controller).clear_handshake();
        let receiver = self.node(peripheral);
        receiver.clear_handshake();
        receiver.data_in = byte;

        if ack {
            self.push(peripheral, BusStatus::ReceivedDataAcked);
            self.push(controller, BusStatus::WriteDataAcked);
        } else {
            self.push(peripheral, BusStatus::ReceivedDataNacked);
            self.push(controller, BusStatus::WriteDataNacked);
        }
    }

    fn receive_data(&mut self, controller: Side, drained: bool) {
        let peripheral = controller.other();
        let Some(ack) = self.node(controller).reply else {
            return;
        };
        let (byte, more) = if drained {
            (IDLE_LINE, false)
        } else {
            let sender = self.node(peripheral);
            match (sender.data_out, sender.reply) {
                (Some(byte), Some(more)) => (byte, more),
                _ => return,
            }
        };
        self.node(peripheral).clear_handshake();
        let receiver = self.node(controller);
        receiver.clear_handshake();
        receiver.data_in = byte;

        self.push(
            controller,
            if ack {
                BusStatus::ReadDataAcked
            } else {
                BusStatus::ReadDataNacked
            },
        );
        if drained {
            return;
        }
        let status = match (ack, more) {
            (true, true) => BusStatus::TransmittedDataAcked,
            (true, false) => BusStatus::LastDataAcked,
            (false, _) => BusStatus::TransmittedDataNacked,
        };
        if status != BusStatus::TransmittedDataAcked {
            self.phase = Phase::Reading {
                controller,
                drained: true,
            };
        }
        self.push(peripheral, status);
    }
}

/// Shared two-node bus
pub struct SimBus {
    state: RefCell<SimState>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(SimState {
                nodes: [Node::default(), Node::default()],
                phase: Phase::Idle,
                stalled: false,
            }),
        }
    }

    /// Hardware handles for both ends
    pub fn ports(&self) -> (SimPort<'_>, SimPort<'_>) {
        (self.port(Side::A), self.port(Side::B))
    }

    /// Hardware handle for one end
    pub fn port(&self, side: Side) -> SimPort<'_> {
        SimPort { bus: self, side }
    }

    /// No transfer in progress and nobody holding the bus
    pub fn is_idle(&self) -> bool {
        self.state.borrow().phase == Phase::Idle
    }

    /// Conditions queued for `side` and not yet serviced
    pub fn pending(&self, side: Side) -> usize {
        self.state.borrow().nodes[side.index()].events.len()
    }

    /// Stop delivering conditions to either node
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    /// Signal a misplaced START/STOP to every enabled node
    pub fn inject_bus_error(&self) {
        let mut state = self.state.borrow_mut();
        state.phase = Phase::Idle;
        for side in [Side::A, Side::B] {
            let node = state.node(side);
            node.clear_handshake();
            // The error replaces whatever was pending
            node.events.clear();
            if node.enabled {
                let _ = node.events.push_back(BusStatus::BusError);
            }
        }
    }

    /// Make `side` lose arbitration on its next address byte
    pub fn lose_next_arbitration(&self, side: Side) {
        self.state.borrow_mut().node(side).lose_arbitration = true;
    }
}

/// [`TwiHardware`] view of one end of a [`SimBus`]
pub struct SimPort<'a> {
    bus: &'a SimBus,
    side: Side,
}

impl SimPort<'_> {
    fn with<R>(&mut self, f: impl FnOnce(&mut SimState, Side) -> R) -> R {
        let mut state = self.bus.state.borrow_mut();
        f(&mut *state, self.side)
    }
}

impl TwiHardware for SimPort<'_> {
    fn enable(&mut self, config: &TwiConfig) {
        self.with(|state, side| {
            let node = state.node(side);
            node.enabled = true;
            node.address = config.own_address;
            node.general_call = config.general_call;
        });
    }

    fn disable(&mut self) {
        self.with(|state, side| {
            state.release(side);
            let node = state.node(side);
            node.enabled = false;
            node.events.clear();
        });
    }

    fn set_address(&mut self, address: u8) {
        self.with(|state, side| state.node(side).address = Some(address & 0x7F));
    }

    fn status(&mut self) -> Option<BusStatus> {
        self.with(|state, side| {
            if state.stalled {
                return None;
            }
            state.node(side).events.pop_front()
        })
    }

    fn read_data(&mut self) -> u8 {
        self.with(|state, side| state.node(side).data_in)
    }

    fn load_data(&mut self, byte: u8) {
        self.with(|state, side| {
            state.node(side).data_out = Some(byte);
            state.advance();
        });
    }

    fn reply(&mut self, ack: bool) {
        self.with(|state, side| {
            state.node(side).reply = Some(ack);
            state.advance();
        });
    }

    fn start(&mut self) {
        self.with(|state, side| state.start(side));
    }

    fn stop(&mut self) {
        self.with(|state, side| state.stop(side));
    }

    fn hold_bus(&mut self) {
        self.with(|state, side| state.hold(side));
    }

    fn release(&mut self) {
        self.with(|state, side| state.release(side));
    }
}

/// Service both engines until neither has a pending condition
///
/// Returns the number of conditions serviced.
pub fn pump<A, PA, B, PB>(a: &mut TwiEngine<A, PA>, b: &mut TwiEngine<B, PB>) -> usize
where
    A: TwiHardware,
    PA: PeripheralHandler,
    B: TwiHardware,
    PB: PeripheralHandler,
{
    let mut serviced = 0;
    while serviced < PUMP_LIMIT {
        let a_busy = a.on_interrupt();
        let b_busy = b.on_interrupt();
        if !a_busy && !b_busy {
            break;
        }
        serviced += a_busy as usize + b_busy as usize;
    }
    serviced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterFile;
    use crate::twi::{BusState, NoPeripheral, TransferError, Wire};
    use icaro_protocol::registers::{ROLL_ADDRESS, STATUS_ADDRESS};
    use icaro_protocol::{AttitudeSample, RegisterWrite, StatusCode, IMU_ADDRESS};

    type Controller<'a> = Wire<SimPort<'a>, NoPeripheral>;
    type Peripheral<'a> = TwiEngine<SimPort<'a>, &'a RegisterFile>;

    fn nodes<'a>(bus: &'a SimBus, file: &'a RegisterFile) -> (Controller<'a>, Peripheral<'a>) {
        let (a, b) = bus.ports();
        let mut controller = Wire::with_handler(a, NoPeripheral);
        controller.init(&TwiConfig::STANDARD);
        let mut peripheral = TwiEngine::new(b, file);
        peripheral.init(&TwiConfig::STANDARD.with_address(IMU_ADDRESS));
        (controller, peripheral)
    }

    fn drive<'a, T>(
        controller: &mut Controller<'a>,
        peripheral: &mut Peripheral<'a>,
        mut op: impl FnMut(&mut Controller<'a>) -> nb::Result<T, TransferError>,
    ) -> Result<T, TransferError> {
        for _ in 0..64 {
            match op(controller) {
                Ok(value) => return Ok(value),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {
                    pump(controller.engine_mut(), peripheral);
                }
            }
        }
        Err(TransferError::Timeout)
    }

    fn write<'a>(
        controller: &mut Controller<'a>,
        peripheral: &mut Peripheral<'a>,
        command: &RegisterWrite,
    ) -> Result<(), TransferError> {
        controller.begin_transmission(IMU_ADDRESS);
        controller.write_all(&command.encode());
        drive(controller, peripheral, |c| c.end_transmission(true))
    }

    #[test]
    fn test_status_command_reaches_register_file() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);

        write(
            &mut controller,
            &mut peripheral,
            &RegisterWrite::status(StatusCode::Calibrating),
        )
        .unwrap();

        assert_eq!(file.status(), Some(StatusCode::Calibrating));
        assert!(bus.is_idle());
        assert_eq!(peripheral.state(), BusState::Ready);
    }

    #[test]
    fn test_attitude_read_with_register_pointer() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);
        file.publish(&AttitudeSample::new(1.5, -2.25, 0.0));

        let count = drive(&mut controller, &mut peripheral, |c| {
            c.request_from(IMU_ADDRESS, 12, Some(ROLL_ADDRESS), true)
        })
        .unwrap();

        assert_eq!(count, 12);
        let mut bytes = [0u8; 12];
        assert_eq!(controller.read_into(&mut bytes), 12);
        assert_eq!(
            AttitudeSample::from_bytes(&bytes),
            AttitudeSample::new(1.5, -2.25, 0.0)
        );
        assert_eq!(controller.read(), None);
        assert!(bus.is_idle());
    }

    #[test]
    fn test_status_poll() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);
        file.set_status(StatusCode::ReadyToStart);

        drive(&mut controller, &mut peripheral, |c| {
            c.request_from(IMU_ADDRESS, 1, Some(STATUS_ADDRESS), true)
        })
        .unwrap();
        assert_eq!(controller.read(), Some(StatusCode::ReadyToStart.to_byte()));
    }

    #[test]
    fn test_read_past_file_end_sees_idle_line() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);

        drive(&mut controller, &mut peripheral, |c| {
            c.request_from(IMU_ADDRESS, 4, Some(11), true)
        })
        .unwrap();
        let mut bytes = [0u8; 4];
        controller.read_into(&mut bytes);
        assert_eq!(&bytes[2..], &[IDLE_LINE, IDLE_LINE]);
    }

    #[test]
    fn test_unknown_address_is_nacked() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);

        controller.begin_transmission(0x42);
        controller.write(0x00);
        let result = drive(&mut controller, &mut peripheral, |c| c.end_transmission(true));
        assert_eq!(result, Err(TransferError::AddressNack));
        assert!(bus.is_idle());

        // Bus is usable again
        write(
            &mut controller,
            &mut peripheral,
            &RegisterWrite::status(StatusCode::Running),
        )
        .unwrap();
        assert_eq!(file.status(), Some(StatusCode::Running));
    }

    #[test]
    fn test_lost_arbitration_then_retry() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);

        bus.lose_next_arbitration(Side::A);
        let command = RegisterWrite::status(StatusCode::Calibrating);
        assert_eq!(
            write(&mut controller, &mut peripheral, &command),
            Err(TransferError::ArbitrationLost)
        );
        assert_eq!(file.status(), Some(StatusCode::Initializing));

        write(&mut controller, &mut peripheral, &command).unwrap();
        assert_eq!(file.status(), Some(StatusCode::Calibrating));
    }

    #[test]
    fn test_bus_error_discards_partial_write() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);

        controller.begin_transmission(IMU_ADDRESS);
        controller.write_all(&[STATUS_ADDRESS, StatusCode::Running.to_byte()]);
        assert!(matches!(
            controller.end_transmission(true),
            Err(nb::Error::WouldBlock)
        ));
        // Let the address and first byte through, then break the bus
        for _ in 0..2 {
            controller.on_interrupt();
            peripheral.on_interrupt();
        }
        bus.inject_bus_error();
        let result = drive(&mut controller, &mut peripheral, |c| c.end_transmission(true));

        assert_eq!(result, Err(TransferError::BusError));
        assert_eq!(file.status(), Some(StatusCode::Initializing));
        assert_eq!(peripheral.state(), BusState::Ready);
        assert_eq!(controller.state(), BusState::Ready);
    }

    #[test]
    fn test_stalled_bus_recovers() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);

        bus.set_stalled(true);
        let result = drive(&mut controller, &mut peripheral, |c| {
            c.request_from(IMU_ADDRESS, 12, Some(ROLL_ADDRESS), true)
        });
        assert_eq!(result, Err(TransferError::Timeout));

        controller.recover();
        bus.set_stalled(false);
        pump(controller.engine_mut(), &mut peripheral);
        assert!(bus.is_idle());
        assert_eq!(controller.engine().stats().recoveries, 1);

        let count = drive(&mut controller, &mut peripheral, |c| {
            c.request_from(IMU_ADDRESS, 12, Some(ROLL_ADDRESS), true)
        })
        .unwrap();
        assert_eq!(count, 12);
    }

    #[test]
    fn test_partial_write_reads_back() {
        let bus = SimBus::new();
        let file = RegisterFile::new();
        let (mut controller, mut peripheral) = nodes(&bus, &file);

        let values = [0x11, 0x22, 0x33, 0x44, 0x55];
        write(
            &mut controller,
            &mut peripheral,
            &RegisterWrite::new(ROLL_ADDRESS, &values).unwrap(),
        )
        .unwrap();
        drive(&mut controller, &mut peripheral, |c| {
            c.request_from(IMU_ADDRESS, 12, Some(ROLL_ADDRESS), true)
        })
        .unwrap();

        let mut bytes = [0u8; 12];
        controller.read_into(&mut bytes);
        assert_eq!(&bytes[..5], &values);
    }
}
