//! Attitude node main loop logic
//!
//! [`AttitudeNode`] is the thread-side owner of the register file. The bus
//! interrupt only stores what the controller writes; the node looks at
//! register 0 on every [`step`](AttitudeNode::step), accepts legal
//! commands, undoes illegal ones, runs calibration and publishes attitude.

use icaro_protocol::{AttitudeSample, StatusCode};

use crate::config::{CalibrationOffsets, NodeConfig};
use crate::registers::RegisterFile;
use crate::state::{NodeEvent, NodeState};
use crate::traits::clock::elapsed_ms;
use crate::traits::{CalibrationStore, FusionFilter, ImuCalibrator, SensorError};

/// What a single step did
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeActivity {
    /// Nothing to do yet
    Idle,
    /// Accepted a controller command
    Transitioned(NodeState),
    /// Undid a status byte the current state does not accept
    Rejected(u8),
    /// Calibration finished; `stored` is false if persisting failed
    Calibrated {
        offsets: CalibrationOffsets,
        stored: bool,
    },
    /// Calibration failed, back to `Initializing`
    CalibrationFailed(SensorError),
    /// New attitude sample in the register file
    Published(AttitudeSample),
}

/// Attitude node controller
pub struct AttitudeNode<'a, F, C, S> {
    registers: &'a RegisterFile,
    filter: F,
    calibrator: C,
    store: S,
    config: NodeConfig,
    state: NodeState,
    offsets: Option<CalibrationOffsets>,
    last_publish_ms: Option<u32>,
}

impl<'a, F, C, S> AttitudeNode<'a, F, C, S>
where
    F: FusionFilter,
    C: ImuCalibrator,
    S: CalibrationStore,
{
    pub fn new(
        registers: &'a RegisterFile,
        filter: F,
        calibrator: C,
        store: S,
        config: NodeConfig,
    ) -> Self {
        Self {
            registers,
            filter,
            calibrator,
            store,
            config,
            state: NodeState::Initializing,
            offsets: None,
            last_publish_ms: None,
        }
    }

    /// Announce `Initializing` and apply stored calibration, if any
    ///
    /// Stored offsets only seed the filter. The controller still has to
    /// run the handshake before the node reports ready.
    pub async fn start(&mut self) -> Result<Option<CalibrationOffsets>, S::Error> {
        self.state = NodeState::Initializing;
        self.registers.set_status(StatusCode::Initializing);

        let offsets = self.store.load().await?;
        if let Some(offsets) = offsets {
            self.filter.apply_calibration(&offsets);
            self.offsets = Some(offsets);
        }
        Ok(offsets)
    }

    /// Current state
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Offsets in use
    pub fn offsets(&self) -> Option<CalibrationOffsets> {
        self.offsets
    }

    /// Fusion filter
    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// Calibration store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one iteration of the main loop
    pub async fn step(&mut self, now_ms: u32) -> NodeActivity {
        let announced = self.state.status();
        let observed = self.registers.status_byte();

        if observed != announced.to_byte() {
            let event = StatusCode::from_byte(observed).and_then(NodeEvent::from_command);
            return match event {
                Some(event) if self.state.accepts(event) => {
                    self.state = self.state.transition(event);
                    NodeActivity::Transitioned(self.state)
                }
                _ => {
                    // A newer write wins over the revert
                    let _ = self.registers.compare_exchange_status(observed, announced);
                    NodeActivity::Rejected(observed)
                }
            };
        }

        if self.state == NodeState::Calibrating {
            return self.calibrate().await;
        }

        if self.state.publishes_attitude() && self.publish_due(now_ms) {
            let sample = self.filter.produce_attitude();
            self.registers.publish(&sample);
            self.last_publish_ms = Some(now_ms);
            return NodeActivity::Published(sample);
        }

        NodeActivity::Idle
    }

    async fn calibrate(&mut self) -> NodeActivity {
        let announced = self.state.status();
        match self.calibrator.calibrate().await {
            Ok(offsets) => {
                self.filter.apply_calibration(&offsets);
                self.offsets = Some(offsets);
                let stored = self.store.save(&offsets).await.is_ok();
                self.state = self.state.transition(NodeEvent::CalibrationComplete);
                let _ = self
                    .registers
                    .compare_exchange_status(announced.to_byte(), self.state.status());
                NodeActivity::Calibrated { offsets, stored }
            }
            Err(e) => {
                self.state = self.state.transition(NodeEvent::CalibrationFailed);
                let _ = self
                    .registers
                    .compare_exchange_status(announced.to_byte(), self.state.status());
                NodeActivity::CalibrationFailed(e)
            }
        }
    }

    fn publish_due(&self, now_ms: u32) -> bool {
        match self.last_publish_ms {
            Some(at) => elapsed_ms(now_ms, at) >= self.config.publish_interval_ms,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[derive(Default)]
    struct FakeFilter {
        sample: AttitudeSample,
        applied: Option<CalibrationOffsets>,
    }

    impl FusionFilter for FakeFilter {
        fn produce_attitude(&mut self) -> AttitudeSample {
            self.sample
        }

        fn apply_calibration(&mut self, offsets: &CalibrationOffsets) {
            self.applied = Some(*offsets);
        }
    }

    struct FakeCalibrator(Result<CalibrationOffsets, SensorError>);

    impl ImuCalibrator for FakeCalibrator {
        async fn calibrate(&mut self) -> Result<CalibrationOffsets, SensorError> {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeStore {
        stored: Option<CalibrationOffsets>,
        broken: bool,
    }

    impl CalibrationStore for FakeStore {
        type Error = ();

        async fn load(&mut self) -> Result<Option<CalibrationOffsets>, ()> {
            if self.broken {
                return Err(());
            }
            Ok(self.stored)
        }

        async fn save(&mut self, offsets: &CalibrationOffsets) -> Result<(), ()> {
            if self.broken {
                return Err(());
            }
            self.stored = Some(*offsets);
            Ok(())
        }
    }

    const OFFSETS: CalibrationOffsets = CalibrationOffsets::new([10, -20, 30], [1, 2, 3]);
    const LEVEL: AttitudeSample = AttitudeSample::new(0.5, -1.0, 90.0);

    type Node<'a> = AttitudeNode<'a, FakeFilter, FakeCalibrator, FakeStore>;

    fn node(registers: &RegisterFile) -> Node<'_> {
        node_with(registers, Ok(OFFSETS), FakeStore::default())
    }

    fn node_with(
        registers: &RegisterFile,
        calibration: Result<CalibrationOffsets, SensorError>,
        store: FakeStore,
    ) -> Node<'_> {
        let filter = FakeFilter {
            sample: LEVEL,
            applied: None,
        };
        AttitudeNode::new(
            registers,
            filter,
            FakeCalibrator(calibration),
            store,
            NodeConfig::default(),
        )
    }

    fn command(registers: &RegisterFile, status: StatusCode) {
        registers.receive(&[0, status.to_byte()]);
    }

    #[test]
    fn test_full_handshake() {
        let registers = RegisterFile::new();
        let mut node = node(&registers);
        assert_eq!(block_on(node.start()), Ok(None));
        assert_eq!(registers.status(), Some(StatusCode::Initializing));

        // Nothing published before calibration
        assert_eq!(block_on(node.step(0)), NodeActivity::Idle);
        assert_eq!(registers.generation(), 0);

        command(&registers, StatusCode::Calibrating);
        assert_eq!(
            block_on(node.step(1)),
            NodeActivity::Transitioned(NodeState::Calibrating)
        );
        assert_eq!(
            block_on(node.step(2)),
            NodeActivity::Calibrated {
                offsets: OFFSETS,
                stored: true
            }
        );
        assert_eq!(registers.status(), Some(StatusCode::ReadyToStart));
        assert_eq!(node.filter().applied, Some(OFFSETS));
        assert_eq!(node.store().stored, Some(OFFSETS));

        // Ready nodes already publish
        assert_eq!(block_on(node.step(3)), NodeActivity::Published(LEVEL));
        assert_eq!(registers.attitude(), LEVEL);

        command(&registers, StatusCode::Running);
        assert_eq!(
            block_on(node.step(4)),
            NodeActivity::Transitioned(NodeState::Running)
        );
        assert_eq!(registers.status(), Some(StatusCode::Running));
    }

    #[test]
    fn test_publish_interval() {
        let registers = RegisterFile::new();
        let mut node = node(&registers);
        block_on(node.start()).unwrap();
        command(&registers, StatusCode::Calibrating);
        block_on(node.step(0));
        block_on(node.step(0));

        assert_eq!(block_on(node.step(100)), NodeActivity::Published(LEVEL));
        assert_eq!(block_on(node.step(105)), NodeActivity::Idle);
        assert_eq!(block_on(node.step(110)), NodeActivity::Published(LEVEL));
        assert_eq!(registers.generation(), 2);
    }

    #[test]
    fn test_start_before_calibration_is_reverted() {
        let registers = RegisterFile::new();
        let mut node = node(&registers);
        block_on(node.start()).unwrap();

        command(&registers, StatusCode::Running);
        assert_eq!(
            block_on(node.step(0)),
            NodeActivity::Rejected(StatusCode::Running.to_byte())
        );
        assert_eq!(registers.status(), Some(StatusCode::Initializing));
        assert_eq!(node.state(), NodeState::Initializing);
    }

    #[test]
    fn test_unknown_status_is_reverted() {
        let registers = RegisterFile::new();
        let mut node = node(&registers);
        block_on(node.start()).unwrap();

        registers.receive(&[0, 0x77]);
        assert_eq!(block_on(node.step(0)), NodeActivity::Rejected(0x77));
        assert_eq!(registers.status(), Some(StatusCode::Initializing));
    }

    #[test]
    fn test_announcement_written_by_controller_is_reverted() {
        let registers = RegisterFile::new();
        let mut node = node(&registers);
        block_on(node.start()).unwrap();

        command(&registers, StatusCode::ReadyToStart);
        assert!(matches!(block_on(node.step(0)), NodeActivity::Rejected(_)));
        assert_eq!(registers.status(), Some(StatusCode::Initializing));
    }

    #[test]
    fn test_calibration_failure_returns_to_initializing() {
        let registers = RegisterFile::new();
        let mut node = node_with(
            &registers,
            Err(SensorError::NotStationary),
            FakeStore::default(),
        );
        block_on(node.start()).unwrap();

        command(&registers, StatusCode::Calibrating);
        block_on(node.step(0));
        assert_eq!(
            block_on(node.step(1)),
            NodeActivity::CalibrationFailed(SensorError::NotStationary)
        );
        assert_eq!(node.state(), NodeState::Initializing);
        assert_eq!(registers.status(), Some(StatusCode::Initializing));
    }

    #[test]
    fn test_store_failure_still_reports_ready() {
        let registers = RegisterFile::new();
        let store = FakeStore {
            stored: None,
            broken: true,
        };
        let mut node = node_with(&registers, Ok(OFFSETS), store);
        assert_eq!(block_on(node.start()), Err(()));

        command(&registers, StatusCode::Calibrating);
        block_on(node.step(0));
        assert_eq!(
            block_on(node.step(1)),
            NodeActivity::Calibrated {
                offsets: OFFSETS,
                stored: false
            }
        );
        assert_eq!(registers.status(), Some(StatusCode::ReadyToStart));
    }

    #[test]
    fn test_stored_offsets_seed_filter() {
        let registers = RegisterFile::new();
        let store = FakeStore {
            stored: Some(OFFSETS),
            broken: false,
        };
        let mut node = node_with(&registers, Ok(OFFSETS), store);
        assert_eq!(block_on(node.start()), Ok(Some(OFFSETS)));
        assert_eq!(node.filter().applied, Some(OFFSETS));
        // Still waits for the handshake
        assert_eq!(node.state(), NodeState::Initializing);
        assert_eq!(block_on(node.step(0)), NodeActivity::Idle);
    }

    #[test]
    fn test_recalibration_while_running() {
        let registers = RegisterFile::new();
        let mut node = node(&registers);
        block_on(node.start()).unwrap();
        command(&registers, StatusCode::Calibrating);
        block_on(node.step(0));
        block_on(node.step(0));
        command(&registers, StatusCode::Running);
        block_on(node.step(0));
        assert_eq!(node.state(), NodeState::Running);

        command(&registers, StatusCode::Calibrating);
        assert_eq!(
            block_on(node.step(1)),
            NodeActivity::Transitioned(NodeState::Calibrating)
        );
    }
}
