//! Node state machine definition

use icaro_protocol::StatusCode;

use super::events::NodeEvent;

/// Attitude node states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeState {
    /// Booted, waiting for the controller to ask for calibration
    Initializing,
    /// Measuring sensor biases
    Calibrating,
    /// Calibrated, waiting for the start command
    ReadyToStart,
    /// Publishing attitude
    Running,
}

impl NodeState {
    /// Value register 0 holds in this state
    pub fn status(&self) -> StatusCode {
        match self {
            NodeState::Initializing => StatusCode::Initializing,
            NodeState::Calibrating => StatusCode::Calibrating,
            NodeState::ReadyToStart => StatusCode::ReadyToStart,
            NodeState::Running => StatusCode::Running,
        }
    }

    /// Check if attitude registers are kept up to date
    pub fn publishes_attitude(&self) -> bool {
        matches!(self, NodeState::ReadyToStart | NodeState::Running)
    }

    /// Check if `event` changes this state
    pub fn accepts(&self, event: NodeEvent) -> bool {
        self.transition(event) != *self
    }

    /// Process an event and return the next state
    pub fn transition(self, event: NodeEvent) -> Self {
        use NodeEvent::*;
        use NodeState::*;

        match (self, event) {
            // A restarted controller begins the handshake again
            (Initializing | ReadyToStart | Running, CalibrationRequested) => Calibrating,

            (Calibrating, CalibrationComplete) => ReadyToStart,
            (Calibrating, CalibrationFailed) => Initializing,

            (ReadyToStart, StartRequested) => Running,

            // Default: stay in current state
            _ => self,
        }
    }
}
