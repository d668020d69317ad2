//! Attitude node lifecycle
//!
//! The node's behavior is a function of its current state and the last
//! event. Transitions are explicit, finite and deterministic.

pub mod events;
pub mod machine;

pub use events::NodeEvent;
pub use machine::NodeState;
