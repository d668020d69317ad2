//! Embassy async tasks
//!
//! The bus itself is interrupt driven; these tasks only feed the filter,
//! run the node state machine and report on the link.

pub mod bus_monitor;
pub mod node;
pub mod sensor;

pub use bus_monitor::bus_monitor_task;
pub use node::{node_task, Node};
pub use sensor::sensor_task;
