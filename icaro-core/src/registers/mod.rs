//! Register file exposed by the attitude node
//!
//! The attitude node answers bus traffic from a [`RegisterFile`]. It is
//! written by two independent parties: the bus interrupt (controller
//! commands) and the main loop (status announcements and attitude
//! publication). All state is atomic so the file can live in a `static`
//! and be shared by reference with the bus engine.

mod file;

pub use file::RegisterFile;
