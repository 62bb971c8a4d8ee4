//! Nudge - wake signal delivery for interactive agent processes
//!
//! A file mailbox (`.nudge/signals/<agent>.json`) plus a daemon that
//! notices pending signals, waits for the target process to go idle, and
//! injects a wake prompt into its stdin as a stream-json user message.

pub mod config;
pub mod controller;
pub mod inject;
pub mod payload;
pub mod process;
pub mod resolve;
pub mod signal;
pub mod supervisor;
pub mod target;

#[cfg(test)]
pub mod test_support;

pub use config::Config;
pub use controller::{AgentController, ControllerEvent, ControllerState};
pub use signal::{SignalMode, SignalStore, WakeSignal};
pub use supervisor::ControllerSupervisor;
