// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod initiator;
pub mod metrics;
pub mod peripherals;
pub mod sim;
pub mod snapshot;
pub mod timing;
pub mod tlm;

use std::sync::{Mutex, MutexGuard, PoisonError};

mod tests;

pub use sim::{Event, Kernel, Process, SimTime, Wait};
pub use tlm::{Command, ResponseStatus, Target, Transaction};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Bit rate must be a positive, finite number of bits per second (got {0})")]
    InvalidBitRate(f64),
    #[error("Bit rate {0} is too high for picosecond time resolution")]
    BitRateTooHigh(f64),
    #[error("Address window {base:#x}+{size:#x} for '{name}' overlaps '{existing}'")]
    OverlappingWindow {
        name: String,
        existing: String,
        base: u64,
        size: u64,
    },
    #[error("Address window for '{0}' is empty")]
    EmptyWindow(String),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self, _now: SimTime) {}
    fn on_transaction(
        &self,
        _target: &str,
        _command: Command,
        _address: u64,
        _status: ResponseStatus,
    ) {
    }
    fn on_byte_transmitted(&self, _uart: &str, _byte: u8, _at: SimTime) {}
    fn on_byte_observed(&self, _uart: &str, _byte: u8, _at: SimTime) {}
}

/// Lock shared simulation state, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
