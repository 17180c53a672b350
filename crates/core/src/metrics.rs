// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::sim::SimTime;
use crate::tlm::{Command, ResponseStatus};
use crate::{lock, SimulationObserver};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub struct UartMetrics {
    transactions: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    address_errors: AtomicU64,
    command_errors: AtomicU64,
    bytes_transmitted: AtomicU64,
    rx_observations: AtomicU64,
    transmitted_by_uart: Mutex<HashMap<String, u64>>,
    last_transmit_at: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub transactions: u64,
    pub reads: u64,
    pub writes: u64,
    pub address_errors: u64,
    pub command_errors: u64,
    pub bytes_transmitted: u64,
    /// Receive-notifier wake-ups that found RX non-empty. The same byte is
    /// counted again if it is still queued at the next wake-up.
    pub rx_observations: u64,
    /// Simulated time of the most recent loopback delivery.
    pub last_transmit_at: SimTime,
}

impl Default for UartMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl UartMetrics {
    pub fn new() -> Self {
        Self {
            transactions: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            address_errors: AtomicU64::new(0),
            command_errors: AtomicU64::new(0),
            bytes_transmitted: AtomicU64::new(0),
            rx_observations: AtomicU64::new(0),
            transmitted_by_uart: Mutex::new(HashMap::new()),
            last_transmit_at: AtomicU64::new(0),
        }
    }

    pub fn get_transactions(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn get_command_errors(&self) -> u64 {
        self.command_errors.load(Ordering::SeqCst)
    }

    pub fn get_address_errors(&self) -> u64 {
        self.address_errors.load(Ordering::SeqCst)
    }

    pub fn get_bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted.load(Ordering::SeqCst)
    }

    pub fn get_transmitted(&self, uart: &str) -> u64 {
        lock(&self.transmitted_by_uart)
            .get(uart)
            .copied()
            .unwrap_or(0)
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            transactions: self.get_transactions(),
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            address_errors: self.get_address_errors(),
            command_errors: self.get_command_errors(),
            bytes_transmitted: self.get_bytes_transmitted(),
            rx_observations: self.rx_observations.load(Ordering::SeqCst),
            last_transmit_at: SimTime::from_ps(self.last_transmit_at.load(Ordering::SeqCst)),
        }
    }
}

impl SimulationObserver for UartMetrics {
    fn on_transaction(
        &self,
        _target: &str,
        command: Command,
        _address: u64,
        status: ResponseStatus,
    ) {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        match command {
            Command::Read => self.reads.fetch_add(1, Ordering::SeqCst),
            Command::Write => self.writes.fetch_add(1, Ordering::SeqCst),
            Command::Ignore => 0,
        };
        match status {
            ResponseStatus::AddressError => {
                self.address_errors.fetch_add(1, Ordering::SeqCst);
            }
            ResponseStatus::CommandError => {
                self.command_errors.fetch_add(1, Ordering::SeqCst);
            }
            ResponseStatus::Ok | ResponseStatus::Incomplete => {}
        }
    }

    fn on_byte_transmitted(&self, uart: &str, _byte: u8, at: SimTime) {
        self.bytes_transmitted.fetch_add(1, Ordering::SeqCst);
        self.last_transmit_at.store(at.as_ps(), Ordering::SeqCst);
        *lock(&self.transmitted_by_uart)
            .entry(uart.to_string())
            .or_insert(0) += 1;
    }

    fn on_byte_observed(&self, _uart: &str, _byte: u8, _at: SimTime) {
        self.rx_observations.fetch_add(1, Ordering::SeqCst);
    }
}
