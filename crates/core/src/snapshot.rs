// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::sim::SimTime;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UartSnapshot {
    pub name: String,
    pub bit_rate: f64,
    /// Picoseconds.
    pub bit_time: SimTime,
    /// Picoseconds.
    pub byte_time: SimTime,
    pub tx_pending: Vec<u8>,
    pub rx_pending: Vec<u8>,
    pub tx_busy: bool,
    pub tx_ready: bool,
    /// Status register value at the time of the snapshot.
    pub status: u32,
}
