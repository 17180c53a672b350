// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::sim::SimTime;
use crate::{SimResult, SimulationError};

pub const DEFAULT_BIT_RATE: f64 = 115_200.0;

/// 1 start + 8 data + 1 stop bit.
pub const BITS_PER_FRAME: u64 = 10;

/// Serial line timing derived from a bit rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UartTiming {
    bit_rate: f64,
    bit_time: SimTime,
    byte_time: SimTime,
}

impl Default for UartTiming {
    fn default() -> Self {
        // 115200 bit/s resolves to a non-zero bit time.
        Self::from_parts(DEFAULT_BIT_RATE, SimTime::from_ps(8_680_556))
    }
}

impl UartTiming {
    pub fn new(bit_rate: f64) -> SimResult<Self> {
        if !bit_rate.is_finite() || bit_rate <= 0.0 {
            return Err(SimulationError::InvalidBitRate(bit_rate));
        }
        let bit_time = SimTime::from_secs_f64(1.0 / bit_rate)
            .filter(|t| !t.is_zero())
            .ok_or(SimulationError::BitRateTooHigh(bit_rate))?;
        Ok(Self::from_parts(bit_rate, bit_time))
    }

    fn from_parts(bit_rate: f64, bit_time: SimTime) -> Self {
        Self {
            bit_rate,
            bit_time,
            byte_time: bit_time * BITS_PER_FRAME,
        }
    }

    pub fn bit_rate(&self) -> f64 {
        self.bit_rate
    }

    pub fn bit_time(&self) -> SimTime {
        self.bit_time
    }

    pub fn byte_time(&self) -> SimTime {
        self.byte_time
    }
}
