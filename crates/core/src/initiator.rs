// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Bus initiator that exercises a UART the way polling driver firmware does.

use crate::lock;
use crate::peripherals::uart::{UartStatus, RX_DATA, STATUS, TX_DATA};
use crate::sim::{Context, Kernel, Process, SimTime, Wait};
use crate::tlm::{Command, ResponseStatus, Target, Transaction};
use labwired_uart_config::{Stimulus, StimulusMode};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// What the driver did, shared with whoever spawned it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    /// Bytes the UART accepted, in write order.
    pub written: Vec<u8>,
    /// Bytes the UART refused with a command error (burst mode only).
    pub rejected: Vec<u8>,
    /// Bytes read back from the RX data register.
    pub received: Vec<u8>,
    pub command_errors: u64,
    /// Set when the driver aborted on an error response.
    pub fatal: Option<String>,
    pub finished_at: Option<SimTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitTxReady { index: usize },
    Write { index: usize },
    Settle,
    AwaitRxReady,
    ReadRx,
    Finished,
}

pub struct PolledDriver {
    name: String,
    bus: Box<dyn Target>,
    base: u64,
    payload: Vec<u8>,
    mode: StimulusMode,
    poll_interval: SimTime,
    phase: Phase,
    accepted: usize,
    read: usize,
    report: Arc<Mutex<DriverReport>>,
}

impl PolledDriver {
    /// `base` is the bus address of the UART's register window.
    pub fn new(
        name: &str,
        bus: Box<dyn Target>,
        base: u64,
        payload: Vec<u8>,
        stimulus: &Stimulus,
    ) -> Self {
        Self {
            name: name.to_string(),
            bus,
            base,
            payload,
            mode: stimulus.mode,
            poll_interval: SimTime::from_ns(stimulus.poll_interval_ns),
            phase: Phase::AwaitTxReady { index: 0 },
            accepted: 0,
            read: 0,
            report: Arc::new(Mutex::new(DriverReport::default())),
        }
    }

    pub fn report(&self) -> Arc<Mutex<DriverReport>> {
        self.report.clone()
    }

    fn transport(
        &mut self,
        command: Command,
        offset: u64,
        data: &mut [u8],
        delay: &mut SimTime,
    ) -> ResponseStatus {
        let mut trans = Transaction::new(command, self.base + offset, data);
        self.bus.b_transport(&mut trans, delay);
        trans.response()
    }

    fn read_status(&mut self, delay: &mut SimTime) -> Result<UartStatus, ResponseStatus> {
        let mut word = [0u8; 4];
        match self.transport(Command::Read, STATUS, &mut word, delay) {
            ResponseStatus::Ok => Ok(UartStatus::from_bits_truncate(u32::from_le_bytes(word))),
            other => Err(other),
        }
    }

    fn fail(&mut self, now: SimTime, what: &str, status: ResponseStatus) -> Wait {
        let message = format!("{} failed with {:?}", what, status);
        tracing::error!("@{} {}: {}", now, self.name, message);
        let mut report = lock(&self.report);
        report.fatal = Some(message);
        report.finished_at = Some(now);
        self.phase = Phase::Finished;
        Wait::Done
    }

    /// Every write lands in one scheduling step; the access latencies are
    /// accumulated and honoured once at the end.
    fn write_burst(&mut self) -> Wait {
        let mut delay = SimTime::ZERO;
        for byte in self.payload.clone() {
            match self.transport(Command::Write, TX_DATA, &mut [byte], &mut delay) {
                ResponseStatus::Ok => {
                    self.accepted += 1;
                    lock(&self.report).written.push(byte);
                }
                _ => {
                    let mut report = lock(&self.report);
                    report.rejected.push(byte);
                    report.command_errors += 1;
                }
            }
        }
        self.phase = Phase::Settle;
        Wait::For(delay)
    }
}

/// Advance `kernel` in `step` slices until the driver behind `report` has
/// finished (or aborted), or `limit` of simulated time has passed.
///
/// Returns `true` if the driver finished.
pub fn run_until_finished(
    kernel: &mut Kernel,
    report: &Arc<Mutex<DriverReport>>,
    step: SimTime,
    limit: SimTime,
) -> bool {
    let step = step.max(SimTime::from_ps(1));
    let deadline = kernel.now() + limit;
    loop {
        if lock(report).finished_at.is_some() {
            return true;
        }
        if kernel.now() >= deadline {
            return false;
        }
        kernel.run_until((kernel.now() + step).min(deadline));
    }
}

impl Process for PolledDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, cx: &Context) -> Wait {
        let now = cx.now();
        loop {
            match self.phase {
                Phase::AwaitTxReady { index } => {
                    if index >= self.payload.len() {
                        self.phase = Phase::Settle;
                        continue;
                    }
                    if self.mode == StimulusMode::Burst {
                        return self.write_burst();
                    }

                    let mut delay = SimTime::ZERO;
                    match self.read_status(&mut delay) {
                        Ok(status) if status.contains(UartStatus::TX_READY) => {
                            self.phase = Phase::Write { index };
                            if !delay.is_zero() {
                                return Wait::For(delay);
                            }
                        }
                        Ok(_) => return Wait::For(delay + self.poll_interval),
                        Err(resp) => return self.fail(now, "status read", resp),
                    }
                }
                Phase::Write { index } => {
                    let byte = self.payload[index];
                    let mut delay = SimTime::ZERO;
                    let resp = self.transport(Command::Write, TX_DATA, &mut [byte], &mut delay);
                    if !resp.is_ok() {
                        lock(&self.report).command_errors +=
                            u64::from(resp == ResponseStatus::CommandError);
                        return self.fail(now, "TX write", resp);
                    }
                    self.accepted += 1;
                    lock(&self.report).written.push(byte);
                    tracing::info!("@{} {} wrote TX: {:?}", now, self.name, byte as char);

                    self.phase = Phase::AwaitTxReady { index: index + 1 };
                    return Wait::For(delay);
                }
                Phase::Settle => {
                    self.phase = Phase::AwaitRxReady;
                    return Wait::For(self.poll_interval);
                }
                Phase::AwaitRxReady => {
                    if self.read >= self.accepted {
                        lock(&self.report).finished_at = Some(now);
                        self.phase = Phase::Finished;
                        continue;
                    }

                    let mut delay = SimTime::ZERO;
                    match self.read_status(&mut delay) {
                        Ok(status) if status.contains(UartStatus::RX_READY) => {
                            self.phase = Phase::ReadRx;
                            if !delay.is_zero() {
                                return Wait::For(delay);
                            }
                        }
                        Ok(_) => return Wait::For(delay + self.poll_interval),
                        Err(resp) => return self.fail(now, "status read", resp),
                    }
                }
                Phase::ReadRx => {
                    let mut data = [0u8];
                    let mut delay = SimTime::ZERO;
                    let resp = self.transport(Command::Read, RX_DATA, &mut data, &mut delay);
                    if !resp.is_ok() {
                        return self.fail(now, "RX read", resp);
                    }
                    self.read += 1;
                    lock(&self.report).received.push(data[0]);
                    tracing::info!("@{} {} read RX: {:?}", now, self.name, data[0] as char);

                    self.phase = Phase::AwaitRxReady;
                    return Wait::For(delay);
                }
                Phase::Finished => return Wait::Done,
            }
        }
    }
}
