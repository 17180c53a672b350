// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::sim::{Clock, Context, Event, Kernel, Process, SimTime, Wait};
use crate::snapshot::UartSnapshot;
use crate::timing::UartTiming;
use crate::tlm::{Command, ResponseStatus, Target, Transaction};
use crate::{lock, SimResult, SimulationObserver};
use labwired_uart_config::{UartConfig, WritePolicy};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// TX data register (write).
pub const TX_DATA: u64 = 0x00;
/// RX data register (read).
pub const RX_DATA: u64 = 0x04;
/// Status register (read).
pub const STATUS: u64 = 0x08;
/// Bus window a UART instance occupies.
pub const REGISTER_WINDOW: u64 = 0x10;

pub const DEFAULT_ACCESS_LATENCY: SimTime = SimTime::from_ns(10);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UartStatus: u32 {
        const RX_READY = 1 << 0;
        const TX_READY = 1 << 1;
        const TX_BUSY = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    TxData,
    RxData,
    Status,
}

impl Register {
    fn decode(offset: u64) -> Option<Self> {
        match offset {
            TX_DATA => Some(Self::TxData),
            RX_DATA => Some(Self::RxData),
            STATUS => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct UartState {
    tx_queue: VecDeque<u8>,
    rx_queue: VecDeque<u8>,
    tx_busy: bool,
    tx_ready: bool,
}

impl UartState {
    fn new() -> Self {
        Self {
            tx_queue: VecDeque::new(),
            rx_queue: VecDeque::new(),
            tx_busy: false,
            tx_ready: true,
        }
    }

    fn status(&self) -> UartStatus {
        let mut status = UartStatus::empty();
        status.set(UartStatus::RX_READY, !self.rx_queue.is_empty());
        status.set(UartStatus::TX_READY, self.tx_ready);
        status.set(UartStatus::TX_BUSY, self.tx_busy);
        status
    }
}

/// Construction parameters beyond the bit rate.
#[derive(Debug, Clone)]
pub struct UartOptions {
    pub access_latency: SimTime,
    pub write_policy: WritePolicy,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
}

impl Default for UartOptions {
    fn default() -> Self {
        Self {
            access_latency: DEFAULT_ACCESS_LATENCY,
            write_policy: WritePolicy::default(),
            observers: Vec::new(),
        }
    }
}

/// Loopback UART with a timed transmitter.
///
/// Writes to [`TX_DATA`] queue a byte for the transmit process, which spends
/// one frame time per byte on the wire and then delivers it to the RX queue.
/// Reads of [`RX_DATA`] consume received bytes; [`STATUS`] is recomputed on
/// every read.
#[derive(Debug)]
pub struct Uart {
    name: String,
    timing: UartTiming,
    access_latency: SimTime,
    write_policy: WritePolicy,
    state: Arc<Mutex<UartState>>,
    tx_event: Event,
    clock: Clock,
    observers: Vec<Arc<dyn SimulationObserver>>,
}

impl Uart {
    /// UART at the default 115200 bit/s.
    pub fn new(kernel: &mut Kernel, name: &str) -> Self {
        Self::build(kernel, name, UartTiming::default(), UartOptions::default())
    }

    pub fn with_bit_rate(
        kernel: &mut Kernel,
        name: &str,
        bit_rate: f64,
        options: UartOptions,
    ) -> SimResult<Self> {
        let timing = UartTiming::new(bit_rate)?;
        Ok(Self::build(kernel, name, timing, options))
    }

    pub fn from_config(
        kernel: &mut Kernel,
        cfg: &UartConfig,
        observers: Vec<Arc<dyn SimulationObserver>>,
    ) -> SimResult<Self> {
        Self::with_bit_rate(
            kernel,
            &cfg.name,
            cfg.bit_rate,
            UartOptions {
                access_latency: SimTime::from_ns(cfg.access_latency_ns),
                write_policy: cfg.write_policy,
                observers,
            },
        )
    }

    /// Create the shared state and start both background processes.
    fn build(kernel: &mut Kernel, name: &str, timing: UartTiming, options: UartOptions) -> Self {
        let state = Arc::new(Mutex::new(UartState::new()));
        let tx_event = kernel.event();
        let rx_event = kernel.event();

        kernel.spawn(Box::new(TransmitProcess {
            name: format!("{}.tx", name),
            uart: name.to_string(),
            state: state.clone(),
            tx_event: tx_event.clone(),
            rx_event: rx_event.clone(),
            byte_time: timing.byte_time(),
            phase: TxPhase::Idle,
            observers: options.observers.clone(),
        }));
        kernel.spawn(Box::new(ReceiveNotifier {
            name: format!("{}.rx", name),
            uart: name.to_string(),
            state: state.clone(),
            rx_event,
            observers: options.observers.clone(),
        }));

        tracing::debug!(
            "UART '{}' at {} bit/s, byte time {}",
            name,
            timing.bit_rate(),
            timing.byte_time()
        );

        Self {
            name: name.to_string(),
            timing,
            access_latency: options.access_latency,
            write_policy: options.write_policy,
            state,
            tx_event,
            clock: kernel.clock(),
            observers: options.observers,
        }
    }

    pub fn timing(&self) -> &UartTiming {
        &self.timing
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn status(&self) -> UartStatus {
        lock(&self.state).status()
    }

    /// A handle that can inspect this UART after it has been moved onto a bus.
    pub fn probe(&self) -> UartProbe {
        UartProbe {
            name: self.name.clone(),
            timing: self.timing,
            state: self.state.clone(),
        }
    }

    fn access(&self, trans: &mut Transaction<'_>, delay: &mut SimTime) -> ResponseStatus {
        let Some(register) = Register::decode(trans.address()) else {
            return ResponseStatus::AddressError;
        };

        let status = match (register, trans.command()) {
            (_, Command::Ignore) => return ResponseStatus::CommandError,
            (Register::TxData, Command::Write) => self.write_tx(trans),
            (Register::RxData, Command::Read) => self.read_rx(trans),
            (Register::Status, Command::Read) => self.read_status(trans),
            // Wrong direction for the register: nothing is mapped there.
            _ => return ResponseStatus::AddressError,
        };

        if status.is_ok() {
            *delay += self.access_latency;
        }
        status
    }

    fn write_tx(&self, trans: &Transaction<'_>) -> ResponseStatus {
        let &[byte] = trans.data() else {
            return ResponseStatus::CommandError;
        };

        {
            let mut state = lock(&self.state);
            if self.write_policy == WritePolicy::RejectWhileBusy && !state.tx_ready {
                return ResponseStatus::CommandError;
            }
            state.tx_queue.push_back(byte);
        }
        self.tx_event.notify();

        tracing::debug!("@{} {} TX write: {:#04x}", self.clock.now(), self.name, byte);
        ResponseStatus::Ok
    }

    fn read_rx(&self, trans: &mut Transaction<'_>) -> ResponseStatus {
        let [slot] = trans.data_mut() else {
            return ResponseStatus::CommandError;
        };
        *slot = lock(&self.state).rx_queue.pop_front().unwrap_or(0);
        ResponseStatus::Ok
    }

    fn read_status(&self, trans: &mut Transaction<'_>) -> ResponseStatus {
        let word = self.status().bits().to_le_bytes();
        let data = trans.data_mut();
        let len = data.len().min(word.len());
        data[..len].copy_from_slice(&word[..len]);
        ResponseStatus::Ok
    }
}

impl Target for Uart {
    fn name(&self) -> &str {
        &self.name
    }

    fn b_transport(&mut self, trans: &mut Transaction<'_>, delay: &mut SimTime) {
        let status = self.access(trans, delay);
        trans.set_response(status);
        for observer in &self.observers {
            observer.on_transaction(&self.name, trans.command(), trans.address(), status);
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.probe().snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

/// Read-only access to a UART's queues and flags.
#[derive(Debug, Clone)]
pub struct UartProbe {
    name: String,
    timing: UartTiming,
    state: Arc<Mutex<UartState>>,
}

impl UartProbe {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> UartStatus {
        lock(&self.state).status()
    }

    pub fn tx_pending(&self) -> Vec<u8> {
        lock(&self.state).tx_queue.iter().copied().collect()
    }

    pub fn rx_pending(&self) -> Vec<u8> {
        lock(&self.state).rx_queue.iter().copied().collect()
    }

    pub fn snapshot(&self) -> UartSnapshot {
        let state = lock(&self.state);
        UartSnapshot {
            name: self.name.clone(),
            bit_rate: self.timing.bit_rate(),
            bit_time: self.timing.bit_time(),
            byte_time: self.timing.byte_time(),
            tx_pending: state.tx_queue.iter().copied().collect(),
            rx_pending: state.rx_queue.iter().copied().collect(),
            tx_busy: state.tx_busy,
            tx_ready: state.tx_ready,
            status: state.status().bits(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxPhase {
    /// Waiting for the TX queue to become non-empty.
    Idle,
    /// `byte` is on the wire until the current timed wait expires.
    Draining { byte: u8 },
}

struct TransmitProcess {
    name: String,
    uart: String,
    state: Arc<Mutex<UartState>>,
    tx_event: Event,
    rx_event: Event,
    byte_time: SimTime,
    phase: TxPhase,
    observers: Vec<Arc<dyn SimulationObserver>>,
}

impl Process for TransmitProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, cx: &Context) -> Wait {
        if let TxPhase::Draining { byte } = self.phase {
            lock(&self.state).rx_queue.push_back(byte);
            self.rx_event.notify();
            tracing::debug!("@{} {} RX(loopback): {:#04x}", cx.now(), self.uart, byte);
            for observer in &self.observers {
                observer.on_byte_transmitted(&self.uart, byte, cx.now());
            }
        }

        // The queue decides, not the wake-up reason: writes that landed while
        // the previous byte was on the wire are picked up here.
        let mut state = lock(&self.state);
        match state.tx_queue.pop_front() {
            Some(byte) => {
                state.tx_busy = true;
                state.tx_ready = false;
                self.phase = TxPhase::Draining { byte };
                Wait::For(self.byte_time)
            }
            None => {
                state.tx_busy = false;
                state.tx_ready = true;
                self.phase = TxPhase::Idle;
                self.tx_event.wait()
            }
        }
    }
}

struct ReceiveNotifier {
    name: String,
    uart: String,
    state: Arc<Mutex<UartState>>,
    rx_event: Event,
    observers: Vec<Arc<dyn SimulationObserver>>,
}

impl Process for ReceiveNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, cx: &Context) -> Wait {
        // Observe only; bytes are consumed exclusively through RX_DATA reads.
        let front = lock(&self.state).rx_queue.front().copied();
        if let Some(byte) = front {
            tracing::debug!("@{} {} RX ready: {:#04x}", cx.now(), self.uart, byte);
            for observer in &self.observers {
                observer.on_byte_observed(&self.uart, byte, cx.now());
            }
        }
        self.rx_event.wait()
    }
}
