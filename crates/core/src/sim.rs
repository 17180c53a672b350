// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Cooperative discrete-event kernel.
//!
//! Processes are explicit state machines. The kernel resumes one process at a
//! time; a process runs to its next suspension point and hands back a [`Wait`]
//! describing what should resume it. Nothing is preempted, so state shared
//! between processes is never touched by two of them at once.

use crate::{lock, SimulationObserver};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::ops::{Add, AddAssign, Mul};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const PS_PER_NS: u64 = 1_000;
const PS_PER_US: u64 = 1_000_000;
const PS_PER_MS: u64 = 1_000_000_000;
const PS_PER_SEC: u64 = 1_000_000_000_000;

/// Simulated time with picosecond resolution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_ps(ps: u64) -> Self {
        Self(ps)
    }

    pub const fn from_ns(ns: u64) -> Self {
        Self(ns.saturating_mul(PS_PER_NS))
    }

    pub const fn from_us(us: u64) -> Self {
        Self(us.saturating_mul(PS_PER_US))
    }

    pub const fn from_ms(ms: u64) -> Self {
        Self(ms.saturating_mul(PS_PER_MS))
    }

    /// Convert a duration in seconds, rounding to the nearest picosecond.
    ///
    /// Returns `None` for negative, non-finite or out-of-range values.
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let ps = (secs * PS_PER_SEC as f64).round();
        if ps >= u64::MAX as f64 {
            return None;
        }
        Some(Self(ps as u64))
    }

    pub const fn as_ps(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / PS_PER_SEC as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Add for SimTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Mul<u64> for SimTime {
    type Output = Self;

    fn mul(self, rhs: u64) -> Self {
        Self(self.0.saturating_mul(rhs))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, name, digits) = match self.0 {
            v if v >= PS_PER_SEC => (PS_PER_SEC, "s", 12),
            v if v >= PS_PER_MS => (PS_PER_MS, "ms", 9),
            v if v >= PS_PER_US => (PS_PER_US, "us", 6),
            v if v >= PS_PER_NS => (PS_PER_NS, "ns", 3),
            _ => return write!(f, "{} ps", self.0),
        };
        let whole = self.0 / unit;
        let frac = self.0 % unit;
        if frac == 0 {
            write!(f, "{} {}", whole, name)
        } else {
            let frac = format!("{:0width$}", frac, width = digits);
            write!(f, "{}.{} {}", whole, frac.trim_end_matches('0'), name)
        }
    }
}

/// Read-only view of the kernel's current time, for code that runs outside a
/// process (e.g. a transport call made by an initiator).
#[derive(Debug, Clone, Default)]
pub struct Clock(Arc<AtomicU64>);

impl Clock {
    pub fn now(&self) -> SimTime {
        SimTime(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, now: SimTime) {
        self.0.store(now.0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(usize);

/// A notifiable event.
///
/// `notify` is immediate: every process waiting on the event becomes runnable
/// in the current evaluation step. A notification with no waiter is dropped,
/// so a process must check its wake-up condition before it waits.
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    fired: Arc<Mutex<Vec<EventId>>>,
}

impl Event {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn notify(&self) {
        lock(&self.fired).push(self.id);
    }

    /// Suspension request for this event.
    pub fn wait(&self) -> Wait {
        Wait::Event(self.id)
    }
}

/// What a process is suspended on after returning from [`Process::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Event(EventId),
    /// Resume after the given amount of simulated time. Zero means the next
    /// evaluation step at the current time.
    For(SimTime),
    /// The process has finished and is removed from the kernel.
    Done,
}

pub struct Context {
    now: SimTime,
}

impl Context {
    pub fn now(&self) -> SimTime {
        self.now
    }
}

pub trait Process: Send {
    fn name(&self) -> &str;
    fn resume(&mut self, cx: &Context) -> Wait;
}

pub struct Kernel {
    now: SimTime,
    clock: Clock,
    processes: Vec<Option<Box<dyn Process>>>,
    runnable: VecDeque<ProcessId>,
    waiting: HashMap<EventId, Vec<ProcessId>>,
    timed: BinaryHeap<Reverse<(SimTime, u64, ProcessId)>>,
    seq: u64,
    next_event: usize,
    fired: Arc<Mutex<Vec<EventId>>>,
    observers: Vec<Arc<dyn SimulationObserver>>,
    started: bool,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            clock: Clock::default(),
            processes: Vec::new(),
            runnable: VecDeque::new(),
            waiting: HashMap::new(),
            timed: BinaryHeap::new(),
            seq: 0,
            next_event: 0,
            fired: Arc::new(Mutex::new(Vec::new())),
            observers: Vec::new(),
            started: false,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SimulationObserver>) {
        self.observers.push(observer);
    }

    pub fn event(&mut self) -> Event {
        let id = EventId(self.next_event);
        self.next_event += 1;
        Event {
            id,
            fired: self.fired.clone(),
        }
    }

    /// Register a process. It first runs at the current time, the next time the
    /// kernel evaluates.
    pub fn spawn(&mut self, process: Box<dyn Process>) -> ProcessId {
        let pid = ProcessId(self.processes.len());
        tracing::debug!("@{} spawn process '{}'", self.now, process.name());
        self.processes.push(Some(process));
        self.runnable.push_back(pid);
        pid
    }

    /// Number of processes that have not finished or been shut down.
    pub fn process_count(&self) -> usize {
        self.processes.iter().filter(|p| p.is_some()).count()
    }

    pub fn run_for(&mut self, duration: SimTime) {
        self.run_until(self.now + duration);
    }

    /// Run every activity scheduled up to and including `end`, then leave the
    /// clock at `end`.
    pub fn run_until(&mut self, end: SimTime) {
        if !self.started {
            self.started = true;
            tracing::info!("Simulation started");
            for observer in &self.observers {
                observer.on_simulation_start();
            }
        }

        loop {
            self.evaluate();

            let Some(&Reverse((at, _, _))) = self.timed.peek() else {
                break;
            };
            if at > end {
                break;
            }

            self.set_now(at);
            while let Some(&Reverse((t, _, pid))) = self.timed.peek() {
                if t != at {
                    break;
                }
                self.timed.pop();
                self.runnable.push_back(pid);
            }
        }

        if self.now < end {
            self.set_now(end);
        }
    }

    /// Cancel every process. Their state is dropped; pending waits are discarded.
    pub fn shutdown(&mut self) -> usize {
        let cancelled = self.process_count();
        for process in self.processes.iter_mut().filter_map(Option::take) {
            tracing::debug!("@{} stop process '{}'", self.now, process.name());
        }
        self.runnable.clear();
        self.waiting.clear();
        self.timed.clear();
        lock(&self.fired).clear();

        tracing::info!("Simulation stopped @{}", self.now);
        for observer in &self.observers {
            observer.on_simulation_stop(self.now);
        }
        cancelled
    }

    fn set_now(&mut self, now: SimTime) {
        self.now = now;
        self.clock.set(now);
    }

    fn evaluate(&mut self) {
        self.collect_notifications();
        while let Some(pid) = self.runnable.pop_front() {
            let cx = Context { now: self.now };
            let Some(process) = self.processes.get_mut(pid.0).and_then(Option::as_mut) else {
                continue;
            };

            match process.resume(&cx) {
                Wait::Event(event) => self.waiting.entry(event).or_default().push(pid),
                Wait::For(delay) if delay.is_zero() => self.runnable.push_back(pid),
                Wait::For(delay) => {
                    self.seq += 1;
                    self.timed.push(Reverse((self.now + delay, self.seq, pid)));
                }
                Wait::Done => {
                    if let Some(process) = self.processes[pid.0].take() {
                        tracing::debug!("@{} process '{}' finished", self.now, process.name());
                    }
                }
            }

            self.collect_notifications();
        }
    }

    fn collect_notifications(&mut self) {
        let fired = std::mem::take(&mut *lock(&self.fired));
        for event in fired {
            if let Some(waiters) = self.waiting.remove(&event) {
                self.runnable.extend(waiters);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ticker {
        period: SimTime,
        log: Arc<Mutex<Vec<(String, SimTime)>>>,
        label: String,
        remaining: u32,
    }

    impl Process for Ticker {
        fn name(&self) -> &str {
            &self.label
        }

        fn resume(&mut self, cx: &Context) -> Wait {
            self.log.lock().unwrap().push((self.label.clone(), cx.now()));
            if self.remaining == 0 {
                return Wait::Done;
            }
            self.remaining -= 1;
            Wait::For(self.period)
        }
    }

    struct Listener {
        event: Event,
        wakeups: Arc<Mutex<Vec<SimTime>>>,
        first: bool,
    }

    impl Process for Listener {
        fn name(&self) -> &str {
            "listener"
        }

        fn resume(&mut self, cx: &Context) -> Wait {
            if !self.first {
                self.wakeups.lock().unwrap().push(cx.now());
            }
            self.first = false;
            self.event.wait()
        }
    }

    #[test]
    fn test_sim_time_units_and_display() {
        assert_eq!(SimTime::from_ns(10).as_ps(), 10_000);
        assert_eq!(SimTime::from_us(1), SimTime::from_ns(1_000));
        assert_eq!(SimTime::from_ms(50).to_string(), "50 ms");
        assert_eq!(SimTime::from_ps(86_805_560).to_string(), "86.80556 us");
        assert_eq!(SimTime::from_ps(12).to_string(), "12 ps");
        assert_eq!(SimTime::from_secs_f64(1e-9), Some(SimTime::from_ns(1)));
        assert_eq!(SimTime::from_secs_f64(-1.0), None);
        assert_eq!(SimTime::from_secs_f64(f64::NAN), None);
        assert_eq!(SimTime::from_ms(50).as_secs_f64(), 0.05);
        assert_eq!(SimTime::from_secs_f64(0.05), Some(SimTime::from_ms(50)));
    }

    #[test]
    fn test_timed_waits_interleave_in_time_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut kernel = Kernel::new();
        kernel.spawn(Box::new(Ticker {
            period: SimTime::from_ns(30),
            log: log.clone(),
            label: "slow".into(),
            remaining: 1,
        }));
        kernel.spawn(Box::new(Ticker {
            period: SimTime::from_ns(20),
            log: log.clone(),
            label: "fast".into(),
            remaining: 2,
        }));

        kernel.run_until(SimTime::from_ns(100));

        let order: Vec<(String, u64)> = log
            .lock()
            .unwrap()
            .iter()
            .map(|(l, t)| (l.clone(), t.as_ps() / 1_000))
            .collect();
        assert_eq!(
            order,
            vec![
                ("slow".to_string(), 0),
                ("fast".to_string(), 0),
                ("fast".to_string(), 20),
                ("slow".to_string(), 30),
                ("fast".to_string(), 40),
            ]
        );
        assert_eq!(kernel.now(), SimTime::from_ns(100));
        assert_eq!(kernel.process_count(), 0);
    }

    #[test]
    fn test_run_stops_before_later_activity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut kernel = Kernel::new();
        kernel.spawn(Box::new(Ticker {
            period: SimTime::from_us(1),
            log: log.clone(),
            label: "t".into(),
            remaining: 5,
        }));

        kernel.run_for(SimTime::from_ns(1_500));
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(kernel.clock().now(), SimTime::from_ns(1_500));

        kernel.run_for(SimTime::from_us(10));
        assert_eq!(log.lock().unwrap().len(), 6);
    }

    #[test]
    fn test_notify_wakes_waiter_and_unwaited_notify_is_dropped() {
        let mut kernel = Kernel::new();
        let event = kernel.event();
        let other = kernel.event();
        assert_ne!(event.id(), other.id());
        assert_eq!(event.clone().id(), event.id());
        let wakeups = Arc::new(Mutex::new(Vec::new()));

        // Notified before anyone waits: lost.
        event.notify();
        kernel.spawn(Box::new(Listener {
            event: event.clone(),
            wakeups: wakeups.clone(),
            first: true,
        }));
        kernel.run_for(SimTime::from_ns(5));
        assert!(wakeups.lock().unwrap().is_empty());

        event.notify();
        kernel.run_for(SimTime::from_ns(5));
        assert_eq!(*wakeups.lock().unwrap(), vec![SimTime::from_ns(5)]);
    }

    #[test]
    fn test_shutdown_cancels_waiting_processes() {
        let mut kernel = Kernel::new();
        let event = kernel.event();
        kernel.spawn(Box::new(Listener {
            event,
            wakeups: Arc::new(Mutex::new(Vec::new())),
            first: true,
        }));
        kernel.run_for(SimTime::from_ns(1));
        assert_eq!(kernel.process_count(), 1);
        assert_eq!(kernel.shutdown(), 1);
        assert_eq!(kernel.process_count(), 0);
    }
}
