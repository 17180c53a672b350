// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::peripherals::uart::{Uart, UartProbe, REGISTER_WINDOW};
use crate::sim::{Kernel, SimTime};
use crate::tlm::{ResponseStatus, Target, Transaction};
use crate::{SimResult, SimulationError, SimulationObserver};
use anyhow::Context;
use labwired_uart_config::SystemManifest;
use std::sync::Arc;

pub struct TargetEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Box<dyn Target>,
}

impl TargetEntry {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    fn overlaps(&self, base: u64, size: u64) -> bool {
        base < self.base.saturating_add(self.size) && self.base < base.saturating_add(size)
    }
}

/// Routes transactions to the target whose window holds the address,
/// translating the address to a target-local offset.
#[derive(Default)]
pub struct Router {
    pub targets: Vec<TargetEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(
        &mut self,
        name: &str,
        base: u64,
        size: u64,
        dev: Box<dyn Target>,
    ) -> SimResult<()> {
        if size == 0 {
            return Err(SimulationError::EmptyWindow(name.to_string()));
        }
        if let Some(existing) = self.targets.iter().find(|t| t.overlaps(base, size)) {
            return Err(SimulationError::OverlappingWindow {
                name: name.to_string(),
                existing: existing.name.clone(),
                base,
                size,
            });
        }
        tracing::debug!("Map '{}' at {:#x}+{:#x}", name, base, size);
        self.targets.push(TargetEntry {
            name: name.to_string(),
            base,
            size,
            dev,
        });
        Ok(())
    }

    /// Build the UART described by the manifest and map it at its base address.
    pub fn from_config(
        manifest: &SystemManifest,
        kernel: &mut Kernel,
        observers: Vec<Arc<dyn SimulationObserver>>,
    ) -> anyhow::Result<(Self, UartProbe)> {
        let cfg = &manifest.uart;
        let uart = Uart::from_config(kernel, cfg, observers)
            .with_context(|| format!("Failed to create UART '{}'", cfg.name))?;
        let probe = uart.probe();

        let mut router = Self::new();
        router.map(&cfg.name, cfg.base_address, REGISTER_WINDOW, Box::new(uart))?;
        Ok((router, probe))
    }

    pub fn peek(&self, name: &str) -> Option<serde_json::Value> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.dev.snapshot())
    }
}

impl Target for Router {
    fn name(&self) -> &str {
        "router"
    }

    fn b_transport(&mut self, trans: &mut Transaction<'_>, delay: &mut SimTime) {
        let addr = trans.address();
        let Some(entry) = self.targets.iter_mut().find(|t| t.contains(addr)) else {
            trans.set_response(ResponseStatus::AddressError);
            return;
        };

        trans.set_address(addr - entry.base);
        entry.dev.b_transport(trans, delay);
        trans.set_address(addr);
    }

    fn snapshot(&self) -> serde_json::Value {
        self.targets
            .iter()
            .map(|t| (t.name.clone(), t.dev.snapshot()))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }
}
