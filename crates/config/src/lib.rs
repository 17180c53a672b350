// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// Rates the model is usually driven at; anything else is accepted with a warning.
const STANDARD_BIT_RATES: &[f64] = &[
    1_200.0, 2_400.0, 4_800.0, 9_600.0, 19_200.0, 38_400.0, 57_600.0, 115_200.0, 230_400.0,
    460_800.0, 921_600.0,
];

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    SUPPORTED_SCHEMA_VERSION.to_string()
}

fn default_uart_name() -> String {
    "uart1".to_string()
}

fn default_bit_rate() -> f64 {
    115_200.0
}

fn default_access_latency_ns() -> u64 {
    10
}

fn default_run_time_ms() -> u64 {
    50
}

fn default_poll_interval_ns() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported schema_version '{0}'. Supported versions: '1.0'")]
    UnsupportedSchema(String),
    #[error("UART 'name' cannot be empty")]
    EmptyName,
    #[error("UART 'bit_rate' must be a positive, finite number (got {0})")]
    InvalidBitRate(f64),
    #[error("Limit 'run_time_ms' must be greater than zero")]
    ZeroRunTime,
    #[error("Input 'payload' cannot be empty")]
    EmptyPayload,
    #[error("Limit 'max_time_us' must be greater than zero")]
    ZeroTimeLimit,
    #[error("Stimulus 'poll_interval_ns' must be greater than zero")]
    ZeroPollInterval,
}

fn check_schema_version(version: &str) -> Result<(), ConfigError> {
    if version != SUPPORTED_SCHEMA_VERSION {
        return Err(ConfigError::UnsupportedSchema(version.to_string()));
    }
    Ok(())
}

/// What the TX data register does with a write while a byte is on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Reject with a command error until the transmitter is ready again.
    #[default]
    #[serde(alias = "gated")]
    RejectWhileBusy,
    /// Always queue; the transmitter drains the backlog in order.
    #[serde(alias = "queued")]
    AcceptWhileBusy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UartConfig {
    #[serde(default = "default_uart_name")]
    pub name: String,
    #[serde(default)]
    pub base_address: u64,
    /// Bits per second.
    #[serde(default = "default_bit_rate")]
    pub bit_rate: f64,
    #[serde(default = "default_access_latency_ns")]
    pub access_latency_ns: u64,
    #[serde(default)]
    pub write_policy: WritePolicy,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            name: default_uart_name(),
            base_address: 0,
            bit_rate: default_bit_rate(),
            access_latency_ns: default_access_latency_ns(),
            write_policy: WritePolicy::default(),
        }
    }
}

impl UartConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !self.bit_rate.is_finite() || self.bit_rate <= 0.0 {
            return Err(ConfigError::InvalidBitRate(self.bit_rate));
        }
        if !STANDARD_BIT_RATES.contains(&self.bit_rate) {
            tracing::warn!(
                "UART '{}' uses non-standard bit rate {}",
                self.name,
                self.bit_rate
            );
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SystemManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default)]
    pub uart: UartConfig,
    /// Simulated time an interactive run lasts.
    #[serde(default = "default_run_time_ms")]
    pub run_time_ms: u64,
}

impl Default for SystemManifest {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: "loopback".to_string(),
            uart: UartConfig::default(),
            run_time_ms: default_run_time_ms(),
        }
    }
}

impl SystemManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open system manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse System Manifest")?;
        manifest.validate()?;
        tracing::debug!("Loaded system manifest '{}'", manifest.name);
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse System Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_schema_version(&self.schema_version)?;
        if self.run_time_ms == 0 {
            return Err(ConfigError::ZeroRunTime);
        }
        self.uart.validate()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StimulusMode {
    /// Poll TX_READY before every write, the way driver firmware would.
    #[default]
    Polled,
    /// Write the whole payload back-to-back in one scheduling step.
    Burst,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Stimulus {
    #[serde(default)]
    pub mode: StimulusMode,
    #[serde(default = "default_poll_interval_ns")]
    pub poll_interval_ns: u64,
}

impl Default for Stimulus {
    fn default() -> Self {
        Self {
            mode: StimulusMode::default(),
            poll_interval_ns: default_poll_interval_ns(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestInputs {
    #[serde(default)]
    pub system: Option<String>,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestLimits {
    pub max_time_us: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Runner failed before simulation started (e.g. script parse/validation error).
    ConfigError,
    /// The driver wrote the payload and read every accepted byte back.
    DriverFinished,
    MaxTime,
    /// The driver aborted on an error response it cannot recover from.
    TransportError,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RxEqualsAssertion {
    pub rx_equals: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RxContainsAssertion {
    pub rx_contains: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MaxCommandErrorsAssertion {
    pub max_command_errors: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StopReasonAssertion {
    pub expected_stop_reason: StopReason,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TestAssertion {
    RxEquals(RxEqualsAssertion),
    RxContains(RxContainsAssertion),
    MaxCommandErrors(MaxCommandErrorsAssertion),
    ExpectedStopReason(StopReasonAssertion),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestScript {
    pub schema_version: String,
    pub inputs: TestInputs,
    #[serde(default)]
    pub stimulus: Stimulus,
    pub limits: TestLimits,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

impl TestScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open test script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Test Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_schema_version(&self.schema_version)?;

        if self.inputs.payload.is_empty() {
            return Err(ConfigError::EmptyPayload);
        }

        if self.limits.max_time_us == 0 {
            return Err(ConfigError::ZeroTimeLimit);
        }

        if self.stimulus.poll_interval_ns == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        Ok(())
    }
}
