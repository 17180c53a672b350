// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use labwired_uart_config::{
    Stimulus, StimulusMode, StopReason, SystemManifest, TestAssertion, TestLimits, TestScript,
};
use labwired_uart_core::bus::Router;
use labwired_uart_core::initiator::{DriverReport, PolledDriver};
use labwired_uart_core::metrics::{MetricsSummary, UartMetrics};
use labwired_uart_core::snapshot::UartSnapshot;
use labwired_uart_core::{Kernel, SimTime, SimulationObserver};

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

/// Guard against runaway runs from a mistyped limit.
const MAX_ALLOWED_TIME_US: u64 = 60_000_000;

fn parse_mode(s: &str) -> Result<StimulusMode, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "polled" => Ok(StimulusMode::Polled),
        "burst" => Ok(StimulusMode::Burst),
        other => Err(format!(
            "Invalid stimulus mode '{}' (expected 'polled' or 'burst')",
            other
        )),
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "LabWired UART Loopback Simulator",
    long_about = None,
    subcommand_negates_reqs = true
)]
struct Cli {
    /// Path to the system manifest (YAML)
    #[arg(short, long)]
    system: Option<PathBuf>,

    /// Bytes the driver writes to the UART
    #[arg(short, long, default_value = "ABCDE")]
    payload: String,

    /// Override the manifest's simulated run time
    #[arg(long)]
    run_time_ms: Option<u64>,

    /// How the driver feeds the TX data register: polled or burst
    #[arg(long, value_parser = parse_mode, default_value = "polled")]
    mode: StimulusMode,

    /// Enable transaction-level tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deterministic, CI-friendly runner mode driven by a test script (YAML).
    Test(TestArgs),
}

#[derive(Parser, Debug)]
struct TestArgs {
    /// Path to the test script (YAML)
    #[arg(short = 'c', long)]
    script: PathBuf,

    /// Path to the system manifest (YAML); overrides inputs.system
    #[arg(short = 's', long)]
    system: Option<PathBuf>,

    /// Directory to write test artifacts (result.json, rx.log)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the script's simulated time limit
    #[arg(long)]
    max_time_us: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TestResult {
    result_schema_version: String,
    status: String,
    stop_reason: StopReason,
    sim_time: SimTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    limits: Option<TestLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    driver: Option<DriverReport>,
    received: String,
    assertions: Vec<AssertionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<MetricsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uart: Option<UartSnapshot>,
    input_hash: String,
    config: TestConfig,
}

#[derive(Debug, Serialize, Clone)]
struct AssertionResult {
    assertion: TestAssertion,
    passed: bool,
}

#[derive(Debug, Serialize, Clone)]
struct TestConfig {
    script: PathBuf,
    system: Option<PathBuf>,
}

/// Everything a finished run leaves behind.
struct RunOutcome {
    report: DriverReport,
    metrics: MetricsSummary,
    uart: UartSnapshot,
    sim_time: SimTime,
    stop_reason: StopReason,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Some(Commands::Test(args)) => run_test(args),
        None => run_interactive(cli),
    }
}

fn load_manifest(system_path: Option<&Path>) -> anyhow::Result<SystemManifest> {
    match system_path {
        Some(path) => {
            info!("Loading system manifest: {:?}", path);
            SystemManifest::from_file(path)
        }
        None => {
            info!("Using default UART configuration");
            Ok(SystemManifest::default())
        }
    }
}

/// Build the UART behind a router, drive it with the payload and run until
/// `limit`.
fn simulate(
    manifest: &SystemManifest,
    payload: &[u8],
    stimulus: &Stimulus,
    limit: SimTime,
) -> anyhow::Result<RunOutcome> {
    let metrics = Arc::new(UartMetrics::new());
    let observers: Vec<Arc<dyn SimulationObserver>> = vec![metrics.clone()];

    let mut kernel = Kernel::new();
    kernel.add_observer(metrics.clone());
    let (router, probe) = Router::from_config(manifest, &mut kernel, observers)?;

    let driver = PolledDriver::new(
        "cpu",
        Box::new(router),
        manifest.uart.base_address,
        payload.to_vec(),
        stimulus,
    );
    let report = driver.report();
    kernel.spawn(Box::new(driver));

    kernel.run_for(limit);
    let sim_time = kernel.now();
    kernel.shutdown();

    let report = report
        .lock()
        .map(|r| r.clone())
        .map_err(|_| anyhow::anyhow!("Driver report lock poisoned"))?;
    let stop_reason = if report.fatal.is_some() {
        StopReason::TransportError
    } else if report.finished_at.is_some() {
        StopReason::DriverFinished
    } else {
        StopReason::MaxTime
    };

    Ok(RunOutcome {
        report,
        metrics: metrics.summary(),
        uart: probe.snapshot(),
        sim_time,
        stop_reason,
    })
}

fn run_interactive(cli: Cli) -> ExitCode {
    info!("Starting LabWired UART loopback");

    let mut manifest = match load_manifest(cli.system.as_deref()) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Some(run_time_ms) = cli.run_time_ms {
        manifest.run_time_ms = run_time_ms;
    }
    if let Err(e) = manifest.validate() {
        error!("{}", e);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }
    if cli.payload.is_empty() {
        error!("Payload cannot be empty");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let stimulus = Stimulus {
        mode: cli.mode,
        ..Stimulus::default()
    };
    let limit = SimTime::from_ms(manifest.run_time_ms);
    let outcome = match simulate(&manifest, cli.payload.as_bytes(), &stimulus, limit) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    report_outcome(&outcome);

    match outcome.stop_reason {
        StopReason::TransportError => ExitCode::from(EXIT_RUNTIME_ERROR),
        _ => ExitCode::from(EXIT_PASS),
    }
}

fn report_outcome(outcome: &RunOutcome) {
    let report = &outcome.report;
    info!(
        "Stopped @{} ({:?}): wrote {} byte(s), read back {:?}",
        outcome.sim_time,
        outcome.stop_reason,
        report.written.len(),
        String::from_utf8_lossy(&report.received)
    );
    if !report.rejected.is_empty() {
        info!(
            "UART rejected {} write(s) while busy: {:?}",
            report.rejected.len(),
            String::from_utf8_lossy(&report.rejected)
        );
    }
    if let Some(fatal) = &report.fatal {
        error!("Driver aborted: {}", fatal);
    }

    let m = &outcome.metrics;
    info!(
        "Transactions: {} ({} reads, {} writes), errors: {} command / {} address",
        m.transactions, m.reads, m.writes, m.command_errors, m.address_errors
    );
    info!(
        "Bytes looped back: {} (last @{})",
        m.bytes_transmitted, m.last_transmit_at
    );
}

fn resolve_script_path(script_path: &Path, value: &str) -> PathBuf {
    let p = PathBuf::from(value);
    if p.is_absolute() {
        return p;
    }
    script_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(p)
}

fn hash_inputs(script: &TestScript, manifest: &SystemManifest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.inputs.payload.as_bytes());
    if let Ok(yaml) = serde_yaml::to_string(manifest) {
        hasher.update(yaml.as_bytes());
    }
    if let Ok(yaml) = serde_yaml::to_string(&script.stimulus) {
        hasher.update(yaml.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn run_test(args: TestArgs) -> ExitCode {
    let mut script = match TestScript::from_file(&args.script) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("{:#}", e);
            error!("{}", msg);
            write_config_error_outputs(&args, args.system.as_ref(), None, msg);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Some(max_time_us) = args.max_time_us {
        script.limits.max_time_us = max_time_us;
    }
    let limits = script.limits.clone();
    if limits.max_time_us == 0 || limits.max_time_us > MAX_ALLOWED_TIME_US {
        let msg = format!(
            "max_time_us {} must be in 1..={}",
            limits.max_time_us, MAX_ALLOWED_TIME_US
        );
        error!("{}", msg);
        write_config_error_outputs(&args, args.system.as_ref(), Some(&limits), msg);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let system_path = args.system.clone().or_else(|| {
        script
            .inputs
            .system
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| resolve_script_path(&args.script, s))
    });

    let manifest = match load_manifest(system_path.as_deref()) {
        Ok(m) => m,
        Err(e) => {
            let msg = format!("{:#}", e);
            error!("{}", msg);
            write_config_error_outputs(&args, system_path.as_ref(), Some(&limits), msg);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let outcome = match simulate(
        &manifest,
        script.inputs.payload.as_bytes(),
        &script.stimulus,
        SimTime::from_us(limits.max_time_us),
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            let msg = format!("{:#}", e);
            error!("{}", msg);
            write_config_error_outputs(&args, system_path.as_ref(), Some(&limits), msg);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    report_outcome(&outcome);

    let received = String::from_utf8_lossy(&outcome.report.received).to_string();
    let stop_reason = outcome.stop_reason;

    let mut assertion_results = Vec::new();
    let mut all_passed = true;
    let mut expected_stop_reason_matched = false;

    for assertion in &script.assertions {
        let passed = match assertion {
            TestAssertion::RxEquals(a) => received == a.rx_equals,
            TestAssertion::RxContains(a) => received.contains(&a.rx_contains),
            TestAssertion::MaxCommandErrors(a) => {
                outcome.metrics.command_errors <= a.max_command_errors
            }
            TestAssertion::ExpectedStopReason(a) => a.expected_stop_reason == stop_reason,
        };

        if matches!(assertion, TestAssertion::ExpectedStopReason(_)) && passed {
            expected_stop_reason_matched = true;
        }

        if !passed {
            all_passed = false;
            error!(
                "Assertion failed: {:?} (received {:?})",
                assertion, received
            );
        }

        assertion_results.push(AssertionResult {
            assertion: assertion.clone(),
            passed,
        });
    }

    let transport_failed = stop_reason == StopReason::TransportError;
    let (status, code) = if !all_passed {
        ("fail", EXIT_ASSERT_FAIL)
    } else if transport_failed && !expected_stop_reason_matched {
        ("error", EXIT_RUNTIME_ERROR)
    } else {
        ("pass", EXIT_PASS)
    };

    let result = TestResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        stop_reason,
        sim_time: outcome.sim_time,
        limits: Some(limits),
        message: outcome.report.fatal.clone(),
        driver: Some(outcome.report.clone()),
        received,
        assertions: assertion_results,
        metrics: Some(outcome.metrics.clone()),
        uart: Some(outcome.uart.clone()),
        input_hash: hash_inputs(&script, &manifest),
        config: TestConfig {
            script: args.script.clone(),
            system: system_path.clone(),
        },
    };
    write_outputs(&args, &result, &outcome.report.received);

    info!("Test {}", status);
    ExitCode::from(code)
}

fn write_outputs(args: &TestArgs, result: &TestResult, received: &[u8]) {
    let Some(output_dir) = &args.output_dir else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        error!("Failed to create output directory {:?}: {}", output_dir, e);
        return;
    }

    let result_path = output_dir.join("result.json");
    match std::fs::File::create(&result_path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, result) {
                error!("Failed to write result.json: {}", e);
            }
        }
        Err(e) => error!("Failed to create result.json: {}", e),
    }

    let rx_path = output_dir.join("rx.log");
    if let Err(e) = std::fs::write(&rx_path, received) {
        error!("Failed to write rx.log: {}", e);
    }
}

fn write_config_error_outputs(
    args: &TestArgs,
    system_path: Option<&PathBuf>,
    limits: Option<&TestLimits>,
    message: String,
) {
    let result = TestResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: "error".to_string(),
        stop_reason: StopReason::ConfigError,
        sim_time: SimTime::ZERO,
        limits: limits.cloned(),
        message: Some(message),
        driver: None,
        received: String::new(),
        assertions: Vec::new(),
        metrics: None,
        uart: None,
        input_hash: String::new(),
        config: TestConfig {
            script: args.script.clone(),
            system: system_path.cloned(),
        },
    };
    write_outputs(args, &result, &[]);
}
