// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Loopback workload shared by the throughput bench and its regression test.

use labwired_uart_config::{Stimulus, StimulusMode, WritePolicy};
use labwired_uart_core::initiator::{run_until_finished, DriverReport, PolledDriver};
use labwired_uart_core::peripherals::uart::{Uart, UartOptions};
use labwired_uart_core::{Kernel, SimTime};

pub const BIT_RATE: f64 = 921_600.0;

/// Drive `len` bytes through a UART at [`BIT_RATE`] until the driver has
/// read them all back. Simulated time is capped at twice the wire time plus
/// 1 ms, well above the polling and access overhead.
pub fn run_payload(len: usize, mode: StimulusMode) -> DriverReport {
    let mut kernel = Kernel::new();
    let options = UartOptions {
        write_policy: WritePolicy::AcceptWhileBusy,
        ..UartOptions::default()
    };
    let uart = match Uart::with_bit_rate(&mut kernel, "uart1", BIT_RATE, options) {
        Ok(uart) => uart,
        Err(e) => panic!("uart setup failed: {}", e),
    };
    let byte_time = uart.timing().byte_time();
    let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
    let stimulus = Stimulus {
        mode,
        ..Stimulus::default()
    };

    let driver = PolledDriver::new("cpu", Box::new(uart), 0, payload, &stimulus);
    let report = driver.report();
    kernel.spawn(Box::new(driver));

    let limit = byte_time * (2 * len as u64) + SimTime::from_ms(1);
    run_until_finished(&mut kernel, &report, byte_time * 64, limit);
    kernel.shutdown();

    let report = report.lock().map(|r| r.clone()).unwrap_or_default();
    report
}
