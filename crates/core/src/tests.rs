// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

#[cfg(test)]
mod integration_tests {
    use crate::metrics::UartMetrics;
    use crate::peripherals::uart::{Uart, UartOptions, UartStatus, RX_DATA, STATUS, TX_DATA};
    use crate::sim::{Context, Kernel, Process, SimTime, Wait};
    use crate::tlm::{Command, ResponseStatus, Target, Transaction};
    use crate::SimulationObserver;
    use labwired_uart_config::WritePolicy;
    use std::sync::{Arc, Mutex};

    fn transact(
        uart: &mut Uart,
        command: Command,
        address: u64,
        data: &mut [u8],
    ) -> ResponseStatus {
        let mut delay = SimTime::ZERO;
        let mut trans = Transaction::new(command, address, data);
        uart.b_transport(&mut trans, &mut delay);
        trans.response()
    }

    fn write_byte(uart: &mut Uart, byte: u8) -> ResponseStatus {
        transact(uart, Command::Write, TX_DATA, &mut [byte])
    }

    fn read_byte(uart: &mut Uart) -> u8 {
        let mut data = [0u8];
        assert_eq!(
            transact(uart, Command::Read, RX_DATA, &mut data),
            ResponseStatus::Ok
        );
        data[0]
    }

    fn status(uart: &mut Uart) -> UartStatus {
        let mut word = [0u8; 4];
        assert_eq!(
            transact(uart, Command::Read, STATUS, &mut word),
            ResponseStatus::Ok
        );
        UartStatus::from_bits_truncate(u32::from_le_bytes(word))
    }

    #[test]
    fn test_sequential_writes_loop_back_in_order() {
        let mut kernel = Kernel::new();
        let mut uart =
            Uart::with_bit_rate(&mut kernel, "uart1", 115_200.0, UartOptions::default()).unwrap();
        let probe = uart.probe();
        let byte_time = uart.timing().byte_time();
        assert_eq!(byte_time, SimTime::from_ps(86_805_560));

        assert!(!status(&mut uart).contains(UartStatus::RX_READY));

        for (i, byte) in (b'A'..=b'E').enumerate() {
            assert_eq!(write_byte(&mut uart, byte), ResponseStatus::Ok);
            kernel.run_for(byte_time);
            if i == 0 {
                assert!(status(&mut uart).contains(UartStatus::RX_READY));
            }
        }

        assert!(kernel.now() >= byte_time * 5);
        assert_eq!(probe.rx_pending(), b"ABCDE");
        let read: Vec<u8> = (0..5).map(|_| read_byte(&mut uart)).collect();
        assert_eq!(read, b"ABCDE");
        assert_eq!(read_byte(&mut uart), 0);
    }

    #[test]
    fn test_back_to_back_writes_are_not_dropped() {
        let mut kernel = Kernel::new();
        let mut uart = Uart::new(&mut kernel, "uart1");
        let probe = uart.probe();
        let byte_time = uart.timing().byte_time();

        // Both writes land before the transmitter wakes, so TX_READY is
        // still set for the second one.
        kernel.run_for(SimTime::ZERO);
        assert_eq!(write_byte(&mut uart, b'1'), ResponseStatus::Ok);
        assert_eq!(write_byte(&mut uart, b'2'), ResponseStatus::Ok);

        kernel.run_for(byte_time);
        assert_eq!(probe.rx_pending(), b"1");
        kernel.run_for(byte_time);
        assert_eq!(probe.rx_pending(), b"12");
        assert_eq!(status(&mut uart), UartStatus::RX_READY | UartStatus::TX_READY);
    }

    #[test]
    fn test_tx_ready_low_exactly_while_a_byte_is_on_the_wire() {
        let mut kernel = Kernel::new();
        let mut uart = Uart::new(&mut kernel, "uart1");
        let byte_time = uart.timing().byte_time();
        let one_ps = SimTime::from_ps(1);

        assert!(status(&mut uart).contains(UartStatus::TX_READY));
        write_byte(&mut uart, b'x');
        kernel.run_for(SimTime::ZERO);
        assert_eq!(status(&mut uart), UartStatus::TX_BUSY);

        kernel.run_until(SimTime::from_ps(byte_time.as_ps() - 1));
        assert_eq!(status(&mut uart), UartStatus::TX_BUSY);

        kernel.run_for(one_ps);
        assert_eq!(
            status(&mut uart),
            UartStatus::TX_READY | UartStatus::RX_READY
        );
    }

    #[test]
    fn test_rx_ready_tracks_queue_at_every_read() {
        let mut kernel = Kernel::new();
        let mut uart = Uart::new(&mut kernel, "uart1");
        let byte_time = uart.timing().byte_time();

        write_byte(&mut uart, 1);
        kernel.run_for(byte_time);
        write_byte(&mut uart, 2);
        kernel.run_for(byte_time);

        assert!(status(&mut uart).contains(UartStatus::RX_READY));
        read_byte(&mut uart);
        assert!(status(&mut uart).contains(UartStatus::RX_READY));
        read_byte(&mut uart);
        assert!(!status(&mut uart).contains(UartStatus::RX_READY));
    }

    #[test]
    fn test_unmapped_access_leaves_state_untouched() {
        let mut kernel = Kernel::new();
        let mut uart = Uart::new(&mut kernel, "uart1");
        let probe = uart.probe();

        write_byte(&mut uart, b'a');
        kernel.run_for(uart.timing().byte_time());
        write_byte(&mut uart, b'b');
        kernel.run_for(SimTime::from_ns(1));
        let before = probe.snapshot();

        for address in [0x01, 0x03, 0x0C, 0x10, 0xFFFF_FFFF] {
            assert_eq!(
                transact(&mut uart, Command::Write, address, &mut [0xEE]),
                ResponseStatus::AddressError
            );
            assert_eq!(
                transact(&mut uart, Command::Read, address, &mut [0]),
                ResponseStatus::AddressError
            );
        }
        assert_eq!(probe.snapshot(), before);
    }

    #[test]
    fn test_full_byte_range_keeps_fifo_order_with_queued_policy() {
        let mut kernel = Kernel::new();
        let mut uart = Uart::with_bit_rate(
            &mut kernel,
            "uart1",
            921_600.0,
            UartOptions {
                write_policy: WritePolicy::AcceptWhileBusy,
                ..UartOptions::default()
            },
        )
        .unwrap();
        let probe = uart.probe();
        let byte_time = uart.timing().byte_time();

        let payload: Vec<u8> = (0..=255u8).collect();
        for chunk in payload.chunks(7) {
            for &byte in chunk {
                assert_eq!(write_byte(&mut uart, byte), ResponseStatus::Ok);
            }
            kernel.run_for(byte_time * 3);
        }
        kernel.run_for(byte_time * 256);

        assert!(probe.tx_pending().is_empty());
        let read: Vec<u8> = (0..256).map(|_| read_byte(&mut uart)).collect();
        assert_eq!(read, payload);
    }

    #[derive(Debug, Default)]
    struct Recorder {
        transmitted: Mutex<Vec<(u8, SimTime)>>,
        observed: Mutex<Vec<(u8, SimTime)>>,
    }

    impl SimulationObserver for Recorder {
        fn on_byte_transmitted(&self, _uart: &str, byte: u8, at: SimTime) {
            self.transmitted.lock().unwrap().push((byte, at));
        }

        fn on_byte_observed(&self, _uart: &str, byte: u8, at: SimTime) {
            self.observed.lock().unwrap().push((byte, at));
        }
    }

    #[test]
    fn test_notifier_observes_front_without_consuming() {
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(UartMetrics::new());
        let observers: Vec<Arc<dyn SimulationObserver>> = vec![recorder.clone(), metrics.clone()];
        let mut kernel = Kernel::new();
        let mut uart = Uart::with_bit_rate(
            &mut kernel,
            "uart1",
            115_200.0,
            UartOptions {
                observers,
                ..UartOptions::default()
            },
        )
        .unwrap();
        let byte_time = uart.timing().byte_time();

        write_byte(&mut uart, b'p');
        kernel.run_for(byte_time);
        write_byte(&mut uart, b'q');
        kernel.run_for(byte_time * 2);

        let transmitted = recorder.transmitted.lock().unwrap().clone();
        assert_eq!(transmitted, vec![(b'p', byte_time), (b'q', byte_time * 2)]);
        // Front of the queue is still 'p' when 'q' arrives.
        let observed = recorder.observed.lock().unwrap().clone();
        assert_eq!(observed, vec![(b'p', byte_time), (b'p', byte_time * 2)]);
        // Two wake-ups with RX non-empty, even though only 'p' was seen.
        let summary = metrics.summary();
        assert_eq!(summary.rx_observations, 2);
        assert_eq!(summary.bytes_transmitted, 2);

        assert_eq!(read_byte(&mut uart), b'p');
        assert_eq!(read_byte(&mut uart), b'q');
    }

    /// Initiator written as a process that never honours delays and writes on
    /// every wake-up; with the gated policy writes during a frame bounce.
    struct Hammer {
        uart: Uart,
        period: SimTime,
        next: u8,
        results: Arc<Mutex<Vec<(u8, ResponseStatus)>>>,
    }

    impl Process for Hammer {
        fn name(&self) -> &str {
            "hammer"
        }

        fn resume(&mut self, _cx: &Context) -> Wait {
            if self.next == 4 {
                return Wait::Done;
            }
            let resp = write_byte(&mut self.uart, self.next);
            self.results.lock().unwrap().push((self.next, resp));
            self.next += 1;
            Wait::For(self.period)
        }
    }

    #[test]
    fn test_gated_writes_bounce_during_frame() {
        let metrics = Arc::new(UartMetrics::new());
        let mut kernel = Kernel::new();
        let uart = Uart::with_bit_rate(
            &mut kernel,
            "uart1",
            115_200.0,
            UartOptions {
                observers: vec![metrics.clone()],
                ..UartOptions::default()
            },
        )
        .unwrap();
        let probe = uart.probe();
        let byte_time = uart.timing().byte_time();
        let results = Arc::new(Mutex::new(Vec::new()));

        // Writes at 0, bt/2, bt, 3bt/2: the transmitter finishes byte 0 at bt
        // (its wait was queued first, so it runs before the write at bt).
        kernel.spawn(Box::new(Hammer {
            uart,
            period: SimTime::from_ps(byte_time.as_ps() / 2),
            next: 0,
            results: results.clone(),
        }));
        kernel.run_for(byte_time * 4);

        let results = results.lock().unwrap().clone();
        assert_eq!(
            results,
            vec![
                (0, ResponseStatus::Ok),
                (1, ResponseStatus::CommandError),
                (2, ResponseStatus::Ok),
                (3, ResponseStatus::CommandError),
            ]
        );
        assert_eq!(probe.rx_pending(), vec![0, 2]);
        assert_eq!(metrics.get_command_errors(), 2);
        assert_eq!(metrics.get_bytes_transmitted(), 2);
    }
}
