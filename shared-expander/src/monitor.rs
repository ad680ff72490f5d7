use core::convert::Infallible;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;

use mcp23s17_driver::RegisterAccess;

use crate::{Client, Guarded};

/// A register value that differs from the one seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// `None` when there was no baseline yet.
    pub previous: Option<u8>,
    pub current: u8,
}

/// Remembers the last value of a register and tells when it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeDetector {
    baseline: Option<u8>,
}

impl ChangeDetector {
    pub const fn new() -> Self {
        ChangeDetector { baseline: None }
    }

    /// Sets the baseline without reporting anything.
    pub fn seed(&mut self, sample: u8) {
        self.baseline = Some(sample);
    }

    pub fn baseline(&self) -> Option<u8> {
        self.baseline
    }

    pub fn is_seeded(&self) -> bool {
        self.baseline.is_some()
    }

    /// Compares `sample` against the baseline and makes it the new baseline.
    ///
    /// Without a baseline every sample counts as a change.
    pub fn observe(&mut self, sample: u8) -> Option<Change> {
        let previous = self.baseline.replace(sample);
        if previous == Some(sample) {
            None
        } else {
            Some(Change {
                previous,
                current: sample,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Changed(Change),
    Unchanged,
    /// The lock timed out, the baseline is kept.
    Skipped,
}

/// Samples one register periodically and reports changes.
///
/// Each sample is a single locked read, the wait between samples happens
/// without the lock so other tasks get the bus.
pub struct RegisterMonitor<'a, M: RawMutex, D, T> {
    client: Client<'a, M, D, T>,
    register: u8,
    period_ms: u32,
    detector: ChangeDetector,
}

impl<'a, M, D, T> RegisterMonitor<'a, M, D, T>
where
    M: RawMutex,
    D: RegisterAccess,
    T: DelayNs,
{
    pub fn new<R: Into<u8>>(client: Client<'a, M, D, T>, register: R, period_ms: u32) -> Self {
        RegisterMonitor {
            client,
            register: register.into(),
            period_ms,
            detector: ChangeDetector::new(),
        }
    }

    pub fn register(&self) -> u8 {
        self.register
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Reads the register once and takes the value as baseline.
    ///
    /// A skipped read leaves the monitor unseeded, the first successful poll
    /// then reports a change.
    pub async fn seed(&mut self) -> Result<Guarded<u8>, D::Error> {
        let sample = self.client.read_register(self.register).await?;
        if let Guarded::Completed(value) = sample {
            self.detector.seed(value);
        }
        Ok(sample)
    }

    pub async fn poll(&mut self) -> Result<PollOutcome, D::Error> {
        let value = match self.client.read_register(self.register).await? {
            Guarded::Completed(value) => value,
            Guarded::Skipped => return Ok(PollOutcome::Skipped),
        };

        match self.detector.observe(value) {
            Some(change) => {
                log::debug!(
                    "register {:#04x} changed: {:?} -> {:#04x}",
                    self.register,
                    change.previous,
                    change.current
                );
                Ok(PollOutcome::Changed(change))
            }
            None => Ok(PollOutcome::Unchanged),
        }
    }

    /// Seeds, then polls every `period_ms` and hands each change to `on_change`.
    ///
    /// Only returns when a read fails on the bus.
    pub async fn run<F: FnMut(Change)>(&mut self, mut on_change: F) -> Result<Infallible, D::Error> {
        self.seed().await?;
        loop {
            if let PollOutcome::Changed(change) = self.poll().await? {
                on_change(change);
            }
            self.client.pause(self.period_ms).await;
        }
    }

    pub fn into_client(self) -> Client<'a, M, D, T> {
        self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LockPolicy, SharedExpander};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use mcp23s17_driver::sim::Simulator;
    use mcp23s17_driver::RegisterAddress;
    use std::collections::VecDeque;

    // Hands out canned samples, fails once they run out
    struct Scripted {
        samples: VecDeque<u8>,
    }

    #[derive(Debug, PartialEq)]
    struct Exhausted;

    impl Scripted {
        fn new(samples: &[u8]) -> Self {
            Scripted {
                samples: samples.iter().copied().collect(),
            }
        }
    }

    impl RegisterAccess for Scripted {
        type Error = Exhausted;

        async fn write_register(&mut self, _register: u8, _value: u8) -> Result<(), Exhausted> {
            Ok(())
        }

        async fn read_register(&mut self, _register: u8) -> Result<u8, Exhausted> {
            self.samples.pop_front().ok_or(Exhausted)
        }
    }

    #[test]
    fn detector_reports_only_differences() {
        let mut detector = ChangeDetector::new();
        detector.seed(0x00);

        assert_eq!(detector.observe(0x00), None);
        assert_eq!(
            detector.observe(0xFF),
            Some(Change {
                previous: Some(0x00),
                current: 0xFF
            })
        );
        assert_eq!(detector.observe(0xFF), None);
        assert_eq!(detector.baseline(), Some(0xFF));
    }

    #[test]
    fn unseeded_detector_reports_the_first_sample() {
        let mut detector = ChangeDetector::default();
        assert!(!detector.is_seeded());
        assert_eq!(
            detector.observe(0x00),
            Some(Change {
                previous: None,
                current: 0x00
            })
        );
        assert!(detector.is_seeded());
    }

    #[async_std::test]
    async fn run_reports_each_change_once() {
        let sim = Simulator::new();
        let shared = SharedExpander::<NoopRawMutex, _>::new(
            Scripted::new(&[0x00, 0x00, 0xFF, 0xFF, 0x0A]),
            LockPolicy::default(),
        );
        let mut monitor = RegisterMonitor::new(shared.client(sim.timer()), RegisterAddress::GPIOB, 10);

        let mut changes = Vec::new();
        let result = monitor.run(|change| changes.push(change)).await;

        assert_eq!(result.unwrap_err(), Exhausted);
        assert_eq!(
            changes,
            vec![
                Change {
                    previous: Some(0x00),
                    current: 0xFF
                },
                Change {
                    previous: Some(0xFF),
                    current: 0x0A
                },
            ]
        );
        assert_eq!(shared.skipped_count(), 0);
    }

    #[async_std::test]
    async fn skipped_seed_leaves_the_baseline_unset() {
        let sim = Simulator::new();
        let shared = SharedExpander::<NoopRawMutex, _>::new(Scripted::new(&[0x42, 0x42]), LockPolicy::new(2));
        let mut monitor = RegisterMonitor::new(shared.client(sim.timer()), RegisterAddress::GPIOA, 10);

        {
            let _held = shared.exclusive().await;
            assert_eq!(monitor.seed().await, Ok(Guarded::Skipped));
            assert_eq!(monitor.poll().await, Ok(PollOutcome::Skipped));
        }
        assert!(!monitor.detector().is_seeded());
        assert_eq!(shared.skipped_count(), 2);

        assert_eq!(
            monitor.poll().await,
            Ok(PollOutcome::Changed(Change {
                previous: None,
                current: 0x42
            }))
        );
        assert_eq!(monitor.poll().await, Ok(PollOutcome::Unchanged));
    }
}
