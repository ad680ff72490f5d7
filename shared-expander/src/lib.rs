#![cfg_attr(not(test), no_std)]

//! # Shared expander access
//!
//! One I/O expander, one SPI bus and one chip select line, used by several
//! tasks. [`SharedExpander`] keeps the driver in a mutex and every task talks to
//! it through its own [`Client`]. A client takes the lock for exactly one
//! register operation and gives it back straight away, so the bytes of two
//! operations never interleave on the bus. A sequence of operations is not
//! atomic: another task may get its operation in between.
//!
//! Waiting for the lock is bounded by [`LockPolicy::timeout_ms`]. When the lock
//! cannot be had in time the operation is skipped and the caller gets
//! [`Guarded::Skipped`] instead of a value. Nothing is retried unless the policy
//! says so, the task is expected to try again on its next cycle.
//!
//! ```ignore
//! static EXPANDER: StaticCell<SharedExpander<CriticalSectionRawMutex, Driver>> = StaticCell::new();
//!
//! let expander = EXPANDER.init(SharedExpander::new(mcp, LockPolicy::default()));
//! spawner.spawn(blink(expander)).ok();
//! spawner.spawn(watch_buttons(expander)).ok();
//!
//! #[embassy_executor::task]
//! async fn watch_buttons(expander: &'static SharedExpander<CriticalSectionRawMutex, Driver>) {
//!     let client = expander.client(AsyncDelay::new());
//!     let mut monitor = RegisterMonitor::new(client, RegisterAddress::GPIOB, 50);
//!     monitor
//!         .run(|change| esp_println::println!("GPIOB: {:02X}", change.current))
//!         .await
//!         .ok();
//! }
//! ```

use core::cell::Cell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal_async::delay::DelayNs;

use mcp23s17_driver::RegisterAccess;

mod monitor;

pub use monitor::{Change, ChangeDetector, PollOutcome, RegisterMonitor};

pub const DEFAULT_LOCK_TIMEOUT_MS: u32 = 10;

/// What a client does when the lock could not be taken in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Give up on the operation.
    Skip,
    /// Wait for the timeout again, up to `attempts` waits in total.
    Retry { attempts: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub timeout_ms: u32,
    pub on_timeout: TimeoutAction,
}

impl LockPolicy {
    pub const fn new(timeout_ms: u32) -> Self {
        LockPolicy {
            timeout_ms,
            on_timeout: TimeoutAction::Skip,
        }
    }

    pub const fn with_retries(self, attempts: u8) -> Self {
        LockPolicy {
            on_timeout: TimeoutAction::Retry { attempts },
            ..self
        }
    }

    fn attempts(&self) -> u32 {
        match self.on_timeout {
            TimeoutAction::Skip => 1,
            TimeoutAction::Retry { attempts } => attempts.max(1) as u32,
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy::new(DEFAULT_LOCK_TIMEOUT_MS)
    }
}

/// Result of an operation that needed the lock.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded<T> {
    Completed(T),
    /// The lock was not acquired in time, nothing was sent to the chip.
    Skipped,
}

impl<T> Guarded<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Guarded::Completed(value) => Some(value),
            Guarded::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Guarded::Skipped)
    }
}

/// A device shared between tasks.
///
/// `new` is `const`, so this can sit in a `static` or a `StaticCell`.
pub struct SharedExpander<M: RawMutex, D> {
    device: Mutex<M, D>,
    skipped: BlockingMutex<M, Cell<u32>>,
    policy: LockPolicy,
}

impl<M: RawMutex, D> SharedExpander<M, D> {
    pub const fn new(device: D, policy: LockPolicy) -> Self {
        SharedExpander {
            device: Mutex::new(device),
            skipped: BlockingMutex::new(Cell::new(0)),
            policy,
        }
    }

    /// A handle for one task. `timer` bounds the lock waits of this handle.
    pub fn client<T: DelayNs>(&self, timer: T) -> Client<'_, M, D, T> {
        Client {
            shared: self,
            timer,
        }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Operations skipped so far because the lock timed out, across all clients.
    pub fn skipped_count(&self) -> u32 {
        self.skipped.lock(|skipped| skipped.get())
    }

    /// Waits for the lock without a timeout and keeps it until the guard is
    /// dropped.
    ///
    /// For the rare multi-register sequence that must not be interleaved with
    /// other tasks. Keep the guard short, every client waiting meanwhile will
    /// time out.
    pub async fn exclusive(&self) -> MutexGuard<'_, M, D> {
        self.device.lock().await
    }

    pub fn into_inner(self) -> D {
        self.device.into_inner()
    }

    fn record_skip(&self) -> u32 {
        self.skipped.lock(|skipped| {
            let count = skipped.get().wrapping_add(1);
            skipped.set(count);
            count
        })
    }
}

/// One task's view of a [`SharedExpander`].
pub struct Client<'a, M: RawMutex, D, T> {
    shared: &'a SharedExpander<M, D>,
    timer: T,
}

impl<'a, M, D, T> Client<'a, M, D, T>
where
    M: RawMutex,
    D: RegisterAccess,
    T: DelayNs,
{
    pub async fn write_register<R: Into<u8>>(
        &mut self,
        register: R,
        value: u8,
    ) -> Result<Guarded<()>, D::Error> {
        let register = register.into();
        match self.acquire().await {
            Some(mut device) => {
                RegisterAccess::write_register(&mut *device, register, value).await?;
                Ok(Guarded::Completed(()))
            }
            None => Ok(Guarded::Skipped),
        }
    }

    pub async fn read_register<R: Into<u8>>(&mut self, register: R) -> Result<Guarded<u8>, D::Error> {
        let register = register.into();
        match self.acquire().await {
            Some(mut device) => {
                let value = RegisterAccess::read_register(&mut *device, register).await?;
                Ok(Guarded::Completed(value))
            }
            None => Ok(Guarded::Skipped),
        }
    }

    pub fn shared(&self) -> &'a SharedExpander<M, D> {
        self.shared
    }

    // Wait on this client's timer, never while holding the lock
    pub(crate) async fn pause(&mut self, ms: u32) {
        self.timer.delay_ms(ms).await
    }

    async fn acquire(&mut self) -> Option<MutexGuard<'a, M, D>> {
        let policy = self.shared.policy;

        for _ in 0..policy.attempts() {
            match select(self.shared.device.lock(), self.timer.delay_ms(policy.timeout_ms)).await {
                Either::First(device) => return Some(device),
                Either::Second(()) => {}
            }
        }

        let skipped = self.shared.record_skip();
        log::warn!(
            "expander busy for {} ms, operation skipped ({} skipped so far)",
            policy.timeout_ms,
            skipped
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_skips_after_a_short_wait() {
        let policy = LockPolicy::default();
        assert_eq!(policy.timeout_ms, DEFAULT_LOCK_TIMEOUT_MS);
        assert_eq!(policy.on_timeout, TimeoutAction::Skip);
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn retry_policy_waits_at_least_once() {
        assert_eq!(LockPolicy::new(5).with_retries(3).attempts(), 3);
        assert_eq!(LockPolicy::new(5).with_retries(0).attempts(), 1);
    }

    #[test]
    fn guarded_outcomes() {
        assert_eq!(Guarded::Completed(0x12).completed(), Some(0x12));
        assert_eq!(Guarded::<u8>::Skipped.completed(), None);
        assert!(Guarded::<()>::Skipped.is_skipped());
        assert!(!Guarded::Completed(()).is_skipped());
    }
}
