//! Wait strategies for ring buffer consumers
//!
//! This module provides different wait strategies that control how consumers
//! wait for new data in the ring buffer. Each strategy offers different
//! trade-offs between latency, CPU usage, and throughput.
//!
//! A wait completes when the producer cursor has reached the target sequence
//! AND the dependent chain (the minimum of the upstream consumer sequences,
//! clamped by the cursor) has reached it. Every strategy observes the alert
//! flag within bounded time and aborts the wait with [`SurgeError::Alert`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::{BLOCKING_RECHECK_MICROS, SPIN_TRIES, YIELD_TRIES};
use crate::disruptor::sequence::{minimum_sequence, Sequence};
use crate::error::{Result, SurgeError};

/// Outcome of a successful wait.
pub struct WaitResult {
    /// Highest sequence the dependent chain has made available. May be less
    /// than the requested target after a spurious wake; callers loop.
    pub sequence: i64,
    /// Hint: the cursor itself was observed beyond the target. Strategies
    /// may always report `false`.
    pub cursor_advanced: bool,
}

/// Trait for wait strategies that determine how consumers wait for data
pub trait WaitStrategy: Send + Sync {
    /// Wait until `sequence` is covered by both the cursor and the
    /// dependent chain.
    ///
    /// # Arguments
    ///
    /// * `sequence` - The sequence number to wait for
    /// * `cursor` - The producer cursor of the owning sequencer
    /// * `dependents` - Upstream consumer sequences this wait is gated on;
    ///   when empty the cursor itself is the dependent chain
    /// * `alert` - Shutdown probe; a set flag aborts the wait
    ///
    /// # Errors
    ///
    /// Returns [`SurgeError::Alert`] when the alert flag is raised and
    /// [`SurgeError::Timeout`] from timeout-variant strategies.
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
    ) -> Result<WaitResult>;

    /// Signal that new data is available
    fn signal_all_when_blocking(&self);
}

#[inline]
fn check_alert(alert: &AtomicBool) -> Result<()> {
    if alert.load(Ordering::Acquire) {
        return Err(SurgeError::Alert);
    }
    Ok(())
}

/// Effective available sequence: the dependent minimum clamped by the
/// cursor, or the cursor alone when there are no dependents.
#[inline]
fn available_sequence(cursor: &Sequence, dependents: &[Arc<Sequence>]) -> i64 {
    let cursor_value = cursor.get();
    if dependents.is_empty() {
        cursor_value
    } else {
        minimum_sequence(dependents, cursor_value)
    }
}

#[inline]
fn wait_result(sequence: i64, available: i64, cursor: &Sequence) -> WaitResult {
    WaitResult {
        sequence: available,
        cursor_advanced: cursor.get() > sequence,
    }
}

/// Busy spin wait strategy - lowest latency, highest CPU usage.
/// This strategy continuously checks for new data in a tight loop, making it
/// ideal for scenarios where latency is critical and CPU resources are
/// abundant. However, it will consume 100% of a CPU core while waiting.
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    /// Create a new busy spin wait strategy
    pub fn new() -> Self {
        Self
    }
}

impl Default for BusySpinWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
    ) -> Result<WaitResult> {
        loop {
            check_alert(alert)?;
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(wait_result(sequence, available, cursor));
            }
            // CPU pause instruction while polling
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        // No-op for busy spin - no blocking threads to signal
    }
}

/// Yielding wait strategy - moderate CPU usage and latency.
/// Spins for a bounded number of tries, then yields the CPU to other
/// threads, then falls back to nanosecond sleeps. A good compromise between
/// busy spinning and sleeping.
pub struct YieldingWaitStrategy {
    spin_tries: usize,
    yield_tries: usize,
}

impl YieldingWaitStrategy {
    /// Create a new yielding wait strategy
    pub fn new() -> Self {
        Self {
            spin_tries: SPIN_TRIES,
            yield_tries: YIELD_TRIES,
        }
    }

    /// Create a new yielding wait strategy with custom parameters
    pub fn with_tries(spin_tries: usize, yield_tries: usize) -> Self {
        Self {
            spin_tries,
            yield_tries,
        }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
    ) -> Result<WaitResult> {
        let mut counter = 0usize;

        loop {
            check_alert(alert)?;
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(wait_result(sequence, available, cursor));
            }

            if counter < self.spin_tries {
                std::hint::spin_loop();
            } else if counter < self.spin_tries + self.yield_tries {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_nanos(1));
            }
            counter += 1;
        }
    }

    fn signal_all_when_blocking(&self) {
        // No-op for yielding - threads will wake up naturally
    }
}

/// Sleeping wait strategy - lowest CPU usage, higher latency.
/// Spins briefly, yields, then parks with an increasing sleep interval up
/// to the configured ceiling. Ideal when CPU usage is the primary concern
/// and latency is not critical.
pub struct SleepingWaitStrategy {
    sleep_ceiling: Duration,
}

impl SleepingWaitStrategy {
    /// Create a new sleeping wait strategy with a custom sleep ceiling
    pub fn new(sleep_ceiling: Duration) -> Self {
        Self { sleep_ceiling }
    }

    /// Create a new sleeping wait strategy with the default ceiling (1ms)
    pub fn default_sleep() -> Self {
        Self::new(Duration::from_nanos(crate::constants::DEFAULT_SLEEP_NANOS))
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::default_sleep()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
    ) -> Result<WaitResult> {
        let mut counter = 0usize;
        let mut sleep = Duration::from_micros(1);

        loop {
            check_alert(alert)?;
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(wait_result(sequence, available, cursor));
            }

            if counter < SPIN_TRIES {
                std::hint::spin_loop();
            } else if counter < SPIN_TRIES + YIELD_TRIES {
                thread::yield_now();
            } else {
                thread::sleep(sleep);
                sleep = (sleep * 2).min(self.sleep_ceiling);
            }
            counter += 1;
        }
    }

    fn signal_all_when_blocking(&self) {
        // No-op for sleeping - threads will wake up naturally
    }
}

/// Blocking wait strategy - balanced latency and CPU usage.
/// Parks the consumer on a condition variable until the cursor advances,
/// then busy-reads the dependent chain. Producers signal on publish. The
/// condvar wait is re-armed on a short interval so a racing alert is
/// observed within bounded time.
pub struct BlockingWaitStrategy {
    mutex: parking_lot::Mutex<()>,
    condition: parking_lot::Condvar,
}

impl BlockingWaitStrategy {
    /// Create a new blocking wait strategy
    pub fn new() -> Self {
        Self {
            mutex: parking_lot::Mutex::new(()),
            condition: parking_lot::Condvar::new(),
        }
    }

    fn wait_for_cursor(&self, sequence: i64, cursor: &Sequence, alert: &AtomicBool) -> Result<()> {
        if cursor.get() >= sequence {
            return Ok(());
        }
        let recheck = Duration::from_micros(BLOCKING_RECHECK_MICROS);
        let mut guard = self.mutex.lock();
        while cursor.get() < sequence {
            check_alert(alert)?;
            self.condition.wait_for(&mut guard, recheck);
        }
        Ok(())
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
    ) -> Result<WaitResult> {
        // Phase 1: park until the cursor covers the target
        self.wait_for_cursor(sequence, cursor, alert)?;

        // Phase 2: busy-read the dependent chain
        loop {
            check_alert(alert)?;
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(wait_result(sequence, available, cursor));
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        self.condition.notify_all();
    }
}

/// Timeout blocking wait strategy - a blocking wait with a deadline.
/// Behaves like [`BlockingWaitStrategy`] but gives up with
/// [`SurgeError::Timeout`] once the configured duration has elapsed, which
/// the event processor surfaces to the handler's timeout hook.
pub struct TimeoutBlockingWaitStrategy {
    mutex: parking_lot::Mutex<()>,
    condition: parking_lot::Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    /// Create a new timeout blocking wait strategy
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: parking_lot::Mutex::new(()),
            condition: parking_lot::Condvar::new(),
            timeout,
        }
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        alert: &AtomicBool,
    ) -> Result<WaitResult> {
        let deadline = Instant::now() + self.timeout;
        let recheck = Duration::from_micros(BLOCKING_RECHECK_MICROS);

        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                check_alert(alert)?;
                if Instant::now() >= deadline {
                    return Err(SurgeError::Timeout);
                }
                self.condition.wait_for(&mut guard, recheck);
            }
        }

        loop {
            check_alert(alert)?;
            let available = available_sequence(cursor, dependents);
            if available >= sequence {
                return Ok(wait_result(sequence, available, cursor));
            }
            if Instant::now() >= deadline {
                return Err(SurgeError::Timeout);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        self.condition.notify_all();
    }
}

/// Factory for creating wait strategies from configuration
pub struct WaitStrategyFactory;

impl WaitStrategyFactory {
    /// Create a wait strategy from the given type
    pub fn create_strategy(
        strategy_type: crate::disruptor::WaitStrategyType,
    ) -> Arc<dyn WaitStrategy> {
        use crate::disruptor::WaitStrategyType;
        match strategy_type {
            WaitStrategyType::BusySpin => Arc::new(BusySpinWaitStrategy::new()),
            WaitStrategyType::Yielding => Arc::new(YieldingWaitStrategy::new()),
            WaitStrategyType::Sleeping => Arc::new(SleepingWaitStrategy::default_sleep()),
            WaitStrategyType::Blocking => Arc::new(BlockingWaitStrategy::new()),
            WaitStrategyType::TimeoutBlocking { timeout } => {
                Arc::new(TimeoutBlockingWaitStrategy::new(timeout))
            }
        }
    }
}
