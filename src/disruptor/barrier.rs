//! Per-consumer view over the cursor and upstream dependencies
//!
//! A [`SequenceBarrier`] is what an event processor waits on: it combines
//! the producer cursor, the sequences of any upstream stages, the wait
//! strategy, and the alert flag used for cooperative shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::disruptor::sequence::Sequence;
use crate::disruptor::sequencer::Sequencer;
use crate::disruptor::wait_strategy::WaitStrategy;
use crate::error::{Result, SurgeError};

/// Coordination point between one consumer and everything it depends on.
pub struct SequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    dependents: Box<[Arc<Sequence>]>,
    alerted: AtomicBool,
}

impl SequenceBarrier {
    /// Create a barrier over `sequencer`, gated on `dependents`.
    ///
    /// With no dependents the consumer tracks the cursor directly; with
    /// dependents it trails the slowest upstream stage.
    pub fn new(sequencer: Arc<dyn Sequencer>, dependents: Vec<Arc<Sequence>>) -> Self {
        let wait_strategy = sequencer.wait_strategy();
        let cursor = sequencer.cursor();
        Self {
            sequencer,
            wait_strategy,
            cursor,
            dependents: dependents.into_boxed_slice(),
            alerted: AtomicBool::new(false),
        }
    }

    /// Wait until `sequence` is available.
    ///
    /// Returns the highest published sequence that is safe to read, which
    /// can exceed `sequence` (a batch) or fall short of it after a spurious
    /// wake, in which case the caller loops.
    ///
    /// # Errors
    ///
    /// [`SurgeError::Alert`] once the barrier is alerted and
    /// [`SurgeError::Timeout`] when the wait strategy gives up.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;

        let result =
            self.wait_strategy
                .wait_for(sequence, &self.cursor, &self.dependents, &self.alerted)?;

        if result.sequence < sequence {
            return Ok(result.sequence);
        }

        Ok(self
            .sequencer
            .highest_published_sequence(sequence, result.sequence))
    }

    /// Current cursor observation
    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    /// Whether the barrier is in the alerted state
    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    /// Alert the barrier and wake any blocked waiter
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
        tracing::debug!("sequence barrier alerted");
    }

    /// Clear the alerted state so waiting can resume
    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// Raise [`SurgeError::Alert`] if the barrier is alerted
    pub fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            return Err(SurgeError::Alert);
        }
        Ok(())
    }
}
