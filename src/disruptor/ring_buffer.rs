//! Ring buffer shell
//!
//! [`RingBuffer`] owns the preallocated slot array and delegates all
//! sequencing decisions to its sequencer. Slot contents are opaque to the
//! core: exclusivity is enforced by the claim/publish protocol, not by
//! locks, so slot accessors are thin index operations over `sequence &
//! (size - 1)`.

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::disruptor::barrier::SequenceBarrier;
use crate::disruptor::sequence::Sequence;
use crate::disruptor::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::disruptor::wait_strategy::WaitStrategyFactory;
use crate::disruptor::{ProducerType, RingBufferConfig};
use crate::error::Result;

/// Preallocated event exchange ring.
///
/// # Thread Safety
///
/// A slot is mutable by exactly one agent at a time: the producer that
/// claimed its sequence until publish, then readers in sequence order until
/// the slowest gating consumer passes it. All cross-thread visibility comes
/// from the release/acquire pairing on sequence counters.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: i64,
    sequencer: Arc<dyn Sequencer>,
}

// SAFETY: slots are only aliased according to the sequencing protocol
// described above; the sequencer serialises claims and the release/acquire
// sequence updates publish slot writes to readers.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring buffer with default-initialised slots
    pub fn new(config: RingBufferConfig) -> Result<Self>
    where
        T: Default,
    {
        Self::with_event_factory(config, |_| T::default())
    }

    /// Create a ring buffer, initialising each slot from a factory
    pub fn with_event_factory(
        config: RingBufferConfig,
        mut factory: impl FnMut(i64) -> T,
    ) -> Result<Self> {
        let wait_strategy = WaitStrategyFactory::create_strategy(config.wait_strategy);
        let sequencer: Arc<dyn Sequencer> = match config.producer_type {
            ProducerType::Single => {
                Arc::new(SingleProducerSequencer::new(config.size, wait_strategy)?)
            }
            ProducerType::Multi => {
                Arc::new(MultiProducerSequencer::new(config.size, wait_strategy)?)
            }
        };

        let slots = (0..config.size as i64)
            .map(|i| UnsafeCell::new(factory(i)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            slots,
            mask: config.size as i64 - 1,
            sequencer,
        })
    }

    /// Number of slots
    pub fn buffer_size(&self) -> usize {
        self.sequencer.buffer_size()
    }

    /// Current producer cursor value
    pub fn cursor(&self) -> i64 {
        self.sequencer.cursor().get()
    }

    /// The underlying sequencer
    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }

    /// Claim the next sequence, waiting for capacity
    pub fn next(&self) -> Result<i64> {
        self.sequencer.next()
    }

    /// Claim the next `n` sequences, waiting for capacity
    pub fn next_n(&self, n: usize) -> Result<i64> {
        self.sequencer.next_n(n)
    }

    /// Claim the next sequence, failing fast when the ring is full
    pub fn try_next(&self) -> Result<i64> {
        self.sequencer.try_next()
    }

    /// Claim the next `n` sequences without waiting
    pub fn try_next_n(&self, n: usize) -> Result<i64> {
        self.sequencer.try_next_n(n)
    }

    /// Publish a claimed sequence
    pub fn publish(&self, sequence: i64) {
        self.sequencer.publish(sequence);
    }

    /// Publish a contiguous claimed range `[low, high]`
    pub fn publish_range(&self, low: i64, high: i64) {
        self.sequencer.publish_range(low, high);
    }

    /// Whether `required` further sequences can be claimed right now
    pub fn has_available_capacity(&self, required: usize) -> bool {
        self.sequencer.has_available_capacity(required)
    }

    /// Number of slots currently claimable without blocking
    pub fn remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    /// Read the slot for `sequence`.
    ///
    /// The caller must hold a sequencing guarantee that the slot is
    /// readable: the sequence was published and a gating sequence keeps
    /// producers from reclaiming it.
    #[inline]
    pub fn get(&self, sequence: i64) -> &T {
        let index = (sequence & self.mask) as usize;
        unsafe { &*self.slots[index].get() }
    }

    /// Write access to the slot for `sequence`.
    ///
    /// # Safety
    ///
    /// - `sequence` must have been claimed via `next`/`try_next` and not
    ///   yet published.
    /// - Only the claiming producer may hold this reference, and it must be
    ///   dropped before `publish(sequence)`.
    #[inline]
    #[allow(clippy::mut_from_ref)] // exclusivity comes from the claim protocol
    pub unsafe fn get_mut(&self, sequence: i64) -> &mut T {
        let index = (sequence & self.mask) as usize;
        &mut *self.slots[index].get()
    }

    /// Claim one slot, write it in place, publish it. Blocks for capacity.
    pub fn publish_with<F>(&self, write: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        let sequence = self.sequencer.next()?;
        // SAFETY: the claim grants exclusive slot ownership until publish
        write(unsafe { self.get_mut(sequence) }, sequence);
        self.sequencer.publish(sequence);
        Ok(sequence)
    }

    /// Claim one slot, write it in place, publish it. Fails fast when full.
    pub fn try_publish_with<F>(&self, write: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        let sequence = self.sequencer.try_next()?;
        // SAFETY: the claim grants exclusive slot ownership until publish
        write(unsafe { self.get_mut(sequence) }, sequence);
        self.sequencer.publish(sequence);
        Ok(sequence)
    }

    /// Claim `n` slots, write each in place, publish the range. Fails fast
    /// when the full batch does not fit.
    pub fn try_publish_batch_with<F>(&self, n: usize, mut write: F) -> Result<i64>
    where
        F: FnMut(&mut T, i64),
    {
        let high = self.sequencer.try_next_n(n)?;
        let low = high - n as i64 + 1;
        for sequence in low..=high {
            // SAFETY: the claim grants exclusive slot ownership until publish
            write(unsafe { self.get_mut(sequence) }, sequence);
        }
        self.sequencer.publish_range(low, high);
        Ok(high)
    }

    /// Create a barrier for a consumer of this ring, gated on `dependents`
    pub fn new_barrier(&self, dependents: &[Arc<Sequence>]) -> SequenceBarrier {
        SequenceBarrier::new(self.sequencer.clone(), dependents.to_vec())
    }

    /// Register consumer sequences that gate producer progress
    pub fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.sequencer.add_gating_sequences(sequences);
    }

    /// Unregister a gating sequence. Returns whether it was registered.
    pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.sequencer.remove_gating_sequence(sequence)
    }

    /// Minimum of the gating sequences and the cursor
    pub fn minimum_gating_sequence(&self) -> i64 {
        self.sequencer.minimum_gating_sequence()
    }

    /// Reset the ring to `sequence` for recovery.
    ///
    /// Admin-only. Defined only under quiescence: no active producers and
    /// no running processors. Consumers wired afterwards start from
    /// `sequence + 1`.
    pub fn reset_to(&self, sequence: i64) {
        self.sequencer.claim(sequence);
        self.sequencer.publish(sequence);
    }
}
