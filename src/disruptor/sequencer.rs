//! Claim and publish protocols
//!
//! The sequencer owns the producer cursor, the gating view of downstream
//! consumers, and the wait strategy used to signal them. Two variants cover
//! the two producer regimes:
//!
//! - [`SingleProducerSequencer`] keeps its claim state in plain fields and
//!   never issues an atomic RMW on the hot path; the one producer thread is
//!   the only writer.
//! - [`MultiProducerSequencer`] serialises claims with a CAS loop over the
//!   cursor and marks per-slot availability flags on publish, so consumers
//!   can recover the contiguous published prefix from interleaved producers.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use crate::constants::MAX_RING_BUFFER_SIZE;
use crate::disruptor::sequence::{minimum_sequence, Sequence};
use crate::disruptor::wait_strategy::WaitStrategy;
use crate::error::{Result, SurgeError};

/// Validate a ring buffer size at construction time
pub(crate) fn validate_buffer_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(SurgeError::config("Ring buffer size must be greater than 0"));
    }
    if !size.is_power_of_two() {
        return Err(SurgeError::config("Ring buffer size must be power of 2"));
    }
    if size > MAX_RING_BUFFER_SIZE {
        return Err(SurgeError::config(format!(
            "Ring buffer size must not exceed {}",
            MAX_RING_BUFFER_SIZE
        )));
    }
    Ok(())
}

#[inline]
fn validate_claim_batch(n: usize, buffer_size: usize) -> Result<()> {
    if n == 0 {
        return Err(SurgeError::argument("Claim batch must be greater than 0"));
    }
    if n > buffer_size {
        return Err(SurgeError::argument(
            "Claim batch must not exceed the buffer size",
        ));
    }
    Ok(())
}

/// Downstream consumer sequences bounding producer progress.
///
/// Reads happen on every slow-path claim; mutation only at wiring time, so a
/// reader/writer lock keeps the hot path to a single uncontended read lock.
struct GatingSequences {
    sequences: RwLock<Vec<Arc<Sequence>>>,
}

impl GatingSequences {
    fn new() -> Self {
        Self {
            sequences: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, sequences: &[Arc<Sequence>]) {
        let mut guard = self.sequences.write();
        for sequence in sequences {
            guard.push(sequence.clone());
        }
    }

    /// Remove by identity. Returns whether the sequence was present.
    fn remove(&self, sequence: &Arc<Sequence>) -> bool {
        let mut guard = self.sequences.write();
        let before = guard.len();
        guard.retain(|s| !Arc::ptr_eq(s, sequence));
        guard.len() != before
    }

    /// Minimum of the gating set, floored at `minimum` when the set is empty
    fn minimum(&self, minimum: i64) -> i64 {
        minimum_sequence(&self.sequences.read(), minimum)
    }
}

/// Claim/publish contract shared by both producer regimes.
///
/// Producer-side operations (`next*`, `try_next*`, `publish*`, `claim`) obey
/// the regime of the concrete type: the single-producer variant must only be
/// driven from one thread.
pub trait Sequencer: Send + Sync {
    /// Number of slots in the ring
    fn buffer_size(&self) -> usize;

    /// The producer cursor: highest sequence made available to consumers
    /// (single-producer) or highest claimed (multi-producer)
    fn cursor(&self) -> Arc<Sequence>;

    /// The wait strategy consumers of this sequencer block on
    fn wait_strategy(&self) -> Arc<dyn WaitStrategy>;

    /// Whether `required` further sequences can be claimed without
    /// overwriting unconsumed slots
    fn has_available_capacity(&self, required: usize) -> bool;

    /// Claim the next sequence, waiting for capacity
    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    /// Claim the next `n` sequences, waiting for capacity. Returns the
    /// highest claimed sequence; the range is `(hi - n, hi]`.
    fn next_n(&self, n: usize) -> Result<i64>;

    /// Claim the next sequence, failing fast when the ring is full
    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    /// Claim the next `n` sequences without waiting.
    ///
    /// # Errors
    ///
    /// [`SurgeError::InsufficientCapacity`] when the claim would overwrite
    /// slots the slowest consumer has not passed.
    fn try_next_n(&self, n: usize) -> Result<i64>;

    /// Publish a claimed sequence, making its slot visible to consumers
    fn publish(&self, sequence: i64);

    /// Publish a contiguous claimed range `[low, high]`
    fn publish_range(&self, low: i64, high: i64);

    /// Whether `sequence` has been published (single-producer: covered by
    /// the cursor; multi-producer: its availability flag matches)
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `[next_sequence, available_sequence]` that is
    /// safe to read, collapsing out-of-order publishes into a contiguous
    /// prefix
    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

    /// Register consumer sequences that gate producer progress
    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]);

    /// Unregister a gating sequence by identity. In-flight claims are
    /// unaffected. Returns whether the sequence was registered.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum of the gating sequences and the cursor
    fn minimum_gating_sequence(&self) -> i64;

    /// Number of slots currently claimable without blocking
    fn remaining_capacity(&self) -> i64;

    /// Set the cursor directly for recovery.
    ///
    /// Defined only under quiescence: no active producers, no running
    /// processors. Behaviour with live claimants is undefined.
    fn claim(&self, sequence: i64);
}

// ============================================================================
// SingleProducerSequencer
// ============================================================================

/// Claim state owned by the sole producer thread
struct ProducerFields {
    next_value: i64,
    cached_value: i64,
}

/// Sequencer for exactly one producer thread.
///
/// `next_value` and `cached_value` are deliberately non-atomic: the claim
/// protocol guarantees a single writer, so the hot path runs without any
/// atomic read-modify-write. Publication is a single release store to the
/// cursor followed by the wait strategy signal.
pub struct SingleProducerSequencer {
    buffer_size: usize,
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    gating: GatingSequences,
    fields: UnsafeCell<ProducerFields>,
}

// SAFETY: `fields` is only read or written by the sole producer thread, per
// the single-producer contract on the trait. Every other member is Sync.
unsafe impl Send for SingleProducerSequencer {}
unsafe impl Sync for SingleProducerSequencer {}

impl SingleProducerSequencer {
    /// Create a single-producer sequencer
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        validate_buffer_size(buffer_size)?;
        Ok(Self {
            buffer_size,
            cursor: Arc::new(Sequence::new()),
            wait_strategy,
            gating: GatingSequences::new(),
            fields: UnsafeCell::new(ProducerFields {
                next_value: -1,
                cached_value: -1,
            }),
        })
    }

    // Exclusivity comes from the single-producer contract: producer-side
    // entry points only run on the one producer thread.
    #[allow(clippy::mut_from_ref)]
    fn fields(&self) -> &mut ProducerFields {
        unsafe { &mut *self.fields.get() }
    }
}

impl Sequencer for SingleProducerSequencer {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn cursor(&self) -> Arc<Sequence> {
        self.cursor.clone()
    }

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        self.wait_strategy.clone()
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        let fields = self.fields();
        let wrap_point = (fields.next_value + required as i64) - self.buffer_size as i64;

        if wrap_point > fields.cached_value || fields.cached_value > fields.next_value {
            let min_sequence = self.gating.minimum(fields.next_value);
            fields.cached_value = min_sequence;
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }

    fn next_n(&self, n: usize) -> Result<i64> {
        validate_claim_batch(n, self.buffer_size)?;

        let fields = self.fields();
        let next = fields.next_value + n as i64;
        let wrap_point = next - self.buffer_size as i64;

        if wrap_point > fields.cached_value || fields.cached_value > fields.next_value {
            let mut min_sequence = self.gating.minimum(fields.next_value);
            while wrap_point > min_sequence {
                // Gate closed: the slowest consumer still owns the slot
                thread::yield_now();
                min_sequence = self.gating.minimum(fields.next_value);
            }
            fields.cached_value = min_sequence;
        }

        fields.next_value = next;
        Ok(next)
    }

    fn try_next_n(&self, n: usize) -> Result<i64> {
        validate_claim_batch(n, self.buffer_size)?;

        if !self.has_available_capacity(n) {
            return Err(SurgeError::InsufficientCapacity);
        }

        let fields = self.fields();
        fields.next_value += n as i64;
        Ok(fields.next_value)
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _low: i64, high: i64) {
        // A single producer publishes contiguously; the high watermark
        // covers the whole range.
        self.publish(high);
    }

    fn is_available(&self, sequence: i64) -> bool {
        sequence <= self.cursor.get()
    }

    fn highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
        available_sequence
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating.add(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating.remove(sequence)
    }

    fn minimum_gating_sequence(&self) -> i64 {
        self.gating.minimum(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let fields = self.fields();
        let consumed = self.gating.minimum(fields.next_value);
        let produced = fields.next_value;
        self.buffer_size as i64 - (produced - consumed)
    }

    fn claim(&self, sequence: i64) {
        let fields = self.fields();
        fields.next_value = sequence;
        fields.cached_value = self.gating.minimum(sequence);
    }
}

// ============================================================================
// MultiProducerSequencer
// ============================================================================

/// Sequencer for concurrent producer threads.
///
/// The cursor here means "highest claimed": producers race a CAS to extend
/// it, then each fills its own slots and flips the slot's availability flag
/// on publish. The flag stores `sequence >> log2(buffer_size)` so a slot is
/// self-describing per wrap generation and never needs clearing; consumers
/// recover the contiguous published prefix with
/// [`Sequencer::highest_published_sequence`].
pub struct MultiProducerSequencer {
    buffer_size: usize,
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    gating: GatingSequences,
    gating_cache: Sequence,
    available: Box<[AtomicI32]>,
    index_mask: i64,
    index_shift: u32,
}

impl MultiProducerSequencer {
    /// Create a multi-producer sequencer
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        validate_buffer_size(buffer_size)?;
        let available = (0..buffer_size)
            .map(|_| AtomicI32::new(-1))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            buffer_size,
            cursor: Arc::new(Sequence::new()),
            wait_strategy,
            gating: GatingSequences::new(),
            gating_cache: Sequence::new(),
            available,
            index_mask: buffer_size as i64 - 1,
            index_shift: buffer_size.trailing_zeros(),
        })
    }

    #[inline]
    fn availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    #[inline]
    fn set_available(&self, sequence: i64) {
        let index = (sequence & self.index_mask) as usize;
        self.available[index].store(self.availability_flag(sequence), Ordering::Release);
    }

    fn has_capacity(&self, required: usize, cursor_value: i64) -> bool {
        let wrap_point = (cursor_value + required as i64) - self.buffer_size as i64;
        let cached = self.gating_cache.get();

        if wrap_point > cached || cached > cursor_value {
            let min_sequence = self.gating.minimum(cursor_value);
            self.gating_cache.set(min_sequence);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }
}

impl Sequencer for MultiProducerSequencer {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn cursor(&self) -> Arc<Sequence> {
        self.cursor.clone()
    }

    fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        self.wait_strategy.clone()
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        self.has_capacity(required, self.cursor.get())
    }

    fn next_n(&self, n: usize) -> Result<i64> {
        validate_claim_batch(n, self.buffer_size)?;

        loop {
            let current = self.cursor.get();
            let next = current + n as i64;
            let wrap_point = next - self.buffer_size as i64;
            let cached = self.gating_cache.get();

            if wrap_point > cached || cached > current {
                let min_sequence = self.gating.minimum(current);
                if wrap_point > min_sequence {
                    // Gate closed: park briefly and re-read the gate
                    thread::yield_now();
                    continue;
                }
                self.gating_cache.set(min_sequence);
            } else if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn try_next_n(&self, n: usize) -> Result<i64> {
        validate_claim_batch(n, self.buffer_size)?;

        loop {
            let current = self.cursor.get();
            let next = current + n as i64;

            if !self.has_capacity(n, current) {
                return Err(SurgeError::InsufficientCapacity);
            }
            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
            std::hint::spin_loop();
        }
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, low: i64, high: i64) {
        for sequence in low..=high {
            self.set_available(sequence);
        }
        self.wait_strategy.signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        let index = (sequence & self.index_mask) as usize;
        self.available[index].load(Ordering::Acquire) == self.availability_flag(sequence)
    }

    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        for sequence in next_sequence..=available_sequence {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
        }
        available_sequence
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.gating.add(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating.remove(sequence)
    }

    fn minimum_gating_sequence(&self) -> i64 {
        self.gating.minimum(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.gating.minimum(produced);
        self.buffer_size as i64 - (produced - consumed)
    }

    fn claim(&self, sequence: i64) {
        self.cursor.set(sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::wait_strategy::BusySpinWaitStrategy;

    fn single(buffer_size: usize) -> SingleProducerSequencer {
        SingleProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new())).unwrap()
    }

    fn multi(buffer_size: usize) -> MultiProducerSequencer {
        MultiProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new())).unwrap()
    }

    #[test]
    fn test_buffer_size_validation() {
        assert!(SingleProducerSequencer::new(0, Arc::new(BusySpinWaitStrategy::new())).is_err());
        assert!(SingleProducerSequencer::new(1000, Arc::new(BusySpinWaitStrategy::new())).is_err());
        assert!(MultiProducerSequencer::new(7, Arc::new(BusySpinWaitStrategy::new())).is_err());
        assert!(MultiProducerSequencer::new(16, Arc::new(BusySpinWaitStrategy::new())).is_ok());
    }

    #[test]
    fn test_claim_batch_validation() {
        let sequencer = single(8);
        assert!(matches!(
            sequencer.next_n(0),
            Err(SurgeError::InvalidArgument { .. })
        ));
        assert!(matches!(
            sequencer.next_n(9),
            Err(SurgeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_single_producer_claim_and_publish() {
        let sequencer = single(8);
        assert_eq!(sequencer.cursor().get(), -1);

        let seq = sequencer.next().unwrap();
        assert_eq!(seq, 0);
        sequencer.publish(seq);
        assert_eq!(sequencer.cursor().get(), 0);
        assert!(sequencer.is_available(0));

        let hi = sequencer.next_n(3).unwrap();
        assert_eq!(hi, 3);
        sequencer.publish_range(1, 3);
        assert_eq!(sequencer.cursor().get(), 3);
    }

    #[test]
    fn test_single_producer_gating() {
        let sequencer = single(8);
        let consumer = Arc::new(Sequence::new());
        sequencer.add_gating_sequences(std::slice::from_ref(&consumer));

        // Fill the ring
        for _ in 0..8 {
            let seq = sequencer.try_next().unwrap();
            sequencer.publish(seq);
        }
        assert!(!sequencer.has_available_capacity(1));
        assert!(matches!(
            sequencer.try_next(),
            Err(SurgeError::InsufficientCapacity)
        ));
        assert_eq!(sequencer.remaining_capacity(), 0);

        // Consumer frees one slot; one claim becomes possible
        consumer.set(0);
        let seq = sequencer.try_next().unwrap();
        assert_eq!(seq, 8);
        assert!(matches!(
            sequencer.try_next(),
            Err(SurgeError::InsufficientCapacity)
        ));
    }

    #[test]
    fn test_gating_add_remove_idempotent() {
        let sequencer = single(8);
        let consumer = Arc::new(Sequence::new());
        sequencer.add_gating_sequences(std::slice::from_ref(&consumer));
        assert!(sequencer.remove_gating_sequence(&consumer));
        assert!(!sequencer.remove_gating_sequence(&consumer));

        // With the gate gone, claims wrap freely
        for _ in 0..20 {
            let seq = sequencer.try_next().unwrap();
            sequencer.publish(seq);
        }
        assert_eq!(sequencer.cursor().get(), 19);
    }

    #[test]
    fn test_multi_producer_contended_claims() {
        let sequencer = Arc::new(multi(1024));
        // Park the gate far ahead so claims never block
        sequencer.add_gating_sequences(&[Arc::new(Sequence::with_value(1 << 40))]);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sequencer = sequencer.clone();
            handles.push(thread::spawn(move || {
                let mut claimed = Vec::with_capacity(250);
                for _ in 0..250 {
                    claimed.push(sequencer.next().unwrap());
                }
                claimed
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<i64> = (0..1000).collect();
        assert_eq!(all, expected);
        assert_eq!(sequencer.cursor().get(), 999);
    }

    #[test]
    fn test_multi_producer_highest_published() {
        let sequencer = multi(16);
        // Claim a range, publish it with a hole at 2
        let hi = sequencer.next_n(5).unwrap();
        assert_eq!(hi, 4);
        sequencer.publish(0);
        sequencer.publish(1);
        sequencer.publish(3);
        sequencer.publish(4);

        assert_eq!(sequencer.highest_published_sequence(0, 4), 1);
        sequencer.publish(2);
        assert_eq!(sequencer.highest_published_sequence(0, 4), 4);
    }

    #[test]
    fn test_availability_flags_across_generations() {
        let sequencer = multi(8);
        sequencer.add_gating_sequences(&[Arc::new(Sequence::with_value(100))]);

        let hi = sequencer.next_n(8).unwrap();
        sequencer.publish_range(0, hi);
        assert!(sequencer.is_available(0));
        // Same slot, next generation: not yet published
        assert!(!sequencer.is_available(8));

        let hi = sequencer.next().unwrap();
        assert_eq!(hi, 8);
        sequencer.publish(8);
        assert!(sequencer.is_available(8));
        assert!(!sequencer.is_available(0));
    }

    #[test]
    fn test_multi_producer_try_next_capacity() {
        let sequencer = multi(8);
        let consumer = Arc::new(Sequence::new());
        sequencer.add_gating_sequences(std::slice::from_ref(&consumer));

        let hi = sequencer.try_next_n(8).unwrap();
        sequencer.publish_range(0, hi);
        assert!(matches!(
            sequencer.try_next(),
            Err(SurgeError::InsufficientCapacity)
        ));

        consumer.set(3);
        let hi = sequencer.try_next_n(4).unwrap();
        assert_eq!(hi, 11);
    }

    #[test]
    fn test_claim_resets_cursor() {
        let sequencer = multi(8);
        sequencer.claim(41);
        assert_eq!(sequencer.cursor().get(), 41);

        let single = single(8);
        single.claim(41);
        let seq = single.try_next().unwrap();
        assert_eq!(seq, 42);
    }
}
