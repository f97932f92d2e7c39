//! Cache-line isolated sequence counters
//!
//! A [`Sequence`] is the shared building block of the whole pipeline: the
//! producer cursor, every consumer's progress marker, and the gating view
//! all are sequences. Each one is a monotonic 64-bit signed counter starting
//! at `-1`, padded to occupy its own pair of cache lines so that two hot
//! counters never share a line.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use static_assertions::const_assert_eq;

use crate::constants::INITIAL_CURSOR_VALUE;

/// Cache-line padded monotonic sequence counter.
///
/// Uses 128-byte alignment to prevent false sharing on modern Intel CPUs
/// that prefetch two cache lines at a time.
#[repr(align(128))]
pub struct Sequence {
    value: AtomicI64,
    _padding: [u8; 120], // 128 - 8 bytes for AtomicI64
}

const_assert_eq!(std::mem::size_of::<Sequence>(), 128);
const_assert_eq!(std::mem::align_of::<Sequence>(), 128);

impl Sequence {
    /// Create a sequence with an explicit initial value
    pub fn with_value(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            _padding: [0; 120],
        }
    }

    /// Create a sequence at the initial cursor value (`-1`)
    pub fn new() -> Self {
        Self::with_value(INITIAL_CURSOR_VALUE)
    }

    /// Read the current value with acquire ordering.
    ///
    /// Pairs with [`Sequence::set`] on the publishing side so that slot
    /// writes made before the release store are visible after this load.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Write a new value with release ordering
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Read the current value with relaxed ordering.
    ///
    /// Only valid on fast paths where the reader is the counter's sole
    /// writer, such as the single-producer claim state.
    #[inline]
    pub fn get_relaxed(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Write a new value with relaxed ordering (sole-writer fast path)
    #[inline]
    pub fn set_relaxed(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Atomically replace `expected` with `new`.
    ///
    /// Returns `true` if the swap happened. Serialises competing
    /// multi-producer claims.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add one and return the new value
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Atomically add `n` and return the new value
    #[inline]
    pub fn add_and_get(&self, n: i64) -> i64 {
        self.value.fetch_add(n, Ordering::AcqRel) + n
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

/// Minimum over a set of sequences, floored at `minimum`.
///
/// Returns `minimum` when the slice is empty. Re-reads every member on each
/// call; the values move constantly and must not be cached here.
#[inline]
pub fn minimum_sequence(sequences: &[Arc<Sequence>], minimum: i64) -> i64 {
    let mut min = minimum;
    for sequence in sequences {
        let value = sequence.get();
        if value < min {
            min = value;
        }
    }
    min
}
