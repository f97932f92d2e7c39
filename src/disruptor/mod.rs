//! Disruptor-style inter-thread event exchange core
//!
//! This module provides the sequenced ring buffer at the heart of Surge:
//! producers claim sequence numbers, write fixed slots in place, and
//! publish; consumer stages observe published sequences strictly in order,
//! optionally forming a dependency graph of processing stages.
//!
//! ## Key Pieces
//!
//! - **Sequence**: cache-line isolated monotonic counter
//! - **Sequencer**: single- and multi-producer claim/publish protocols
//! - **Wait Strategies**: blocking, spinning, yielding, sleeping protocols
//! - **Sequence Barrier**: a consumer's view over the cursor and upstream
//!   stages, with cooperative alerting
//! - **Event Processors**: batch and work-pool consumer loops
//! - **Ring Buffer**: the preallocated slot array tying it together
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use surge::disruptor::{
//!     BatchEventProcessor, EventHandler, RingBuffer, RingBufferConfig, WaitStrategyType,
//! };
//!
//! struct Printer;
//!
//! impl EventHandler<u64> for Printer {
//!     fn on_event(&mut self, event: &u64, sequence: i64, _end_of_batch: bool) -> anyhow::Result<()> {
//!         println!("{sequence}: {event}");
//!         Ok(())
//!     }
//! }
//!
//! let config = RingBufferConfig::new(1024)
//!     .unwrap()
//!     .with_wait_strategy(WaitStrategyType::Yielding);
//! let ring = Arc::new(RingBuffer::<u64>::new(config).unwrap());
//!
//! let processor = Arc::new(BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), Printer));
//! ring.add_gating_sequences(&[processor.sequence()]);
//!
//! let handle = processor.clone().start();
//! ring.publish_with(|slot, _| *slot = 42).unwrap();
//!
//! processor.halt();
//! handle.join().unwrap().unwrap();
//! ```

pub mod barrier;
pub mod handler;
pub mod processor;
pub mod ring_buffer;
pub mod sequence;
pub mod sequencer;
pub mod wait_strategy;

// Re-export main types
pub use barrier::SequenceBarrier;
pub use handler::{EventHandler, ExceptionHandler, LoggingExceptionHandler, WorkHandler};
pub use processor::{BatchEventProcessor, WorkProcessor};
pub use ring_buffer::RingBuffer;
pub use sequence::Sequence;
pub use sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy, TimeoutBlockingWaitStrategy,
    WaitResult, WaitStrategy, YieldingWaitStrategy,
};

use std::time::Duration;

use crate::constants::DEFAULT_RING_BUFFER_SIZE;
use crate::disruptor::sequencer::validate_buffer_size;
use crate::error::Result;

/// Producer regime a ring buffer is constructed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerType {
    /// Exactly one producer thread; claims avoid atomic read-modify-writes
    Single,
    /// Concurrent producer threads; claims are CAS-serialised and publishes
    /// tracked per slot
    Multi,
}

/// Available wait strategies
#[derive(Debug, Clone, Copy)]
pub enum WaitStrategyType {
    /// Condvar park until publish for low CPU with decent latency
    Blocking,
    /// Busy spin for lowest latency
    BusySpin,
    /// Spin then yield for balanced latency and CPU
    Yielding,
    /// Spin, yield, then sleep with backoff for lowest CPU usage
    Sleeping,
    /// Blocking with a deadline surfaced to the handler's timeout hook
    TimeoutBlocking {
        /// Maximum time a single wait may block
        timeout: Duration,
    },
}

/// Configuration for ring buffer behavior
#[derive(Debug, Clone)]
pub struct RingBufferConfig {
    /// Size of the ring buffer (must be power of 2)
    pub size: usize,
    /// Producer regime
    pub producer_type: ProducerType,
    /// Wait strategy for consumers
    pub wait_strategy: WaitStrategyType,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_RING_BUFFER_SIZE,
            producer_type: ProducerType::Single,
            wait_strategy: WaitStrategyType::Blocking,
        }
    }
}

impl RingBufferConfig {
    /// Create a new configuration with the specified size
    pub fn new(size: usize) -> Result<Self> {
        validate_buffer_size(size)?;
        Ok(Self {
            size,
            ..Default::default()
        })
    }

    /// Set the producer regime
    pub fn with_producer_type(mut self, producer_type: ProducerType) -> Self {
        self.producer_type = producer_type;
        self
    }

    /// Set the wait strategy
    pub fn with_wait_strategy(mut self, strategy: WaitStrategyType) -> Self {
        self.wait_strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_config_creation() {
        let config = RingBufferConfig::new(1024).unwrap();
        assert_eq!(config.size, 1024);
        assert_eq!(config.producer_type, ProducerType::Single);
    }

    #[test]
    fn test_ring_buffer_config_invalid_size() {
        assert!(RingBufferConfig::new(0).is_err());
        assert!(RingBufferConfig::new(1023).is_err()); // Not power of 2
        assert!(RingBufferConfig::new((1 << 30) * 2).is_err()); // Too large
    }

    #[test]
    fn test_ring_buffer_config_builder() {
        let config = RingBufferConfig::new(1024)
            .unwrap()
            .with_producer_type(ProducerType::Multi)
            .with_wait_strategy(WaitStrategyType::BusySpin);

        assert_eq!(config.size, 1024);
        assert_eq!(config.producer_type, ProducerType::Multi);
        assert!(matches!(config.wait_strategy, WaitStrategyType::BusySpin));
    }
}
