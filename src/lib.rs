//! Surge - Lock-free inter-thread event exchange core

pub mod constants;
pub mod disruptor;
pub mod error;

// Re-export main components
pub use disruptor::{
    BatchEventProcessor, EventHandler, ExceptionHandler, ProducerType, RingBuffer,
    RingBufferConfig, Sequence, SequenceBarrier, Sequencer, WaitStrategy, WaitStrategyType,
    WorkHandler, WorkProcessor,
};
pub use error::{Result, SurgeError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
