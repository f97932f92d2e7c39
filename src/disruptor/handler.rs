//! Consumer-side contracts
//!
//! Handlers are the user code a processor drives. The optional lifecycle,
//! timeout, and sequence-callback hooks have default no-op bodies, so a
//! handler opts into exactly the capabilities it needs. Any hook may fail;
//! failures are delegated to the processor's [`ExceptionHandler`] and never
//! escape the event loop.

use std::sync::Arc;

use crate::disruptor::sequence::Sequence;

/// Callback contract for a batch event processor.
pub trait EventHandler<T>: Send {
    /// Process one event. `end_of_batch` marks the last event of the
    /// contiguous range the processor claimed in this iteration.
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) -> anyhow::Result<()>;

    /// Called once on the processor thread before the first wait
    fn on_start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once on the processor thread before it exits
    fn on_shutdown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when a timeout-variant wait strategy gives up. `sequence` is
    /// the last sequence this consumer fully processed.
    fn on_timeout(&mut self, _sequence: i64) -> anyhow::Result<()> {
        Ok(())
    }

    /// Receives the processor's own sequence at startup. A handler that
    /// keeps the reference may advance it mid-batch to release slots early
    /// on large batches.
    fn set_sequence_callback(&mut self, _sequence: Arc<Sequence>) {}
}

/// Callback contract for a work processor.
///
/// Work handlers share one logical queue over the ring: each published
/// sequence is handed to exactly one of the pool's handlers.
pub trait WorkHandler<T>: Send {
    /// Process one event exclusively claimed by this worker
    fn on_event(&mut self, event: &T, sequence: i64) -> anyhow::Result<()>;
}

/// Receives handler faults the processor captured.
///
/// The lifecycle and timeout hooks default to structured error logs;
/// `handle_event_error` is the one decision an implementation must make.
pub trait ExceptionHandler<T>: Send {
    /// A fault from `on_event`. The processor advances past `sequence`
    /// after this returns.
    fn handle_event_error(&mut self, error: anyhow::Error, sequence: i64, event: &T);

    /// A fault from `on_start`
    fn handle_on_start_error(&mut self, error: anyhow::Error) {
        tracing::error!(%error, "handler fault during startup");
    }

    /// A fault from `on_shutdown`
    fn handle_on_shutdown_error(&mut self, error: anyhow::Error) {
        tracing::error!(%error, "handler fault during shutdown");
    }

    /// A fault from `on_timeout`
    fn handle_timeout_error(&mut self, error: anyhow::Error, sequence: i64) {
        tracing::error!(%error, sequence, "handler fault during timeout notification");
    }
}

/// Default exception handler: records every fault via `tracing` and keeps
/// the processor alive.
pub struct LoggingExceptionHandler;

impl<T> ExceptionHandler<T> for LoggingExceptionHandler {
    fn handle_event_error(&mut self, error: anyhow::Error, sequence: i64, _event: &T) {
        tracing::error!(%error, sequence, "handler fault while processing event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Vec<i64>,
        started: bool,
    }

    impl EventHandler<u64> for Recorder {
        fn on_event(&mut self, _event: &u64, sequence: i64, _end_of_batch: bool) -> anyhow::Result<()> {
            self.seen.push(sequence);
            Ok(())
        }

        fn on_start(&mut self) -> anyhow::Result<()> {
            self.started = true;
            Ok(())
        }
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let mut handler = Recorder {
            seen: Vec::new(),
            started: false,
        };
        handler.on_start().unwrap();
        handler.on_event(&7, 0, true).unwrap();
        handler.on_timeout(0).unwrap();
        handler.on_shutdown().unwrap();
        handler.set_sequence_callback(Arc::new(Sequence::new()));

        assert!(handler.started);
        assert_eq!(handler.seen, vec![0]);
    }

    #[test]
    fn test_logging_exception_handler_accepts_faults() {
        let mut handler = LoggingExceptionHandler;
        ExceptionHandler::<u64>::handle_event_error(
            &mut handler,
            anyhow::anyhow!("boom"),
            3,
            &0u64,
        );
        ExceptionHandler::<u64>::handle_on_start_error(&mut handler, anyhow::anyhow!("boom"));
    }
}
