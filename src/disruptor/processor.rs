//! Event processor loops
//!
//! A processor drives one consumer across the ring: it owns the consumer's
//! sequence, waits on a barrier, and hands batches of published events to a
//! handler. [`BatchEventProcessor`] gives every event to its handler;
//! [`WorkProcessor`] instances share a work sequence so a pool of them
//! partitions the stream, each sequence processed exactly once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::disruptor::barrier::SequenceBarrier;
use crate::disruptor::handler::{EventHandler, ExceptionHandler, LoggingExceptionHandler, WorkHandler};
use crate::disruptor::ring_buffer::RingBuffer;
use crate::disruptor::sequence::Sequence;
use crate::error::{Result, SurgeError};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const HALTED: u8 = 2;

struct BatchCell<T, H> {
    handler: H,
    exception_handler: Box<dyn ExceptionHandler<T>>,
}

/// Drives a single consumer, invoking its handler for every event in
/// sequence order with batch boundaries marked.
pub struct BatchEventProcessor<T, H: EventHandler<T>> {
    ring: Arc<RingBuffer<T>>,
    barrier: SequenceBarrier,
    sequence: Arc<Sequence>,
    running: AtomicU8,
    cell: Mutex<BatchCell<T, H>>,
}

impl<T, H> BatchEventProcessor<T, H>
where
    T: Send,
    H: EventHandler<T>,
{
    /// Create a processor over `ring`, waiting on `barrier`.
    ///
    /// The handler receives the processor's sequence through its
    /// sequence-callback capability before the first event.
    pub fn new(ring: Arc<RingBuffer<T>>, barrier: SequenceBarrier, mut handler: H) -> Self {
        let sequence = Arc::new(Sequence::new());
        handler.set_sequence_callback(sequence.clone());
        Self {
            ring,
            barrier,
            sequence,
            running: AtomicU8::new(IDLE),
            cell: Mutex::new(BatchCell {
                handler,
                exception_handler: Box::new(LoggingExceptionHandler),
            }),
        }
    }

    /// Replace the default logging exception handler
    pub fn with_exception_handler(self, exception_handler: Box<dyn ExceptionHandler<T>>) -> Self {
        self.cell.lock().exception_handler = exception_handler;
        self
    }

    /// This consumer's sequence: the last fully processed event.
    ///
    /// Register it as a gating sequence on the ring once the processor is
    /// wired.
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    /// Whether the processor loop is active (running or shutting down)
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != IDLE
    }

    /// Request shutdown: the loop exits at its next wait
    pub fn halt(&self) {
        self.running.store(HALTED, Ordering::Release);
        tracing::debug!("event processor halt requested");
        self.barrier.alert();
    }

    /// Run the event loop on the calling thread until halted.
    ///
    /// # Errors
    ///
    /// Fails when the processor is already running; handler faults never
    /// propagate here.
    pub fn run(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SurgeError::config("event processor already running"));
        }
        self.barrier.clear_alert();

        let mut cell = self.cell.lock();
        let BatchCell {
            handler,
            exception_handler,
        } = &mut *cell;

        tracing::debug!("event processor starting");
        if let Err(error) = handler.on_start() {
            exception_handler.handle_on_start_error(error);
        }

        let mut next_sequence = self.sequence.get() + 1;
        loop {
            match self.barrier.wait_for(next_sequence) {
                Ok(available) if available >= next_sequence => {
                    let mut faulted = None;
                    let mut sequence = next_sequence;
                    while sequence <= available {
                        let event = self.ring.get(sequence);
                        if let Err(error) = handler.on_event(event, sequence, sequence == available)
                        {
                            faulted = Some(error);
                            break;
                        }
                        sequence += 1;
                    }

                    if let Some(error) = faulted {
                        // Delegate the fault and advance past the faulting
                        // slot so the pipeline cannot deadlock on it.
                        exception_handler.handle_event_error(error, sequence, self.ring.get(sequence));
                        self.sequence.set(sequence);
                        next_sequence = sequence + 1;
                    } else {
                        self.sequence.set(available);
                        next_sequence = available + 1;
                    }
                }
                Ok(_) | Err(SurgeError::Timeout) => {
                    // Spurious wake or wait deadline; the sequence holds
                    if let Err(error) = handler.on_timeout(next_sequence - 1) {
                        exception_handler.handle_timeout_error(error, next_sequence - 1);
                    }
                }
                Err(_) => {
                    // Alerted; leave only when a halt was requested
                    if self.running.load(Ordering::Acquire) != RUNNING {
                        break;
                    }
                }
            }
        }

        if let Err(error) = handler.on_shutdown() {
            exception_handler.handle_on_shutdown_error(error);
        }
        tracing::debug!(sequence = self.sequence.get(), "event processor halted");

        drop(cell);
        self.running.store(IDLE, Ordering::Release);
        Ok(())
    }
}

impl<T, H> BatchEventProcessor<T, H>
where
    T: Send + 'static,
    H: EventHandler<T> + 'static,
{
    /// Spawn the event loop on a new thread
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        std::thread::spawn(move || self.run())
    }
}

struct WorkCell<T, H> {
    handler: H,
    exception_handler: Box<dyn ExceptionHandler<T>>,
}

/// One worker of a pool sharing a single logical queue over the ring.
///
/// Workers contend to CAS the shared work sequence forward; the winner of
/// each increment owns that sequence exclusively. Register every worker's
/// [`WorkProcessor::sequence`] as a gating sequence.
pub struct WorkProcessor<T, H: WorkHandler<T>> {
    ring: Arc<RingBuffer<T>>,
    barrier: SequenceBarrier,
    sequence: Arc<Sequence>,
    work_sequence: Arc<Sequence>,
    running: AtomicU8,
    cell: Mutex<WorkCell<T, H>>,
}

impl<T, H> WorkProcessor<T, H>
where
    T: Send,
    H: WorkHandler<T>,
{
    /// Create a worker over `ring` claiming from the shared `work_sequence`
    pub fn new(
        ring: Arc<RingBuffer<T>>,
        barrier: SequenceBarrier,
        work_sequence: Arc<Sequence>,
        handler: H,
    ) -> Self {
        Self {
            ring,
            barrier,
            sequence: Arc::new(Sequence::new()),
            work_sequence,
            running: AtomicU8::new(IDLE),
            cell: Mutex::new(WorkCell {
                handler,
                exception_handler: Box::new(LoggingExceptionHandler),
            }),
        }
    }

    /// Replace the default logging exception handler
    pub fn with_exception_handler(self, exception_handler: Box<dyn ExceptionHandler<T>>) -> Self {
        self.cell.lock().exception_handler = exception_handler;
        self
    }

    /// This worker's gating sequence
    pub fn sequence(&self) -> Arc<Sequence> {
        self.sequence.clone()
    }

    /// Whether the worker loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != IDLE
    }

    /// Request shutdown: the loop exits at its next wait
    pub fn halt(&self) {
        self.running.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }

    /// Run the worker loop on the calling thread until halted.
    ///
    /// # Errors
    ///
    /// Fails when the worker is already running; handler faults never
    /// propagate here.
    pub fn run(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SurgeError::config("work processor already running"));
        }
        self.barrier.clear_alert();

        let mut cell = self.cell.lock();
        let WorkCell {
            handler,
            exception_handler,
        } = &mut *cell;

        let mut processed = true;
        let mut cached_available = i64::MIN;
        let mut next_sequence = self.sequence.get();

        loop {
            if processed {
                // Claim the next sequence exclusively. Publishing our own
                // progress before the CAS keeps the gating view honest.
                processed = false;
                loop {
                    next_sequence = self.work_sequence.get() + 1;
                    self.sequence.set(next_sequence - 1);
                    if self
                        .work_sequence
                        .compare_and_set(next_sequence - 1, next_sequence)
                    {
                        break;
                    }
                }
            }

            if cached_available >= next_sequence {
                let event = self.ring.get(next_sequence);
                if let Err(error) = handler.on_event(event, next_sequence) {
                    exception_handler.handle_event_error(error, next_sequence, event);
                }
                processed = true;
            } else {
                match self.barrier.wait_for(next_sequence) {
                    Ok(available) => cached_available = available,
                    Err(SurgeError::Timeout) => {}
                    Err(_) => {
                        if self.running.load(Ordering::Acquire) != RUNNING {
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!(sequence = self.sequence.get(), "work processor halted");
        drop(cell);
        self.running.store(IDLE, Ordering::Release);
        Ok(())
    }
}

impl<T, H> WorkProcessor<T, H>
where
    T: Send + 'static,
    H: WorkHandler<T> + 'static,
{
    /// Spawn the worker loop on a new thread
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        std::thread::spawn(move || self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{RingBufferConfig, WaitStrategyType};
    use std::time::{Duration, Instant};

    fn ring(size: usize) -> Arc<RingBuffer<u64>> {
        Arc::new(
            RingBuffer::new(
                RingBufferConfig::new(size)
                    .unwrap()
                    .with_wait_strategy(WaitStrategyType::BusySpin),
            )
            .unwrap(),
        )
    }

    struct Collector {
        seen: Arc<Mutex<Vec<(i64, u64, bool)>>>,
    }

    impl EventHandler<u64> for Collector {
        fn on_event(&mut self, event: &u64, sequence: i64, end_of_batch: bool) -> anyhow::Result<()> {
            self.seen.lock().push((sequence, *event, end_of_batch));
            Ok(())
        }
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::yield_now();
        }
        condition()
    }

    #[test]
    fn test_batch_processor_consumes_in_order() {
        let ring = ring(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = Arc::new(BatchEventProcessor::new(
            ring.clone(),
            ring.new_barrier(&[]),
            Collector { seen: seen.clone() },
        ));
        ring.add_gating_sequences(&[processor.sequence()]);

        let handle = processor.clone().start();
        for value in 0..100u64 {
            ring.publish_with(|slot, _| *slot = value).unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || {
            processor.sequence.get() == 99
        }));
        processor.halt();
        handle.join().unwrap().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 100);
        for (i, (sequence, value, _)) in seen.iter().enumerate() {
            assert_eq!(*sequence, i as i64);
            assert_eq!(*value, i as u64);
        }
        assert!(seen.last().unwrap().2, "final event closes its batch");
    }

    struct FaultAt {
        fault_sequence: i64,
        seen: Arc<Mutex<Vec<i64>>>,
    }

    impl EventHandler<u64> for FaultAt {
        fn on_event(&mut self, _event: &u64, sequence: i64, _end_of_batch: bool) -> anyhow::Result<()> {
            if sequence == self.fault_sequence {
                anyhow::bail!("injected fault at {sequence}");
            }
            self.seen.lock().push(sequence);
            Ok(())
        }
    }

    struct FaultRecorder {
        faults: Arc<Mutex<Vec<i64>>>,
    }

    impl ExceptionHandler<u64> for FaultRecorder {
        fn handle_event_error(&mut self, _error: anyhow::Error, sequence: i64, _event: &u64) {
            self.faults.lock().push(sequence);
        }
    }

    #[test]
    fn test_handler_fault_is_delegated_and_skipped() {
        let ring = ring(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let faults = Arc::new(Mutex::new(Vec::new()));
        let processor = Arc::new(
            BatchEventProcessor::new(
                ring.clone(),
                ring.new_barrier(&[]),
                FaultAt {
                    fault_sequence: 3,
                    seen: seen.clone(),
                },
            )
            .with_exception_handler(Box::new(FaultRecorder {
                faults: faults.clone(),
            })),
        );
        ring.add_gating_sequences(&[processor.sequence()]);

        let handle = processor.clone().start();
        for value in 0..8u64 {
            ring.publish_with(|slot, _| *slot = value).unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || {
            processor.sequence.get() == 7
        }));
        processor.halt();
        handle.join().unwrap().unwrap();

        assert_eq!(*faults.lock(), vec![3]);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 4, 5, 6, 7]);
    }

    #[test]
    fn test_run_rejects_concurrent_invocation() {
        let ring = ring(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = Arc::new(BatchEventProcessor::new(
            ring.clone(),
            ring.new_barrier(&[]),
            Collector { seen },
        ));

        let handle = processor.clone().start();
        assert!(wait_until(Duration::from_secs(1), || processor.is_running()));
        assert!(processor.run().is_err());

        processor.halt();
        handle.join().unwrap().unwrap();
        assert!(!processor.is_running());
    }

    struct CountingWorker {
        seen: Arc<Mutex<Vec<i64>>>,
    }

    impl WorkHandler<u64> for CountingWorker {
        fn on_event(&mut self, _event: &u64, sequence: i64) -> anyhow::Result<()> {
            self.seen.lock().push(sequence);
            Ok(())
        }
    }

    #[test]
    fn test_work_pool_partitions_sequences() {
        let ring = ring(64);
        let work_sequence = Arc::new(Sequence::new());
        let seen: Vec<Arc<Mutex<Vec<i64>>>> =
            (0..2).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

        let workers: Vec<Arc<WorkProcessor<u64, CountingWorker>>> = seen
            .iter()
            .map(|seen| {
                Arc::new(WorkProcessor::new(
                    ring.clone(),
                    ring.new_barrier(&[]),
                    work_sequence.clone(),
                    CountingWorker { seen: seen.clone() },
                ))
            })
            .collect();
        let gating: Vec<Arc<Sequence>> = workers.iter().map(|w| w.sequence()).collect();
        ring.add_gating_sequences(&gating);

        let handles: Vec<_> = workers.iter().map(|w| w.clone().start()).collect();
        for value in 0..200u64 {
            ring.publish_with(|slot, _| *slot = value).unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || {
            seen.iter().map(|s| s.lock().len()).sum::<usize>() == 200
        }));
        for worker in &workers {
            worker.halt();
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let mut all: Vec<i64> = seen.iter().flat_map(|s| s.lock().clone()).collect();
        all.sort_unstable();
        let expected: Vec<i64> = (0..200).collect();
        assert_eq!(all, expected, "each sequence processed exactly once");
    }
}
