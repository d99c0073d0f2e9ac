// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous line dispatch.
//!
//! Producers hand lines to a [`DispatchHandle`] (or the [`Dispatcher`] itself),
//! which only enqueues. One dedicated worker thread owns the wrapped sink and
//! ships lines strictly in enqueue order.
//!
//! ```text
//!    Handles (Clone)  ──Line/Shutdown──▶  unbounded channel  ──▶  worker thread
//!                                                                  │ owns sink
//!                                                                  ▼
//!                                                             TransportWriter
//! ```
//!
//! Closing sends `Shutdown` behind whatever is already queued, then waits up to
//! the grace period for the worker to reach it. If the worker is still busy
//! after that, the remaining lines are discarded and the sink's connection is
//! interrupted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DEFAULT_SHUTDOWN_GRACE_PERIOD;
use crate::error::ShipError;
use crate::sink::{Interrupter, LineSink};

const WORKER_THREAD_NAME: &str = "insight-dispatch";

#[derive(Debug)]
pub(crate) enum DispatchCommand {
    Line(String),
    Shutdown,
}

/// Cloneable producer side of the dispatch queue.
#[derive(Clone, Debug)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
    accepting: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl DispatchHandle {
    /// Queues a line for shipping. Never blocks.
    pub fn submit(&self, line: impl Into<String>) -> Result<(), ShipError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ShipError::Capture("dispatcher is closed".to_string()));
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx
            .send(DispatchCommand::Line(line.into()))
            .map_err(|_| {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                ShipError::Capture("dispatch worker has stopped".to_string())
            })
    }

    /// Number of lines queued or in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

struct Worker<S> {
    sink: S,
    rx: mpsc::UnboundedReceiver<DispatchCommand>,
    cancel: CancellationToken,
    pending: Arc<AtomicUsize>,
    done_tx: std_mpsc::Sender<()>,
}

impl<S: LineSink> Worker<S> {
    fn run(mut self) {
        debug!("Dispatch worker started");

        let mut failed = 0usize;
        let mut discarded = 0usize;
        while let Some(command) = self.rx.blocking_recv() {
            match command {
                DispatchCommand::Line(line) => {
                    if self.cancel.is_cancelled() {
                        discarded += 1;
                        self.pending.fetch_sub(1, Ordering::AcqRel);
                        break;
                    }
                    failed += usize::from(!self.ship(&line));
                }
                DispatchCommand::Shutdown => {
                    debug!("Dispatch worker shutting down");
                    break;
                }
            }
        }

        // Any submit after this fails, so only lines that raced the shutdown remain
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            let DispatchCommand::Line(line) = command else {
                continue;
            };
            if self.cancel.is_cancelled() {
                discarded += 1;
                self.pending.fetch_sub(1, Ordering::AcqRel);
            } else {
                failed += usize::from(!self.ship(&line));
            }
        }

        if failed > 0 {
            warn!("Total of {failed} lines failed to ship");
        }
        if discarded > 0 {
            warn!("Discarded {discarded} queued line(s) after shutdown timed out");
        }

        if let Err(e) = self.sink.close() {
            warn!("Failed to close line sink: {e}");
        }
        // The dispatcher may have stopped waiting already
        let _ = self.done_tx.send(());
        debug!("Dispatch worker stopped");
    }

    /// Writes one line, returning whether it was shipped.
    fn ship(&mut self, line: &str) -> bool {
        let shipped = match self.sink.write_line(line) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping line: {e}");
                false
            }
        };
        self.pending.fetch_sub(1, Ordering::AcqRel);
        shipped
    }
}

pub struct Dispatcher {
    handle: DispatchHandle,
    cancel: CancellationToken,
    interrupter: Option<Interrupter>,
    done_rx: std_mpsc::Receiver<()>,
    worker: Option<JoinHandle<()>>,
    grace_period: Duration,
}

impl Dispatcher {
    /// Starts the worker thread that owns `sink`, with the default grace period.
    pub fn spawn<S: LineSink + 'static>(sink: S) -> Result<Self, ShipError> {
        Self::with_grace_period(sink, DEFAULT_SHUTDOWN_GRACE_PERIOD)
    }

    pub fn with_grace_period<S: LineSink + 'static>(
        sink: S,
        grace_period: Duration,
    ) -> Result<Self, ShipError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = std_mpsc::channel();
        let cancel = CancellationToken::new();
        let pending = Arc::new(AtomicUsize::new(0));
        let interrupter = sink.interrupter();

        let worker = Worker {
            sink,
            rx,
            cancel: cancel.clone(),
            pending: Arc::clone(&pending),
            done_tx,
        };
        let join_handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(ShipError::Spawn)?;

        Ok(Self {
            handle: DispatchHandle {
                tx,
                accepting: Arc::new(AtomicBool::new(true)),
                pending,
            },
            cancel,
            interrupter,
            done_rx,
            worker: Some(join_handle),
            grace_period,
        })
    }

    #[must_use]
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.worker.is_none()
    }

    fn shutdown(&mut self) -> Result<(), ShipError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.handle.accepting.store(false, Ordering::Release);
        // Fails only if the worker is already gone, which the wait below reports
        let _ = self.handle.tx.send(DispatchCommand::Shutdown);

        match self.done_rx.recv_timeout(self.grace_period) {
            Ok(()) => {
                if worker.join().is_err() {
                    warn!("Dispatch worker panicked during shutdown");
                }
                Ok(())
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                let pending = self.handle.pending();
                self.cancel.cancel();
                if let Some(interrupt) = self.interrupter.take() {
                    interrupt();
                }
                let err = ShipError::DrainTimeout {
                    pending,
                    grace: self.grace_period,
                };
                warn!("{err}");
                // The worker closes the sink once its current write returns
                drop(worker);
                Err(err)
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                warn!("Dispatch worker exited before shutdown completed");
                let _ = worker.join();
                Ok(())
            }
        }
    }
}

impl LineSink for Dispatcher {
    fn write_line(&mut self, line: &str) -> Result<(), ShipError> {
        self.handle.submit(line)
    }

    /// Stops accepting lines and waits up to the grace period for the queue to
    /// drain. Returns [`ShipError::DrainTimeout`] if it did not.
    fn close(&mut self) -> Result<(), ShipError> {
        self.shutdown()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};
    use std::time::Instant;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Shared {
        lines: Mutex<Vec<String>>,
        closed: AtomicBool,
        interrupted: AtomicBool,
    }

    impl Shared {
        fn lines(&self) -> MutexGuard<'_, Vec<String>> {
            self.lines.lock().unwrap()
        }
    }

    struct RecordingSink {
        shared: Arc<Shared>,
        fail_on: Option<String>,
        // Blocks the first write until released or interrupted
        stall: Option<std_mpsc::Receiver<()>>,
    }

    impl RecordingSink {
        fn new(shared: &Arc<Shared>) -> Self {
            Self {
                shared: Arc::clone(shared),
                fail_on: None,
                stall: None,
            }
        }
    }

    impl LineSink for RecordingSink {
        fn write_line(&mut self, line: &str) -> Result<(), ShipError> {
            if let Some(stall) = self.stall.take() {
                let _ = stall.recv();
            }
            if self.fail_on.as_deref() == Some(line) {
                return Err(ShipError::Transmission(std::io::Error::other("broken pipe")));
            }
            self.shared.lines().push(line.to_string());
            Ok(())
        }

        fn close(&mut self) -> Result<(), ShipError> {
            self.shared.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn interrupter(&self) -> Option<Interrupter> {
            let shared = Arc::clone(&self.shared);
            Some(Box::new(move || {
                shared.interrupted.store(true, Ordering::SeqCst);
            }))
        }
    }

    #[test]
    fn test_lines_are_shipped_in_order_then_sink_closed() {
        let shared = Arc::new(Shared::default());
        let mut dispatcher = Dispatcher::spawn(RecordingSink::new(&shared)).unwrap();

        for line in ["line1", "line2", "line3"] {
            dispatcher.write_line(line).unwrap();
        }
        dispatcher.close().unwrap();

        assert_eq!(*shared.lines(), vec!["line1", "line2", "line3"]);
        assert!(shared.closed.load(Ordering::SeqCst));
        assert!(!shared.interrupted.load(Ordering::SeqCst));
        assert!(dispatcher.is_closed());
    }

    #[test]
    fn test_failed_line_does_not_stop_worker() {
        let shared = Arc::new(Shared::default());
        let sink = RecordingSink {
            fail_on: Some("line2".to_string()),
            ..RecordingSink::new(&shared)
        };
        let mut dispatcher = Dispatcher::spawn(sink).unwrap();

        for line in ["line1", "line2", "line3"] {
            dispatcher.write_line(line).unwrap();
        }
        dispatcher.close().unwrap();

        assert_eq!(*shared.lines(), vec!["line1", "line3"]);
        assert_eq!(dispatcher.handle().pending(), 0);
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let shared = Arc::new(Shared::default());
        let mut dispatcher = Dispatcher::spawn(RecordingSink::new(&shared)).unwrap();
        let handle = dispatcher.handle();
        dispatcher.close().unwrap();

        assert!(matches!(
            dispatcher.write_line("late"),
            Err(ShipError::Capture(_))
        ));
        assert!(matches!(handle.submit("late"), Err(ShipError::Capture(_))));
        assert!(shared.lines().is_empty());
    }

    #[test]
    fn test_line_queued_behind_shutdown_is_still_shipped() {
        let shared = Arc::new(Shared::default());
        let (release_tx, release_rx) = std_mpsc::channel();
        let sink = RecordingSink {
            stall: Some(release_rx),
            ..RecordingSink::new(&shared)
        };
        let mut dispatcher = Dispatcher::spawn(sink).unwrap();
        let handle = dispatcher.handle();

        // A producer that passed the accepting check just before close flipped it
        handle.submit("line1").unwrap();
        handle.tx.send(DispatchCommand::Shutdown).unwrap();
        handle.submit("late").unwrap();

        release_tx.send(()).unwrap();
        dispatcher.close().unwrap();

        assert_eq!(*shared.lines(), vec!["line1", "late"]);
        assert_eq!(handle.pending(), 0);
        assert!(shared.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_twice_is_noop() {
        let shared = Arc::new(Shared::default());
        let mut dispatcher = Dispatcher::spawn(RecordingSink::new(&shared)).unwrap();
        dispatcher.close().unwrap();
        dispatcher.close().unwrap();
    }

    #[test]
    #[traced_test]
    fn test_stalled_worker_times_out_and_interrupts_sink() {
        let shared = Arc::new(Shared::default());
        let (release_tx, release_rx) = std_mpsc::channel();
        let sink = RecordingSink {
            stall: Some(release_rx),
            ..RecordingSink::new(&shared)
        };
        let grace = Duration::from_millis(200);
        let mut dispatcher = Dispatcher::with_grace_period(sink, grace).unwrap();

        for line in ["line1", "line2", "line3"] {
            dispatcher.write_line(line).unwrap();
        }

        let started = Instant::now();
        let result = dispatcher.close();
        let elapsed = started.elapsed();

        assert!(matches!(
            result,
            Err(ShipError::DrainTimeout { pending: 3, .. })
        ));
        assert!(elapsed >= grace);
        assert!(elapsed < Duration::from_secs(5));
        assert!(shared.interrupted.load(Ordering::SeqCst));
        assert!(logs_contain("line(s) discarded"));

        // Once the stalled write returns, the worker ships nothing else and closes the sink
        release_tx.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !shared.closed.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(shared.closed.load(Ordering::SeqCst));
        assert!(shared.lines().len() <= 1);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let shared = Arc::new(Shared::default());
        let mut dispatcher = Dispatcher::spawn(RecordingSink::new(&shared)).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let handle = dispatcher.handle();
                thread::spawn(move || {
                    for i in 0..250 {
                        handle.submit(format!("{producer}:{i}")).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        dispatcher.close().unwrap();

        let lines = shared.lines();
        assert_eq!(lines.len(), 1000);
        for producer in 0..4 {
            let seen: Vec<usize> = lines
                .iter()
                .filter_map(|line| line.split_once(':'))
                .filter(|(p, _)| *p == producer.to_string())
                .map(|(_, i)| i.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..250).collect::<Vec<_>>());
        }
    }
}
