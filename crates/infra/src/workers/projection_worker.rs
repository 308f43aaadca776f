use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use sellerdesk_events::{EventBus, EventEnvelope, Subscription};

const DEFAULT_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time view of a worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
    /// Envelopes from streams the worker does not follow.
    pub skipped: u64,
}

#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    stop: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Stop the loop and join the thread. Queued envelopes are dropped.
    pub fn shutdown(mut self) -> WorkerStats {
        let _ = self.stop.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        let stats = self.stats();
        debug!(worker = self.name, ?stats, "worker stopped");
        stats
    }
}

/// Background thread feeding published envelopes to one read model or policy.
///
/// The subscription is taken inside `spawn`, before it returns. A failed
/// envelope is logged and counted; the loop moves on to the next one.
#[derive(Debug, Clone)]
pub struct ProjectionWorker {
    name: &'static str,
    tick: Duration,
    streams: Vec<&'static str>,
}

impl ProjectionWorker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tick: DEFAULT_TICK,
            streams: Vec::new(),
        }
    }

    /// How often the loop checks for shutdown while idle.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Follow only this aggregate type. May be called more than once; with no
    /// call every stream is followed.
    pub fn only(mut self, aggregate_type: &'static str) -> Self {
        self.streams.push(aggregate_type);
        self
    }

    fn follows(&self, envelope: &EventEnvelope<JsonValue>) -> bool {
        self.streams.is_empty() || self.streams.iter().any(|t| envelope.is_for(t))
    }

    pub fn spawn<B, H, E>(self, bus: &B, handler: H) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>>,
        H: FnMut(&EventEnvelope<JsonValue>) -> Result<(), E> + Send + 'static,
        E: Display + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel();
        let subscription = bus.subscribe();
        let counters = Arc::new(Counters::default());
        let name = self.name;

        let join = {
            let counters = counters.clone();
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || self.run(subscription, stop_rx, &counters, handler))?
        };

        Ok(WorkerHandle {
            name,
            stop: stop_tx,
            join: Some(join),
            counters,
        })
    }

    fn run<H, E>(
        self,
        subscription: Subscription<EventEnvelope<JsonValue>>,
        stop: mpsc::Receiver<()>,
        counters: &Counters,
        mut handler: H,
    ) where
        H: FnMut(&EventEnvelope<JsonValue>) -> Result<(), E>,
        E: Display,
    {
        while stop.try_recv().is_err() {
            let envelope = match subscription.recv_timeout(self.tick) {
                Ok(envelope) => envelope,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if !self.follows(&envelope) {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match handler(&envelope) {
                Ok(()) => {
                    counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        worker = self.name,
                        aggregate_id = %envelope.aggregate_id(),
                        seq = envelope.sequence_number(),
                        error = %err,
                        "envelope not applied"
                    );
                }
            }
        }
    }
}
