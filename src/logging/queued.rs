use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{error::DeliveryError, LogSink};

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands payloads to a dedicated thread that owns the slow sink.
///
/// `deliver` never blocks: it either enqueues, or fails with `QueueFull` /
/// `Closed`. Payloads reach the inner sink in the order they were enqueued.
pub struct QueuedSink {
    sender: Mutex<Option<Sender<String>>>,
    done: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    inner: Arc<dyn LogSink>,
    drain_timeout: Duration,
    dropped: AtomicU64,
}

impl QueuedSink {
    pub fn spawn(
        thread_name: impl Into<String>,
        inner: Arc<dyn LogSink>,
        capacity: usize,
        drain_timeout: Duration,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = flume::bounded::<String>(capacity.max(1));
        let (done_sender, done) = flume::bounded::<()>(1);

        let worker_sink = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || {
                run_worker(receiver, worker_sink);
                let _ = done_sender.send(());
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            done,
            worker: Mutex::new(Some(worker)),
            inner,
            drain_timeout,
            dropped: AtomicU64::new(0),
        })
    }

    /// Payloads waiting for the worker.
    pub fn pending(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |sender| sender.len())
    }

    /// Payloads rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn run_worker(receiver: Receiver<String>, sink: Arc<dyn LogSink>) {
    let mut discarded: u64 = 0;

    while let Ok(payload) = receiver.recv() {
        match sink.deliver(&payload) {
            Ok(()) => {}
            Err(DeliveryError::Closed) => discarded += 1,
            Err(err) => tracing::warn!(sink = %sink.describe(), "dropped log payload: {err}"),
        }
    }

    if discarded > 0 {
        tracing::warn!(
            sink = %sink.describe(),
            discarded,
            "sink closed before the queue was drained"
        );
    }
    sink.flush();
}

impl LogSink for QueuedSink {
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(DeliveryError::Closed)?;

        match sender.try_send(payload.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Closed),
        }
    }

    // Only the worker flushes the inner sink, after the queue is drained.
    fn flush(&self) {}

    /// Stops accepting payloads, gives the worker `drain_timeout` to empty the
    /// queue, then closes the inner sink and joins the worker.
    fn close(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return;
        };
        drop(sender);

        match self.done.recv_timeout(self.drain_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => tracing::warn!(
                sink = %self.inner.describe(),
                "log queue not drained after {:?}, closing anyway",
                self.drain_timeout
            ),
        }

        self.inner.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(sink = %self.inner.describe(), "log worker panicked");
            }
        }
    }

    fn describe(&self) -> String {
        format!("queued {}", self.inner.describe())
    }
}
