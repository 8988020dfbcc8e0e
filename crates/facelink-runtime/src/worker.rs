//! Pipeline plumbing: bounded stage queues, epoch gating and worker threads
//!
//! Every item carries the epoch it was submitted under. A barge-in advances
//! the epoch while holding the gate's control lock, so anything tagged with
//! an older epoch is dropped wherever it is next seen.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use facelink_core::{FaceLinkError, FaceLinkResult};

/// One slot in a stage queue
#[derive(Debug)]
pub enum Envelope<T> {
    Item { epoch: u64, item: T },
    /// Stop after cleanup and forward downstream
    Shutdown,
}

/// Epoch counter plus the lock that orders barge-ins against hand-offs
#[derive(Debug, Default)]
pub struct EpochGate {
    current: AtomicU64,
    control: Mutex<()>,
}

impl EpochGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }

    /// Bump the epoch and run `f` before any other gated hand-off
    pub fn advance<R>(&self, f: impl FnOnce(u64) -> R) -> R {
        let _control = self.control.lock();
        let epoch = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        f(epoch)
    }

    /// Run `f` only if `epoch` is still current, excluding barge-ins meanwhile
    pub fn with_current<R>(&self, epoch: u64, f: impl FnOnce() -> R) -> Option<R> {
        let _control = self.control.lock();
        self.is_current(epoch).then(f)
    }
}

/// Bounded hand-off between two stages.
///
/// Cloning yields another handle to the same queue. `pending` counts items
/// queued plus items a worker has taken but not finished.
#[derive(Debug)]
pub struct StageQueue<T> {
    tx: Sender<Envelope<T>>,
    rx: Receiver<Envelope<T>>,
    outstanding: Arc<AtomicUsize>,
}

impl<T> Clone for StageQueue<T> {
    fn clone(&self) -> Self {
        StageQueue {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            outstanding: Arc::clone(&self.outstanding),
        }
    }
}

impl<T> StageQueue<T> {
    const RETRY: Duration = Duration::from_millis(1);

    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        StageQueue {
            tx,
            rx,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Push unless `epoch` has been superseded. Returns whether the item was
    /// queued. Waits for room without holding the gate.
    pub fn push(&self, gate: &EpochGate, epoch: u64, item: T) -> FaceLinkResult<bool> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let mut envelope = Envelope::Item { epoch, item };
        loop {
            let attempt = gate.with_current(epoch, || self.tx.try_send(envelope));
            match attempt {
                None => {
                    self.outstanding.fetch_sub(1, Ordering::SeqCst);
                    return Ok(false);
                }
                Some(Ok(())) => return Ok(true),
                Some(Err(TrySendError::Full(back))) => envelope = back,
                Some(Err(TrySendError::Disconnected(_))) => {
                    self.outstanding.fetch_sub(1, Ordering::SeqCst);
                    return Err(FaceLinkError::QueueClosed);
                }
            }
            std::thread::sleep(Self::RETRY);
        }
    }

    /// Push a batch under one hold of the gate, so a consumer that checks
    /// for pending work under the gate sees either none of it or all of it.
    /// Only a full queue splits the batch. Returns how many were queued.
    pub fn push_all(&self, gate: &EpochGate, epoch: u64, items: Vec<T>) -> FaceLinkResult<usize> {
        let total = items.len();
        self.outstanding.fetch_add(total, Ordering::SeqCst);
        let mut waiting: VecDeque<Envelope<T>> = items
            .into_iter()
            .map(|item| Envelope::Item { epoch, item })
            .collect();

        while !waiting.is_empty() {
            let attempt = gate.with_current(epoch, || {
                while let Some(envelope) = waiting.pop_front() {
                    match self.tx.try_send(envelope) {
                        Ok(()) => {}
                        Err(TrySendError::Full(back)) => {
                            waiting.push_front(back);
                            return Ok(());
                        }
                        Err(TrySendError::Disconnected(_)) => return Err(FaceLinkError::QueueClosed),
                    }
                }
                Ok(())
            });
            match attempt {
                None => {
                    self.outstanding.fetch_sub(waiting.len(), Ordering::SeqCst);
                    return Ok(total - waiting.len());
                }
                Some(Err(e)) => {
                    // The envelope that hit the closed channel is gone too
                    self.outstanding.fetch_sub(waiting.len() + 1, Ordering::SeqCst);
                    return Err(e);
                }
                Some(Ok(())) if waiting.is_empty() => break,
                Some(Ok(())) => std::thread::sleep(Self::RETRY),
            }
        }
        Ok(total)
    }

    pub fn push_shutdown(&self) -> FaceLinkResult<()> {
        self.tx
            .send(Envelope::Shutdown)
            .map_err(|_| FaceLinkError::QueueClosed)
    }

    pub fn recv(&self) -> FaceLinkResult<Envelope<T>> {
        self.rx.recv().map_err(|_| FaceLinkError::QueueClosed)
    }

    /// Mark one received item as fully handled
    pub fn complete(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Drop every queued item without blocking. A queued shutdown survives.
    pub fn flush(&self) -> usize {
        let mut dropped = 0;
        let mut shutdown = false;
        while let Ok(envelope) = self.rx.try_recv() {
            match envelope {
                Envelope::Item { .. } => {
                    dropped += 1;
                    self.complete();
                }
                Envelope::Shutdown => shutdown = true,
            }
        }
        if shutdown {
            let _ = self.tx.try_send(Envelope::Shutdown);
        }
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn pending(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

/// One pipeline stage, driven by a [`Worker`]
pub trait Stage: Send + 'static {
    type Item: Send + 'static;

    fn name(&self) -> &'static str;

    /// Handle one current-epoch item. Errors are the stage's to log.
    fn process(&mut self, epoch: u64, item: Self::Item);

    /// Called once on shutdown; forward the sentinel downstream here
    fn finish(&mut self) {}
}

/// A stage running on its own named thread
#[derive(Debug)]
pub struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<S: Stage>(
        mut stage: S,
        input: StageQueue<S::Item>,
        gate: Arc<EpochGate>,
    ) -> FaceLinkResult<Worker> {
        let name = stage.name();
        let handle = std::thread::Builder::new()
            .name(format!("facelink-{name}"))
            .spawn(move || {
                tracing::debug!(stage = name, "stage started");
                loop {
                    match input.recv() {
                        Ok(Envelope::Item { epoch, item }) => {
                            if gate.is_current(epoch) {
                                stage.process(epoch, item);
                            } else {
                                tracing::trace!(stage = name, epoch, "dropping stale item");
                            }
                            input.complete();
                        }
                        Ok(Envelope::Shutdown) | Err(_) => break,
                    }
                }
                stage.finish();
                tracing::debug!(stage = name, "stage stopped");
            })?;
        Ok(Worker { name, handle })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!(stage = self.name, "stage thread panicked");
        }
    }
}

/// Poll `done` until it holds or `timeout` runs out
pub(crate) fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
