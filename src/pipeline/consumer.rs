//! Inference consumer: one long-lived worker that drains the pending-work
//! queue and runs every capability stage over each item.
//!
//! The worker activates all stages in registration order before consuming,
//! blocks on the queue (the stop sentinel wakes it promptly, so there is no
//! poll interval), and deactivates every stage exactly once after the loop
//! exits, even when activation never completed. A stage failure on one item
//! is reported and skipped; it stops neither later stages nor later items.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::stage::CapabilityStage;
use crate::types::{StageResult, WorkItem};

/// Consumer worker name, used as the error-event source.
pub const CONSUMER_WORKER: &str = "InferenceConsumer";
/// Terminal message after a drained stop.
pub const CONSUMER_DONE: &str = "done";
/// Terminal message after cancellation.
pub const CONSUMER_CANCEL: &str = "cancel";
/// Terminal message after a stage activation failure; the failing stage and
/// cause are reported separately via [`ConsumerEvent::StageError`].
pub const CONSUMER_FAILED: &str = "failed";

/// One event from the consumer worker.
#[derive(Clone, Debug)]
pub enum ConsumerEvent {
    /// All stages ran (or errored) for one item; per-stage raw results in
    /// registration order, with errored stages absent.
    ItemResult { id: String, results: Vec<StageResult> },
    /// A per-item or activation error from one stage.
    StageError { stage: String, message: String },
    /// Emitted exactly once, after every stage was deactivated.
    Terminal { message: String },
}

enum QueueItem {
    Work(WorkItem),
    Stop,
}

/// Handle to the long-lived consumer worker. Enqueueing is safe concurrently
/// with the worker loop; the worker persists across successive scan runs.
pub struct InferenceConsumer {
    queue_tx: Sender<QueueItem>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InferenceConsumer {
    /// Spawn the worker. Stages are activated on the worker in registration
    /// order; if any activation fails the whole run fails and the worker goes
    /// straight to deactivation and its terminal event.
    pub fn spawn<F>(stages: Vec<Arc<dyn CapabilityStage>>, emit: F) -> Self
    where
        F: Fn(ConsumerEvent) + Send + 'static,
    {
        let (queue_tx, queue_rx) = unbounded::<QueueItem>();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || consumer_worker_loop(&queue_rx, &stages, &flag, &emit));
        Self {
            queue_tx,
            running,
            handle: Some(handle),
        }
    }

    /// Append one item to the pending queue. Returns false when the worker has
    /// already stopped.
    pub fn enqueue(&self, item: WorkItem) -> bool {
        self.queue_tx.send(QueueItem::Work(item)).is_ok()
    }

    /// Graceful stop: push the sentinel. Items queued ahead of it are still
    /// processed before the loop exits; the terminal message is `done`.
    pub fn stop(&self) {
        let _ = self.queue_tx.send(QueueItem::Stop);
    }

    /// Cancel: clear the running flag and push the sentinel so a blocked
    /// worker wakes promptly. Remaining queued items are skipped; the
    /// terminal message is `cancel`.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.queue_tx.send(QueueItem::Stop);
    }

    /// Wait for the worker to exit. Call after its terminal event was seen.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

fn consumer_worker_loop<F>(
    queue_rx: &Receiver<QueueItem>,
    stages: &[Arc<dyn CapabilityStage>],
    running: &AtomicBool,
    emit: &F,
) where
    F: Fn(ConsumerEvent),
{
    let message = run_consumer(queue_rx, stages, running, emit);
    // Deactivation is unconditional: every stage, exactly once, even when
    // activation never fully completed.
    for stage in stages {
        stage.deactivate();
    }
    emit(ConsumerEvent::Terminal { message });
}

fn run_consumer<F>(
    queue_rx: &Receiver<QueueItem>,
    stages: &[Arc<dyn CapabilityStage>],
    running: &AtomicBool,
    emit: &F,
) -> String
where
    F: Fn(ConsumerEvent),
{
    for stage in stages {
        if let Err(e) = stage.activate() {
            emit(ConsumerEvent::StageError {
                stage: stage.name().to_string(),
                message: format!("activation failed: {e:#}"),
            });
            return CONSUMER_FAILED.to_string();
        }
        debug!("activated stage {}", stage.name());
    }

    while let Ok(item) = queue_rx.recv() {
        if !running.load(Ordering::Relaxed) {
            return CONSUMER_CANCEL.to_string();
        }
        let work = match item {
            QueueItem::Stop => return CONSUMER_DONE.to_string(),
            QueueItem::Work(work) => work,
        };

        let mut results = Vec::with_capacity(stages.len());
        for stage in stages {
            match stage.process(&work.path) {
                Ok(raw) => results.push(StageResult {
                    stage: stage.name().to_string(),
                    raw,
                }),
                Err(e) => emit(ConsumerEvent::StageError {
                    stage: stage.name().to_string(),
                    message: format!("{}: {e:#}", work.id),
                }),
            }
        }
        emit(ConsumerEvent::ItemResult {
            id: work.id,
            results,
        });
    }

    // All senders dropped: treat like a drained stop.
    CONSUMER_DONE.to_string()
}
