//! Pipeline controller: wires the scan producer, the inference consumer, and
//! the index together.
//!
//! All events are marshalled onto one dispatch thread, which is the only
//! context that mutates the index. The observer talks to the controller
//! through the [`Pipeline`] handle (synchronous `start`/`shutdown` commands)
//! and receives [`ObserverEvent`]s over a channel; nothing in the pipeline
//! blocks the observer.

use anyhow::{anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use log::{debug, error, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::Result;
use crate::pipeline::consumer::{CONSUMER_WORKER, ConsumerEvent, InferenceConsumer};
use crate::pipeline::scan::{SCAN_CANCEL, SCAN_DONE, ScanEvent, ScanProducer, derive_id};
use crate::stage::CapabilityStage;
use crate::store::{load_index, save_index};
use crate::types::{FileStatus, Index, ItemRecord, ObserverEvent, StageResult, WorkItem};
use crate::utils::config::{INDEX_FILENAME, PipelineConsts};

/// Controller configuration. The pipeline owns its workers; nothing here is
/// process-global.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Index filename inside each scanned root.
    pub index_filename: String,
    /// How long stop-and-drain waits for a worker's terminal message.
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_filename: INDEX_FILENAME.to_string(),
            drain_timeout: Duration::from_millis(PipelineConsts::DRAIN_TIMEOUT_MS),
        }
    }
}

/// Everything the dispatch thread can receive: worker events plus observer
/// commands, merged into one channel so index mutation is never concurrent.
enum ControlMsg {
    Scan { generation: u64, event: ScanEvent },
    Consumer(ConsumerEvent),
    Command(Command),
}

enum Command {
    Start {
        root: PathBuf,
        recursive: bool,
        ack: Sender<Result<()>>,
    },
    Shutdown {
        ack: Sender<Result<()>>,
    },
}

/// Observer-facing handle. `start` and `shutdown` are synchronous commands
/// executed on the dispatch thread; events arrive on the receiver returned by
/// [`Pipeline::new`].
pub struct Pipeline {
    ctrl_tx: Sender<ControlMsg>,
    dispatch: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Build the pipeline: spawns the dispatch thread and the long-lived
    /// inference consumer (which activates the given stages in order).
    /// Returns the handle and the observer event channel.
    pub fn new(
        config: PipelineConfig,
        stages: Vec<Arc<dyn CapabilityStage>>,
    ) -> (Self, Receiver<ObserverEvent>) {
        let (ctrl_tx, ctrl_rx) = unbounded::<ControlMsg>();
        let (event_tx, event_rx) = unbounded::<ObserverEvent>();

        let consumer_tx = ctrl_tx.clone();
        let consumer = InferenceConsumer::spawn(stages.clone(), move |ev| {
            let _ = consumer_tx.send(ControlMsg::Consumer(ev));
        });

        let dispatcher = Dispatcher {
            config,
            stages,
            consumer,
            consumer_stopped: false,
            ctrl_tx: ctrl_tx.clone(),
            ctrl_rx,
            event_tx,
            index: None,
            index_path: None,
            scan: None,
            next_generation: 0,
            pending: VecDeque::new(),
        };
        let dispatch = thread::spawn(move || dispatcher.run());

        (
            Self {
                ctrl_tx,
                dispatch: Some(dispatch),
            },
            event_rx,
        )
    }

    /// Start a run on `root`: any prior scan is stopped and drained first
    /// (idempotent when idle), the index for the new root is loaded, and a
    /// fresh scan worker starts. The inference consumer persists across runs.
    pub fn start(&self, root: impl Into<PathBuf>, recursive: bool) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.ctrl_tx
            .send(ControlMsg::Command(Command::Start {
                root: root.into(),
                recursive,
                ack: ack_tx,
            }))
            .map_err(|_| anyhow!("pipeline has shut down"))?;
        ack_rx.recv().map_err(|_| anyhow!("pipeline has shut down"))?
    }

    /// Stop the scan, drain the inference consumer (results queued ahead of
    /// the stop sentinel are still merged), and persist the index. Safe to
    /// call repeatedly.
    pub fn shutdown(&self) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        if self
            .ctrl_tx
            .send(ControlMsg::Command(Command::Shutdown { ack: ack_tx }))
            .is_err()
        {
            return Ok(());
        }
        match ack_rx.recv() {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.shutdown();
        if let Some(handle) = self.dispatch.take() {
            let _ = handle.join();
        }
    }
}

struct ScanHandle {
    root: PathBuf,
    generation: u64,
    producer: ScanProducer,
}

struct Dispatcher {
    config: PipelineConfig,
    stages: Vec<Arc<dyn CapabilityStage>>,
    consumer: InferenceConsumer,
    consumer_stopped: bool,
    ctrl_tx: Sender<ControlMsg>,
    ctrl_rx: Receiver<ControlMsg>,
    event_tx: Sender<ObserverEvent>,
    index: Option<Index>,
    index_path: Option<PathBuf>,
    scan: Option<ScanHandle>,
    next_generation: u64,
    /// Commands received while a drain was in progress, replayed in order.
    pending: VecDeque<Command>,
}

impl Dispatcher {
    fn run(mut self) {
        loop {
            let msg = match self.pending.pop_front() {
                Some(cmd) => ControlMsg::Command(cmd),
                None => match self.ctrl_rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };
            match msg {
                ControlMsg::Command(Command::Start {
                    root,
                    recursive,
                    ack,
                }) => {
                    let result = self.handle_start(root, recursive);
                    let _ = ack.send(result);
                }
                ControlMsg::Command(Command::Shutdown { ack }) => {
                    let result = self.handle_shutdown();
                    let _ = ack.send(result);
                    break;
                }
                other => self.handle_event(other),
            }
        }
    }

    fn handle_event(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Scan { generation, event } => {
                // Events from an abandoned prior run are dropped so an
                // overlapping start can never double-enqueue.
                if self.scan.as_ref().map(|s| s.generation) != Some(generation) {
                    debug!("dropping event from stale scan run {generation}");
                    return;
                }
                match event {
                    ScanEvent::Found(path) => self.on_found(path),
                    ScanEvent::Terminal { message } => self.on_scan_terminal(&message),
                }
            }
            ControlMsg::Consumer(ConsumerEvent::ItemResult { id, results }) => {
                self.on_item_result(id, results);
            }
            ControlMsg::Consumer(ConsumerEvent::StageError { stage, message }) => {
                self.emit_error(&stage, message);
            }
            ControlMsg::Consumer(ConsumerEvent::Terminal { message }) => {
                debug!("inference consumer stopped: {message}");
                self.consumer_stopped = true;
            }
            // Commands are routed in `run` and the drain loops.
            ControlMsg::Command(cmd) => self.pending.push_back(cmd),
        }
    }

    fn handle_start(&mut self, root: PathBuf, recursive: bool) -> Result<()> {
        self.stop_scan_and_drain();
        if !root.is_dir() {
            bail!("not a directory: {}", root.display());
        }
        if self.consumer_stopped {
            // Discovery still works; items queue up as non-done records and a
            // later process restart picks them up.
            warn!("inference consumer is stopped; discovered items will not be tagged");
        }

        let index_path = root.join(&self.config.index_filename);
        self.index = Some(load_index(&index_path));
        self.index_path = Some(index_path);
        self.emit(ObserverEvent::Status(format!("scanning {}", root.display())));

        let generation = self.next_generation;
        self.next_generation += 1;
        let ctrl_tx = self.ctrl_tx.clone();
        let producer = ScanProducer::start(&root, recursive, move |event| {
            let _ = ctrl_tx.send(ControlMsg::Scan { generation, event });
        });
        self.scan = Some(ScanHandle {
            root,
            generation,
            producer,
        });
        Ok(())
    }

    /// Cancel the current scan (if any) and process events until its terminal
    /// message arrives or the drain timeout elapses. Found events seen during
    /// the drain are still recorded; on timeout the worker is abandoned and
    /// its later events are dropped as stale.
    fn stop_scan_and_drain(&mut self) {
        let Some(scan) = self.scan.as_ref() else {
            return;
        };
        scan.producer.cancel();
        let deadline = Instant::now() + self.config.drain_timeout;
        while self.scan.is_some() {
            match self.ctrl_rx.recv_deadline(deadline) {
                Ok(ControlMsg::Command(cmd)) => self.pending.push_back(cmd),
                Ok(msg) => self.handle_event(msg),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "scan worker did not stop within {:?}; abandoning it",
                        self.config.drain_timeout
                    );
                    self.scan = None;
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.scan = None;
                    return;
                }
            }
        }
    }

    fn on_found(&mut self, path: PathBuf) {
        let Some(scan) = self.scan.as_ref() else {
            return;
        };
        let id = derive_id(&path, &scan.root);
        let Some(index) = self.index.as_mut() else {
            return;
        };

        let record = index
            .files
            .entry(id.clone())
            .or_insert_with(|| ItemRecord::new(id.clone(), path, FileStatus::Pending));
        let mut work = None;
        if record.status != FileStatus::Done {
            record.status = FileStatus::Queued;
            work = Some(WorkItem {
                id: id.clone(),
                path: record.path.clone(),
            });
        }
        // Re-scanning never re-runs inference on done items, but the observer
        // still hears about every discovered path exactly once.
        if let Some(item) = work
            && !self.consumer.enqueue(item)
        {
            warn!("consumer queue is closed; {id} stays queued");
        }
        self.emit(ObserverEvent::ItemDiscovered(id));
    }

    fn on_scan_terminal(&mut self, message: &str) {
        if let Some(mut scan) = self.scan.take() {
            scan.producer.join();
        }
        match message {
            SCAN_DONE => self.emit(ObserverEvent::Status("scan complete".to_string())),
            SCAN_CANCEL => debug!("scan cancelled"),
            other => {
                self.emit_error(crate::pipeline::scan::SCAN_WORKER, other.to_string());
                // Observers waiting on statuses alone must still learn the
                // scan is over, or they would wait forever.
                self.emit(ObserverEvent::Status("scan failed".to_string()));
            }
        }
    }

    fn on_item_result(&mut self, id: String, results: Vec<StageResult>) {
        // Resolve and format before touching the record so formatting errors
        // for one stage never leave the record half-written.
        let mut formatted: Vec<(String, Value)> = Vec::new();
        for sr in &results {
            match self.stages.iter().find(|s| s.name() == sr.stage) {
                Some(stage) => {
                    let lines = stage
                        .format_result(&sr.raw)
                        .into_iter()
                        .map(Value::String)
                        .collect();
                    formatted.push((stage.result_key().to_string(), Value::Array(lines)));
                }
                None => {
                    self.emit_error(
                        CONSUMER_WORKER,
                        format!("result from unknown stage {:?} for {id}", sr.stage),
                    );
                }
            }
        }

        let contributed = formatted.len();
        let Some(index) = self.index.as_mut() else {
            self.emit_error(CONSUMER_WORKER, format!("result for {id} with no index loaded"));
            return;
        };
        let Some(record) = index.files.get_mut(&id) else {
            self.emit_error(CONSUMER_WORKER, format!("result for unknown item {id}"));
            return;
        };
        for (key, value) in formatted {
            record.set_prop(key, value);
        }
        // An item where every stage errored is marked as failed, not done, so
        // a later start on the same root queues it again.
        record.status = if contributed > 0 {
            FileStatus::Done
        } else {
            FileStatus::Error
        };
        self.emit(ObserverEvent::ItemTagged(id));
    }

    fn handle_shutdown(&mut self) -> Result<()> {
        self.stop_scan_and_drain();
        if !self.consumer_stopped {
            self.consumer.stop();
            while !self.consumer_stopped {
                match self.ctrl_rx.recv_timeout(self.config.drain_timeout) {
                    Ok(ControlMsg::Command(cmd)) => self.pending.push_back(cmd),
                    Ok(msg) => self.handle_event(msg),
                    Err(RecvTimeoutError::Timeout) => {
                        // Inference on queued items may legitimately outlast
                        // the timeout; only give up when the worker is gone
                        // without having sent its terminal message.
                        if self.consumer.is_finished() {
                            warn!("inference consumer exited without a terminal message");
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        self.consumer.join();
        self.flush_index()
    }

    fn flush_index(&self) -> Result<()> {
        if let (Some(index), Some(path)) = (&self.index, &self.index_path) {
            save_index(index, path)?;
            debug!(
                "flushed index to {} ({} records)",
                path.display(),
                index.files.len()
            );
        }
        Ok(())
    }

    fn emit(&self, event: ObserverEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_error(&self, source: &str, message: String) {
        error!("{source}: {message}");
        self.emit(ObserverEvent::Error {
            source: source.to_string(),
            message,
        });
    }
}
