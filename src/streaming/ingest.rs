//! Ingest Adapter
//!
//! Turns inbound named messages into writer calls. Messages are JSON:
//!
//! ```text
//! {"Namespace": "flow", "Type": "store", "Obj": [ {flow}, {flow}, ... ]}
//! ```
//!
//! Only `store` messages in the `flow` namespace reach the writer. Other
//! namespaces and types are logged and ignored; frames that do not decode are
//! logged and dropped. Nothing is
//! retried: a failed write is counted and the batch is lost.
//!
//! ## Worker
//!
//! ```text
//! TCP conn 1 ──┐ length-delimited
//! TCP conn 2 ──┤──► IngestHandle ──► mpsc ──► worker ──► BatchWriter::store
//! in-process ──┘
//! ```
//!
//! The worker drains its channel one frame at a time, so writer calls are
//! issued in arrival order.

use crate::flow::Flow;
use crate::streaming::clock::ArchiveClock;
use crate::streaming::object_store::ObjectStore;
use crate::streaming::writer::{BatchWriter, StoredBatch};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

/// Message type carrying a batch of flows
pub const STORE_MESSAGE_TYPE: &str = "store";
/// Only messages in this namespace are archived
pub const FLOW_NAMESPACE: &str = "flow";
/// Largest accepted frame
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
/// Pause after a failed `accept`
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Inbound structured message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestMessage {
    #[serde(rename = "Namespace", default)]
    pub namespace: String,
    #[serde(rename = "Type")]
    pub msg_type: String,
    #[serde(rename = "Obj", default)]
    pub obj: serde_json::Value,
}

impl IngestMessage {
    /// A `store` message carrying `flows`
    pub fn store(flows: &[Flow]) -> Result<Self, serde_json::Error> {
        Ok(IngestMessage {
            namespace: FLOW_NAMESPACE.to_string(),
            msg_type: STORE_MESSAGE_TYPE.to_string(),
            obj: serde_json::to_value(flows)?,
        })
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(StoredBatch),
    /// `store` with no flows; nothing written
    Empty,
    /// Not a `store` message in the `flow` namespace
    Ignored,
    /// Undecodable frame or payload; writer not invoked
    Dropped,
    /// Writer returned an error
    Failed,
}

/// Snapshot of ingest counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub stored: u64,
    pub empty: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct IngestCounters {
    received: AtomicU64,
    stored: AtomicU64,
    empty: AtomicU64,
    ignored: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl IngestCounters {
    fn record(&self, outcome: &IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Stored(_) => &self.stored,
            IngestOutcome::Empty => &self.empty,
            IngestOutcome::Ignored => &self.ignored,
            IngestOutcome::Dropped => &self.dropped,
            IngestOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> IngestStats {
        IngestStats {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Decodes inbound messages and forwards batches to the writer
pub struct IngestAdapter<S: ObjectStore + ?Sized, C: ArchiveClock> {
    writer: Arc<BatchWriter<S, C>>,
    counters: IngestCounters,
}

impl<S: ObjectStore + ?Sized, C: ArchiveClock> IngestAdapter<S, C> {
    pub fn new(writer: Arc<BatchWriter<S, C>>) -> Self {
        IngestAdapter {
            writer,
            counters: IngestCounters::default(),
        }
    }

    pub fn writer(&self) -> &Arc<BatchWriter<S, C>> {
        &self.writer
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Handle one raw JSON frame
    pub async fn handle_frame(&self, frame: &[u8]) -> IngestOutcome {
        match serde_json::from_slice::<IngestMessage>(frame) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping undecodable message ({} bytes): {}", frame.len(), e);
                let outcome = IngestOutcome::Dropped;
                self.counters.record(&outcome);
                outcome
            }
        }
    }

    /// Handle one decoded message
    pub async fn handle_message(&self, msg: IngestMessage) -> IngestOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let outcome = self.dispatch(msg).await;
        self.counters.record(&outcome);
        outcome
    }

    async fn dispatch(&self, msg: IngestMessage) -> IngestOutcome {
        if msg.namespace != FLOW_NAMESPACE || msg.msg_type != STORE_MESSAGE_TYPE {
            debug!(
                "Ignoring message type '{}' in namespace '{}'",
                msg.msg_type, msg.namespace
            );
            return IngestOutcome::Ignored;
        }

        let flows: Vec<Flow> = match serde_json::from_value(msg.obj) {
            Ok(flows) => flows,
            Err(e) => {
                error!("Failed to decode flows from store message: {}", e);
                return IngestOutcome::Dropped;
            }
        };

        match self.writer.store(&flows).await {
            Ok(Some(stored)) => IngestOutcome::Stored(stored),
            Ok(None) => IngestOutcome::Empty,
            Err(e) => {
                error!("Failed to store {} flows: {}", flows.len(), e);
                IngestOutcome::Failed
            }
        }
    }
}

// ============================================================================
// Ingest worker
// ============================================================================

enum IngestCommand {
    Frame(Bytes),
    Shutdown { response_tx: oneshot::Sender<()> },
}

/// Cloneable handle feeding the ingest worker
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::UnboundedSender<IngestCommand>,
}

impl IngestHandle {
    /// Queue a raw frame; false if the worker is gone
    pub fn submit(&self, frame: Bytes) -> bool {
        self.tx.send(IngestCommand::Frame(frame)).is_ok()
    }

    /// Queue a message
    pub fn submit_message(&self, msg: &IngestMessage) -> bool {
        match serde_json::to_vec(msg) {
            Ok(frame) => self.submit(Bytes::from(frame)),
            Err(e) => {
                error!("Failed to encode ingest message: {}", e);
                false
            }
        }
    }

    /// Stop the worker after everything queued before this call is handled
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(IngestCommand::Shutdown { response_tx }).is_ok() {
            let _ = response_rx.await;
        }
    }
}

async fn run_worker<S: ObjectStore + ?Sized, C: ArchiveClock>(
    adapter: Arc<IngestAdapter<S, C>>,
    mut rx: mpsc::UnboundedReceiver<IngestCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            IngestCommand::Frame(frame) => {
                adapter.handle_frame(&frame).await;
            }
            IngestCommand::Shutdown { response_tx } => {
                info!("Ingest worker shutting down");
                let _ = response_tx.send(());
                return;
            }
        }
    }
    info!("Ingest worker stopped: all handles dropped");
}

/// Spawn the ingest worker and return its handle + join handle
pub fn spawn_ingest_worker<S: ObjectStore + ?Sized, C: ArchiveClock>(
    adapter: Arc<IngestAdapter<S, C>>,
) -> (IngestHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_worker(adapter, rx));
    (IngestHandle { tx }, task)
}

/// Codec for ingest connections: 4-byte big-endian length, then JSON
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Accept connections forever, forwarding each frame to the worker
pub async fn serve_tcp(listener: TcpListener, handle: IngestHandle) -> std::io::Result<()> {
    info!("Ingest listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Ingest connection from {}", addr);
                let handle = handle.clone();
                tokio::spawn(async move {
                    let frames = read_frames(stream, handle).await;
                    debug!("Ingest connection from {} closed after {} frames", addr, frames);
                });
            }
            Err(e) => accept_failed(&e).await,
        }
    }
}

/// Log an accept error and pause before the next accept
async fn accept_failed(e: &std::io::Error) {
    error!(
        "Failed to accept ingest connection, retrying in {:?}: {}",
        ACCEPT_BACKOFF, e
    );
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

async fn read_frames(stream: TcpStream, handle: IngestHandle) -> u64 {
    let mut framed = FramedRead::new(stream, frame_codec());
    let mut frames = 0;

    while let Some(frame) = framed.next().await {
        match frame {
            Ok(frame) => {
                frames += 1;
                if !handle.submit(frame.freeze()) {
                    warn!("Ingest worker unavailable, closing connection");
                    break;
                }
            }
            Err(e) => {
                warn!("Ingest connection error: {}", e);
                break;
            }
        }
    }
    frames
}
