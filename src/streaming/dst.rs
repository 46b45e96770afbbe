//! Deterministic Simulation Testing for the Flow Archive
//!
//! Shadow-state harness driving a `BatchWriter` against a fault-injecting
//! store and a virtual clock:
//! - Deterministic random workload generation
//! - Fault injection at the object store layer
//! - Invariant checking against the fault-free inner store
//! - Seed-based reproducibility for debugging
//!
//! ## Design (FoundationDB-style DST with shadow state)
//!
//! ```text
//! for seed in 0..10000 {
//!     let harness = ArchiveDSTHarness::new(ArchiveDSTConfig::chaos(seed));
//!     harness.run(1000).await;
//!     harness.check_invariants().await;  // violations carry the seed
//! }
//! ```

use crate::flow::{Flow, FlowMetric, SearchQuery};
use crate::streaming::clock::{ArchiveClock, SimulatedClock};
use crate::streaming::object_store::InMemoryObjectStore;
use crate::streaming::query::{decode_object, QueryEngine};
use crate::streaming::simulated_store::{
    SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats,
};
use crate::streaming::stream::Stream;
use crate::streaming::writer::{BatchWriter, StoredBatch, META_NUM_RECORDS};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for archive DST
#[derive(Debug, Clone)]
pub struct ArchiveDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Object store fault configuration
    pub store_config: SimulatedStoreConfig,
    pub bucket: String,
    pub prefix: String,
    pub max_stream_duration: Duration,
    /// Largest batch a store operation generates
    pub max_batch_size: usize,
    /// Probability of advancing the clock (vs storing a batch)
    pub advance_probability: f64,
    /// Probability of stepping the clock backwards
    pub skew_probability: f64,
    /// Probability of running a query through the faulty store
    pub query_probability: f64,
    /// Largest single clock advance in milliseconds
    pub max_advance_ms: u64,
}

impl Default for ArchiveDSTConfig {
    fn default() -> Self {
        ArchiveDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            bucket: "dst".to_string(),
            prefix: "dst/flows".to_string(),
            max_stream_duration: Duration::from_secs(10),
            max_batch_size: 8,
            advance_probability: 0.3,
            skew_probability: 0.02,
            query_probability: 0.05,
            max_advance_ms: 4_000,
        }
    }
}

impl ArchiveDSTConfig {
    pub fn new(seed: u64) -> Self {
        ArchiveDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        ArchiveDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        ArchiveDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            skew_probability: 0.05,
            query_probability: 0.1,
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        ArchiveDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }
}

/// Archive operation type
#[derive(Debug, Clone)]
pub enum ArchiveOperation {
    /// Store a batch of `size` flows (zero exercises the empty no-op)
    Store { size: usize },
    /// Move the virtual clock forward
    AdvanceClock { ms: u64 },
    /// Move the virtual clock backward
    SkewClock { ms: u64 },
    /// Scan everything through the faulty store
    Query,
}

/// Outcome of an operation
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Stored { key: String },
    Empty,
    ClockMoved { now_ms: u64 },
    Queried { flows: usize },
    /// Failed (expected under fault injection)
    Failed(String),
}

/// Recorded operation for history tracking
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: ArchiveOperation,
    pub outcome: OperationOutcome,
    pub timestamp_ms: u64,
}

/// Workload generator
pub struct ArchiveWorkload {
    rng: ChaCha8Rng,
    config: ArchiveDSTConfig,
    flow_counter: u64,
}

impl ArchiveWorkload {
    pub fn new(config: ArchiveDSTConfig) -> Self {
        ArchiveWorkload {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            flow_counter: 0,
        }
    }

    /// Generate the next operation
    pub fn next_operation(&mut self) -> ArchiveOperation {
        let roll: f64 = self.rng.gen();
        let skew = self.config.skew_probability;
        let query = skew + self.config.query_probability;
        let advance = query + self.config.advance_probability;

        if roll < skew {
            ArchiveOperation::SkewClock {
                ms: self.rng.gen_range(1..=5_000),
            }
        } else if roll < query {
            ArchiveOperation::Query
        } else if roll < advance {
            ArchiveOperation::AdvanceClock {
                ms: self.rng.gen_range(1..=self.config.max_advance_ms.max(1)),
            }
        } else {
            ArchiveOperation::Store {
                size: self.rng.gen_range(0..=self.config.max_batch_size),
            }
        }
    }

    /// Batch of distinct flows stamped around `now_ms`
    pub fn make_batch(&mut self, size: usize, now_ms: u64) -> Vec<Flow> {
        (0..size)
            .map(|_| {
                self.flow_counter += 1;
                let last = now_ms as i64 - self.rng.gen_range(0..1_000);
                Flow {
                    uuid: format!("flow-{:06}", self.flow_counter),
                    layers_path: "Ethernet/IPv4/TCP".to_string(),
                    start: last - 5_000,
                    last,
                    metric: self.rng.gen_bool(0.5).then(|| FlowMetric {
                        ab_packets: self.rng.gen_range(1..100),
                        ab_bytes: self.rng.gen_range(64..65_536),
                        start: last - 1_000,
                        last,
                        ..FlowMetric::default()
                    }),
                    ..Flow::default()
                }
            })
            .collect()
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct ArchiveDSTResult {
    /// Seed used
    pub seed: u64,
    pub total_operations: u64,
    pub batches_stored: u64,
    pub flows_stored: u64,
    pub empty_batches: u64,
    /// Failed operations (expected under faults)
    pub failed_operations: u64,
    pub queries: u64,
    /// Distinct streams opened by acknowledged writes
    pub streams_opened: u64,
    /// Store fault statistics
    pub store_stats: SimulatedStoreStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
    /// Operation history
    pub history: Vec<RecordedOperation>,
}

impl ArchiveDSTResult {
    pub fn new(seed: u64) -> Self {
        ArchiveDSTResult {
            seed,
            total_operations: 0,
            batches_stored: 0,
            flows_stored: 0,
            empty_batches: 0,
            failed_operations: 0,
            queries: 0,
            streams_opened: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops, {} batches ({} flows) in {} streams, {} empty, {} failed, {} queries, {} violations",
            self.seed,
            self.total_operations,
            self.batches_stored,
            self.flows_stored,
            self.streams_opened,
            self.empty_batches,
            self.failed_operations,
            self.queries,
            self.invariant_violations.len()
        )
    }
}

type DSTStore = SimulatedObjectStore<InMemoryObjectStore>;

/// Acknowledged write, the ground truth for what the store must hold
#[derive(Debug, Clone)]
struct AckedBatch {
    batch: StoredBatch,
    flows: Vec<Flow>,
}

/// Main DST harness for the batch writer
pub struct ArchiveDSTHarness {
    config: ArchiveDSTConfig,
    clock: SimulatedClock,
    store: Arc<DSTStore>,
    inner_store: InMemoryObjectStore,
    writer: BatchWriter<DSTStore, SimulatedClock>,
    workload: ArchiveWorkload,
    result: ArchiveDSTResult,
    acked: Vec<AckedBatch>,
}

impl ArchiveDSTHarness {
    /// Create a new DST harness
    pub fn new(config: ArchiveDSTConfig) -> Self {
        let inner_store = InMemoryObjectStore::new();
        let store = Arc::new(SimulatedObjectStore::new(
            inner_store.clone(),
            config.store_config.clone(),
            config.seed.wrapping_add(1), // Different seed for store
        ));
        // Start well past the epoch so backwards skew stays positive
        let clock = SimulatedClock::new(1_700_000_000_000 + config.seed * 1_000);
        let writer = BatchWriter::new(
            store.clone(),
            clock.clone(),
            config.bucket.clone(),
            config.prefix.clone(),
            config.max_stream_duration,
        );

        ArchiveDSTHarness {
            workload: ArchiveWorkload::new(config.clone()),
            result: ArchiveDSTResult::new(config.seed),
            config,
            clock,
            store,
            inner_store,
            writer,
            acked: Vec::new(),
        }
    }

    /// Run the workload for a specified number of operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
        }
    }

    async fn execute_operation(&mut self, op: ArchiveOperation) {
        self.result.total_operations += 1;
        let op_id = self.result.total_operations;

        let outcome = match &op {
            ArchiveOperation::Store { size } => self.execute_store(*size).await,
            ArchiveOperation::AdvanceClock { ms } => {
                self.clock.advance_ms(*ms);
                OperationOutcome::ClockMoved {
                    now_ms: self.clock.now().as_millis(),
                }
            }
            ArchiveOperation::SkewClock { ms } => {
                let now = self.clock.now().as_millis();
                self.clock.set(now.saturating_sub(*ms));
                OperationOutcome::ClockMoved {
                    now_ms: self.clock.now().as_millis(),
                }
            }
            ArchiveOperation::Query => self.execute_query().await,
        };

        match &outcome {
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
            OperationOutcome::Empty => self.result.empty_batches += 1,
            OperationOutcome::Queried { .. } => self.result.queries += 1,
            _ => {}
        }

        self.result.history.push(RecordedOperation {
            id: op_id,
            operation: op,
            outcome,
            timestamp_ms: self.clock.now().as_millis(),
        });
    }

    async fn execute_store(&mut self, size: usize) -> OperationOutcome {
        let flows = self.workload.make_batch(size, self.clock.now().as_millis());
        let before = self.writer.current_stream().await;

        match self.writer.store(&flows).await {
            Ok(Some(batch)) => {
                self.check_rotation(before, &batch);
                self.result.batches_stored += 1;
                self.result.flows_stored += flows.len() as u64;
                let key = batch.key.clone();
                self.acked.push(AckedBatch { batch, flows });
                OperationOutcome::Stored { key }
            }
            Ok(None) => {
                if self.writer.current_stream().await != before {
                    self.violation("Empty batch changed the open stream".to_string());
                }
                OperationOutcome::Empty
            }
            Err(e) => {
                if self.writer.current_stream().await != before {
                    self.violation(format!("Failed write advanced the stream: {}", e));
                }
                OperationOutcome::Failed(e.to_string())
            }
        }
    }

    /// A write either continues the open stream at its next sequence or opens a new one
    fn check_rotation(&mut self, before: Option<Stream>, batch: &StoredBatch) {
        let stream = batch.stream;
        let Some(open) = before else {
            if stream.sequence_number != 0 {
                self.violation(format!("First stream for {} did not start at 0", batch.key));
            }
            self.result.streams_opened += 1;
            return;
        };

        if open.id != stream.id {
            let elapsed = stream.id.saturating_sub(open.id);
            if stream.id < open.id || elapsed < self.config.max_stream_duration {
                self.violation(format!(
                    "Stream rotated after {:?}, before the {:?} limit",
                    elapsed, self.config.max_stream_duration
                ));
            }
        }

        // Same key directory: the sequence must carry on, or a key would repeat
        if open.id.to_compact_utc() == stream.id.to_compact_utc() {
            if stream.sequence_number != open.sequence_number {
                self.violation(format!(
                    "{} used sequence {} but the stream was at {}",
                    batch.key, stream.sequence_number, open.sequence_number
                ));
            }
        } else {
            if stream.sequence_number != 0 {
                self.violation(format!("New stream for {} did not start at 0", batch.key));
            }
            self.result.streams_opened += 1;
        }
    }

    async fn execute_query(&mut self) -> OperationOutcome {
        let engine = QueryEngine::new(
            self.store.clone(),
            self.config.bucket.clone(),
            self.config.prefix.clone(),
        );
        match engine.search_flows_with_stats(&SearchQuery::default()).await {
            Ok((set, stats)) => {
                // Corrupted reads are skipped, never invented
                if set.len() as u64 > self.result.flows_stored {
                    self.violation(format!(
                        "Query returned {} flows but only {} were stored",
                        set.len(),
                        self.result.flows_stored
                    ));
                }
                if stats.objects_decoded + stats.objects_skipped != stats.objects_listed {
                    self.violation(format!("Inconsistent query stats: {:?}", stats));
                }
                OperationOutcome::Queried { flows: set.len() }
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    fn violation(&mut self, message: String) {
        self.result
            .invariant_violations
            .push(format!("seed {}: {}", self.config.seed, message));
    }

    /// Check invariants after the run
    pub async fn check_invariants(&mut self) {
        // Invariant 1: acknowledged keys are unique
        self.check_unique_keys();

        // Invariant 2: every acknowledged batch is stored intact
        self.check_acked_batches();

        // Invariant 3: per stream, sequences are gap-free from zero
        self.check_gap_free_sequences();

        // Invariant 4: a fault-free scan sees exactly the acknowledged flows
        self.check_full_scan().await;

        self.result.store_stats = self.store.stats();
    }

    fn check_unique_keys(&mut self) {
        let mut seen = HashSet::new();
        let duplicates: Vec<String> = self
            .acked
            .iter()
            .filter(|a| !seen.insert(a.batch.key.clone()))
            .map(|a| a.batch.key.clone())
            .collect();
        for key in duplicates {
            self.violation(format!("Key {} acknowledged twice", key));
        }
    }

    fn check_acked_batches(&mut self) {
        let mut problems = Vec::new();
        for acked in &self.acked {
            let key = &acked.batch.key;
            let Some(object) = self.inner_store.object(&self.config.bucket, key) else {
                problems.push(format!("Acknowledged {} missing from store", key));
                continue;
            };
            match decode_object(key, &object.data) {
                Ok(flows) if flows == acked.flows => {}
                Ok(flows) => problems.push(format!(
                    "{} holds {} flows, expected {}",
                    key,
                    flows.len(),
                    acked.flows.len()
                )),
                Err(e) => problems.push(format!("{} failed to decode: {}", key, e)),
            }
            let num_records = object.attributes.metadata.get(META_NUM_RECORDS);
            if num_records != Some(&acked.flows.len().to_string()) {
                problems.push(format!("{} has num-records {:?}", key, num_records));
            }
        }
        for problem in problems {
            self.violation(problem);
        }
    }

    fn check_gap_free_sequences(&mut self) {
        let prefix = format!("{}/", self.config.prefix);
        let mut streams: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        let mut problems = Vec::new();

        for record in self.inner_store.writes() {
            let parsed = record
                .key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.split_once('/'))
                .and_then(|(dir, file)| {
                    let seq = file.strip_suffix(".gz")?.parse::<u64>().ok()?;
                    Some((dir.to_string(), seq))
                });
            match parsed {
                Some((dir, seq)) => streams.entry(dir).or_default().push(seq),
                None => problems.push(format!("Malformed key {}", record.key)),
            }
        }

        for (dir, mut sequences) in streams {
            sequences.sort_unstable();
            let expected: Vec<u64> = (0..sequences.len() as u64).collect();
            if sequences != expected {
                problems.push(format!("Stream {} has sequences {:?}", dir, sequences));
            }
        }

        if self.inner_store.write_count() != self.acked.len() {
            problems.push(format!(
                "Store saw {} writes but {} were acknowledged",
                self.inner_store.write_count(),
                self.acked.len()
            ));
        }

        for problem in problems {
            self.violation(problem);
        }
    }

    async fn check_full_scan(&mut self) {
        let engine = QueryEngine::new(
            Arc::new(self.inner_store.clone()),
            self.config.bucket.clone(),
            self.config.prefix.clone(),
        );
        match engine.search_flows_with_stats(&SearchQuery::default()).await {
            Ok((set, stats)) => {
                if set.len() as u64 != self.result.flows_stored || stats.objects_skipped != 0 {
                    self.violation(format!(
                        "Full scan found {} flows ({} skipped objects), expected {}",
                        set.len(),
                        stats.objects_skipped,
                        self.result.flows_stored
                    ));
                }
            }
            Err(e) => self.violation(format!("Fault-free scan failed: {}", e)),
        }
    }

    /// Get the result
    pub fn result(&self) -> &ArchiveDSTResult {
        &self.result
    }

    /// Consume and return the result
    pub fn into_result(self) -> ArchiveDSTResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> ArchiveDSTConfig,
) -> Vec<ArchiveDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = ArchiveDSTHarness::new(config_fn(seed));
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[ArchiveDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_batches: u64 = results.iter().map(|r| r.batches_stored).sum();
    let total_failed: u64 = results.iter().map(|r| r.failed_operations).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} batches stored, {} failed ops",
        passed, total, total_ops, total_batches, total_failed
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}
