//! Simulated Object Store with Fault Injection
//!
//! Wraps any `ObjectStore` and injects write, read and list failures, read
//! corruption and latency. Decisions come from a seeded ChaCha RNG, so the
//! same seed and the same sequence of calls produce the same faults.

use crate::streaming::object_store::{ObjectAttributes, ObjectStore};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::time::Duration;

/// Fault probabilities, each in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedStoreConfig {
    pub write_failure_prob: f64,
    pub read_failure_prob: f64,
    /// Probability a successful read returns a flipped byte
    pub read_corrupt_prob: f64,
    pub list_failure_prob: f64,
    /// Probability any operation times out before reaching the inner store
    pub timeout_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            write_failure_prob: 0.01,   // 1%
            read_failure_prob: 0.01,    // 1%
            read_corrupt_prob: 0.001,   // 0.1%
            list_failure_prob: 0.01,    // 1%
            timeout_prob: 0.005,        // 0.5%
            latency_range_us: (0, 0),
        }
    }
}

impl SimulatedStoreConfig {
    /// Stress configuration
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            write_failure_prob: 0.2,
            read_failure_prob: 0.1,
            read_corrupt_prob: 0.05,
            list_failure_prob: 0.05,
            timeout_prob: 0.05,
            latency_range_us: (0, 200),
        }
    }

    /// Pass-through
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            write_failure_prob: 0.0,
            read_failure_prob: 0.0,
            read_corrupt_prob: 0.0,
            list_failure_prob: 0.0,
            timeout_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Attempt and fault counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub write_attempts: u64,
    pub write_failures: u64,
    pub read_attempts: u64,
    pub read_failures: u64,
    pub read_corruptions: u64,
    pub list_attempts: u64,
    pub list_failures: u64,
    pub timeouts: u64,
}

struct SimulatedState {
    rng: ChaCha8Rng,
    config: SimulatedStoreConfig,
    stats: SimulatedStoreStats,
}

impl SimulatedState {
    fn roll(&mut self, prob: f64) -> bool {
        prob > 0.0 && self.rng.gen_bool(prob.min(1.0))
    }

    fn latency(&mut self) -> Option<Duration> {
        let (min, max) = self.config.latency_range_us;
        let us = if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        };
        (us > 0).then(|| Duration::from_micros(us))
    }
}

#[derive(Clone, Copy)]
enum Op {
    Write,
    Read,
    List,
}

/// Fault-injecting wrapper around another store
pub struct SimulatedObjectStore<S: ObjectStore> {
    inner: S,
    state: Mutex<SimulatedState>,
}

impl<S: ObjectStore> SimulatedObjectStore<S> {
    pub fn new(inner: S, config: SimulatedStoreConfig, seed: u64) -> Self {
        SimulatedObjectStore {
            inner,
            state: Mutex::new(SimulatedState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                config,
                stats: SimulatedStoreStats::default(),
            }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Swap fault probabilities mid-run, e.g. to heal a failing store
    pub fn set_config(&self, config: SimulatedStoreConfig) {
        self.state.lock().config = config;
    }

    /// Count the attempt and decide on a fault before calling the inner store
    fn before(&self, op: Op) -> (IoResult<()>, Option<Duration>) {
        let mut state = self.state.lock();
        let fail_prob = match op {
            Op::Write => {
                state.stats.write_attempts += 1;
                state.config.write_failure_prob
            }
            Op::Read => {
                state.stats.read_attempts += 1;
                state.config.read_failure_prob
            }
            Op::List => {
                state.stats.list_attempts += 1;
                state.config.list_failure_prob
            }
        };
        let latency = state.latency();

        let timeout_prob = state.config.timeout_prob;
        if state.roll(timeout_prob) {
            state.stats.timeouts += 1;
            return (
                Err(IoError::new(ErrorKind::TimedOut, "simulated timeout")),
                latency,
            );
        }

        if state.roll(fail_prob) {
            let msg = match op {
                Op::Write => {
                    state.stats.write_failures += 1;
                    "simulated write failure"
                }
                Op::Read => {
                    state.stats.read_failures += 1;
                    "simulated read failure"
                }
                Op::List => {
                    state.stats.list_failures += 1;
                    "simulated list failure"
                }
            };
            return (Err(IoError::new(ErrorKind::Other, msg)), latency);
        }

        (Ok(()), latency)
    }

    fn maybe_corrupt(&self, mut data: Vec<u8>) -> Vec<u8> {
        let mut state = self.state.lock();
        let prob = state.config.read_corrupt_prob;
        if !data.is_empty() && state.roll(prob) {
            state.stats.read_corruptions += 1;
            let idx = state.rng.gen_range(0..data.len());
            data[idx] ^= 0xFF;
        }
        data
    }
}

async fn delay(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

impl<S: ObjectStore> ObjectStore for SimulatedObjectStore<S> {
    fn write_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: &'a [u8],
        attributes: &'a ObjectAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let (fault, latency) = self.before(Op::Write);
            delay(latency).await;
            fault?;
            self.inner.write_object(bucket, key, body, attributes).await
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let (fault, latency) = self.before(Op::List);
            delay(latency).await;
            fault?;
            self.inner.list_objects(bucket, prefix).await
        })
    }

    fn read_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let (fault, latency) = self.before(Op::Read);
            delay(latency).await;
            fault?;
            let data = self.inner.read_object(bucket, key).await?;
            Ok(self.maybe_corrupt(data))
        })
    }
}
