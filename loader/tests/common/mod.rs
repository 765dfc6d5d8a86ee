//! Scripted in-memory pool for loader integration tests
//!
//! `ScriptedProvider` hands out a pool whose connections answer from
//! closures keyed by the 1-based call number, and records every call in a
//! shared [`Journal`].

// Test utilities - allow dead code for unused test helpers
#![allow(dead_code)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dm_loader::{
    BaseConn, BaseDb, ConnFactory, Context, DbConfig, DbError, DbProvider, InMemoryMetrics,
    LoaderConfig, Result, Rows, Value,
};
use tokio::time::Instant;

pub type QueryScript = Arc<dyn Fn(usize) -> Result<Rows> + Send + Sync>;
pub type ExecuteScript = Arc<dyn Fn(usize) -> Result<u64> + Send + Sync>;

/// What the scripted pool does.
#[derive(Clone)]
pub struct Scenario {
    query: QueryScript,
    execute: ExecuteScript,
    latency: Duration,
    fail_acquire_at: Option<usize>,
    fail_pool_close: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            query: Arc::new(|_| Ok(Rows::new(vec!["1".into()], vec![vec![Value::Int(1)]]))),
            execute: Arc::new(|_| Ok(1)),
            latency: Duration::ZERO,
            fail_acquire_at: None,
            fail_pool_close: false,
        }
    }
}

impl Scenario {
    pub fn query(mut self, script: impl Fn(usize) -> Result<Rows> + Send + Sync + 'static) -> Self {
        self.query = Arc::new(script);
        self
    }

    pub fn execute(mut self, script: impl Fn(usize) -> Result<u64> + Send + Sync + 'static) -> Self {
        self.execute = Arc::new(script);
        self
    }

    /// Every driver call takes this long (in tokio time).
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The `n`-th connection acquisition (1-based) fails.
    pub fn fail_acquire_at(mut self, n: usize) -> Self {
        self.fail_acquire_at = Some(n);
        self
    }

    pub fn fail_pool_close(mut self) -> Self {
        self.fail_pool_close = true;
        self
    }
}

/// Everything the scripted pool observed.
#[derive(Default)]
pub struct Journal {
    applied: AtomicUsize,
    acquired: AtomicUsize,
    queries: AtomicUsize,
    executes: AtomicUsize,
    conns_closed: AtomicUsize,
    pool_closed: AtomicBool,
    call_times: Mutex<Vec<Instant>>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl Journal {
    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn conns_closed(&self) -> usize {
        self.conns_closed.load(Ordering::SeqCst)
    }

    pub fn pool_closed(&self) -> bool {
        self.pool_closed.load(Ordering::SeqCst)
    }

    /// Start time of every driver call, in order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Gaps between consecutive driver calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.call_times()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    fn record_call(&self) {
        self.call_times.lock().unwrap().push(Instant::now());
    }
}

pub struct ScriptedProvider {
    scenario: Scenario,
    journal: Arc<Journal>,
}

impl ScriptedProvider {
    pub fn new(scenario: Scenario) -> Arc<Self> {
        Arc::new(Self {
            scenario,
            journal: Arc::new(Journal::default()),
        })
    }

    pub fn journal(&self) -> Arc<Journal> {
        Arc::clone(&self.journal)
    }
}

#[async_trait]
impl DbProvider for ScriptedProvider {
    async fn apply(&self, _cfg: &DbConfig) -> Result<Arc<dyn BaseDb>> {
        self.journal.applied.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedDb {
            scenario: self.scenario.clone(),
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct ScriptedDb {
    scenario: Scenario,
    journal: Arc<Journal>,
}

#[async_trait]
impl BaseDb for ScriptedDb {
    async fn get_base_conn(&self, _ctx: &Context) -> Result<Box<dyn BaseConn>> {
        let n = self.journal.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        if self.scenario.fail_acquire_at == Some(n) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "too many connections").into());
        }
        Ok(Box::new(ScriptedConn {
            scenario: self.scenario.clone(),
            journal: Arc::clone(&self.journal),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.journal.pool_closed.store(true, Ordering::SeqCst);
        if self.scenario.fail_pool_close {
            return Err(DbError::from("pool already closed"));
        }
        Ok(())
    }
}

struct ScriptedConn {
    scenario: Scenario,
    journal: Arc<Journal>,
}

impl ScriptedConn {
    async fn simulate_latency(&self) {
        if !self.scenario.latency.is_zero() {
            tokio::time::sleep(self.scenario.latency).await;
        }
    }
}

#[async_trait]
impl BaseConn for ScriptedConn {
    async fn query_sql(&self, _ctx: &Context, _query: &str, _args: &[Value]) -> Result<Rows> {
        let n = self.journal.queries.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.record_call();
        self.simulate_latency().await;
        (self.scenario.query)(n)
    }

    async fn execute_sql(
        &self,
        _ctx: &Context,
        queries: &[String],
        _args: &[Vec<Value>],
    ) -> Result<u64> {
        let n = self.journal.executes.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.record_call();
        self.journal.batches.lock().unwrap().push(queries.to_vec());
        self.simulate_latency().await;
        (self.scenario.execute)(n)
    }

    async fn close(&self) -> Result<()> {
        self.journal.conns_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn task_config(name: &str) -> Arc<LoaderConfig> {
    Arc::new(LoaderConfig::new(name))
}

/// Factory over `provider` recording into a fresh in-memory sink.
pub fn factory(provider: Arc<ScriptedProvider>) -> (ConnFactory, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let factory = ConnFactory::new(provider).with_metrics(metrics.clone());
    (factory, metrics)
}

pub fn statements(queries: &[&str]) -> Vec<String> {
    queries.iter().map(ToString::to_string).collect()
}

pub fn deadlock() -> DbError {
    DbError::vendor(1213, "Deadlock found when trying to get lock; try restarting transaction")
}
