//! Shared test harness for tidemark integration tests.
//!
//! Provides [`TestCluster`]: N scheduler instances, each with its own lock
//! holder identity and executor, all sharing one metadata store, one
//! topology and one manual clock. Instances behave exactly like separate
//! processes would: the only thing they share is the store.
//!
//! Every executor reports into a shared [`ExecutionLog`], which flags any
//! two repairs running at the same time under conflicting lock keys.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tidemark_lock::{LockKey, LockManager};
use tidemark_meta::{FaultyStore, MemoryMetaStore, RepairEntry, RepairHistory};
use tidemark_repair::{
    RepairError, RepairExecutor, RepairRequest, RepairScheduler, SchedulerConfig,
    StaticReplicationProvider,
};
use tidemark_types::{
    Clock, ManualClock, Node, RepairConfiguration, RepairLockType, ReplicaSet,
    StaticRepairConfigurationProvider, TableReference, TokenRange,
};
use tokio::sync::Notify;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Start of every test clock.
pub const T0: i64 = 1_700_000_000_000;

pub fn table() -> TableReference {
    TableReference::new("ks", "tbl")
}

pub fn node(host: &str, dc: &str) -> Node {
    Node::new(host, dc)
}

/// Six vnodes over four nodes in two datacenters, replication factor 2.
///
/// Replica sets overlap pairwise, so a parallel pass needs several groups.
pub fn ring() -> Vec<(TokenRange, ReplicaSet)> {
    let a = node("a", "dc1");
    let b = node("b", "dc1");
    let c = node("c", "dc2");
    let d = node("d", "dc2");
    let rs = |x: &Node, y: &Node| ReplicaSet::new([x.clone(), y.clone()]);
    vec![
        (TokenRange::new(-300, -200), rs(&a, &b)),
        (TokenRange::new(-200, -100), rs(&b, &c)),
        (TokenRange::new(-100, 0), rs(&c, &d)),
        (TokenRange::new(0, 100), rs(&d, &a)),
        (TokenRange::new(100, 200), rs(&a, &c)),
        (TokenRange::new(200, -300), rs(&b, &d)),
    ]
}

pub fn weekly() -> RepairConfiguration {
    RepairConfiguration::builder()
        .repair_interval(7 * DAY)
        .warning_time(8 * DAY)
        .error_time(10 * DAY)
        .build()
        .unwrap()
}

// =========================================================================
// Execution log
// =========================================================================

/// Everything the executors of a cluster did.
pub struct ExecutionLog {
    lock_type: RepairLockType,
    next_ticket: AtomicU64,
    active: Mutex<Vec<(u64, String, BTreeSet<LockKey>)>>,
    completed: Mutex<Vec<(String, RepairRequest)>>,
    violations: AtomicUsize,
}

impl ExecutionLog {
    fn new(lock_type: RepairLockType) -> Self {
        Self {
            lock_type,
            next_ticket: AtomicU64::new(0),
            active: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            violations: AtomicUsize::new(0),
        }
    }

    fn begin(self: &Arc<Self>, holder: &str, replicas: &ReplicaSet) -> ActiveRepair {
        let keys: BTreeSet<LockKey> = LockKey::for_group(self.lock_type, [replicas])
            .into_iter()
            .collect();
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);

        let mut active = self.active.lock().unwrap();
        for (_, other_holder, other_keys) in active.iter() {
            if other_holder != holder && !keys.is_disjoint(other_keys) {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
        }
        active.push((ticket, holder.to_string(), keys));
        ActiveRepair {
            log: self.clone(),
            ticket,
        }
    }

    fn finish(&self, holder: &str, request: RepairRequest) {
        self.completed
            .lock()
            .unwrap()
            .push((holder.to_string(), request));
    }

    /// Times two holders repaired under a shared lock key at once.
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    /// Successful repairs as `(holder, request)`, in completion order.
    pub fn completed(&self) -> Vec<(String, RepairRequest)> {
        self.completed.lock().unwrap().clone()
    }

    pub fn completed_by(&self, holder: &str) -> Vec<RepairRequest> {
        self.completed()
            .into_iter()
            .filter(|(h, _)| h == holder)
            .map(|(_, r)| r)
            .collect()
    }

    /// Distinct ranges repaired by anyone.
    pub fn repaired_ranges(&self) -> BTreeSet<TokenRange> {
        self.completed().into_iter().map(|(_, r)| r.range).collect()
    }
}

/// Removes itself from the active set when the repair ends or is dropped.
struct ActiveRepair {
    log: Arc<ExecutionLog>,
    ticket: u64,
}

impl Drop for ActiveRepair {
    fn drop(&mut self) {
        self.log
            .active
            .lock()
            .unwrap()
            .retain(|(t, _, _)| *t != self.ticket);
    }
}

// =========================================================================
// Test executor
// =========================================================================

/// Executor of one instance. Can be slowed down, failed or hung.
pub struct TestExecutor {
    holder: String,
    log: Arc<ExecutionLog>,
    store: Arc<FaultyStore<MemoryMetaStore>>,
    delay_ms: AtomicU64,
    pub failing: AtomicBool,
    pub hanging: AtomicBool,
    /// Take the history store down after the next repair finishes.
    pub break_history: AtomicBool,
    /// Notified when a call starts hanging.
    pub started: Notify,
}

impl TestExecutor {
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl RepairExecutor for TestExecutor {
    async fn repair(&self, request: RepairRequest) -> Result<(), RepairError> {
        let _active = self.log.begin(&self.holder, &request.replicas);

        if self.hanging.load(Ordering::SeqCst) {
            self.started.notify_one();
            return std::future::pending().await;
        }

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(RepairError::Execution {
                range: request.range,
                reason: "injected failure".into(),
            });
        }

        if self.break_history.swap(false, Ordering::SeqCst) {
            self.store.fail_history(true);
        }
        self.log.finish(&self.holder, request);
        Ok(())
    }
}

// =========================================================================
// Cluster
// =========================================================================

/// One scheduler process.
pub struct Instance {
    pub holder: String,
    pub scheduler: RepairScheduler,
    pub executor: Arc<TestExecutor>,
}

/// N scheduler instances sharing one store.
pub struct TestCluster {
    pub clock: Arc<ManualClock>,
    pub store: Arc<FaultyStore<MemoryMetaStore>>,
    pub topology: Arc<StaticReplicationProvider>,
    pub log: Arc<ExecutionLog>,
    instances: Vec<Instance>,
}

impl TestCluster {
    /// `n` instances on [`ring`], weekly policy, default scheduler settings.
    pub fn new(n: usize) -> Self {
        Self::with_config(n, weekly(), ring(), SchedulerConfig::default())
    }

    pub fn with_config(
        n: usize,
        policy: RepairConfiguration,
        ring: Vec<(TokenRange, ReplicaSet)>,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        Self::with_clock(n, policy, ring, scheduler_config, clock)
    }

    pub fn with_clock(
        n: usize,
        policy: RepairConfiguration,
        ring: Vec<(TokenRange, ReplicaSet)>,
        scheduler_config: SchedulerConfig,
        clock: Arc<ManualClock>,
    ) -> Self {
        let store = Arc::new(FaultyStore::new(Arc::new(MemoryMetaStore::new())));
        let topology = Arc::new(StaticReplicationProvider::new().with_table(table(), ring));
        let log = Arc::new(ExecutionLog::new(policy.lock_type()));
        let policies = Arc::new(
            StaticRepairConfigurationProvider::explicit_only().with_table(table(), policy),
        );

        let instances = (0..n)
            .map(|i| {
                let holder = format!("node-{i}");
                let executor = Arc::new(TestExecutor {
                    holder: holder.clone(),
                    log: log.clone(),
                    store: store.clone(),
                    delay_ms: AtomicU64::new(0),
                    failing: AtomicBool::new(false),
                    hanging: AtomicBool::new(false),
                    break_history: AtomicBool::new(false),
                    started: Notify::new(),
                });
                let locks = Arc::new(LockManager::new(
                    store.clone(),
                    clock.clone(),
                    holder.clone(),
                ));
                let scheduler = RepairScheduler::builder(
                    policies.clone(),
                    topology.clone(),
                    store.clone(),
                    locks,
                    executor.clone(),
                    clock.clone(),
                )
                .config(scheduler_config.clone())
                .build();
                Instance {
                    holder,
                    scheduler,
                    executor,
                }
            })
            .collect();

        Self {
            clock,
            store,
            topology,
            log,
            instances,
        }
    }

    pub fn instance(&self, i: usize) -> &Instance {
        &self.instances[i]
    }

    pub fn scheduler(&self, i: usize) -> &RepairScheduler {
        &self.instances[i].scheduler
    }

    pub fn executor(&self, i: usize) -> &Arc<TestExecutor> {
        &self.instances[i].executor
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Every stored repair fact of [`table`].
    pub async fn history(&self) -> Vec<RepairEntry> {
        self.store
            .inner()
            .entries_since(&table(), i64::MIN)
            .await
            .unwrap()
    }

    /// Record every vnode of [`ring`] as repaired at `at_ms`.
    pub async fn seed_history(&self, at_ms: i64) {
        for (range, replicas) in ring() {
            self.store
                .inner()
                .record(RepairEntry {
                    table: table(),
                    range,
                    replicas,
                    started_at_ms: at_ms,
                    repaired_at_ms: at_ms,
                })
                .await
                .unwrap();
        }
    }
}
