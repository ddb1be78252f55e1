//! Paywall registry and reconciliation.
//!
//! # Responsibilities
//! - Register/unregister entries and keep the feed's address topics in step
//! - Route address activity to a per-address worker
//! - Rebuild each entry's `AggregateResult` from a full lookup and report it
//!
//! # Concurrency
//! ```text
//! dispatch loop ──AddressActivity──▶ worker(addr A) ──▶ lookup ──▶ observer
//!               └─AddressActivity──▶ worker(addr B) ──▶ lookup ──▶ observer
//! ```
//! Each registered address owns one worker task draining a FIFO queue, so
//! recomputes for one address never overlap and report in arrival order.
//! Events that pile up behind a running lookup share the next one; each
//! still gets its own report. Workers for different addresses run in
//! parallel, bounded by a semaphore on in-flight lookups.
//!
//! Feed topic changes are made while the registry shard for the address is
//! locked, so the feed's topic set always agrees with the registry.

use arc_swap::ArcSwapOption;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::config::PaywallConfig;
use crate::lookup::{LookupError, TxLookup};
use crate::observability::metrics;
use crate::paywall::types::{AggregateResult, Observer, ObserverError, PaywallEntry, PaywallError};
use crate::resilience::with_deadline;
use crate::subscription::{InboundEvent, SubscriptionClient, Subscriptions, Topic};

/// Why a worker was asked to recompute.
#[derive(Debug)]
enum Job {
    Activity { tx_id: String },
    Requested,
}

struct Slot {
    entry: PaywallEntry,
    generation: u64,
    jobs: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

struct Inner {
    registry: DashMap<String, Slot>,
    lookup: Arc<dyn TxLookup>,
    subscriptions: Arc<dyn Subscriptions>,
    observer: ArcSwapOption<Box<Observer>>,
    lookups: Semaphore,
    config: PaywallConfig,
    next_generation: AtomicU64,
}

/// Turns address activity into fulfillment reports.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<Inner>,
}

impl ReconciliationEngine {
    pub fn new(
        lookup: Arc<dyn TxLookup>,
        subscriptions: Arc<dyn Subscriptions>,
        config: PaywallConfig,
    ) -> Self {
        let permits = config.max_concurrent_lookups.max(1);
        Self {
            inner: Arc::new(Inner {
                registry: DashMap::new(),
                lookup,
                subscriptions,
                observer: ArcSwapOption::empty(),
                lookups: Semaphore::new(permits),
                config,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start watching `entry.address`.
    ///
    /// A second registration for an address that already has an active entry
    /// is rejected and leaves the existing entry untouched. Must be called
    /// from within a Tokio runtime.
    pub fn register_paywall(&self, entry: PaywallEntry) -> Result<(), PaywallError> {
        if entry.address.trim().is_empty() {
            return Err(PaywallError::InvalidEntry("address is empty".to_string()));
        }

        let address = entry.address.clone();
        match self.inner.registry.entry(address.clone()) {
            Entry::Occupied(_) => return Err(PaywallError::AlreadyRegistered(address)),
            Entry::Vacant(vacant) => {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let (jobs, queue) = mpsc::unbounded_channel();
                let worker = tokio::spawn(address_worker(
                    Arc::downgrade(&self.inner),
                    address.clone(),
                    generation,
                    queue,
                ));
                tracing::info!(
                    %address,
                    required_amount = entry.required_amount,
                    not_before = entry.not_before,
                    "Paywall registered"
                );
                self.inner.subscriptions.subscribe(Topic::address(address.as_str()));
                vacant.insert(Slot {
                    entry,
                    generation,
                    jobs,
                    worker,
                });
            }
        }

        metrics::record_active_entries(self.inner.registry.len());

        if self.inner.config.reconcile_on_register {
            self.reconcile_now(&address)?;
        }
        Ok(())
    }

    /// Stop watching `address` and return its entry.
    pub fn unregister_paywall(&self, address: &str) -> Result<PaywallEntry, PaywallError> {
        let slot = match self.inner.registry.entry(address.to_string()) {
            Entry::Occupied(occupied) => {
                self.inner.subscriptions.unsubscribe(&Topic::address(address));
                occupied.remove()
            }
            Entry::Vacant(_) => return Err(PaywallError::NotRegistered(address.to_string())),
        };

        metrics::record_active_entries(self.inner.registry.len());
        tracing::info!(%address, "Paywall unregistered");
        Ok(slot.entry)
    }

    /// Install the observer, replacing any previous one.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&AggregateResult) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        let observer: Box<Observer> = Box::new(observer);
        self.inner.observer.store(Some(Arc::new(observer)));
    }

    pub fn clear_observer(&self) {
        self.inner.observer.store(None);
    }

    /// Queue a recompute for `address` without waiting for feed activity.
    pub fn reconcile_now(&self, address: &str) -> Result<(), PaywallError> {
        if self.inner.dispatch(address, Job::Requested) {
            Ok(())
        } else {
            Err(PaywallError::NotRegistered(address.to_string()))
        }
    }

    /// Route one feed event.
    pub fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::AddressActivity { address, tx_id } => {
                if !self.inner.dispatch(&address, Job::Activity { tx_id }) {
                    tracing::debug!(%address, "Ignoring activity for unwatched address");
                }
            }
            InboundEvent::NewBlock { height, .. } => {
                tracing::debug!(height, watched = self.len(), "Block connected");
            }
            InboundEvent::Heartbeat => tracing::trace!("Feed heartbeat"),
        }
    }

    /// Drain `client` until its stream closes.
    pub async fn run(&self, client: &SubscriptionClient) {
        tracing::info!(endpoint = %client.endpoint(), "Reconciliation dispatch loop started");
        while let Some(event) = client.next_event().await {
            self.handle_event(event);
        }
        tracing::info!("Event stream closed, dispatch loop exiting");
    }

    /// Drop every entry and wait for in-flight recomputes to finish.
    ///
    /// Lookups still running are bounded by `lookup_timeout_secs`.
    pub async fn shutdown(&self) {
        let addresses: Vec<String> = self
            .inner
            .registry
            .iter()
            .map(|slot| slot.key().clone())
            .collect();

        let mut workers = Vec::with_capacity(addresses.len());
        for address in addresses {
            if let Some((_, slot)) = self.inner.registry.remove(&address) {
                workers.push(slot.worker);
            }
        }
        metrics::record_active_entries(0);

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Paywall worker ended abnormally");
            }
        }
        tracing::info!("Reconciliation engine stopped");
    }

    pub fn entry(&self, address: &str) -> Option<PaywallEntry> {
        self.inner.registry.get(address).map(|slot| slot.entry.clone())
    }

    /// Active entries, oldest registration first.
    pub fn entries(&self) -> Vec<PaywallEntry> {
        let mut entries: Vec<_> = self
            .inner
            .registry
            .iter()
            .map(|slot| (slot.generation, slot.entry.clone()))
            .collect();
        entries.sort_by_key(|(generation, _)| *generation);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("entries", &self.len())
            .field("has_observer", &self.inner.observer.load().is_some())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Inner {
    /// Queue `job` for `address`. `false` if the address is not watched.
    fn dispatch(&self, address: &str, job: Job) -> bool {
        let Some(slot) = self.registry.get(address) else {
            return false;
        };
        if slot.jobs.send(job).is_err() {
            tracing::warn!(%address, "Paywall worker gone, dropping event");
        }
        true
    }

    /// The entry for `address`, if it is still the registration `generation`.
    fn current_entry(&self, address: &str, generation: u64) -> Option<PaywallEntry> {
        self.registry
            .get(address)
            .filter(|slot| slot.generation == generation)
            .map(|slot| slot.entry.clone())
    }

    /// Rebuild `entry`'s aggregate once for `batch` and report it once per
    /// job. Returns `None` when the lookup failed or the registration went
    /// away, in which case nothing was reported.
    async fn reconcile(
        &self,
        entry: PaywallEntry,
        generation: u64,
        batch: &[Job],
        fulfilled_before: bool,
    ) -> Option<AggregateResult> {
        let address = entry.address.clone();
        let trigger = match batch.last() {
            Some(Job::Activity { tx_id }) => tx_id.as_str(),
            _ => "",
        };

        let txs = {
            let _permit = self.lookups.acquire().await.ok()?;
            let deadline = Duration::from_secs(self.config.lookup_timeout_secs);
            match with_deadline(deadline, self.lookup.get_transactions(&address)).await {
                Ok(result) => result,
                Err(_) => Err(LookupError::Timeout(deadline)),
            }
        };

        let txs = match txs {
            Ok(txs) => txs,
            Err(e) => {
                metrics::record_reconciliation("lookup_failed");
                tracing::warn!(
                    %address,
                    tx_id = trigger,
                    error = %e,
                    "Transaction lookup failed, waiting for next event"
                );
                return None;
            }
        };

        let mut result = AggregateResult::compute(entry, txs);
        if fulfilled_before && !result.fulfilled {
            tracing::warn!(
                %address,
                total_paid = result.total_paid,
                required_amount = result.entry.required_amount,
                "Paid total fell below requirement after fulfillment, keeping paywall fulfilled"
            );
            result.fulfilled = true;
        }

        metrics::record_reconciliation(if result.fulfilled { "paid" } else { "unpaid" });
        tracing::info!(
            %address,
            tx_id = trigger,
            total_paid = result.total_paid,
            required_amount = result.entry.required_amount,
            matching = result.matching_transactions.len(),
            fulfilled = result.fulfilled,
            events = batch.len(),
            "Paywall reconciled"
        );

        if self.current_entry(&address, generation).is_none() {
            tracing::debug!(%address, "Paywall unregistered during lookup, not reporting");
            return None;
        }
        for _ in batch {
            self.notify(&result);
        }
        Some(result)
    }

    fn notify(&self, result: &AggregateResult) {
        let Some(observer) = self.observer.load_full() else {
            return;
        };
        if let Err(e) = observer(result) {
            metrics::record_observer_error();
            tracing::warn!(address = %result.entry.address, error = %e, "Paywall observer failed");
        }
    }

    /// Drop the registration `generation` of `address` after fulfillment.
    fn retire(&self, address: &str, generation: u64) {
        let removed = match self.registry.entry(address.to_string()) {
            Entry::Occupied(occupied) if occupied.get().generation == generation => {
                self.subscriptions.unsubscribe(&Topic::address(address));
                occupied.remove();
                true
            }
            _ => false,
        };
        if removed {
            metrics::record_active_entries(self.registry.len());
            tracing::info!(%address, "Paywall fulfilled and removed");
        }
    }
}

/// Serial recompute loop for one registration of one address.
async fn address_worker(
    inner: Weak<Inner>,
    address: String,
    generation: u64,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    let mut fulfilled = false;

    while let Some(job) = jobs.recv().await {
        // A recompute reads the full set, so one lookup covers every queued job.
        let mut batch = vec![job];
        while let Ok(job) = jobs.try_recv() {
            batch.push(job);
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        // Unregistered (or replaced) while this job was queued.
        let Some(entry) = inner.current_entry(&address, generation) else {
            break;
        };

        let Some(result) = inner.reconcile(entry, generation, &batch, fulfilled).await else {
            continue;
        };
        fulfilled = result.fulfilled;

        if fulfilled && inner.config.remove_on_fulfillment {
            inner.retire(&address, generation);
        }
    }

    tracing::debug!(%address, generation, "Paywall worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{MemoryTxLookup, TransactionDetail};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Mutex, OnceLock};
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingSubscriptions {
        log: Mutex<Vec<String>>,
    }

    impl RecordingSubscriptions {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Subscriptions for RecordingSubscriptions {
        fn subscribe(&self, topic: Topic) {
            self.log.lock().unwrap().push(format!("+{}", topic));
        }

        fn unsubscribe(&self, topic: &Topic) {
            self.log.lock().unwrap().push(format!("-{}", topic));
        }
    }

    /// Topic set with the feed client's idempotent semantics.
    #[derive(Default)]
    struct TopicSet {
        topics: Mutex<BTreeSet<String>>,
        /// Runs inside the first `unsubscribe`, before the topic is dropped.
        on_unsubscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl TopicSet {
        fn contains(&self, topic: &str) -> bool {
            self.topics.lock().unwrap().contains(topic)
        }
    }

    impl Subscriptions for TopicSet {
        fn subscribe(&self, topic: Topic) {
            self.topics.lock().unwrap().insert(topic.to_string());
        }

        fn unsubscribe(&self, topic: &Topic) {
            let hook = self.on_unsubscribe.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            self.topics.lock().unwrap().remove(&topic.to_string());
        }
    }

    type Reports = Arc<Mutex<Vec<AggregateResult>>>;

    struct Harness {
        engine: ReconciliationEngine,
        lookup: Arc<MemoryTxLookup>,
        subs: Arc<RecordingSubscriptions>,
        reports: Reports,
    }

    fn harness(config: PaywallConfig) -> Harness {
        let lookup = Arc::new(MemoryTxLookup::new());
        let subs = Arc::new(RecordingSubscriptions::default());
        let engine = ReconciliationEngine::new(lookup.clone(), subs.clone(), config);
        let reports: Reports = Arc::default();
        let sink = reports.clone();
        engine.set_observer(move |result| {
            sink.lock().unwrap().push(result.clone());
            Ok(())
        });
        Harness {
            engine,
            lookup,
            subs,
            reports,
        }
    }

    fn activity(address: &str, tx_id: &str) -> InboundEvent {
        InboundEvent::AddressActivity {
            address: address.to_string(),
            tx_id: tx_id.to_string(),
        }
    }

    fn reports_for(reports: &Reports, address: &str) -> Vec<AggregateResult> {
        reports
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.entry.address == address)
            .cloned()
            .collect()
    }

    async fn wait_for_reports(reports: &Reports, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while reports.lock().unwrap().len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for {count} reports");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_four_address_scenario() {
        let h = harness(PaywallConfig::default());
        for address in ["1", "2", "3", "4"] {
            h.engine
                .register_paywall(PaywallEntry::new(address, 1000, 100))
                .unwrap();
        }

        let txs = [
            TransactionDetail::new("1", "1", 1000, 80),
            TransactionDetail::new("2", "2", 1000, 120),
            TransactionDetail::new("3", "3", 800, 130),
            TransactionDetail::new("4", "4", 500, 120),
            TransactionDetail::new("4", "5", 700, 120),
        ];
        for tx in txs {
            let event = activity(&tx.address, &tx.tx_id);
            h.lookup.insert(tx);
            h.engine.handle_event(event);
        }
        wait_for_reports(&h.reports, 5).await;

        let latest: HashMap<String, (u64, bool)> = h
            .reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.entry.address.clone(), (r.total_paid, r.fulfilled)))
            .collect();
        assert_eq!(latest["1"], (0, false));
        assert_eq!(latest["2"], (1000, true));
        assert_eq!(latest["3"], (800, false));
        assert_eq!(latest["4"], (1200, true));
    }

    #[tokio::test]
    async fn test_total_independent_of_order_and_duplicates() {
        let h = harness(PaywallConfig::default());
        h.engine.register_paywall(PaywallEntry::new("A", 10_000, 100)).unwrap();

        h.lookup.insert(TransactionDetail::new("A", "t3", 300, 300));
        h.lookup.insert(TransactionDetail::new("A", "t1", 100, 100));
        h.lookup.insert(TransactionDetail::new("A", "t0", 999, 50));
        h.lookup.insert(TransactionDetail::new("A", "t2", 200, 200));

        for tx_id in ["t2", "t2", "t0", "t3", "t1", "t3"] {
            h.engine.handle_event(activity("A", tx_id));
        }
        wait_for_reports(&h.reports, 6).await;

        for report in reports_for(&h.reports, "A") {
            assert_eq!(report.total_paid, 600);
            assert!(!report.fulfilled);
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let h = harness(PaywallConfig::default());
        h.engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();

        let err = h
            .engine
            .register_paywall(PaywallEntry::new("A", 5, 0))
            .unwrap_err();
        assert_eq!(err, PaywallError::AlreadyRegistered("A".to_string()));
        assert_eq!(h.engine.entry("A").unwrap().required_amount, 100);
        assert_eq!(h.subs.log(), vec!["+address:A".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_address_rejected() {
        let h = harness(PaywallConfig::default());
        let err = h
            .engine
            .register_paywall(PaywallEntry::new(" ", 100, 0))
            .unwrap_err();
        assert!(matches!(err, PaywallError::InvalidEntry(_)));
        assert!(h.engine.is_empty());
    }

    #[tokio::test]
    async fn test_unwatched_address_is_ignored() {
        let h = harness(PaywallConfig::default());
        h.lookup.insert(TransactionDetail::new("Z", "t", 100, 100));

        h.engine.handle_event(activity("Z", "t"));
        h.engine.handle_event(InboundEvent::Heartbeat);
        h.engine.handle_event(InboundEvent::NewBlock {
            height: 5,
            hash: "h".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.reports.lock().unwrap().is_empty());
        assert_eq!(h.lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_stop_processing() {
        let h = harness(PaywallConfig::default());
        let calls = Arc::new(AtomicU64::new(0));
        let seen = calls.clone();
        h.engine.set_observer(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err("observer rejected update".into())
        });

        h.engine.register_paywall(PaywallEntry::new("A", 10, 0)).unwrap();
        h.engine.register_paywall(PaywallEntry::new("B", 10, 0)).unwrap();
        h.engine.handle_event(activity("A", "t1"));
        h.engine.handle_event(activity("A", "t2"));
        h.engine.handle_event(activity("B", "t3"));

        let deadline = Instant::now() + Duration::from_secs(3);
        while calls.load(Ordering::SeqCst) < 3 {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_observer_last_write_wins() {
        let h = harness(PaywallConfig::default());
        let second: Reports = Arc::default();
        let sink = second.clone();
        h.engine.set_observer(move |result| {
            sink.lock().unwrap().push(result.clone());
            Ok(())
        });

        h.engine.register_paywall(PaywallEntry::new("A", 10, 0)).unwrap();
        h.engine.handle_event(activity("A", "t1"));
        wait_for_reports(&second, 1).await;
        assert!(h.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_reports_nothing_then_recovers() {
        let h = harness(PaywallConfig::default());
        h.engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();
        h.lookup.insert(TransactionDetail::new("A", "t1", 150, 10));

        h.lookup.set_unavailable(true);
        h.engine.handle_event(activity("A", "t1"));
        let deadline = Instant::now() + Duration::from_secs(3);
        while h.lookup.calls() < 1 {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.reports.lock().unwrap().is_empty());

        h.lookup.set_unavailable(false);
        h.engine.handle_event(activity("A", "t1"));
        wait_for_reports(&h.reports, 1).await;
        let report = &reports_for(&h.reports, "A")[0];
        assert_eq!(report.total_paid, 150);
        assert!(report.fulfilled);
    }

    #[tokio::test]
    async fn test_lookup_deadline() {
        let config = PaywallConfig {
            lookup_timeout_secs: 1,
            ..PaywallConfig::default()
        };
        let h = harness(config);
        h.lookup.set_latency(Duration::from_secs(3));
        h.engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();

        let started = Instant::now();
        h.engine.handle_event(activity("A", "t1"));
        while h.lookup.calls() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.engine.shutdown().await;

        assert!(started.elapsed() < Duration::from_millis(2500));
        assert!(h.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fulfillment_is_permanent() {
        let h = harness(PaywallConfig::default());
        h.engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();

        h.lookup.insert(TransactionDetail::new("A", "t1", 100, 10));
        h.engine.handle_event(activity("A", "t1"));
        wait_for_reports(&h.reports, 1).await;

        // Reorg drops the payment.
        h.lookup.remove("A", "t1");
        h.engine.handle_event(activity("A", "t1"));
        wait_for_reports(&h.reports, 2).await;

        let reports = reports_for(&h.reports, "A");
        assert!(reports[0].fulfilled);
        assert_eq!(reports[1].total_paid, 0);
        assert!(reports[1].fulfilled);
    }

    #[tokio::test]
    async fn test_reports_follow_arrival_order_per_address() {
        let h = harness(PaywallConfig::default());
        h.lookup.set_latency(Duration::from_millis(15));
        h.engine.register_paywall(PaywallEntry::new("A", 1_000_000, 0)).unwrap();

        for i in 1..=8u64 {
            h.lookup.insert(TransactionDetail::new("A", format!("t{i}"), 10, 1));
            h.engine.handle_event(activity("A", &format!("t{i}")));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_for_reports(&h.reports, 8).await;

        let totals: Vec<u64> = reports_for(&h.reports, "A").iter().map(|r| r.total_paid).collect();
        assert!(totals.windows(2).all(|w| w[0] <= w[1]), "totals went backwards: {totals:?}");
        assert_eq!(totals.last(), Some(&80));
    }

    #[tokio::test]
    async fn test_addresses_reconcile_in_parallel() {
        let h = harness(PaywallConfig::default());
        h.lookup.set_latency(Duration::from_millis(300));
        for address in ["A", "B", "C"] {
            h.engine.register_paywall(PaywallEntry::new(address, 1, 0)).unwrap();
        }

        let started = Instant::now();
        for address in ["A", "B", "C"] {
            h.engine.handle_event(activity(address, "t"));
        }
        wait_for_reports(&h.reports, 3).await;
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_unregister_stops_reports() {
        let h = harness(PaywallConfig::default());
        h.engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();

        let removed = h.engine.unregister_paywall("A").unwrap();
        assert_eq!(removed.address, "A");
        assert_eq!(
            h.engine.unregister_paywall("A"),
            Err(PaywallError::NotRegistered("A".to_string()))
        );

        h.engine.handle_event(activity("A", "t1"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.reports.lock().unwrap().is_empty());
        assert_eq!(
            h.subs.log(),
            vec!["+address:A".to_string(), "-address:A".to_string()]
        );

        // Re-registering starts a fresh obligation.
        h.engine.register_paywall(PaywallEntry::new("A", 5, 0)).unwrap();
        assert_eq!(h.engine.entry("A").unwrap().required_amount, 5);
    }

    #[tokio::test]
    async fn test_remove_on_fulfillment() {
        let config = PaywallConfig {
            remove_on_fulfillment: true,
            ..PaywallConfig::default()
        };
        let h = harness(config);
        h.engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();

        h.lookup.insert(TransactionDetail::new("A", "t1", 60, 10));
        h.engine.handle_event(activity("A", "t1"));
        wait_for_reports(&h.reports, 1).await;
        assert!(h.engine.entry("A").is_some());

        h.lookup.insert(TransactionDetail::new("A", "t2", 60, 10));
        h.engine.handle_event(activity("A", "t2"));
        wait_for_reports(&h.reports, 2).await;

        let deadline = Instant::now() + Duration::from_secs(3);
        while h.engine.entry("A").is_some() {
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.subs.log().contains(&"-address:A".to_string()));
    }

    #[tokio::test]
    async fn test_reconcile_now_and_on_register() {
        let config = PaywallConfig {
            reconcile_on_register: true,
            ..PaywallConfig::default()
        };
        let h = harness(config);
        h.lookup.insert(TransactionDetail::new("A", "old", 500, 10));

        h.engine.register_paywall(PaywallEntry::new("A", 500, 0)).unwrap();
        wait_for_reports(&h.reports, 1).await;
        assert!(reports_for(&h.reports, "A")[0].fulfilled);

        h.engine.reconcile_now("A").unwrap();
        wait_for_reports(&h.reports, 2).await;
        assert_eq!(
            h.engine.reconcile_now("missing"),
            Err(PaywallError::NotRegistered("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_entries_in_registration_order() {
        let h = harness(PaywallConfig::default());
        for address in ["C", "A", "B"] {
            h.engine.register_paywall(PaywallEntry::new(address, 1, 0)).unwrap();
        }
        let order: Vec<_> = h.engine.entries().into_iter().map(|e| e.address).collect();
        assert_eq!(order, vec!["C", "A", "B"]);
        assert_eq!(h.engine.len(), 3);

        h.engine.shutdown().await;
        assert!(h.engine.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reregister_during_unregister_keeps_topic() {
        let topics = Arc::new(TopicSet::default());
        let engine = ReconciliationEngine::new(
            Arc::new(MemoryTxLookup::new()),
            topics.clone(),
            PaywallConfig::default(),
        );
        engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();

        // A second caller registers "A" again while the unsubscribe for the
        // old registration is still in progress.
        let racer: Arc<OnceLock<std::thread::JoinHandle<()>>> = Arc::default();
        {
            let engine = engine.clone();
            let racer = racer.clone();
            let runtime = tokio::runtime::Handle::current();
            *topics.on_unsubscribe.lock().unwrap() = Some(Box::new(move || {
                let handle = std::thread::spawn(move || {
                    let _guard = runtime.enter();
                    let _ = engine.register_paywall(PaywallEntry::new("A", 7, 0));
                });
                let _ = racer.set(handle);
                std::thread::sleep(Duration::from_millis(50));
            }));
        }

        engine.unregister_paywall("A").unwrap();
        let racer = Arc::try_unwrap(racer).ok().and_then(OnceLock::into_inner).unwrap();
        racer.join().unwrap();

        assert_eq!(engine.entry("A").map(|e| e.required_amount), Some(7));
        assert!(topics.contains("address:A"), "active entry without a feed topic");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations() {
        let topics = Arc::new(TopicSet::default());
        let engine = ReconciliationEngine::new(
            Arc::new(MemoryTxLookup::new()),
            topics.clone(),
            PaywallConfig::default(),
        );

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.register_paywall(PaywallEntry::new(format!("D{i}"), 1, 0))
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(engine.len(), 64);
        for i in 0..64 {
            assert!(engine.entry(&format!("D{i}")).is_some());
            assert!(topics.contains(&format!("address:D{i}")));
        }

        // Register and unregister the same address from several tasks.
        let churn: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        let _ = engine.register_paywall(PaywallEntry::new("A", 1, 0));
                        tokio::task::yield_now().await;
                        let _ = engine.unregister_paywall("A");
                    }
                })
            })
            .collect();
        for task in churn {
            task.await.unwrap();
        }
        assert_eq!(engine.entry("A").is_some(), topics.contains("address:A"));
    }

    #[tokio::test]
    async fn test_no_report_after_unregister() {
        let h = harness(PaywallConfig::default());
        h.lookup.set_latency(Duration::from_millis(200));
        h.lookup.insert(TransactionDetail::new("A", "t1", 100, 10));
        h.engine.register_paywall(PaywallEntry::new("A", 100, 0)).unwrap();

        h.engine.handle_event(activity("A", "t1"));
        while h.lookup.calls() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.engine.unregister_paywall("A").unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(h.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queued_events_share_one_lookup() {
        let h = harness(PaywallConfig::default());
        h.lookup.set_latency(Duration::from_millis(100));
        h.lookup.insert(TransactionDetail::new("A", "t0", 10, 10));
        h.engine.register_paywall(PaywallEntry::new("A", 1_000, 0)).unwrap();

        h.engine.handle_event(activity("A", "t0"));
        while h.lookup.calls() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for i in 1..=5 {
            h.lookup.insert(TransactionDetail::new("A", format!("t{i}"), 10, 10));
            h.engine.handle_event(activity("A", &format!("t{i}")));
        }
        wait_for_reports(&h.reports, 6).await;

        assert_eq!(h.lookup.calls(), 2);
        let totals: Vec<u64> = reports_for(&h.reports, "A").iter().map(|r| r.total_paid).collect();
        assert!(totals[1..].iter().all(|total| *total == 60), "totals: {totals:?}");
    }
}
