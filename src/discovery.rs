//! # Pool discovery
//!
//! Scans the factory's `allPairs` array, reads each pair and its tokens,
//! evaluates the ratio and records the result in the [`PoolRegistry`].
//!
//! [`InitializationService`] wraps a scan with the two guards the dashboard
//! relies on: only one run at a time, and no automatic run inside the
//! cooldown window after the last successful one. Time and the last-run
//! timestamp are injected so the guards are testable.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers::types::Address;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::accessor::ChainReader;
use crate::evaluator::{self, ThresholdPolicy};
use crate::metrics;
use crate::registry::{create_parent_dir, PoolRegistry};
use crate::types::conversions::decimal_to_f64;
use crate::types::{HistoricalPoint, Pool, PoolUpdate, TokenRef};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where the timestamp of the last successful initialization lives.
pub trait CooldownStore: Send + Sync {
    fn last_run(&self) -> Option<DateTime<Utc>>;
    fn set_last_run(&self, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCooldownStore {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl CooldownStore for MemoryCooldownStore {
    fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_last_run(&self, at: DateTime<Utc>) -> Result<()> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CooldownFile {
    last_run: DateTime<Utc>,
}

/// Keeps the timestamp in a small JSON file so restarts respect the cooldown.
pub struct FileCooldownStore {
    path: PathBuf,
}

impl FileCooldownStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CooldownStore for FileCooldownStore {
    fn last_run(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<CooldownFile>(&raw) {
            Ok(f) => Some(f.last_run),
            Err(e) => {
                warn!("Ignoring unreadable cooldown file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn set_last_run(&self, at: DateTime<Utc>) -> Result<()> {
        let json = serde_json::to_string(&CooldownFile { last_run: at })?;
        create_parent_dir(&self.path)
            .and_then(|_| fs::write(&self.path, json))
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPair {
    pub address: Option<Address>,
    pub index: Option<u64>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub total_pairs: u64,
    pub scanned: u64,
    pub discovered: u64,
    pub updated: u64,
    pub imbalanced: u64,
    pub failed: Vec<FailedPair>,
}

pub struct PoolDiscovery {
    reader: Arc<dyn ChainReader>,
    registry: Arc<PoolRegistry>,
    clock: Arc<dyn Clock>,
    policy: ThresholdPolicy,
    default_target: Decimal,
    max_pairs: u64,
}

impl PoolDiscovery {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        registry: Arc<PoolRegistry>,
        clock: Arc<dyn Clock>,
        policy: ThresholdPolicy,
        default_target: Decimal,
        max_pairs: u64,
    ) -> Self {
        Self {
            reader,
            registry,
            clock,
            policy,
            default_target,
            max_pairs,
        }
    }

    /// Walks `allPairs` and syncs each pair. A failing pair is reported and
    /// skipped; failing to read the pair count fails the scan.
    pub async fn scan(&self) -> Result<DiscoveryReport> {
        let total = self
            .reader
            .all_pairs_length()
            .await
            .context("reading allPairsLength")?;
        let limit = total.min(self.max_pairs);
        if limit < total {
            warn!("Factory lists {} pairs, scanning the first {}", total, limit);
        }

        let _batch = self.registry.batch();
        let mut report = DiscoveryReport {
            total_pairs: total,
            ..Default::default()
        };

        for index in 0..limit {
            let pair = match self.reader.pair_at(index).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("allPairs({}) failed: {:#}", index, e);
                    report.failed.push(FailedPair {
                        address: None,
                        index: Some(index),
                        error: format!("{:#}", e),
                    });
                    continue;
                }
            };
            report.scanned += 1;
            match self.sync_pair(pair).await {
                Ok((pool, created)) => {
                    if created {
                        report.discovered += 1;
                    } else {
                        report.updated += 1;
                    }
                    if pool.needs_rebalancing {
                        report.imbalanced += 1;
                    }
                }
                Err(e) => {
                    warn!("Syncing pair {:?} failed: {:#}", pair, e);
                    report.failed.push(FailedPair {
                        address: Some(pair),
                        index: Some(index),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            "Discovery finished: {} scanned, {} new, {} updated, {} imbalanced, {} failed",
            report.scanned,
            report.discovered,
            report.updated,
            report.imbalanced,
            report.failed.len()
        );
        Ok(report)
    }

    /// Status poll of a single pair.
    pub async fn refresh_pool(&self, pair: Address) -> Result<Pool> {
        let _batch = self.registry.batch();
        let (pool, _) = self.sync_pair(pair).await?;
        Ok(pool)
    }

    async fn sync_pair(&self, pair: Address) -> Result<(Pool, bool)> {
        let state = self.reader.pair_state(pair).await?;
        let (info_a, info_b) = tokio::try_join!(
            self.reader.token_info(state.token0),
            self.reader.token_info(state.token1),
        )?;
        let now = self.clock.now();

        let existing = self.registry.get_pool(&pair);
        let target = match &existing {
            Some(p) => crate::types::conversions::f64_to_decimal(p.target_ratio)?,
            None => self.default_target,
        };

        let eval = evaluator::evaluate_reserves(
            state.reserve0,
            state.reserve1,
            info_a.decimals,
            info_b.decimals,
            target,
            self.policy,
        )
        .with_context(|| format!("evaluating pair {:?}", pair))?;
        metrics::increment_imbalance_evaluation(eval.needs_rebalancing);

        let created = existing.is_none();
        if created {
            let token_a = TokenRef {
                address: info_a.address,
                symbol: info_a.symbol.clone(),
                decimals: info_a.decimals,
            };
            let token_b = TokenRef {
                address: info_b.address,
                symbol: info_b.symbol.clone(),
                decimals: info_b.decimals,
            };
            self.registry
                .insert_pool(Pool::new(pair, token_a, token_b, decimal_to_f64(target), now));
            info!("Discovered pool {:?} ({}/{})", pair, info_a.symbol, info_b.symbol);
        }

        let pool = self.registry.update_pool(
            &pair,
            PoolUpdate {
                reserve_a: Some(state.reserve0.to_string()),
                reserve_b: Some(state.reserve1.to_string()),
                total_supply: Some(state.total_supply.to_string()),
                current_ratio: Some(decimal_to_f64(eval.ratio)),
                needs_rebalancing: Some(eval.needs_rebalancing),
                tvl: Some(decimal_to_f64(eval.tvl)),
                is_active: Some(true),
                ..Default::default()
            },
        )?;

        self.registry.add_historical_data(
            &pair,
            HistoricalPoint {
                timestamp: now,
                ratio: pool.current_ratio,
                tvl: pool.tvl,
                volume: pool.volume_24h,
                fees: pool.fees_24h,
            },
        )?;

        debug!(
            "pair {:?}: ratio {} target {} imbalanced {}",
            pair, eval.ratio, target, eval.needs_rebalancing
        );
        Ok((pool, created))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRunning,
    CooldownActive { remaining_seconds: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InitOutcome {
    Completed { report: DiscoveryReport },
    Skipped { skip: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitStatus {
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_allowed_at: Option<DateTime<Utc>>,
    pub registered_pools: usize,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct InitializationService {
    discovery: Arc<PoolDiscovery>,
    registry: Arc<PoolRegistry>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn CooldownStore>,
    cooldown: ChronoDuration,
    running: AtomicBool,
}

impl InitializationService {
    pub fn new(
        discovery: Arc<PoolDiscovery>,
        registry: Arc<PoolRegistry>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn CooldownStore>,
        cooldown: Duration,
    ) -> Self {
        Self {
            discovery,
            registry,
            clock,
            store,
            cooldown: ChronoDuration::from_std(cooldown).unwrap_or_else(|_| ChronoDuration::minutes(10)),
            running: AtomicBool::new(false),
        }
    }

    pub fn discovery(&self) -> &PoolDiscovery {
        &self.discovery
    }

    /// Runs a discovery scan unless one is in flight or, without `force`, the
    /// last successful run is younger than the cooldown.
    pub async fn run(&self, force: bool) -> Result<InitOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Initialization already in progress, skipping");
            metrics::increment_discovery_run("skipped_running");
            return Ok(InitOutcome::Skipped {
                skip: SkipReason::AlreadyRunning,
            });
        }
        let _guard = RunningGuard(&self.running);

        let now = self.clock.now();
        if !force {
            if let Some(last) = self.store.last_run() {
                let elapsed = now - last;
                if elapsed < self.cooldown {
                    let remaining = (self.cooldown - elapsed).num_seconds();
                    debug!("Initialization cooldown active, {}s remaining", remaining);
                    metrics::increment_discovery_run("skipped_cooldown");
                    return Ok(InitOutcome::Skipped {
                        skip: SkipReason::CooldownActive {
                            remaining_seconds: remaining,
                        },
                    });
                }
            }
        }

        let report = match self.discovery.scan().await {
            Ok(r) => r,
            Err(e) => {
                metrics::increment_discovery_run("failed");
                return Err(e);
            }
        };
        if let Err(e) = self.store.set_last_run(self.clock.now()) {
            warn!("Could not persist initialization timestamp: {:#}", e);
        }
        if let Err(e) = self.registry.save() {
            warn!("Could not save registry after discovery: {}", e);
        }
        metrics::increment_discovery_run("completed");
        Ok(InitOutcome::Completed { report })
    }

    pub fn status(&self) -> InitStatus {
        let last_run = self.store.last_run();
        InitStatus {
            running: self.running.load(Ordering::SeqCst),
            last_run,
            next_allowed_at: last_run.map(|t| t + self.cooldown),
            registered_pools: self.registry.len(),
        }
    }

    /// Runs [`run`](Self::run) on a fixed interval until the task is aborted.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match self.run(false).await {
                    Ok(InitOutcome::Completed { report }) => {
                        debug!("Periodic discovery: {} pools scanned", report.scanned)
                    }
                    Ok(InitOutcome::Skipped { skip }) => debug!("Periodic discovery skipped: {:?}", skip),
                    Err(e) => warn!("Periodic discovery failed: {:#}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::InMemoryChain;
    use ethers::types::U256;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, secs: i64) {
            let mut t = self.0.lock().unwrap();
            *t = *t + ChronoDuration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct Fixture {
        chain: Arc<InMemoryChain>,
        registry: Arc<PoolRegistry>,
        clock: Arc<ManualClock>,
        discovery: Arc<PoolDiscovery>,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(InMemoryChain::new(31));
        let (a, b, c) = (
            Address::from_low_u64_be(0xa),
            Address::from_low_u64_be(0xb),
            Address::from_low_u64_be(0xc),
        );
        chain.add_token(a, "WRBTC", 18);
        chain.add_token(b, "RIF", 18);
        chain.add_token(c, "DOC", 18);
        let e18 = U256::exp10(18);
        chain.add_pair(Address::from_low_u64_be(0xab), a, b, e18 * 150, e18 * 100);
        chain.add_pair(Address::from_low_u64_be(0xbc), b, c, e18 * 100, e18 * 100);

        let registry = Arc::new(PoolRegistry::new());
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let discovery = Arc::new(PoolDiscovery::new(
            chain.clone(),
            registry.clone(),
            clock.clone(),
            ThresholdPolicy::default(),
            Decimal::ONE,
            100,
        ));
        Fixture {
            chain,
            registry,
            clock,
            discovery,
        }
    }

    #[tokio::test]
    async fn scan_registers_and_evaluates_pools() {
        let f = fixture();
        let report = f.discovery.scan().await.unwrap();

        assert_eq!(report.total_pairs, 2);
        assert_eq!(report.discovered, 2);
        assert_eq!(report.imbalanced, 1);
        assert!(report.failed.is_empty());

        let pools = f.registry.get_all_pools();
        assert_eq!(pools[0].address, Address::from_low_u64_be(0xab));
        assert_eq!(pools[0].current_ratio, 1.5);
        assert_eq!(pools[0].tvl, 250.0);
        assert!(pools[0].needs_rebalancing);
        assert_eq!(pools[0].token_a.symbol, "WRBTC");
        assert!(!pools[1].needs_rebalancing);

        let again = f.discovery.scan().await.unwrap();
        assert_eq!(again.discovered, 0);
        assert_eq!(again.updated, 2);
        let metrics = f.registry.get_pool_metrics(&pools[0].address).unwrap();
        assert_eq!(metrics.historical_data.len(), 2);
    }

    #[tokio::test]
    async fn refresh_picks_up_new_reserves() {
        let f = fixture();
        f.discovery.scan().await.unwrap();
        let pair = Address::from_low_u64_be(0xab);
        let e18 = U256::exp10(18);
        f.chain.set_reserves(pair, e18 * 100, e18 * 100);

        let pool = f.discovery.refresh_pool(pair).await.unwrap();
        assert_eq!(pool.current_ratio, 1.0);
        assert!(!pool.needs_rebalancing);
    }

    #[tokio::test]
    async fn failing_pair_count_fails_the_scan() {
        let f = fixture();
        f.chain.fail_reads(true);
        assert!(f.discovery.scan().await.is_err());
    }

    fn service(f: &Fixture) -> InitializationService {
        InitializationService::new(
            f.discovery.clone(),
            f.registry.clone(),
            f.clock.clone(),
            Arc::new(MemoryCooldownStore::default()),
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn cooldown_blocks_automatic_reruns() {
        let f = fixture();
        let svc = service(&f);

        assert!(matches!(svc.run(false).await.unwrap(), InitOutcome::Completed { .. }));

        f.clock.advance(60);
        match svc.run(false).await.unwrap() {
            InitOutcome::Skipped {
                skip: SkipReason::CooldownActive { remaining_seconds },
            } => assert_eq!(remaining_seconds, 540),
            other => panic!("expected cooldown skip, got {:?}", other),
        }

        assert!(matches!(svc.run(true).await.unwrap(), InitOutcome::Completed { .. }));

        f.clock.advance(601);
        assert!(matches!(svc.run(false).await.unwrap(), InitOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn overlapping_run_is_skipped() {
        let f = fixture();
        let svc = service(&f);
        svc.running.store(true, Ordering::SeqCst);

        assert_eq!(
            svc.run(true).await.unwrap(),
            InitOutcome::Skipped {
                skip: SkipReason::AlreadyRunning
            }
        );
        assert!(svc.status().running);
    }

    #[tokio::test]
    async fn failed_run_releases_the_guard_and_keeps_no_timestamp() {
        let f = fixture();
        let svc = service(&f);
        f.chain.fail_reads(true);

        assert!(svc.run(false).await.is_err());
        let status = svc.status();
        assert!(!status.running);
        assert!(status.last_run.is_none());

        f.chain.fail_reads(false);
        assert!(matches!(svc.run(false).await.unwrap(), InitOutcome::Completed { .. }));
        assert_eq!(svc.status().registered_pools, 2);
    }

    #[tokio::test]
    async fn scan_snapshots_autosaving_registry_once_complete() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("registry.json");
        let registry = Arc::new(PoolRegistry::open(&path, true).unwrap());
        let discovery = PoolDiscovery::new(
            f.chain.clone(),
            registry.clone(),
            f.clock.clone(),
            ThresholdPolicy::default(),
            Decimal::ONE,
            100,
        );

        discovery.scan().await.unwrap();
        let saved = PoolRegistry::open(&path, false).unwrap();
        assert_eq!(saved.len(), 2);
        let pair = Address::from_low_u64_be(0xab);
        assert_eq!(saved.get_pool(&pair).unwrap().current_ratio, 1.5);
        assert_eq!(saved.get_pool_metrics(&pair).unwrap().historical_data.len(), 1);
    }

    #[test]
    fn file_store_round_trips_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCooldownStore::new(dir.path().join("init.json"));
        assert!(store.last_run().is_none());
        let at = Utc::now();
        store.set_last_run(at).unwrap();
        assert_eq!(store.last_run(), Some(at));
    }
}
