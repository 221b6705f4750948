//! # Pool Registry
//!
//! Insertion-ordered store of discovered pools and their metrics series,
//! keyed by pair address. Pools are created on first discovery, updated on
//! every status poll and never deleted. Metrics accumulate until explicitly
//! reset.
//!
//! The lock only guards memory; concurrent updates to the same pool keep
//! last-write-wins semantics. When a path is configured the whole registry is
//! snapshotted to a JSON file.

use ethers::types::Address;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::metrics;
use crate::settings::Registry as RegistrySettings;
use crate::types::{HistoricalPoint, Pool, PoolMetrics, PoolUpdate, RebalanceEvent, TokenRef};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("pool {0:?} is not registered")]
    UnknownPool(Address),
    #[error("registry file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("registry file {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Default)]
struct Inner {
    pools: IndexMap<Address, Pool>,
    metrics: HashMap<Address, PoolMetrics>,
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    pools: Vec<Pool>,
    metrics: Vec<PoolMetrics>,
}

pub struct PoolRegistry {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
    autosave: bool,
    /// Open [`SaveBatch`] guards; autosave is deferred while non-zero.
    batches: AtomicUsize,
    /// A mutation happened inside a batch and has not been written yet.
    dirty: AtomicBool,
}

/// Defers autosave until the last open batch is dropped, which then writes
/// the snapshot once if anything changed.
pub struct SaveBatch<'a> {
    registry: &'a PoolRegistry,
}

impl Drop for SaveBatch<'_> {
    fn drop(&mut self) {
        if self.registry.batches.fetch_sub(1, Ordering::SeqCst) == 1
            && self.registry.dirty.swap(false, Ordering::SeqCst)
        {
            self.registry.autosave();
        }
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistry {
    /// Memory-only registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            path: None,
            autosave: false,
            batches: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Opens the registry at `path`, loading the snapshot if the file exists.
    pub fn open(path: impl AsRef<Path>, autosave: bool) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let mut inner = Inner::default();

        if path.exists() {
            let display = path.display().to_string();
            let raw = fs::read_to_string(&path).map_err(|source| RegistryError::Io {
                path: display.clone(),
                source,
            })?;
            let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|source| RegistryError::Json {
                path: display.clone(),
                source,
            })?;
            for pool in snapshot.pools {
                inner.pools.insert(pool.address, pool);
            }
            for m in snapshot.metrics {
                inner.metrics.insert(m.address, m);
            }
            info!("Loaded {} pools from {}", inner.pools.len(), display);
        }

        Ok(Self {
            inner: RwLock::new(inner),
            path: Some(path),
            autosave,
            batches: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn from_settings(cfg: &RegistrySettings) -> Result<Self, RegistryError> {
        match &cfg.path {
            Some(path) => Self::open(path, cfg.autosave),
            None => Ok(Self::new()),
        }
    }

    pub fn get_pool(&self, address: &Address) -> Option<Pool> {
        self.read().pools.get(address).cloned()
    }

    /// All pools in the order they were first registered.
    pub fn get_all_pools(&self) -> Vec<Pool> {
        self.read().pools.values().cloned().collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.read().pools.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.read().pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a newly discovered pool. An already registered pool is left
    /// untouched and `false` is returned.
    pub fn insert_pool(&self, pool: Pool) -> bool {
        let inserted = {
            let mut inner = self.write();
            if inner.pools.contains_key(&pool.address) {
                false
            } else {
                let address = pool.address;
                inner.metrics.insert(address, PoolMetrics::new(address));
                inner.pools.insert(address, pool);
                metrics::set_registered_pools(inner.pools.len());
                true
            }
        };
        if inserted {
            self.autosave();
        }
        inserted
    }

    /// Merges the `Some` fields of `update` into the pool.
    pub fn update_pool(&self, address: &Address, update: PoolUpdate) -> Result<Pool, RegistryError> {
        let pool = {
            let mut inner = self.write();
            let pool = inner
                .pools
                .get_mut(address)
                .ok_or(RegistryError::UnknownPool(*address))?;
            update.apply(pool);
            pool.clone()
        };
        self.autosave();
        Ok(pool)
    }

    pub fn add_historical_data(&self, address: &Address, point: HistoricalPoint) -> Result<(), RegistryError> {
        {
            let mut inner = self.write();
            if !inner.pools.contains_key(address) {
                return Err(RegistryError::UnknownPool(*address));
            }
            let m = inner
                .metrics
                .entry(*address)
                .or_insert_with(|| PoolMetrics::new(*address));
            m.historical_data.push(point);
            m.recompute_performance();
        }
        self.autosave();
        Ok(())
    }

    /// Appends a rebalance event and bumps the pool's counters.
    pub fn record_rebalance(&self, address: &Address, event: RebalanceEvent) -> Result<Pool, RegistryError> {
        let pool = {
            let mut inner = self.write();
            let timestamp = event.timestamp;
            let pool = inner
                .pools
                .get_mut(address)
                .ok_or(RegistryError::UnknownPool(*address))?;
            pool.rebalance_count += 1;
            pool.last_rebalance = Some(timestamp);
            let pool = pool.clone();

            let m = inner
                .metrics
                .entry(*address)
                .or_insert_with(|| PoolMetrics::new(*address));
            m.rebalance_history.push(event);
            m.recompute_performance();
            pool
        };
        self.autosave();
        Ok(pool)
    }

    pub fn get_pool_metrics(&self, address: &Address) -> Option<PoolMetrics> {
        let inner = self.read();
        if !inner.pools.contains_key(address) {
            return None;
        }
        Some(
            inner
                .metrics
                .get(address)
                .cloned()
                .unwrap_or_else(|| PoolMetrics::new(*address)),
        )
    }

    /// Clears the historical and rebalance series and zeroes the aggregate.
    /// The pool record itself is kept.
    pub fn reset_metrics(&self, address: &Address) -> Result<(), RegistryError> {
        {
            let mut inner = self.write();
            if !inner.pools.contains_key(address) {
                return Err(RegistryError::UnknownPool(*address));
            }
            inner
                .metrics
                .entry(*address)
                .or_insert_with(|| PoolMetrics::new(*address))
                .reset();
        }
        info!("Metrics reset for pool {:?}", address);
        self.autosave();
        Ok(())
    }

    /// First registered pool holding both tokens, in either order.
    pub fn find_pool_for_tokens(&self, token_x: Address, token_y: Address) -> Option<Pool> {
        self.read()
            .pools
            .values()
            .find(|p| p.holds(token_x) && p.holds(token_y) && token_x != token_y)
            .cloned()
    }

    /// Every distinct token seen across registered pools.
    pub fn known_tokens(&self) -> Vec<TokenRef> {
        let inner = self.read();
        let mut seen: IndexMap<Address, TokenRef> = IndexMap::new();
        for pool in inner.pools.values() {
            for token in [&pool.token_a, &pool.token_b] {
                seen.entry(token.address).or_insert_with(|| token.clone());
            }
        }
        seen.into_values().collect()
    }

    /// Writes the snapshot to the configured path. No-op for memory-only
    /// registries.
    pub fn save(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = {
            let inner = self.read();
            Snapshot {
                pools: inner.pools.values().cloned().collect(),
                metrics: inner.pools.keys().filter_map(|a| inner.metrics.get(a).cloned()).collect(),
            }
        };
        let display = path.display().to_string();
        let json = serde_json::to_string_pretty(&snapshot).map_err(|source| RegistryError::Json {
            path: display.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        create_parent_dir(path)
            .and_then(|_| fs::write(&tmp, json))
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|source| RegistryError::Io { path: display, source })?;
        debug!("Registry snapshot written ({} pools)", snapshot.pools.len());
        Ok(())
    }

    /// Groups mutations so autosave writes once when the guard drops.
    /// Batches nest.
    pub fn batch(&self) -> SaveBatch<'_> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        SaveBatch { registry: self }
    }

    fn autosave(&self) {
        if !self.autosave {
            return;
        }
        if self.batches.load(Ordering::SeqCst) > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            return;
        }
        if let Err(e) = self.save() {
            warn!("Registry autosave failed: {}", e);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Creates the directory holding `path` if it does not exist yet.
pub(crate) fn create_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SwapDirection;
    use chrono::Utc;

    fn token(n: u64, symbol: &str) -> TokenRef {
        TokenRef {
            address: Address::from_low_u64_be(n),
            symbol: symbol.to_string(),
            decimals: 18,
        }
    }

    fn pool(n: u64) -> Pool {
        Pool::new(
            Address::from_low_u64_be(0x1000 + n),
            token(1, "WRBTC"),
            token(n + 1, "RIF"),
            1.0,
            Utc::now(),
        )
    }

    fn rebalance_event() -> RebalanceEvent {
        RebalanceEvent {
            timestamp: Utc::now(),
            direction: SwapDirection::AToB,
            amount_in: "37.5".to_string(),
            ratio_before: 1.5,
            target_ratio: 1.0,
            price_impact_pct: 2.0,
            tx_hash: None,
            mock: true,
        }
    }

    #[test]
    fn keeps_insertion_order() {
        let registry = PoolRegistry::new();
        for n in [5, 1, 3] {
            assert!(registry.insert_pool(pool(n)));
        }
        let order: Vec<Address> = registry.get_all_pools().iter().map(|p| p.address).collect();
        assert_eq!(
            order,
            vec![pool(5).address, pool(1).address, pool(3).address]
        );
    }

    #[test]
    fn insert_does_not_overwrite_existing_pool() {
        let registry = PoolRegistry::new();
        let mut first = pool(1);
        first.tvl = 42.0;
        registry.insert_pool(first);
        assert!(!registry.insert_pool(pool(1)));
        assert_eq!(registry.get_pool(&pool(1).address).unwrap().tvl, 42.0);
    }

    #[test]
    fn update_merges_only_given_fields() {
        let registry = PoolRegistry::new();
        let p = pool(1);
        registry.insert_pool(p.clone());

        let updated = registry
            .update_pool(
                &p.address,
                PoolUpdate {
                    current_ratio: Some(1.5),
                    needs_rebalancing: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.current_ratio, 1.5);
        assert!(updated.needs_rebalancing);
        assert_eq!(updated.reserve_a, p.reserve_a);
        assert_eq!(updated.target_ratio, p.target_ratio);
        assert_eq!(updated.created_at, p.created_at);
    }

    #[test]
    fn unknown_pool_is_an_error() {
        let registry = PoolRegistry::new();
        let addr = Address::from_low_u64_be(9);
        assert!(matches!(
            registry.update_pool(&addr, PoolUpdate::default()),
            Err(RegistryError::UnknownPool(_))
        ));
        assert!(registry.get_pool_metrics(&addr).is_none());
        assert!(registry.reset_metrics(&addr).is_err());
    }

    #[test]
    fn history_appends_and_reset_clears() {
        let registry = PoolRegistry::new();
        let p = pool(1);
        registry.insert_pool(p.clone());

        for volume in [10.0, 20.0] {
            registry
                .add_historical_data(
                    &p.address,
                    HistoricalPoint {
                        timestamp: Utc::now(),
                        ratio: 1.0,
                        tvl: 200.0,
                        volume,
                        fees: volume * 0.003,
                    },
                )
                .unwrap();
        }
        let updated = registry.record_rebalance(&p.address, rebalance_event()).unwrap();
        assert_eq!(updated.rebalance_count, 1);
        assert!(updated.last_rebalance.is_some());

        let m = registry.get_pool_metrics(&p.address).unwrap();
        assert_eq!(m.historical_data.len(), 2);
        assert_eq!(m.rebalance_history.len(), 1);
        assert_eq!(m.performance.total_volume, 30.0);
        assert_eq!(m.performance.total_rebalances, 1);

        registry.reset_metrics(&p.address).unwrap();
        let m = registry.get_pool_metrics(&p.address).unwrap();
        assert!(m.historical_data.is_empty());
        assert!(m.rebalance_history.is_empty());
        assert_eq!(m.performance, Default::default());
        assert!(registry.get_pool(&p.address).is_some());
    }

    #[test]
    fn finds_pool_by_token_pair_and_lists_tokens() {
        let registry = PoolRegistry::new();
        registry.insert_pool(pool(1));
        registry.insert_pool(pool(2));

        let found = registry
            .find_pool_for_tokens(Address::from_low_u64_be(3), Address::from_low_u64_be(1))
            .unwrap();
        assert_eq!(found.address, pool(2).address);

        let symbols: Vec<String> = registry.known_tokens().into_iter().map(|t| t.symbol).collect();
        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[0], "WRBTC");
    }
}
