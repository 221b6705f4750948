//! Integration tests for registry persistence
//!
//! Tests cover:
//! - Snapshot round-trip of pools and metrics through a JSON file
//! - Autosave after mutations
//! - Corrupt snapshot files
//! - Settings-driven registry and cooldown file locations

use chrono::Utc;
use ethers::types::Address;
use rsk_rebalancer::{
    discovery::{CooldownStore, FileCooldownStore},
    registry::{PoolRegistry, RegistryError},
    settings,
    types::{HistoricalPoint, Pool, PoolUpdate, TokenRef},
};

fn pool(n: u64) -> Pool {
    Pool::new(
        Address::from_low_u64_be(0x100 + n),
        TokenRef {
            address: Address::from_low_u64_be(1),
            symbol: "WRBTC".to_string(),
            decimals: 18,
        },
        TokenRef {
            address: Address::from_low_u64_be(1 + n),
            symbol: format!("TKN{}", n),
            decimals: 18,
        },
        1.0,
        Utc::now(),
    )
}

fn point(ratio: f64) -> HistoricalPoint {
    HistoricalPoint {
        timestamp: Utc::now(),
        ratio,
        tvl: 100.0,
        volume: 5.0,
        fees: 0.015,
    }
}

/// Saved pools and metrics come back in the same order
#[test]
fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.json");

    let registry = PoolRegistry::open(&path, false).expect("open");
    for n in [3, 1, 2] {
        registry.insert_pool(pool(n));
    }
    registry
        .update_pool(
            &pool(1).address,
            PoolUpdate {
                current_ratio: Some(1.25),
                needs_rebalancing: Some(true),
                ..Default::default()
            },
        )
        .expect("update");
    registry.add_historical_data(&pool(1).address, point(1.0)).expect("history");
    registry.add_historical_data(&pool(1).address, point(1.25)).expect("history");
    assert!(!path.exists(), "nothing written without save or autosave");
    registry.save().expect("save");

    let reloaded = PoolRegistry::open(&path, false).expect("reopen");
    let order: Vec<Address> = reloaded.get_all_pools().iter().map(|p| p.address).collect();
    assert_eq!(order, vec![pool(3).address, pool(1).address, pool(2).address]);

    let p1 = reloaded.get_pool(&pool(1).address).expect("pool 1");
    assert_eq!(p1.current_ratio, 1.25);
    assert!(p1.needs_rebalancing);

    let metrics = reloaded.get_pool_metrics(&pool(1).address).expect("metrics");
    assert_eq!(metrics.historical_data.len(), 2);
    assert_eq!(metrics.performance.total_volume, 10.0);
    assert!(metrics.performance.impermanent_loss < 0.0);
}

/// Autosave writes after each mutation
#[test]
fn test_autosave() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.json");

    let registry = PoolRegistry::open(&path, true).expect("open");
    registry.insert_pool(pool(1));
    assert!(path.exists());

    registry.reset_metrics(&pool(1).address).expect("reset");
    let reloaded = PoolRegistry::open(&path, false).expect("reopen");
    assert_eq!(reloaded.len(), 1);
}

/// A corrupt file is an error, not an empty registry
#[test]
fn test_corrupt_snapshot_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.json");
    std::fs::write(&path, "{ not json").expect("write");

    assert!(matches!(
        PoolRegistry::open(&path, false),
        Err(RegistryError::Json { .. })
    ));
}

/// Registry and cooldown locations come from settings
#[test]
fn test_locations_from_settings() {
    let dir = tempfile::tempdir().expect("tempdir");

    let memory_only = PoolRegistry::from_settings(&settings::Registry::default()).expect("memory");
    memory_only.insert_pool(pool(1));
    memory_only.save().expect("save is a no-op");

    let cfg = settings::Registry {
        path: Some(dir.path().join("pools.json").display().to_string()),
        autosave: true,
    };
    let registry = PoolRegistry::from_settings(&cfg).expect("file-backed");
    registry.insert_pool(pool(2));
    assert!(dir.path().join("pools.json").exists());

    let store = FileCooldownStore::new(dir.path().join("init.json"));
    let at = Utc::now();
    store.set_last_run(at).expect("persist");
    let reopened = FileCooldownStore::new(dir.path().join("init.json"));
    assert_eq!(reopened.last_run(), Some(at));
}

/// Snapshot and cooldown files land in directories that do not exist yet
#[test]
fn test_missing_data_directory_is_created() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("data").join("registry.json");

    let registry = PoolRegistry::open(&path, true).expect("open");
    registry.insert_pool(pool(1));
    registry.save().expect("save");
    assert!(path.exists());
    assert_eq!(PoolRegistry::open(&path, false).expect("reopen").len(), 1);

    let state = dir.path().join("state").join("nested").join("init.json");
    let store = FileCooldownStore::new(&state);
    let at = Utc::now();
    store.set_last_run(at).expect("persist");
    assert_eq!(FileCooldownStore::new(&state).last_run(), Some(at));
}

/// Autosave inside a batch is deferred to a single write when the last guard drops
#[test]
fn test_batched_autosave_writes_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.json");
    let registry = PoolRegistry::open(&path, true).expect("open");

    {
        let _outer = registry.batch();
        registry.insert_pool(pool(1));
        {
            let _inner = registry.batch();
            registry.insert_pool(pool(2));
        }
        registry.add_historical_data(&pool(1).address, point(1.0)).expect("history");
        assert!(!path.exists(), "no write while a batch is open");
    }
    assert!(path.exists());
    let reloaded = PoolRegistry::open(&path, false).expect("reopen");
    assert_eq!(reloaded.len(), 2);
    assert_eq!(
        reloaded
            .get_pool_metrics(&pool(1).address)
            .expect("metrics")
            .historical_data
            .len(),
        1
    );

    // an untouched batch writes nothing
    std::fs::remove_file(&path).expect("remove");
    drop(registry.batch());
    assert!(!path.exists());
}
