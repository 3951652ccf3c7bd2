/*
    Sync scenarios - two stores reconciled through the in-process network

    A target store and a central store connected by the loopback
    connection factory, which counts every request per command.
*/

use auditsync_core::core_log::sync::{
    Command, StaticDiscovery, SyncEngine, SyncEngineConfig, SyncMode,
};
use auditsync_core::core_log::LogStore;
use auditsync_core::test_utils::{events, store_in, LoopbackConnectionFactory};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct Fleet {
    target: Arc<LogStore>,
    central: Arc<LogStore>,
    network: Arc<LoopbackConnectionFactory>,
    _dirs: (TempDir, TempDir),
}

fn fleet() -> Fleet {
    let (target_dir, central_dir) = (tempdir().unwrap(), tempdir().unwrap());
    let target = store_in(target_dir.path());
    let central = store_in(central_dir.path());
    let network = Arc::new(LoopbackConnectionFactory::new(central.clone()));
    Fleet { target, central, network, _dirs: (target_dir, central_dir) }
}

fn engine(fleet: &Fleet, watermark_mode: SyncMode) -> SyncEngine {
    let config = SyncEngineConfig { watermark_mode, ..SyncEngineConfig::new("central", "auditlog") };
    SyncEngine::new(
        config,
        fleet.target.clone(),
        Arc::new(StaticDiscovery::new("http://central.example/")),
        fleet.network.clone(),
    )
}

fn ids(store: &LogStore, target_id: &str, log_id: u64) -> Vec<u64> {
    store.get_all(target_id, log_id).unwrap().iter().map(|e| e.id).collect()
}

#[tokio::test]
async fn test_first_cycle_replicates_then_second_is_idle() {
    let fleet = fleet();
    fleet.target.put(&events("gateway-7", 1, &[1, 2, 3])).unwrap();
    let engine = engine(&fleet, SyncMode::None);

    let report = engine.run_cycle().await;
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.events.sent, 3);
    assert_eq!(report.events.received, 0);

    assert_eq!(ids(&fleet.central, "gateway-7", 1), vec![1, 2, 3]);
    assert_eq!(fleet.central.get_all("gateway-7", 1).unwrap(), fleet.target.get_all("gateway-7", 1).unwrap());
    let local = fleet.target.get_descriptor("gateway-7", 1).unwrap();
    let remote = fleet.central.get_descriptor("gateway-7", 1).unwrap();
    assert_eq!(local.range_set.to_string(), "1-3");
    assert_eq!(remote.range_set.to_string(), "1-3");

    fleet.network.reset_calls();
    let report = engine.run_cycle().await;
    assert!(report.is_success());
    assert_eq!(report.events.sent + report.events.received, 0);
    assert_eq!(fleet.network.transfer_calls(), 0);
    assert_eq!(
        fleet.network.total_calls(),
        fleet.network.calls(Command::Query) + fleet.network.calls(Command::ReceiveIds)
    );
}

#[tokio::test]
async fn test_both_directions_converge() {
    let fleet = fleet();
    fleet.target.put(&events("gateway-7", 1, &[1, 2, 3, 7])).unwrap();
    fleet.central.put(&events("gateway-7", 1, &[2, 4, 5])).unwrap();
    fleet.central.put(&events("gateway-9", 2, &[10, 11])).unwrap();

    let report = engine(&fleet, SyncMode::None).run_cycle().await;
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.events.sent, 3);
    assert_eq!(report.events.received, 4);

    assert_eq!(ids(&fleet.central, "gateway-7", 1), vec![1, 2, 3, 4, 5, 7]);
    assert_eq!(ids(&fleet.target, "gateway-7", 1), vec![1, 2, 3, 4, 5, 7]);
    assert_eq!(ids(&fleet.target, "gateway-9", 2), vec![10, 11]);
    assert_eq!(
        fleet.target.get_descriptors(None).unwrap(),
        fleet.central.get_descriptors(None).unwrap()
    );
}

#[tokio::test]
async fn test_offline_cycle_is_retried_next_time() {
    let fleet = fleet();
    fleet.target.put(&events("gateway-7", 1, &[1, 2])).unwrap();
    let engine = engine(&fleet, SyncMode::None);

    fleet.network.set_offline(true);
    let report = engine.run_cycle().await;
    assert!(!report.is_success());
    assert!(report.errors.iter().all(|e| e.is_retryable()));
    assert!(ids(&fleet.central, "gateway-7", 1).is_empty());

    fleet.network.set_offline(false);
    let report = engine.run_cycle().await;
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(ids(&fleet.central, "gateway-7", 1), vec![1, 2]);
}

#[tokio::test]
async fn test_watermark_travels_before_data() {
    let fleet = fleet();
    fleet.target.put(&events("gateway-7", 1, &[1, 2, 3, 4, 5])).unwrap();
    fleet.target.set_lowest_id("gateway-7", 1, 3).unwrap();

    let report = engine(&fleet, SyncMode::PushPull).run_cycle().await;
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.watermarks.sent, 1);

    assert_eq!(fleet.central.get_lowest_id("gateway-7", 1).unwrap(), 3);
    assert_eq!(ids(&fleet.central, "gateway-7", 1), vec![3, 4, 5]);
}

#[tokio::test]
async fn test_events_below_watermark_are_not_pulled_back() {
    let fleet = fleet();
    fleet.central.put(&events("gateway-7", 1, &[1, 2, 3, 4])).unwrap();
    fleet.target.put(&events("gateway-7", 1, &[1, 2, 3, 4])).unwrap();
    fleet.target.set_lowest_id("gateway-7", 1, 3).unwrap();

    let report = engine(&fleet, SyncMode::None).run_cycle().await;
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.events.received, 0);
    assert_eq!(ids(&fleet.target, "gateway-7", 1), vec![3, 4]);
}
