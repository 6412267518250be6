//! Controller passes against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iset_controller::{ControllerWorker, MemoryStore, WorkQueue, WorkerConfig};
use iset_events::EventReason;
use iset_instanceset::model::InstanceSet;
use iset_instanceset::{EngineOptions, NoLifecycleActions};
use iset_testing::instance::mark_ready;
use iset_testing::InstanceSetBuilder;
use rstest::rstest;
use tokio::sync::watch;

fn worker(store: Arc<MemoryStore>) -> ControllerWorker {
    ControllerWorker::new(
        store,
        Arc::new(NoLifecycleActions),
        WorkQueue::new(3, Duration::from_secs(600)),
        WorkerConfig {
            workers: 2,
            resync_interval: Duration::from_secs(3600),
            options: EngineOptions::default(),
        },
    )
}

async fn mark_all_ready(store: &MemoryStore, key: &str) {
    let since = Utc::now() - chrono::Duration::seconds(60);
    for instance in store.instances(key).await {
        store
            .update_instance(key, instance.name(), |i| mark_ready(i, since))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_reconcile_key_creates_and_reports() {
    let store = Arc::new(MemoryStore::new());
    let key = store
        .apply(InstanceSetBuilder::new("pg").replicas(2).parallel(None).build())
        .await;
    let worker = worker(Arc::clone(&store));

    worker.reconcile_key(&key).await.unwrap();
    let names: Vec<String> = store
        .instances(&key)
        .await
        .iter()
        .map(|i| i.name().to_string())
        .collect();
    assert_eq!(names, vec!["pg-0", "pg-1"]);

    mark_all_ready(&store, &key).await;
    worker.reconcile_key(&key).await.unwrap();

    let status = store.get(&key).await.unwrap().status;
    assert_eq!(status.replicas, 2);
    assert_eq!(status.ready_replicas, 2);
    assert_eq!(status.observed_generation, 1);
}

#[tokio::test]
async fn test_missing_key_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let requeue = worker(store).reconcile_key("default/gone").await.unwrap();
    assert_eq!(requeue, None);
}

#[tokio::test]
async fn test_deleting_set_gets_no_instances() {
    let store = Arc::new(MemoryStore::new());
    let key = store
        .apply(InstanceSetBuilder::new("pg").replicas(2).parallel(None).build())
        .await;
    store.mark_deleting(&key).await.unwrap();

    worker(Arc::clone(&store)).reconcile_key(&key).await.unwrap();
    assert!(store.instances(&key).await.is_empty());
}

#[rstest]
#[case::replicas_overflow(InstanceSetBuilder::new("pg").replicas(1).template("t1", 2).build())]
#[case::duplicate_template(
    InstanceSetBuilder::new("pg").replicas(2).template("t1", 1).template("t1", 1).build()
)]
#[tokio::test]
async fn test_invalid_spec_is_not_retried(#[case] set: InstanceSet) {
    let store = Arc::new(MemoryStore::new());
    let key = store.apply(set).await;

    let err = worker(Arc::clone(&store)).reconcile_key(&key).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(!err.is_conflict());
    assert!(store.instances(&key).await.is_empty());

    let reasons: Vec<EventReason> = store.events().await.iter().map(|e| e.event.reason).collect();
    assert_eq!(reasons, vec![EventReason::InvalidSpec]);
}

#[tokio::test]
async fn test_blocked_update_does_not_grow_event_log() {
    let store = Arc::new(MemoryStore::new());
    let key = store
        .apply(InstanceSetBuilder::new("pg").replicas(2).parallel(None).strict_in_place().build())
        .await;
    let worker = worker(Arc::clone(&store));
    worker.reconcile_key(&key).await.unwrap();
    mark_all_ready(&store, &key).await;
    worker.reconcile_key(&key).await.unwrap();

    store
        .apply(
            InstanceSetBuilder::new("pg")
                .replicas(2)
                .parallel(None)
                .strict_in_place()
                .dns_policy("Default")
                .build(),
        )
        .await;
    worker.reconcile_key(&key).await.unwrap();
    let logged = store.events().await.len();

    for _ in 0..500 {
        worker.reconcile_key(&key).await.unwrap();
    }

    let events = store.events().await;
    assert_eq!(events.len(), logged);
    let restricted = events
        .iter()
        .find(|e| e.event.reason == EventReason::UpdateRestricted)
        .unwrap();
    assert_eq!(restricted.count, 501);
}

#[tokio::test]
async fn test_run_converges_and_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let worker = worker(Arc::clone(&store));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let key = store
        .apply(InstanceSetBuilder::new("pg").replicas(3).parallel(None).build())
        .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = store.get(&key).await.unwrap().status;
            if store.instances(&key).await.len() == 3 && status.replicas == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("instances were not created");

    // Readiness reports trigger passes of their own.
    mark_all_ready(&store, &key).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.get(&key).await.unwrap().status.ready_replicas != 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status never caught up with readiness");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}
