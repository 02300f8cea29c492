mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{Article, FailingBus, RecordingStore, articles, fast_config, wait_until};
use entity_loader::application::pagination::QueryLimits;
use entity_loader::cache::{InvalidationAction, InvalidationMessage, MemoryBus};
use entity_loader::domain::PrimaryKey;
use entity_loader::infra::telemetry;
use entity_loader::LoaderContextBuilder;
use metrics_util::debugging::DebuggingRecorder;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn loader_and_invalidation_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let store = RecordingStore::new(articles(3));
    let bus = Arc::new(MemoryBus::new());
    let context = LoaderContextBuilder::with_config(fast_config(), QueryLimits::default())
        .bus(bus)
        .register::<Article>(store)
        .build();
    context.spawn_listener().await.unwrap();
    let loader = context.loader::<Article>().unwrap();

    // miss, batch, fetch, then hit
    loader.load(1).await.unwrap();
    loader.load(1).await.unwrap();

    // publish, then a foreign message received through the listener
    context
        .coordinator()
        .publish_and_clear("Article", Some(&PrimaryKey::Int(1)));
    let foreign = InvalidationMessage::new(InvalidationAction::Delete, "Article", None)
        .encode()
        .unwrap();
    context.coordinator().on_remote_message(&foreign);

    // a node whose bus is down counts the failed publish
    let offline = LoaderContextBuilder::with_config(fast_config(), QueryLimits::default())
        .bus(Arc::new(FailingBus))
        .build();
    offline
        .coordinator()
        .publish_and_clear("Article", Some(&PrimaryKey::Int(2)));

    let names = || -> HashSet<String> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
            .collect()
    };
    wait_until(|| {
        let names = names();
        names.contains("entity_loader_invalidation_published_total")
            && names.contains("entity_loader_invalidation_publish_failed_total")
    })
    .await;

    let names = names();
    let expected = [
        "entity_loader_cache_hit_total",
        "entity_loader_cache_miss_total",
        "entity_loader_batch_size",
        "entity_loader_fetch_ms",
        "entity_loader_invalidation_published_total",
        "entity_loader_invalidation_publish_failed_total",
        "entity_loader_invalidation_received_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
