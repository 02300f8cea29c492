mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{Article, Category, RecordingStore, articles, categories, fast_config};
use entity_loader::application::pagination::{KeyCursor, QueryLimits};
use entity_loader::application::query::{
    ChaChaSource, QueryEngine, QueryRequest, StoreCategoryResolver,
};
use entity_loader::application::repos::SortDirection;
use entity_loader::domain::PrimaryKey;
use entity_loader::infra::memory::MemoryStore;
use entity_loader::{LoaderContext, LoaderContextBuilder};

struct Fixture {
    store: Arc<RecordingStore<Article>>,
    context: LoaderContext,
}

impl Fixture {
    fn new(count: i64) -> Self {
        let store = RecordingStore::new(articles(count));
        let category_store = Arc::new(MemoryStore::from_rows(categories()));
        let context = LoaderContextBuilder::with_config(fast_config(), QueryLimits::default())
            .register::<Article>(store.clone())
            .register::<Category>(category_store.clone())
            .categories(Arc::new(StoreCategoryResolver::<Category>::new(
                category_store,
                "name",
            )))
            .build();
        Self { store, context }
    }

    fn engine(&self) -> QueryEngine<Article> {
        self.context.engine::<Article>().unwrap()
    }
}

fn ids(items: &[Article]) -> Vec<i64> {
    items.iter().map(|a| a.id).collect()
}

#[tokio::test(start_paused = true)]
async fn page_size_is_capped() {
    let fixture = Fixture::new(450);
    let result = fixture
        .engine()
        .resolve(&QueryRequest::offset(1, 500))
        .await
        .unwrap();

    assert_eq!(result.items.len(), 200);
    assert_eq!(ids(&result.items), (1..=200).collect::<Vec<_>>());
    assert!(result.page_info.is_none());
}

#[tokio::test(start_paused = true)]
async fn missing_page_descriptor_uses_first_default_page() {
    let fixture = Fixture::new(50);
    let result = fixture
        .engine()
        .resolve(&QueryRequest::default())
        .await
        .unwrap();
    assert_eq!(ids(&result.items), (1..=20).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn second_offset_page_is_served_from_one_fetch_then_cache() {
    let fixture = Fixture::new(50);
    let engine = fixture.engine();
    let request = QueryRequest::offset(2, 10);

    let first = engine.resolve(&request).await.unwrap();
    assert_eq!(ids(&first.items), (11..=20).collect::<Vec<_>>());
    assert_eq!(fixture.store.call_count(), 1);

    let again = engine.resolve(&request).await.unwrap();
    assert_eq!(ids(&again.items), ids(&first.items));
    assert_eq!(fixture.store.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn page_zero_is_malformed() {
    let fixture = Fixture::new(5);
    let err = fixture
        .engine()
        .resolve(&QueryRequest::offset(0, 10))
        .await
        .unwrap_err();
    assert!(err.is_malformed());
}

#[tokio::test(start_paused = true)]
async fn order_by_sorts_with_key_tiebreak() {
    let fixture = Fixture::new(12);
    let request = QueryRequest::offset(1, 12).with_order_by("views", SortDirection::Desc);
    let result = fixture.engine().resolve(&request).await.unwrap();

    let mut expected = articles(12);
    expected.sort_by(|a, b| b.views.cmp(&a.views).then(a.id.cmp(&b.id)));
    assert_eq!(ids(&result.items), ids(&expected));
}

#[tokio::test(start_paused = true)]
async fn unknown_order_column_is_malformed() {
    let fixture = Fixture::new(5);
    let request = QueryRequest::offset(1, 5).with_order_by("password", SortDirection::Asc);
    let err = fixture.engine().resolve(&request).await.unwrap_err();
    assert!(err.is_malformed());
}

#[tokio::test(start_paused = true)]
async fn category_filters_every_listing_mode() {
    let fixture = Fixture::new(10);
    let engine = fixture.engine();

    let page = engine
        .resolve(&QueryRequest::offset(1, 20).with_category("sports"))
        .await
        .unwrap();
    assert_eq!(ids(&page.items), vec![2, 4, 6, 8, 10]);

    let cursor = engine
        .resolve(&QueryRequest::cursor(None, Some(3)).with_category("news"))
        .await
        .unwrap();
    assert_eq!(ids(&cursor.items), vec![1, 3, 5]);
    assert_eq!(cursor.total_count, Some(5));
}

#[tokio::test(start_paused = true)]
async fn unknown_category_yields_empty_result() {
    let fixture = Fixture::new(10);
    let engine = fixture.engine();

    let page = engine
        .resolve(&QueryRequest::offset(1, 20).with_category("weather"))
        .await
        .unwrap();
    assert!(page.items.is_empty());

    let cursor = engine
        .resolve(&QueryRequest::cursor(None, None).with_category("weather"))
        .await
        .unwrap();
    assert!(cursor.items.is_empty());
    assert_eq!(cursor.total_count, Some(0));
    assert!(!cursor.page_info.unwrap().has_next_page);
}

#[tokio::test(start_paused = true)]
async fn explicit_ids_bypass_category_filter() {
    let fixture = Fixture::new(10);
    let request = QueryRequest::by_ids([3, 4]).with_category("sports");
    let result = fixture.engine().resolve(&request).await.unwrap();
    assert_eq!(ids(&result.items), vec![3, 4]);
}

#[tokio::test(start_paused = true)]
async fn ids_and_random_together_are_malformed() {
    let fixture = Fixture::new(10);
    let request = QueryRequest {
        random: Some(3),
        ..QueryRequest::by_ids([1])
    };
    assert!(fixture.engine().resolve(&request).await.unwrap_err().is_malformed());
}

#[tokio::test(start_paused = true)]
async fn cursor_pages_walk_forward() {
    let fixture = Fixture::new(30);
    let engine = fixture.engine();

    let first = engine
        .resolve(&QueryRequest::cursor(None, Some(50)))
        .await
        .unwrap();
    assert_eq!(ids(&first.items), (1..=20).collect::<Vec<_>>());
    assert_eq!(first.total_count, Some(30));
    let info = first.page_info.unwrap();
    assert!(info.has_next_page);
    let end = info.end_cursor.unwrap();
    assert_eq!(
        KeyCursor::decode(&end).unwrap().into_key(),
        PrimaryKey::Int(20)
    );

    let second = engine
        .resolve(&QueryRequest::cursor(Some(end), Some(20)))
        .await
        .unwrap();
    assert_eq!(ids(&second.items), (21..=30).collect::<Vec<_>>());
    // Compared against the unfiltered total, so a short last page still reports more.
    assert!(second.page_info.unwrap().has_next_page);
}

#[tokio::test(start_paused = true)]
async fn stale_or_garbled_cursor_restarts_from_the_beginning() {
    let fixture = Fixture::new(15);
    let engine = fixture.engine();

    let stale = KeyCursor::new(PrimaryKey::Int(9_999)).encode();
    let result = engine
        .resolve(&QueryRequest::cursor(Some(stale), Some(5)))
        .await
        .unwrap();
    assert_eq!(ids(&result.items), vec![1, 2, 3, 4, 5]);

    let result = engine
        .resolve(&QueryRequest::cursor(Some("%%not-a-cursor%%".to_string()), Some(5)))
        .await
        .unwrap();
    assert_eq!(ids(&result.items), vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn random_sample_is_a_shuffled_window() {
    let fixture = Fixture::new(100);
    let engine = fixture
        .engine()
        .with_random_source(Arc::new(ChaChaSource::from_seed_u64(7)));

    for _ in 0..5 {
        let result = engine.resolve(&QueryRequest::random(10)).await.unwrap();
        let sample: BTreeSet<i64> = ids(&result.items).into_iter().collect();
        assert_eq!(sample.len(), 10);

        let low = *sample.first().unwrap();
        let high = *sample.last().unwrap();
        // One contiguous window of keys starting at skip + 1, with skip in 0..=90.
        assert!((1..=91).contains(&low));
        assert_eq!(high - low, 9);
    }
}

#[tokio::test(start_paused = true)]
async fn random_larger_than_population_returns_everything() {
    let fixture = Fixture::new(4);
    let result = fixture
        .engine()
        .resolve(&QueryRequest::random(10))
        .await
        .unwrap();
    let sample: BTreeSet<i64> = ids(&result.items).into_iter().collect();
    assert_eq!(sample, BTreeSet::from([1, 2, 3, 4]));
}

#[tokio::test(start_paused = true)]
async fn relation_fields_fetch_rows_and_prime_the_loader() {
    let fixture = Fixture::new(10);
    let engine = fixture.engine();
    let request = QueryRequest::offset(1, 4).with_fields(["title", "category.name"]);

    let result = engine.resolve(&request).await.unwrap();
    assert_eq!(ids(&result.items), vec![1, 2, 3, 4]);
    assert_eq!(fixture.store.call_count(), 0);
    assert_eq!(fixture.context.cache().segment_len("Article"), 4);

    let loaded = engine.loader().load_many([1, 2, 3, 4]).await.unwrap();
    assert_eq!(loaded.len(), 4);
    assert_eq!(fixture.store.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn request_descriptor_deserializes_from_json() {
    let fixture = Fixture::new(10);
    let request = QueryRequest::from_json(
        r#"{"category": "news", "page": {"page": 1, "size": 2}, "order_by": {"column": "id", "direction": "desc"}}"#,
    )
    .unwrap();

    let result = fixture.engine().resolve(&request).await.unwrap();
    assert_eq!(ids(&result.items), vec![9, 7]);
}

#[tokio::test(start_paused = true)]
async fn mixed_offset_and_cursor_descriptor_is_rejected() {
    let fixture = Fixture::new(10);
    let err = QueryRequest::from_json(r#"{"page": {"page": 2, "size": 5, "after": "MjA", "first": 3}}"#)
        .unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(fixture.store.call_count(), 0);
}
