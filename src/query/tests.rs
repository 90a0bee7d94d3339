//! Query Engine Tests
//!
//! ## Test Scopes
//! - **HeapMerge**: ordering, tie-breaking, laziness, error surfacing.
//! - **Planning**: primary pinning, secondary routing, full scans, disjunctions.
//! - **Execution**: cross-shard ordering, offset/limit, rehydration, dedupe, scan guard.
//! - **End-to-end**: placement by the primary key, lookups by the secondary key.

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::document::driver::{Collection, DocumentStore, DriverError};
    use crate::document::memory::MemoryConnector;
    use crate::document::types::{Document, Filter, Sort, UpdateDoc};
    use crate::error::OdmError;
    use crate::model::{Instance, Model, ModelRegistry};
    use crate::node::{ControlPlane, NodeConfig};
    use crate::query::merge::SourceItem;
    use crate::query::planner;
    use crate::query::{HeapMerge, QueryRequest, QuerySource};
    use crate::schema::{AttrType, Attribute, Index, ModelSchema};
    use futures::StreamExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    /// One pre-filled, closed source per input list.
    fn sources(lists: Vec<Vec<Value>>) -> Vec<mpsc::Receiver<SourceItem>> {
        lists
            .into_iter()
            .map(|items| {
                let (tx, rx) = mpsc::channel(items.len().max(1));
                for item in items {
                    tx.try_send(Ok(doc(item))).unwrap();
                }
                rx
            })
            .collect()
    }

    async fn drain(merge: &mut HeapMerge) -> Vec<(usize, Document)> {
        let mut out = Vec::new();
        while let Some(item) = merge.next().await.unwrap() {
            out.push(item);
        }
        out
    }

    // ============================================================
    // HEAP MERGE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_merge_yields_global_order() {
        let mut merge = HeapMerge::new(
            sources(vec![
                vec![json!({"k": 1}), json!({"k": 4}), json!({"k": 7})],
                vec![json!({"k": 2}), json!({"k": 5})],
                vec![json!({"k": 3}), json!({"k": 6}), json!({"k": 8}), json!({"k": 9})],
            ]),
            Some(Sort::asc("k")),
        );

        let keys: Vec<i64> = drain(&mut merge)
            .await
            .into_iter()
            .map(|(_, doc)| doc["k"].as_i64().unwrap())
            .collect();

        assert_eq!(keys, (1..=9).collect::<Vec<i64>>());
        assert_eq!(merge.source_count(), 3);
    }

    #[tokio::test]
    async fn test_merge_breaks_ties_by_source_then_sequence() {
        let mut merge = HeapMerge::new(
            sources(vec![
                vec![json!({"k": 1, "tag": "b0"}), json!({"k": 1, "tag": "b1"})],
                vec![json!({"k": 1, "tag": "a0"})],
            ]),
            Some(Sort::desc("k")),
        );

        let order: Vec<(usize, String)> = drain(&mut merge)
            .await
            .into_iter()
            .map(|(source, doc)| (source, doc["tag"].as_str().unwrap().to_string()))
            .collect();

        assert_eq!(
            order,
            vec![(0, "b0".to_string()), (0, "b1".to_string()), (1, "a0".to_string())]
        );
    }

    #[tokio::test]
    async fn test_merge_reads_sources_only_on_demand() {
        // ARRANGE
        let (tx, rx) = mpsc::channel(1);
        let sent = Arc::new(AtomicUsize::new(0));
        let counter = sent.clone();
        let producer = tokio::spawn(async move {
            for k in 0..1_000 {
                if tx.send(Ok(doc(json!({ "k": k })))).await.is_err() {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut merge = HeapMerge::new(vec![rx], Some(Sort::asc("k")));

        // ACT
        for _ in 0..3 {
            merge.next().await.unwrap().unwrap();
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // ASSERT
        assert!(sent.load(Ordering::SeqCst) <= 6, "producer ran ahead: {}", sent.load(Ordering::SeqCst));
        drop(merge);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_surfaces_source_errors() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(Err(DriverError::Transient("boom".to_string())))
            .await
            .unwrap();
        let mut merge = HeapMerge::new(vec![rx], None);

        assert!(merge.next().await.is_err());
    }

    // ============================================================
    // FIXTURES
    // ============================================================

    struct Fixture {
        connector: Arc<MemoryConnector>,
        items: Arc<Model>,
    }

    fn item_schema() -> ModelSchema {
        ModelSchema::builder("items")
            .db("store")
            .attr(Attribute::new("k", AttrType::Int))
            .attr(Attribute::new("score", AttrType::Int))
            .attr(Attribute::new("b", AttrType::Str))
            .attr(Attribute::new("note", AttrType::Str))
            .index(Index::new(["k"]).unique())
            .index(Index::new(["b"]).projection(["score"]))
            .shard_key("k")
            .secondary_shard_key("b")
            .build()
            .unwrap()
    }

    /// `items` over q1 (k <= 10), q2 (k <= 20), q3 (k <= 30); secondary shard on `b` at s1.
    async fn fixture_with(settings: Settings) -> Fixture {
        let connector = MemoryConnector::new();
        let control = ControlPlane::new(
            connector.clone(),
            NodeConfig::new("control", "meta", Value::Null),
        )
        .unwrap();
        control
            .set_topology(
                "store",
                "items",
                None,
                vec![
                    NodeConfig::new("q1", "store", 10),
                    NodeConfig::new("q2", "store", 20),
                    NodeConfig::new("q3", "store", 30),
                ],
            )
            .await
            .unwrap();
        control
            .set_topology(
                "store",
                "items",
                Some("b"),
                vec![NodeConfig::new("s1", "store__b", Value::Null)],
            )
            .await
            .unwrap();
        let registry = ModelRegistry::new(control, settings);
        let items = registry.register(item_schema()).await.unwrap();
        Fixture { connector, items }
    }

    /// k = 1..=30, score = k * 7 mod 13, b alternating "x"/"y".
    async fn seeded(settings: Settings) -> Fixture {
        let fx = fixture_with(settings).await;
        for k in 1..=30i64 {
            let mut item = fx.items.new_instance();
            item.set("k", k).unwrap();
            item.set("score", (k * 7) % 13).unwrap();
            item.set("b", if k % 2 == 0 { "x" } else { "y" }).unwrap();
            item.set("note", format!("item-{}", k)).unwrap();
            assert!(item.commit().await.unwrap());
        }
        fx
    }

    fn keys(instances: &[Instance]) -> Vec<i64> {
        instances
            .iter()
            .map(|item| item.get::<i64>("k").unwrap().unwrap())
            .collect()
    }

    fn primary(fx: &Fixture, host: &str) -> Arc<dyn Collection> {
        fx.connector.store(host).unwrap().collection("store", "items")
    }

    async fn count_in(connector: &MemoryConnector, host: &str, db: &str) -> u64 {
        connector
            .store(host)
            .unwrap()
            .collection(db, "docs")
            .count_documents(&Filter::All, None)
            .await
            .unwrap()
    }

    // ============================================================
    // PLANNING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_plan_prefers_pinned_primary_then_secondary_then_scan() {
        let fx = fixture_with(Settings::default()).await;

        let pinned = planner::plan(&fx.items, &QueryRequest::new(Filter::is_in("k", [1, 25])));
        let by_b = planner::plan(&fx.items, &QueryRequest::new(Filter::eq("b", "x")));
        let forced = planner::plan(&fx.items, &QueryRequest::new(Filter::eq("b", "x")).force_primary());
        let uncovered = planner::plan(
            &fx.items,
            &QueryRequest::new(Filter::eq("b", "x")).sort(Sort::asc("note")),
        );

        assert_eq!(pinned.sub_queries[0].source, QuerySource::Primary);
        assert_eq!(pinned.collection_count(), 2);
        assert!(!pinned.sub_queries[0].full_scan);

        assert_eq!(by_b.sub_queries[0].source, QuerySource::Secondary("b".to_string()));
        assert_eq!(by_b.collection_count(), 1);
        assert!(by_b.needs_rehydration());

        for plan in [forced, uncovered] {
            assert_eq!(plan.sub_queries[0].source, QuerySource::Primary);
            assert!(plan.sub_queries[0].full_scan);
            assert_eq!(plan.collection_count(), 3);
        }
    }

    #[tokio::test]
    async fn test_plan_splits_top_level_disjunction() {
        let fx = fixture_with(Settings::default()).await;

        let plan = planner::plan(
            &fx.items,
            &QueryRequest::new(Filter::or([Filter::eq("k", 3), Filter::eq("b", "x")])),
        );

        assert_eq!(plan.sub_queries.len(), 2);
        assert_eq!(plan.sub_queries[0].source, QuerySource::Primary);
        assert_eq!(plan.sub_queries[1].source, QuerySource::Secondary("b".to_string()));
    }

    // ============================================================
    // EXECUTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_three_node_sorted_merge_equals_sorted_union() {
        // ARRANGE
        let fx = seeded(Settings::default()).await;
        let sort = Sort::asc("score").then_desc("k");
        let mut expected: Vec<Document> = Vec::new();
        for host in ["q1", "q2", "q3"] {
            let mut stream = primary(&fx, host)
                .find(&Filter::All, &Default::default(), None)
                .await
                .unwrap();
            while let Some(doc) = stream.next().await {
                expected.push(doc.unwrap());
            }
        }
        expected.sort_by(|a, b| sort.compare(a, b));

        // ACT
        let found = fx
            .items
            .query(QueryRequest::all().sort(sort.clone()))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        // ASSERT
        let expected_keys: Vec<i64> = expected.iter().map(|d| d["k"].as_i64().unwrap()).collect();
        assert_eq!(keys(&found), expected_keys);
        assert_eq!(found.len(), 30);
    }

    #[tokio::test]
    async fn test_offset_ignored_across_collections() {
        let fx = seeded(Settings::default()).await;

        let spread = fx
            .items
            .query(QueryRequest::all().sort(Sort::asc("k")).offset(5))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let single = fx
            .items
            .query(
                QueryRequest::new(Filter::is_in("k", [1, 2, 3]))
                    .sort(Sort::asc("k"))
                    .offset(1),
            )
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(spread.len(), 30);
        assert_eq!(keys(&single), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_limit_applies_to_merged_stream() {
        let fx = seeded(Settings::default()).await;

        let top = fx
            .items
            .query(QueryRequest::all().sort(Sort::desc("k")).limit(5))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(keys(&top), vec![30, 29, 28, 27, 26]);
    }

    #[tokio::test]
    async fn test_secondary_results_are_rehydrated_in_order() {
        let fx = seeded(Settings::default()).await;

        let found = fx
            .items
            .query(QueryRequest::new(Filter::eq("b", "x")).sort(Sort::desc("score").then_asc("k")))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(found.len(), 15);
        // Rehydrated from the primary: carries attributes the copy does not hold.
        assert!(found.iter().all(|item| item.get::<String>("note").unwrap().is_some()));
        let scores: Vec<i64> = found
            .iter()
            .map(|item| item.get::<i64>("score").unwrap().unwrap())
            .collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(scores, sorted);
    }

    #[tokio::test]
    async fn test_orphaned_and_stale_copies_are_dropped() {
        // ARRANGE
        let fx = seeded(Settings::default()).await;
        // k = 2 vanishes from its primary; k = 4 moves to b = "y" behind the mapper's back.
        primary(&fx, "q1")
            .delete_one(&Filter::eq("k", 2), None)
            .await
            .unwrap();
        primary(&fx, "q1")
            .find_one_and_update(&Filter::eq("k", 4), &UpdateDoc::new().set("b", "y"), None)
            .await
            .unwrap();

        // ACT
        let found = fx
            .items
            .query(QueryRequest::new(Filter::eq("b", "x")).sort(Sort::asc("k")))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        // ASSERT
        let found = keys(&found);
        assert_eq!(found.len(), 13);
        assert!(!found.contains(&2));
        assert!(!found.contains(&4));
    }

    #[tokio::test]
    async fn test_disjunction_results_are_deduplicated() {
        let fx = seeded(Settings::default()).await;

        let found = fx
            .items
            .query(
                QueryRequest::new(Filter::or([Filter::is_in("k", [2, 3]), Filter::eq("b", "x")]))
                    .sort(Sort::asc("k")),
            )
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let found = keys(&found);
        // Every even k once, plus k = 3.
        assert_eq!(found.len(), 16);
        assert_eq!(found.iter().filter(|k| **k == 2).count(), 1);
        assert!(found.contains(&3));
    }

    #[tokio::test]
    async fn test_unbounded_scan_is_guarded() {
        let mut settings = Settings::default();
        settings.query.max_unbounded_scan = 5;
        let fx = seeded(settings).await;

        let unbounded = fx.items.query(QueryRequest::all()).await.unwrap().try_collect().await;
        let bounded = fx
            .items
            .query(QueryRequest::all().limit(10))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert!(matches!(unbounded, Err(OdmError::ScanAborted { scanned: 6, .. })));
        assert_eq!(bounded.len(), 10);
    }

    #[tokio::test]
    async fn test_cursor_streams_lazily() {
        let fx = seeded(Settings::default()).await;

        let first: Vec<i64> = fx
            .items
            .query(QueryRequest::all().sort(Sort::asc("k")))
            .await
            .unwrap()
            .into_stream()
            .take(3)
            .map(|item| item.unwrap().get::<i64>("k").unwrap().unwrap())
            .collect()
            .await;

        assert_eq!(first, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_find_and_get_helpers() {
        let fx = seeded(Settings::default()).await;

        let found = fx.items.find(Filter::eq("k", 12)).await.unwrap();
        let one = fx.items.get(Filter::eq("b", "y")).await.unwrap();
        let none = fx.items.get(Filter::eq("k", 99)).await.unwrap();

        assert_eq!(keys(&found), vec![12]);
        assert_eq!(one.unwrap().get::<String>("b").unwrap(), Some("y".to_string()));
        assert!(none.is_none());
    }

    // ============================================================
    // END-TO-END
    // ============================================================

    #[tokio::test]
    async fn test_primary_placement_and_secondary_lookup() {
        // ARRANGE: primary key `a` on two nodes, secondary key `b` on one.
        let connector = MemoryConnector::new();
        let control = ControlPlane::new(
            connector.clone(),
            NodeConfig::new("control", "meta", Value::Null),
        )
        .unwrap();
        control
            .set_topology(
                "app",
                "docs",
                None,
                vec![NodeConfig::new("left", "app", 0), NodeConfig::new("right", "app", 1)],
            )
            .await
            .unwrap();
        control
            .set_topology(
                "app",
                "docs",
                Some("b"),
                vec![NodeConfig::new("lookup", "app__b", Value::Null)],
            )
            .await
            .unwrap();
        let registry = ModelRegistry::new(control, Settings::default());
        let schema = ModelSchema::builder("docs")
            .db("app")
            .attr(Attribute::new("a", AttrType::Int))
            .attr(Attribute::new("b", AttrType::Str))
            .attr(Attribute::new("body", AttrType::Str))
            .index(Index::new(["a"]).unique())
            .index(Index::new(["b"]))
            .shard_key("a")
            .secondary_shard_key("b")
            .build()
            .unwrap();
        let docs = registry.register(schema).await.unwrap();

        // ACT
        for (a, b) in [(0, "red"), (1, "blue"), (0, "red")] {
            let mut item = docs.new_instance();
            item.set("a", a).unwrap();
            item.set("b", b).unwrap();
            item.set("body", format!("{}-{}", a, b)).unwrap();
            let _ = item.commit().await;
        }
        let request = QueryRequest::new(Filter::eq("b", "blue"));
        let plan = planner::plan(&docs, &request);
        let found = docs.query(request).await.unwrap().try_collect().await.unwrap();

        // ASSERT
        assert_eq!(count_in(&connector, "left", "app").await, 1);
        assert_eq!(count_in(&connector, "right", "app").await, 1);
        assert_eq!(count_in(&connector, "lookup", "app__b").await, 2);
        assert_eq!(plan.sub_queries[0].source, QuerySource::Secondary("b".to_string()));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get::<i64>("a").unwrap(), Some(1));
        assert_eq!(found[0].get::<String>("body").unwrap(), Some("1-blue".to_string()));
    }
}
