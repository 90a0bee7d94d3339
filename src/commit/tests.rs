//! Commit Engine Tests
//!
//! ## Test Scopes
//! - **Insert/Update**: round trips, explicit operations, duplicate identities, conditions.
//! - **Concurrency**: optimistic retries under contention, retry exhaustion.
//! - **Placement**: shard migration and secondary shard consistency.
//! - **Transactions**: transient commit failures, caller-owned scopes.
//! - **Delete & Hooks**: removal everywhere, vetoes and notifications.

#[cfg(test)]
mod tests {
    use crate::commit::engine::next_version;
    use crate::commit::{CommitOptions, TxnScope};
    use crate::config::Settings;
    use crate::document::driver::DocumentStore;
    use crate::document::memory::MemoryConnector;
    use crate::document::types::{Document, Filter, FindOptions, UpdateDoc};
    use crate::error::OdmError;
    use crate::model::{HookContext, HookEvent, Model, ModelRegistry};
    use crate::node::{ControlPlane, NodeConfig};
    use crate::schema::{AttrType, Attribute, Index, ModelSchema};
    use futures::TryStreamExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        connector: Arc<MemoryConnector>,
        registry: ModelRegistry,
        orders: Arc<Model>,
    }

    /// `orders` sharded on `a` over n1 (a <= 10) and n2 (10 < a <= 20), with a secondary
    /// shard on `b` stored on s1.
    fn order_schema() -> ModelSchema {
        ModelSchema::builder("orders")
            .db("shop")
            .attr(Attribute::new("a", AttrType::Int))
            .attr(Attribute::new("b", AttrType::Str))
            .attr(Attribute::new("qty", AttrType::Int).with_default(0))
            .attr(Attribute::new("tags", AttrType::List).with_default(json!([])))
            .attr(Attribute::new("note", AttrType::Str))
            .index(Index::new(["a"]).unique())
            .index(Index::new(["b"]).projection(["qty"]))
            .shard_key("a")
            .secondary_shard_key("b")
            .build()
            .unwrap()
    }

    fn counter_schema() -> ModelSchema {
        ModelSchema::builder("counters")
            .db("shop")
            .attr(Attribute::new("name", AttrType::Str))
            .attr(Attribute::new("entries", AttrType::List).with_default(json!([])))
            .build()
            .unwrap()
    }

    async fn fixture_with(settings: Settings) -> Fixture {
        fixture_on(settings, vec![NodeConfig::new("s1", "shop__b", Value::Null)]).await
    }

    async fn fixture_on(settings: Settings, secondary_nodes: Vec<NodeConfig>) -> Fixture {
        let connector = MemoryConnector::new();
        let control = ControlPlane::new(
            connector.clone(),
            NodeConfig::new("control", "meta", Value::Null),
        )
        .unwrap();
        control
            .set_topology(
                "shop",
                "orders",
                None,
                vec![NodeConfig::new("n1", "shop", 10), NodeConfig::new("n2", "shop", 20)],
            )
            .await
            .unwrap();
        control
            .set_topology(
                "shop",
                "orders",
                Some("b"),
                secondary_nodes,
            )
            .await
            .unwrap();
        let registry = ModelRegistry::new(control, settings);
        let orders = registry.register(order_schema()).await.unwrap();
        Fixture {
            connector,
            registry,
            orders,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Settings::default()).await
    }

    /// Everything stored in `<db>.<collection>` on the store at `host`.
    async fn stored(connector: &MemoryConnector, host: &str, db: &str, collection: &str) -> Vec<Document> {
        connector
            .store(host)
            .unwrap()
            .collection(db, collection)
            .find(&Filter::All, &FindOptions::default(), None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    async fn primaries(fx: &Fixture, host: &str) -> Vec<Document> {
        stored(&fx.connector, host, "shop", "orders").await
    }

    async fn copies(fx: &Fixture) -> Vec<Document> {
        stored(&fx.connector, "s1", "shop__b", "orders").await
    }

    async fn create_order(orders: &Arc<Model>, a: i64, b: &str) -> crate::model::Instance {
        let mut order = orders.new_instance();
        order.set("a", a).unwrap();
        order.set("b", b).unwrap();
        assert!(order.commit().await.unwrap());
        order
    }

    // ============================================================
    // INSERT / UPDATE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_commit_then_reload_round_trips_declared_attributes() {
        // ARRANGE
        let fx = fixture().await;
        let mut order = fx.orders.new_instance();
        order.set("a", 5).unwrap();
        order.set("b", "x").unwrap();
        order.set("note", "hello").unwrap();
        order.list("tags").unwrap().push("new").unwrap();

        // ACT
        assert!(order.commit().await.unwrap());
        fx.orders.clear_cache();
        let fresh = fx.orders.get(Filter::eq("a", 5)).await.unwrap().unwrap();

        // ASSERT
        for attr in ["a", "b", "qty", "tags", "note", "_id"] {
            assert_eq!(fresh.get_value(attr), order.get_value(attr), "attribute {}", attr);
        }
        assert!(!order.is_new());
        assert!(!order.is_dirty());
        assert!(order.version().is_some());
        assert_eq!(primaries(&fx, "n1").await.len(), 1);
        assert!(primaries(&fx, "n2").await.is_empty());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_applies_explicit_ops() {
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;
        let first = order.version().unwrap();

        order.set("note", "later").unwrap();
        assert!(order.update(UpdateDoc::new().inc("qty", 5)).await.unwrap());

        assert!(order.version().unwrap() > first);
        assert_eq!(order.get::<i64>("qty").unwrap(), Some(5));
        assert_eq!(order.get::<String>("note").unwrap(), Some("later".to_string()));
        let stored = primaries(&fx, "n1").await;
        assert_eq!(stored[0]["qty"], json!(5));
    }

    #[test]
    fn test_next_version_exceeds_stored_version_and_clock() {
        // Clock ahead of the stored version.
        assert_eq!(next_version(Some(5), 100), 101);
        // Stored version ahead of the clock.
        assert_eq!(next_version(Some(200), 100), 201);
        assert_eq!(next_version(Some(100), 100), 101);
        assert_eq!(next_version(None, 100), 100);
    }

    #[tokio::test]
    async fn test_clean_instance_commit_is_a_no_op() {
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;
        let version = order.version();

        assert!(order.commit().await.unwrap());

        assert_eq!(order.version(), version);
    }

    #[tokio::test]
    async fn test_insert_without_identity_is_rejected() {
        let fx = fixture().await;
        let mut order = fx.orders.new_instance();
        order.set("b", "x").unwrap();

        let result = order.commit().await;

        assert!(matches!(result, Err(OdmError::Validation(_))));
        assert!(order.is_new());
    }

    #[tokio::test]
    async fn test_duplicate_identity_fails_without_force() {
        let fx = fixture().await;
        create_order(&fx.orders, 5, "x").await;

        let mut twin = fx.orders.new_instance();
        twin.set("a", 5).unwrap();
        let result = twin.commit().await;

        assert!(matches!(result, Err(OdmError::DuplicateKey { .. })));
        assert_eq!(primaries(&fx, "n1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_force_adopts_existing_document() {
        // ARRANGE
        let fx = fixture().await;
        let mut original = create_order(&fx.orders, 5, "x").await;
        original.set("qty", 7).unwrap();
        assert!(original.commit().await.unwrap());

        // ACT
        let mut twin = fx.orders.new_instance();
        twin.set("a", 5).unwrap();
        twin.set("note", "second").unwrap();
        let applied = twin.commit_with(CommitOptions::new().force()).await.unwrap();

        // ASSERT
        assert!(applied);
        assert!(!twin.is_new());
        let stored = primaries(&fx, "n1").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["note"], json!("second"));
        // The twin's unset default did not clobber the stored value.
        assert_eq!(stored[0]["qty"], json!(7));
        assert_eq!(stored[0]["b"], json!("x"));
    }

    #[tokio::test]
    async fn test_failed_condition_reports_false_and_keeps_changes() {
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;

        order.set("note", "guarded").unwrap();
        let applied = order
            .commit_with(CommitOptions::new().conditions(Filter::eq("qty", 99)))
            .await
            .unwrap();

        assert!(!applied);
        assert!(order.is_dirty());
        assert!(primaries(&fx, "n1").await[0].get("note").is_none());

        let applied = order
            .commit_with(CommitOptions::new().conditions(Filter::eq("qty", 0)))
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(primaries(&fx, "n1").await[0]["note"], json!("guarded"));
    }

    #[tokio::test]
    async fn test_update_of_vanished_document_is_an_error() {
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;
        let mut other = fx.orders.get(Filter::eq("a", 5)).await.unwrap().unwrap();
        other.delete().await.unwrap();

        order.set("note", "too late").unwrap();
        let result = order.commit().await;

        assert!(matches!(result, Err(OdmError::DocumentMissing { .. })));
    }

    // ============================================================
    // CONCURRENCY TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_no_updates() {
        // ARRANGE
        let fx = fixture().await;
        let counters = fx.registry.register(counter_schema()).await.unwrap();
        let mut seed = counters.new_instance();
        seed.set("name", "hits").unwrap();
        assert!(seed.commit().await.unwrap());
        let identity = seed.identity().unwrap();

        // ACT
        let mut handles = Vec::new();
        for i in 0..20 {
            let model = counters.clone();
            let identity = identity.clone();
            handles.push(tokio::spawn(async move {
                let mut counter = model.get_by_id(identity).await.unwrap().unwrap();
                counter.list("entries").unwrap().push(i).unwrap();
                counter.commit().await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        // ASSERT
        seed.reload().await.unwrap();
        let mut entries: Vec<i64> = seed.get("entries").unwrap().unwrap();
        entries.sort();
        assert_eq!(entries, (0..20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_stale_writer_rebases_onto_newer_version() {
        let fx = fixture().await;
        let mut first = create_order(&fx.orders, 5, "x").await;
        fx.orders.clear_cache();
        let mut second = fx.orders.get(Filter::eq("a", 5)).await.unwrap().unwrap();

        first.set("note", "from first").unwrap();
        assert!(first.commit().await.unwrap());
        second.set("qty", 3).unwrap();
        assert!(second.commit().await.unwrap());

        let stored = &primaries(&fx, "n1").await[0];
        assert_eq!(stored["note"], json!("from first"));
        assert_eq!(stored["qty"], json!(3));
        assert_eq!(second.get::<String>("note").unwrap(), Some("from first".to_string()));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_a_commit_conflict() {
        let mut settings = Settings::default();
        settings.commit.max_retries = 1;
        let fx = fixture_with(settings).await;
        let mut first = create_order(&fx.orders, 5, "x").await;
        fx.orders.clear_cache();
        let mut second = fx.orders.get(Filter::eq("a", 5)).await.unwrap().unwrap();

        first.set("note", "winner").unwrap();
        assert!(first.commit().await.unwrap());
        second.set("note", "loser").unwrap();
        let result = second.commit().await;

        assert!(matches!(result, Err(OdmError::CommitConflict { attempts: 1, .. })));
        assert_eq!(primaries(&fx, "n1").await[0]["note"], json!("winner"));
    }

    // ============================================================
    // PLACEMENT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_shard_key_change_migrates_document() {
        // ARRANGE
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;
        let id = order.get_value("_id").cloned();

        // ACT
        order.set("a", 15).unwrap();
        assert!(order.commit().await.unwrap());

        // ASSERT
        assert!(primaries(&fx, "n1").await.is_empty());
        let moved = primaries(&fx, "n2").await;
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0]["a"], json!(15));
        assert_eq!(moved[0].get("_id").cloned(), id);

        let copies = copies(&fx).await;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0]["a"], json!(15));
    }

    #[tokio::test]
    async fn test_secondary_copy_follows_projected_changes() {
        // ARRANGE
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;
        let copy = &copies(&fx).await[0];
        for field in ["_", "a", "b", "qty"] {
            assert!(copy.contains_key(field), "copy lacks {}", field);
        }
        assert!(!copy.contains_key("note"));
        assert!(!copy.contains_key("tags"));

        // ACT
        order.set("qty", 3).unwrap();
        assert!(order.commit().await.unwrap());
        let after_qty = copies(&fx).await;
        order.set("b", "y").unwrap();
        assert!(order.commit().await.unwrap());
        let after_key = copies(&fx).await;

        // ASSERT
        assert_eq!(after_qty.len(), 1);
        assert_eq!(after_qty[0]["qty"], json!(3));
        assert_eq!(after_key.len(), 1);
        assert_eq!(after_key[0]["b"], json!("y"));
        assert_eq!(after_key[0]["qty"], json!(3));
    }

    #[tokio::test]
    async fn test_secondary_key_change_moves_copy_between_nodes() {
        // ARRANGE: copies with b <= "m" live on s1, the rest on s2.
        let fx = fixture_on(
            Settings::default(),
            vec![
                NodeConfig::new("s1", "shop__b", "m"),
                NodeConfig::new("s2", "shop__b", "z"),
            ],
        )
        .await;
        let mut order = create_order(&fx.orders, 5, "c").await;
        let on_s1_before = stored(&fx.connector, "s1", "shop__b", "orders").await;

        // ACT
        order.set("b", "x").unwrap();
        assert!(order.commit().await.unwrap());

        // ASSERT
        let on_s1 = stored(&fx.connector, "s1", "shop__b", "orders").await;
        let on_s2 = stored(&fx.connector, "s2", "shop__b", "orders").await;
        assert_eq!(on_s1_before.len(), 1);
        assert!(on_s1.is_empty());
        assert_eq!(on_s2.len(), 1);
        assert_eq!(on_s2[0]["a"], json!(5));
        assert_eq!(on_s2[0]["b"], json!("x"));
        let found = fx.orders.find(Filter::eq("b", "x")).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_clearing_secondary_key_removes_copy() {
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;

        order.set("b", Value::Null).unwrap();
        assert!(order.commit().await.unwrap());

        assert!(copies(&fx).await.is_empty());
        assert_eq!(primaries(&fx, "n1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_failure_does_not_fail_primary_write() {
        // ARRANGE
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;
        fx.connector.store("s1").unwrap().set_read_only(true);

        // ACT
        order.set("qty", 4).unwrap();
        let applied = order.commit().await.unwrap();

        // ASSERT
        assert!(applied);
        assert_eq!(primaries(&fx, "n1").await[0]["qty"], json!(4));
        assert_eq!(copies(&fx).await[0]["qty"], json!(0));
    }

    // ============================================================
    // TRANSACTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_transient_commit_failure_retries_transaction() {
        let fx = fixture().await;
        let primary_store = fx.connector.store("n1").unwrap();
        primary_store.fail_next_commits(1);

        create_order(&fx.orders, 5, "x").await;

        assert_eq!(primaries(&fx, "n1").await.len(), 1);
        assert_eq!(copies(&fx).await.len(), 1);
        assert_eq!(primary_store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_caller_scope_controls_the_outcome() {
        // ARRANGE
        let fx = fixture().await;
        let scope = TxnScope::new();
        let mut order = fx.orders.new_instance();
        order.set("a", 5).unwrap();
        order.set("b", "x").unwrap();

        // ACT
        assert!(order.commit_with(CommitOptions::new().txn(scope.clone())).await.unwrap());
        let sessions = scope.session_count().await;
        scope.abort().await;

        // ASSERT
        assert_eq!(sessions, 2);
        assert!(primaries(&fx, "n1").await.is_empty());
        assert!(copies(&fx).await.is_empty());
    }

    // ============================================================
    // DELETE & HOOK TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_removes_primary_copies_and_cache() {
        let fx = fixture().await;
        let mut order = create_order(&fx.orders, 5, "x").await;
        let identity = order.identity().unwrap();

        assert!(order.delete().await.unwrap());

        assert!(primaries(&fx, "n1").await.is_empty());
        assert!(copies(&fx).await.is_empty());
        assert!(fx.orders.get_by_id(identity).await.unwrap().is_none());
        assert!(order.is_new());

        // A deleted instance can be stored again.
        assert!(order.commit().await.unwrap());
        assert_eq!(primaries(&fx, "n1").await.len(), 1);
        assert_eq!(copies(&fx).await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_unsaved_instance_is_rejected() {
        let fx = fixture().await;
        let mut order = fx.orders.new_instance();

        assert!(matches!(order.delete().await, Err(OdmError::Validation(_))));
    }

    #[tokio::test]
    async fn test_before_hook_vetoes_and_after_hooks_fire() {
        // ARRANGE
        let fx = fixture().await;
        let updates = Arc::new(AtomicUsize::new(0));
        let storage = Arc::new(AtomicUsize::new(0));
        fx.orders.hooks().register(HookEvent::BeforeCreate, |ctx: HookContext| async move {
            if ctx.after.as_ref().and_then(|doc| doc.get("note")) == Some(&json!("forbidden")) {
                anyhow::bail!("forbidden note");
            }
            Ok(())
        });
        let counter = updates.clone();
        fx.orders.hooks().register(HookEvent::AfterUpdate, move |ctx: HookContext| {
            let counter = counter.clone();
            async move {
                assert!(ctx.before.is_some());
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
        let counter = storage.clone();
        fx.orders.hooks().register(HookEvent::StorageUpdated, move |_ctx: HookContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        // ACT
        let mut rejected = fx.orders.new_instance();
        rejected.set("a", 1).unwrap();
        rejected.set("note", "forbidden").unwrap();
        let veto = rejected.commit().await;

        let mut order = create_order(&fx.orders, 5, "x").await;
        order.set("qty", 2).unwrap();
        assert!(order.commit().await.unwrap());

        // ASSERT
        assert!(matches!(veto, Err(OdmError::Hook { .. })));
        assert!(primaries(&fx, "n1").await.iter().all(|doc| doc["a"] != json!(1)));
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(storage.load(Ordering::SeqCst), 2);
    }
}
