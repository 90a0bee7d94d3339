//! Schema Tests
//!
//! ## Test Scopes
//! - **Coercion**: declared types, validators, null pass-through.
//! - **Builder**: identity derivation and declaration errors.
//! - **Secondary shards**: projection and shared descriptors.

#[cfg(test)]
mod tests {
    use crate::error::OdmError;
    use crate::schema::{AttrType, Attribute, Index, ModelSchema};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn order_schema() -> ModelSchema {
        ModelSchema::builder("orders")
            .attr(Attribute::new("customer", AttrType::Str))
            .attr(Attribute::new("order_no", AttrType::Int))
            .attr(Attribute::new("email", AttrType::Str))
            .attr(Attribute::new("total", AttrType::Float).with_default(0.0))
            .attr(Attribute::new("notes", AttrType::Str))
            .index(Index::new(["customer", "order_no"]).unique())
            .index(Index::new(["email"]).projection(["total"]))
            .shard_key("customer")
            .secondary_shard_key("email")
            .build()
            .unwrap()
    }

    // ============================================================
    // ATTRIBUTE TESTS
    // ============================================================

    #[test]
    fn test_coerce_converts_to_declared_type() {
        let int = Attribute::new("n", AttrType::Int);
        let float = Attribute::new("f", AttrType::Float);
        let text = Attribute::new("s", AttrType::Str);
        let flag = Attribute::new("b", AttrType::Bool);

        assert_eq!(int.coerce(json!("42")).unwrap(), json!(42));
        assert_eq!(int.coerce(json!(3.0)).unwrap(), json!(3));
        assert!(int.coerce(json!(3.5)).is_err());
        assert_eq!(float.coerce(json!(2)).unwrap(), json!(2.0));
        assert_eq!(text.coerce(json!(7)).unwrap(), json!("7"));
        assert_eq!(flag.coerce(json!("TRUE")).unwrap(), json!(true));
        assert!(flag.coerce(json!([1])).is_err());
    }

    #[test]
    fn test_coerce_passes_null_and_runs_validator() {
        let attr = Attribute::new("age", AttrType::Int).with_validator(|v| v.as_i64().unwrap_or(0) >= 0);

        assert_eq!(attr.coerce(Value::Null).unwrap(), Value::Null);
        assert!(attr.coerce(json!(5)).is_ok());
        assert!(matches!(attr.coerce(json!(-1)), Err(OdmError::Validation(_))));
    }

    #[test]
    fn test_generator_default_runs_each_time() {
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let c = counter.clone();
        let attr = Attribute::new("seq", AttrType::Int)
            .with_default_fn(move || json!(c.fetch_add(1, std::sync::atomic::Ordering::SeqCst)));

        assert_eq!(attr.default_value(), Some(json!(0)));
        assert_eq!(attr.default_value(), Some(json!(1)));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    // ============================================================
    // BUILDER TESTS
    // ============================================================

    #[test]
    fn test_identity_is_shortest_unique_index_on_shard_key() {
        let schema = ModelSchema::builder("m")
            .attr(Attribute::new("a", AttrType::Int))
            .attr(Attribute::new("b", AttrType::Int))
            .attr(Attribute::new("c", AttrType::Int))
            .index(Index::new(["a", "b", "c"]).unique())
            .index(Index::new(["a", "b"]).unique())
            .index(Index::new(["b"]).unique())
            .shard_key("a")
            .build()
            .unwrap();

        assert_eq!(schema.pk_attrs, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_sharded_model_without_identity_index_is_rejected() {
        let result = ModelSchema::builder("m")
            .attr(Attribute::new("a", AttrType::Int))
            .index(Index::new(["a"]))
            .shard_key("a")
            .build();

        assert!(matches!(result, Err(OdmError::Validation(_))));
    }

    #[test]
    fn test_unsharded_model_falls_back_to_generated_id() {
        let schema = ModelSchema::builder("logs")
            .attr(Attribute::new("line", AttrType::Str))
            .build()
            .unwrap();

        assert_eq!(schema.pk_attrs, vec!["_id".to_string()]);
        let id = schema.attr("_id").unwrap();
        assert!(id.default_value().unwrap().is_string());
        assert_ne!(id.default_value(), id.default_value());
    }

    #[test]
    fn test_declaration_errors() {
        let reserved = ModelSchema::builder("m")
            .attr(Attribute::new("_", AttrType::Int))
            .build();
        let twice = ModelSchema::builder("m")
            .attr(Attribute::new("a", AttrType::Int))
            .attr(Attribute::new("a", AttrType::Int))
            .build();
        let bad_index = ModelSchema::builder("m")
            .attr(Attribute::new("a", AttrType::Int))
            .index(Index::new(["nope"]))
            .build();
        let bad_secondary = ModelSchema::builder("m")
            .attr(Attribute::new("a", AttrType::Int))
            .index(Index::new(["a"]).unique())
            .shard_key("a")
            .secondary_shard_key("a")
            .build();

        assert!(reserved.is_err());
        assert!(twice.is_err());
        assert!(bad_index.is_err());
        assert!(bad_secondary.is_err());
    }

    // ============================================================
    // SECONDARY SHARD TESTS
    // ============================================================

    #[test]
    fn test_secondary_projection() {
        let schema = order_schema();

        let secondary = schema.derive_secondary("email").unwrap();

        let names: Vec<String> = secondary.attr_names().into_iter().collect();
        assert_eq!(names, vec!["customer", "email", "order_no", "total"]);
        assert!(secondary.is_secondary_shard);
        assert_eq!(secondary.shard_key.as_deref(), Some("email"));
        assert_eq!(secondary.pk_attrs, schema.pk_attrs);
        assert_eq!(secondary.collection, schema.collection);
        assert_eq!(secondary.name, "orders__email");
        assert_eq!(secondary.indexes[0].keys, vec!["email", "customer", "order_no"]);
        assert!(secondary.indexes[0].unique);
    }

    #[test]
    fn test_secondary_shares_descriptors() {
        let schema = order_schema();
        let secondary = schema.derive_secondary("email").unwrap();

        assert!(Arc::ptr_eq(
            schema.attr("total").unwrap(),
            secondary.attr("total").unwrap()
        ));
        assert_eq!(
            schema.attr("email").unwrap().models(),
            vec!["orders".to_string(), "orders__email".to_string()]
        );
        assert_eq!(schema.attr("notes").unwrap().models(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_derive_undeclared_secondary_fails() {
        let schema = order_schema();
        assert!(schema.derive_secondary("notes").is_err());
    }
}
