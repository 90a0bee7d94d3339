use distributed_odm::Settings;
use distributed_odm::document::memory::MemoryConnector;
use distributed_odm::document::types::{Filter, Sort, UpdateDoc};
use distributed_odm::model::{HookEvent, ModelRegistry};
use distributed_odm::node::{ControlPlane, NodeConfig};
use distributed_odm::query::QueryRequest;
use distributed_odm::schema::{AttrType, Attribute, Index, ModelSchema};
use serde_json::Value;

const COLORS: [&str; 4] = ["red", "green", "blue", "amber"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut docs: i64 = 12;
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--docs" if i + 1 < args.len() => {
                docs = args[i + 1].parse()?;
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                config_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--help" => {
                eprintln!("Usage: {} [--docs <n>] [--config <settings.json>]", args[0]);
                return Ok(());
            }
            _ => {
                i += 1;
            }
        }
    }

    let settings = match config_path {
        Some(path) => Settings::from_json(&std::fs::read_to_string(path)?)?,
        None => Settings::from_env(),
    };

    // 1. Topology: two primary nodes split on `a`, one secondary node keyed on `b`.
    let connector = MemoryConnector::new();
    let control = ControlPlane::new(
        connector.clone(),
        NodeConfig::new("control:27017", "meta", Value::Null),
    )?;
    let half = docs / 2;
    control
        .set_topology(
            "demo",
            "widgets",
            None,
            vec![
                NodeConfig::new("shard-a:27017", "demo", half),
                NodeConfig::new("shard-b:27017", "demo", docs),
            ],
        )
        .await?;
    control
        .set_topology(
            "demo",
            "widgets",
            Some("b"),
            vec![NodeConfig::new("lookup:27017", "demo__b", Value::Null)],
        )
        .await?;

    // 2. Model registration:
    let registry = ModelRegistry::new(control, settings);
    let schema = ModelSchema::builder("widgets")
        .db("demo")
        .attr(Attribute::new("a", AttrType::Int))
        .attr(Attribute::new("b", AttrType::Str))
        .attr(Attribute::new("weight", AttrType::Float).with_default(1.0))
        .attr(Attribute::new("tags", AttrType::List).with_default(serde_json::json!([])))
        .index(Index::new(["a"]).unique())
        .index(Index::new(["b"]).projection(["weight"]))
        .shard_key("a")
        .secondary_shard_key("b")
        .build()?;
    let widgets = registry.register(schema).await?;

    widgets.hooks().register(HookEvent::AfterCreate, |ctx| async move {
        tracing::debug!("Created {} {:?}", ctx.model, ctx.identity);
        anyhow::Ok(())
    });

    // 3. Writes:
    for a in 1..=docs {
        let mut widget = widgets.new_instance();
        widget.set("a", a)?;
        widget.set("b", COLORS[(a as usize) % COLORS.len()])?;
        widget.set("weight", a as f64 * 0.5)?;
        widget.list("tags")?.push("new")?;
        widget.commit().await?;
    }
    tracing::info!("Inserted {} widgets", docs);

    if let Some(mut first) = widgets.get(Filter::eq("a", 1)).await? {
        first.set("b", "violet")?;
        first.update(UpdateDoc::new().inc("weight", 10.0)).await?;
        tracing::info!("Widget 1 is now {:?}", first.values());
    }

    // 4. Reads:
    for color in COLORS.iter().chain(std::iter::once(&"violet")) {
        let found = widgets
            .query(QueryRequest::new(Filter::eq("b", *color)).sort(Sort::desc("weight")))
            .await?
            .try_collect()
            .await?;
        let keys: Vec<i64> = found
            .iter()
            .filter_map(|widget| widget.get::<i64>("a").ok().flatten())
            .collect();
        tracing::info!("b = {:<6} -> {:?}", color, keys);
    }

    let heavy = widgets
        .query(
            QueryRequest::new(Filter::gt("weight", 2.0))
                .sort(Sort::asc("a"))
                .limit(5),
        )
        .await?
        .try_collect()
        .await?;
    tracing::info!("First {} heavy widgets (scanned every node)", heavy.len());

    for host in ["shard-a:27017", "shard-b:27017", "lookup:27017"] {
        if let Some(store) = connector.store(host) {
            tracing::info!("{} holds {:?}", host, store.namespaces());
        }
    }

    Ok(())
}
