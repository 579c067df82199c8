//! Frame statistics report for a synthetic hierarchy
//!
//! Builds a random hierarchy, runs a full load session against in-memory
//! collaborators and prints what each zoom level would hand to the renderer.
//!
//! Usage: `hierarchy-frame-report [node-count] [config.json]`

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use cim_hierarchy_view::{
    infrastructure::{InMemoryLocalCache, StaticEnrichmentSource, StaticStructureSource},
    Clock, EngineConfig, LayeredTreeLayout, ManualClock, NodeId, ProgressiveLoader,
    SharedHierarchy, StructureRecord, ViewEngine, Viewport, WorldRect,
};

const MAX_TICKS_PER_FRAME: usize = 16;

fn random_hierarchy(count: usize, seed: u64) -> Vec<StructureRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::with_capacity(count);
    records.push(StructureRecord::root("n0"));
    for i in 1..count {
        // Bias toward recent nodes so the tree gets some depth
        let window = (i / 4).max(1);
        let parent = i - rng.gen_range(1..=window.min(i));
        records.push(StructureRecord::child(
            format!("n{i}"),
            format!("n{parent}"),
            rng.gen_range(0..100),
        ));
    }
    records
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = std::env::args().skip(1);
    let count: usize = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("invalid node count {raw:?}"))?,
        None => 10_000,
    };
    let config = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            EngineConfig::from_json_str(&json).with_context(|| format!("parsing {path}"))?
        }
        None => EngineConfig::default(),
    };
    config.validate()?;

    let records = random_hierarchy(count.max(1), 7);
    let ids: Vec<NodeId> = records.iter().map(|r| r.id.clone()).collect();
    let clock = Arc::new(ManualClock::new(0));
    let hierarchy = SharedHierarchy::new();

    let mut loader = ProgressiveLoader::new(
        config.loader.clone(),
        clock.clone(),
        Arc::new(StaticStructureSource::new(records)),
        Arc::new(StaticEnrichmentSource::generated(&ids)),
        Arc::new(InMemoryLocalCache::new()),
        Arc::new(LayeredTreeLayout::new(config.layout.clone())),
        config.spatial.clone(),
        hierarchy.clone(),
    );

    let outcome = loader.load().await.context("loading structure")?;
    println!(
        "Loaded {} nodes from {:?} (structure {}) in session {}",
        outcome.node_count,
        outcome.origin,
        outcome.hash,
        loader.session_id()
    );

    let bounds = hierarchy
        .read(|s| s.spatial().bounds())
        .flatten()
        .context("hierarchy has no placed nodes")?;
    let center = bounds.center();
    let mut engine = ViewEngine::new(&config, clock.clone(), 1.0);

    println!();
    println!(
        "{:>6} {:>13} {:>8} {:>8} {:>6} {:>7} {:>7} {:>6} {:>8}",
        "scale", "tier", "visible", "culled", "trunc", "conns", "segs", "paths", "enriched"
    );
    for scale in [2.0, 1.0, 0.5, 0.3, 0.1, 0.03] {
        let (width, height) = (1920.0 / scale, 1080.0 / scale);
        let viewport = Viewport::new(
            WorldRect::from_origin_size(center.x - width / 2.0, center.y - height / 2.0, width, height),
            scale,
        );
        let frame = engine.render(&hierarchy, &viewport)?;

        // Let the loader enrich what this frame showed
        loader.on_visible_changed(frame.visible_ids());
        for _ in 0..MAX_TICKS_PER_FRAME {
            let Some(due) = loader.next_deadline() else {
                break;
            };
            clock.set(due.max(clock.now_ms()));
            let report = loader.tick().await;
            for error in report.errors {
                tracing::warn!("Tick error: {}", error);
            }
        }
        let enriched = hierarchy
            .read(|s| s.store().nodes().iter().filter(|n| n.has_rich_data()).count())
            .unwrap_or(0);

        let stats = &frame.stats;
        println!(
            "{:>6.2} {:>13} {:>8} {:>8} {:>6} {:>7} {:>7} {:>6} {:>8}",
            scale,
            format!("{:?}", frame.tier),
            stats.culling.visible_nodes,
            stats.culling.culled_nodes,
            stats.culling.truncated,
            stats.connections_considered - stats.connections_culled,
            stats.batching.segments,
            frame.paths.len(),
            enriched
        );
        if !frame.heroes.is_empty() {
            for hero in &frame.heroes {
                println!(
                    "         hero {} size {} at ({:.0}, {:.0})",
                    hero.id, hero.subtree_size, hero.centroid.x, hero.centroid.y
                );
            }
        }
    }

    loader.shutdown().context("final enrichment flush")?;
    engine.teardown();
    println!();
    println!("Loader stats: {:?}", loader.stats());
    Ok(())
}
