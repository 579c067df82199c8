//! Large hierarchy walkthrough
//!
//! A 10,000 person organisation, loaded progressively and viewed from the
//! overview down to a single team. Time is driven by a manual clock so every
//! debounce and flush is visible in the output.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use cim_hierarchy_view::{
    infrastructure::{InMemoryLocalCache, StaticEnrichmentSource, StaticStructureSource},
    loading::StructureOrigin,
    ChangeEvent, Clock, EngineConfig, FrameOutput, LayeredTreeLayout, ManualClock, NodeId,
    Position2D, ProgressiveLoader, SharedHierarchy, StructureRecord, ViewEngine, Viewport,
};

const DIVISIONS: usize = 8;
const TEAMS_PER_DIVISION: usize = 25;
const MEMBERS_PER_TEAM: usize = 49;

/// CEO, divisions, teams, members: 1 + 8 + 200 + 9800 = 10,009 nodes
fn organisation() -> Vec<StructureRecord> {
    let mut records = vec![StructureRecord::root("ceo")];
    for d in 0..DIVISIONS {
        let division = format!("div-{d}");
        records.push(StructureRecord::child(division.clone(), "ceo", d as i64));
        for t in 0..TEAMS_PER_DIVISION {
            let team = format!("team-{d}-{t}");
            records.push(StructureRecord::child(team.clone(), division.clone(), t as i64));
            for m in 0..MEMBERS_PER_TEAM {
                records.push(StructureRecord::child(format!("member-{d}-{t}-{m}"), team.clone(), m as i64));
            }
        }
    }
    records
}

fn print_frame(label: &str, frame: &FrameOutput) {
    let stats = &frame.stats;
    println!(
        "{label}: tier {:?}, {} of {} nodes visible{}, {} segments in {} batches",
        frame.tier,
        stats.culling.visible_nodes,
        stats.culling.total_nodes,
        if stats.culling.truncated { " (sampled)" } else { "" },
        stats.batching.segments,
        frame.paths.len(),
    );
    for hero in &frame.heroes {
        println!(
            "    hero {} ({} people) anchored at ({:.0}, {:.0})",
            hero.id, hero.subtree_size, hero.centroid.x, hero.centroid.y
        );
    }
    if !stats.quality_buckets.is_empty() {
        println!("    photo buckets: {:?}", stats.quality_buckets);
    }
}

/// Advance the clock through every deferred deadline
async fn settle(loader: &mut ProgressiveLoader, clock: &ManualClock) {
    for _ in 0..16 {
        let Some(due) = loader.next_deadline() else {
            return;
        };
        clock.set(due.max(clock.now_ms()));
        let report = loader.tick().await;
        if let Some(outcome) = report.enrichment {
            println!("    t={}ms enrichment {:?}", clock.now_ms(), outcome);
        }
        if let Some(merge) = report.flushed {
            println!(
                "    t={}ms flushed {} updates in one merge (enrichment version {})",
                clock.now_ms(),
                merge.applied,
                merge.version.enrichment
            );
        }
        if report.structure_rebuilt {
            println!("    t={}ms structure rebuilt", clock.now_ms());
        }
        for error in report.errors {
            println!("    t={}ms error: {}", clock.now_ms(), error);
        }
    }
}

fn viewport_around(center: Position2D, scale: f64) -> Viewport {
    Viewport::from_screen(
        1920.0,
        1080.0,
        Position2D::new(960.0 - center.x * scale, 540.0 - center.y * scale),
        scale,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Large hierarchy demo");
    println!("====================");

    let config = EngineConfig::default();
    let records = organisation();
    let ids: Vec<NodeId> = records.iter().map(|r| r.id.clone()).collect();
    let clock = Arc::new(ManualClock::new(0));
    let cache = Arc::new(InMemoryLocalCache::new());
    let hierarchy = SharedHierarchy::new();

    let new_loader = |hierarchy: SharedHierarchy| {
        ProgressiveLoader::new(
            config.loader.clone(),
            clock.clone(),
            Arc::new(StaticStructureSource::new(records.clone())),
            Arc::new(StaticEnrichmentSource::generated(&ids)),
            cache.clone(),
            Arc::new(LayeredTreeLayout::new(config.layout.clone())),
            config.spatial.clone(),
            hierarchy,
        )
    };

    // 1. Structure first
    println!("\n1. Loading structure");
    let mut loader = new_loader(hierarchy.clone());
    let outcome = loader.load().await?;
    println!(
        "    {} nodes from {:?}, structure {}",
        outcome.node_count, outcome.origin, outcome.hash
    );
    let bounds = hierarchy
        .read(|s| s.spatial().bounds())
        .flatten()
        .context("no placed nodes")?;
    println!(
        "    layout spans {:.0} x {:.0} world units",
        bounds.width(),
        bounds.height()
    );

    // 2. Overview
    println!("\n2. Zoomed all the way out");
    let mut engine = ViewEngine::new(&config, clock.clone(), 0.02);
    let overview = engine.render(&hierarchy, &viewport_around(bounds.center(), 0.02))?;
    print_frame("    overview", &overview);

    // 3. Zoom toward the busiest division
    let focus = overview
        .heroes
        .get(1)
        .map(|hero| hero.centroid)
        .unwrap_or_else(|| bounds.center());
    println!("\n3. Zooming toward {:?}", focus);
    for scale in [0.1, 0.3, 0.7, 1.2] {
        let frame = engine.render(&hierarchy, &viewport_around(focus, scale))?;
        print_frame(&format!("    scale {scale:.1}"), &frame);
        loader.on_visible_changed(frame.visible_ids());
        settle(&mut loader, &clock).await;
    }

    // 4. Photo quality settles after the upgrade delay
    println!("\n4. Holding zoom at 2.5");
    let close = viewport_around(focus, 2.5);
    let first = engine.render(&hierarchy, &close)?;
    print_frame("    immediately", &first);
    clock.advance(config.quality.upgrade_delay_ms);
    let settled = engine.render(&hierarchy, &close)?;
    print_frame("    after upgrade delay", &settled);
    if let Some(node) = settled.nodes.iter().find(|n| n.has_rich_data) {
        let lines = node.label.as_ref().map(|l| l.lines.join(" / ")).unwrap_or_default();
        println!("    {} reads \"{}\"", node.id, lines);
    }

    // 5. Live structural change
    println!("\n5. A new hire joins team-0-0");
    loader.on_change_event(ChangeEvent::Insert {
        record: StructureRecord::child("new-hire", "team-0-0", 99),
    });
    settle(&mut loader, &clock).await;
    let size = hierarchy
        .read(|s| s.node_count())
        .unwrap_or_default();
    println!("    hierarchy now holds {size} nodes");

    loader.shutdown()?;
    engine.teardown();

    // 6. A second session starts from the cache
    println!("\n6. Second session");
    let mut second = new_loader(SharedHierarchy::new());
    let outcome = second.load().await?;
    let origin = match outcome.origin {
        StructureOrigin::Cache => "the local cache",
        StructureOrigin::Remote => "the remote source",
        StructureOrigin::LastKnownGood => "a stale cache entry",
    };
    println!("    {} nodes from {origin}", outcome.node_count);
    second.shutdown()?;

    println!("\nLoader stats: {:?}", loader.stats());
    Ok(())
}
