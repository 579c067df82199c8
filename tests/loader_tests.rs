//! Progressive loader sessions against in-memory collaborators

use std::sync::Arc;

use cim_hierarchy_view::{
    infrastructure::{FailureMode, InMemoryLocalCache, StaticEnrichmentSource, StaticStructureSource},
    loading::{
        CachedStructure, CompletionOutcome, LoaderConfig, StructureOrigin, STRUCTURE_CACHE_KEY,
    },
    performance::SpatialIndexConfig,
    ChangeEvent, Clock, EnrichmentRecord, LayeredTreeLayout, LoadError, LoadPhase, LocalCache,
    ManualClock, NodeId, ProgressiveLoader, RichData, SharedHierarchy, StructureRecord,
};
use tokio_test::assert_ok;

fn structure(count: usize) -> Vec<StructureRecord> {
    let mut records = vec![StructureRecord::root("root")];
    for i in 1..count {
        let parent = if i < 6 { "root".to_string() } else { format!("n{}", i % 5 + 1) };
        records.push(StructureRecord::child(format!("n{i}").as_str(), parent.as_str(), i as i64));
    }
    records
}

fn ids(names: &[&str]) -> Vec<NodeId> {
    names.iter().map(|&n| NodeId::from(n)).collect()
}

struct Session {
    loader: ProgressiveLoader,
    clock: Arc<ManualClock>,
    structure: Arc<StaticStructureSource>,
    enrichment: Arc<StaticEnrichmentSource>,
    cache: Arc<InMemoryLocalCache>,
}

fn session_with(records: Vec<StructureRecord>, cache: Arc<InMemoryLocalCache>) -> Session {
    let clock = Arc::new(ManualClock::new(0));
    let all_ids: Vec<NodeId> = records.iter().map(|r| r.id.clone()).collect();
    let structure = Arc::new(StaticStructureSource::new(records));
    let enrichment = Arc::new(StaticEnrichmentSource::generated(&all_ids));
    let loader = ProgressiveLoader::new(
        LoaderConfig::default(),
        clock.clone(),
        structure.clone(),
        enrichment.clone(),
        cache.clone(),
        Arc::new(LayeredTreeLayout::default()),
        SpatialIndexConfig::default(),
        SharedHierarchy::new(),
    );
    Session {
        loader,
        clock,
        structure,
        enrichment,
        cache,
    }
}

fn session(count: usize) -> Session {
    session_with(structure(count), Arc::new(InMemoryLocalCache::new()))
}

fn name_of(loader: &ProgressiveLoader, id: &str) -> Option<String> {
    loader
        .hierarchy()
        .read(|s| s.store().node(&id.into()).and_then(|n| n.rich.name.clone()))
        .flatten()
}

#[tokio::test]
async fn test_remote_load_then_cache_hit() {
    let mut first = session(30);
    let outcome = assert_ok!(first.loader.load().await);
    assert_eq!(outcome.origin, StructureOrigin::Remote);
    assert_eq!(outcome.node_count, 30);
    assert_eq!(first.loader.phase(), LoadPhase::StructureReady);
    assert!(first.cache.contains(STRUCTURE_CACHE_KEY).await);

    let mut second = session_with(structure(30), first.cache.clone());
    let outcome = assert_ok!(second.loader.load().await);
    assert_eq!(outcome.origin, StructureOrigin::Cache);
    assert_eq!(second.structure.fetch_count(), 0);
}

#[tokio::test]
async fn test_undersized_cache_is_refetched() {
    let cache = Arc::new(InMemoryLocalCache::new());
    let small = CachedStructure::new("structure-v1", structure(5));
    cache.set(STRUCTURE_CACHE_KEY, small.to_json().unwrap()).await.unwrap();

    let mut session = session_with(structure(30), cache);
    let outcome = assert_ok!(session.loader.load().await);
    assert_eq!(outcome.origin, StructureOrigin::Remote);
    assert_eq!(outcome.node_count, 30);
}

#[tokio::test]
async fn test_stale_schema_cache_is_replaced_from_remote() {
    let cache = Arc::new(InMemoryLocalCache::new());
    let stale = CachedStructure::new("structure-v0", structure(40));
    cache.set(STRUCTURE_CACHE_KEY, stale.to_json().unwrap()).await.unwrap();

    let mut session = session_with(structure(30), cache);
    let outcome = assert_ok!(session.loader.load().await);
    assert_eq!(outcome.origin, StructureOrigin::Remote);
    assert_eq!(outcome.node_count, 30);
    assert_eq!(session.structure.fetch_count(), 1);
    assert_eq!(session.loader.stats().cache_hits, 0);

    let json = session.cache.get(STRUCTURE_CACHE_KEY).await.unwrap().unwrap();
    let stored = CachedStructure::from_json(&json).unwrap();
    assert_eq!(stored.schema_version, "structure-v1");
    assert_eq!(stored.records.len(), 30);
}

#[tokio::test]
async fn test_fetch_failure_falls_back_to_stale_cache() {
    let cache = Arc::new(InMemoryLocalCache::new());
    let stale = CachedStructure::new("structure-v0", structure(12));
    cache.set(STRUCTURE_CACHE_KEY, stale.to_json().unwrap()).await.unwrap();

    let mut session = session_with(structure(30), cache);
    session.structure.set_failure(FailureMode::Unreachable).await;

    let outcome = assert_ok!(session.loader.load().await);
    assert_eq!(outcome.origin, StructureOrigin::LastKnownGood);
    assert_eq!(outcome.node_count, 12);
    assert_eq!(session.loader.stats().fallbacks, 1);
}

#[tokio::test]
async fn test_fetch_failure_without_cache_surfaces_error() {
    let mut session = session(30);
    session.structure.set_failure(FailureMode::ServerError(503)).await;

    let error = session.loader.load().await.unwrap_err();
    assert!(matches!(error, LoadError::Server { status: 503, .. }));
    assert!(error.is_transient());
    assert_eq!(session.loader.phase(), LoadPhase::Idle);
    assert!(!session.loader.hierarchy().is_ready());
}

#[tokio::test]
async fn test_enrichment_burst_merges_once() {
    let mut session = session(30);
    session.loader.load().await.unwrap();
    let versions = session.loader.hierarchy().subscribe();

    session.loader.on_visible_changed(ids(&["n1", "n2", "n3"]));
    session.clock.advance(299);
    assert!(session.loader.tick().await.enrichment.is_none());

    session.clock.advance(1);
    let report = session.loader.tick().await;
    assert_eq!(report.enrichment, Some(CompletionOutcome::Accepted { records: 3 }));
    assert!(report.flushed.is_none());
    assert_eq!(session.loader.pending_enrichment(), 3);
    assert_eq!(session.loader.hierarchy().version().enrichment, 0);

    session.clock.advance(150);
    let report = session.loader.tick().await;
    let merge = report.flushed.unwrap();
    assert_eq!(merge.applied, 3);
    assert_eq!(session.loader.hierarchy().version().enrichment, 1);
    assert_eq!(versions.borrow().enrichment, 1);
    assert_eq!(name_of(&session.loader, "n2").as_deref(), Some("Member n2"));
    assert_eq!(session.loader.phase(), LoadPhase::Enriching);
}

#[tokio::test]
async fn test_stale_enrichment_is_discarded() {
    let mut session = session(30);
    session.loader.load().await.unwrap();

    session.loader.on_visible_changed(ids(&["n1", "n2"]));
    let v1 = session.loader.issue_enrichment().unwrap();
    session.loader.on_visible_changed(ids(&["n2", "n3"]));
    let v2 = session.loader.issue_enrichment().unwrap();
    assert!(v2.ticket > v1.ticket);

    let v2_result = session.loader.fetch_enrichment(&v2).await;
    assert_eq!(
        session.loader.complete_enrichment(v2.ticket, v2_result),
        CompletionOutcome::Accepted { records: 2 }
    );

    // V1 resolves late with older data for n2
    let late = vec![EnrichmentRecord::new(
        "n2",
        RichData {
            name: Some("stale".into()),
            ..Default::default()
        },
    )];
    assert_eq!(
        session.loader.complete_enrichment(v1.ticket, Ok(late)),
        CompletionOutcome::Stale
    );

    session.loader.flush_enrichment().unwrap();
    assert_eq!(name_of(&session.loader, "n2").as_deref(), Some("Member n2"));
    assert_eq!(name_of(&session.loader, "n1"), None);
    assert_eq!(session.loader.stats().stale_discarded, 1);
}

#[tokio::test]
async fn test_failed_flush_keeps_batch_for_retry() {
    let mut session = session(30);
    session.loader.load().await.unwrap();
    session.loader.on_visible_changed(ids(&["n4", "n5"]));
    session.loader.enrich_visible().await.unwrap();
    assert_eq!(session.loader.pending_enrichment(), 2);

    // The node set is gone: the merge cannot land
    session.loader.hierarchy().clear();
    assert!(matches!(session.loader.flush_enrichment(), Err(LoadError::Flush(_))));
    assert_eq!(session.loader.pending_enrichment(), 2);

    // Structure comes back from cache and the retry succeeds
    session.loader.load().await.unwrap();
    let merge = session.loader.flush_enrichment().unwrap().unwrap();
    assert_eq!(merge.applied, 2);
    assert_eq!(session.loader.pending_enrichment(), 0);
}

#[tokio::test]
async fn test_continuous_updates_flush_at_max_wait() {
    let mut session = session(30);
    session.loader.load().await.unwrap();

    let mut first_flush = None;
    for step in 0..15u64 {
        session.loader.on_change_event(ChangeEvent::Update {
            record: EnrichmentRecord::new(
                format!("n{}", step % 20 + 1).as_str(),
                RichData {
                    biography: Some(format!("update {step}")),
                    ..Default::default()
                },
            ),
        });
        session.clock.advance(100);
        if session.loader.tick().await.flushed.is_some() && first_flush.is_none() {
            first_flush = Some(session.clock.now_ms());
        }
    }
    assert_eq!(first_flush, Some(1000));
}

#[tokio::test]
async fn test_structural_change_rebuilds_and_keeps_rich_data() {
    let mut session = session(30);
    session.loader.load().await.unwrap();
    session.loader.on_visible_changed(ids(&["n1"]));
    session.loader.enrich_visible().await.unwrap();
    session.loader.flush_enrichment().unwrap();
    let before = session.loader.hierarchy().hash();

    session.loader.on_change_event(ChangeEvent::Insert {
        record: StructureRecord::child("n-new", "n1", 99),
    });
    session.loader.on_change_event(ChangeEvent::Reparent {
        id: "n7".into(),
        parent_id: "n-new".into(),
        order: 0,
    });
    assert_eq!(session.loader.pending_changes(), 2);

    session.clock.advance(300);
    let report = session.loader.tick().await;
    assert!(report.structure_rebuilt);
    assert_ne!(session.loader.hierarchy().hash(), before);
    assert_eq!(session.loader.layout_computations(), 2);
    assert_eq!(name_of(&session.loader, "n1").as_deref(), Some("Member n1"));

    let parent_of_n7 = session
        .loader
        .hierarchy()
        .read(|s| s.store().node(&"n7".into()).and_then(|n| n.parent_id.clone()))
        .flatten();
    assert_eq!(parent_of_n7, Some(NodeId::from("n-new")));
}

#[tokio::test]
async fn test_large_visible_set_is_chunked() {
    let mut session = session(260);
    session.loader.load().await.unwrap();

    let visible: Vec<NodeId> = (1..=250).map(|i| NodeId::from(format!("n{i}"))).collect();
    session.loader.on_visible_changed(visible);
    let request = session.loader.issue_enrichment().unwrap();
    assert_eq!(
        request.chunks.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![100, 100, 50]
    );

    let result = session.loader.fetch_enrichment(&request).await;
    assert_eq!(
        session.loader.complete_enrichment(request.ticket, result),
        CompletionOutcome::Accepted { records: 250 }
    );
    assert_eq!(session.enrichment.requests().await.len(), 3);
}

#[tokio::test]
async fn test_shutdown_flushes_pending_updates() {
    let mut session = session(30);
    session.loader.load().await.unwrap();
    session.loader.on_visible_changed(ids(&["n8", "n9"]));
    session.loader.enrich_visible().await.unwrap();

    let merge = session.loader.shutdown().unwrap().unwrap();
    assert_eq!(merge.applied, 2);
    assert_eq!(session.loader.phase(), LoadPhase::Idle);
    assert_eq!(session.loader.next_deadline(), None);
    assert_eq!(name_of(&session.loader, "n9").as_deref(), Some("Member n9"));
}
