use super::{Candidate, PhaseConfig, PhaseKind, RankingPipeline};
use crate::config::EngineConfig;
use crate::distance::DistanceKind;
use crate::index::{IndexKind, PrimaryIndex, VectorIndex};
use crate::store::{SharedStore, VectorStore};

use parking_lot::RwLock;
use std::sync::Arc;

fn ann(output_k: usize, distance: DistanceKind) -> PhaseConfig {
    PhaseConfig {
        kind: PhaseKind::Ann { distance },
        output_k,
    }
}

fn setup() -> (SharedStore, RwLock<PrimaryIndex>) {
    let store: SharedStore = Arc::new(RwLock::new(VectorStore::new(4).unwrap()));
    // Eight rows on the unit sphere-ish; even rows are lang=en.
    for i in 0..8u64 {
        let angle = i as f32 * 0.2;
        let v = vec![angle.cos(), angle.sin(), 0.0, 0.0];
        let row = store.write().add(&v).unwrap();
        let lang = if i % 2 == 0 { "en" } else { "fr" };
        store.write().set_metadata(row, "lang", lang).unwrap();
        store
            .write()
            .set_metadata(row, "boost", &format!("{}", i))
            .unwrap();
    }
    let index = PrimaryIndex::build(
        IndexKind::Flat,
        Arc::clone(&store),
        DistanceKind::Cosine,
        &EngineConfig::default(),
    )
    .unwrap();
    (store, RwLock::new(index))
}

#[test]
fn test_validation_rejects_bad_pipelines() {
    assert!(RankingPipeline::new(vec![]).is_err());

    // First phase must be ANN.
    assert!(RankingPipeline::new(vec![PhaseConfig {
        kind: PhaseKind::Filter {
            expr: "lang = en".into()
        },
        output_k: 10,
    }])
    .is_err());

    // ANN only in first position.
    assert!(RankingPipeline::new(vec![
        ann(10, DistanceKind::Cosine),
        ann(5, DistanceKind::Cosine),
    ])
    .is_err());

    // Zero output_k.
    assert!(RankingPipeline::new(vec![ann(0, DistanceKind::Cosine)]).is_err());

    // Too many phases.
    let mut phases = vec![ann(10, DistanceKind::Cosine)];
    for _ in 0..8 {
        phases.push(PhaseConfig {
            kind: PhaseKind::Filter {
                expr: "lang = en".into(),
            },
            output_k: 10,
        });
    }
    assert!(RankingPipeline::new(phases).is_err());

    // Bad lambda.
    assert!(RankingPipeline::new(vec![
        ann(10, DistanceKind::Cosine),
        PhaseConfig {
            kind: PhaseKind::RerankMmr { lambda: 1.5 },
            output_k: 5,
        },
    ])
    .is_err());

    // Unparseable expression surfaces at build time.
    assert!(RankingPipeline::new(vec![
        ann(10, DistanceKind::Cosine),
        PhaseConfig {
            kind: PhaseKind::Filter {
                expr: "((broken".into(),
            },
            output_k: 5,
        },
    ])
    .is_err());
}

#[test]
fn test_ann_phase_materializes_candidates() {
    let (store, index) = setup();
    let pipeline = RankingPipeline::new(vec![ann(5, DistanceKind::Cosine)]).unwrap();
    let results = pipeline.execute(&index, &store, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].row, 0);
    assert!(results.iter().all(|c| c.phase_reached == 0));

    let stats = pipeline.last_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].input_count, 0);
    assert_eq!(stats[0].output_count, 5);
}

#[test]
fn test_filter_phase_drops_without_reordering() {
    let (store, index) = setup();
    let pipeline = RankingPipeline::new(vec![
        ann(8, DistanceKind::Cosine),
        PhaseConfig {
            kind: PhaseKind::Filter {
                expr: "lang = en".into(),
            },
            output_k: 8,
        },
    ])
    .unwrap();
    let results = pipeline.execute(&index, &store, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|c| c.row % 2 == 0));
    // Order preserved from the ANN phase (ascending cosine distance).
    for pair in results.windows(2) {
        assert!(pair[0].score <= pair[1].score);
    }
}

#[test]
fn test_rerank_expr_sorts_descending() {
    let (store, index) = setup();
    let pipeline = RankingPipeline::new(vec![
        ann(8, DistanceKind::Cosine),
        PhaseConfig {
            kind: PhaseKind::RerankExpr {
                expr: "boost * 10 - _score".into(),
            },
            output_k: 3,
        },
    ])
    .unwrap();
    let results = pipeline.execute(&index, &store, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(results.len(), 3);
    // Highest boost wins.
    assert_eq!(results[0].row, 7);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn test_rerank_callback_runs_without_errors() {
    let (store, index) = setup();
    let pipeline = RankingPipeline::new(vec![
        ann(8, DistanceKind::Cosine),
        PhaseConfig {
            kind: PhaseKind::RerankCallback {
                callback: Arc::new(|row, score| row as f32 * 100.0 - score),
            },
            output_k: 2,
        },
    ])
    .unwrap();
    let results = pipeline.execute(&index, &store, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].row, 7);
    assert_eq!(results[1].row, 6);
}

#[test]
fn test_full_pipeline_ann_filter_mmr() {
    let (store, index) = setup();
    let pipeline = RankingPipeline::new(vec![
        ann(8, DistanceKind::Cosine),
        PhaseConfig {
            kind: PhaseKind::Filter {
                expr: "lang = en".into(),
            },
            output_k: 8,
        },
        PhaseConfig {
            kind: PhaseKind::RerankMmr { lambda: 0.7 },
            output_k: 3,
        },
    ])
    .unwrap();
    let results = pipeline.execute(&index, &store, &[1.0, 0.0, 0.0, 0.0]).unwrap();

    assert!(results.len() <= 3);
    assert!(!results.is_empty());
    // Everything that survived the filter is lang=en.
    let store_guard = store.read();
    for Candidate { row, .. } in &results {
        let meta = store_guard.metadata(*row).unwrap().unwrap();
        assert_eq!(meta.get("lang").map(String::as_str), Some("en"));
    }
    assert!(results.iter().all(|c| c.phase_reached == 2));

    let stats = pipeline.last_stats();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats[1].input_count, 8);
    assert_eq!(stats[1].output_count, 4);
    assert_eq!(stats[2].output_count, results.len());
}

#[test]
fn test_metric_mismatch_rejected_for_non_flat_index() {
    let store: SharedStore = Arc::new(RwLock::new(VectorStore::new(4).unwrap()));
    let index = PrimaryIndex::build(
        IndexKind::Hnsw,
        Arc::clone(&store),
        DistanceKind::Cosine,
        &EngineConfig::default(),
    )
    .unwrap();
    for i in 0..4u64 {
        let v = vec![i as f32, 1.0, 0.0, 0.0];
        let row = store.write().add(&v).unwrap();
        index.insert(row, &v).unwrap();
    }
    let index = RwLock::new(index);
    let pipeline = RankingPipeline::new(vec![ann(2, DistanceKind::SquaredEuclidean)]).unwrap();
    assert!(pipeline
        .execute(&index, &store, &[1.0, 0.0, 0.0, 0.0])
        .unwrap_err()
        .code()
        .eq("GV-001"));
}
