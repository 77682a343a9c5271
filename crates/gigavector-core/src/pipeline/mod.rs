//! Multi-stage phased ranking pipeline.
//!
//! A pipeline is an ordered list of up to eight phases: one initial ANN
//! retrieval followed by rerank and filter stages, each truncating the
//! candidate list to its `output_k`. Per-phase input/output counts and
//! wall-clock latency are recorded on every execution.
//!
//! # Module Organization
//!
//! - `expr`: pest-parsed filter/rerank expressions
//! - `mmr`: maximal marginal relevance reranking

mod expr;
mod mmr;

#[cfg(test)]
mod pipeline_tests;

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::distance::DistanceKind;
use crate::error::{Error, Result};
use crate::index::{check_metric, PrimaryIndex, VectorIndex};
use crate::store::{RowId, SharedStore};
use expr::Expr;

/// Maximum number of phases in one pipeline.
pub const MAX_PHASES: usize = 8;

/// User-supplied score transformation. Must be total: it cannot signal
/// errors, and it is always invoked without any engine lock held.
pub type ScoreCallback = Arc<dyn Fn(RowId, f32) -> f32 + Send + Sync>;

/// One phase of a ranking pipeline.
#[derive(Clone)]
pub enum PhaseKind {
    /// Initial ANN retrieval against the primary index.
    Ann {
        /// Distance metric for the retrieval call.
        distance: DistanceKind,
    },
    /// Re-score candidates with an arithmetic/boolean expression over
    /// `_score` and metadata projections; sort descending.
    RerankExpr {
        /// Expression source, parsed when the pipeline is built.
        expr: String,
    },
    /// Maximal marginal relevance diversification.
    RerankMmr {
        /// Relevance/diversity balance in `[0, 1]`.
        lambda: f32,
    },
    /// Map candidate scores through a user callback; sort descending.
    RerankCallback {
        /// The callback.
        callback: ScoreCallback,
    },
    /// Drop candidates whose metadata fails a predicate. Order-preserving.
    Filter {
        /// Predicate expression source.
        expr: String,
    },
}

impl fmt::Debug for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ann { distance } => f.debug_struct("Ann").field("distance", distance).finish(),
            Self::RerankExpr { expr } => {
                f.debug_struct("RerankExpr").field("expr", expr).finish()
            }
            Self::RerankMmr { lambda } => {
                f.debug_struct("RerankMmr").field("lambda", lambda).finish()
            }
            Self::RerankCallback { .. } => f.write_str("RerankCallback"),
            Self::Filter { expr } => f.debug_struct("Filter").field("expr", expr).finish(),
        }
    }
}

/// A phase plus its output truncation size.
#[derive(Debug, Clone)]
pub struct PhaseConfig {
    /// What the phase does.
    pub kind: PhaseKind,
    /// Candidate list size after this phase.
    pub output_k: usize,
}

/// A candidate flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Store row id.
    pub row: RowId,
    /// Current score: the ANN distance after phase 0, then whatever the
    /// latest rerank produced.
    pub score: f32,
    /// Index of the last phase this candidate passed through.
    pub phase_reached: usize,
}

/// Per-phase execution record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseStats {
    /// Candidates entering the phase.
    pub input_count: usize,
    /// Candidates surviving the phase.
    pub output_count: usize,
    /// Wall-clock duration of the phase in milliseconds.
    pub elapsed_ms: f64,
}

enum CompiledPhase {
    Ann { distance: DistanceKind },
    RerankExpr { expr: Expr },
    RerankMmr { lambda: f32 },
    RerankCallback { callback: ScoreCallback },
    Filter { expr: Expr },
}

/// A validated, compiled pipeline.
///
/// `execute` serializes concurrent executions behind the pipeline's own
/// mutex; calls into the index and store take their locks independently,
/// and no engine lock is ever held across the user callback.
pub struct RankingPipeline {
    phases: Vec<(PhaseConfig, CompiledPhase)>,
    exec: Mutex<()>,
    last_stats: Mutex<Vec<PhaseStats>>,
}

impl RankingPipeline {
    /// Validates and compiles a phase list.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the list is empty, longer than
    /// [`MAX_PHASES`], does not start with an ANN phase, has an ANN phase
    /// elsewhere, a zero `output_k`, or an MMR lambda outside `[0, 1]`;
    /// `Expr` when an expression fails to parse.
    pub fn new(phases: Vec<PhaseConfig>) -> Result<Self> {
        if phases.is_empty() {
            return Err(Error::InvalidArgument("pipeline has no phases".into()));
        }
        if phases.len() > MAX_PHASES {
            return Err(Error::InvalidArgument(format!(
                "pipeline has {} phases, the maximum is {MAX_PHASES}",
                phases.len()
            )));
        }
        if !matches!(phases[0].kind, PhaseKind::Ann { .. }) {
            return Err(Error::InvalidArgument(
                "the first phase must be ANN retrieval".into(),
            ));
        }

        let mut compiled = Vec::with_capacity(phases.len());
        for (i, phase) in phases.into_iter().enumerate() {
            if phase.output_k == 0 {
                return Err(Error::InvalidArgument(format!(
                    "phase {i} has output_k of zero"
                )));
            }
            let stage = match &phase.kind {
                PhaseKind::Ann { distance } => {
                    if i != 0 {
                        return Err(Error::InvalidArgument(
                            "ANN is only valid as the first phase".into(),
                        ));
                    }
                    CompiledPhase::Ann {
                        distance: *distance,
                    }
                }
                PhaseKind::RerankExpr { expr } => CompiledPhase::RerankExpr {
                    expr: Expr::parse(expr)?,
                },
                PhaseKind::RerankMmr { lambda } => {
                    if !(0.0..=1.0).contains(lambda) {
                        return Err(Error::InvalidArgument(format!(
                            "phase {i} lambda {lambda} is outside [0, 1]"
                        )));
                    }
                    CompiledPhase::RerankMmr { lambda: *lambda }
                }
                PhaseKind::RerankCallback { callback } => CompiledPhase::RerankCallback {
                    callback: Arc::clone(callback),
                },
                PhaseKind::Filter { expr } => CompiledPhase::Filter {
                    expr: Expr::parse(expr)?,
                },
            };
            compiled.push((phase, stage));
        }
        Ok(Self {
            phases: compiled,
            exec: Mutex::new(()),
            last_stats: Mutex::new(Vec::new()),
        })
    }

    /// Number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns true if the pipeline has no phases (never the case for a
    /// successfully constructed pipeline).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Stats recorded by the most recent execution.
    #[must_use]
    pub fn last_stats(&self) -> Vec<PhaseStats> {
        self.last_stats.lock().clone()
    }

    /// Runs every phase in order and returns the surviving candidates.
    ///
    /// The index lock is only held during the ANN phase; later phases
    /// take the store lock as needed, and the user callback always runs
    /// with no engine lock held.
    pub fn execute(
        &self,
        index: &RwLock<PrimaryIndex>,
        store: &SharedStore,
        query: &[f32],
    ) -> Result<Vec<Candidate>> {
        let _guard = self.exec.lock();
        let mut stats = Vec::with_capacity(self.phases.len());
        let mut candidates: Vec<Candidate> = Vec::new();

        for (i, (config, stage)) in self.phases.iter().enumerate() {
            let started = Instant::now();
            let input_count = candidates.len();

            match stage {
                CompiledPhase::Ann { distance } => {
                    let index = index.read();
                    check_metric(&index, *distance)?;
                    let hits = match &*index {
                        PrimaryIndex::Flat(flat) => {
                            flat.search_with(query, config.output_k, *distance, None)?
                        }
                        other => other.search(query, config.output_k)?,
                    };
                    candidates = hits
                        .into_iter()
                        .map(|(row, score)| Candidate {
                            row,
                            score,
                            phase_reached: 0,
                        })
                        .collect();
                }
                CompiledPhase::RerankExpr { expr } => {
                    {
                        let store = store.read();
                        for candidate in &mut candidates {
                            let metadata = store.metadata(candidate.row).ok().flatten();
                            candidate.score =
                                expr.eval(candidate.score, metadata).as_number() as f32;
                        }
                    }
                    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
                    candidates.truncate(config.output_k);
                }
                CompiledPhase::RerankMmr { lambda } => {
                    let rows: Vec<RowId> = candidates.iter().map(|c| c.row).collect();
                    let picked = {
                        let store = store.read();
                        mmr::rerank(&store, query, &rows, *lambda, config.output_k)
                    };
                    candidates = picked
                        .into_iter()
                        .map(|(row, score)| Candidate {
                            row,
                            score,
                            phase_reached: i,
                        })
                        .collect();
                }
                CompiledPhase::RerankCallback { callback } => {
                    // No engine lock is held while user code runs.
                    for candidate in &mut candidates {
                        candidate.score = (callback.as_ref())(candidate.row, candidate.score);
                    }
                    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
                    candidates.truncate(config.output_k);
                }
                CompiledPhase::Filter { expr } => {
                    let store = store.read();
                    candidates.retain(|candidate| {
                        let metadata = store.metadata(candidate.row).ok().flatten();
                        expr.eval(candidate.score, metadata).is_truthy()
                    });
                    candidates.truncate(config.output_k);
                }
            }
            for candidate in &mut candidates {
                candidate.phase_reached = i;
            }

            let elapsed_ms = started.elapsed().as_secs_f64() * 1e3;
            stats.push(PhaseStats {
                input_count,
                output_count: candidates.len(),
                elapsed_ms,
            });
            tracing::debug!(
                phase = i,
                input = input_count,
                output = candidates.len(),
                elapsed_ms,
                "pipeline phase done"
            );
        }

        *self.last_stats.lock() = stats;
        Ok(candidates)
    }
}
