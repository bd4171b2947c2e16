//! Runs probe, cleanup and migration over every configured cluster entry.
//!
//! Entries are processed one after another. Whatever happens to one entry is
//! captured in its [`PairReport`]; the next entry always runs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::cleaner::Cleaner;
use super::client::ClientFactory;
use super::engine::MigrationEngine;
use super::prober::Prober;
use super::{ClusterEntry, Direction, MigrationError, MigrationPair, MigrationResult};

/// What happened to the destination flush of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupStatus {
    /// Cleanup was not requested, or the entry was skipped first
    NotRequested,
    /// Destination was flushed
    Completed,
    /// Flush failed; migration went ahead anyway
    Failed(String),
}

/// Final state of one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PairOutcome {
    /// An endpoint was unreachable; nothing was touched
    Skipped {
        /// Which endpoint failed the probe
        reason: String,
    },
    /// The migration could not start
    Failed {
        /// Error that stopped the entry
        error: String,
    },
    /// The migration ran, possibly with key or scan failures
    Migrated(MigrationResult),
}

/// Report for one configured entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairReport {
    /// 1-based position in the configuration
    pub index: usize,
    /// Source and destination used
    pub pair: MigrationPair,
    /// Destination flush status
    pub cleanup: CleanupStatus,
    /// Result of the entry
    pub outcome: PairOutcome,
}

impl PairReport {
    /// Migration result, if the entry got that far.
    pub fn result(&self) -> Option<&MigrationResult> {
        match &self.outcome {
            PairOutcome::Migrated(result) => Some(result),
            _ => None,
        }
    }

    /// Whether the entry migrated every key without error.
    pub fn succeeded(&self) -> bool {
        self.result().is_some_and(MigrationResult::is_complete)
            && !matches!(self.cleanup, CleanupStatus::Failed(_))
    }
}

/// Report for a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Identifier attached to every log line of the run
    pub run_id: Uuid,
    /// Cluster traffic was switched to
    pub direction: Direction,
    /// One report per configured entry, in order
    pub pairs: Vec<PairReport>,
}

impl RunReport {
    /// Keys migrated across all entries.
    pub fn migrated_keys(&self) -> u64 {
        self.pairs
            .iter()
            .filter_map(PairReport::result)
            .map(|r| r.migrated_count)
            .sum()
    }

    /// Keys that failed across all entries.
    pub fn failed_keys(&self) -> usize {
        self.pairs
            .iter()
            .filter_map(PairReport::result)
            .map(MigrationResult::failed_count)
            .sum()
    }

    /// Entries skipped because an endpoint was unreachable.
    pub fn skipped(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Skipped { .. }))
            .count()
    }

    /// Whether every entry succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.pairs.iter().all(PairReport::succeeded)
    }
}

/// Drives prober, cleaner and engine over a list of entries.
#[derive(Clone)]
pub struct Orchestrator {
    prober: Prober,
    cleaner: Cleaner,
    engine: MigrationEngine,
}

impl Orchestrator {
    /// Create an orchestrator whose components share `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            prober: Prober::new(Arc::clone(&factory)),
            cleaner: Cleaner::new(Arc::clone(&factory)),
            engine: MigrationEngine::new(factory),
        }
    }

    /// Migrate every entry in `entries` in the given direction, flushing each
    /// destination first when `cleanup` is set.
    pub async fn run(
        &self,
        entries: &[ClusterEntry],
        direction: Direction,
        cleanup: bool,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        info!(%run_id, %direction, entries = entries.len(), cleanup, "starting run");

        let mut pairs = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let index = i + 1;
            let pair = direction.select(entry);
            let span = info_span!(
                "migration",
                %run_id,
                index,
                source = %pair.source,
                destination = %pair.destination
            );
            let report = self.run_pair(index, pair, cleanup).instrument(span).await;
            pairs.push(report);
        }

        let report = RunReport {
            run_id,
            direction,
            pairs,
        };
        info!(
            %run_id,
            migrated = report.migrated_keys(),
            failed = report.failed_keys(),
            skipped = report.skipped(),
            "run finished"
        );
        report
    }

    /// Process one entry. Never fails; every error ends up in the report.
    pub async fn run_pair(&self, index: usize, pair: MigrationPair, cleanup: bool) -> PairReport {
        info!("migration {}: {}", index, pair);

        let mut report = PairReport {
            index,
            pair,
            cleanup: CleanupStatus::NotRequested,
            outcome: PairOutcome::Skipped {
                reason: String::new(),
            },
        };

        if let Some(reason) = self.unreachable_endpoint(&report.pair).await {
            warn!("skipping migration {}: {}", index, reason);
            report.outcome = PairOutcome::Skipped { reason };
            return report;
        }

        if cleanup {
            report.cleanup = match self.cleaner.cleanup(&report.pair.destination).await {
                Ok(()) => CleanupStatus::Completed,
                Err(e) => CleanupStatus::Failed(e.to_string()),
            };
        }

        report.outcome = match self
            .engine
            .migrate(index, &report.pair.source, &report.pair.destination)
            .await
        {
            Ok(result) => PairOutcome::Migrated(result),
            Err(e) => {
                warn!(error = %e, "error during migration {}", index);
                e.into()
            }
        };
        report
    }

    /// Probe the source, then the destination; describe the first one that
    /// does not answer.
    async fn unreachable_endpoint(&self, pair: &MigrationPair) -> Option<String> {
        for (role, endpoint) in [("source", &pair.source), ("destination", &pair.destination)] {
            if !self.prober.can_connect(endpoint).await {
                return Some(format!("{} {} unreachable", role, endpoint));
            }
        }
        None
    }
}

impl From<MigrationError> for PairOutcome {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::Unreachable { .. } => PairOutcome::Skipped {
                reason: e.to_string(),
            },
            other => PairOutcome::Failed {
                error: other.to_string(),
            },
        }
    }
}
