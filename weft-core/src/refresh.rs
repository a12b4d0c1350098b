//! Build orchestration
//!
//! A refresh cycle drains the dirty set in rounds. Each round rebuilds the
//! dirty composites parent-first; composites created or changed by a rebuild
//! are built in the same round, while anything dirtied again after it was
//! built waits for the next round. The cycle ends when a round leaves the
//! dirty set empty, or fails once `max_rounds` is exceeded.

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::Utc;
use weft_types::ComponentId;

use crate::context::BuildContext;
use crate::element::Element;
use crate::error::{BuildError, CoreError, ErrorSource, Result};
use crate::reconcile::{reconcile, ReconcileOutcome};
use crate::store::BuildFailureInfo;
use crate::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Rounds one cycle may take before it is declared divergent.
    pub max_rounds: usize,
    pub error_log_capacity: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_rounds: 100,
            error_log_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Draining,
    Building,
    Reconciling,
}

/// Counters for one completed refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub rounds: usize,
    pub builds: usize,
    pub created: usize,
    pub destroyed: usize,
}

impl Tree {
    /// Run a refresh cycle until the dirty set stays empty.
    pub fn refresh(&mut self) -> Result<RefreshStats> {
        if self.phase != CyclePhase::Idle {
            return Err(CoreError::RefreshInProgress);
        }
        let result = self.run_rounds();
        self.phase = CyclePhase::Idle;
        result
    }

    fn run_rounds(&mut self) -> Result<RefreshStats> {
        let mut stats = RefreshStats::default();
        loop {
            self.dispatch_lifecycle();
            if self.dirty.is_empty() {
                return Ok(stats);
            }
            if stats.rounds == self.config.max_rounds {
                let pending: Vec<_> = self.dirty.iter().collect();
                tracing::error!(rounds = stats.rounds, ?pending, "refresh cycle did not converge");
                return Err(CoreError::RefreshDiverged {
                    rounds: stats.rounds,
                    pending,
                });
            }
            stats.rounds += 1;
            self.run_round(&mut stats)?;
        }
    }

    fn run_round(&mut self, stats: &mut RefreshStats) -> Result<()> {
        self.phase = CyclePhase::Draining;
        let mut composites = Vec::new();
        for id in self.dirty.drain() {
            let Ok(node) = self.store.get(id) else { continue };
            self.touched.insert(id);
            // primitives only need re-serializing
            if node.is_composite() {
                composites.push(id);
            }
        }
        composites.sort_by_cached_key(|id| self.store.depth(*id));

        let mut queue: VecDeque<ComponentId> = composites.into();
        let mut built = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !self.store.contains(id) || !built.insert(id) {
                continue;
            }
            let outcome = self.rebuild(id)?;
            stats.builds += 1;
            stats.created += outcome.created.len();
            stats.destroyed += outcome.destroyed.len();

            for new_id in outcome.created.iter().chain(&outcome.reused) {
                self.touched.insert(*new_id);
            }
            for new_id in &outcome.created {
                if self.store.get(*new_id)?.is_composite() {
                    queue.push_back(*new_id);
                }
            }
            for changed in &outcome.changed {
                if !self.store.get(*changed)?.is_composite() {
                    continue;
                }
                if built.contains(changed) {
                    self.dirty.mark_dirty(*changed);
                } else {
                    queue.push_back(*changed);
                }
            }
        }
        Ok(())
    }

    /// Build composite `id` and reconcile its output. A failing build is
    /// replaced by a placeholder and remembered on the build record.
    pub(crate) fn rebuild(&mut self, id: ComponentId) -> Result<ReconcileOutcome> {
        self.phase = CyclePhase::Building;
        let node = self.store.get(id)?;
        let class_name = node.class_name().to_string();
        let attrs = node.attrs().clone();

        let (built, writes, reads) = match self.registry.get(&class_name) {
            Ok(class) => {
                let mut ctx = BuildContext::new(id, &attrs, &self.attachments);
                let built = catch_unwind(AssertUnwindSafe(|| class.build(&mut ctx)))
                    .unwrap_or_else(|payload| Err(BuildError::from_panic(payload)));
                let (writes, reads) = ctx.finish();
                (built, writes, reads)
            }
            Err(err) => (Err(err.into()), Vec::new(), HashSet::new()),
        };
        if let Some(record) = self.store.record_mut(id) {
            record.attachment_reads = reads;
        }

        self.phase = CyclePhase::Reconciling;
        let failure = match built {
            Ok(element) => match reconcile(&mut self.store, &self.registry, id, element) {
                Ok(outcome) => {
                    if let Some(record) = self.store.record_mut(id) {
                        if record.failure.take().is_some() {
                            tracing::info!(component = %id, class = %class_name, "build recovered");
                        }
                        record.root = outcome.root;
                        record.builds += 1;
                    }
                    for (name, value) in writes {
                        self.set_attr(id, &name, value)?;
                    }
                    return Ok(outcome);
                }
                Err(err) if err.is_invalid_output() => {
                    tracing::error!(component = %id, class = %class_name, %err, "invalid build output");
                    BuildError::InvalidOutput(err.to_string())
                }
                Err(err) => return Err(err),
            },
            Err(err) => err,
        };

        let message = failure.to_string();
        self.errors.record(
            ErrorSource::Build,
            Some(id),
            format!("build of {class_name} failed: {message}"),
        );
        let placeholder = Element::build_failure(&class_name, &message);
        let outcome = reconcile(&mut self.store, &self.registry, id, placeholder)?;
        if let Some(record) = self.store.record_mut(id) {
            record.root = outcome.root;
            record.failure = Some(BuildFailureInfo {
                class: class_name,
                message,
                at: Utc::now(),
            });
        }
        Ok(outcome)
    }
}
