//! Pipeline execution engine.
//!
//! `Executor` is the central scheduler of one run:
//! 1. Walks the validated graph in topological order and finds every pending
//!    step whose predecessors are final and whose required input slots are
//!    populated.
//! 2. Dispatches all ready steps concurrently on a `JoinSet`.
//! 3. Handles completions one at a time, in completion order: patches are
//!    merged into the state container, failures are recorded.
//! 4. Skips (never dispatches) steps whose upstream failed or was skipped.
//!    In-flight steps are never cancelled.
//! 5. Stops once nothing is ready and nothing is in flight.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use steps::{Patch, StepError};

use crate::dag::GraphDefinition;
use crate::models::{Criticality, StepFailure, StepReport, StepStatus};
use crate::state::State;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens to steps that have not started yet once a required step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltPolicy {
    /// Only transitive dependents of the failed step are skipped; unrelated
    /// branches keep being dispatched.
    #[default]
    Dependents,
    /// Every step not yet dispatched is skipped. In-flight steps still finish.
    All,
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Timeout applied to steps whose descriptor sets none. `None` waits
    /// indefinitely.
    pub step_timeout: Option<Duration>,
    pub halt_policy: HaltPolicy,
}

// ---------------------------------------------------------------------------
// Output of a run
// ---------------------------------------------------------------------------

/// Terminal state of one run plus the per-step reports.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: State,
    /// One report per step, in topological order.
    pub reports: Vec<StepReport>,
}

impl RunOutcome {
    /// The first required-step failure, if any.
    pub fn terminal_error(&self) -> Option<&StepFailure> {
        self.state.error()
    }

    pub fn report(&self, step: &str) -> Option<&StepReport> {
        self.reports.iter().find(|r| r.step == step)
    }

    pub fn status(&self, step: &str) -> Option<StepStatus> {
        self.report(step).map(|r| r.status)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

type TaskOutput = (usize, Result<Patch, StepError>);

enum Readiness {
    Ready,
    Wait,
    Skip(String),
    /// Every producer completed yet a required input is empty.
    Broken(String),
}

/// Per-run bookkeeping; dropped when the run ends.
struct RunTracker {
    state: State,
    reports: Vec<StepReport>,
    started: Vec<Option<Instant>>,
}

impl RunTracker {
    fn new(graph: &GraphDefinition, state: State) -> Self {
        let reports = (0..graph.len())
            .map(|i| {
                let d = &graph.node(i).descriptor;
                StepReport::pending(d.name.clone(), d.criticality)
            })
            .collect();
        Self {
            state,
            reports,
            started: vec![None; graph.len()],
        }
    }

    fn status(&self, i: usize) -> StepStatus {
        self.reports[i].status
    }

    fn skip(&mut self, i: usize, reason: String) {
        debug!(step = %self.reports[i].step, %reason, "step skipped");
        let report = &mut self.reports[i];
        report.status = StepStatus::Skipped;
        report.finished_at = Some(Utc::now());
        report.message = Some(reason);
    }

    fn finish(&mut self, i: usize, status: StepStatus, message: Option<String>) -> u64 {
        let elapsed_ms = self.started[i]
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or_default();
        let report = &mut self.reports[i];
        report.status = status;
        report.finished_at = Some(Utc::now());
        report.elapsed_ms = Some(elapsed_ms);
        report.message = message;
        elapsed_ms
    }
}

/// Stateless scheduler; one instance can drive any number of concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `graph` to completion against `initial`.
    ///
    /// Step failures are not errors of this function: they end up in the
    /// returned state's error slot (required steps) or in the step reports
    /// (best-effort steps).
    ///
    /// # Errors
    /// [`EngineError::InternalInvariantViolation`] if a step writes a slot it
    /// did not declare or one that is already populated, if a required step
    /// finds a required input empty once its upstream completed, or if the
    /// run ends with steps that never reached a final status.
    #[instrument(skip_all, fields(steps = graph.len()))]
    pub async fn run(&self, graph: &GraphDefinition, initial: State) -> Result<RunOutcome, EngineError> {
        let mut run = RunTracker::new(graph, initial);
        let mut in_flight: JoinSet<TaskOutput> = JoinSet::new();

        loop {
            self.advance(graph, &mut run, &mut in_flight)?;

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (i, result) = joined.map_err(|e| {
                EngineError::InternalInvariantViolation(format!("step task was lost: {e}"))
            })?;
            self.complete(graph, &mut run, i, result)?;
        }

        if let Some(stuck) = run.reports.iter().find(|r| !r.status.is_final()) {
            return Err(EngineError::InternalInvariantViolation(format!(
                "run ended with step '{}' still {}",
                stuck.step, stuck.status
            )));
        }

        let count = |s: StepStatus| run.reports.iter().filter(|r| r.status == s).count();
        info!(
            completed = count(StepStatus::Completed),
            failed = count(StepStatus::Failed),
            skipped = count(StepStatus::Skipped),
            failed_run = run.state.is_failed(),
            "pipeline run finished"
        );

        let RunTracker { state, reports, .. } = run;
        let reports = graph
            .order()
            .iter()
            .map(|&i| reports[i].clone())
            .collect();
        Ok(RunOutcome { state, reports })
    }

    // -----------------------------------------------------------------------
    // Internal: skip what can never run, dispatch what is ready.
    // -----------------------------------------------------------------------

    fn advance(
        &self,
        graph: &GraphDefinition,
        run: &mut RunTracker,
        in_flight: &mut JoinSet<TaskOutput>,
    ) -> Result<(), EngineError> {
        let halted = self.config.halt_policy == HaltPolicy::All && run.state.is_failed();

        // Topological order lets a skip cascade to every dependent in one pass.
        for &i in graph.order() {
            if run.status(i) != StepStatus::Pending {
                continue;
            }
            if halted {
                run.skip(i, "run halted after a required step failed".to_owned());
                continue;
            }
            match Self::readiness(graph, run, i) {
                Readiness::Wait => {}
                Readiness::Skip(reason) => run.skip(i, reason),
                Readiness::Ready => self.dispatch(graph, run, i, in_flight),
                Readiness::Broken(reason) => {
                    return Err(EngineError::InternalInvariantViolation(reason));
                }
            }
        }
        Ok(())
    }

    fn readiness(graph: &GraphDefinition, run: &RunTracker, i: usize) -> Readiness {
        let mut waiting = false;

        for &p in graph.hard_preds(i) {
            match run.status(p) {
                StepStatus::Completed => {}
                status @ (StepStatus::Failed | StepStatus::Skipped) => {
                    return Readiness::Skip(format!(
                        "upstream step '{}' {}",
                        graph.name(p),
                        status
                    ));
                }
                StepStatus::Pending | StepStatus::Running => waiting = true,
            }
        }
        if waiting || graph.soft_preds(i).iter().any(|&p| !run.status(p).is_final()) {
            return Readiness::Wait;
        }

        let descriptor = &graph.node(i).descriptor;
        if let Some(missing) = descriptor.inputs.iter().find(|s| !run.state.contains(s)) {
            // Hard predecessors all completed, so a producer skipped its write.
            return match descriptor.criticality {
                Criticality::Required => Readiness::Broken(format!(
                    "required step '{}' found input slot '{missing}' empty though every upstream step completed",
                    descriptor.name
                )),
                Criticality::BestEffort => {
                    Readiness::Skip(format!("input slot '{missing}' was never populated"))
                }
            };
        }
        Readiness::Ready
    }

    fn dispatch(
        &self,
        graph: &GraphDefinition,
        run: &mut RunTracker,
        i: usize,
        in_flight: &mut JoinSet<TaskOutput>,
    ) {
        let node = graph.node(i);
        let snapshot = run.state.snapshot_for(&node.descriptor);
        let step = node.step.clone();
        let timeout = node.descriptor.timeout.or(self.config.step_timeout);

        debug!(step = %node.descriptor.name, "dispatching step");
        run.started[i] = Some(Instant::now());
        let report = &mut run.reports[i];
        report.status = StepStatus::Running;
        report.started_at = Some(Utc::now());

        in_flight.spawn(async move {
            let guarded = AssertUnwindSafe(step.run(&snapshot)).catch_unwind();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(outcome) => outcome,
                    Err(_) => return (i, Err(StepError::Timeout(limit))),
                },
                None => guarded.await,
            };
            let result = outcome.unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic))));
            (i, result)
        });
    }

    // -----------------------------------------------------------------------
    // Internal: fold one finished step back into the run.
    // -----------------------------------------------------------------------

    fn complete(
        &self,
        graph: &GraphDefinition,
        run: &mut RunTracker,
        i: usize,
        result: Result<Patch, StepError>,
    ) -> Result<(), EngineError> {
        let descriptor = &graph.node(i).descriptor;
        let name = descriptor.name.as_str();

        match result {
            Ok(patch) => {
                if let Some(slot) = patch.slot_names().find(|s| !descriptor.outputs.contains(*s)) {
                    return Err(EngineError::InternalInvariantViolation(format!(
                        "step '{name}' wrote undeclared slot '{slot}'"
                    )));
                }
                run.state.merge(name, patch)?;
                let elapsed_ms = run.finish(i, StepStatus::Completed, None);
                info!(step = name, elapsed_ms, "step completed");
            }
            Err(err) => {
                let message = err.to_string();
                let elapsed_ms = run.finish(i, StepStatus::Failed, Some(message.clone()));

                match descriptor.criticality {
                    Criticality::Required => {
                        let first = run.state.record_failure(StepFailure {
                            step: name.to_owned(),
                            message: message.clone(),
                        });
                        if first {
                            error!(step = name, elapsed_ms, error = %message, "required step failed; halting dependents");
                        } else {
                            warn!(step = name, error = %message, "required step failed after the run had already failed");
                        }
                    }
                    Criticality::BestEffort => {
                        warn!(step = name, elapsed_ms, error = %message, "best-effort step failed");
                    }
                }
            }
        }
        Ok(())
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
