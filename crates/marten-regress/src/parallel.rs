//! Bounded worker-pool scheduler.
//!
//! Distributes gated test cases across N worker threads over bounded
//! crossbeam channels. Workers block only on the job-queue pop and on their
//! own subprocess; results fan in to the calling thread, which owns the
//! aggregation. A panic while executing one case is caught at the worker
//! boundary and becomes an `error` outcome for that case alone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::bounded;
use indicatif::ProgressBar;

use crate::config::RunConfig;
use crate::discovery::TestCase;
use crate::exec::Execute;
use crate::gate::{CaseBinding, GateDecision, GateEvaluator};
use crate::report::{ErrorKind, ExecutionResult, Outcome, RunSummary, SkipReason};

/// Run-level cancellation flag, shared by the scheduler and all executors.
///
/// Once set it is never cleared: undispatched cases are recorded as
/// `skipped (cancelled)` and in-flight subprocesses are terminated.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execute all discovered cases and aggregate their results.
///
/// Gate-skipped cases go straight into the summary without ever reaching a
/// worker. Each runnable case is claimed by exactly one worker; the summary
/// accounts for every input case exactly once, and its sort order is
/// independent of the worker count.
pub fn run_parallel<E: Execute>(
    cases: Vec<TestCase>,
    config: &RunConfig,
    executor: &E,
    cancel: &CancelToken,
    progress: Option<ProgressBar>,
) -> RunSummary {
    let mut summary = RunSummary::new();

    // Gate first: skips are recorded immediately, runnable cases are queued.
    let evaluator = GateEvaluator::new(config);
    let mut runnable: Vec<(TestCase, CaseBinding)> = Vec::new();
    for case in cases {
        match evaluator.evaluate(&case) {
            GateDecision::Run(binding) => runnable.push((case, binding)),
            GateDecision::Skip(reason) => {
                if reason == SkipReason::Misconfigured {
                    tracing::warn!(
                        case = %case.path,
                        category = %case.category,
                        "category enabled but misconfigured, skipping"
                    );
                } else {
                    tracing::info!(case = %case.path, %reason, "skipped");
                }
                if let Some(ref pb) = progress {
                    pb.inc(1);
                }
                summary.record(ExecutionResult::skipped(case.path, reason));
            }
        }
    }

    let jobs = config.jobs.max(1);
    let (job_tx, job_rx) = bounded::<(TestCase, CaseBinding)>(jobs * 4);
    let (result_tx, result_rx) = bounded::<ExecutionResult>(jobs * 8);

    std::thread::scope(|scope| {
        for _ in 0..jobs {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (case, binding) in &job_rx {
                    // A cancel observed at claim time means the case never
                    // started; report it like the undispatched ones.
                    let result = if cancel.is_cancelled() {
                        ExecutionResult::skipped(case.path.clone(), SkipReason::Cancelled)
                    } else {
                        let path = case.path.clone();
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            executor.execute(&case, &binding, cancel)
                        }))
                        .unwrap_or_else(|payload| ExecutionResult {
                            path,
                            outcome: Outcome::Error {
                                kind: ErrorKind::Harness,
                                detail: format!("executor panicked: {}", panic_message(payload)),
                            },
                            duration_ms: 0,
                            output: None,
                        })
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        drop(job_rx);

        // Feeder: keeps the bounded queue full. After cancellation the
        // remaining jobs still flow through so workers can record them as
        // cancelled skips; nothing is silently dropped.
        scope.spawn(move || {
            for job in runnable {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        for result in &result_rx {
            match &result.outcome {
                Outcome::Pass => tracing::info!(case = %result.path, "pass"),
                Outcome::Fail { detail } => {
                    tracing::warn!(case = %result.path, %detail, "fail")
                }
                Outcome::Error { kind, detail } => {
                    tracing::error!(case = %result.path, %kind, %detail, "error")
                }
                Outcome::Skipped { reason } => {
                    tracing::info!(case = %result.path, %reason, "skipped")
                }
            }
            if let Some(ref pb) = progress {
                pb.inc(1);
                pb.set_message(format!(
                    "pass {} fail {} err {} skip {}",
                    summary.passed, summary.failed, summary.errors, summary.skipped
                ));
            }
            summary.record(result);
        }
    });

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    summary.finalize();
    summary
}
