// Procedure engine: drives one run through its lifecycle and pushes progress
// to the renderer. The engine knows nothing about what the procedure does or
// how the renderer draws.

use super::{OpenError, OptionMap, Procedure, Progress, Report, RunSummary, StepOutcome};
use crate::device::Device;
use crate::CancelToken;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Receives the engine's per-iteration state pushes. Implementations choose
/// whole-range or moving-window visualization; they never mutate engine state.
pub trait Renderer {
    fn begin(&mut self, dev: &Device, progress: &Progress) {
        let _ = (dev, progress);
    }

    fn render(&mut self, progress: &Progress, report: &Report);

    fn finish(&mut self, report: &RunReport) {
        let _ = report;
    }
}

/// Renderer that draws nothing. Used by tests and `--quiet` runs.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _progress: &Progress, _report: &Report) {}
}

/// How the perform loop ended.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Everything a finished run reports, emitted on every exit path.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub procedure: String,
    pub outcome: RunOutcome,
    pub progress: Progress,
    pub summary: RunSummary,
    #[serde(serialize_with = "serialize_elapsed")]
    pub elapsed: Duration,
}

fn serialize_elapsed<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*d).to_string())
}

pub struct ProcedureEngine {
    cancel: CancelToken,
}

impl ProcedureEngine {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// Run one procedure against one device to completion.
    ///
    /// `open` failures abort before any work. Once `open` succeeds, `close`
    /// runs exactly once under every exit path — completion, perform failure,
    /// or cancellation — and the partial summary survives into the report.
    /// Cancellation is polled cooperatively at the top of each iteration;
    /// an iteration already blocked in device I/O finishes first.
    pub fn run(
        &self,
        procedure: &dyn Procedure,
        dev: &Device,
        opts: &OptionMap,
        renderer: &mut dyn Renderer,
    ) -> Result<RunReport, OpenError> {
        let started = Instant::now();
        let mut run = procedure.open(dev, opts)?;
        let mut progress = Progress {
            num: 0,
            den: run.total_units(),
        };
        debug!(
            procedure = procedure.name(),
            device = %dev.path.display(),
            total_units = progress.den,
            blk_size = run.blk_size(),
            "procedure opened"
        );
        renderer.begin(dev, &progress);

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            let mut report = Report::default();
            match run.perform(&mut report) {
                Ok(StepOutcome::Done) => break RunOutcome::Completed,
                Ok(StepOutcome::Continue) => {
                    progress.num += 1;
                    renderer.render(&progress, &report);
                }
                Err(err) => break RunOutcome::Failed(err.to_string()),
            }
        };

        let summary = run.close();
        let report = RunReport {
            procedure: procedure.name().to_string(),
            outcome,
            progress,
            summary,
            elapsed: started.elapsed(),
        };
        renderer.finish(&report);
        Ok(report)
    }
}
