// Procedure model: the open → perform* → close contract every diagnostic
// operation plugs into, plus the types flowing across it.

pub mod engine;
pub mod registry;

use crate::device::Device;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Health classification of one scanned unit, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Health {
    Ok,
    Warning,
    Borderline,
    Slow,
    Error,
}

impl Health {
    /// Whether this level's remediation policy is "overwrite".
    pub fn needs_remediation(self) -> bool {
        matches!(self, Health::Slow | Health::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Health::Ok => "ok",
            Health::Warning => "warning",
            Health::Borderline => "borderline",
            Health::Slow => "slow",
            Health::Error => "error",
        }
    }
}

// Latency thresholds separating the health levels.
pub const WARNING_THRESHOLD: Duration = Duration::from_millis(10);
pub const BORDERLINE_THRESHOLD: Duration = Duration::from_millis(50);
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(150);
pub const ERROR_THRESHOLD: Duration = Duration::from_millis(500);

/// Classify one block from its read outcome and elapsed wall-clock time.
/// A short or failed read takes precedence over timing.
pub fn classify(read_ok: bool, elapsed: Duration) -> Health {
    if !read_ok || elapsed >= ERROR_THRESHOLD {
        Health::Error
    } else if elapsed >= SLOW_THRESHOLD {
        Health::Slow
    } else if elapsed >= BORDERLINE_THRESHOLD {
        Health::Borderline
    } else if elapsed >= WARNING_THRESHOLD {
        Health::Warning
    } else {
        Health::Ok
    }
}

/// Monotone completion ratio published to the renderer. `num <= den` always.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Progress {
    pub num: u64,
    pub den: u64,
}

/// Per-iteration record of what was just processed.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Report {
    pub lba: u64,
    pub sectors_processed: u64,
    pub health: Health,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            lba: 0,
            sectors_processed: 0,
            health: Health::Ok,
        }
    }
}

/// What one `perform` call decided about the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More work remains; the report describes the unit just processed.
    Continue,
    /// Nothing left to do. No unit was processed this call.
    Done,
}

/// Cumulative sector buckets for scan-style procedures. The four buckets
/// partition all processed sectors disjointly and exhaustively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectorCounters {
    pub good: u64,
    pub warning: u64,
    pub borderline: u64,
    pub remediated: u64,
}

impl SectorCounters {
    pub fn total(&self) -> u64 {
        self.good + self.warning + self.borderline + self.remediated
    }

    pub fn record(&mut self, health: Health, sectors: u64) {
        match health {
            Health::Ok => self.good += sectors,
            Health::Warning => self.warning += sectors,
            Health::Borderline => self.borderline += sectors,
            Health::Slow | Health::Error => self.remediated += sectors,
        }
    }
}

/// Final summary surfaced by `close` on every exit path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSummary {
    Sectors(SectorCounters),
    Script {
        lines_executed: u64,
        commands_dispatched: u64,
    },
}

/// Capability tags on a procedure descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// May destroy data; the caller must confirm before `open`.
    pub invasive: bool,
    /// Only offered against ATA-capable devices.
    pub requires_ata: bool,
}

/// Value type of a declared procedure option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Int64,
    String,
}

/// One option a procedure declares. Resolution happens outside the core,
/// before `open`; see `config::resolve_options`.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: OptionKind,
    /// Non-empty means the value must be one of these.
    pub choices: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OptionValue {
    Int64(i64),
    Str(String),
}

/// Typed, schema-validated option values handed to `open`.
#[derive(Debug, Clone, Default)]
pub struct OptionMap {
    values: BTreeMap<String, OptionValue>,
}

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: OptionValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(OptionValue::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(OptionValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Resource-acquisition failure. Aborts before any `perform`; no partial
/// counters exist yet.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("cannot open device {}: {source}", path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    #[error("script file not found: {}", .0.display())]
    MissingScript(PathBuf),

    #[error("invalid option {name}: {reason}")]
    BadOption { name: String, reason: String },
}

/// Failure inside one `perform` call. Stops the loop; `close` still runs and
/// partial counters are preserved. Per-sector I/O errors are NOT reported
/// through this type: they become a classification level instead.
#[derive(Debug, Error)]
pub enum PerformError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// A diagnostic/remediation operation. Descriptor data is immutable for the
/// process lifetime; `open` creates the live run instance.
pub trait Procedure {
    fn name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn help(&self) -> &'static str;
    fn capabilities(&self) -> Capabilities;

    fn options(&self) -> &'static [OptionSpec] {
        &[]
    }

    /// Suggested default for one declared option, possibly device-dependent.
    fn suggest_default(&self, dev: &Device, option: &OptionSpec) -> Option<String> {
        let _ = (dev, option);
        None
    }

    /// Acquire resources and build the run instance. The engine calls this
    /// exactly once per run; on error no `perform` or `close` follows.
    fn open(&self, dev: &Device, opts: &OptionMap) -> Result<Box<dyn ProcedureRun>, OpenError>;
}

/// The live instance created by `open`, mutated only by successive `perform`
/// calls on one logical thread, torn down by exactly one `close`.
pub trait ProcedureRun {
    /// Bytes handled per step, for renderers that want it.
    fn blk_size(&self) -> usize;

    /// Denominator of the progress ratio, fixed at open time.
    fn total_units(&self) -> u64;

    /// Process one unit of work and describe it through `report`.
    fn perform(&mut self, report: &mut Report) -> Result<StepOutcome, PerformError>;

    /// Release resources and surface the cumulative summary. Consumes the
    /// run so it can only happen once.
    fn close(self: Box<Self>) -> RunSummary;
}
