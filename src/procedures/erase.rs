// Erase procedure: scans the device block by block, classifies each block
// from read latency and error state, and overwrites the blocks that need it.
//
// Read latency is a cheap, universally available proxy for sector
// degradation; no vendor SMART attributes are needed. Only Slow and Error
// blocks pay the cost of a rewrite.

use crate::device::{BlockIo, Device, DeviceHandle};
use crate::procedure::{
    classify, Capabilities, OpenError, OptionKind, OptionMap, OptionSpec, PerformError, Procedure,
    ProcedureRun, Report, RunSummary, SectorCounters, StepOutcome,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Sectors scanned per step.
pub const SECTORS_PER_STEP: u64 = 256;

const OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "start_lba",
        help: "LBA to start scanning from",
        kind: OptionKind::Int64,
        choices: &[],
    },
    OptionSpec {
        name: "pattern",
        help: "Fill byte (0-255) written over remediated blocks",
        kind: OptionKind::Int64,
        choices: &[],
    },
];

#[derive(Debug, Default)]
pub struct EraseProcedure;

impl EraseProcedure {
    pub fn new() -> Self {
        Self
    }
}

impl Procedure for EraseProcedure {
    fn name(&self) -> &'static str {
        "erase"
    }

    fn display_name(&self) -> &'static str {
        "Erase slow/bad sectors"
    }

    fn help(&self) -> &'static str {
        "Scans the whole device, classifying each block from read latency, \
         and automatically overwrites slow or bad blocks to fix them."
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            invasive: true,
            requires_ata: true,
        }
    }

    fn options(&self) -> &'static [OptionSpec] {
        OPTIONS
    }

    fn suggest_default(&self, _dev: &Device, option: &OptionSpec) -> Option<String> {
        match option.name {
            "start_lba" => Some("0".to_string()),
            "pattern" => Some("0".to_string()),
            _ => None,
        }
    }

    fn open(&self, dev: &Device, opts: &OptionMap) -> Result<Box<dyn ProcedureRun>, OpenError> {
        let start_lba = opts.get_i64("start_lba").unwrap_or(0);
        if start_lba < 0 {
            return Err(OpenError::BadOption {
                name: "start_lba".into(),
                reason: "must be non-negative".into(),
            });
        }
        let start_lba = start_lba as u64;
        let end_lba = dev.total_sectors();
        if start_lba > end_lba {
            return Err(OpenError::BadOption {
                name: "start_lba".into(),
                reason: format!("beyond device end ({} sectors)", end_lba),
            });
        }

        let pattern = opts.get_i64("pattern").unwrap_or(0);
        if !(0..=255).contains(&pattern) {
            return Err(OpenError::BadOption {
                name: "pattern".into(),
                reason: "must be a byte value 0-255".into(),
            });
        }

        let blk_size = (SECTORS_PER_STEP * dev.sector_size as u64) as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(blk_size)
            .map_err(|e| OpenError::Allocation(e.to_string()))?;
        buf.resize(blk_size, 0);

        let handle = DeviceHandle::open_rw(dev)?;

        Ok(Box::new(EraseRun {
            handle: Box::new(handle),
            dev_path: dev.path.clone(),
            sector_size: dev.sector_size,
            current_lba: start_lba,
            end_lba,
            total_units: (end_lba - start_lba).div_ceil(SECTORS_PER_STEP),
            pattern: pattern as u8,
            buf,
            counters: SectorCounters::default(),
        }))
    }
}

struct EraseRun {
    handle: Box<dyn BlockIo>,
    dev_path: PathBuf,
    sector_size: u32,
    current_lba: u64,
    end_lba: u64,
    total_units: u64,
    pattern: u8,
    buf: Vec<u8>,
    counters: SectorCounters,
}

impl ProcedureRun for EraseRun {
    fn blk_size(&self) -> usize {
        self.buf.len()
    }

    fn total_units(&self) -> u64 {
        self.total_units
    }

    fn perform(&mut self, report: &mut Report) -> Result<StepOutcome, PerformError> {
        let sectors_to_process = SECTORS_PER_STEP.min(self.end_lba - self.current_lba);
        if sectors_to_process == 0 {
            return Ok(StepOutcome::Done);
        }

        let byte_count = (sectors_to_process * self.sector_size as u64) as usize;
        let chunk = &mut self.buf[..byte_count];

        // The read latency IS the classification signal; a slow read is
        // deliberately allowed to block up to the device's internal timeout.
        let started = Instant::now();
        let read = self.handle.read_at(self.current_lba, chunk);
        let elapsed = started.elapsed();

        let read_ok = matches!(read, Ok(n) if n == byte_count);
        let health = classify(read_ok, elapsed);

        if health.needs_remediation() {
            chunk.fill(self.pattern);
            match self.handle.write_at(self.current_lba, chunk) {
                Ok(n) if n == byte_count => {}
                // A failed overwrite never escalates health or aborts the
                // run; a tool meant to find bad regions keeps going past them.
                Ok(n) => warn!(
                    device = %self.dev_path.display(),
                    lba = self.current_lba,
                    written = n,
                    expected = byte_count,
                    "short remediation write"
                ),
                Err(err) => warn!(
                    device = %self.dev_path.display(),
                    lba = self.current_lba,
                    error = %err,
                    "remediation write failed"
                ),
            }
        }

        self.counters.record(health, sectors_to_process);
        report.lba = self.current_lba;
        report.sectors_processed = sectors_to_process;
        report.health = health;
        self.current_lba += sectors_to_process;
        Ok(StepOutcome::Continue)
    }

    fn close(self: Box<Self>) -> RunSummary {
        // Descriptor and buffer drop with self
        info!(
            device = %self.dev_path.display(),
            good = self.counters.good,
            warning = self.counters.warning,
            borderline = self.counters.borderline,
            remediated = self.counters.remediated,
            "erase finished"
        );
        RunSummary::Sectors(self.counters)
    }
}
