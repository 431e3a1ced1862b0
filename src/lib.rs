// Allow uppercase acronyms for industry-standard terms like LBA and ATA
#![allow(clippy::upper_case_acronyms)]

pub mod config;
pub mod device;
pub mod procedure;
pub mod procedures;
pub mod ui;

// Re-export the main entry points for convenience
pub use device::{BlockIo, Device, DeviceHandle};
pub use procedure::engine::{ProcedureEngine, Renderer, RunOutcome, RunReport};
pub use procedure::registry::ProcedureRegistry;
pub use procedure::{Health, OptionMap, Procedure, Progress, Report, RunSummary};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation token.
///
/// The engine polls it at the top of each `perform` iteration; a `perform`
/// call already blocked in device I/O is never interrupted mid-call.
/// Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The shared flag, in the form signal-hook's `flag::register` wants.
    pub fn as_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
