// Terminal renderers for the engine's progress pushes. Two visualizations:
// a sliding window of the most recent blocks, and a whole-range map where
// each cell keeps the worst health seen in its span. Renderers only draw;
// they never touch engine state.

use crate::device::Device;
use crate::procedure::engine::{Renderer, RunOutcome, RunReport};
use crate::procedure::{Health, Progress, Report, RunSummary};
use console::style;
use std::collections::VecDeque;
use std::io::{self, Write};

fn health_glyph(health: Health) -> String {
    match health {
        Health::Ok => style("·").green().to_string(),
        Health::Warning => style("w").yellow().to_string(),
        Health::Borderline => style("b").yellow().bold().to_string(),
        Health::Slow => style("s").magenta().bold().to_string(),
        Health::Error => style("X").red().bold().to_string(),
    }
}

fn percent(progress: &Progress) -> f64 {
    if progress.den == 0 {
        100.0
    } else {
        progress.num as f64 * 100.0 / progress.den as f64
    }
}

/// Moving-window view: the last `width` block healths scroll across one line.
pub struct SlidingWindowRenderer {
    width: usize,
    window: VecDeque<Health>,
}

impl SlidingWindowRenderer {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            window: VecDeque::with_capacity(width),
        }
    }
}

impl Default for SlidingWindowRenderer {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Renderer for SlidingWindowRenderer {
    fn begin(&mut self, dev: &Device, progress: &Progress) {
        println!(
            "Scanning {} ({}, {} sectors) in {} steps",
            dev.path.display(),
            dev.model,
            dev.total_sectors(),
            progress.den
        );
    }

    fn render(&mut self, progress: &Progress, report: &Report) {
        if self.window.len() == self.width {
            self.window.pop_front();
        }
        self.window.push_back(report.health);

        let strip: String = self.window.iter().map(|h| health_glyph(*h)).collect();
        print!(
            "\r[{:width$}] {:5.1}%  lba {}",
            strip,
            percent(progress),
            report.lba,
            width = self.width
        );
        io::stdout().flush().ok();
    }

    fn finish(&mut self, report: &RunReport) {
        println!();
        print_summary(report);
    }
}

/// Whole-range view: the full LBA span compressed into a fixed row of cells,
/// each remembering the worst health reported inside it.
pub struct WholeSpaceRenderer {
    width: usize,
    cells: Vec<Option<Health>>,
    total_sectors: u64,
}

impl WholeSpaceRenderer {
    pub fn new(width: usize) -> Self {
        // At least one cell; the indexing below relies on width - 1
        let width = width.max(1);
        Self {
            width,
            cells: vec![None; width],
            total_sectors: 0,
        }
    }

    /// Cell index for an LBA. Widened to 128 bits so `lba * width` cannot
    /// wrap on huge devices.
    fn cell_index(&self, lba: u64) -> usize {
        let idx = lba as u128 * self.width as u128 / self.total_sectors.max(1) as u128;
        (idx as usize).min(self.width - 1)
    }
}

impl Default for WholeSpaceRenderer {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Renderer for WholeSpaceRenderer {
    fn begin(&mut self, dev: &Device, progress: &Progress) {
        self.total_sectors = dev.total_sectors().max(1);
        println!(
            "Scanning {} ({}, {} sectors) in {} steps",
            dev.path.display(),
            dev.model,
            dev.total_sectors(),
            progress.den
        );
    }

    fn render(&mut self, progress: &Progress, report: &Report) {
        let first = self.cell_index(report.lba);
        let last_lba = report
            .lba
            .saturating_add(report.sectors_processed.saturating_sub(1));
        let last = self.cell_index(last_lba);
        for cell in &mut self.cells[first..=last] {
            let worst = match *cell {
                Some(existing) => existing.max(report.health),
                None => report.health,
            };
            *cell = Some(worst);
        }

        let row: String = self
            .cells
            .iter()
            .map(|cell| match cell {
                Some(health) => health_glyph(*health),
                None => " ".to_string(),
            })
            .collect();
        print!("\r[{}] {:5.1}%", row, percent(progress));
        io::stdout().flush().ok();
    }

    fn finish(&mut self, report: &RunReport) {
        println!();
        print_summary(report);
    }
}

/// Human-readable run summary, printed on every exit path.
pub fn print_summary(report: &RunReport) {
    let outcome = match &report.outcome {
        RunOutcome::Completed => style("completed").green().to_string(),
        RunOutcome::Cancelled => style("cancelled").yellow().to_string(),
        RunOutcome::Failed(msg) => format!("{}: {}", style("failed").red(), msg),
    };
    println!(
        "{}: {} after {} ({}/{} steps)",
        report.procedure,
        outcome,
        humantime::format_duration(round_secs(report.elapsed)),
        report.progress.num,
        report.progress.den
    );
    match &report.summary {
        RunSummary::Sectors(c) => {
            println!(
                "  sectors: {} good, {} warning, {} borderline, {} remediated ({} total)",
                c.good,
                c.warning,
                c.borderline,
                c.remediated,
                c.total()
            );
        }
        RunSummary::Script {
            lines_executed,
            commands_dispatched,
        } => {
            println!(
                "  script: {} lines executed, {} commands dispatched",
                lines_executed, commands_dispatched
            );
        }
    }
}

fn round_secs(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_secs(d.as_secs())
}
