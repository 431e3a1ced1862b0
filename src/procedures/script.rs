// Register-file script interpreter: a minimal DSL sequencing low-level device
// commands. Seven sticky 8-bit registers stage a command's argument set;
// every directive line either assigns a register, names a bus-control
// operation, includes another script, or dispatches the current register
// file as one device command.
//
// The byte-level command transport stays opaque behind CommandSink.

use crate::device::Device;
use crate::procedure::{
    Capabilities, Health, OpenError, OptionKind, OptionMap, OptionSpec, PerformError, Procedure,
    ProcedureRun, Report, RunSummary, StepOutcome,
};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Inclusion depth bound; a script nesting deeper than this is rejected.
pub const MAX_INCLUDE_DEPTH: usize = 16;

pub const DEFAULT_SCRIPT_FILE: &str = "smart.xs";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line_no}: malformed register assignment {line:?}", path.display())]
    BadRegister {
        path: PathBuf,
        line_no: usize,
        line: String,
    },

    #[error("{}:{line_no}: sectorsfrom needs a path argument", path.display())]
    MissingIncludePath { path: PathBuf, line_no: usize },

    #[error("inclusion of {} would form a cycle", .0.display())]
    IncludeCycle(PathBuf),

    #[error("inclusion nesting exceeds the limit of {0}")]
    TooDeep(usize),

    #[error("command dispatch failed: {0}")]
    Dispatch(String),
}

/// Named bus-control operations with no register side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Reset,
    WaitNotBusy,
    CheckDrq,
}

impl BusOp {
    pub fn name(self) -> &'static str {
        match self {
            BusOp::Reset => "reset",
            BusOp::WaitNotBusy => "waitnbsy",
            BusOp::CheckDrq => "checkdrq",
        }
    }
}

/// Where dispatched commands go. The interpreter submits the full 7-register
/// file per command and leaves the registers untouched afterward.
pub trait CommandSink {
    fn bus_op(&mut self, op: BusOp) -> Result<(), ScriptError>;
    fn dispatch(&mut self, regs: &[u8; 7]) -> Result<(), ScriptError>;
}

/// Sink that logs every operation; stands in for the real command transport.
#[derive(Debug, Default)]
pub struct TracingSink;

impl CommandSink for TracingSink {
    fn bus_op(&mut self, op: BusOp) -> Result<(), ScriptError> {
        info!(op = op.name(), "bus operation");
        Ok(())
    }

    fn dispatch(&mut self, regs: &[u8; 7]) -> Result<(), ScriptError> {
        info!(
            r1 = regs[0], r2 = regs[1], r3 = regs[2], r4 = regs[3],
            r5 = regs[4], r6 = regs[5], r7 = regs[6],
            "command dispatch"
        );
        Ok(())
    }
}

/// Resolve a script-relative path: anything containing a directory separator
/// is used verbatim, everything else lands in the fixed base directory.
pub fn resolve_script_path(base_dir: &Path, raw: &str) -> PathBuf {
    if raw.contains('/') {
        PathBuf::from(raw)
    } else {
        base_dir.join(raw)
    }
}

pub struct ScriptInterpreter<'a> {
    regs: [u8; 7],
    base_dir: PathBuf,
    sink: &'a mut dyn CommandSink,
    /// Files on the current inclusion stack, for cycle rejection.
    include_stack: Vec<PathBuf>,
    pub lines_executed: u64,
    pub commands_dispatched: u64,
}

impl<'a> ScriptInterpreter<'a> {
    pub fn new(base_dir: impl Into<PathBuf>, sink: &'a mut dyn CommandSink) -> Self {
        Self {
            regs: [0; 7],
            base_dir: base_dir.into(),
            sink,
            include_stack: Vec::new(),
            lines_executed: 0,
            commands_dispatched: 0,
        }
    }

    pub fn registers(&self) -> &[u8; 7] {
        &self.regs
    }

    /// Interpret one script file and everything it transitively includes.
    pub fn run_file(&mut self, path: &Path) -> Result<(), ScriptError> {
        if self.include_stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(ScriptError::TooDeep(MAX_INCLUDE_DEPTH));
        }
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.include_stack.contains(&key) {
            return Err(ScriptError::IncludeCycle(path.to_path_buf()));
        }

        let text = fs::read_to_string(path).map_err(|source| ScriptError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        self.include_stack.push(key);
        let result = self.run_lines(path, &text);
        self.include_stack.pop();
        result
    }

    fn run_lines(&mut self, path: &Path, text: &str) -> Result<(), ScriptError> {
        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            self.lines_executed += 1;
            self.exec_line(path, idx + 1, line)?;
        }
        Ok(())
    }

    fn exec_line(&mut self, path: &Path, line_no: usize, line: &str) -> Result<(), ScriptError> {
        trace!(file = %path.display(), line_no, line, "script line");
        let token = line.split_whitespace().next().unwrap_or_default();

        if let Some(reg) = register_index(token) {
            let value = parse_register_value(line).ok_or_else(|| ScriptError::BadRegister {
                path: path.to_path_buf(),
                line_no,
                line: line.to_string(),
            })?;
            self.regs[reg] = value;
            return Ok(());
        }

        match token {
            "reset" => self.sink.bus_op(BusOp::Reset),
            "waitnbsy" => self.sink.bus_op(BusOp::WaitNotBusy),
            "checkdrq" => self.sink.bus_op(BusOp::CheckDrq),
            "sectorsfrom" => {
                let arg = line.split_whitespace().nth(1).ok_or(
                    ScriptError::MissingIncludePath {
                        path: path.to_path_buf(),
                        line_no,
                    },
                )?;
                let include = resolve_script_path(&self.base_dir, arg);
                debug!(from = %path.display(), include = %include.display(), "script inclusion");
                self.run_file(&include)
            }
            // Any other non-blank line dispatches the current register file
            // as one device command; registers persist across dispatches.
            _ => {
                self.commands_dispatched += 1;
                self.sink.dispatch(&self.regs)
            }
        }
    }
}

/// `r1`..`r7` prefix of an assignment token, as a zero-based register index.
fn register_index(token: &str) -> Option<usize> {
    let rest = token.strip_prefix('r')?;
    let digit = rest.chars().next()?;
    // Only rN followed by the `$` sigil is an assignment; a bare word
    // starting with r falls through to command dispatch.
    if !matches!(rest.chars().nth(1), Some('$')) {
        return None;
    }
    match digit {
        '1'..='7' => Some(digit as usize - '1' as usize),
        _ => None,
    }
}

/// The 2-hex-digit value after the `$` sigil.
fn parse_register_value(line: &str) -> Option<u8> {
    let after = line.split_once('$')?.1;
    let digits = after.get(..2)?;
    u8::from_str_radix(digits, 16).ok()
}

pub fn default_base_dir() -> PathBuf {
    PathBuf::from("scripts")
}

const OPTIONS: &[OptionSpec] = &[OptionSpec {
    name: "script_file",
    help: "Script to execute; bare file names resolve inside the script base directory",
    kind: OptionKind::String,
    choices: &[],
}];

/// Procedure wrapper: executes one script as a single atomic unit of work.
pub struct ScriptProcedure {
    base_dir: PathBuf,
}

impl ScriptProcedure {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl Procedure for ScriptProcedure {
    fn name(&self) -> &'static str {
        "runscript"
    }

    fn display_name(&self) -> &'static str {
        "Run command script"
    }

    fn help(&self) -> &'static str {
        "Executes a register-file command script, including any scripts it \
         references, against the device's command transport."
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn options(&self) -> &'static [OptionSpec] {
        OPTIONS
    }

    fn suggest_default(&self, _dev: &Device, option: &OptionSpec) -> Option<String> {
        match option.name {
            "script_file" => Some(DEFAULT_SCRIPT_FILE.to_string()),
            _ => None,
        }
    }

    fn open(&self, _dev: &Device, opts: &OptionMap) -> Result<Box<dyn ProcedureRun>, OpenError> {
        let raw = opts.get_str("script_file").unwrap_or(DEFAULT_SCRIPT_FILE);
        let script = resolve_script_path(&self.base_dir, raw);
        if !script.is_file() {
            return Err(OpenError::MissingScript(script));
        }
        Ok(Box::new(ScriptRun {
            script,
            base_dir: self.base_dir.clone(),
            sink: Box::new(TracingSink),
            executed: false,
            lines_executed: 0,
            commands_dispatched: 0,
        }))
    }
}

struct ScriptRun {
    script: PathBuf,
    base_dir: PathBuf,
    sink: Box<dyn CommandSink>,
    executed: bool,
    lines_executed: u64,
    commands_dispatched: u64,
}

impl ProcedureRun for ScriptRun {
    fn blk_size(&self) -> usize {
        0
    }

    // The script is one atomic unit of work for progress purposes
    fn total_units(&self) -> u64 {
        1
    }

    fn perform(&mut self, report: &mut Report) -> Result<StepOutcome, PerformError> {
        if self.executed {
            return Ok(StepOutcome::Done);
        }
        let mut interp = ScriptInterpreter::new(self.base_dir.clone(), self.sink.as_mut());
        let result = interp.run_file(&self.script);
        self.lines_executed = interp.lines_executed;
        self.commands_dispatched = interp.commands_dispatched;
        self.executed = true;
        result.map_err(|err| PerformError::Failed(err.to_string()))?;

        report.lba = 0;
        report.sectors_processed = 0;
        report.health = Health::Ok;
        Ok(StepOutcome::Continue)
    }

    fn close(self: Box<Self>) -> RunSummary {
        info!(
            script = %self.script.display(),
            lines = self.lines_executed,
            commands = self.commands_dispatched,
            "script finished"
        );
        RunSummary::Script {
            lines_executed: self.lines_executed,
            commands_dispatched: self.commands_dispatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[derive(Default)]
    struct RecordingSink {
        dispatches: Vec<[u8; 7]>,
        bus_ops: Vec<BusOp>,
    }

    impl CommandSink for RecordingSink {
        fn bus_op(&mut self, op: BusOp) -> Result<(), ScriptError> {
            self.bus_ops.push(op);
            Ok(())
        }
        fn dispatch(&mut self, regs: &[u8; 7]) -> Result<(), ScriptError> {
            self.dispatches.push(*regs);
            Ok(())
        }
    }

    fn run_script(text: &str) -> RecordingSink {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.xs");
        fs::write(&script, text).unwrap();
        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        interp.run_file(&script).unwrap();
        sink
    }

    #[test_case("r1$0A", Some(0), 0x0A; "r1 upper hex")]
    #[test_case("r7$ff", Some(6), 0xFF; "r7 lower hex")]
    #[test_case("r4$00", Some(3), 0x00; "r4 zero")]
    fn register_assignments_parse(line: &str, index: Option<usize>, value: u8) {
        let token = line.split_whitespace().next().unwrap();
        assert_eq!(register_index(token), index);
        assert_eq!(parse_register_value(line), Some(value));
    }

    #[test]
    fn bare_r_words_are_not_assignments() {
        assert_eq!(register_index("reset"), None);
        assert_eq!(register_index("r8$01"), None);
        assert_eq!(register_index("r"), None);
        assert_eq!(register_index("read"), None);
    }

    #[test]
    fn registers_are_sticky_across_dispatches() {
        let sink = run_script("r1$0A\nr2$FF\ndispatch\nr1$00\ndispatch\n");
        assert_eq!(sink.dispatches.len(), 2);
        assert_eq!(sink.dispatches[0][..2], [0x0A, 0xFF]);
        // r2 persisted through the reassignment of r1
        assert_eq!(sink.dispatches[1][..2], [0x00, 0xFF]);
    }

    #[test]
    fn bus_ops_do_not_touch_registers() {
        let sink = run_script("r3$42\nreset\nwaitnbsy\ncheckdrq\ngo\n");
        assert_eq!(
            sink.bus_ops,
            vec![BusOp::Reset, BusOp::WaitNotBusy, BusOp::CheckDrq]
        );
        assert_eq!(sink.dispatches.len(), 1);
        assert_eq!(sink.dispatches[0][2], 0x42);
    }

    #[test]
    fn malformed_register_assignment_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bad.xs");
        fs::write(&script, "r1$GG\n").unwrap();
        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        assert!(matches!(
            interp.run_file(&script),
            Err(ScriptError::BadRegister { line_no: 1, .. })
        ));
    }

    #[test]
    fn sectorsfrom_resolves_bare_names_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        // The including script lives in a subdirectory; the bare include must
        // still resolve against the base directory, not the includer's dir
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        let main = sub.join("main.xs");
        fs::write(&main, "r1$01\nsectorsfrom extra.xs\n").unwrap();
        fs::write(dir.path().join("extra.xs"), "dispatch\n").unwrap();

        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        interp.run_file(&main).unwrap();
        assert_eq!(sink.dispatches.len(), 1);
        assert_eq!(sink.dispatches[0][0], 0x01);
    }

    #[test]
    fn sectorsfrom_with_separator_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let abs = other.path().join("abs.xs");
        fs::write(&abs, "r2$22\ndispatch\n").unwrap();
        let main = dir.path().join("main.xs");
        fs::write(&main, format!("sectorsfrom {}\n", abs.display())).unwrap();

        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        interp.run_file(&main).unwrap();
        assert_eq!(sink.dispatches.len(), 1);
        assert_eq!(sink.dispatches[0][1], 0x22);
    }

    #[test]
    fn included_scripts_share_the_register_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.xs"), "r1$11\nsectorsfrom sub.xs\ndispatch\n").unwrap();
        fs::write(dir.path().join("sub.xs"), "r2$22\ndispatch\n").unwrap();

        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        interp.run_file(&dir.path().join("main.xs")).unwrap();
        // Included dispatch sees r1 from the parent; parent dispatch sees r2
        // assigned inside the include
        assert_eq!(sink.dispatches[0][..2], [0x11, 0x22]);
        assert_eq!(sink.dispatches[1][..2], [0x11, 0x22]);
    }

    #[test]
    fn inclusion_cycles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xs"), "sectorsfrom b.xs\n").unwrap();
        fs::write(dir.path().join("b.xs"), "sectorsfrom a.xs\n").unwrap();

        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        assert!(matches!(
            interp.run_file(&dir.path().join("a.xs")),
            Err(ScriptError::IncludeCycle(_))
        ));
    }

    #[test]
    fn self_inclusion_is_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xs"), "sectorsfrom a.xs\n").unwrap();
        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        assert!(matches!(
            interp.run_file(&dir.path().join("a.xs")),
            Err(ScriptError::IncludeCycle(_))
        ));
    }

    #[test]
    fn diamond_reinclusion_is_allowed() {
        // b.xs is included twice sequentially; only simultaneous inclusion
        // counts as a cycle
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.xs"),
            "sectorsfrom b.xs\nsectorsfrom b.xs\n",
        )
        .unwrap();
        fs::write(dir.path().join("b.xs"), "dispatch\n").unwrap();

        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        interp.run_file(&dir.path().join("a.xs")).unwrap();
        assert_eq!(sink.dispatches.len(), 2);
    }

    #[test]
    fn inclusion_nesting_is_bounded() {
        // A linear chain one file longer than the depth limit; no cycle, so
        // only the depth bound can stop it
        let dir = tempfile::tempdir().unwrap();
        for i in 0..=MAX_INCLUDE_DEPTH {
            let body = if i < MAX_INCLUDE_DEPTH {
                format!("sectorsfrom chain{}.xs\n", i + 1)
            } else {
                "dispatch\n".to_string()
            };
            fs::write(dir.path().join(format!("chain{i}.xs")), body).unwrap();
        }

        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        let result = interp.run_file(&dir.path().join("chain0.xs"));
        assert!(matches!(result, Err(ScriptError::TooDeep(n)) if n == MAX_INCLUDE_DEPTH));
        assert!(sink.dispatches.is_empty());
    }

    #[test]
    fn nesting_at_the_limit_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..MAX_INCLUDE_DEPTH {
            let body = if i < MAX_INCLUDE_DEPTH - 1 {
                format!("sectorsfrom chain{}.xs\n", i + 1)
            } else {
                "dispatch\n".to_string()
            };
            fs::write(dir.path().join(format!("chain{i}.xs")), body).unwrap();
        }

        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        interp.run_file(&dir.path().join("chain0.xs")).unwrap();
        assert_eq!(sink.dispatches.len(), 1);
    }

    #[test]
    fn missing_script_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RecordingSink::default();
        let mut interp = ScriptInterpreter::new(dir.path(), &mut sink);
        assert!(matches!(
            interp.run_file(&dir.path().join("absent.xs")),
            Err(ScriptError::Unreadable { .. })
        ));
    }

    #[test]
    fn trailing_whitespace_and_blank_lines_are_tolerated() {
        let sink = run_script("  r1$3C  \n\n   \ndispatch   \n");
        assert_eq!(sink.dispatches.len(), 1);
        assert_eq!(sink.dispatches[0][0], 0x3C);
    }
}
