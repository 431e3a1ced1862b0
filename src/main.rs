use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use xhdd::config::{resolve_options, UserConfig};
use xhdd::device::listing::list_devices;
use xhdd::procedure::engine::{NullRenderer, Renderer, RunOutcome};
use xhdd::ui::{SlidingWindowRenderer, WholeSpaceRenderer};
use xhdd::{CancelToken, Device, ProcedureEngine, ProcedureRegistry};

#[derive(Parser)]
#[command(name = "xhdd")]
#[command(about = "Block-device diagnostics: latency-based sector scanning and remediation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, e.g. "xhdd=debug"
    #[arg(long, global = true, env = "XHDD_LOG", default_value = "xhdd=info")]
    log: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List detected block devices
    List {
        /// Emit the device list as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available procedures with their help text
    Procedures,

    /// Run a procedure against one device
    Run {
        /// Procedure name (see `procedures`)
        procedure: String,

        /// Device path, e.g. /dev/sda
        device: PathBuf,

        /// Option override, repeatable: -o name=value
        #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
        options: Vec<String>,

        /// Progress visualization
        #[arg(long, value_enum, default_value = "window")]
        renderer: RendererKind,

        /// Skip the invasive-operation confirmation
        #[arg(long)]
        force: bool,

        /// Suppress progress drawing and emit the final report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RendererKind {
    /// Sliding window of recently scanned blocks
    Window,
    /// Whole-range map of worst health per cell
    Whole,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let registry = ProcedureRegistry::builtin();
    match cli.command {
        Commands::List { json } => {
            let devices = list_devices()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No devices found");
            } else {
                for dev in &devices {
                    println!(
                        "{}  {}  {} sectors x {}B{}{}",
                        dev.path.display(),
                        dev.model,
                        dev.total_sectors(),
                        dev.sector_size,
                        if dev.ata_capable { "  [ata]" } else { "" },
                        if dev.mounted { "  [mounted]" } else { "" },
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Procedures => {
            for procedure in registry.iter() {
                let caps = procedure.capabilities();
                let mut tags = Vec::new();
                if caps.invasive {
                    tags.push("invasive");
                }
                if caps.requires_ata {
                    tags.push("requires-ata");
                }
                println!("{} - {}", procedure.name(), procedure.display_name());
                if !tags.is_empty() {
                    println!("    [{}]", tags.join(", "));
                }
                println!("    {}", procedure.help());
                for option in procedure.options() {
                    println!("    -o {}=...  {}", option.name, option.help);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            procedure,
            device,
            options,
            renderer,
            force,
            json,
        } => run_procedure(&registry, &procedure, &device, &options, renderer, force, json),
    }
}

fn run_procedure(
    registry: &ProcedureRegistry,
    procedure_name: &str,
    device_path: &PathBuf,
    raw_options: &[String],
    renderer_kind: RendererKind,
    force: bool,
    json: bool,
) -> Result<ExitCode> {
    if !nix::unistd::Uid::effective().is_root() {
        warn!("not running as root; raw device nodes are usually inaccessible");
    }

    let procedure = registry
        .find(procedure_name)
        .ok_or_else(|| anyhow!("unknown procedure {:?}", procedure_name))?;

    let devices = list_devices()?;
    let dev = devices
        .iter()
        .find(|d| &d.path == device_path)
        .ok_or_else(|| anyhow!("device {} not found in listing", device_path.display()))?;

    let caps = procedure.capabilities();
    if caps.requires_ata && !dev.ata_capable {
        bail!(
            "{} requires an ATA-capable device, {} is not",
            procedure.name(),
            dev.path.display()
        );
    }

    // The core assumes the invasive gate was already passed by open time
    if caps.invasive && !force && !confirm_invasive(dev)? {
        println!("Aborted");
        return Ok(ExitCode::SUCCESS);
    }

    let overrides = parse_overrides(raw_options)?;
    let opts = resolve_options(procedure, dev, &UserConfig::load(), &overrides)?;

    let cancel = CancelToken::new();
    signal_hook::flag::register(SIGINT, cancel.as_flag())?;
    signal_hook::flag::register(SIGTERM, cancel.as_flag())?;

    let mut renderer: Box<dyn Renderer> = if json {
        Box::new(NullRenderer)
    } else {
        match renderer_kind {
            RendererKind::Window => Box::new(SlidingWindowRenderer::default()),
            RendererKind::Whole => Box::new(WholeSpaceRenderer::default()),
        }
    };

    let engine = ProcedureEngine::new(cancel);
    let report = engine.run(procedure, dev, &opts, renderer.as_mut())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(match report.outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Cancelled => ExitCode::from(130),
        RunOutcome::Failed(_) => ExitCode::FAILURE,
    })
}

fn parse_overrides(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| anyhow!("option override {:?} is not NAME=VALUE", entry))
        })
        .collect()
}

/// Invasive procedures need explicit consent, twice if the device is mounted.
fn confirm_invasive(dev: &Device) -> Result<bool> {
    let prompt = format!(
        "This operation is invasive and may destroy data. Proceed on {} ({})?",
        dev.path.display(),
        dev.model
    );
    if !ask_yes_no(&prompt)? {
        return Ok(false);
    }
    if dev.mounted && !ask_yes_no("This disk is mounted. Are you really sure?")? {
        return Ok(false);
    }
    Ok(true)
}

fn ask_yes_no(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
