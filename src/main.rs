//! polysched Command Line Interface
//!
//! Usage:
//!   polysched [OPTIONS] <tree.json>
//!   polysched --help
//!
//! Examples:
//!   polysched gemm.json                         # Print the tree
//!   polysched --script=interchange.json gemm.json  # Apply a schedule script
//!   polysched --auto --emit=log gemm.json        # Auto fission/fuse, print the log
//!   polysched --emit=deps gemm.json              # List every dependence

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use polysched::analysis::FindDeps;
use polysched::schedule::{DepDiffDecider, FissionSide, MoveToSide, Schedule, SplitBy};
use polysched::utils::{PolySchedError, PolySchedResult, ScheduleResult};
use polysched::ScheduleConfig;
use polysched::ast::{Stmt, ID};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// polysched - dependence-checked loop-nest scheduling
#[derive(Parser, Debug)]
#[command(name = "polysched")]
#[command(author = "polysched Contributors")]
#[command(version)]
#[command(about = "Apply legality-checked schedule primitives to a loop tree", long_about = None)]
struct Cli {
    /// Input tree (JSON)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Schedule script: a JSON list of primitives addressing statements by label
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Run automatic fission and fusion after the script
    #[arg(long)]
    auto: bool,

    /// Disable fission in --auto
    #[arg(long)]
    no_fission: bool,

    /// Disable fusion in --auto
    #[arg(long)]
    no_fusion: bool,

    /// Report write-after-write between reductions as dependences
    #[arg(long)]
    keep_reduction_waw: bool,

    /// Log Presburger operation counts
    #[arg(long)]
    profile: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// What to emit
    #[arg(long, default_value = "tree")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// The scheduled tree, as text
    Tree,
    /// The scheduled tree, as JSON
    Json,
    /// The schedule log, as JSON
    Log,
    /// Every dependence of the scheduled tree
    Deps,
}

/// One script entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "primitive", rename_all = "snake_case")]
enum Command {
    Reorder { order: Vec<String> },
    Swap { order: Vec<String> },
    Fission {
        #[serde(rename = "loop")]
        target: String,
        side: FissionSide,
        split_point: String,
    },
    Fuse { loop0: String, loop1: String },
    Split {
        #[serde(rename = "loop")]
        target: String,
        by: SplitBy,
    },
    Merge { loop0: String, loop1: String },
    MoveTo { stmt: String, side: MoveToSide, dst: String },
}

impl Command {
    fn run(&self, s: &mut Schedule) -> ScheduleResult<()> {
        let all = |s: &Schedule, labels: &[String]| labels.iter().map(|l| s.find(l)).collect::<ScheduleResult<Vec<ID>>>();
        match self {
            Command::Reorder { order } => {
                let order = all(s, order)?;
                s.reorder(&order).map(|_| ())
            }
            Command::Swap { order } => {
                let order = all(s, order)?;
                s.swap(&order).map(|_| ())
            }
            Command::Fission { target, side, split_point } => {
                let (l, p) = (s.find(target)?, s.find(split_point)?);
                s.fission(l, *side, p).map(|_| ())
            }
            Command::Fuse { loop0, loop1 } => {
                let (a, b) = (s.find(loop0)?, s.find(loop1)?);
                s.fuse(a, b).map(|_| ())
            }
            Command::Split { target, by } => {
                let l = s.find(target)?;
                s.split(l, *by).map(|_| ())
            }
            Command::Merge { loop0, loop1 } => {
                let (a, b) = (s.find(loop0)?, s.find(loop1)?);
                s.merge(a, b).map(|_| ())
            }
            Command::MoveTo { stmt, side, dst } => {
                let (a, b) = (s.find(stmt)?, s.find(dst)?);
                s.move_to(a, *side, b).map(|_| ())
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::from_default_env().filter_level(log_level).format_timestamp(None).init();

    info!("polysched v{}", polysched::VERSION);
    info!("Input: {}", cli.input.display());

    let ast: Stmt = read_json(&cli.input).with_context(|| format!("Failed to load tree from {}", cli.input.display()))?;
    debug!("Input tree:\n{}", ast);

    let script: Vec<Command> = match &cli.script {
        Some(path) => read_json(path).with_context(|| format!("Failed to load script from {}", path.display()))?,
        None => Vec::new(),
    };

    let config = build_config(&cli);
    let mut schedule = Schedule::with_config(ast, config);

    if !script.is_empty() {
        let applied = schedule.transaction(|s| {
            for cmd in &script {
                cmd.run(s)?;
            }
            Ok(())
        });
        if let Err(e) = applied {
            error!("Schedule rejected, tree left unchanged");
            return Err(PolySchedError::from(e)).context("Failed to apply schedule script");
        }
        info!("Applied {} primitives", schedule.log().len());
    }

    if cli.auto {
        schedule.auto_fission_fuse(&mut DepDiffDecider);
    }

    if cli.profile {
        schedule.log_profile();
    }

    let output = match cli.emit {
        EmitKind::Tree => schedule.ast().to_string(),
        EmitKind::Json => serde_json::to_string_pretty(schedule.ast())?,
        EmitKind::Log => serde_json::to_string_pretty(schedule.log())?,
        EmitKind::Deps => {
            let query = FindDeps::new().ignore_reduction_waw(schedule.config().ignore_reduction_waw);
            let deps = schedule.deps(&query);
            info!("Found {} dependences", deps.len());
            deps.iter().map(|d| format!("{}\n", d)).collect()
        }
    };
    write_output(cli.output.as_deref(), &output)
}

fn build_config(cli: &Cli) -> ScheduleConfig {
    ScheduleConfig::default()
        .with_ignore_reduction_waw(!cli.keep_reduction_waw)
        .with_profile(cli.profile)
        .with_auto_fission(!cli.no_fission)
        .with_auto_fuse(!cli.no_fusion)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> PolySchedResult<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content).with_context(|| format!("Failed to write {}", p.display()))?;
            info!("Output written to {}", p.display());
        }
        None => {
            print!("{}", content);
            if !content.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}
