//! PolyForge Command Line Interface
//!
//! Usage:
//!   polyforge [OPTIONS] <KERNEL>
//!   polyforge --help
//!
//! Examples:
//!   polyforge stencil --emit=deps               # Dependences under the default order
//!   polyforge matmul --tile 32 --parallel 0     # Tile and parallelize the main nest
//!   polyforge heat --skew 1 --emit=schedule     # Wavefront the time loop
//!   polyforge blur --vectorize 2:8 --emit=ir    # Vectorize the innermost loop

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info, warn};
use polyforge::ir::{CompId, Function};
use polyforge::kernels::{self, KernelSize};
use polyforge::CompileConfig;
use std::fs;
use std::path::PathBuf;

/// PolyForge - polyhedral scheduling of built-in kernels
#[derive(Parser, Debug)]
#[command(name = "polyforge")]
#[command(author = "PolyForge Contributors")]
#[command(version)]
#[command(about = "Schedule, check and lower polyhedral loop nests", long_about = None)]
struct Cli {
    /// Kernel to compile (stencil, blur, matmul, heat, seidel)
    #[arg(value_name = "KERNEL")]
    kernel: String,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Spatial problem size
    #[arg(short, long, default_value_t = 3000)]
    n: i64,

    /// Time steps for iterative kernels
    #[arg(long, default_value_t = 1000)]
    steps: i64,

    /// Computation the transformations apply to (defaults to the last one)
    #[arg(long, value_name = "NAME")]
    comp: Option<String>,

    /// Tile the two outermost loops by SIZE x SIZE
    #[arg(long, value_name = "SIZE")]
    tile: Option<i64>,

    /// Skew the second loop by FACTOR times the first
    #[arg(long, value_name = "FACTOR")]
    skew: Option<i64>,

    /// Parallelize loop level L
    #[arg(long, value_name = "L")]
    parallel: Option<usize>,

    /// Vectorize loop level L with width W
    #[arg(long, value_name = "L:W", value_parser = parse_vectorize)]
    vectorize: Option<(usize, u32)>,

    /// Apply transformations even when the legality check fails
    #[arg(long)]
    force: bool,

    /// What to emit
    #[arg(long, default_value = "ir")]
    emit: EmitKind,

    /// Iterator prefix of generated loops
    #[arg(long, default_value = "c")]
    iterator_prefix: String,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Dependences and their distance summaries
    Deps,
    /// Domains and ordered schedules
    Schedule,
    /// Loop tree
    Ast,
    /// Lowered statements
    Ir,
}

fn parse_vectorize(s: &str) -> std::result::Result<(usize, u32), String> {
    let (level, width) = s.split_once(':').ok_or_else(|| format!("expected L:W, got `{}`", s))?;
    let level = level.trim().parse::<usize>().map_err(|e| format!("bad level `{}`: {}", level, e))?;
    let width = width.trim().parse::<u32>().map_err(|e| format!("bad width `{}`: {}", width, e))?;
    Ok((level, width))
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

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("PolyForge v{}", polyforge::VERSION);

    let size = KernelSize { n: cli.n, steps: cli.steps };
    let kernel = match kernels::by_name(&cli.kernel, size) {
        Some(k) => k.with_context(|| format!("Failed to build kernel `{}`", cli.kernel))?,
        None => bail!("unknown kernel `{}`; expected one of {}", cli.kernel, kernels::NAMES.join(", ")),
    };

    let config = CompileConfig::default().with_iterator_prefix(cli.iterator_prefix.clone());
    debug!("Compile config: {:?}", config);
    let mut f = kernel.function;
    f.set_config(config);

    let target = match &cli.comp {
        Some(name) => f.comp_by_name(name)?,
        None => match kernel.comps.last() {
            Some(id) => *id,
            None => bail!("kernel `{}` has no scheduled computation", cli.kernel),
        },
    };

    f.compute_dependences().context("Dependence analysis failed")?;
    if matches!(cli.emit, EmitKind::Deps) {
        return write_output(&cli.output, &render_deps(&f)?);
    }

    apply_transforms(&cli, &mut f, target)?;

    let output = match cli.emit {
        EmitKind::Deps => render_deps(&f)?,
        EmitKind::Schedule => {
            f.gen_ordering_schedules()?;
            f.align_schedules();
            f.dump_schedules()
        }
        EmitKind::Ast => f.gen_ast().context("Loop tree construction failed")?.to_string(),
        EmitKind::Ir => f.codegen().context("Lowering failed")?.to_string(),
    };
    write_output(&cli.output, &output)
}

fn apply_transforms(cli: &Cli, f: &mut Function, id: CompId) -> Result<()> {
    let name = f.comp(id).name.clone();

    // loops 0 and 1 are rewritten, so everything fused at level 1 moves too
    if cli.skew.is_some() || cli.tile.is_some() {
        let group = f.fused_computations(id, 1);
        for &member in &group {
            let member_name = f.comp(member).name.clone();
            if let Some(factor) = cli.skew {
                info!("Skewing {} by {}", member_name, factor);
                f.skew(member, 0, 1, factor)?;
            }
            if let Some(size) = cli.tile {
                info!("Tiling {} by {}x{}", member_name, size, size);
                f.tile(member, 0, 1, size, size)?;
            }
        }
    }

    if !f.check_legality_for_function()? {
        if cli.force {
            warn!("Schedule of {} violates a dependence, continuing because of --force", name);
        } else {
            bail!("the requested schedule of `{}` violates a dependence (use --force to keep it)", name);
        }
    }

    if let Some(level) = cli.parallel {
        let group = f.fused_computations(id, level);
        if f.is_parallel_legal(level, &group)? || cli.force {
            for &member in &group {
                info!("Parallelizing {} at level {}", f.comp(member).name, level);
                f.parallelize(member, level)?;
            }
        } else {
            warn!("Loop level {} of {} carries a dependence, leaving it sequential", level, name);
        }
    }
    if let Some((level, width)) = cli.vectorize {
        info!("Vectorizing {} at level {} by {}", name, level, width);
        f.vectorize(id, level, width)?;
    }
    Ok(())
}

fn render_deps(f: &Function) -> Result<String> {
    let deps = f.dependences().context("dependences missing after analysis")?;
    let mut out = format!("{}\n", deps);
    for d in f.dependence_summaries()? {
        out.push_str(&format!("{}\n", d));
    }
    Ok(out)
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}
