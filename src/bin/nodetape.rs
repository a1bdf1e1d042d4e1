//! Binary entry point for the node tape inspection CLI.
#![forbid(unsafe_code)]

#[path = "nodetape/config.rs"]
mod config;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use nodetape::{
    admin::{
        open_store, stats, verify, AdminOpenOptions, StatsReport, VerifyLevel, VerifyReport,
    },
    primitives::region::MapMode,
    storage::{FrameLayout, HistogramReport, IndexMetadata, TapeWriter},
    types::{Label, ScalarKind, VectorRef},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::{fmt, EnvFilter};

use config::{CliConfig, Profile};

#[derive(Parser, Debug)]
#[command(
    name = "nodetape",
    version,
    about = "Inspect and verify node tape regions",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, env = "NODETAPE_CONFIG", help = "Path to the CLI config file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Profile to take layout settings from")]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        default_value = "warn",
        help = "Log filter used when RUST_LOG is unset"
    )]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct OpenArgs {
    #[arg(long, global = true, help = "Vector dimensionality")]
    dimensions: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Stored scalar kind")]
    scalar: Option<ScalarArg>,

    #[arg(long, global = true, help = "Upper-layer connectivity")]
    connectivity: Option<usize>,

    #[arg(long, global = true, help = "Number of frames to index")]
    nodes: Option<usize>,

    #[arg(long, global = true, help = "Width of neighbor ids in bytes")]
    id_bytes: Option<usize>,

    #[arg(long, global = true, help = "Bytes reserved before the first frame")]
    header_bytes: Option<usize>,

    #[arg(long, global = true, help = "Levels at or above this are reported as anomalous")]
    max_tracked_level: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print layout, tape, and header statistics")]
    Stats {
        #[arg(value_name = "REGION")]
        region: Option<PathBuf>,
    },

    #[command(about = "Verify frames and neighbor lists")]
    Verify {
        #[arg(value_name = "REGION")]
        region: Option<PathBuf>,

        #[arg(
            long,
            value_enum,
            default_value_t = VerifyLevelArg::Full,
            help = "Verification level"
        )]
        level: VerifyLevelArg,
    },

    #[command(about = "Print the per-level node histogram")]
    Histogram {
        #[arg(value_name = "REGION")]
        region: Option<PathBuf>,
    },

    #[command(about = "Write a region of random vectors")]
    Generate {
        #[arg(value_name = "OUT")]
        out: PathBuf,

        #[arg(long, default_value_t = 1000, help = "Number of nodes")]
        count: usize,

        #[arg(long, default_value_t = 0, help = "Free bytes appended after the tape")]
        spare: usize,

        #[arg(long, default_value_t = 7, help = "Random seed")]
        seed: u64,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ScalarArg {
    F64,
    F32,
    F16,
    F8,
    B1x8,
}

impl From<ScalarArg> for ScalarKind {
    fn from(value: ScalarArg) -> Self {
        match value {
            ScalarArg::F64 => ScalarKind::F64,
            ScalarArg::F32 => ScalarKind::F32,
            ScalarArg::F16 => ScalarKind::F16,
            ScalarArg::F8 => ScalarKind::F8,
            ScalarArg::B1x8 => ScalarKind::B1x8,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    install_tracing_subscriber(&cli.log);
    let config = CliConfig::load(cli.config.clone())?;
    let profile = config.select(cli.profile.as_deref())?.cloned().unwrap_or_default();
    let open_opts = build_open_options(&cli.open, &profile);

    match cli.command {
        Command::Stats { region } => {
            let path = region_path(region, &profile)?;
            let report = stats(&path, &open_opts)?;
            emit(&cli.format, &report, |fmt| print_stats_text(fmt, &report))?;
        }
        Command::Verify { region, level } => {
            let path = region_path(region, &profile)?;
            let report = verify(&path, &open_opts, level.into())?;
            emit(&cli.format, &report, |fmt| print_verify_text(fmt, &report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Histogram { region } => {
            let path = region_path(region, &profile)?;
            let handle = open_store(&path, &open_opts)?;
            let report = handle
                .store
                .histogram()
                .map(|h| h.snapshot())
                .ok_or("store has no histogram")?;
            emit(&cli.format, &report, |fmt| print_histogram_text(fmt, &report))?;
        }
        Command::Generate {
            out,
            count,
            spare,
            seed,
        } => {
            let written = generate(&out, &open_opts, count, spare, seed)?;
            println!("Wrote {count} nodes ({written} bytes) to {}", out.display());
        }
    }
    Ok(())
}

fn install_tracing_subscriber(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_open_options(args: &OpenArgs, profile: &Profile) -> AdminOpenOptions {
    let mut opts = AdminOpenOptions {
        map_mode: MapMode::ReadOnly,
        dimensions: args.dimensions.or(profile.dimensions),
        scalar: args.scalar.map(ScalarKind::from).or(profile.scalar),
        connectivity: args.connectivity.or(profile.connectivity),
        node_count: args.nodes.or(profile.nodes),
        ..AdminOpenOptions::default()
    };
    if let Some(id_bytes) = args.id_bytes.or(profile.id_bytes) {
        opts.store = opts.store.id_bytes(id_bytes);
    }
    if let Some(header_bytes) = args.header_bytes.or(profile.header_bytes) {
        opts.store = opts.store.header_bytes(header_bytes);
    }
    if let Some(level) = args.max_tracked_level.or(profile.max_tracked_level) {
        opts.store = opts.store.max_tracked_level(level);
    }
    opts.store = opts.store.log_histogram(false);
    opts
}

fn region_path(explicit: Option<PathBuf>, profile: &Profile) -> Result<PathBuf, Box<dyn Error>> {
    explicit
        .or_else(|| profile.region.clone())
        .ok_or_else(|| "no region given; pass a path or set one in the profile".into())
}

fn generate(
    out: &Path,
    opts: &AdminOpenOptions,
    count: usize,
    spare: usize,
    seed: u64,
) -> Result<usize, Box<dyn Error>> {
    let dimensions = opts.dimensions.ok_or("--dimensions is required")?;
    let connectivity = opts.connectivity.unwrap_or(16);
    let scalar = opts.scalar.unwrap_or(ScalarKind::F32);
    let metadata = IndexMetadata::derive(connectivity, opts.store.id_bytes)?;
    let layout = FrameLayout::new(dimensions, scalar, metadata)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut writer = TapeWriter::new(layout, opts.store.header_bytes);
    let mut scratch = vec![0u8; layout.vector_bytes()];
    for idx in 0..count {
        let level = metadata.random_level(&mut rng);
        let vector = random_vector(&mut rng, scalar, dimensions, &mut scratch);
        writer.push(Label(idx as u64), vector.view(), level)?;
    }
    let bytes = writer.finish_with_spare(spare)?;
    fs::write(out, &bytes)?;
    Ok(bytes.len())
}

/// Owned random vector of any scalar kind.
enum RandomVector {
    F64(Vec<f64>),
    F32(Vec<f32>),
    F16(Vec<u16>),
    F8(Vec<i8>),
    B1x8(Vec<u8>),
}

impl RandomVector {
    fn view(&self) -> VectorRef<'_> {
        match self {
            RandomVector::F64(v) => VectorRef::F64(v),
            RandomVector::F32(v) => VectorRef::F32(v),
            RandomVector::F16(v) => VectorRef::F16(v),
            RandomVector::F8(v) => VectorRef::F8(v),
            RandomVector::B1x8(v) => VectorRef::B1x8(v),
        }
    }
}

fn random_vector(
    rng: &mut StdRng,
    scalar: ScalarKind,
    dimensions: usize,
    scratch: &mut [u8],
) -> RandomVector {
    match scalar {
        ScalarKind::F64 => RandomVector::F64((0..dimensions).map(|_| rng.gen()).collect()),
        ScalarKind::F32 => RandomVector::F32((0..dimensions).map(|_| rng.gen()).collect()),
        // Half-precision values in [0, 1): sign and exponent fixed, random mantissa.
        ScalarKind::F16 => RandomVector::F16(
            (0..dimensions)
                .map(|_| 0x3800 | (rng.gen::<u16>() & 0x03FF))
                .collect(),
        ),
        ScalarKind::F8 => RandomVector::F8((0..dimensions).map(|_| rng.gen()).collect()),
        ScalarKind::B1x8 => {
            rng.fill(scratch);
            RandomVector::B1x8(scratch.to_vec())
        }
    }
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_stats_text(_: OutputFormat, report: &StatsReport) {
    println!("Layout:");
    println!(
        "  dimensions={} scalar={} vector_bytes={} base_frame_bytes={}",
        report.layout.dimensions,
        report.layout.scalar,
        report.layout.vector_bytes,
        report.layout.base_frame_bytes
    );
    println!(
        "  connectivity_max_base={} neighbors_bytes={} neighbors_base_bytes={}",
        report.layout.connectivity_max_base,
        report.layout.neighbors_bytes,
        report.layout.neighbors_base_bytes
    );
    println!("Tape:");
    println!(
        "  mode={} nodes={} region_bytes={} header_bytes={}",
        report.tape.mode, report.tape.nodes, report.tape.region_bytes, report.tape.header_bytes
    );
    if let (Some(frames), Some(tail)) = (report.tape.frame_bytes, report.tape.tail_bytes) {
        println!(
            "  frame_bytes={frames} tail_bytes={tail} average_frame_bytes={:.1} exact={}",
            report.tape.average_frame_bytes.unwrap_or(0.0),
            report.tape.exact.unwrap_or(false)
        );
    }
    if let Some(header) = &report.header {
        println!("Header:");
        println!(
            "  node_count={} connectivity={} entry={} max_level={}",
            header.node_count,
            header.connectivity,
            header
                .entry
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".into()),
            header.max_level
        );
    }
    if let Some(fs) = &report.filesystem {
        println!("Filesystem:");
        println!("  path={} size_bytes={}", fs.path, fs.size_bytes);
    }
}

fn print_verify_text(_: OutputFormat, report: &VerifyReport) {
    println!(
        "Verify ({:?}, {}) => success={} nodes_checked={} neighbor_links={} max_level={} frame_bytes={}",
        report.level,
        report.mode,
        report.success,
        report.counts.nodes_checked,
        report.counts.neighbor_links,
        report.counts.max_level,
        report.counts.frame_bytes,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_histogram_text(_: OutputFormat, report: &HistogramReport) {
    let last = report
        .buckets
        .iter()
        .rposition(|&count| count > 0)
        .unwrap_or(0);
    for (level, count) in report.buckets.iter().enumerate().take(last + 1) {
        println!("level {level:>2}: {count}");
    }
    if report.anomalous > 0 {
        println!("anomalous: {}", report.anomalous);
    }
    println!("total: {}", report.total);
}
