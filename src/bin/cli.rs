//! Binary entry point for the extentdb administrative CLI.
#![forbid(unsafe_code)]

#[path = "cli/config.rs"]
mod config;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use extentdb::{
    admin::{
        load_json_lines, stats, verify, LoadReport, StatsReport, VerifyLevel, VerifyReport,
    },
    storage::{namespace::index_catalog, namespace::Namespace, CounterMetrics, MetricsSnapshot},
    Document, OpContext, StorageManager, StoreOptions,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(
    name = "extentdb",
    version,
    about = "Administrative CLI for the extentdb record store",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "EXTENTDB_CONFIG",
        help = "TOML store configuration (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Write data files under DIR instead of memory (existing files are replaced)"
    )]
    dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Insert JSON-lines documents into a namespace and report on the store")]
    Load(LoadCmd),
}

#[derive(Args, Debug)]
struct LoadCmd {
    #[arg(value_name = "NS", help = "Target namespace, <db>.<collection>")]
    ns: String,

    #[arg(value_name = "FILE", required = true, help = "JSON-lines input files")]
    inputs: Vec<PathBuf>,

    #[arg(long, help = "Create the collection as a capped collection")]
    capped: bool,

    #[arg(long, value_name = "BYTES", help = "Initial extent size of the collection")]
    size: Option<f64>,

    #[arg(long, value_name = "COUNT", help = "Record ceiling of a capped collection")]
    max: Option<f64>,

    #[arg(
        long = "index",
        value_name = "FIELD[:-1]",
        action = ArgAction::Append,
        help = "Secondary index over a dotted field path (repeatable)"
    )]
    indexes: Vec<String>,

    #[arg(long, help = "Print record and free-space statistics after loading")]
    stats: bool,

    #[arg(long, help = "Verify store structures after loading")]
    verify: bool,

    #[arg(
        long,
        value_enum,
        default_value_t = VerifyLevelArg::Full,
        help = "Verification level"
    )]
    level: VerifyLevelArg,
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

#[derive(Debug, Serialize)]
struct LoadOutput {
    loads: Vec<LoadReport>,
    indexes: Vec<String>,
    metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<StatsReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verify: Option<VerifyReport>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Returns `Ok(false)` when verification reported problems.
fn run() -> Result<bool, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    let mut opts = StoreOptions::in_memory().with_config(&config.store);
    if let Some(dir) = &cli.dir {
        opts = opts.dir(dir);
    }
    let metrics = Arc::new(CounterMetrics::default());
    opts = opts.metrics(metrics.clone());

    match cli.command {
        Command::Load(cmd) => {
            let store = StorageManager::open(opts)?;
            let output = run_load(&store, &cmd, &metrics)?;
            emit(cli.format, &output, || print_load_text(&output))?;
            Ok(output.verify.as_ref().map_or(true, |report| report.success))
        }
    }
}

fn run_load(
    store: &StorageManager,
    cmd: &LoadCmd,
    metrics: &CounterMetrics,
) -> Result<LoadOutput, Box<dyn Error>> {
    let ctx = OpContext::user();
    let ns = Namespace::parse(&cmd.ns)?;

    let mut request = Map::new();
    if cmd.capped {
        request.insert("capped".into(), Value::Bool(true));
    }
    if let Some(size) = cmd.size {
        request.insert("size".into(), json!(size));
    }
    if let Some(max) = cmd.max {
        request.insert("max".into(), json!(max));
    }
    if store.collection(ns.as_str()).is_err() {
        store.create_collection(&ctx, ns.as_str(), &Document::from(request))?;
    }

    let catalog = index_catalog(ns.db());
    let mut indexes = Vec::new();
    for spec in &cmd.indexes {
        let definition = index_definition(ns.as_str(), spec)?;
        if store.insert(&ctx, &catalog, &definition)?.is_some() {
            indexes.extend(definition.get_str("name").map(str::to_owned));
        } else {
            eprintln!("warning: index {spec} was not created");
        }
    }

    let mut loads = Vec::with_capacity(cmd.inputs.len());
    for input in &cmd.inputs {
        loads.push(load_json_lines(store, &ctx, ns.as_str(), input)?);
    }
    if store.options().dir.is_some() {
        store.sync_all()?;
    }

    Ok(LoadOutput {
        loads,
        indexes,
        metrics: metrics.snapshot(),
        stats: if cmd.stats { Some(stats(store)?) } else { None },
        verify: if cmd.verify {
            Some(verify(store, cmd.level.into())?)
        } else {
            None
        },
    })
}

/// Builds `{ name, ns, key }` from `field` or `field:-1`.
fn index_definition(ns: &str, spec: &str) -> Result<Document, Box<dyn Error>> {
    let (field, order) = match spec.rsplit_once(':') {
        Some((field, "-1")) => (field, -1),
        Some((field, "1")) => (field, 1),
        Some(_) => return Err(format!("invalid index spec '{spec}', expected FIELD or FIELD:-1").into()),
        None => (spec, 1),
    };
    let field = field.trim();
    if field.is_empty() {
        return Err("index spec requires a field name".into());
    }
    Ok(Document::try_from(json!({
        "name": format!("{field}_{order}"),
        "ns": ns,
        "key": { (field): order },
    }))?)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_load_text(output: &LoadOutput) {
    for load in &output.loads {
        println!(
            "Loaded {} documents into {} (ignored={} blank={})",
            load.inserted, load.ns, load.ignored, load.blank_lines
        );
    }
    for name in &output.indexes {
        println!("Index {name} built");
    }
    let m = &output.metrics;
    println!(
        "Metrics: inserted={} deleted={} evictions={} extents={} files={} index_sync_failures={}",
        m.records_inserted,
        m.records_deleted,
        m.capped_evictions,
        m.extents_allocated,
        m.files_allocated,
        m.index_sync_failures
    );
    if let Some(report) = &output.stats {
        print_stats_text(report);
    }
    if let Some(report) = &output.verify {
        print_verify_text(report);
    }
}

fn print_stats_text(report: &StatsReport) {
    println!();
    for db in &report.databases {
        println!("Database {}: files={} bytes={}", db.name, db.files, db.file_bytes);
    }
    for coll in &report.collections {
        println!(
            "Collection {}: records={} data_bytes={} extents={} extent_bytes={} free_bytes={} fragments={}{}",
            coll.ns,
            coll.records,
            coll.data_bytes,
            coll.extents,
            coll.extent_bytes,
            coll.free_bytes,
            coll.free_fragments,
            if coll.capped { " capped" } else { "" }
        );
        for bucket in &coll.buckets {
            let class = bucket
                .class
                .map_or_else(|| "overflow".to_string(), |c| format!("<={c}"));
            println!("  bucket {class}: blocks={} bytes={}", bucket.blocks, bucket.bytes);
        }
        for index in &coll.indexes {
            println!("  index {} {}: entries={}", index.name, index.key, index.entries);
        }
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!();
    println!(
        "Verify ({:?}) => success={} collections={} extents={} records={} free_blocks={} index_entries={}",
        report.level,
        report.success,
        report.counts.collections,
        report.counts.extents,
        report.counts.records,
        report.counts.free_blocks,
        report.counts.index_entries,
    );
    for finding in &report.findings {
        println!("- {:?} [{}]: {}", finding.severity, finding.ns, finding.message);
    }
}
