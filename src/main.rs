//! imgpipe - bounded multi-stage image pipeline CLI
//!
//! Reads every image of a directory, runs it through the configured transform
//! stages on worker pools and writes PNGs to an output directory.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use imgpipe_rs::{
    config::PipelineConfig,
    imaging::{DirSink, DirSource, ImageSink, ImageSource, MemorySink, MemorySource},
    pipeline::{OrderingMode, PipelineBuilder, PipelineEvent, ProgressReceiver, RunStatus},
};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Side length of images made up by `--synthetic`
const SYNTHETIC_SIZE: u32 = 32;

#[derive(Parser)]
#[command(name = "imgpipe")]
#[command(about = "Run images through a bounded multi-stage pipeline", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Path to a TOML pipeline configuration (built-in chain when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run(RunArgs),

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "pipeline.toml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Directory of input images
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory receiving the processed PNGs
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Generate this many in-memory images instead of reading --input
    #[arg(long, conflicts_with = "input")]
    synthetic: Option<usize>,

    /// Override the worker count of every transform stage
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override the capacity of every queue
    #[arg(long)]
    capacity: Option<usize>,

    /// Output ordering: preserve | any
    #[arg(long)]
    ordering: Option<OrderingMode>,

    /// Stop after this many images
    #[arg(long)]
    limit: Option<u64>,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,imgpipe_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => {
            let status = run_command(cli.config, cli.run)?;
            std::process::exit(status.exit_code());
        }
        Some(Commands::Run(args)) => {
            let status = run_command(cli.config, args)?;
            std::process::exit(status.exit_code());
        }
        Some(Commands::Validate) => validate_command(cli.config)?,
        Some(Commands::GenerateConfig { output }) => generate_config_command(output)?,
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_command(config_path: Option<PathBuf>, args: RunArgs) -> Result<RunStatus> {
    let mut config = load_config(config_path.as_ref())?;

    // Apply overrides
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(capacity) = args.capacity {
        config = config.with_capacity(capacity);
    }
    if let Some(ordering) = args.ordering {
        config.ordering = ordering;
    }
    if args.limit.is_some() {
        config.limit = args.limit;
    }
    config.validate()?;

    let source: Box<dyn ImageSource> = match (&args.input, args.synthetic) {
        (Some(dir), _) => Box::new(DirSource::open(dir)?),
        (None, Some(count)) => {
            Box::new(MemorySource::synthetic(count, SYNTHETIC_SIZE, SYNTHETIC_SIZE))
        }
        (None, None) => bail!("either --input or --synthetic is required"),
    };
    let sink: Box<dyn ImageSink> = match &args.output {
        Some(dir) => Box::new(DirSink::create(dir)?),
        None => {
            tracing::warn!("No --output given; processed images are discarded");
            Box::new(MemorySink::new())
        }
    };

    let (events, progress) = ProgressReceiver::channel();
    let pipeline = PipelineBuilder::from_config(&config).events(events).build()?;

    let handle = std::thread::Builder::new()
        .name("orchestrator".to_string())
        .spawn(move || pipeline.run(source, sink))
        .context("Failed to start the orchestrator thread")?;

    print_progress(&progress);

    let report = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Orchestrator thread panicked"))?;

    println!(
        "{:?}: {} of {} images saved, {} errors, {} ms",
        report.status,
        report.items_saved,
        report.items_produced,
        report.errors.len(),
        report.elapsed_ms
    );
    for error in &report.errors {
        match error.seq {
            Some(seq) => println!("  [{}] {} {}: {}", error.stage, seq, error.kind, error.message),
            None => println!("  [{}] {}: {}", error.stage, error.kind, error.message),
        }
    }

    if let Some(path) = &args.report {
        report
            .save_json(path)
            .with_context(|| format!("Failed to write report {:?}", path))?;
        tracing::info!("Wrote run report to {:?}", path);
    }

    Ok(report.status)
}

/// One dot per saved image until the pipeline finishes.
fn print_progress(progress: &ProgressReceiver) {
    let mut stdout = std::io::stdout();
    for event in progress.iter() {
        match event {
            PipelineEvent::Saved { .. } => {
                let _ = write!(stdout, ".");
                let _ = stdout.flush();
            }
            PipelineEvent::Aborted { reason } => {
                let _ = writeln!(stdout);
                tracing::error!("Aborting: {}", reason);
            }
            PipelineEvent::Finished { .. } => break,
            _ => {}
        }
    }
    let _ = writeln!(stdout);
}

fn validate_command(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_ref())?;

    println!("Configuration is valid");
    println!("Ordering: {}", config.ordering);
    println!("Source queue capacity: {}", config.source_capacity);
    if let Some(limit) = config.limit {
        println!("Limit: {} images", limit);
    }
    for stage in &config.stages {
        println!(
            "Stage '{}': {:?}, {} workers, queue capacity {}",
            stage.name,
            stage.transform,
            stage.resolved_workers(),
            stage.queue_capacity
        );
    }
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let config = PipelineConfig::default();
    config.save(&output)?;
    println!("Generated sample configuration at {:?}", output);
    Ok(())
}
