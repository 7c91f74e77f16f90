//! table2sheet - Convert photographed or scanned ruled tables into spreadsheets

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use table2sheet::app::{output_path, BatchRunner, ConversionEvent, ConversionJob};
use table2sheet::config::{self, AppConfig};
use table2sheet::output::SheetFormat;
use table2sheet::pipeline::{NoProgress, TableExtractor};
use table2sheet::storage;
use table2sheet::table::{rows_from_json, write_table};
use table2sheet::vision::{BlankEngine, ModelManager, PaddleRecognizer, SharedEngine};

#[derive(Parser, Debug)]
#[command(name = "table2sheet")]
#[command(about = "Convert photographed or scanned ruled tables into spreadsheets")]
struct Args {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert table images into spreadsheets
    Convert {
        /// Input images (PNG, JPEG, BMP, ...)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file (single input only)
        #[arg(short, long, conflicts_with = "output_dir")]
        output: Option<PathBuf>,

        /// Directory for output files
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output format (defaults to the output extension, then xlsx)
        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// Row grouping tolerance in pixels
        #[arg(long)]
        row_threshold: Option<u32>,

        /// Do not write annotated debug images
        #[arg(long)]
        no_debug: bool,

        /// Directory for annotated debug images
        #[arg(long)]
        debug_dir: Option<PathBuf>,

        /// Conversions to run in parallel
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Recognition model directory
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },

    /// Detect cells and rows without text recognition
    Detect {
        /// Input image
        input: PathBuf,

        /// Write rows as JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a spreadsheet from a rows JSON document
    Assemble {
        /// Rows JSON produced by `detect`
        rows: PathBuf,

        /// Output spreadsheet
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },

    /// Show or download the recognition models
    Models {
        /// Download missing models
        #[arg(long)]
        download: bool,
    },

    /// Write the default configuration
    InitConfig {
        /// Target path (defaults to the per-user config.toml)
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Xlsx,
    Csv,
}

impl From<FormatArg> for SheetFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Xlsx => SheetFormat::Xlsx,
            FormatArg::Csv => SheetFormat::Csv,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::InitConfig { path } => init_config(path),
        command => {
            let config = load_or_default_config(args.config.as_deref())?;
            run(command, config)
        }
    }
}

/// Load the explicit config, else the per-user one, else defaults
fn load_or_default_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(path) = storage::default_config_path() {
        if path.exists() {
            let config = config::load_config(&path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?;
            info!("Loaded configuration from {:?}", path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => storage::default_config_path()?,
    };
    config::save_config(&AppConfig::default(), &path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn run(command: Command, mut config: AppConfig) -> Result<()> {
    match command {
        Command::Convert {
            inputs,
            output,
            output_dir,
            format,
            row_threshold,
            no_debug,
            debug_dir,
            jobs,
            model_dir,
        } => {
            if let Some(threshold) = row_threshold {
                config.grouping.row_threshold = threshold;
            }
            if no_debug {
                config.debug.enabled = false;
            }
            if let Some(dir) = debug_dir {
                config.debug.directory = dir;
            }
            if let Some(jobs) = jobs {
                config.performance.workers = jobs;
            }
            if let Some(dir) = model_dir {
                config.recognition.model_dir = Some(dir);
            }
            if let Some(format) = format {
                config.output.format = Some(format.into());
            }
            config.validate()?;

            if output.is_some() && inputs.len() > 1 {
                bail!("--output takes a single input; use --output-dir for several");
            }
            let jobs = plan_jobs(&inputs, output, output_dir.as_deref(), &config)?;
            convert(jobs, config)
        }
        Command::Detect { input, output } => detect(&input, output.as_deref(), config),
        Command::Assemble {
            rows,
            output,
            format,
        } => assemble(&rows, &output, format.map(Into::into)),
        Command::Models { download } => models(download, &config),
        Command::InitConfig { path } => init_config(path),
    }
}

fn plan_jobs(
    inputs: &[PathBuf],
    output: Option<PathBuf>,
    output_dir: Option<&Path>,
    config: &AppConfig,
) -> Result<Vec<ConversionJob>> {
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    }

    let jobs = inputs
        .iter()
        .enumerate()
        .map(|(id, input)| {
            let (output, format) = match &output {
                Some(path) => (
                    path.clone(),
                    config
                        .output
                        .format
                        .or_else(|| SheetFormat::from_path(path))
                        .unwrap_or_default(),
                ),
                None => {
                    let format = config.output.format.unwrap_or_default();
                    (output_path(input, output_dir, format), format)
                }
            };
            ConversionJob::new(id, input.clone(), output, format)
        })
        .collect();
    Ok(jobs)
}

fn model_manager(config: &AppConfig) -> Result<ModelManager> {
    let language = &config.recognition.language;
    match &config.recognition.model_dir {
        Some(dir) => ModelManager::with_dir(dir.clone(), language),
        None => ModelManager::new(language),
    }
}

fn convert(jobs: Vec<ConversionJob>, config: AppConfig) -> Result<()> {
    let manager = model_manager(&config)?;
    let recognizer = PaddleRecognizer::load(
        &manager,
        &config.recognition,
        config.performance.intra_threads,
    )
    .context("Failed to initialize text recognition")?;

    let workers = config.performance.workers;
    let total = jobs.len();
    let runner = BatchRunner::new(TableExtractor::from_config(config), workers);
    let handle = runner.start(jobs, SharedEngine::new(recognizer));

    let mut failures = 0;
    for event in handle.events().iter() {
        match event {
            ConversionEvent::Started { job } => info!("[{}/{}] started", job + 1, total),
            ConversionEvent::Progress { job, stage } => {
                info!("[{}/{}] {}% {}", job + 1, total, stage.percent(), stage.label())
            }
            ConversionEvent::Finished { job, summary } => info!(
                "[{}/{}] done: {} cells in {} rows ({} horizontal / {} vertical lines)",
                job + 1,
                total,
                summary.cells,
                summary.rows,
                summary.horizontal_lines,
                summary.vertical_lines
            ),
            ConversionEvent::Failed { job, error } => {
                failures += 1;
                warn!("[{}/{}] failed: {}", job + 1, total, error);
            }
        }
    }
    drop(handle);

    if failures > 0 {
        bail!("{} of {} conversions failed", failures, total);
    }
    Ok(())
}

fn detect(input: &Path, output: Option<&Path>, config: AppConfig) -> Result<()> {
    let extractor = TableExtractor::from_config(config);
    let extraction = extractor.extract_from_path(input, &mut BlankEngine, &NoProgress)?;
    info!(
        "{} cells in {} rows ({} horizontal / {} vertical lines)",
        extraction.table.cell_count(),
        extraction.table.row_count(),
        extraction.horizontal_lines,
        extraction.vertical_lines
    );

    let json = serde_json::to_string_pretty(&extraction.table.rows)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn assemble(rows: &Path, output: &Path, format: Option<SheetFormat>) -> Result<()> {
    let content =
        std::fs::read_to_string(rows).with_context(|| format!("Failed to read {:?}", rows))?;
    let table = rows_from_json(&content)?;

    let format = format
        .or_else(|| SheetFormat::from_path(output))
        .unwrap_or_default();
    let mut writer = format.writer();
    let cells = write_table(&table, output, writer.as_mut())?;
    info!("Wrote {} cells to {:?}", cells, output);
    Ok(())
}

fn models(download: bool, config: &AppConfig) -> Result<()> {
    let manager = model_manager(config)?;
    if download {
        manager.ensure_all_models()?;
    }

    println!(
        "Models for '{}' in {}:",
        manager.language(),
        manager.models_dir().display()
    );
    for status in manager.get_model_status() {
        println!(
            "  {:<22} {:<10} {}",
            status.model_type.display_name(),
            if status.available { "ready" } else { "missing" },
            status
                .size_bytes
                .map(|s| format!("{} bytes", s))
                .unwrap_or_default()
        );
    }
    Ok(())
}
