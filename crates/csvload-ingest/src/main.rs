//! csvload - chunked CSV loading from the command line

use anyhow::{bail, Context, Result};
use clap::Parser;
use csvload_common::logging::{init_logging, LogConfig, LogLevel};
use csvload_ingest::interchange::{read_any, write_any};
use csvload_ingest::ui::{create_row_spinner, format_bytes, render_table, SpinnerObserver};
use csvload_ingest::{load_file, LoadPlan, LoadState, LoaderConfig, MemoryTable};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "csvload")]
#[command(author, version, about = "Load large CSV files in bounded memory")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON loader configuration file
    #[arg(short, long, global = true, env = "CSVLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Load a file and print a preview and summary
    Open {
        /// CSV file, optionally gzip-compressed
        path: PathBuf,

        /// Bytes read per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Rows in the preview
        #[arg(long)]
        preview_rows: Option<usize>,

        /// Rows to print
        #[arg(long, default_value_t = 10)]
        show: usize,
    },

    /// Convert between CSV(.gz), JSON and XML, chosen by extension
    Convert {
        input: PathBuf,
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("csvload")
        .build();
    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config)?;

    let base = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => LoaderConfig::default(),
    };
    let mut config = base.merge_env().context("Invalid CSVLOAD_* environment")?;

    // All caller-side callbacks run on this one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    match cli.command {
        Command::Open {
            path,
            chunk_size,
            preview_rows,
            show,
        } => {
            if let Some(size) = chunk_size {
                config.chunk_size_bytes = size;
                config.max_carry_bytes = config.max_carry_bytes.max(size);
            }
            if let Some(rows) = preview_rows {
                config.preview_rows = rows;
            }
            config.validate()?;
            runtime.block_on(open(&path, &config, show))
        },
        Command::Convert { input, output } => convert(&input, &output, &config),
    }
}

async fn open(path: &Path, config: &LoaderConfig, show: usize) -> Result<()> {
    let started = Instant::now();
    let mut model = MemoryTable::new();

    let plan = load_file(path, &mut model, config)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut controller = match plan {
        LoadPlan::Loaded { rows } => {
            print!("{}", render_table(model.as_table(), show));
            println!(
                "Loaded {} rows x {} columns in {:.2?}",
                rows,
                model.as_table().column_count(),
                started.elapsed()
            );
            return Ok(());
        },
        LoadPlan::Streaming(controller) => controller,
    };

    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    info!(path = %path.display(), size = %format_bytes(size), "Streaming large file");

    let preview = controller.load_preview()?;
    println!("Preview of {}:", path.display());
    print!("{}", render_table(&preview, show));

    controller.start_full_load()?;
    let cancel = controller.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling load");
            cancel.cancel();
        }
    });

    let mut observer = SpinnerObserver::new(create_row_spinner("Loading"));
    let state = controller.run(&mut model, &mut observer).await;
    interrupt.abort();

    match state {
        LoadState::Completed => {
            println!(
                "Loaded {} rows x {} columns ({}) in {:.2?}",
                model.as_table().row_count(),
                model.as_table().column_count(),
                format_bytes(size),
                started.elapsed()
            );
            Ok(())
        },
        LoadState::Cancelled => {
            println!("Load cancelled; no rows were loaded");
            Ok(())
        },
        _ => bail!(
            "{}",
            observer.error().unwrap_or("load ended unexpectedly")
        ),
    }
}

fn convert(input: &Path, output: &Path, config: &LoaderConfig) -> Result<()> {
    let table =
        read_any(input, config).with_context(|| format!("Failed to read {}", input.display()))?;
    write_any(output, &table, config)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Converted {} rows from {} to {}",
        table.row_count(),
        input.display(),
        output.display()
    );
    Ok(())
}
