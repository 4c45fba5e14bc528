use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use songplay_warehouse::config::{AppConfig, CliConfig, FileConfig};
use songplay_warehouse::export::PartitionedExporter;
use songplay_warehouse::source::LocalFileTree;
use songplay_warehouse::{
    LoadMode, LocalBulkTransfer, Pipeline, RunReport, SourceTrees, SqliteWarehouse, TargetStore,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "songplay-etl")]
#[command(about = "Load song catalog and listening logs into a songplay star schema")]
struct CliArgs {
    /// TOML configuration file. Its values override command-line flags.
    #[clap(long, value_parser = parse_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the pipeline into the warehouse.
    Load(LoadArgs),

    /// Writes every warehouse table as partitioned JSON Lines.
    Export {
        #[clap(long, value_parser = parse_path)]
        db: Option<PathBuf>,

        /// Export root directory.
        #[clap(long, value_parser = parse_path)]
        output: Option<PathBuf>,
    },

    /// Drops all warehouse and staging tables.
    Reset {
        #[clap(long, value_parser = parse_path)]
        db: Option<PathBuf>,
    },

    /// Prints the row count of every warehouse table.
    Counts {
        #[clap(long, value_parser = parse_path)]
        db: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// direct or staged.
    #[clap(long)]
    mode: Option<LoadMode>,

    /// Path to the SQLite warehouse file.
    #[clap(long, value_parser = parse_path)]
    db: Option<PathBuf>,

    /// Root of the song catalog documents.
    #[clap(long, value_parser = parse_path)]
    song_data: Option<PathBuf>,

    /// Root of the activity logs.
    #[clap(long, value_parser = parse_path)]
    log_data: Option<PathBuf>,

    /// Regular expression input file names must match.
    #[clap(long)]
    file_pattern: Option<String>,

    /// Largest accepted difference between catalog duration and played length, in seconds.
    #[clap(long)]
    duration_tolerance: Option<f64>,

    /// Staged mode: where the bulk transfer reads catalog documents.
    #[clap(long)]
    songs_location: Option<String>,

    /// Staged mode: where the bulk transfer reads activity logs.
    #[clap(long)]
    events_location: Option<String>,

    /// Staged mode: identity the bulk transfer acts as.
    #[clap(long)]
    role: Option<String>,
}

impl CliArgs {
    fn cli_config(&self) -> CliConfig {
        match &self.command {
            Command::Load(args) => CliConfig {
                db_path: args.db.clone(),
                song_data: args.song_data.clone(),
                log_data: args.log_data.clone(),
                file_pattern: args.file_pattern.clone(),
                duration_tolerance: args.duration_tolerance,
                mode: args.mode,
                songs_location: args.songs_location.clone(),
                events_location: args.events_location.clone(),
                role: args.role.clone(),
                output_dir: None,
            },
            Command::Export { db, output } => CliConfig {
                db_path: db.clone(),
                output_dir: output.clone(),
                ..Default::default()
            },
            Command::Reset { db } | Command::Counts { db } => CliConfig {
                db_path: db.clone(),
                ..Default::default()
            },
        }
    }
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

fn run_load(config: &AppConfig) -> Result<ExitCode> {
    info!("Opening warehouse at {:?}...", config.db_path);
    let warehouse = match SqliteWarehouse::open(&config.db_path) {
        Ok(warehouse) => warehouse,
        Err(err) => {
            error!("Run failed, warehouse unreachable: {}", err);
            return Ok(ExitCode::FAILURE);
        }
    };

    let bar = progress_bar()?;
    let callback_bar = bar.clone();
    let mut pipeline =
        Pipeline::new(warehouse, config.pipeline_config()).with_progress(move |progress| {
            callback_bar.set_length(progress.total as u64);
            callback_bar.set_position(progress.processed as u64);
            callback_bar.set_message(progress.unit.clone());
        });

    let report = match config.mode {
        LoadMode::Direct => {
            let filter = config.source_filter()?;
            let catalog = LocalFileTree::new(config.song_data.clone(), filter.clone());
            let events = LocalFileTree::new(config.log_data.clone(), filter);
            pipeline.run_direct(&SourceTrees {
                catalog: &catalog,
                events: &events,
            })
        }
        LoadMode::Staged => {
            let transfer = LocalBulkTransfer::new(config.source_filter()?);
            pipeline.run_staged(&transfer, &config.staging)
        }
    };
    bar.finish_and_clear();

    print_report(&report);
    if report.is_failed() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &RunReport) {
    println!("{} load: {:?}", report.mode, report.state);
    println!(
        "units: {}/{} processed, {} failed",
        report.units_processed,
        report.units_total,
        report.failed_units()
    );
    println!("written: {}", report.written);
    println!("unmatched songplays: {}", report.unmatched_songplays);
    if let Some(counts) = &report.table_counts {
        println!("tables: {}", counts);
    }
    if let Some(fatal) = &report.fatal {
        println!("fatal: {}", fatal);
    }
}

fn main() -> Result<ExitCode> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.cli_config(), file_config)?;

    match &cli_args.command {
        Command::Load(_) => run_load(&config),
        Command::Export { .. } => {
            let warehouse = SqliteWarehouse::open(&config.db_path)
                .with_context(|| format!("Failed to open warehouse {:?}", config.db_path))?;
            let summary = PartitionedExporter::new(config.output_dir()?).export(&warehouse)?;
            println!("exported: {}", summary);
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset { .. } => {
            let mut warehouse = SqliteWarehouse::open(&config.db_path)
                .with_context(|| format!("Failed to open warehouse {:?}", config.db_path))?;
            warehouse.drop_all()?;
            println!("reset: {}", warehouse.location());
            Ok(ExitCode::SUCCESS)
        }
        Command::Counts { .. } => {
            let mut warehouse = SqliteWarehouse::open(&config.db_path)
                .with_context(|| format!("Failed to open warehouse {:?}", config.db_path))?;
            println!("{}", warehouse.table_counts()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
