//! CLI entry point for the NBT feed-in rate converter.
//!
//! With no arguments, converts every PG&E NBT rate CSV (or zipped CSV) in the
//! current directory into JSON feed files under `output/`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use nbt_feed_rates::config::Settings;
use nbt_feed_rates::convert::{Converter, convert_single};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "nbt_feed_rates")]
#[command(about = "Convert PG&E NBT rate CSVs into JSON feed-in rate files", long_about = None)]
struct Cli {
    /// Directory scanned for input CSV and zip files
    #[arg(short, long, default_value = ".", env = "NBT_INPUT_DIR")]
    input_dir: PathBuf,

    /// Root directory for the generated JSON files
    #[arg(short, long, default_value = "output", env = "NBT_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Optional JSON settings file overriding markers, vintages and patterns
    #[arg(short, long, env = "NBT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one CSV into a single flat JSON file
    Single {
        /// CSV file to convert
        #[arg(short, long, default_value = "2025.csv")]
        input: PathBuf,

        /// JSON file to write
        #[arg(short, long, default_value = "feed-in-rates.json")]
        output: PathBuf,
    },
}

/// Console output on stdout, plus a JSON rolling log file when
/// `LOG_FILE_PATH` is set. The returned guard must outlive logging.
fn init_tracing() -> Result<Option<WorkerGuard>> {
    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stdout)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let (json_layer, guard) = match std::env::var("LOG_FILE_PATH") {
        Ok(log_file_path) => {
            let path = Path::new(&log_file_path);
            let log_dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or(Path::new("logs"));
            let log_file_name = path
                .file_name()
                .unwrap_or(OsStr::new("nbt_feed_rates.log"));

            let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(non_blocking_file)
                .with_filter(
                    EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?),
                );
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(json_layer)
        .init();

    Ok(guard)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_tracing()?;

    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Single { input, output }) => {
            convert_single(&input, &output, &settings)?;
        }
        None => {
            let converter = Converter::new(settings)?;
            converter.run(&cli.input_dir, &cli.output_dir)?;
        }
    }

    Ok(())
}
