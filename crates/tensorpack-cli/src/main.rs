use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use tensorpack::{io, CodecConfig, DType, Format, Shape};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML file with codec limits
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// list the content
    List {
        /// The path to the tensor file.
        tensor_file: PathBuf,
        /// if detailed listing is requested
        #[arg(short, long)]
        detailed: bool,
        /// File format; guessed from the extension or contents by default
        #[arg(long, value_enum, default_value_t = FormatArg::Auto)]
        format: FormatArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Auto,
    Safetensors,
    Checkpoint,
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .try_init()
        .unwrap_or_else(|err| {
            eprintln!("Failed to init logger: {}", err);
        });
}

/// One line per tensor: `name` or `name - DTYPE - d0 x d1`.
fn format_entry(name: &str, dtype: DType, shape: &Shape, detailed: bool) -> String {
    if !detailed {
        return name.to_string();
    }
    let dims: Vec<String> = shape.dims().iter().map(|d| d.to_string()).collect();
    format!("{} - {} - {}", name, dtype, dims.join(" x "))
}

fn list(path: &Path, format: FormatArg, detailed: bool, config: &CodecConfig) -> Result<()> {
    let format = match format {
        FormatArg::Auto => io::detect_format(path)
            .with_context(|| format!("Detecting the format of {}", path.display()))?,
        FormatArg::Safetensors => Format::SafeTensors,
        FormatArg::Checkpoint => Format::Checkpoint,
    };
    debug!(path = %path.display(), %format, "listing");

    match format {
        Format::SafeTensors => {
            let container = io::load_mmap_with(path, &config.limits)
                .with_context(|| format!("Parsing {} as SafeTensor", path.display()))?;
            for d in container.descriptors() {
                println!("{}", format_entry(&d.name, d.dtype, &d.shape, detailed));
            }
        }
        Format::Checkpoint => {
            let tensors = io::load_checkpoint(path, &config.limits)
                .with_context(|| format!("Parsing {} as checkpoint", path.display()))?;
            for (name, t) in &tensors {
                println!("{}", format_entry(name, t.dtype(), t.shape(), detailed));
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let config = match &cli.config {
        Some(path) => CodecConfig::from_file(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?,
        None => CodecConfig::default(),
    };

    match &cli.command {
        Some(Commands::List {
            tensor_file,
            detailed,
            format,
        }) => list(tensor_file, *format, *detailed, &config),
        None => Ok(()),
    }
}
