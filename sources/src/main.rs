use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use tsdr_sources::{LoaderConfig, SourceDescriptor, SourceManager};

/// TempestSDR source tool - list, locate and probe SDR source plugins
#[derive(Parser, Debug)]
#[command(name = "tsdr-sources")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Extra plugin directory, searched after the configured ones
    #[arg(short = 'p', long = "plugin-dir", value_name = "DIR")]
    plugin_dirs: Vec<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered sources
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show which library a source would load
    Resolve {
        /// Source display name, e.g. "Soapy"
        name: String,
    },

    /// Open a source, stream for a moment and print statistics
    Probe {
        /// Source display name, e.g. "Soapy"
        name: String,

        /// Parameter string passed to the module's init
        #[arg(long)]
        params: Option<String>,

        /// Center frequency in Hz
        #[arg(short = 'f', long)]
        frequency: Option<u64>,

        /// Sample rate in Hz
        #[arg(short = 's', long = "sample-rate")]
        sample_rate: Option<u32>,

        /// Gain in dB
        #[arg(short = 'g', long)]
        gain: Option<f32>,

        /// Samples requested per read
        #[arg(long, default_value_t = 16_384)]
        samples: usize,

        /// Number of reads
        #[arg(long, default_value_t = 10)]
        reads: usize,

        /// Read timeout in milliseconds
        #[arg(long = "timeout-ms", default_value_t = 500)]
        timeout_ms: u64,
    },
}

#[derive(Serialize)]
struct SourceListing<'a> {
    name: &'a str,
    module_id: &'a str,
    sample_rate_query: bool,
    description: &'a str,
}

impl<'a> From<&'a SourceDescriptor> for SourceListing<'a> {
    fn from(descriptor: &'a SourceDescriptor) -> Self {
        Self {
            name: descriptor.display_name(),
            module_id: descriptor.module_id(),
            sample_rate_query: descriptor.supports_sample_rate_query(),
            description: descriptor.description(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Load configuration from file or environment
    let mut config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        LoaderConfig::from_file(&config_path)?
    } else {
        LoaderConfig::from_env()?
    };
    config.search_paths.extend(cli.plugin_dirs);

    let manager = SourceManager::from_config(&config);

    match cli.command {
        Commands::List { json } => list(&manager, json),
        Commands::Resolve { name } => {
            let (descriptor, path) = manager.resolve(&name)?;
            println!("{} -> {}", descriptor.module_id(), path.display());
            Ok(())
        }
        Commands::Probe {
            name,
            params,
            frequency,
            sample_rate,
            gain,
            samples,
            reads,
            timeout_ms,
        } => {
            if samples == 0 {
                bail!("--samples must be greater than zero");
            }

            let source = manager.open(&name)?;
            if let Some(plugin_name) = source.plugin_name() {
                println!("Plugin: {plugin_name}");
            }

            match params {
                Some(params) => source.init_with_params(&params)?,
                None => source.init()?,
            }
            if let Some(rate) = sample_rate {
                let actual = source.set_sample_rate(rate)?;
                println!("Sample rate: {actual} Hz");
            }
            if let Some(hz) = frequency {
                source.set_frequency(hz)?;
                println!("Frequency: {hz} Hz");
            }
            if let Some(gain) = gain {
                source.set_gain(gain)?;
            }
            if source.descriptor().supports_sample_rate_query() {
                println!("Reported sample rate: {} Hz", source.sample_rate()?);
            }

            source.start()?;
            let timeout = Duration::from_millis(timeout_ms);
            for i in 0..reads {
                let block = source.read_timeout(samples, timeout)?;
                let power = if block.is_empty() {
                    0.0
                } else {
                    block.iter().map(|s| s.norm_sqr()).sum::<f32>() / block.len() as f32
                };
                println!("read {:>3}: {:>7} samples, mean power {power:.6}", i + 1, block.len());
            }
            source.stop()?;

            let stats = source.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            source.close()?;
            Ok(())
        }
    }
}

fn list(manager: &SourceManager, json: bool) -> anyhow::Result<()> {
    let sources = manager.list_sources();

    if json {
        let listing: Vec<SourceListing<'_>> =
            sources.iter().map(|d| SourceListing::from(d.as_ref())).collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{:<20} {:<22} {}", "NAME", "MODULE", "RATE QUERY");
    for descriptor in &sources {
        println!(
            "{:<20} {:<22} {}",
            descriptor.display_name(),
            descriptor.module_id(),
            if descriptor.supports_sample_rate_query() { "yes" } else { "no" }
        );
    }
    Ok(())
}
