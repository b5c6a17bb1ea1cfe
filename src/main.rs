//! motuclean: denoising and replicate filtering for eDNA metabarcoding count tables.
//!
//! Removes tag-switching leakage and control-driven contaminants, drops PCR
//! replicates that disagree with their siblings, merges the survivors into
//! one profile per biological sample and trims rare MOTUs.
//!
//! v0.3.0

use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;

mod config;
mod contamination;
mod dataset;
mod density;
mod depth;
mod error;
mod io;
mod leakage;
mod merge;
mod motu;
mod ordination;
mod pipeline;
mod pruner;
mod rarity;
mod reaction;

use config::FilterConfig;

/// Command-line arguments. Numeric flags override the configuration file.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// MOTU table: annotation columns followed by one count column per reaction
    #[arg(long)]
    input: PathBuf,

    /// Directory for the filtered tables and run summary
    #[arg(long, default_value = "motuclean_out")]
    output_dir: PathBuf,

    /// JSON file with filtering parameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// File of MOTU ids to remove, one per line
    #[arg(long)]
    deny_list: Option<PathBuf>,

    /// Field delimiter of the input table
    #[arg(long, default_value_t = '\t')]
    delimiter: char,

    /// Leak rate applied by the tag-switching correction
    #[arg(long)]
    leak_rate: Option<f64>,

    /// Minimum reads for a reaction to take part in pruning and merging
    #[arg(long)]
    min_depth: Option<f64>,

    /// Surviving replicates a biological sample needs to be kept
    #[arg(long)]
    min_replicates: Option<usize>,

    /// Relative abundance under which a MOTU is removed from a sample
    #[arg(long)]
    rare_cutoff: Option<f64>,

    /// Stop after writing the leak-rate calibration table
    #[arg(long, default_value_t = false)]
    sweep_only: bool,
}

impl Args {
    fn filter_config(&self) -> error::Result<FilterConfig> {
        let mut config = match &self.config {
            Some(path) => FilterConfig::from_json_file(path)?,
            None => FilterConfig::default(),
        };
        if let Some(path) = &self.deny_list {
            config.extend_deny_list_from_file(path)?;
        }
        if let Some(rate) = self.leak_rate {
            config.leak_rate = rate;
        }
        if let Some(depth) = self.min_depth {
            config.min_depth = depth;
        }
        if let Some(min) = self.min_replicates {
            config.min_replicates = min;
        }
        if let Some(cutoff) = self.rare_cutoff {
            config.rare_cutoff = cutoff;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::args().len() <= 1 {
        display_banner();
        std::process::exit(0);
    }

    let args = Args::parse();
    info!("Starting motuclean v{}", env!("CARGO_PKG_VERSION"));

    let start_time = std::time::Instant::now();
    match run_pipeline(args) {
        Ok(_) => {
            let duration = start_time.elapsed();
            info!("Pipeline completed successfully in {:.2} seconds", duration.as_secs_f64());
        }
        Err(e) => {
            error!("Pipeline failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn display_banner() {
    println!("{}", "motuclean".bright_green().bold());
    println!("{}", "Denoising and replicate filtering for eDNA metabarcoding tables".cyan());
    println!();
    println!("USAGE:");
    println!("    motuclean --input <FILE> [--output-dir <DIR>] [--config <JSON>] [OPTIONS]");
    println!();
    println!("Calibrate the leak rate first with --sweep-only, then set it with --leak-rate.");
    println!();
    println!("For full documentation, run:");
    println!("    motuclean --help");
    println!();
}

fn run_pipeline(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if !args.input.exists() {
        return Err(format!("Input file not found: {}", args.input.display()).into());
    }
    if !args.delimiter.is_ascii() {
        return Err(format!("Delimiter must be a single ASCII character, got {:?}", args.delimiter).into());
    }
    let config = args.filter_config()?;
    std::fs::create_dir_all(&args.output_dir)?;

    let input = io::read_motu_table(&args.input, args.delimiter as u8)?;
    let out = |name: &str| args.output_dir.join(name);

    if args.sweep_only {
        let annotated = pipeline::annotate_motus(&input, &config)?;
        let (sweep, _) = pipeline::calibrate(&annotated, &config);
        io::write_sweep(out("leakage_sweep.tsv"), &sweep)?;
        info!("Calibration table written to {}", out("leakage_sweep.tsv").display());
        return Ok(());
    }

    let progress = ProgressBar::new(pipeline::STAGES);
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} stages ({msg})")?
            .progress_chars("##-"),
    );
    let output = pipeline::run(&input, &config, &progress)?;
    progress.finish_with_message("done");

    if output.samples.n_rows() == 0 {
        warn!("No sample survived filtering; output tables contain headers only");
    }

    io::write_motus(out("motus.tsv"), output.samples.motus())?;
    io::write_samples(out("samples.tsv"), output.samples.rows())?;
    io::write_counts(out("counts.tsv"), &output.samples)?;
    io::write_reactions(out("reactions.tsv"), output.reactions.rows())?;
    io::write_sweep(out("leakage_sweep.tsv"), &output.summary.leakage_sweep)?;
    io::write_summary(out("summary.json"), &output.summary)?;

    info!(
        "{} samples x {} MOTUs written to {}",
        output.samples.n_rows(),
        output.samples.n_motus(),
        args.output_dir.display()
    );
    Ok(())
}
