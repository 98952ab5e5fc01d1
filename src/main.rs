//! texpolicy - picks a GPU texture encoding for every image

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use texpolicy::config::PolicyConfig;
use texpolicy::textures::{
    self, decode_image, discover_jobs, format_elapsed, AssetHints, BatchSummary,
    CompressorContext, ImageMetrics, PixelBuffer, TexturePipeline,
};

#[derive(Parser)]
#[command(name = "texpolicy")]
#[command(version)]
#[command(about = "Choose BC7/BC3/RGBA8 encodings for images and convert them to DDS")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Policy config file (default: ~/.config/texpolicy/config.json)
    #[arg(short, long, global = true, env = "TEXPOLICY_CONFIG")]
    config: Option<PathBuf>,

    /// Encode BC7 on the GPU when one is available
    #[arg(long, global = true)]
    gpu: bool,

    /// GPU adapter to use (see `texpolicy gpus`); implies --gpu
    #[arg(long, global = true)]
    gpu_index: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the encoding decision for each image
    Classify {
        /// Image files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Emit JSON lines (decision plus metrics) instead of text
        #[arg(long)]
        json: bool,
    },

    /// Convert one image to DDS
    Convert {
        input: PathBuf,
        output: PathBuf,
    },

    /// Convert every image under a directory, mirroring its layout
    Batch {
        input_dir: PathBuf,
        output_dir: PathBuf,

        /// Write a JSON report of every conversion to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List the policy rules in evaluation order
    Rules,

    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },

    /// List GPU adapters
    Gpus,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(if cli.verbose {
                "texpolicy=debug".parse()?
            } else {
                "texpolicy=warn".parse()?
            }))
            .init();
    }

    let config = PolicyConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    // None keeps every encode on the CPU
    let gpu = (cli.gpu || cli.gpu_index.is_some()).then_some(cli.gpu_index);

    match cli.command {
        Commands::Classify { inputs, json } => {
            let engine = config.engine();
            for input in &inputs {
                let decoded = decode_image(input)?;
                let buf = PixelBuffer::from_image(&decoded.image);
                let hints = AssetHints::from_path(input);
                let decision = engine.classify(buf, hints, decoded.traits()).decision;

                if json {
                    let line = serde_json::json!({
                        "input": input,
                        "width": decoded.image.width(),
                        "height": decoded.image.height(),
                        "hints": hints,
                        "decision": decision,
                        "metrics": ImageMetrics::compute(buf),
                    });
                    println!("{}", line);
                } else {
                    println!(
                        "{}  {}x{}  [{}]  {}",
                        input.display(),
                        decoded.image.width(),
                        decoded.image.height(),
                        hints,
                        decision
                    );
                }
            }
        }

        Commands::Convert { input, output } => {
            let pipeline = build_pipeline(gpu, &config);
            let started = Instant::now();
            let texture = pipeline.convert_file(&input, &output, AssetHints::from_path(&input))?;

            println!("{} -> {}", input.display(), output.display());
            println!("  {}x{}, {}", texture.width, texture.height, texture.decision);
            if texture.downgraded {
                println!("  (time budget exceeded, downgraded)");
            }
            println!("  took {}", format_elapsed(started.elapsed()));
        }

        Commands::Batch {
            input_dir,
            output_dir,
            report,
        } => {
            run_batch(gpu, &config, &input_dir, &output_dir, report.as_deref())?;
        }

        Commands::Rules => {
            for (id, name) in textures::rule_table() {
                println!("{:>3}  {}", id, name);
            }
        }

        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => PolicyConfig::default_path()?,
                };
                config.save(&path)?;
                eprintln!("Saved to {}", path.display());
            }
        }

        Commands::Gpus => {
            let gpus = textures::list_gpus();
            if gpus.is_empty() {
                println!("No GPU adapters found");
            }
            for gpu in gpus {
                println!("{:>3}  {}", gpu.adapter_index, gpu);
            }
        }
    }

    Ok(())
}

fn build_pipeline(gpu: Option<Option<usize>>, config: &PolicyConfig) -> TexturePipeline {
    let context = CompressorContext::new();
    if let Some(index) = gpu {
        if context.init_gpu(index) {
            if let Some(info) = context.gpu_info() {
                eprintln!("BC7 on GPU: {}", info);
            }
        } else {
            eprintln!("No usable GPU, BC7 will be encoded on the CPU");
        }
    }

    TexturePipeline::new(config.engine(), Arc::new(context)).with_mipmaps(config.mipmaps)
}

fn run_batch(
    gpu: Option<Option<usize>>,
    config: &PolicyConfig,
    input_dir: &Path,
    output_dir: &Path,
    report: Option<&Path>,
) -> Result<()> {
    if !input_dir.is_dir() {
        anyhow::bail!("Input directory not found: {}", input_dir.display());
    }

    let jobs = discover_jobs(input_dir, output_dir);
    println!("Found {} images in {}", jobs.len(), input_dir.display());
    if jobs.is_empty() {
        return Ok(());
    }

    let pipeline = build_pipeline(gpu, config);

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] Converting [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let started = Instant::now();
    let results = pipeline.convert_batch(&jobs, |done| pb.set_position(done as u64));
    pb.finish_and_clear();

    let summary = BatchSummary::from_results(&results);

    println!("\n=== Conversion Summary ===");
    println!("Converted:  {} of {}", summary.succeeded, summary.total);
    println!("Failed:     {}", summary.failed);
    println!("Downgraded: {}", summary.downgraded);
    println!("Time:       {}", format_elapsed(started.elapsed()));

    println!("\n=== By Rule ===");
    let names: std::collections::HashMap<_, _> = textures::rule_table().into_iter().collect();
    for (rule, count) in &summary.by_rule {
        println!(
            "{:>8}  {:>2} {}",
            count,
            rule,
            names.get(rule).copied().unwrap_or("?")
        );
    }

    println!("\n=== By Format ===");
    for (format, count) in &summary.by_format {
        println!("{:>8}  {}", count, format);
    }

    let failures: Vec<_> = results
        .iter()
        .filter_map(|r| r.result.as_ref().err().map(|e| (&r.input, e)))
        .collect();
    if !failures.is_empty() {
        println!("\n=== Failures ===");
        for (input, err) in &failures {
            println!("{}: {}", input.display(), err);
        }
    }

    if let Some(path) = report {
        let reports: Vec<_> = results.iter().filter_map(|r| r.result.as_ref().ok()).collect();
        let json = serde_json::json!({ "summary": summary, "conversions": reports });
        std::fs::write(path, serde_json::to_string_pretty(&json)?)
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("\nReport written to {}", path.display());
    }

    if summary.failed > 0 {
        anyhow::bail!("{} of {} conversions failed", summary.failed, summary.total);
    }
    Ok(())
}
