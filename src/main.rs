use std::{fs::File, io::BufWriter, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use textsieve::{
    config::{FilterConfig, PolicyKind},
    triage::{load_image, Triage},
    ImageFrame, OcrProvider, Policy,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "textsieve")]
#[command(version, about = "Keep images without embedded text, reject meme-style captions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Common {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run OCR on the CPU even if GPU backends are available
    #[arg(long)]
    cpu: bool,

    /// Character count below which an image has no text
    #[arg(long)]
    min_total_chars: Option<usize>,

    /// Classification policy
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sort a directory of images into kept and rejected folders
    Filter {
        #[command(flatten)]
        common: Common,

        /// Directory scanned recursively for images
        #[arg(long)]
        source: Option<PathBuf>,

        /// Destination for images without disqualifying text
        #[arg(long)]
        kept: Option<PathBuf>,

        /// Destination for rejected images
        #[arg(long, conflicts_with = "no_rejected")]
        rejected: Option<PathBuf>,

        /// Do not collect rejected images (binary policy only)
        #[arg(long)]
        no_rejected: bool,

        /// Extra OCR attempts per image
        #[arg(long)]
        ocr_retries: Option<u32>,

        /// Write a JSON report of every decision
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Classify a single image and show the rule that decided it
    Classify {
        #[command(flatten)]
        common: Common,

        /// Image to classify
        image: PathBuf,

        /// Print the detections and decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        common: Common,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum PolicyArg {
    ThreeWay,
    Binary,
}

impl From<PolicyArg> for PolicyKind {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::ThreeWay => PolicyKind::ThreeWay,
            PolicyArg::Binary => PolicyKind::Binary,
        }
    }
}

impl Common {
    fn load(&self) -> Result<FilterConfig> {
        let mut config = FilterConfig::load_or_default(self.config.as_deref())?;
        if self.cpu {
            config.use_accelerated_backend = false;
        }
        if let Some(min_total_chars) = self.min_total_chars {
            config.thresholds.min_total_chars = min_total_chars;
        }
        if let Some(policy) = self.policy {
            config.policy = policy.into();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Filter {
            common,
            source,
            kept,
            rejected,
            no_rejected,
            ocr_retries,
            report,
        } => {
            let mut config = common.load()?;
            if let Some(source) = source {
                config.paths.source = source;
            }
            if let Some(kept) = kept {
                config.paths.kept = kept;
            }
            if rejected.is_some() {
                config.paths.rejected = rejected;
            }
            if no_rejected {
                config.paths.rejected = None;
            }
            if let Some(retries) = ocr_retries {
                config.ocr_retries = retries;
            }
            filter(config, report)
        }
        Commands::Classify {
            common,
            image,
            json,
        } => classify_one(common.load()?, image, json),
        Commands::Config { common } => {
            let config = common.load()?;
            config.validate()?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn filter(config: FilterConfig, report: Option<PathBuf>) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let policy = config.policy()?;
    let ocr = config
        .ocr_builder()
        .build()
        .context("Failed to load OCR models")?;

    println!("[*] Source:   {}", config.paths.source.display());
    println!("[*] Kept:     {}", config.paths.kept.display());
    if let Some(rejected) = &config.paths.rejected {
        println!("[*] Rejected: {}", rejected.display());
    }

    let triage = Triage::new(&ocr, policy, config.paths.clone()).ocr_retries(config.ocr_retries);
    let result = triage.run()?;

    if let Some(path) = report {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create report: {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &result)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        println!("[*] Report:   {}", path.display());
    }

    let summary = result.summary;
    println!("\n[✓] Done. {} images scanned", summary.scanned);
    match config.policy {
        PolicyKind::ThreeWay => println!("Kept (none/overlay):      {}", summary.kept),
        PolicyKind::Binary => println!("Kept (no text):           {}", summary.kept),
    }
    println!("Rejected (text):          {}", summary.content_rejected);
    println!("Rejected (io errors):     {}", summary.io_errors);
    println!("Rejected (ocr errors):    {}", summary.ocr_errors);

    Ok(())
}

fn classify_one(config: FilterConfig, path: PathBuf, json: bool) -> Result<()> {
    let policy = config.policy()?;
    let ocr = config
        .ocr_builder()
        .build()
        .context("Failed to load OCR models")?;

    let image =
        load_image(&path).with_context(|| format!("Failed to load image: {}", path.display()))?;
    let frame = ImageFrame::new(image.width(), image.height())?;
    let detections = ocr.detect(&image)?;
    let judgement = policy.judge(&detections, frame);

    if json {
        let value = serde_json::json!({
            "path": path,
            "width": frame.width(),
            "height": frame.height(),
            "detections": detections,
            "judgement": judgement,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}: {}", path.display(), judgement.label);
    for detection in &detections {
        println!("  {:?} ({:.2})", detection.text, detection.confidence);
    }
    if let (Policy::ThreeWay(_), Some(decision)) = (&policy, judgement.decision) {
        let metrics = decision.metrics;
        println!("  rule:                   {}", decision.rule.as_str());
        println!("  total chars:            {}", metrics.total_chars);
        println!("  total area ratio:       {:.4}", metrics.total_area_ratio);
        println!("  max region area ratio:  {:.4}", metrics.max_region_area_ratio);
        println!("  max region width ratio: {:.4}", metrics.max_region_width_ratio);
    }
    Ok(())
}
