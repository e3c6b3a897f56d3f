//! Netforge CLI - KiCad project generation from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use netforge::{
    Catalog, GenerationOptions, GeneratorConfig, Narrator, NetforgeCore,
    ScriptedTranslator, Translator, ValidationReport,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netforge")]
#[command(about = "Generate KiCad schematics and boards from circuit descriptions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn a description into a validated KiCad project
    Generate {
        /// What the circuit should do
        #[arg(value_name = "DESCRIPTION")]
        description: String,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for the generated files
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// KiCad library root to index before generating
        #[arg(long)]
        libs: Option<PathBuf>,

        /// Catalog snapshot written by `index --snapshot`
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Model name, or `auto`
        #[arg(short, long)]
        model: Option<String>,

        /// Extra repair rounds after the first draft
        #[arg(long)]
        retries: Option<usize>,

        /// Placement seed for reproducible boards
        #[arg(long)]
        seed: Option<u64>,

        /// Replay a circuit JSON file instead of calling a model
        #[arg(long, value_name = "FILE")]
        ir: Option<PathBuf>,
    },

    /// Index a KiCad library tree
    Index {
        /// Library root (symbol files and .pretty directories)
        #[arg(value_name = "LIBS")]
        libs: PathBuf,

        /// Save the index for later runs
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Search indexed symbols
    Search {
        #[arg(value_name = "QUERY")]
        query: String,

        #[arg(long)]
        libs: Option<PathBuf>,

        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Run ERC and a provisional DRC on a circuit JSON file
    Check {
        #[arg(value_name = "IR_FILE")]
        file: PathBuf,

        #[arg(long)]
        libs: Option<PathBuf>,

        #[arg(long)]
        snapshot: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for CI/CD
    Json,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Generate {
            description,
            config,
            out_dir,
            libs,
            snapshot,
            model,
            retries,
            seed,
            ir,
        } => {
            handle_generate(GenerateArgs {
                description,
                config,
                out_dir,
                libs,
                snapshot,
                model,
                retries,
                seed,
                ir,
            })
            .await
        }
        Commands::Index { libs, snapshot } => handle_index(&libs, snapshot.as_deref()),
        Commands::Search {
            query,
            libs,
            snapshot,
        } => handle_search(&query, libs.as_deref(), snapshot.as_deref()),
        Commands::Check {
            file,
            libs,
            snapshot,
            seed,
            format,
        } => handle_check(&file, libs.as_deref(), snapshot.as_deref(), seed, format),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };
    process::exit(exit_code);
}

struct GenerateArgs {
    description: String,
    config: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    libs: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    model: Option<String>,
    retries: Option<usize>,
    seed: Option<u64>,
    ir: Option<PathBuf>,
}

/// Flags win over config file and environment.
fn merged_config(args: &GenerateArgs) -> Result<GeneratorConfig> {
    let mut config = GeneratorConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(dir) = &args.out_dir {
        config.output_dir = dir.clone();
    }
    if let Some(libs) = &args.libs {
        config.library_root = Some(libs.clone());
    }
    if let Some(snapshot) = &args.snapshot {
        config.catalog_snapshot = Some(snapshot.clone());
    }
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
    if let Some(retries) = args.retries {
        config.retry_budget = retries;
    }
    if let Some(seed) = args.seed {
        config.placement.seed = Some(seed);
    }
    Ok(config)
}

async fn handle_generate(args: GenerateArgs) -> Result<i32> {
    let config = merged_config(&args)?;
    let catalog = load_catalog(
        config.library_root.as_deref(),
        config.catalog_snapshot.as_deref(),
    )?;

    let translator: Box<dyn Translator> = match &args.ir {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Box::new(ScriptedTranslator::repeating(text))
        }
        None => Box::new(config.llm.client()),
    };

    let narrator: Narrator = Arc::new(|line: &str| println!("  > {}", line));
    let options = GenerationOptions::from_config(&config).with_narrator(narrator);

    let outcome =
        NetforgeCore::generate(&args.description, &catalog, translator.as_ref(), &options).await?;

    println!("{}", outcome.message);
    if outcome.success {
        for path in &outcome.artifacts {
            println!("  {}", path.display());
        }
        Ok(0)
    } else {
        if let Some(report) = &outcome.report {
            print_report(report);
        }
        Ok(1)
    }
}

fn handle_index(libs: &Path, snapshot: Option<&Path>) -> Result<i32> {
    let mut catalog = Catalog::new();
    let stats = catalog
        .index(libs)
        .with_context(|| format!("Failed to index {}", libs.display()))?;

    println!(
        "Indexed {} symbols from {} libraries and {} footprints",
        stats.symbols, stats.symbol_files, stats.footprints
    );
    for skipped in &stats.skipped_files {
        println!("  skipped {}", skipped.display());
    }

    if let Some(path) = snapshot {
        catalog
            .save_snapshot(path)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        println!("Snapshot written to {}", path.display());
    }
    Ok(0)
}

fn handle_search(query: &str, libs: Option<&Path>, snapshot: Option<&Path>) -> Result<i32> {
    let catalog = load_catalog(libs, snapshot)?;
    let results = catalog.search(query);
    if results.is_empty() {
        println!("No symbols match '{}'", query);
        return Ok(1);
    }
    for full_name in results {
        match catalog.suggest_footprint(&full_name) {
            Some(footprint) => println!("{}  ({})", full_name, footprint),
            None => println!("{}", full_name),
        }
    }
    Ok(0)
}

fn handle_check(
    file: &Path,
    libs: Option<&Path>,
    snapshot: Option<&Path>,
    seed: Option<u64>,
    format: OutputFormat,
) -> Result<i32> {
    let circuit = NetforgeCore::load_circuit(file)
        .with_context(|| format!("Failed to read circuit {}", file.display()))?;
    let catalog = load_catalog(libs, snapshot)?;

    let mut config = GeneratorConfig::default();
    config.placement.seed = seed;
    let report = NetforgeCore::check(&circuit, &catalog, &config.placement, &config.board)?;

    match format {
        OutputFormat::Human => {
            println!("\nCircuit: {} ({})", circuit.project_name, file.display());
            println!("{}", "─".repeat(60));
            print_report(&report);
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "file": file.display().to_string(),
                "project_name": circuit.project_name,
                "report": report,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(if report.is_valid { 0 } else { 1 })
}

fn print_report(report: &ValidationReport) {
    if report.errors.is_empty() && report.warnings.is_empty() {
        println!("  No issues found");
        return;
    }
    if !report.errors.is_empty() {
        println!("\n  ERRORS:");
        for error in &report.errors {
            println!("    - {}", error);
        }
    }
    if !report.warnings.is_empty() {
        println!("\n  WARNINGS:");
        for warning in &report.warnings {
            println!("    - {}", warning);
        }
    }
    println!("\n  Summary:");
    println!("    Errors:   {}", report.errors.len());
    println!("    Warnings: {}", report.warnings.len());
}

/// Library tree if given, else a snapshot, else an empty catalog (every
/// lookup falls back to built-ins).
fn load_catalog(libs: Option<&Path>, snapshot: Option<&Path>) -> Result<Catalog> {
    if let Some(root) = libs {
        return netforge::index_library(root)
            .with_context(|| format!("Failed to index {}", root.display()));
    }
    if let Some(path) = snapshot {
        return Catalog::load_snapshot(path)
            .with_context(|| format!("Failed to load snapshot {}", path.display()));
    }
    tracing::warn!("No library root or snapshot given, using built-in definitions only");
    Ok(Catalog::new())
}
