//! supplyrisk CLI - multi-tier supply-chain risk over input-output models

#![deny(warnings)]

// Global invariants enforced:
// - CLI flags override config file values
// - Assessment errors are reported, never panicked on

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use supplyrisk_core::assessment::AssessOptions;
use supplyrisk_core::climate::HttpClimateClient;
use supplyrisk_core::config::{self, ResolvedConfig};
use supplyrisk_core::loss_cache::{
    populate_expected_losses, read_expected_loss_cache, write_expected_loss_cache,
};
use supplyrisk_core::model::registry::{recommend_model, Requirements};
use supplyrisk_core::model::{IoModel, ModelKind};
use supplyrisk_core::report::render_suppliers_text;
use supplyrisk_core::{
    assessor_for_model, build_registry, load_risk_tables, render_error_json, render_json,
    render_text,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "supplyrisk")]
#[command(about = "Multi-tier supply-chain risk assessment over input-output models")]
#[command(version = env!("SUPPLYRISK_VERSION"))]
struct Cli {
    /// Path to config file (default: auto-discover)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reference data directory (overrides config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess direct, indirect and total risk for a country-sector pair
    Assess {
        /// Country code in the model's vocabulary
        country: String,

        /// Sector code in the model's vocabulary
        sector: String,

        /// I-O model (overrides config file)
        #[arg(long)]
        model: Option<ModelArg>,

        /// Skip climate expected-loss enrichment
        #[arg(long)]
        skip_climate: bool,

        /// Number of suppliers to list (overrides config file)
        #[arg(long)]
        top: Option<usize>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// List the largest direct suppliers of a country-sector pair
    Suppliers {
        country: String,
        sector: String,

        #[arg(long)]
        model: Option<ModelArg>,

        /// Maximum suppliers to show
        #[arg(long, default_value = "10")]
        top: usize,

        /// Only show coefficients strictly above this value
        #[arg(long, default_value = "0.0")]
        min_coefficient: f64,

        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Describe the available I-O models
    Models {
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Suggest a model for the given needs
    Recommend {
        /// Country code the assessment is about
        #[arg(long)]
        country: Option<String>,

        /// Environmental satellite data is required
        #[arg(long)]
        environmental: bool,

        /// Detailed manufacturing sectors are required
        #[arg(long)]
        sector_detail: bool,
    },
    /// List the countries of a model
    Countries {
        #[arg(long)]
        model: Option<ModelArg>,

        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// List the sectors of a model
    Sectors {
        #[arg(long)]
        model: Option<ModelArg>,

        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Show coefficient matrix statistics for a model
    Stats {
        #[arg(long)]
        model: Option<ModelArg>,
    },
    /// Pre-compute assessments in parallel
    Warm {
        #[arg(long)]
        model: Option<ModelArg>,

        /// File with one `COUNTRY,SECTOR` pair per line (default: common pairs)
        #[arg(long)]
        pairs: Option<PathBuf>,

        #[arg(long)]
        skip_climate: bool,
    },
    /// Manage the offline expected-loss cache
    #[command(name = "climate-cache")]
    ClimateCache {
        #[command(subcommand)]
        action: ClimateCacheAction,
    },
    /// Validate or show configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ClimateCacheAction {
    /// Fetch expected losses for every country in the risk tables
    Populate {
        /// Climate service root (overrides config file)
        #[arg(long)]
        base_url: Option<String>,

        /// Cache file to write (default: from config)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running an assessment
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModelArg {
    Oecd,
    Exiobase,
}

impl From<ModelArg> for ModelKind {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Oecd => ModelKind::Oecd,
            ModelArg::Exiobase => ModelKind::Exiobase,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Assess {
            country,
            sector,
            model,
            skip_climate,
            top,
            format,
        } => {
            let mut resolved = load_config(cli.config.as_deref(), cli.data_dir, model)?;
            if let Some(top) = top {
                resolved.top_suppliers = top;
            }
            if skip_climate {
                resolved.climate_enabled = false;
            }
            let assessor = {
                let (model, tables) = load_model(&resolved)?;
                assessor_for_model(&resolved, model, Arc::new(tables))?
            };

            let options = AssessOptions {
                skip_external_enrichment: skip_climate,
            };
            match assessor.assess_risk(&country, &sector, options) {
                Ok(assessment) => match format {
                    OutputFormat::Text => print!("{}", render_text(&assessment)),
                    OutputFormat::Json => println!("{}", render_json(&assessment)),
                },
                Err(e) => {
                    match format {
                        OutputFormat::Text => eprintln!("Assessment failed: {}", e),
                        OutputFormat::Json => println!("{}", render_error_json(&e)),
                    }
                    std::process::exit(if e.is_fatal() { 2 } else { 1 });
                }
            }
        }
        Commands::Suppliers {
            country,
            sector,
            model,
            top,
            min_coefficient,
            format,
        } => {
            let resolved = load_config(cli.config.as_deref(), cli.data_dir, model)?;
            let (model, _) = load_model(&resolved)?;
            model
                .validate(&country, &sector)
                .with_context(|| format!("cannot list suppliers in model '{}'", model.id()))?;
            let suppliers = model.top_suppliers(&country, &sector, top, min_coefficient)?;

            match format {
                OutputFormat::Text => {
                    if suppliers.is_empty() {
                        println!(
                            "No suppliers of {}/{} above {}",
                            country, sector, min_coefficient
                        );
                    } else {
                        print!("{}", render_suppliers_text(&suppliers));
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&suppliers)?),
            }
        }
        Commands::Models { format } => {
            let descriptors: Vec<_> = ModelKind::ALL.iter().map(ModelKind::descriptor).collect();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&descriptors)?),
                OutputFormat::Text => {
                    for d in &descriptors {
                        println!("{} ({}) - {}", d.name, d.id, d.status);
                        println!("  {}", d.description);
                        println!("  Strengths:");
                        for s in &d.strengths {
                            println!("    - {}", s);
                        }
                        println!("  Use cases:");
                        for u in &d.use_cases {
                            println!("    - {}", u);
                        }
                        println!();
                    }
                }
            }
        }
        Commands::Recommend {
            country,
            environmental,
            sector_detail,
        } => {
            let kind = recommend_model(&Requirements {
                country,
                needs_environmental_data: environmental,
                needs_sector_detail: sector_detail,
            });
            let d = kind.descriptor();
            println!("{} ({}): {}", d.name, d.id, d.description);
        }
        Commands::Countries { model, format } => {
            let resolved = load_config(cli.config.as_deref(), cli.data_dir, model)?;
            let (model, _) = load_model(&resolved)?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(model.countries())?)
                }
                OutputFormat::Text => {
                    for c in model.countries() {
                        let marker = if c.is_aggregate {
                            " [aggregate]"
                        } else if c.is_extended {
                            " [extended]"
                        } else {
                            ""
                        };
                        println!("{:<6} {}{}", c.code, c.name, marker);
                    }
                }
            }
        }
        Commands::Sectors { model, format } => {
            let resolved = load_config(cli.config.as_deref(), cli.data_dir, model)?;
            let (model, _) = load_model(&resolved)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(model.sectors())?),
                OutputFormat::Text => {
                    for s in model.sectors() {
                        println!("{:<8} {}", s.code, s.name);
                    }
                }
            }
        }
        Commands::Stats { model } => {
            let resolved = load_config(cli.config.as_deref(), cli.data_dir, model)?;
            let (model, _) = load_model(&resolved)?;
            let info = model.info();
            let stats = model.matrix_stats()?;
            println!("{} {} ({})", info.name, info.version, info.id);
            println!("  countries: {}", info.country_count);
            println!("  sectors: {}", info.sector_count);
            println!("  nodes: {}", stats.rows);
            println!("  non-zero coefficients: {}", stats.non_zero);
            println!("  mean coefficient: {:.6}", stats.mean_coefficient);
            println!("  max coefficient: {:.6}", stats.max_coefficient);
        }
        Commands::Warm {
            model,
            pairs,
            skip_climate,
        } => {
            let resolved = load_config(cli.config.as_deref(), cli.data_dir, model)?;
            let pairs = match pairs {
                Some(path) => read_pairs(&path)?,
                None => resolved
                    .model
                    .common_assessments()
                    .iter()
                    .map(|(c, s)| (c.to_string(), s.to_string()))
                    .collect(),
            };
            let (model, tables) = load_model(&resolved)?;
            let assessor = assessor_for_model(&resolved, model, Arc::new(tables))?;

            let pb = ProgressBar::new(pairs.len() as u64);
            pb.set_style(
                ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                    .context("invalid progress template")?,
            );
            pb.set_message(format!("warming {}", resolved.model));
            let summary = assessor.warm_with_progress(
                &pairs,
                AssessOptions {
                    skip_external_enrichment: skip_climate,
                },
                &|| pb.inc(1),
            );
            pb.finish_and_clear();

            println!(
                "Warmed {}/{} assessments for {}",
                summary.succeeded, summary.total, resolved.model
            );
            for failure in &summary.failed {
                eprintln!(
                    "  failed {}/{}: {}",
                    failure.country, failure.sector, failure.reason
                );
            }
        }
        Commands::ClimateCache { action } => match action {
            ClimateCacheAction::Populate { base_url, output } => {
                let resolved = load_config(cli.config.as_deref(), cli.data_dir, None)?;
                let Some(base_url) = base_url.or_else(|| resolved.climate_base_url.clone()) else {
                    anyhow::bail!("no climate service configured (use --base-url or climate.base_url)");
                };
                let output = output.unwrap_or_else(|| resolved.climate_cache_file.clone());

                let client = HttpClimateClient::new(&base_url, resolved.climate_timeout())?;
                let tables = load_risk_tables(&resolved)?;
                let countries: Vec<(String, String)> = tables
                    .country_names()
                    .map(|(code, name)| (code.to_string(), name.to_string()))
                    .collect();

                let mut cache = read_expected_loss_cache(&output).unwrap_or_default();
                let summary = populate_expected_losses(&mut cache, &client, &countries);
                write_expected_loss_cache(&output, &cache)?;

                println!(
                    "Expected-loss cache: {} fetched, {} skipped, {} failed ({} entries in {})",
                    summary.success,
                    summary.skipped,
                    summary.failed.len(),
                    cache.len(),
                    output.display()
                );
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&root, path.as_deref());

                match resolved {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Show { path } => {
                let root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&root, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
            }
        },
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve config from the working directory and apply global overrides
fn load_config(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
    model: Option<ModelArg>,
) -> anyhow::Result<ResolvedConfig> {
    let root = std::env::current_dir()?;
    let mut resolved =
        config::load_and_resolve(&root, config_path).context("failed to load configuration")?;
    if let Some(ref p) = resolved.config_path {
        eprintln!("Using config: {}", p.display());
    }
    if let Some(dir) = data_dir {
        // Keep a data-dir relative loss cache relative to the new directory
        if let Ok(rest) = resolved.climate_cache_file.strip_prefix(&resolved.data_dir) {
            resolved.climate_cache_file = dir.join(rest);
        }
        resolved.data_dir = dir;
    }
    if let Some(model) = model {
        resolved.model = model.into();
    }
    Ok(resolved)
}

fn load_model(
    resolved: &ResolvedConfig,
) -> anyhow::Result<(Arc<dyn IoModel>, supplyrisk_core::tables::RiskTables)> {
    let tables = load_risk_tables(resolved)?;
    let registry = build_registry(resolved, &tables);
    let model = registry
        .get(resolved.model)
        .with_context(|| format!("failed to load model '{}'", resolved.model))?;
    tracing::info!(
        model = %resolved.model,
        data_dir = %resolved.data_dir.display(),
        countries = model.countries().len(),
        "model ready"
    );
    Ok((model, tables))
}

fn read_pairs(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pairs file: {}", path.display()))?;
    let mut pairs = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((country, sector)) = line.split_once(',') else {
            anyhow::bail!(
                "{}:{}: expected COUNTRY,SECTOR (got '{}')",
                path.display(),
                i + 1,
                line
            );
        };
        pairs.push((country.trim().to_string(), sector.trim().to_string()));
    }
    Ok(pairs)
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    if let Some(ref p) = resolved.config_path {
        println!("  Source: {}", p.display());
    } else {
        println!("  Source: defaults (no config file found)");
    }
    println!("  Model: {}", resolved.model);
    println!("  Data directory: {}", resolved.data_dir.display());
    println!();
    println!("Weights:");
    println!("  country: {}", resolved.weight_country);
    println!("  sector: {}", resolved.weight_sector);
    println!("  direct: {}", resolved.weight_direct);
    println!("  indirect: {}", resolved.weight_indirect);
    println!();
    println!("Propagation:");
    println!("  max_tiers: {}", resolved.max_tiers);
    println!("  tier_weights: {:?}", resolved.tier_weights);
    println!("  fan_out: {}", resolved.fan_out);
    println!("  min_coefficient: {}", resolved.min_coefficient);
    println!(
        "  missing_supplier_policy: {}",
        resolved.missing_supplier_policy
    );
    println!("  top_suppliers: {}", resolved.top_suppliers);
    println!();
    println!("Climate:");
    println!("  enabled: {}", resolved.climate_enabled);
    println!(
        "  base_url: {}",
        resolved
            .climate_base_url
            .as_deref()
            .unwrap_or("none (offline cache)")
    );
    println!("  timeout_ms: {}", resolved.climate_timeout_ms);
    println!("  cache_file: {}", resolved.climate_cache_file.display());
    println!();
    println!("Cache:");
    println!("  ttl_seconds: {}", resolved.cache_ttl_seconds);
    println!("  capacity: {}", resolved.cache_capacity);
    println!(
        "  coefficient_cache_limit: {}",
        resolved.coefficient_cache_limit
    );
}
