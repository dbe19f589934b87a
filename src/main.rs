use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use signalfuse::analysis::patterns::NewPattern;
use signalfuse::config::{Config, LoggingConfig};
use signalfuse::metrics::PipelineMetrics;
use signalfuse::pipeline::Stage;
use signalfuse::signal::NewSignal;
use signalfuse::storage::{AnalysisResultRepository, IncidentRepository, PatternRepository, Store};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "signalfuse",
    about = "Incident root-cause analysis over operational telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $SIGNALFUSE_CONFIG, then ./signalfuse.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (pipeline driver + API server)
    Serve {
        /// Bind address, overrides api.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one pipeline cycle and print its report
    Process {
        /// Run only this stage
        #[arg(long, value_enum)]
        stage: Option<StageArg>,
    },

    /// Ingest signals from a JSON array or JSON-lines file
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },

    /// List recent incidents
    Incidents {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show an incident with its analysis and investigations
    Show { id: String },

    /// Discard an incident's analysis so the next cycle redoes it
    Reanalyze { id: String },

    /// Print store counts and pipeline metrics
    Status,

    /// Manage historical patterns
    Pattern {
        #[command(subcommand)]
        action: PatternAction,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Enrichment,
    Fusion,
    Analysis,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Enrichment => Stage::Enrichment,
            StageArg::Fusion => Stage::Fusion,
            StageArg::Analysis => Stage::Analysis,
        }
    }
}

#[derive(Subcommand)]
enum PatternAction {
    /// Add a resolved incident pattern
    Add {
        #[arg(long)]
        description: String,

        /// Resolution step, repeatable
        #[arg(long = "step")]
        steps: Vec<String>,

        /// Fraction of past incidents this resolved (0-1)
        #[arg(long)]
        success_rate: Option<f64>,
    },

    /// List stored patterns
    List,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_signals(path: &Path) -> Result<Vec<NewSignal>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()));
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}: invalid signal", path.display(), n + 1))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Commands::Serve { bind: Some(bind) } = &cli.command {
        config.api.bind = bind.clone();
    }
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    let open = |config: &Config| signalfuse::build_pipeline(config, Arc::new(PipelineMetrics::new()));

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!(bind = %config.api.bind, "Starting signalfuse daemon");
            signalfuse::serve(config).await?;
        }
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            println!("# configuration OK");
        }
        Commands::Process { stage } => {
            let pipeline = open(&config)?;
            let report = match stage {
                Some(stage) => pipeline.run_stage(stage.into()).await,
                None => pipeline.run_cycle().await,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                bail!("stages failed: {}", report.failed_stages.join(", "));
            }
        }
        Commands::Ingest { file } => {
            let signals = read_signals(&file)?;
            let pipeline = open(&config)?;
            let stored = pipeline.ingest(signals).await?;
            println!("Ingested {} signals.", stored.len());
        }
        Commands::Incidents { limit } => {
            let store = open(&config)?.store().clone();
            let incidents = store.recent_incidents(limit)?;
            if incidents.is_empty() {
                println!("No incidents found.");
            } else {
                println!("{:<38} | {:<12} | {:<7} | {:<6} | State", "Incident", "Category", "Signals", "Score");
                println!("{:-<38}-|-{:-<12}-|-{:-<7}-|-{:-<6}-|-{:-<22}", "", "", "", "", "");
                for incident in incidents {
                    let state = store
                        .by_incident_id(&incident.incident_id)?
                        .map(|r| r.state.to_string())
                        .unwrap_or_else(|| "unanalyzed".to_string());
                    println!(
                        "{:<38} | {:<12} | {:<7} | {:<6.3} | {}",
                        incident.incident_id,
                        incident.semantic.incident_category.as_str(),
                        incident.signal_count,
                        incident.fusion_score,
                        state
                    );
                }
            }
        }
        Commands::Show { id } => {
            let store = open(&config)?.store().clone();
            let Some(incident) = store.incident(&id)? else {
                bail!("incident '{}' not found", id);
            };
            let view = serde_json::json!({
                "incident": incident,
                "analysis": store.by_incident_id(&id)?,
                "investigations": store.investigations_for(&id)?,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Reanalyze { id } => {
            let pipeline = open(&config)?;
            let discarded = pipeline.reanalyze(&id).await?;
            if discarded {
                println!("Analysis for '{}' discarded; it will be redone next cycle.", id);
            } else {
                println!("Incident '{}' had no analysis yet.", id);
            }
        }
        Commands::Status => {
            let pipeline = open(&config)?;
            let view = serde_json::json!({
                "counts": pipeline.store().counts()?,
                "metrics": pipeline.metrics().snapshot(),
                "deep_analysis": pipeline.store().investigation_stats()?,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Pattern { action } => {
            let store = open(&config)?.store().clone();
            match action {
                PatternAction::Add {
                    description,
                    steps,
                    success_rate,
                } => {
                    if let Some(rate) = success_rate {
                        if !(0.0..=1.0).contains(&rate) {
                            bail!("--success-rate must be within 0 and 1");
                        }
                    }
                    let id = store.add_pattern(&NewPattern {
                        description,
                        resolution_steps: steps,
                        success_rate,
                    })?;
                    println!("Pattern {} added.", id);
                }
                PatternAction::List => {
                    let patterns = store.patterns()?;
                    if patterns.is_empty() {
                        println!("No patterns stored.");
                    }
                    for p in patterns {
                        println!("#{} {} ({} steps)", p.id, p.description, p.resolution_steps.len());
                    }
                }
            }
        }
    }

    Ok(())
}
