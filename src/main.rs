use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use collision_sentinel::{
    logging, pipeline, profile_table, PipelineConfig, SourceKind, TableFormat, TracingSink,
};

#[derive(Parser, Debug)]
#[command(name = "collision-sentinel")]
#[command(about = "Conditions, integrates and windows NYC collision extracts")]
#[command(version)]
struct Cli {
    /// Config file (default: sentinel.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the base storage location
    #[arg(long, global = true)]
    base_path: Option<PathBuf>,

    /// Artifact format
    #[arg(long, global = true, value_enum, ignore_case = true)]
    format: Option<TableFormat>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Condition one source (crash, person, vehicle, weather) or all
    Condition {
        source: String,
    },
    /// Join the conditioned sources into the integrated table
    Integrate,
    /// Add person- and collision-level severity
    Severity,
    /// Keep the most recent N years
    Window {
        #[arg(long)]
        years: Option<u32>,
        #[arg(long)]
        date_column: Option<String>,
    },
    /// One representative row per collision
    Collisions {
        #[arg(long)]
        output: PathBuf,
        /// Defaults to the severity-annotated table
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Full pipeline: condition → integrate → severity → window
    Run,
    /// Row count, columns and null counts of an artifact
    Summary {
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.json_logs);

    let mut config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(base) = cli.base_path {
        config.base_path = base;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }

    let mut sink = TracingSink::default();

    match cli.command {
        Commands::Condition { source } => {
            if source.eq_ignore_ascii_case("all") {
                pipeline::condition_all(&config, &mut sink)?;
            } else {
                let kind: SourceKind = source.parse()?;
                let report = pipeline::condition_source(&config, kind)
                    .with_context(|| format!("Failed to condition {}", kind))?;
                report.log();
                println!("{}", report.summary());
            }
        }
        Commands::Integrate => {
            pipeline::integrate(&config, &mut sink).context("Integration failed")?;
        }
        Commands::Severity => {
            pipeline::derive_severity(&config, &mut sink).context("Severity derivation failed")?;
        }
        Commands::Window { years, date_column } => {
            if let Some(years) = years {
                config.window.years = years;
            }
            if let Some(column) = date_column {
                config.window.date_column = column;
            }
            config.validate()?;
            let (bounds, _) = pipeline::window(&config, &mut sink).context("Windowing failed")?;
            println!(
                "Kept years {}..={} in {}",
                bounds.cutoff_year,
                bounds.max_year,
                config.window_path().display()
            );
        }
        Commands::Collisions { output, input } => {
            pipeline::collisions(&config, input.as_deref(), &output, &mut sink)
                .context("Collision view failed")?;
        }
        Commands::Run => {
            let manifest = pipeline::run(&config, &mut sink).context("Pipeline run failed")?;
            println!("Run {} complete", manifest.run_id);
            println!("Manifest: {}", config.manifest_path().display());
        }
        Commands::Summary { path } => {
            let profile = profile_table(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            println!("{}: {} rows, {} columns", path.display(), profile.rows, profile.columns.len());
            for column in &profile.columns {
                println!("  {:<40} nulls: {}", column.name, column.nulls);
            }
            return Ok(());
        }
    }

    for report in &sink.reports {
        println!("{}", report.summary());
    }

    Ok(())
}
