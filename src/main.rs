use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod db;
mod engine;
mod error;
mod filters;
mod identifier;
mod labels;
mod models;
mod reconcile;
mod report;
mod sources;

use config::ReportConfig;
use engine::{Engine, ReportRequest, RunOutput};
use filters::{Scope, Selections};
use models::{Dimension, TimeRange};
use sources::{CsvRosterSource, CsvSurveySource, RosterSource, SurveyRecordSource};

#[derive(Parser)]
#[command(name = "survey-participation")]
#[command(about = "Survey participation reconciliation against the employee roster", long_about = None)]
struct Cli {
    /// Report configuration (TOML); falls back to $PARTICIPATION_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small example roster and survey
    Seed,
    /// Replace the stored roster snapshot with a CSV export
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import survey submissions from a CSV export
    ImportSurvey {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print participation by the chosen breakdown
    Summary {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// List the filter steps on offer and their available values
    Filters {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long, default_value = "participation.md")]
        out: PathBuf,
        /// Also write the aggregation as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// Also write the filtered participation table as CSV
        #[arg(long)]
        table_csv: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SelectionArgs {
    /// Read survey submissions from this CSV instead of the database
    #[arg(long, requires = "roster_csv")]
    survey_csv: Option<PathBuf>,
    /// Read the roster from this CSV instead of the database
    #[arg(long, requires = "survey_csv")]
    roster_csv: Option<PathBuf>,
    /// Earliest submission time, inclusive
    #[arg(long, value_parser = parse_time)]
    from: Option<chrono::NaiveDateTime>,
    /// Latest submission time, exclusive
    #[arg(long, value_parser = parse_time)]
    to: Option<chrono::NaiveDateTime>,
    /// Restrict a dimension, e.g. `--filter unit="G. MANUFACTURE"` or
    /// `--filter group="G. MEDIA"` (repeatable)
    #[arg(long = "filter", value_parser = parse_pair)]
    filters: Vec<(Dimension, String)>,
    /// Organizational scope of the reader, applied before all filters;
    /// `unit=` also matches the group before overrides
    #[arg(long, value_parser = parse_pair)]
    scope: Option<(Dimension, String)>,
    #[arg(long, default_value = "unit")]
    breakdown: Dimension,
}

impl SelectionArgs {
    fn range(&self) -> TimeRange {
        TimeRange {
            start: self.from,
            end: self.to,
        }
    }

    fn request(&self) -> ReportRequest {
        let mut selections = Selections::new();
        for (dimension, value) in &self.filters {
            selections.entry(*dimension).or_default().insert(value.clone());
        }
        ReportRequest {
            selections,
            scope: self.scope.as_ref().map(|(dimension, value)| Scope {
                dimension: *dimension,
                values: [value.clone()].into_iter().collect(),
            }),
            breakdown: self.breakdown,
        }
    }

    fn scope_label(&self) -> Option<&str> {
        self.scope.as_ref().map(|(_, value)| value.as_str())
    }
}

fn parse_time(value: &str) -> Result<chrono::NaiveDateTime, String> {
    sources::parse_timestamp(value)
        .ok_or_else(|| format!("expected YYYY-MM-DD or YYYY-MM-DD HH:MM, got {value:?}"))
}

fn parse_pair(value: &str) -> Result<(Dimension, String), String> {
    let (dimension, selected) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <dimension>=<value>, got {value:?}"))?;
    let dimension = dimension.parse::<Dimension>().map_err(|e| e.to_string())?;
    Ok((dimension, selected.trim().to_string()))
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

struct Loaded {
    survey: Vec<models::SurveyResponseRecord>,
    roster: Vec<models::RosterRecord>,
}

async fn load_from<S: SurveyRecordSource, R: RosterSource>(
    survey: &S,
    roster: &R,
    range: &TimeRange,
) -> anyhow::Result<Loaded> {
    Ok(Loaded {
        survey: survey.survey_records(range).await?,
        roster: roster.roster_records().await?,
    })
}

async fn load(selection: &SelectionArgs, config: &ReportConfig) -> anyhow::Result<Loaded> {
    let range = selection.range();
    match (&selection.survey_csv, &selection.roster_csv) {
        (Some(survey_csv), Some(roster_csv)) => {
            let survey = CsvSurveySource {
                path: survey_csv.clone(),
                columns: config.survey_columns.clone(),
            };
            let roster = CsvRosterSource {
                path: roster_csv.clone(),
                columns: config.roster_columns.clone(),
            };
            load_from(&survey, &roster, &range).await
        }
        _ => {
            let pool = connect().await?;
            let survey = db::PgSurveySource { pool: pool.clone() };
            let roster = db::PgRosterSource { pool };
            load_from(&survey, &roster, &range).await
        }
    }
}

async fn run(selection: &SelectionArgs, config: &ReportConfig) -> anyhow::Result<RunOutput> {
    let engine = Engine::from_config(config)?;
    let loaded = load(selection, config).await?;
    Ok(engine.run(loaded.survey, loaded.roster, &selection.request()))
}

fn write_outputs(
    output: &RunOutput,
    report_path: &Path,
    report_body: String,
    json: Option<&Path>,
    table_csv: Option<&Path>,
) -> anyhow::Result<()> {
    std::fs::write(report_path, report_body)
        .with_context(|| format!("failed to write {}", report_path.display()))?;
    if let Some(path) = json {
        report::write_json(path, &output.aggregation)?;
        println!("Aggregation written to {}.", path.display());
    }
    if let Some(path) = table_csv {
        report::write_table_csv(path, &output.table)?;
        println!("Participation table written to {}.", path.display());
    }
    Ok(())
}

/// `RUST_LOG` directives when present and valid, otherwise `info`.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(directives.as_deref()))
        .init();

    let cli = Cli::parse();
    let config = ReportConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&connect().await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&connect().await?).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportRoster { csv } => {
            let pool = connect().await?;
            let loaded = db::import_roster_csv(&pool, &csv, &config.roster_columns).await?;
            println!("Roster replaced with {loaded} rows from {}.", csv.display());
        }
        Commands::ImportSurvey { csv } => {
            let pool = connect().await?;
            let inserted = db::import_survey_csv(&pool, &csv, &config.survey_columns).await?;
            println!("Inserted {inserted} survey submissions from {}.", csv.display());
        }
        Commands::Summary { selection } => {
            let output = run(&selection, &config).await?;
            if output.table.is_empty() {
                println!("No employees match the selected filters.");
                return Ok(());
            }
            print!("{}", report::format_summary(&output.aggregation));
            if output.diagnostics.skipped_rows() > 0 {
                println!(
                    "Skipped {} rows with unusable identifiers.",
                    output.diagnostics.skipped_rows()
                );
            }
        }
        Commands::Filters { selection } => {
            let engine = Engine::from_config(&config)?;
            let loaded = load(&selection, &config).await?;
            let offered = engine.offered(loaded.survey, loaded.roster, &selection.request());
            for step in engine.pipeline().steps() {
                if let Some(activation) = &step.when {
                    if !offered.iter().any(|o| o.dimension == step.dimension) {
                        println!(
                            "{} (offered once {} includes {})",
                            step.dimension.title(),
                            activation.dimension,
                            activation.value
                        );
                    }
                }
            }
            for step in offered {
                let selected = if step.selected.is_empty() {
                    "all".to_string()
                } else {
                    step.selected.join(", ")
                };
                println!("{} (selected: {})", step.dimension.title(), selected);
                for option in &step.options {
                    println!("  - {option}");
                }
            }
        }
        Commands::Report {
            selection,
            out,
            json,
            table_csv,
        } => {
            let output = run(&selection, &config).await?;
            let body = report::build_report(selection.scope_label(), &selection.range(), &output);
            write_outputs(&output, &out, body, json.as_deref(), table_csv.as_deref())?;
            info!(run_id = %output.diagnostics.run_id, "report complete");
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn log_level_defaults_to_info_and_follows_rust_log() {
        assert_eq!(env_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            env_filter(Some("debug")).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            env_filter(Some("survey_participation=trace")).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
        assert_eq!(
            env_filter(Some("survey_participation=loud")).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }

    #[test]
    fn filter_pairs_parse_dimension_and_value() {
        assert_eq!(
            parse_pair("group= G. MEDIA ").ok(),
            Some((Dimension::Group, "G. MEDIA".to_string()))
        );
        assert!(parse_pair("unit").is_err());
    }
}
