use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use density_survey_ingest::db::{bootstrap, SqliteSurveyStore};
use density_survey_ingest::edsm::EdsmClient;
use density_survey_ingest::sheets::SheetsClient;
use density_survey_ingest::telemetry::TelemetryClient;
use density_survey_ingest::variants::VariantRegistry;
use density_survey_ingest::{
    extract_spreadsheet_id, init_tracing, AppConfig, IngestFailure, SurveyIngestor,
};

#[derive(Parser)]
#[command(name = "density-survey-ingest")]
#[command(about = "Imports stellar density survey spreadsheets into a local database")]
#[command(version)]
struct Cli {
    /// Entry index spreadsheet (ID or URL); with --direct, survey spreadsheets
    #[arg(required = true)]
    targets: Vec<String>,
    /// Treat the targets as survey spreadsheets instead of an entry index
    #[arg(long)]
    direct: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();
    info!(config = ?config.public_profile(), "starting ingest");

    let registry = match &config.variants_file {
        Some(path) => VariantRegistry::load(path)
            .with_context(|| format!("loading survey variants from {}", path.display()))?,
        None => VariantRegistry::builtin(),
    };

    let database = bootstrap(&config.data_dir, &config.database_file_name)
        .context("opening survey database")?;
    let mut store = SqliteSurveyStore::from(database);
    let telemetry = TelemetryClient::new(&config.data_dir, &config)?;

    let ingestor = SurveyIngestor::from_config(
        &config,
        Arc::new(SheetsClient::new(&config)?),
        Arc::new(EdsmClient::new(&config)?),
        Arc::new(registry),
    )
    .with_telemetry(telemetry);

    let summary = if cli.direct {
        let mut spreadsheets = Vec::new();
        let mut rejected = Vec::new();
        for target in &cli.targets {
            match extract_spreadsheet_id(target) {
                Ok(id) => spreadsheets.push(id),
                Err(err) => {
                    warn!(%target, %err, "skipping argument");
                    rejected.push(IngestFailure {
                        spreadsheet: target.clone(),
                        worksheet: None,
                        reason: err.to_string(),
                    });
                }
            }
        }
        let mut summary = ingestor.ingest_spreadsheets(&mut store, spreadsheets).await;
        summary.rejected_identifiers = rejected.len();
        rejected.append(&mut summary.failures);
        summary.failures = rejected;
        summary
    } else {
        let [entry] = cli.targets.as_slice() else {
            bail!("expected exactly one entry index spreadsheet, got {}", cli.targets.len());
        };
        let entry = extract_spreadsheet_id(entry)?;
        ingestor.run(&mut store, &entry).await?
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
