use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::correlate::{correlate_survey, CorrelationReport};
use crate::edsm::SystemLookup;
use crate::entry_index::read_entry_index;
use crate::errors::{AppError, AppResult};
use crate::identifier::SpreadsheetId;
use crate::persistence::{write_survey, PersistOutcome, SurveyStore};
use crate::retry::RemotePolicy;
use crate::sheets::SheetFetcher;
use crate::survey::{extract_survey, Survey};
use crate::telemetry::TelemetryClient;
use crate::variants::VariantRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub spreadsheet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worksheet: Option<String>,
    pub reason: String,
}

impl IngestFailure {
    fn new(spreadsheet: &SpreadsheetId, worksheet: Option<&str>, err: &AppError) -> Self {
        Self {
            spreadsheet: spreadsheet.to_string(),
            worksheet: worksheet.map(str::to_string),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub spreadsheets: usize,
    /// Spreadsheets whose worksheet list could not be read.
    pub spreadsheets_failed: usize,
    pub duplicate_identifiers: usize,
    pub rejected_identifiers: usize,
    pub worksheets: usize,
    pub unidentified_layouts: usize,
    pub surveys_persisted: usize,
    pub surveys_duplicate: usize,
    pub surveys_failed: usize,
    pub points_persisted: usize,
    pub points_uncorrelated: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestSummary {
    /// True when anything was rejected or failed along the way.
    pub fn has_failures(&self) -> bool {
        self.rejected_identifiers > 0 || !self.failures.is_empty()
    }
}

/// Everything gathered from one spreadsheet before it is written.
#[derive(Debug, Default)]
struct SpreadsheetHarvest {
    unreadable: bool,
    worksheets: usize,
    unidentified: usize,
    surveys: Vec<(Survey, CorrelationReport)>,
    failures: Vec<IngestFailure>,
}

pub struct SurveyIngestor {
    fetcher: Arc<dyn SheetFetcher>,
    lookup: Arc<dyn SystemLookup>,
    registry: Arc<VariantRegistry>,
    policy: RemotePolicy,
    max_sample_rows: usize,
    concurrency: usize,
    telemetry: Option<TelemetryClient>,
}

impl SurveyIngestor {
    pub fn new(
        fetcher: Arc<dyn SheetFetcher>,
        lookup: Arc<dyn SystemLookup>,
        registry: Arc<VariantRegistry>,
        policy: RemotePolicy,
    ) -> Self {
        Self {
            fetcher,
            lookup,
            registry,
            policy,
            max_sample_rows: 256,
            concurrency: 1,
            telemetry: None,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        fetcher: Arc<dyn SheetFetcher>,
        lookup: Arc<dyn SystemLookup>,
        registry: Arc<VariantRegistry>,
    ) -> Self {
        let policy = RemotePolicy::new(config.rate_limit_wait(), config.remote_deadline());
        Self::new(fetcher, lookup, registry, policy)
            .with_max_sample_rows(config.max_sample_rows)
            .with_concurrency(config.max_concurrent_spreadsheets)
    }

    pub fn with_max_sample_rows(mut self, rows: usize) -> Self {
        self.max_sample_rows = rows.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryClient) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Ingests every spreadsheet listed in the entry index. Only an
    /// unreadable index fails the run; everything else lands in the summary.
    pub async fn run<S: SurveyStore>(
        &self,
        store: &mut S,
        entry: &SpreadsheetId,
    ) -> AppResult<IngestSummary> {
        let index = read_entry_index(self.fetcher.as_ref(), &self.policy, entry).await?;

        let mut summary = IngestSummary {
            rejected_identifiers: index.rejected.len(),
            ..IngestSummary::default()
        };
        for err in &index.rejected {
            warn!(spreadsheet = %entry, %err, "rejected entry index row");
            summary.failures.push(IngestFailure::new(entry, None, err));
        }

        self.ingest_into(store, index.identifiers, &mut summary).await;
        Ok(summary)
    }

    /// Ingests the given survey spreadsheets directly, bypassing the index.
    pub async fn ingest_spreadsheets<S: SurveyStore>(
        &self,
        store: &mut S,
        spreadsheets: Vec<SpreadsheetId>,
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();
        self.ingest_into(store, spreadsheets, &mut summary).await;
        summary
    }

    async fn ingest_into<S: SurveyStore>(
        &self,
        store: &mut S,
        spreadsheets: Vec<SpreadsheetId>,
        summary: &mut IngestSummary,
    ) {
        let (spreadsheets, duplicates) = dedupe_identifiers(spreadsheets);
        summary.spreadsheets = spreadsheets.len();
        summary.duplicate_identifiers = duplicates;
        if duplicates > 0 {
            info!(duplicates, "ignoring repeated spreadsheet identifiers");
        }

        let harvests = stream::iter(spreadsheets)
            .map(|spreadsheet| self.harvest_spreadsheet(spreadsheet))
            .buffered(self.concurrency);
        futures_util::pin_mut!(harvests);

        // Each spreadsheet is written as soon as its harvest is ready.
        while let Some(harvest) = harvests.next().await {
            summary.worksheets += harvest.worksheets;
            summary.unidentified_layouts += harvest.unidentified;
            if harvest.unreadable {
                summary.spreadsheets_failed += 1;
            } else {
                summary.surveys_failed += harvest.failures.len();
            }
            summary.failures.extend(harvest.failures);

            for (survey, report) in harvest.surveys {
                self.persist(store, &survey, report, summary);
            }
        }

        info!(
            spreadsheets = summary.spreadsheets,
            unreadable = summary.spreadsheets_failed,
            persisted = summary.surveys_persisted,
            duplicate = summary.surveys_duplicate,
            failed = summary.surveys_failed,
            unidentified = summary.unidentified_layouts,
            "ingest complete"
        );
        self.emit(
            "ingest_complete",
            json!({
                "spreadsheets": summary.spreadsheets,
                "spreadsheets_failed": summary.spreadsheets_failed,
                "surveys_persisted": summary.surveys_persisted,
                "surveys_duplicate": summary.surveys_duplicate,
                "surveys_failed": summary.surveys_failed,
                "points_persisted": summary.points_persisted,
                "points_uncorrelated": summary.points_uncorrelated,
            }),
        );
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.flush() {
                warn!(?err, "failed to flush ingest events");
            }
        }
    }

    fn persist<S: SurveyStore>(
        &self,
        store: &mut S,
        survey: &Survey,
        report: CorrelationReport,
        summary: &mut IngestSummary,
    ) {
        match write_survey(store, survey) {
            Ok(PersistOutcome::Inserted { survey_id, points }) => {
                summary.surveys_persisted += 1;
                summary.points_persisted += points;
                summary.points_uncorrelated += report.unmatched;
                self.emit(
                    "survey_persisted",
                    json!({
                        "spreadsheet": survey.spreadsheet_id,
                        "worksheet": survey.worksheet,
                        "survey_id": survey_id,
                        "points": points,
                        "uncorrelated": report.unmatched,
                    }),
                );
            }
            Ok(PersistOutcome::Duplicate { survey_id }) => {
                summary.surveys_duplicate += 1;
                self.emit(
                    "survey_duplicate",
                    json!({
                        "spreadsheet": survey.spreadsheet_id,
                        "worksheet": survey.worksheet,
                        "survey_id": survey_id,
                    }),
                );
            }
            Err(err) => {
                summary.surveys_failed += 1;
                let failure =
                    IngestFailure::new(&survey.spreadsheet_id, Some(&survey.worksheet), &err);
                self.emit_failure(&failure);
                summary.failures.push(failure);
            }
        }
    }

    async fn harvest_spreadsheet(&self, spreadsheet: SpreadsheetId) -> SpreadsheetHarvest {
        let mut harvest = SpreadsheetHarvest::default();
        let titles = match self
            .policy
            .call("list worksheets", || {
                self.fetcher.worksheet_titles(&spreadsheet)
            })
            .await
        {
            Ok(titles) => titles,
            Err(err) => {
                warn!(spreadsheet = %spreadsheet, %err, "unable to list worksheets");
                let failure = IngestFailure::new(&spreadsheet, None, &err);
                self.emit_failure(&failure);
                harvest.unreadable = true;
                harvest.failures.push(failure);
                return harvest;
            }
        };

        for worksheet in titles {
            harvest.worksheets += 1;
            match self.harvest_worksheet(&spreadsheet, &worksheet).await {
                Ok(Some(entry)) => harvest.surveys.push(entry),
                Ok(None) => harvest.unidentified += 1,
                Err(err) => {
                    warn!(spreadsheet = %spreadsheet, worksheet = %worksheet, %err, "survey dropped");
                    let failure = IngestFailure::new(&spreadsheet, Some(&worksheet), &err);
                    self.emit_failure(&failure);
                    harvest.failures.push(failure);
                }
            }
        }
        harvest
    }

    /// `Ok(None)` when no known layout matches the worksheet.
    async fn harvest_worksheet(
        &self,
        spreadsheet: &SpreadsheetId,
        worksheet: &str,
    ) -> AppResult<Option<(Survey, CorrelationReport)>> {
        let end = format!("Z{}", self.max_sample_rows);
        let grid = self
            .policy
            .call("fetch worksheet", || {
                self.fetcher.fetch_range(spreadsheet, worksheet, "A1", &end)
            })
            .await?;

        let Some(variant) = self.registry.detect(&grid) else {
            warn!(spreadsheet = %spreadsheet, worksheet, "unidentified worksheet layout");
            self.emit(
                "layout_unidentified",
                json!({ "spreadsheet": spreadsheet, "worksheet": worksheet }),
            );
            return Ok(None);
        };
        debug!(spreadsheet = %spreadsheet, worksheet, variant = %variant.name, "layout detected");

        let mut survey = extract_survey(spreadsheet, worksheet, &grid, variant)?;
        let report = correlate_survey(self.lookup.as_ref(), &self.policy, &mut survey).await?;
        Ok(Some((survey, report)))
    }

    fn emit_failure(&self, failure: &IngestFailure) {
        self.emit(
            "survey_failed",
            json!({
                "spreadsheet": failure.spreadsheet,
                "worksheet": failure.worksheet,
                "reason": failure.reason,
            }),
        );
    }

    fn emit(&self, name: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record(name, payload) {
                warn!(?err, event = name, "failed to queue ingest event");
            }
        }
    }
}

/// Keeps the first occurrence of each identifier, in order, and counts the rest.
pub fn dedupe_identifiers(identifiers: Vec<SpreadsheetId>) -> (Vec<SpreadsheetId>, usize) {
    let mut seen = HashSet::new();
    let mut duplicates = 0;
    let unique = identifiers
        .into_iter()
        .filter(|id| {
            let fresh = seen.insert(id.clone());
            if !fresh {
                duplicates += 1;
            }
            fresh
        })
        .collect();
    (unique, duplicates)
}
