pub mod config;
pub mod correlate;
pub mod db;
pub mod edsm;
pub mod entry_index;
pub mod errors;
pub mod grid;
pub mod identifier;
pub mod ingest;
pub mod persistence;
pub mod retry;
pub mod sheets;
pub mod survey;
pub mod telemetry;
pub mod variants;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult, IdentifierError};
pub use crate::identifier::{extract_spreadsheet_id, SpreadsheetId};
pub use crate::ingest::{IngestFailure, IngestSummary, SurveyIngestor};

/// Installs the global subscriber once; later calls are no-ops.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,density_survey_ingest=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
