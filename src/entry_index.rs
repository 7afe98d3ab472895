use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::identifier::{extract_spreadsheet_id, SpreadsheetId};
use crate::retry::RemotePolicy;
use crate::sheets::SheetFetcher;

pub const ENTRY_PAGE_SIZE: usize = 1024;

/// Identifiers listed in an entry index, in row order, with the rows that
/// could not be turned into one.
#[derive(Debug, Default)]
pub struct EntryIndex {
    pub identifiers: Vec<SpreadsheetId>,
    pub rejected: Vec<AppError>,
}

impl EntryIndex {
    /// All rejected rows as one joined error.
    pub fn joined_error(self) -> (Vec<SpreadsheetId>, Option<AppError>) {
        (self.identifiers, AppError::join(self.rejected))
    }
}

/// Walks column A of the index spreadsheet's first worksheet page by page.
pub async fn read_entry_index(
    fetcher: &dyn SheetFetcher,
    policy: &RemotePolicy,
    index: &SpreadsheetId,
) -> AppResult<EntryIndex> {
    read_entry_index_paged(fetcher, policy, index, ENTRY_PAGE_SIZE).await
}

pub(crate) async fn read_entry_index_paged(
    fetcher: &dyn SheetFetcher,
    policy: &RemotePolicy,
    index: &SpreadsheetId,
    page_size: usize,
) -> AppResult<EntryIndex> {
    let titles = policy
        .call("read index metadata", || fetcher.worksheet_titles(index))
        .await?;
    let worksheet = titles.into_iter().next().ok_or_else(|| {
        AppError::Config(format!("entry spreadsheet {index} has no worksheets"))
    })?;

    let mut entries = EntryIndex::default();
    let mut start_row = 1;
    loop {
        let start = format!("A{start_row}");
        let end = format!("A{}", start_row + page_size - 1);
        let page = policy
            .call("read index page", || {
                fetcher.fetch_range(index, &worksheet, &start, &end)
            })
            .await?;

        debug!(
            spreadsheet = %index,
            worksheet = %worksheet,
            start = %start,
            rows = page.row_count(),
            "read entry index page"
        );

        for (offset, row) in page.rows().enumerate() {
            let Some(cell) = row.first().filter(|cell| !cell.trim().is_empty()) else {
                debug!(row = start_row + offset, "skipping blank index row");
                continue;
            };
            match extract_spreadsheet_id(cell) {
                Ok(id) => entries.identifiers.push(id),
                Err(err) => entries.rejected.push(err.into()),
            }
        }

        if page.row_count() < page_size {
            break;
        }
        start_row += page_size;
    }

    info!(
        spreadsheet = %index,
        identifiers = entries.identifiers.len(),
        rejected = entries.rejected.len(),
        "entry index read"
    );
    Ok(entries)
}
