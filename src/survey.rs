use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::grid::CellGrid;
use crate::identifier::SpreadsheetId;
use crate::variants::SheetVariant;

pub const DEFAULT_MAX_DISTANCE: f64 = 20.0;
const TITLE_SEPARATOR: &str = " - ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyPoint {
    pub system_name: String,
    pub z_sample: u32,
    pub system_count: u32,
    pub max_distance: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SurveyPoint {
    pub fn new(system_name: String, z_sample: u32, system_count: u32, max_distance: f64) -> Self {
        Self {
            system_name,
            z_sample,
            system_count,
            max_distance,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Survey {
    pub spreadsheet_id: SpreadsheetId,
    pub worksheet: String,
    pub variant: String,
    pub cmdr: String,
    pub project: String,
    pub points: Vec<SurveyPoint>,
}

impl Survey {
    /// Stable fingerprint of the extracted content. Coordinates are left
    /// out so re-running correlation does not change it.
    pub fn source_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.spreadsheet_id.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.worksheet.as_bytes());
        hasher.update([0]);
        for point in &self.points {
            hasher.update(point.system_name.as_bytes());
            hasher.update([0]);
            hasher.update(point.z_sample.to_le_bytes());
            hasher.update(point.system_count.to_le_bytes());
            hasher.update(point.max_distance.to_le_bytes());
        }
        STANDARD_NO_PAD.encode(hasher.finalize())
    }
}

/// What one data row contributes to a survey.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Point(SurveyPoint),
    /// Noise: the row is ignored and extraction carries on.
    Skip(String),
    /// End of the data section.
    End,
    /// The row proves the layout wrong; the whole survey is dropped.
    Abort(String),
}

pub fn classify_row(grid: &CellGrid, variant: &SheetVariant, row: usize) -> RowOutcome {
    let Some(z_sample) = grid.filled(row, variant.z_sample_column) else {
        return RowOutcome::End;
    };
    let Some(system_name) = grid.filled(row, variant.system_name_column) else {
        return RowOutcome::End;
    };

    let Ok(z_sample) = z_sample.parse::<u32>() else {
        return RowOutcome::Skip(format!("z-sample {z_sample:?} is not a count"));
    };
    let system_count = match grid
        .filled(row, variant.system_count_column)
        .map(str::parse::<u32>)
    {
        Some(Ok(count)) => count,
        Some(Err(_)) | None => {
            return RowOutcome::Skip(format!("system count for {system_name} is not a count"))
        }
    };

    let max_distance = match grid.filled(row, variant.max_distance_column) {
        None => DEFAULT_MAX_DISTANCE,
        Some(value) => match value.parse::<f64>() {
            Ok(distance) => distance,
            Err(_) => return RowOutcome::Abort(value.to_string()),
        },
    };

    RowOutcome::Point(SurveyPoint::new(
        system_name.to_string(),
        z_sample,
        system_count,
        max_distance,
    ))
}

/// Splits the worksheet title cell into `(cmdr, project)`; anything but a
/// single separator leaves both empty.
pub fn split_title(title: Option<&str>) -> (String, String) {
    let parts: Vec<&str> = title.unwrap_or_default().split(TITLE_SEPARATOR).collect();
    match parts.as_slice() {
        [cmdr, project] => (cmdr.to_string(), project.to_string()),
        _ => (String::new(), String::new()),
    }
}

/// Builds the survey for a worksheet already matched to `variant`.
pub fn extract_survey(
    spreadsheet_id: &SpreadsheetId,
    worksheet: &str,
    grid: &CellGrid,
    variant: &SheetVariant,
) -> AppResult<Survey> {
    let (cmdr, project) = split_title(grid.cell(0, 0));
    let mut points = Vec::new();

    for row in variant.first_data_row()..grid.row_count() {
        match classify_row(grid, variant, row) {
            RowOutcome::Point(point) => points.push(point),
            RowOutcome::Skip(reason) => {
                debug!(worksheet, row, %reason, "skipping survey row");
            }
            RowOutcome::End => break,
            RowOutcome::Abort(value) => {
                return Err(AppError::InvalidMaxDistance {
                    worksheet: worksheet.to_string(),
                    row,
                    value,
                });
            }
        }
    }

    Ok(Survey {
        spreadsheet_id: spreadsheet_id.clone(),
        worksheet: worksheet.to_string(),
        variant: variant.name.clone(),
        cmdr,
        project,
        points,
    })
}
