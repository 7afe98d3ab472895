//! Known survey worksheet layouts and the detector that picks one for a grid.
//!
//! A layout is plain data. Detection first checks fixed header cells, then
//! samples the data rows below the header to make sure the column layout
//! actually fits the content; header text alone is ambiguous between templates.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::{AppError, AppResult};
use crate::grid::CellGrid;

/// Upper bound (exclusive) for a plausible system count in one sample.
const MAX_PLAUSIBLE_SYSTEM_COUNT: u32 = 50;
/// Upper bound (inclusive) for a plausible max distance, in light years.
const MAX_PLAUSIBLE_DISTANCE: f64 = 20.0;

/// Exact text expected at one cell of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderCheck {
    pub row: usize,
    pub column: usize,
    pub expected: String,
}

impl HeaderCheck {
    pub fn new(row: usize, column: usize, expected: impl Into<String>) -> Self {
        Self {
            row,
            column,
            expected: expected.into(),
        }
    }

    fn holds(&self, grid: &CellGrid) -> bool {
        grid.cell(self.row, self.column) == Some(self.expected.as_str())
    }
}

/// Column indices are zero-based into the fetched grid (A = 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetVariant {
    pub name: String,
    pub header_row: usize,
    pub header_checks: Vec<HeaderCheck>,
    pub system_name_column: usize,
    pub z_sample_column: usize,
    pub system_count_column: usize,
    pub max_distance_column: usize,
    pub x_column: usize,
    pub y_column: usize,
    pub z_column: usize,
    /// Share of sampled rows (0.0..=1.0) that must look well formed.
    pub min_sample_ratio: f64,
}

/// Row tallies gathered while sampling a grid's data section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleTally {
    pub rows_with_z_sample: usize,
    pub well_formed: usize,
}

impl SheetVariant {
    pub fn first_data_row(&self) -> usize {
        self.header_row + 1
    }

    pub fn headers_match(&self, grid: &CellGrid) -> bool {
        self.header_checks.iter().all(|check| check.holds(grid))
    }

    /// Walks data rows until the first row without a z-sample.
    pub fn sample(&self, grid: &CellGrid) -> SampleTally {
        let mut tally = SampleTally::default();
        for row in self.first_data_row()..grid.row_count() {
            if grid.filled(row, self.z_sample_column).is_none() {
                break;
            }
            tally.rows_with_z_sample += 1;
            if self.is_well_formed(grid, row) {
                tally.well_formed += 1;
            }
        }
        tally
    }

    fn is_well_formed(&self, grid: &CellGrid, row: usize) -> bool {
        if grid.filled(row, self.system_name_column).is_none() {
            return false;
        }
        let plausible_count = grid
            .filled(row, self.system_count_column)
            .and_then(|value| value.parse::<u32>().ok())
            .is_some_and(|count| count < MAX_PLAUSIBLE_SYSTEM_COUNT);
        let plausible_distance = grid
            .filled(row, self.max_distance_column)
            .and_then(|value| value.parse::<f64>().ok())
            .is_some_and(|distance| (0.0..=MAX_PLAUSIBLE_DISTANCE).contains(&distance));
        plausible_count || plausible_distance
    }

    /// Strictly more than `min_sample_ratio` of the sampled rows must be
    /// well formed, so a grid without data rows never matches.
    pub fn matches(&self, grid: &CellGrid) -> bool {
        if !self.headers_match(grid) {
            return false;
        }
        let tally = self.sample(grid);
        let matched =
            tally.well_formed as f64 > tally.rows_with_z_sample as f64 * self.min_sample_ratio;
        trace!(
            variant = %self.name,
            rows = tally.rows_with_z_sample,
            well_formed = tally.well_formed,
            matched,
            "sampled data rows"
        );
        matched
    }

    fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.min_sample_ratio) {
            return Err(AppError::Config(format!(
                "variant {} has min_sample_ratio {} outside 0.0..=1.0",
                self.name, self.min_sample_ratio
            )));
        }
        if self.header_checks.is_empty() {
            return Err(AppError::Config(format!(
                "variant {} has no header checks",
                self.name
            )));
        }
        Ok(())
    }
}

/// Ordered layouts; stricter layouts go first because the first match wins.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRegistry {
    variants: Vec<SheetVariant>,
}

impl VariantRegistry {
    pub fn new(variants: Vec<SheetVariant>) -> AppResult<Self> {
        for variant in &variants {
            variant.validate()?;
        }
        Ok(Self { variants })
    }

    pub fn builtin() -> Self {
        Self {
            variants: vec![dw3(), a15x(4, "A15X"), a15x(5, "A15Xv1")],
        }
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        let variants: Vec<SheetVariant> = serde_json::from_str(json)?;
        Self::new(variants)
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn variants(&self) -> &[SheetVariant] {
        &self.variants
    }

    pub fn detect(&self, grid: &CellGrid) -> Option<&SheetVariant> {
        self.variants.iter().find(|variant| variant.matches(grid))
    }
}

impl Default for VariantRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn dw3() -> SheetVariant {
    SheetVariant {
        name: "DW3".into(),
        header_row: 4,
        header_checks: vec![
            HeaderCheck::new(4, 0, "System"),
            HeaderCheck::new(4, 2, "System Count"),
            HeaderCheck::new(4, 6, "X"),
            HeaderCheck::new(4, 7, "Z"),
            HeaderCheck::new(4, 8, "Y"),
        ],
        system_name_column: 0,
        z_sample_column: 1,
        system_count_column: 2,
        max_distance_column: 4,
        x_column: 6,
        y_column: 8,
        z_column: 7,
        min_sample_ratio: 0.45,
    }
}

// The A15X template moved its header down one row at some point; both
// revisions are otherwise identical.
fn a15x(header_row: usize, name: &str) -> SheetVariant {
    SheetVariant {
        name: name.into(),
        header_row,
        header_checks: vec![
            HeaderCheck::new(header_row, 0, "System"),
            HeaderCheck::new(header_row, 2, "n"),
            HeaderCheck::new(header_row, 5, "X"),
            HeaderCheck::new(header_row, 6, "Z"),
            HeaderCheck::new(header_row, 7, "Y"),
        ],
        system_name_column: 0,
        z_sample_column: 1,
        system_count_column: 2,
        max_distance_column: 3,
        x_column: 5,
        y_column: 7,
        z_column: 6,
        min_sample_ratio: 0.9,
    }
}
