use serde::{Deserialize, Serialize};

/// Ragged block of cell text as returned by a range read. Row and column
/// indices are zero-based offsets into the block, not A1 addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellGrid {
    rows: Vec<Vec<String>>,
}

impl CellGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// `None` when the row or the cell is missing; an empty string is a value.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
    }

    /// Trimmed cell text, or `None` when the cell is missing or blank.
    pub fn filled(&self, row: usize, column: usize) -> Option<&str> {
        self.cell(row, column)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_absent_from_empty_cells() {
        let grid = CellGrid::from_rows(vec![vec!["a", ""], vec!["b"]]);
        assert_eq!(grid.cell(0, 1), Some(""));
        assert_eq!(grid.cell(1, 1), None);
        assert_eq!(grid.cell(5, 0), None);
        assert_eq!(grid.filled(0, 1), None);
        assert_eq!(grid.filled(1, 0), Some("b"));
    }
}
