//! Normalized view of a report or dump table
//!
//! A [`Snapshot`] validates the columns the reconciler needs, converts the
//! `Created On` column to timestamps and exposes the join key of each row in
//! canonical string form.

use crate::config::ReconConfig;
use crate::error::{Error, Result};
use crate::table::{CellValue, Row, Table};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which input a snapshot was built from; used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Report,
    Dump,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Report => write!(f, "report"),
            Role::Dump => write!(f, "dump"),
        }
    }
}

/// Canonical join key of a row.
///
/// A missing key is `Option::<ParentId>::None`, never a sentinel string, so a
/// real ParentID of "0" cannot collide with an empty cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentId(String);

impl ParentId {
    /// Canonicalize a cell; `None` for empty cells
    pub fn from_cell(cell: &CellValue) -> Option<ParentId> {
        let canonical = match cell {
            CellValue::Empty => return None,
            CellValue::Integer(i) => i.to_string(),
            CellValue::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.to_string()
            }
            CellValue::DateTime(_) => cell.to_string_value(),
        };
        Some(ParentId(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Presentation form used by spreadsheet views: missing keys show as "0"
    pub fn display_or_zero(id: Option<&ParentId>) -> &str {
        id.map(|p| p.as_str()).unwrap_or("0")
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Column positions resolved against one table
#[derive(Debug, Clone, Copy)]
pub struct ColumnIndex {
    pub parent_id: usize,
    pub created_on: usize,
    pub record_type: Option<usize>,
    pub status: Option<usize>,
}

/// A table whose required columns have been validated and whose timestamps
/// have been parsed
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub role: Role,
    pub table: Table,
    pub index: ColumnIndex,
}

impl Snapshot {
    /// Validate and normalize `table`.
    ///
    /// Text timestamps are parsed with the configured format and replaced by
    /// `CellValue::DateTime`; the input table is not modified.
    pub fn from_table(table: &Table, role: Role, config: &ReconConfig) -> Result<Snapshot> {
        let names = &config.columns;
        let missing = |column: &str| Error::MissingColumn {
            role: role.to_string(),
            column: column.to_string(),
        };

        let parent_id = table
            .column_index(&names.parent_id)
            .ok_or_else(|| missing(&names.parent_id))?;
        let created_on = table
            .column_index(&names.created_on)
            .ok_or_else(|| missing(&names.created_on))?;

        let index = ColumnIndex {
            parent_id,
            created_on,
            record_type: table.column_index(&names.record_type),
            status: table.column_index(&names.status),
        };

        let format = &config.input.timestamp_format;
        let mut normalized = table.clone();
        for (row_idx, row) in normalized.rows.iter_mut().enumerate() {
            let parsed = parse_timestamp(row.cell(created_on), format).ok_or_else(|| {
                Error::TimestampParse {
                    role: role.to_string(),
                    row: row_idx + 1,
                    value: row.cell(created_on).to_string_value(),
                    format: format.clone(),
                }
            })?;
            if row.cells.len() <= created_on {
                row.cells.resize(created_on + 1, CellValue::Empty);
            }
            row.cells[created_on] = CellValue::DateTime(parsed);
        }

        Ok(Snapshot {
            role,
            table: normalized,
            index,
        })
    }

    pub fn rows(&self) -> &[Row] {
        &self.table.rows
    }

    pub fn parent_id(&self, row: &Row) -> Option<ParentId> {
        ParentId::from_cell(row.cell(self.index.parent_id))
    }

    /// Timestamp of a normalized row
    pub fn created_on(&self, row: &Row) -> NaiveDateTime {
        // from_table guarantees a DateTime in this column
        row.cell(self.index.created_on)
            .as_datetime()
            .unwrap_or(NaiveDateTime::MIN)
    }

    /// Lower-cased record type, if the column exists and the cell is set
    pub fn record_type(&self, row: &Row) -> Option<String> {
        let cell = row.cell(self.index.record_type?);
        if cell.is_empty() {
            None
        } else {
            Some(cell.to_string_value().to_lowercase())
        }
    }

    /// Status in canonical string form, if the column exists and the cell is set
    pub fn status(&self, row: &Row) -> Option<String> {
        let cell = row.cell(self.index.status?);
        if cell.is_empty() {
            None
        } else {
            Some(cell.to_string_value())
        }
    }

    pub fn has_record_type(&self) -> bool {
        self.index.record_type.is_some()
    }

    pub fn has_status(&self) -> bool {
        self.index.status.is_some()
    }

    /// Latest `Created On`; `None` when the table has no rows
    pub fn cutoff(&self) -> Option<NaiveDateTime> {
        self.rows().iter().map(|r| self.created_on(r)).max()
    }
}

fn parse_timestamp(cell: &CellValue, format: &str) -> Option<NaiveDateTime> {
    match cell {
        CellValue::DateTime(dt) => Some(*dt),
        CellValue::String(s) => NaiveDateTime::parse_from_str(s.trim(), format).ok(),
        _ => None,
    }
}
