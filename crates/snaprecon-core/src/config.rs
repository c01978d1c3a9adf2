//! Reconciliation settings loaded from TOML
//!
//! Every section is optional; a missing key falls back to the column names
//! and formats used by the report exports this tool was built around.

use crate::error::{Error, Result};
use crate::table::TIMESTAMP_FORMAT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub columns: ColumnNames,
    pub input: InputConfig,
    pub output: OutputConfig,
}

/// Header names of the columns the reconciler looks at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub parent_id: String,
    pub created_on: String,
    pub record_type: String,
    pub status: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            parent_id: "ParentID".to_string(),
            created_on: "Created On".to_string(),
            record_type: "Record Type".to_string(),
            status: "Status".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// chrono format string for `Created On` text cells
    pub timestamp_format: String,
    /// Worksheet holding the report rows
    pub report_sheet: String,
    /// Worksheet holding the dump rows; first sheet when unset
    pub dump_sheet: Option<String>,
    /// Record type (compared lower-case) that marks a change record
    pub change_record_type: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            timestamp_format: TIMESTAMP_FORMAT.to_string(),
            report_sheet: "Data".to_string(),
            dump_sheet: None,
            change_record_type: "change".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Excel number format applied to timestamp cells
    pub datetime_format: String,
    /// Width applied to every exported column
    pub column_width: f64,
    /// Sheet name for single-table workbooks
    pub sheet_name: String,
    pub cleaned_file_stem: String,
    pub updates_file_stem: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            datetime_format: "mm/dd/yyyy hh:mm:ss".to_string(),
            column_width: 20.0,
            sheet_name: "Sheet1".to_string(),
            cleaned_file_stem: "cleaned_dump".to_string(),
            updates_file_stem: "dump_updates".to_string(),
        }
    }
}

impl ReconConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a config file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save the config as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}
