//! Error types for snaprecon-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in snaprecon-core
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse CSV
    #[error("failed to parse CSV '{path}': {message}")]
    CsvParse { path: PathBuf, message: String },

    /// CSV parsing error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Spreadsheet could not be opened or read
    #[error("failed to read workbook '{path}': {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    /// Requested worksheet does not exist in the workbook
    #[error("sheet '{sheet}' not found in '{path}'")]
    SheetNotFound { sheet: String, path: PathBuf },

    /// Worksheet has no non-empty row to use as the header
    #[error("sheet '{sheet}' in '{path}' has no header row")]
    EmptySheet { sheet: String, path: PathBuf },

    /// File extension is not one we know how to load or write
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(PathBuf),

    /// An output target exists but cannot be replaced by a file
    #[error("output path '{0}' exists and is not a regular file")]
    OutputBlocked(PathBuf),

    /// Table does not fit in a worksheet
    #[error("sheet '{sheet}' cannot hold {rows} rows x {columns} columns")]
    SheetTooLarge {
        sheet: String,
        rows: usize,
        columns: usize,
    },

    /// A required column is absent from one of the input tables
    #[error("'{column}' column not found in {role} table")]
    MissingColumn { role: String, column: String },

    /// A timestamp cell does not match the configured format
    #[error("{role} row {row}: cannot parse timestamp '{value}' (expected format {format})")]
    TimestampParse {
        role: String,
        row: usize,
        value: String,
        format: String,
    },

    /// Refused to run an update that would re-append rows
    #[error("update refused: {0}")]
    ReappendHazard(String),

    /// Config file could not be parsed
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("failed to serialize config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Spreadsheet writer error
    #[error("XLSX write error: {0}")]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors caused by the shape of an input table
    pub fn is_schema_error(&self) -> bool {
        matches!(self, Error::MissingColumn { .. })
    }
}
