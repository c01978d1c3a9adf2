//! snaprecon-core: Core library for reconciling report and dump snapshots
//!
//! This library provides functionality to:
//! - Load report and dump exports from CSV files or workbooks
//! - Normalize join keys and `Created On` timestamps
//! - Reconcile a dump against a report (cleaned rows, status changes, new entries)
//! - Bring a report up to date from a dump (status refresh plus append)
//! - Export results as XLSX, CSV or JSON and keep a ledger of applied updates

pub mod config;
pub mod error;
pub mod export;
pub mod history;
pub mod parser;
pub mod reconcile;
pub mod snapshot;
pub mod table;
pub mod update;

pub use config::{ColumnNames, InputConfig, OutputConfig, ReconConfig};
pub use error::{Error, Result};
pub use export::{export_reconciliation, write_csv, write_json, write_table, write_xlsx, ExportFormat};
pub use history::{HistoryEntry, UpdateHistory};
pub use parser::{load_table, parse_csv, parse_csv_str, parse_xlsx, FileKind};
pub use reconcile::{reconcile, reconcile_snapshots, ReconcileMetrics, Reconciliation};
pub use snapshot::{ParentId, Role, Snapshot};
pub use table::{CellValue, Column, Row, Table};
pub use update::{apply_status_and_append, StatusUpdate};
