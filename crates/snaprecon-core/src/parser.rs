//! Loaders for report and dump exports (CSV and spreadsheet workbooks)

use crate::error::{Error, Result};
use crate::table::{CellValue, Column, Row, Table};
use calamine::{open_workbook_auto, Data, Reader};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Kind of file a table is loaded from or written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Workbook,
}

impl FileKind {
    /// Detect the kind from a path's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(FileKind::Csv),
            Some("xlsx") | Some("xlsm") | Some("xls") | Some("xlsb") | Some("ods") => {
                Ok(FileKind::Workbook)
            }
            _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Detect the kind for a file that will be written.
    ///
    /// Only `.csv` and `.xlsx` can be produced; other workbook extensions
    /// load fine but would be overwritten with bytes their readers reject.
    pub fn for_output(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(FileKind::Csv),
            Some("xlsx") => Ok(FileKind::Workbook),
            _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Load a table from CSV or a workbook.
///
/// `sheet` selects a worksheet for workbooks (first sheet when `None`) and is
/// ignored for CSV.
pub fn load_table<P: AsRef<Path>>(path: P, sheet: Option<&str>) -> Result<Table> {
    let path = path.as_ref();
    match FileKind::from_path(path)? {
        FileKind::Csv => parse_csv(path),
        FileKind::Workbook => parse_xlsx(path, sheet),
    }
}

/// Parse a CSV file into a Table
pub fn parse_csv<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    read_csv(BufReader::new(file), path.to_path_buf())
}

/// Parse CSV from a string (useful for testing)
pub fn parse_csv_str(content: &str, source_name: &str) -> Result<Table> {
    read_csv(content.as_bytes(), PathBuf::from(source_name))
}

fn read_csv<R: Read>(reader: R, path: PathBuf) -> Result<Table> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // Allow varying number of fields
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(|e| Error::Csv {
        path: path.clone(),
        source: e,
    })?;

    let columns: Vec<Column> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| Column::new(name.trim().to_string(), i))
        .collect();

    if columns.is_empty() {
        return Err(Error::CsvParse {
            path,
            message: "no columns found in CSV".to_string(),
        });
    }

    let mut rows = Vec::new();
    for (row_idx, result) in csv_reader.records().enumerate() {
        let record = result.map_err(|e| Error::Csv {
            path: path.clone(),
            source: e,
        })?;

        let cells: Vec<CellValue> = record.iter().map(CellValue::parse).collect();
        rows.push(Row::new(fit_to_columns(cells, columns.len(), row_idx, &path)));
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), "loaded CSV");

    Ok(Table {
        columns,
        rows,
        source_path: path,
    })
}

/// Parse one worksheet of a workbook into a Table.
///
/// The first non-empty row is the header. Date-typed cells become
/// `CellValue::DateTime`.
pub fn parse_xlsx<P: AsRef<Path>>(path: P, sheet: Option<&str>) -> Result<Table> {
    let path = path.as_ref();
    let mut workbook = open_workbook_auto(path).map_err(|e| Error::Workbook {
        path: path.to_path_buf(),
        source: e,
    })?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| Error::SheetNotFound {
                sheet: "<first>".to_string(),
                path: path.to_path_buf(),
            })?,
    };

    if !workbook.sheet_names().iter().any(|s| s == &sheet_name) {
        return Err(Error::SheetNotFound {
            sheet: sheet_name,
            path: path.to_path_buf(),
        });
    }

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| Error::Workbook {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut sheet_rows = range.rows().skip_while(|r| r.iter().all(|c| matches!(c, Data::Empty)));

    let columns: Vec<Column> = match sheet_rows.next() {
        Some(header) => header
            .iter()
            .enumerate()
            .map(|(i, cell)| Column::new(workbook_cell(cell).to_string_value(), i))
            .collect(),
        None => Vec::new(),
    };

    if columns.is_empty() {
        return Err(Error::EmptySheet {
            sheet: sheet_name,
            path: path.to_path_buf(),
        });
    }

    let mut rows = Vec::new();
    for (row_idx, sheet_row) in sheet_rows.enumerate() {
        if sheet_row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let cells: Vec<CellValue> = sheet_row.iter().map(workbook_cell).collect();
        rows.push(Row::new(fit_to_columns(cells, columns.len(), row_idx, path)));
    }

    tracing::debug!(
        path = %path.display(),
        sheet = %sheet_name,
        rows = rows.len(),
        "loaded worksheet"
    );

    Ok(Table {
        columns,
        rows,
        source_path: path.to_path_buf(),
    })
}

fn workbook_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) if f.is_nan() => CellValue::Empty,
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) => CellValue::parse(s),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) => CellValue::DateTime(ndt),
            None => CellValue::Float(dt.as_f64()),
        },
        other => CellValue::parse(&other.to_string()),
    }
}

/// Pad short rows with empty cells and truncate long ones
fn fit_to_columns(mut cells: Vec<CellValue>, width: usize, row_idx: usize, path: &Path) -> Vec<CellValue> {
    while cells.len() < width {
        cells.push(CellValue::Empty);
    }

    if cells.len() > width {
        if cells[width..].iter().any(|c| !c.is_empty()) {
            tracing::warn!(
                row = row_idx + 1,
                path = %path.display(),
                "row has more cells than columns, truncating"
            );
        }
        cells.truncate(width);
    }
    cells
}
