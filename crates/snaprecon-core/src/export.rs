//! Writers for reconciliation outputs
//!
//! Every file is written to a temporary sibling first. The siblings are only
//! renamed into place once all of them were written, so a failed export never
//! replaces any previous output.

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::parser::FileKind;
use crate::reconcile::Reconciliation;
use crate::table::{CellValue, Table};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output format for `export_reconciliation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xlsx" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!(
                "unknown format '{}', supported formats: xlsx, csv, json",
                other
            )),
        }
    }
}

/// Write the cleaned and updates artifacts of a reconciliation into `dir`.
///
/// - xlsx: `cleaned_dump.xlsx` and `dump_updates.xlsx` (sheets
///   `Status_Changes` and `New_Entries`)
/// - csv: `cleaned_dump.csv`, `status_changes.csv`, `new_entries.csv`
/// - json: `cleaned_dump.json` (cleaned table) and `dump_updates.json`
///
/// Nothing is renamed into place until every artifact has been written, so
/// a failure leaves the previous run's files as they were. Returns the
/// written paths.
pub fn export_reconciliation(
    result: &Reconciliation,
    dir: &Path,
    format: ExportFormat,
    output: &OutputConfig,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let ext = format.extension();
    let cleaned_path = dir.join(format!("{}.{}", output.cleaned_file_stem, ext));
    let updates_path = dir.join(format!("{}.{}", output.updates_file_stem, ext));

    let mut staged = StagedFiles::default();
    match format {
        ExportFormat::Xlsx => {
            staged.stage(&cleaned_path, |tmp| {
                xlsx_to(tmp, &[(output.sheet_name.as_str(), &result.cleaned)], output)
            })?;
            staged.stage(&updates_path, |tmp| {
                xlsx_to(
                    tmp,
                    &[
                        ("Status_Changes", &result.status_changes),
                        ("New_Entries", &result.new_entries),
                    ],
                    output,
                )
            })?;
        }
        ExportFormat::Csv => {
            staged.stage(&cleaned_path, |tmp| csv_to(tmp, &cleaned_path, &result.cleaned))?;
            let changes_path = dir.join("status_changes.csv");
            staged.stage(&changes_path, |tmp| csv_to(tmp, &changes_path, &result.status_changes))?;
            let new_path = dir.join("new_entries.csv");
            staged.stage(&new_path, |tmp| csv_to(tmp, &new_path, &result.new_entries))?;
        }
        ExportFormat::Json => {
            #[derive(Serialize)]
            struct Updates<'a> {
                status_changes: &'a Table,
                new_entries: &'a Table,
            }
            staged.stage(&cleaned_path, |tmp| json_to(tmp, &result.cleaned))?;
            staged.stage(&updates_path, |tmp| {
                json_to(
                    tmp,
                    &Updates {
                        status_changes: &result.status_changes,
                        new_entries: &result.new_entries,
                    },
                )
            })?;
        }
    }

    let written = staged.commit()?;
    tracing::info!(files = written.len(), dir = %dir.display(), "exported reconciliation");
    Ok(written)
}

/// Write a single table, choosing CSV or XLSX from the path's extension.
///
/// Other workbook extensions are rejected with `Error::UnsupportedFormat`.
pub fn write_table(path: &Path, table: &Table, sheet: &str, output: &OutputConfig) -> Result<()> {
    match FileKind::for_output(path)? {
        FileKind::Csv => write_csv(path, table),
        FileKind::Workbook => write_xlsx(path, &[(sheet, table)], output),
    }
}

/// Write a table as CSV
pub fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let mut staged = StagedFiles::default();
    staged.stage(path, |tmp| csv_to(tmp, path, table))?;
    staged.commit()?;
    Ok(())
}

/// Write any serializable value as pretty JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut staged = StagedFiles::default();
    staged.stage(path, |tmp| json_to(tmp, value))?;
    staged.commit()?;
    Ok(())
}

/// Write one or more tables as worksheets of a new workbook.
///
/// Timestamp cells get the configured datetime number format and every
/// column gets the configured width.
pub fn write_xlsx(path: &Path, sheets: &[(&str, &Table)], output: &OutputConfig) -> Result<()> {
    let mut staged = StagedFiles::default();
    staged.stage(path, |tmp| xlsx_to(tmp, sheets, output))?;
    staged.commit()?;
    Ok(())
}

fn csv_to(tmp: &Path, path: &Path, table: &Table) -> Result<()> {
    let file = File::create(tmp)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    let csv_err = |e: csv::Error| Error::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    writer.write_record(table.column_names()).map_err(csv_err)?;
    for row in &table.rows {
        let values: Vec<String> = (0..table.column_count())
            .map(|i| row.cell(i).to_string_value())
            .collect();
        writer.write_record(&values).map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

fn json_to<T: Serialize>(tmp: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(tmp)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn xlsx_to(tmp: &Path, sheets: &[(&str, &Table)], output: &OutputConfig) -> Result<()> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format(&output.datetime_format);

    for (name, table) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name)?;
        write_sheet(worksheet, name, table, &date_format, output.column_width)?;
    }

    workbook.save(tmp)?;
    Ok(())
}

fn write_sheet(
    worksheet: &mut Worksheet,
    name: &str,
    table: &Table,
    date_format: &Format,
    width: f64,
) -> Result<()> {
    let too_large = || Error::SheetTooLarge {
        sheet: name.to_string(),
        rows: table.row_count(),
        columns: table.column_count(),
    };
    let cols: Vec<u16> = (0..table.column_count())
        .map(|c| u16::try_from(c).map_err(|_| too_large()))
        .collect::<Result<_>>()?;

    for col in &table.columns {
        let c = u16::try_from(col.index).map_err(|_| too_large())?;
        worksheet.write_string(0, c, &col.name)?;
        worksheet.set_column_width(c, width)?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        // Row 0 is the header
        let r = u32::try_from(row_idx + 1).map_err(|_| too_large())?;
        for (col, &c) in cols.iter().enumerate() {
            match row.cell(col) {
                CellValue::Integer(i) => {
                    worksheet.write_number(r, c, *i as f64)?;
                }
                CellValue::Float(f) => {
                    worksheet.write_number(r, c, *f)?;
                }
                CellValue::String(s) => {
                    worksheet.write_string(r, c, s)?;
                }
                CellValue::DateTime(dt) => {
                    worksheet.write_datetime_with_format(r, c, dt, date_format)?;
                }
                CellValue::Empty => {}
            }
        }
    }
    Ok(())
}

/// Output files written to temporary siblings, renamed into place together.
///
/// Temporary files still pending when this is dropped are removed, so an
/// error at any point leaves no `.tmp` files behind.
#[derive(Default)]
struct StagedFiles {
    /// (temporary sibling, target)
    pending: Vec<(PathBuf, PathBuf)>,
}

impl StagedFiles {
    /// Run `write` against a temporary sibling of `path`
    fn stage<F>(&mut self, path: &Path, write: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

        // Tracked before writing so a partial file is cleaned up too
        self.pending.push((tmp_path.clone(), path.to_path_buf()));
        write(&tmp_path)
    }

    /// Rename every staged file over its target
    fn commit(mut self) -> Result<Vec<PathBuf>> {
        for (_, target) in &self.pending {
            if let Ok(meta) = fs::metadata(target) {
                if !meta.is_file() {
                    return Err(Error::OutputBlocked(target.clone()));
                }
            }
        }

        let mut written = Vec::with_capacity(self.pending.len());
        while !self.pending.is_empty() {
            let (tmp_path, target) = self.pending.remove(0);
            if let Err(e) = fs::rename(&tmp_path, &target) {
                let _ = fs::remove_file(&tmp_path);
                return Err(e.into());
            }
            tracing::debug!(path = %target.display(), "wrote file");
            written.push(target);
        }
        Ok(written)
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for (tmp_path, _) in self.pending.drain(..) {
            let _ = fs::remove_file(&tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format_from_str() {
        assert_eq!("XLSX".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("txt".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_extension_matches_format() {
        assert_eq!(ExportFormat::Xlsx.extension(), "xlsx");
        assert_eq!(ExportFormat::Csv.extension(), "csv");
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_blocked_target_renames_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        fs::write(&first, "old").unwrap();
        fs::create_dir(&second).unwrap();

        let mut staged = StagedFiles::default();
        staged.stage(&first, |tmp| json_to(tmp, &"new")).unwrap();
        staged.stage(&second, |tmp| json_to(tmp, &"new")).unwrap();
        assert!(matches!(staged.commit(), Err(Error::OutputBlocked(_))));

        assert_eq!(fs::read_to_string(&first).unwrap(), "old");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_dropped_stage_removes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleaned.json");

        {
            let mut staged = StagedFiles::default();
            staged.stage(&path, |tmp| json_to(tmp, &1)).unwrap();
            let err = staged.stage(&dir.path().join("x.json"), |tmp| {
                fs::write(tmp, "partial")?;
                Err(Error::UnsupportedFormat(tmp.to_path_buf()))
            });
            assert!(err.is_err());
        }

        assert!(!path.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_oversized_sheet_is_rejected() {
        let names: Vec<String> = (0..=u16::MAX as usize).map(|i| format!("c{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        let table = Table::from_parts(PathBuf::from("wide.csv"), &refs, Vec::new());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.xlsx");
        let err = write_xlsx(&path, &[("Data", &table)], &OutputConfig::default()).unwrap_err();

        assert!(matches!(err, Error::SheetTooLarge { columns: 65536, .. }));
        assert!(!path.exists());
        assert!(leftovers(dir.path()).is_empty());
    }
}
