//! Bring a report up to date from a newer dump
//!
//! The reverse of reconciliation: report statuses are overwritten with the
//! dump's current values and dump rows newer than the report are appended.
//! No row of the report is ever removed.

use crate::config::ReconConfig;
use crate::error::Result;
use crate::snapshot::{ParentId, Role, Snapshot};
use crate::table::{CellValue, Row, Table};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// Output of [`apply_status_and_append`]
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// Report rows (statuses refreshed) followed by the appended dump rows
    pub table: Table,
    pub statuses_updated: usize,
    pub rows_appended: usize,
    /// Latest report `Created On` before the update
    pub cutoff: Option<NaiveDateTime>,
}

impl StatusUpdate {
    /// Latest `Created On` in the merged table
    pub fn new_cutoff(&self, config: &ReconConfig) -> Option<NaiveDateTime> {
        let col = self.table.column_index(&config.columns.created_on)?;
        self.table
            .rows
            .iter()
            .filter_map(|r| r.cell(col).as_datetime())
            .max()
    }
}

/// Refresh report statuses from `dump` and append dump rows past the cutoff.
///
/// A report row's status is replaced when its ParentID is in the dump and the
/// dump's status (last dump row per ParentID wins) differs. Rows with an
/// empty ParentID or status never take part in the status map. Appended rows
/// are aligned to the report's columns by name.
pub fn apply_status_and_append(report: &Table, dump: &Table, config: &ReconConfig) -> Result<StatusUpdate> {
    let report = Snapshot::from_table(report, Role::Report, config)?;
    let dump = Snapshot::from_table(dump, Role::Dump, config)?;
    let cutoff = report.cutoff();

    let mut table = report.table.clone();
    let mut statuses_updated = 0;

    if let (Some(report_status), true) = (report.index.status, dump.has_status()) {
        let dump_statuses: HashMap<ParentId, String> = dump
            .rows()
            .iter()
            .filter_map(|r| Some((dump.parent_id(r)?, dump.status(r)?)))
            .collect();

        for row in &mut table.rows {
            let Some(id) = report.parent_id(row) else {
                continue;
            };
            let Some(current) = dump_statuses.get(&id) else {
                continue;
            };
            if row.cell(report_status).to_string_value() != *current {
                if row.cells.len() <= report_status {
                    row.cells.resize(report_status + 1, CellValue::Empty);
                }
                row.cells[report_status] = CellValue::parse(current);
                statuses_updated += 1;
            }
        }
    } else {
        tracing::debug!("status column missing, leaving report statuses untouched");
    }

    let new_rows: Vec<Row> = dump
        .rows()
        .iter()
        .filter(|r| cutoff.map_or(true, |c| dump.created_on(r) > c))
        .cloned()
        .collect();
    let rows_appended = new_rows.len();
    table.append_aligned(&dump.table, &new_rows);

    tracing::info!(statuses_updated, rows_appended, cutoff = ?cutoff, "report updated from dump");

    Ok(StatusUpdate {
        table,
        statuses_updated,
        rows_appended,
        cutoff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_csv_str;

    const REPORT: &str = "ParentID,Created On,Status\n\
                          1,01/05/2024 00:00:00,Open\n\
                          2,01/10/2024 00:00:00,Open\n\
                          ,01/06/2024 00:00:00,Open\n";

    const DUMP: &str = "ParentID,Created On,Status\n\
                        1,01/05/2024 00:00:00,Closed\n\
                        2,01/10/2024 00:00:00,Open\n\
                        ,01/06/2024 00:00:00,Resolved\n\
                        3,01/12/2024 08:00:00,New\n";

    fn update(report: &str, dump: &str) -> StatusUpdate {
        let report = parse_csv_str(report, "report.csv").unwrap();
        let dump = parse_csv_str(dump, "dump.csv").unwrap();
        apply_status_and_append(&report, &dump, &ReconConfig::default()).unwrap()
    }

    fn statuses(table: &Table) -> Vec<String> {
        let col = table.column_index("Status").unwrap();
        table.rows.iter().map(|r| r.cell(col).to_string_value()).collect()
    }

    #[test]
    fn test_statuses_replaced_and_new_rows_appended() {
        let result = update(REPORT, DUMP);

        assert_eq!(result.statuses_updated, 1);
        assert_eq!(result.rows_appended, 1);
        assert_eq!(statuses(&result.table), vec!["Closed", "Open", "Open", "New"]);
    }

    #[test]
    fn test_missing_parent_id_never_takes_dump_status() {
        let result = update(REPORT, DUMP);
        // Third report row has no ParentID and keeps its own status
        assert_eq!(statuses(&result.table)[2], "Open");
    }

    #[test]
    fn test_last_dump_row_wins() {
        let result = update(
            "ParentID,Created On,Status\n1,01/10/2024 00:00:00,Open\n",
            "ParentID,Created On,Status\n1,01/02/2024 00:00:00,Closed\n1,01/03/2024 00:00:00,Pending\n",
        );
        assert_eq!(statuses(&result.table), vec!["Pending"]);
    }

    #[test]
    fn test_rerun_on_merged_report_is_stable() {
        let report = parse_csv_str(REPORT, "report.csv").unwrap();
        let dump = parse_csv_str(DUMP, "dump.csv").unwrap();
        let config = ReconConfig::default();

        let once = apply_status_and_append(&report, &dump, &config).unwrap();
        let twice = apply_status_and_append(&once.table, &dump, &config).unwrap();

        assert_eq!(twice.statuses_updated, 0);
        assert_eq!(twice.rows_appended, 0);
        assert_eq!(twice.table.rows, once.table.rows);
    }

    #[test]
    fn test_rerun_on_stale_report_reappends() {
        let report = parse_csv_str(REPORT, "report.csv").unwrap();
        let dump = parse_csv_str(DUMP, "dump.csv").unwrap();
        let config = ReconConfig::default();

        apply_status_and_append(&report, &dump, &config).unwrap();
        let again = apply_status_and_append(&report, &dump, &config).unwrap();

        // The stale report still has the old cutoff, so row 3 comes back
        assert_eq!(again.rows_appended, 1);
    }

    #[test]
    fn test_new_cutoff_advances() {
        let result = update(REPORT, DUMP);
        let config = ReconConfig::default();

        assert!(result.new_cutoff(&config).unwrap() > result.cutoff.unwrap());
    }

    #[test]
    fn test_dump_columns_are_aligned_by_name() {
        let result = update(
            "ParentID,Created On,Status\n1,01/10/2024 00:00:00,Open\n",
            "Status,Created On,ParentID,Owner\nNew,01/11/2024 00:00:00,9,kim\n",
        );

        assert_eq!(result.table.column_names(), vec!["ParentID", "Created On", "Status", "Owner"]);
        let appended = &result.table.rows[1];
        assert_eq!(appended.cells[0], CellValue::Integer(9));
        assert_eq!(appended.cells[2], CellValue::String("New".to_string()));
        assert_eq!(appended.cells[3], CellValue::String("kim".to_string()));
        assert_eq!(result.table.rows[0].cells[3], CellValue::Empty);
    }

    #[test]
    fn test_no_status_column_only_appends() {
        let result = update(
            "ParentID,Created On\n1,01/10/2024 00:00:00\n",
            "ParentID,Created On,Status\n1,01/02/2024 00:00:00,Closed\n2,01/11/2024 00:00:00,New\n",
        );
        assert_eq!(result.statuses_updated, 0);
        assert_eq!(result.rows_appended, 1);
    }
}
