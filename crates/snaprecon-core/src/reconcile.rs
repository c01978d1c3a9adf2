//! Reconciliation of a dump snapshot against the report it supersedes
//!
//! Four ordered stages, each working on the survivors of the previous one:
//! 1. split the dump at the report's latest `Created On` (the cutoff)
//! 2. drop pre-cutoff rows whose ParentID the report does not know
//! 3. drop change records with no matching (type, timestamp) in the report
//! 4. collect surviving rows whose ParentID changed status
//!
//! Rows are selected by predicate over the normalized snapshots; neither
//! input table is modified.

use crate::config::ReconConfig;
use crate::error::Result;
use crate::snapshot::{ParentId, Role, Snapshot};
use crate::table::{Row, Table};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Row counts reported alongside the output tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileMetrics {
    pub removed_unmatched_parent_ids: usize,
    pub removed_unmatched_change_rows: usize,
    pub status_changes_detected: usize,
}

/// Output of [`reconcile`]
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    /// Dump rows that survived filtering: pre-cutoff rows first, then new rows
    pub cleaned: Table,
    /// Cleaned rows whose ParentID has a different status in the report
    pub status_changes: Table,
    /// Dump rows created after the cutoff
    pub new_entries: Table,
    pub metrics: ReconcileMetrics,
    /// Latest report `Created On`; `None` for an empty report
    pub cutoff: Option<NaiveDateTime>,
}

impl Reconciliation {
    /// Rows in the "updates" artifact (status changes plus new entries)
    pub fn updates_row_count(&self) -> usize {
        self.status_changes.row_count() + self.new_entries.row_count()
    }
}

/// Reconcile `dump` against `report`.
///
/// Fails without producing any output when either table lacks the ParentID
/// or `Created On` column, or when a timestamp does not parse.
pub fn reconcile(report: &Table, dump: &Table, config: &ReconConfig) -> Result<Reconciliation> {
    let report = Snapshot::from_table(report, Role::Report, config)?;
    let dump = Snapshot::from_table(dump, Role::Dump, config)?;
    Ok(reconcile_snapshots(&report, &dump, config))
}

/// Reconcile two already normalized snapshots
pub fn reconcile_snapshots(report: &Snapshot, dump: &Snapshot, config: &ReconConfig) -> Reconciliation {
    let cutoff = report.cutoff();

    let (before, after) = partition_at_cutoff(dump, cutoff);
    tracing::debug!(
        cutoff = ?cutoff,
        before = before.len(),
        after = after.len(),
        "partitioned dump at cutoff"
    );

    let (before_kept, removed_unmatched_parent_ids) = drop_unmatched_parent_ids(report, dump, before);

    let mut cleaned: Vec<&Row> = before_kept;
    cleaned.extend(after.iter().copied());

    let removed_unmatched_change_rows = if report.has_record_type() && dump.has_record_type() {
        let (kept, removed) =
            drop_unmatched_changes(report, dump, cleaned, &config.input.change_record_type);
        cleaned = kept;
        removed
    } else {
        tracing::debug!("record type column missing, skipping change record filter");
        0
    };

    let status_changes = if report.has_status() && dump.has_status() {
        detect_status_changes(report, dump, &cleaned)
    } else {
        tracing::debug!("status column missing, skipping status change detection");
        Vec::new()
    };

    let metrics = ReconcileMetrics {
        removed_unmatched_parent_ids,
        removed_unmatched_change_rows,
        status_changes_detected: status_changes.len(),
    };

    tracing::info!(
        cleaned = cleaned.len(),
        new_entries = after.len(),
        removed_unmatched_parent_ids,
        removed_unmatched_change_rows,
        status_changes = metrics.status_changes_detected,
        "reconciliation complete"
    );

    Reconciliation {
        cleaned: dump.table.with_rows(owned(&cleaned)),
        status_changes: dump.table.with_rows(owned(&status_changes)),
        new_entries: dump.table.with_rows(owned(&after)),
        metrics,
        cutoff,
    }
}

fn owned(rows: &[&Row]) -> Vec<Row> {
    rows.iter().map(|r| (*r).clone()).collect()
}

/// Split dump rows into (at or before cutoff, after cutoff).
///
/// Without a cutoff every row counts as new.
fn partition_at_cutoff(dump: &Snapshot, cutoff: Option<NaiveDateTime>) -> (Vec<&Row>, Vec<&Row>) {
    match cutoff {
        Some(cutoff) => dump.rows().iter().partition(|r| dump.created_on(r) <= cutoff),
        None => (Vec::new(), dump.rows().iter().collect()),
    }
}

/// Remove pre-cutoff rows whose present ParentID is absent from the report.
///
/// Rows with an empty ParentID are kept.
fn drop_unmatched_parent_ids<'a>(
    report: &Snapshot,
    dump: &Snapshot,
    before: Vec<&'a Row>,
) -> (Vec<&'a Row>, usize) {
    let report_ids: HashSet<ParentId> = report
        .rows()
        .iter()
        .filter_map(|r| report.parent_id(r))
        .collect();

    let total = before.len();
    let kept: Vec<&Row> = before
        .into_iter()
        .filter(|r| match dump.parent_id(r) {
            Some(id) => report_ids.contains(&id),
            None => true,
        })
        .collect();

    let removed = total - kept.len();
    tracing::debug!(removed, report_ids = report_ids.len(), "dropped unmatched ParentIDs");
    (kept, removed)
}

/// Remove change records whose (type, timestamp) pair is not in the report
fn drop_unmatched_changes<'a>(
    report: &Snapshot,
    dump: &Snapshot,
    cleaned: Vec<&'a Row>,
    change_type: &str,
) -> (Vec<&'a Row>, usize) {
    let change_type = change_type.to_lowercase();
    let report_keys: HashSet<(String, NaiveDateTime)> = report
        .rows()
        .iter()
        .filter_map(|r| report.record_type(r).map(|t| (t, report.created_on(r))))
        .collect();

    let total = cleaned.len();
    let kept: Vec<&Row> = cleaned
        .into_iter()
        .filter(|r| match dump.record_type(r) {
            Some(t) if t == change_type => report_keys.contains(&(t, dump.created_on(r))),
            _ => true,
        })
        .collect();

    let removed = total - kept.len();
    tracing::debug!(removed, "dropped unmatched change records");
    (kept, removed)
}

/// Cleaned rows whose ParentID carries a different status in the report.
///
/// Report and cleaned rows with both ParentID and status set are joined on
/// ParentID; any joined pair with differing status flags that ParentID.
fn detect_status_changes<'a>(report: &Snapshot, dump: &Snapshot, cleaned: &[&'a Row]) -> Vec<&'a Row> {
    let mut report_statuses: HashMap<ParentId, HashSet<String>> = HashMap::new();
    for row in report.rows() {
        if let (Some(id), Some(status)) = (report.parent_id(row), report.status(row)) {
            report_statuses.entry(id).or_default().insert(status);
        }
    }

    let mut flagged: HashSet<ParentId> = HashSet::new();
    for row in cleaned {
        if let (Some(id), Some(status)) = (dump.parent_id(row), dump.status(row)) {
            let differs = report_statuses
                .get(&id)
                .is_some_and(|seen| seen.iter().any(|s| *s != status));
            if differs {
                flagged.insert(id);
            }
        }
    }

    tracing::debug!(parent_ids = flagged.len(), "flagged status changes");

    cleaned
        .iter()
        .copied()
        .filter(|r| dump.parent_id(r).is_some_and(|id| flagged.contains(&id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::parser::parse_csv_str;
    use crate::snapshot::ParentId;
    use crate::table::CellValue;

    fn run(report: &str, dump: &str) -> Reconciliation {
        let report = parse_csv_str(report, "report.csv").unwrap();
        let dump = parse_csv_str(dump, "dump.csv").unwrap();
        reconcile(&report, &dump, &ReconConfig::default()).unwrap()
    }

    fn ids(table: &Table) -> Vec<String> {
        let col = table.column_index("ParentID").unwrap();
        table
            .rows
            .iter()
            .map(|r| ParentId::display_or_zero(ParentId::from_cell(r.cell(col)).as_ref()).to_string())
            .collect()
    }

    #[test]
    fn test_unmatched_parent_id_is_removed() {
        let result = run(
            "ParentID,Created On\n1,01/05/2024 00:00:00\n2,01/10/2024 00:00:00\n",
            "ParentID,Created On\n\
             1,01/03/2024 00:00:00\n\
             3,01/04/2024 00:00:00\n\
             4,01/12/2024 00:00:00\n",
        );

        assert_eq!(result.metrics.removed_unmatched_parent_ids, 1);
        assert_eq!(ids(&result.new_entries), vec!["4"]);
        assert_eq!(ids(&result.cleaned), vec!["1", "4"]);
    }

    #[test]
    fn test_unmatched_change_record_is_removed() {
        let result = run(
            "ParentID,Created On,Record Type\n\
             1,01/05/2024 10:00:00,Change\n\
             2,01/10/2024 00:00:00,Incident\n",
            "ParentID,Created On,Record Type\n\
             1,01/05/2024 10:00:00,change\n\
             2,01/06/2024 11:00:00,CHANGE\n\
             2,01/07/2024 00:00:00,Incident\n",
        );

        assert_eq!(result.metrics.removed_unmatched_parent_ids, 0);
        assert_eq!(result.metrics.removed_unmatched_change_rows, 1);
        assert_eq!(result.cleaned.row_count(), 2);
        let ts = result.cleaned.column_index("Created On").unwrap();
        assert!(result
            .cleaned
            .rows
            .iter()
            .all(|r| r.cell(ts).to_string_value() != "01/06/2024 11:00:00"));
    }

    #[test]
    fn test_change_records_after_cutoff_are_filtered_too() {
        let result = run(
            "ParentID,Created On,Record Type\n1,01/05/2024 00:00:00,Change\n",
            "ParentID,Created On,Record Type\n\
             7,01/08/2024 00:00:00,Change\n\
             8,01/09/2024 00:00:00,Task\n",
        );

        // Both rows are new entries, but the change row has no report counterpart
        assert_eq!(result.new_entries.row_count(), 2);
        assert_eq!(result.metrics.removed_unmatched_change_rows, 1);
        assert_eq!(ids(&result.cleaned), vec!["8"]);
    }

    #[test]
    fn test_status_change_detected() {
        let result = run(
            "ParentID,Created On,Status\n5,01/10/2024 00:00:00,Open\n6,01/09/2024 00:00:00,Open\n",
            "ParentID,Created On,Status\n5,01/02/2024 00:00:00,Closed\n6,01/03/2024 00:00:00,Open\n",
        );

        assert!(result.metrics.status_changes_detected >= 1);
        assert_eq!(ids(&result.status_changes), vec!["5"]);
    }

    #[test]
    fn test_status_changes_count_rows_not_ids() {
        let result = run(
            "ParentID,Created On,Status\n5,01/10/2024 00:00:00,Open\n",
            "ParentID,Created On,Status\n\
             5,01/02/2024 00:00:00,Closed\n\
             5,01/03/2024 00:00:00,Open\n",
        );

        // One flagged ParentID, two cleaned rows carry it
        assert_eq!(result.metrics.status_changes_detected, 2);
        assert_eq!(result.status_changes.row_count(), 2);
    }

    #[test]
    fn test_status_compared_as_strings() {
        let result = run(
            "ParentID,Created On,Status\n1.0,01/10/2024 00:00:00,3\n",
            "ParentID,Created On,Status\n1,01/02/2024 00:00:00,3\n",
        );
        assert_eq!(result.metrics.status_changes_detected, 0);
    }

    #[test]
    fn test_null_parent_id_survives_unmatched_filter() {
        let result = run(
            "ParentID,Created On\n1,01/10/2024 00:00:00\n",
            "ParentID,Created On\n,01/02/2024 00:00:00\n0,01/02/2024 00:00:00\n",
        );

        // Empty key is untouched; a literal 0 is a real, unmatched key
        assert_eq!(result.metrics.removed_unmatched_parent_ids, 1);
        assert_eq!(result.cleaned.row_count(), 1);
        assert_eq!(result.cleaned.rows[0].cells[0], CellValue::Empty);
    }

    #[test]
    fn test_optional_stages_skipped_without_columns() {
        let result = run(
            "ParentID,Created On,Status\n1,01/10/2024 00:00:00,Open\n",
            "ParentID,Created On,Record Type\n1,01/02/2024 00:00:00,Change\n",
        );

        assert_eq!(result.metrics, ReconcileMetrics::default());
        assert_eq!(result.cleaned.row_count(), 1);
        assert!(result.status_changes.is_empty());
    }

    #[test]
    fn test_row_at_cutoff_is_not_new() {
        let result = run(
            "ParentID,Created On\n1,01/10/2024 00:00:00\n",
            "ParentID,Created On\n1,01/10/2024 00:00:00\n2,01/10/2024 00:00:01\n",
        );

        assert_eq!(ids(&result.new_entries), vec!["2"]);
        assert_eq!(ids(&result.cleaned), vec!["1", "2"]);
    }

    #[test]
    fn test_empty_report_treats_all_rows_as_new() {
        let result = run(
            "ParentID,Created On\n",
            "ParentID,Created On\n1,01/02/2024 00:00:00\n2,01/03/2024 00:00:00\n",
        );

        assert_eq!(result.cutoff, None);
        assert_eq!(result.new_entries.row_count(), 2);
        assert_eq!(result.cleaned.row_count(), 2);
    }

    #[test]
    fn test_partition_covers_every_dump_row() {
        let dump = "ParentID,Created On,Record Type,Status\n\
                    1,01/01/2024 00:00:00,Incident,Open\n\
                    2,01/02/2024 00:00:00,Change,Open\n\
                    9,01/03/2024 00:00:00,Incident,Open\n\
                    ,01/04/2024 00:00:00,Change,New\n\
                    3,01/20/2024 00:00:00,Change,New\n\
                    4,01/21/2024 00:00:00,Task,New\n";
        let report = "ParentID,Created On,Record Type,Status\n\
                      1,01/01/2024 00:00:00,Incident,Closed\n\
                      2,01/02/2024 00:00:00,Change,Open\n\
                      3,01/10/2024 00:00:00,Task,Open\n";
        let result = run(report, dump);
        let m = result.metrics;

        assert_eq!(
            result.cleaned.row_count() + m.removed_unmatched_parent_ids + m.removed_unmatched_change_rows,
            6
        );

        let cutoff = result.cutoff.unwrap();
        let ts = result.cleaned.column_index("Created On").unwrap();
        for row in &result.new_entries.rows {
            assert!(row.cell(ts).as_datetime().unwrap() > cutoff);
        }

        // Pre-cutoff survivors with a key are all known to the report
        let report_ids = ["1", "2", "3"];
        for row in &result.cleaned.rows {
            if row.cell(ts).as_datetime().unwrap() <= cutoff {
                if let Some(id) = ParentId::from_cell(row.cell(0)) {
                    assert!(report_ids.contains(&id.as_str()));
                }
            }
        }

        // Status changes are a subset of cleaned
        for row in &result.status_changes.rows {
            assert!(result.cleaned.rows.contains(row));
        }
        assert_eq!(ids(&result.status_changes), vec!["1"]);
    }

    #[test]
    fn test_missing_parent_id_fails_without_output() {
        let report = parse_csv_str("ParentID,Created On\n1,01/10/2024 00:00:00\n", "r.csv").unwrap();
        let dump = parse_csv_str("Id,Created On\n1,01/10/2024 00:00:00\n", "d.csv").unwrap();

        let err = reconcile(&report, &dump, &ReconConfig::default()).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { .. }));
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let report = parse_csv_str("ParentID,Created On\n1,01/10/2024 00:00:00\n", "r.csv").unwrap();
        let dump = parse_csv_str("ParentID,Created On\n3,01/02/2024 00:00:00\n", "d.csv").unwrap();
        let before = dump.clone();

        let result = reconcile(&report, &dump, &ReconConfig::default()).unwrap();

        assert!(result.cleaned.is_empty());
        assert_eq!(dump.rows, before.rows);
    }
}
