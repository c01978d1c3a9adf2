//! snaprecon CLI
//!
//! Command-line tool for reconciling a dump export against the report it
//! supersedes, and for bringing a report up to date from a dump.

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use snaprecon_core::{
    apply_status_and_append, export_reconciliation, load_table, reconcile, write_table,
    ExportFormat, FileKind, HistoryEntry, ParentId, ReconConfig, Role, Snapshot, Table, UpdateHistory,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "snaprecon")]
#[command(about = "Reconcile report and dump spreadsheet snapshots", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (column names, formats, sheet names)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean a dump against a report and export cleaned rows and updates
    Reconcile {
        /// Report export (CSV or workbook)
        #[arg(short, long)]
        report: PathBuf,

        /// Dump export (CSV or workbook)
        #[arg(short, long)]
        dump: PathBuf,

        /// Directory for the output files
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Output format (xlsx, csv or json)
        #[arg(long, default_value = "xlsx")]
        format: ExportFormat,

        /// Print a JSON summary instead of the text report
        #[arg(long)]
        json: bool,

        /// Maximum number of status change rows to preview
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Refresh report statuses from a dump and append its new rows
    Update {
        /// Report export to update (overwritten unless --output is given)
        #[arg(short, long)]
        report: PathBuf,

        /// Dump export (CSV or workbook)
        #[arg(short, long)]
        dump: PathBuf,

        /// Write the merged report here instead of over the report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Update ledger (defaults to .snaprecon-history.json next to the report)
        #[arg(long)]
        history: Option<PathBuf>,

        /// Run even if the ledger shows the report was not saved back last time
        #[arg(long)]
        force: bool,
    },

    /// Parse and display a single report or dump file
    Inspect {
        /// Path to a CSV or workbook
        #[arg(short, long)]
        file: PathBuf,

        /// Worksheet to read (first sheet when omitted)
        #[arg(short, long)]
        sheet: Option<String>,

        /// Maximum number of rows to display
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Write the default configuration as a TOML template
    InitConfig {
        /// Output path for the config file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List recorded report updates
    History {
        /// Update ledger to read
        #[arg(long, default_value = ".snaprecon-history.json")]
        history: PathBuf,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> snaprecon_core::Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .init();

    let config = ReconConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Reconcile {
            report,
            dump,
            out_dir,
            format,
            json,
            limit,
        } => cmd_reconcile(&config, &report, &dump, &out_dir, format, json, limit),
        Commands::Update {
            report,
            dump,
            output,
            history,
            force,
        } => cmd_update(&config, &report, &dump, output, history, force),
        Commands::Inspect { file, sheet, limit } => cmd_inspect(&config, &file, sheet.as_deref(), limit),
        Commands::InitConfig { output } => cmd_init_config(&output),
        Commands::History { history } => cmd_history(&history),
    }
}

fn load_inputs(config: &ReconConfig, report: &Path, dump: &Path) -> snaprecon_core::Result<(Table, Table)> {
    let report = load_table(report, Some(&config.input.report_sheet))?;
    let dump = load_table(dump, config.input.dump_sheet.as_deref())?;
    Ok((report, dump))
}

fn cmd_reconcile(
    config: &ReconConfig,
    report_path: &Path,
    dump_path: &Path,
    out_dir: &Path,
    format: ExportFormat,
    json: bool,
    limit: usize,
) -> snaprecon_core::Result<()> {
    let (report, dump) = load_inputs(config, report_path, dump_path)?;
    let result = reconcile(&report, &dump, config)?;

    // Outputs are only written once the whole reconciliation succeeded
    let written = export_reconciliation(&result, out_dir, format, &config.output)?;

    if json {
        let summary = serde_json::json!({
            "report": report_path,
            "dump": dump_path,
            "cutoff": result.cutoff,
            "metrics": result.metrics,
            "cleaned_rows": result.cleaned.row_count(),
            "new_entries": result.new_entries.row_count(),
            "files": written,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let m = &result.metrics;
    println!("Report cutoff: {}", format_cutoff(result.cutoff));
    println!();
    println!("Removed unmatched ParentIDs:      {}", m.removed_unmatched_parent_ids);
    println!("Removed unmatched 'change' rows:  {}", m.removed_unmatched_change_rows);
    println!("Status changes detected:          {}", m.status_changes_detected);
    println!("New entries after report ends:    {}", result.new_entries.row_count());
    println!("Cleaned dump rows:                {}", result.cleaned.row_count());

    if !result.status_changes.is_empty() {
        println!();
        println!("Rows with status changes:");
        print_table(&result.status_changes, &config.columns.parent_id, limit);
    }

    println!();
    println!("Wrote {} file(s):", written.len());
    for path in &written {
        println!("  {}", path.display());
    }

    Ok(())
}

fn cmd_update(
    config: &ReconConfig,
    report_path: &Path,
    dump_path: &Path,
    output: Option<PathBuf>,
    history_path: Option<PathBuf>,
    force: bool,
) -> snaprecon_core::Result<()> {
    let output = output.unwrap_or_else(|| report_path.to_path_buf());
    // Reject outputs we cannot write before loading or merging anything
    FileKind::for_output(&output)?;
    let history_path = history_path.unwrap_or_else(|| {
        report_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".snaprecon-history.json")
    });

    let (report, dump) = load_inputs(config, report_path, dump_path)?;
    let current_cutoff = Snapshot::from_table(&report, Role::Report, config)?.cutoff();

    let mut history = UpdateHistory::load(&history_path)?;
    if let Some(hazard) = history.check_reappend_hazard(report_path, &output, current_cutoff) {
        if !force {
            return Err(snaprecon_core::Error::ReappendHazard(format!(
                "{} (use --force to append anyway)",
                hazard
            )));
        }
        tracing::warn!("{}", hazard);
    }

    let update = apply_status_and_append(&report, &dump, config)?;
    write_table(&output, &update.table, &config.input.report_sheet, &config.output)?;

    history.record(HistoryEntry {
        timestamp: chrono::Utc::now(),
        report: report_path.to_path_buf(),
        dump: dump_path.to_path_buf(),
        output: output.clone(),
        cutoff_before: update.cutoff,
        cutoff_after: update.new_cutoff(config),
        statuses_updated: update.statuses_updated,
        rows_appended: update.rows_appended,
    });
    history.save(&history_path)?;

    println!("Report updated: {}", output.display());
    println!("  {} status value(s) refreshed", update.statuses_updated);
    println!("  {} new row(s) added", update.rows_appended);

    Ok(())
}

fn cmd_inspect(config: &ReconConfig, file: &Path, sheet: Option<&str>, limit: usize) -> snaprecon_core::Result<()> {
    let table = load_table(file, sheet)?;

    println!("File: {}", file.display());
    println!("Columns: {}", table.column_count());
    println!("Rows: {}", table.row_count());
    println!();

    print_table(&table, &config.columns.parent_id, limit);

    Ok(())
}

fn cmd_init_config(output: &Path) -> snaprecon_core::Result<()> {
    ReconConfig::default().save(output)?;
    println!("Created config file: {}", output.display());
    println!();
    println!("Edit the column names to match your exports, then run:");
    println!("  snaprecon --config {} reconcile --report <file> --dump <file>", output.display());

    Ok(())
}

fn cmd_history(history_path: &Path) -> snaprecon_core::Result<()> {
    let history = UpdateHistory::load(history_path)?;
    if history.total_entries() == 0 {
        println!("No updates recorded in {}", history_path.display());
        return Ok(());
    }

    println!("Updates ({}):", history.total_entries());
    for entry in history.all() {
        println!(
            "  {}  {} <- {}  (+{} rows, {} statuses, cutoff {} -> {})",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.output.display(),
            entry.dump.display(),
            entry.rows_appended,
            entry.statuses_updated,
            format_cutoff(entry.cutoff_before),
            format_cutoff(entry.cutoff_after),
        );
    }

    Ok(())
}

fn format_cutoff(cutoff: Option<NaiveDateTime>) -> String {
    match cutoff {
        Some(c) => c.format(snaprecon_core::table::TIMESTAMP_FORMAT).to_string(),
        None => "none (empty report)".to_string(),
    }
}

/// Print a tab-separated preview, ParentID shown in canonical form
fn print_table(table: &Table, parent_id_column: &str, limit: usize) {
    let parent_col = table.column_index(parent_id_column);

    let header: Vec<&str> = table.column_names();
    println!("{}", header.join("\t"));
    println!("{}", "-".repeat(header.len() * 12));

    for row in table.rows.iter().take(limit) {
        let values: Vec<String> = (0..table.column_count())
            .map(|i| {
                if Some(i) == parent_col {
                    let id = ParentId::from_cell(row.cell(i));
                    ParentId::display_or_zero(id.as_ref()).to_string()
                } else {
                    row.cell(i).to_string_value()
                }
            })
            .collect();
        println!("{}", values.join("\t"));
    }

    if table.row_count() > limit {
        println!("... ({} more rows)", table.row_count() - limit);
    }
}
