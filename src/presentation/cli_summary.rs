use crate::application::monitoring::PerfReport;
use crate::domain::report::{CheckState, RunReport, TableReport, TableStatus};
use colored::*;
use tabled::settings::{object::Columns, Alignment, Modify, Style};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct TableRow {
    table: String,
    status: String,
    updates: String,
    inserts: String,
    deletes: String,
    #[tabled(rename = "time (ms)")]
    duration_ms: String,
}

#[derive(Tabled)]
struct ObjectRow {
    object: String,
    #[tabled(rename = "Defn Diff")]
    definition: String,
    #[tabled(rename = "Row Count")]
    row_count: String,
    #[tabled(rename = "Data Check")]
    data: String,
}

#[derive(Tabled)]
struct SummaryRow {
    metric: String,
    value: String,
}

fn paint(state: CheckState) -> String {
    match state {
        CheckState::Pass => state.to_string().green().to_string(),
        CheckState::Fail => state.to_string().red().bold().to_string(),
        CheckState::Skip => state.to_string().yellow().to_string(),
        CheckState::NotRun => state.to_string().dimmed().to_string(),
    }
}

fn status_cell(t: &TableReport) -> String {
    match &t.status {
        TableStatus::Identical => "identical".green().to_string(),
        TableStatus::Differs => "differs".yellow().to_string(),
        TableStatus::Unverified => format!("unverified ({} spans)", t.unverified_spans.len())
            .red()
            .to_string(),
        TableStatus::Skipped { reason } => format!("skipped: {}", reason).dimmed().to_string(),
        TableStatus::Failed { error } => format!("failed: {}", error).red().to_string(),
    }
}

pub fn print_summary(report: &RunReport) {
    println!();

    println!("{}", "DRIFTCHECK SUMMARY".bold().cyan());
    println!(
        "{} → {}",
        report.source_schema.blue(),
        report.target_schema.green()
    );
    println!("Run: {}", report.run_id.bright_yellow());
    println!();

    if report.schema.is_identical() {
        println!("{}", "No drift detected.".italic());
        return;
    }

    let rows: Vec<TableRow> = report
        .schema
        .tables
        .iter()
        .filter(|t| !t.is_identical())
        .map(|t| {
            let (u, i, d) = t.counts();
            TableRow {
                table: t.table.bold().to_string(),
                status: status_cell(t),
                updates: u.to_string().yellow().to_string(),
                inserts: i.to_string().green().to_string(),
                deletes: d.to_string().red().to_string(),
                duration_ms: t.duration_ms.to_string(),
            }
        })
        .collect();

    if !rows.is_empty() {
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(2..=5)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    let s = &report.summary;
    let summary_rows = vec![
        SummaryRow {
            metric: "Tables compared".into(),
            value: s.tables_compared.to_string(),
        },
        SummaryRow {
            metric: "Tables identical".into(),
            value: s.tables_identical.to_string().green().to_string(),
        },
        SummaryRow {
            metric: "Tables failed".into(),
            value: s.tables_failed.to_string().red().to_string(),
        },
        SummaryRow {
            metric: "Structural differences".into(),
            value: s.structure_diffs.to_string().yellow().to_string(),
        },
        SummaryRow {
            metric: "Total changes".into(),
            value: s.total_changes.to_string().bold().to_string(),
        },
    ];

    let summary_table = Table::new(summary_rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..=1)).with(Alignment::right()))
        .to_string();

    println!();
    println!("{summary_table}");
    println!();
}

/// Print the per-object status grid. Returns `true` if any check failed.
pub fn print_object_grid(report: &RunReport) -> bool {
    let objects = &report.schema.objects;
    if objects.is_empty() {
        return false;
    }

    println!("{}", "OBJECTS".bold().cyan());

    let rows: Vec<ObjectRow> = objects
        .iter()
        .map(|o| ObjectRow {
            object: o.object.to_string(),
            definition: paint(o.definition),
            row_count: paint(o.row_count),
            data: paint(o.data),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..=3)).with(Alignment::center()))
        .to_string();
    println!("{table}");
    println!();

    objects.iter().any(|o| o.has_failure())
}

// ─── Performance summary ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct PerfRow {
    operation: String,
    side: String,
    table: String,
    #[tabled(rename = "rows")]
    rows: String,
    #[tabled(rename = "time (ms)")]
    duration_ms: String,
}

/// Print a performance timing table to stdout.
pub fn print_perf_summary(report: &PerfReport) {
    if report.timings.is_empty() {
        return;
    }

    println!("{}", "PERFORMANCE".bold().cyan());

    let rows: Vec<PerfRow> = report
        .timings
        .iter()
        .map(|t| PerfRow {
            operation: t.operation.dimmed().to_string(),
            side: t.side.map(|s| s.to_string()).unwrap_or_default(),
            table: t.table.bold().to_string(),
            rows: t.rows.to_string(),
            duration_ms: format_duration(t.duration_ms),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..=4)).with(Alignment::right()))
        .to_string();

    println!("{table}");

    println!(
        "  Total: {} row(s) fetched  ·  {} ms across tables",
        report.total_rows_fetched.to_string().bold(),
        format_duration(report.total_ms),
    );
    println!();
}

fn format_duration(ms: u128) -> String {
    if ms >= 1_000 {
        format!("{:.1}s", ms as f64 / 1_000.0).yellow().to_string()
    } else if ms >= 100 {
        ms.to_string().yellow().to_string()
    } else {
        ms.to_string().green().to_string()
    }
}
