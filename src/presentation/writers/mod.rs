use crate::domain::{ports::OutputWriter, report::RunReport};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use self::{json::JsonWriter, sql::SqlWriter};

pub mod json;
pub mod sql;

/// Register available writers - add new ones without touching main.rs
pub fn all_writers() -> Vec<Box<dyn OutputWriter>> {
    vec![Box::new(SqlWriter), Box::new(JsonWriter::default())]
}

pub fn writer_for(format: &str) -> Option<Box<dyn OutputWriter>> {
    match format {
        "sql" => Some(Box::new(SqlWriter)),
        "json" => Some(Box::new(JsonWriter::default())),
        _ => None,
    }
}

/// Writes the report to `<dir>/<run_id>.<ext>` via the chosen writer and
/// returns the path.
pub fn write_to_file(writer: &dyn OutputWriter, report: &RunReport, dir: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir))?;

    let content = writer.format(report)?;
    let path = PathBuf::from(dir).join(format!("{}.{}", report.run_id, writer.extension()));
    fs::write(&path, &content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
