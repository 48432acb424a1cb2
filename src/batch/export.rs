//! Result export
//!
//! Serializes a task snapshot to a file. JSON produces a
//! `{ "metadata": {...}, "tasks": [...] }` document; CSV produces one row per task
//! under a fixed header, with RFC 3339 timestamps and empty strings for unset fields.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use crate::batch::BatchStats;
use crate::task::TaskRecord;
use crate::{BatchError, Result};

/// Supported export file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Metadata + tasks JSON document
    Json,
    /// One row per task under [`CSV_HEADER`]
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Csv => f.write_str("csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(BatchError::Operation(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

/// Column header of the CSV export
pub const CSV_HEADER: &str = "TaskID,Name,Function,Status,Priority,CreatedAt,StartedAt,\
CompletedAt,ExecutionTime,WaitTime,RetryCount,Result,Error";

/// Write `tasks` to `path` in the given format; returns the number of tasks written
pub fn write_export(
    tasks: &[TaskRecord],
    format: ExportFormat,
    path: impl AsRef<Path>,
) -> Result<usize> {
    let path = path.as_ref();
    let mut file = File::create(path)?;
    match format {
        ExportFormat::Json => {
            let document = json_document(tasks)?;
            serde_json::to_writer_pretty(&mut file, &document)?;
        }
        ExportFormat::Csv => {
            file.write_all(csv_document(tasks).as_bytes())?;
        }
    }
    info!(
        format = %format,
        path = %path.display(),
        tasks = tasks.len(),
        "results exported"
    );
    Ok(tasks.len())
}

fn json_document(tasks: &[TaskRecord]) -> Result<serde_json::Value> {
    let stats = BatchStats::from_tasks(tasks);
    Ok(json!({
        "metadata": {
            "exportedAt": Utc::now().to_rfc3339(),
            "totalTasks": stats.total_tasks,
            "completed": stats.completed,
            "failed": stats.failed,
            "avgTaskTimeSeconds": stats.average_task_time,
        },
        "tasks": serde_json::to_value(tasks)?,
    }))
}

fn csv_document(tasks: &[TaskRecord]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for task in tasks {
        let fields = [
            task.id.to_string(),
            task.name.clone(),
            task.operation.function.clone(),
            task.status.to_string(),
            task.priority.to_string(),
            rfc3339(Some(task.created_at)),
            rfc3339(task.started_at),
            rfc3339(task.completed_at),
            task.execution_time()
                .map(|t| format!("{t:.2}"))
                .unwrap_or_default(),
            format!("{:.2}", task.wait_time()),
            task.retry_count.to_string(),
            task.result.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            task.error.clone().unwrap_or_default(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn rfc3339(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
