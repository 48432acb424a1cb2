//! Result export tests
//!
//! Runs a small batch end to end and checks the written JSON and CSV files.

use std::sync::Arc;
use std::time::Duration;

use batchq::batch::{BatchController, ExportFormat, CSV_HEADER};
use batchq::bridge::ExecutionContext;
use batchq::ops::OperationRegistry;
use batchq::pool::PoolConfig;
use batchq::task::{OperationCall, TaskSpec};
use batchq::BatchError;
use serde_json::Value;

async fn finished_controller() -> BatchController {
    let bridge = Arc::new(ExecutionContext::new().expect("bridge should start"));
    let mut registry = OperationRegistry::with_builtins();
    registry.register_fn("broken", |_params, _cancel| async {
        Err(BatchError::Operation("broken on purpose".into()))
    });
    registry.register_fn("quick", |_params, _cancel| async { Ok(Value::from("ok")) });
    let controller = BatchController::new(bridge, Arc::new(registry));

    for i in 0..3 {
        controller.add(TaskSpec::new(format!("ok-{i}"), OperationCall::new("quick")));
    }
    controller.add(TaskSpec::new("bad", OperationCall::new("broken")).with_max_retries(0));

    controller
        .start(PoolConfig::new(2).with_poll_interval(Duration::from_millis(10)))
        .unwrap();
    controller.join().await;
    controller
}

#[tokio::test]
async fn json_export_round_trips() {
    let controller = finished_controller().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");

    let written = controller.export(ExportFormat::Json, &path).unwrap();
    assert_eq!(written, 4);

    let document: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let metadata = &document["metadata"];
    assert_eq!(metadata["totalTasks"], Value::from(4));
    assert_eq!(metadata["completed"], Value::from(3));
    assert_eq!(metadata["failed"], Value::from(1));
    assert!(metadata["exportedAt"].as_str().unwrap().contains('T'));

    let tasks = document["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), controller.results(None).len());
    let failed = tasks
        .iter()
        .find(|t| t["status"] == Value::from("FAILED"))
        .unwrap();
    assert_eq!(failed["name"], Value::from("bad"));
    assert_eq!(failed["error"], Value::from("broken on purpose"));
    assert!(failed.get("result").is_none(), "unset fields are omitted");
}

#[tokio::test]
async fn csv_export_has_header_and_one_row_per_task() {
    let controller = finished_controller().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.csv");

    let written = controller.export(ExportFormat::Csv, &path).unwrap();
    assert_eq!(written, 4);

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.trim_end().lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 1 + 4);
    for row in &lines[1..] {
        // Unquoted columns only in this dataset, so a plain split is exact.
        assert_eq!(row.split(',').count(), CSV_HEADER.split(',').count());
    }
}

#[tokio::test]
async fn export_format_parses_from_user_input() {
    let controller = finished_controller().await;
    let dir = tempfile::tempdir().unwrap();

    let format: ExportFormat = "CSV".parse().unwrap();
    controller.export(format, dir.path().join("out.csv")).unwrap();
    assert!("xml".parse::<ExportFormat>().is_err());
}
