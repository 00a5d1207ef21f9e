//! Integration tests for quanti-core.
//!
//! These tests drive the full pipeline with a scripted telemetry source and a
//! stub completion server:
//! workload file → environment readiness → monitored workload → summaries.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

mod common;

use common::spawn_stub_server;
use quanti_core::summary::read_document;
use quanti_core::{
    Benchmark, BenchmarkConfig, CommandSpec, CompletionSettings, EnergyMonitor, Error,
    ExternalServer, InferenceClient, Metadata, MonitorConfig, TelemetrySource,
    completion_report,
};

const SAMPLER: &str = "while true; do echo '2025/01/01 00:00:00.000, 115.0, 60, 2000, 8000'; \
                       echo 'garbage'; sleep 0.02; done";

fn stub_vllm() -> Router {
    Router::new()
        .route("/health", get(|| async { "" }))
        .route(
            "/v1/completions",
            post(|Json(body): Json<Value>| async move {
                let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                if prompt == "explode" {
                    return Err((StatusCode::INTERNAL_SERVER_ERROR, "out of memory"));
                }
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(Json(json!({ "choices": [{ "text": format!(" {} tokens", prompt.len()) }] })))
            }),
        )
}

fn monitor_config(dir: &Path, run_name: &str) -> MonitorConfig {
    MonitorConfig {
        interval_ms: 20,
        output_dir: dir.join("runs"),
        run_name: Some(run_name.to_string()),
        source: TelemetrySource::Command(CommandSpec::shell(SAMPLER)),
        terminate_timeout: Duration::from_millis(500),
        capture_timeout: Duration::from_secs(5),
    }
}

#[test]
fn benchmark_against_stub_server() {
    let tmp = tempfile::tempdir().unwrap();
    let workload = tmp.path().join("prompts.csv");
    fs::write(&workload, "id,text\n1,hello\n2,explode\n3,\"how, are you\"\n").unwrap();

    let bench = Benchmark::new(BenchmarkConfig {
        llm: "Llama-3-8B-AWQ".to_string(),
        workload: workload.clone(),
        monitor: monitor_config(tmp.path(), "e2e"),
    })
    .unwrap();

    let base = spawn_stub_server(stub_vllm());
    let settings = CompletionSettings::new(bench.model_repo());
    let client = InferenceClient::new(&base, settings.clone(), Duration::from_secs(5)).unwrap();
    let health = InferenceClient::new(&base, settings, Duration::from_secs(5)).unwrap();
    let mut env = ExternalServer::new(health, Duration::from_secs(5), Duration::from_millis(50));

    let outcome = bench.run(&mut env, &client).unwrap();

    // Every persisted trace row is a valid sample; garbage lines are dropped.
    let trace = fs::read_to_string(&outcome.summary.trace_csv_path).unwrap();
    let rows = trace.lines().count() as u64 - 1;
    assert_eq!(rows, outcome.summary.samples);
    assert!(rows > 0);
    assert!(!trace.contains("garbage"));

    assert!((outcome.summary.avg_power_w - 115.0).abs() < 1e-9);
    assert_eq!(outcome.summary.max_power_w, 115.0);
    let expected_wh = 115.0 * outcome.summary.duration_s / 3600.0;
    assert!((outcome.summary.energy_wh - expected_wh).abs() < 1e-12);

    assert_eq!(outcome.workload.n_prompts, 3);
    assert_eq!(outcome.workload.n_failed, 1);

    let mut reader = csv::Reader::from_path(&outcome.workload.results_file).unwrap();
    let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), 3);
    let indices: Vec<&str> = records.iter().map(|r| &r[0]).collect();
    assert_eq!(indices, ["1", "2", "3"]);
    assert_eq!(&records[0][2], "5 tokens");
    assert_eq!(&records[1][1], "explode");
    assert!(records[1][2].starts_with("__ERROR__: "));
    assert_eq!(&records[2][1], "how, are you");

    let doc = read_document(&outcome.energy_summary_path).unwrap();
    assert_eq!(doc["llm"], "Llama-3-8B-AWQ");
    assert_eq!(doc["llm_repo"], "hugging-quants/Meta-Llama-3.1-8B-Instruct-AWQ-INT4");
    assert_eq!(doc["workload_size"], fs::metadata(&workload).unwrap().len());
    assert_eq!(doc["samples"], outcome.summary.samples);

    let report = completion_report(&outcome);
    assert!(report.contains("Energy:"));
    assert!(report.contains("query_responses.csv"));
}

#[test]
fn unreachable_server_fails_setup() {
    let tmp = tempfile::tempdir().unwrap();
    let workload = tmp.path().join("prompts.csv");
    fs::write(&workload, "text\nhello\n").unwrap();

    let bench = Benchmark::new(BenchmarkConfig {
        llm: "Mistral-8B".to_string(),
        workload,
        monitor: monitor_config(tmp.path(), "unreachable"),
    })
    .unwrap();

    let settings = CompletionSettings::new(bench.model_repo());
    let unreachable = "http://127.0.0.1:9";
    let client = InferenceClient::new(unreachable, settings.clone(), Duration::from_secs(1)).unwrap();
    let health = InferenceClient::new(unreachable, settings, Duration::from_secs(1)).unwrap();
    let mut env = ExternalServer::new(health, Duration::from_millis(300), Duration::from_millis(50));

    let err = bench.run(&mut env, &client).err().unwrap();
    assert!(matches!(err, Error::ReadinessTimeout(_)), "{err}");
    assert!(!bench.monitor().trace_path().exists());
}

#[test]
fn standalone_monitor_records_and_persists() {
    let tmp = tempfile::tempdir().unwrap();
    let monitor = EnergyMonitor::new(monitor_config(tmp.path(), "solo"));
    monitor.start().unwrap();
    let pid = monitor.sampler_pid().unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let mut metadata = Metadata::new();
    metadata.insert("note".into(), Value::from("idle baseline"));
    let summary = monitor.stop(metadata).unwrap();
    assert!(!quanti_core::process::process_alive(pid));
    assert!(!monitor.summary_path().exists());

    let path = monitor.persist_summary(&summary).unwrap();
    let doc = read_document(&path).unwrap();
    assert_eq!(doc["note"], "idle baseline");
    assert_eq!(doc["run_name"], "solo");
    assert!(doc["samples"].as_u64().unwrap() > 0);
}
