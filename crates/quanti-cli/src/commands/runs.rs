//! `quanti runs`: list and inspect recorded runs.

use std::path::{Path, PathBuf};

use quanti_core::monitor::SUMMARY_FILE;
use quanti_core::summary::read_document;
use serde_json::{Map, Value};

use super::{format_duration_s, truncate};

type Document = Map<String, Value>;

/// Run the runs command.
pub fn run(run_path: Option<&str>, dir: &str) {
    match run_path {
        Some(path) => {
            let run_dir = PathBuf::from(path);
            let Some(doc) = load(&run_dir) else {
                eprintln!("Not a run directory: {path}");
                eprintln!("Expected {SUMMARY_FILE} in that directory.");
                std::process::exit(1);
            };
            show_run(&run_dir, &doc);
        }
        None => list_runs(dir),
    }
}

fn load(run_dir: &Path) -> Option<Document> {
    read_document(&run_dir.join(SUMMARY_FILE)).ok()
}

/// Run directories under `dir` that hold a readable summary, newest first.
fn collect_runs(dir: &Path) -> Vec<(PathBuf, Document)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut runs: Vec<(PathBuf, Document)> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| load(&p).map(|doc| (p, doc)))
        .collect();
    runs.sort_by(|a, b| text(&b.1, "started_at").cmp(&text(&a.1, "started_at")));
    runs
}

fn list_runs(dir: &str) {
    let runs_dir = PathBuf::from(dir);
    if !runs_dir.exists() {
        println!("No runs directory found at {dir}");
        println!("Record a run first: quanti bench --workload <csv> or quanti monitor");
        return;
    }

    let runs = collect_runs(&runs_dir);
    if runs.is_empty() {
        println!("No runs found in {dir}/");
        return;
    }

    println!(
        "{:<45} {:<16} {:>8} {:>9} {:>10} {:>11}",
        "Run", "Model", "Samples", "Duration", "Avg W", "Energy Wh"
    );
    println!("{}", "-".repeat(104));
    for (path, doc) in &runs {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let status = match doc.get("status").and_then(Value::as_str) {
            Some("completed") | None => String::new(),
            Some(other) => format!(" [{other}]"),
        };
        println!(
            "{:<45} {:<16} {:>8} {:>9} {:>10.2} {:>11.4}{}",
            truncate(&name, 45),
            truncate(&text(doc, "llm"), 16),
            number(doc, "samples") as u64,
            format_duration_s(number(doc, "duration_s")),
            number(doc, "avg_power_W"),
            number(doc, "energy_Wh"),
            status,
        );
    }
    println!("\n{} run(s) in {dir}/", runs.len());
}

fn show_run(run_dir: &Path, doc: &Document) {
    println!("Run: {}", run_dir.display());
    for key in [
        "run_name",
        "started_at",
        "ended_at",
        "interval_ms",
        "duration_s",
        "samples",
        "avg_power_W",
        "max_power_W",
        "avg_util_pct",
        "max_util_pct",
        "avg_mem_MiB",
        "max_mem_MiB",
        "energy_Wh",
        "trace_csv_path",
    ] {
        if let Some(value) = doc.get(key) {
            println!("  {key:<18} {}", render(value));
        }
    }

    let mut extra: Vec<(&String, &Value)> = doc
        .iter()
        .filter(|(k, _)| !is_computed(k))
        .collect();
    if !extra.is_empty() {
        extra.sort_by(|a, b| a.0.cmp(b.0));
        println!("\n  Metadata:");
        for (key, value) in extra {
            println!("    {key:<20} {}", render(value));
        }
    }
}

fn is_computed(key: &str) -> bool {
    matches!(
        key,
        "run_name"
            | "started_at"
            | "ended_at"
            | "interval_ms"
            | "duration_s"
            | "samples"
            | "avg_power_W"
            | "max_power_W"
            | "avg_util_pct"
            | "max_util_pct"
            | "avg_mem_MiB"
            | "max_mem_MiB"
            | "energy_Wh"
            | "trace_csv_path"
    )
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.4}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn text(doc: &Document, key: &str) -> String {
    doc.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn number(doc: &Document, key: &str) -> f64 {
    doc.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_run(dir: &Path, name: &str, started_at: &str) {
        let run_dir = dir.join(name);
        std::fs::create_dir_all(&run_dir).unwrap();
        let doc = json!({
            "run_name": name,
            "started_at": started_at,
            "samples": 4,
            "energy_Wh": 0.0639,
        });
        std::fs::write(run_dir.join(SUMMARY_FILE), doc.to_string()).unwrap();
    }

    #[test]
    fn runs_are_listed_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        write_run(tmp.path(), "old", "2025-01-01T00:00:00Z");
        write_run(tmp.path(), "new", "2025-06-01T00:00:00Z");
        std::fs::create_dir_all(tmp.path().join("not-a-run")).unwrap();

        let runs = collect_runs(tmp.path());
        let names: Vec<_> = runs.iter().map(|(_, d)| text(d, "run_name")).collect();
        assert_eq!(names, ["new", "old"]);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        assert!(collect_runs(Path::new("/nonexistent/runs")).is_empty());
    }

    #[test]
    fn render_values() {
        assert_eq!(render(&json!("x")), "x");
        assert_eq!(render(&json!(3)), "3");
        assert_eq!(render(&json!(0.06388888)), "0.0639");
        assert!(is_computed("energy_Wh"));
        assert!(!is_computed("llm"));
    }
}
