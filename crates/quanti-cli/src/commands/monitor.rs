//! `quanti monitor`: record GPU telemetry without a workload.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use quanti_core::{EnergyMonitor, Metadata, MonitorConfig};
use serde_json::Value;

use super::{Target, fail, interrupt_flag, parse_duration};

/// Run the monitor command.
pub fn run(
    duration: Option<&str>,
    output: &str,
    run_name: Option<&str>,
    interval_ms: u64,
    tags: &[String],
    target: Target,
) {
    let max_duration = duration.map(|d| {
        parse_duration(d).unwrap_or_else(|| {
            eprintln!("Invalid duration: {d}");
            std::process::exit(1);
        })
    });

    let mut metadata = Metadata::new();
    for tag in tags {
        if let Some((k, v)) = tag.split_once(':') {
            metadata.insert(k.to_string(), Value::from(v));
        } else {
            eprintln!("Warning: ignoring malformed tag '{tag}' (expected key:value)");
        }
    }

    let monitor = EnergyMonitor::new(MonitorConfig {
        interval_ms,
        output_dir: PathBuf::from(output),
        run_name: run_name.map(str::to_string),
        source: target.telemetry_source(),
        ..Default::default()
    });

    let interrupted = interrupt_flag();

    println!("Monitoring {}", monitor.run_name());
    match max_duration {
        Some(d) => println!("  Duration:  {}s", d.as_secs()),
        None => println!("  Duration:  until Ctrl+C"),
    }
    println!("  Interval:  {interval_ms}ms");
    println!("  Output:    {}", monitor.run_dir().display());
    println!();

    if let Err(e) = monitor.start() {
        fail("starting energy monitor", e);
    }

    let start = Instant::now();
    let mut last_report = Instant::now();
    while !interrupted.load(Ordering::SeqCst) {
        if max_duration.is_some_and(|max| start.elapsed() >= max) {
            break;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = monitor.snapshot();
            eprint!(
                "\r  {:>6.1}s  {:>6} samples  avg {:>7.2} W  max {:>7.2} W",
                start.elapsed().as_secs_f64(),
                stats.count,
                stats.avg_power(),
                stats.max_power
            );
            last_report = Instant::now();
        }
        thread::sleep(Duration::from_millis(50));
    }
    eprintln!();

    let summary = monitor
        .stop(metadata)
        .unwrap_or_else(|e| fail("stopping energy monitor", e));
    let path = monitor
        .persist_summary(&summary)
        .unwrap_or_else(|e| fail("writing summary", e));

    println!("Run {}", summary.run_name);
    println!("  Duration:     {:.2} s", summary.duration_s);
    println!("  Samples:      {}", summary.samples);
    println!("  Avg power:    {:.2} W", summary.avg_power_w);
    println!("  Max power:    {:.2} W", summary.max_power_w);
    println!("  Energy:       {:.4} Wh", summary.energy_wh);
    println!("  Avg GPU util: {:.1} %", summary.avg_util_pct);
    println!("  Avg GPU mem:  {:.0} MiB", summary.avg_mem_mib);
    println!();
    println!("  Trace:   {}", summary.trace_csv_path.display());
    println!("  Summary: {}", path.display());
}
