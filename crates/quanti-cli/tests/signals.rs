//! Signal handling of the `quanti` binary.

#![cfg(unix)]

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for_pid_file(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(pid) = contents.trim().parse() {
                return pid;
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("sampler never wrote {}", path.display());
}

fn wait_for_exit(child: &mut Child) -> std::process::ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        thread::sleep(Duration::from_millis(20));
    }
    let _ = child.kill();
    panic!("quanti did not exit after the signal");
}

fn pid_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn signal(pid: u32, name: &str) {
    let status = Command::new("kill")
        .args([format!("-{name}"), pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

fn run_monitor_and_signal(sig: &str) {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("runs");
    let pid_file = tmp.path().join("sampler.pid");
    let script = format!(
        "echo $$ > '{}'; echo 't,100.0,50,1000,8000'; exec sleep 77",
        pid_file.display()
    );

    let mut quanti = Command::new(env!("CARGO_BIN_EXE_quanti"))
        .args(["monitor", "--local", "--run-name", "sig", "--interval-ms", "100"])
        .arg("--output")
        .arg(&out)
        .arg("--sampler-cmd")
        .arg(&script)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let sampler = wait_for_pid_file(&pid_file);
    assert!(pid_alive(sampler));

    signal(quanti.id(), sig);
    let status = wait_for_exit(&mut quanti);

    assert!(status.success(), "quanti exited with {status}");
    assert!(!pid_alive(sampler), "sampler {sampler} survived {sig}");
    assert!(out.join("sig").join("energy_summary.json").exists());
}

#[test]
fn sigterm_stops_sampler_and_writes_summary() {
    run_monitor_and_signal("TERM");
}

#[test]
fn sighup_stops_sampler_and_writes_summary() {
    run_monitor_and_signal("HUP");
}

#[test]
fn sigint_stops_sampler_and_writes_summary() {
    run_monitor_and_signal("INT");
}
