//! Child processes owned as scoped resources.
//!
//! Every child is started in its own process group so that terminating it
//! also reaches anything it spawned (`sh -c` pipelines, `ssh` helpers). That
//! is what guarantees the stdout pipe closes and readers see end-of-stream.

use std::io;
use std::process::{Child, ChildStdout, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::remote::CommandSpec;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a child ended when [`ManagedChild::terminate`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before it was signalled.
    AlreadyExited(ExitStatus),
    /// The process exited within the timeout after the graceful signal.
    Graceful(ExitStatus),
    /// The process ignored the graceful signal and was killed.
    Killed,
}

/// A spawned child that is terminated and reaped no later than drop.
pub struct ManagedChild {
    child: Child,
    label: String,
    reaped: bool,
}

impl ManagedChild {
    /// Spawn `spec` with stdin closed.
    pub fn spawn(spec: &CommandSpec, stdout: Stdio, stderr: Stdio) -> Result<Self> {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| Error::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        log::debug!("spawned {} (pid {}): {spec}", spec.program, child.id());

        Ok(Self {
            child,
            label: spec.program.clone(),
            reaped: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Graceful terminate, wait up to `timeout`, then force kill.
    ///
    /// Always reaps the child before returning.
    pub fn terminate(&mut self, timeout: Duration) -> io::Result<Termination> {
        if let Some(status) = self.child.try_wait()? {
            self.reaped = true;
            self.sweep_group();
            return Ok(Termination::AlreadyExited(status));
        }

        self.signal_graceful();

        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                self.sweep_group();
                return Ok(Termination::Graceful(status));
            }
            thread::sleep(POLL_INTERVAL);
        }

        log::warn!(
            "{} (pid {}) ignored terminate for {:.1}s, killing",
            self.label,
            self.child.id(),
            timeout.as_secs_f64()
        );
        self.force_kill()?;
        Ok(Termination::Killed)
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.sweep_group();
        // The group kill already delivered SIGKILL on unix; this covers
        // other platforms and is harmless if the child is gone.
        let _ = self.child.kill();
        self.child.wait()?;
        self.reaped = true;
        Ok(())
    }

    #[cfg(unix)]
    fn signal_graceful(&self) {
        if let Err(e) = signal_group(self.child.id(), libc::SIGTERM) {
            log::debug!("SIGTERM to {} failed: {e}", self.label);
        }
    }

    #[cfg(not(unix))]
    fn signal_graceful(&mut self) {
        let _ = self.child.kill();
    }

    /// Kill anything left in the child's process group.
    #[cfg(unix)]
    fn sweep_group(&self) {
        let _ = signal_group(self.child.id(), libc::SIGKILL);
    }

    #[cfg(not(unix))]
    fn sweep_group(&self) {}
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.force_kill();
        }
    }
}

/// Send `sig` to the process group led by `pid`.
#[cfg(unix)]
fn signal_group(pid: u32, sig: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions. A negative pid
    // addresses the process group created for this child at spawn.
    let ret = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
    if ret == 0 {
        Ok(())
    } else {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

/// Whether a process with `pid` still exists (zombies excluded once reaped).
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs error checking only.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn terminate_exits_gracefully() {
        let spec = CommandSpec::shell("sleep 30");
        let mut child = ManagedChild::spawn(&spec, Stdio::null(), Stdio::null()).unwrap();
        let pid = child.id();
        let outcome = child.terminate(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, Termination::Graceful(_)));
        assert!(!process_alive(pid));
    }

    #[test]
    fn terminate_escalates_to_kill() {
        let spec = CommandSpec::shell("trap '' TERM; while true; do sleep 0.05; done");
        let mut child = ManagedChild::spawn(&spec, Stdio::null(), Stdio::null()).unwrap();
        let pid = child.id();
        // Give the shell time to install the trap.
        thread::sleep(Duration::from_millis(200));

        let start = Instant::now();
        let outcome = child.terminate(Duration::from_millis(300)).unwrap();
        assert_eq!(outcome, Termination::Killed);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!process_alive(pid));
    }

    #[test]
    fn terminate_reports_already_exited() {
        let spec = CommandSpec::shell("exit 3");
        let mut child = ManagedChild::spawn(&spec, Stdio::null(), Stdio::null()).unwrap();
        thread::sleep(Duration::from_millis(200));
        match child.terminate(Duration::from_secs(1)).unwrap() {
            Termination::AlreadyExited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn drop_kills_running_child() {
        let spec = CommandSpec::shell("sleep 30");
        let child = ManagedChild::spawn(&spec, Stdio::null(), Stdio::null()).unwrap();
        let pid = child.id();
        drop(child);
        assert!(!process_alive(pid));
    }

    #[test]
    fn spawn_failure_names_program() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-quanti", Vec::<String>::new());
        let err = ManagedChild::spawn(&spec, Stdio::null(), Stdio::null())
            .err()
            .unwrap();
        assert!(err.to_string().contains("definitely-not-a-real-binary-quanti"));
    }
}
