//! Unix implementation of bounded execution with process groups.
//!
//! Uses `setpgid(0, 0)` to make the child a process-group leader, reader
//! threads to drain its pipes, and `killpg()` to signal the entire group on
//! timeout.

use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use libc::{killpg, SIGKILL};
use snapstat_core::{SnapstatError, SnapstatResult};

use crate::{CommandSpec, RunConfig, RunOutcome};

/// Polling interval for checking if child has exited.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum time given to reader threads after the child exits.
const DRAIN_GRACE: Duration = Duration::from_millis(50);

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

pub fn run_with_timeout_impl(
    spec: &CommandSpec,
    timeout: Duration,
    config: &RunConfig,
) -> SnapstatResult<RunOutcome> {
    let mut cmd = Command::new(spec.program());
    cmd.args(spec.get_args());
    for (key, value) in spec.get_envs() {
        cmd.env(key, value);
    }

    cmd.stdin(if spec.stdin_data().is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(if spec.merges_stderr() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    // SAFETY: setpgid(0, 0) creates a new process group with the child's
    // PID as the PGID. Only async-signal-safe calls happen in pre_exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            SnapstatError::not_found_command(spec.program())
        } else if e.kind() == io::ErrorKind::PermissionDenied {
            SnapstatError::permission_denied_command(spec.program())
        } else {
            SnapstatError::spawn_failed(spec.program(), e.to_string())
        }
    })?;

    let child_pid = child.id() as i32;
    let start = Instant::now();

    // stdout and stderr share one buffer so merged output keeps arrival order
    let output: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();
    let mut readers = 0;
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, Arc::clone(&output), done_tx.clone());
        readers += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, Arc::clone(&output), done_tx.clone());
        readers += 1;
    }
    drop(done_tx);

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), spec.stdin_data()) {
        let input = input.as_bytes().to_vec();
        thread::spawn(move || {
            // A child that exits without reading yields EPIPE; nothing to do.
            let _ = stdin.write_all(&input);
        });
    }

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let budget = timeout.saturating_sub(start.elapsed()).max(DRAIN_GRACE);
                wait_for_readers(&done_rx, readers, budget);
                let bytes = take_buffer(&output);
                return Ok(RunOutcome::Completed {
                    output: String::from_utf8_lossy(&bytes).into_owned(),
                    exit_status: status,
                });
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    return kill_tree(child_pid, &mut child, config);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(SnapstatError::system(
                    format!("wait failed: {}", e),
                    e.raw_os_error().unwrap_or(0),
                ));
            }
        }
    }
}

/// Drain `source` into `sink` until EOF, then signal `done`.
fn spawn_reader<R>(mut source: R, sink: SharedBuffer, done: mpsc::Sender<()>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let mut buf = sink.lock().unwrap_or_else(|p| p.into_inner());
                    buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });
}

/// Wait until `readers` threads report EOF or `budget` runs out.
///
/// A background grandchild can hold a pipe open after the leader exits; in
/// that case we stop waiting and keep what was captured so far.
fn wait_for_readers(done: &mpsc::Receiver<()>, readers: usize, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    for _ in 0..readers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if done.recv_timeout(remaining).is_err() {
            return false;
        }
    }
    true
}

fn take_buffer(buffer: &SharedBuffer) -> Vec<u8> {
    let mut buf = buffer.lock().unwrap_or_else(|p| p.into_inner());
    std::mem::take(&mut *buf)
}

/// True while any member of process group `pgid` exists.
fn group_alive(pgid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence/permission check
    unsafe { killpg(pgid, 0) == 0 }
}

/// Signal the child's process group and wait for it to exit.
///
/// Escalates to SIGKILL after `kill_after` unless every group member is
/// already gone.
fn kill_tree(pid: i32, child: &mut Child, config: &RunConfig) -> SnapstatResult<RunOutcome> {
    // SAFETY: pid is our child and leads its own group
    unsafe {
        killpg(pid, config.signal);
    }

    let escalation_deadline = Instant::now() + config.kill_after;
    let mut leader_exited = false;

    while Instant::now() < escalation_deadline {
        if !leader_exited && child.try_wait().ok().flatten().is_some() {
            leader_exited = true;
        }
        if leader_exited && !group_alive(pid) {
            return Ok(RunOutcome::TimedOut {
                signal_sent: config.signal,
                escalated: false,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }

    // Members that trapped the first signal still get SIGKILL
    // SAFETY: ESRCH for already-dead processes is harmless
    unsafe {
        killpg(pid, SIGKILL);
    }

    // Reap the zombie (if not already reaped)
    let _ = child.wait();

    Ok(RunOutcome::TimedOut {
        signal_sent: config.signal,
        escalated: true,
    })
}
