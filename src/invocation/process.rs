//! Bounded child-process execution.
//!
//! The child runs in its own process group with piped stdout/stderr. Output
//! is drained on helper threads while the caller polls for exit against a
//! wall-clock deadline. On expiry the whole group gets SIGTERM, then SIGKILL
//! after a grace period, so grandchildren cannot keep the pipes open.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Limits applied to one child process.
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    /// Wall-clock deadline measured from spawn.
    pub timeout: Duration,
    /// `RLIMIT_AS` for the child only.
    pub memory_limit: Option<u64>,
    /// Time between SIGTERM and SIGKILL on timeout.
    pub kill_grace: Duration,
}

impl ProcessLimits {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            memory_limit: None,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// How the child ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    SpawnFailed(String),
    /// Started, but its exit status could not be collected.
    WaitFailed(String),
}

/// Everything captured from one child.
#[derive(Debug, Clone)]
pub struct CapturedRun {
    pub exit: ProcessExit,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CapturedRun {
    fn spawn_failed(message: String, start: Instant) -> Self {
        Self {
            exit: ProcessExit::SpawnFailed(message.clone()),
            stdout: String::new(),
            stderr: message,
            duration: start.elapsed(),
        }
    }
}

/// Run `argv` to completion or until the deadline.
pub fn run_bounded(argv: &[String], limits: &ProcessLimits) -> CapturedRun {
    let start = Instant::now();
    let Some((program, args)) = argv.split_first() else {
        return CapturedRun::spawn_failed("empty command line".to_string(), start);
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
        if let Some(bytes) = limits.memory_limit {
            // SAFETY: the closure only calls setrlimit, which is
            // async-signal-safe, and touches no parent state.
            unsafe {
                command.pre_exec(move || set_address_space_limit(bytes));
            }
        }
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return CapturedRun::spawn_failed(e.to_string(), start),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || drain(stdout));
    let stderr_handle = thread::spawn(move || drain(stderr));

    let deadline = start + limits.timeout;
    let exit = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // Background helpers left in the group still hold the pipes.
                kill_leftovers(&child);
                break exit_of(status);
            }
            Ok(None) => {}
            Err(e) => {
                terminate_group(&mut child, limits.kill_grace);
                break wait_failure(&e);
            }
        }
        if Instant::now() >= deadline {
            terminate_group(&mut child, limits.kill_grace);
            break ProcessExit::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    CapturedRun {
        exit,
        stdout,
        stderr,
        duration: start.elapsed(),
    }
}

/// Read a pipe to EOF as text. Invalid UTF-8 is replaced, never rejected.
fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn exit_of(status: ExitStatus) -> ProcessExit {
    if let Some(code) = status.code() {
        return ProcessExit::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return ProcessExit::Signaled(signo);
        }
    }
    ProcessExit::WaitFailed("process ended without exit code or signal".to_string())
}

fn wait_failure(err: &std::io::Error) -> ProcessExit {
    ProcessExit::WaitFailed(format!("failed to wait for child: {}", err))
}

/// SIGKILL whatever is left in the group of an already reaped leader.
fn kill_leftovers(child: &Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // ESRCH when the group is already empty.
        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}

/// SIGTERM the child's process group, wait up to `grace`, then SIGKILL and
/// reap.
fn terminate_group(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let pgid = Pid::from_raw(child.id() as i32);
        let _ = killpg(pgid, Signal::SIGTERM);

        let start = Instant::now();
        while start.elapsed() < grace {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }

        // The leader may be gone while grandchildren linger.
        let _ = killpg(pgid, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn set_address_space_limit(bytes: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    // SAFETY: plain syscall on a stack value.
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
