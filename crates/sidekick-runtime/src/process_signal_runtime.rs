//! Unix signal delivery for supervised jobs.

use std::fmt;
use std::io;

use serde::Serialize;

/// Signals Sidekick sends to provider processes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum JobSignal {
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGKILL")]
    Kill,
}

impl JobSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Int => "SIGINT",
            Self::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Int => libc::SIGINT,
            Self::Kill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for JobSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sends `signal` to a single process.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: JobSignal) -> io::Result<()> {
    deliver(to_pid(pid)?, signal)
}

/// Sends `signal` to the process group led by `pid`, falling back to the
/// process itself when no such group exists.
#[cfg(unix)]
pub fn signal_process_group(pid: u32, signal: JobSignal) -> io::Result<()> {
    let pid = to_pid(pid)?;
    match deliver(-pid, signal) {
        Err(error) if is_no_such_process(&error) => deliver(pid, signal),
        other => other,
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: JobSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{signal} delivery is only supported on unix"),
    ))
}

#[cfg(not(unix))]
pub fn signal_process_group(pid: u32, signal: JobSignal) -> io::Result<()> {
    send_signal(pid, signal)
}

/// True for `ESRCH`: the target already exited.
pub fn is_no_such_process(error: &io::Error) -> bool {
    #[cfg(unix)]
    {
        error.raw_os_error() == Some(libc::ESRCH)
    }
    #[cfg(not(unix))]
    {
        error.kind() == io::ErrorKind::NotFound
    }
}

#[cfg(unix)]
fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid pid {pid}"),
        )),
    }
}

#[cfg(unix)]
fn deliver(target: libc::pid_t, signal: JobSignal) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(target, signal.raw()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::{is_no_such_process, send_signal, JobSignal};

    #[test]
    fn unit_signal_serializes_with_sig_prefix() {
        let encoded = serde_json::to_string(&JobSignal::Int).expect("encode");
        assert_eq!(encoded, "\"SIGINT\"");
    }

    #[test]
    fn unit_zero_pid_is_rejected() {
        let error = send_signal(0, JobSignal::Term).expect_err("pid 0 must not signal the group");
        assert!(!is_no_such_process(&error));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_send_signal_terminates_child_and_reports_esrch_after_reap() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("pid");
        send_signal(pid, JobSignal::Term).expect("signal");
        let status = child.wait().await.expect("wait");
        assert!(!status.success());

        let error = send_signal(pid, JobSignal::Term).expect_err("reaped pid");
        assert!(is_no_such_process(&error));
    }
}
