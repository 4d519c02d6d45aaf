//! Process groups for validation runs
//!
//! Every validation command is started as the leader of a new process group
//! so a timeout can take down everything it forked, not just the direct
//! child.

use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

/// Result of a bounded run
#[derive(Debug)]
pub enum RunOutput {
    Finished(Output),
    TimedOut,
}

/// Owns the process group of a spawned command
///
/// Dropping the group kills it.
#[derive(Debug, Default)]
pub struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    /// Take ownership of the group led by `pid`
    pub fn adopt(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
        }
    }

    pub fn pgid(&self) -> Option<i32> {
        self.pgid
    }

    /// Kill every process in the group
    ///
    /// A group that no longer exists is ignored.
    #[cfg(unix)]
    pub fn terminate(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = self.pgid.take() {
            match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) => debug!(pgid, "Killed process group"),
                Err(Errno::ESRCH) => {}
                Err(e) => debug!(pgid, error = %e, "Failed to kill process group"),
            }
        }
    }

    #[cfg(not(unix))]
    pub fn terminate(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// How long output readers may lag behind the exit of the command
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Run `cmd` to completion or until `limit` elapses
///
/// Completion means the direct child exited; processes it left in the
/// background are killed with the rest of the group before output is
/// collected, so they cannot hold the pipes open.
pub async fn run_with_timeout(mut cmd: Command, limit: Duration) -> io::Result<RunOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let mut group = ProcessGroup::adopt(child.id());
    let stdout = child.stdout.take().map(|out| tokio::spawn(read_to_end(out)));
    let stderr = child.stderr.take().map(|err| tokio::spawn(read_to_end(err)));

    let exited = tokio::time::timeout(limit, observe_exit(&mut child)).await;
    // the leader is not reaped yet, so the group id cannot have been reused
    group.terminate();
    let status = child.wait().await;

    match exited {
        Ok(observed) => {
            observed?;
            Ok(RunOutput::Finished(Output {
                status: status?,
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
            }))
        }
        Err(_) => {
            for reader in [stdout, stderr].into_iter().flatten() {
                reader.abort();
            }
            Ok(RunOutput::TimedOut)
        }
    }
}

/// Wait until `child` has exited without reaping it
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
async fn observe_exit(child: &mut Child) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return Ok(());
    };
    tokio::task::spawn_blocking(move || loop {
        match waitid(Id::Pid(Pid::from_raw(pid)), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) | Err(Errno::ECHILD) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from(e)),
        }
    })
    .await
    .map_err(io::Error::other)?
}

/// Wait until `child` has exited
///
/// Without `waitid` the leader is reaped here, before its group is killed.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
async fn observe_exit(child: &mut Child) -> io::Result<()> {
    child.wait().await.map(|_| ())
}

async fn read_to_end<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Output stream closed with an error");
    }
    buf
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    match tokio::time::timeout(OUTPUT_GRACE, &mut reader).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            debug!(error = %e, "Output reader failed");
            Vec::new()
        }
        Err(_) => {
            debug!("Output still open after the process group was killed");
            reader.abort();
            Vec::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_output_is_captured() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");

        match run_with_timeout(cmd, Duration::from_secs(5)).await.unwrap() {
            RunOutput::Finished(output) => {
                assert_eq!(output.status.code(), Some(3));
                assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
                assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
            }
            RunOutput::TimedOut => panic!("command should finish"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 10");

        let started = std::time::Instant::now();
        let result = run_with_timeout(cmd, Duration::from_millis(200)).await.unwrap();

        assert!(matches!(result, RunOutput::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_background_process_does_not_hold_the_run() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30 & echo ok; exit 0");

        let started = std::time::Instant::now();
        match run_with_timeout(cmd, Duration::from_secs(10)).await.unwrap() {
            RunOutput::Finished(output) => {
                assert!(output.status.success());
                assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "ok");
            }
            RunOutput::TimedOut => panic!("exit of the direct child should end the run"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let cmd = Command::new("/definitely/not/a/program");
        assert!(run_with_timeout(cmd, Duration::from_secs(1)).await.is_err());
    }

    #[test]
    fn test_terminate_missing_group_is_quiet() {
        let mut group = ProcessGroup::adopt(Some(i32::MAX as u32));
        group.terminate();
        assert!(group.pgid().is_none());
    }
}
