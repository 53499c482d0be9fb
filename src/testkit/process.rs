//! Runs an external command for the duration of a test.
//!
//! The command goes through the OS shell in a process group of its own, so
//! stopping it also takes down whatever the shell started. A background task
//! drains stdout and stderr together for as long as the child lives; without
//! it a chatty child eventually blocks on a full pipe.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{self, AsyncRead};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Fixed wait after spawning, used by [`Readiness::FixedDelay`] by default.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// How long `stop` waits for the drain task once the child is dead.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("spawned process has no output pipe")]
    MissingStdout,
    #[error("failed to kill process {pid:?}: {source}")]
    Kill {
        pid: Option<u32>,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to query process state: {0}")]
    Status(#[source] std::io::Error),
    #[error("draining process output failed: {0}")]
    Drain(#[source] std::io::Error),
    #[error("process output still open {0:?} after kill")]
    DrainTimeout(Duration),
    #[error("drain task panicked: {0}")]
    DrainTask(String),
    #[error("`{url}` did not become ready within {waited:?}")]
    NotReady { url: String, waited: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// When a freshly spawned process is considered usable.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// Sleep for a fixed time and hope the process is up by then.
    FixedDelay(Duration),
    /// Poll `url` until it answers with a 2xx status.
    HttpProbe {
        url: String,
        timeout: Duration,
        interval: Duration,
    },
}

impl Default for Readiness {
    fn default() -> Self {
        Self::FixedDelay(DEFAULT_GRACE_PERIOD)
    }
}

/// A command that has not been started yet.
#[derive(Debug, Clone)]
pub struct ProcessHarness {
    command: String,
    readiness: Readiness,
    envs: Vec<(String, String)>,
}

impl ProcessHarness {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            readiness: Readiness::default(),
            envs: Vec::new(),
        }
    }

    pub fn readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::NotStarted
    }

    /// Spawns the command, starts draining its output and waits for
    /// readiness. Any spawn failure is returned immediately.
    pub async fn start(self) -> Result<RunningProcess, HarnessError> {
        let mut command = shell_command(&self.command);
        command
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
            command: self.command.clone(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(HarnessError::MissingStdout)?;
        let stderr = child.stderr.take().ok_or(HarnessError::MissingStdout)?;
        let drain = tokio::spawn(drain_output(stdout, stderr));
        let pid = child.id();

        info!(command = %self.command, ?pid, "started process");

        let mut running = RunningProcess {
            command: self.command,
            pid,
            child,
            drain: Some(drain),
            state: ProcessState::Starting,
        };

        if let Err(err) = running.wait_ready(&self.readiness).await {
            if let Err(stop_err) = running.stop().await {
                warn!(error = %stop_err, "failed to stop process that never became ready");
            }
            return Err(err);
        }

        running.transition(ProcessState::Running);
        Ok(running)
    }
}

/// Owned handle of a started process. The child is killed when the handle is
/// dropped without calling [`RunningProcess::stop`].
pub struct RunningProcess {
    command: String,
    /// Pid of the shell, which is also the id of its process group.
    pid: Option<u32>,
    child: Child,
    drain: Option<JoinHandle<io::Result<u64>>>,
    state: ProcessState,
}

impl RunningProcess {
    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id, `None` once the child has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_alive(&mut self) -> Result<bool, HarnessError> {
        match self.child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(_)) => Ok(false),
            Err(err) => Err(HarnessError::Status(err)),
        }
    }

    /// Force-kills the process together with everything it started and waits
    /// for its output streams to close. Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        if self.state == ProcessState::Terminated {
            return Ok(());
        }

        let alive = self.is_alive()?;
        if let Some(pid) = self.pid {
            kill_tree(pid).await?;
        }
        if alive {
            info!(command = %self.command, pid = ?self.pid, "process is alive, killing it");
            let pid = self.child.id();
            self.child
                .kill()
                .await
                .map_err(|source| HarnessError::Kill { pid, source })?;
        }

        self.transition(ProcessState::Draining);
        let outcome = match self.drain.take() {
            Some(mut drain) => match timeout(DRAIN_TIMEOUT, &mut drain).await {
                Ok(Ok(Ok(bytes))) => {
                    debug!(bytes, "process output drained");
                    Ok(())
                }
                Ok(Ok(Err(err))) => Err(HarnessError::Drain(err)),
                Ok(Err(err)) => Err(HarnessError::DrainTask(err.to_string())),
                Err(_) => {
                    warn!(command = %self.command, "output stream still open after kill");
                    drain.abort();
                    Err(HarnessError::DrainTimeout(DRAIN_TIMEOUT))
                }
            },
            None => Ok(()),
        };

        self.transition(ProcessState::Terminated);
        info!(command = %self.command, "process terminated");
        outcome
    }

    async fn wait_ready(&mut self, readiness: &Readiness) -> Result<(), HarnessError> {
        match readiness {
            Readiness::FixedDelay(delay) => {
                debug!(?delay, "waiting for process grace period");
                sleep(*delay).await;
                Ok(())
            }
            Readiness::HttpProbe {
                url,
                timeout: limit,
                interval,
            } => {
                let client = reqwest::Client::new();
                let started = Instant::now();
                loop {
                    match client.get(url.as_str()).send().await {
                        Ok(response) if response.status().is_success() => return Ok(()),
                        Ok(response) => debug!(%url, status = %response.status(), "not ready yet"),
                        Err(err) => debug!(%url, error = %err, "not ready yet"),
                    }
                    if !self.is_alive()? || started.elapsed() >= *limit {
                        return Err(HarnessError::NotReady {
                            url: url.clone(),
                            waited: started.elapsed(),
                        });
                    }
                    sleep(*interval).await;
                }
            }
        }
    }

    fn transition(&mut self, next: ProcessState) {
        debug!(command = %self.command, from = %self.state, to = %next, "process state change");
        self.state = next;
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command);
    shell
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(command);
    shell
}

/// SIGKILLs the whole process group led by `pgid`. A group that is already
/// gone is not an error.
#[cfg(unix)]
async fn kill_tree(pgid: u32) -> Result<(), HarnessError> {
    let status = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| HarnessError::Kill {
            pid: Some(pgid),
            source,
        })?;
    if !status.success() {
        debug!(pgid, %status, "process group already gone");
    }
    Ok(())
}

#[cfg(windows)]
async fn kill_tree(pid: u32) -> Result<(), HarnessError> {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID"])
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| HarnessError::Kill {
            pid: Some(pid),
            source,
        })?;
    if !status.success() {
        debug!(pid, %status, "process tree already gone");
    }
    Ok(())
}

async fn drain_output<O, E>(mut stdout: O, mut stderr: E) -> io::Result<u64>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_sink = io::sink();
    let mut err_sink = io::sink();
    let (out, err) = tokio::try_join!(
        io::copy(&mut stdout, &mut out_sink),
        io::copy(&mut stderr, &mut err_sink),
    )?;
    Ok(out + err)
}
