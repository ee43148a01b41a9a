use super::{CommandSpec, Launcher, RunOutcome, StreamKind, TreeTerminator};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stand-in deadline for "no escalation scheduled".
const NEVER: Duration = Duration::from_secs(60 * 60 * 24 * 365);

const REAP_POLL: Duration = Duration::from_millis(50);

pub struct ProcessRunner {
    terminator: Arc<dyn TreeTerminator>,
    grace: Duration,
    drain: Duration,
}

impl ProcessRunner {
    pub fn new(terminator: Arc<dyn TreeTerminator>) -> Self {
        Self {
            terminator,
            grace: Duration::from_secs(3),
            drain: Duration::from_millis(500),
        }
    }

    pub fn from_config(cfg: &Config, terminator: Arc<dyn TreeTerminator>) -> Self {
        Self::new(terminator)
            .with_grace(Duration::from_millis(cfg.runner.terminate_grace_ms))
            .with_drain(Duration::from_millis(cfg.runner.drain_timeout_ms))
    }

    /// How long a cancelled tree gets before it is force-killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// How long to keep reading output after the child itself exited;
    /// covers grandchildren that inherited the pipes and outlive it.
    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(&spec.env);
        if let Some(path) = spec.search_path() {
            cmd.env("PATH", path);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW
        cmd
    }

    /// Wait for a terminated tree to disappear, force-killing whatever is
    /// left at `deadline`.
    async fn reap_tree(&self, pid: Option<u32>, deadline: Instant) {
        let Some(id) = pid else { return };
        while self.terminator.tree_alive(id) {
            if Instant::now() >= deadline {
                warn!("tree of pid {id} outlived its leader after terminate; killing");
                self.signal(pid, true);
                return;
            }
            tokio::time::sleep(REAP_POLL).await;
        }
    }

    fn signal(&self, pid: Option<u32>, force: bool) {
        let Some(pid) = pid else { return };
        if let Err(err) = self.terminator.terminate_tree(pid, force) {
            warn!("terminate pid {pid} (force={force}) failed: {err}");
        }
    }
}

#[async_trait]
impl Launcher for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
        on_line: &mut (dyn for<'a> FnMut(StreamKind, &'a str) + Send),
    ) -> EngineResult<RunOutcome> {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        debug!(?spec, "spawn");
        let program = spec.program.display().to_string();
        let mut child = Self::command(spec)
            .spawn()
            .map_err(|source| EngineError::SpawnFailed {
                program: program.clone(),
                source,
            })?;
        let pid = child.id();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(forward_lines(out, StreamKind::Stdout, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward_lines(err, StreamKind::Stderr, tx.clone()));
        }
        drop(tx);

        let mut status: Option<ExitStatus> = None;
        let mut cancelled = false;
        let mut streams_open = true;
        let mut escalate_at: Option<Instant> = None;

        // The group is signalled even after the leader exited: workers it
        // left behind may still be running.
        let status = loop {
            if !streams_open {
                if let Some(s) = status {
                    break s;
                }
            }
            let deadline = escalate_at.unwrap_or_else(|| Instant::now() + NEVER);
            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    debug!("cancel requested; terminating tree of pid {pid:?}");
                    cancelled = true;
                    self.signal(pid, false);
                    escalate_at = Some(Instant::now() + self.grace);
                }
                _ = tokio::time::sleep_until(deadline), if escalate_at.is_some() => {
                    warn!(
                        "tree of pid {pid:?} still running {:?} after terminate; killing",
                        self.grace
                    );
                    self.signal(pid, true);
                    if status.is_none() {
                        let _ = child.start_kill();
                    }
                    escalate_at = None;
                }
                res = child.wait(), if status.is_none() => {
                    status = Some(res.map_err(|source| EngineError::SpawnFailed {
                        program: program.clone(),
                        source,
                    })?);
                }
                msg = rx.recv(), if streams_open => match msg {
                    Some((kind, line)) => on_line(kind, &line),
                    None => streams_open = false,
                },
                _ = tokio::time::sleep(self.drain), if status.is_some() && streams_open => {
                    debug!("output of {program} still open {:?} after exit; detaching", self.drain);
                    streams_open = false;
                }
            }
        };

        for reader in readers {
            reader.abort();
        }

        if !cancelled && cancel.is_cancelled() {
            cancelled = true;
            self.signal(pid, false);
            escalate_at = Some(Instant::now() + self.grace);
        }
        if let Some(deadline) = escalate_at {
            self.reap_tree(pid, deadline).await;
        }

        if cancelled || cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        Ok(RunOutcome::Exited(status.code()))
    }
}

fn forward_lines<R>(
    mut reader: R,
    kind: StreamKind,
    tx: mpsc::UnboundedSender<(StreamKind, String)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut splitter = LineSplitter::default();
        let mut buf = [0u8; 8192];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for line in splitter.feed(&buf[..n]) {
                if tx.send((kind, line)).is_err() {
                    return;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = tx.send((kind, line));
        }
    })
}

/// Splits a byte stream into lines on `\n` or `\r`. tqdm redraws its bar
/// with bare carriage returns, so both count as terminators; empty
/// segments are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' || b == b'\r' {
                if let Some(line) = self.take() {
                    lines.push(line);
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}
