#![allow(dead_code)]

use async_trait::async_trait;
use pdf_translate::error::{EngineError, EngineResult};
use pdf_translate::probe::{Probe, ProbeHit};
use pdf_translate::process::{CommandSpec, Launcher, RunOutcome, StreamKind};
use pdf_translate::sink::ProgressSink;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Names ("uv", "pdf2zh") that currently count as installed.
pub type Installed = Arc<Mutex<HashSet<String>>>;

pub fn installed(names: &[&str]) -> Installed {
    Arc::new(Mutex::new(names.iter().map(|s| s.to_string()).collect()))
}

/// Answers from the shared `installed` set by file stem.
pub struct FakeProbe {
    installed: Installed,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(installed: Installed) -> Arc<Self> {
        Arc::new(Self {
            installed,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn find_executable(
        &self,
        candidates: &[PathBuf],
        sink: &dyn ProgressSink,
    ) -> Option<ProbeHit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let installed = self.installed.lock().unwrap().clone();
        for c in candidates {
            let stem = c.file_stem().unwrap().to_string_lossy().into_owned();
            if installed.contains(&stem) {
                sink.log_line(&format!("{stem} found at: {}", c.display()));
                return Some(ProbeHit {
                    path: c.clone(),
                    version: format!("{stem} 1.0.0"),
                });
            }
        }
        None
    }
}

pub enum Behavior {
    Exit {
        code: i32,
        lines: Vec<(StreamKind, String)>,
        installs: Option<&'static str>,
    },
    SpawnError,
    UntilCancelled,
    Gate(Arc<Notify>),
}

impl Behavior {
    pub fn ok() -> Self {
        Behavior::Exit {
            code: 0,
            lines: Vec::new(),
            installs: None,
        }
    }

    pub fn installs(name: &'static str) -> Self {
        Behavior::Exit {
            code: 0,
            lines: Vec::new(),
            installs: Some(name),
        }
    }

    pub fn exit(code: i32, lines: Vec<(StreamKind, String)>) -> Self {
        Behavior::Exit {
            code,
            lines,
            installs: None,
        }
    }
}

/// Scripted launcher: each spawn pops the next behavior, defaulting to a
/// clean exit.
pub struct FakeLauncher {
    installed: Installed,
    script: Mutex<VecDeque<Behavior>>,
    pub specs: Mutex<Vec<CommandSpec>>,
    pub started: Notify,
}

impl FakeLauncher {
    pub fn new(installed: Installed, script: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            installed,
            script: Mutex::new(script.into()),
            specs: Mutex::new(Vec::new()),
            started: Notify::new(),
        })
    }

    pub fn spawns(&self) -> usize {
        self.specs.lock().unwrap().len()
    }

    pub fn spec(&self, i: usize) -> CommandSpec {
        self.specs.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
        on_line: &mut (dyn for<'a> FnMut(StreamKind, &'a str) + Send),
    ) -> EngineResult<RunOutcome> {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Behavior::ok);
        if matches!(behavior, Behavior::SpawnError) {
            return Err(EngineError::SpawnFailed {
                program: spec.program.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.specs.lock().unwrap().push(spec.clone());
        self.started.notify_one();

        match behavior {
            Behavior::Exit {
                code,
                lines,
                installs,
            } => {
                for (kind, line) in &lines {
                    on_line(*kind, line);
                }
                if let Some(name) = installs {
                    self.installed.lock().unwrap().insert(name.to_string());
                }
                Ok(RunOutcome::Exited(Some(code)))
            }
            Behavior::UntilCancelled => {
                cancel.cancelled().await;
                Ok(RunOutcome::Cancelled)
            }
            Behavior::Gate(gate) => {
                tokio::select! {
                    _ = gate.notified() => Ok(RunOutcome::Exited(Some(0))),
                    _ = cancel.cancelled() => Ok(RunOutcome::Cancelled),
                }
            }
            Behavior::SpawnError => unreachable!(),
        }
    }
}

pub fn stderr(line: &str) -> (StreamKind, String) {
    (StreamKind::Stderr, line.to_string())
}

pub fn stdout(line: &str) -> (StreamKind, String) {
    (StreamKind::Stdout, line.to_string())
}
