pub mod runner;
pub mod terminate;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::EngineResult;

pub use runner::ProcessRunner;
pub use terminate::{platform_terminator, TreeTerminator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// How a launched command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Natural exit. `None` when the process was ended by a signal.
    Exited(Option<i32>),
    Cancelled,
}

/// Everything needed to start one child process.
#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overlaid on the parent environment. Values are never logged.
    pub env: BTreeMap<String, String>,
    /// Prepended to the inherited search path.
    pub path_prepend: Vec<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        for (k, v) in vars {
            if !k.is_empty() && !v.is_empty() {
                self.env.insert(k.clone(), v.clone());
            }
        }
        self
    }

    pub fn prepend_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path_prepend.push(dir.into());
        self
    }

    /// Value for `PATH` in the child, if this command changes it.
    pub fn search_path(&self) -> Option<OsString> {
        if self.path_prepend.is_empty() {
            return None;
        }
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .path_prepend
            .iter()
            .cloned()
            .chain(std::env::split_paths(&inherited));
        std::env::join_paths(dirs).ok()
    }

    /// Shell-ish rendering for transcripts.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|part| {
                if part.contains(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("path_prepend", &self.path_prepend)
            .finish()
    }
}

/// Starts commands and streams their output. `ProcessRunner` is the real
/// implementation; the seam exists so orchestration can be driven without
/// spawning anything.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
        on_line: &mut (dyn for<'a> FnMut(StreamKind, &'a str) + Send),
    ) -> EngineResult<RunOutcome>;
}

#[async_trait]
impl<T: Launcher + ?Sized> Launcher for Arc<T> {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
        on_line: &mut (dyn for<'a> FnMut(StreamKind, &'a str) + Send),
    ) -> EngineResult<RunOutcome> {
        (**self).run(spec, cancel, on_line).await
    }
}
