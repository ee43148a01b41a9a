use crate::config::Config;
use crate::sink::ProgressSink;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub const PACKAGE_MANAGER: &str = "uv";
pub const TOOL: &str = "pdf2zh";

/// How long to wait for `--version` output once the process has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+").expect("valid version regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeHit {
    pub path: PathBuf,
    pub version: String,
}

/// Finds the first working executable among ordered candidates. Absence is
/// a normal answer, not an error.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn find_executable(
        &self,
        candidates: &[PathBuf],
        sink: &dyn ProgressSink,
    ) -> Option<ProbeHit>;
}

#[async_trait]
impl<T: Probe + ?Sized> Probe for Arc<T> {
    async fn find_executable(
        &self,
        candidates: &[PathBuf],
        sink: &dyn ProgressSink,
    ) -> Option<ProbeHit> {
        (**self).find_executable(candidates, sink).await
    }
}

/// Runs `<candidate> --version` for each candidate in turn.
pub struct DependencyProbe {
    timeout: Duration,
}

impl DependencyProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(Duration::from_millis(cfg.probe.timeout_ms))
    }

    async fn version_of(&self, candidate: &Path) -> Option<String> {
        let mut cmd = Command::new(candidate);
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                debug!("probe {} failed to start: {err}", candidate.display());
                return None;
            }
        };
        // Only the first line matters. A descendant holding stdout open must
        // not turn a finished probe into a timeout.
        let (line_tx, line_rx) = oneshot::channel();
        let reader = child.stdout.take().map(|out| {
            tokio::spawn(async move {
                let mut out = BufReader::new(out);
                let mut first = String::new();
                let _ = out.read_line(&mut first).await;
                let _ = line_tx.send(first);
                let _ = tokio::io::copy(&mut out, &mut tokio::io::sink()).await;
            })
        });

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        let first_line = match &waited {
            Ok(Ok(_)) => tokio::time::timeout(OUTPUT_GRACE, line_rx)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            _ => String::new(),
        };
        if let Some(reader) = reader {
            reader.abort();
        }

        match waited {
            Ok(Ok(status)) => {
                let version = first_line.trim().to_string();
                if status.success() || VERSION_RE.is_match(&version) {
                    Some(version)
                } else {
                    debug!("probe {} exited {:?}", candidate.display(), status.code());
                    None
                }
            }
            Ok(Err(err)) => {
                debug!("probe {} wait failed: {err}", candidate.display());
                None
            }
            Err(_) => {
                warn!(
                    "probe {} timed out after {:?}",
                    candidate.display(),
                    self.timeout
                );
                // kill() also waits, so the probe never lingers as a zombie
                let _ = child.kill().await;
                None
            }
        }
    }
}

#[async_trait]
impl Probe for DependencyProbe {
    async fn find_executable(
        &self,
        candidates: &[PathBuf],
        sink: &dyn ProgressSink,
    ) -> Option<ProbeHit> {
        for candidate in candidates {
            match self.version_of(candidate).await {
                Some(version) => {
                    sink.log_line(&format!(
                        "{} found at: {} ({version})",
                        file_label(candidate),
                        candidate.display()
                    ));
                    return Some(ProbeHit {
                        path: candidate.clone(),
                        version,
                    });
                }
                None => sink.log_line(&format!(
                    "{} not found at: {}",
                    file_label(candidate),
                    candidate.display()
                )),
            }
        }
        None
    }
}

fn file_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Where the package manager drops binaries: `~/.local/bin` on every
/// platform, `.exe` suffixed on Windows.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    pub bin_dir: PathBuf,
}

impl InstallLayout {
    pub fn detect() -> Self {
        let home = dirs::home_dir().unwrap_or_default();
        Self::at(home.join(".local").join("bin"))
    }

    pub fn at(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
        }
    }

    pub fn binary(&self, name: &str) -> PathBuf {
        self.bin_dir
            .join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
    }

    pub fn package_manager(&self) -> PathBuf {
        self.binary(PACKAGE_MANAGER)
    }

    pub fn tool(&self) -> PathBuf {
        self.binary(TOOL)
    }

    pub fn package_manager_candidates(&self) -> Vec<PathBuf> {
        vec![self.package_manager(), PathBuf::from(PACKAGE_MANAGER)]
    }

    /// Configured path, then the default install path, then the bare name.
    pub fn tool_candidates(&self, configured: &str) -> Vec<PathBuf> {
        let mut out = self.translate_candidates(configured);
        push_unique(&mut out, PathBuf::from(TOOL));
        out
    }

    /// Configured path, then the default install path.
    pub fn translate_candidates(&self, configured: &str) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let configured = configured.trim();
        if !configured.is_empty() {
            out.push(crate::util::expand_tilde(configured));
        }
        push_unique(&mut out, self.tool());
        out
    }
}

fn push_unique(out: &mut Vec<PathBuf>, path: PathBuf) {
    if !out.contains(&path) {
        out.push(path);
    }
}
