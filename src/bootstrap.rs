//! Bringing `uv` and `pdf2zh` from absent to verified-present.
//!
//! ```text
//! NotChecked -> Checking -> PackageManagerMissing -> InstallingPackageManager -+
//!                        \-> PackageManagerPresent <----------------------------+
//!            -> CheckingTool -> ToolMissing -> InstallingTool -+
//!                            \-> ToolPresent <-----------------+
//!            -> Verifying -> Ready | Failed | Cancelled
//! ```
//!
//! Only one bootstrap may run per [`Bootstrapper`]; a second caller gets
//! [`EngineError::BootstrapBusy`] immediately.

use crate::config::Config;
use crate::error::{EngineError, EngineResult, InstallPhase};
use crate::probe::{InstallLayout, Probe, PACKAGE_MANAGER};
use crate::process::{CommandSpec, Launcher, RunOutcome, StreamKind};
use crate::sink::{ProgressSink, ProgressUpdate};
use crate::util::display_line;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STEPS: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapState {
    NotChecked,
    Checking,
    PackageManagerMissing,
    InstallingPackageManager,
    PackageManagerPresent,
    CheckingTool,
    ToolMissing,
    InstallingTool,
    ToolPresent,
    Verifying,
    Ready,
    Failed,
    Cancelled,
}

impl BootstrapState {
    fn step(self) -> u64 {
        use BootstrapState::*;
        match self {
            NotChecked | Checking => 0,
            PackageManagerMissing | InstallingPackageManager | PackageManagerPresent => 1,
            CheckingTool | ToolMissing | InstallingTool | ToolPresent => 2,
            Verifying => 3,
            Ready | Failed | Cancelled => STEPS,
        }
    }

    fn describe(self) -> &'static str {
        use BootstrapState::*;
        match self {
            NotChecked => "Not checked",
            Checking => "Checking environment...",
            PackageManagerMissing => "uv not found",
            InstallingPackageManager => "Installing uv package manager...",
            PackageManagerPresent => "uv is installed",
            CheckingTool => "Checking pdf2zh installation...",
            ToolMissing => "pdf2zh not found",
            InstallingTool => "Installing pdf2zh (this may take a few minutes)...",
            ToolPresent => "pdf2zh is installed",
            Verifying => "Verifying installation...",
            Ready => "PDF translation environment is ready",
            Failed => "Environment setup failed",
            Cancelled => "Environment setup cancelled",
        }
    }
}

/// Snapshot of what is installed right now. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub package_manager_installed: bool,
    pub tool_installed: bool,
    pub tool_path: Option<PathBuf>,
    pub ready: bool,
}

#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    /// Configured tool executable, probed before the default locations.
    pub executable: String,
    pub python_version: String,
    pub tool_package: String,
    pub posix_installer_url: String,
    pub windows_installer_url: String,
    pub message_max_chars: usize,
}

impl BootstrapSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            executable: cfg.tool.executable.clone(),
            python_version: cfg.bootstrap.python_version.clone(),
            tool_package: cfg.bootstrap.tool_package.clone(),
            posix_installer_url: cfg.bootstrap.posix_installer_url.clone(),
            windows_installer_url: cfg.bootstrap.windows_installer_url.clone(),
            message_max_chars: cfg.bootstrap.message_max_chars.max(1),
        }
    }
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Bootstrapper<P: Probe, L: Launcher> {
    probe: P,
    launcher: L,
    layout: InstallLayout,
    settings: BootstrapSettings,
    in_flight: AtomicBool,
}

/// Clears the busy flag however the bootstrap ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-run reporting state.
struct Tracker<'a> {
    sink: &'a dyn ProgressSink,
    state: BootstrapState,
}

impl Tracker<'_> {
    fn enter(&mut self, state: BootstrapState) {
        info!(from = ?self.state, to = ?state, "bootstrap");
        self.state = state;
        self.sink.log_line(&format!("[ENV] {}", state.describe()));
        self.sink.progress(&ProgressUpdate::status(
            state.step(),
            STEPS,
            state.describe(),
        ));
    }
}

impl<P: Probe, L: Launcher> Bootstrapper<P, L> {
    pub fn new(probe: P, launcher: L, layout: InstallLayout, settings: BootstrapSettings) -> Self {
        Self {
            probe,
            launcher,
            layout,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn status(&self, sink: &dyn ProgressSink) -> EnvironmentStatus {
        let package_manager = self
            .probe
            .find_executable(&self.layout.package_manager_candidates(), sink)
            .await;
        let tool = self
            .probe
            .find_executable(&self.layout.tool_candidates(&self.settings.executable), sink)
            .await;
        let tool_path = tool.map(|hit| hit.path);
        EnvironmentStatus {
            package_manager_installed: package_manager.is_some(),
            tool_installed: tool_path.is_some(),
            ready: tool_path.is_some(),
            tool_path,
        }
    }

    /// Install whatever is missing and return the verified tool path.
    pub async fn ensure_ready(
        &self,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> EngineResult<PathBuf> {
        let _guard = self.acquire()?;
        let mut tracker = Tracker {
            sink,
            state: BootstrapState::NotChecked,
        };

        let result = self.run_steps(&mut tracker, cancel).await;
        match &result {
            Ok(path) => {
                tracker.enter(BootstrapState::Ready);
                sink.log_line(&format!("[ENV] pdf2zh ready at {}", path.display()));
            }
            Err(EngineError::Cancelled) => tracker.enter(BootstrapState::Cancelled),
            Err(err) => {
                warn!("bootstrap failed in {:?}: {err}", tracker.state);
                sink.log_line(&format!("[ERROR] {err}"));
                tracker.enter(BootstrapState::Failed);
            }
        }
        result
    }

    fn acquire(&self) -> EngineResult<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::BootstrapBusy)?;
        Ok(InFlight(&self.in_flight))
    }

    async fn run_steps(
        &self,
        tracker: &mut Tracker<'_>,
        cancel: &CancellationToken,
    ) -> EngineResult<PathBuf> {
        tracker.enter(BootstrapState::Checking);
        let status = self.status(tracker.sink).await;
        if let (true, Some(path)) = (status.ready, status.tool_path) {
            return Ok(path);
        }
        check(cancel)?;

        let package_manager = if status.package_manager_installed {
            tracker.enter(BootstrapState::PackageManagerPresent);
            self.locate_package_manager(tracker.sink).await
        } else {
            tracker.enter(BootstrapState::PackageManagerMissing);
            tracker.enter(BootstrapState::InstallingPackageManager);
            let spec = self.package_manager_install_spec();
            self.install(InstallPhase::PackageManager, &spec, tracker, cancel).await?;
            tracker.enter(BootstrapState::PackageManagerPresent);
            self.locate_package_manager(tracker.sink).await
        };
        check(cancel)?;

        tracker.enter(BootstrapState::CheckingTool);
        let candidates = self.layout.tool_candidates(&self.settings.executable);
        if self
            .probe
            .find_executable(&candidates, tracker.sink)
            .await
            .is_some()
        {
            tracker.enter(BootstrapState::ToolPresent);
        } else {
            tracker.enter(BootstrapState::ToolMissing);
            tracker.enter(BootstrapState::InstallingTool);
            let spec = self.tool_install_spec(package_manager);
            self.install(InstallPhase::Tool, &spec, tracker, cancel).await?;
            tracker.enter(BootstrapState::ToolPresent);
        }
        check(cancel)?;

        tracker.enter(BootstrapState::Verifying);
        match self.probe.find_executable(&candidates, tracker.sink).await {
            Some(hit) => Ok(hit.path),
            None => Err(EngineError::VerificationFailed),
        }
    }

    /// The probed package manager, else the default install path if it
    /// exists, else the bare name.
    async fn locate_package_manager(&self, sink: &dyn ProgressSink) -> PathBuf {
        if let Some(hit) = self
            .probe
            .find_executable(&self.layout.package_manager_candidates(), sink)
            .await
        {
            return hit.path;
        }
        let default = self.layout.package_manager();
        if default.exists() {
            default
        } else {
            PathBuf::from(PACKAGE_MANAGER)
        }
    }

    pub fn package_manager_install_spec(&self) -> CommandSpec {
        if cfg!(windows) {
            CommandSpec::new("powershell").args([
                "-ExecutionPolicy".to_string(),
                "ByPass".to_string(),
                "-c".to_string(),
                format!("irm {} | iex", self.settings.windows_installer_url),
            ])
        } else {
            CommandSpec::new("sh").args([
                "-c".to_string(),
                format!("curl -LsSf {} | sh", self.settings.posix_installer_url),
            ])
        }
    }

    pub fn tool_install_spec(&self, package_manager: PathBuf) -> CommandSpec {
        CommandSpec::new(package_manager)
            .args([
                "tool",
                "install",
                "--python",
                self.settings.python_version.as_str(),
                self.settings.tool_package.as_str(),
            ])
            .prepend_path(self.layout.bin_dir.clone())
    }

    async fn install(
        &self,
        phase: InstallPhase,
        spec: &CommandSpec,
        tracker: &mut Tracker<'_>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let sink = tracker.sink;
        let step = tracker.state.step();
        let max = self.settings.message_max_chars;
        let label = match phase {
            InstallPhase::PackageManager => "Installing uv",
            InstallPhase::Tool => "Installing pdf2zh",
        };
        sink.log_line(&format!("[ENV] Executing: {}", spec.display()));

        let mut on_line = |kind: StreamKind, line: &str| {
            match kind {
                StreamKind::Stdout => sink.log_line(line),
                StreamKind::Stderr => sink.log_line(&format!("[STDERR] {line}")),
            }
            if let Some(msg) = display_line(line, max) {
                sink.progress(&ProgressUpdate::status(
                    step,
                    STEPS,
                    format!("{label}: {msg}"),
                ));
            }
        };

        match self.launcher.run(spec, cancel, &mut on_line).await {
            Ok(RunOutcome::Exited(Some(0))) => {
                sink.log_line(&format!("[INFO] {phase} installed successfully"));
                Ok(())
            }
            Ok(RunOutcome::Exited(code)) => {
                let code = code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "<signal>".into());
                sink.log_line(&format!("[ERROR] {phase} installation failed with code {code}"));
                Err(EngineError::InstallFailed {
                    phase,
                    reason: format!("installer exited with code {code}"),
                })
            }
            Ok(RunOutcome::Cancelled) => {
                sink.log_line(&format!("[INFO] {phase} installation cancelled"));
                Err(EngineError::Cancelled)
            }
            Err(EngineError::SpawnFailed { program, source }) => Err(EngineError::InstallFailed {
                phase,
                reason: format!("failed to start {program}: {source}"),
            }),
            Err(other) => Err(other),
        }
    }
}

fn check(cancel: &CancellationToken) -> EngineResult<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}
