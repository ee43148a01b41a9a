use crate::config::ToolConfig;
use crate::error::{EngineError, EngineResult};
use crate::probe::{InstallLayout, Probe};
use crate::process::{CommandSpec, Launcher, RunOutcome, StreamKind};
use crate::progress::{ProgressParser, ProgressTracker, TqdmParser};
use crate::report::TranslatedPdf;
use crate::sink::ProgressSink;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Folder created next to the input when no output directory is configured.
pub const OUTPUT_SUBDIR: &str = "translated-pdfs";

const STDERR_TAIL_LINES: usize = 20;

pub type TranslationResult = EngineResult<TranslatedPdf>;

pub fn output_dir_for(input: &Path, cfg: &ToolConfig) -> PathBuf {
    if let Some(dir) = cfg.output_dir_override() {
        return dir;
    }
    input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(OUTPUT_SUBDIR)
}

/// `<exe> <input> -o <dir> -li <src> -lo <tgt> -s <service> [-t n] [-p range]`,
/// run inside the output directory with the configured secrets in its
/// environment.
pub fn build_invocation(
    executable: &Path,
    input: &Path,
    out_dir: &Path,
    cfg: &ToolConfig,
) -> CommandSpec {
    let mut spec = CommandSpec::new(executable)
        .arg(input.to_string_lossy())
        .args(["-o".to_string(), out_dir.to_string_lossy().into_owned()])
        .args(["-li", cfg.source_language.as_str()])
        .args(["-lo", cfg.target_language.as_str()])
        .args(["-s", cfg.service.as_str()]);
    if cfg.threads > 0 {
        spec = spec.args(["-t".to_string(), cfg.threads.to_string()]);
    }
    if let Some(range) = cfg.page_range() {
        spec = spec.args(["-p", range]);
    }
    spec.cwd(out_dir).envs(&cfg.secrets)
}

pub struct Translator<P: Probe, L: Launcher> {
    probe: P,
    launcher: L,
    layout: InstallLayout,
    parser: Box<dyn ProgressParser>,
    limit: Option<Arc<Semaphore>>,
}

impl<P: Probe, L: Launcher> Translator<P, L> {
    pub fn new(probe: P, launcher: L, layout: InstallLayout) -> Self {
        Self {
            probe,
            launcher,
            layout,
            parser: Box::new(TqdmParser::new()),
            limit: None,
        }
    }

    pub fn with_parser(mut self, parser: impl ProgressParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Cap how many translations run at once; 0 removes the cap.
    pub fn with_concurrency_limit(mut self, max: usize) -> Self {
        self.limit = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        self
    }

    pub async fn translate(
        &self,
        input: &Path,
        cfg: &ToolConfig,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> TranslationResult {
        let _permit = match &self.limit {
            Some(sem) => tokio::select! {
                permit = sem.clone().acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            },
            None => None,
        };

        let candidates = self.layout.translate_candidates(&cfg.executable);
        let Some(hit) = self.probe.find_executable(&candidates, sink).await else {
            warn!("pdf2zh not found among {candidates:?}");
            return Err(EngineError::NotInstalled);
        };

        let input = std::path::absolute(input).unwrap_or_else(|_| input.to_path_buf());
        let input = input.as_path();
        let out_dir = output_dir_for(input, cfg);
        let out_dir = std::path::absolute(&out_dir).unwrap_or(out_dir);
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|source| EngineError::OutputDir {
                path: out_dir.clone(),
                source,
            })?;

        let spec = build_invocation(&hit.path, input, &out_dir, cfg);
        sink.log_line(&format!("Output directory: {}", out_dir.display()));
        sink.log_line(&format!("Executing: {}", spec.display()));
        info!(input = %input.display(), out = %out_dir.display(), "translating");

        let mut tracker = ProgressTracker::new();
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let outcome = {
            let parser = &*self.parser;
            let mut on_line = |kind: StreamKind, line: &str| match kind {
                StreamKind::Stdout => sink.log_line(line),
                StreamKind::Stderr => {
                    sink.log_line(&format!("[STDERR] {line}"));
                    if stderr_tail.len() == STDERR_TAIL_LINES {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line.to_string());
                    if let Some(update) = parser.parse(line).and_then(|s| tracker.observe(&s)) {
                        sink.progress(&update);
                    }
                }
            };
            self.launcher.run(&spec, cancel, &mut on_line).await
        };

        match outcome? {
            RunOutcome::Cancelled => {
                sink.log_line("[INFO] Translation cancelled by user");
                Err(EngineError::Cancelled)
            }
            RunOutcome::Exited(code) => {
                let shown = code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "<signal>".into());
                sink.log_line(&format!("Process exited with code: {shown}"));
                if code == Some(0) {
                    debug!("last progress {}%", tracker.last_percent());
                    Ok(TranslatedPdf::for_input(input, &out_dir))
                } else {
                    Err(EngineError::ExecutionFailed {
                        code,
                        stderr_tail: Vec::from(stderr_tail).join("\n"),
                    })
                }
            }
        }
    }
}
