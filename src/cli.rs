use crate::{
    bootstrap::{BootstrapSettings, Bootstrapper},
    config::{Config, ToolOverrides},
    error::EngineError,
    probe::{DependencyProbe, InstallLayout},
    process::{platform_terminator, ProcessRunner},
    report::RunSummary,
    sink::TracingSink,
    translate::Translator,
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Exit status for a run the user interrupted.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "pdf-translate")]
#[command(about = "Translate PDFs with pdf2zh, installing uv and pdf2zh on demand")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pdf-translate.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report whether uv and pdf2zh are installed.
    Status {},
    /// Install uv and pdf2zh if they are missing.
    Setup {},
    Translate {
        #[arg(long, required = true)]
        input: Vec<PathBuf>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        threads: Option<u32>,
        /// Pages to translate, e.g. "1-3,5". Empty means all pages.
        #[arg(long)]
        pages: Option<String>,
        #[arg(long)]
        out_dir: Option<String>,
        /// pdf2zh executable (name on PATH or absolute path).
        #[arg(long)]
        exe: Option<String>,
    },
}

pub async fn dispatch(args: Args) -> Result<ExitCode> {
    let cfg = match resolve_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            let _ = init_logging(&args, &Config::default(), None);
            return Err(err);
        }
    };
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match &args.cmd {
        Command::Status {} => status(&cfg).await,
        Command::Setup {} => setup(&cfg).await,
        Command::Translate {
            input,
            source,
            target,
            service,
            threads,
            pages,
            out_dir,
            exe,
        } => {
            let overrides = ToolOverrides {
                source_language: source.clone(),
                target_language: target.clone(),
                service: service.clone(),
                threads: *threads,
                executable: exe.clone(),
                output_dir: out_dir.clone(),
                page_range: pages.clone(),
            };
            translate(&cfg, input, &overrides).await
        }
    }
}

fn resolve_config(user: Option<&Path>) -> Result<Config> {
    if let Some(p) = user {
        return Config::load(p);
    }
    let default = PathBuf::from("pdf-translate.toml");
    if default.exists() {
        Config::load(&default)
    } else {
        Ok(Config::default())
    }
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(crate::util::expand_tilde(&cfg.logging.file_path));
    }
    Some(PathBuf::from("pdf-translate.log"))
}

/// Cancelled on the first Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling");
            trigger.cancel();
        }
    });
    token
}

fn runner(cfg: &Config) -> ProcessRunner {
    ProcessRunner::from_config(cfg, platform_terminator())
}

fn bootstrapper(cfg: &Config) -> Bootstrapper<DependencyProbe, ProcessRunner> {
    Bootstrapper::new(
        DependencyProbe::from_config(cfg),
        runner(cfg),
        InstallLayout::detect(),
        BootstrapSettings::from_config(cfg),
    )
}

async fn status(cfg: &Config) -> Result<ExitCode> {
    let sink = TracingSink::new(cfg.runner.transcript_lines);
    let status = bootstrapper(cfg).status(&sink).await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}

async fn setup(cfg: &Config) -> Result<ExitCode> {
    let sink = TracingSink::new(cfg.runner.transcript_lines);
    let cancel = cancel_on_interrupt();
    match bootstrapper(cfg).ensure_ready(&sink, &cancel).await {
        Ok(path) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": "ready",
                    "tool_path": path,
                }))?
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(EngineError::Cancelled) => {
            info!("{}", EngineError::Cancelled.user_message());
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(err) => {
            report_transcript(cfg, &sink, &err);
            Err(anyhow!(err.user_message()))
        }
    }
}

async fn translate(
    cfg: &Config,
    inputs: &[PathBuf],
    overrides: &ToolOverrides,
) -> Result<ExitCode> {
    let tool_cfg = cfg.tool_config(overrides)?;
    let mut absolute = Vec::with_capacity(inputs.len());
    for input in inputs {
        validate_input(cfg, input)?;
        absolute.push(
            std::path::absolute(input)
                .with_context(|| format!("resolving input path: {}", input.display()))?,
        );
    }

    let translator = Translator::new(
        DependencyProbe::from_config(cfg),
        runner(cfg),
        InstallLayout::detect(),
    )
    .with_concurrency_limit(cfg.translate.max_concurrent);
    let cancel = cancel_on_interrupt();

    let runs = absolute.iter().map(|input| {
        let translator = &translator;
        let tool_cfg = &tool_cfg;
        let cancel = &cancel;
        let span = info_span!("translate", input = %input.display());
        async move {
            let sink = TracingSink::new(cfg.runner.transcript_lines);
            let started = now_rfc3339();
            let result = translator.translate(input, tool_cfg, &sink, cancel).await;
            match &result {
                Ok(out) => info!("translated: {}", out.mono.display()),
                Err(err) if err.is_cancelled() => info!("{}", err.user_message()),
                Err(err) => {
                    error!("{}", err.user_message());
                    report_transcript(cfg, &sink, err);
                }
            }
            RunSummary::new(input, started, now_rfc3339(), &result)
        }
        .instrument(span)
    });
    let summaries = join_all(runs).await;

    if cfg.output.print_summary {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }

    let failed = summaries.iter().filter(|s| s.status == "failed").count();
    let cancelled = summaries.iter().filter(|s| s.status == "cancelled").count();
    if failed > 0 {
        return Err(anyhow!("{failed} of {} translations failed", summaries.len()));
    }
    if cancelled > 0 {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(ExitCode::SUCCESS)
}

fn report_transcript(cfg: &Config, sink: &TracingSink, err: &EngineError) {
    if !matches!(
        err,
        EngineError::ExecutionFailed { .. } | EngineError::InstallFailed { .. }
    ) {
        return;
    }
    let tail = sink.transcript().tail(cfg.output.transcript_tail_on_failure);
    if tail.is_empty() {
        return;
    }
    error!("last {} transcript lines:\n{}", tail.len(), tail.join("\n"));
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.translate.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are not supported: {input_str}"));
    }

    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }

    if let Some(ext) = input.extension().and_then(|s| s.to_str()) {
        if !ext.eq_ignore_ascii_case("pdf") {
            return Err(anyhow!("input is not a PDF: {}", input.display()));
        }
    } else {
        warn!("input has no extension; assuming PDF: {}", input.display());
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}
