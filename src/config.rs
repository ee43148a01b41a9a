use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PAGE_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(-\d+)?(,\d+(-\d+)?)*$").expect("valid page range regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub bootstrap: Bootstrap,
    #[serde(default)]
    pub runner: Runner,
    #[serde(default)]
    pub translate: Translate,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub output: Output,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Fresh per-invocation tool settings: persisted defaults with one-shot
    /// overrides on top.
    pub fn tool_config(&self, overrides: &ToolOverrides) -> Result<ToolConfig> {
        overrides.apply(&self.tool)
    }
}

/// Settings handed to the translator for one run.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub source_language: String,
    pub target_language: String,
    pub service: String,
    /// 0 lets the tool pick.
    pub threads: u32,
    /// Bare name (resolved through PATH) or absolute path.
    pub executable: String,
    /// Empty means `<input dir>/translated-pdfs`.
    pub output_dir: String,
    /// Empty means all pages.
    pub page_range: String,
    /// Injected into the child environment, never logged.
    #[serde(skip_serializing)]
    pub secrets: BTreeMap<String, String>,
}

impl std::fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConfig")
            .field("source_language", &self.source_language)
            .field("target_language", &self.target_language)
            .field("service", &self.service)
            .field("threads", &self.threads)
            .field("executable", &self.executable)
            .field("output_dir", &self.output_dir)
            .field("page_range", &self.page_range)
            .field("secret_keys", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            source_language: "en".into(),
            target_language: "zh".into(),
            service: "bing".into(),
            threads: 4,
            executable: "pdf2zh".into(),
            output_dir: "".into(),
            page_range: "".into(),
            secrets: Default::default(),
        }
    }
}

impl ToolConfig {
    pub fn output_dir_override(&self) -> Option<PathBuf> {
        let trimmed = self.output_dir.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(crate::util::expand_tilde(trimmed))
        }
    }

    pub fn page_range(&self) -> Option<&str> {
        let trimmed = self.page_range.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// One-shot overrides; `None` keeps the persisted value.
#[derive(Debug, Clone, Default)]
pub struct ToolOverrides {
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub service: Option<String>,
    pub threads: Option<u32>,
    pub executable: Option<String>,
    pub output_dir: Option<String>,
    pub page_range: Option<String>,
}

impl ToolOverrides {
    pub fn apply(&self, base: &ToolConfig) -> Result<ToolConfig> {
        let mut cfg = base.clone();
        if let Some(v) = &self.source_language {
            cfg.source_language = v.clone();
        }
        if let Some(v) = &self.target_language {
            cfg.target_language = v.clone();
        }
        if let Some(v) = &self.service {
            cfg.service = v.clone();
        }
        if let Some(v) = self.threads {
            cfg.threads = v;
        }
        if let Some(v) = &self.executable {
            cfg.executable = v.clone();
        }
        if let Some(v) = &self.output_dir {
            cfg.output_dir = v.clone();
        }
        if let Some(v) = &self.page_range {
            cfg.page_range = v.clone();
        }
        cfg.page_range = validate_page_range(&cfg.page_range)?;
        Ok(cfg)
    }
}

/// Check a page selection like `1-3,5` and return it trimmed. Empty input
/// is valid and means every page.
pub fn validate_page_range(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || PAGE_RANGE_RE.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }
    Err(anyhow!(
        "invalid page range {trimmed:?}; use a form like \"1-3,5\" or \"1,2,3\""
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    pub timeout_ms: u64,
}
impl Default for Probe {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Bootstrap {
    pub python_version: String,
    pub tool_package: String,
    pub posix_installer_url: String,
    pub windows_installer_url: String,
    pub message_max_chars: usize,
}
impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            python_version: "3.12".into(),
            tool_package: "pdf2zh".into(),
            posix_installer_url: "https://astral.sh/uv/install.sh".into(),
            windows_installer_url: "https://astral.sh/uv/install.ps1".into(),
            message_max_chars: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Runner {
    pub terminate_grace_ms: u64,
    pub drain_timeout_ms: u64,
    pub transcript_lines: usize,
}
impl Default for Runner {
    fn default() -> Self {
        Self {
            terminate_grace_ms: 3_000,
            drain_timeout_ms: 500,
            transcript_lines: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Translate {
    /// 0 leaves concurrent translations unbounded.
    pub max_concurrent: usize,
    pub reject_url_inputs: bool,
}
impl Default for Translate {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            reject_url_inputs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub print_summary: bool,
    pub transcript_tail_on_failure: usize,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            print_summary: true,
            transcript_tail_on_failure: 40,
        }
    }
}
