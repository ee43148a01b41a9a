use crate::error::{EngineError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the translator is expected to have written its output. Computed
/// from the input name, not checked on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedPdf {
    pub mono: PathBuf,
    pub dual: PathBuf,
}

impl TranslatedPdf {
    pub fn for_input(input: &Path, out_dir: &Path) -> Self {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        Self {
            mono: out_dir.join(format!("{stem}-mono.pdf")),
            dual: out_dir.join(format!("{stem}-dual.pdf")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub input: PathBuf,
    pub status: String,
    pub started: String,
    pub finished: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<TranslatedPdf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunSummary {
    pub fn new(
        input: &Path,
        started: String,
        finished: String,
        result: &Result<TranslatedPdf, EngineError>,
    ) -> Self {
        let (status, output, error_kind, message) = match result {
            Ok(out) => ("ok", Some(out.clone()), None, None),
            Err(err) if err.is_cancelled() => {
                ("cancelled", None, Some(err.kind()), Some(err.user_message()))
            }
            Err(err) => ("failed", None, Some(err.kind()), Some(err.user_message())),
        };
        Self {
            input: input.to_path_buf(),
            status: status.to_string(),
            started,
            finished,
            output,
            error_kind,
            message,
        }
    }
}
