//! Interpreter process execution with a hard timeout.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::classifier::ClassifiedError;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::template::Language;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Inline { code: String },
    File { path: PathBuf },
    Compiled { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    /// Parse stdout as JSON when it is valid JSON, else keep text.
    Json,
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub mode: ExecutionMode,
    pub language: Language,
    pub args: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub format: OutputFormat,
}

impl ExecutionRequest {
    pub fn inline(code: impl Into<String>) -> Self {
        Self::new(ExecutionMode::Inline { code: code.into() })
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(ExecutionMode::File { path: path.into() })
    }

    pub fn compiled(path: impl Into<PathBuf>) -> Self {
        Self::new(ExecutionMode::Compiled { path: path.into() })
    }

    fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            language: Language::AppleScript,
            args: Vec::new(),
            timeout_ms: None,
            format: OutputFormat::Text,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn script_path(&self) -> Option<&Path> {
        match &self.mode {
            ExecutionMode::Inline { .. } => None,
            ExecutionMode::File { path } | ExecutionMode::Compiled { path } => Some(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptOutput {
    Text(String),
    Json(Value),
}

impl ScriptOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScriptOutput::Text(s) => Some(s),
            ScriptOutput::Json(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub execution_time_ms: u64,
    pub timeout_used_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
}

/// Outcome of one script run. Build with [`ExecutionResult::ok`] or
/// [`ExecutionResult::failed`] so `output` and `error` never coexist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ScriptOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    pub fn ok(output: ScriptOutput, metadata: ExecutionMetadata) -> Self {
        Self { success: true, output: Some(output), error: None, metadata }
    }

    pub fn failed(error: ClassifiedError, metadata: ExecutionMetadata) -> Self {
        Self { success: false, output: None, error: Some(error), metadata }
    }

    pub fn status(&self) -> &'static str {
        if self.success {
            "success"
        } else {
            "failed"
        }
    }
}

/// `min(requested.unwrap_or(default), max)`.
pub fn validate_timeout(requested: Option<u64>, default_ms: u64, max_ms: u64) -> u64 {
    requested.unwrap_or(default_ms).min(max_ms)
}

/// Turn a failure to start a process into a `system_error` result carrying
/// the raw message; every other outcome passes through.
pub fn recover_spawn_failure(outcome: Result<ExecutionResult>, timeout_ms: u64) -> Result<ExecutionResult> {
    match outcome {
        Err(e @ Error::Spawn { .. }) => {
            warn!(error = %e, "process could not be started");
            let metadata = ExecutionMetadata { timeout_used_ms: timeout_ms, ..ExecutionMetadata::default() };
            Ok(ExecutionResult::failed(ClassifiedError::system(e.to_string()), metadata))
        }
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    interpreter: PathBuf,
    default_timeout_ms: u64,
    max_timeout_ms: u64,
}

impl ProcessExecutor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            default_timeout_ms: settings.default_timeout_ms,
            max_timeout_ms: settings.max_timeout_ms,
        }
    }

    pub fn effective_timeout(&self, requested: Option<u64>) -> u64 {
        validate_timeout(requested, self.default_timeout_ms, self.max_timeout_ms)
    }

    fn build_args(req: &ExecutionRequest) -> Vec<String> {
        let mut args = Vec::with_capacity(req.args.len() + 4);
        if req.language == Language::JavaScript {
            args.push("-l".to_string());
            args.push("JavaScript".to_string());
        }
        match &req.mode {
            ExecutionMode::Inline { code } => {
                args.push("-e".to_string());
                args.push(code.clone());
            }
            ExecutionMode::File { path } | ExecutionMode::Compiled { path } => {
                args.push(path.to_string_lossy().into_owned());
            }
        }
        args.extend(req.args.iter().cloned());
        args
    }

    /// Script failures come back as `Ok` with `success == false`; only a
    /// failure to start the interpreter is an `Err`.
    pub async fn execute(&self, req: ExecutionRequest) -> Result<ExecutionResult> {
        let timeout_ms = self.effective_timeout(req.timeout_ms);
        let mut metadata = ExecutionMetadata {
            execution_time_ms: 0,
            timeout_used_ms: timeout_ms,
            script_path: req.script_path().map(Path::to_path_buf),
        };

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(Self::build_args(&req))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.interpreter.display().to_string(),
            source,
        })?;
        debug!(pid = child.id(), timeout_ms, "spawned interpreter");

        // Dropping the wait future on expiry drops the child, which kills it.
        let waited = timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await;
        metadata.execution_time_ms = started.elapsed().as_millis() as u64;

        let out = match waited {
            Err(_) => {
                warn!(timeout_ms, "script timed out, process killed");
                return Ok(ExecutionResult::failed(ClassifiedError::timeout(timeout_ms), metadata));
            }
            Ok(out) => out?,
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
            let code = out
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let error = ClassifiedError::from_diagnostic(&stderr)
                .with_code(code)
                .with_details(stderr);
            debug!(kind = %error.kind, "script failed");
            return Ok(ExecutionResult::failed(error, metadata));
        }

        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok(ExecutionResult::ok(shape_output(stdout, req.format), metadata))
    }
}

fn shape_output(stdout: String, format: OutputFormat) -> ScriptOutput {
    match format {
        OutputFormat::Text => ScriptOutput::Text(stdout),
        OutputFormat::Json => match serde_json::from_str::<Value>(&stdout) {
            Ok(v) => ScriptOutput::Json(v),
            Err(_) => ScriptOutput::Text(stdout),
        },
    }
}
