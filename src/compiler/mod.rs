//! Compile-then-run pipeline for rendered scripts.
//!
//! Stages: Rendered -> TempSourceWritten -> Compiled | CompileFailed ->
//! Executed | RuntimeFailed -> CleanedUp. Temp files are owned by
//! [`TempArtifact`] guards, so every exit path removes them.

use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    process::Stdio,
    sync::OnceLock,
    time::{Duration, Instant},
};

use regex::Regex;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::classifier::{ClassifiedError, ErrorKind};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::executor::{
    recover_spawn_failure, ExecutionMetadata, ExecutionRequest, ExecutionResult, OutputFormat,
    ProcessExecutor,
};
use crate::recorder::DebugRecorder;
use crate::scripts::{COMPILED_EXT, SOURCE_EXT};
use crate::template::Language;

/// A uniquely named temp file deleted on drop.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn with_contents(prefix: &str, ext: &str, bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(&format!(".{}", ext))
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(Self { path })
    }

    /// Reserve a unique path without leaving a file behind, for tools that
    /// create their own output.
    pub fn reserve(prefix: &str, ext: &str) -> Result<Self> {
        let artifact = Self::with_contents(prefix, ext, &[])?;
        fs::remove_file(&artifact.path)?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "temp file cleanup failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Rendered,
    TempSourceWritten,
    Compiled,
    CompileFailed,
    Executed,
    RuntimeFailed,
    CleanedUp,
}

/// One rendered script headed for compilation.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub name: String,
    pub source: String,
    pub language: Language,
    pub args: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub format: OutputFormat,
    /// Where the template came from, reported in result metadata.
    pub script_path: Option<PathBuf>,
}

impl CompileJob {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            language: Language::AppleScript,
            args: Vec::new(),
            timeout_ms: None,
            format: OutputFormat::Text,
            script_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerPipeline {
    compiler: PathBuf,
    executor: ProcessExecutor,
    context_lines: usize,
    recorder: Option<DebugRecorder>,
}

impl CompilerPipeline {
    pub fn new(settings: &Settings, executor: ProcessExecutor) -> Self {
        Self {
            compiler: settings.compiler.clone(),
            executor,
            context_lines: settings.debug_context_lines,
            recorder: DebugRecorder::from_settings(settings),
        }
    }

    pub fn with_recorder(mut self, recorder: Option<DebugRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// A compiler or interpreter that cannot be started is reported as a
    /// `system_error` result, and is recorded like any other failure.
    pub async fn run(&self, job: CompileJob) -> Result<ExecutionResult> {
        trace_stage(&job.name, PipelineStage::Rendered);
        let timeout_ms = self.executor.effective_timeout(job.timeout_ms);
        let outcome = self.compile_and_execute(&job, timeout_ms).await;
        trace_stage(&job.name, PipelineStage::CleanedUp);

        let mut result = recover_spawn_failure(outcome, timeout_ms)?;
        if result.metadata.script_path.is_none() {
            result.metadata.script_path = job.script_path.clone();
        }

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(&job.name, &job.source, job.language, &result).await {
                warn!(script = %job.name, error = %e, "debug record not written");
            }
        }
        Ok(result)
    }

    /// Compiling and running share one `timeout_ms` budget.
    async fn compile_and_execute(&self, job: &CompileJob, timeout_ms: u64) -> Result<ExecutionResult> {
        let prefix = format!("osabridge-{}-", sanitize(&job.name));
        let source_file = TempArtifact::reserve(&prefix, SOURCE_EXT)?;
        tokio::fs::write(source_file.path(), job.source.as_bytes()).await?;
        trace_stage(&job.name, PipelineStage::TempSourceWritten);

        let compiled_file = TempArtifact::reserve(&prefix, COMPILED_EXT)?;
        let started = Instant::now();

        if let Some(failure) = self
            .compile(job, source_file.path(), compiled_file.path(), timeout_ms)
            .await?
        {
            trace_stage(&job.name, PipelineStage::CompileFailed);
            return Ok(failure);
        }
        trace_stage(&job.name, PipelineStage::Compiled);

        let remaining_ms = timeout_ms.saturating_sub(elapsed_ms(started));
        let request = ExecutionRequest::compiled(compiled_file.path())
            .with_language(job.language)
            .with_args(job.args.clone())
            .with_timeout(Some(remaining_ms))
            .with_format(job.format);
        let mut result = self.executor.execute(request).await?;

        // Report the whole pipeline against the caller's budget.
        result.metadata.execution_time_ms = elapsed_ms(started);
        result.metadata.timeout_used_ms = timeout_ms;
        if let Some(error) = result.error.as_mut() {
            if error.kind == ErrorKind::Timeout && error.code.is_none() {
                *error = ClassifiedError::timeout(timeout_ms);
            }
        }
        // the compiled temp file is gone by the time the caller sees this
        result.metadata.script_path = job.script_path.clone();
        trace_stage(
            &job.name,
            if result.success { PipelineStage::Executed } else { PipelineStage::RuntimeFailed },
        );
        Ok(result)
    }

    /// `Ok(None)` when compilation succeeded.
    async fn compile(
        &self,
        job: &CompileJob,
        source: &Path,
        output: &Path,
        timeout_ms: u64,
    ) -> Result<Option<ExecutionResult>> {
        let mut cmd = Command::new(&self.compiler);
        if job.language == Language::JavaScript {
            cmd.args(["-l", "JavaScript"]);
        }
        cmd.arg("-o")
            .arg(output)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|err| Error::Spawn {
            program: self.compiler.display().to_string(),
            source: err,
        })?;
        let waited = timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await;
        let metadata = ExecutionMetadata {
            execution_time_ms: elapsed_ms(started),
            timeout_used_ms: timeout_ms,
            script_path: job.script_path.clone(),
        };

        let out = match waited {
            Err(_) => {
                warn!(script = %job.name, timeout_ms, "compiler timed out");
                return Ok(Some(ExecutionResult::failed(ClassifiedError::timeout(timeout_ms), metadata)));
            }
            Ok(out) => out?,
        };
        if out.status.success() {
            return Ok(None);
        }

        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        let mut details = stderr.clone();
        if let Some(line) = diagnostic_line(&stderr) {
            if let Some(excerpt) = source_excerpt(&job.source, line, self.context_lines) {
                details.push_str("\n\nSource context:\n");
                details.push_str(&excerpt);
            }
        }
        let mut error = ClassifiedError::from_diagnostic(&stderr).with_details(details);
        if let Some(code) = out.status.code() {
            error = error.with_code(code.to_string());
        }
        debug!(script = %job.name, kind = %error.kind, "compile failed");
        Ok(Some(ExecutionResult::failed(error, metadata)))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn trace_stage(name: &str, stage: PipelineStage) {
    debug!(script = %name, ?stage, "pipeline");
}

/// File-name-safe form of a script name.
pub(crate) fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|:)\s*(\d+):").expect("valid regex"))
}

/// Line number from a `<line>:` or `<file>:<line>:` diagnostic prefix.
pub fn diagnostic_line(stderr: &str) -> Option<usize> {
    line_re()
        .captures(stderr)
        .and_then(|c| c[1].parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// Up to `context` lines either side of `line` (1-based), offending line marked `>`.
pub fn source_excerpt(source: &str, line: usize, context: usize) -> Option<String> {
    if context == 0 {
        return None;
    }
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return None;
    }
    let first = line.saturating_sub(context).max(1);
    let last = (line + context).min(lines.len());
    let width = last.to_string().len();

    let mut out = String::new();
    for n in first..=last {
        let marker = if n == line { '>' } else { ' ' };
        out.push_str(&format!("{} {:>width$} | {}\n", marker, n, lines[n - 1], width = width));
    }
    Some(out)
}
