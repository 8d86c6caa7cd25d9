//! Entry points a tool host calls: run a named script, run raw code, read a
//! scripting dictionary.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::classifier::ClassifiedError;
use crate::compiler::{CompileJob, CompilerPipeline};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::executor::{
    recover_spawn_failure, ExecutionMetadata, ExecutionRequest, ExecutionResult, OutputFormat,
    ProcessExecutor,
};
use crate::recorder::DebugRecorder;
use crate::scripts::{ResolvedScript, ScriptLocator, ScriptReference};
use crate::sdef::{self, DictionaryView, Projection};
use crate::template::{self, Language, RenderContext};

/// A named-script call.
#[derive(Debug, Clone, Default)]
pub struct ScriptInvocation {
    pub name: String,
    pub context: RenderContext,
    pub args: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub prefer_compiled: bool,
    pub format: OutputFormat,
}

impl ScriptInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }
}

#[derive(Debug)]
pub struct ScriptRunner {
    settings: Settings,
    locator: ScriptLocator,
    executor: ProcessExecutor,
    pipeline: CompilerPipeline,
    recorder: Option<DebugRecorder>,
}

impl ScriptRunner {
    pub fn for_plugin(plugin_dir: &Path, settings: Settings) -> Self {
        Self::with_locator(ScriptLocator::for_plugin(plugin_dir), settings)
    }

    /// Runner for the plugin a reference points into, plus the invocation for it.
    pub fn for_reference(reference: &ScriptReference, settings: Settings) -> (Self, ScriptInvocation) {
        (
            Self::for_plugin(&reference.plugin_dir, settings),
            ScriptInvocation::new(reference.name.clone()),
        )
    }

    pub fn with_locator(locator: ScriptLocator, settings: Settings) -> Self {
        let executor = ProcessExecutor::new(&settings);
        let recorder = DebugRecorder::from_settings(&settings);
        let pipeline =
            CompilerPipeline::new(&settings, executor.clone()).with_recorder(recorder.clone());
        Self { settings, locator, executor, pipeline, recorder }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn locator(&self) -> &ScriptLocator {
        &self.locator
    }

    /// Resolve, render and execute a named script.
    ///
    /// Not-found and missing template variables are `Err`; anything that
    /// happens once a process is involved is reported in the result.
    pub async fn run_script(&self, inv: ScriptInvocation) -> Result<ExecutionResult> {
        let resolved = self
            .locator
            .resolve_with(&inv.name, inv.prefer_compiled)?
            .ok_or_else(|| Error::ScriptNotFound(inv.name.clone()))?;
        info!(script = %inv.name, origin = resolved.origin(), "running script");

        match resolved {
            ResolvedScript::InlineText { source, is_template: true, .. } => {
                let rendered = template::render(&source, &inv.context)?;
                self.compile_and_run(&inv, rendered, None).await
            }
            ResolvedScript::InlineText { source, .. } => {
                let req = ExecutionRequest::inline(source.clone());
                self.direct(&inv.name, &source, self.request(req, &inv)).await
            }
            ResolvedScript::FileSource { path } => {
                let source = tokio::fs::read_to_string(&path).await?;
                if template::has_placeholders(&source) {
                    let rendered = template::render(&source, &inv.context)?;
                    self.compile_and_run(&inv, rendered, Some(path)).await
                } else {
                    let req = self.request(ExecutionRequest::file(path), &inv);
                    self.direct(&inv.name, &source, req).await
                }
            }
            ResolvedScript::FileCompiled { path } => {
                let label = path.display().to_string();
                self.direct(&inv.name, &label, self.request(ExecutionRequest::compiled(path), &inv)).await
            }
            binary @ ResolvedScript::InlineBinary { .. } => {
                let Some(artifact) = binary.materialize()? else {
                    return Err(Error::ScriptNotFound(inv.name.clone()));
                };
                let req = self.request(ExecutionRequest::compiled(artifact.path()), &inv);
                let mut result = self.direct(&inv.name, "<compiled inline script>", req).await?;
                // temp .scpt is deleted when `artifact` drops
                result.metadata.script_path = None;
                Ok(result)
            }
        }
    }

    /// Run caller-supplied code, if configuration allows it.
    pub async fn run_code(
        &self,
        code: &str,
        language: Language,
        context: &RenderContext,
        timeout_ms: Option<u64>,
    ) -> Result<ExecutionResult> {
        if !self.settings.allow_raw_script {
            let metadata = ExecutionMetadata {
                timeout_used_ms: self.executor.effective_timeout(timeout_ms),
                ..ExecutionMetadata::default()
            };
            return Ok(ExecutionResult::failed(
                ClassifiedError::disabled("raw script execution"),
                metadata,
            ));
        }
        let code = template::render_as(code, context, language)?;
        let req = ExecutionRequest::inline(code.clone())
            .with_language(language)
            .with_timeout(timeout_ms);
        self.direct("inline", &code, req).await
    }

    pub async fn read_dictionary(&self, target: &str, projection: &Projection) -> Result<DictionaryView> {
        read_dictionary(&self.settings, target, projection).await
    }

    fn request(&self, req: ExecutionRequest, inv: &ScriptInvocation) -> ExecutionRequest {
        req.with_args(inv.args.clone())
            .with_timeout(inv.timeout_ms)
            .with_format(inv.format)
    }

    async fn compile_and_run(
        &self,
        inv: &ScriptInvocation,
        rendered: String,
        script_path: Option<PathBuf>,
    ) -> Result<ExecutionResult> {
        let job = CompileJob {
            args: inv.args.clone(),
            timeout_ms: inv.timeout_ms,
            format: inv.format,
            script_path,
            ..CompileJob::new(inv.name.clone(), rendered)
        };
        self.pipeline.run(job).await
    }

    async fn direct(&self, name: &str, source: &str, req: ExecutionRequest) -> Result<ExecutionResult> {
        let timeout_ms = self.executor.effective_timeout(req.timeout_ms);
        let language = req.language;
        let result = recover_spawn_failure(self.executor.execute(req).await, timeout_ms)?;
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(name, source, language, &result).await {
                warn!(script = %name, error = %e, "debug record not written");
            }
        }
        Ok(result)
    }
}

/// Read a dictionary from an `.sdef` file, or fetch it from an application
/// with the configured `sdef` tool.
pub async fn read_dictionary(
    settings: &Settings,
    target: &str,
    projection: &Projection,
) -> Result<DictionaryView> {
    let path = Path::new(target);
    let bytes = if path.is_file() {
        tokio::fs::read(path).await?
    } else {
        sdef::fetch_dictionary(&settings.sdef_tool, target, settings.default_timeout_ms).await?
    };
    sdef::load_and_project(&bytes, &application_name(target), projection)
}

/// "/Applications/Notes.app" -> "Notes"; "Finder" -> "Finder".
fn application_name(target: &str) -> String {
    Path::new(target.trim_end_matches('/'))
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorKind;
    use crate::scripts::InlineStore;
    use serde_json::json;

    fn runner_with(entries: &[(&str, &str)], settings: Settings) -> ScriptRunner {
        let store = InlineStore::from_entries(
            entries.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        );
        ScriptRunner::with_locator(ScriptLocator::with_store(store), settings)
    }

    fn no_interpreter() -> Settings {
        Settings {
            interpreter: PathBuf::from("/nonexistent/osascript"),
            compiler: PathBuf::from("/nonexistent/osacompile"),
            ..Settings::default()
        }
    }

    #[test]
    fn test_application_name() {
        assert_eq!(application_name("/Applications/Notes.app"), "Notes");
        assert_eq!(application_name("/Applications/Notes.app/"), "Notes");
        assert_eq!(application_name("Finder"), "Finder");
        assert_eq!(application_name("/tmp/Mail.sdef"), "Mail");
    }

    #[tokio::test]
    async fn test_unknown_script_is_not_found() {
        let runner = runner_with(&[], no_interpreter());
        let err = runner.run_script(ScriptInvocation::new("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::ScriptNotFound(ref n) if n == "ghost"));
    }

    #[tokio::test]
    async fn test_missing_variable_fails_before_spawn() {
        let runner = runner_with(&[("greet.applescript", "display dialog ${msg}")], no_interpreter());
        let err = runner.run_script(ScriptInvocation::new("greet")).await.unwrap_err();
        assert!(matches!(err, Error::MissingTemplateVariable(ref n) if n == "msg"));
    }

    #[tokio::test]
    async fn test_spawn_failure_becomes_system_error() {
        let runner = runner_with(&[("plain.applescript", "return 1")], no_interpreter());
        let result = runner.run_script(ScriptInvocation::new("plain")).await.unwrap();
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::SystemError);
        assert!(error.message.contains("/nonexistent/osascript"));
    }

    #[tokio::test]
    async fn test_raw_code_disabled() {
        let settings = Settings { allow_raw_script: false, ..no_interpreter() };
        let runner = runner_with(&[], settings);
        let ctx = json!({}).as_object().cloned().unwrap();
        let result = runner
            .run_code("return 1", Language::AppleScript, &ctx, Some(5_000))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::Disabled);
        assert_eq!(result.metadata.timeout_used_ms, 5_000);
    }
}
