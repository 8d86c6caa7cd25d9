//! End-to-end runs against shell stubs standing in for osascript/osacompile.
#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Instant,
};

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;

use osabridge::classifier::ErrorKind;
use osabridge::config::Settings;
use osabridge::executor::ScriptOutput;
use osabridge::runner::{ScriptInvocation, ScriptRunner};
use osabridge::scripts::{InlineStore, ScriptLocator};
use osabridge::template::{Language, RenderContext};

/// Echoes the script body (and any args). `DENY` in the body fails with a
/// permission diagnostic, `SLEEP` hangs.
const OSASCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "-l" ]; then shift 2; fi
if [ "$1" = "-e" ]; then body="$2"; shift 2; else body=$(cat "$1"); shift; fi
case "$body" in
  *DENY*) echo "3:1: execution error: Not authorized to send Apple events to Notes. (-1743)" >&2; exit 1 ;;
  *SLEEP*) exec sleep 10 ;;
esac
printf '%s' "$body"
for a in "$@"; do printf ' %s' "$a"; done
"#;

/// Copies source to output; a line containing `BROKEN` is a syntax error and
/// `SLOWCOMPILE` takes a second.
const OSACOMPILE: &str = r#"#!/bin/sh
if [ "$1" = "-l" ]; then shift 2; fi
out="$2"; src="$3"
if grep -q SLOWCOMPILE "$src"; then sleep 1; fi
line=$(grep -n BROKEN "$src" | head -n 1 | cut -d: -f1)
if [ -n "$line" ]; then
  echo "$line:1: syntax error: Expected end of line but found identifier. (-2741)" >&2
  exit 1
fi
cp "$src" "$out"
"#;

// All stubs are written before any test spawns a process, so no child can
// inherit an open write handle to one of them.
fn stub_dir() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        for (name, body) in [("osascript", OSASCRIPT), ("osacompile", OSACOMPILE)] {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
    .path()
}

fn settings() -> Settings {
    let stubs = stub_dir();
    Settings {
        interpreter: stubs.join("osascript"),
        compiler: stubs.join("osacompile"),
        debug_context_lines: 2,
        ..Settings::default()
    }
}

fn inline_runner(entries: &[(&str, &str)], settings: Settings) -> ScriptRunner {
    let store = InlineStore::from_entries(entries.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    ScriptRunner::with_locator(ScriptLocator::with_store(store), settings)
}

fn ctx(value: serde_json::Value) -> RenderContext {
    value.as_object().cloned().unwrap_or_default()
}

fn text(output: &Option<ScriptOutput>) -> &str {
    output.as_ref().and_then(ScriptOutput::as_text).unwrap_or_default()
}

fn leftover_temp_files(tag: &str) -> Vec<PathBuf> {
    let prefix = format!("osabridge-{}", tag);
    fs::read_dir(std::env::temp_dir())
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with(&prefix)))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_template_rendered_compiled_and_run() -> Result<()> {
    let runner = inline_runner(
        &[("notes/create.applescript", "set t to ${title}\nset n to ${tags}\nreturn t")],
        settings(),
    );
    let mut inv = ScriptInvocation::new("notes/create");
    inv.context = ctx(json!({"title": "Say \"hi\"", "tags": ["a", 1, true]}));

    let result = runner.run_script(inv).await?;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        text(&result.output),
        "set t to \"Say \\\"hi\\\"\"\nset n to {\"a\", 1, true}\nreturn t"
    );
    assert_eq!(result.metadata.timeout_used_ms, 30_000);
    assert!(leftover_temp_files("notes_create").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_plain_script_runs_inline_with_args() -> Result<()> {
    let runner = inline_runner(&[("echo.applescript", "return 1")], settings());
    let mut inv = ScriptInvocation::new("echo");
    inv.args = vec!["a".into(), "b c".into()];

    let result = runner.run_script(inv).await?;
    assert!(result.success);
    assert_eq!(text(&result.output), "return 1 a b c");
    Ok(())
}

#[tokio::test]
async fn test_permission_failure_is_classified() -> Result<()> {
    let runner = inline_runner(&[("deny.applescript", "tell app \"Notes\" to DENY")], settings());

    let result = runner.run_script(ScriptInvocation::new("deny")).await?;
    assert!(!result.success);
    assert!(result.output.is_none());
    let error = result.error.expect("error present");
    assert_eq!(error.kind, ErrorKind::Permission);
    assert_eq!(error.message, "execution error: Not authorized to send Apple events to Notes. (-1743)");
    assert_eq!(error.code.as_deref(), Some("1"));
    assert!(error.details.unwrap_or_default().contains("(-1743)"));
    assert!(!error.hint.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_timeout_kills_process() -> Result<()> {
    let runner = inline_runner(&[("slow.applescript", "SLEEP")], settings());
    let mut inv = ScriptInvocation::new("slow");
    inv.timeout_ms = Some(200);

    let started = Instant::now();
    let result = runner.run_script(inv).await?;
    assert!(started.elapsed().as_secs() < 5);
    assert!(!result.success);
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Timeout));
    assert_eq!(result.metadata.timeout_used_ms, 200);
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_clamped_to_max() -> Result<()> {
    let settings = Settings { max_timeout_ms: 1_000, default_timeout_ms: 500, ..settings() };
    let runner = inline_runner(&[("quick.applescript", "return 2")], settings);
    let mut inv = ScriptInvocation::new("quick");
    inv.timeout_ms = Some(60_000);

    let result = runner.run_script(inv).await?;
    assert!(result.success);
    assert_eq!(result.metadata.timeout_used_ms, 1_000);
    Ok(())
}

#[tokio::test]
async fn test_compile_failure_carries_source_context() -> Result<()> {
    let source = "-- ${who}\nline 2\nline 3\nline 4\nBROKEN here\nline 6\nline 7\nline 8";
    let runner = inline_runner(&[("broken_fixture.applescript", source)], settings());
    let mut inv = ScriptInvocation::new("broken_fixture");
    inv.context = ctx(json!({"who": "me"}));

    let result = runner.run_script(inv).await?;
    assert!(!result.success);
    let error = result.error.expect("error present");
    assert_eq!(error.kind, ErrorKind::ScriptError);
    let details = error.details.unwrap_or_default();
    assert!(details.contains("Source context:"), "{}", details);
    assert!(details.contains("  3 | line 3"));
    assert!(details.contains("> 5 | BROKEN here"));
    assert!(details.contains("  7 | line 7"));
    assert!(!details.contains("line 2"));
    assert!(!details.contains("line 8"));
    assert!(leftover_temp_files("broken_fixture").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_interpreter_is_system_error() -> Result<()> {
    let settings = Settings { interpreter: PathBuf::from("/nonexistent/osascript"), ..settings() };
    let runner = inline_runner(&[("x.applescript", "return 1")], settings);

    let result = runner.run_script(ScriptInvocation::new("x")).await?;
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::SystemError));
    Ok(())
}

#[tokio::test]
async fn test_debug_recorder_keeps_failures() -> Result<()> {
    let debug = TempDir::new()?;
    let settings = Settings {
        debug_enabled: true,
        debug_dir: debug.path().join("runs"),
        ..settings()
    };
    let runner = inline_runner(&[("deny.applescript", "DENY"), ("fine.applescript", "ok")], settings);

    runner.run_script(ScriptInvocation::new("fine")).await?;
    runner.run_script(ScriptInvocation::new("deny")).await?;

    let mut names: Vec<String> = fs::read_dir(debug.path().join("runs"))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2, "{:?}", names);
    assert!(names.iter().all(|n| n.contains("_failed_deny.")));
    assert!(names.iter().any(|n| n.ends_with(".applescript")));
    assert!(names.iter().any(|n| n.ends_with(".json")));
    Ok(())
}

fn debug_files(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

#[tokio::test]
async fn test_compile_failure_is_recorded() -> Result<()> {
    let debug = TempDir::new()?;
    let settings = Settings { debug_enabled: true, debug_dir: debug.path().to_path_buf(), ..settings() };
    let runner = inline_runner(&[("bad_compile.applescript", "-- ${who}\nBROKEN")], settings);
    let mut inv = ScriptInvocation::new("bad_compile");
    inv.context = ctx(json!({"who": "me"}));

    let result = runner.run_script(inv).await?;
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::ScriptError));

    let names = debug_files(debug.path())?;
    assert_eq!(names.len(), 2, "{:?}", names);
    assert!(names.iter().any(|n| n.ends_with("_failed_bad_compile.applescript")));
    assert!(names.iter().any(|n| n.ends_with("_failed_bad_compile.json")));
    let source = names.iter().find(|n| n.ends_with(".applescript")).map(|n| debug.path().join(n));
    assert_eq!(fs::read_to_string(source.unwrap_or_default())?, "-- \"me\"\nBROKEN");
    Ok(())
}

#[tokio::test]
async fn test_missing_compiler_is_recorded_system_error() -> Result<()> {
    let debug = TempDir::new()?;
    let settings = Settings {
        compiler: PathBuf::from("/nonexistent/osacompile"),
        debug_enabled: true,
        debug_dir: debug.path().to_path_buf(),
        ..settings()
    };
    let runner = inline_runner(&[("no_compiler.applescript", "return ${n}")], settings);
    let mut inv = ScriptInvocation::new("no_compiler");
    inv.context = ctx(json!({"n": 1}));
    inv.timeout_ms = Some(4_000);

    let result = runner.run_script(inv).await?;
    assert!(!result.success);
    assert_eq!(result.metadata.timeout_used_ms, 4_000);
    let error = result.error.expect("error present");
    assert_eq!(error.kind, ErrorKind::SystemError);
    assert!(error.message.contains("/nonexistent/osacompile"), "{}", error.message);

    let names = debug_files(debug.path())?;
    assert_eq!(names.len(), 2, "{:?}", names);
    assert!(names.iter().all(|n| n.contains("_failed_no_compiler.")));
    assert!(leftover_temp_files("no_compiler").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_compile_and_run_share_one_timeout() -> Result<()> {
    let runner = inline_runner(&[("slow_both.applescript", "-- ${x}\nSLOWCOMPILE\nSLEEP")], settings());
    let mut inv = ScriptInvocation::new("slow_both");
    inv.context = ctx(json!({"x": 1}));
    inv.timeout_ms = Some(1_500);

    let started = Instant::now();
    let result = runner.run_script(inv).await?;
    let elapsed = started.elapsed().as_millis();
    assert!(elapsed < 2_300, "took {}ms", elapsed);
    assert!(!result.success);
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Timeout));
    assert_eq!(result.metadata.timeout_used_ms, 1_500);
    Ok(())
}

#[tokio::test]
async fn test_file_template_rendered_from_plugin() -> Result<()> {
    let plugin = TempDir::new()?;
    let path = plugin.path().join("scripts/greet.applescript");
    fs::create_dir_all(plugin.path().join("scripts"))?;
    fs::write(&path, "say ${name}")?;

    let runner = ScriptRunner::for_plugin(plugin.path(), settings());
    let mut inv = ScriptInvocation::new("greet");
    inv.context = ctx(json!({"name": "Ann"}));

    let result = runner.run_script(inv).await?;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(text(&result.output), "say \"Ann\"");
    assert_eq!(result.metadata.script_path.as_deref(), Some(path.as_path()));
    Ok(())
}

#[tokio::test]
async fn test_plugin_files_used_when_bundle_is_broken() -> Result<()> {
    let plugin = TempDir::new()?;
    fs::create_dir_all(plugin.path().join("dist"))?;
    fs::write(plugin.path().join("dist/scripts.json"), "{not json")?;
    fs::create_dir_all(plugin.path().join("scripts/mail"))?;
    fs::write(plugin.path().join("scripts/mail/send.applescript"), "return \"sent\"")?;

    let runner = ScriptRunner::for_plugin(plugin.path(), settings());
    assert_eq!(runner.locator().strategy(), "file");

    let result = runner.run_script(ScriptInvocation::new("send")).await?;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(text(&result.output), "return \"sent\"");
    assert_eq!(
        result.metadata.script_path.as_deref(),
        Some(plugin.path().join("scripts/mail/send.applescript").as_path())
    );
    Ok(())
}

#[tokio::test]
async fn test_inline_bundle_wins_and_binary_is_materialized() -> Result<()> {
    let plugin = TempDir::new()?;
    fs::create_dir_all(plugin.path().join("dist"))?;
    fs::write(
        plugin.path().join("dist/scripts.json"),
        r#"{"blob_fixture.scpt": {"type": "binary", "content": "Y29tcGlsZWQtYnl0ZXM="}}"#,
    )?;
    fs::create_dir_all(plugin.path().join("scripts"))?;
    fs::write(plugin.path().join("scripts/blob_fixture.applescript"), "from disk")?;

    let runner = ScriptRunner::for_plugin(plugin.path(), settings());
    assert_eq!(runner.locator().strategy(), "inline");

    let result = runner.run_script(ScriptInvocation::new("blob_fixture")).await?;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(text(&result.output), "compiled-bytes");
    assert!(result.metadata.script_path.is_none());
    assert!(leftover_temp_files("blob_fixture").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_raw_javascript_code() -> Result<()> {
    let runner = inline_runner(&[], settings());
    let result = runner
        .run_code("${items}.length", Language::JavaScript, &ctx(json!({"items": [1, "two"]})), None)
        .await?;
    assert!(result.success);
    assert_eq!(text(&result.output), "[1,\"two\"].length");
    Ok(())
}
