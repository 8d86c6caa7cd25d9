mod cli;

use std::{path::Path, process::ExitCode};

use anyhow::{bail, Context, Result};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, VarArgs};
use osabridge::config::{Config, Settings};
use osabridge::executor::{ExecutionResult, OutputFormat};
use osabridge::recorder;
use osabridge::runner::{self, ScriptRunner};
use osabridge::scripts::ScriptReference;
use osabridge::sdef::{DictionaryView, Projection};
use osabridge::template::{Language, RenderContext};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Cli::parse();

    let cfg = Config::load();
    let settings = Settings::from_config(&cfg);
    tracing::debug!(config = %cfg.config_path.display(), ?settings, "configuration resolved");

    match args.command {
        Command::Run { plugin_dir, name, vars, args, timeout, compiled, json } => {
            let reference = ScriptReference::new(plugin_dir, name);
            let (runner, mut inv) = ScriptRunner::for_reference(&reference, settings);
            inv.context = parse_vars(&vars)?;
            inv.args = args;
            inv.timeout_ms = timeout;
            inv.prefer_compiled = compiled;
            inv.format = if json { OutputFormat::Json } else { OutputFormat::Text };
            let result = runner
                .run_script(inv)
                .await
                .with_context(|| format!("running {}", reference.name))?;
            report(&result)
        }
        Command::Eval { code, javascript, vars, timeout } => {
            let language = if javascript { Language::JavaScript } else { Language::AppleScript };
            let context = parse_vars(&vars)?;
            let runner = ScriptRunner::for_plugin(Path::new("."), settings);
            let result = runner.run_code(&code, language, &context, timeout).await?;
            report(&result)
        }
        Command::Dict { target, queries, full, raw } => {
            let projection = match (queries.is_empty(), full, raw) {
                (false, _, true) => Projection::Raw(queries),
                (false, _, false) => Projection::Query(queries),
                (true, true, _) => Projection::Full,
                (true, false, _) => Projection::Overview,
            };
            let view = runner::read_dictionary(&settings, &target, &projection)
                .await
                .with_context(|| format!("reading dictionary for {}", target))?;
            match view {
                DictionaryView::Raw(xml) => print!("{}", xml),
                other => print_json(&other)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Sweep { dry_run, days } => {
            let days = days.unwrap_or(settings.debug_retention_days);
            let report = recorder::sweep(&settings.debug_dir, days, dry_run)
                .await
                .with_context(|| format!("sweeping {}", settings.debug_dir.display()))?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("osabridge=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `key=<json>` pairs into a render context. Values that are not valid JSON
/// are taken as plain strings, so `--var title=Groceries` works unquoted.
fn parse_vars(vars: &VarArgs) -> Result<RenderContext> {
    let mut ctx = RenderContext::new();
    for raw in &vars.vars {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("--var expects KEY=VALUE, got {:?}", raw);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("--var has an empty key: {:?}", raw);
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        ctx.insert(key.to_string(), value);
    }
    Ok(ctx)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{}", text);
    Ok(())
}

fn report(result: &ExecutionResult) -> Result<ExitCode> {
    print_json(result)?;
    let Some(error) = &result.error else {
        return Ok(ExitCode::SUCCESS);
    };
    if std::io::stderr().is_terminal() {
        eprintln!("{} {}", error.kind.as_str().red().bold(), error.message);
        eprintln!("{} {}", "hint:".yellow(), error.hint);
    } else {
        eprintln!("{}: {}", error.kind, error.message);
    }
    Ok(ExitCode::FAILURE)
}
