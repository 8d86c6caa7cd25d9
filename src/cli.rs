use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "osabridge", about = "Run AppleScript through osascript with structured results", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a named script from a plugin directory.
    Run {
        /// Plugin root holding `dist/scripts.json` or `scripts/`.
        #[arg(value_name = "PLUGIN_DIR")]
        plugin_dir: PathBuf,

        /// Logical script name, e.g. `notes/create`.
        #[arg(value_name = "NAME")]
        name: String,

        #[command(flatten)]
        vars: VarArgs,

        /// Extra argument passed to the script's `run` handler (repeatable).
        #[arg(long = "arg", action = clap::ArgAction::Append)]
        args: Vec<String>,

        /// Timeout in milliseconds (clamped to OSA_MAX_TIMEOUT_MS).
        #[arg(long)]
        timeout: Option<u64>,

        /// Prefer the compiled `.scpt` form when both exist.
        #[arg(long)]
        compiled: bool,

        /// Parse the script's stdout as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a snippet of code directly.
    Eval {
        #[arg(value_name = "CODE")]
        code: String,

        /// Treat the code as JavaScript for Automation.
        #[arg(long)]
        javascript: bool,

        #[command(flatten)]
        vars: VarArgs,

        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Summarize, query or dump an application's scripting dictionary.
    Dict {
        /// Application path/name, or an `.sdef` file.
        #[arg(value_name = "APP_OR_FILE")]
        target: String,

        /// `type:name` lookup, e.g. `class:note` (repeatable).
        #[arg(long = "query", action = clap::ArgAction::Append)]
        queries: Vec<String>,

        /// Every property, element and parameter instead of the overview.
        #[arg(long, conflicts_with = "queries")]
        full: bool,

        /// Print matched XML instead of JSON (with --query).
        #[arg(long, requires = "queries")]
        raw: bool,
    },

    /// Delete debug snapshots older than the retention window.
    Sweep {
        /// Report what would be deleted without deleting.
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Override OSA_DEBUG_RETENTION_DAYS.
        #[arg(long)]
        days: Option<u64>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct VarArgs {
    /// Template value as `key=<json>`; non-JSON values are taken as strings (repeatable).
    #[arg(long = "var", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub vars: Vec<String>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
