//! Configuration: built-in defaults, an optional rc file, then environment.
//!
//! Everything downstream reads the resolved [`Settings`] value; nothing else
//! in the crate touches the environment.

use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut map = default_map();

        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                merge_lines(&mut map, BufReader::new(file).lines().map_while(Result::ok));
            }
        }

        // Environment takes precedence over the rc file.
        for (k, v) in env::vars() {
            if let Some(key) = config_key(&k) {
                map.insert(key, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Defaults overlaid with explicit pairs only. No rc file, no environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = default_map();
        for (k, v) in pairs {
            map.insert(k.into(), v.into());
        }
        Self { inner: map, config_path: default_config_path() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
    }
}

fn merge_lines(map: &mut HashMap<String, String>, lines: impl Iterator<Item = String>) {
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
}

/// Known keys pass through; `OSABRIDGE_X` is accepted as an alias of `OSA_X`.
fn config_key(k: &str) -> Option<String> {
    const KEYS: &[&str] = &[
        "OSA_DEFAULT_TIMEOUT_MS",
        "OSA_MAX_TIMEOUT_MS",
        "OSA_DEBUG",
        "OSA_DEBUG_SAVE_ALL",
        "OSA_DEBUG_DIR",
        "OSA_DEBUG_CONTEXT_LINES",
        "OSA_DEBUG_RETENTION_DAYS",
        "OSA_ALLOW_RAW_SCRIPT",
        "OSA_INTERPRETER",
        "OSA_COMPILER",
        "OSA_SDEF_TOOL",
    ];

    if KEYS.contains(&k) {
        return Some(k.to_string());
    }
    let key = format!("OSA_{}", k.strip_prefix("OSABRIDGE_")?);
    KEYS.contains(&key.as_str()).then_some(key)
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("osabridge").join(".osabridgerc")
}

fn default_debug_dir() -> PathBuf {
    env::temp_dir().join("osabridge").join("debug")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Timeouts (milliseconds)
    m.insert("OSA_DEFAULT_TIMEOUT_MS".into(), DEFAULT_TIMEOUT_MS.to_string());
    m.insert("OSA_MAX_TIMEOUT_MS".into(), MAX_TIMEOUT_MS.to_string());

    // Debug recorder
    m.insert("OSA_DEBUG".into(), "false".into());
    m.insert("OSA_DEBUG_SAVE_ALL".into(), "false".into());
    m.insert(
        "OSA_DEBUG_DIR".into(),
        default_debug_dir().to_string_lossy().into_owned(),
    );
    m.insert("OSA_DEBUG_CONTEXT_LINES".into(), "3".into());
    m.insert("OSA_DEBUG_RETENTION_DAYS".into(), "7".into());

    // Feature gates and tool paths
    m.insert("OSA_ALLOW_RAW_SCRIPT".into(), "true".into());
    m.insert("OSA_INTERPRETER".into(), "osascript".into());
    m.insert("OSA_COMPILER".into(), "osacompile".into());
    m.insert("OSA_SDEF_TOOL".into(), "sdef".into());

    m
}

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Resolved scalar settings handed to each component at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub debug_enabled: bool,
    pub debug_save_all: bool,
    pub debug_dir: PathBuf,
    pub debug_context_lines: usize,
    pub debug_retention_days: u64,
    pub allow_raw_script: bool,
    pub interpreter: PathBuf,
    pub compiler: PathBuf,
    pub sdef_tool: PathBuf,
}

impl Settings {
    pub fn from_config(cfg: &Config) -> Self {
        let max_timeout_ms = cfg.get_u64("OSA_MAX_TIMEOUT_MS").unwrap_or(MAX_TIMEOUT_MS);
        let default_timeout_ms = cfg
            .get_u64("OSA_DEFAULT_TIMEOUT_MS")
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(max_timeout_ms);

        Self {
            default_timeout_ms,
            max_timeout_ms,
            debug_enabled: cfg.get_bool("OSA_DEBUG"),
            debug_save_all: cfg.get_bool("OSA_DEBUG_SAVE_ALL"),
            debug_dir: cfg.get_path("OSA_DEBUG_DIR").unwrap_or_else(default_debug_dir),
            debug_context_lines: cfg.get_usize("OSA_DEBUG_CONTEXT_LINES").unwrap_or(3),
            debug_retention_days: cfg.get_u64("OSA_DEBUG_RETENTION_DAYS").unwrap_or(7),
            allow_raw_script: cfg.get_bool("OSA_ALLOW_RAW_SCRIPT"),
            interpreter: tool_path(cfg, "OSA_INTERPRETER", "osascript"),
            compiler: tool_path(cfg, "OSA_COMPILER", "osacompile"),
            sdef_tool: tool_path(cfg, "OSA_SDEF_TOOL", "sdef"),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::from_pairs(std::iter::empty::<(String, String)>()))
    }
}

fn tool_path(cfg: &Config, key: &str, fallback: &str) -> PathBuf {
    cfg.get_path(key).unwrap_or_else(|| Path::new(fallback).to_path_buf())
}
