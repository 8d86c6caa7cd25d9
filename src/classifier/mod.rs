//! Failure taxonomy: maps interpreter/compiler diagnostics to an [`ErrorKind`]
//! plus a hint an unattended caller can act on.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Permission,
    Timeout,
    ScriptError,
    SystemError,
    /// Assigned by callers gating a feature; never produced by [`classify`].
    Disabled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Permission => "permission",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ScriptError => "script_error",
            ErrorKind::SystemError => "system_error",
            ErrorKind::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ClassifiedError {
    /// Classify raw diagnostic text (stderr of the interpreter or compiler).
    pub fn from_diagnostic(raw: &str) -> Self {
        let kind = classify(raw);
        let message = extract_message(raw);
        let hint = hint_for(kind, &message);
        Self { kind, message, hint, code: None, details: None }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        let message = format!("script timed out after {} ms", timeout_ms);
        Self {
            kind: ErrorKind::Timeout,
            hint: hint_for(ErrorKind::Timeout, &message),
            message,
            code: None,
            details: None,
        }
    }

    /// Host-level failure that never reached the interpreter (missing binary etc).
    pub fn system(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::SystemError,
            hint: hint_for(ErrorKind::SystemError, &message),
            message,
            code: None,
            details: None,
        }
    }

    pub fn disabled(feature: &str) -> Self {
        let message = format!("{} is disabled by configuration", feature);
        Self {
            kind: ErrorKind::Disabled,
            hint: hint_for(ErrorKind::Disabled, &message),
            message,
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

const PERMISSION_PATTERNS: &[&str] = &[
    "not authorized",
    "not allowed",
    "permission denied",
    "operation not permitted",
];
const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out"];
const SCRIPT_PATTERNS: &[&str] = &[
    "syntax error",
    "execution error",
    "expected",
    "can't get",
    "can't make",
];

/// First matching rule wins; order is significant.
pub fn classify(raw: &str) -> ErrorKind {
    let text = raw.to_lowercase();
    let hit = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

    if hit(PERMISSION_PATTERNS) {
        ErrorKind::Permission
    } else if hit(TIMEOUT_PATTERNS) {
        ErrorKind::Timeout
    } else if hit(SCRIPT_PATTERNS) {
        ErrorKind::ScriptError
    } else {
        ErrorKind::SystemError
    }
}

fn position_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+:\d+:(.*)").expect("valid regex"))
}

/// Strip the `<start>:<end>:` source range prefix osascript puts on errors.
pub fn extract_message(raw: &str) -> String {
    if let Some(caps) = position_prefix().captures(raw) {
        let rest = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return rest.trim().to_string();
    }
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string())
}

pub fn hint_for(kind: ErrorKind, message: &str) -> String {
    let hint = match kind {
        ErrorKind::Permission => {
            "Grant automation and accessibility permission to the calling process in System Settings > Privacy & Security, then retry."
        }
        ErrorKind::Timeout => {
            "The script did not finish in time. Retry with a larger timeout or simplify the script; the target application may be waiting on a dialog."
        }
        ErrorKind::ScriptError => {
            let lower = message.to_lowercase();
            if lower.contains("syntax error") {
                "The script failed to compile. Check quoting, block terminators (end tell, end if) and the command names used."
            } else if lower.contains("can't get") || lower.contains("can't make") {
                "A referenced object does not exist or cannot be converted. Verify the target application is running and the element names or indexes are correct."
            } else {
                "The script raised an error while running. Inspect the message and adjust the script or its inputs."
            }
        }
        ErrorKind::SystemError => {
            "The automation host failed outside the script. Check that the interpreter is installed and the system is responsive."
        }
        ErrorKind::Disabled => {
            "This capability is turned off in configuration. Ask the operator to enable it or use a named script instead."
        }
    };
    hint.to_string()
}
