//! Value-to-literal rendering and `${name}` placeholder substitution.
//!
//! Two entry points: [`render`] for template text, and [`to_literal`] /
//! [`ScriptBuilder`] for callers composing scripts by concatenation.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Placeholder name → typed value.
pub type RenderContext = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    AppleScript,
    JavaScript,
}

impl Language {
    /// Extension for a saved copy of source in this language.
    pub fn source_extension(self) -> &'static str {
        match self {
            Language::AppleScript => "applescript",
            Language::JavaScript => "js",
        }
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"))
}

pub fn has_placeholders(text: &str) -> bool {
    placeholder_re().is_match(text)
}

/// Distinct placeholder names in first-seen order.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(text) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

pub fn render(template: &str, ctx: &RenderContext) -> Result<String> {
    render_as(template, ctx, Language::AppleScript)
}

/// Every referenced name is checked before anything is substituted, so a
/// missing variable never yields a half-rendered script.
pub fn render_as(template: &str, ctx: &RenderContext, lang: Language) -> Result<String> {
    if let Some(missing) = placeholders(template)
        .into_iter()
        .find(|name| !ctx.contains_key(name))
    {
        return Err(Error::MissingTemplateVariable(missing));
    }

    let out = placeholder_re().replace_all(template, |caps: &Captures| {
        // presence checked above
        ctx.get(&caps[1]).map(|v| literal_for(v, lang)).unwrap_or_default()
    });
    Ok(out.into_owned())
}

/// AppleScript literal for a value.
pub fn to_literal(value: &Value) -> String {
    literal_for(value, Language::AppleScript)
}

pub fn literal_for(value: &Value, lang: Language) -> String {
    match lang {
        Language::AppleScript => applescript_literal(value),
        // JSON is a valid JavaScript expression.
        Language::JavaScript => value.to_string(),
    }
}

fn applescript_literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote_string(s),
        Value::Number(n) => number_literal(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "missing value".to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(applescript_literal).collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", record_key(k), applescript_literal(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn number_literal(n: &serde_json::Number) -> String {
    let text = n.to_string();
    // AppleScript reals in exponent form need a decimal mantissa and a signed
    // exponent: 1e300 -> 1.0E+300, 1e-7 -> 1.0E-7.
    let Some((mantissa, exponent)) = text.split_once(|c: char| c == 'e' || c == 'E') else {
        return text;
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.to_string()
    } else {
        format!("{}.0", mantissa)
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent.trim_start_matches('+')),
    };
    format!("{}E{}{}", mantissa, sign, digits)
}

/// Backslashes first, then quotes.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn quote_string(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

fn record_key(key: &str) -> String {
    let mut chars = key.chars();
    let plain = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if plain {
        key.to_string()
    } else {
        format!("|{}|", key.replace('\\', "\\\\").replace('|', "\\|"))
    }
}

/// Line-oriented script composition with literal interpolation.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    lang: Language,
    buf: String,
}

impl ScriptBuilder {
    pub fn new(lang: Language) -> Self {
        Self { lang, buf: String::new() }
    }

    pub fn push(&mut self, text: &str) -> &mut Self {
        self.buf.push_str(text);
        self
    }

    pub fn push_literal(&mut self, value: &Value) -> &mut Self {
        self.buf.push_str(&literal_for(value, self.lang));
        self
    }

    pub fn push_line(&mut self, text: &str) -> &mut Self {
        self.buf.push_str(text);
        self.buf.push('\n');
        self
    }

    pub fn build(&self) -> String {
        self.buf.clone()
    }
}
