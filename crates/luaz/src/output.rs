//! Structured output types for machine-readable CLI responses.
//!
//! When `--format json` is specified, commands emit these types as JSON
//! instead of human-readable text.

use clap::ValueEnum;
use serde::Serialize;

use luaz_tso::{CapturePath, CommandOutcome, TsoConfig};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }
}

/// Output from the `cmd` command.
#[derive(Debug, Clone, Serialize)]
pub struct CmdOutput {
    pub status: String,
    pub command: String,
    pub return_code: i32,
    pub service_rc: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abend: Option<String>,
    pub path: CapturePath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddname: Option<String>,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub truncated: usize,
    /// Terminal output of an uncaptured command.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub terminal: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

impl CmdOutput {
    pub fn new(command: &str, outcome: &CommandOutcome) -> Self {
        Self {
            status: if outcome.rc() == 0 { "success" } else { "failed" }.to_string(),
            command: command.to_string(),
            return_code: outcome.rc(),
            service_rc: outcome.invocation.service_rc,
            abend: outcome.invocation.abend().map(|a| a.to_string()),
            path: outcome.path,
            ddname: outcome.binding.as_ref().map(|b| b.to_string()),
            lines: outcome.lines().to_vec(),
            truncated: outcome.truncated,
            terminal: Vec::new(),
            cleanup_error: outcome.cleanup.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Output from the `alloc` command.
#[derive(Debug, Clone, Serialize)]
pub struct AllocOutput {
    pub status: String,
    pub ddname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsname: Option<String>,
    pub service_rc: i32,
    pub reason_code: u16,
    pub catalog_rc: u16,
    pub freed: bool,
}

/// One line of a batch script.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStep {
    pub line: usize,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Cleanup failures reported while this line ran.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Output from the `batch` command.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    pub status: String,
    pub exit_code: i32,
    pub steps: Vec<BatchStep>,
    pub released: usize,
}

/// Output from the `config` command.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOutput {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub config: TsoConfig,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> miette::Result<()> {
    use miette::IntoDiagnostic;
    use std::io::Write;
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    writeln!(std::io::stdout().lock(), "{json}").into_diagnostic()
}

/// Error report for `--format json`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
    pub status: String,
    pub message: String,
}
