//! LUACFG settings for the TSO layer.
//!
//! The member holds `key = value` lines; `#` and `*` start comment lines.
//! Only the `tso.`, `allow.`, `trace.` and `limits.` namespaces belong to
//! this crate. Keys in other namespaces are left for other layers and
//! skipped here.
//!
//! ```text
//! * capture policy
//! allow.tso.cmd           = whitelist
//! tso.cmd.whitelist       = TIME, LISTCAT, LISTDS
//! tso.cmd.capture.default = true
//! limits.output.lines     = 500
//! tso.cmd.mode            = auto
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::alloc::validate_ddname;
use crate::error::{Result, TsoError};
use crate::legacy::{DEFAULT_EXEC, DEFAULT_EXEC_DD, DEFAULT_OUT_DD};

/// Longest accepted line.
pub const MAX_LINE: usize = 1024;

pub const LUZ_CFG_LINE_TOO_LONG: u32 = 30093;
pub const LUZ_CFG_INVALID_LINE: u32 = 30094;
pub const LUZ_CFG_UNKNOWN_KEY: u32 = 30095;
pub const LUZ_CFG_INVALID_VALUE: u32 = 30096;
pub const LUZ_CFG_DUPLICATE_KEY: u32 = 30098;

const OWNED_NAMESPACES: [&str; 4] = ["tso.", "allow.", "trace.", "limits."];

/// How captured commands are run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// IKJEFTSR with a private output DD.
    #[default]
    Direct,
    /// IRXEXEC and the LUTSO exec.
    Legacy,
    /// Direct, falling back to legacy when IKJEFTSR is not installed.
    Auto,
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "legacy" => Ok(Self::Legacy),
            "auto" => Ok(Self::Auto),
            other => Err(format!("'{other}' is not one of direct, legacy, auto")),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Legacy => "legacy",
            Self::Auto => "auto",
        })
    }
}

/// `trace.level` values, least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Off,
    Error,
    Info,
    Debug,
}

impl TraceLevel {
    /// Directive for a `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("'{other}' is not one of off, error, info, debug")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Whitelist,
    Blacklist,
}

/// Which command verbs may be run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandPolicy {
    /// No mode means every command is allowed.
    pub mode: Option<PolicyMode>,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

impl CommandPolicy {
    /// Whether a command with verb `verb` may run.
    pub fn permits(&self, verb: &str) -> bool {
        let verb = verb.to_ascii_uppercase();
        match self.mode {
            None => true,
            Some(PolicyMode::Whitelist) => self.whitelist.contains(&verb),
            Some(PolicyMode::Blacklist) => !self.blacklist.contains(&verb),
        }
    }
}

/// Settings for the TSO layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TsoConfig {
    pub policy: CommandPolicy,
    pub trace_level: Option<TraceLevel>,
    /// Most lines handed back per command; `None` is unlimited.
    pub output_line_limit: Option<usize>,
    /// Whether `cmd` captures output when the caller does not say.
    pub capture_default: bool,
    pub capture_mode: CaptureMode,
    pub rexx_exec: String,
    pub rexx_dd: String,
    pub out_dd: String,
}

impl Default for TsoConfig {
    fn default() -> Self {
        Self {
            policy: CommandPolicy::default(),
            trace_level: None,
            output_line_limit: None,
            capture_default: true,
            capture_mode: CaptureMode::Direct,
            rexx_exec: DEFAULT_EXEC.to_string(),
            rexx_dd: DEFAULT_EXEC_DD.to_string(),
            out_dd: DEFAULT_OUT_DD.to_string(),
        }
    }
}

impl TsoConfig {
    /// Parse LUACFG text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut cfg = TsoConfig::default();
        let mut seen = HashSet::new();

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            if raw.len() > MAX_LINE {
                return Err(config_error(LUZ_CFG_LINE_TOO_LONG, line_no, "line too long"));
            }
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('*') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(config_error(LUZ_CFG_INVALID_LINE, line_no, "expected key = value"));
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if key.is_empty() {
                return Err(config_error(LUZ_CFG_INVALID_LINE, line_no, "missing key"));
            }
            if !OWNED_NAMESPACES.iter().any(|ns| key.starts_with(ns)) {
                debug!(%key, line = line_no, "LUACFG key left for another layer");
                continue;
            }
            if !seen.insert(key.clone()) {
                return Err(config_error(
                    LUZ_CFG_DUPLICATE_KEY,
                    line_no,
                    &format!("duplicate key {key}"),
                ));
            }
            cfg.apply(&key, value).map_err(|e| match e {
                KeyError::Unknown => {
                    config_error(LUZ_CFG_UNKNOWN_KEY, line_no, &format!("unknown key {key}"))
                }
                KeyError::Value(detail) => config_error(
                    LUZ_CFG_INVALID_VALUE,
                    line_no,
                    &format!("invalid value for {key}: {detail}"),
                ),
            })?;
        }
        Ok(cfg)
    }

    fn apply(&mut self, key: &str, value: &str) -> std::result::Result<(), KeyError> {
        match key {
            "allow.tso.cmd" => {
                self.policy.mode = Some(match value.to_ascii_lowercase().as_str() {
                    "whitelist" => PolicyMode::Whitelist,
                    "blacklist" => PolicyMode::Blacklist,
                    _ => return Err(KeyError::Value("expected whitelist or blacklist".into())),
                });
            }
            "tso.cmd.whitelist" => self.policy.whitelist = verb_list(value)?,
            "tso.cmd.blacklist" => self.policy.blacklist = verb_list(value)?,
            "trace.level" => self.trace_level = Some(value.parse().map_err(KeyError::Value)?),
            "limits.output.lines" => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(KeyError::Value("expected a line count".into()));
                }
                let limit: usize = value
                    .parse()
                    .map_err(|_| KeyError::Value("line count too large".into()))?;
                self.output_line_limit = (limit > 0).then_some(limit);
            }
            "tso.cmd.capture.default" => {
                self.capture_default = match value.to_ascii_lowercase().as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(KeyError::Value("expected true, false, 1 or 0".into())),
                };
            }
            "tso.cmd.mode" => self.capture_mode = value.parse().map_err(KeyError::Value)?,
            "tso.rexx.exec" => self.rexx_exec = ddname_value(value)?,
            "tso.rexx.dd" => self.rexx_dd = ddname_value(value)?,
            "tso.out.dd" => self.out_dd = ddname_value(value)?,
            _ => return Err(KeyError::Unknown),
        }
        Ok(())
    }
}

enum KeyError {
    Unknown,
    Value(String),
}

fn config_error(code: u32, line: usize, detail: &str) -> TsoError {
    TsoError::Config {
        code,
        line,
        detail: detail.to_string(),
    }
}

fn verb_list(value: &str) -> std::result::Result<Vec<String>, KeyError> {
    let verbs: Vec<String> = value
        .split(',')
        .map(|v| v.trim().to_ascii_uppercase())
        .filter(|v| !v.is_empty())
        .collect();
    match verbs
        .iter()
        .find(|v| !v.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '#' | '$')))
    {
        Some(bad) => Err(KeyError::Value(format!("'{bad}' is not a command name"))),
        None => Ok(verbs),
    }
}

fn ddname_value(value: &str) -> std::result::Result<String, KeyError> {
    validate_ddname(value)
        .map(|_| value.to_ascii_uppercase())
        .map_err(|e| KeyError::Value(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TsoConfig::parse("").unwrap();
        assert_eq!(cfg, TsoConfig::default());
        assert!(cfg.capture_default);
        assert_eq!(cfg.capture_mode, CaptureMode::Direct);
        assert!(cfg.policy.permits("ANYTHING"));
    }

    #[test]
    fn full_member() {
        let cfg = TsoConfig::parse(
            "* LUACFG\n\
             allow.tso.cmd = whitelist\n\
             tso.cmd.whitelist = time, listcat\n\
             tso.cmd.capture.default = 0\n\
             limits.output.lines = 25\n\
             trace.level = DEBUG\n\
             tso.cmd.mode = auto\n\
             tso.out.dd = luzout\n\
             # other layers\n\
             luain.dd = LUAIN\n\
             tls.profile = x\n",
        )
        .unwrap();
        assert!(cfg.policy.permits("time"));
        assert!(!cfg.policy.permits("LISTDS"));
        assert!(!cfg.capture_default);
        assert_eq!(cfg.output_line_limit, Some(25));
        assert_eq!(cfg.trace_level, Some(TraceLevel::Debug));
        assert_eq!(cfg.capture_mode, CaptureMode::Auto);
        assert_eq!(cfg.out_dd, "LUZOUT");
    }

    #[test]
    fn blacklist_policy() {
        let cfg = TsoConfig::parse("allow.tso.cmd=blacklist\ntso.cmd.blacklist=PARMLIB").unwrap();
        assert!(!cfg.policy.permits("parmlib"));
        assert!(cfg.policy.permits("TIME"));
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let cfg = TsoConfig::parse("limits.output.lines = 0").unwrap();
        assert_eq!(cfg.output_line_limit, None);
    }

    fn code_of(text: &str) -> u32 {
        match TsoConfig::parse(text).unwrap_err() {
            TsoError::Config { code, .. } => code,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errors_carry_luz_codes() {
        assert_eq!(code_of(&format!("tso.out.dd = {}", "X".repeat(MAX_LINE))), 30093);
        assert_eq!(code_of("just words"), 30094);
        assert_eq!(code_of(" = value"), 30094);
        assert_eq!(code_of("tso.cmd.colour = blue"), 30095);
        assert_eq!(code_of("limits.output.lines = many"), 30096);
        assert_eq!(code_of("tso.cmd.mode = sideways"), 30096);
        assert_eq!(code_of("tso.rexx.dd = 9BAD"), 30096);
        assert_eq!(code_of("allow.tso.cmd = maybe"), 30096);
        assert_eq!(code_of("trace.level = info\ntrace.level = off"), 30098);
    }

    #[test]
    fn error_names_line() {
        let err = TsoConfig::parse("\n\ntso.cmd.mode = x").unwrap_err();
        assert!(err.to_string().starts_with("LUZ30096 config line 3:"));
    }

    #[test]
    fn serializes() {
        let json = serde_json::to_value(TsoConfig::default()).unwrap();
        assert_eq!(json["capture_mode"], "direct");
        assert_eq!(json["out_dd"], "TSOOUT");
    }
}
