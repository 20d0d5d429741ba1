//! Script-facing `tso.*` operations.
//!
//! Every operation either succeeds with its value or fails with a
//! [`ScriptError`] carrying the `LUZnnnnn tso.<op> <detail>` message and
//! the numeric LUZ code, which a binding layer returns as
//! `(nil, message, code)`.

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::alloc::{parse_free_spec, AllocSpec};
use crate::context::{CommandOptions, TsoContext};
use crate::error::TsoError;
use crate::host::{HostServices, MessageLevel};

pub const LUZ_TSO_CMD: i32 = 30003;
pub const LUZ_TSO_ALLOC: i32 = 30004;
pub const LUZ_TSO_FREE: i32 = 30005;
pub const LUZ_TSO_MSG: i32 = 30024;
pub const LUZ_TSO_EXIT: i32 = 30025;

/// Highest return code a program can end with.
pub const MAX_EXIT_CODE: i64 = 4095;

/// A failed script operation, flattened for the script layer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(luaz::script))]
pub struct ScriptError {
    pub message: String,
    pub code: i32,
    #[source]
    pub cause: Option<TsoError>,
}

impl ScriptError {
    fn new(code: i32, op: &str, detail: impl std::fmt::Display) -> Self {
        Self {
            message: format!("LUZ{code:05} tso.{op} {detail}"),
            code,
            cause: None,
        }
    }

    fn from_tso(code: i32, op: &str, err: TsoError) -> Self {
        Self {
            cause: Some(err.clone()),
            ..Self::new(code, op, &err)
        }
    }
}

/// Successful `tso.cmd` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CmdResult {
    pub rc: i32,
    pub lines: Vec<String>,
    /// Release of the output DD failed after the command ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
}

/// Request to end the script with `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[must_use = "the script must stop with this exit code"]
pub struct ExitRequest {
    pub code: i32,
    /// Bindings freed on the way out.
    pub released: usize,
    /// Bindings whose free failed.
    pub failed: usize,
}

/// The `tso` table of one script.
#[derive(Debug)]
pub struct TsoScript<H> {
    ctx: TsoContext<H>,
}

impl<H: HostServices> TsoScript<H> {
    pub fn new(ctx: TsoContext<H>) -> Self {
        Self { ctx }
    }

    /// `tso.cmd(text, {capture=, authorized=})`
    pub fn cmd(&mut self, text: &str, options: CommandOptions) -> Result<CmdResult, ScriptError> {
        let outcome = self
            .ctx
            .run_command(text, options)
            .map_err(|e| ScriptError::from_tso(LUZ_TSO_CMD, "cmd", e))?;
        // The failure travels on the result; drop the context's copy.
        self.ctx.take_cleanup_failures();
        Ok(CmdResult {
            rc: outcome.rc(),
            lines: outcome.invocation.lines,
            cleanup: outcome.cleanup.map(|e| e.to_string()),
        })
    }

    /// `tso.alloc(spec)`
    pub fn alloc(&mut self, spec: &str) -> Result<i32, ScriptError> {
        let spec = AllocSpec::parse(spec).map_err(|e| ScriptError::from_tso(LUZ_TSO_ALLOC, "alloc", e))?;
        let (_, result) = self
            .ctx
            .allocate(&spec)
            .map_err(|e| ScriptError::from_tso(LUZ_TSO_ALLOC, "alloc", e))?;
        Ok(result.service_rc)
    }

    /// `tso.free(spec)`
    pub fn free(&mut self, spec: &str) -> Result<i32, ScriptError> {
        let name = parse_free_spec(spec).map_err(|e| ScriptError::from_tso(LUZ_TSO_FREE, "free", e))?;
        let result = self
            .ctx
            .free(&name)
            .map_err(|e| ScriptError::from_tso(LUZ_TSO_FREE, "free", e))?;
        Ok(result.service_rc)
    }

    /// `tso.msg(text, level)`; level 0 info, 1 warning, 2 error.
    pub fn msg(&mut self, text: &str, level: Option<i64>) -> Result<i32, ScriptError> {
        let level = level.unwrap_or(0);
        let Some(level) = MessageLevel::from_level(level) else {
            return Err(ScriptError::new(
                LUZ_TSO_MSG,
                "msg",
                format!("level {level} is not 0, 1 or 2"),
            ));
        };
        self.ctx
            .message(text, level)
            .map_err(|e| ScriptError::from_tso(LUZ_TSO_MSG, "msg", e))?;
        Ok(0)
    }

    /// `tso.exit(code)`: frees every live binding and ends the script.
    pub fn exit(mut self, code: Option<i64>) -> Result<ExitRequest, ScriptError> {
        let code = code.unwrap_or(0);
        let live = self.ctx.live_bindings().count();
        let failures = self.ctx.release_all();
        for failure in &failures {
            warn!(error = %failure, "binding not released at exit");
        }
        if !(0..=MAX_EXIT_CODE).contains(&code) {
            return Err(ScriptError::new(
                LUZ_TSO_EXIT,
                "exit",
                format!("code {code} is outside 0-{MAX_EXIT_CODE}"),
            ));
        }
        let released = live.saturating_sub(failures.len());
        info!(code, released, "script exit");
        Ok(ExitRequest {
            code: code as i32,
            released,
            failed: failures.len(),
        })
    }

    /// Cleanup failures not yet reported on a result.
    pub fn take_cleanup_failures(&mut self) -> Vec<TsoError> {
        self.ctx.take_cleanup_failures()
    }

    pub fn context(&self) -> &TsoContext<H> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut TsoContext<H> {
        &mut self.ctx
    }
}
