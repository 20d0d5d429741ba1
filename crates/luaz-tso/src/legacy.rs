//! Legacy capture through the LUTSO exec.
//!
//! Kept for hosts where the IKJEFTSR path is not installed. The command is
//! handed to a small REXX exec through IRXEXEC as an external function; the
//! exec traps the output into a shared stream DD and returns the command's
//! return code in the EVALBLK as EBCDIC digits. No new behavior belongs
//! here.

use tracing::{debug, info};

use crate::abi::irx::{self, ExecRequest};
use crate::abi::storage::SUBPOOL_ENGINE;
use crate::ebcdic;
use crate::error::{Result, TsoError};
use crate::host::HostServices;
use crate::invoke::{InvocationOutcome, Phase};
use crate::linkage::Linkage;
use crate::probe::Capability;
use crate::reader::OffsetCursor;

/// Exec member run by default.
pub const DEFAULT_EXEC: &str = "LUTSO";
/// Library DD holding the exec.
pub const DEFAULT_EXEC_DD: &str = "SYSEXEC";
/// Shared output DD the exec writes to.
pub const DEFAULT_OUT_DD: &str = "TSOOUT";

/// Decode an EVALBLK result: optional leading minus, then EBCDIC digits.
pub fn decode_eval(length: i32, data: &[u8]) -> Result<i32> {
    let fail = |detail: String| Err(TsoError::EvalParseFailed { detail });
    if length <= 0 {
        return fail(format!("EVLEN is {length}"));
    }
    let length = length as usize;
    if length > irx::evalblk::DATA_SIZE || length > data.len() {
        return fail(format!("EVLEN {length} exceeds the EVDATA area"));
    }
    let value = &data[..length];
    let (negative, digits) = match value.split_first() {
        Some((&ebcdic::MINUS, rest)) => (true, rest),
        _ => (false, value),
    };
    if digits.is_empty() {
        return fail("sign without digits".to_string());
    }

    let mut magnitude: i64 = 0;
    for &b in digits {
        if !(ebcdic::DIGIT_ZERO..=ebcdic::DIGIT_ZERO + 9).contains(&b) {
            return fail(format!("byte {b:#04x} is not an EBCDIC digit"));
        }
        magnitude = magnitude * 10 + i64::from(b - ebcdic::DIGIT_ZERO);
        if magnitude > i64::from(i32::MAX) + 1 {
            return fail(format!("'{}' overflows a fullword", ebcdic::decode(value)));
        }
    }
    let signed = if negative { -magnitude } else { magnitude };
    i32::try_from(signed).or_else(|_| fail(format!("'{}' overflows a fullword", ebcdic::decode(value))))
}

/// IRXEXEC capture state for one context.
#[derive(Debug, Clone)]
pub struct LegacyCapture {
    exec: String,
    exec_dd: String,
    out_dd: String,
    cursor: OffsetCursor,
}

impl LegacyCapture {
    pub fn new(exec: &str, exec_dd: &str, out_dd: &str) -> Self {
        Self {
            exec: exec.to_ascii_uppercase(),
            exec_dd: exec_dd.to_ascii_uppercase(),
            out_dd: out_dd.to_ascii_uppercase(),
            cursor: OffsetCursor::new(),
        }
    }

    pub fn out_dd(&self) -> &str {
        &self.out_dd
    }

    pub fn cursor(&self) -> &OffsetCursor {
        &self.cursor
    }

    /// Run `command` through the exec and collect what it appended.
    pub fn run<H: HostServices>(
        &mut self,
        link: &mut Linkage<H>,
        cap: Capability,
        command: &str,
    ) -> Result<InvocationOutcome> {
        let command = command.trim();
        if command.is_empty() {
            return Err(TsoError::InvalidCommand {
                reason: "command text is empty".to_string(),
            });
        }
        let entry = link.fetch("IRXEXEC")?;
        if !self.cursor.is_synced() {
            self.cursor.sync_to_end(link, &self.out_dd)?;
        }

        let request = ExecRequest {
            member: self.exec.clone(),
            ddname: self.exec_dd.clone(),
            subcom: "TSO".to_string(),
            args: vec!["CMD".to_string(), command.to_string(), self.out_dd.clone()],
        };
        let (r15, eval, rexx_rc) = link.scoped(|link| {
            let base = link.storage_mut().getmain(SUBPOOL_ENGINE, request.size())?;
            let image = request.encode(base)?;
            link.storage_mut().write(base, &image)?;
            let r15 = link.call(&entry, &ExecRequest::parms(base, cap.cppl()))?;
            let area = link.storage().read(base, request.size())?;
            Ok((r15, irx::decode_evalblk(area)?, irx::decode_rexx_rc(area)?))
        })?;
        debug!(exec = %self.exec, r15, rexx_rc, evlen = eval.length, "IRXEXEC");

        if r15 != 0 {
            return Err(TsoError::InvocationFailed {
                phase: Phase::Execute,
                rc: r15,
                reason: rexx_rc as u32,
                abend: 0,
            });
        }
        let command_rc = decode_eval(eval.length, &eval.data)?;
        let lines = self.cursor.read_new_lines(link, &self.out_dd)?;
        info!(exec = %self.exec, command_rc, lines = lines.len(), "legacy command complete");
        Ok(InvocationOutcome {
            service_rc: r15,
            command_rc,
            reason_code: 0,
            abend_code: 0,
            lines,
        })
    }
}

impl Default for LegacyCapture {
    fn default() -> Self {
        Self::new(DEFAULT_EXEC, DEFAULT_EXEC_DD, DEFAULT_OUT_DD)
    }
}
