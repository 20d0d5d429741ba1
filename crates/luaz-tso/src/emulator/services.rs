//! Service routines behind each emulated entry point.

use tracing::debug;

use super::catalog::{Dataset, OUTPUT_LRECL};
use super::commands::{self, CommandEnv, CommandResult};
use super::{DdnameReply, SimHost};
use crate::abi::dair::{self, dapb08, dapb18, dapl, DatasetStatus};
use crate::abi::eftsr::{self, EftsrFlags, TOKEN_SIZE};
use crate::abi::irx::{self, execblk, evalblk, ARG_END, EXECBLK_ACRONYM};
use crate::abi::storage::SUBPOOL_HOST;
use crate::abi::{ParmList, Storage};
use crate::ebcdic;
use crate::error::{Result, TsoError};
use crate::invoke::AUTHORIZED_MARKER;
use crate::operands::parse_command;

/// IKJEFTSR reason: caller is not APF authorized.
const REASON_NOT_AUTHORIZED: u32 = 0x0000_0014;
/// IKJEFTSR reason: token not issued by IKJEFTSI.
const REASON_BAD_TOKEN: u32 = 0x0000_0018;
/// IKJEFTSR reason: output DD not allocated.
const REASON_OUTDD: u32 = 0x0000_001C;
/// IKJEFTSR reason: command must run authorized.
const REASON_AUTHCMD: u32 = 0x0000_0028;

/// CPPL size: CBUF, UPT, PSCB, ECT.
const CPPL_SIZE: usize = 16;

/// IRXEXEC return code for an exec that could not be run.
const IRX_RC_NOT_RUN: i32 = 20;

fn usable_probe_rc(rc: i32) -> bool {
    matches!(rc, 0 | 8 | 24)
}

impl SimHost {
    // -----------------------------------------------------------------------
    // IKJTSOEV
    // -----------------------------------------------------------------------

    pub(super) fn svc_ikjtsoev(&mut self, storage: &mut Storage, r1: u32) -> Result<i32> {
        let p = ParmList::decode_exact(storage, r1, 5)?;
        self.probe_count += 1;
        let probe = self.probe;
        // A repeat probe in an established environment reports rc 8.
        let rc = if probe.rc == 0 && self.cppl.is_some() { 8 } else { probe.rc };
        let cppl = if usable_probe_rc(rc) {
            self.ensure_cppl(storage)?
        } else {
            0
        };
        storage.write_i32(p[1], rc)?;
        storage.write_u32(p[2], probe.reason)?;
        storage.write_u32(p[3], probe.abend)?;
        storage.write_u32(p[4], cppl)?;
        debug!(rc, cppl = format_args!("{cppl:#010x}"), "IKJTSOEV");
        Ok(rc)
    }

    fn ensure_cppl(&mut self, storage: &mut Storage) -> Result<u32> {
        if let Some(cppl) = self.cppl {
            return Ok(cppl);
        }
        let cppl = storage.getmain(SUBPOOL_HOST, CPPL_SIZE)?;
        // CBUF, UPT, PSCB, ECT
        for (i, len) in [(0u32, 132usize), (1, 24), (2, 72), (3, 56)] {
            let block = storage.getmain(SUBPOOL_HOST, len)?;
            storage.write_u32(cppl + i * 4, block)?;
        }
        self.cppl = Some(cppl);
        Ok(cppl)
    }

    // -----------------------------------------------------------------------
    // TSODALC / TSODFRE
    // -----------------------------------------------------------------------

    /// Decode the common wrapper parameters: CPPL, DDname, rc, catalog rc, work.
    fn dair_parms(&self, storage: &mut Storage, r1: u32, dapb_offset: usize) -> Result<DairCall> {
        let p = ParmList::decode_exact(storage, r1, 5)?;
        let work = p[4];
        storage.read(work, dair::WORK_SIZE)?;

        // Build the DAPL the way the wrapper does, from the caller's CPPL.
        let (upt, pscb, ect) = match storage.read(p[0], CPPL_SIZE) {
            Ok(_) if p[0] != 0 => (
                storage.read_u32(p[0] + 4)?,
                storage.read_u32(p[0] + 8)?,
                storage.read_u32(p[0] + 12)?,
            ),
            _ => (0, 0, 0),
        };
        let d = work + dair::DAPL_OFFSET as u32;
        storage.write_u32(d + dapl::UPT as u32, upt)?;
        storage.write_u32(d + dapl::ECT as u32, ect)?;
        storage.write_u32(d + dapl::ECB as u32, work + dair::ECB_OFFSET as u32)?;
        storage.write_u32(d + dapl::PSCB as u32, pscb)?;
        storage.write_u32(d + dapl::DAPB as u32, work + dapb_offset as u32)?;

        let requested = ebcdic::decode_padded(storage.read(p[1], 8)?);
        Ok(DairCall {
            work,
            rc_addr: p[2],
            cat_rc_addr: p[3],
            requested,
        })
    }

    fn dair_finish(
        &self,
        storage: &mut Storage,
        call: &DairCall,
        block: usize,
        outcome: DairOutcome,
    ) -> Result<i32> {
        let w = call.work;
        // DAPB08 and DAPB18 share the CD/FLG/DARC/CTRC/PDSN/DDN header.
        let base = w + block as u32;
        storage.write(base + dapb08::DARC as u32, &outcome.darc.to_be_bytes())?;
        storage.write(base + dapb08::CTRC as u32, &outcome.ctrc.to_be_bytes())?;
        storage.write(base + dapb08::FLG as u32, &[outcome.flags])?;
        if let Some(dd) = &outcome.ddname {
            storage.write(base + dapb08::DDN as u32, &ebcdic::encode_padded(dd, 8))?;
        }
        storage.write_i32(w + dair::DAIR_RC_OFFSET as u32, outcome.rc)?;
        storage.write_u32(w + dair::DAIR_REASON_OFFSET as u32, u32::from(outcome.darc))?;
        storage.write_i32(call.rc_addr, outcome.rc)?;
        storage.write_i32(call.cat_rc_addr, i32::from(outcome.ctrc))?;
        Ok(outcome.rc)
    }

    pub(super) fn svc_tsodalc(&mut self, storage: &mut Storage, r1: u32) -> Result<i32> {
        let call = self.dair_parms(storage, r1, dair::DAPB08_OFFSET)?;
        let b = call.work + dair::DAPB08_OFFSET as u32;

        let code = storage.read(b + dapb08::CD as u32, 2)?;
        if u16::from_be_bytes([code[0], code[1]]) != dair::DA08CD {
            return self.dair_finish(storage, &call, dair::DAPB08_OFFSET, DairOutcome::parm_error());
        }
        let status_flag = storage.read(b + dapb08::DSP1 as u32, 1)?[0];
        let Some(status) = DatasetStatus::from_flag(status_flag) else {
            return self.dair_finish(storage, &call, dair::DAPB08_OFFSET, DairOutcome::parm_error());
        };

        let pdsn = storage.read_u32(b + dapb08::PDSN as u32)?;
        let dsname = if pdsn == 0 {
            String::new()
        } else {
            let len = storage.read(pdsn, 2)?;
            let len = usize::from(u16::from_be_bytes([len[0], len[1]])).min(44);
            ebcdic::decode(storage.read(pdsn + 2, len)?)
        };

        let temporary = dsname.is_empty();
        let dsname = if temporary {
            self.temp_seq += 1;
            let now = self.now();
            format!(
                "SYS{}.T{}.RA000.LUZ{:05}",
                now.format("%y%j"),
                now.format("%H%M%S"),
                self.temp_seq
            )
        } else {
            dsname.to_ascii_uppercase()
        };

        if !temporary && !self.catalog.contains(&dsname) {
            if status == DatasetStatus::New || status == DatasetStatus::Mod {
                self.catalog.define(Dataset::sequential(&dsname, 80));
            } else {
                return self.dair_finish(
                    storage,
                    &call,
                    dair::DAPB08_OFFSET,
                    DairOutcome::failed(dair::DARC_DSN_NOT_FOUND, 8),
                );
            }
        }

        let system = self.ddname_reply == DdnameReply::System;
        let requested = (!system && !call.requested.is_empty()).then_some(call.requested.as_str());
        match self.dd.allocate(requested, &dsname, status, temporary) {
            Ok(ddname) => {
                if temporary {
                    let mut ds = Dataset::sequential(&dsname, OUTPUT_LRECL);
                    ds.temporary = true;
                    self.catalog.define(ds);
                }
                debug!(%ddname, %dsname, ?status, "DAIR allocate");
                let reported = match &self.ddname_reply {
                    DdnameReply::Overwrite(text) => text.clone(),
                    _ => ddname,
                };
                self.dair_finish(
                    storage,
                    &call,
                    dair::DAPB08_OFFSET,
                    DairOutcome {
                        ddname: Some(reported),
                        ..DairOutcome::ok()
                    },
                )
            }
            Err(e) => {
                debug!(ddname = %call.requested, error = ?e, "DAIR allocate refused");
                let outcome = if e.darc() == 0 {
                    DairOutcome::parm_error()
                } else {
                    DairOutcome::failed(e.darc(), 0)
                };
                self.dair_finish(storage, &call, dair::DAPB08_OFFSET, outcome)
            }
        }
    }

    pub(super) fn svc_tsodfre(&mut self, storage: &mut Storage, r1: u32) -> Result<i32> {
        let call = self.dair_parms(storage, r1, dair::DAPB18_OFFSET)?;
        let b = call.work + dair::DAPB18_OFFSET as u32;
        let code = storage.read(b + dapb18::CD as u32, 2)?;
        if u16::from_be_bytes([code[0], code[1]]) != dair::DA18CD {
            return self.dair_finish(storage, &call, dair::DAPB18_OFFSET, DairOutcome::parm_error());
        }
        if let Some(darc) = self.free_failure {
            return self.dair_finish(storage, &call, dair::DAPB18_OFFSET, DairOutcome::failed(darc, 0));
        }
        match self.dd.unallocate(&call.requested) {
            Ok(entry) => {
                if entry.temporary {
                    self.catalog.remove(&entry.dsname);
                }
                debug!(ddname = %entry.ddname, dsname = %entry.dsname, "DAIR unallocate");
                self.dair_finish(
                    storage,
                    &call,
                    dair::DAPB18_OFFSET,
                    DairOutcome {
                        ddname: Some(entry.ddname),
                        ..DairOutcome::ok()
                    },
                )
            }
            Err(e) => {
                self.dair_finish(storage, &call, dair::DAPB18_OFFSET, DairOutcome::failed(e.darc(), 0))
            }
        }
    }

    // -----------------------------------------------------------------------
    // IKJEFTSI
    // -----------------------------------------------------------------------

    pub(super) fn svc_ikjeftsi(&mut self, storage: &mut Storage, r1: u32) -> Result<i32> {
        let p = ParmList::decode_exact(storage, r1, 6)?;
        if let Some((error, reason)) = self.prepare_error {
            storage.write(p[2], &[0u8; TOKEN_SIZE])?;
            storage.write_i32(p[3], error)?;
            storage.write_u32(p[4], 0)?;
            storage.write_u32(p[5], reason)?;
            return Ok(error);
        }
        let mut token = [0u8; TOKEN_SIZE];
        token.copy_from_slice(&ebcdic::encode(&format!("EFTSI{:011}", self.next_token)));
        self.next_token += 1;
        self.tokens.insert(token);
        storage.write(p[2], &token)?;
        storage.write_i32(p[3], 0)?;
        storage.write_u32(p[4], 0)?;
        storage.write_u32(p[5], 0)?;
        Ok(0)
    }

    // -----------------------------------------------------------------------
    // IKJEFTSR / TSOEFTR
    // -----------------------------------------------------------------------

    pub(super) fn svc_ikjeftsr(
        &mut self,
        storage: &mut Storage,
        r1: u32,
        via_processor: bool,
    ) -> Result<i32> {
        let p = ParmList::decode(storage, r1)?;
        if p.len() != eftsr::EFTSR_PARMS && p.len() != eftsr::EFTSR_PARMS - 1 {
            return Err(TsoError::InvalidParmList {
                reason: format!("IKJEFTSR expects 9 or 10 parameters, found {}", p.len()),
            });
        }
        let (rc_addr, reason_addr, abend_addr) = (p[3], p[4], p[5]);
        let fail = |storage: &mut Storage, rc: i32, reason: u32| -> Result<i32> {
            storage.write_i32(rc_addr, 0)?;
            storage.write_u32(reason_addr, reason)?;
            storage.write_u32(abend_addr, 0)?;
            Ok(rc)
        };

        let f = storage.read(p[0], 4)?;
        let flags = EftsrFlags::from_bytes([f[0], f[1], f[2], f[3]]);
        if flags.function != eftsr::FLAG_COMMAND {
            return fail(storage, eftsr::RC_PARM_ERROR, 0x04);
        }
        let len = storage.read_u32(p[2])? as usize;
        if len == 0 || len > eftsr::MAX_COMMAND_LEN {
            return fail(storage, eftsr::RC_PARM_ERROR, 0x08);
        }
        let mut text = ebcdic::decode(storage.read(p[1], len)?);

        let mut token = [0u8; TOKEN_SIZE];
        token.copy_from_slice(storage.read(p[8], TOKEN_SIZE)?);
        if !self.tokens.contains(&token) {
            return fail(storage, eftsr::RC_ENV_ERROR, REASON_BAD_TOKEN);
        }

        let outdd = match p.get(9) {
            Some(&addr) => ebcdic::decode_padded(storage.read(addr, 8)?),
            None => String::new(),
        };

        let authorized = if via_processor {
            let stripped = text
                .strip_prefix(AUTHORIZED_MARKER)
                .filter(|_| flags.authorized)
                .map(str::to_string);
            let Some(rest) = stripped else {
                return fail(storage, eftsr::RC_PARM_ERROR, REASON_NOT_AUTHORIZED);
            };
            text = rest;
            true
        } else {
            if flags.authorized {
                return fail(storage, eftsr::RC_PARM_ERROR, REASON_NOT_AUTHORIZED);
            }
            false
        };

        let parsed = parse_command(&text);
        if !authorized && self.authcmd.contains(&parsed.name) {
            return fail(storage, eftsr::RC_PARM_ERROR, REASON_AUTHCMD);
        }
        if !outdd.is_empty() && self.dd.lookup(&outdd).is_none() {
            return fail(storage, eftsr::RC_PARM_ERROR, REASON_OUTDD);
        }

        let result = self.run_command(&text);
        self.route_output(&outdd, &result.output)?;
        debug!(command = %parsed.name, rc = result.rc, %outdd, authorized, "IKJEFTSR");

        storage.write_i32(rc_addr, result.rc)?;
        storage.write_u32(reason_addr, 0)?;
        storage.write_u32(abend_addr, 0)?;
        Ok(if result.rc == 0 { eftsr::RC_OK } else { eftsr::RC_FUNCTION_RC })
    }

    fn run_command(&self, text: &str) -> CommandResult {
        let env = CommandEnv {
            userid: &self.userid,
            dd: &self.dd,
            catalog: &self.catalog,
            authcmd: &self.authcmd,
            now: self.now(),
            logon: self.logon,
        };
        commands::execute(&env, &parse_command(text))
    }

    /// Send command output to the dataset behind `ddname`, or to the
    /// terminal when no DD is named.
    fn route_output(&mut self, ddname: &str, lines: &[String]) -> Result<()> {
        if ddname.is_empty() {
            for line in lines {
                self.terminal.push((crate::host::MessageLevel::Info, line.clone()));
            }
            return Ok(());
        }
        for line in lines {
            self.append_to_dd(ddname, line)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // IRXEXEC
    // -----------------------------------------------------------------------

    pub(super) fn svc_irxexec(&mut self, storage: &mut Storage, r1: u32) -> Result<i32> {
        let p = ParmList::decode_exact(storage, r1, irx::IRXEXEC_PARMS)?;
        let rexx_rc_addr = p[9];

        let execblk_addr = storage.read_u32(p[0])?;
        let eb = storage.read(execblk_addr, execblk::SIZE)?.to_vec();
        if ebcdic::decode(&eb[execblk::ACRYN..execblk::ACRYN + 8]) != EXECBLK_ACRONYM
            || u32::from_be_bytes([eb[8], eb[9], eb[10], eb[11]]) != execblk::SIZE as u32
        {
            storage.write_i32(rexx_rc_addr, 0)?;
            return Ok(IRX_RC_NOT_RUN);
        }
        let member = ebcdic::decode_padded(&eb[execblk::MEMBER..execblk::MEMBER + 8]);
        let ddname = ebcdic::decode_padded(&eb[execblk::DDNAME..execblk::DDNAME + 8]);
        let library = self
            .dd
            .lookup(&ddname)
            .and_then(|e| self.catalog.get(&e.dsname));
        if !library.is_some_and(|lib| lib.has_member(&member)) {
            debug!(%member, %ddname, "IRXEXEC exec not found");
            storage.write_i32(rexx_rc_addr, 0)?;
            return Ok(IRX_RC_NOT_RUN);
        }

        let args = read_arg_table(storage, storage.read_u32(p[1])?)?;
        let (Some(func), Some(command)) = (args.first(), args.get(1)) else {
            storage.write_i32(rexx_rc_addr, 0)?;
            return Ok(IRX_RC_NOT_RUN);
        };
        if !func.eq_ignore_ascii_case("CMD") {
            storage.write_i32(rexx_rc_addr, 0)?;
            return Ok(IRX_RC_NOT_RUN);
        }
        let outdd = args.get(2).cloned().unwrap_or_else(|| "TSOOUT".to_string());

        let parsed = parse_command(command);
        let result = if self.authcmd.contains(&parsed.name) {
            CommandResult::error(&format!(
                "IKJ56503I COMMAND {} NOT SUPPORTED IN AN UNAUTHORIZED ENVIRONMENT",
                parsed.name
            ))
        } else {
            self.run_command(command)
        };
        let outdd = if self.dd.lookup(&outdd).is_some() { outdd } else { String::new() };
        self.route_output(&outdd, &result.output)?;
        debug!(%member, command = %parsed.name, rc = result.rc, "IRXEXEC");

        let (length, data) = match &self.eval_override {
            Some((length, data)) => (*length, data.clone()),
            None => {
                let digits = ebcdic::encode(&result.rc.to_string());
                (digits.len() as i32, digits)
            }
        };
        let evalblk_addr = storage.read_u32(p[5])?;
        let evlen = evalblk_addr + evalblk::EVLEN as u32;
        storage.write_i32(evlen, length)?;
        let n = data.len().min(evalblk::DATA_SIZE);
        storage.write(evalblk_addr + evalblk::EVDATA as u32, &data[..n])?;
        storage.write_i32(rexx_rc_addr, 0)?;
        Ok(0)
    }
}

fn read_arg_table(storage: &Storage, mut entry: u32) -> Result<Vec<String>> {
    let mut args = Vec::new();
    loop {
        let ptr = storage.read_u32(entry)?;
        let len = storage.read_u32(entry + 4)?;
        if ptr == ARG_END && len == ARG_END {
            return Ok(args);
        }
        args.push(ebcdic::decode(storage.read(ptr, len as usize)?));
        entry += 8;
        if args.len() > 64 {
            return Err(TsoError::InvalidParmList {
                reason: "argument table not terminated".to_string(),
            });
        }
    }
}

struct DairCall {
    work: u32,
    rc_addr: u32,
    cat_rc_addr: u32,
    requested: String,
}

struct DairOutcome {
    rc: i32,
    darc: u16,
    ctrc: u16,
    flags: u8,
    ddname: Option<String>,
}

impl DairOutcome {
    fn ok() -> Self {
        Self {
            rc: 0,
            darc: 0,
            ctrc: 0,
            flags: 0,
            ddname: None,
        }
    }

    fn failed(darc: u16, ctrc: u16) -> Self {
        Self {
            rc: dair::DAIR_RC_DYNALLOC_ERROR,
            darc,
            ctrc,
            ..Self::ok()
        }
    }

    fn parm_error() -> Self {
        Self {
            rc: dair::DAIR_RC_INVALID_PARMS,
            ..Self::ok()
        }
    }
}
