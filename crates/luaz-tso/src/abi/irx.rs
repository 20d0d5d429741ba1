//! IRXEXEC control blocks: EXECBLK, EVALBLK and the argument table.
//!
//! The interpreter call area is one contiguous block:
//!
//! ```text
//! +0    EXECBLK address word     (parm 1 points here)
//! +4    argument table address   (parm 2)
//! +8    flags                    (parm 3)
//! +12   EVALBLK address word     (parm 6)
//! +16   REXX return code         (parm 10, last)
//! +24   EXECBLK    48
//! +72   EVALBLK   272
//! +344  argument table, then argument strings
//! ```

use crate::abi::bytes;
use crate::abi::plist::{Last, ParmList};
use crate::ebcdic;
use crate::error::Result;

/// IRXEXEC flags: invoke as an external function.
pub const FLAG_EXTERNAL_FUNCTION: u32 = 0x2000_0000;

/// Argument table terminator word.
pub const ARG_END: u32 = 0xFFFF_FFFF;

/// EXECBLK acronym.
pub const EXECBLK_ACRONYM: &str = "IRXEXECB";

/// EXECBLK field offsets.
pub mod execblk {
    pub const ACRYN: usize = 0;
    pub const LENGTH: usize = 8;
    pub const RESERVED: usize = 12;
    pub const MEMBER: usize = 16;
    pub const DDNAME: usize = 24;
    pub const SUBCOM: usize = 32;
    pub const DSNPTR: usize = 40;
    pub const DSNLEN: usize = 44;
    pub const SIZE: usize = 48;
}

/// EVALBLK field offsets.
pub mod evalblk {
    pub const EVPAD1: usize = 0;
    pub const EVSIZE: usize = 4;
    pub const EVLEN: usize = 8;
    pub const EVPAD2: usize = 12;
    pub const EVDATA: usize = 16;
    pub const DATA_SIZE: usize = 256;
    pub const SIZE: usize = EVDATA + DATA_SIZE;
    /// EVSIZE is expressed in doublewords.
    pub const SIZE_DOUBLEWORDS: u32 = (SIZE / 8) as u32;
}

/// Offsets within the call area.
pub mod area {
    pub const EXECBLK_PTR: usize = 0;
    pub const ARGTABLE_PTR: usize = 4;
    pub const FLAGS: usize = 8;
    pub const EVALBLK_PTR: usize = 12;
    pub const REXX_RC: usize = 16;
    pub const EXECBLK: usize = 24;
    pub const EVALBLK: usize = 72;
    pub const ARGTABLE: usize = 344;
}

/// Number of IRXEXEC parameters.
pub const IRXEXEC_PARMS: usize = 10;

/// Request to run one exec as an external function.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub member: String,
    pub ddname: String,
    pub subcom: String,
    pub args: Vec<String>,
}

impl ExecRequest {
    fn argtable_size(&self) -> usize {
        (self.args.len() + 1) * 8
    }

    /// Total call area size.
    pub fn size(&self) -> usize {
        let strings: usize = self.args.iter().map(|a| a.len()).sum();
        area::ARGTABLE + self.argtable_size() + strings.max(1)
    }

    /// Serialize the call area as it will sit at `base`.
    pub fn encode(&self, base: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size()];
        let at = |off: usize| base + off as u32;

        bytes::write_u32(&mut buf, area::EXECBLK_PTR, at(area::EXECBLK))?;
        bytes::write_u32(&mut buf, area::ARGTABLE_PTR, at(area::ARGTABLE))?;
        bytes::write_u32(&mut buf, area::FLAGS, FLAG_EXTERNAL_FUNCTION)?;
        bytes::write_u32(&mut buf, area::EVALBLK_PTR, at(area::EVALBLK))?;

        let e = area::EXECBLK;
        bytes::write_bytes(&mut buf, e + execblk::ACRYN, &ebcdic::encode(EXECBLK_ACRONYM))?;
        bytes::write_u32(&mut buf, e + execblk::LENGTH, execblk::SIZE as u32)?;
        bytes::write_bytes(&mut buf, e + execblk::MEMBER, &ebcdic::encode_padded(&self.member, 8))?;
        bytes::write_bytes(&mut buf, e + execblk::DDNAME, &ebcdic::encode_padded(&self.ddname, 8))?;
        bytes::write_bytes(&mut buf, e + execblk::SUBCOM, &ebcdic::encode_padded(&self.subcom, 8))?;

        bytes::write_u32(&mut buf, area::EVALBLK + evalblk::EVSIZE, evalblk::SIZE_DOUBLEWORDS)?;

        let mut entry = area::ARGTABLE;
        let mut string = area::ARGTABLE + self.argtable_size();
        for arg in &self.args {
            let text = ebcdic::encode(arg);
            bytes::write_u32(&mut buf, entry, at(string))?;
            bytes::write_u32(&mut buf, entry + 4, text.len() as u32)?;
            bytes::write_bytes(&mut buf, string, &text)?;
            entry += 8;
            string += text.len();
        }
        bytes::write_u32(&mut buf, entry, ARG_END)?;
        bytes::write_u32(&mut buf, entry + 4, ARG_END)?;
        Ok(buf)
    }

    /// Build the IRXEXEC parameter list for an area at `base`.
    ///
    /// Parameter 5 carries the CPPL address; the instance block, work area,
    /// user field and environment block parameters are zero.
    pub fn parms(base: u32, cppl: u32) -> ParmList {
        let at = |off: usize| base + off as u32;
        ParmList::new(
            &[
                at(area::EXECBLK_PTR),
                at(area::ARGTABLE_PTR),
                at(area::FLAGS),
                0,
                cppl,
                at(area::EVALBLK_PTR),
                0,
                0,
                0,
            ],
            Last(at(area::REXX_RC)),
        )
    }
}

/// EVALBLK contents after the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    /// EVLEN as stored, which may be negative or oversized.
    pub length: i32,
    pub data: Vec<u8>,
}

/// Read the EVALBLK out of a call area.
pub fn decode_evalblk(area_bytes: &[u8]) -> Result<EvalResult> {
    let b = area::EVALBLK;
    Ok(EvalResult {
        length: bytes::read_i32(area_bytes, b + evalblk::EVLEN)?,
        data: bytes::read_bytes(area_bytes, b + evalblk::EVDATA, evalblk::DATA_SIZE)?.to_vec(),
    })
}

/// Read the REXX return code out of a call area.
pub fn decode_rexx_rc(area_bytes: &[u8]) -> Result<i32> {
    bytes::read_i32(area_bytes, area::REXX_RC)
}
