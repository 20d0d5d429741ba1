//! DAIR work area used by the TSODALC/TSODFRE wrappers.
//!
//! The caller supplies one 256-byte area. The wrapper builds its DAPL inside
//! it, points the DAPL at the DAPB08 (allocate) or DAPB18 (unallocate)
//! request block, and leaves the DAIR results in place:
//!
//! ```text
//! +0x00  DAPL      20  UPT, ECT, ECB, PSCB, DAPB addresses
//! +0x14  ECB        4
//! +0x18  DAPB08    84  IKJDAP08 allocate request
//! +0x70  DAPB18    40  IKJDAP18 unallocate request
//! +0x98  DSNAME    46  halfword length + 44-byte name
//! +0xC8  DAIR R15   4
//! +0xCC  reason     4
//! ```

use crate::abi::bytes;
use crate::alloc::AllocationResult;
use crate::ebcdic;
use crate::error::Result;

/// Work area size expected by TSODALC/TSODFRE.
pub const WORK_SIZE: usize = 256;

pub const DAPL_OFFSET: usize = 0x00;
pub const DAPL_SIZE: usize = 20;
pub const ECB_OFFSET: usize = 0x14;
pub const DAPB08_OFFSET: usize = 0x18;
pub const DAPB18_OFFSET: usize = 0x70;
pub const DSNAME_OFFSET: usize = 0x98;
pub const DSNAME_SIZE: usize = 46;
pub const DAIR_RC_OFFSET: usize = 0xC8;
pub const DAIR_REASON_OFFSET: usize = 0xCC;

/// DAPL field offsets.
pub mod dapl {
    pub const UPT: usize = 0;
    pub const ECT: usize = 4;
    pub const ECB: usize = 8;
    pub const PSCB: usize = 12;
    pub const DAPB: usize = 16;
}

/// IKJDAP08 field offsets, relative to the start of the block.
pub mod dapb08 {
    pub const SIZE: usize = 84;
    pub const CD: usize = 0;
    pub const FLG: usize = 2;
    pub const DARC: usize = 4;
    pub const CTRC: usize = 6;
    pub const PDSN: usize = 8;
    pub const DDN: usize = 12;
    pub const UNIT: usize = 20;
    pub const SER: usize = 28;
    pub const BLK: usize = 36;
    pub const PQTY: usize = 40;
    pub const SQTY: usize = 44;
    pub const DQTY: usize = 48;
    pub const MNM: usize = 52;
    pub const PSWD: usize = 60;
    pub const DSP1: usize = 68;
    pub const DPS2: usize = 69;
    pub const DPS3: usize = 70;
    pub const CTL: usize = 71;
    pub const DSO: usize = 75;
    pub const ALN: usize = 76;
}

/// IKJDAP18 field offsets, relative to the start of the block.
pub mod dapb18 {
    pub const SIZE: usize = 40;
    pub const CD: usize = 0;
    pub const FLG: usize = 2;
    pub const DARC: usize = 4;
    pub const CTRC: usize = 6;
    pub const PDSN: usize = 8;
    pub const DDN: usize = 12;
    pub const MNM: usize = 20;
    pub const SCLS: usize = 28;
    pub const DPS2: usize = 30;
    pub const CTL: usize = 31;
    pub const JBNM: usize = 32;
}

/// DAIR entry code: allocate by dsname.
pub const DA08CD: u16 = 0x0008;
/// DAIR entry code: unallocate.
pub const DA18CD: u16 = 0x0018;

/// DA08DSP1 status flags.
pub const DA08_SHR: u8 = 0x08;
pub const DA08_NEW: u8 = 0x04;
pub const DA08_MOD: u8 = 0x02;
pub const DA08_OLD: u8 = 0x01;

/// DA08DPS2 / DA18DPS2 disposition flags.
pub const DISP_KEEP: u8 = 0x08;
pub const DISP_DELETE: u8 = 0x04;
pub const DISP_CATLG: u8 = 0x02;
pub const DISP_UNCATLG: u8 = 0x01;

/// DYNALLOC reason: requested DDname is in use.
pub const DARC_DDNAME_IN_USE: u16 = 0x0410;
/// DYNALLOC reason: DDname not allocated.
pub const DARC_DDNAME_NOT_FOUND: u16 = 0x0438;
/// DYNALLOC reason: dataset not in catalog.
pub const DARC_DSN_NOT_FOUND: u16 = 0x1708;

/// DAIR return code for a DYNALLOC failure.
pub const DAIR_RC_DYNALLOC_ERROR: i32 = 12;
/// DAIR return code for a bad parameter list.
pub const DAIR_RC_INVALID_PARMS: i32 = 16;

/// Dataset status requested on allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetStatus {
    Shr,
    Old,
    New,
    Mod,
}

impl DatasetStatus {
    /// DA08DSP1 flag byte.
    pub fn flag(self) -> u8 {
        match self {
            Self::Shr => DA08_SHR,
            Self::Old => DA08_OLD,
            Self::New => DA08_NEW,
            Self::Mod => DA08_MOD,
        }
    }

    /// Status from a DA08DSP1 flag byte; zero means the wrapper default (NEW).
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 | DA08_NEW => Some(Self::New),
            DA08_SHR => Some(Self::Shr),
            DA08_OLD => Some(Self::Old),
            DA08_MOD => Some(Self::Mod),
            _ => None,
        }
    }

    /// Keyword form as written in TSO operands.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Shr => "SHR",
            Self::Old => "OLD",
            Self::New => "NEW",
            Self::Mod => "MOD",
        }
    }
}

/// Fill an allocate request into a zeroed work area at `work_addr`.
///
/// An empty `dsname` requests a temporary dataset.
pub fn prepare_allocate(
    work: &mut [u8],
    work_addr: u32,
    ddname: &str,
    dsname: Option<&str>,
    status: DatasetStatus,
) -> Result<()> {
    let b = DAPB08_OFFSET;
    bytes::write_u16(work, b + dapb08::CD, DA08CD)?;
    bytes::write_u32(work, b + dapb08::PDSN, work_addr + DSNAME_OFFSET as u32)?;
    bytes::write_bytes(work, b + dapb08::DDN, &ebcdic::encode_padded(ddname, 8))?;
    bytes::write_u8(work, b + dapb08::DSP1, status.flag())?;
    let disp = if dsname.is_some() { DISP_KEEP } else { DISP_DELETE };
    bytes::write_u8(work, b + dapb08::DPS2, disp)?;
    write_dsname(work, dsname.unwrap_or(""))
}

/// Fill an unallocate request into a zeroed work area at `work_addr`.
pub fn prepare_free(work: &mut [u8], work_addr: u32, ddname: &str) -> Result<()> {
    let b = DAPB18_OFFSET;
    bytes::write_u16(work, b + dapb18::CD, DA18CD)?;
    bytes::write_u32(work, b + dapb18::PDSN, work_addr + DSNAME_OFFSET as u32)?;
    bytes::write_bytes(work, b + dapb18::DDN, &ebcdic::encode_padded(ddname, 8))?;
    write_dsname(work, "")
}

fn write_dsname(work: &mut [u8], dsname: &str) -> Result<()> {
    let name = ebcdic::encode_padded(dsname, DSNAME_SIZE - 2);
    let len = dsname.chars().count().min(DSNAME_SIZE - 2) as u16;
    bytes::write_u16(work, DSNAME_OFFSET, len)?;
    bytes::write_bytes(work, DSNAME_OFFSET + 2, &name)
}

/// Read the dataset name buffer (empty for a temporary dataset).
pub fn read_dsname(work: &[u8]) -> Result<String> {
    let len = (bytes::read_u16(work, DSNAME_OFFSET)? as usize).min(DSNAME_SIZE - 2);
    Ok(ebcdic::decode(bytes::read_bytes(work, DSNAME_OFFSET + 2, len)?))
}

/// Decode the results of an allocate request.
pub fn decode_allocate(work: &[u8]) -> Result<AllocationResult> {
    decode_block(work, DAPB08_OFFSET, dapb08::FLG, dapb08::DARC, dapb08::CTRC, dapb08::DDN)
}

/// Decode the results of an unallocate request.
pub fn decode_free(work: &[u8]) -> Result<AllocationResult> {
    decode_block(work, DAPB18_OFFSET, dapb18::FLG, dapb18::DARC, dapb18::CTRC, dapb18::DDN)
}

fn decode_block(
    work: &[u8],
    base: usize,
    flg: usize,
    darc: usize,
    ctrc: usize,
    ddn: usize,
) -> Result<AllocationResult> {
    Ok(AllocationResult {
        service_rc: bytes::read_i32(work, DAIR_RC_OFFSET)?,
        reason_code: bytes::read_u16(work, base + darc)?,
        catalog_rc: bytes::read_u16(work, base + ctrc)?,
        secondary_flags: bytes::read_u8(work, base + flg)?,
        assigned_name: ebcdic::decode_padded(bytes::read_bytes(work, base + ddn, 8)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_work_area_layout() {
        assert_eq!(DAPL_OFFSET + DAPL_SIZE, ECB_OFFSET);
        assert_eq!(ECB_OFFSET + 4, DAPB08_OFFSET);
        assert_eq!(DAPB08_OFFSET, 24);
        assert!(DAPB08_OFFSET + dapb08::SIZE <= DAPB18_OFFSET);
        assert_eq!(DAPB18_OFFSET, 112);
        assert_eq!(DAPB18_OFFSET + dapb18::SIZE, DSNAME_OFFSET);
        assert_eq!(DSNAME_OFFSET, 152);
        assert!(DSNAME_OFFSET + DSNAME_SIZE <= DAIR_RC_OFFSET);
        assert_eq!(DAIR_RC_OFFSET, 200);
        assert_eq!(DAIR_REASON_OFFSET, 204);
        assert!(DAIR_REASON_OFFSET + 4 <= WORK_SIZE);
    }

    #[test]
    fn golden_dapb08_layout() {
        assert_eq!(dapb08::DARC, 4);
        assert_eq!(dapb08::CTRC, 6);
        assert_eq!(dapb08::PDSN, 8);
        assert_eq!(dapb08::DDN, 12);
        assert_eq!(dapb08::UNIT, 20);
        assert_eq!(dapb08::MNM, 52);
        assert_eq!(dapb08::DSP1, 68);
        assert_eq!(dapb08::ALN + 8, dapb08::SIZE);
    }

    #[test]
    fn golden_dapb18_layout() {
        assert_eq!(dapb18::DDN, 12);
        assert_eq!(dapb18::MNM, 20);
        assert_eq!(dapb18::DPS2, 30);
        assert_eq!(dapb18::JBNM + 8, dapb18::SIZE);
    }

    #[test]
    fn allocate_request_fields() {
        let mut work = [0u8; WORK_SIZE];
        prepare_allocate(&mut work, 0x0002_0000, "LUZ00001", None, DatasetStatus::New).unwrap();
        assert_eq!(&work[0x18..0x1A], &[0x00, 0x08]);
        assert_eq!(&work[0x20..0x24], &[0x00, 0x02, 0x00, 0x98]);
        assert_eq!(ebcdic::decode(&work[0x24..0x2C]), "LUZ00001");
        assert_eq!(work[DAPB08_OFFSET + dapb08::DSP1], DA08_NEW);
        assert_eq!(work[DAPB08_OFFSET + dapb08::DPS2], DISP_DELETE);
        assert_eq!(read_dsname(&work).unwrap(), "");
    }

    #[test]
    fn allocate_request_with_dsname() {
        let mut work = [0u8; WORK_SIZE];
        prepare_allocate(&mut work, 0x1000, "INDD", Some("USER.DATA"), DatasetStatus::Shr)
            .unwrap();
        assert_eq!(read_dsname(&work).unwrap(), "USER.DATA");
        assert_eq!(work[DAPB08_OFFSET + dapb08::DSP1], DA08_SHR);
        assert_eq!(ebcdic::decode(&work[0x24..0x2C]), "INDD    ");
    }

    #[test]
    fn decode_results_big_endian() {
        let mut work = [0u8; WORK_SIZE];
        bytes::write_i32(&mut work, DAIR_RC_OFFSET, 12).unwrap();
        bytes::write_u16(&mut work, DAPB08_OFFSET + dapb08::DARC, DARC_DDNAME_IN_USE).unwrap();
        bytes::write_u16(&mut work, DAPB08_OFFSET + dapb08::CTRC, 0x0008).unwrap();
        bytes::write_u8(&mut work, DAPB08_OFFSET + dapb08::FLG, 0x40).unwrap();
        bytes::write_bytes(&mut work, DAPB08_OFFSET + dapb08::DDN, &ebcdic::encode("SYS00042"))
            .unwrap();
        let r = decode_allocate(&work).unwrap();
        assert_eq!(r.service_rc, 12);
        assert_eq!(r.reason_code, 0x0410);
        assert_eq!(r.catalog_rc, 8);
        assert_eq!(r.secondary_flags, 0x40);
        assert_eq!(r.assigned_name, "SYS00042");
    }

    #[test]
    fn free_request_fields() {
        let mut work = [0u8; WORK_SIZE];
        prepare_free(&mut work, 0x1000, "X").unwrap();
        assert_eq!(&work[0x70..0x72], &[0x00, 0x18]);
        assert_eq!(ebcdic::decode_padded(&work[0x7C..0x84]), "X");
        let r = decode_free(&work).unwrap();
        assert_eq!(r.service_rc, 0);
        assert_eq!(r.assigned_name, "X");
    }

    #[test]
    fn status_flags() {
        assert_eq!(DatasetStatus::from_flag(0), Some(DatasetStatus::New));
        assert_eq!(DatasetStatus::from_flag(DA08_MOD), Some(DatasetStatus::Mod));
        assert_eq!(DatasetStatus::from_flag(0xFF), None);
        assert_eq!(DatasetStatus::Old.keyword(), "OLD");
    }
}
