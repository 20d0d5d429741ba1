//! IKJEFTSI/IKJEFTSR control blocks.
//!
//! IKJEFTSI (prepare) fills a 16-byte token that IKJEFTSR (execute) must be
//! handed back. Both blocks are laid out contiguously so every parameter
//! address falls inside one GETMAINed area.

use crate::abi::bytes;
use crate::abi::plist::{Last, ParmList};
use crate::ebcdic;
use crate::error::{Result, TsoError};

/// Flag byte 2: environment authorization.
pub const FLAG_AUTHORIZED: u8 = 0x00;
pub const FLAG_UNAUTHORIZED: u8 = 0x01;
/// Flag byte 3: dump on abend.
pub const FLAG_NODUMP: u8 = 0x00;
pub const FLAG_DUMP: u8 = 0x01;
/// Flag byte 4: function type.
pub const FLAG_COMMAND: u8 = 0x01;
pub const FLAG_PROGRAM: u8 = 0x02;

/// Longest command text accepted.
pub const MAX_COMMAND_LEN: usize = 32_767;

/// Token length shared by both services.
pub const TOKEN_SIZE: usize = 16;

/// IKJEFTSR return code: function ran, its return code was zero.
pub const RC_OK: i32 = 0;
/// IKJEFTSR return code: function ran, nonzero return code.
pub const RC_FUNCTION_RC: i32 = 4;
/// IKJEFTSR return code: function abended.
pub const RC_ABEND: i32 = 12;
/// IKJEFTSR return code: parameter error.
pub const RC_PARM_ERROR: i32 = 20;
/// IKJEFTSR return code: environment error.
pub const RC_ENV_ERROR: i32 = 24;

/// IKJEFTSR flags fullword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EftsrFlags {
    pub authorized: bool,
    pub dump: bool,
    pub function: u8,
}

impl EftsrFlags {
    /// Unauthorized command, no dump.
    pub fn command() -> Self {
        Self {
            authorized: false,
            dump: false,
            function: FLAG_COMMAND,
        }
    }

    /// Authorized command, no dump.
    pub fn authorized_command() -> Self {
        Self {
            authorized: true,
            ..Self::command()
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [
            0x00,
            if self.authorized { FLAG_AUTHORIZED } else { FLAG_UNAUTHORIZED },
            if self.dump { FLAG_DUMP } else { FLAG_NODUMP },
            self.function,
        ]
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self {
            authorized: b[1] == FLAG_AUTHORIZED,
            dump: b[2] == FLAG_DUMP,
            function: b[3],
        }
    }
}

/// Offsets within the IKJEFTSI block.
pub mod si {
    pub const ECTPARM: usize = 0;
    pub const RESERVED: usize = 4;
    pub const TOKEN: usize = 8;
    pub const ERROR: usize = 24;
    pub const ABEND: usize = 28;
    pub const REASON: usize = 32;
    pub const SIZE: usize = 36;
}

/// Offsets within the IKJEFTSR call block.
pub mod call {
    pub const FLAGS: usize = 0;
    pub const CMD_LEN: usize = 4;
    pub const RC: usize = 8;
    pub const REASON: usize = 12;
    pub const ABEND: usize = 16;
    pub const PGM_PARM: usize = 20;
    pub const CPPL: usize = 24;
    pub const TOKEN: usize = 40;
    pub const OUTDD: usize = 56;
    pub const CMD: usize = 64;
}

/// Number of IKJEFTSR parameters, including the output DD.
pub const EFTSR_PARMS: usize = 10;

/// Results left in the IKJEFTSI block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareResult {
    pub token: [u8; TOKEN_SIZE],
    pub error: i32,
    pub abend: u32,
    pub reason: u32,
}

/// Build the IKJEFTSI parameter list for a block at `base`.
pub fn si_parms(base: u32) -> ParmList {
    let at = |off: usize| base + off as u32;
    ParmList::new(
        &[at(si::ECTPARM), at(si::RESERVED), at(si::TOKEN), at(si::ERROR), at(si::ABEND)],
        Last(at(si::REASON)),
    )
}

/// Decode an IKJEFTSI block after the call.
pub fn decode_si(block: &[u8]) -> Result<PrepareResult> {
    let mut token = [0u8; TOKEN_SIZE];
    token.copy_from_slice(bytes::read_bytes(block, si::TOKEN, TOKEN_SIZE)?);
    Ok(PrepareResult {
        token,
        error: bytes::read_i32(block, si::ERROR)?,
        abend: bytes::read_u32(block, si::ABEND)?,
        reason: bytes::read_u32(block, si::REASON)?,
    })
}

/// Image of an IKJEFTSR call block before the call.
#[derive(Debug, Clone)]
pub struct CallBlock {
    pub flags: EftsrFlags,
    pub command: Vec<u8>,
    pub token: [u8; TOKEN_SIZE],
    pub outdd: Option<String>,
}

impl CallBlock {
    pub fn new(flags: EftsrFlags, command: &str, token: [u8; TOKEN_SIZE]) -> Result<Self> {
        if command.is_empty() {
            return Err(TsoError::InvalidCommand {
                reason: "empty command text".to_string(),
            });
        }
        if command.len() > MAX_COMMAND_LEN {
            return Err(TsoError::InvalidCommand {
                reason: format!("command text exceeds {MAX_COMMAND_LEN} bytes"),
            });
        }
        Ok(Self {
            flags,
            command: ebcdic::encode(command),
            token,
            outdd: None,
        })
    }

    pub fn with_outdd(mut self, ddname: &str) -> Self {
        self.outdd = Some(ddname.to_string());
        self
    }

    /// Total block size.
    pub fn size(&self) -> usize {
        call::CMD + self.command.len()
    }

    /// Serialize the block.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size()];
        bytes::write_bytes(&mut buf, call::FLAGS, &self.flags.to_bytes())?;
        bytes::write_u32(&mut buf, call::CMD_LEN, self.command.len() as u32)?;
        bytes::write_bytes(&mut buf, call::TOKEN, &self.token)?;
        let outdd = self.outdd.as_deref().unwrap_or("");
        bytes::write_bytes(&mut buf, call::OUTDD, &ebcdic::encode_padded(outdd, 8))?;
        bytes::write_bytes(&mut buf, call::CMD, &self.command)?;
        Ok(buf)
    }

    /// Build the parameter list for a block placed at `base`.
    ///
    /// `cppl` addresses the caller's CPPL; zero selects the block's own
    /// zeroed CPPL area.
    pub fn parms(&self, base: u32, cppl: u32) -> ParmList {
        let at = |off: usize| base + off as u32;
        let cppl_parm = if cppl != 0 { cppl } else { at(call::CPPL) };
        ParmList::new(
            &[
                at(call::FLAGS),
                at(call::CMD),
                at(call::CMD_LEN),
                at(call::RC),
                at(call::REASON),
                at(call::ABEND),
                at(call::PGM_PARM),
                cppl_parm,
                at(call::TOKEN),
            ],
            Last(at(call::OUTDD)),
        )
    }
}

/// Outputs left in an IKJEFTSR call block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteResult {
    pub command_rc: i32,
    pub reason: u32,
    pub abend: u32,
}

/// Decode the outputs of an IKJEFTSR call block.
pub fn decode_call(block: &[u8]) -> Result<ExecuteResult> {
    Ok(ExecuteResult {
        command_rc: bytes::read_i32(block, call::RC)?,
        reason: bytes::read_u32(block, call::REASON)?,
        abend: bytes::read_u32(block, call::ABEND)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::plist::END_OF_LIST;

    #[test]
    fn flag_bytes() {
        assert_eq!(EftsrFlags::command().to_bytes(), [0x00, 0x01, 0x00, 0x01]);
        assert_eq!(
            EftsrFlags::authorized_command().to_bytes(),
            [0x00, 0x00, 0x00, 0x01]
        );
        let back = EftsrFlags::from_bytes([0x00, 0x01, 0x00, 0x01]);
        assert_eq!(back, EftsrFlags::command());
    }

    #[test]
    fn golden_si_layout() {
        assert_eq!(si::TOKEN, 8);
        assert_eq!(si::TOKEN + TOKEN_SIZE, si::ERROR);
        assert_eq!(si::REASON + 4, si::SIZE);
        let list = si_parms(0x0001_0000);
        let words = list.encode().unwrap();
        assert_eq!(words.len(), 6 * 4);
        assert_eq!(&words[20..24], &(0x0001_0020 | END_OF_LIST).to_be_bytes());
    }

    #[test]
    fn golden_call_block_layout() {
        assert_eq!(call::CPPL + 16, call::TOKEN);
        assert_eq!(call::TOKEN + TOKEN_SIZE, call::OUTDD);
        assert_eq!(call::OUTDD + 8, call::CMD);
        let block = CallBlock::new(EftsrFlags::command(), "TIME", [0xAB; 16])
            .unwrap()
            .with_outdd("LUZ00001");
        let buf = block.encode().unwrap();
        assert_eq!(buf.len(), 68);
        assert_eq!(&buf[0..4], &[0x00, 0x01, 0x00, 0x01]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 4]);
        assert_eq!(&buf[40..56], &[0xAB; 16]);
        assert_eq!(ebcdic::decode(&buf[56..64]), "LUZ00001");
        assert_eq!(&buf[64..68], &[0xE3, 0xC9, 0xD4, 0xC5]);
    }

    #[test]
    fn cppl_parameter_selection() {
        let block = CallBlock::new(EftsrFlags::command(), "TIME", [0; 16]).unwrap();
        let forwarded = block.parms(0x2000, 0x0005_0000).encode().unwrap();
        assert_eq!(&forwarded[28..32], &[0x00, 0x05, 0x00, 0x00]);
        let local = block.parms(0x2000, 0).encode().unwrap();
        assert_eq!(&local[28..32], &(0x2000u32 + 24).to_be_bytes());
        assert_eq!(forwarded.len(), EFTSR_PARMS * 4);
        assert_eq!(forwarded[36] & 0x80, 0x80);
    }

    #[test]
    fn empty_and_oversized_commands_rejected() {
        assert!(CallBlock::new(EftsrFlags::command(), "", [0; 16]).is_err());
        let long = "X".repeat(MAX_COMMAND_LEN + 1);
        assert!(CallBlock::new(EftsrFlags::command(), &long, [0; 16]).is_err());
    }
}
