//! OS-linkage parameter lists.
//!
//! A standard parameter list is a vector of fullword addresses pointed to by
//! R1. The final word carries the high-order bit so the callee can find the
//! end of a variable-length list. [`Last`] marks that word at construction
//! time; nothing else in the engine touches the bit.

use crate::abi::storage::{Storage, SUBPOOL_ENGINE};
use crate::error::{Result, TsoError};

/// High-order bit marking the last parameter address.
pub const END_OF_LIST: u32 = 0x8000_0000;

/// Longest list the decoder will walk before declaring it unterminated.
pub const MAX_PARMS: usize = 32;

/// The terminating parameter of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Last(pub u32);

/// A parameter list under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParmList {
    leading: Vec<u32>,
    last: Last,
}

impl ParmList {
    /// Build a list from the leading addresses and the terminating one.
    pub fn new(leading: &[u32], last: Last) -> Self {
        Self {
            leading: leading.to_vec(),
            last,
        }
    }

    /// Number of parameters, including the last.
    pub fn len(&self) -> usize {
        self.leading.len() + 1
    }

    /// A list always has at least its terminating parameter.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode as big-endian fullwords with the end-of-list bit on the last.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len() * 4);
        for &addr in &self.leading {
            out.extend_from_slice(&check_31bit(addr)?.to_be_bytes());
        }
        let last = check_31bit(self.last.0)? | END_OF_LIST;
        out.extend_from_slice(&last.to_be_bytes());
        Ok(out)
    }

    /// Place the encoded list in engine storage, returning the R1 value.
    pub fn place(&self, storage: &mut Storage) -> Result<u32> {
        let words = self.encode()?;
        storage.getmain_with(SUBPOOL_ENGINE, &words)
    }

    /// Walk the list at `r1`, returning the addresses with the bit stripped.
    pub fn decode(storage: &Storage, r1: u32) -> Result<Vec<u32>> {
        let mut addrs = Vec::new();
        for i in 0..MAX_PARMS {
            let word = storage.read_u32(r1 + (i as u32) * 4)?;
            addrs.push(word & !END_OF_LIST);
            if word & END_OF_LIST != 0 {
                return Ok(addrs);
            }
        }
        Err(TsoError::InvalidParmList {
            reason: format!("no end-of-list bit within {MAX_PARMS} words"),
        })
    }

    /// Decode and require exactly `expected` parameters.
    pub fn decode_exact(storage: &Storage, r1: u32, expected: usize) -> Result<Vec<u32>> {
        let addrs = Self::decode(storage, r1)?;
        if addrs.len() != expected {
            return Err(TsoError::InvalidParmList {
                reason: format!("expected {expected} parameters, found {}", addrs.len()),
            });
        }
        Ok(addrs)
    }
}

fn check_31bit(addr: u32) -> Result<u32> {
    if addr & END_OF_LIST != 0 {
        return Err(TsoError::InvalidParmList {
            reason: format!("address {addr:#010x} is not a 31-bit address"),
        });
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_last_word_is_tagged() {
        let list = ParmList::new(&[0x0001_0000, 0x0001_0008], Last(0x0001_0010));
        let bytes = list.encode().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&bytes[4..8], &[0x00, 0x01, 0x00, 0x08]);
        assert_eq!(&bytes[8..12], &[0x80, 0x01, 0x00, 0x10]);
    }

    #[test]
    fn single_parameter_list() {
        let list = ParmList::new(&[], Last(0x0002_0000));
        assert_eq!(list.len(), 1);
        assert_eq!(list.encode().unwrap(), vec![0x80, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn rejects_64bit_style_address() {
        let list = ParmList::new(&[0x8000_0000], Last(0x10));
        assert!(matches!(
            list.encode(),
            Err(TsoError::InvalidParmList { .. })
        ));
    }

    #[test]
    fn decode_strips_terminator() {
        let mut storage = Storage::new();
        let list = ParmList::new(&[0x100, 0x200, 0x300], Last(0x400));
        let r1 = list.place(&mut storage).unwrap();
        let addrs = ParmList::decode(&storage, r1).unwrap();
        assert_eq!(addrs, vec![0x100, 0x200, 0x300, 0x400]);
        assert!(ParmList::decode_exact(&storage, r1, 4).is_ok());
        assert!(ParmList::decode_exact(&storage, r1, 5).is_err());
    }

    #[test]
    fn unterminated_list_is_rejected() {
        let mut storage = Storage::new();
        let r1 = storage.getmain(SUBPOOL_ENGINE, 8).unwrap();
        // Two untagged words, then the block ends.
        assert!(ParmList::decode(&storage, r1).is_err());
    }
}
