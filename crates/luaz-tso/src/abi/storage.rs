//! Below-the-bar storage arena: GETMAIN/FREEMAIN over simulated 31-bit addresses.
//!
//! Every parameter list, control block and work area handed to a host
//! service lives here so that the values written into parameter lists are
//! genuine 31-bit addresses. Blocks are tagged with a subpool number, and
//! the engine brackets each service call in a frame that releases whatever
//! it obtained. Blocks in [`SUBPOOL_HOST`] are never owned by a frame.
//! GETMAIN is first fit, so released ranges are handed out again.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::{Result, TsoError};

/// Highest usable address in 31-bit mode.
pub const ADDRESS_LIMIT: u32 = 0x7FFF_FFFF;

/// Lowest address handed out by GETMAIN.
const REGION_START: u32 = 0x0001_0000;

/// Subpool used for engine-owned parameter areas.
pub const SUBPOOL_ENGINE: u8 = 0;

/// Subpool used for storage the host keeps across calls (CPPL, tokens).
pub const SUBPOOL_HOST: u8 = 78;

#[derive(Debug, Clone)]
struct StorageBlock {
    subpool: u8,
    bytes: Vec<u8>,
}

/// Simulated address space.
#[derive(Debug)]
pub struct Storage {
    blocks: BTreeMap<u32, StorageBlock>,
    frames: Vec<Vec<u32>>,
}

impl Storage {
    /// Create an empty address space.
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            frames: Vec::new(),
        }
    }

    /// Obtain `length` zeroed bytes from `subpool`, doubleword aligned.
    pub fn getmain(&mut self, subpool: u8, length: usize) -> Result<u32> {
        if length == 0 {
            return Err(TsoError::GetmainFailed {
                length,
                reason: "zero length".to_string(),
            });
        }
        let Some(address) = self.first_fit(extent(length)) else {
            return Err(TsoError::GetmainFailed {
                length,
                reason: "31-bit region exhausted".to_string(),
            });
        };
        self.blocks.insert(
            address,
            StorageBlock {
                subpool,
                bytes: vec![0; length],
            },
        );
        if subpool != SUBPOOL_HOST {
            if let Some(frame) = self.frames.last_mut() {
                frame.push(address);
            }
        }
        trace!(address = format_args!("{address:#010x}"), length, subpool, "GETMAIN");
        Ok(address)
    }

    /// Lowest free range of `size` bytes.
    fn first_fit(&self, size: u64) -> Option<u32> {
        let mut cursor = u64::from(REGION_START);
        for (&start, block) in &self.blocks {
            if u64::from(start).saturating_sub(cursor) >= size {
                break;
            }
            cursor = cursor.max(u64::from(start) + extent(block.bytes.len()));
        }
        if cursor + size > u64::from(ADDRESS_LIMIT) {
            return None;
        }
        u32::try_from(cursor).ok()
    }

    /// Release the block starting at `address`.
    pub fn freemain(&mut self, address: u32) -> Result<()> {
        match self.blocks.remove(&address) {
            Some(block) => {
                trace!(
                    address = format_args!("{address:#010x}"),
                    length = block.bytes.len(),
                    "FREEMAIN"
                );
                Ok(())
            }
            None => Err(TsoError::FreemainFailed { address }),
        }
    }

    /// Obtain a block and fill it with `data`.
    pub fn getmain_with(&mut self, subpool: u8, data: &[u8]) -> Result<u32> {
        let address = self.getmain(subpool, data.len())?;
        self.write(address, data)?;
        Ok(address)
    }

    /// Start a frame; blocks obtained until [`Storage::pop_frame`] belong to it.
    pub fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    /// End the innermost frame, releasing every block it still owns.
    pub fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            for address in frame {
                // Blocks freed explicitly inside the frame are already gone.
                let _ = self.blocks.remove(&address);
            }
        }
    }

    fn locate(&self, address: u32, length: usize) -> Result<(u32, usize)> {
        let fault = TsoError::AddressFault { address, length };
        let (&start, block) = self.blocks.range(..=address).next_back().ok_or(fault.clone())?;
        let offset = (address - start) as usize;
        if offset + length > block.bytes.len() {
            return Err(fault);
        }
        Ok((start, offset))
    }

    /// Borrow `length` bytes at `address`.
    pub fn read(&self, address: u32, length: usize) -> Result<&[u8]> {
        let (start, offset) = self.locate(address, length)?;
        Ok(&self.blocks[&start].bytes[offset..offset + length])
    }

    /// Mutably borrow `length` bytes at `address`.
    pub fn slice_mut(&mut self, address: u32, length: usize) -> Result<&mut [u8]> {
        let (start, offset) = self.locate(address, length)?;
        let block = self
            .blocks
            .get_mut(&start)
            .ok_or(TsoError::AddressFault { address, length })?;
        Ok(&mut block.bytes[offset..offset + length])
    }

    /// Copy `data` to `address`.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.slice_mut(address, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Read the big-endian fullword at `address`.
    pub fn read_u32(&self, address: u32) -> Result<u32> {
        let b = self.read(address, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read the signed fullword at `address`.
    pub fn read_i32(&self, address: u32) -> Result<i32> {
        self.read_u32(address).map(|v| v as i32)
    }

    /// Store a big-endian fullword at `address`.
    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.write(address, &value.to_be_bytes())
    }

    /// Store a signed fullword at `address`.
    pub fn write_i32(&mut self, address: u32, value: i32) -> Result<()> {
        self.write_u32(address, value as u32)
    }

    /// Number of live blocks.
    pub fn active_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of live blocks in one subpool.
    pub fn subpool_count(&self, subpool: u8) -> usize {
        self.blocks.values().filter(|b| b.subpool == subpool).count()
    }
}

/// Bytes a block of `length` occupies, rounded to a doubleword.
fn extent(length: usize) -> u64 {
    (length as u64 + 7) & !7
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getmain_returns_distinct_aligned_addresses() {
        let mut s = Storage::new();
        let a = s.getmain(SUBPOOL_ENGINE, 5).unwrap();
        let b = s.getmain(SUBPOOL_ENGINE, 16).unwrap();
        assert_ne!(a, b);
        assert_eq!(a % 8, 0);
        assert_eq!(b % 8, 0);
        assert!(b <= ADDRESS_LIMIT);
    }

    #[test]
    fn getmain_zero_length_fails() {
        let mut s = Storage::new();
        assert!(matches!(
            s.getmain(SUBPOOL_ENGINE, 0),
            Err(TsoError::GetmainFailed { .. })
        ));
    }

    #[test]
    fn storage_is_zeroed() {
        let mut s = Storage::new();
        let a = s.getmain(SUBPOOL_ENGINE, 32).unwrap();
        assert!(s.read(a, 32).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn interior_addresses_resolve() {
        let mut s = Storage::new();
        let a = s.getmain(SUBPOOL_ENGINE, 16).unwrap();
        s.write_u32(a + 8, 0xC1C2_C3C4).unwrap();
        assert_eq!(s.read_u32(a + 8).unwrap(), 0xC1C2_C3C4);
        assert!(s.read(a + 12, 8).is_err());
    }

    #[test]
    fn freemain_unknown_address_fails() {
        let mut s = Storage::new();
        let a = s.getmain(SUBPOOL_ENGINE, 8).unwrap();
        assert!(matches!(
            s.freemain(a + 4),
            Err(TsoError::FreemainFailed { .. })
        ));
        s.freemain(a).unwrap();
        assert!(s.read(a, 1).is_err());
    }

    #[test]
    fn released_ranges_are_reused() {
        let mut s = Storage::new();
        let host = s.getmain(SUBPOOL_HOST, 8).unwrap();
        s.push_frame();
        let first = s.getmain(SUBPOOL_ENGINE, 256).unwrap();
        s.pop_frame();
        for _ in 0..10_000 {
            s.push_frame();
            assert_eq!(s.getmain(SUBPOOL_ENGINE, 256).unwrap(), first);
            s.pop_frame();
        }
        assert_eq!(s.active_count(), 1);
        assert!(s.read(host, 8).is_ok());
    }

    #[test]
    fn first_fit_fills_holes() {
        let mut s = Storage::new();
        let a = s.getmain(SUBPOOL_ENGINE, 16).unwrap();
        let b = s.getmain(SUBPOOL_ENGINE, 16).unwrap();
        let c = s.getmain(SUBPOOL_ENGINE, 16).unwrap();
        s.freemain(b).unwrap();
        // too big for the hole
        let d = s.getmain(SUBPOOL_ENGINE, 24).unwrap();
        assert!(d > c);
        assert_eq!(s.getmain(SUBPOOL_ENGINE, 9).unwrap(), b);
        assert!(s.read(a, 16).is_ok());
    }

    #[test]
    fn region_exhaustion_fails() {
        let mut s = Storage::new();
        assert!(matches!(
            s.getmain(SUBPOOL_ENGINE, ADDRESS_LIMIT as usize),
            Err(TsoError::GetmainFailed { .. })
        ));
    }

    #[test]
    fn frame_releases_its_blocks_only() {
        let mut s = Storage::new();
        let keep = s.getmain(SUBPOOL_HOST, 16).unwrap();
        s.push_frame();
        let host_owned = s.getmain(SUBPOOL_HOST, 4).unwrap();
        let a = s.getmain(SUBPOOL_ENGINE, 8).unwrap();
        let b = s.getmain(SUBPOOL_ENGINE, 8).unwrap();
        s.freemain(a).unwrap();
        assert_eq!(s.active_count(), 3);
        s.pop_frame();
        assert_eq!(s.active_count(), 2);
        assert!(s.read(b, 1).is_err());
        assert!(s.read(keep, 16).is_ok());
        assert!(s.read(host_owned, 4).is_ok());
        assert_eq!(s.subpool_count(SUBPOOL_HOST), 2);
    }
}
