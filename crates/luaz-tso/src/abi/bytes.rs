//! Big-endian field access at fixed offsets.
//!
//! Host control blocks mix halfword and fullword fields at offsets that are
//! not always naturally aligned, so every read goes through these helpers
//! instead of a struct overlay.

use crate::error::{Result, TsoError};

fn field(buf: &[u8], offset: usize, width: usize) -> Result<&[u8]> {
    buf.get(offset..offset + width).ok_or(TsoError::BufferOverrun {
        offset,
        width,
        len: buf.len(),
    })
}

fn field_mut(buf: &mut [u8], offset: usize, width: usize) -> Result<&mut [u8]> {
    let len = buf.len();
    buf.get_mut(offset..offset + width)
        .ok_or(TsoError::BufferOverrun { offset, width, len })
}

/// Read one byte.
pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(field(buf, offset, 1)?[0])
}

/// Read a big-endian halfword.
pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16> {
    let f = field(buf, offset, 2)?;
    Ok(u16::from_be_bytes([f[0], f[1]]))
}

/// Read a big-endian fullword.
pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let f = field(buf, offset, 4)?;
    Ok(u32::from_be_bytes([f[0], f[1], f[2], f[3]]))
}

/// Read a big-endian signed fullword (return codes).
pub fn read_i32(buf: &[u8], offset: usize) -> Result<i32> {
    read_u32(buf, offset).map(|v| v as i32)
}

/// Borrow `width` bytes at `offset`.
pub fn read_bytes(buf: &[u8], offset: usize, width: usize) -> Result<&[u8]> {
    field(buf, offset, width)
}

/// Write one byte.
pub fn write_u8(buf: &mut [u8], offset: usize, value: u8) -> Result<()> {
    field_mut(buf, offset, 1)?[0] = value;
    Ok(())
}

/// Write a big-endian halfword.
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<()> {
    field_mut(buf, offset, 2)?.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Write a big-endian fullword.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    field_mut(buf, offset, 4)?.copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Write a big-endian signed fullword.
pub fn write_i32(buf: &mut [u8], offset: usize, value: i32) -> Result<()> {
    write_u32(buf, offset, value as u32)
}

/// Copy `data` into the buffer at `offset`.
pub fn write_bytes(buf: &mut [u8], offset: usize, data: &[u8]) -> Result<()> {
    field_mut(buf, offset, data.len())?.copy_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halfword_is_big_endian() {
        let buf = [0x00, 0x04, 0x38, 0xFF];
        assert_eq!(read_u16(&buf, 1).unwrap(), 0x0438);
    }

    #[test]
    fn fullword_at_unaligned_offset() {
        let buf = [0xAA, 0x00, 0x00, 0x01, 0x02, 0xBB];
        assert_eq!(read_u32(&buf, 1).unwrap(), 0x0000_0102);
    }

    #[test]
    fn negative_return_code() {
        let mut buf = [0u8; 8];
        write_i32(&mut buf, 4, -1).unwrap();
        assert_eq!(&buf[4..], &[0xFF; 4]);
        assert_eq!(read_i32(&buf, 4).unwrap(), -1);
    }

    #[test]
    fn overrun_is_an_error() {
        let buf = [0u8; 4];
        let err = read_u32(&buf, 2).unwrap_err();
        assert_eq!(
            err,
            TsoError::BufferOverrun {
                offset: 2,
                width: 4,
                len: 4
            }
        );
        assert!(read_u16(&buf, 3).is_err());
        assert!(read_u8(&buf, 3).is_ok());
    }

    #[test]
    fn write_then_read_halfword() {
        let mut buf = [0u8; 6];
        write_u16(&mut buf, 4, 0x1708).unwrap();
        assert_eq!(buf[4], 0x17);
        assert_eq!(buf[5], 0x08);
        assert!(write_u16(&mut buf, 5, 1).is_err());
    }
}
