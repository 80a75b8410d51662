// src/xt/wire.rs
// Byte-level helpers for kernel extension records

use crate::exceptions::{Result, XtError};
use std::convert::TryInto;

/// Alignment of `struct _xt_align` on LP64 targets
pub const XT_ALIGNMENT: usize = 8;

/// Round a payload size up the way `XT_ALIGN` does
pub const fn xt_align(size: usize) -> usize {
    (size + XT_ALIGNMENT - 1) & !(XT_ALIGNMENT - 1)
}

/// Copy `N` bytes starting at `offset`
pub fn field<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    data.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            XtError::Generic(format!(
                "Record too short for {N}-byte field at offset {offset} ({} bytes)",
                data.len()
            ))
        })
}

pub fn get_u8(data: &[u8], offset: usize) -> Result<u8> {
    Ok(field::<1>(data, offset)?[0])
}

pub fn get_u16(data: &[u8], offset: usize) -> Result<u16> {
    Ok(u16::from_ne_bytes(field(data, offset)?))
}

pub fn get_u32(data: &[u8], offset: usize) -> Result<u32> {
    Ok(u32::from_ne_bytes(field(data, offset)?))
}

pub fn get_u64(data: &[u8], offset: usize) -> Result<u64> {
    Ok(u64::from_ne_bytes(field(data, offset)?))
}

pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

pub fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}

/// Write a NUL-terminated name into a fixed `len`-byte buffer
pub fn put_name(buf: &mut [u8], offset: usize, len: usize, name: &str) {
    let slot = &mut buf[offset..offset + len];
    slot.fill(0);
    let n = name.len().min(len.saturating_sub(1));
    slot[..n].copy_from_slice(&name.as_bytes()[..n]);
}

/// Read a NUL-terminated name out of a fixed `len`-byte buffer
pub fn get_name(data: &[u8], offset: usize, len: usize) -> Result<String> {
    let slot = data.get(offset..offset + len).ok_or_else(|| {
        XtError::Generic(format!(
            "Record too short for {len}-byte name at offset {offset}"
        ))
    })?;
    let end = slot.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&slot[..end]).into_owned())
}

/// Accept either the full kernel size or the userspace prefix of it
pub fn check_record_size(
    extension: &'static str,
    revision: u8,
    data: &[u8],
    size: usize,
    userspace_size: usize,
) -> Result<()> {
    if data.len() == size || data.len() == userspace_size {
        return Ok(());
    }

    Err(XtError::InvalidRecord {
        extension,
        revision,
        expected: size,
        actual: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xt_align() {
        assert_eq!(xt_align(0), 0);
        assert_eq!(xt_align(1), 8);
        assert_eq!(xt_align(8), 8);
        assert_eq!(xt_align(9), 16);
        assert_eq!(xt_align(24), 24);
    }

    #[test]
    fn test_names_are_nul_terminated() {
        let mut buf = [0xffu8; 20];
        put_name(&mut buf, 2, 16, "ftp");
        assert_eq!(&buf[2..6], b"ftp\0");
        assert_eq!(buf[17], 0);
        assert_eq!(buf[18], 0xff);
        assert_eq!(get_name(&buf, 2, 16).unwrap(), "ftp");
    }

    #[test]
    fn test_short_reads_fail() {
        let data = [1u8, 2, 3];
        assert!(get_u32(&data, 0).is_err());
        assert_eq!(get_u8(&data, 2).unwrap(), 3);
        assert!(get_name(&data, 1, 4).is_err());
    }

    #[test]
    fn test_record_size_check() {
        let data = [0u8; 32];
        assert!(check_record_size("CT", 0, &data, 40, 32).is_ok());
        assert!(check_record_size("CT", 0, &data[..30], 40, 32).is_err());
    }
}
