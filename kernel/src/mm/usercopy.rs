//! Checked copies across the user boundary
//!
//! Every kernel access to user memory funnels through these primitives.
//! Addresses are validated against the target address space's regions; a
//! range that leaves its region (or was never mapped) is a bad address, and
//! the caller sees the failure instead of a wild access.
//!
//! The machine is little-endian; the `u32` helpers carry user-visible
//! words (argv pointers, wait status) in that byte order.

use alloc::string::String;
use alloc::vec::Vec;

use super::addrspace::AddressSpace;
use super::VirtAddr;
use crate::error::{KernelError, KernelResult};
use crate::machine::ram;

/// Copy `bytes` out to user address `uaddr`.
pub fn copyout(space: &AddressSpace, uaddr: VirtAddr, bytes: &[u8]) -> KernelResult<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let (_, paddr) = space
        .translate_range(uaddr, bytes.len())
        .ok_or(KernelError::BadAddress {
            addr: uaddr.as_u32(),
        })?;
    ram::ram().write(paddr, bytes);
    Ok(())
}

/// Copy `buf.len()` bytes in from user address `uaddr`.
pub fn copyin(space: &AddressSpace, uaddr: VirtAddr, buf: &mut [u8]) -> KernelResult<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let (_, paddr) = space
        .translate_range(uaddr, buf.len())
        .ok_or(KernelError::BadAddress {
            addr: uaddr.as_u32(),
        })?;
    ram::ram().read(paddr, buf);
    Ok(())
}

/// Store one user-visible word.
pub fn copyout_u32(space: &AddressSpace, uaddr: VirtAddr, value: u32) -> KernelResult<()> {
    copyout(space, uaddr, &value.to_le_bytes())
}

/// Load one user-visible word.
pub fn copyin_u32(space: &AddressSpace, uaddr: VirtAddr) -> KernelResult<u32> {
    let mut bytes = [0u8; 4];
    copyin(space, uaddr, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Copy a NUL-terminated string in from user space, bounded by `maxlen`
/// bytes (terminator included).
pub fn copyinstr(space: &AddressSpace, uaddr: VirtAddr, maxlen: usize) -> KernelResult<String> {
    let mut bytes: Vec<u8> = Vec::new();
    for i in 0..maxlen {
        let mut byte = [0u8; 1];
        copyin(space, uaddr.offset(i), &mut byte)?;
        if byte[0] == 0 {
            return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument {
                what: "user string is not valid utf-8",
            });
        }
        bytes.push(byte[0]);
    }
    Err(KernelError::ArgumentTooLong { limit: maxlen })
}
