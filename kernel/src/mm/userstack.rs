//! User stack construction
//!
//! Lays out the argument vector a fresh user program finds on its stack: a
//! fixed 128-byte region at `USERSTACK - 128` holding the pointer table
//! (`argv[0..argc]` plus a NULL sentinel) followed by the strings packed
//! contiguously. Everything is stored through the checked copy-out
//! primitives. The caller passes `USERSTACK - 128`, rounded down for
//! alignment, as the initial stack pointer.

use super::addrspace::AddressSpace;
use super::usercopy::{copyout, copyout_u32};
use super::{VirtAddr, USERSTACK};
use crate::error::{KernelError, KernelResult};

/// Bytes reserved below `USERSTACK` for the pointer table and strings.
pub const ARGV_REGION_SIZE: usize = 128;

/// Base of the argv region: where `argv` itself points in user space.
pub fn argv_base() -> VirtAddr {
    VirtAddr::new(USERSTACK.as_u32() - ARGV_REGION_SIZE as u32)
}

/// Lay out `argc` strings (packed NUL-terminated in `args_blob`) on the
/// stack of `space`. Returns the stack top; the caller aligns it.
///
/// An argument set that does not fit the region is rejected rather than
/// silently truncated.
pub fn build_user_stack(
    space: &AddressSpace,
    args_blob: &[u8],
    argc: usize,
) -> KernelResult<VirtAddr> {
    debug_assert!(space.stack_pbase().is_some(), "stack extent not backed");

    let base = argv_base();
    let table_len = core::mem::size_of::<u32>() * (argc + 1);
    if table_len + args_blob.len() > ARGV_REGION_SIZE {
        return Err(KernelError::ArgumentTooLong {
            limit: ARGV_REGION_SIZE,
        });
    }

    let strings_base = base.offset(table_len);
    let mut offset = 0usize;
    for i in 0..argc {
        copyout_u32(space, base.offset(4 * i), strings_base.as_u32() + offset as u32)?;
        let len = args_blob[offset..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(KernelError::InvalidArgument {
                what: "argv blob is missing a terminator",
            })?;
        offset += len + 1;
    }
    // NULL sentinel closing the pointer table.
    copyout_u32(space, base.offset(4 * argc), 0)?;
    copyout(space, strings_base, args_blob)?;

    Ok(USERSTACK)
}
