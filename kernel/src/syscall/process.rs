//! Process system calls
//!
//! fork, execv, exit, waitpid, getpid. These wire the address-space layer,
//! the PID registry, and the kernel-thread interface together; the
//! lifecycle invariants themselves live in [`crate::proc`].

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::kthread;
use crate::loader;
use crate::machine::trapframe::Trapframe;
use crate::machine::usermode;
use crate::mm::addrspace::AddressSpace;
use crate::mm::userstack::{self, ARGV_REGION_SIZE};
use crate::mm::{usercopy, VirtAddr, USERSTACK};
use crate::proc::{self, registry::REGISTRY, Pid};

/// Bound on the executable path length, terminator included.
const PATH_MAX: usize = 256;
/// Bound on one argument string; the whole vector is further bounded by
/// the 128-byte argv region.
const ARG_MAX: usize = 128;
/// Bound on the number of argv entries walked before giving up.
const ARGC_MAX: usize = 32;

/// Where execution resumes in user space after a successful `execv`.
#[derive(Debug)]
pub struct UserEntry {
    pub entry: VirtAddr,
    pub sp: VirtAddr,
    pub argc: usize,
    pub argv: VirtAddr,
}

/// Fork the current process.
///
/// The child gets a byte-for-byte copy of the address space and a heap
/// copy of the parent's trapframe with the return value forced to zero;
/// the parent gets the child's PID. Any failure tears down whatever was
/// built and reports the first error.
pub fn sys_fork(tf: &Trapframe) -> KernelResult<Pid> {
    let parent = proc::current().ok_or(KernelError::NoProcess)?;

    let child_space = {
        let guard = parent.addrspace.lock();
        let space = guard.as_ref().ok_or(KernelError::NoAddressSpace)?;
        space.copy()?
    };

    let child = proc::create(&parent.name, Some(&parent))?;
    *child.addrspace.lock() = Some(child_space);
    let pid = child.pid;

    // The closure owns the child's copy of the trapframe; its first action
    // is returning to user mode with v0 = 0.
    let child_tf = Trapframe::forked_child(tf);
    if let Err(err) = kthread::spawn(&child.name, Some(Arc::clone(&child)), move || {
        usermode::enter(child_tf)
    }) {
        REGISTRY.remove(pid);
        parent.children.lock().retain(|&c| c != pid);
        return Err(err);
    }

    log::debug!("fork: {} -> {}", parent.pid, pid);
    Ok(pid)
}

/// Everything `execv` does short of the jump to user mode.
///
/// Separated so the fallible setup can be exercised (and tested) apart
/// from the no-return tail.
pub fn execv_prepare(path_addr: VirtAddr, argv_addr: VirtAddr) -> KernelResult<UserEntry> {
    let proc = proc::current().ok_or(KernelError::NoProcess)?;

    // Copy the path and the argument strings in through the old address
    // space, packing the strings into one kernel blob.
    let (path, blob, argc) = {
        let guard = proc.addrspace.lock();
        let space = guard.as_ref().ok_or(KernelError::NoAddressSpace)?;
        let path = usercopy::copyinstr(space, path_addr, PATH_MAX)?;

        let mut blob: Vec<u8> = Vec::new();
        let mut argc = 0usize;
        loop {
            if argc == ARGC_MAX {
                return Err(KernelError::ArgumentTooLong { limit: ARGC_MAX });
            }
            let ptr = usercopy::copyin_u32(space, argv_addr.offset(4 * argc))?;
            if ptr == 0 {
                break;
            }
            let arg = usercopy::copyinstr(space, VirtAddr::new(ptr), ARG_MAX)?;
            blob.extend_from_slice(arg.as_bytes());
            blob.push(0);
            argc += 1;
        }
        (path, blob, argc)
    };

    // Resolve the executable before touching the address space, so a bad
    // path leaves the caller intact.
    let image = loader::find(&path).ok_or(KernelError::ProgramNotFound)?;
    log::debug!("execv: {} ({} args)", path, argc);

    // Switch to a fresh address space. From here on a failure is fatal for
    // the process: the old image is gone.
    let old_space = proc.addrspace.lock().replace(AddressSpace::new());

    let entry = {
        let mut guard = proc.addrspace.lock();
        let space = guard.as_mut().expect("address space was just installed");
        space.activate();
        let entry = image.load_into(space)?;
        userstack::build_user_stack(space, &blob, argc)?;
        entry
    };

    // The old image's frames go back to the coremap only now, after the
    // new space took over.
    drop(old_space);

    let sp = VirtAddr::new((USERSTACK.as_u32() - ARGV_REGION_SIZE as u32) & !7);
    Ok(UserEntry {
        entry,
        sp,
        argc,
        argv: userstack::argv_base(),
    })
}

/// Replace the current process image. Returns only on failure.
pub fn sys_execv(path_addr: VirtAddr, argv_addr: VirtAddr) -> KernelError {
    match execv_prepare(path_addr, argv_addr) {
        Ok(user) => usermode::enter_new_process(user.argc, user.argv, user.sp, user.entry),
        Err(err) => {
            log::warn!("execv failed: {}", err);
            err
        }
    }
}

/// Terminate the current user process. Does not return.
pub fn sys_exit(code: i32) -> ! {
    #[cfg(debug_assertions)]
    if let Some(proc) = proc::current() {
        debug_assert!(
            proc.addrspace.lock().is_some(),
            "user process exiting without an address space"
        );
    }
    proc::exit_current(code)
}

/// Reap child `pid`: block until it exits, write the encoded status out
/// through `status_addr`, and return the PID.
pub fn sys_waitpid(pid: i32, status_addr: VirtAddr, options: i32) -> KernelResult<i32> {
    if options != 0 {
        return Err(KernelError::InvalidArgument {
            what: "waitpid options",
        });
    }
    if pid <= 0 {
        return Err(KernelError::ProcessNotFound { pid });
    }
    let caller = proc::current().ok_or(KernelError::NoProcess)?;

    let code = proc::wait_for(&caller, Pid(pid))?;
    let status = super::make_exit_status(code);

    let guard = caller.addrspace.lock();
    let space = guard.as_ref().ok_or(KernelError::NoAddressSpace)?;
    usercopy::copyout_u32(space, status_addr, status as u32)?;
    Ok(pid)
}

/// The caller's PID.
pub fn sys_getpid() -> KernelResult<Pid> {
    proc::current().map(|p| p.pid).ok_or(KernelError::NoProcess)
}
