//! User mode entry
//!
//! The jump into user space belongs to the trap/exception glue, which this
//! crate does not carry. The hosted machine model cannot execute user
//! instructions at all, so entering user mode terminates the kernel thread
//! after logging where execution would have begun.

use super::trapframe::Trapframe;
use crate::mm::VirtAddr;

/// Resume execution from `tf` in user mode. Does not return.
pub fn enter(tf: Trapframe) -> ! {
    #[cfg(not(target_os = "none"))]
    {
        log::warn!(
            "user mode unavailable on the hosted model; pc=0x{:08x} sp=0x{:08x}",
            tf.epc,
            tf.sp
        );
        crate::kthread::exit();
    }
    #[cfg(target_os = "none")]
    {
        let _ = tf;
        panic!("user mode entry requires the platform trap glue");
    }
}

/// Enter a brand-new user program: `argc`/`argv` in the argument registers,
/// the stack pointer at `sp`, execution at `entry`. Does not return.
pub fn enter_new_process(argc: usize, argv: VirtAddr, sp: VirtAddr, entry: VirtAddr) -> ! {
    log::debug!(
        "entering user program at 0x{:08x}, argc={}, sp=0x{:08x}",
        entry.as_u32(),
        argc,
        sp.as_u32()
    );
    enter(Trapframe::new_user(entry, sp, argc as u32, argv))
}
