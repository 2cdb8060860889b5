//! System calls
//!
//! The trap glue lands here with the saved trapframe: `v0` carries the
//! syscall number and `a0..a2` the arguments. Results go back through the
//! machine convention (`Trapframe::set_syscall_result`), with kernel
//! errors flattened to errno values.

pub mod process;

pub use process::{sys_execv, sys_fork, sys_getpid, sys_waitpid};

use crate::error::{KernelError, KernelResult};
use crate::machine::trapframe::Trapframe;
use crate::mm::VirtAddr;

pub const SYS_FORK: u32 = 1;
pub const SYS_EXECV: u32 = 2;
pub const SYS_EXIT: u32 = 3;
pub const SYS_WAITPID: u32 = 4;
pub const SYS_GETPID: u32 = 5;

/// Tag bits of an encoded wait status; exited-normally is tag zero.
const WAIT_EXITED_TAG: i32 = 0;

/// Encode an exit code the way `waitpid` reports it: shifted and tagged.
pub fn make_exit_status(code: i32) -> i32 {
    (code << 2) | WAIT_EXITED_TAG
}

/// Recover the exit code from an encoded wait status.
pub fn exit_code(status: i32) -> i32 {
    status >> 2
}

/// Decode and run the syscall in `tf`, writing the result back into it.
///
/// `exit` and a successful `execv` do not return.
pub fn dispatch(tf: &mut Trapframe) {
    let nr = tf.v0;
    let (a0, a1, a2) = (tf.a0, tf.a1, tf.a2);

    let result: KernelResult<u32> = match nr {
        SYS_FORK => process::sys_fork(tf).map(|pid| pid.0 as u32),
        SYS_EXECV => Err(process::sys_execv(VirtAddr::new(a0), VirtAddr::new(a1))),
        SYS_EXIT => process::sys_exit(a0 as i32),
        SYS_WAITPID => {
            process::sys_waitpid(a0 as i32, VirtAddr::new(a1), a2 as i32).map(|pid| pid as u32)
        }
        SYS_GETPID => process::sys_getpid().map(|pid| pid.0 as u32),
        _ => Err(KernelError::NoSuchSyscall { nr }),
    };

    if let Err(err) = &result {
        log::debug!("syscall {} failed: {}", nr, err);
    }
    tf.set_syscall_result(result.map_err(|e| e.errno()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::errno;

    #[test]
    fn test_wait_status_round_trip() {
        for code in [0, 1, 7, 107, -1] {
            let status = make_exit_status(code);
            assert_eq!(exit_code(status), code);
            // Exited-normally statuses carry tag zero.
            assert_eq!(status & 0b11, 0);
        }
    }

    #[test]
    fn test_dispatch_unknown_syscall() {
        let mut tf = Trapframe::default();
        tf.v0 = 999;
        tf.epc = 0x0040_0000;
        dispatch(&mut tf);
        assert_eq!(tf.a3, 1);
        assert_eq!(tf.v0, errno::ENOSYS);
        assert_eq!(tf.epc, 0x0040_0004);
    }

    #[test]
    fn test_dispatch_getpid_without_process() {
        // The test harness thread carries no process.
        let mut tf = Trapframe::default();
        tf.v0 = SYS_GETPID;
        dispatch(&mut tf);
        assert_eq!(tf.a3, 1);
        assert_eq!(tf.v0, errno::ESRCH);
    }
}
