//! Kernel thread interface
//!
//! The scheduler is an external collaborator; this module is the interface
//! the process core needs from it: create a thread bound to a process, get
//! at the current thread's process, yield, and terminate. The hosted build
//! backs it with OS threads (one per virtual CPU); bare-metal builds defer
//! to the platform scheduler.

use alloc::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::proc::Proc;

#[cfg(not(target_os = "none"))]
mod hosted {
    use super::*;
    use alloc::boxed::Box;
    use alloc::string::String;
    use core::cell::RefCell;

    /// Panic payload used to unwind a terminating kernel thread.
    pub(super) struct ThreadExit;

    std::thread_local! {
        pub(super) static CURRENT: RefCell<Option<Arc<Proc>>> = const { RefCell::new(None) };
    }

    static EXIT_HOOK: spin::Once<()> = spin::Once::new();

    /// Keep the default panic hook from reporting thread termination as a
    /// crash; real panics still go through it.
    pub(super) fn install_exit_hook() {
        EXIT_HOOK.call_once(|| {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                if info.payload().is::<ThreadExit>() {
                    return;
                }
                previous(info);
            }));
        });
    }

    pub(super) fn spawn(
        name: &str,
        proc: Option<Arc<Proc>>,
        f: impl FnOnce() + Send + 'static,
    ) -> KernelResult<()> {
        install_exit_hook();
        std::thread::Builder::new()
            .name(String::from(name))
            .spawn(move || {
                CURRENT.with(|c| *c.borrow_mut() = proc);
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
                CURRENT.with(|c| c.borrow_mut().take());
                if let Err(payload) = outcome {
                    if !payload.is::<ThreadExit>() {
                        std::panic::resume_unwind(payload);
                    }
                }
            })
            .map(|_| ())
            .map_err(|_| KernelError::ThreadCreateFailed)
    }
}

/// Start a kernel thread named `name`, attached to `proc` if given.
#[cfg(not(target_os = "none"))]
pub fn spawn(
    name: &str,
    proc: Option<Arc<Proc>>,
    f: impl FnOnce() + Send + 'static,
) -> KernelResult<()> {
    hosted::spawn(name, proc, f)
}

/// Start a kernel thread named `name`, attached to `proc` if given.
#[cfg(target_os = "none")]
pub fn spawn(
    _name: &str,
    _proc: Option<Arc<Proc>>,
    _f: impl FnOnce() + Send + 'static,
) -> KernelResult<()> {
    Err(KernelError::NotSupported {
        what: "kernel thread creation (platform scheduler)",
    })
}

/// Terminate the calling kernel thread. The thread must already have been
/// detached from its process if exit-status bookkeeping matters.
pub fn exit() -> ! {
    #[cfg(not(target_os = "none"))]
    {
        hosted::CURRENT.with(|c| c.borrow_mut().take());
        std::panic::panic_any(hosted::ThreadExit);
    }
    #[cfg(target_os = "none")]
    panic!("thread exit requires the platform scheduler");
}

/// Give up the CPU.
pub fn yield_now() {
    #[cfg(not(target_os = "none"))]
    std::thread::yield_now();
    #[cfg(target_os = "none")]
    core::hint::spin_loop();
}

/// The process the calling thread runs on behalf of.
pub fn current_proc() -> Option<Arc<Proc>> {
    #[cfg(not(target_os = "none"))]
    return hosted::CURRENT.with(|c| c.borrow().clone());
    #[cfg(target_os = "none")]
    return CURRENT_PROC.lock().clone();
}

/// Detach the calling thread from its process. The process record must not
/// be reached through the thread afterwards.
pub fn detach_current_proc() -> Option<Arc<Proc>> {
    #[cfg(not(target_os = "none"))]
    return hosted::CURRENT.with(|c| c.borrow_mut().take());
    #[cfg(target_os = "none")]
    return CURRENT_PROC.lock().take();
}

/// Current process on the uniprocessor target.
#[cfg(target_os = "none")]
static CURRENT_PROC: spin::Mutex<Option<Arc<Proc>>> = spin::Mutex::new(None);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Completion;

    #[test]
    fn test_spawn_runs_without_process() {
        let done = Arc::new(Completion::<bool>::new());
        let signal = Arc::clone(&done);
        spawn("ktest", None, move || {
            signal.complete(current_proc().is_none());
        })
        .unwrap();
        assert!(done.wait());
    }

    #[test]
    fn test_exit_terminates_thread_quietly() {
        let reached = Arc::new(Completion::<()>::new());
        let signal = Arc::clone(&reached);
        spawn("kexit", None, move || {
            signal.complete(());
            exit();
        })
        .unwrap();
        reached.wait();
    }
}
