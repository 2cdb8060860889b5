//! Processes
//!
//! The process record, the PID registry, and the lifecycle core shared by
//! the syscall layer: creation, exit, and synchronous reaping. A record is
//! shared (`Arc`) between the registry, the thread running the process,
//! and a parent holding it for `waitpid`; the registry's exit transition
//! decides which of them sees it last.

pub mod registry;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::kthread;
use crate::mm::addrspace::AddressSpace;
use crate::sync::Completion;
use registry::{ProcSlot, REGISTRY};

/// Process identifier. Small, positive, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One process.
pub struct Proc {
    pub pid: Pid,
    pub name: String,
    /// `None` once orphaned.
    pub parent: Mutex<Option<Pid>>,
    /// PIDs of children, live or awaiting reap.
    pub children: Mutex<Vec<Pid>>,
    /// The memory image; kernel-only processes carry none.
    pub addrspace: Mutex<Option<AddressSpace>>,
    /// Fulfilled exactly once, with the exit code, when the process dies.
    pub exit: Completion<i32>,
}

/// Create and register a process. The parent link is recorded in both
/// directions.
pub fn create(name: &str, parent: Option<&Arc<Proc>>) -> KernelResult<Arc<Proc>> {
    let pid = registry::allocate_pid()?;
    let proc = Arc::new(Proc {
        pid,
        name: String::from(name),
        parent: Mutex::new(parent.map(|p| p.pid)),
        children: Mutex::new(Vec::new()),
        addrspace: Mutex::new(None),
        exit: Completion::new(),
    });
    REGISTRY.register(Arc::clone(&proc));
    if let Some(parent) = parent {
        parent.children.lock().push(pid);
    }
    log::debug!("created process {} ({})", pid, name);
    Ok(proc)
}

/// The process the calling thread runs on behalf of.
pub fn current() -> Option<Arc<Proc>> {
    kthread::current_proc()
}

/// Create a process (child of the caller's, if any) and start a kernel
/// thread in it. Thread-creation failure unwinds the registration.
pub fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> KernelResult<Pid> {
    let parent = current();
    let proc = create(name, parent.as_ref())?;
    let pid = proc.pid;
    if let Err(err) = kthread::spawn(name, Some(Arc::clone(&proc)), f) {
        REGISTRY.remove(pid);
        if let Some(parent) = parent {
            parent.children.lock().retain(|&c| c != pid);
        }
        return Err(err);
    }
    Ok(pid)
}

/// Terminate the current process with `code`. Does not return.
///
/// The address space comes out of the record before teardown, so nothing
/// can reach a half-destroyed space through the shared record while the
/// teardown releases frames.
pub fn exit_current(code: i32) -> ! {
    let proc = current().expect("exit from a thread with no process");
    log::debug!("process {} exiting with code {}", proc.pid, code);

    if let Some(space) = proc.addrspace.lock().take() {
        space.deactivate();
        drop(space);
    }

    REGISTRY.exit_transition(&proc, code);

    // The record must not be reached through the thread from here on.
    kthread::detach_current_proc();
    drop(proc);
    kthread::exit();
}

/// Reap child `pid` of `caller`: block until it has exited and return its
/// raw exit code.
pub fn wait_for(caller: &Arc<Proc>, pid: Pid) -> KernelResult<i32> {
    let target = match REGISTRY.lookup(pid) {
        None => return Err(KernelError::ProcessNotFound { pid: pid.0 }),
        Some(ProcSlot::Dead { parent, status }) => {
            if parent != Some(caller.pid) {
                return Err(KernelError::NotChild { pid: pid.0 });
            }
            REGISTRY.remove(pid);
            caller.children.lock().retain(|&c| c != pid);
            return Ok(status);
        }
        Some(ProcSlot::Alive(target)) => {
            if *target.parent.lock() != Some(caller.pid) {
                return Err(KernelError::NotChild { pid: pid.0 });
            }
            target
        }
    };

    // Block until the child reports dead, then reap its slot.
    let status = target.exit.wait();
    REGISTRY.remove(pid);
    caller.children.lock().retain(|&c| c != pid);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;

    #[test]
    fn test_create_links_both_directions() {
        let parent = proc_for_test("link-parent", None);
        let child = proc_for_test("link-child", Some(&parent));
        assert_eq!(*child.parent.lock(), Some(parent.pid));
        assert!(parent.children.lock().contains(&child.pid));
        assert!(child.pid > parent.pid);

        REGISTRY.remove(child.pid);
        REGISTRY.remove(parent.pid);
    }

    fn proc_for_test(name: &str, parent: Option<&Arc<Proc>>) -> Arc<Proc> {
        create(name, parent).unwrap()
    }

    #[test]
    fn test_wait_for_already_dead_child() {
        let parent = proc_for_test("wait-parent", None);
        let child = proc_for_test("wait-child", Some(&parent));
        REGISTRY.exit_transition(&child, 42);

        assert_eq!(wait_for(&parent, child.pid).unwrap(), 42);
        assert!(REGISTRY.lookup(child.pid).is_none());
        assert!(!parent.children.lock().contains(&child.pid));

        REGISTRY.remove(parent.pid);
    }

    #[test]
    fn test_wait_for_unknown_pid() {
        let parent = proc_for_test("wait-nobody", None);
        assert_eq!(
            wait_for(&parent, Pid(i32::MAX - 7)),
            Err(KernelError::ProcessNotFound { pid: i32::MAX - 7 })
        );
        REGISTRY.remove(parent.pid);
    }

    #[test]
    fn test_wait_for_non_child() {
        let parent = proc_for_test("real-parent", None);
        let child = proc_for_test("their-child", Some(&parent));
        let stranger = proc_for_test("stranger", None);

        assert_eq!(
            wait_for(&stranger, child.pid),
            Err(KernelError::NotChild { pid: child.pid.0 })
        );

        REGISTRY.remove(child.pid);
        REGISTRY.remove(parent.pid);
        REGISTRY.remove(stranger.pid);
    }

    #[test]
    fn test_spawn_attaches_process() {
        bootstrap::bootstrap_default();
        let probe = Arc::new(Completion::<(Pid, bool)>::new());
        let report = Arc::clone(&probe);
        let pid = spawn("spawn-probe", move || {
            let me = current().unwrap();
            report.complete((me.pid, me.name == "spawn-probe"));
            exit_current(0);
        })
        .unwrap();
        let (seen, name_ok) = probe.wait();
        assert_eq!(seen, pid);
        assert!(name_ok);
    }
}
