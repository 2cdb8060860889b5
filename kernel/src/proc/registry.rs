//! PID registry
//!
//! One table maps every PID the kernel has handed out to what is known
//! about it: `Alive` holds the shared process record, `Dead` the exit
//! status awaiting a reaper. The single registry lock serializes every
//! lifecycle transition, so a parent's exit and a child's exit cannot both
//! decide to destroy the same record.
//!
//! PIDs are assigned by a monotonic counter and never reused; PID 0 is
//! reserved.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, Ordering};

use spin::Mutex;

use super::{Pid, Proc};
use crate::error::{KernelError, KernelResult};

/// Ceiling on the number of PIDs ever assigned.
pub const PID_LIMIT: i32 = 32_768;

/// Monotonic PID source with a configured ceiling.
pub struct PidAllocator {
    next: AtomicI32,
    limit: i32,
}

impl PidAllocator {
    pub const fn new(limit: i32) -> Self {
        Self {
            // PID 0 is reserved.
            next: AtomicI32::new(1),
            limit,
        }
    }

    pub fn allocate(&self) -> KernelResult<Pid> {
        let pid = self.next.fetch_add(1, Ordering::Relaxed);
        if pid > self.limit {
            return Err(KernelError::TooManyProcesses { limit: self.limit });
        }
        Ok(Pid(pid))
    }
}

static PIDS: PidAllocator = PidAllocator::new(PID_LIMIT);

/// Assign the next PID.
pub fn allocate_pid() -> KernelResult<Pid> {
    PIDS.allocate()
}

/// What the registry knows about one PID.
#[derive(Clone)]
pub enum ProcSlot {
    /// The process is running; the record is shared with its thread and
    /// (through `children`) its parent.
    Alive(Arc<Proc>),
    /// The process exited and nobody has reaped it yet.
    Dead { parent: Option<Pid>, status: i32 },
}

/// The process table.
pub struct Registry {
    slots: Mutex<BTreeMap<Pid, ProcSlot>>,
}

/// Global registry instance.
pub static REGISTRY: Registry = Registry::new();

impl Registry {
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Install a freshly created process.
    pub fn register(&self, proc: Arc<Proc>) {
        let mut slots = self.slots.lock();
        let previous = slots.insert(proc.pid, ProcSlot::Alive(proc));
        debug_assert!(previous.is_none(), "pid registered twice");
    }

    pub fn lookup(&self, pid: Pid) -> Option<ProcSlot> {
        self.slots.lock().get(&pid).cloned()
    }

    /// Drop a slot (the reap step). Returns what was there.
    pub fn remove(&self, pid: Pid) -> Option<ProcSlot> {
        self.slots.lock().remove(&pid)
    }

    /// Number of PIDs with a live or unreaped slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// The ALIVE -> DEAD / ALIVE -> REAPED step of process exit, taken in
    /// one critical section.
    ///
    /// Children are swept on every exit: live ones are orphaned (their
    /// parent link clears), dead ones are destroyed now. The exiting
    /// process keeps a `Dead` slot only if a live parent may still reap it;
    /// orphans and children of dead parents disappear immediately.
    ///
    /// The completion is fulfilled after the slot settles, so a waiting
    /// parent always observes the `Dead` slot once woken.
    pub fn exit_transition(&self, proc: &Arc<Proc>, status: i32) {
        let mut slots = self.slots.lock();

        let parent = *proc.parent.lock();
        let parent_alive =
            parent.is_some_and(|pp| matches!(slots.get(&pp), Some(ProcSlot::Alive(_))));

        let children: Vec<Pid> = proc.children.lock().clone();
        for child in children {
            match slots.get(&child) {
                Some(ProcSlot::Alive(c)) => {
                    *c.parent.lock() = None;
                }
                Some(ProcSlot::Dead { .. }) => {
                    slots.remove(&child);
                }
                None => {}
            }
        }

        if parent_alive {
            slots.insert(proc.pid, ProcSlot::Dead { parent, status });
        } else {
            slots.remove(&proc.pid);
        }
        drop(slots);

        proc.exit.complete(status);
    }
}
