//! Sable kernel core
//!
//! The process and virtual memory subsystems of a small educational kernel
//! for a 32-bit MIPS-like machine with a software-refilled TLB. The
//! machine itself is modeled in software ([`machine`]), which makes the
//! whole lifecycle -- fork, execv, exit, waitpid, and the TLB refill path
//! -- exercisable on a hosted target; bare-metal builds defer user-mode
//! entry and thread creation to the platform's trap glue and scheduler.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// Host target: the standard library backs the allocator and the kernel
// thread interface so the whole core runs under the normal test harness.
#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod bootstrap;
pub mod error;
pub mod kthread;
pub mod loader;
pub mod machine;
pub mod mm;
pub mod proc;
pub mod sync;
pub mod syscall;

pub use error::{KernelError, KernelResult};
pub use proc::Pid;

/// Heap allocation failure in the kernel is unrecoverable.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap allocation failed: {:?}", layout);
}
