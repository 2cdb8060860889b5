//! Machine model
//!
//! The 32-bit MIPS-like machine this kernel runs on, modeled in software:
//! flat physical [`ram`], a 64-entry software-refilled [`tlb`], the saved
//! register [`trapframe`], the spl [`interrupts`] discipline, and the
//! [`usermode`] boundary. On the hosted build every kernel thread stands in
//! for one virtual CPU.

pub mod interrupts;
pub mod ram;
pub mod tlb;
pub mod trapframe;
pub mod usermode;
