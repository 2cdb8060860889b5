//! Software-refilled TLB model
//!
//! A 64-entry translation cache with the classic MIPS entry layout:
//! `entryhi` holds the virtual page number, `entrylo` the physical page
//! number plus the flag bits below. `DIRTY` is the writable bit; a store
//! through a clean entry raises a read-only fault.
//!
//! The TLB is per-CPU state and is only touched with interrupts raised. On
//! the hosted model every kernel thread stands in for one virtual CPU and
//! carries its own instance; the bare-metal uniprocessor has exactly one.

use bitflags::bitflags;

use super::interrupts;
use crate::mm::PAGE_FRAME;

/// Number of TLB entries.
pub const NUM_TLB: usize = 64;

bitflags! {
    /// Flag bits of the `entrylo` word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TlbFlags: u32 {
        const GLOBAL  = 0x0000_0100;
        const VALID   = 0x0000_0200;
        const DIRTY   = 0x0000_0400;
        const NOCACHE = 0x0000_0800;
    }
}

/// One TLB entry, as the hardware would hold it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub hi: u32,
    pub lo: u32,
}

impl Entry {
    /// Invalid entries park `entryhi` in the kernel segment, one distinct
    /// page per slot, so no user lookup can ever match them.
    fn invalid(slot: usize) -> Self {
        Self {
            hi: 0x8000_0000 | ((slot as u32) << 12),
            lo: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lo & TlbFlags::VALID.bits() != 0
    }

    pub fn is_writable(&self) -> bool {
        self.lo & TlbFlags::DIRTY.bits() != 0
    }

    /// Physical page number bits of `entrylo`.
    pub fn pfn(&self) -> u32 {
        self.lo & PAGE_FRAME
    }
}

/// The translation cache of one CPU.
pub struct Tlb {
    entries: [Entry; NUM_TLB],
    /// xorshift32 state for random replacement.
    evict: u32,
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb {
    pub fn new() -> Self {
        let mut tlb = Self {
            entries: [Entry { hi: 0, lo: 0 }; NUM_TLB],
            evict: 0x9e37_79b9,
        };
        tlb.invalidate_all();
        tlb
    }

    pub fn read(&self, slot: usize) -> Entry {
        self.entries[slot]
    }

    pub fn write(&mut self, slot: usize, hi: u32, lo: u32) {
        debug_assert!(interrupts::are_raised(), "TLB write with interrupts enabled");
        self.entries[slot] = Entry { hi, lo };
    }

    /// First slot whose valid bit is clear.
    pub fn find_invalid(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.is_valid())
    }

    /// Overwrite a random slot; returns the slot chosen.
    pub fn write_random(&mut self, hi: u32, lo: u32) -> usize {
        debug_assert!(interrupts::are_raised(), "TLB write with interrupts enabled");
        self.evict ^= self.evict << 13;
        self.evict ^= self.evict >> 17;
        self.evict ^= self.evict << 5;
        let slot = (self.evict as usize) % NUM_TLB;
        self.entries[slot] = Entry { hi, lo };
        slot
    }

    /// Invalidate every entry on this CPU.
    pub fn invalidate_all(&mut self) {
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            *entry = Entry::invalid(slot);
        }
    }

    /// Slot whose `entryhi` matches the given virtual page, if any.
    pub fn probe(&self, vpage: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_valid() && e.hi & PAGE_FRAME == vpage & PAGE_FRAME)
    }
}

#[cfg(not(target_os = "none"))]
std::thread_local! {
    static CPU_TLB: core::cell::RefCell<Tlb> = core::cell::RefCell::new(Tlb::new());
}

#[cfg(target_os = "none")]
static CPU_TLB: spin::Mutex<Tlb> = spin::Mutex::new(Tlb {
    entries: [Entry { hi: 0, lo: 0 }; NUM_TLB],
    evict: 0x9e37_79b9,
});

/// Run `f` against the current CPU's TLB.
#[cfg(not(target_os = "none"))]
pub fn with_current<R>(f: impl FnOnce(&mut Tlb) -> R) -> R {
    CPU_TLB.with(|tlb| f(&mut tlb.borrow_mut()))
}

/// Run `f` against the current CPU's TLB.
#[cfg(target_os = "none")]
pub fn with_current<R>(f: impl FnOnce(&mut Tlb) -> R) -> R {
    f(&mut CPU_TLB.lock())
}
