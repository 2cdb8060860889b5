//! TLB fault handling
//!
//! The TLB is software-refilled: a miss traps into [`vm_fault`], which
//! classifies the faulting address into one of the three regions of the
//! current address space and installs the translation. Text mappings are
//! installed read-only once the load has completed, so stores to text
//! re-fault as read-only violations.

use super::addrspace::RegionKind;
use super::VirtAddr;
use crate::error::{KernelError, KernelResult};
use crate::machine::interrupts;
use crate::machine::tlb::{self, TlbFlags};

/// Why the machine faulted, as reported by the trap glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    /// Store through a valid entry whose dirty (writable) bit is clear.
    ReadOnly,
}

impl FaultKind {
    /// Decode the raw fault code from the exception path. Unknown codes get
    /// `None`; the boundary reports them as invalid arguments.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::ReadOnly),
            _ => None,
        }
    }
}

/// Resolve a TLB miss at `fault_address`.
pub fn vm_fault(kind: FaultKind, fault_address: VirtAddr) -> KernelResult<()> {
    let page = fault_address.page_align_down();
    log::trace!("vm_fault: {:?} at 0x{:08x}", kind, fault_address.as_u32());

    match kind {
        // Pages start out read-write; a read-only trap means a store hit
        // loaded text. Surface it, the syscall layer turns it into EROFS.
        FaultKind::ReadOnly => {
            return Err(KernelError::ReadOnly {
                addr: fault_address.as_u32(),
            })
        }
        FaultKind::Read | FaultKind::Write => {}
    }

    // No process or no address space: probably a kernel fault early in
    // boot. Report a bad address rather than faulting forever.
    let proc = crate::proc::current().ok_or(KernelError::BadAddress {
        addr: page.as_u32(),
    })?;
    let guard = proc.addrspace.lock();
    let space = guard.as_ref().ok_or(KernelError::BadAddress {
        addr: page.as_u32(),
    })?;

    debug_assert!(
        space.regions_initialized(),
        "fault against a half-built address space"
    );

    let (region, paddr) = space.translate(page).ok_or(KernelError::BadAddress {
        addr: fault_address.as_u32(),
    })?;
    debug_assert!(paddr.is_page_aligned());

    let mut lo = paddr.as_u32() | (TlbFlags::VALID | TlbFlags::DIRTY).bits();
    if region == RegionKind::Text && space.is_loaded() {
        // Loaded text: installed clean so stores trap.
        lo &= !TlbFlags::DIRTY.bits();
    }

    let _spl = interrupts::raise();
    tlb::with_current(|tlb| match tlb.find_invalid() {
        Some(slot) => {
            tlb.write(slot, page.as_u32(), lo);
        }
        None => {
            tlb.write_random(page.as_u32(), lo);
        }
    });
    Ok(())
}

/// TLB shootdown is an SMP mechanism; this VM never requests one.
pub fn vm_tlbshootdown() -> ! {
    panic!("tlb shootdown requested on a uniprocessor vm");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::mm::addrspace::{AddressSpace, RegionFlags};
    use crate::mm::{PhysAddr, PAGE_SIZE};
    use crate::proc;
    use crate::sync::Completion;
    use alloc::sync::Arc;

    const TEXT_BASE: VirtAddr = VirtAddr::new(0x0040_0000);
    const DATA_BASE: VirtAddr = VirtAddr::new(0x1000_0000);

    /// Run `f` on a kernel thread with its own process and hand the result
    /// back; the process exits (and reaps itself, being orphaned) after.
    fn run_in_proc<T: Clone + Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        bootstrap::bootstrap_default();
        let out = Arc::new(Completion::<Option<T>>::new());
        let done = Arc::clone(&out);
        proc::spawn("vm-fault-test", move || {
            let value = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).ok();
            done.complete(value);
            proc::exit_current(0);
        })
        .unwrap();
        out.wait().expect("test body panicked in the kernel thread")
    }

    fn install_space(loaded: bool) -> (PhysAddr, PhysAddr) {
        let mut space = AddressSpace::new();
        space
            .define_region(TEXT_BASE, PAGE_SIZE, RegionFlags::READ | RegionFlags::EXEC)
            .unwrap();
        space
            .define_region(DATA_BASE, 2 * PAGE_SIZE, RegionFlags::READ | RegionFlags::WRITE)
            .unwrap();
        space.prepare_load().unwrap();
        if loaded {
            space.complete_load();
        }
        let text_pbase = space.text_extent().unwrap().1.unwrap();
        let data_pbase = space.data_extent().unwrap().1.unwrap();
        let me = proc::current().unwrap();
        *me.addrspace.lock() = Some(space);
        (text_pbase, data_pbase)
    }

    #[test]
    fn test_fault_code_decoding() {
        assert_eq!(FaultKind::from_code(0), Some(FaultKind::Read));
        assert_eq!(FaultKind::from_code(1), Some(FaultKind::Write));
        assert_eq!(FaultKind::from_code(2), Some(FaultKind::ReadOnly));
        assert_eq!(FaultKind::from_code(7), None);
    }

    #[test]
    fn test_fault_without_process_is_bad_address() {
        bootstrap::bootstrap_default();
        // The test harness thread has no process attached.
        let result = vm_fault(FaultKind::Read, VirtAddr::new(0x1000));
        assert!(matches!(result, Err(KernelError::BadAddress { .. })));
    }

    #[test]
    fn test_fault_without_address_space_is_bad_address() {
        let result = run_in_proc(|| vm_fault(FaultKind::Read, VirtAddr::new(0x1000)));
        assert!(matches!(result, Err(KernelError::BadAddress { .. })));
    }

    #[test]
    fn test_readonly_fault_reports_erofs() {
        let result = run_in_proc(|| {
            install_space(true);
            vm_fault(FaultKind::ReadOnly, TEXT_BASE.offset(8))
        });
        assert_eq!(
            result,
            Err(KernelError::ReadOnly {
                addr: TEXT_BASE.as_u32() + 8
            })
        );
    }

    #[test]
    fn test_data_fault_installs_writable_mapping() {
        let (entry, data_pbase) = run_in_proc(|| {
            let (_, data_pbase) = install_space(true);
            vm_fault(FaultKind::Write, DATA_BASE.offset(PAGE_SIZE + 0x10)).unwrap();
            let entry = tlb::with_current(|tlb| {
                let slot = tlb.probe(DATA_BASE.as_u32() + PAGE_SIZE as u32).unwrap();
                tlb.read(slot)
            });
            (entry, data_pbase)
        });
        assert!(entry.is_valid());
        assert!(entry.is_writable());
        assert_eq!(entry.pfn(), data_pbase.as_u32() + PAGE_SIZE as u32);
        assert_eq!(entry.hi, DATA_BASE.as_u32() + PAGE_SIZE as u32);
    }

    #[test]
    fn test_text_is_writable_until_load_completes() {
        let entry = run_in_proc(|| {
            install_space(false);
            vm_fault(FaultKind::Write, TEXT_BASE).unwrap();
            tlb::with_current(|tlb| {
                let slot = tlb.probe(TEXT_BASE.as_u32()).unwrap();
                tlb.read(slot)
            })
        });
        assert!(entry.is_writable());
    }

    #[test]
    fn test_loaded_text_is_installed_read_only() {
        let (entry, text_pbase) = run_in_proc(|| {
            let (text_pbase, _) = install_space(true);
            vm_fault(FaultKind::Read, TEXT_BASE.offset(0x20)).unwrap();
            let entry = tlb::with_current(|tlb| {
                let slot = tlb.probe(TEXT_BASE.as_u32()).unwrap();
                tlb.read(slot)
            });
            (entry, text_pbase)
        });
        assert!(entry.is_valid());
        assert!(!entry.is_writable());
        assert_eq!(entry.pfn(), text_pbase.as_u32());
    }

    #[test]
    fn test_fault_outside_regions_is_bad_address() {
        let result = run_in_proc(|| {
            install_space(true);
            vm_fault(FaultKind::Read, VirtAddr::new(0x7000_0000))
        });
        assert_eq!(
            result,
            Err(KernelError::BadAddress { addr: 0x7000_0000 })
        );
    }

    #[test]
    #[should_panic]
    fn test_tlb_shootdown_panics() {
        vm_tlbshootdown();
    }

    #[test]
    fn test_stack_fault_maps_into_stack_extent() {
        let ok = run_in_proc(|| {
            install_space(true);
            let addr = VirtAddr::new(crate::mm::USERSTACK.as_u32() - 64);
            vm_fault(FaultKind::Write, addr).unwrap();
            tlb::with_current(|tlb| tlb.probe(addr.as_u32()).is_some())
        });
        assert!(ok);
    }
}
