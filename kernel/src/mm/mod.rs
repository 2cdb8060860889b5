//! Memory management
//!
//! Physical frames come from the coremap allocator ([`coremap`]); each user
//! process owns an [`addrspace::AddressSpace`] of three contiguous extents
//! (text, data, stack); TLB misses are resolved by [`fault::vm_fault`].
//!
//! The machine is 32-bit: both address types are `u32` newtypes.

pub mod addrspace;
pub mod coremap;
pub mod fault;
pub mod usercopy;
pub mod userstack;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::machine::ram;
use coremap::Coremap;

/// Size of one page / physical frame.
pub const PAGE_SIZE: usize = 4096;

/// Mask selecting the page number bits of an address.
pub const PAGE_FRAME: u32 = 0xffff_f000;

/// Pages of user stack, mapped with the top at [`USERSTACK`].
pub const STACK_PAGES: usize = 12;

/// Top of the user virtual range; the stack grows down from here.
pub const USERSTACK: VirtAddr = VirtAddr(0x8000_0000);

/// Lowest address of the user stack extent.
pub fn stack_base() -> VirtAddr {
    VirtAddr(USERSTACK.0 - (STACK_PAGES * PAGE_SIZE) as u32)
}

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(pub u32);

impl PhysAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub const fn offset(&self, bytes: usize) -> Self {
        Self(self.0 + bytes as u32)
    }

    pub const fn page_align_down(&self) -> Self {
        Self(self.0 & PAGE_FRAME)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 & !PAGE_FRAME == 0
    }
}

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub u32);

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn offset(&self, bytes: usize) -> Self {
        Self(self.0 + bytes as u32)
    }

    pub const fn page_align_down(&self) -> Self {
        Self(self.0 & PAGE_FRAME)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 & !PAGE_FRAME == 0
    }
}

/// The coremap, once `vm_bootstrap` has installed it.
///
/// This mutex is the stealmem lock: it guards the tag array and is never
/// held across anything that can sleep.
static COREMAP: Mutex<Option<Coremap>> = Mutex::new(None);

/// Hand the remaining physical range over from the bootstrap allocator to
/// the coremap. Called once at boot, after the RAM model is up.
pub fn vm_bootstrap() {
    let mut cm = COREMAP.lock();
    if cm.is_some() {
        log::warn!("vm_bootstrap called twice, ignoring");
        return;
    }
    let (first, last) = ram::ram().getsize();
    let coremap = Coremap::bootstrap(first, last);
    log::info!(
        "vm: coremap managing {} frames at 0x{:08x}",
        coremap.managed_frames(),
        coremap.first_frame().as_u32()
    );
    *cm = Some(coremap);
}

/// Allocate `npages` contiguous physical frames.
///
/// Falls through to the RAM bootstrap allocator until the coremap exists;
/// frames obtained that way are permanent.
pub fn alloc_phys_pages(npages: usize) -> KernelResult<PhysAddr> {
    let mut cm = COREMAP.lock();
    let addr = match &mut *cm {
        Some(coremap) => coremap.alloc_pages(npages),
        None => ram::ram().stealmem(npages),
    };
    addr.ok_or(KernelError::OutOfMemory {
        requested_pages: npages,
    })
}

/// Return a frame group previously handed out by [`alloc_phys_pages`].
pub fn free_phys_pages(base: PhysAddr) {
    let mut cm = COREMAP.lock();
    match &mut *cm {
        Some(coremap) if coremap.contains(base) => {
            coremap.free_pages(base);
        }
        _ => {
            // Stolen during bootstrap; those frames are never reclaimed.
            log::debug!("free of bootstrap frame 0x{:08x} ignored", base.as_u32());
        }
    }
}
