//! Address spaces
//!
//! Each user process owns one `AddressSpace`: two ordered regions (text,
//! then data) plus a fixed stack extent topped at [`USERSTACK`]. Every
//! region is backed by one contiguous frame group, so translation is affine
//! per region. Dropping the address space is the only path that returns the
//! frames to the coremap.

use bitflags::bitflags;

use super::{PhysAddr, VirtAddr, PAGE_FRAME, PAGE_SIZE, STACK_PAGES, USERSTACK};
use crate::error::{KernelError, KernelResult};
use crate::machine::{interrupts, ram, tlb};

bitflags! {
    /// Region protection requested by the loader. Only the text read-only
    /// rule is enforced (after the load completes); the rest is recorded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const EXEC  = 0b100;
    }
}

/// Which region a user address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Text,
    Data,
    Stack,
}

/// One contiguous region: virtual base, length, and (once loaded) the
/// physical base of its frame group.
#[derive(Debug, Clone)]
struct Segment {
    vbase: VirtAddr,
    npages: usize,
    pbase: Option<PhysAddr>,
    flags: RegionFlags,
}

impl Segment {
    fn contains(&self, vaddr: VirtAddr) -> bool {
        vaddr >= self.vbase && vaddr < self.vbase.offset(self.npages * PAGE_SIZE)
    }
}

/// The memory image of one process.
pub struct AddressSpace {
    text: Option<Segment>,
    data: Option<Segment>,
    stack_pbase: Option<PhysAddr>,
    loaded: bool,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    /// An empty address space: no regions, nothing loaded.
    pub fn new() -> Self {
        Self {
            text: None,
            data: None,
            stack_pbase: None,
            loaded: false,
        }
    }

    /// Record a region. The first call defines text, the second data; the
    /// base is rounded down and the length up to page boundaries.
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        flags: RegionFlags,
    ) -> KernelResult<()> {
        let slack = (vaddr.as_u32() & !PAGE_FRAME) as usize;
        let vbase = vaddr.page_align_down();
        let size = (size + slack + PAGE_SIZE - 1) & PAGE_FRAME as usize;
        let npages = size / PAGE_SIZE;
        if npages == 0 {
            return Err(KernelError::InvalidArgument {
                what: "empty region",
            });
        }

        let segment = Segment {
            vbase,
            npages,
            pbase: None,
            flags,
        };
        if self.text.is_none() {
            self.text = Some(segment);
            Ok(())
        } else if self.data.is_none() {
            self.data = Some(segment);
            Ok(())
        } else {
            log::warn!("address space already has two regions");
            Err(KernelError::TooManyRegions)
        }
    }

    /// Back all three extents with zero-filled frame groups. On failure the
    /// caller drops the address space; whatever was allocated is released
    /// by `Drop`.
    pub fn prepare_load(&mut self) -> KernelResult<()> {
        debug_assert!(self.stack_pbase.is_none(), "prepare_load called twice");
        if self.text.is_none() || self.data.is_none() {
            return Err(KernelError::InvalidArgument {
                what: "address space needs two regions before loading",
            });
        }

        for segment in [self.text.as_mut(), self.data.as_mut()].into_iter().flatten() {
            let pbase = super::alloc_phys_pages(segment.npages)?;
            segment.pbase = Some(pbase);
        }
        self.stack_pbase = Some(super::alloc_phys_pages(STACK_PAGES)?);

        let memory = ram::ram();
        for segment in [self.text.as_ref(), self.data.as_ref()].into_iter().flatten() {
            if let Some(pbase) = segment.pbase {
                memory.zero_pages(pbase, segment.npages);
            }
        }
        if let Some(pbase) = self.stack_pbase {
            memory.zero_pages(pbase, STACK_PAGES);
        }
        Ok(())
    }

    /// Flush the TLB and switch text to read-only on future fills.
    pub fn complete_load(&mut self) {
        self.activate();
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// All three extents backed and page-aligned.
    pub fn regions_initialized(&self) -> bool {
        let seg_ok = |s: &Option<Segment>| {
            s.as_ref()
                .and_then(|s| s.pbase)
                .is_some_and(|p| p.is_page_aligned())
        };
        seg_ok(&self.text) && seg_ok(&self.data) && self.stack_pbase.is_some()
    }

    /// Invalidate every TLB entry on the current CPU so stale mappings of a
    /// previous address space cannot be used.
    pub fn activate(&self) {
        let _spl = interrupts::raise();
        tlb::with_current(|tlb| tlb.invalidate_all());
    }

    /// Nothing to do on this machine.
    pub fn deactivate(&self) {}

    /// Resolve a user address to its region and physical address.
    pub fn translate(&self, vaddr: VirtAddr) -> Option<(RegionKind, PhysAddr)> {
        if let Some(text) = &self.text {
            if text.contains(vaddr) {
                let pbase = text.pbase?;
                return Some((
                    RegionKind::Text,
                    pbase.offset((vaddr.as_u32() - text.vbase.as_u32()) as usize),
                ));
            }
        }
        if let Some(data) = &self.data {
            if data.contains(vaddr) {
                let pbase = data.pbase?;
                return Some((
                    RegionKind::Data,
                    pbase.offset((vaddr.as_u32() - data.vbase.as_u32()) as usize),
                ));
            }
        }
        let stack_base = super::stack_base();
        if vaddr >= stack_base && vaddr < USERSTACK {
            let pbase = self.stack_pbase?;
            return Some((
                RegionKind::Stack,
                pbase.offset((vaddr.as_u32() - stack_base.as_u32()) as usize),
            ));
        }
        None
    }

    /// Resolve a byte range that must lie entirely within one region.
    pub fn translate_range(&self, vaddr: VirtAddr, len: usize) -> Option<(RegionKind, PhysAddr)> {
        if len == 0 {
            return self.translate(vaddr);
        }
        let (kind, pbase) = self.translate(vaddr)?;
        let (last_kind, _) = self.translate(vaddr.offset(len - 1))?;
        if kind != last_kind {
            return None;
        }
        Some((kind, pbase))
    }

    /// Duplicate this address space: same region definitions, fresh frames,
    /// byte-for-byte contents, same protection state.
    pub fn copy(&self) -> KernelResult<AddressSpace> {
        let mut new = AddressSpace::new();
        for segment in [self.text.as_ref(), self.data.as_ref()].into_iter().flatten() {
            new.define_region(segment.vbase, segment.npages * PAGE_SIZE, segment.flags)?;
        }
        new.prepare_load()?;

        let memory = ram::ram();
        let pairs = [
            (&self.text, &new.text),
            (&self.data, &new.data),
        ];
        for (old_seg, new_seg) in pairs {
            if let (Some(old_seg), Some(new_seg)) = (old_seg.as_ref(), new_seg.as_ref()) {
                if let (Some(src), Some(dst)) = (old_seg.pbase, new_seg.pbase) {
                    memory.copy_pages(dst, src, old_seg.npages);
                }
            }
        }
        if let (Some(src), Some(dst)) = (self.stack_pbase, new.stack_pbase) {
            memory.copy_pages(dst, src, STACK_PAGES);
        }

        new.loaded = self.loaded;
        Ok(new)
    }

    /// Extent of the text region, if defined: `(vbase, pbase, npages)`.
    pub fn text_extent(&self) -> Option<(VirtAddr, Option<PhysAddr>, usize)> {
        self.text.as_ref().map(|s| (s.vbase, s.pbase, s.npages))
    }

    /// Extent of the data region, if defined.
    pub fn data_extent(&self) -> Option<(VirtAddr, Option<PhysAddr>, usize)> {
        self.data.as_ref().map(|s| (s.vbase, s.pbase, s.npages))
    }

    /// Physical base of the stack extent, once backed.
    pub fn stack_pbase(&self) -> Option<PhysAddr> {
        self.stack_pbase
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        for segment in [self.text.take(), self.data.take()].into_iter().flatten() {
            if let Some(pbase) = segment.pbase {
                super::free_phys_pages(pbase);
            }
        }
        if let Some(pbase) = self.stack_pbase.take() {
            super::free_phys_pages(pbase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;

    const TEXT_BASE: VirtAddr = VirtAddr::new(0x0040_0000);
    const DATA_BASE: VirtAddr = VirtAddr::new(0x1000_0000);

    fn loaded_space() -> AddressSpace {
        bootstrap::bootstrap_default();
        let mut space = AddressSpace::new();
        space
            .define_region(TEXT_BASE, PAGE_SIZE, RegionFlags::READ | RegionFlags::EXEC)
            .unwrap();
        space
            .define_region(DATA_BASE, 2 * PAGE_SIZE, RegionFlags::READ | RegionFlags::WRITE)
            .unwrap();
        space.prepare_load().unwrap();
        space
    }

    #[test]
    fn test_define_region_rounds_to_pages() {
        let mut space = AddressSpace::new();
        space
            .define_region(VirtAddr::new(0x0040_0123), 100, RegionFlags::READ)
            .unwrap();
        let (vbase, _, npages) = space.text_extent().unwrap();
        assert_eq!(vbase, VirtAddr::new(0x0040_0000));
        assert_eq!(npages, 1);

        // Unaligned base plus a length spilling into the next page.
        space
            .define_region(VirtAddr::new(0x1000_0ffc), 8, RegionFlags::WRITE)
            .unwrap();
        let (vbase, _, npages) = space.data_extent().unwrap();
        assert_eq!(vbase, VirtAddr::new(0x1000_0000));
        assert_eq!(npages, 2);
    }

    #[test]
    fn test_third_region_is_rejected() {
        let mut space = AddressSpace::new();
        space.define_region(TEXT_BASE, 1, RegionFlags::READ).unwrap();
        space.define_region(DATA_BASE, 1, RegionFlags::READ).unwrap();
        assert_eq!(
            space.define_region(VirtAddr::new(0x2000_0000), 1, RegionFlags::READ),
            Err(KernelError::TooManyRegions)
        );
    }

    #[test]
    fn test_prepare_load_backs_all_extents() {
        let space = loaded_space();
        assert!(space.regions_initialized());
        let (_, pbase, _) = space.text_extent().unwrap();
        assert!(pbase.unwrap().is_page_aligned());
        assert!(space.stack_pbase().unwrap().is_page_aligned());
        assert!(!space.is_loaded());
    }

    #[test]
    fn test_translate_is_affine_per_region() {
        let space = loaded_space();
        let (_, text_pbase, _) = space.text_extent().unwrap();
        let (kind, paddr) = space.translate(TEXT_BASE.offset(0x123)).unwrap();
        assert_eq!(kind, RegionKind::Text);
        assert_eq!(paddr, text_pbase.unwrap().offset(0x123));

        let (kind, paddr) = space
            .translate(VirtAddr::new(USERSTACK.as_u32() - 16))
            .unwrap();
        assert_eq!(kind, RegionKind::Stack);
        let expected = space
            .stack_pbase()
            .unwrap()
            .offset(STACK_PAGES * PAGE_SIZE - 16);
        assert_eq!(paddr, expected);

        assert!(space.translate(VirtAddr::new(0x7000_0000)).is_none());
    }

    #[test]
    fn test_translate_range_rejects_region_crossings() {
        let space = loaded_space();
        assert!(space.translate_range(DATA_BASE, 2 * PAGE_SIZE).is_some());
        assert!(space.translate_range(DATA_BASE, 2 * PAGE_SIZE + 1).is_none());
    }

    #[test]
    fn test_copy_is_byte_faithful() {
        let space = loaded_space();
        let memory = ram::ram();
        let (_, text_pbase, _) = space.text_extent().unwrap();
        let (_, data_pbase, data_pages) = space.data_extent().unwrap();
        memory.write(text_pbase.unwrap(), &[0x11; 128]);
        memory.write(data_pbase.unwrap().offset(PAGE_SIZE), &[0x22; 256]);
        memory.write(space.stack_pbase().unwrap().offset(11 * PAGE_SIZE), &[0x33; 64]);

        let twin = space.copy().unwrap();
        assert_eq!(twin.is_loaded(), space.is_loaded());
        let (_, twin_data, twin_pages) = twin.data_extent().unwrap();
        assert_eq!(twin_pages, data_pages);
        assert_ne!(twin_data, data_pbase);

        let mut expect = [0u8; 128];
        let mut got = [0u8; 128];
        memory.read(text_pbase.unwrap(), &mut expect);
        memory.read(twin.text_extent().unwrap().1.unwrap(), &mut got);
        assert_eq!(expect, got);

        memory.read(data_pbase.unwrap().offset(PAGE_SIZE), &mut expect);
        memory.read(twin_data.unwrap().offset(PAGE_SIZE), &mut got);
        assert_eq!(expect, got);

        memory.read(space.stack_pbase().unwrap().offset(11 * PAGE_SIZE), &mut expect);
        memory.read(twin.stack_pbase().unwrap().offset(11 * PAGE_SIZE), &mut got);
        assert_eq!(expect, got);
    }

    #[test]
    fn test_drop_returns_frames() {
        bootstrap::bootstrap_default();
        // If Drop leaked, this loop would exhaust the modeled RAM.
        for _ in 0..100 {
            let space = loaded_space();
            drop(space);
        }
    }
}
