//! Program images
//!
//! The VFS and the ELF loader are platform services this crate does not
//! carry. Executables come from an in-memory boot archive instead: each
//! [`Image`] holds its entry point and up to two segments (text, then
//! data) with their initialized bytes. `execv` resolves a path against the
//! archive and loads the image into a fresh address space.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::machine::ram;
use crate::mm::addrspace::{AddressSpace, RegionFlags};
use crate::mm::VirtAddr;

/// One loadable segment of an executable.
pub struct ImageSegment {
    pub vaddr: VirtAddr,
    /// Initialized bytes; the region may extend past them (zero-filled).
    pub data: Vec<u8>,
    /// Total size of the region in memory.
    pub mem_size: usize,
    pub flags: RegionFlags,
}

/// An executable in the boot archive.
pub struct Image {
    pub entry: VirtAddr,
    pub segments: Vec<ImageSegment>,
}

impl Image {
    /// Load this image into `space`: define the regions in order, back
    /// them, copy the initialized bytes, and complete the load (which
    /// flips text read-only on future TLB fills). Returns the entry point.
    pub fn load_into(&self, space: &mut AddressSpace) -> KernelResult<VirtAddr> {
        for segment in &self.segments {
            let size = segment.mem_size.max(segment.data.len());
            space.define_region(segment.vaddr, size, segment.flags)?;
        }
        space.prepare_load()?;

        let memory = ram::ram();
        for segment in &self.segments {
            if segment.data.is_empty() {
                continue;
            }
            let (_, paddr) = space
                .translate_range(segment.vaddr, segment.data.len())
                .ok_or(KernelError::BadAddress {
                    addr: segment.vaddr.as_u32(),
                })?;
            memory.write(paddr, &segment.data);
        }

        space.complete_load();
        Ok(self.entry)
    }
}

lazy_static! {
    /// Path -> image table, populated from the boot media at startup.
    static ref BOOT_ARCHIVE: Mutex<BTreeMap<String, Arc<Image>>> =
        Mutex::new(BTreeMap::new());
}

/// Publish an executable under `path`.
pub fn install(path: &str, image: Image) {
    BOOT_ARCHIVE
        .lock()
        .insert(String::from(path), Arc::new(image));
}

/// Resolve `path` in the archive.
pub fn find(path: &str) -> Option<Arc<Image>> {
    BOOT_ARCHIVE.lock().get(path).cloned()
}
