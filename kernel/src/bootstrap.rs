//! Boot sequence
//!
//! Brings the core up in dependency order: the physical memory model
//! first, then the coremap takes over the usable range. Idempotent, so
//! hosted harnesses can call it from anywhere.

use spin::Once;

use crate::{machine, mm};

/// Knobs the platform fixes before boot.
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// Frames of physical memory to model.
    pub ram_pages: usize,
}

impl Default for BootConfig {
    fn default() -> Self {
        // 4 MiB, plenty for a dozen address spaces.
        Self { ram_pages: 1024 }
    }
}

static BOOTED: Once<()> = Once::new();

/// Bring the kernel core up. The first caller's config wins.
pub fn bootstrap(config: BootConfig) {
    BOOTED.call_once(|| {
        machine::ram::bootstrap(config.ram_pages);
        mm::vm_bootstrap();
        log::info!("core up with {} frames of ram", config.ram_pages);
    });
}

/// Boot with the default configuration.
pub fn bootstrap_default() {
    bootstrap(BootConfig::default());
}
