//! Interrupt priority model (spl)
//!
//! The TLB may only be touched with interrupts masked on the current CPU.
//! [`raise`] models `splhigh` and returns an RAII guard; dropping it is
//! `splx`. The depth counter lets nested sections behave.

use core::marker::PhantomData;

#[cfg(not(target_os = "none"))]
std::thread_local! {
    static SPL_DEPTH: core::cell::Cell<u32> = const { core::cell::Cell::new(0) };
}

#[cfg(target_os = "none")]
static SPL_DEPTH: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// Masked-interrupts region; drop to restore the previous level.
pub struct SplGuard {
    // Tied to the CPU that raised it.
    _not_send: PhantomData<*const ()>,
}

/// Mask interrupts on the current CPU.
pub fn raise() -> SplGuard {
    #[cfg(not(target_os = "none"))]
    SPL_DEPTH.with(|d| d.set(d.get() + 1));
    #[cfg(target_os = "none")]
    SPL_DEPTH.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
    SplGuard {
        _not_send: PhantomData,
    }
}

/// Whether interrupts are currently masked on this CPU.
pub fn are_raised() -> bool {
    #[cfg(not(target_os = "none"))]
    return SPL_DEPTH.with(|d| d.get() > 0);
    #[cfg(target_os = "none")]
    return SPL_DEPTH.load(core::sync::atomic::Ordering::Relaxed) > 0;
}

impl Drop for SplGuard {
    fn drop(&mut self) {
        #[cfg(not(target_os = "none"))]
        SPL_DEPTH.with(|d| d.set(d.get() - 1));
        #[cfg(target_os = "none")]
        SPL_DEPTH.fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_nests_and_restores() {
        assert!(!are_raised());
        {
            let _outer = raise();
            assert!(are_raised());
            {
                let _inner = raise();
                assert!(are_raised());
            }
            assert!(are_raised());
        }
        assert!(!are_raised());
    }
}
