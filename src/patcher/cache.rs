//! Instruction cache maintenance for freshly written code

#[cfg(target_os = "macos")]
extern "C" {
    fn sys_icache_invalidate(addr: *mut core::ffi::c_void, size: usize);
    fn sys_dcache_flush(addr: *mut core::ffi::c_void, size: usize);
}

/// Whether [`flush_icache`] can make new code visible to instruction fetch on this host.
///
/// x86 keeps the instruction cache coherent with stores by itself. Everywhere else we need an
/// OS or runtime primitive, and hosts without one can't be patched safely.
pub const fn sync_supported() -> bool {
    cfg!(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_os = "macos",
        all(
            any(target_os = "linux", target_os = "android"),
            any(target_arch = "aarch64", target_arch = "riscv64")
        )
    ))
}

/// Makes code written through the data cache visible to instruction fetch.
///
/// AArch64 and RISC-V don't keep the instruction cache coherent with stores, so after every write
/// step the range is cleaned and invalidated. x86 snoops stores itself and needs nothing.
///
/// Callers must check [`sync_supported`] before writing any code.
///
/// # Safety
///
/// `addr` must point to at least `len` bytes of mapped memory.
#[inline]
pub unsafe fn flush_icache(addr: *const u8, len: usize) {
    #[cfg(target_os = "macos")]
    {
        sys_dcache_flush(addr as *mut core::ffi::c_void, len);
        sys_icache_invalidate(addr as *mut core::ffi::c_void, len);
    }

    #[cfg(all(
        any(target_os = "linux", target_os = "android"),
        any(target_arch = "aarch64", target_arch = "riscv64")
    ))]
    {
        extern "C" {
            fn __clear_cache(beg: *mut libc::c_void, end: *mut libc::c_void);
        }
        __clear_cache(addr as *mut libc::c_void, addr.add(len) as *mut libc::c_void);
    }

    #[cfg(not(any(
        target_os = "macos",
        all(
            any(target_os = "linux", target_os = "android"),
            any(target_arch = "aarch64", target_arch = "riscv64")
        )
    )))]
    {
        let _ = (addr, len);
    }
}
