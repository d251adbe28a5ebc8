//! This module contains the lock-step patcher, which rewrites live code without ever exposing a
//! half-written instruction stream to another thread.
//!
//! Only a single aligned word can be stored atomically with respect to instruction fetch, so a
//! longer patch is written in three steps:
//!
//! 1. The first word becomes a jump to itself. Threads reaching the site from now on spin there.
//! 2. The rest of the patch is written. Nothing can execute it while the first word spins.
//! 3. The first word of the patch replaces the self-jump, publishing the whole patch at once.
//!
//! A thread calling into the site therefore runs the old code, spins, or runs the new code.
//! Once step 1 is done the protocol always runs to completion: if it were cut short the site would
//! be left spinning rather than half-patched.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

#[cfg(target_has_atomic = "64")]
use std::sync::atomic::AtomicU64;

use log::{debug, trace};

use super::cache::{flush_icache, sync_supported};
use super::mem::with_writable;
use super::restore::RestorePoint;
use super::{PatchOptions, Patcher};
use crate::code::Encoder;
use crate::error::PatchError;

/// Destination of the lock-step protocol
pub(crate) trait CodeSink {
    /// Stores `word` at `offset` as a single atomic access
    fn store_word(&mut self, offset: usize, word: &[u8]);
    /// Copies `bytes` to `offset` with no atomicity guarantee
    fn copy(&mut self, offset: usize, bytes: &[u8]);
    /// Makes `[offset, offset + len)` visible to instruction fetch
    fn sync(&mut self, offset: usize, len: usize);
}

/// Writes `bytes` into `sink` behind the self-jump `lock`.
///
/// `bytes` must be at least as long as `lock`.
pub(crate) fn lock_step<S: CodeSink>(sink: &mut S, lock: &[u8], bytes: &[u8]) {
    let word = lock.len();

    trace!("lock-step: locking site");
    sink.store_word(0, lock);
    sink.sync(0, word);

    if bytes.len() > word {
        trace!("lock-step: writing {} trailing bytes", bytes.len() - word);
        sink.copy(word, &bytes[word..]);
        sink.sync(word, bytes.len() - word);
    }

    trace!("lock-step: publishing first word");
    sink.store_word(0, &bytes[..word]);
    sink.sync(0, word);
}

/// Writable code memory, accessed through raw pointers
struct LiveSite {
    /// Start of the patch site
    base: *mut u8,
}

impl CodeSink for LiveSite {
    fn store_word(&mut self, offset: usize, word: &[u8]) {
        // Safety: `check_word` validated the width and alignment before the site was made writable
        unsafe {
            let dst = self.base.add(offset);
            match *word {
                [a, b] => AtomicU16::from_ptr(dst.cast())
                    .store(u16::from_ne_bytes([a, b]), Ordering::Release),
                [a, b, c, d] => AtomicU32::from_ptr(dst.cast())
                    .store(u32::from_ne_bytes([a, b, c, d]), Ordering::Release),
                #[cfg(target_has_atomic = "64")]
                [a, b, c, d, e, f, g, h] => AtomicU64::from_ptr(dst.cast())
                    .store(u64::from_ne_bytes([a, b, c, d, e, f, g, h]), Ordering::Release),
                _ => unreachable!("word width is checked before writing"),
            }
        }
    }

    fn copy(&mut self, offset: usize, bytes: &[u8]) {
        // Safety: the caller made `[base, base + len)` writable and `offset + bytes.len() <= len`
        unsafe { self.base.add(offset).copy_from_nonoverlapping(bytes.as_ptr(), bytes.len()) }
    }

    fn sync(&mut self, offset: usize, len: usize) {
        // Safety: same range as the write we're syncing
        unsafe { flush_icache(self.base.add(offset), len) }
    }
}

/// Makes sure `lock` can be stored at `location` as one atomic access
fn check_word(location: *const u8, lock: &[u8]) -> Result<(), PatchError> {
    if !sync_supported() {
        return Err(PatchError::Unsupported(
            "no way to synchronize the instruction cache on this host",
        ));
    }
    let width = lock.len();
    let supported = match width {
        2 | 4 => true,
        8 => cfg!(target_has_atomic = "64"),
        _ => false,
    };
    if !supported {
        return Err(PatchError::Unsupported(
            "lock word can't be stored with a single atomic write",
        ));
    }
    if location as usize % width != 0 {
        return Err(PatchError::Unsupported(
            "patch site is not aligned for an atomic lock word write",
        ));
    }
    Ok(())
}

/// Makes sure `len` bytes can be written at `location` behind `lock`
fn check_site(location: *const u8, lock: &[u8], len: usize) -> Result<(), PatchError> {
    check_word(location, lock)?;
    if len < lock.len() {
        return Err(PatchError::Unsupported(
            "patch is shorter than the lock word",
        ));
    }
    Ok(())
}

/// Writes `bytes` over live code at `location` using the lock-step protocol.
///
/// Everything that can fail is checked before the first byte is written.
///
/// # Safety
///
/// - `location` must be valid for `bytes.len()` bytes
/// - `lock` must be the self-jump of the architecture executing `location`
/// - No other patch or restore of an overlapping site may be in flight
pub unsafe fn write_lock_step(
    location: *mut u8,
    lock: &[u8],
    bytes: &[u8],
    options: PatchOptions,
) -> Result<(), PatchError> {
    check_site(location, lock, bytes.len())?;
    with_writable(location, bytes.len(), options.write_protection, |site| {
        lock_step(&mut LiveSite { base: site }, lock, bytes)
    })
}

/// Overwrites the first word at `location` with `lock` and nothing else.
///
/// Any thread that reaches `location` afterwards spins forever.
///
/// # Safety
///
/// - `location` must be valid for `lock.len()` bytes
/// - `lock` must be the self-jump of the architecture executing `location`
pub unsafe fn patch_lock(
    location: *mut u8,
    lock: &[u8],
    options: PatchOptions,
) -> Result<(), PatchError> {
    check_word(location, lock)?;
    with_writable(location, lock.len(), options.write_protection, |site| {
        let mut site = LiveSite { base: site };
        site.store_word(0, lock);
        site.sync(0, lock.len());
    })?;
    debug!("locked {:p}", location);
    Ok(())
}

/// Patcher that writes live code with the lock-step protocol of encoder `E`
pub struct LockStepPatcher<E> {
    /// Options for every write made by this patcher
    options: PatchOptions,
    /// Instruction set of the patched code
    _encoder: PhantomData<fn() -> E>,
}

impl<E: Encoder> LockStepPatcher<E> {
    /// Creates a patcher with the default options
    pub fn new() -> Self {
        Self::with_options(PatchOptions::default())
    }

    /// Creates a patcher with custom options
    pub fn with_options(options: PatchOptions) -> Self {
        Self {
            options,
            _encoder: PhantomData,
        }
    }

    /// Options used by this patcher
    pub fn options(&self) -> PatchOptions {
        self.options
    }

    /// Freezes the code at `location` by writing the self-jump of `E` over its first word.
    ///
    /// # Safety
    ///
    /// See [`patch_lock`]
    pub unsafe fn lock(&self, location: *mut u8) -> Result<(), PatchError> {
        patch_lock(location, E::LOCK, self.options)
    }
}

impl<E: Encoder> Default for LockStepPatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<E: Encoder> Patcher for LockStepPatcher<E> {
    type Error = PatchError;
    type Guard<'a> = RestorePoint where Self: 'a;

    /// Captures a restore point for `target` and then writes `patch` over it.
    ///
    /// # Safety
    ///
    /// See [`write_lock_step`]
    unsafe fn patch<'a>(
        &'a self,
        target: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error> {
        check_site(target, E::LOCK, patch.len())?;
        let restore_point = RestorePoint::create(target, patch.len(), E::LOCK, self.options)?;
        write_lock_step(target, E::LOCK, patch, self.options)?;
        debug!(
            "patched {} bytes at {:p} ({})",
            patch.len(),
            target,
            E::NAME
        );
        Ok(restore_point)
    }
}
