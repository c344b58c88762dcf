// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory window with explicit little-endian field codecs
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 4 unit tests
//!
//! The window is a slice of 32-bit atomic words. Control fields are 4-byte
//! aligned words accessed with explicit orderings; byte payloads are packed
//! little-endian into the words (byte `n` of a word is bits `8n..8n+8`), so
//! the in-memory image matches what a little-endian core sees at the same
//! byte offset.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared memory reachable from both cores.
///
/// Offsets are byte offsets from the start of the window. Accessors panic on
/// offsets outside the window; the layout is bounds-checked once at attach.
pub trait SharedMem: Send + Sync {
    /// Backing words.
    fn words(&self) -> &[AtomicU32];

    /// Window size in bytes.
    fn len(&self) -> usize {
        self.words().len() * 4
    }

    fn is_empty(&self) -> bool {
        self.words().is_empty()
    }

    fn load_u32(&self, offset: usize, order: Ordering) -> u32 {
        debug_assert_eq!(offset % 4, 0, "unaligned word access at {offset:#x}");
        self.words()[offset / 4].load(order)
    }

    fn store_u32(&self, offset: usize, value: u32, order: Ordering) {
        debug_assert_eq!(offset % 4, 0, "unaligned word access at {offset:#x}");
        self.words()[offset / 4].store(value, order)
    }

    /// Adds one to the word at `offset`, wrapping.
    fn bump_u32(&self, offset: usize, order: Ordering) {
        self.words()[offset / 4].fetch_add(1, order);
    }

    /// Replaces the word at `offset` with `new` if it still holds `current`.
    fn swap_u32_if(&self, offset: usize, current: u32, new: u32) -> bool {
        debug_assert_eq!(offset % 4, 0, "unaligned word access at {offset:#x}");
        self.words()[offset / 4]
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn load_u8(&self, offset: usize) -> u8 {
        let word = self.words()[offset / 4].load(Ordering::Relaxed);
        (word >> ((offset % 4) * 8)) as u8
    }

    fn store_u8(&self, offset: usize, value: u8) {
        let shift = (offset % 4) * 8;
        let mask = !(0xffu32 << shift);
        // Neighbouring bytes of the word may belong to the peer, so merge
        // atomically instead of storing the whole word.
        let _ = self.words()[offset / 4].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
            Some((w & mask) | (u32::from(value) << shift))
        });
    }

    fn load_u64(&self, offset: usize, order: Ordering) -> u64 {
        let low = self.load_u32(offset, order);
        let high = self.load_u32(offset + 4, order);
        u64::from(low) | (u64::from(high) << 32)
    }

    fn store_u64(&self, offset: usize, value: u64, order: Ordering) {
        self.store_u32(offset, value as u32, order);
        self.store_u32(offset + 4, (value >> 32) as u32, order);
    }

    /// Copies `dst.len()` bytes starting at `offset`.
    fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = self.load_u8(offset + i);
        }
    }

    /// Copies `src` to the window starting at `offset`.
    fn write_bytes(&self, offset: usize, src: &[u8]) {
        for (i, byte) in src.iter().enumerate() {
            self.store_u8(offset + i, *byte);
        }
    }

    /// Sets `len` bytes starting at `offset` to `value`.
    fn fill(&self, offset: usize, len: usize, value: u8) {
        for i in 0..len {
            self.store_u8(offset + i, value);
        }
    }
}

/// Heap-backed window for host builds, tests and the software peer.
///
/// Clones share the same backing words, so an AP-side and a CHUB-side
/// context can attach to one allocation.
#[derive(Clone)]
pub struct HostShm {
    words: Arc<[AtomicU32]>,
}

impl HostShm {
    /// Allocates a zeroed window of at least `len` bytes.
    pub fn new(len: usize) -> Self {
        let words: Vec<AtomicU32> = (0..len.div_ceil(4)).map(|_| AtomicU32::new(0)).collect();
        Self { words: words.into() }
    }

    /// Builds a window holding a copy of `image`.
    pub fn from_image(image: &[u8]) -> Self {
        let shm = Self::new(image.len());
        shm.write_bytes(0, image);
        shm
    }

    /// Copies the whole window out, e.g. for writing a dump file.
    pub fn to_image(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len()];
        self.read_bytes(0, &mut out);
        out
    }
}

impl SharedMem for HostShm {
    fn words(&self) -> &[AtomicU32] {
        &self.words
    }
}

impl std::fmt::Debug for HostShm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostShm").field("len", &self.len()).finish()
    }
}

/// Window over memory mapped from the device (e.g. the CHUB SRAM).
#[derive(Clone, Copy)]
pub struct MappedShm {
    words: &'static [AtomicU32],
}

impl MappedShm {
    /// Wraps `len` bytes of mapped memory starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be 4-byte aligned, valid for reads and writes of `len`
    /// bytes for the rest of the program, and only accessed through atomic
    /// operations by this process.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Self {
        let words = unsafe { std::slice::from_raw_parts(base as *const AtomicU32, len / 4) };
        Self { words }
    }
}

impl SharedMem for MappedShm {
    fn words(&self) -> &[AtomicU32] {
        self.words
    }
}
