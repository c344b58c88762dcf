// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hardware access traits shared by drivers and cross-core transports
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 4 unit tests, `tests/bus.rs`
//!
//! PUBLIC API:
//!   - Bus: 32-bit register file addressed by byte offset
//!   - Timer: monotonic nanosecond clock
//!   - Delay: coarse millisecond sleep
//!   - MmioBus: volatile register access for mapped devices
//!   - HostTimer / HostDelay: std backends (feature `std`)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{fence, Ordering};

/// Register-file access shared by user drivers.
///
/// Offsets are byte offsets from the start of the block and must be 4-byte
/// aligned.
pub trait Bus {
    /// Reads the 32-bit register at `offset`.
    fn read32(&self, offset: usize) -> u32;
    /// Writes `value` to the 32-bit register at `offset`.
    fn write32(&self, offset: usize, value: u32);
}

impl<T: Bus + ?Sized> Bus for &T {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

#[cfg(feature = "std")]
impl<T: Bus + ?Sized> Bus for std::sync::Arc<T> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// Monotonic clock.
pub trait Timer {
    /// Returns the current time in nanoseconds.
    fn now(&self) -> u64;
}

/// Coarse blocking sleep used by bounded retry loops.
pub trait Delay {
    /// Sleeps for roughly `ms` milliseconds.
    fn delay_ms(&self, ms: u32);
}

/// Memory mapped register block.
#[derive(Debug, Clone, Copy)]
pub struct MmioBus {
    base: usize,
}

impl MmioBus {
    /// Wraps the register block mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped device block that stays valid for the
    /// lifetime of the returned value, and every offset later passed to
    /// [`Bus`] must stay inside it.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns the block base address.
    pub const fn base(&self) -> usize {
        self.base
    }
}

impl Bus for MmioBus {
    fn read32(&self, offset: usize) -> u32 {
        let value = unsafe { read_volatile((self.base + offset) as *const u32) };
        fence(Ordering::Acquire);
        value
    }

    fn write32(&self, offset: usize, value: u32) {
        fence(Ordering::Release);
        unsafe { write_volatile((self.base + offset) as *mut u32, value) }
    }
}

/// Wall-clock backed timer for host builds.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct HostTimer {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl HostTimer {
    /// Starts a timer whose epoch is "now".
    pub fn new() -> Self {
        Self { origin: std::time::Instant::now() }
    }
}

#[cfg(feature = "std")]
impl Default for HostTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Timer for HostTimer {
    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// `thread::sleep` backed delay for host builds.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDelay;

#[cfg(feature = "std")]
impl Delay for HostDelay {
    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}
