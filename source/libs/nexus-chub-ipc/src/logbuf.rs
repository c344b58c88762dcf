// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cross-core diagnostic text ring.
//!
//! Single writer (CHUB), single out-of-band reader (AP). There are no
//! full/empty flags: a writer that catches up with `dq` overwrites unread
//! text and reports it, the reader tolerates the loss.

use std::sync::atomic::Ordering;

use log::warn;
use serde::Serialize;

use crate::layout::{LOG_DQ, LOG_EQ, LOG_SIZE, LOG_TOKEN};
use crate::shm::SharedMem;

/// Log header words at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogState {
    pub token: u32,
    pub eq: u32,
    pub dq: u32,
    pub size: u32,
}

pub struct LogRing<'a, S: SharedMem + ?Sized> {
    shm: &'a S,
    hdr: usize,
    buf: usize,
}

impl<'a, S: SharedMem + ?Sized> LogRing<'a, S> {
    /// `hdr` is the header offset, `buf` the first character.
    pub fn new(shm: &'a S, hdr: usize, buf: usize) -> Self {
        Self { shm, hdr, buf }
    }

    fn word(&self, field: usize) -> u32 {
        self.shm.load_u32(self.hdr + field, Ordering::Acquire)
    }

    fn set_word(&self, field: usize, value: u32) {
        self.shm.store_u32(self.hdr + field, value, Ordering::Release)
    }

    pub fn size(&self) -> usize {
        self.word(LOG_SIZE) as usize
    }

    pub fn state(&self) -> LogState {
        LogState {
            token: self.word(LOG_TOKEN),
            eq: self.word(LOG_EQ),
            dq: self.word(LOG_DQ),
            size: self.word(LOG_SIZE),
        }
    }

    /// Text area size, or `None` when it is zero or runs past the window.
    fn usable_size(&self) -> Option<u32> {
        let size = self.word(LOG_SIZE);
        (size != 0 && self.buf + size as usize <= self.shm.len()).then_some(size)
    }

    /// Increments the token and returns the new value.
    pub fn next_token(&self) -> u32 {
        let token = self.word(LOG_TOKEN).wrapping_add(1);
        self.set_word(LOG_TOKEN, token);
        self.word(LOG_TOKEN)
    }

    /// Appends one character. Returns `true` if the write caught up with the
    /// reader, i.e. unread text is being overwritten.
    ///
    /// A header the peer left inconsistent drops the character.
    pub fn put(&self, ch: u8) -> bool {
        let Some(size) = self.usable_size() else {
            return false;
        };
        let eq = self.word(LOG_EQ);
        if eq >= size {
            warn!(target: "chub_ipc::log", "write index {eq} outside log of {size}");
            return false;
        }
        let next = eq + 1;
        let overrun = next == self.word(LOG_DQ);
        self.shm.store_u8(self.buf + eq as usize, ch);
        self.set_word(LOG_EQ, if next == size { 0 } else { next });
        overrun
    }

    /// Copies out everything between `dq` and `eq` and moves `dq` to `eq`.
    /// Reader side only.
    pub fn drain(&self) -> Vec<u8> {
        let Some(size) = self.usable_size() else {
            return Vec::new();
        };
        let eq = self.word(LOG_EQ);
        let mut dq = self.word(LOG_DQ);
        if eq >= size || dq >= size {
            return Vec::new();
        }
        let mut out = Vec::new();
        while dq != eq {
            out.push(self.shm.load_u8(self.buf + dq as usize));
            dq = if dq + 1 == size { 0 } else { dq + 1 };
        }
        self.set_word(LOG_DQ, dq);
        out
    }

    /// Sets the usable size, and with `clear` also drops the token and all text.
    pub(crate) fn format(&self, size: u32, clear: bool) {
        self.set_word(LOG_SIZE, size);
        if clear {
            self.set_word(LOG_TOKEN, 0);
            self.set_word(LOG_EQ, 0);
            self.set_word(LOG_DQ, 0);
            self.shm.fill(self.buf, size as usize, 0);
        }
    }
}
