// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Slotted data plane: fixed packet slots handed between writer and reader
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 5 unit tests
//!
//! Slot layout (`layout::CH_*`): channel number, status, payload size, then
//! `packet_max` payload bytes. A slot cycles through three statuses owned by
//! the lane's writer and reader:
//!
//! ```text
//!   idle (writer owns) -> writing -> posted (reader owns) -> idle
//! ```
//!
//! Status values keep the owning core in bits 8.. and the phase in bits 0..8.

use std::sync::atomic::Ordering;

use log::debug;
use serde::Serialize;

use crate::error::{IpcError, Result};
use crate::layout::{Lane, CH_BUF, CH_NUM, CH_SIZE, CH_STATUS};
use crate::shm::SharedMem;

const CS_OWN_OFFSET: u32 = 8;

/// Slot status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum ChannelStatus {
    ApOwn = 0,
    ApWrite = 1,
    ChubRecv = 2,
    ChubOwn = 1 << CS_OWN_OFFSET,
    ChubWrite = (1 << CS_OWN_OFFSET) | 1,
    ApRecv = (1 << CS_OWN_OFFSET) | 2,
}

impl ChannelStatus {
    pub fn from_raw(raw: u32) -> Option<Self> {
        [
            ChannelStatus::ApOwn,
            ChannelStatus::ApWrite,
            ChannelStatus::ChubRecv,
            ChannelStatus::ChubOwn,
            ChannelStatus::ChubWrite,
            ChannelStatus::ApRecv,
        ]
        .into_iter()
        .find(|s| *s as u32 == raw)
    }

    /// `(idle, writing, posted)` for the writer of `lane`.
    pub const fn cycle(lane: Lane) -> (Self, Self, Self) {
        match lane {
            Lane::A2c => (ChannelStatus::ApOwn, ChannelStatus::ApWrite, ChannelStatus::ChubRecv),
            Lane::C2a => (ChannelStatus::ChubOwn, ChannelStatus::ChubWrite, ChannelStatus::ApRecv),
        }
    }
}

/// One slot as seen in a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotState {
    pub num: u32,
    pub status: u32,
    pub size: u32,
}

/// One lane's packet slots.
pub struct ChannelPlane<'a, S: SharedMem + ?Sized> {
    shm: &'a S,
    lane: Lane,
    base: usize,
    stride: usize,
    slots: usize,
    packet_max: usize,
}

impl<'a, S: SharedMem + ?Sized> ChannelPlane<'a, S> {
    pub fn new(shm: &'a S, lane: Lane, base: usize, stride: usize, slots: usize, packet_max: usize) -> Self {
        Self { shm, lane, base, stride, slots, packet_max }
    }

    fn slot(&self, n: usize) -> usize {
        self.base + self.stride * n
    }

    fn status(&self, n: usize) -> u32 {
        self.shm.load_u32(self.slot(n) + CH_STATUS, Ordering::Acquire)
    }

    fn set_status(&self, n: usize, status: ChannelStatus) {
        self.shm.store_u32(self.slot(n) + CH_STATUS, status as u32, Ordering::Release);
    }

    /// Numbers every slot and hands it to the lane's writer.
    pub fn reset(&self) {
        let (idle, _, _) = ChannelStatus::cycle(self.lane);
        for n in 0..self.slots {
            self.shm.store_u32(self.slot(n) + CH_NUM, n as u32, Ordering::Relaxed);
            self.shm.store_u32(self.slot(n) + CH_SIZE, 0, Ordering::Relaxed);
            self.set_status(n, idle);
        }
    }

    /// Copies `payload` into an idle slot and posts it. Returns the slot number.
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > self.packet_max {
            return Err(IpcError::InvalidLength { len: payload.len(), max: self.packet_max });
        }
        let (idle, writing, posted) = ChannelStatus::cycle(self.lane);
        let n = (0..self.slots)
            .find(|n| self.shm.swap_u32_if(self.slot(*n) + CH_STATUS, idle as u32, writing as u32))
            .ok_or_else(|| {
                debug!(target: "chub_ipc::ring", "{}: no idle channel", self.lane.name());
                IpcError::Full
            })?;
        let slot = self.slot(n);
        self.shm.write_bytes(slot + CH_BUF, payload);
        self.shm.store_u32(slot + CH_SIZE, payload.len() as u32, Ordering::Relaxed);
        self.set_status(n, posted);
        debug!(target: "chub_ipc::ring", "{}: CH{n} posted {} bytes", self.lane.name(), payload.len());
        Ok(n)
    }

    /// Takes the posted slot `n` and returns it to the writer.
    pub fn read(&self, n: usize, out: &mut [u8]) -> Result<usize> {
        if n >= self.slots {
            return Err(IpcError::NoChannel);
        }
        let (idle, _, posted) = ChannelStatus::cycle(self.lane);
        if self.status(n) != posted as u32 {
            return Err(IpcError::Empty);
        }
        let slot = self.slot(n);
        let size = self.shm.load_u32(slot + CH_SIZE, Ordering::Relaxed) as usize;
        if size > self.packet_max {
            return Err(IpcError::Corrupt { len: size });
        }
        if out.len() < size {
            return Err(IpcError::BufferTooSmall { needed: size });
        }
        self.shm.read_bytes(slot + CH_BUF, &mut out[..size]);
        self.set_status(n, idle);
        Ok(size)
    }

    /// Takes the first posted slot, whichever it is.
    pub fn read_any(&self, out: &mut [u8]) -> Result<usize> {
        let (_, _, posted) = ChannelStatus::cycle(self.lane);
        let n = (0..self.slots)
            .find(|n| self.status(*n) == posted as u32)
            .ok_or(IpcError::Empty)?;
        self.read(n, out)
    }

    pub fn state(&self) -> Vec<SlotState> {
        (0..self.slots)
            .map(|n| SlotState {
                num: self.shm.load_u32(self.slot(n) + CH_NUM, Ordering::Relaxed),
                status: self.status(n),
                size: self.shm.load_u32(self.slot(n) + CH_SIZE, Ordering::Relaxed),
            })
            .collect()
    }
}
