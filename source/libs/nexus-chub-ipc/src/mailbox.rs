// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Mailbox register block: doorbells, masks and shared scratch registers
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 7 unit tests
//!
//! One mailbox block carries two one-way signal paths. Register pair 0
//! (`INTGR0`/`INTCR0`/`INTMR0`/`INTSR0`) signals the [`MailboxSide::Receiver`]
//! on bits 16..31; pair 1 signals the [`MailboxSide::Generator`] on bits
//! 0..15. Every operation below picks its register and bit position from the
//! caller's side, so both cores address the same block with the same API.

use std::sync::atomic::{AtomicU32, Ordering};

use log::{trace, warn};
use nexus_hal::Bus;
use serde::{Deserialize, Serialize};

use crate::error::{IpcError, Result};

pub const REG_MAILBOX_MCUCTL: usize = 0x00;
pub const REG_MAILBOX_INTGR0: usize = 0x08;
pub const REG_MAILBOX_INTCR0: usize = 0x0c;
pub const REG_MAILBOX_INTMR0: usize = 0x10;
pub const REG_MAILBOX_INTSR0: usize = 0x14;
pub const REG_MAILBOX_INTMSR0: usize = 0x18;
pub const REG_MAILBOX_INTGR1: usize = 0x1c;
pub const REG_MAILBOX_INTCR1: usize = 0x20;
pub const REG_MAILBOX_INTMR1: usize = 0x24;
pub const REG_MAILBOX_INTSR1: usize = 0x28;
pub const REG_MAILBOX_INTMSR1: usize = 0x2c;
pub const REG_MAILBOX_ISSR0: usize = 0x80;

/// Interrupt lines per direction.
pub const MAILBOX_LINES: u32 = 16;
/// Shared scratch registers in the block.
pub const SHARED_REG_COUNT: usize = 16;
/// Bytes spanned by the register block.
pub const MAILBOX_BLOCK_LEN: usize = REG_MAILBOX_ISSR0 + SHARED_REG_COUNT * 4;

pub const SR_DEBUG_ACTION: usize = 0;
pub const SR_DEBUG_VAL_LOW: usize = 1;
pub const SR_DEBUG_VAL_HIGH: usize = 2;
pub const SR_CHUB_ALIVE: usize = 3;

const LINE_MASK: u32 = (1 << MAILBOX_LINES) - 1;

/// Logical owner of a mailbox block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    Ap,
    Apm,
    Cp,
    Gnss,
}

impl Owner {
    pub const COUNT: usize = 4;

    const fn index(self) -> usize {
        self as usize
    }
}

/// Which signal path of the block the caller listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxSide {
    /// Listens on pair 0 (lines at bits 16..31), rings pair 1.
    Receiver,
    /// Listens on pair 1 (lines at bits 0..15), rings pair 0.
    Generator,
}

impl MailboxSide {
    /// First bit of the lines this side listens on.
    pub const fn line_base(self) -> u32 {
        match self {
            MailboxSide::Receiver => MAILBOX_LINES,
            MailboxSide::Generator => 0,
        }
    }

    pub const fn peer(self) -> Self {
        match self {
            MailboxSide::Receiver => MailboxSide::Generator,
            MailboxSide::Generator => MailboxSide::Receiver,
        }
    }

    const fn status_reg(self) -> usize {
        match self {
            MailboxSide::Receiver => REG_MAILBOX_INTSR0,
            MailboxSide::Generator => REG_MAILBOX_INTSR1,
        }
    }

    const fn masked_status_reg(self) -> usize {
        match self {
            MailboxSide::Receiver => REG_MAILBOX_INTMSR0,
            MailboxSide::Generator => REG_MAILBOX_INTMSR1,
        }
    }

    const fn clear_reg(self) -> usize {
        match self {
            MailboxSide::Receiver => REG_MAILBOX_INTCR0,
            MailboxSide::Generator => REG_MAILBOX_INTCR1,
        }
    }

    const fn mask_reg(self) -> usize {
        match self {
            MailboxSide::Receiver => REG_MAILBOX_INTMR0,
            MailboxSide::Generator => REG_MAILBOX_INTMR1,
        }
    }

    const fn generate_reg(self) -> usize {
        match self {
            MailboxSide::Receiver => REG_MAILBOX_INTGR1,
            MailboxSide::Generator => REG_MAILBOX_INTGR0,
        }
    }
}

/// Codes stored in the `SR_DEBUG_ACTION` scratch register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum DebugEvent {
    None = 0,
    ChubFullLog = 1,
    ChubDumpRequest = 2,
    ChubError = 3,
    ApTimestamp = 4,
}

impl DebugEvent {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => DebugEvent::None,
            1 => DebugEvent::ChubFullLog,
            2 => DebugEvent::ChubDumpRequest,
            3 => DebugEvent::ChubError,
            4 => DebugEvent::ApTimestamp,
            _ => return None,
        })
    }
}

/// One mailbox block as seen from one side.
#[derive(Debug, Clone)]
pub struct Mailbox<B: Bus> {
    bus: B,
    side: MailboxSide,
}

impl<B: Bus> Mailbox<B> {
    pub fn new(bus: B, side: MailboxSide) -> Self {
        Self { bus, side }
    }

    pub fn side(&self) -> MailboxSide {
        self.side
    }

    fn line_bit(&self, irq: u32) -> u32 {
        debug_assert!(irq < MAILBOX_LINES, "irq {irq} out of range");
        1 << (irq + self.side.line_base())
    }

    fn peer_bit(&self, irq: u32) -> u32 {
        debug_assert!(irq < MAILBOX_LINES, "irq {irq} out of range");
        1 << (irq + self.side.peer().line_base())
    }

    /// Pending lines addressed to this side, as a 16-bit bitmap.
    pub fn pending(&self) -> u32 {
        (self.bus.read32(self.side.status_reg()) >> self.side.line_base()) & LINE_MASK
    }

    /// Pending lines that are not masked.
    pub fn pending_unmasked(&self) -> u32 {
        (self.bus.read32(self.side.masked_status_reg()) >> self.side.line_base()) & LINE_MASK
    }

    /// Whether a doorbell this side raised is still unacknowledged by the peer.
    pub fn gen_pending(&self, irq: u32) -> bool {
        self.bus.read32(self.side.peer().status_reg()) & self.peer_bit(irq) != 0
    }

    /// Raw value of the generate register this side writes.
    pub fn generated(&self) -> u32 {
        self.bus.read32(self.side.generate_reg())
    }

    /// Rings line `irq` on the peer.
    pub fn generate(&self, irq: u32) {
        trace!(target: "chub_ipc::mbox", "{:?}: generate irq {irq}", self.side);
        self.bus.write32(self.side.generate_reg(), self.peer_bit(irq));
    }

    pub fn clear(&self, irq: u32) {
        self.bus.write32(self.side.clear_reg(), self.line_bit(irq));
    }

    pub fn clear_all(&self) {
        self.bus.write32(self.side.clear_reg(), LINE_MASK << self.side.line_base());
    }

    pub fn mask(&self, irq: u32) {
        let reg = self.side.mask_reg();
        let mask = self.bus.read32(reg);
        self.bus.write32(reg, mask | self.line_bit(irq));
    }

    pub fn unmask(&self, irq: u32) {
        let reg = self.side.mask_reg();
        let mask = self.bus.read32(reg);
        self.bus.write32(reg, mask & !self.line_bit(irq));
    }

    pub fn read_shared(&self, num: usize) -> u32 {
        debug_assert!(num < SHARED_REG_COUNT);
        self.bus.read32(REG_MAILBOX_ISSR0 + num * 4)
    }

    pub fn write_shared(&self, num: usize, value: u32) {
        debug_assert!(num < SHARED_REG_COUNT);
        self.bus.write32(REG_MAILBOX_ISSR0 + num * 4, value);
    }

    pub fn set_mcuctrl(&self, value: u32) {
        self.bus.write32(REG_MAILBOX_MCUCTL, value);
    }

    pub fn write_debug_event(&self, event: DebugEvent) {
        self.write_shared(SR_DEBUG_ACTION, event as u32);
    }

    /// Last debug action code; unknown codes are logged and read as `None`.
    pub fn read_debug_event(&self) -> DebugEvent {
        let raw = self.read_shared(SR_DEBUG_ACTION);
        DebugEvent::from_raw(raw).unwrap_or_else(|| {
            warn!(target: "chub_ipc::mbox", "unknown debug action {raw:#x}");
            DebugEvent::None
        })
    }

    /// Stores `value` in the scratch pair, low word first.
    pub fn write_val(&self, value: u64) {
        self.write_shared(SR_DEBUG_VAL_LOW, value as u32);
        self.write_shared(SR_DEBUG_VAL_HIGH, (value >> 32) as u32);
    }

    pub fn read_val(&self) -> u64 {
        let low = self.read_shared(SR_DEBUG_VAL_LOW);
        let high = self.read_shared(SR_DEBUG_VAL_HIGH);
        u64::from(low) | (u64::from(high) << 32)
    }
}

/// Mailbox blocks per owner, filled once while building the context.
#[derive(Debug, Clone)]
pub struct MailboxTable<B: Bus> {
    slots: [Option<Mailbox<B>>; Owner::COUNT],
}

impl<B: Bus> Default for MailboxTable<B> {
    fn default() -> Self {
        Self { slots: [None, None, None, None] }
    }
}

impl<B: Bus> MailboxTable<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, owner: Owner, mailbox: Mailbox<B>) {
        self.slots[owner.index()] = Some(mailbox);
    }

    pub fn get(&self, owner: Owner) -> Result<&Mailbox<B>> {
        self.slots[owner.index()].as_ref().ok_or(IpcError::NoMailbox(owner))
    }
}

/// Register file behaving like the hardware block, for host builds.
///
/// Writes to a generate register latch bits into the matching status
/// register; writes to a clear register drop them. Masked status reads are
/// computed from status and mask.
pub struct SimMailbox {
    regs: [AtomicU32; MAILBOX_BLOCK_LEN / 4],
}

impl Default for SimMailbox {
    fn default() -> Self {
        Self { regs: std::array::from_fn(|_| AtomicU32::new(0)) }
    }
}

impl SimMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn reg(&self, offset: usize) -> &AtomicU32 {
        &self.regs[offset / 4]
    }
}

impl std::fmt::Debug for SimMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMailbox")
            .field("intsr0", &format_args!("{:#x}", self.read32(REG_MAILBOX_INTSR0)))
            .field("intsr1", &format_args!("{:#x}", self.read32(REG_MAILBOX_INTSR1)))
            .finish()
    }
}

impl Bus for SimMailbox {
    fn read32(&self, offset: usize) -> u32 {
        match offset {
            REG_MAILBOX_INTMSR0 => {
                self.reg(REG_MAILBOX_INTSR0).load(Ordering::Acquire)
                    & !self.reg(REG_MAILBOX_INTMR0).load(Ordering::Acquire)
            }
            REG_MAILBOX_INTMSR1 => {
                self.reg(REG_MAILBOX_INTSR1).load(Ordering::Acquire)
                    & !self.reg(REG_MAILBOX_INTMR1).load(Ordering::Acquire)
            }
            _ => self.reg(offset).load(Ordering::Acquire),
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        match offset {
            REG_MAILBOX_INTGR0 => {
                self.reg(REG_MAILBOX_INTGR0).store(value, Ordering::Release);
                self.reg(REG_MAILBOX_INTSR0).fetch_or(value, Ordering::Release);
            }
            REG_MAILBOX_INTGR1 => {
                self.reg(REG_MAILBOX_INTGR1).store(value, Ordering::Release);
                self.reg(REG_MAILBOX_INTSR1).fetch_or(value, Ordering::Release);
            }
            REG_MAILBOX_INTCR0 => {
                self.reg(REG_MAILBOX_INTSR0).fetch_and(!value, Ordering::AcqRel);
            }
            REG_MAILBOX_INTCR1 => {
                self.reg(REG_MAILBOX_INTSR1).fetch_and(!value, Ordering::AcqRel);
            }
            // Status registers are read-only on the real block.
            REG_MAILBOX_INTSR0 | REG_MAILBOX_INTSR1 | REG_MAILBOX_INTMSR0 | REG_MAILBOX_INTMSR1 => {}
            _ => self.reg(offset).store(value, Ordering::Release),
        }
    }
}
