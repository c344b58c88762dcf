// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-slot event queue announcing data and debug conditions
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 9 unit tests
//!
//! Control words (`layout::EVT_*`): `eq`, `dq`, `full`, an unused `empty`
//! word kept for layout compatibility, and the irq sequence. Records are
//! `{code, irq, status}` triples of u32. The queue is empty when
//! `eq == dq && !full`.
//!
//! Ringing the doorbell is left to the caller (see `Ipc::add_event`), which
//! owns the mailbox and the clock.

use std::sync::atomic::Ordering;

use log::{debug, error, info, warn};
use nexus_hal::Delay;
use serde::Serialize;

use crate::error::{IpcError, Result};
use crate::layout::{
    EVT_DQ, EVT_EMPTY, EVT_EQ, EVT_FULL, EVT_IRQ, EVT_REC_LEN, REC_EVT, REC_IRQ, REC_STATUS,
};
use crate::shm::SharedMem;

/// Event codes carried in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum EventCode {
    /// Data channel 0; the ring plane always announces frames with it.
    Ch0 = 0,
    Ch1 = 1,
    Ch2 = 2,
    A2cReset = 3,
    A2cWakeup = 4,
    A2cWakeupClr = 5,
    A2cShutdown = 6,
    A2cLog = 7,
    A2cDebug = 8,
    C2aDebug = 9,
    C2aAssert = 10,
    C2aInt = 11,
    C2aIntClr = 12,
    ChubAlive = 15,
    Inval = 0xff,
}

impl EventCode {
    /// Data channel codes, indexed by channel number.
    pub const CHANNELS: [EventCode; 3] = [EventCode::Ch0, EventCode::Ch1, EventCode::Ch2];

    pub fn from_raw(raw: u32) -> Result<Self> {
        Ok(match raw {
            0 => EventCode::Ch0,
            1 => EventCode::Ch1,
            2 => EventCode::Ch2,
            3 => EventCode::A2cReset,
            4 => EventCode::A2cWakeup,
            5 => EventCode::A2cWakeupClr,
            6 => EventCode::A2cShutdown,
            7 => EventCode::A2cLog,
            8 => EventCode::A2cDebug,
            9 => EventCode::C2aDebug,
            10 => EventCode::C2aAssert,
            11 => EventCode::C2aInt,
            12 => EventCode::C2aIntClr,
            15 => EventCode::ChubAlive,
            0xff => EventCode::Inval,
            other => return Err(IpcError::UnknownEvent(other)),
        })
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Data channel number, for `Ch*` codes.
    pub fn channel(self) -> Option<usize> {
        Self::CHANNELS.iter().position(|c| *c == self)
    }
}

/// Record status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum EvtStatus {
    Dequeued = 0,
    Queued = 1,
}

/// A record popped from or pushed to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub code: EventCode,
    pub irq: u32,
}

/// Raw record words, for dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub evt: u32,
    pub irq: u32,
    pub status: u32,
}

/// Queue control words and records at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventQueueState {
    pub eq: u32,
    pub dq: u32,
    pub full: bool,
    pub irq: u32,
    pub records: Vec<RawRecord>,
}

/// One lane's event queue inside shared memory.
pub struct EventQueue<'a, S: SharedMem + ?Sized> {
    shm: &'a S,
    ctrl: usize,
    data: usize,
    slots: usize,
    irq_start: u32,
    irq_end: u32,
}

impl<'a, S: SharedMem + ?Sized> EventQueue<'a, S> {
    pub fn new(shm: &'a S, ctrl: usize, data: usize, slots: usize, irq_range: (u32, u32)) -> Self {
        Self { shm, ctrl, data, slots, irq_start: irq_range.0, irq_end: irq_range.1 }
    }

    fn word(&self, field: usize) -> u32 {
        self.shm.load_u32(self.ctrl + field, Ordering::SeqCst)
    }

    fn set_word(&self, field: usize, value: u32) {
        self.shm.store_u32(self.ctrl + field, value, Ordering::SeqCst)
    }

    fn record(&self, slot: usize) -> usize {
        self.data + slot * EVT_REC_LEN
    }

    fn next_slot(&self, slot: u32) -> u32 {
        let next = slot + 1;
        if next as usize == self.slots {
            0
        } else {
            next
        }
    }

    fn next_irq(&self, irq: u32) -> u32 {
        let next = irq + 1;
        if next == self.irq_end {
            self.irq_start
        } else {
            next
        }
    }

    /// Loads a queue index, rejecting slots the queue does not have.
    fn slot_index(&self, field: usize) -> Result<u32> {
        let index = self.word(field);
        if index as usize >= self.slots {
            error!(target: "chub_ipc::evt", "index {index} outside queue of {}", self.slots);
            return Err(IpcError::BadIndex { index: index as usize, limit: self.slots });
        }
        Ok(index)
    }

    fn checked_irq(&self, irq: u32) -> Result<u32> {
        if irq < self.irq_start || irq >= self.irq_end {
            error!(
                target: "chub_ipc::evt",
                "irq {irq} outside {}..{}",
                self.irq_start,
                self.irq_end
            );
            return Err(IpcError::BadIndex { index: irq as usize, limit: self.irq_end as usize });
        }
        Ok(irq)
    }

    /// Zeroes the control words and invalidates every record.
    pub fn reset(&self) {
        for field in [EVT_EQ, EVT_DQ, EVT_FULL, EVT_EMPTY] {
            self.set_word(field, 0);
        }
        self.set_word(EVT_IRQ, self.irq_start);
        for slot in 0..self.slots {
            let rec = self.record(slot);
            self.shm.store_u32(rec + REC_EVT, EventCode::Inval.raw(), Ordering::Relaxed);
            self.shm.store_u32(rec + REC_IRQ, EventCode::Inval.raw(), Ordering::Relaxed);
            self.shm.store_u32(rec + REC_STATUS, EvtStatus::Dequeued as u32, Ordering::Relaxed);
        }
    }

    pub fn is_full(&self) -> bool {
        self.word(EVT_FULL) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.word(EVT_EQ) == self.word(EVT_DQ) && !self.is_full()
    }

    /// Appends `code` without waiting. Producer side only.
    pub fn push(&self, code: EventCode) -> Result<EventRecord> {
        if self.is_full() {
            return Err(IpcError::EventQueueFull);
        }
        let eq = self.slot_index(EVT_EQ)?;
        let dq = self.word(EVT_DQ);
        let irq = self.checked_irq(self.word(EVT_IRQ))?;
        let rec = self.record(eq as usize);
        self.shm.store_u32(rec + REC_EVT, code.raw(), Ordering::Relaxed);
        self.shm.store_u32(rec + REC_IRQ, irq, Ordering::Relaxed);
        self.shm.store_u32(rec + REC_STATUS, EvtStatus::Queued as u32, Ordering::Release);

        let eq = self.next_slot(eq);
        self.set_word(EVT_EQ, eq);
        self.set_word(EVT_IRQ, self.next_irq(irq));
        if eq == dq {
            self.set_word(EVT_FULL, 1);
        }
        debug!(target: "chub_ipc::evt", "push {code:?} irq {irq}");
        Ok(EventRecord { code, irq })
    }

    /// Appends `code`, sleeping `wait_ms` between up to `attempts` checks
    /// while the queue is full.
    pub fn push_retrying<D: Delay + ?Sized>(
        &self,
        code: EventCode,
        attempts: u32,
        wait_ms: u32,
        delay: &D,
    ) -> Result<EventRecord> {
        let mut tries = 0;
        while self.is_full() && tries < attempts {
            tries += 1;
            delay.delay_ms(wait_ms);
        }
        if self.is_full() {
            warn!(
                target: "chub_ipc::evt",
                "evt {code:?} still full after {} ms",
                u64::from(wait_ms) * u64::from(tries)
            );
            return Err(IpcError::EventQueueFull);
        }
        if tries > 0 {
            info!(
                target: "chub_ipc::evt",
                "evt {code:?} queue drained after {} ms",
                u64::from(wait_ms) * u64::from(tries)
            );
        }
        self.push(code)
    }

    /// Removes the oldest record. Consumer side only.
    ///
    /// A record with an unknown code is consumed and reported as
    /// [`IpcError::UnknownEvent`] so the queue does not stall on it.
    pub fn pop(&self) -> Result<Option<EventRecord>> {
        let dq = self.slot_index(EVT_DQ)?;
        let full = self.is_full();
        if dq == self.word(EVT_EQ) && !full {
            return Ok(None);
        }
        let rec = self.record(dq as usize);
        let raw = self.shm.load_u32(rec + REC_EVT, Ordering::Acquire);
        let irq = self.shm.load_u32(rec + REC_IRQ, Ordering::Acquire);
        self.shm.store_u32(rec + REC_STATUS, EvtStatus::Dequeued as u32, Ordering::Relaxed);
        // The producer only checks `full`, and the record is already copied.
        if full {
            self.set_word(EVT_FULL, 0);
        }
        self.set_word(EVT_DQ, self.next_slot(dq));
        let code = EventCode::from_raw(raw).inspect_err(|_| {
            warn!(target: "chub_ipc::evt", "dropping record with unknown code {raw:#x}");
        })?;
        let irq = self.checked_irq(irq)?;
        Ok(Some(EventRecord { code, irq }))
    }

    pub fn state(&self) -> EventQueueState {
        let records = (0..self.slots)
            .map(|slot| {
                let rec = self.record(slot);
                RawRecord {
                    evt: self.shm.load_u32(rec + REC_EVT, Ordering::Relaxed),
                    irq: self.shm.load_u32(rec + REC_IRQ, Ordering::Relaxed),
                    status: self.shm.load_u32(rec + REC_STATUS, Ordering::Relaxed),
                }
            })
            .collect();
        EventQueueState {
            eq: self.word(EVT_EQ),
            dq: self.word(EVT_DQ),
            full: self.is_full(),
            irq: self.word(EVT_IRQ),
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::EVT_CTRL_LEN;
    use crate::shm::HostShm;
    use std::cell::Cell;

    const SLOTS: usize = 4;

    fn queue(shm: &HostShm) -> EventQueue<'_, HostShm> {
        let q = EventQueue::new(shm, 0, EVT_CTRL_LEN, SLOTS, (0, 3));
        q.reset();
        q
    }

    fn shm() -> HostShm {
        HostShm::new(EVT_CTRL_LEN + SLOTS * EVT_REC_LEN)
    }

    #[derive(Default)]
    struct CountingDelay(Cell<u32>);

    impl Delay for CountingDelay {
        fn delay_ms(&self, ms: u32) {
            self.0.set(self.0.get() + ms);
        }
    }

    #[test]
    fn reset_invalidates_records() {
        let shm = shm();
        let q = queue(&shm);
        let st = q.state();
        assert!(q.is_empty());
        assert!(st.records.iter().all(|r| r.evt == 0xff && r.irq == 0xff));
        assert_eq!(q.pop(), Ok(None));
    }

    #[test]
    fn fifo_with_irq_sequence_wrapping() {
        let shm = shm();
        let q = queue(&shm);
        let irqs: Vec<u32> = (0..4).map(|_| q.push(EventCode::Ch0).unwrap().irq).collect();
        // irq range 0..3 wraps independently of the 4 slots.
        assert_eq!(irqs, vec![0, 1, 2, 0]);
        assert_eq!(q.state().records[1].status, EvtStatus::Queued as u32);
        assert_eq!(q.pop().unwrap().unwrap().irq, 0);
        assert_eq!(q.state().records[0].status, EvtStatus::Dequeued as u32);
    }

    #[test]
    fn slot_count_fits_then_full_then_one_more_after_pop() {
        let shm = shm();
        let q = queue(&shm);
        for _ in 0..SLOTS {
            q.push(EventCode::C2aDebug).unwrap();
        }
        assert!(q.is_full());
        assert_eq!(q.push(EventCode::C2aDebug), Err(IpcError::EventQueueFull));

        let popped = q.pop().unwrap().unwrap();
        assert_eq!(popped.code, EventCode::C2aDebug);
        assert!(!q.is_full());
        q.push(EventCode::ChubAlive).unwrap();
        assert_eq!(q.push(EventCode::ChubAlive), Err(IpcError::EventQueueFull));
    }

    #[test]
    fn drains_full_queue_to_empty() {
        let shm = shm();
        let q = queue(&shm);
        let codes = [EventCode::Ch0, EventCode::Ch1, EventCode::A2cWakeup, EventCode::A2cLog];
        for code in codes {
            q.push(code).unwrap();
        }
        for code in codes {
            assert_eq!(q.pop().unwrap().unwrap().code, code);
        }
        assert!(q.is_empty());
        assert_eq!(q.pop(), Ok(None));
    }

    #[test]
    fn retrying_push_gives_up_after_budget() {
        let shm = shm();
        let q = queue(&shm);
        for _ in 0..SLOTS {
            q.push(EventCode::Ch0).unwrap();
        }
        let delay = CountingDelay::default();
        assert_eq!(q.push_retrying(EventCode::Ch0, 5, 10, &delay), Err(IpcError::EventQueueFull));
        assert_eq!(delay.0.get(), 50);

        q.pop().unwrap();
        let delay = CountingDelay::default();
        assert!(q.push_retrying(EventCode::Ch0, 5, 10, &delay).is_ok());
        assert_eq!(delay.0.get(), 0);
    }

    #[test]
    fn unknown_code_is_consumed_and_reported() {
        let shm = shm();
        let q = queue(&shm);
        q.push(EventCode::Ch0).unwrap();
        q.push(EventCode::Ch1).unwrap();
        shm.store_u32(EVT_CTRL_LEN + REC_EVT, 0x42, Ordering::Relaxed);
        assert_eq!(q.pop(), Err(IpcError::UnknownEvent(0x42)));
        assert_eq!(q.pop().unwrap().unwrap().code, EventCode::Ch1);
    }

    #[test]
    fn peer_indices_outside_queue_are_rejected() {
        let shm = shm();
        let q = queue(&shm);
        shm.store_u32(EVT_EQ, SLOTS as u32, Ordering::SeqCst);
        assert_eq!(q.push(EventCode::Ch0), Err(IpcError::BadIndex { index: SLOTS, limit: SLOTS }));
        shm.store_u32(EVT_EQ, 0, Ordering::SeqCst);
        shm.store_u32(EVT_IRQ, 16, Ordering::SeqCst);
        assert_eq!(q.push(EventCode::Ch0), Err(IpcError::BadIndex { index: 16, limit: 3 }));

        shm.store_u32(EVT_DQ, 9, Ordering::SeqCst);
        assert_eq!(q.pop(), Err(IpcError::BadIndex { index: 9, limit: SLOTS }));
    }

    #[test]
    fn record_irq_outside_range_is_consumed_and_reported() {
        let shm = shm();
        let q = queue(&shm);
        q.push(EventCode::Ch0).unwrap();
        shm.store_u32(EVT_CTRL_LEN + REC_IRQ, 40, Ordering::Relaxed);
        assert_eq!(q.pop(), Err(IpcError::BadIndex { index: 40, limit: 3 }));
        assert!(q.is_empty());
    }

    #[test]
    fn channel_codes_map_to_numbers() {
        assert_eq!(EventCode::Ch2.channel(), Some(2));
        assert_eq!(EventCode::C2aInt.channel(), None);
        assert_eq!(EventCode::from_raw(15), Ok(EventCode::ChubAlive));
    }
}
