// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-core link context tying regions, queues and mailboxes together
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 11 unit tests, `tests/loopback.rs`
//!
//! An [`Ipc`] is built once per core by [`IpcBuilder::attach`] and holds the
//! region map, the mailbox table and the platform clock. Every operation
//! borrows it; there is no process-wide state.
//!
//! Send path: data-plane write, event record, timestamp, doorbell. Receive
//! path: pending bit, event record, data-plane read.

use std::sync::atomic::{fence, Ordering};

use log::{debug, info};
use nexus_hal::{Bus, Delay, HostDelay, HostTimer, Timer};
use serde::Serialize;

use crate::bootstrap::{attach, BootstrapRole};
use crate::channel::{ChannelPlane, SlotState};
use crate::config::{EventQueueFullAction, IpcConfig, LogFullAction, NoHooks, PolicyHooks, Side};
use crate::error::{IpcError, LayoutError, Result};
use crate::event::{EventCode, EventQueue, EventQueueState, EventRecord};
use crate::layout::{ControlLayout, DataPlane, Lane, RegionKind, RegionMap, HDR_BOOTMODE, HDR_CHUBCLK};
use crate::logbuf::{LogRing, LogState};
use crate::mailbox::{DebugEvent, Mailbox, MailboxSide, MailboxTable, Owner, SR_CHUB_ALIVE};
use crate::ring::{DataRing, RingState};
use crate::shm::SharedMem;

/// Mailbox owner that carries the event doorbells of both lanes.
const EVENT_OWNER: Owner = Owner::Ap;

/// Mailbox path each core listens on.
pub const fn mailbox_side(side: Side) -> MailboxSide {
    match side {
        Side::Ap => MailboxSide::Receiver,
        Side::Chub => MailboxSide::Generator,
    }
}

/// What [`Ipc::recv`] took off the receive lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    /// A frame of `len` bytes was copied out of data channel `channel`.
    Data { channel: usize, len: usize, irq: u32 },
    /// An event without payload.
    Event(EventRecord),
}

/// Data plane state of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSnapshot {
    Ring(RingState),
    Channel(Vec<SlotState>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneSnapshot {
    pub lane: Lane,
    pub events: EventQueueState,
    pub data: DataSnapshot,
}

/// Everything `dump` prints, in serialisable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpcSnapshot {
    pub side: Side,
    pub plane: DataPlane,
    pub lanes: Vec<LaneSnapshot>,
    pub log: LogState,
}

/// Collects the per-core collaborators before attaching.
pub struct IpcBuilder<B: Bus> {
    config: IpcConfig,
    mailboxes: MailboxTable<B>,
    timer: Box<dyn Timer + Send + Sync>,
    delay: Box<dyn Delay + Send + Sync>,
    hooks: Box<dyn PolicyHooks>,
}

impl<B: Bus> IpcBuilder<B> {
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            mailboxes: MailboxTable::new(),
            timer: Box::new(HostTimer::new()),
            delay: Box::new(HostDelay),
            hooks: Box::new(NoHooks),
        }
    }

    /// Registers the register block of `owner`, seen from this core.
    pub fn mailbox(mut self, owner: Owner, bus: B) -> Self {
        self.mailboxes.set(owner, Mailbox::new(bus, mailbox_side(self.config.side)));
        self
    }

    pub fn timer(mut self, timer: impl Timer + Send + Sync + 'static) -> Self {
        self.timer = Box::new(timer);
        self
    }

    pub fn delay(mut self, delay: impl Delay + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn hooks(mut self, hooks: impl PolicyHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Bootstraps the region map from the header at `boot_base`.
    pub fn attach<S: SharedMem>(
        self,
        shm: S,
        boot_base: usize,
        role: BootstrapRole,
    ) -> core::result::Result<Ipc<S, B>, LayoutError> {
        self.config.check().map_err(LayoutError::InvalidConfig)?;
        let control = ControlLayout::new(self.config.data_plane, self.config.geometry);
        let map = attach(&shm, boot_base, &control, role)?;
        Ok(Ipc {
            shm,
            config: self.config,
            control,
            map,
            mailboxes: self.mailboxes,
            timer: self.timer,
            delay: self.delay,
            hooks: self.hooks,
        })
    }
}

/// One core's end of the link.
pub struct Ipc<S: SharedMem, B: Bus> {
    shm: S,
    config: IpcConfig,
    control: ControlLayout,
    map: RegionMap,
    mailboxes: MailboxTable<B>,
    timer: Box<dyn Timer + Send + Sync>,
    delay: Box<dyn Delay + Send + Sync>,
    hooks: Box<dyn PolicyHooks>,
}

impl<S: SharedMem, B: Bus> Ipc<S, B> {
    pub fn side(&self) -> Side {
        self.config.side
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    pub fn regions(&self) -> &RegionMap {
        &self.map
    }

    pub fn control(&self) -> &ControlLayout {
        &self.control
    }

    pub fn shm(&self) -> &S {
        &self.shm
    }

    pub fn mailbox(&self, owner: Owner) -> Result<&Mailbox<B>> {
        self.mailboxes.get(owner)
    }

    pub fn ring(&self, lane: Lane) -> DataRing<'_, S> {
        let g = &self.config.geometry;
        DataRing::new(&self.shm, self.map.base(RegionKind::data(lane)), g.data_capacity, g.packet_max)
    }

    pub fn channel(&self, lane: Lane) -> ChannelPlane<'_, S> {
        let g = &self.config.geometry;
        let region = self.map.get(RegionKind::data(lane));
        ChannelPlane::new(&self.shm, lane, region.base, region.offset as usize, g.channel_slots, g.packet_max)
    }

    pub fn events(&self, lane: Lane) -> EventQueue<'_, S> {
        let g = &self.config.geometry;
        EventQueue::new(
            &self.shm,
            self.map.base(RegionKind::evt_ctrl(lane)),
            self.map.base(RegionKind::evt_data(lane)),
            g.event_slots,
            (g.irq_start, g.irq_end),
        )
    }

    pub fn log(&self) -> LogRing<'_, S> {
        LogRing::new(
            &self.shm,
            self.map.base(RegionKind::Ipc) + self.control.logbuf,
            self.map.base(RegionKind::Log),
        )
    }

    fn tx_lane(&self, lane: Lane) -> Result<()> {
        if lane == self.side().tx_lane() {
            Ok(())
        } else {
            Err(IpcError::WrongDirection)
        }
    }

    fn rx_lane(&self, lane: Lane) -> Result<()> {
        if lane == self.side().rx_lane() {
            Ok(())
        } else {
            Err(IpcError::WrongDirection)
        }
    }

    /// Lays out the control block and drops stale doorbells. Owner side only,
    /// before the peer starts.
    pub fn init(&self) -> Result<()> {
        for lane in Lane::ALL {
            match self.control.plane {
                DataPlane::Ring => self.ring(lane).reset(),
                DataPlane::Channel => self.channel(lane).reset(),
            }
            self.events(lane).reset();
        }
        self.mailbox(EVENT_OWNER)?.clear_all();
        info!(target: "chub_ipc::boot", "ipc initialised ({:?} plane)", self.control.plane);
        Ok(())
    }

    /// Queues `code` on `lane` and rings the peer.
    ///
    /// The CHUB side waits out a full queue within the retry budget; the AP
    /// side fails at once.
    pub fn add_event(&self, lane: Lane, code: EventCode) -> Result<EventRecord> {
        self.tx_lane(lane)?;
        let mailbox = self.mailbox(EVENT_OWNER)?;
        let queue = self.events(lane);
        let pushed = match self.side() {
            Side::Chub => {
                let retry = self.config.retry;
                queue.push_retrying(code, retry.attempts, retry.wait_ms, &*self.delay)
            }
            Side::Ap => queue.push(code),
        };
        let record = match pushed {
            Ok(record) => record,
            Err(err) => {
                if self.config.policy.event_queue_full == EventQueueFullAction::Escalate {
                    self.hooks.escalate(lane, err);
                }
                return Err(err);
            }
        };

        mailbox.write_val(self.timer.now());
        fence(Ordering::Release);
        mailbox.generate(record.irq);
        Ok(record)
    }

    /// Takes the oldest event from `lane`.
    pub fn get_event(&self, lane: Lane) -> Result<Option<EventRecord>> {
        self.rx_lane(lane)?;
        self.events(lane).pop()
    }

    /// Sends one frame and announces it.
    pub fn write_data(&self, lane: Lane, payload: &[u8]) -> Result<()> {
        self.tx_lane(lane)?;
        let code = match self.control.plane {
            DataPlane::Ring => {
                self.ring(lane).write(payload)?;
                EventCode::Ch0
            }
            DataPlane::Channel => {
                let n = self.channel(lane).write(payload)?;
                EventCode::CHANNELS.get(n).copied().ok_or(IpcError::NoChannel)?
            }
        };
        self.add_event(lane, code).map(|_| ())
    }

    /// Reads one frame without consuming an event.
    pub fn read_data(&self, lane: Lane, out: &mut [u8]) -> Result<usize> {
        self.rx_lane(lane)?;
        match self.control.plane {
            DataPlane::Ring => self.ring(lane).read(out),
            DataPlane::Channel => self.channel(lane).read_any(out),
        }
    }

    /// Takes one event from `lane` and, for data events, the frame it announces.
    pub fn recv(&self, lane: Lane, out: &mut [u8]) -> Result<Option<Incoming>> {
        let Some(record) = self.get_event(lane)? else {
            return Ok(None);
        };
        let Some(channel) = record.code.channel() else {
            return Ok(Some(Incoming::Event(record)));
        };
        let len = match self.control.plane {
            DataPlane::Ring => self.ring(lane).read(out)?,
            DataPlane::Channel => self.channel(lane).read(channel, out)?,
        };
        Ok(Some(Incoming::Data { channel, len, irq: record.irq }))
    }

    /// Pending doorbells addressed to this core.
    pub fn pending_irqs(&self) -> Result<u32> {
        Ok(self.mailbox(EVENT_OWNER)?.pending())
    }

    pub fn ack(&self, irq: u32) -> Result<()> {
        self.mailbox(EVENT_OWNER)?.clear(irq);
        Ok(())
    }

    pub fn ack_all(&self) -> Result<()> {
        self.mailbox(EVENT_OWNER)?.clear_all();
        Ok(())
    }

    pub fn mask_irq(&self, irq: u32) -> Result<()> {
        self.mailbox(EVENT_OWNER)?.mask(irq);
        Ok(())
    }

    pub fn unmask_irq(&self, irq: u32) -> Result<()> {
        self.mailbox(EVENT_OWNER)?.unmask(irq);
        Ok(())
    }

    /// Appends one log character. CHUB side only.
    pub fn log_put(&self, ch: u8) -> Result<()> {
        if self.side() != Side::Chub {
            return Err(IpcError::WrongDirection);
        }
        if self.log().put(ch) {
            self.hooks.log_overrun();
            if self.config.policy.log_full == LogFullAction::RaiseDebugEvent {
                self.raise_log_full();
            }
        }
        Ok(())
    }

    fn raise_log_full(&self) {
        if let Ok(mailbox) = self.mailbox(EVENT_OWNER) {
            mailbox.write_debug_event(DebugEvent::ChubFullLog);
        }
        // Best effort: never spend the retry budget from inside the log path.
        if self.events(Lane::C2a).is_full() {
            debug!(target: "chub_ipc::log", "log full event skipped, c2a queue full");
            return;
        }
        if let Err(err) = self.add_event(Lane::C2a, EventCode::C2aDebug) {
            debug!(target: "chub_ipc::log", "log full event dropped: {err}");
        }
    }

    pub fn log_write(&self, text: &[u8]) -> Result<()> {
        text.iter().try_for_each(|ch| self.log_put(*ch))
    }

    pub fn logbuf_get_token(&self) -> u32 {
        self.log().next_token()
    }

    /// Pending log text; AP side reader.
    pub fn log_drain(&self) -> Vec<u8> {
        self.log().drain()
    }

    fn bootarg(&self, field: usize) -> u32 {
        self.shm.load_u32(self.map.base(RegionKind::BlMap) + field, Ordering::Acquire)
    }

    fn set_bootarg(&self, field: usize, value: u32) {
        self.shm.store_u32(self.map.base(RegionKind::BlMap) + field, value, Ordering::Release)
    }

    pub fn chub_clk(&self) -> u32 {
        self.bootarg(HDR_CHUBCLK)
    }

    pub fn set_chub_clk(&self, clk: u32) {
        self.set_bootarg(HDR_CHUBCLK, clk)
    }

    pub fn bootmode(&self) -> u32 {
        self.bootarg(HDR_BOOTMODE)
    }

    pub fn set_bootmode(&self, mode: u32) {
        self.set_bootarg(HDR_BOOTMODE, mode)
    }

    /// Size of the memory the CHUB exposes for dumps.
    pub fn chub_mem_size(&self) -> u32 {
        self.map.size(RegionKind::Dump)
    }

    pub fn write_debug_event(&self, event: DebugEvent) -> Result<()> {
        self.mailbox(EVENT_OWNER)?.write_debug_event(event);
        Ok(())
    }

    pub fn read_debug_event(&self) -> Result<DebugEvent> {
        Ok(self.mailbox(EVENT_OWNER)?.read_debug_event())
    }

    pub fn write_val(&self, value: u64) -> Result<()> {
        self.mailbox(EVENT_OWNER)?.write_val(value);
        Ok(())
    }

    pub fn read_val(&self) -> Result<u64> {
        Ok(self.mailbox(EVENT_OWNER)?.read_val())
    }

    pub fn set_chub_alive(&self, value: u32) -> Result<()> {
        self.mailbox(EVENT_OWNER)?.write_shared(SR_CHUB_ALIVE, value);
        Ok(())
    }

    pub fn chub_alive(&self) -> Result<u32> {
        Ok(self.mailbox(EVENT_OWNER)?.read_shared(SR_CHUB_ALIVE))
    }

    pub fn set_mcuctrl(&self, owner: Owner, value: u32) -> Result<()> {
        self.mailbox(owner)?.set_mcuctrl(value);
        Ok(())
    }

    /// Captures queue and buffer state and logs it.
    pub fn dump(&self) -> IpcSnapshot {
        let lanes = Lane::ALL
            .iter()
            .map(|lane| {
                let events = self.events(*lane).state();
                info!(
                    target: "chub_ipc::evt",
                    "evt-{}: eq:{} dq:{} full:{} irq:{}",
                    lane.name(),
                    events.eq,
                    events.dq,
                    events.full,
                    events.irq
                );
                for (i, rec) in events.records.iter().enumerate() {
                    debug!(
                        target: "chub_ipc::evt",
                        "evt{i}(evt:{},irq:{},f:{})",
                        rec.evt,
                        rec.irq,
                        rec.status
                    );
                }
                let data = match self.control.plane {
                    DataPlane::Ring => {
                        let st = self.ring(*lane).state();
                        info!(
                            target: "chub_ipc::ring",
                            "{}: eq:{} dq:{} full:{} empty:{} tx:{} rx:{}",
                            lane.name(),
                            st.eq,
                            st.dq,
                            st.full,
                            st.empty,
                            st.written,
                            st.read
                        );
                        DataSnapshot::Ring(st)
                    }
                    DataPlane::Channel => {
                        let slots = self.channel(*lane).state();
                        for slot in &slots {
                            info!(target: "chub_ipc::ring", "CH-{}{}:{:#x}", lane.name(), slot.num, slot.status);
                        }
                        DataSnapshot::Channel(slots)
                    }
                };
                LaneSnapshot { lane: *lane, events, data }
            })
            .collect();
        let log = self.log().state();
        info!(target: "chub_ipc::log", "log: token:{} eq:{} dq:{} size:{}", log.token, log.eq, log.dq, log.size);
        IpcSnapshot { side: self.side(), plane: self.control.plane, lanes, log }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Geometry, MapHeader, MAP_INFO_OFFSET};
    use crate::mailbox::SimMailbox;
    use crate::shm::HostShm;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    type Link = Ipc<HostShm, Arc<SimMailbox>>;

    struct FixedTimer(u64);

    impl Timer for FixedTimer {
        fn now(&self) -> u64 {
            self.0
        }
    }

    #[derive(Clone, Default)]
    struct CountingDelay(Arc<AtomicU32>);

    impl Delay for CountingDelay {
        fn delay_ms(&self, ms: u32) {
            self.0.fetch_add(ms, Ordering::Relaxed);
        }
    }

    #[derive(Clone, Default)]
    struct Escalations(Arc<AtomicU32>);

    impl PolicyHooks for Escalations {
        fn escalate(&self, _lane: Lane, _err: IpcError) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn config(side: Side, plane: DataPlane) -> IpcConfig {
        IpcConfig {
            side,
            data_plane: plane,
            geometry: Geometry { data_capacity: 128, packet_max: 32, event_slots: 4, ..Geometry::default() },
            ..IpcConfig::default()
        }
    }

    fn image(config: &IpcConfig) -> HostShm {
        let control = ControlLayout::new(config.data_plane, config.geometry);
        let header = MapHeader::contiguous(&control, 64);
        let shm = HostShm::new(header.image_len());
        header.write_to(&shm, MAP_INFO_OFFSET);
        shm
    }

    fn pair(plane: DataPlane) -> (Link, Link, CountingDelay) {
        let ap_cfg = config(Side::Ap, plane);
        let shm = image(&ap_cfg);
        let mbox = Arc::new(SimMailbox::new());
        let delay = CountingDelay::default();
        let chub = IpcBuilder::new(config(Side::Chub, plane))
            .mailbox(Owner::Ap, mbox.clone())
            .delay(delay.clone())
            .timer(FixedTimer(0x1_0000_0002))
            .attach(shm.clone(), 0, BootstrapRole::Owner)
            .unwrap();
        chub.init().unwrap();
        let ap = IpcBuilder::new(ap_cfg)
            .mailbox(Owner::Ap, mbox)
            .timer(FixedTimer(7))
            .attach(shm, 0, BootstrapRole::Attacher)
            .unwrap();
        (ap, chub, delay)
    }

    #[test]
    fn ring_frame_travels_with_doorbell() {
        let (ap, chub, _) = pair(DataPlane::Ring);
        ap.write_data(Lane::A2c, b"hello chub").unwrap();
        assert_eq!(chub.pending_irqs().unwrap(), 1);
        assert_eq!(chub.read_val().unwrap(), 7);

        let mut buf = [0u8; 32];
        let got = chub.recv(Lane::A2c, &mut buf).unwrap();
        assert_eq!(got, Some(Incoming::Data { channel: 0, len: 10, irq: 0 }));
        assert_eq!(&buf[..10], b"hello chub");
        chub.ack(0).unwrap();
        assert_eq!(chub.pending_irqs().unwrap(), 0);
        assert_eq!(chub.recv(Lane::A2c, &mut buf).unwrap(), None);
    }

    #[test]
    fn channel_frame_uses_slot_code() {
        let (ap, chub, _) = pair(DataPlane::Channel);
        chub.write_data(Lane::C2a, b"one").unwrap();
        chub.write_data(Lane::C2a, b"two").unwrap();
        assert_eq!(ap.pending_irqs().unwrap(), 0b11);

        let mut buf = [0u8; 32];
        assert_eq!(
            ap.recv(Lane::C2a, &mut buf).unwrap(),
            Some(Incoming::Data { channel: 0, len: 3, irq: 0 })
        );
        assert_eq!(&buf[..3], b"one");
        assert_eq!(
            ap.recv(Lane::C2a, &mut buf).unwrap(),
            Some(Incoming::Data { channel: 1, len: 3, irq: 1 })
        );
        assert_eq!(&buf[..3], b"two");
    }

    #[test]
    fn lanes_are_directional() {
        let (ap, chub, _) = pair(DataPlane::Ring);
        let mut buf = [0u8; 8];
        assert_eq!(ap.write_data(Lane::C2a, b"x"), Err(IpcError::WrongDirection));
        assert_eq!(chub.read_data(Lane::C2a, &mut buf), Err(IpcError::WrongDirection));
        assert_eq!(ap.get_event(Lane::A2c), Err(IpcError::WrongDirection));
        assert_eq!(ap.log_put(b'x'), Err(IpcError::WrongDirection));
    }

    #[test]
    fn ap_fails_fast_chub_waits_then_escalates() {
        let ap_cfg = config(Side::Ap, DataPlane::Ring);
        let shm = image(&ap_cfg);
        let mbox = Arc::new(SimMailbox::new());
        let hooks = Escalations::default();
        let delay = CountingDelay::default();
        let mut chub_cfg = config(Side::Chub, DataPlane::Ring);
        chub_cfg.policy.event_queue_full = EventQueueFullAction::Escalate;
        let chub = IpcBuilder::new(chub_cfg)
            .mailbox(Owner::Ap, mbox.clone())
            .delay(delay.clone())
            .hooks(hooks.clone())
            .attach(shm.clone(), 0, BootstrapRole::Owner)
            .unwrap();
        chub.init().unwrap();
        let ap = IpcBuilder::new(ap_cfg)
            .mailbox(Owner::Ap, mbox)
            .delay(delay.clone())
            .attach(shm, 0, BootstrapRole::Attacher)
            .unwrap();

        for _ in 0..4 {
            ap.add_event(Lane::A2c, EventCode::A2cWakeup).unwrap();
            chub.add_event(Lane::C2a, EventCode::ChubAlive).unwrap();
        }
        assert_eq!(ap.add_event(Lane::A2c, EventCode::A2cWakeup), Err(IpcError::EventQueueFull));
        assert_eq!(delay.0.load(Ordering::Relaxed), 0);

        assert_eq!(chub.add_event(Lane::C2a, EventCode::ChubAlive), Err(IpcError::EventQueueFull));
        assert_eq!(delay.0.load(Ordering::Relaxed), 50);
        assert_eq!(hooks.0.load(Ordering::Relaxed), 1);

        ap.get_event(Lane::C2a).unwrap();
        chub.add_event(Lane::C2a, EventCode::ChubAlive).unwrap();
    }

    #[test]
    fn log_overrun_raises_debug_event() {
        let (ap, chub, _) = pair(DataPlane::Ring);
        let size = chub.log().size();
        assert_eq!(size, 64);
        chub.log_write(b"ab").unwrap();
        assert_eq!(ap.log_drain(), b"ab");
        // Writer restarts at 2 and meets the reader after a full lap.
        chub.log_write(&vec![b'.'; size]).unwrap();
        assert_eq!(ap.read_debug_event().unwrap(), DebugEvent::ChubFullLog);
        let mut buf = [0u8; 8];
        match ap.recv(Lane::C2a, &mut buf).unwrap() {
            Some(Incoming::Event(rec)) => assert_eq!(rec.code, EventCode::C2aDebug),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn log_overrun_does_not_wait_on_full_queue() {
        let (ap, chub, delay) = pair(DataPlane::Ring);
        for _ in 0..4 {
            chub.add_event(Lane::C2a, EventCode::ChubAlive).unwrap();
        }
        chub.log_write(b"ab").unwrap();
        assert_eq!(ap.log_drain(), b"ab");
        chub.log_write(&vec![b'.'; chub.log().size()]).unwrap();
        assert_eq!(ap.read_debug_event().unwrap(), DebugEvent::ChubFullLog);
        assert_eq!(delay.0.load(Ordering::Relaxed), 0);
        assert!(chub.events(Lane::C2a).is_full());
    }

    #[test]
    fn attach_rejects_inconsistent_geometry() {
        let mut cfg = config(Side::Chub, DataPlane::Ring);
        cfg.geometry.irq_end = 20;
        let shm = image(&cfg);
        let attached = IpcBuilder::new(cfg)
            .mailbox(Owner::Ap, Arc::new(SimMailbox::new()))
            .attach(shm, 0, BootstrapRole::Owner);
        assert_eq!(
            attached.err(),
            Some(LayoutError::InvalidConfig("irq range must be non-empty and within 16 lines"))
        );
    }

    #[test]
    fn boot_args_live_in_header() {
        let (ap, chub, _) = pair(DataPlane::Ring);
        ap.set_chub_clk(400_000_000);
        ap.set_bootmode(2);
        assert_eq!(chub.chub_clk(), 400_000_000);
        assert_eq!(chub.bootmode(), 2);
        assert_eq!(chub.chub_mem_size(), chub.regions().size(RegionKind::Dump));
        assert_eq!(ap.logbuf_get_token(), 1);
    }

    #[test]
    fn debug_registers_are_shared() {
        let (ap, chub, _) = pair(DataPlane::Ring);
        chub.set_chub_alive(0xc0ffee).unwrap();
        assert_eq!(ap.chub_alive().unwrap(), 0xc0ffee);
        chub.write_val(u64::MAX - 1).unwrap();
        assert_eq!(ap.read_val().unwrap(), u64::MAX - 1);
        ap.set_mcuctrl(Owner::Ap, 1).unwrap();
        assert_eq!(ap.set_mcuctrl(Owner::Cp, 1), Err(IpcError::NoMailbox(Owner::Cp)));
    }

    #[test]
    fn init_drops_stale_doorbells() {
        let (ap, chub, _) = pair(DataPlane::Ring);
        chub.add_event(Lane::C2a, EventCode::C2aInt).unwrap();
        ap.write_data(Lane::A2c, b"stale").unwrap();
        assert_ne!(chub.pending_irqs().unwrap(), 0);
        chub.init().unwrap();
        assert_eq!(chub.pending_irqs().unwrap(), 0);
        assert!(chub.events(Lane::A2c).is_empty());
        assert!(chub.ring(Lane::A2c).state().empty);
    }

    #[test]
    fn dump_reports_both_lanes() {
        let (ap, _chub, _) = pair(DataPlane::Ring);
        ap.write_data(Lane::A2c, b"abc").unwrap();
        let snap = ap.dump();
        assert_eq!(snap.lanes.len(), 2);
        let a2c = &snap.lanes[Lane::A2c.index()];
        assert_eq!(a2c.events.eq, 1);
        match &a2c.data {
            DataSnapshot::Ring(st) => assert_eq!((st.eq, st.written), (5, 1)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(snap.log.size, 64);
    }
}
