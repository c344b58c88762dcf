// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Binary layout of the CHUB shared memory (boot header, region map, control block)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 6 unit tests
//!
//! Everything both cores must agree on byte-for-byte lives here. Field
//! offsets are explicit constants; nothing relies on native struct layout.
//!
//! Boot header (at [`MAP_INFO_OFFSET`] inside the boot region):
//!
//! | off | field                                   |
//! |-----|-----------------------------------------|
//! | 0   | magic, 16 bytes, zero padded            |
//! | 16  | ipc version (u32)                       |
//! | 20  | bl start/end, code, ipc, ram, shared, dump (u32 pairs) |
//! | 68  | chub clock (u32)                        |
//! | 72  | boot mode (u32)                         |
//!
//! Control block (at the start of the ipc region), in order: the data plane
//! of both lanes, the event queue of both lanes, the log ring header. The log
//! characters fill the rest of the ipc region.

use serde::{Deserialize, Serialize};

use crate::shm::SharedMem;

/// Magic string the boot loader stamps into the header.
pub const OS_UPDT_MAGIC: &[u8] = b"Nanohub OS";
/// Size of the magic field.
pub const MAGIC_LEN: usize = 16;
/// Layout version both cores must be built with.
pub const IPC_VERSION: u32 = 180_111;
/// Offset of the boot header inside the boot region.
pub const MAP_INFO_OFFSET: usize = 0x100;

pub const HDR_MAGIC: usize = 0;
pub const HDR_VERSION: usize = 16;
pub const HDR_REGIONS: usize = 20;
pub const HDR_CHUBCLK: usize = 68;
pub const HDR_BOOTMODE: usize = 72;
/// Encoded header size.
pub const MAP_HEADER_LEN: usize = 76;

pub const RING_EQ: usize = 0;
pub const RING_DQ: usize = 4;
pub const RING_FULL: usize = 8;
pub const RING_EMPTY: usize = 12;
pub const RING_CNT_WT: usize = 16;
pub const RING_CNT_RD: usize = 20;
pub const RING_BUF: usize = 24;

pub const CH_NUM: usize = 0;
pub const CH_STATUS: usize = 4;
pub const CH_SIZE: usize = 8;
pub const CH_BUF: usize = 12;

pub const EVT_EQ: usize = 0;
pub const EVT_DQ: usize = 4;
pub const EVT_FULL: usize = 8;
pub const EVT_EMPTY: usize = 12;
pub const EVT_IRQ: usize = 16;
pub const EVT_CTRL_LEN: usize = 20;

pub const REC_EVT: usize = 0;
pub const REC_IRQ: usize = 4;
pub const REC_STATUS: usize = 8;
pub const EVT_REC_LEN: usize = 12;

pub const LOG_TOKEN: usize = 0;
pub const LOG_EQ: usize = 4;
pub const LOG_DQ: usize = 8;
pub const LOG_SIZE: usize = 12;
pub const LOG_HDR_LEN: usize = 16;

const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Direction of a data lane / event queue. The discriminant is the index
/// into the control block arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// CHUB to AP.
    C2a = 0,
    /// AP to CHUB.
    A2c = 1,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::C2a, Lane::A2c];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Lane::C2a => "c2a",
            Lane::A2c => "a2c",
        }
    }
}

/// Wire format of the data lanes, selected once per link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataPlane {
    /// Length-prefixed byte ring per lane.
    #[default]
    Ring,
    /// Fixed packet slots with an ownership status per slot.
    Channel,
}

/// Sizes of the queues inside the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Geometry {
    /// Ring bytes per lane.
    pub data_capacity: usize,
    /// Largest payload accepted by a writer.
    pub packet_max: usize,
    /// Records per event queue.
    pub event_slots: usize,
    /// Packet slots per lane in the channel plane.
    pub channel_slots: usize,
    /// First irq index handed out by an event queue.
    pub irq_start: u32,
    /// One past the last irq index; the sequence wraps back to `irq_start`.
    pub irq_end: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            data_capacity: 4096,
            packet_max: 272,
            event_slots: 15,
            channel_slots: 3,
            irq_start: 0,
            irq_end: 14,
        }
    }
}

/// Logical regions of the shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionKind {
    Bl,
    BlMap,
    Os,
    Shared,
    Ipc,
    Ram,
    Dump,
    Log,
    EvtA2c,
    EvtA2cCtrl,
    EvtC2a,
    EvtC2aCtrl,
    IpcA2c,
    IpcC2a,
}

impl RegionKind {
    pub const COUNT: usize = 14;

    pub const ALL: [RegionKind; Self::COUNT] = [
        RegionKind::Bl,
        RegionKind::BlMap,
        RegionKind::Os,
        RegionKind::Shared,
        RegionKind::Ipc,
        RegionKind::Ram,
        RegionKind::Dump,
        RegionKind::Log,
        RegionKind::EvtA2c,
        RegionKind::EvtA2cCtrl,
        RegionKind::EvtC2a,
        RegionKind::EvtC2aCtrl,
        RegionKind::IpcA2c,
        RegionKind::IpcC2a,
    ];

    /// Regions described directly by a start/end pair in the boot header,
    /// in header order.
    pub const HEADER_ORDER: [RegionKind; 6] = [
        RegionKind::Bl,
        RegionKind::Os,
        RegionKind::Ipc,
        RegionKind::Ram,
        RegionKind::Shared,
        RegionKind::Dump,
    ];

    pub const fn data(lane: Lane) -> Self {
        match lane {
            Lane::C2a => RegionKind::IpcC2a,
            Lane::A2c => RegionKind::IpcA2c,
        }
    }

    pub const fn evt_data(lane: Lane) -> Self {
        match lane {
            Lane::C2a => RegionKind::EvtC2a,
            Lane::A2c => RegionKind::EvtA2c,
        }
    }

    pub const fn evt_ctrl(lane: Lane) -> Self {
        match lane {
            Lane::C2a => RegionKind::EvtC2aCtrl,
            Lane::A2c => RegionKind::EvtA2cCtrl,
        }
    }
}

/// Start/end byte offsets (relative to the boot base) of one header region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Decoded boot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    pub magic: [u8; MAGIC_LEN],
    pub ipc_version: u32,
    /// Spans in [`RegionKind::HEADER_ORDER`].
    pub spans: [Span; 6],
    pub chubclk: u32,
    pub bootmode: u32,
}

/// Magic field exactly as the boot loader writes it.
pub fn expected_magic() -> [u8; MAGIC_LEN] {
    let mut magic = [0u8; MAGIC_LEN];
    magic[..OS_UPDT_MAGIC.len()].copy_from_slice(OS_UPDT_MAGIC);
    magic
}

impl MapHeader {
    /// Header carrying the compiled-in magic and version.
    pub fn new(spans: [Span; 6]) -> Self {
        Self { magic: expected_magic(), ipc_version: IPC_VERSION, spans, chubclk: 0, bootmode: 0 }
    }

    /// Header for a contiguous test/tool image: boot loader, firmware, ipc
    /// area (control block plus `log_len` log bytes), ram and shared scratch,
    /// with the dump region covering the whole image.
    pub fn contiguous(control: &ControlLayout, log_len: usize) -> Self {
        const BL_LEN: u32 = 0x1000;
        const OS_LEN: u32 = 0x8000;
        const RAM_LEN: u32 = 0x4000;
        const SHARED_LEN: u32 = 0x1000;
        let ipc_len = align4(control.size() + log_len) as u32;
        let bl = Span::new(0, BL_LEN);
        let os = Span::new(bl.end, bl.end + OS_LEN);
        let ipc = Span::new(os.end, os.end + ipc_len);
        let ram = Span::new(ipc.end, ipc.end + RAM_LEN);
        let shared = Span::new(ram.end, ram.end + SHARED_LEN);
        let dump = Span::new(0, shared.end);
        Self::new([bl, os, ipc, ram, shared, dump])
    }

    pub fn span(&self, kind: RegionKind) -> Option<Span> {
        RegionKind::HEADER_ORDER
            .iter()
            .position(|k| *k == kind)
            .map(|i| self.spans[i])
    }

    /// Bytes from the boot base to the end of the furthest region.
    pub fn image_len(&self) -> usize {
        self.spans.iter().map(|s| s.end as usize).max().unwrap_or(0)
    }

    pub fn magic_ok(&self) -> bool {
        self.magic == expected_magic()
    }

    /// Serialises the header to its little-endian wire form.
    pub fn to_le_bytes(&self) -> [u8; MAP_HEADER_LEN] {
        let mut bytes = [0u8; MAP_HEADER_LEN];
        bytes[HDR_MAGIC..HDR_MAGIC + MAGIC_LEN].copy_from_slice(&self.magic);
        bytes[HDR_VERSION..HDR_VERSION + 4].copy_from_slice(&self.ipc_version.to_le_bytes());
        for (i, span) in self.spans.iter().enumerate() {
            let at = HDR_REGIONS + i * 8;
            bytes[at..at + 4].copy_from_slice(&span.start.to_le_bytes());
            bytes[at + 4..at + 8].copy_from_slice(&span.end.to_le_bytes());
        }
        bytes[HDR_CHUBCLK..HDR_CHUBCLK + 4].copy_from_slice(&self.chubclk.to_le_bytes());
        bytes[HDR_BOOTMODE..HDR_BOOTMODE + 4].copy_from_slice(&self.bootmode.to_le_bytes());
        bytes
    }

    /// Deserialises the wire form. No validation happens here.
    pub fn from_le_bytes(bytes: &[u8; MAP_HEADER_LEN]) -> Self {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut magic = [0u8; MAGIC_LEN];
        magic.copy_from_slice(&bytes[HDR_MAGIC..HDR_MAGIC + MAGIC_LEN]);
        let mut spans = [Span::default(); 6];
        for (i, span) in spans.iter_mut().enumerate() {
            let at = HDR_REGIONS + i * 8;
            *span = Span::new(word(at), word(at + 4));
        }
        Self {
            magic,
            ipc_version: word(HDR_VERSION),
            spans,
            chubclk: word(HDR_CHUBCLK),
            bootmode: word(HDR_BOOTMODE),
        }
    }

    pub fn read_from<S: SharedMem + ?Sized>(shm: &S, at: usize) -> Self {
        let mut raw = [0u8; MAP_HEADER_LEN];
        shm.read_bytes(at, &mut raw);
        Self::from_le_bytes(&raw)
    }

    pub fn write_to<S: SharedMem + ?Sized>(&self, shm: &S, at: usize) {
        shm.write_bytes(at, &self.to_le_bytes());
    }
}

/// Byte offset (inside the shared window) and size/stride of one region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub base: usize,
    /// Region size, or the per-slot stride for slotted regions.
    pub offset: u32,
}

impl Region {
    pub const fn new(base: usize, offset: u32) -> Self {
        Self { base, offset }
    }

    /// Address of slot `n` for slotted regions.
    pub const fn slot(&self, n: usize) -> usize {
        self.base + self.offset as usize * n
    }
}

/// Region table, written once by bootstrap and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMap {
    regions: [Region; RegionKind::COUNT],
}

impl RegionMap {
    pub(crate) fn new(regions: [Region; RegionKind::COUNT]) -> Self {
        Self { regions }
    }

    pub fn get(&self, kind: RegionKind) -> Region {
        self.regions[kind as usize]
    }

    pub fn base(&self, kind: RegionKind) -> usize {
        self.get(kind).base
    }

    pub fn size(&self, kind: RegionKind) -> u32 {
        self.get(kind).offset
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegionKind, Region)> + '_ {
        RegionKind::ALL.iter().map(move |k| (*k, self.get(*k)))
    }
}

/// Offsets of every structure inside the control block for one geometry and
/// data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlLayout {
    pub plane: DataPlane,
    pub geometry: Geometry,
    /// Data block per lane, indexed by [`Lane::index`].
    pub data: [usize; 2],
    /// Ring block size, or packet slot stride.
    pub data_stride: usize,
    pub evt_ctrl: [usize; 2],
    pub evt_data: [usize; 2],
    pub logbuf: usize,
    size: usize,
}

impl ControlLayout {
    pub fn new(plane: DataPlane, geometry: Geometry) -> Self {
        let (data_stride, data_block) = match plane {
            DataPlane::Ring => {
                let block = RING_BUF + align4(geometry.data_capacity);
                (block, block)
            }
            DataPlane::Channel => {
                let stride = CH_BUF + align4(geometry.packet_max);
                (stride, stride * geometry.channel_slots)
            }
        };
        let evt_block = EVT_CTRL_LEN + EVT_REC_LEN * geometry.event_slots;

        let mut cursor = 0;
        let mut data = [0; 2];
        for slot in data.iter_mut() {
            *slot = cursor;
            cursor += data_block;
        }
        let mut evt_ctrl = [0; 2];
        let mut evt_data = [0; 2];
        for lane in Lane::ALL {
            evt_ctrl[lane.index()] = cursor;
            evt_data[lane.index()] = cursor + EVT_CTRL_LEN;
            cursor += evt_block;
        }
        let logbuf = cursor;
        cursor += LOG_HDR_LEN;

        Self { plane, geometry, data, data_stride, evt_ctrl, evt_data, logbuf, size: cursor }
    }

    /// Size of the control block; the log characters start right after it.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn ring_block(&self) -> usize {
        RING_BUF + align4(self.geometry.data_capacity)
    }
}
