// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Region map bootstrap from the boot header
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 6 unit tests, `tests/bootstrap.rs`
//!
//! `attach` validates the header written by the boot loader and derives the
//! base and size of every region. Nothing is written to shared memory unless
//! the whole header checks out.

use log::{error, info};

use crate::error::LayoutError;
use crate::layout::{
    ControlLayout, Lane, MapHeader, Region, RegionKind, RegionMap, EVT_CTRL_LEN, EVT_REC_LEN,
    IPC_VERSION, MAP_HEADER_LEN, MAP_INFO_OFFSET,
};
use crate::logbuf::LogRing;
use crate::shm::SharedMem;

/// Whether the attaching side also formats the log area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapRole {
    /// Owns the memory: resets the log token and zeroes stale text.
    Owner,
    /// Maps memory another core already formatted.
    Attacher,
}

/// Reads the boot header at `boot_base + MAP_INFO_OFFSET` and builds the
/// region map for `control`.
pub fn attach<S: SharedMem + ?Sized>(
    shm: &S,
    boot_base: usize,
    control: &ControlLayout,
    role: BootstrapRole,
) -> Result<RegionMap, LayoutError> {
    let header_at = boot_base + MAP_INFO_OFFSET;
    if header_at + MAP_HEADER_LEN > shm.len() {
        return Err(LayoutError::RegionOutOfBounds { kind: RegionKind::BlMap });
    }
    let header = MapHeader::read_from(shm, header_at);

    if !header.magic_ok() {
        error!(
            target: "chub_ipc::boot",
            "{header_at:#x} has wrong magic key: {:?}",
            String::from_utf8_lossy(&header.magic)
        );
        return Err(LayoutError::BadMagic);
    }
    if header.ipc_version != IPC_VERSION {
        error!(
            target: "chub_ipc::boot",
            "ipc_version doesn't match: ours {IPC_VERSION}, boot header {}",
            header.ipc_version
        );
        return Err(LayoutError::VersionMismatch { expected: IPC_VERSION, found: header.ipc_version });
    }

    let mut regions = [Region::default(); RegionKind::COUNT];
    for (kind, span) in RegionKind::HEADER_ORDER.iter().zip(header.spans) {
        if span.end < span.start {
            return Err(LayoutError::InvertedRegion { kind: *kind });
        }
        if boot_base + span.end as usize > shm.len() {
            return Err(LayoutError::RegionOutOfBounds { kind: *kind });
        }
        regions[*kind as usize] = Region::new(boot_base + span.start as usize, span.end - span.start);
    }
    regions[RegionKind::BlMap as usize] = Region::new(header_at, MAP_HEADER_LEN as u32);

    let ipc = regions[RegionKind::Ipc as usize];
    if ipc.base % 4 != 0 {
        return Err(LayoutError::Misaligned { kind: RegionKind::Ipc });
    }
    let needed = control.size();
    let available = ipc.offset as usize;
    if available < needed {
        return Err(LayoutError::RegionTooSmall { needed, available });
    }

    for lane in Lane::ALL {
        let i = lane.index();
        regions[RegionKind::data(lane) as usize] =
            Region::new(ipc.base + control.data[i], control.data_stride as u32);
        regions[RegionKind::evt_ctrl(lane) as usize] =
            Region::new(ipc.base + control.evt_ctrl[i], EVT_CTRL_LEN as u32);
        regions[RegionKind::evt_data(lane) as usize] =
            Region::new(ipc.base + control.evt_data[i], EVT_REC_LEN as u32);
    }
    let log_len = (available - needed) as u32;
    regions[RegionKind::Log as usize] = Region::new(ipc.base + needed, log_len);

    let map = RegionMap::new(regions);
    let log = LogRing::new(shm, ipc.base + control.logbuf, map.base(RegionKind::Log));
    log.format(log_len, role == BootstrapRole::Owner);

    info!(target: "chub_ipc::boot", "contexthub map information (v{})", header.ipc_version);
    for kind in RegionKind::HEADER_ORDER {
        let region = map.get(kind);
        info!(target: "chub_ipc::boot", "\t{kind:?} ({:#x} {})", region.base, region.offset);
    }
    Ok(map)
}
