// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory IPC between the application processor (AP) and the sensor hub (CHUB)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module; integration tests in `tests/`
//!
//! PUBLIC API:
//!   - IpcBuilder / Ipc: per-core link context (attach, init, send, receive, diagnostics)
//!   - attach: region map bootstrap from the boot header
//!   - DataRing / ChannelPlane: the two data-plane wire formats
//!   - EventQueue: fixed-slot event records
//!   - Mailbox / SimMailbox: doorbell register block over `nexus_hal::Bus`
//!   - LogRing: cross-core diagnostic text
//!   - IpcConfig: TOML configuration
//!
//! DEPENDENCIES:
//!   - nexus-hal: Bus, Timer and Delay traits
//!   - log: diagnostics under the `chub_ipc::*` targets
//!   - serde/toml: configuration and snapshots
//!   - thiserror: error enums
//!
//! Both cores attach to one shared window. The CHUB side owns the memory:
//! it attaches as [`BootstrapRole::Owner`] and calls [`Ipc::init`]; the AP
//! side attaches as [`BootstrapRole::Attacher`].

#![forbid(unsafe_op_in_unsafe_fn)]

pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod ipc;
pub mod layout;
pub mod logbuf;
pub mod mailbox;
pub mod ring;
pub mod shm;

pub use bootstrap::{attach, BootstrapRole};
pub use channel::{ChannelPlane, ChannelStatus};
pub use config::{
    EventQueueFullAction, IpcConfig, LogFullAction, NoHooks, Policy, PolicyHooks, RetryPolicy,
    Side,
};
pub use error::{ConfigError, IpcError, LayoutError, Result};
pub use event::{EventCode, EventQueue, EventRecord, EvtStatus};
pub use ipc::{DataSnapshot, Incoming, Ipc, IpcBuilder, IpcSnapshot, LaneSnapshot};
pub use layout::{ControlLayout, DataPlane, Geometry, Lane, MapHeader, Region, RegionKind, RegionMap};
pub use logbuf::LogRing;
pub use mailbox::{DebugEvent, Mailbox, MailboxSide, Owner, SimMailbox};
pub use ring::DataRing;
pub use shm::{HostShm, MappedShm, SharedMem};
