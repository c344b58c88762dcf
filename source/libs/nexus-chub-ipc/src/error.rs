// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for attach, transport and configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::layout::RegionKind;
use crate::mailbox::Owner;

/// Result alias for transport operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Attach failures. All of them are fatal: no region map is produced.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// The header magic does not match the compiled-in string.
    #[error("boot header has wrong magic")]
    BadMagic,
    /// Both cores were built against different layouts.
    #[error("ipc version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    /// A region extends past the shared-memory window.
    #[error("region {kind:?} lies outside shared memory")]
    RegionOutOfBounds { kind: RegionKind },
    /// A region's end offset precedes its start offset.
    #[error("region {kind:?} ends before it starts")]
    InvertedRegion { kind: RegionKind },
    /// A region holding control words does not start on a word boundary.
    #[error("region {kind:?} is not 4-byte aligned")]
    Misaligned { kind: RegionKind },
    /// The ipc region cannot hold the control block.
    #[error("ipc region too small: need {needed} bytes, have {available}")]
    RegionTooSmall { needed: usize, available: usize },
    /// The configuration handed to the builder is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Transport failures.
///
/// `Full`, `Empty` and `WouldBlock` are normal and retryable; `Corrupt` and
/// `BadIndex` mean the two sides disagree about the queue contents and need a
/// reset by the caller.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[must_use = "ipc errors must be handled"]
pub enum IpcError {
    /// Not enough free space for the frame.
    #[error("buffer full")]
    Full,
    /// Nothing to read.
    #[error("buffer empty")]
    Empty,
    /// A frame is announced but not completely visible yet.
    #[error("frame incomplete, retry")]
    WouldBlock,
    /// The length prefix is out of bounds.
    #[error("corrupt frame length {len}")]
    Corrupt { len: usize },
    /// A shared index written by the peer lies outside its queue.
    #[error("shared index {index} outside 0..{limit}")]
    BadIndex { index: usize, limit: usize },
    /// The event queue stayed full for the whole retry budget.
    #[error("event queue full")]
    EventQueueFull,
    /// Payload longer than the shared packet bound.
    #[error("payload of {len} bytes exceeds max {max}")]
    InvalidLength { len: usize, max: usize },
    /// Caller buffer cannot hold the next frame.
    #[error("receive buffer too small, need {needed} bytes")]
    BufferTooSmall { needed: usize },
    /// An event record carries a code this build does not know.
    #[error("unknown event code {0:#x}")]
    UnknownEvent(u32),
    /// The lane is written by the other core.
    #[error("lane not owned by this side")]
    WrongDirection,
    /// No mailbox registered for the owner.
    #[error("no mailbox attached for {0:?}")]
    NoMailbox(Owner),
    /// Event names a data channel the channel plane does not have.
    #[error("no such data channel")]
    NoChannel,
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}
