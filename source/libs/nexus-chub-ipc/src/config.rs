// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Link configuration, loaded from TOML.
//!
//! ```toml
//! side = "ap"
//! data_plane = "ring"
//!
//! [geometry]
//! data_capacity = 4096
//! packet_max = 272
//!
//! [retry]
//! attempts = 5
//! wait_ms = 10
//!
//! [policy]
//! log_full = "raise-debug-event"
//! event_queue_full = "report"
//! ```
//!
//! Every field is optional. Both cores must load the same `data_plane` and
//! `[geometry]`; the control block layout is derived from them.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, IpcError};
use crate::event::EventCode;
use crate::layout::{DataPlane, Geometry, Lane};
use crate::mailbox::MAILBOX_LINES;

/// Core a context runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Ap,
    Chub,
}

impl Side {
    /// Lane this side produces into.
    pub const fn tx_lane(self) -> Lane {
        match self {
            Side::Ap => Lane::A2c,
            Side::Chub => Lane::C2a,
        }
    }

    /// Lane this side consumes from.
    pub const fn rx_lane(self) -> Lane {
        match self {
            Side::Ap => Lane::C2a,
            Side::Chub => Lane::A2c,
        }
    }

    pub const fn peer(self) -> Side {
        match self {
            Side::Ap => Side::Chub,
            Side::Chub => Side::Ap,
        }
    }
}

/// Bounded wait for a full event queue. Only the CHUB side waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub wait_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 5, wait_ms: 10 }
    }
}

/// What `put` does when the log writer catches up with the reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFullAction {
    Ignore,
    #[default]
    RaiseDebugEvent,
}

/// What happens after an enqueue exhausts its retry budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventQueueFullAction {
    /// Return the error to the caller.
    #[default]
    Report,
    /// Also call [`PolicyHooks::escalate`].
    Escalate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub log_full: LogFullAction,
    pub event_queue_full: EventQueueFullAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpcConfig {
    pub side: Side,
    pub data_plane: DataPlane,
    pub geometry: Geometry,
    pub retry: RetryPolicy,
    pub policy: Policy,
}

impl IpcConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: IpcConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
    }

    /// Rejects geometries the control block cannot represent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check().map_err(ConfigError::Invalid)
    }

    pub(crate) fn check(&self) -> Result<(), &'static str> {
        let g = &self.geometry;
        if g.event_slots == 0 {
            return Err("event_slots must be at least 1");
        }
        if g.irq_start >= g.irq_end || g.irq_end > MAILBOX_LINES {
            return Err("irq range must be non-empty and within 16 lines");
        }
        if g.packet_max == 0 || g.packet_max > usize::from(u16::MAX) {
            return Err("packet_max must fit the 16-bit length prefix");
        }
        match self.data_plane {
            DataPlane::Ring if g.data_capacity < g.packet_max + 2 => {
                Err("data_capacity must hold one max-size frame")
            }
            DataPlane::Ring if g.data_capacity > u32::MAX as usize => {
                Err("data_capacity must fit a 32-bit index")
            }
            DataPlane::Channel if g.channel_slots == 0 => {
                Err("channel_slots must be at least 1")
            }
            DataPlane::Channel if g.channel_slots > EventCode::CHANNELS.len() => {
                Err("more channel slots than data channel codes")
            }
            _ => Ok(()),
        }
    }
}

/// Escalation points for conditions the transport only reports.
///
/// The defaults do nothing; a platform layer can reset the link from here.
pub trait PolicyHooks: Send + Sync {
    /// Called after an enqueue gave up with `err` and the policy asks for escalation.
    fn escalate(&self, _lane: Lane, _err: IpcError) {}

    /// Called when the log writer overran unread text.
    fn log_overrun(&self) {}
}

/// Hooks that only rely on the returned errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl PolicyHooks for NoHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = IpcConfig::from_toml_str("").unwrap();
        assert_eq!(config, IpcConfig::default());
        assert_eq!(config.retry, RetryPolicy { attempts: 5, wait_ms: 10 });
        assert_eq!(config.policy.log_full, LogFullAction::RaiseDebugEvent);
        assert_eq!(config.geometry.packet_max, 272);
    }

    #[test]
    fn parses_all_sections() {
        let config = IpcConfig::from_toml_str(
            r#"
            side = "chub"
            data_plane = "channel"

            [geometry]
            packet_max = 64
            channel_slots = 2

            [retry]
            attempts = 1

            [policy]
            log_full = "ignore"
            event_queue_full = "escalate"
            "#,
        )
        .unwrap();
        assert_eq!(config.side, Side::Chub);
        assert_eq!(config.data_plane, DataPlane::Channel);
        assert_eq!(config.geometry.channel_slots, 2);
        assert_eq!(config.geometry.event_slots, 15);
        assert_eq!(config.retry.wait_ms, 10);
        assert_eq!(config.policy.event_queue_full, EventQueueFullAction::Escalate);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_geometry() {
        assert!(matches!(
            IpcConfig::from_toml_str("[geometry]\nslots = 3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            IpcConfig::from_toml_str("[geometry]\nirq_end = 17"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            IpcConfig::from_toml_str("[geometry]\ndata_capacity = 100\npacket_max = 99"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            IpcConfig::from_toml_str("data_plane = \"channel\"\n[geometry]\nchannel_slots = 4"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn sides_own_opposite_lanes() {
        assert_eq!(Side::Ap.tx_lane(), Side::Chub.rx_lane());
        assert_eq!(Side::Chub.tx_lane(), Lane::C2a);
        assert_eq!(Side::Ap.peer(), Side::Chub);
    }
}
