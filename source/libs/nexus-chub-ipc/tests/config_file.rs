// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use nexus_chub_ipc::{ConfigError, DataPlane, IpcConfig, LogFullAction, Side};
use tempfile::NamedTempFile;

#[test]
fn loads_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
side = "chub"
data_plane = "channel"

[geometry]
packet_max = 128
channel_slots = 3

[policy]
log_full = "ignore"
"#
    )
    .unwrap();

    let config = IpcConfig::load(file.path()).unwrap();
    assert_eq!(config.side, Side::Chub);
    assert_eq!(config.data_plane, DataPlane::Channel);
    assert_eq!(config.geometry.packet_max, 128);
    assert_eq!(config.policy.log_full, LogFullAction::Ignore);
    assert_eq!(config.retry.attempts, 5);
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    match IpcConfig::load(&path) {
        Err(ConfigError::Read { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn serialised_config_loads_back() {
    let mut config = IpcConfig::default();
    config.geometry.event_slots = 8;
    config.retry.wait_ms = 1;
    let text = toml::to_string(&config).unwrap();

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    assert_eq!(IpcConfig::load(file.path()).unwrap(), config);
}
