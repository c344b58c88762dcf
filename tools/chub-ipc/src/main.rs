// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Host tool for CHUB shared-memory images
//! OWNERS: @tools-team
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 6 unit tests
//!
//! PUBLIC API:
//!   - CLI: chubipc [--config <toml>] [-v] layout [--json]
//!   - CLI: chubipc mkimage <out> [--log-len N] [--chubclk HZ] [--bootmode M]
//!   - CLI: chubipc inspect <image> [--boot-base OFF] [--json]
//!   - CLI: chubipc loopback [--frames N] [--seed S]
//!
//! DEPENDENCIES:
//!   - nexus-chub-ipc: layout, bootstrap and transport
//!   - clap: argument parsing
//!   - env_logger: `RUST_LOG` / `-v` controlled diagnostics
//!   - serde_json: machine-readable reports
//!   - rand: seeded payloads for loopback

use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use log::info;
use nexus_chub_ipc::layout::MAP_INFO_OFFSET;
use nexus_chub_ipc::{
    BootstrapRole, ControlLayout, DataPlane, HostShm, Incoming, Ipc, IpcBuilder, IpcConfig,
    IpcError, IpcSnapshot, Lane, MapHeader, Owner, Region, RegionKind, SharedMem, Side, SimMailbox,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "chubipc", version, about = "Inspect and exercise AP/CHUB shared-memory IPC")]
struct Cli {
    /// Link configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the control block layout for the configured geometry.
    Layout {
        #[arg(long)]
        json: bool,
    },
    /// Write a shared-memory image with a valid boot header and an initialised control block.
    Mkimage {
        output: PathBuf,
        /// Bytes reserved for log text after the control block.
        #[arg(long, default_value_t = 1024)]
        log_len: usize,
        #[arg(long, default_value_t = 0)]
        chubclk: u32,
        #[arg(long, default_value_t = 0)]
        bootmode: u32,
    },
    /// Attach to an image file and print regions, queue state and pending log text.
    Inspect {
        image: PathBuf,
        /// Offset of the boot region inside the image.
        #[arg(long, default_value_t = 0)]
        boot_base: usize,
        #[arg(long)]
        json: bool,
    },
    /// Run a seeded AP/CHUB exchange through the software mailbox.
    Loopback {
        #[arg(long, default_value_t = 1000)]
        frames: usize,
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => IpcConfig::load(path)?,
        None => IpcConfig::default(),
    };

    match cli.command {
        Command::Layout { json } => print!("{}", layout_report(&config, json)?),
        Command::Mkimage { output, log_len, chubclk, bootmode } => {
            let image = build_image(&config, log_len, chubclk, bootmode)?;
            fs::write(&output, &image)?;
            println!("wrote {} bytes to {}", image.len(), output.display());
        }
        Command::Inspect { image, boot_base, json } => {
            print!("{}", inspect(&config, &image, boot_base, json)?)
        }
        Command::Loopback { frames, seed } => {
            let stats = loopback(&config, frames, seed)?;
            println!(
                "loopback ok: {} frames, {} bytes each way, {} full retries (seed {seed})",
                stats.frames, stats.bytes, stats.full_retries
            );
        }
    }
    Ok(())
}

fn with_side(config: &IpcConfig, side: Side) -> IpcConfig {
    IpcConfig { side, ..config.clone() }
}

fn layout_report(config: &IpcConfig, json: bool) -> CliResult<String> {
    let control = ControlLayout::new(config.data_plane, config.geometry);
    if json {
        return Ok(serde_json::to_string_pretty(&control)? + "\n");
    }
    let mut out = String::new();
    writeln!(out, "plane {:?}, control block {} bytes", control.plane, control.size())?;
    for lane in Lane::ALL {
        writeln!(
            out,
            "  data-{}      @{:#06x} stride {}",
            lane.name(),
            control.data[lane.index()],
            control.data_stride
        )?;
    }
    for lane in Lane::ALL {
        writeln!(
            out,
            "  evt-{}-ctrl  @{:#06x}\n  evt-{}-data  @{:#06x} x{}",
            lane.name(),
            control.evt_ctrl[lane.index()],
            lane.name(),
            control.evt_data[lane.index()],
            control.geometry.event_slots
        )?;
    }
    writeln!(out, "  logbuf       @{:#06x}", control.logbuf)?;
    Ok(out)
}

fn build_image(config: &IpcConfig, log_len: usize, chubclk: u32, bootmode: u32) -> CliResult<Vec<u8>> {
    let control = ControlLayout::new(config.data_plane, config.geometry);
    let mut header = MapHeader::contiguous(&control, log_len);
    header.chubclk = chubclk;
    header.bootmode = bootmode;
    let shm = HostShm::new(header.image_len());
    header.write_to(&shm, MAP_INFO_OFFSET);

    let mbox = SimMailbox::new();
    let owner = IpcBuilder::new(with_side(config, Side::Chub))
        .mailbox(Owner::Ap, &mbox)
        .attach(shm.clone(), 0, BootstrapRole::Owner)?;
    owner.init()?;
    info!("image: {} bytes, ipc at {:#x}", shm.len(), owner.regions().base(RegionKind::Ipc));
    Ok(shm.to_image())
}

#[derive(Debug, Serialize)]
struct RegionEntry {
    kind: RegionKind,
    #[serde(flatten)]
    region: Region,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    chubclk: u32,
    bootmode: u32,
    chub_mem_size: u32,
    regions: Vec<RegionEntry>,
    snapshot: IpcSnapshot,
    log: String,
}

fn inspect(config: &IpcConfig, path: &Path, boot_base: usize, json: bool) -> CliResult<String> {
    let image = fs::read(path)?;
    let shm = HostShm::from_image(&image);
    let mbox = SimMailbox::new();
    let ap = IpcBuilder::new(with_side(config, Side::Ap))
        .mailbox(Owner::Ap, &mbox)
        .attach(shm, boot_base, BootstrapRole::Attacher)?;

    let report = InspectReport {
        chubclk: ap.chub_clk(),
        bootmode: ap.bootmode(),
        chub_mem_size: ap.chub_mem_size(),
        regions: ap.regions().iter().map(|(kind, region)| RegionEntry { kind, region }).collect(),
        snapshot: ap.dump(),
        log: String::from_utf8_lossy(&ap.log_drain()).into_owned(),
    };
    if json {
        return Ok(serde_json::to_string_pretty(&report)? + "\n");
    }

    let mut out = String::new();
    writeln!(out, "chubclk {} bootmode {} mem {}", report.chubclk, report.bootmode, report.chub_mem_size)?;
    for entry in &report.regions {
        writeln!(out, "  {:<12} {:#08x} {}", format!("{:?}", entry.kind), entry.region.base, entry.region.offset)?;
    }
    for lane in &report.snapshot.lanes {
        writeln!(
            out,
            "evt-{}: eq {} dq {} full {} irq {}",
            lane.lane.name(),
            lane.events.eq,
            lane.events.dq,
            lane.events.full,
            lane.events.irq
        )?;
        writeln!(out, "data-{}: {}", lane.lane.name(), serde_json::to_string(&lane.data)?)?;
    }
    writeln!(out, "log ({} bytes pending):", report.log.len())?;
    out.push_str(&report.log);
    if !report.log.is_empty() && !report.log.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LoopbackStats {
    frames: usize,
    bytes: usize,
    full_retries: usize,
}

type Link = Ipc<HostShm, Arc<SimMailbox>>;

fn loopback_pair(config: &IpcConfig) -> CliResult<(Link, Link)> {
    let control = ControlLayout::new(config.data_plane, config.geometry);
    let header = MapHeader::contiguous(&control, 256);
    let shm = HostShm::new(header.image_len());
    header.write_to(&shm, MAP_INFO_OFFSET);
    let mbox = Arc::new(SimMailbox::new());

    let chub = IpcBuilder::new(with_side(config, Side::Chub))
        .mailbox(Owner::Ap, mbox.clone())
        .attach(shm.clone(), 0, BootstrapRole::Owner)?;
    chub.init()?;
    let ap = IpcBuilder::new(with_side(config, Side::Ap))
        .mailbox(Owner::Ap, mbox)
        .attach(shm, 0, BootstrapRole::Attacher)?;
    Ok((ap, chub))
}

/// Acks every pending doorbell and collects the frames they announce.
fn service(link: &Link, buf: &mut [u8]) -> CliResult<Vec<Vec<u8>>> {
    let pending = link.pending_irqs()?;
    for irq in 0..16 {
        if pending & (1 << irq) != 0 {
            link.ack(irq)?;
        }
    }
    let mut frames = Vec::new();
    while let Some(incoming) = link.recv(link.side().rx_lane(), buf)? {
        match incoming {
            Incoming::Data { len, .. } => frames.push(buf[..len].to_vec()),
            Incoming::Event(rec) => info!("{:?}: side event {:?}", link.side(), rec.code),
        }
    }
    Ok(frames)
}

/// Sends up to `batch` frames from `queue` on `link`, stopping at the first
/// full condition. Returns how many went out.
fn send_batch(link: &Link, queue: &[Vec<u8>], batch: usize, stats: &mut LoopbackStats) -> CliResult<usize> {
    let lane = link.side().tx_lane();
    let mut sent = 0;
    for frame in queue.iter().take(batch) {
        match link.write_data(lane, frame) {
            Ok(()) => sent += 1,
            Err(IpcError::Full | IpcError::EventQueueFull) => {
                stats.full_retries += 1;
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(sent)
}

fn loopback(config: &IpcConfig, frames: usize, seed: u64) -> CliResult<LoopbackStats> {
    let (ap, chub) = loopback_pair(config)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let g = config.geometry;
    let burst = match config.data_plane {
        DataPlane::Ring => 4,
        DataPlane::Channel => g.channel_slots,
    }
    .min(g.event_slots)
    .max(1);

    let payloads: Vec<Vec<u8>> = (0..frames)
        .map(|_| {
            let mut payload = vec![0u8; rng.gen_range(0..=g.packet_max)];
            rng.fill(&mut payload[..]);
            payload
        })
        .collect();

    let mut stats = LoopbackStats::default();
    let mut buf = vec![0u8; g.packet_max];
    let mut next = 0;
    while next < payloads.len() {
        let batch = rng.gen_range(1..=burst);
        let sent = send_batch(&ap, &payloads[next..], batch, &mut stats)?;
        if sent == 0 {
            return Err(format!("frame {next} does not fit an empty ring").into());
        }
        let expected = &payloads[next..next + sent];

        let received = service(&chub, &mut buf)?;
        if received != expected {
            return Err(format!("a2c mismatch in frames {next}..{}", next + sent).into());
        }
        let echoed = send_batch(&chub, &received, sent, &mut stats)?;
        if echoed != sent {
            return Err(format!("c2a lane refused echo of frames {next}..{}", next + sent).into());
        }
        let returned = service(&ap, &mut buf)?;
        if returned != expected {
            return Err(format!("c2a mismatch in frames {next}..{}", next + sent).into());
        }
        stats.frames += sent;
        stats.bytes += expected.iter().map(Vec::len).sum::<usize>();
        next += sent;
    }
    info!("loopback done: {stats:?}");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_chub_ipc::Geometry;

    fn small(plane: DataPlane) -> IpcConfig {
        IpcConfig {
            data_plane: plane,
            geometry: Geometry { data_capacity: 256, packet_max: 48, ..Geometry::default() },
            ..IpcConfig::default()
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["chubipc", "-vv", "loopback", "--frames", "5"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Loopback { frames: 5, seed: 1 }));
    }

    #[test]
    fn layout_lists_every_block() {
        let text = layout_report(&IpcConfig::default(), false).unwrap();
        assert!(text.starts_with("plane Ring, control block"));
        assert!(text.contains("data-a2c"));
        assert!(text.contains("evt-c2a-data"));
        let json = layout_report(&IpcConfig::default(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["geometry"]["packet_max"], 272);
    }

    #[test]
    fn mkimage_then_inspect() {
        let config = small(DataPlane::Ring);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chub.img");
        fs::write(&path, build_image(&config, 128, 26_000_000, 1).unwrap()).unwrap();

        let json = inspect(&config, &path, 0, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["chubclk"], 26_000_000);
        assert_eq!(value["bootmode"], 1);
        assert_eq!(value["snapshot"]["lanes"][0]["data"]["ring"]["empty"], true);
        assert_eq!(value["snapshot"]["log"]["size"], 128);
        assert_eq!(value["regions"].as_array().map(Vec::len), Some(RegionKind::COUNT));

        let text = inspect(&config, &path, 0, false).unwrap();
        assert!(text.contains("evt-a2c: eq 0 dq 0 full false"));
    }

    #[test]
    fn inspect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.img");
        fs::write(&path, vec![0u8; 0x1000]).unwrap();
        let err = inspect(&IpcConfig::default(), &path, 0, false).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn loopback_ring_and_channel() {
        for plane in [DataPlane::Ring, DataPlane::Channel] {
            let stats = loopback(&small(plane), 200, 7).unwrap();
            assert_eq!(stats.frames, 200);
        }
    }

    #[test]
    fn loopback_is_deterministic_per_seed() {
        let a = loopback(&small(DataPlane::Ring), 50, 42).unwrap();
        let b = loopback(&small(DataPlane::Ring), 50, 42).unwrap();
        assert_eq!(a, b);
    }
}
