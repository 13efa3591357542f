// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io;
use std::path::Path;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use slog::info;

use pktmeta::config::RuntimeConfig;
use pktmeta::engine::packet::Packet;
use pktmeta::print::PacketDump;
use pktmeta::print::print_packets;
use pktmeta::print::print_stages_into;
use pktmeta::runtime::Runtime;
use pktmeta::runtime::RuntimeCtx;
use pktmeta_api::API_VERSION;
use pktmetaadm::MAJOR_VERSION;
use pktmetaadm::read_capture;
use pktmetaadm::with_runtime;

/// Inspect packet metadata and runtime configuration
#[derive(Debug, Parser)]
#[command(version=pktmeta_pkg_version())]
enum Command {
    /// Parse every frame of a pcap capture and dump its metadata.
    Parse {
        /// The capture file.
        pcap: PathBuf,

        /// Runtime configuration; the defaults are used otherwise.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where the L2 header starts within each frame.
        #[arg(long, default_value_t = 0)]
        l2_offset: usize,

        /// Emit one JSON object per frame instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List the lifecycle stages in bring-up order.
    Stages,

    /// Load and validate a configuration file.
    CheckConfig { file: PathBuf },
}

fn pktmeta_pkg_version() -> String {
    format!("{MAJOR_VERSION}.{API_VERSION}")
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(p) => Ok(RuntimeConfig::load(p)?),
        None => Ok(RuntimeConfig::default()),
    }
}

fn parse_capture(
    rt: &Runtime,
    pcap: &Path,
    l2_offset: usize,
    json: bool,
) -> anyhow::Result<()> {
    let frames = read_capture(pcap)?;
    let pool = rt
        .pools()?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no pools configured"))?;

    let mut dumps = vec![];
    for (i, frame) in frames.iter().enumerate() {
        let mut pkt = Packet::copy_from(&pool, &frame.data)?;
        // Parse against the wire length so truncated captures are
        // flagged rather than silently accepted.
        pkt.parse(frame.orig_len, l2_offset);
        let dump = PacketDump::new(i, frame.orig_len, pkt.md());

        if json {
            println!("{}", serde_json::to_string(&dump)?);
        } else {
            dumps.push(dump);
        }
    }

    if !json {
        print_packets(&dumps)?;
    }

    info!(rt.ctx().log(), "parsed capture";
        "path" => %pcap.display(),
        "frames" => frames.len(),
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    match cmd {
        Command::Parse { pcap, config, l2_offset, json } => {
            let cfg = load_config(config.as_deref())?;
            let log = pktmetaadm::logger();
            let mut rt = Runtime::new(RuntimeCtx::new(cfg, log))?;
            with_runtime(&mut rt, |rt| {
                parse_capture(rt, &pcap, l2_offset, json)
            })?;
        }

        Command::Stages => {
            print_stages_into(&mut io::stdout(), None)?;
        }

        Command::CheckConfig { file } => {
            let cfg = RuntimeConfig::load(&file)?;
            println!(
                "{}: ok (headroom {}, {} pool(s))",
                file.display(),
                cfg.packet.headroom,
                cfg.pools.len()
            );
            for p in &cfg.pools {
                println!(
                    "  {}: {} x {} bytes, uarea {}",
                    p.name, p.num_blocks, p.block_len, p.uarea_size
                );
            }
        }
    }

    Ok(())
}
