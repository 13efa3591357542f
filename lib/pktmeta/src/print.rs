// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print packet metadata and runtime state in a human-friendly manner.
//!
//! These routines are shared by pktmetaadm and the integration tests.

use crate::engine::packet::Packet;
use crate::engine::packet::PacketMd;
use crate::runtime::Sequencer;
use crate::runtime::StageStatus;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use bitflags::Flags;
use pktmeta_api::Stage;
use serde::Serialize;
use std::io::Write;
use tabwriter::TabWriter;

/// A snapshot of one parsed packet's metadata, in a form that can be
/// printed or serialized.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PacketDump {
    pub index: usize,
    pub len: usize,
    pub frame_offset: u32,
    pub input_flags: String,
    pub error_flags: String,
    pub l2_offset: Option<u32>,
    pub l3_offset: Option<u32>,
    pub l4_offset: Option<u32>,
    pub payload_offset: Option<u32>,
    pub vlan_s_tag: Option<u32>,
    pub vlan_c_tag: Option<u32>,
    pub l3_protocol: u32,
    pub l3_len: u32,
    pub l4_protocol: u32,
    pub l4_len: u32,
}

impl PacketDump {
    pub fn new(index: usize, len: usize, md: &PacketMd) -> Self {
        Self {
            index,
            len,
            frame_offset: md.frame_offset(),
            input_flags: flag_names(&md.input_flags()),
            error_flags: flag_names(&md.error_flags()),
            l2_offset: md.l2_offset(),
            l3_offset: md.l3_offset(),
            l4_offset: md.l4_offset(),
            payload_offset: md.payload_offset(),
            vlan_s_tag: md.vlan_s_tag(),
            vlan_c_tag: md.vlan_c_tag(),
            l3_protocol: md.l3_protocol(),
            l3_len: md.l3_len(),
            l4_protocol: md.l4_protocol(),
            l4_len: md.l4_len(),
        }
    }

    /// Snapshot `pkt`, parsing it first if it has not been.
    pub fn from_packet(index: usize, pkt: &mut Packet) -> Self {
        let len = pkt.len();
        Self::new(index, len, pkt.meta())
    }
}

/// The names of the set bits, joined with `|`, or `-` if none are.
pub fn flag_names<F: Flags>(flags: &F) -> String {
    let names: Vec<&str> = flags.iter_names().map(|(n, _)| n).collect();
    if names.is_empty() { "-".to_string() } else { names.join("|") }
}

fn opt(v: Option<u32>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn tags(d: &PacketDump) -> String {
    match (d.vlan_s_tag, d.vlan_c_tag) {
        (None, None) => "-".to_string(),
        (s, c) => format!("{}/{}", opt(s), opt(c)),
    }
}

/// Print a table of [`PacketDump`]s.
pub fn print_packets(dumps: &[PacketDump]) -> std::io::Result<()> {
    print_packets_into(&mut std::io::stdout(), dumps)
}

/// Print a table of [`PacketDump`]s into a given writer.
pub fn print_packets_into(
    writer: &mut impl Write,
    dumps: &[PacketDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(
        t,
        "#\tLEN\tL2\tL3\tL4\tPAYLOAD\tVLAN\tL3 PROTO\tL3 LEN\tL4 PROTO\t\
         L4 LEN\tFLAGS\tERRORS"
    )?;

    for d in dumps {
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:#06x}\t{}\t{}\t{}\t{}\t{}",
            d.index,
            d.len,
            opt(d.l2_offset),
            opt(d.l3_offset),
            opt(d.l4_offset),
            opt(d.payload_offset),
            tags(d),
            d.l3_protocol,
            d.l3_len,
            d.l4_protocol,
            d.l4_len,
            d.input_flags,
            d.error_flags,
        )?;
    }
    t.flush()
}

/// Print the stage order, which stages have a per-thread variant and,
/// when given a sequencer, each stage's status.
pub fn print_stages_into(
    writer: &mut impl Write,
    seq: Option<&Sequencer>,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "#\tSTAGE\tLOCAL\tREGISTERED\tSTATUS")?;

    for stage in Stage::ALL {
        let (registered, status) = match seq {
            Some(seq) => (seq.is_registered(stage), seq.status(stage)),
            None => (false, StageStatus::NotRun),
        };

        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}",
            stage.index(),
            stage,
            if stage.has_local() { "yes" } else { "no" },
            if registered { "yes" } else { "no" },
            status,
        )?;
    }
    t.flush()
}
