// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet metadata administration library

use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use pcap_parser::Linktype;
use pcap_parser::pcap;
use pktmeta::runtime::Runtime;
use pktmeta_api::ThreadType;
use slog::Drain;
use slog::Logger;
use slog::o;
use std::path::Path;

pub const MAJOR_VERSION: u64 = 0;

/// One frame read from a capture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapturedFrame {
    /// The bytes that were captured.
    pub data: Vec<u8>,
    /// The length of the frame on the wire, which is larger than
    /// `data` when the capture was truncated by its snap length.
    pub orig_len: usize,
}

/// Read every frame of a legacy pcap capture of Ethernet frames.
pub fn read_capture(path: &Path) -> anyhow::Result<Vec<CapturedFrame>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_capture(&bytes)
}

pub fn parse_capture(bytes: &[u8]) -> anyhow::Result<Vec<CapturedFrame>> {
    let (mut rest, hdr) = pcap::parse_pcap_header(bytes)
        .map_err(|e| anyhow!("bad capture header: {e:?}"))?;

    if hdr.network != Linktype::ETHERNET {
        bail!("unsupported link type {}", hdr.network.0);
    }

    let parse_frame = if hdr.is_bigendian() {
        pcap::parse_pcap_frame_be
    } else {
        pcap::parse_pcap_frame
    };

    let mut frames = vec![];
    while !rest.is_empty() {
        let (next, block) = parse_frame(rest).map_err(|e| {
            anyhow!("bad capture record {}: {e:?}", frames.len())
        })?;

        frames.push(CapturedFrame {
            data: block.data.to_vec(),
            orig_len: block.origlen as usize,
        });
        rest = next;
    }

    Ok(frames)
}

/// Bring `rt` up, run `f` on a control thread, and tear `rt` down
/// again.
///
/// Local and global tear-down both run whatever happens before them.
/// The first failure is returned: that of `f`, then the local term,
/// then the global term. Term failures are logged by the runtime as
/// they happen.
pub fn with_runtime<T>(
    rt: &mut Runtime,
    f: impl FnOnce(&Runtime) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    rt.init()?;

    let res = match rt.init_local(ThreadType::Control) {
        Ok(guard) => {
            let res = f(rt);
            let local = rt.term_local(guard);
            res.and_then(|v| local.map(|()| v).map_err(anyhow::Error::from))
        }
        Err(e) => Err(e.into()),
    };

    let global = rt.term();
    let v = res?;
    global?;
    Ok(v)
}

/// A terminal logger filtered by `RUST_LOG`.
pub fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).ignore_res();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "pktmetaadm"))
}
